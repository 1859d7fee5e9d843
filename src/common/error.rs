use thiserror::Error;

#[derive(Error, Debug)]
pub enum QzError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error{}: {message}", status_suffix(.status))]
    Api {
        status: Option<u16>,
        message: String,
    },

    #[error("Session expired: {0}")]
    SessionExpired(String),

    #[error("No cookie set, run `qzcli cookie -f <cookie_file>` or `qzcli login` first")]
    MissingCookie,

    #[error("Credentials not configured, run `qzcli init` first")]
    MissingCredentials,

    #[error("Workspace not found: {0}")]
    WorkspaceNotFound(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Interrupted")]
    Interrupted,
}

impl QzError {
    /// Build an API error, promoting 401s and expiry messages to `SessionExpired`.
    pub fn api(status: Option<u16>, message: impl Into<String>) -> Self {
        let message = message.into();
        if status == Some(401) || mentions_expiry(&message) {
            QzError::SessionExpired(message)
        } else {
            QzError::Api { status, message }
        }
    }

    pub fn is_session_expired(&self) -> bool {
        match self {
            QzError::SessionExpired(_) => true,
            QzError::Api { status, message } => *status == Some(401) || mentions_expiry(message),
            _ => false,
        }
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" ({})", s)).unwrap_or_default()
}

fn mentions_expiry(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("401") || lower.contains("expired") || message.contains("过期")
}

pub type Result<T> = std::result::Result<T, QzError>;
