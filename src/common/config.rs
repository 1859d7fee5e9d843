use crate::common::error::{QzError, Result};
use crate::common::types::{CookieSession, TokenCache};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const DEFAULT_API_BASE_URL: &str = "https://qz.sii.edu.cn";
pub const DEFAULT_CAS_LOGIN_URL: &str = "https://cas.sii.edu.cn/cas/login";

pub const CONFIG_FILE: &str = "config.json";
pub const JOBS_FILE: &str = "jobs.json";
pub const RESOURCES_FILE: &str = "resources.json";
pub const TOKEN_CACHE_FILE: &str = ".token_cache";
pub const COOKIE_FILE: &str = ".cookie";

/// Seconds of headroom required before a cached token counts as expired.
const TOKEN_EXPIRY_BUFFER_SECS: f64 = 300.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub username: String,
    pub password: String,
    pub token_cache_enabled: bool,
    pub cas_login_url: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            username: String::new(),
            password: String::new(),
            token_cache_enabled: true,
            cas_login_url: DEFAULT_CAS_LOGIN_URL.to_string(),
        }
    }
}

impl Config {
    /// Load the saved config and apply `QZCLI_*` environment overrides.
    pub fn load(state: &StateDir) -> Self {
        let mut config: Config = state.load_json(CONFIG_FILE);
        config.apply_env();
        config
    }

    pub fn save(&self, state: &StateDir) -> Result<()> {
        state.save_json(CONFIG_FILE, self)
    }

    /// Store credentials (and optionally a new API URL) in the saved config.
    pub fn init(
        state: &StateDir,
        username: &str,
        password: &str,
        api_base_url: Option<&str>,
    ) -> Result<Config> {
        let mut config: Config = state.load_json(CONFIG_FILE);
        config.username = username.to_string();
        config.password = password.to_string();
        if let Some(url) = api_base_url.filter(|u| !u.is_empty()) {
            config.api_base_url = url.to_string();
        }
        config.save(state)?;
        config.apply_env();
        Ok(config)
    }

    pub fn credentials(&self) -> Result<(&str, &str)> {
        if self.username.is_empty() || self.password.is_empty() {
            return Err(QzError::MissingCredentials);
        }
        Ok((&self.username, &self.password))
    }

    fn apply_env(&mut self) {
        let var = |key: &str| std::env::var(key).ok().filter(|v| !v.is_empty());

        if let Some(username) = var("QZCLI_USERNAME") {
            self.username = username;
        }
        if let Some(password) = var("QZCLI_PASSWORD") {
            self.password = password;
        }
        if let Some(url) = var("QZCLI_API_URL") {
            self.api_base_url = url;
        }
    }
}

/// The directory holding every persisted document.
///
/// Each document is loaded and saved independently. Loads never fail: a
/// missing or unreadable file yields the type's default. Saves go through a
/// temp file in the same directory that is renamed over the target, so a
/// failed write leaves the previous document intact. There is no locking;
/// concurrent invocations race on whole-file replacement.
#[derive(Debug, Clone)]
pub struct StateDir {
    root: PathBuf,
}

impl StateDir {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        StateDir {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// `$QZCLI_HOME`, falling back to `~/.qzcli`.
    pub fn default_location() -> Result<Self> {
        if let Some(home) = std::env::var_os("QZCLI_HOME").filter(|v| !v.is_empty()) {
            return Ok(Self::new(home));
        }
        let home = dirs::home_dir()
            .ok_or_else(|| QzError::Config("cannot determine home directory".to_string()))?;
        Ok(Self::new(home.join(".qzcli")))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub fn ensure(&self) -> Result<()> {
        fs::create_dir_all(&self.root)?;
        Ok(())
    }

    pub fn load_json<T: DeserializeOwned + Default>(&self, name: &str) -> T {
        let path = self.path(name);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return T::default(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "unreadable state file, using defaults");
                return T::default();
            }
        };

        match serde_json::from_str(&content) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "corrupt state file, using defaults");
                T::default()
            }
        }
    }

    pub fn save_json<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<()> {
        self.ensure()?;
        let content = serde_json::to_string_pretty(value)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&self.root)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.path(name)).map_err(|e| QzError::Io(e.error))?;

        tracing::debug!(file = name, bytes = content.len(), "saved state document");
        Ok(())
    }

    pub fn remove(&self, name: &str) -> Result<()> {
        match fs::remove_file(self.path(name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn load_cookie(&self) -> Option<CookieSession> {
        let session: CookieSession = self.load_json(COOKIE_FILE);
        if session.cookie.is_empty() {
            None
        } else {
            Some(session)
        }
    }

    pub fn save_cookie(&self, cookie: &str, workspace_id: &str) -> Result<CookieSession> {
        let session = CookieSession {
            cookie: cookie.to_string(),
            workspace_id: workspace_id.to_string(),
            saved_at: now_ts(),
        };
        self.save_json(COOKIE_FILE, &session)?;
        Ok(session)
    }

    pub fn clear_cookie(&self) -> Result<()> {
        self.remove(COOKIE_FILE)
    }

    /// The cached token, if it stays valid for at least the expiry buffer.
    pub fn load_token(&self) -> Option<String> {
        let cache: TokenCache = self.load_json(TOKEN_CACHE_FILE);
        if !cache.token.is_empty() && cache.expires_at > now_ts() + TOKEN_EXPIRY_BUFFER_SECS {
            Some(cache.token)
        } else {
            None
        }
    }

    pub fn save_token(&self, token: &str, expires_in_secs: u64) -> Result<()> {
        let cache = TokenCache {
            token: token.to_string(),
            expires_at: now_ts() + expires_in_secs as f64,
        };
        self.save_json(TOKEN_CACHE_FILE, &cache)
    }

    pub fn clear_token(&self) -> Result<()> {
        self.remove(TOKEN_CACHE_FILE)
    }
}

/// Current unix time in fractional seconds.
pub fn now_ts() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let state = StateDir::new(temp_dir.path());

        let config = Config {
            username: "alice".to_string(),
            password: "secret".to_string(),
            api_base_url: "https://example.test".to_string(),
            token_cache_enabled: false,
            ..Default::default()
        };
        config.save(&state).unwrap();

        let loaded: Config = state.load_json(CONFIG_FILE);
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_keys_fall_back_to_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let state = StateDir::new(temp_dir.path());
        fs::write(state.path(CONFIG_FILE), r#"{"username": "bob"}"#).unwrap();

        let loaded: Config = state.load_json(CONFIG_FILE);
        assert_eq!(loaded.username, "bob");
        assert_eq!(loaded.api_base_url, DEFAULT_API_BASE_URL);
        assert!(loaded.token_cache_enabled);
    }

    #[test]
    fn test_corrupt_documents_load_as_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let state = StateDir::new(temp_dir.path());
        fs::write(state.path(CONFIG_FILE), "{\"username\": \"tru").unwrap();
        fs::write(state.path(COOKIE_FILE), "not json").unwrap();

        let config: Config = state.load_json(CONFIG_FILE);
        assert_eq!(config, Config::default());
        assert!(state.load_cookie().is_none());
    }

    #[test]
    fn test_cookie_round_trip_and_clear() {
        let temp_dir = TempDir::new().unwrap();
        let state = StateDir::new(temp_dir.path().join("nested"));

        let saved = state.save_cookie("sid=abc", "ws-123").unwrap();
        assert_eq!(state.load_cookie(), Some(saved));

        state.clear_cookie().unwrap();
        assert!(state.load_cookie().is_none());
        // clearing twice is fine
        state.clear_cookie().unwrap();
    }

    #[test]
    fn test_token_cache_respects_expiry_buffer() {
        let temp_dir = TempDir::new().unwrap();
        let state = StateDir::new(temp_dir.path());

        state.save_token("short-lived", 60).unwrap();
        assert!(state.load_token().is_none());

        state.save_token("long-lived", 3600).unwrap();
        assert_eq!(state.load_token().as_deref(), Some("long-lived"));

        state.clear_token().unwrap();
        assert!(state.load_token().is_none());
    }

    #[test]
    fn test_save_replaces_whole_document() {
        let temp_dir = TempDir::new().unwrap();
        let state = StateDir::new(temp_dir.path());
        state.save_json("doc.json", &vec![1, 2, 3]).unwrap();
        state.save_json("doc.json", &vec![4]).unwrap();

        let loaded: Vec<i32> = state.load_json("doc.json");
        assert_eq!(loaded, vec![4]);

        // no temp files left behind
        let entries = fs::read_dir(temp_dir.path()).unwrap().count();
        assert_eq!(entries, 1);
    }
}
