pub mod payload;

use crate::common::config::{Config, StateDir};
use crate::common::error::{QzError, Result};
use async_trait::async_trait;
use indexmap::IndexMap;
use payload::{JobPage, NodePage, TaskPage, WorkspaceInfo};
use reqwest::cookie::{CookieStore, Jar};
use reqwest::{Client, StatusCode, Url};
use scraper::{Html, Selector};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// The remote platform, as far as the CLI needs it.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// A gateway of the same kind talking to the platform named by `config`.
    fn reconnect(&self, config: Config) -> Result<Self>
    where
        Self: Sized;

    /// Exchange credentials for a bearer token.
    async fn authenticate(&self, username: &str, password: &str) -> Result<String>;

    /// Sign in through CAS and return the platform cookie string.
    async fn login_with_cas(&self, username: &str, password: &str) -> Result<String>;

    async fn list_jobs(&self, workspace_id: &str, cookie: &str, page_size: u32) -> Result<JobPage>;

    async fn get_job_detail(&self, job_id: &str) -> Result<Value>;

    /// Fetch details one ID at a time. A failing ID gets an `{"error": ..}`
    /// entry instead of aborting the batch; only an expired session aborts.
    async fn get_jobs_detail(&self, job_ids: &[String]) -> Result<IndexMap<String, Value>> {
        let mut results = IndexMap::new();
        for job_id in job_ids {
            match self.get_job_detail(job_id).await {
                Ok(detail) => {
                    results.insert(job_id.clone(), detail);
                }
                Err(e) if e.is_session_expired() => return Err(e),
                Err(e) => {
                    tracing::warn!(job_id = %job_id, error = %e, "job detail request failed");
                    results.insert(job_id.clone(), json!({ "error": e.to_string() }));
                }
            }
        }
        Ok(results)
    }

    async fn stop_job(&self, job_id: &str) -> Result<bool>;

    async fn list_workspaces(&self, cookie: &str) -> Result<Vec<WorkspaceInfo>>;

    async fn list_workspace_tasks(
        &self,
        workspace_id: &str,
        cookie: &str,
        page_num: u32,
        page_size: u32,
        project_filter: Option<&str>,
    ) -> Result<TaskPage>;

    async fn list_node_dimension(
        &self,
        workspace_id: &str,
        cookie: &str,
        compute_group_id: &str,
        page_size: u32,
    ) -> Result<NodePage>;
}

/// Whether a `get_jobs_detail` entry carries the per-ID error marker.
pub fn is_error_entry(entry: &Value) -> bool {
    entry.get("error").is_some()
}

enum Auth<'a> {
    Anonymous,
    Bearer(String),
    Cookie(&'a str),
}

/// HTTP implementation of [`Gateway`].
pub struct ApiClient {
    http: Client,
    jar: Arc<Jar>,
    base_url: Url,
    config: Config,
    state: StateDir,
}

impl ApiClient {
    pub fn new(config: Config, state: StateDir) -> Result<Self> {
        let base_url = Url::parse(&config.api_base_url)
            .map_err(|e| QzError::Config(format!("invalid api_base_url {:?}: {}", config.api_base_url, e)))?;
        let jar = Arc::new(Jar::default());
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .cookie_provider(jar.clone())
            .build()?;

        Ok(ApiClient {
            http,
            jar,
            base_url,
            config,
            state,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| QzError::Config(format!("invalid endpoint {}: {}", path, e)))
    }

    /// Bearer token from the cache, or a fresh one from the configured credentials.
    async fn token(&self) -> Result<String> {
        if self.config.token_cache_enabled {
            if let Some(token) = self.state.load_token() {
                return Ok(token);
            }
        }
        let (username, password) = self.config.credentials()?;
        self.authenticate(username, password).await
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, body: &Value, auth: Auth<'_>) -> Result<T> {
        let url = self.endpoint(path)?;
        tracing::debug!(%url, "POST");

        let mut request = self.http.post(url).json(body);
        request = match auth {
            Auth::Anonymous => request,
            Auth::Bearer(token) => request.bearer_auth(token),
            Auth::Cookie(cookie) => request.header(reqwest::header::COOKIE, cookie),
        };

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        let data = unwrap_envelope(status, &text)?;
        Ok(serde_json::from_value(data)?)
    }

    async fn post_with_token<T: DeserializeOwned>(&self, path: &str, body: &Value) -> Result<T> {
        let token = self.token().await?;
        match self.post(path, body, Auth::Bearer(token)).await {
            Err(e) if e.is_session_expired() => {
                // cached token no longer accepted
                self.state.clear_token()?;
                Err(e)
            }
            other => other,
        }
    }
}

/// Decode a platform response. Bodies may be wrapped as `{code, message, data}`;
/// a non-zero `code` or a non-2xx status is an API error.
fn unwrap_envelope(status: StatusCode, text: &str) -> Result<Value> {
    let body: Value = match serde_json::from_str(text) {
        Ok(body) => body,
        Err(_) if !status.is_success() => {
            return Err(QzError::api(Some(status.as_u16()), text.trim().to_string()));
        }
        Err(e) => return Err(e.into()),
    };

    let message = || {
        payload::str_field(&body, "message")
            .or_else(|| payload::str_field(&body, "msg"))
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string())
    };

    if !status.is_success() {
        return Err(QzError::api(Some(status.as_u16()), message()));
    }

    let code = body.get("code").map(|code| match code {
        Value::Number(n) => n.as_i64() == Some(0),
        Value::String(s) => s == "0" || s.eq_ignore_ascii_case("ok"),
        _ => false,
    });
    if code == Some(false) {
        return Err(QzError::api(Some(status.as_u16()), message()));
    }

    if code.is_some() {
        if let Some(data) = body.get("data") {
            return Ok(data.clone());
        }
    }
    Ok(body)
}

/// Value of the hidden `execution` input on a CAS login form.
fn extract_execution(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("input[name=execution]").ok()?;
    document
        .select(&selector)
        .find_map(|input| input.value().attr("value"))
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

#[async_trait]
impl Gateway for ApiClient {
    fn reconnect(&self, config: Config) -> Result<Self> {
        ApiClient::new(config, self.state.clone())
    }

    async fn authenticate(&self, username: &str, password: &str) -> Result<String> {
        #[derive(serde::Deserialize)]
        struct TokenResponse {
            #[serde(alias = "token")]
            access_token: String,
            #[serde(default)]
            expires_in: Option<u64>,
        }

        let body = json!({ "username": username, "password": password });
        let response: TokenResponse = self.post("/auth/token", &body, Auth::Anonymous).await?;

        if self.config.token_cache_enabled {
            self.state
                .save_token(&response.access_token, response.expires_in.unwrap_or(3600))?;
        }
        Ok(response.access_token)
    }

    async fn login_with_cas(&self, username: &str, password: &str) -> Result<String> {
        let mut login_url = Url::parse(&self.config.cas_login_url)
            .map_err(|e| QzError::Config(format!("invalid cas_login_url: {}", e)))?;
        login_url
            .query_pairs_mut()
            .append_pair("service", self.base_url.as_str());

        let page = self.http.get(login_url.clone()).send().await?.text().await?;
        let execution = extract_execution(&page)
            .ok_or_else(|| QzError::api(None, "CAS login page has no execution token"))?;

        let form = [
            ("username", username),
            ("password", password),
            ("execution", execution.as_str()),
            ("_eventId", "submit"),
        ];
        let response = self.http.post(login_url).form(&form).send().await?;
        let landed = response.url().clone();
        tracing::debug!(%landed, status = %response.status(), "CAS login finished");

        if landed.host_str() != self.base_url.host_str() {
            return Err(QzError::api(
                Some(response.status().as_u16()),
                "CAS login rejected, check username and password",
            ));
        }

        self.jar
            .cookies(&self.base_url)
            .and_then(|header| header.to_str().ok().map(str::to_string))
            .filter(|cookie| !cookie.is_empty())
            .ok_or_else(|| QzError::api(None, "CAS login returned no platform cookie"))
    }

    async fn list_jobs(&self, workspace_id: &str, cookie: &str, page_size: u32) -> Result<JobPage> {
        let body = json!({
            "workspace_id": workspace_id,
            "page_num": 1,
            "page_size": page_size,
        });
        self.post("/openapi/v1/train_job/list", &body, Auth::Cookie(cookie))
            .await
    }

    async fn get_job_detail(&self, job_id: &str) -> Result<Value> {
        self.post_with_token("/openapi/v1/train_job/detail", &json!({ "job_id": job_id }))
            .await
    }

    async fn stop_job(&self, job_id: &str) -> Result<bool> {
        let _: Value = self
            .post_with_token("/openapi/v1/train_job/stop", &json!({ "job_id": job_id }))
            .await?;
        Ok(true)
    }

    async fn list_workspaces(&self, cookie: &str) -> Result<Vec<WorkspaceInfo>> {
        #[derive(serde::Deserialize, Default)]
        #[serde(default)]
        struct WorkspaceList {
            workspaces: Vec<WorkspaceInfo>,
        }

        let list: WorkspaceList = self
            .post("/api/v1/workspace/list", &json!({}), Auth::Cookie(cookie))
            .await?;
        Ok(list.workspaces)
    }

    async fn list_workspace_tasks(
        &self,
        workspace_id: &str,
        cookie: &str,
        page_num: u32,
        page_size: u32,
        project_filter: Option<&str>,
    ) -> Result<TaskPage> {
        let mut body = json!({
            "workspace_id": workspace_id,
            "page_num": page_num,
            "page_size": page_size,
        });
        if let Some(project) = project_filter {
            body["filter"] = json!({ "project_name": project });
        }
        self.post(
            "/api/v1/cluster_metric/list_task_dimension",
            &body,
            Auth::Cookie(cookie),
        )
        .await
    }

    async fn list_node_dimension(
        &self,
        workspace_id: &str,
        cookie: &str,
        compute_group_id: &str,
        page_size: u32,
    ) -> Result<NodePage> {
        let body = json!({
            "workspace_id": workspace_id,
            "logic_compute_group_id": compute_group_id,
            "page_num": 1,
            "page_size": page_size,
        });
        self.post(
            "/api/v1/cluster_metric/list_node_dimension",
            &body,
            Auth::Cookie(cookie),
        )
        .await
    }
}
