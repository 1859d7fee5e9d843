use async_trait::async_trait;
use qzcli::api::payload::{JobPage, NodePage, TaskPage, WorkspaceInfo};
use qzcli::api::Gateway;
use qzcli::cli::args::{AvailArgs, ListArgs, ResourcesArgs, WorkspaceArgs};
use qzcli::cli::commands::CommandExecutor;
use qzcli::common::error::{QzError, Result};
use qzcli::common::types::status;
use qzcli::common::{Config, StateDir};
use qzcli::resources::ResourceCache;
use qzcli::store::JobStore;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Canned platform responses. Unknown job IDs answer with an API error, and
/// so does any workspace or compute group listed in `failing`.
#[derive(Default)]
struct FakeGateway {
    api_base_url: String,
    details: Mutex<HashMap<String, Value>>,
    jobs: Vec<Value>,
    tasks: Vec<Value>,
    nodes: HashMap<String, Vec<Value>>,
    failing: HashSet<String>,
    session_expired: bool,
    stopped: Mutex<Vec<String>>,
    authenticated_at: Arc<Mutex<Vec<String>>>,
}

impl FakeGateway {
    fn set_detail(&self, job_id: &str, detail: Value) {
        self.details.lock().unwrap().insert(job_id.to_string(), detail);
    }

    fn check_session(&self) -> Result<()> {
        if self.session_expired {
            return Err(QzError::api(Some(401), "token expired"));
        }
        Ok(())
    }

    fn check_target(&self, id: &str) -> Result<()> {
        self.check_session()?;
        if self.failing.contains(id) {
            return Err(QzError::api(Some(500), format!("{} unavailable", id)));
        }
        Ok(())
    }
}

#[async_trait]
impl Gateway for FakeGateway {
    fn reconnect(&self, config: Config) -> Result<Self> {
        Ok(FakeGateway {
            api_base_url: config.api_base_url,
            authenticated_at: self.authenticated_at.clone(),
            ..Default::default()
        })
    }

    async fn authenticate(&self, _username: &str, _password: &str) -> Result<String> {
        self.authenticated_at
            .lock()
            .unwrap()
            .push(self.api_base_url.clone());
        Ok("token".to_string())
    }

    async fn login_with_cas(&self, _username: &str, _password: &str) -> Result<String> {
        Ok("sid=fresh".to_string())
    }

    async fn list_jobs(&self, workspace_id: &str, _cookie: &str, page_size: u32) -> Result<JobPage> {
        self.check_target(workspace_id)?;
        Ok(JobPage {
            jobs: self.jobs.iter().take(page_size as usize).cloned().collect(),
            total: self.jobs.len() as u64,
        })
    }

    async fn get_job_detail(&self, job_id: &str) -> Result<Value> {
        self.check_session()?;
        self.details
            .lock()
            .unwrap()
            .get(job_id)
            .cloned()
            .ok_or_else(|| QzError::api(Some(404), format!("job {} not found", job_id)))
    }

    async fn stop_job(&self, job_id: &str) -> Result<bool> {
        self.stopped.lock().unwrap().push(job_id.to_string());
        Ok(self.details.lock().unwrap().contains_key(job_id))
    }

    async fn list_workspaces(&self, _cookie: &str) -> Result<Vec<WorkspaceInfo>> {
        self.check_session()?;
        Ok(vec![WorkspaceInfo {
            id: "ws-abc".to_string(),
            name: "GPU-Team".to_string(),
        }])
    }

    async fn list_workspace_tasks(
        &self,
        _workspace_id: &str,
        _cookie: &str,
        _page_num: u32,
        _page_size: u32,
        _project_filter: Option<&str>,
    ) -> Result<TaskPage> {
        self.check_session()?;
        Ok(TaskPage {
            task_dimensions: self.tasks.clone(),
            total: self.tasks.len() as u64,
        })
    }

    async fn list_node_dimension(
        &self,
        _workspace_id: &str,
        _cookie: &str,
        compute_group_id: &str,
        _page_size: u32,
    ) -> Result<NodePage> {
        self.check_target(compute_group_id)?;
        Ok(NodePage {
            node_dimensions: self.nodes.get(compute_group_id).cloned().unwrap_or_default(),
        })
    }
}

fn executor(temp_dir: &TempDir, api: FakeGateway) -> CommandExecutor<FakeGateway> {
    let state = StateDir::new(temp_dir.path());
    state.ensure().unwrap();
    CommandExecutor::new(state, api)
}

fn detail(job_id: &str, status: &str, created_at: &str) -> Value {
    json!({
        "job_id": job_id,
        "name": format!("train-{}", job_id),
        "status": status,
        "created_at": created_at,
        "workspace_id": "ws-abc",
        "project_name": "vision",
        "logic_compute_group_name": "H100-Pool",
        "framework_config": [{
            "instance_count": 2,
            "instance_spec_price_info": {
                "quota_id": "spec-8",
                "gpu_info": { "gpu_type": "H100", "gpu_count": 8 },
                "cpu_count": 96,
                "memory_size_gib": 1024
            }
        }]
    })
}

fn list_args() -> ListArgs {
    ListArgs {
        limit: 20,
        status: None,
        running: false,
        no_refresh: false,
        compact: true,
        cookie: false,
        workspace: None,
        all_ws: false,
    }
}

fn node(name: &str, used: u64, total: u64) -> Value {
    json!({ "name": name, "gpu": { "used": used, "total": total } })
}

#[tokio::test]
async fn test_track_then_list_refreshes_status() {
    let temp_dir = TempDir::new().unwrap();
    let api = FakeGateway::default();
    api.set_detail("job-1", detail("job-1", "job_running", "2024-05-01 10:00:00"));
    let executor = executor(&temp_dir, api);

    executor
        .track("job-1", None, Some("sweep.sh".to_string()), None, true)
        .await
        .unwrap();

    let store = JobStore::open(executor.state());
    let job = store.get("job-1").unwrap();
    assert_eq!(job.status, "job_running");
    assert_eq!(job.source, "sweep.sh");
    assert_eq!(job.gpu_count, Some(16));

    // the job finishes upstream; list pulls the new status in
    let executor_api = FakeGateway::default();
    executor_api.set_detail("job-1", json!({ "status": "JOB_SUCCEEDED", "finished_at": "2024-05-01 12:00:00" }));
    let executor = CommandExecutor::new(executor.state().clone(), executor_api);
    executor.list(&list_args()).await.unwrap();

    let store = JobStore::open(executor.state());
    let job = store.get("job-1").unwrap();
    assert_eq!(job.status, "job_succeeded");
    assert_eq!(job.finished_at, "2024-05-01 12:00:00");
    // fields absent from the refresh payload survive the merge
    assert_eq!(job.name, "train-job-1");
    assert_eq!(job.source, "sweep.sh");
}

#[tokio::test]
async fn test_track_without_api_details() {
    let temp_dir = TempDir::new().unwrap();
    let executor = executor(&temp_dir, FakeGateway::default());

    executor
        .track(
            "job-offline",
            Some("manual".to_string()),
            None,
            Some("ws-abc".to_string()),
            true,
        )
        .await
        .unwrap();

    let store = JobStore::open(executor.state());
    let job = store.get("job-offline").unwrap();
    assert_eq!(job.name, "manual");
    assert_eq!(job.workspace_id, "ws-abc");
    assert!(job.status.is_empty());
}

#[tokio::test]
async fn test_list_skips_failed_refreshes() {
    let temp_dir = TempDir::new().unwrap();
    let api = FakeGateway::default();
    api.set_detail("job-ok", json!({ "status": "job_failed" }));
    let executor = executor(&temp_dir, api);

    let mut store = JobStore::open(executor.state());
    store.add(qzcli::common::types::JobRecord {
        status: "job_running".to_string(),
        created_at: "2024-05-02 09:00:00".to_string(),
        ..qzcli::common::types::JobRecord::new("job-ok")
    })
    .unwrap();
    store.add(qzcli::common::types::JobRecord {
        status: "job_queuing".to_string(),
        created_at: "2024-05-01 09:00:00".to_string(),
        ..qzcli::common::types::JobRecord::new("job-gone")
    })
    .unwrap();

    executor.list(&list_args()).await.unwrap();

    let store = JobStore::open(executor.state());
    assert_eq!(store.get("job-ok").unwrap().status, "job_failed");
    assert_eq!(store.get("job-gone").unwrap().status, "job_queuing");
}

#[tokio::test]
async fn test_stop_marks_job_stopped() {
    let temp_dir = TempDir::new().unwrap();
    let api = FakeGateway::default();
    api.set_detail("job-1", detail("job-1", "job_running", "2024-05-01 10:00:00"));
    let executor = executor(&temp_dir, api);

    executor.track("job-1", None, None, None, true).await.unwrap();
    executor.stop("job-1", true).await.unwrap();

    let store = JobStore::open(executor.state());
    assert_eq!(store.get("job-1").unwrap().status, status::STOPPED);
}

#[tokio::test]
async fn test_stop_failure_leaves_status() {
    let temp_dir = TempDir::new().unwrap();
    let executor = executor(&temp_dir, FakeGateway::default());

    executor
        .track("job-2", None, None, None, true)
        .await
        .unwrap();
    assert!(executor.stop("job-2", true).await.is_err());

    let store = JobStore::open(executor.state());
    assert!(store.get("job-2").unwrap().status.is_empty());
}

#[tokio::test]
async fn test_import_with_refresh() {
    let temp_dir = TempDir::new().unwrap();
    let api = FakeGateway::default();
    api.set_detail("job-a", detail("job-a", "job_running", "2024-05-01 10:00:00"));
    let executor = executor(&temp_dir, api);

    let file = temp_dir.path().join("submitted.txt");
    std::fs::write(&file, "# batch 1\njob-a\n\njob-b\n").unwrap();

    executor.import(&file, None, true).await.unwrap();

    let store = JobStore::open(executor.state());
    assert_eq!(store.count(), 2);
    let a = store.get("job-a").unwrap();
    assert_eq!(a.status, "job_running");
    assert_eq!(a.source, "submitted.txt");
    assert_eq!(store.get("job-b").unwrap().status, status::UNKNOWN);
}

#[tokio::test]
async fn test_import_missing_file() {
    let temp_dir = TempDir::new().unwrap();
    let executor = executor(&temp_dir, FakeGateway::default());

    let err = executor
        .import(&temp_dir.path().join("nope.txt"), None, false)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("File not found"));
}

#[tokio::test]
async fn test_remove_unknown_job() {
    let temp_dir = TempDir::new().unwrap();
    let executor = executor(&temp_dir, FakeGateway::default());

    let err = executor.remove("job-missing", true).await.unwrap_err();
    assert!(matches!(err.downcast_ref::<QzError>(), Some(QzError::JobNotFound(_))));
}

#[tokio::test]
async fn test_clear_removes_everything() {
    let temp_dir = TempDir::new().unwrap();
    let executor = executor(&temp_dir, FakeGateway::default());

    executor.track("job-1", None, None, None, true).await.unwrap();
    executor.track("job-2", None, None, None, true).await.unwrap();
    executor.clear(true).await.unwrap();

    assert_eq!(JobStore::open(executor.state()).count(), 0);
}

#[tokio::test]
async fn test_watch_returns_when_all_terminal() {
    let temp_dir = TempDir::new().unwrap();
    let executor = executor(&temp_dir, FakeGateway::default());

    let mut store = JobStore::open(executor.state());
    store
        .add(qzcli::common::types::JobRecord {
            status: "job_succeeded".to_string(),
            ..qzcli::common::types::JobRecord::new("job-done")
        })
        .unwrap();

    executor.watch(1, 10, false).await.unwrap();
}

#[tokio::test]
async fn test_workspace_sync_adds_unknown_tasks_once() {
    let temp_dir = TempDir::new().unwrap();
    let api = FakeGateway {
        tasks: vec![
            json!({
                "id": "job-t1",
                "name": "pretrain",
                "status": "RUNNING",
                "gpu": { "total": 16, "usage_rate": 0.9 },
                "nodes_occupied": { "count": 2, "nodes": ["node-1", "node-2"] },
                "user": { "name": "alice" },
                "project": { "name": "vision" }
            }),
            json!({ "id": "job-t2", "name": "eval", "status": "RUNNING" }),
        ],
        ..Default::default()
    };
    let executor = executor(&temp_dir, api);
    executor.state().save_cookie("sid=1", "ws-abc").unwrap();

    let mut store = JobStore::open(executor.state());
    store
        .add(qzcli::common::types::JobRecord {
            source: "mine".to_string(),
            ..qzcli::common::types::JobRecord::new("job-t2")
        })
        .unwrap();

    let args = WorkspaceArgs {
        workspace: None,
        project: None,
        all: false,
        page: 1,
        size: 100,
        sync: true,
    };
    executor.workspace(&args).await.unwrap();
    executor.workspace(&args).await.unwrap();

    let store = JobStore::open(executor.state());
    assert_eq!(store.count(), 2);
    let synced = store.get("job-t1").unwrap();
    assert_eq!(synced.source, "workspace_sync");
    assert_eq!(synced.workspace_id, "ws-abc");
    assert_eq!(synced.status, "running");
    assert_eq!(store.get("job-t2").unwrap().source, "mine");
}

#[tokio::test]
async fn test_workspace_requires_cookie() {
    let temp_dir = TempDir::new().unwrap();
    let executor = executor(&temp_dir, FakeGateway::default());

    let args = WorkspaceArgs {
        workspace: Some("ws-abc".to_string()),
        project: None,
        all: true,
        page: 1,
        size: 100,
        sync: false,
    };
    let err = executor.workspace(&args).await.unwrap_err();
    assert!(matches!(err.downcast_ref::<QzError>(), Some(QzError::MissingCookie)));
}

#[tokio::test]
async fn test_resources_update_caches_and_names_workspace() {
    let temp_dir = TempDir::new().unwrap();
    let mut first = detail("job-1", "job_succeeded", "2024-05-01 10:00:00");
    first["project_id"] = json!("proj-1");
    first["logic_compute_group_id"] = json!("lcg-h100");
    let mut second = detail("job-2", "job_failed", "2024-05-02 10:00:00");
    second["project_id"] = json!("proj-1");
    second["logic_compute_group_id"] = json!("lcg-h100");

    let api = FakeGateway {
        jobs: vec![first, second],
        ..Default::default()
    };
    let executor = executor(&temp_dir, api);
    executor.state().save_cookie("sid=1", "").unwrap();

    let args = ResourcesArgs {
        workspace: Some("ws-abc".to_string()),
        export: true,
        update: true,
        list: false,
        name: Some("GPU-Team".to_string()),
    };
    executor.resources(&args).await.unwrap();

    let cache = ResourceCache::open(executor.state());
    assert_eq!(cache.resolve_workspace("gpu-team").unwrap(), "ws-abc");
    let ws = cache.get_workspace_resources("ws-abc").unwrap();
    assert_eq!(ws.projects.len(), 1);
    assert_eq!(ws.compute_groups["lcg-h100"].name, "H100-Pool");
    assert_eq!(ws.specs["spec-8"].gpu_count, 8);

    // cached path needs no cookie
    executor.state().clear_cookie().unwrap();
    let cached = ResourcesArgs {
        workspace: Some("GPU".to_string()),
        export: false,
        update: false,
        list: false,
        name: None,
    };
    executor.resources(&cached).await.unwrap();
}

#[tokio::test]
async fn test_resources_unknown_workspace_name() {
    let temp_dir = TempDir::new().unwrap();
    let executor = executor(&temp_dir, FakeGateway::default());

    let args = ResourcesArgs {
        workspace: Some("nobody".to_string()),
        export: false,
        update: false,
        list: false,
        name: None,
    };
    assert!(executor.resources(&args).await.is_err());
}

async fn seed_groups(executor: &CommandExecutor<FakeGateway>) {
    let mut job_a = detail("job-1", "job_succeeded", "2024-05-01 10:00:00");
    job_a["logic_compute_group_id"] = json!("lcg-a");
    job_a["logic_compute_group_name"] = json!("Pool-A");
    let mut job_b = detail("job-2", "job_succeeded", "2024-05-01 11:00:00");
    job_b["logic_compute_group_id"] = json!("lcg-b");
    job_b["logic_compute_group_name"] = json!("Pool-B");

    let resources = qzcli::api::payload::extract_resources_from_jobs(&[job_a, job_b]);
    let mut cache = ResourceCache::open(executor.state());
    cache.save_resources("ws-abc", resources, "GPU-Team").unwrap();
}

fn avail_gateway() -> FakeGateway {
    let mut nodes = HashMap::new();
    nodes.insert(
        "lcg-a".to_string(),
        vec![node("a-1", 0, 8), node("a-2", 8, 8), node("a-3", 0, 0)],
    );
    nodes.insert(
        "lcg-b".to_string(),
        vec![node("b-1", 0, 8), node("b-2", 0, 8), node("b-3", 0, 8)],
    );
    FakeGateway {
        nodes,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_avail_recommends_groups_with_enough_nodes() {
    let temp_dir = TempDir::new().unwrap();
    let executor = executor(&temp_dir, avail_gateway());
    executor.state().save_cookie("sid=1", "ws-abc").unwrap();
    seed_groups(&executor).await;

    let args = AvailArgs {
        workspace: Some("gpu-team".to_string()),
        group: None,
        nodes: Some(2),
        export: true,
        show_nodes: true,
    };
    executor.avail(&args).await.unwrap();

    let too_many = AvailArgs {
        nodes: Some(4),
        ..args
    };
    let err = executor.avail(&too_many).await.unwrap_err();
    assert!(err.to_string().contains("Not enough free nodes"));
}

#[tokio::test]
async fn test_avail_group_filter_and_summary() {
    let temp_dir = TempDir::new().unwrap();
    let executor = executor(&temp_dir, avail_gateway());
    executor.state().save_cookie("sid=1", "").unwrap();
    seed_groups(&executor).await;

    let args = AvailArgs {
        workspace: None,
        group: Some("pool-a".to_string()),
        nodes: None,
        export: true,
        show_nodes: false,
    };
    executor.avail(&args).await.unwrap();

    let unknown_group = AvailArgs {
        group: Some("lcg-missing".to_string()),
        ..args
    };
    assert!(executor.avail(&unknown_group).await.is_err());
}

#[tokio::test]
async fn test_cookie_list_reports_expired_session() {
    let temp_dir = TempDir::new().unwrap();
    let api = FakeGateway {
        session_expired: true,
        ..Default::default()
    };
    let executor = executor(&temp_dir, api);
    executor.state().save_cookie("sid=stale", "ws-abc").unwrap();

    let args = ListArgs {
        cookie: true,
        ..list_args()
    };
    let err = executor.list(&args).await.unwrap_err();
    assert!(err.to_string().contains("Cookie expired"));
}

#[tokio::test]
async fn test_cookie_list_does_not_persist() {
    let temp_dir = TempDir::new().unwrap();
    let api = FakeGateway {
        jobs: vec![
            detail("job-1", "job_running", "2024-05-01 10:00:00"),
            detail("job-2", "job_succeeded", "2024-05-02 10:00:00"),
        ],
        ..Default::default()
    };
    let executor = executor(&temp_dir, api);
    executor.state().save_cookie("sid=1", "ws-abc").unwrap();

    let args = ListArgs {
        cookie: true,
        running: true,
        ..list_args()
    };
    executor.list(&args).await.unwrap();
    assert_eq!(JobStore::open(executor.state()).count(), 0);
}

#[tokio::test]
async fn test_login_keeps_default_workspace() {
    let temp_dir = TempDir::new().unwrap();
    let executor = executor(&temp_dir, FakeGateway::default());
    executor.state().save_cookie("sid=old", "ws-abc").unwrap();

    executor
        .login(Some("alice".to_string()), Some("secret".to_string()), None)
        .await
        .unwrap();

    let session = executor.state().load_cookie().unwrap();
    assert_eq!(session.cookie, "sid=fresh");
    assert_eq!(session.workspace_id, "ws-abc");
}

#[tokio::test]
async fn test_init_verifies_against_new_api_url() {
    let temp_dir = TempDir::new().unwrap();
    let api = FakeGateway {
        api_base_url: "https://qz-old.example.com".to_string(),
        ..Default::default()
    };
    let attempts = api.authenticated_at.clone();
    let executor = executor(&temp_dir, api);

    executor
        .init(
            Some("alice".to_string()),
            Some("secret".to_string()),
            Some("https://qz-new.example.com".to_string()),
        )
        .await
        .unwrap();

    assert_eq!(
        *attempts.lock().unwrap(),
        vec!["https://qz-new.example.com".to_string()]
    );
    let saved = Config::load(executor.state());
    assert_eq!(saved.api_base_url, "https://qz-new.example.com");
    assert_eq!(saved.username, "alice");
}

#[tokio::test]
async fn test_avail_skips_failing_group() {
    let temp_dir = TempDir::new().unwrap();
    let mut api = avail_gateway();
    api.failing.insert("lcg-a".to_string());
    let executor = executor(&temp_dir, api);
    executor.state().save_cookie("sid=1", "ws-abc").unwrap();
    seed_groups(&executor).await;

    let cache = ResourceCache::open(executor.state());
    let session = executor.state().load_cookie().unwrap();
    let results = executor
        .collect_availability(&cache, &session, &["ws-abc".to_string()], None)
        .await
        .unwrap();
    let groups: Vec<&str> = results.iter().map(|r| r.group_id.as_str()).collect();
    assert_eq!(groups, vec!["lcg-b"]);
    assert_eq!(results[0].free_count(), 3);

    let args = AvailArgs {
        workspace: Some("ws-abc".to_string()),
        group: None,
        nodes: Some(0),
        export: false,
        show_nodes: false,
    };
    executor.avail(&args).await.unwrap();
}

fn two_workspaces(executor: &CommandExecutor<FakeGateway>) {
    let mut cache = ResourceCache::open(executor.state());
    cache.set_workspace_name("ws-a", "Alpha").unwrap();
    cache.set_workspace_name("ws-b", "Beta").unwrap();
    executor.state().save_cookie("sid=1", "").unwrap();
}

#[tokio::test]
async fn test_cookie_list_tolerates_one_failing_workspace() {
    let temp_dir = TempDir::new().unwrap();
    let mut api = FakeGateway {
        jobs: vec![detail("job-1", "job_running", "2024-05-01 10:00:00")],
        ..Default::default()
    };
    api.failing.insert("ws-a".to_string());
    let executor = executor(&temp_dir, api);
    two_workspaces(&executor);

    let args = ListArgs {
        cookie: true,
        all_ws: true,
        ..list_args()
    };
    executor.list(&args).await.unwrap();
}

#[tokio::test]
async fn test_cookie_list_fails_when_every_workspace_fails() {
    let temp_dir = TempDir::new().unwrap();
    let mut api = FakeGateway::default();
    api.failing.insert("ws-a".to_string());
    api.failing.insert("ws-b".to_string());
    let executor = executor(&temp_dir, api);
    two_workspaces(&executor);

    let args = ListArgs {
        cookie: true,
        all_ws: true,
        ..list_args()
    };
    let err = executor.list(&args).await.unwrap_err();
    assert!(err.to_string().contains("Could not fetch jobs from any workspace"));
}

#[tokio::test]
async fn test_huge_list_limits_do_not_overflow() {
    let temp_dir = TempDir::new().unwrap();
    let api = FakeGateway {
        jobs: vec![detail("job-1", "job_running", "2024-05-01 10:00:00")],
        ..Default::default()
    };
    let executor = executor(&temp_dir, api);
    executor.state().save_cookie("sid=1", "ws-abc").unwrap();
    executor.track("job-1", None, None, None, true).await.unwrap();

    let local = ListArgs {
        limit: usize::MAX,
        running: true,
        no_refresh: true,
        ..list_args()
    };
    executor.list(&local).await.unwrap();

    let remote = ListArgs {
        cookie: true,
        ..local
    };
    executor.list(&remote).await.unwrap();
}
