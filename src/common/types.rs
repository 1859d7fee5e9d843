use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A job known to the local store.
///
/// String fields use the empty string for "unknown"; merges treat an empty
/// incoming value as absent and keep whatever the record already holds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobRecord {
    pub job_id: String,
    pub name: String,
    pub status: String,
    pub source: String,
    pub workspace_id: String,
    pub project_name: String,
    pub created_at: String,
    pub finished_at: String,
    pub compute_group_name: String,
    pub gpu_count: Option<u32>,
    pub running_time_ms: Option<u64>,
    pub command: String,
    pub updated_at: String,
    pub metadata: BTreeMap<String, String>,
}

impl JobRecord {
    pub fn new(job_id: impl Into<String>) -> Self {
        JobRecord {
            job_id: job_id.into(),
            ..Default::default()
        }
    }

    /// Merge the fields present on `update` into this record.
    pub fn apply(&mut self, update: JobUpdate) {
        fn set(field: &mut String, value: Option<String>) {
            if let Some(value) = value {
                *field = value;
            }
        }

        set(&mut self.name, update.name);
        set(&mut self.status, update.status);
        set(&mut self.source, update.source);
        set(&mut self.workspace_id, update.workspace_id);
        set(&mut self.project_name, update.project_name);
        set(&mut self.created_at, update.created_at);
        set(&mut self.finished_at, update.finished_at);
        set(&mut self.compute_group_name, update.compute_group_name);
        set(&mut self.command, update.command);
        if update.gpu_count.is_some() {
            self.gpu_count = update.gpu_count;
        }
        if update.running_time_ms.is_some() {
            self.running_time_ms = update.running_time_ms;
        }
        self.metadata.extend(update.metadata);
    }

    pub fn is_terminal(&self) -> bool {
        status::is_terminal(&self.status)
    }

    pub fn is_active(&self) -> bool {
        status::is_active(&self.status)
    }
}

/// A partial set of job fields; `None` leaves the record's value untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobUpdate {
    pub job_id: Option<String>,
    pub name: Option<String>,
    pub status: Option<String>,
    pub source: Option<String>,
    pub workspace_id: Option<String>,
    pub project_name: Option<String>,
    pub created_at: Option<String>,
    pub finished_at: Option<String>,
    pub compute_group_name: Option<String>,
    pub gpu_count: Option<u32>,
    pub running_time_ms: Option<u64>,
    pub command: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

impl JobUpdate {
    pub fn status(status: impl Into<String>) -> Self {
        JobUpdate {
            status: Some(status.into()),
            ..Default::default()
        }
    }
}

impl From<JobRecord> for JobUpdate {
    fn from(job: JobRecord) -> Self {
        fn present(value: String) -> Option<String> {
            if value.is_empty() {
                None
            } else {
                Some(value)
            }
        }

        JobUpdate {
            job_id: present(job.job_id),
            name: present(job.name),
            status: present(job.status),
            source: present(job.source),
            workspace_id: present(job.workspace_id),
            project_name: present(job.project_name),
            created_at: present(job.created_at),
            finished_at: present(job.finished_at),
            compute_group_name: present(job.compute_group_name),
            gpu_count: job.gpu_count,
            running_time_ms: job.running_time_ms,
            command: present(job.command),
            metadata: job.metadata,
        }
    }
}

/// Status predicates. Upstream statuses are open strings such as
/// `job_running` or `RUNNING`; every active/terminal check goes through here.
pub mod status {
    const TERMINAL: &[&str] = &[
        "job_succeeded",
        "job_failed",
        "job_stopped",
        "succeeded",
        "failed",
        "stopped",
    ];

    const ACTIVE: &[&str] = &[
        "job_running",
        "job_queuing",
        "job_pending",
        "running",
        "queuing",
        "pending",
    ];

    pub const STOPPED: &str = "job_stopped";
    pub const UNKNOWN: &str = "unknown";

    pub fn is_terminal(status: &str) -> bool {
        TERMINAL.contains(&status.to_lowercase().as_str())
    }

    pub fn is_active(status: &str) -> bool {
        let status = status.to_lowercase();
        ACTIVE.contains(&status.as_str()) || status.contains("running") || status.contains("queue")
    }

    /// Case-insensitive containment used by `--status` filters.
    pub fn matches_filter(status: &str, filter: &str) -> bool {
        status.to_lowercase().contains(&filter.to_lowercase())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Project {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComputeGroup {
    pub id: String,
    pub name: String,
    pub gpu_type: String,
    pub gpu_type_display: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Spec {
    pub id: String,
    pub name: String,
    pub gpu_type: String,
    pub gpu_count: u32,
    pub cpu_count: u32,
    pub memory_gb: u32,
}

impl Spec {
    pub fn summary(&self) -> String {
        format!(
            "{}x {} + {} CPU + {}GB RAM",
            self.gpu_count, self.gpu_type, self.cpu_count, self.memory_gb
        )
    }
}

/// Anything the name resolver can match against.
pub trait NamedResource {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
}

macro_rules! named_resource {
    ($($ty:ty),*) => {
        $(impl NamedResource for $ty {
            fn id(&self) -> &str {
                &self.id
            }

            fn name(&self) -> &str {
                &self.name
            }
        })*
    };
}

named_resource!(Project, ComputeGroup, Spec);

/// Freshly fetched resource lists for one workspace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Resources {
    pub projects: Vec<Project>,
    pub compute_groups: Vec<ComputeGroup>,
    pub specs: Vec<Spec>,
}

/// Cached resources of one workspace, each category keyed by resource ID.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceResources {
    pub id: String,
    pub name: String,
    pub projects: IndexMap<String, Project>,
    pub compute_groups: IndexMap<String, ComputeGroup>,
    pub specs: IndexMap<String, Spec>,
    pub updated_at: f64,
}

impl WorkspaceResources {
    pub fn empty(id: impl Into<String>, name: impl Into<String>, updated_at: f64) -> Self {
        WorkspaceResources {
            id: id.into(),
            name: name.into(),
            updated_at,
            ..Default::default()
        }
    }

    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Projects,
    ComputeGroups,
    Specs,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResourceRef<'a> {
    Project(&'a Project),
    ComputeGroup(&'a ComputeGroup),
    Spec(&'a Spec),
}

impl ResourceRef<'_> {
    pub fn id(&self) -> &str {
        match self {
            ResourceRef::Project(p) => p.id(),
            ResourceRef::ComputeGroup(g) => g.id(),
            ResourceRef::Spec(s) => s.id(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ResourceRef::Project(p) => p.name(),
            ResourceRef::ComputeGroup(g) => g.name(),
            ResourceRef::Spec(s) => s.name(),
        }
    }
}

/// One row of `list_cached_workspaces`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkspaceSummary {
    pub id: String,
    pub name: String,
    pub updated_at: f64,
    pub project_count: usize,
    pub compute_group_count: usize,
    pub spec_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CookieSession {
    pub cookie: String,
    pub workspace_id: String,
    pub saved_at: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenCache {
    pub token: String,
    pub expires_at: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_keeps_unset_fields() {
        let mut job = JobRecord::new("job-1");
        job.name = "train".to_string();
        job.source = "script.sh".to_string();

        job.apply(JobUpdate::status("job_running"));

        assert_eq!(job.name, "train");
        assert_eq!(job.source, "script.sh");
        assert_eq!(job.status, "job_running");
    }

    #[test]
    fn test_record_to_update_skips_empty_fields() {
        let mut job = JobRecord::new("job-1");
        job.name = "eval".to_string();
        let update = JobUpdate::from(job);
        assert_eq!(update.name.as_deref(), Some("eval"));
        assert_eq!(update.status, None);
        assert_eq!(update.workspace_id, None);
    }

    #[test]
    fn test_status_predicates() {
        assert!(status::is_terminal("job_succeeded"));
        assert!(status::is_terminal("FAILED"));
        assert!(!status::is_terminal("job_running"));

        assert!(status::is_active("job_queuing"));
        assert!(status::is_active("RUNNING"));
        assert!(status::is_active("in_queue"));
        assert!(!status::is_active("job_succeeded"));
        assert!(!status::is_active("unknown"));

        assert!(status::matches_filter("job_running", "RUN"));
        assert!(!status::matches_filter("job_failed", "run"));
    }
}
