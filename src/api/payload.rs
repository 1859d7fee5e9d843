//! Loosely-typed upstream payloads mapped onto typed records.
//!
//! Upstream JSON is read field by field; absent keys and unexpected types
//! yield `None` rather than errors, and unknown keys are ignored.

use crate::common::types::{ComputeGroup, JobRecord, JobUpdate, Project, Resources, Spec};
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;

/// String view of a field, accepting strings and numbers. Empty strings count as absent.
pub fn str_field(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Unsigned view of a field, accepting numbers and numeric strings.
pub fn u64_field(value: &Value, key: &str) -> Option<u64> {
    match value.get(key)? {
        Value::Number(n) => n.as_u64().or_else(|| n.as_f64().map(|f| f.max(0.0) as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn f64_field(value: &Value, key: &str) -> Option<f64> {
    match value.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn first_str(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| str_field(value, key))
}

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Timestamps arrive as epoch milliseconds, RFC 3339 strings or naive
/// `T`/space separated strings. All of them are normalised to
/// `YYYY-MM-DD HH:MM:SS` (UTC when the source carries an offset) so they
/// sort as strings. Unrecognised strings are kept verbatim.
fn timestamp_field(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match value.get(*key)? {
        Value::String(s) if !s.is_empty() => Some(normalize_timestamp(s)),
        Value::Number(n) => {
            let ms = n.as_i64()?;
            chrono::DateTime::from_timestamp_millis(ms)
                .map(|dt| dt.format(TIMESTAMP_FORMAT).to_string())
        }
        _ => None,
    })
}

fn normalize_timestamp(raw: &str) -> String {
    let raw = raw.trim();
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(raw) {
        return dt.with_timezone(&chrono::Utc).format(TIMESTAMP_FORMAT).to_string();
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| chrono::NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|dt| dt.format(TIMESTAMP_FORMAT).to_string())
        .unwrap_or_else(|| raw.to_string())
}

/// `framework_config[0].instance_spec_price_info`, where the platform keeps
/// GPU, CPU and memory details of a job.
fn instance_spec(job: &Value) -> Option<&Value> {
    job.get("framework_config")?
        .get(0)?
        .get("instance_spec_price_info")
}

fn nested_name(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(|inner| str_field(inner, "name"))
}

/// Map a job-detail or job-list payload onto field updates.
pub fn job_update_from_payload(payload: &Value) -> JobUpdate {
    let spec = instance_spec(payload);
    let gpu_info = spec.and_then(|s| s.get("gpu_info"));

    let gpu_count = gpu_info.and_then(|g| u64_field(g, "gpu_count")).map(|per_instance| {
        let instances = payload
            .get("framework_config")
            .and_then(|fc| fc.get(0))
            .and_then(|fc| u64_field(fc, "instance_count"))
            .unwrap_or(1);
        (per_instance * instances) as u32
    });

    JobUpdate {
        job_id: first_str(payload, &["job_id", "id"]),
        name: first_str(payload, &["name", "job_name"]),
        status: str_field(payload, "status").map(|s| s.to_lowercase()),
        source: None,
        workspace_id: str_field(payload, "workspace_id"),
        project_name: str_field(payload, "project_name").or_else(|| nested_name(payload, "project")),
        created_at: timestamp_field(payload, &["created_at", "create_time"]),
        finished_at: timestamp_field(payload, &["finished_at", "end_time"]),
        compute_group_name: str_field(payload, "logic_compute_group_name"),
        gpu_count,
        running_time_ms: u64_field(payload, "running_time_ms"),
        command: str_field(payload, "command"),
        metadata: Default::default(),
    }
}

/// Build a fresh record from a payload, tagging where it came from.
pub fn job_record_from_payload(payload: &Value, fallback_id: &str, source: &str) -> JobRecord {
    let update = job_update_from_payload(payload);
    let mut job = JobRecord::new(update.job_id.clone().unwrap_or_else(|| fallback_id.to_string()));
    job.apply(update);
    job.source = source.to_string();
    job
}

/// Derive workspace resources from historical job payloads, de-duplicated by
/// ID in first-seen order. Upstream has no dedicated resource listing.
pub fn extract_resources_from_jobs(jobs: &[Value]) -> Resources {
    let mut projects: IndexMap<String, Project> = IndexMap::new();
    let mut groups: IndexMap<String, ComputeGroup> = IndexMap::new();
    let mut specs: IndexMap<String, Spec> = IndexMap::new();

    for job in jobs {
        let spec = instance_spec(job);
        let gpu_info = spec.and_then(|s| s.get("gpu_info"));
        let gpu_type = gpu_info
            .and_then(|g| str_field(g, "gpu_type"))
            .unwrap_or_default();

        if let Some(id) = str_field(job, "project_id") {
            projects.entry(id.clone()).or_insert_with(|| Project {
                name: str_field(job, "project_name").unwrap_or_else(|| id.clone()),
                id,
            });
        }

        if let Some(id) = str_field(job, "logic_compute_group_id") {
            groups.entry(id.clone()).or_insert_with(|| ComputeGroup {
                name: str_field(job, "logic_compute_group_name").unwrap_or_else(|| id.clone()),
                gpu_type: gpu_type.clone(),
                gpu_type_display: gpu_info
                    .and_then(|g| str_field(g, "gpu_type_display"))
                    .unwrap_or_default(),
                id,
            });
        }

        if let Some((spec, id)) = spec.and_then(|s| str_field(s, "quota_id").map(|id| (s, id))) {
            specs.entry(id.clone()).or_insert_with(|| {
                let gpu_count = gpu_info
                    .and_then(|g| u64_field(g, "gpu_count"))
                    .unwrap_or(0) as u32;
                Spec {
                    name: format!("{}x {}", gpu_count, gpu_type),
                    gpu_type: gpu_type.clone(),
                    gpu_count,
                    cpu_count: u64_field(spec, "cpu_count").unwrap_or(0) as u32,
                    memory_gb: u64_field(spec, "memory_size_gib").unwrap_or(0) as u32,
                    id,
                }
            });
        }
    }

    Resources {
        projects: projects.into_values().collect(),
        compute_groups: groups.into_values().collect(),
        specs: specs.into_values().collect(),
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct JobPage {
    pub jobs: Vec<Value>,
    pub total: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TaskPage {
    pub task_dimensions: Vec<Value>,
    pub total: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NodePage {
    pub node_dimensions: Vec<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct WorkspaceInfo {
    pub id: String,
    pub name: String,
}

/// One running task of a workspace, as reported by the task-dimension listing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkspaceTask {
    pub id: String,
    pub name: String,
    pub status: String,
    pub gpu_total: u64,
    pub gpu_usage: f64,
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub node_count: u64,
    pub nodes: Vec<String>,
    pub user_name: String,
    pub project_name: String,
    pub running_time_ms: Option<u64>,
}

impl WorkspaceTask {
    pub fn from_payload(task: &Value) -> Self {
        let usage = |key: &str| {
            task.get(key)
                .and_then(|v| f64_field(v, "usage_rate"))
                .unwrap_or(0.0)
        };
        let occupied = task.get("nodes_occupied");

        WorkspaceTask {
            id: str_field(task, "id").unwrap_or_default(),
            name: str_field(task, "name").unwrap_or_default(),
            status: str_field(task, "status").unwrap_or_else(|| "UNKNOWN".to_string()),
            gpu_total: task
                .get("gpu")
                .and_then(|g| u64_field(g, "total"))
                .unwrap_or(0),
            gpu_usage: usage("gpu"),
            cpu_usage: usage("cpu"),
            memory_usage: usage("memory"),
            node_count: occupied.and_then(|o| u64_field(o, "count")).unwrap_or(0),
            nodes: occupied
                .and_then(|o| o.get("nodes"))
                .and_then(Value::as_array)
                .map(|nodes| {
                    nodes
                        .iter()
                        .filter_map(|n| n.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default(),
            user_name: nested_name(task, "user").unwrap_or_default(),
            project_name: nested_name(task, "project").unwrap_or_default(),
            running_time_ms: u64_field(task, "running_time_ms"),
        }
    }

    /// Minimal local record for `workspace --sync`.
    pub fn to_job_record(&self, workspace_id: &str) -> JobRecord {
        JobRecord {
            job_id: self.id.clone(),
            name: self.name.clone(),
            status: self.status.to_lowercase(),
            source: "workspace_sync".to_string(),
            workspace_id: workspace_id.to_string(),
            project_name: self.project_name.clone(),
            running_time_ms: self.running_time_ms,
            ..Default::default()
        }
    }
}

/// Free-node count of one compute group.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupAvailability {
    pub workspace_id: String,
    pub workspace_name: String,
    pub group_id: String,
    pub group_name: String,
    pub gpu_type: String,
    pub total_nodes: usize,
    pub free_nodes: Vec<String>,
}

impl GroupAvailability {
    /// Count nodes from a node-dimension listing. A node is free when it has
    /// GPUs and none of them are in use.
    pub fn from_nodes(group: &ComputeGroup, nodes: &[Value]) -> Self {
        let free_nodes = nodes
            .iter()
            .filter(|node| {
                let gpu = node.get("gpu");
                let used = gpu.and_then(|g| u64_field(g, "used")).unwrap_or(0);
                let total = gpu.and_then(|g| u64_field(g, "total")).unwrap_or(0);
                used == 0 && total > 0
            })
            .map(|node| str_field(node, "name").unwrap_or_default())
            .collect();

        GroupAvailability {
            group_id: group.id.clone(),
            group_name: if group.name.is_empty() {
                group.id.clone()
            } else {
                group.name.clone()
            },
            gpu_type: group.gpu_type.clone(),
            total_nodes: nodes.len(),
            free_nodes,
            ..Default::default()
        }
    }

    pub fn free_count(&self) -> usize {
        self.free_nodes.len()
    }
}

/// Groups with at least `required` free nodes, most free first.
pub fn recommend(results: &[GroupAvailability], required: usize) -> Vec<GroupAvailability> {
    let mut available: Vec<GroupAvailability> = results
        .iter()
        .filter(|r| r.free_count() >= required)
        .cloned()
        .collect();
    available.sort_by(|a, b| b.free_count().cmp(&a.free_count()));
    available
}
