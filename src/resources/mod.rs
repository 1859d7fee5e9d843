use crate::common::config::{now_ts, StateDir, RESOURCES_FILE};
use crate::common::error::{QzError, Result};
use crate::common::types::{
    ComputeGroup, NamedResource, ResourceKind, ResourceRef, Resources, WorkspaceResources,
    WorkspaceSummary,
};
use indexmap::IndexMap;

/// Literal prefix of every workspace ID.
pub const WORKSPACE_ID_PREFIX: &str = "ws-";
/// Literal prefix of every logical compute group ID.
pub const COMPUTE_GROUP_ID_PREFIX: &str = "lcg-";

impl NamedResource for WorkspaceResources {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Two-pass name resolution: exact (case-sensitive) match first, then the
/// first case-insensitive substring match in iteration order.
///
/// Several substring matches are not treated as ambiguous; the first one wins.
pub fn match_by_name<'a, T, I>(mut items: I, name: &str) -> Option<&'a T>
where
    T: NamedResource + 'a,
    I: Iterator<Item = &'a T> + Clone,
{
    if name.is_empty() {
        return None;
    }
    if let Some(exact) = items.clone().find(|item| item.name() == name) {
        return Some(exact);
    }
    let needle = name.to_lowercase();
    items.find(|item| item.name().to_lowercase().contains(&needle))
}

/// Per-workspace cache of projects, compute groups and specs, persisted as
/// `resources.json` (workspace ID -> cache, in insertion order).
#[derive(Debug)]
pub struct ResourceCache {
    state: StateDir,
    workspaces: IndexMap<String, WorkspaceResources>,
}

impl ResourceCache {
    pub fn open(state: &StateDir) -> Self {
        let workspaces = state.load_json(RESOURCES_FILE);
        ResourceCache {
            state: state.clone(),
            workspaces,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.workspaces.is_empty()
    }

    pub fn workspace_ids(&self) -> Vec<String> {
        self.workspaces.keys().cloned().collect()
    }

    /// Replace the cached resources of `workspace_id` wholesale.
    ///
    /// A non-empty `name` becomes the alias; otherwise the previous alias is
    /// kept. On a failed write the in-memory and on-disk cache stay as they were.
    pub fn save_resources(
        &mut self,
        workspace_id: &str,
        resources: Resources,
        name: &str,
    ) -> Result<()> {
        let alias = if name.is_empty() {
            self.workspaces
                .get(workspace_id)
                .map(|ws| ws.name.clone())
                .unwrap_or_default()
        } else {
            name.to_string()
        };

        let entry = WorkspaceResources {
            id: workspace_id.to_string(),
            name: alias,
            projects: resources
                .projects
                .into_iter()
                .map(|p| (p.id.clone(), p))
                .collect(),
            compute_groups: resources
                .compute_groups
                .into_iter()
                .map(|g| (g.id.clone(), g))
                .collect(),
            specs: resources
                .specs
                .into_iter()
                .map(|s| (s.id.clone(), s))
                .collect(),
            updated_at: now_ts(),
        };

        let mut next = self.workspaces.clone();
        next.insert(workspace_id.to_string(), entry);
        self.commit(next)
    }

    pub fn get_workspace_resources(&self, workspace_id: &str) -> Option<&WorkspaceResources> {
        self.workspaces.get(workspace_id)
    }

    /// Set the alias of a workspace, creating an empty cache entry if needed.
    pub fn set_workspace_name(&mut self, workspace_id: &str, name: &str) -> Result<bool> {
        let mut next = self.workspaces.clone();
        next.entry(workspace_id.to_string())
            .and_modify(|ws| ws.name = name.to_string())
            .or_insert_with(|| WorkspaceResources::empty(workspace_id, name, now_ts()));
        self.commit(next)?;
        Ok(true)
    }

    pub fn find_workspace_by_name(&self, name: &str) -> Option<String> {
        match_by_name(self.workspaces.values(), name).map(|ws| ws.id.clone())
    }

    pub fn find_resource_by_name(
        &self,
        workspace_id: &str,
        kind: ResourceKind,
        name: &str,
    ) -> Option<ResourceRef<'_>> {
        let ws = self.workspaces.get(workspace_id)?;
        match kind {
            ResourceKind::Projects => {
                match_by_name(ws.projects.values(), name).map(ResourceRef::Project)
            }
            ResourceKind::ComputeGroups => {
                match_by_name(ws.compute_groups.values(), name).map(ResourceRef::ComputeGroup)
            }
            ResourceKind::Specs => match_by_name(ws.specs.values(), name).map(ResourceRef::Spec),
        }
    }

    pub fn list_cached_workspaces(&self) -> Vec<WorkspaceSummary> {
        self.workspaces
            .iter()
            .map(|(id, ws)| WorkspaceSummary {
                id: id.clone(),
                name: ws.name.clone(),
                updated_at: ws.updated_at,
                project_count: ws.projects.len(),
                compute_group_count: ws.compute_groups.len(),
                spec_count: ws.specs.len(),
            })
            .collect()
    }

    /// Turn a user-typed workspace token into a workspace ID.
    ///
    /// Tokens carrying the `ws-` prefix are IDs already and skip name lookup.
    pub fn resolve_workspace(&self, input: &str) -> Result<String> {
        if input.starts_with(WORKSPACE_ID_PREFIX) {
            return Ok(input.to_string());
        }
        self.find_workspace_by_name(input)
            .ok_or_else(|| QzError::WorkspaceNotFound(input.to_string()))
    }

    /// Alias of a workspace, or empty if it is not cached or unnamed.
    pub fn workspace_name(&self, workspace_id: &str) -> String {
        self.workspaces
            .get(workspace_id)
            .map(|ws| ws.name.clone())
            .unwrap_or_default()
    }

    /// Compute groups of a cached workspace, optionally narrowed by a
    /// `lcg-` ID or a group name. Empty when nothing matches.
    pub fn compute_groups(&self, workspace_id: &str, filter: Option<&str>) -> Vec<ComputeGroup> {
        let Some(ws) = self.workspaces.get(workspace_id) else {
            return Vec::new();
        };

        match filter {
            None => ws.compute_groups.values().cloned().collect(),
            Some(id) if id.starts_with(COMPUTE_GROUP_ID_PREFIX) => {
                ws.compute_groups.get(id).cloned().into_iter().collect()
            }
            Some(name) => match_by_name(ws.compute_groups.values(), name)
                .cloned()
                .into_iter()
                .collect(),
        }
    }

    fn commit(&mut self, next: IndexMap<String, WorkspaceResources>) -> Result<()> {
        self.state.save_json(RESOURCES_FILE, &next)?;
        self.workspaces = next;
        Ok(())
    }
}
