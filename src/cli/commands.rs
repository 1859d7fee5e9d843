use crate::api::payload::{
    extract_resources_from_jobs, job_record_from_payload, recommend, GroupAvailability,
    WorkspaceTask,
};
use crate::api::{is_error_entry, Gateway};
use crate::cli::args::{AvailArgs, CookieArgs, ListArgs, ResourcesArgs, WorkspaceArgs};
use crate::cli::display;
use crate::cli::prompt;
use crate::common::config::{Config, StateDir};
use crate::common::error::QzError;
use crate::common::types::{status, CookieSession, JobRecord, JobUpdate, Resources};
use crate::resources::ResourceCache;
use crate::store::{sort_newest_first, JobStore};
use anyhow::{Context, Result};
use colored::*;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Jobs fetched per workspace when deriving resources from history.
const RESOURCE_SCAN_PAGE_SIZE: u32 = 200;
/// Node listings fetched per compute group.
const NODE_PAGE_SIZE: u32 = 200;
/// Most job details refreshed right after an import.
const IMPORT_REFRESH_LIMIT: usize = 50;

const EXPIRED_COOKIE_HINT: &str =
    "Cookie expired, set a new one with `qzcli cookie -f <cookie_file>` or run `qzcli login`";

/// Everything one invocation needs: the state directory and the API.
pub struct CommandExecutor<G: Gateway> {
    state: StateDir,
    api: G,
}

impl<G: Gateway> CommandExecutor<G> {
    pub fn new(state: StateDir, api: G) -> Self {
        CommandExecutor { state, api }
    }

    pub fn state(&self) -> &StateDir {
        &self.state
    }

    fn require_cookie(&self) -> Result<CookieSession> {
        self.state.load_cookie().ok_or_else(|| QzError::MissingCookie.into())
    }

    /// Replace a session-expiry error with the re-authentication hint.
    fn expired_or(err: QzError, context: String) -> anyhow::Error {
        if err.is_session_expired() {
            anyhow::anyhow!(EXPIRED_COOKIE_HINT)
        } else {
            anyhow::Error::new(err).context(context)
        }
    }

    /// Refresh the given jobs from the API, skipping per-ID failures.
    /// Returns how many records were updated.
    async fn refresh_jobs(&self, store: &mut JobStore, job_ids: &[String]) -> Result<usize> {
        if job_ids.is_empty() {
            return Ok(0);
        }
        let results = self.api.get_jobs_detail(job_ids).await?;
        let mut updated = 0;
        for (job_id, payload) in &results {
            if is_error_entry(payload) {
                continue;
            }
            store.update_from_api(job_id, payload)?;
            updated += 1;
        }
        tracing::debug!(requested = job_ids.len(), updated, "refreshed job statuses");
        Ok(updated)
    }

    pub async fn init(
        &self,
        username: Option<String>,
        password: Option<String>,
        api_url: Option<String>,
    ) -> Result<()> {
        let username = match username {
            Some(u) => u,
            None => prompt::ask("Username: ")?,
        };
        let password = match password {
            Some(p) => p,
            None => prompt::ask_password("Password: ")?,
        };
        if username.is_empty() || password.is_empty() {
            anyhow::bail!("Username and password must not be empty");
        }

        let config = Config::init(&self.state, &username, &password, api_url.as_deref())?;
        tracing::debug!(api = %config.api_base_url, "verifying against saved config");
        let api = self.api.reconnect(config)?;

        println!("Verifying credentials...");
        api.authenticate(&username, &password)
            .await
            .context("Authentication failed, check username and password")?;

        display::success("Credentials saved");
        println!("   Config directory: {}", self.state.root().display());
        Ok(())
    }

    pub async fn list(&self, args: &ListArgs) -> Result<()> {
        if args.cookie {
            return self.list_with_cookie(args).await;
        }

        let mut store = JobStore::open(&self.state);
        let fetch_limit = if args.running { args.limit.saturating_mul(3) } else { args.limit };
        let status_filter = args.status.as_deref();

        let mut jobs = store.list(Some(fetch_limit), status_filter);
        if jobs.is_empty() {
            display::hint("No job records, add some with `qzcli import` or `qzcli track`");
            return Ok(());
        }

        if !args.no_refresh {
            display::hint("Refreshing job statuses...");
            let ids = store.refreshable_ids(Some(fetch_limit), status_filter);
            if let Err(e) = self.refresh_jobs(&mut store, &ids).await {
                tracing::warn!(error = %e, "status refresh failed");
                display::warning(&format!("Some job statuses could not be refreshed: {}", e));
            }
            jobs = store.list(Some(fetch_limit), status_filter);
        }

        if args.running {
            jobs.retain(JobRecord::is_active);
            jobs.truncate(args.limit);
            if jobs.is_empty() {
                display::hint("No running jobs");
                return Ok(());
            }
        }

        self.render_jobs(&jobs, args.compact);
        Ok(())
    }

    fn render_jobs(&self, jobs: &[JobRecord], compact: bool) {
        if compact {
            display::print_jobs_table(jobs, None);
        } else {
            display::print_jobs_wide(jobs);
        }
    }

    async fn list_with_cookie(&self, args: &ListArgs) -> Result<()> {
        let session = self.require_cookie()?;
        let cache = ResourceCache::open(&self.state);

        let targets: Vec<(String, String)> = if args.all_ws {
            if cache.is_empty() {
                anyhow::bail!("No cached workspaces, run `qzcli res -w <workspace_id> -u` first");
            }
            cache
                .workspace_ids()
                .into_iter()
                .map(|id| {
                    let name = cache.workspace_name(&id);
                    (id, name)
                })
                .collect()
        } else if let Some(input) = args.workspace.as_deref() {
            let id = cache
                .resolve_workspace(input)
                .context("Use `qzcli res --list` to see cached workspaces")?;
            let mut name = cache.workspace_name(&id);
            if name.is_empty() && id != input {
                name = input.to_string();
            }
            vec![(id, name)]
        } else if !session.workspace_id.is_empty() {
            let name = cache.workspace_name(&session.workspace_id);
            vec![(session.workspace_id.clone(), name)]
        } else {
            anyhow::bail!("Specify a workspace with `-w <name or ID>` or use --all-ws");
        };

        let page_size = cookie_page_size(args.limit, args.running);
        let mut jobs = Vec::new();
        let mut failures = 0;

        for (workspace_id, ws_name) in &targets {
            let label = if ws_name.is_empty() { workspace_id } else { ws_name };
            display::hint(&format!("Fetching jobs of {}...", label));

            match self.api.list_jobs(workspace_id, &session.cookie, page_size).await {
                Ok(page) => {
                    for payload in &page.jobs {
                        let mut job = job_record_from_payload(payload, "", "api_cookie");
                        if !ws_name.is_empty() {
                            job.metadata
                                .insert("workspace_name".to_string(), ws_name.clone());
                        }
                        jobs.push(job);
                    }
                }
                Err(e) if e.is_session_expired() => anyhow::bail!(EXPIRED_COOKIE_HINT),
                Err(e) => {
                    failures += 1;
                    tracing::warn!(workspace_id = %workspace_id, error = %e, "job listing failed");
                    display::warning(&format!("Failed to fetch {}: {}", label, e));
                }
            }
        }

        if failures == targets.len() {
            anyhow::bail!("Could not fetch jobs from any workspace");
        }

        sort_newest_first(&mut jobs);
        if let Some(filter) = args.status.as_deref() {
            jobs.retain(|job| status::matches_filter(&job.status, filter));
        }
        if args.running {
            jobs.retain(JobRecord::is_active);
        }
        jobs.truncate(args.limit);

        if jobs.is_empty() {
            display::hint("No matching jobs");
            return Ok(());
        }

        if let [(_, name)] = targets.as_slice() {
            if !name.is_empty() {
                println!("\n{}\n", format!("Workspace: {}", name).bold());
            }
        }
        self.render_jobs(&jobs, args.compact);
        Ok(())
    }

    pub async fn status(&self, job_id: &str, json: bool) -> Result<()> {
        let payload = self
            .api
            .get_job_detail(job_id)
            .await
            .with_context(|| format!("Failed to query job {}", job_id))?;

        let mut store = JobStore::open(&self.state);
        let job = store.update_from_api(job_id, &payload)?;
        display::print_job_detail(&job);

        if json {
            println!("{}", serde_json::to_string_pretty(&payload)?);
        }
        Ok(())
    }

    pub async fn stop(&self, job_id: &str, yes: bool) -> Result<()> {
        if !yes && !prompt::confirm(&format!("Stop job {}?", job_id))? {
            println!("Cancelled");
            return Ok(());
        }

        let stopped = self
            .api
            .stop_job(job_id)
            .await
            .with_context(|| format!("Failed to stop job {}", job_id))?;
        if !stopped {
            anyhow::bail!("Failed to stop job {}", job_id);
        }

        let mut store = JobStore::open(&self.state);
        store.update(job_id, JobUpdate::status(status::STOPPED))?;
        display::success(&format!("Job {} stopped", job_id));
        Ok(())
    }

    /// Poll until every tracked job is terminal (or forever with `keep_alive`).
    /// Ctrl-C ends the loop with `QzError::Interrupted`.
    pub async fn watch(&self, interval: u64, limit: usize, keep_alive: bool) -> Result<()> {
        println!(
            "{}",
            format!("Watching jobs every {}s, press Ctrl+C to stop", interval).bold()
        );

        tokio::select! {
            result = self.watch_loop(interval, limit, keep_alive) => result,
            _ = tokio::signal::ctrl_c() => {
                display::hint("\nWatch stopped");
                Err(QzError::Interrupted.into())
            }
        }
    }

    async fn watch_loop(&self, interval: u64, limit: usize, keep_alive: bool) -> Result<()> {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval.max(1)));
        let title = format!("Qizhi jobs (refresh every {}s)", interval);

        loop {
            ticker.tick().await;

            let mut store = JobStore::open(&self.state);
            let ids = store.refreshable_ids(None, None);
            if let Err(e) = self.refresh_jobs(&mut store, &ids).await {
                tracing::warn!(error = %e, "watch refresh failed");
            }

            let jobs = store.list(Some(limit), None);
            print!("\x1B[2J\x1B[H");
            display::print_jobs_table(&jobs, Some(&title));

            let active = jobs.iter().filter(|job| !job.is_terminal()).count();
            if active == 0 && !keep_alive {
                println!("\n{}", "All jobs finished".green());
                return Ok(());
            }
        }
    }

    pub async fn track(
        &self,
        job_id: &str,
        name: Option<String>,
        source: Option<String>,
        workspace: Option<String>,
        quiet: bool,
    ) -> Result<()> {
        let mut job = match self.api.get_job_detail(job_id).await {
            Ok(payload) => job_record_from_payload(&payload, job_id, ""),
            Err(e) => {
                tracing::debug!(job_id, error = %e, "tracking without API details");
                JobRecord::new(job_id)
            }
        };
        job.job_id = job_id.to_string();

        if let Some(name) = name {
            job.name = name;
        }
        if let Some(source) = source {
            job.source = source;
        }
        if let Some(workspace) = workspace {
            job.workspace_id = workspace;
        }

        let mut store = JobStore::open(&self.state);
        store.add(job)?;

        if !quiet {
            display::success(&format!("Tracking job {}", job_id));
        }
        Ok(())
    }

    pub async fn import(&self, file: &Path, source: Option<String>, refresh: bool) -> Result<()> {
        if !file.exists() {
            anyhow::bail!("File not found: {}", file.display());
        }
        let source = source.unwrap_or_else(|| {
            file.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        });

        let mut store = JobStore::open(&self.state);
        let count = store
            .import_from_file(file, &source)
            .with_context(|| format!("Failed to import {}", file.display()))?;
        display::success(&format!("Imported {} job(s)", count));

        if refresh && count > 0 {
            println!("Refreshing job statuses...");
            let ids: Vec<String> = store
                .list(None, None)
                .into_iter()
                .filter(|job| job.status.is_empty() || job.status == status::UNKNOWN)
                .map(|job| job.job_id)
                .take(IMPORT_REFRESH_LIMIT)
                .collect();

            match self.refresh_jobs(&mut store, &ids).await {
                Ok(updated) => display::success(&format!("Updated {} job status(es)", updated)),
                Err(e) => display::warning(&format!("Status refresh failed: {}", e)),
            }
        }
        Ok(())
    }

    pub async fn remove(&self, job_id: &str, yes: bool) -> Result<()> {
        if !yes && !prompt::confirm(&format!("Remove job record {}?", job_id))? {
            println!("Cancelled");
            return Ok(());
        }

        let mut store = JobStore::open(&self.state);
        if !store.remove(job_id)? {
            return Err(QzError::JobNotFound(job_id.to_string()).into());
        }
        display::success(&format!("Removed job record {}", job_id));
        Ok(())
    }

    pub async fn clear(&self, yes: bool) -> Result<()> {
        let mut store = JobStore::open(&self.state);
        let count = store.count();
        if count == 0 {
            println!("No job records");
            return Ok(());
        }

        if !yes && !prompt::confirm(&format!("Remove all {} job records?", count))? {
            println!("Cancelled");
            return Ok(());
        }

        store.clear()?;
        display::success(&format!("Removed {} job record(s)", count));
        Ok(())
    }

    pub async fn cookie(&self, args: &CookieArgs) -> Result<()> {
        if args.clear {
            self.state.clear_cookie()?;
            display::success("Cookie cleared");
            return Ok(());
        }

        if args.show {
            match self.state.load_cookie() {
                Some(session) => {
                    println!("Workspace: {}", if session.workspace_id.is_empty() { "N/A" } else { session.workspace_id.as_str() });
                    println!("Cookie: {}...", display::truncate(&session.cookie, 80));
                    println!("Saved: {}", display::format_timestamp(session.saved_at));
                }
                None => display::hint("No cookie set"),
            }
            return Ok(());
        }

        let mut cookie = args.cookie.clone().unwrap_or_default();
        if let Some(path) = &args.file {
            let content = fs::read_to_string(path)
                .with_context(|| format!("File not found: {}", path.display()))?;
            cookie = parse_cookie_file(&content)
                .ok_or_else(|| anyhow::anyhow!("No cookie found in {}", path.display()))?;
            display::hint(&format!("Read cookie from {}", path.display()));
        }
        if cookie.is_empty() {
            display::hint("Paste the browser cookie (F12 -> Console -> document.cookie):");
            cookie = prompt::ask("> ")?;
        }
        if cookie.is_empty() {
            anyhow::bail!("Cookie must not be empty");
        }

        let workspace_id = args.workspace.clone().unwrap_or_default();
        if !args.no_test && !workspace_id.is_empty() {
            println!("Verifying cookie...");
            let page = self
                .api
                .list_jobs(&workspace_id, &cookie, 1)
                .await
                .context("Cookie rejected")?;
            display::success(&format!("Cookie valid, workspace has {} job(s)", page.total));
        }

        self.state.save_cookie(&cookie, &workspace_id)?;
        display::success("Cookie saved");
        Ok(())
    }

    pub async fn login(
        &self,
        username: Option<String>,
        password: Option<String>,
        workspace: Option<String>,
    ) -> Result<()> {
        let username = match username {
            Some(u) => u,
            None => prompt::ask("Username: ")?,
        };
        if username.is_empty() {
            anyhow::bail!("Username must not be empty");
        }
        let password = match password {
            Some(p) => p,
            None => prompt::ask_password("Password: ")?,
        };
        if password.is_empty() {
            anyhow::bail!("Password must not be empty");
        }

        display::hint("Signing in...");
        let cookie = self
            .api
            .login_with_cas(&username, &password)
            .await
            .context("Login failed")?;

        // keep the previous default workspace unless a new one is given
        let workspace_id = workspace
            .or_else(|| self.state.load_cookie().map(|s| s.workspace_id))
            .unwrap_or_default();
        self.state.save_cookie(&cookie, &workspace_id)?;

        display::success("Logged in, cookie saved");
        display::hint(&format!("Cookie: {}", display::truncate(&cookie, 50)));
        if !workspace_id.is_empty() {
            display::hint(&format!("Default workspace: {}", workspace_id));
        }
        Ok(())
    }

    pub async fn workspace(&self, args: &WorkspaceArgs) -> Result<()> {
        let session = self.require_cookie()?;
        let cache = ResourceCache::open(&self.state);

        let workspace_id = match args.workspace.as_deref() {
            Some(input) => cache.resolve_workspace(input)?,
            None => session.workspace_id.clone(),
        };

        if workspace_id.is_empty() {
            display::warning("No default workspace, fetching the workspaces you can access...");
            let workspaces = self
                .api
                .list_workspaces(&session.cookie)
                .await
                .map_err(|e| Self::expired_or(e, "Failed to list workspaces".to_string()))?;
            if workspaces.is_empty() {
                anyhow::bail!("No accessible workspaces found");
            }
            println!("{}\n", "Pick a workspace:".bold());
            for (idx, ws) in workspaces.iter().enumerate() {
                println!("  [{}] {}", idx + 1, if ws.name.is_empty() { "[unnamed]" } else { ws.name.as_str() });
                println!("      {}", ws.id.dimmed());
            }
            println!();
            display::hint("qzcli ws -w <workspace_id>");
            display::hint("qzcli cookie -w <workspace_id>   # set the default");
            anyhow::bail!("No workspace selected");
        }

        let project_filter = if args.all { None } else { args.project.as_deref() };

        display::hint("Fetching workspace tasks...");
        let page = self
            .api
            .list_workspace_tasks(&workspace_id, &session.cookie, args.page, args.size, project_filter)
            .await
            .map_err(|e| Self::expired_or(e, "Failed to fetch workspace tasks".to_string()))?;

        let tasks: Vec<WorkspaceTask> = page.task_dimensions.iter().map(WorkspaceTask::from_payload).collect();
        if tasks.is_empty() {
            match project_filter {
                Some(project) => display::hint(&format!("No running tasks in project '{}'", project)),
                None => println!("No running tasks in this workspace"),
            }
            return Ok(());
        }

        let total_gpu: u64 = tasks.iter().map(|t| t.gpu_total).sum();
        let avg_usage = tasks.iter().map(|t| t.gpu_usage).sum::<f64>() / tasks.len() as f64 * 100.0;

        let mut title = "Workspace tasks".to_string();
        if let Some(project) = project_filter {
            title.push_str(&format!(" [{}]", project));
        }
        title.push_str(&format!(
            " ({}/{} shown, {} GPU, {:.1}% average utilisation)",
            tasks.len(),
            page.total,
            total_gpu,
            avg_usage
        ));
        println!("\n{}\n", title.bold());

        if args.sync {
            let mut store = JobStore::open(&self.state);
            let mut synced = 0;
            for task in tasks.iter().filter(|t| !t.id.is_empty()) {
                if store.add_if_absent(task.to_job_record(&workspace_id))? {
                    synced += 1;
                }
            }
            if synced > 0 {
                display::success(&format!("Synced {} new task(s) to the local store", synced));
            }
        }

        display::print_tasks(&tasks);
        Ok(())
    }

    pub async fn resources(&self, args: &ResourcesArgs) -> Result<()> {
        let mut cache = ResourceCache::open(&self.state);

        if args.list {
            let cached = cache.list_cached_workspaces();
            if cached.is_empty() {
                display::hint("No cached workspaces, add one with `qzcli res -w <workspace_id> -u`");
                return Ok(());
            }
            display::print_workspace_summaries(&cached);
            display::hint("qzcli res -w <name or ID>        # show resources");
            display::hint("qzcli res -w <ID> -u             # refresh the cache");
            display::hint("qzcli res -w <ID> --name <alias> # set an alias");
            return Ok(());
        }

        let session = self.state.load_cookie();

        if let (Some(name), false) = (args.name.as_deref(), args.update) {
            let input = args
                .workspace
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("Specify the workspace: qzcli res -w <workspace_id> --name <alias>"))?;
            let workspace_id = cache.resolve_workspace(input)?;
            cache.set_workspace_name(&workspace_id, name)?;
            display::success(&format!("Workspace {} is now called '{}'", workspace_id, name));
            return Ok(());
        }

        let workspace_id = match args.workspace.as_deref() {
            Some(input) => {
                let id = cache
                    .resolve_workspace(input)
                    .context("Use `qzcli res --list` to see cached workspaces")?;
                if id != input {
                    display::hint(&format!("Matched workspace: {} -> {}", input, id));
                }
                id
            }
            None => session
                .as_ref()
                .map(|s| s.workspace_id.clone())
                .unwrap_or_default(),
        };
        if workspace_id.is_empty() {
            anyhow::bail!("Specify a workspace: qzcli res -w <name or ID>");
        }

        let cached = if args.update {
            None
        } else {
            cache.get_workspace_resources(&workspace_id).cloned()
        };
        let resources = match cached {
            Some(cached) => {
                let mut title = "Resources".to_string();
                if !cached.name.is_empty() {
                    title.push_str(&format!(" [{}]", cached.name));
                }
                title.push_str(&format!(" (cached {})", display::format_timestamp(cached.updated_at)));
                println!("\n{}", title.bold());
                display::hint(&format!("Workspace: {}\n", workspace_id));

                Resources {
                    projects: cached.projects.values().cloned().collect(),
                    compute_groups: cached.compute_groups.values().cloned().collect(),
                    specs: cached.specs.values().cloned().collect(),
                }
            }
            None => {
                let session = session.ok_or(QzError::MissingCookie)?;
                display::hint("Extracting resources from job history...");

                let page = self
                    .api
                    .list_jobs(&workspace_id, &session.cookie, RESOURCE_SCAN_PAGE_SIZE)
                    .await
                    .map_err(|e| Self::expired_or(e, "Failed to fetch jobs".to_string()))?;
                if page.jobs.is_empty() {
                    println!("No jobs found");
                    return Ok(());
                }

                let resources = extract_resources_from_jobs(&page.jobs);
                let alias = args.name.clone().unwrap_or_default();
                cache.save_resources(&workspace_id, resources.clone(), &alias)?;
                display::success("Resources saved to the local cache");

                println!(
                    "\n{}",
                    format!("Resources (from {}/{} jobs)", page.jobs.len(), page.total).bold()
                );
                display::hint(&format!("Workspace: {}\n", workspace_id));
                resources
            }
        };

        display::print_resources(&resources.projects, &resources.compute_groups, &resources.specs);
        if args.export {
            display::print_resource_exports(
                &workspace_id,
                &resources.projects,
                &resources.compute_groups,
                &resources.specs,
            );
        }
        Ok(())
    }

    /// Count free nodes per compute group, optionally recommending groups
    /// with at least `--nodes` free.
    pub async fn avail(&self, args: &AvailArgs) -> Result<()> {
        let session = self.require_cookie()?;
        let cache = ResourceCache::open(&self.state);

        let workspace_ids = match args.workspace.as_deref() {
            None => {
                if cache.is_empty() {
                    anyhow::bail!("No cached workspaces, run `qzcli res -w <workspace_id> -u` first");
                }
                cache.workspace_ids()
            }
            Some(input) => {
                let id = cache
                    .resolve_workspace(input)
                    .context("Use `qzcli res --list` to see cached workspaces")?;
                if id != input {
                    display::hint(&format!("Matched workspace: {} -> {}", input, id));
                }
                vec![id]
            }
        };

        let results = self
            .collect_availability(&cache, &session, &workspace_ids, args.group.as_deref())
            .await?;
        if results.is_empty() {
            anyhow::bail!("Could not fetch node information for any compute group");
        }

        println!("\n{}\n", "Free nodes".bold());

        let Some(required) = required_nodes(args.nodes) else {
            display::print_availability(&results, args.show_nodes);
            if args.export {
                display::print_availability_exports(&results);
            }
            return Ok(());
        };

        let available = recommend(&results, required);
        if available.is_empty() {
            println!("{}\n", format!("No compute group has >= {} free nodes", required).red());
            println!("Free nodes per compute group:");
            for r in &results {
                println!("  [{}] {}: {} free [{}]", r.workspace_name, r.group_name, r.free_count(), r.gpu_type);
            }
            anyhow::bail!("Not enough free nodes");
        }

        display::print_recommendations(required, &available, args.show_nodes);

        if args.export {
            let best = &available[0];
            println!();
            println!("# Recommended: [{}] {} ({} free)", best.workspace_name, best.group_name, best.free_count());
            println!("WORKSPACE_ID=\"{}\"", best.workspace_id);
            println!("LOGIC_COMPUTE_GROUP_ID=\"{}\"", best.group_id);
            let spec = cache
                .get_workspace_resources(&best.workspace_id)
                .and_then(|ws| ws.specs.values().next());
            if let Some(spec) = spec {
                println!("SPEC_ID=\"{}\"  # {}x {}", spec.id, spec.gpu_count, spec.gpu_type);
            }
        }
        Ok(())
    }

    /// Free-node summaries for every compute group of `workspace_ids`.
    /// Groups whose listing fails are reported and skipped; an expired
    /// session aborts.
    pub async fn collect_availability(
        &self,
        cache: &ResourceCache,
        session: &CookieSession,
        workspace_ids: &[String],
        group_filter: Option<&str>,
    ) -> Result<Vec<GroupAvailability>> {
        let mut results = Vec::new();

        for workspace_id in workspace_ids {
            let Some(ws) = cache.get_workspace_resources(workspace_id) else {
                display::warning(&format!("No cached resources for {}, skipping", workspace_id));
                continue;
            };
            let ws_name = ws.display_name().to_string();

            let groups = cache.compute_groups(workspace_id, group_filter);
            if groups.is_empty() {
                continue;
            }
            display::hint(&format!("Querying {} compute group(s) of {}...", groups.len(), ws_name));

            for group in &groups {
                match self
                    .api
                    .list_node_dimension(workspace_id, &session.cookie, &group.id, NODE_PAGE_SIZE)
                    .await
                {
                    Ok(page) => {
                        let mut result = GroupAvailability::from_nodes(group, &page.node_dimensions);
                        result.workspace_id = workspace_id.clone();
                        result.workspace_name = ws_name.clone();
                        results.push(result);
                    }
                    Err(e) if e.is_session_expired() => anyhow::bail!(EXPIRED_COOKIE_HINT),
                    Err(e) => {
                        tracing::warn!(group = %group.id, error = %e, "node listing failed");
                        display::warning(&format!("Failed to query {}: {}", group.name, e));
                    }
                }
            }
        }
        Ok(results)
    }
}

/// Jobs requested per workspace in cookie mode. `--running` over-fetches
/// because the filter runs after the page arrives.
fn cookie_page_size(limit: usize, running: bool) -> u32 {
    let size = if running { limit.saturating_mul(2) } else { limit };
    u32::try_from(size).unwrap_or(u32::MAX)
}

/// `--nodes 0` asks for nothing and falls back to the summary view.
fn required_nodes(nodes: Option<usize>) -> Option<usize> {
    nodes.filter(|n| *n > 0)
}

/// The last non-empty line that is neither a comment nor a bare `cookie` header.
pub fn parse_cookie_file(content: &str) -> Option<String> {
    content
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty() && !line.starts_with('#') && *line != "cookie")
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cookie_file() {
        let content = "# exported from browser\ncookie\nold=1\n  sid=abc; token=xyz  \n\n";
        assert_eq!(parse_cookie_file(content).as_deref(), Some("sid=abc; token=xyz"));
        assert_eq!(parse_cookie_file("# nothing\ncookie\n"), None);
    }

    #[test]
    fn test_cookie_page_size_saturates() {
        assert_eq!(cookie_page_size(20, false), 20);
        assert_eq!(cookie_page_size(20, true), 40);
        assert_eq!(cookie_page_size(usize::MAX, true), u32::MAX);
    }

    #[test]
    fn test_zero_nodes_means_no_requirement() {
        assert_eq!(required_nodes(None), None);
        assert_eq!(required_nodes(Some(0)), None);
        assert_eq!(required_nodes(Some(3)), Some(3));
    }
}
