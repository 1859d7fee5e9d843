use crate::api::payload::{GroupAvailability, WorkspaceTask};
use crate::common::types::{ComputeGroup, JobRecord, Project, Spec, WorkspaceSummary};
use colored::*;

pub fn success(message: &str) {
    println!("{} {}", "✓".green(), message);
}

pub fn warning(message: &str) {
    eprintln!("{} {}", "⚠".yellow(), message.yellow());
}

pub fn hint(message: &str) {
    println!("{}", message.dimmed());
}

/// Pad first, colour second, so ANSI codes don't break column widths.
/// A zero width leaves the status unpadded.
fn status_cell(status: &str, width: usize) -> ColoredString {
    let cell = if width == 0 {
        status.to_string()
    } else {
        format!("{:<width$}", truncate(status, width), width = width)
    };
    let lower = status.to_lowercase();
    if lower.contains("running") {
        cell.cyan()
    } else if lower.contains("queu") || lower.contains("pending") {
        cell.yellow()
    } else if lower.contains("succeeded") {
        cell.green()
    } else if lower.contains("failed") {
        cell.red()
    } else if lower.contains("stopped") {
        cell.magenta()
    } else {
        cell.normal()
    }
}

/// Shorten to `max` characters, marking the cut with `…`.
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let kept: String = text.chars().take(max.saturating_sub(1)).collect();
    format!("{}…", kept)
}

pub fn format_duration_ms(ms: Option<u64>) -> String {
    let Some(ms) = ms else {
        return "-".to_string();
    };
    let secs = ms / 1000;
    let (days, hours, minutes) = (secs / 86_400, (secs % 86_400) / 3600, (secs % 3600) / 60);
    if days > 0 {
        format!("{}d {}h", days, hours)
    } else if hours > 0 {
        format!("{}h {:02}m", hours, minutes)
    } else if minutes > 0 {
        format!("{}m", minutes)
    } else {
        format!("{}s", secs)
    }
}

/// Local `YYYY-MM-DD HH:MM` for a unix timestamp in seconds.
pub fn format_timestamp(ts: f64) -> String {
    chrono::DateTime::from_timestamp(ts as i64, 0)
        .map(|dt| {
            dt.with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M")
                .to_string()
        })
        .unwrap_or_else(|| "-".to_string())
}

fn or_dash(text: &str) -> &str {
    if text.is_empty() {
        "-"
    } else {
        text
    }
}

pub fn print_jobs_table(jobs: &[JobRecord], title: Option<&str>) {
    if let Some(title) = title {
        println!("{}", title.bold());
    }
    println!(
        "{}",
        format!(
            "{:<38} {:<28} {:<14} {:<19} {:>8}",
            "JOB ID", "NAME", "STATUS", "CREATED", "RUNTIME"
        )
        .bold()
    );
    for job in jobs {
        println!(
            "{} {:<28} {} {:<19} {:>8}",
            format!("{:<38}", job.job_id).bright_yellow(),
            truncate(or_dash(&job.name), 28),
            status_cell(or_dash(&job.status), 14),
            truncate(or_dash(&job.created_at), 19),
            format_duration_ms(job.running_time_ms),
        );
    }
    println!("{}", format!("{} job(s)", jobs.len()).dimmed());
}

pub fn print_jobs_wide(jobs: &[JobRecord]) {
    for job in jobs {
        println!(
            "\n  • {} [{}]",
            or_dash(&job.name).bold(),
            status_cell(or_dash(&job.status), 0)
        );
        println!("    ID: {}", job.job_id.bright_yellow());

        let mut facts = Vec::new();
        if let Some(ws) = job.metadata.get("workspace_name") {
            facts.push(ws.clone());
        }
        if !job.project_name.is_empty() {
            facts.push(job.project_name.clone());
        }
        if !job.compute_group_name.is_empty() {
            facts.push(job.compute_group_name.clone());
        }
        if let Some(gpus) = job.gpu_count {
            facts.push(format!("{} GPU", gpus));
        }
        if !facts.is_empty() {
            println!("    {}", facts.join(" | "));
        }

        println!(
            "    Created: {}  Runtime: {}",
            or_dash(&job.created_at),
            format_duration_ms(job.running_time_ms)
        );
        if !job.source.is_empty() {
            println!("    {}", format!("Source: {}", job.source).dimmed());
        }
    }
    println!("\n{}", format!("{} job(s)", jobs.len()).dimmed());
}

pub fn print_job_detail(job: &JobRecord) {
    println!("{}", "📊 Job Status".bold());
    println!("   Job ID:   {}", job.job_id.bright_yellow());
    println!("   Name:     {}", or_dash(&job.name));
    println!("   Status:   {}", status_cell(or_dash(&job.status), 0));
    if !job.workspace_id.is_empty() {
        println!("   Workspace: {}", job.workspace_id);
    }
    if !job.project_name.is_empty() {
        println!("   Project:  {}", job.project_name);
    }
    if !job.compute_group_name.is_empty() {
        println!("   Group:    {}", job.compute_group_name);
    }
    if let Some(gpus) = job.gpu_count {
        println!("   GPUs:     {}", gpus);
    }
    println!("   Created:  {}", or_dash(&job.created_at));
    if !job.finished_at.is_empty() {
        println!("   Finished: {}", job.finished_at);
    }
    println!("   Runtime:  {}", format_duration_ms(job.running_time_ms));
    if !job.command.is_empty() {
        println!("   Command:  {}", job.command.dimmed());
    }
}

pub fn print_workspace_summaries(workspaces: &[WorkspaceSummary]) {
    println!(
        "{}",
        format!("\n📦 Cached workspaces ({})\n", workspaces.len()).bold()
    );
    for ws in workspaces {
        let name = if ws.name.is_empty() { "[unnamed]" } else { ws.name.as_str() };
        println!("  {}", name.bold());
        println!("    ID: {}", ws.id.cyan());
        println!(
            "    Resources: {} project(s), {} compute group(s), {} spec(s)",
            ws.project_count, ws.compute_group_count, ws.spec_count
        );
        println!("    Updated: {}\n", format_timestamp(ws.updated_at));
    }
}

pub fn print_resources(projects: &[Project], groups: &[ComputeGroup], specs: &[Spec]) {
    if !projects.is_empty() {
        println!("{}", format!("Projects ({})", projects.len()).bold());
        for project in projects {
            println!("  - {}", project.name);
            println!("    {}", project.id.cyan());
        }
        println!();
    }

    if !groups.is_empty() {
        println!("{}", format!("Compute groups ({})", groups.len()).bold());
        for group in groups {
            println!("  - {} [{}]", group.name, group.gpu_type);
            if !group.gpu_type_display.is_empty() {
                println!("    {}", group.gpu_type_display.dimmed());
            }
            println!("    {}", group.id.cyan());
        }
        println!();
    }

    if !specs.is_empty() {
        println!("{}", format!("GPU specs ({})", specs.len()).bold());
        for spec in specs {
            println!("  - {}", spec.summary());
            println!("    {}", spec.id.cyan());
        }
        println!();
    }
}

pub fn print_resource_exports(
    workspace_id: &str,
    projects: &[Project],
    groups: &[ComputeGroup],
    specs: &[Spec],
) {
    println!("{}", "Shell exports:".bold());
    println!("WORKSPACE_ID=\"{}\"", workspace_id);
    if let Some(project) = projects.first() {
        println!("PROJECT_ID=\"{}\"  # {}", project.id, project.name);
    }
    for group in groups {
        println!("# {} [{}]", group.name, group.gpu_type);
        println!("LOGIC_COMPUTE_GROUP_ID=\"{}\"", group.id);
    }
    for spec in specs {
        println!("# {}x {}", spec.gpu_count, spec.gpu_type);
        println!("SPEC_ID=\"{}\"", spec.id);
    }
}

pub fn print_tasks(tasks: &[WorkspaceTask]) {
    for (idx, task) in tasks.iter().enumerate() {
        let icon = match task.status.as_str() {
            "RUNNING" => "●".cyan(),
            "QUEUING" => "◌".yellow(),
            _ => "?".dimmed(),
        };
        let gpu_usage = task.gpu_usage * 100.0;
        let gpu = format!("{} GPU ({:.0}%)", task.gpu_total, gpu_usage);
        let gpu = if gpu_usage >= 80.0 {
            gpu.green()
        } else if gpu_usage >= 50.0 {
            gpu.yellow()
        } else {
            gpu.red()
        };

        let shown: Vec<&str> = task.nodes.iter().take(3).map(String::as_str).collect();
        let more = if task.nodes.len() > 3 { "..." } else { "" };

        println!("{} {} {}", format!("[{:2}]", idx + 1).bold(), icon, task.name);
        println!(
            "     {} | CPU {:.0}% | MEM {:.0}% | {} | {}",
            gpu,
            task.cpu_usage * 100.0,
            task.memory_usage * 100.0,
            format_duration_ms(task.running_time_ms),
            task.user_name
        );
        println!(
            "     {}",
            format!(
                "{} | {} node(s): {}{}",
                task.project_name,
                task.node_count,
                shown.join(", "),
                more
            )
            .dimmed()
        );
        println!("     {}\n", task.id.dimmed());
    }
}

/// Per-workspace availability tables, most free nodes first within each workspace.
pub fn print_availability(results: &[GroupAvailability], show_nodes: bool) {
    let mut workspaces: Vec<&str> = Vec::new();
    for result in results {
        if !workspaces.contains(&result.workspace_name.as_str()) {
            workspaces.push(&result.workspace_name);
        }
    }

    for ws in workspaces {
        let mut rows: Vec<&GroupAvailability> =
            results.iter().filter(|r| r.workspace_name == ws).collect();
        rows.sort_by(|a, b| b.free_count().cmp(&a.free_count()));

        println!("{}", ws.bold());
        println!(
            "  {:<25} {:>6} {:>6} {:<10}",
            "COMPUTE GROUP", "FREE", "TOTAL", "GPU"
        );
        println!("  {}", "-".repeat(53));
        for row in rows {
            let free = format!("{:>6}", row.free_count());
            let free = if row.free_count() > 0 { free.green() } else { free.normal() };
            println!(
                "  {:<25} {} {:>6} {:<10}",
                truncate(&row.group_name, 25),
                free,
                row.total_nodes,
                row.gpu_type
            );
            if show_nodes && !row.free_nodes.is_empty() {
                println!("    {}", format!("free: {}", row.free_nodes.join(", ")).dimmed());
            }
        }
        println!();
    }
}

pub fn print_recommendations(required: usize, available: &[GroupAvailability], show_nodes: bool) {
    println!("Need {} node(s); these compute groups qualify:\n", required);
    for r in available {
        println!(
            "{} [{}] {}  {} free node(s) [{}]",
            "✓".green(),
            r.workspace_name,
            r.group_name.bold(),
            r.free_count(),
            r.gpu_type
        );
        println!("  {}", r.group_id.cyan());
        if show_nodes && !r.free_nodes.is_empty() {
            println!("  {}", format!("free: {}", r.free_nodes.join(", ")).dimmed());
        }
    }
}

pub fn print_availability_exports(results: &[GroupAvailability]) {
    println!("{}", "Shell exports:".bold());
    let mut sorted: Vec<&GroupAvailability> = results.iter().filter(|r| r.free_count() > 0).collect();
    sorted.sort_by(|a, b| b.free_count().cmp(&a.free_count()));
    for r in sorted {
        println!("# [{}] {} ({} free)", r.workspace_name, r.group_name, r.free_count());
        println!("WORKSPACE_ID=\"{}\"", r.workspace_id);
        println!("LOGIC_COMPUTE_GROUP_ID=\"{}\"", r.group_id);
    }
}
