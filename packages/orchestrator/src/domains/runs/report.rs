//! Console rendering of run history for the `status` command.

use colored::Colorize;

use super::models::{JobRun, RunStatus};
use crate::common::text::truncate_chars;
use crate::domains::pipeline::PipelineState;

/// Error messages longer than this are cut in the listing; storage keeps the full text.
pub const ERROR_PREVIEW_CHARS: usize = 120;

/// Human-readable duration: `42.5s`, `3m 07s`, `1h 05m`.
pub fn format_duration(seconds: Option<f64>) -> String {
    let Some(seconds) = seconds else {
        return "-".to_string();
    };
    if seconds < 60.0 {
        return format!("{seconds:.1}s");
    }

    let total = seconds.round() as u64;
    let (hours, minutes, secs) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{hours}h {minutes:02}m")
    } else {
        format!("{minutes}m {secs:02}s")
    }
}

/// Single-line preview of an error message.
pub fn error_preview(message: &str) -> String {
    let single_line = message.split_whitespace().collect::<Vec<_>>().join(" ");
    truncate_chars(&single_line, ERROR_PREVIEW_CHARS)
}

/// Render one run as a block of lines. `lineage` is shown for scrape runs.
pub fn render_run(run: &JobRun, lineage: Option<PipelineState>) -> String {
    let status = match run.run_status() {
        Some(RunStatus::Success) => run.status.green().bold(),
        Some(RunStatus::Error) => run.status.red().bold(),
        Some(RunStatus::Running) => run.status.yellow().bold(),
        None => run.status.normal(),
    };

    let mut lines = vec![format!(
        "{} {} {} {}",
        run.started_at.format("%Y-%m-%d %H:%M:%S").to_string().dimmed(),
        run.job_name.bold(),
        status,
        format_duration(run.duration_seconds),
    )];

    lines.push(format!("    id: {}", run.id));
    if let Some(parent) = run.parent_job_id {
        lines.push(format!("    parent: {parent}"));
    }
    if run.total_jobs_processed > 0 || run.jobs_saved > 0 {
        lines.push(format!(
            "    jobs: {} processed, {} saved, {} duplicates, {} errors",
            run.total_jobs_processed, run.jobs_saved, run.skipped_duplicates, run.errors_count
        ));
    }
    if let Some(state) = lineage {
        lines.push(format!("    pipeline: {}", state.to_string().cyan()));
    }
    if let Some(error) = &run.error_message {
        lines.push(format!("    error: {}", error_preview(error).red()));
    }

    lines.join("\n")
}
