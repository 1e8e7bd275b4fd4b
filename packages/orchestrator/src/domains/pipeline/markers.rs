//! Text markers printed by the stage programs.
//!
//! The scrape program announces its output with `Results saved to: <file>.json`.
//! The persist program prints a summary block:
//!
//! ```text
//!   Total Jobs Processed: 47
//!   Successfully Saved to DB: 35
//!   Skipped (Duplicates): 8
//!   Errors: 4
//! ```
//!
//! Labels match case-insensitively. Per-company summaries come before the
//! overall one, so the last occurrence of each marker wins.

use lazy_static::lazy_static;
use regex::Regex;

use crate::domains::runs::RunStats;

/// Label of the scrape-stage completion marker.
pub const RESULTS_MARKER: &str = "Results saved to:";

lazy_static! {
    // Markers and their values share one line
    static ref RESULTS_FILE_REGEX: Regex =
        Regex::new(r"(?im)Results saved to:[ \t]*(\S.*?\.json)[ \t\r]*$").unwrap();

    static ref TOTAL_PROCESSED_REGEX: Regex =
        Regex::new(r"(?i)Total jobs processed:[ \t]*(\d+)").unwrap();

    static ref SAVED_REGEX: Regex =
        Regex::new(r"(?i)Successfully saved(?: to DB)?:[ \t]*(\d+)").unwrap();

    static ref SKIPPED_DUPLICATES_REGEX: Regex =
        Regex::new(r"(?i)Skipped \(Duplicates\):[ \t]*(\d+)").unwrap();

    // Anchored so "Crawl4AI Errors:" and similar lines do not match
    static ref ERRORS_REGEX: Regex =
        Regex::new(r"(?im)^\W*Errors:[ \t]*(\d+)").unwrap();
}

/// Results file announced by the scrape stage.
pub fn results_file(stdout: &str) -> Option<String> {
    RESULTS_FILE_REGEX
        .captures_iter(stdout)
        .last()
        .map(|caps| caps[1].trim().to_string())
}

pub fn total_jobs_processed(stdout: &str) -> Option<i32> {
    last_number(&TOTAL_PROCESSED_REGEX, stdout)
}

pub fn jobs_saved(stdout: &str) -> Option<i32> {
    last_number(&SAVED_REGEX, stdout)
}

pub fn skipped_duplicates(stdout: &str) -> Option<i32> {
    last_number(&SKIPPED_DUPLICATES_REGEX, stdout)
}

pub fn errors_count(stdout: &str) -> Option<i32> {
    last_number(&ERRORS_REGEX, stdout)
}

/// Persist-stage stats; a missing marker counts as 0.
pub fn persist_stats(stdout: &str) -> RunStats {
    RunStats {
        total_jobs_processed: total_jobs_processed(stdout).unwrap_or(0),
        jobs_saved: jobs_saved(stdout).unwrap_or(0),
        skipped_duplicates: skipped_duplicates(stdout).unwrap_or(0),
        errors_count: errors_count(stdout).unwrap_or(0),
    }
}

fn last_number(regex: &Regex, text: &str) -> Option<i32> {
    regex
        .captures_iter(text)
        .filter_map(|caps| caps[1].parse().ok())
        .last()
}
