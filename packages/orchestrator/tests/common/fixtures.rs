//! Fake stage programs and pipeline settings for integration tests.
//!
//! Stages run as `sh -c <script> <label> [run args...]`, so run arguments
//! arrive as `$1`, `$2`, ... and the script runs inside the temp directory.

use std::path::Path;
use std::time::Duration;

use orchestrator_core::domains::pipeline::{PipelineSettings, StageCommand};

/// Writes a results file and announces it.
pub const SCRAPE_OK: &str = r#"
echo "Starting scraper"
echo '{"companies": []}' > out_2025.json
echo "Results saved to: out_2025.json"
"#;

pub const SCRAPE_EXIT_2: &str = r#"
echo "Starting scraper"
echo "crawler crashed" >&2
exit 2
"#;

pub const SCRAPE_NO_MARKER: &str = r#"
echo "Starting scraper"
echo "Nothing to do"
"#;

pub const SCRAPE_SLOW: &str = "sleep 5";

/// Prints the overall summary block for the file passed as `$1`.
pub const PERSIST_OK: &str = r#"
echo "Loading results from: $1"
echo "  Total Jobs Processed: 47"
echo "  Successfully Saved to DB: 35"
echo "  Skipped (Duplicates): 8"
echo "  Errors: 4"
"#;

pub fn stage(script: &str, label: &str, dir: &Path, timeout: Duration) -> StageCommand {
    StageCommand {
        program: "sh".to_string(),
        base_args: vec!["-c".to_string(), script.to_string(), label.to_string()],
        working_dir: dir.to_path_buf(),
        env: Vec::new(),
        timeout,
    }
}

/// Settings running `scrape` and `persist` scripts in `dir`.
pub fn settings(dir: &Path, scrape: &str, persist: &str) -> PipelineSettings {
    PipelineSettings {
        scrape: stage(scrape, "scrape", dir, Duration::from_secs(30)),
        persist: stage(persist, "persist", dir, Duration::from_secs(30)),
        scrape_max_attempts: 1,
        persist_max_attempts: 3,
        delete_results_after_persist: false,
    }
}
