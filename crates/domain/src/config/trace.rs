use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trace journaling
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceConfig {
    /// Directory receiving one `{run_id}.jsonl` journal per run.
    /// `None` disables journaling (live streaming still works).
    /// Overridable via `TRACE_LOG_DIR` (empty string disables).
    #[serde(default = "d_journal_dir")]
    pub journal_dir: Option<PathBuf>,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            journal_dir: d_journal_dir(),
        }
    }
}

fn d_journal_dir() -> Option<PathBuf> {
    Some(PathBuf::from("storage/traces"))
}
