use std::path::PathBuf;

use thiserror::Error;

/// Failures callers branch on; everything else travels as `anyhow::Error`.
#[derive(Debug, Error)]
pub enum PortError {
    #[error("file does not exist: {}", path.display())]
    MissingFile { path: PathBuf },

    #[error("{tool} is not available (looked in env, config, tools/ and PATH)")]
    ToolUnavailable { tool: &'static str },

    #[error("{tool} exited with code {code}: {stderr}")]
    ToolFailed {
        tool: String,
        code: i32,
        stderr: String,
    },

    #[error("{tool} timed out after {seconds}s")]
    ToolTimedOut { tool: String, seconds: u64 },
}
