use process_utils::ProcessError;

#[derive(Debug, thiserror::Error)]
pub enum AfrError {
    /// No display is attached to the matcher.
    #[error("no display attached")]
    NoDisplay,

    #[error("display refused mode {mode_id}: {reason}")]
    ModeSwitch { mode_id: u32, reason: String },

    #[error("frame-rate probe failed: {0}")]
    Probe(String),

    #[error("probe process failed: {0}")]
    Process(#[from] ProcessError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
