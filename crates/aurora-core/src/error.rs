use thiserror::Error;

/// Errors produced across the aurora panel.
#[derive(Debug, Error)]
pub enum AuroraError {
    #[error("launch failed: {0}")]
    Launch(String),

    #[error("local port {0} already in use by another rule")]
    PortConflict(u16),

    #[error("process {0} did not exit within the grace period")]
    StopTimeout(u32),

    #[error("rule not found: {0}")]
    RuleNotFound(i64),

    #[error("invalid rule: {0}")]
    Validation(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AuroraResult<T> = Result<T, AuroraError>;
