use thiserror::Error;

/// Core error types for udpbind operations
#[derive(Error, Debug)]
pub enum UdpbindError {
    #[error("proxy process is already running")]
    AlreadyRunning,

    #[error("supervisor has been shut down")]
    Terminated,

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("supervisor control channel closed")]
    ChannelClosed,

    #[error("other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl UdpbindError {
    /// Check if this error is a caller bug rather than an environmental
    /// failure; contract violations are never retried.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            UdpbindError::AlreadyRunning | UdpbindError::Terminated
        )
    }
}
