/// Errors that can occur while driving the engine or a PTY
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// The engine binary could not be run at all
    #[error("engine '{program}' is unavailable: {reason}")]
    EngineUnavailable { program: String, reason: String },

    /// Failed to allocate the PTY or spawn the attach client
    #[error("failed to create PTY: {0}")]
    PtyCreate(String),

    #[error("failed to write to PTY: {0}")]
    Write(String),

    #[error("failed to resize PTY: {0}")]
    Resize(String),

    #[error("failed to kill PTY process: {0}")]
    Kill(String),

    /// `on_data` / `on_exit` may only be called once per handle
    #[error("{0} subscriber already registered")]
    SubscriberAlreadyRegistered(&'static str),

    /// The actor behind a handle has gone away
    #[error("channel error: {0}")]
    Channel(String),
}
