use thiserror::Error;

/// Error taxonomy for gateway operations
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Failed to spawn backend process: {0}")]
    Spawn(String),

    #[error("Backend startup handshake failed: {0}")]
    Startup(String),

    #[error("Backend channel closed: {0}")]
    ChannelClosed(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Backend reported an error: {0}")]
    Backend(String),

    #[error("Unknown backend: {0}")]
    UnknownBackend(String),

    #[error("Invalid invocation: {0}")]
    Invocation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Timeout occurred: {0}")]
    Timeout(String),

    #[error("Shutdown incomplete: {0}")]
    Shutdown(String),
}

impl GatewayError {
    pub fn spawn(msg: impl Into<String>) -> Self {
        GatewayError::Spawn(msg.into())
    }

    pub fn startup(msg: impl Into<String>) -> Self {
        GatewayError::Startup(msg.into())
    }

    pub fn channel_closed(msg: impl Into<String>) -> Self {
        GatewayError::ChannelClosed(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        GatewayError::Transport(msg.into())
    }

    pub fn backend(msg: impl Into<String>) -> Self {
        GatewayError::Backend(msg.into())
    }

    pub fn unknown_backend(msg: impl Into<String>) -> Self {
        GatewayError::UnknownBackend(msg.into())
    }

    pub fn invocation(msg: impl Into<String>) -> Self {
        GatewayError::Invocation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        GatewayError::Config(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        GatewayError::Timeout(msg.into())
    }

    pub fn shutdown(msg: impl Into<String>) -> Self {
        GatewayError::Shutdown(msg.into())
    }

    /// Check if this error makes the backend handle unusable for future calls
    pub fn is_fatal_to_backend(&self) -> bool {
        matches!(
            self,
            GatewayError::ChannelClosed(_) | GatewayError::Transport(_)
        )
    }

    /// Check if this error aborts gateway boot entirely
    pub fn is_boot_fatal(&self) -> bool {
        matches!(self, GatewayError::Spawn(_) | GatewayError::Startup(_))
    }

    /// Check if this error was caused by the caller rather than the backend
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            GatewayError::UnknownBackend(_) | GatewayError::Invocation(_)
        )
    }
}
