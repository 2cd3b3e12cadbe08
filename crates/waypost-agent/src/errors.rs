use waypost_wire::{FabricError, WireError};

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Channel fabric error: {0}")]
    Fabric(#[from] FabricError),

    #[error("Wire error: {0}")]
    Wire(#[from] WireError),

    #[error("Agent is not registered yet")]
    NotRegistered,

    #[error("Agent is already running")]
    AlreadyRunning,

    #[error("Agent has stopped")]
    Stopped,
}

pub type AgentResult<T> = Result<T, AgentError>;
