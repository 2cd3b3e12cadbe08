use waypost_core::StoreError;
use waypost_wire::{FabricError, WireError};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Directory store error: {0}")]
    Store(#[from] StoreError),

    #[error("Channel fabric error: {0}")]
    Fabric(#[from] FabricError),

    #[error("Wire error: {0}")]
    Wire(#[from] WireError),

    #[error("Registry is already running")]
    AlreadyRunning,

    #[error("Registry has stopped")]
    Stopped,
}

pub type RegistryResult<T> = Result<T, RegistryError>;
