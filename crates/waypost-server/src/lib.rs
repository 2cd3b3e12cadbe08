pub mod config;
pub mod errors;
pub mod registry;
pub mod liveness;
pub mod runtime;

pub use config::RegistryConfig;
pub use errors::{RegistryError, RegistryResult};
pub use registry::Registry;
pub use runtime::{spawn, RegistryHandle};
