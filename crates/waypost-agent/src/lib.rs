pub mod agent;
pub mod errors;
pub mod runtime;

pub use agent::{Agent, AgentOptions, AgentState};
pub use errors::{AgentError, AgentResult};
pub use runtime::{spawn, AgentHandle};
