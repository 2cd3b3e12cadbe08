pub mod agent;
pub mod directory;
pub mod interaction;
pub mod store;
pub mod errors;
pub mod time;
pub mod prefix;

pub use agent::{AgentRecord, Subscription};
pub use directory::{Directory, DirectoryStore};
pub use interaction::{InteractionKind, InteractionTracker, PendingInteraction};
pub use store::KvStore;
pub use errors::StoreError;
pub use time::{Clock, ManualClock, SystemClock};
