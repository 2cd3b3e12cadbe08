pub mod message;
pub mod fabric;

pub use message::{events, ApprovalData, Message, Metadata, Packet, PongData, RegisterData, WireError};
pub use fabric::{ChannelFabric, ChannelHandle, Delivery, DeliverySink, FabricError, InMemoryFabric};
