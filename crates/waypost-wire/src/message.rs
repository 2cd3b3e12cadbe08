//! JSON envelopes exchanged over the channel fabric.
//!
//! Every message is `{event, data, metadata}`. Decoding is two-step: the
//! envelope first, then `data` according to `event`, so a broken envelope
//! and a broken payload are reported separately.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

use waypost_core::Subscription;
use waypost_core::agent::deserialize_subscriptions;

pub mod events {
    /// Agent announces itself on the shared channel.
    pub const REGISTER: &str = "register";
    /// Registry hands the agent its identity.
    pub const APPROVEMENT: &str = "approvement";
    pub const PING: &str = "ping";
    pub const PONG: &str = "pong";
}

#[derive(Debug, Error)]
pub enum WireError {
    #[error("Malformed message: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("Invalid {event} payload: {source}")]
    InvalidPayload {
        event: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Encoding failed: {0}")]
    Encode(#[source] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub origin: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(
        rename = "interactionId",
        alias = "transactionId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub interaction_id: Option<String>,
}

impl Metadata {
    pub fn from_origin(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            to: None,
            interaction_id: None,
        }
    }

    pub fn to(mut self, to: impl Into<String>) -> Self {
        self.to = Some(to.into());
        self
    }

    pub fn interaction(mut self, interaction_id: impl Into<String>) -> Self {
        self.interaction_id = Some(interaction_id.into());
        self
    }

    /// True when the message is addressed to someone other than `identity`.
    /// Unaddressed messages are for everyone.
    pub fn addressed_elsewhere(&self, identity: &str) -> bool {
        self.to.as_deref().is_some_and(|to| to != identity)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterData {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(
        rename = "subscribeTo",
        default,
        deserialize_with = "deserialize_subscriptions",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub subscribe_to: Vec<Subscription>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalData {
    pub uuid: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PongData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Register(RegisterData),
    Approval(ApprovalData),
    Ping,
    Pong(PongData),
    /// Any other named event, carried as-is.
    Event { name: String, data: Value },
}

impl Message {
    pub fn event_name(&self) -> &str {
        match self {
            Message::Register(_) => events::REGISTER,
            Message::Approval(_) => events::APPROVEMENT,
            Message::Ping => events::PING,
            Message::Pong(_) => events::PONG,
            Message::Event { name, .. } => name,
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: Value,
    metadata: Metadata,
}

/// A decoded message together with its routing metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub message: Message,
    pub metadata: Metadata,
}

fn payload<T: for<'de> Deserialize<'de>>(event: &str, data: Value) -> Result<T, WireError> {
    serde_json::from_value(data).map_err(|source| WireError::InvalidPayload {
        event: event.to_string(),
        source,
    })
}

impl Packet {
    pub fn new(message: Message, metadata: Metadata) -> Self {
        Self { message, metadata }
    }

    pub fn register(origin: &str, data: RegisterData) -> Self {
        Self::new(Message::Register(data), Metadata::from_origin(origin))
    }

    pub fn approval(origin: &str, to: &str, uuid: &str) -> Self {
        Self::new(
            Message::Approval(ApprovalData {
                uuid: uuid.to_string(),
            }),
            Metadata::from_origin(origin).to(to),
        )
    }

    pub fn ping(origin: &str, to: &str, interaction_id: &str) -> Self {
        Self::new(
            Message::Ping,
            Metadata::from_origin(origin).to(to).interaction(interaction_id),
        )
    }

    pub fn pong(origin: &str, to: &str, interaction_id: &str, prefix: Option<String>) -> Self {
        Self::new(
            Message::Pong(PongData { prefix }),
            Metadata::from_origin(origin).to(to).interaction(interaction_id),
        )
    }

    pub fn event(origin: &str, name: impl Into<String>, data: Value) -> Self {
        Self::new(
            Message::Event {
                name: name.into(),
                data,
            },
            Metadata::from_origin(origin),
        )
    }

    pub fn decode(raw: &str) -> Result<Self, WireError> {
        let envelope: Envelope = serde_json::from_str(raw).map_err(WireError::Malformed)?;
        let Envelope {
            event,
            data,
            metadata,
        } = envelope;

        let message = match event.as_str() {
            events::REGISTER => Message::Register(payload(&event, data)?),
            events::APPROVEMENT => Message::Approval(payload(&event, data)?),
            events::PING => Message::Ping,
            events::PONG => Message::Pong(match data {
                Value::Null => PongData::default(),
                data => payload(&event, data)?,
            }),
            _ => Message::Event { name: event, data },
        };

        Ok(Self { message, metadata })
    }

    pub fn encode(&self) -> Result<String, WireError> {
        let data = match &self.message {
            Message::Register(data) => serde_json::to_value(data).map_err(WireError::Encode)?,
            Message::Approval(data) => serde_json::to_value(data).map_err(WireError::Encode)?,
            Message::Ping => json!({}),
            Message::Pong(data) => serde_json::to_value(data).map_err(WireError::Encode)?,
            Message::Event { data, .. } => data.clone(),
        };
        let envelope = Envelope {
            event: self.message.event_name().to_string(),
            data,
            metadata: self.metadata.clone(),
        };
        serde_json::to_string(&envelope).map_err(WireError::Encode)
    }
}
