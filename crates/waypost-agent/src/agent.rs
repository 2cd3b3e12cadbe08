use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use waypost_core::Subscription;
use waypost_core::prefix::{self, gateway_channel, private_channel};
use waypost_wire::{
    ChannelFabric, ChannelHandle, Delivery, DeliverySink, Message, Packet, RegisterData,
};

use crate::errors::{AgentError, AgentResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentOptions {
    pub name: String,
    pub prefix: Option<String>,
    pub subscriptions: Vec<Subscription>,
}

impl AgentOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prefix: None,
            subscriptions: Vec::new(),
        }
    }

    pub fn with_prefix(mut self, prefix: Option<String>) -> Self {
        self.prefix = prefix::normalize(prefix);
        self
    }

    pub fn subscribe(mut self, subscription: Subscription) -> Self {
        self.subscriptions.push(subscription);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentState {
    /// Waiting for approval; only an approval addressed to us matters.
    Pending,
    /// Adopted the registry-assigned id and its private channel.
    Registered { id: String },
}

pub struct Agent {
    ephemeral_id: String,
    options: AgentOptions,
    state: AgentState,
    fabric: Arc<dyn ChannelFabric>,
    sink: DeliverySink,
    inbox: Option<mpsc::UnboundedReceiver<Delivery>>,
    gateway: Option<ChannelHandle>,
    private: Option<ChannelHandle>,
    registered: watch::Sender<Option<String>>,
}

impl Agent {
    pub fn new(options: AgentOptions, fabric: Arc<dyn ChannelFabric>) -> Self {
        let (sink, inbox) = mpsc::unbounded_channel();
        let (registered, _) = watch::channel(None);
        Self {
            ephemeral_id: Uuid::new_v4().to_string(),
            options,
            state: AgentState::Pending,
            fabric,
            sink,
            inbox: Some(inbox),
            gateway: None,
            private: None,
            registered,
        }
    }

    /// Self-generated correlation id used until approval.
    pub fn ephemeral_id(&self) -> &str {
        &self.ephemeral_id
    }

    pub fn options(&self) -> &AgentOptions {
        &self.options
    }

    pub fn state(&self) -> &AgentState {
        &self.state
    }

    pub fn assigned_id(&self) -> Option<&str> {
        match &self.state {
            AgentState::Registered { id } => Some(id),
            AgentState::Pending => None,
        }
    }

    /// Notified with the assigned id once approval arrives.
    pub fn registrations(&self) -> watch::Receiver<Option<String>> {
        self.registered.subscribe()
    }

    pub(crate) fn take_inbox(&mut self) -> Option<mpsc::UnboundedReceiver<Delivery>> {
        self.inbox.take()
    }

    fn prefix(&self) -> Option<&str> {
        self.options.prefix.as_deref()
    }

    fn is_own(&self, origin: &str) -> bool {
        origin == self.ephemeral_id || self.assigned_id() == Some(origin)
    }

    /// Subscribes to the shared channel and announces this agent.
    /// Completion is signalled later, when the approval is handled.
    pub fn register(&mut self) -> AgentResult<()> {
        let channel = gateway_channel(self.prefix());
        if self.gateway.is_none() {
            self.gateway = Some(self.fabric.subscribe(&channel, self.sink.clone())?);
        }

        let request = Packet::register(
            &self.ephemeral_id,
            RegisterData {
                name: self.options.name.clone(),
                prefix: self.options.prefix.clone(),
                subscribe_to: self.options.subscriptions.clone(),
            },
        );
        self.fabric.publish(&channel, &request.encode()?)?;

        info!(
            service = %self.options.name,
            origin = %self.ephemeral_id,
            channel = %channel,
            "registering with gateway"
        );
        Ok(())
    }

    /// Handles every delivery already queued in the inbox.
    pub fn process_pending(&mut self) -> AgentResult<usize> {
        let mut queued = Vec::new();
        if let Some(inbox) = self.inbox.as_mut() {
            while let Ok(delivery) = inbox.try_recv() {
                queued.push(delivery);
            }
        }
        let count = queued.len();
        for delivery in queued {
            self.handle_delivery(delivery)?;
        }
        Ok(count)
    }

    pub fn handle_delivery(&mut self, delivery: Delivery) -> AgentResult<()> {
        let packet = match Packet::decode(&delivery.payload) {
            Ok(packet) => packet,
            Err(err) => {
                warn!(channel = %delivery.channel, error = %err, "dropping malformed message");
                return Ok(());
            }
        };

        if self.is_own(&packet.metadata.origin) {
            trace!(channel = %delivery.channel, "ignoring own message");
            return Ok(());
        }

        if self.gateway.as_ref().is_some_and(|h| h.channel() == delivery.channel) {
            return self.handle_gateway_message(packet);
        }

        if self.private.as_ref().is_some_and(|h| h.channel() == delivery.channel) {
            return self.handle_private_message(packet);
        }

        debug!(channel = %delivery.channel, "message on untracked channel");
        Ok(())
    }

    fn handle_gateway_message(&mut self, packet: Packet) -> AgentResult<()> {
        if packet.metadata.to.as_deref() != Some(self.ephemeral_id.as_str()) {
            return Ok(());
        }

        match packet.message {
            Message::Approval(approval) => match &self.state {
                AgentState::Pending => self.adopt(approval.uuid),
                AgentState::Registered { id } => {
                    debug!(assigned = %id, offered = %approval.uuid, "ignoring repeated approval");
                    Ok(())
                }
            },
            other => {
                warn!(event = other.event_name(), "unknown event from gateway");
                Ok(())
            }
        }
    }

    fn handle_private_message(&mut self, packet: Packet) -> AgentResult<()> {
        let AgentState::Registered { id } = &self.state else {
            return Ok(());
        };
        if packet.metadata.addressed_elsewhere(id) {
            return Ok(());
        }

        match packet.message {
            Message::Ping => match packet.metadata.interaction_id.as_deref() {
                Some(interaction_id) => self.reply_pong(&packet.metadata.origin, interaction_id),
                None => {
                    warn!(agent_id = %id, origin = %packet.metadata.origin, "dropping ping without interaction id");
                    Ok(())
                }
            },
            other => {
                warn!(event = other.event_name(), "unknown event on private channel");
                Ok(())
            }
        }
    }

    fn adopt(&mut self, id: String) -> AgentResult<()> {
        let channel = private_channel(self.prefix(), &id);
        self.private = Some(self.fabric.subscribe(&channel, self.sink.clone())?);
        self.state = AgentState::Registered { id: id.clone() };
        self.registered.send_replace(Some(id.clone()));

        info!(service = %self.options.name, agent_id = %id, channel = %channel, "approved by gateway");
        Ok(())
    }

    fn reply_pong(&self, to: &str, interaction_id: &str) -> AgentResult<()> {
        let (Some(id), Some(channel)) = (self.assigned_id(), self.private.as_ref()) else {
            return Err(AgentError::NotRegistered);
        };
        let pong = Packet::pong(id, to, interaction_id, self.options.prefix.clone());
        self.fabric.publish(channel.channel(), &pong.encode()?)?;

        debug!(interaction_id, to, "pong sent");
        Ok(())
    }

    /// Publishes a named domain event on the private channel.
    pub fn publish_event(&self, name: &str, data: Value) -> AgentResult<()> {
        let (Some(id), Some(channel)) = (self.assigned_id(), self.private.as_ref()) else {
            return Err(AgentError::NotRegistered);
        };
        let event = Packet::event(id, name, data);
        self.fabric.publish(channel.channel(), &event.encode()?)?;

        info!(event = name, "published event");
        Ok(())
    }

    pub fn shutdown(&mut self) {
        for handle in [self.gateway.take(), self.private.take()].into_iter().flatten() {
            if let Err(err) = self.fabric.unsubscribe(&handle) {
                warn!(channel = %handle.channel(), error = %err, "failed to unsubscribe");
            }
        }
    }
}

impl Drop for Agent {
    fn drop(&mut self) {
        self.shutdown();
    }
}
