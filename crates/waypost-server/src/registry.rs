//! Registry side of the registration handshake and response correlation.
//!
//! The registry listens on the shared registration channel of each
//! configured prefix, hands out identities, and keeps one private channel
//! subscription per approved agent. All of its state is owned by a single
//! [`Registry`] value; the runtime feeds it deliveries and timer ticks one
//! at a time.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use waypost_core::prefix::{self, gateway_channel, private_channel};
use waypost_core::{AgentRecord, Clock, Directory, DirectoryStore, InteractionTracker, KvStore};
use waypost_wire::{ChannelFabric, ChannelHandle, Delivery, DeliverySink, Message, Packet, RegisterData};

use crate::config::RegistryConfig;
use crate::errors::{RegistryError, RegistryResult};

/// Subscription to one approved agent's private channel.
#[derive(Debug)]
pub(crate) struct PrivateChannel {
    pub(crate) prefix: Option<String>,
    pub(crate) handle: ChannelHandle,
}

pub struct Registry {
    pub(crate) identity: String,
    pub(crate) config: RegistryConfig,
    pub(crate) fabric: Arc<dyn ChannelFabric>,
    pub(crate) directories: DirectoryStore,
    pub(crate) interactions: InteractionTracker,
    pub(crate) clock: Arc<dyn Clock>,
    sink: DeliverySink,
    inbox: Option<mpsc::UnboundedReceiver<Delivery>>,
    /// Registration channel name -> (prefix, subscription).
    gateways: HashMap<String, (Option<String>, ChannelHandle)>,
    /// Agent id -> private channel subscription.
    pub(crate) agents: HashMap<String, PrivateChannel>,
    /// Private channel name -> agent id.
    owners: HashMap<String, String>,
    /// Every prefix with a directory this registry is responsible for.
    pub(crate) tracked: BTreeSet<Option<String>>,
}

impl Registry {
    pub fn new(
        config: RegistryConfig,
        fabric: Arc<dyn ChannelFabric>,
        store: Arc<dyn KvStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (sink, inbox) = mpsc::unbounded_channel();
        Self {
            identity: Uuid::new_v4().to_string(),
            config,
            fabric,
            directories: DirectoryStore::new(store),
            interactions: InteractionTracker::new(),
            clock,
            sink,
            inbox: Some(inbox),
            gateways: HashMap::new(),
            agents: HashMap::new(),
            owners: HashMap::new(),
            tracked: BTreeSet::new(),
        }
    }

    /// The registry's own origin id. Messages carrying it are ignored.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn pending_interactions(&self) -> usize {
        self.interactions.len()
    }

    pub fn is_subscribed_to(&self, agent_id: &str) -> bool {
        self.agents.contains_key(agent_id)
    }

    pub(crate) fn take_inbox(&mut self) -> Option<mpsc::UnboundedReceiver<Delivery>> {
        self.inbox.take()
    }

    /// Subscribes to the registration channel of every configured prefix and
    /// re-adopts the private channels of agents already in those directories.
    pub fn start(&mut self) -> RegistryResult<()> {
        for prefix in self.config.prefixes.clone() {
            let channel = gateway_channel(prefix.as_deref());
            if !self.gateways.contains_key(&channel) {
                let handle = self.fabric.subscribe(&channel, self.sink.clone())?;
                self.gateways.insert(channel.clone(), (prefix.clone(), handle));
            }
            self.tracked.insert(prefix.clone());

            let directory = self.directories.load(prefix.as_deref())?;
            for id in directory.ids() {
                self.adopt(id, prefix.as_deref())?;
            }
            info!(
                registry = %self.identity,
                channel = %channel,
                restored = directory.len(),
                "listening for registrations"
            );
        }
        Ok(())
    }

    /// Handles every delivery already queued in the inbox. Returns how many
    /// were processed. Does nothing once the runtime owns the inbox.
    pub fn process_pending(&mut self) -> RegistryResult<usize> {
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

    pub fn handle_delivery(&mut self, delivery: Delivery) -> RegistryResult<()> {
        let packet = match Packet::decode(&delivery.payload) {
            Ok(packet) => packet,
            Err(err) => {
                warn!(channel = %delivery.channel, error = %err, "dropping malformed message");
                return Ok(());
            }
        };

        if packet.metadata.origin == self.identity {
            trace!(channel = %delivery.channel, "ignoring own message");
            return Ok(());
        }

        if let Some((prefix, _)) = self.gateways.get(&delivery.channel) {
            let prefix = prefix.clone();
            return self.handle_gateway_message(&delivery.channel, prefix, packet);
        }

        if let Some(agent_id) = self.owners.get(&delivery.channel).cloned() {
            return self.handle_agent_message(&agent_id, packet);
        }

        debug!(channel = %delivery.channel, "message on untracked channel");
        Ok(())
    }

    fn handle_gateway_message(
        &mut self,
        channel: &str,
        channel_prefix: Option<String>,
        packet: Packet,
    ) -> RegistryResult<()> {
        match packet.message {
            Message::Register(mut request) => {
                if prefix::normalize(request.prefix.clone()).is_none() {
                    request.prefix = channel_prefix;
                }
                self.approve_on(channel, request, &packet.metadata.origin)
                    .map(|_| ())
            }
            other => {
                warn!(
                    channel,
                    event = other.event_name(),
                    origin = %packet.metadata.origin,
                    "unknown event on registration channel"
                );
                Ok(())
            }
        }
    }

    fn handle_agent_message(&mut self, agent_id: &str, packet: Packet) -> RegistryResult<()> {
        match packet.message {
            Message::Pong(_) => {
                if packet.metadata.addressed_elsewhere(&self.identity) {
                    trace!(agent_id, "pong addressed elsewhere");
                    return Ok(());
                }
                match packet.metadata.interaction_id.as_deref() {
                    Some(interaction_id) => self.correlate(interaction_id).map(|_| ()),
                    None => {
                        debug!(agent_id, "pong without interaction id");
                        Ok(())
                    }
                }
            }
            Message::Event { name, .. } => {
                warn!(agent_id, event = %name, "no route for agent event, dropping");
                Ok(())
            }
            other => {
                warn!(agent_id, event = other.event_name(), "unknown event on agent channel");
                Ok(())
            }
        }
    }

    /// Accepts a registration: allocates an id, persists the record, opens
    /// the agent's private channel and publishes exactly one approval to
    /// `origin` on the registration channel of the request's prefix.
    pub fn approve(&mut self, request: RegisterData, origin: &str) -> RegistryResult<AgentRecord> {
        let channel = gateway_channel(prefix::normalize(request.prefix.clone()).as_deref());
        self.approve_on(&channel, request, origin)
    }

    /// Like [`approve`](Self::approve), but the approval goes out on
    /// `reply_channel`, the channel the request arrived on.
    pub fn approve_on(
        &mut self,
        reply_channel: &str,
        request: RegisterData,
        origin: &str,
    ) -> RegistryResult<AgentRecord> {
        let prefix = prefix::normalize(request.prefix);
        let now = self.clock.now_millis();

        let record = self.directories.update(prefix.as_deref(), |directory| {
            let mut id = Uuid::new_v4().to_string();
            while directory.contains(&id) {
                id = Uuid::new_v4().to_string();
            }
            let record = AgentRecord::new(id, request.name, prefix.clone(), request.subscribe_to, now);
            directory.insert(record.clone());
            record
        })?;
        self.tracked.insert(prefix.clone());

        self.adopt(&record.id, prefix.as_deref())?;

        let approval = Packet::approval(&self.identity, origin, &record.id).encode()?;
        self.fabric.publish(reply_channel, &approval)?;

        metrics::counter!("waypost_registrations_total").increment(1);
        info!(
            agent_id = %record.id,
            name = %record.name,
            prefix = prefix.as_deref().unwrap_or(""),
            to = origin,
            channel = reply_channel,
            "approved agent"
        );
        Ok(record)
    }

    /// Resolves the interaction a pong answers and refreshes the target's
    /// activity. `Ok(false)` for unknown or already resolved ids.
    pub fn correlate(&mut self, interaction_id: &str) -> RegistryResult<bool> {
        let Some(pending) = self.interactions.get(interaction_id).cloned() else {
            trace!(interaction_id, "no pending interaction");
            return Ok(false);
        };

        let now = self.clock.now_millis();
        let refreshed = self
            .directories
            .update_if(pending.prefix.as_deref(), |directory| {
                directory
                    .get_mut(&pending.target_agent_id)
                    .map(|record| record.update_heartbeat(now))
            })?;
        self.interactions.resolve(interaction_id);

        metrics::counter!("waypost_pongs_total").increment(1);
        metrics::gauge!("waypost_pending_interactions").set(self.interactions.len() as f64);
        debug!(
            interaction_id,
            agent_id = %pending.target_agent_id,
            last_activity = refreshed,
            "interaction resolved"
        );
        Ok(true)
    }

    pub fn directory(&self, prefix: Option<&str>) -> RegistryResult<Directory> {
        Ok(self.directories.load(prefix)?)
    }

    /// Deletes the prefix's directory document and forgets its agents.
    pub fn clear_directory(&mut self, prefix: Option<&str>) -> RegistryResult<usize> {
        let directory = self.directories.load(prefix)?;
        self.directories.clear(prefix)?;
        for id in directory.ids() {
            self.interactions.discard_for(id);
            self.release(id);
        }
        info!(prefix = prefix.unwrap_or(""), removed = directory.len(), "directory cleared");
        Ok(directory.len())
    }

    pub(crate) fn adopt(&mut self, agent_id: &str, prefix: Option<&str>) -> RegistryResult<()> {
        if self.agents.contains_key(agent_id) {
            return Ok(());
        }
        let channel = private_channel(prefix, agent_id);
        let handle = self.fabric.subscribe(&channel, self.sink.clone())?;
        self.owners.insert(channel, agent_id.to_string());
        self.agents.insert(
            agent_id.to_string(),
            PrivateChannel {
                prefix: prefix.map(str::to_string),
                handle,
            },
        );
        Ok(())
    }

    pub(crate) fn release(&mut self, agent_id: &str) {
        if let Some(private) = self.agents.remove(agent_id) {
            self.owners.remove(private.handle.channel());
            if let Err(err) = self.fabric.unsubscribe(&private.handle) {
                warn!(agent_id, error = %err, "failed to unsubscribe agent channel");
            }
        }
    }

    /// Releases every subscription. The registry stops hearing anything.
    pub fn shutdown(&mut self) {
        let ids: Vec<String> = self.agents.keys().cloned().collect();
        for id in ids {
            self.release(&id);
        }
        for (channel, (_, handle)) in self.gateways.drain() {
            if let Err(err) = self.fabric.unsubscribe(&handle) {
                warn!(channel = %channel, error = %err, "failed to unsubscribe registration channel");
            }
        }
        info!(registry = %self.identity, "registry stopped");
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        if !self.gateways.is_empty() || !self.agents.is_empty() {
            self.shutdown();
        }
    }
}

pub(crate) fn stopped<T>(_: T) -> RegistryError {
    RegistryError::Stopped
}
