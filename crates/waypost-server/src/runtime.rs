//! Single-owner event loop for the registry.
//!
//! Deliveries, timer ticks and operator commands are all handled by one
//! task, so directory read-modify-writes never interleave.

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{error, info};

use waypost_core::Directory;
use waypost_wire::Delivery;

use crate::errors::{RegistryError, RegistryResult};
use crate::registry::{stopped, Registry};

enum RegistryCommand {
    PingNow(oneshot::Sender<RegistryResult<usize>>),
    SweepNow(oneshot::Sender<RegistryResult<Vec<String>>>),
    Directory {
        prefix: Option<String>,
        reply: oneshot::Sender<RegistryResult<Directory>>,
    },
    ClearDirectory {
        prefix: Option<String>,
        reply: oneshot::Sender<RegistryResult<usize>>,
    },
    Pending(oneshot::Sender<usize>),
    Shutdown,
}

/// Cheap, cloneable access to a running registry.
#[derive(Clone)]
pub struct RegistryHandle {
    identity: String,
    commands: mpsc::UnboundedSender<RegistryCommand>,
}

impl RegistryHandle {
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Runs a ping cycle now instead of waiting for the timer.
    pub async fn ping_now(&self) -> RegistryResult<usize> {
        self.request(RegistryCommand::PingNow).await?
    }

    /// Runs an eviction sweep now instead of waiting for the timer.
    pub async fn sweep_now(&self) -> RegistryResult<Vec<String>> {
        self.request(RegistryCommand::SweepNow).await?
    }

    pub async fn directory(&self, prefix: Option<&str>) -> RegistryResult<Directory> {
        let prefix = prefix.map(str::to_string);
        self.request(|reply| RegistryCommand::Directory { prefix, reply })
            .await?
    }

    pub async fn clear_directory(&self, prefix: Option<&str>) -> RegistryResult<usize> {
        let prefix = prefix.map(str::to_string);
        self.request(|reply| RegistryCommand::ClearDirectory { prefix, reply })
            .await?
    }

    pub async fn pending_interactions(&self) -> RegistryResult<usize> {
        self.request(RegistryCommand::Pending).await
    }

    /// Asks the loop to release its subscriptions and exit.
    pub fn shutdown(&self) {
        let _ = self.commands.send(RegistryCommand::Shutdown);
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> RegistryCommand,
    ) -> RegistryResult<T> {
        let (reply, response) = oneshot::channel();
        self.commands.send(command(reply)).map_err(stopped)?;
        response.await.map_err(stopped)
    }
}

/// Starts the registry and moves it onto its own task.
pub fn spawn(mut registry: Registry) -> RegistryResult<(RegistryHandle, JoinHandle<()>)> {
    let inbox = registry.take_inbox().ok_or(RegistryError::AlreadyRunning)?;
    registry.start()?;

    let (commands, command_rx) = mpsc::unbounded_channel();
    let handle = RegistryHandle {
        identity: registry.identity().to_string(),
        commands,
    };
    let task = tokio::spawn(run(registry, inbox, command_rx));
    Ok((handle, task))
}

async fn run(
    mut registry: Registry,
    mut inbox: mpsc::UnboundedReceiver<Delivery>,
    mut commands: mpsc::UnboundedReceiver<RegistryCommand>,
) {
    let ping_every = registry.config().ping_interval;
    let sweep_every = registry.config().sweep_interval;
    let mut ping = time::interval_at(Instant::now() + ping_every, ping_every);
    let mut sweep = time::interval_at(Instant::now() + sweep_every, sweep_every);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
    sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(registry = %registry.identity(), "registry running");

    loop {
        tokio::select! {
            Some(delivery) = inbox.recv() => {
                let channel = delivery.channel.clone();
                if let Err(err) = registry.handle_delivery(delivery) {
                    error!(channel = %channel, error = %err, "failed to handle message");
                }
            }
            _ = ping.tick() => {
                if let Err(err) = registry.ping_agents() {
                    error!(error = %err, "ping cycle failed");
                }
            }
            _ = sweep.tick() => {
                if let Err(err) = registry.sweep() {
                    error!(error = %err, "eviction sweep failed");
                }
            }
            command = commands.recv() => match command {
                Some(RegistryCommand::PingNow(reply)) => {
                    let _ = reply.send(registry.ping_agents());
                }
                Some(RegistryCommand::SweepNow(reply)) => {
                    let _ = reply.send(registry.sweep());
                }
                Some(RegistryCommand::Directory { prefix, reply }) => {
                    let _ = reply.send(registry.directory(prefix.as_deref()));
                }
                Some(RegistryCommand::ClearDirectory { prefix, reply }) => {
                    let _ = reply.send(registry.clear_directory(prefix.as_deref()));
                }
                Some(RegistryCommand::Pending(reply)) => {
                    let _ = reply.send(registry.pending_interactions());
                }
                Some(RegistryCommand::Shutdown) | None => break,
            }
        }
    }

    registry.shutdown();
}
