use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::error;

use waypost_wire::Delivery;

use crate::agent::Agent;
use crate::errors::{AgentError, AgentResult};

enum AgentCommand {
    Publish {
        name: String,
        data: Value,
        reply: oneshot::Sender<AgentResult<()>>,
    },
    Shutdown,
}

/// Access to an agent running on its own task.
#[derive(Clone)]
pub struct AgentHandle {
    ephemeral_id: String,
    registered: watch::Receiver<Option<String>>,
    commands: mpsc::UnboundedSender<AgentCommand>,
}

impl AgentHandle {
    pub fn ephemeral_id(&self) -> &str {
        &self.ephemeral_id
    }

    pub fn assigned_id(&self) -> Option<String> {
        self.registered.borrow().clone()
    }

    /// Resolves with the assigned id once the registry has approved us.
    pub async fn wait_registered(&self) -> AgentResult<String> {
        let mut registered = self.registered.clone();
        let id = registered
            .wait_for(Option::is_some)
            .await
            .map_err(|_| AgentError::Stopped)?;
        id.clone().ok_or(AgentError::Stopped)
    }

    pub async fn publish_event(&self, name: impl Into<String>, data: Value) -> AgentResult<()> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(AgentCommand::Publish {
                name: name.into(),
                data,
                reply,
            })
            .map_err(|_| AgentError::Stopped)?;
        response.await.map_err(|_| AgentError::Stopped)?
    }

    pub fn shutdown(&self) {
        let _ = self.commands.send(AgentCommand::Shutdown);
    }
}

/// Registers the agent and moves it onto its own task.
pub fn spawn(mut agent: Agent) -> AgentResult<(AgentHandle, JoinHandle<()>)> {
    let inbox = agent.take_inbox().ok_or(AgentError::AlreadyRunning)?;
    let (commands, command_rx) = mpsc::unbounded_channel();
    let handle = AgentHandle {
        ephemeral_id: agent.ephemeral_id().to_string(),
        registered: agent.registrations(),
        commands,
    };

    agent.register()?;
    let task = tokio::spawn(run(agent, inbox, command_rx));
    Ok((handle, task))
}

async fn run(
    mut agent: Agent,
    mut inbox: mpsc::UnboundedReceiver<Delivery>,
    mut commands: mpsc::UnboundedReceiver<AgentCommand>,
) {
    loop {
        tokio::select! {
            Some(delivery) = inbox.recv() => {
                let channel = delivery.channel.clone();
                if let Err(err) = agent.handle_delivery(delivery) {
                    error!(channel = %channel, error = %err, "failed to handle message");
                }
            }
            command = commands.recv() => match command {
                Some(AgentCommand::Publish { name, data, reply }) => {
                    let _ = reply.send(agent.publish_event(&name, data));
                }
                Some(AgentCommand::Shutdown) | None => break,
            }
        }
    }

    agent.shutdown();
}
