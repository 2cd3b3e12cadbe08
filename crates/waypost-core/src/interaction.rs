use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionKind {
    Ping,
}

/// An outstanding correlated exchange awaiting a response from `target_agent_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingInteraction {
    pub interaction_id: String,
    pub target_agent_id: String,
    pub prefix: Option<String>,
    pub kind: InteractionKind,
    pub created_at: u64,
}

/// Correlates responses with the requests that caused them, keyed by
/// interaction id.
#[derive(Debug, Default)]
pub struct InteractionTracker {
    pending: HashMap<String, PendingInteraction>,
}

impl InteractionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a new interaction with a fresh id.
    pub fn track(
        &mut self,
        target_agent_id: &str,
        prefix: Option<&str>,
        kind: InteractionKind,
        now: u64,
    ) -> PendingInteraction {
        let mut interaction_id = Uuid::new_v4().to_string();
        while self.pending.contains_key(&interaction_id) {
            interaction_id = Uuid::new_v4().to_string();
        }

        let interaction = PendingInteraction {
            interaction_id: interaction_id.clone(),
            target_agent_id: target_agent_id.to_string(),
            prefix: prefix.map(str::to_string),
            kind,
            created_at: now,
        };
        self.pending.insert(interaction_id, interaction.clone());
        interaction
    }

    pub fn get(&self, interaction_id: &str) -> Option<&PendingInteraction> {
        self.pending.get(interaction_id)
    }

    /// Removes and returns the interaction. `None` the second time around.
    pub fn resolve(&mut self, interaction_id: &str) -> Option<PendingInteraction> {
        self.pending.remove(interaction_id)
    }

    /// Drops every interaction addressed to `agent_id`, whatever its kind.
    pub fn discard_for(&mut self, agent_id: &str) -> Vec<PendingInteraction> {
        let ids: Vec<String> = self
            .pending
            .values()
            .filter(|i| i.target_agent_id == agent_id)
            .map(|i| i.interaction_id.clone())
            .collect();
        ids.iter().filter_map(|id| self.pending.remove(id)).collect()
    }

    /// Drops every interaction created before `cutoff`.
    pub fn expire_before(&mut self, cutoff: u64) -> Vec<PendingInteraction> {
        let ids: Vec<String> = self
            .pending
            .values()
            .filter(|i| i.created_at < cutoff)
            .map(|i| i.interaction_id.clone())
            .collect();
        ids.iter().filter_map(|id| self.pending.remove(id)).collect()
    }

    pub fn targeting(&self, agent_id: &str) -> usize {
        self.pending
            .values()
            .filter(|i| i.target_agent_id == agent_id)
            .count()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
