//! Heartbeat cycle and eviction sweep.

use tracing::{debug, info, warn};

use waypost_core::InteractionKind;
use waypost_wire::Packet;

use crate::errors::{RegistryError, RegistryResult};
use crate::registry::Registry;

impl Registry {
    /// Publishes one ping to every agent that has a live private channel and
    /// records a pending interaction for each. Returns the number of pings sent.
    pub fn ping_agents(&mut self) -> RegistryResult<usize> {
        let now = self.clock.now_millis();
        let mut sent = 0;

        for prefix in self.tracked.clone() {
            let directory = self.directories.load(prefix.as_deref())?;
            for record in directory.records() {
                let Some(channel) = self
                    .agents
                    .get(&record.id)
                    .map(|private| private.handle.channel().to_string())
                else {
                    continue;
                };

                let pending =
                    self.interactions
                        .track(&record.id, prefix.as_deref(), InteractionKind::Ping, now);
                let published: RegistryResult<usize> =
                    Packet::ping(&self.identity, &record.id, &pending.interaction_id)
                        .encode()
                        .map_err(RegistryError::from)
                        .and_then(|ping| {
                            self.fabric
                                .publish(&channel, &ping)
                                .map_err(RegistryError::from)
                        });
                if let Err(err) = published {
                    self.interactions.resolve(&pending.interaction_id);
                    return Err(err);
                }

                debug!(agent_id = %record.id, interaction_id = %pending.interaction_id, "ping sent");
                sent += 1;
            }
        }

        metrics::counter!("waypost_pings_total").increment(sent as u64);
        metrics::gauge!("waypost_pending_interactions").set(self.interactions.len() as f64);
        Ok(sent)
    }

    /// Evicts every agent idle for longer than the configured threshold,
    /// together with its pending interactions and private channel. Returns
    /// the evicted ids.
    pub fn sweep(&mut self) -> RegistryResult<Vec<String>> {
        let now = self.clock.now_millis();
        let threshold = self.config.idle_threshold_millis();
        let mut evicted = Vec::new();

        for prefix in self.tracked.clone() {
            let removed = self.directories.update_if(prefix.as_deref(), |directory| {
                let idle = directory.idle_agents(now, threshold);
                if idle.is_empty() {
                    return None;
                }
                for id in &idle {
                    directory.remove(id);
                }
                Some(idle)
            })?;

            // Only reached once the directory write has succeeded.
            for id in removed.unwrap_or_default() {
                let dropped = self.interactions.discard_for(&id);
                self.release(&id);
                info!(
                    agent_id = %id,
                    prefix = prefix.as_deref().unwrap_or(""),
                    dropped_interactions = dropped.len(),
                    "evicted idle agent"
                );
                evicted.push(id);
            }

            self.release_orphans(prefix.as_deref())?;
        }

        let expired = self.interactions.expire_before(now.saturating_sub(threshold));
        if !expired.is_empty() {
            debug!(expired = expired.len(), "expired stale interactions");
        }

        metrics::counter!("waypost_evictions_total").increment(evicted.len() as u64);
        metrics::gauge!("waypost_pending_interactions").set(self.interactions.len() as f64);
        Ok(evicted)
    }

    /// Drops channels of agents that vanished from the directory without
    /// being evicted here, e.g. removed by an operator.
    fn release_orphans(&mut self, prefix: Option<&str>) -> RegistryResult<()> {
        let directory = self.directories.load(prefix)?;
        let orphans: Vec<String> = self
            .agents
            .iter()
            .filter(|(id, private)| private.prefix.as_deref() == prefix && !directory.contains(id))
            .map(|(id, _)| id.clone())
            .collect();

        for id in orphans {
            warn!(agent_id = %id, "agent missing from directory, releasing its channel");
            self.interactions.discard_for(&id);
            self.release(&id);
        }
        Ok(())
    }
}
