#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;

use waypost_core::{KvStore, ManualClock, StoreError};
use waypost_db::MemoryStore;
use waypost_server::{Registry, RegistryConfig};
use waypost_wire::{ChannelFabric, Delivery, InMemoryFabric, Packet};

/// Memory store whose writes can be made to fail on demand.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    fail_writes: AtomicBool,
}

impl FlakyStore {
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn inner_has(&self, key: &str) -> bool {
        matches!(self.inner.get(key), Ok(Some(_)))
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("disk full".to_string()));
        }
        Ok(())
    }
}

impl KvStore for FlakyStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.check()?;
        self.inner.set(key, value)
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.check()?;
        self.inner.delete(key)
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        self.inner.keys()
    }
}

pub struct Harness {
    pub fabric: Arc<InMemoryFabric>,
    pub store: Arc<FlakyStore>,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            fabric: Arc::new(InMemoryFabric::new()),
            store: Arc::new(FlakyStore::default()),
            clock: Arc::new(ManualClock::new(0)),
        }
    }

    pub fn registry(&self, config: RegistryConfig) -> Registry {
        Registry::new(config, self.fabric.clone(), self.store.clone(), self.clock.clone())
    }

    /// Records everything published on `channel` from now on.
    pub fn observe(&self, channel: &str) -> mpsc::UnboundedReceiver<Delivery> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.fabric.subscribe(channel, tx).unwrap();
        rx
    }
}

pub fn drain(rx: &mut mpsc::UnboundedReceiver<Delivery>) -> Vec<Packet> {
    let mut packets = Vec::new();
    while let Ok(delivery) = rx.try_recv() {
        packets.push(Packet::decode(&delivery.payload).unwrap());
    }
    packets
}
