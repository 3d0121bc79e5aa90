mod auction;
mod config;
mod finalizer;
mod persistence;

use crate::{
    auction::{Claimant, ItemId},
    clock::ManualClock,
    config::EngineConfig,
    persistence::{InMemoryItemStore, SharedItemStore},
    service::ClaimEngine,
};
use anyhow::Result;
use std::{sync::Arc, time::Duration};

pub const HOUR: Duration = Duration::from_secs(60 * 60);
pub const MINUTE: Duration = Duration::from_secs(60);

pub struct Harness {
    pub engine: Arc<ClaimEngine>,
    pub store: SharedItemStore,
    pub clock: ManualClock,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_store(InMemoryItemStore::new_shared())
    }

    pub fn with_store(store: SharedItemStore) -> Self {
        let clock = ManualClock::new();
        let engine = Arc::new(ClaimEngine::new(
            store.clone(),
            Arc::new(clock.clone()),
            &EngineConfig::default(),
        ));
        Self {
            engine,
            store,
            clock,
        }
    }

    pub async fn listing(&self, price: u64) -> Result<ItemId> {
        Ok(self
            .engine
            .create_listing("Denim jacket", "reworked vintage denim", price)
            .await?)
    }
}

pub fn alice() -> Claimant {
    Claimant::new("u1", "Alice")
}

pub fn bob() -> Claimant {
    Claimant::new("u2", "Bob")
}

pub fn carol() -> Claimant {
    Claimant::new("u3", "Carol")
}
