//! Document store for items
//!
//! Every mutation goes through `conditional_update`: the caller reads a
//! document together with its version, computes the next state, and the
//! write only lands if nobody else wrote in between. There is no other
//! locking, so two claimants racing on one item get one success and one
//! `VersionConflict`, never a lost update.
mod in_memory;
pub mod postgres;

pub use self::in_memory::*;
pub use self::postgres::PostgresItemStore;

use crate::auction::{Item, ItemId, ItemIdRef, ItemStatus, UserId};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

pub type Version = u64;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("document not found: {0}")]
    NotFound(ItemId),
    #[error("version conflict: expected {expected}, got {actual}")]
    VersionConflict { expected: Version, actual: Version },
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// A document together with the version it was read at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned<T> {
    pub version: Version,
    pub data: T,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum QueryOrder {
    #[default]
    UpdatedDesc,
    CreatedDesc,
}

/// Filters are and-ed together
#[derive(Debug, Clone, Default)]
pub struct ItemQuery {
    pub statuses: Option<Vec<ItemStatus>>,
    pub current_bidder: Option<UserId>,
    /// Items whose bid history has an entry from this user
    pub bidder: Option<UserId>,
    pub order: QueryOrder,
    pub limit: Option<usize>,
}

impl ItemQuery {
    pub fn with_statuses(mut self, statuses: &[ItemStatus]) -> Self {
        self.statuses = Some(statuses.to_vec());
        self
    }

    pub fn with_current_bidder(mut self, user_id: impl Into<UserId>) -> Self {
        self.current_bidder = Some(user_id.into());
        self
    }

    pub fn with_bidder(mut self, user_id: impl Into<UserId>) -> Self {
        self.bidder = Some(user_id.into());
        self
    }

    pub fn order_by(mut self, order: QueryOrder) -> Self {
        self.order = order;
        self
    }

    #[cfg(test)]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, item: &Item) -> bool {
        if let Some(statuses) = &self.statuses {
            if !statuses.contains(&item.status) {
                return false;
            }
        }
        if let Some(bidder) = &self.current_bidder {
            if item.current_bidder.as_ref() != Some(bidder) {
                return false;
            }
        }
        if let Some(bidder) = &self.bidder {
            if !item.has_bid_from(bidder) {
                return false;
            }
        }
        true
    }
}

#[async_trait]
pub trait ItemStore {
    async fn get(&self, id: ItemIdRef<'_>) -> Result<Option<Versioned<Item>>, StoreError>;

    async fn query(&self, query: &ItemQuery) -> Result<Vec<Versioned<Item>>, StoreError>;

    /// Insert a new document. The store assigns the id, ignoring `item.id`.
    async fn create(&self, item: Item) -> Result<ItemId, StoreError>;

    /// Replace the document if it is still at `expected`. `bid_history`
    /// may only grow: the stored entries must be a prefix of the new ones.
    async fn conditional_update(
        &self,
        id: ItemIdRef<'_>,
        expected: Version,
        item: Item,
    ) -> Result<Versioned<Item>, StoreError>;

    /// Remove the document if it is still at `expected`
    async fn conditional_delete(
        &self,
        id: ItemIdRef<'_>,
        expected: Version,
    ) -> Result<(), StoreError>;
}

pub type SharedItemStore = Arc<dyn ItemStore + Send + Sync + 'static>;
