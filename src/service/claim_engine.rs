//! Claim Engine
//!
//! Loads an item, runs it through the state machine in [`crate::auction`]
//! and writes the result back with a conditional update against the
//! version it read. A write that loses the race surfaces as
//! [`ClaimError::Conflict`]; the engine never retries claims or bids on
//! the caller's behalf.
use crate::{
    auction::{
        Amount, ClaimKind, Claimant, Finalization, Item, ItemId, ItemIdRef, ItemStatus,
        TransitionError, UserIdRef,
    },
    clock::SharedClock,
    config::EngineConfig,
    persistence::{ItemQuery, QueryOrder, SharedItemStore, StoreError, Versioned},
};
use std::{fmt, time::Duration};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConflictReason {
    AlreadyClaimed(ClaimKind),
    ConcurrentUpdate,
}

impl fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictReason::AlreadyClaimed(_) => f.write_str("someone else already claimed this item"),
            ConflictReason::ConcurrentUpdate => {
                f.write_str("item was updated by someone else at the same time, please retry")
            }
        }
    }
}

#[derive(Error, Debug)]
pub enum ClaimError {
    #[error("item not found: {0}")]
    NotFound(ItemId),
    #[error("item {item} is {status}: {reason}")]
    InvalidState {
        item: ItemId,
        status: ItemStatus,
        reason: TransitionError,
    },
    #[error("{reason}")]
    Conflict { item: ItemId, reason: ConflictReason },
    #[error("bid of {offered} is too low, the current bid is {current_bid}")]
    InvalidBid { current_bid: Amount, offered: Amount },
    #[error("invalid listing: {0}")]
    InvalidListing(&'static str),
    #[error("store failure")]
    Store(#[source] StoreError),
}

impl ClaimError {
    /// Whether a fresh attempt may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClaimError::Conflict { .. } | ClaimError::Store(StoreError::Backend(_))
        )
    }

    fn from_store(item: ItemIdRef, e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => ClaimError::NotFound(id),
            StoreError::VersionConflict { .. } => ClaimError::Conflict {
                item: item.to_owned(),
                reason: ConflictReason::ConcurrentUpdate,
            },
            e => ClaimError::Store(e),
        }
    }

    fn from_transition(item: &Item, e: TransitionError) -> Self {
        match e {
            TransitionError::AlreadyClaimed(kind) => ClaimError::Conflict {
                item: item.id.clone(),
                reason: ConflictReason::AlreadyClaimed(kind),
            },
            TransitionError::TooLow { current, offered } => ClaimError::InvalidBid {
                current_bid: current,
                offered,
            },
            TransitionError::ZeroAmount => ClaimError::InvalidBid {
                current_bid: item.current_bid,
                offered: 0,
            },
            reason @ (TransitionError::AlreadySold | TransitionError::NotClaimed) => {
                ClaimError::InvalidState {
                    item: item.id.clone(),
                    status: item.status,
                    reason,
                }
            }
        }
    }
}

pub type ClaimResult<T> = Result<T, ClaimError>;

pub struct ClaimEngine {
    store: SharedItemStore,
    clock: SharedClock,
    claim_window: Duration,
    finalize_attempts: u32,
}

impl ClaimEngine {
    pub fn new(store: SharedItemStore, clock: SharedClock, config: &EngineConfig) -> Self {
        Self {
            store,
            clock,
            claim_window: config.claim_window(),
            finalize_attempts: config.finalize_attempts.max(1),
        }
    }

    async fn load(&self, id: ItemIdRef<'_>) -> ClaimResult<Versioned<Item>> {
        self.store
            .get(id)
            .await
            .map_err(|e| ClaimError::from_store(id, e))?
            .ok_or_else(|| ClaimError::NotFound(id.to_owned()))
    }

    /// One read-validate-write round against the item
    async fn update<F>(&self, id: ItemIdRef<'_>, transition: F) -> ClaimResult<Versioned<Item>>
    where
        F: FnOnce(&Item) -> Result<Item, TransitionError>,
    {
        let current = self.load(id).await?;
        let next = transition(&current.data).map_err(|e| {
            debug!(item = id, error = %e, "transition rejected");
            ClaimError::from_transition(&current.data, e)
        })?;
        self.store
            .conditional_update(id, current.version, next)
            .await
            .map_err(|e| ClaimError::from_store(id, e))
    }

    pub async fn create_listing(
        &self,
        title: &str,
        description: &str,
        price: Amount,
    ) -> ClaimResult<ItemId> {
        if price == 0 {
            return Err(ClaimError::InvalidListing("price must be positive"));
        }
        if title.trim().is_empty() {
            return Err(ClaimError::InvalidListing("title must not be empty"));
        }
        let item = Item::listing(title.trim(), description, price, self.clock.now());
        let id = self.store.create(item).await.map_err(ClaimError::Store)?;
        info!(item = %id, price, "listing created");
        Ok(id)
    }

    pub async fn get_item(&self, id: ItemIdRef<'_>) -> ClaimResult<Item> {
        Ok(self.load(id).await?.data)
    }

    pub async fn delete_listing(&self, id: ItemIdRef<'_>) -> ClaimResult<()> {
        let current = self.load(id).await?;
        current
            .data
            .ensure_deletable()
            .map_err(|e| ClaimError::from_transition(&current.data, e))?;
        self.store
            .conditional_delete(id, current.version)
            .await
            .map_err(|e| ClaimError::from_store(id, e))?;
        info!(item = id, version = current.version, "listing deleted");
        Ok(())
    }

    pub async fn claim_mine(&self, id: ItemIdRef<'_>, claimant: &Claimant) -> ClaimResult<()> {
        self.claim(id, ClaimKind::Mine, claimant).await
    }

    pub async fn claim_grab(&self, id: ItemIdRef<'_>, claimant: &Claimant) -> ClaimResult<()> {
        self.claim(id, ClaimKind::Grab, claimant).await
    }

    async fn claim(&self, id: ItemIdRef<'_>, kind: ClaimKind, claimant: &Claimant) -> ClaimResult<()> {
        let now = self.clock.now();
        let updated = self
            .update(id, |item| item.claim(kind, claimant, now))
            .await?;
        info!(
            item = id,
            user = %claimant.user_id,
            kind = %kind,
            amount = updated.data.current_bid,
            version = updated.version,
            "item claimed"
        );
        Ok(())
    }

    pub async fn place_steal_bid(
        &self,
        id: ItemIdRef<'_>,
        claimant: &Claimant,
        amount: Amount,
    ) -> ClaimResult<()> {
        let now = self.clock.now();
        let updated = self
            .update(id, |item| item.steal(claimant, amount, now))
            .await?;
        info!(
            item = id,
            user = %claimant.user_id,
            amount,
            version = updated.version,
            "steal bid accepted"
        );
        Ok(())
    }

    /// `true` once the item is sold, `false` while the claim window is
    /// still open or the item was never claimed
    pub async fn finalize_sale(&self, id: ItemIdRef<'_>) -> ClaimResult<bool> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let current = self.load(id).await?;
            let next = match current.data.finalize(self.clock.now(), self.claim_window) {
                Finalization::AlreadySold => return Ok(true),
                Finalization::NotDue => return Ok(false),
                Finalization::Sold(next) => next,
            };
            let winner = next.current_bidder.clone();
            let amount = next.current_bid;

            match self
                .store
                .conditional_update(id, current.version, next)
                .await
            {
                Ok(_) => {
                    info!(item = id, winner = ?winner, amount, "sale finalized");
                    return Ok(true);
                }
                Err(StoreError::VersionConflict { .. }) if attempt < self.finalize_attempts => {
                    debug!(item = id, attempt, "finalize lost a write race, re-reading");
                }
                Err(e) => return Err(ClaimError::from_store(id, e)),
            }
        }
    }

    /// Non-critical projection: store failures degrade to an empty list
    async fn project(&self, what: &'static str, query: ItemQuery) -> Vec<Item> {
        match self.store.query(&query).await {
            Ok(docs) => docs.into_iter().map(|doc| doc.data).collect(),
            Err(e) => {
                warn!(error = %e, query = what, "item query failed, returning no items");
                vec![]
            }
        }
    }

    /// Items the user has any bid history entry on, most recently updated first
    pub async fn get_user_bids(&self, user_id: UserIdRef<'_>) -> Vec<Item> {
        self.project("user bids", ItemQuery::default().with_bidder(user_id))
            .await
    }

    /// Items the user currently holds the top bid on, most recently updated first
    pub async fn get_user_claims(&self, user_id: UserIdRef<'_>) -> Vec<Item> {
        self.project(
            "user claims",
            ItemQuery::default().with_current_bidder(user_id),
        )
        .await
    }

    pub async fn list_open_items(&self) -> Vec<Item> {
        self.project(
            "open items",
            ItemQuery::default()
                .with_statuses(&[ItemStatus::Available, ItemStatus::Mine, ItemStatus::Grab])
                .order_by(QueryOrder::CreatedDesc),
        )
        .await
    }

    pub async fn list_available_items(&self) -> Vec<Item> {
        self.project(
            "available items",
            ItemQuery::default()
                .with_statuses(&[ItemStatus::Available])
                .order_by(QueryOrder::CreatedDesc),
        )
        .await
    }

    /// Claimed items that are not sold yet. Unlike the listings above this
    /// feeds a write path, so failures propagate.
    pub async fn pending_finalization(&self) -> ClaimResult<Vec<Item>> {
        Ok(self
            .store
            .query(
                &ItemQuery::default()
                    .with_statuses(&[ItemStatus::Mine, ItemStatus::Grab])
                    .order_by(QueryOrder::UpdatedDesc),
            )
            .await
            .map_err(ClaimError::Store)?
            .into_iter()
            .map(|doc| doc.data)
            .collect())
    }

    /// Whether `item` has been claimed for at least the claim window
    pub fn is_due(&self, item: &Item) -> bool {
        matches!(
            item.finalize(self.clock.now(), self.claim_window),
            Finalization::Sold(_)
        )
    }
}
