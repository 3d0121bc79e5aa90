//! Items and the claim/bid state machine
//!
//! All transitions here are pure: they take the current item and return
//! the next version of it, or the reason the transition is not allowed.
//! Loading, conditional writes and time come from the callers.
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr, time::Duration};
use thiserror::Error;

pub type ItemId = String;
pub type ItemIdRef<'s> = &'s str;
pub type UserId = String;
pub type UserIdRef<'s> = &'s str;
pub type Amount = u64;
/// Milliseconds since the unix epoch
pub type Timestamp = u64;

#[derive(Error, Debug, Copy, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("item is already sold")]
    AlreadySold,
    #[error("item has no claim to outbid")]
    NotClaimed,
    #[error("item already has a {0} claim")]
    AlreadyClaimed(ClaimKind),
    #[error("bid of {offered} does not beat current bid of {current}")]
    TooLow { current: Amount, offered: Amount },
    #[error("bid amount must be positive")]
    ZeroAmount,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Available,
    Mine,
    Grab,
    Sold,
}

impl ItemStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ItemStatus::Available => "available",
            ItemStatus::Mine => "mine",
            ItemStatus::Grab => "grab",
            ItemStatus::Sold => "sold",
        }
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
#[error("unknown value: {0}")]
pub struct UnknownVariant(String);

impl FromStr for ItemStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "available" => ItemStatus::Available,
            "mine" => ItemStatus::Mine,
            "grab" => ItemStatus::Grab,
            "sold" => ItemStatus::Sold,
            other => return Err(UnknownVariant(other.to_owned())),
        })
    }
}

/// The two accept-the-price claim paths
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClaimKind {
    Mine,
    Grab,
}

impl ClaimKind {
    fn status(self) -> ItemStatus {
        match self {
            ClaimKind::Mine => ItemStatus::Mine,
            ClaimKind::Grab => ItemStatus::Grab,
        }
    }

    fn bid_type(self) -> BidType {
        match self {
            ClaimKind::Mine => BidType::Mine,
            ClaimKind::Grab => BidType::Grab,
        }
    }
}

impl fmt::Display for ClaimKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.bid_type().as_str())
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BidType {
    Mine,
    Grab,
    Steal,
}

impl BidType {
    pub fn as_str(self) -> &'static str {
        match self {
            BidType::Mine => "mine",
            BidType::Grab => "grab",
            BidType::Steal => "steal",
        }
    }
}

impl FromStr for BidType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "mine" => BidType::Mine,
            "grab" => BidType::Grab,
            "steal" => BidType::Steal,
            other => return Err(UnknownVariant(other.to_owned())),
        })
    }
}

/// Who is acting: the id plus a display-name snapshot
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Claimant {
    pub user_id: UserId,
    pub user_name: String,
}

impl Claimant {
    pub fn new(user_id: impl Into<UserId>, user_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            user_name: user_name.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BidEntry {
    pub user_id: UserId,
    pub user_name: String,
    pub bid_amount: Amount,
    pub bid_type: BidType,
    pub timestamp: Timestamp,
}

/// A mine or grab claim. Written once, never changed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    pub user_id: UserId,
    pub user_name: String,
    pub claimed_at: Timestamp,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// Assigned by the store on creation
    pub id: ItemId,
    pub title: String,
    pub description: String,
    pub status: ItemStatus,
    pub price: Amount,
    pub current_bid: Amount,
    pub current_bidder: Option<UserId>,
    pub mine_claim: Option<Claim>,
    pub grab_claim: Option<Claim>,
    pub bid_history: Vec<BidEntry>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub sold_at: Option<Timestamp>,
}

/// Outcome of asking an item to finalize
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Finalization {
    AlreadySold,
    /// Nobody claimed it, or the window has not elapsed yet
    NotDue,
    Sold(Item),
}

impl Item {
    /// A fresh listing, not yet stored
    pub fn listing(
        title: impl Into<String>,
        description: impl Into<String>,
        price: Amount,
        now: Timestamp,
    ) -> Self {
        Self {
            id: ItemId::new(),
            title: title.into(),
            description: description.into(),
            status: ItemStatus::Available,
            price,
            current_bid: price,
            current_bidder: None,
            mine_claim: None,
            grab_claim: None,
            bid_history: vec![],
            created_at: now,
            updated_at: now,
            sold_at: None,
        }
    }

    pub fn first_claimed_at(&self) -> Option<Timestamp> {
        let mine = self.mine_claim.as_ref().map(|c| c.claimed_at);
        let grab = self.grab_claim.as_ref().map(|c| c.claimed_at);
        match (mine, grab) {
            (Some(m), Some(g)) => Some(m.min(g)),
            (m, g) => m.or(g),
        }
    }

    pub fn has_bid_from(&self, user_id: UserIdRef) -> bool {
        self.bid_history.iter().any(|e| e.user_id == user_id)
    }

    fn existing_claim(&self) -> Option<ClaimKind> {
        if self.mine_claim.is_some() {
            Some(ClaimKind::Mine)
        } else if self.grab_claim.is_some() {
            Some(ClaimKind::Grab)
        } else {
            None
        }
    }

    /// Accept the listed price. The first claim of either kind locks the
    /// item against the other kind.
    pub fn claim(
        &self,
        kind: ClaimKind,
        claimant: &Claimant,
        now: Timestamp,
    ) -> Result<Self, TransitionError> {
        if self.status == ItemStatus::Sold {
            return Err(TransitionError::AlreadySold);
        }
        if let Some(existing) = self.existing_claim() {
            return Err(TransitionError::AlreadyClaimed(existing));
        }

        let claim = Some(Claim {
            user_id: claimant.user_id.clone(),
            user_name: claimant.user_name.clone(),
            claimed_at: now,
        });
        let mut next = self.clone();
        match kind {
            ClaimKind::Mine => next.mine_claim = claim,
            ClaimKind::Grab => next.grab_claim = claim,
        }
        next.status = kind.status();
        next.current_bid = self.price;
        next.current_bidder = Some(claimant.user_id.clone());
        next.bid_history.push(BidEntry {
            user_id: claimant.user_id.clone(),
            user_name: claimant.user_name.clone(),
            bid_amount: self.price,
            bid_type: kind.bid_type(),
            timestamp: now,
        });
        next.updated_at = now;
        Ok(next)
    }

    /// Outbid the current holder of a claimed item. Status is untouched.
    pub fn steal(
        &self,
        claimant: &Claimant,
        amount: Amount,
        now: Timestamp,
    ) -> Result<Self, TransitionError> {
        match self.status {
            ItemStatus::Sold => return Err(TransitionError::AlreadySold),
            ItemStatus::Available => return Err(TransitionError::NotClaimed),
            ItemStatus::Mine | ItemStatus::Grab => {}
        }
        if amount == 0 {
            return Err(TransitionError::ZeroAmount);
        }
        if amount <= self.current_bid {
            return Err(TransitionError::TooLow {
                current: self.current_bid,
                offered: amount,
            });
        }

        let mut next = self.clone();
        next.current_bid = amount;
        next.current_bidder = Some(claimant.user_id.clone());
        next.bid_history.push(BidEntry {
            user_id: claimant.user_id.clone(),
            user_name: claimant.user_name.clone(),
            bid_amount: amount,
            bid_type: BidType::Steal,
            timestamp: now,
        });
        next.updated_at = now;
        Ok(next)
    }

    /// Close the sale once `window` has passed since the first claim
    pub fn finalize(&self, now: Timestamp, window: Duration) -> Finalization {
        if self.status == ItemStatus::Sold {
            return Finalization::AlreadySold;
        }
        let Some(first_claim) = self.first_claimed_at() else {
            return Finalization::NotDue;
        };
        let window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);
        if now.saturating_sub(first_claim) < window_ms {
            return Finalization::NotDue;
        }

        let mut next = self.clone();
        next.status = ItemStatus::Sold;
        next.sold_at = Some(now);
        next.updated_at = now;
        Finalization::Sold(next)
    }

    pub fn ensure_deletable(&self) -> Result<(), TransitionError> {
        if self.status == ItemStatus::Sold {
            return Err(TransitionError::AlreadySold);
        }
        Ok(())
    }
}
