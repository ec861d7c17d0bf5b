use {
    crate::{
        amount::Amount,
        ids::{BidId, ItemId, ReservationId, UserId},
    },
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
};

/// Status of a bid. At most one bid per item is `active` (the current
/// leader) or, after settlement, `won`; every other bid on the item is
/// `outbid` or `lost`.
#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    PartialEq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BidStatus {
    Active,
    Outbid,
    Won,
    Lost,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Bid {
    pub id: BidId,
    pub item: ItemId,
    pub bidder: UserId,
    /// The effective bid amount. Proxy auto-raising mutates this in place;
    /// the bidder's ceiling lives in `max_bid` and is never published.
    pub amount: Amount,
    /// Ceiling up to which the engine may auto-raise this bid.
    pub max_bid: Option<Amount>,
    /// The ledger hold backing this bid, while one exists.
    pub reservation: Option<ReservationId>,
    pub status: BidStatus,
    pub created_at: DateTime<Utc>,
}

impl Bid {
    /// The most this bidder authorized the engine to spend on their behalf.
    pub fn ceiling(&self) -> Amount {
        self.max_bid.map_or(self.amount, |max| max.max(self.amount))
    }

    pub fn is_leading(&self) -> bool {
        self.status == BidStatus::Active
    }
}
