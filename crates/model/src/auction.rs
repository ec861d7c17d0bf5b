use {
    crate::{
        amount::Amount,
        ids::{BidId, ItemId, UserId},
    },
    chrono::{DateTime, Duration, Utc},
    serde::{Deserialize, Serialize},
};

/// Lifecycle states of an auction item.
///
/// Transitions are one-directional: `draft → active → ended → {sold,
/// unsold}`, with `cancelled` reachable only before any bid was accepted.
/// `sold`, `unsold` and `cancelled` are terminal.
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
pub enum AuctionStatus {
    Draft,
    Active,
    Ended,
    Sold,
    Unsold,
    Cancelled,
}

impl AuctionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Sold | Self::Unsold | Self::Cancelled)
    }

    /// The full transition table of the auction state machine.
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Draft, Self::Active)
                | (Self::Draft, Self::Cancelled)
                | (Self::Active, Self::Ended)
                | (Self::Active, Self::Cancelled)
                | (Self::Ended, Self::Sold)
                | (Self::Ended, Self::Unsold)
        )
    }
}

/// A single item up for auction.
///
/// All fields except identity and listing parameters are mutated only by the
/// bid processor (price, bid count, end time) and the closing sweeper
/// (status, winner), always under the per-item lock.
#[derive(Clone, Debug, PartialEq)]
pub struct AuctionItem {
    pub id: ItemId,
    pub seller: UserId,
    pub title: String,
    pub starting_price: Amount,
    /// Minimum price below which the seller is not obligated to sell.
    pub reserve_price: Option<Amount>,
    /// Price at which a buyer may end the auction immediately.
    pub buy_now_price: Option<Amount>,
    pub min_increment: Amount,
    pub start_time: DateTime<Utc>,
    /// Only ever moves forward (anti-snipe extension).
    pub end_time: DateTime<Utc>,
    /// A bid landing within this window before `end_time` extends the
    /// auction.
    pub extension_window: Duration,
    /// Fresh runway granted by an extension, measured from the bid moment.
    pub extension_amount: Duration,
    pub status: AuctionStatus,
    /// Non-decreasing while the auction is active.
    pub current_price: Amount,
    pub total_bids: u32,
    /// Set only at settlement.
    pub winner: Option<UserId>,
    pub winning_bid: Option<BidId>,
}

impl AuctionItem {
    /// Whether bids are currently accepted: status active and `now` within
    /// `[start_time, end_time)`.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.status == AuctionStatus::Active && self.start_time <= now && now < self.end_time
    }

    /// The lowest amount the next bid must reach. The first bid only has to
    /// match the starting price; afterwards a full increment over the current
    /// price is required.
    pub fn next_bid_minimum(&self) -> Amount {
        if self.total_bids == 0 {
            self.starting_price
        } else {
            self.current_price + self.min_increment
        }
    }

    pub fn reserve_met(&self) -> bool {
        match self.reserve_price {
            Some(reserve) => self.current_price >= reserve,
            None => true,
        }
    }

    pub fn time_left(&self, now: DateTime<Utc>) -> Duration {
        (self.end_time - now).max(Duration::zero())
    }

    /// Buy-now stays available until bidding reaches the buy-now price.
    pub fn buy_now_available(&self) -> bool {
        match self.buy_now_price {
            Some(price) => self.total_bids == 0 || self.current_price < price,
            None => false,
        }
    }
}
