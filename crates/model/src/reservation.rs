use {
    crate::{
        amount::Amount,
        ids::{BidId, ItemId, ReservationId, UserId},
    },
    serde::{Deserialize, Serialize},
};

/// State of a balance reservation. A `held` reservation transitions to
/// exactly one of `released` or `captured` and never back.
#[derive(
    Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ReservationState {
    Held,
    Released,
    Captured,
}

impl ReservationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Released | Self::Captured)
    }
}

/// A hold on a bidder's balance backing one bid.
#[derive(Clone, Debug, PartialEq)]
pub struct Reservation {
    pub id: ReservationId,
    pub user: UserId,
    pub item: ItemId,
    pub bid: BidId,
    pub amount: Amount,
    pub state: ReservationState,
}
