//! Domain data model for the bidding engine.
//!
//! This crate defines the plain data types shared between the engine and its
//! collaborators: auction items, bids, balance reservations and the domain
//! events published for every state change. The types carry small invariant
//! helpers but no concurrency logic; serialization (serde) is provided for
//! everything that crosses the engine boundary.

pub mod amount;
pub mod auction;
pub mod bid;
pub mod events;
pub mod ids;
pub mod reservation;

pub use {
    amount::Amount,
    auction::{AuctionItem, AuctionStatus},
    bid::{Bid, BidStatus},
    events::{AuctionEvent, EventKind},
    ids::{BidId, ItemId, ReservationId, UserId},
    reservation::{Reservation, ReservationState},
};
