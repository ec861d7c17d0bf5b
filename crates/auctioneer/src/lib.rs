//! The bidding and auction-lifecycle engine.
//!
//! This crate is the serialization point for everything with real
//! correctness hazards in the marketplace: concurrent bids on the same item,
//! balance reservations that must never double-spend, anti-snipe deadline
//! extension and the exactly-once close of every auction. The surrounding
//! CRUD surfaces (accounts, listings, search, notification delivery) are
//! external collaborators that call into [`processor::BidProcessor`] and
//! consume the event stream of [`events::EventEmitter`].

pub mod arguments;
pub mod events;
pub mod extension;
pub mod ledger;
pub mod lifecycle;
pub mod processor;
pub mod run;
pub mod settlement;
pub mod shutdown_controller;
pub mod store;
pub mod sweeper;

pub use run::{Engine, run};
