use {
    crate::{
        amount::Amount,
        ids::{BidId, ItemId, UserId},
    },
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
};

/// A domain event published by the engine.
///
/// Sequence numbers increase strictly per item so consumers (notifications,
/// listing cache) can order and deduplicate deliveries.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuctionEvent {
    pub item: ItemId,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    BidPlaced {
        bid: BidId,
        bidder: UserId,
        amount: Amount,
    },
    BidOutbid {
        previous_bid: BidId,
        bidder: UserId,
    },
    AuctionExtended {
        new_end_time: DateTime<Utc>,
    },
    AuctionEnded,
    AuctionSold {
        winner: UserId,
        amount: Amount,
    },
    AuctionUnsold,
    AuctionCancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialization_format() {
        let event = AuctionEvent {
            item: ItemId(7),
            sequence: 3,
            timestamp: Utc::now(),
            kind: EventKind::AuctionSold {
                winner: UserId(42),
                amount: Amount::from_cents(1100),
            },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["item"], 7);
        assert_eq!(json["sequence"], 3);
        assert_eq!(json["kind"], "auction_sold");
        assert_eq!(json["winner"], 42);
        let back: AuctionEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }
}
