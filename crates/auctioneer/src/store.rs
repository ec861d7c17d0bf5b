use {
    anyhow::{Result, ensure},
    chrono::{DateTime, Duration, Utc},
    dashmap::DashMap,
    model::{Amount, AuctionEvent, AuctionItem, AuctionStatus, Bid, BidId, EventKind, ItemId, UserId},
    std::sync::{
        Arc,
        atomic::{AtomicI64, Ordering},
    },
};

/// Parameters supplied by the seller collaborator when listing an item.
/// Everything else on [`AuctionItem`] is engine-owned state.
#[derive(Clone, Debug)]
pub struct Listing {
    pub seller: UserId,
    pub title: String,
    pub starting_price: Amount,
    pub reserve_price: Option<Amount>,
    pub buy_now_price: Option<Amount>,
    pub min_increment: Amount,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub extension_window: Duration,
    pub extension_amount: Duration,
}

/// One item together with every bid placed on it, guarded by the per-item
/// lock that serializes the bid processor and the closing sweeper.
pub struct ItemEntry {
    pub state: tokio::sync::Mutex<ItemState>,
}

pub struct ItemState {
    pub item: AuctionItem,
    /// All bids on this item in submission order. Bids are never deleted,
    /// only their status changes.
    pub bids: Vec<Bid>,
    next_sequence: u64,
}

impl ItemState {
    pub(crate) fn new(item: AuctionItem) -> Self {
        Self {
            item,
            bids: Vec::new(),
            next_sequence: 0,
        }
    }

    /// The current leader: the single bid with status `active`.
    pub fn leader(&self) -> Option<&Bid> {
        self.bids.iter().find(|bid| bid.is_leading())
    }

    pub fn leader_mut(&mut self) -> Option<&mut Bid> {
        self.bids.iter_mut().find(|bid| bid.is_leading())
    }

    pub fn bid(&self, id: BidId) -> Option<&Bid> {
        self.bids.iter().find(|bid| bid.id == id)
    }

    /// Builds the next event for this item. Sequence numbers are allocated
    /// under the item lock so they are strictly increasing per item.
    pub fn next_event(&mut self, kind: EventKind) -> AuctionEvent {
        self.next_sequence += 1;
        AuctionEvent {
            item: self.item.id,
            sequence: self.next_sequence,
            timestamp: Utc::now(),
            kind,
        }
    }
}

/// In-memory store of all auction items.
///
/// The engine is single-instance; per-item serialization is provided by the
/// `tokio` mutex in every entry and id allocation by atomic counters. A
/// horizontally scaled deployment would replace this with compare-and-set
/// updates against the durable store behind the same interface.
#[derive(Default)]
pub struct Store {
    items: DashMap<ItemId, Arc<ItemEntry>>,
    next_item_id: AtomicI64,
    next_bid_id: AtomicI64,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates and records a new listing in `draft` status.
    pub fn insert(&self, listing: Listing) -> Result<ItemId> {
        ensure!(
            listing.starting_price.is_positive(),
            "starting price must be positive"
        );
        ensure!(
            listing.min_increment.is_positive(),
            "minimum increment must be positive"
        );
        ensure!(
            listing.end_time > listing.start_time,
            "end time must come after start time"
        );
        if let Some(reserve) = listing.reserve_price {
            ensure!(reserve.is_positive(), "reserve price must be positive");
            if let Some(buy_now) = listing.buy_now_price {
                // A buy-now purchase always satisfies the seller's ask.
                ensure!(
                    buy_now >= reserve,
                    "buy-now price must not be below the reserve price"
                );
            }
        }
        if let Some(buy_now) = listing.buy_now_price {
            ensure!(
                buy_now >= listing.starting_price,
                "buy-now price must not be below the starting price"
            );
        }

        let id = ItemId(self.next_item_id.fetch_add(1, Ordering::SeqCst) + 1);
        let item = AuctionItem {
            id,
            seller: listing.seller,
            title: listing.title,
            starting_price: listing.starting_price,
            reserve_price: listing.reserve_price,
            buy_now_price: listing.buy_now_price,
            min_increment: listing.min_increment,
            start_time: listing.start_time,
            end_time: listing.end_time,
            extension_window: listing.extension_window,
            extension_amount: listing.extension_amount,
            status: AuctionStatus::Draft,
            current_price: listing.starting_price,
            total_bids: 0,
            winner: None,
            winning_bid: None,
        };
        self.items.insert(
            id,
            Arc::new(ItemEntry {
                state: tokio::sync::Mutex::new(ItemState::new(item)),
            }),
        );
        Ok(id)
    }

    pub fn entry(&self, id: ItemId) -> Option<Arc<ItemEntry>> {
        self.items.get(&id).map(|entry| entry.clone())
    }

    /// Snapshot of all item ids for the sweeper scan. The set is collected
    /// up front so the sweep never holds a map shard lock across an item
    /// lock acquisition.
    pub fn item_ids(&self) -> Vec<ItemId> {
        self.items.iter().map(|entry| *entry.key()).collect()
    }

    pub fn next_bid_id(&self) -> BidId {
        BidId(self.next_bid_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Convenience accessor for collaborators that only need a copy of the
    /// item, e.g. tests and the listing cache refresh.
    pub async fn item(&self, id: ItemId) -> Option<AuctionItem> {
        let entry = self.entry(id)?;
        let state = entry.state.lock().await;
        Some(state.item.clone())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl Store {
    /// Test helper constructing a store with a single item in a given state.
    #[cfg(test)]
    pub(crate) fn with_item(item: AuctionItem) -> (Arc<Self>, ItemId) {
        let store = Arc::new(Self::new());
        let id = item.id;
        store.items.insert(
            id,
            Arc::new(ItemEntry {
                state: tokio::sync::Mutex::new(ItemState::new(item)),
            }),
        );
        store.next_item_id.store(id.0, Ordering::SeqCst);
        (store, id)
    }
}
