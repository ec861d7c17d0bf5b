use {
    crate::{
        events::EventEmitter,
        extension,
        ledger::Ledger,
        lifecycle, settlement,
        store::{ItemState, Store},
    },
    anyhow::Context,
    chrono::{DateTime, Utc},
    model::{Amount, AuctionStatus, Bid, BidStatus, EventKind, ItemId, UserId},
    std::{sync::Arc, time::Duration},
    thiserror::Error,
};

#[derive(Debug, Error)]
pub enum PlaceBidError {
    #[error("auction is not active")]
    AuctionNotActive,
    #[error("sellers cannot bid on their own item")]
    SelfBidForbidden,
    #[error("bidder account is banned")]
    BidderBanned,
    #[error("bid must be at least {minimum}")]
    BidTooLow { minimum: Amount },
    #[error("insufficient balance")]
    InsufficientBalance,
    #[error("buy-now is not available for this item")]
    BuyNowUnavailable,
    #[error("item is contended, please retry")]
    Busy,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum CancelError {
    #[error("item not found")]
    NotFound,
    #[error("cancellation is not permitted")]
    Forbidden,
}

/// Read-only view of an item for the query surface (listing cache, clients
/// polling price and time left). Never reveals proxy ceilings.
#[derive(Clone, Debug, serde::Serialize)]
pub struct ItemSnapshot {
    pub item: ItemId,
    pub status: AuctionStatus,
    pub current_price: Amount,
    pub leader: Option<UserId>,
    pub total_bids: u32,
    pub end_time: DateTime<Utc>,
    pub time_left_seconds: i64,
    pub winner: Option<UserId>,
}

/// The per-item serialization point for all bidding operations.
///
/// Every operation acquires the item lock first and touches at most one
/// user's ledger account while holding it, so bids on one item are totally
/// ordered and the lock order stays acyclic. Validation and application are
/// one atomic unit: a rejected bid leaves no trace, in the ledger or on the
/// item.
pub struct BidProcessor {
    store: Arc<Store>,
    ledger: Arc<Ledger>,
    events: EventEmitter,
    /// Bounded wait for the per-item critical section; exceeding it surfaces
    /// as [`PlaceBidError::Busy`] so the caller can retry instead of piling
    /// up behind a contended item.
    lock_timeout: Duration,
}

impl BidProcessor {
    pub fn new(
        store: Arc<Store>,
        ledger: Arc<Ledger>,
        events: EventEmitter,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            store,
            ledger,
            events,
            lock_timeout,
        }
    }

    pub fn events(&self) -> &EventEmitter {
        &self.events
    }

    /// Places a bid, optionally with a proxy ceiling the engine may
    /// auto-raise the bid up to.
    pub async fn place_bid(
        &self,
        item: ItemId,
        bidder: UserId,
        amount: Amount,
        max_bid: Option<Amount>,
    ) -> Result<Bid, PlaceBidError> {
        let result = self.place_bid_inner(item, bidder, amount, max_bid).await;
        metrics()
            .bids
            .with_label_values(&[result_label(&result)])
            .inc();
        match &result {
            Ok(bid) => {
                tracing::debug!(%item, %bidder, bid = %bid.id, amount = %bid.amount, "bid accepted")
            }
            Err(PlaceBidError::Internal(err)) => {
                tracing::error!(%item, %bidder, ?err, "bid processing failed")
            }
            Err(err) => tracing::debug!(%item, %bidder, %err, "bid rejected"),
        }
        result
    }

    async fn place_bid_inner(
        &self,
        item: ItemId,
        bidder: UserId,
        amount: Amount,
        max_bid: Option<Amount>,
    ) -> Result<Bid, PlaceBidError> {
        let entry = self
            .store
            .entry(item)
            .ok_or(PlaceBidError::AuctionNotActive)?;
        let mut state = tokio::time::timeout(self.lock_timeout, entry.state.lock())
            .await
            .map_err(|_| PlaceBidError::Busy)?;
        self.place_bid_locked(&mut state, bidder, amount, max_bid, Utc::now())
    }

    fn place_bid_locked(
        &self,
        state: &mut ItemState,
        bidder: UserId,
        amount: Amount,
        max_bid: Option<Amount>,
        now: DateTime<Utc>,
    ) -> Result<Bid, PlaceBidError> {
        if !state.item.is_active(now) {
            return Err(PlaceBidError::AuctionNotActive);
        }
        if bidder == state.item.seller {
            return Err(PlaceBidError::SelfBidForbidden);
        }
        if self.ledger.is_banned(bidder) {
            return Err(PlaceBidError::BidderBanned);
        }
        let minimum = state.item.next_bid_minimum();
        if amount < minimum {
            return Err(PlaceBidError::BidTooLow { minimum });
        }

        let item_id = state.item.id;
        let min_increment = state.item.min_increment;
        // A ceiling at or below the bid amount authorizes nothing extra.
        let max_bid = max_bid.filter(|max| *max > amount);

        // First mutation. Reserving fails atomically, so a rejected bid has
        // no side effects; everything after this point cannot fail short of
        // an invariant violation.
        let bid_id = self.store.next_bid_id();
        let own_prior_hold = state
            .leader()
            .filter(|leader| leader.bidder == bidder)
            .and_then(|leader| leader.reservation);
        let reservation = self
            .ledger
            .reserve_replacing(
                bidder,
                own_prior_hold,
                item_id,
                bid_id,
                max_bid.unwrap_or(amount),
            )
            .map_err(|_| PlaceBidError::InsufficientBalance)?;

        let mut incoming = Bid {
            id: bid_id,
            item: item_id,
            bidder,
            amount,
            max_bid,
            reservation: Some(reservation),
            status: BidStatus::Active,
            created_at: now,
        };

        // Resolve against the standing leader.
        let mut outbid = None;
        let new_price = match state.leader_mut() {
            None => incoming.amount,
            Some(previous) if previous.bidder == bidder => {
                // The leader raised their own bid; the old one is superseded
                // (its hold was already folded into the new reservation) and
                // nobody gets an outbid notification.
                previous.status = BidStatus::Outbid;
                previous.reservation = None;
                incoming.amount
            }
            Some(previous) => {
                let defense_budget = previous.ceiling();
                if incoming.ceiling() > defense_budget {
                    // The newcomer beats the standing ceiling. They pay one
                    // increment over it, never their own ceiling.
                    let resolved = incoming
                        .ceiling()
                        .min(incoming.amount.max(defense_budget + min_increment));
                    incoming.amount = resolved;
                    previous.amount = defense_budget;
                    previous.status = BidStatus::Outbid;
                    outbid = Some((previous.id, previous.bidder));
                    if let Some(hold) = previous.reservation.take() {
                        self.ledger.release(hold).map_err(PlaceBidError::Internal)?;
                    }
                    resolved
                } else {
                    // The standing proxy defends; ties favor the earlier
                    // bid. The leader's hold follows their effective amount.
                    let defense = defense_budget.min(incoming.ceiling() + min_increment);
                    let leader_hold = previous
                        .reservation
                        .context("leader bid has no backing hold")?;
                    match self.ledger.adjust(leader_hold, defense) {
                        Ok(()) => {
                            previous.amount = defense;
                            incoming.status = BidStatus::Outbid;
                            outbid = Some((incoming.id, incoming.bidder));
                            if let Some(hold) = incoming.reservation.take() {
                                self.ledger.release(hold).map_err(PlaceBidError::Internal)?;
                            }
                            defense
                        }
                        Err(_) => {
                            // The leader can no longer fund their proxy
                            // (funds were spent elsewhere since the hold was
                            // trimmed): the defense collapses and the
                            // newcomer leads at their stated amount.
                            previous.status = BidStatus::Outbid;
                            outbid = Some((previous.id, previous.bidder));
                            if let Some(hold) = previous.reservation.take() {
                                self.ledger.release(hold).map_err(PlaceBidError::Internal)?;
                            }
                            incoming.amount
                        }
                    }
                }
            }
        };

        state.bids.push(incoming.clone());
        state.item.current_price = new_price;
        state.item.total_bids += 1;

        let placed = state.next_event(EventKind::BidPlaced {
            bid: incoming.id,
            bidder,
            amount: incoming.amount,
        });
        self.events.publish(placed);
        if let Some((previous_bid, outbid_bidder)) = outbid {
            let event = state.next_event(EventKind::BidOutbid {
                previous_bid,
                bidder: outbid_bidder,
            });
            self.events.publish(event);
        }
        if let Some(new_end_time) = extension::extended_end_time(&state.item, now) {
            state.item.end_time = new_end_time;
            let event = state.next_event(EventKind::AuctionExtended { new_end_time });
            self.events.publish(event);
        }

        Ok(incoming)
    }

    /// Ends the auction immediately at the seller's buy-now price. The
    /// purchase runs through the same claim-and-settle machinery as the
    /// sweeper, just without waiting for the deadline.
    pub async fn buy_now(&self, item: ItemId, buyer: UserId) -> Result<Bid, PlaceBidError> {
        let result = self.buy_now_inner(item, buyer).await;
        metrics()
            .buy_nows
            .with_label_values(&[result_label(&result)])
            .inc();
        match &result {
            Ok(bid) => tracing::info!(%item, %buyer, amount = %bid.amount, "item bought now"),
            Err(PlaceBidError::Internal(err)) => {
                tracing::error!(%item, %buyer, ?err, "buy-now failed")
            }
            Err(err) => tracing::debug!(%item, %buyer, %err, "buy-now rejected"),
        }
        result
    }

    async fn buy_now_inner(&self, item: ItemId, buyer: UserId) -> Result<Bid, PlaceBidError> {
        let entry = self
            .store
            .entry(item)
            .ok_or(PlaceBidError::AuctionNotActive)?;
        let mut state = tokio::time::timeout(self.lock_timeout, entry.state.lock())
            .await
            .map_err(|_| PlaceBidError::Busy)?;
        let now = Utc::now();

        if !state.item.is_active(now) {
            return Err(PlaceBidError::AuctionNotActive);
        }
        if buyer == state.item.seller {
            return Err(PlaceBidError::SelfBidForbidden);
        }
        if self.ledger.is_banned(buyer) {
            return Err(PlaceBidError::BidderBanned);
        }
        if !state.item.buy_now_available() {
            return Err(PlaceBidError::BuyNowUnavailable);
        }
        let price = state
            .item
            .buy_now_price
            .ok_or(PlaceBidError::BuyNowUnavailable)?;

        let item_id = state.item.id;
        let bid_id = self.store.next_bid_id();
        let own_prior_hold = state
            .leader()
            .filter(|leader| leader.bidder == buyer)
            .and_then(|leader| leader.reservation);
        let reservation = self
            .ledger
            .reserve_replacing(buyer, own_prior_hold, item_id, bid_id, price)
            .map_err(|_| PlaceBidError::InsufficientBalance)?;

        let mut outbid = None;
        if let Some(previous) = state.leader_mut() {
            previous.status = BidStatus::Outbid;
            if previous.bidder == buyer {
                previous.reservation = None;
            } else {
                outbid = Some((previous.id, previous.bidder));
                if let Some(hold) = previous.reservation.take() {
                    self.ledger.release(hold).map_err(PlaceBidError::Internal)?;
                }
            }
        }

        let incoming = Bid {
            id: bid_id,
            item: item_id,
            bidder: buyer,
            amount: price,
            max_bid: None,
            reservation: Some(reservation),
            status: BidStatus::Active,
            created_at: now,
        };
        state.bids.push(incoming);
        state.item.current_price = price;
        state.item.total_bids += 1;

        let placed = state.next_event(EventKind::BidPlaced {
            bid: bid_id,
            bidder: buyer,
            amount: price,
        });
        self.events.publish(placed);
        if let Some((previous_bid, outbid_bidder)) = outbid {
            let event = state.next_event(EventKind::BidOutbid {
                previous_bid,
                bidder: outbid_bidder,
            });
            self.events.publish(event);
        }

        lifecycle::transition(&mut state.item, AuctionStatus::Ended)
            .map_err(PlaceBidError::Internal)?;
        let ended = state.next_event(EventKind::AuctionEnded);
        self.events.publish(ended);
        settlement::settle(&mut state, &self.ledger, &self.events)
            .map_err(PlaceBidError::Internal)?;

        state
            .bid(bid_id)
            .cloned()
            .context("buy-now bid vanished during settlement")
            .map_err(PlaceBidError::Internal)
    }

    /// Cancels an auction. Only the seller may cancel, and only while no bid
    /// has been accepted.
    pub async fn cancel(&self, item: ItemId, caller: UserId) -> Result<(), CancelError> {
        let entry = self.store.entry(item).ok_or(CancelError::NotFound)?;
        let mut state = entry.state.lock().await;
        if state.item.seller != caller {
            return Err(CancelError::Forbidden);
        }
        if !lifecycle::cancel(&mut state.item) {
            return Err(CancelError::Forbidden);
        }
        tracing::info!(%item, "auction cancelled by seller");
        let event = state.next_event(EventKind::AuctionCancelled);
        self.events.publish(event);
        Ok(())
    }

    /// The query surface: current price, leader and time left.
    pub async fn snapshot(&self, item: ItemId) -> Option<ItemSnapshot> {
        let entry = self.store.entry(item)?;
        let state = entry.state.lock().await;
        let now = Utc::now();
        Some(ItemSnapshot {
            item: state.item.id,
            status: state.item.status,
            current_price: state.item.current_price,
            leader: state.leader().map(|bid| bid.bidder),
            total_bids: state.item.total_bids,
            end_time: state.item.end_time,
            time_left_seconds: state.item.time_left(now).num_seconds(),
            winner: state.item.winner,
        })
    }
}

fn result_label<T>(result: &Result<T, PlaceBidError>) -> &'static str {
    match result {
        Ok(_) => "accepted",
        Err(PlaceBidError::AuctionNotActive) => "auction_not_active",
        Err(PlaceBidError::SelfBidForbidden) => "self_bid_forbidden",
        Err(PlaceBidError::BidderBanned) => "bidder_banned",
        Err(PlaceBidError::BidTooLow { .. }) => "bid_too_low",
        Err(PlaceBidError::InsufficientBalance) => "insufficient_balance",
        Err(PlaceBidError::BuyNowUnavailable) => "buy_now_unavailable",
        Err(PlaceBidError::Busy) => "busy",
        Err(PlaceBidError::Internal(_)) => "internal_error",
    }
}

#[derive(prometheus_metric_storage::MetricStorage, Clone, Debug)]
#[metric(subsystem = "bidding")]
struct Metrics {
    /// Processed bid requests by outcome.
    #[metric(labels("result"))]
    bids: prometheus::IntCounterVec,

    /// Processed buy-now requests by outcome.
    #[metric(labels("result"))]
    buy_nows: prometheus::IntCounterVec,
}

fn metrics() -> &'static Metrics {
    Metrics::instance(observe::metrics::get_storage_registry()).unwrap()
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        chrono::Duration as TimeDelta,
        model::{AuctionItem, BidId},
    };

    const SELLER: UserId = UserId(1);
    const ALICE: UserId = UserId(2);
    const BOB: UserId = UserId(3);
    const CAROL: UserId = UserId(4);

    fn active_item() -> AuctionItem {
        let now = Utc::now();
        AuctionItem {
            id: ItemId(1),
            seller: SELLER,
            title: "bicycle".to_string(),
            starting_price: Amount::from_units(10),
            reserve_price: None,
            buy_now_price: None,
            min_increment: Amount::from_units(1),
            start_time: now - TimeDelta::minutes(5),
            end_time: now + TimeDelta::hours(1),
            extension_window: TimeDelta::seconds(60),
            extension_amount: TimeDelta::seconds(120),
            status: AuctionStatus::Active,
            current_price: Amount::from_units(10),
            total_bids: 0,
            winner: None,
            winning_bid: None,
        }
    }

    fn processor_with(item: AuctionItem) -> (BidProcessor, Arc<Store>, Arc<Ledger>, ItemId) {
        let (store, id) = Store::with_item(item);
        let ledger = Arc::new(Ledger::new());
        for user in [ALICE, BOB, CAROL] {
            ledger.register(user, Amount::from_units(100), false);
        }
        let events = EventEmitter::new(64);
        let processor = BidProcessor::new(
            store.clone(),
            ledger.clone(),
            events,
            Duration::from_secs(2),
        );
        (processor, store, ledger, id)
    }

    fn processor() -> (BidProcessor, Arc<Store>, Arc<Ledger>, ItemId) {
        processor_with(active_item())
    }

    #[tokio::test]
    async fn outbidding_releases_the_previous_hold() {
        let (processor, store, ledger, item) = processor();
        let mut events = processor.events.subscribe();

        let first = processor
            .place_bid(item, ALICE, Amount::from_units(10), None)
            .await
            .unwrap();
        assert_eq!(first.status, BidStatus::Active);
        assert_eq!(ledger.available(ALICE).unwrap(), Amount::from_units(90));

        let err = processor
            .place_bid(item, BOB, Amount::from_units(9), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PlaceBidError::BidTooLow { minimum } if minimum == Amount::from_units(11)
        ));

        let second = processor
            .place_bid(item, BOB, Amount::from_units(11), None)
            .await
            .unwrap();
        assert_eq!(second.status, BidStatus::Active);
        // Alice's hold is fully released the moment she is outbid.
        assert_eq!(ledger.available(ALICE).unwrap(), Amount::from_units(100));
        assert_eq!(ledger.available(BOB).unwrap(), Amount::from_units(89));

        let current = store.item(item).await.unwrap();
        assert_eq!(current.current_price, Amount::from_units(11));
        assert_eq!(current.total_bids, 2);

        // One placed event per bid, one outbid notification, all in order.
        let kinds: Vec<_> = std::iter::from_fn(|| events.try_recv().ok()).collect();
        assert_eq!(kinds.len(), 3);
        assert!(kinds.windows(2).all(|w| w[0].sequence < w[1].sequence));
        assert!(matches!(kinds[0].kind, EventKind::BidPlaced { bidder, .. } if bidder == ALICE));
        assert!(matches!(kinds[1].kind, EventKind::BidPlaced { bidder, .. } if bidder == BOB));
        assert!(matches!(
            kinds[2].kind,
            EventKind::BidOutbid { previous_bid, bidder } if previous_bid == first.id && bidder == ALICE
        ));
    }

    #[tokio::test]
    async fn first_bid_must_meet_the_starting_price() {
        let (processor, _, _, item) = processor();
        let err = processor
            .place_bid(item, ALICE, Amount::from_units(9), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PlaceBidError::BidTooLow { minimum } if minimum == Amount::from_units(10)
        ));
        // Exactly the starting price is fine for the opening bid.
        processor
            .place_bid(item, ALICE, Amount::from_units(10), None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn proxy_defends_at_one_increment_over_the_challenger() {
        let (processor, store, ledger, item) = processor();
        processor
            .place_bid(item, ALICE, Amount::from_units(10), Some(Amount::from_units(50)))
            .await
            .unwrap();

        let challenge = processor
            .place_bid(item, BOB, Amount::from_units(15), None)
            .await
            .unwrap();
        // Bob's bid is recorded but immediately outbid by Alice's proxy.
        assert_eq!(challenge.status, BidStatus::Outbid);
        assert_eq!(challenge.reservation, None);
        assert_eq!(ledger.available(BOB).unwrap(), Amount::from_units(100));

        let current = store.item(item).await.unwrap();
        assert_eq!(current.current_price, Amount::from_units(16));
        assert_eq!(current.total_bids, 2);
        // Alice's hold follows her effective amount, not her ceiling.
        assert_eq!(ledger.available(ALICE).unwrap(), Amount::from_units(84));
    }

    #[tokio::test]
    async fn stronger_proxy_overtakes_paying_one_increment_over_the_old_ceiling() {
        let (processor, store, ledger, item) = processor();
        let defender = processor
            .place_bid(item, ALICE, Amount::from_units(10), Some(Amount::from_units(20)))
            .await
            .unwrap();

        let winner = processor
            .place_bid(item, BOB, Amount::from_units(15), Some(Amount::from_units(30)))
            .await
            .unwrap();
        assert_eq!(winner.status, BidStatus::Active);
        assert_eq!(winner.amount, Amount::from_units(21));

        let state = store.entry(item).unwrap();
        let state = state.state.lock().await;
        let lost = state.bid(defender.id).unwrap();
        // The beaten proxy spent its whole budget before losing.
        assert_eq!(lost.status, BidStatus::Outbid);
        assert_eq!(lost.amount, Amount::from_units(20));
        assert_eq!(state.item.current_price, Amount::from_units(21));
        drop(state);

        assert_eq!(ledger.available(ALICE).unwrap(), Amount::from_units(100));
        // Bob's hold stays at his ceiling until the auction settles.
        assert_eq!(ledger.available(BOB).unwrap(), Amount::from_units(70));
    }

    #[tokio::test]
    async fn equal_ceilings_favor_the_earlier_bid() {
        let (processor, store, _, item) = processor();
        processor
            .place_bid(item, ALICE, Amount::from_units(10), Some(Amount::from_units(50)))
            .await
            .unwrap();
        let late = processor
            .place_bid(item, BOB, Amount::from_units(20), Some(Amount::from_units(50)))
            .await
            .unwrap();
        assert_eq!(late.status, BidStatus::Outbid);

        let state = store.entry(item).unwrap();
        let state = state.state.lock().await;
        assert_eq!(state.leader().unwrap().bidder, ALICE);
        assert_eq!(state.item.current_price, Amount::from_units(50));
    }

    #[tokio::test]
    async fn leaders_can_raise_their_own_bid_without_double_holds() {
        let (processor, store, ledger, item) = processor();
        processor
            .place_bid(item, ALICE, Amount::from_units(10), None)
            .await
            .unwrap();
        let mut events = processor.events.subscribe();

        let raised = processor
            .place_bid(item, ALICE, Amount::from_units(20), None)
            .await
            .unwrap();
        assert_eq!(raised.status, BidStatus::Active);
        // Only the new hold remains; the superseded one was folded into it.
        assert_eq!(ledger.available(ALICE).unwrap(), Amount::from_units(80));

        let state = store.entry(item).unwrap();
        let state = state.state.lock().await;
        assert_eq!(state.item.current_price, Amount::from_units(20));
        assert_eq!(state.leader().unwrap().id, raised.id);
        drop(state);

        // Nobody gets outbid by their own raise.
        let kinds: Vec<_> = std::iter::from_fn(|| events.try_recv().ok()).collect();
        assert!(kinds
            .iter()
            .all(|event| !matches!(event.kind, EventKind::BidOutbid { .. })));
    }

    #[tokio::test]
    async fn sellers_and_banned_bidders_are_rejected() {
        let (processor, _, ledger, item) = processor();
        let err = processor
            .place_bid(item, SELLER, Amount::from_units(10), None)
            .await
            .unwrap_err();
        assert!(matches!(err, PlaceBidError::SelfBidForbidden));

        ledger.register(BOB, Amount::from_units(100), true);
        let err = processor
            .place_bid(item, BOB, Amount::from_units(10), None)
            .await
            .unwrap_err();
        assert!(matches!(err, PlaceBidError::BidderBanned));
    }

    #[tokio::test]
    async fn rejected_bids_leave_no_trace() {
        let (processor, store, ledger, item) = processor();
        let err = processor
            .place_bid(item, ALICE, Amount::from_units(200), None)
            .await
            .unwrap_err();
        assert!(matches!(err, PlaceBidError::InsufficientBalance));

        let current = store.item(item).await.unwrap();
        assert_eq!(current.total_bids, 0);
        assert_eq!(current.current_price, Amount::from_units(10));
        assert_eq!(ledger.available(ALICE).unwrap(), Amount::from_units(100));
    }

    #[tokio::test]
    async fn inactive_auctions_reject_bids() {
        let mut draft = active_item();
        draft.status = AuctionStatus::Draft;
        let (processor, _, _, item) = processor_with(draft);
        let err = processor
            .place_bid(item, ALICE, Amount::from_units(10), None)
            .await
            .unwrap_err();
        assert!(matches!(err, PlaceBidError::AuctionNotActive));

        let mut expired = active_item();
        expired.end_time = Utc::now() - TimeDelta::seconds(1);
        let (processor, _, _, item) = processor_with(expired);
        let err = processor
            .place_bid(item, ALICE, Amount::from_units(10), None)
            .await
            .unwrap_err();
        assert!(matches!(err, PlaceBidError::AuctionNotActive));
    }

    #[tokio::test]
    async fn contended_items_report_busy() {
        let (mut processor, store, _, item) = processor();
        processor.lock_timeout = Duration::from_millis(10);
        let entry = store.entry(item).unwrap();
        let guard = entry.state.lock().await;
        let err = processor
            .place_bid(item, ALICE, Amount::from_units(10), None)
            .await
            .unwrap_err();
        assert!(matches!(err, PlaceBidError::Busy));
        drop(guard);
    }

    #[tokio::test]
    async fn late_bids_extend_the_deadline() {
        let mut item = active_item();
        item.end_time = Utc::now() + TimeDelta::seconds(10);
        let original_end = item.end_time;
        let (processor, store, _, id) = processor_with(item);
        let mut events = processor.events.subscribe();

        processor
            .place_bid(id, ALICE, Amount::from_units(10), None)
            .await
            .unwrap();

        let current = store.item(id).await.unwrap();
        assert!(current.end_time > original_end + TimeDelta::seconds(60));

        let kinds: Vec<_> = std::iter::from_fn(|| events.try_recv().ok()).collect();
        assert!(matches!(kinds[0].kind, EventKind::BidPlaced { .. }));
        assert!(matches!(
            kinds[1].kind,
            EventKind::AuctionExtended { new_end_time } if new_end_time == current.end_time
        ));
    }

    #[tokio::test]
    async fn collapsing_proxy_defense_hands_over_the_lead() {
        let (processor, store, ledger, item) = processor();
        let dave = UserId(5);
        ledger.register(dave, Amount::from_units(50), false);

        processor
            .place_bid(item, dave, Amount::from_units(10), Some(Amount::from_units(50)))
            .await
            .unwrap();
        // The first challenge trims Dave's hold to his effective 16.
        processor
            .place_bid(item, BOB, Amount::from_units(15), None)
            .await
            .unwrap();
        assert_eq!(ledger.available(dave).unwrap(), Amount::from_units(34));

        // Dave commits the rest of his funds elsewhere.
        ledger
            .reserve(dave, ItemId(99), BidId(999), Amount::from_units(34))
            .unwrap();

        // His proxy can no longer fund the next defense, so Carol leads at
        // her stated amount and his hold comes back.
        let challenger = processor
            .place_bid(item, CAROL, Amount::from_units(20), None)
            .await
            .unwrap();
        assert_eq!(challenger.status, BidStatus::Active);

        let current = store.item(item).await.unwrap();
        assert_eq!(current.current_price, Amount::from_units(20));
        assert_eq!(ledger.available(dave).unwrap(), Amount::from_units(16));
    }

    #[tokio::test]
    async fn buy_now_settles_the_auction_immediately() {
        let mut item = active_item();
        item.buy_now_price = Some(Amount::from_units(100));
        let (processor, store, ledger, id) = processor_with(item);

        processor
            .place_bid(id, ALICE, Amount::from_units(10), None)
            .await
            .unwrap();
        let mut events = processor.events.subscribe();

        let purchase = processor.buy_now(id, BOB).await.unwrap();
        assert_eq!(purchase.status, BidStatus::Won);
        assert_eq!(purchase.amount, Amount::from_units(100));

        let current = store.item(id).await.unwrap();
        assert_eq!(current.status, AuctionStatus::Sold);
        assert_eq!(current.winner, Some(BOB));
        assert_eq!(ledger.balance(BOB).unwrap(), Amount::ZERO);
        assert_eq!(ledger.available(ALICE).unwrap(), Amount::from_units(100));

        let kinds: Vec<_> = std::iter::from_fn(|| events.try_recv().ok())
            .map(|event| event.kind)
            .collect();
        assert!(matches!(kinds[0], EventKind::BidPlaced { bidder, .. } if bidder == BOB));
        assert!(matches!(kinds[1], EventKind::BidOutbid { .. }));
        assert!(matches!(kinds[2], EventKind::AuctionEnded));
        assert!(matches!(
            kinds[3],
            EventKind::AuctionSold { winner, amount }
                if winner == BOB && amount == Amount::from_units(100)
        ));

        // The auction is over; stragglers bounce.
        let err = processor
            .place_bid(id, CAROL, Amount::from_units(150), None)
            .await
            .unwrap_err();
        assert!(matches!(err, PlaceBidError::AuctionNotActive));
    }

    #[tokio::test]
    async fn buy_now_is_unavailable_once_bidding_reaches_it() {
        let mut item = active_item();
        item.buy_now_price = Some(Amount::from_units(20));
        let (processor, _, _, id) = processor_with(item);

        processor
            .place_bid(id, ALICE, Amount::from_units(20), None)
            .await
            .unwrap();
        let err = processor.buy_now(id, BOB).await.unwrap_err();
        assert!(matches!(err, PlaceBidError::BuyNowUnavailable));
    }

    #[tokio::test]
    async fn buy_now_requires_the_seller_to_offer_it() {
        let (processor, _, _, item) = processor();
        let err = processor.buy_now(item, ALICE).await.unwrap_err();
        assert!(matches!(err, PlaceBidError::BuyNowUnavailable));
    }

    #[tokio::test]
    async fn cancellation_is_seller_only_and_pre_bid_only() {
        let (processor, store, _, item) = processor();
        let mut events = processor.events.subscribe();

        assert!(matches!(
            processor.cancel(item, ALICE).await.unwrap_err(),
            CancelError::Forbidden
        ));
        assert!(matches!(
            processor.cancel(ItemId(404), SELLER).await.unwrap_err(),
            CancelError::NotFound
        ));

        processor.cancel(item, SELLER).await.unwrap();
        let current = store.item(item).await.unwrap();
        assert_eq!(current.status, AuctionStatus::Cancelled);
        assert_eq!(
            events.try_recv().unwrap().kind,
            EventKind::AuctionCancelled
        );
    }

    #[tokio::test]
    async fn cancellation_is_refused_after_the_first_bid() {
        let (processor, store, _, item) = processor();
        processor
            .place_bid(item, ALICE, Amount::from_units(10), None)
            .await
            .unwrap();
        assert!(matches!(
            processor.cancel(item, SELLER).await.unwrap_err(),
            CancelError::Forbidden
        ));
        let current = store.item(item).await.unwrap();
        assert_eq!(current.status, AuctionStatus::Active);
    }

    #[tokio::test]
    async fn snapshots_expose_price_and_leader_but_no_ceilings() {
        let (processor, _, _, item) = processor();
        processor
            .place_bid(item, ALICE, Amount::from_units(10), Some(Amount::from_units(50)))
            .await
            .unwrap();

        let snapshot = processor.snapshot(item).await.unwrap();
        assert_eq!(snapshot.current_price, Amount::from_units(10));
        assert_eq!(snapshot.leader, Some(ALICE));
        assert_eq!(snapshot.total_bids, 1);
        assert!(snapshot.time_left_seconds > 0);

        let json = serde_json::to_value(&snapshot).unwrap();
        assert!(json.get("max_bid").is_none());
        assert_eq!(json["status"], "active");

        assert!(processor.snapshot(ItemId(404)).await.is_none());
    }
}
