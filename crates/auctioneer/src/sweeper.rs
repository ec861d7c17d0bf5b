use {
    crate::{events::EventEmitter, ledger::Ledger, lifecycle, settlement, store::Store},
    chrono::{DateTime, Utc},
    model::EventKind,
    std::{future::Future, sync::Arc, time::Duration},
};

/// Background maintenance of the auction lifecycle: activates drafts whose
/// start time has arrived and closes auctions whose deadline has passed.
///
/// Closing is claim-based. The sweeper takes the per-item lock, performs the
/// `active → ended` transition and settles while still holding the lock, so
/// even overlapping sweeps settle every auction exactly once and no bid can
/// slip in after the claim.
pub struct Sweeper {
    store: Arc<Store>,
    ledger: Arc<Ledger>,
    events: EventEmitter,
    interval: Duration,
}

impl Sweeper {
    pub fn new(
        store: Arc<Store>,
        ledger: Arc<Ledger>,
        events: EventEmitter,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            ledger,
            events,
            interval,
        }
    }

    /// Sweeps on a fixed cadence until `shutdown` resolves.
    pub async fn run_forever(self, shutdown: impl Future<Output = ()>) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = interval.tick() => self.sweep_once(Utc::now()).await,
                _ = &mut shutdown => {
                    tracing::info!("sweeper stopped");
                    return;
                }
            }
        }
    }

    /// One pass over all items. Safe to run at any time and concurrently
    /// with bidding; anything that cannot be handled right now is picked up
    /// by a later sweep.
    pub async fn sweep_once(&self, now: DateTime<Utc>) {
        let _timer = observe::metrics::elapsed_on_drop(|elapsed| {
            metrics().sweep_time.observe(elapsed);
        });
        for id in self.store.item_ids() {
            let Some(entry) = self.store.entry(id) else {
                continue;
            };
            // A bid in flight holds the lock only briefly; deferring the
            // item to the next tick is cheaper than queueing behind it.
            let Ok(mut state) = entry.state.try_lock() else {
                continue;
            };

            if lifecycle::activate(&mut state.item, now) {
                metrics().activated.inc();
                tracing::info!(item = %id, "auction activated");
            }

            if lifecycle::claim_ended(&mut state.item, now) {
                metrics().closed.inc();
                let event = state.next_event(EventKind::AuctionEnded);
                self.events.publish(event);
                if let Err(err) = settlement::settle(&mut state, &self.ledger, &self.events) {
                    // The claim went through, so the item stays in `ended`
                    // and an operator has to look at it.
                    metrics().settlement_errors.inc();
                    tracing::error!(item = %id, ?err, "settlement failed");
                }
            }
        }
    }
}

#[derive(prometheus_metric_storage::MetricStorage, Clone, Debug)]
#[metric(subsystem = "sweeper")]
struct Metrics {
    /// Auctions moved from draft to active.
    activated: prometheus::IntCounter,

    /// Auctions claimed for closing.
    closed: prometheus::IntCounter,

    /// Claimed auctions whose settlement failed.
    settlement_errors: prometheus::IntCounter,

    /// Wall time of a full sweep pass in seconds.
    #[metric(buckets(0.001, 0.01, 0.1, 1, 10))]
    sweep_time: prometheus::Histogram,
}

fn metrics() -> &'static Metrics {
    Metrics::instance(observe::metrics::get_storage_registry()).unwrap()
}
