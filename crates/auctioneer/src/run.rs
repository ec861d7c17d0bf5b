use {
    crate::{
        arguments::Arguments,
        events::EventEmitter,
        ledger::Ledger,
        processor::BidProcessor,
        shutdown_controller::ShutdownController,
        store::Store,
        sweeper::Sweeper,
    },
    std::sync::Arc,
};

/// All engine collaborators wired together over one store, one ledger and
/// one event channel.
pub struct Engine {
    pub store: Arc<Store>,
    pub ledger: Arc<Ledger>,
    pub events: EventEmitter,
    pub processor: BidProcessor,
    pub sweeper: Sweeper,
}

impl Engine {
    pub fn new(args: &Arguments) -> Self {
        let store = Arc::new(Store::new());
        let ledger = Arc::new(Ledger::new());
        let events = EventEmitter::new(args.event_buffer_size);
        let processor = BidProcessor::new(
            store.clone(),
            ledger.clone(),
            events.clone(),
            args.bid_lock_timeout,
        );
        let sweeper = Sweeper::new(
            store.clone(),
            ledger.clone(),
            events.clone(),
            args.sweep_interval,
        );
        Self {
            store,
            ledger,
            events,
            processor,
            sweeper,
        }
    }
}

/// Entry point of the engine process: assembles the collaborators and drives
/// the closing sweeper until the process is asked to shut down. Bid traffic
/// arrives through [`Engine::processor`] handles held by the serving layer.
pub async fn run(args: Arguments) {
    let engine = Engine::new(&args);
    let shutdown = ShutdownController::new_shutdown_on_signal();
    engine.sweeper.run_forever(shutdown.wait()).await;
}

#[cfg(test)]
mod tests {
    use {super::*, clap::Parser, std::time::Duration};

    #[tokio::test]
    async fn sweeper_stops_on_manual_shutdown() {
        let args = Arguments::parse_from(["auctioneer", "--sweep-interval", "10ms"]);
        let engine = Engine::new(&args);
        let (signal, controller) = ShutdownController::new_manual_shutdown();
        let running = tokio::spawn(engine.sweeper.run_forever(controller.wait()));
        tokio::time::sleep(Duration::from_millis(50)).await;
        signal.shutdown();
        tokio::time::timeout(Duration::from_secs(1), running)
            .await
            .expect("sweeper did not stop")
            .unwrap();
    }
}
