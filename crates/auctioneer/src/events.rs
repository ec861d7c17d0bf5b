use {model::AuctionEvent, tokio::sync::broadcast};

/// Publishes domain events to the notification and listing collaborators.
///
/// Events are fanned out over a broadcast channel; sequence numbers are
/// allocated per item by [`crate::store::ItemState::next_event`] under the
/// item lock, so subscribers can order and deduplicate per item. Nobody
/// listening is fine, events are then only traced.
#[derive(Clone)]
pub struct EventEmitter {
    sender: broadcast::Sender<AuctionEvent>,
}

impl EventEmitter {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuctionEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: AuctionEvent) {
        tracing::debug!(
            item = %event.item,
            sequence = event.sequence,
            kind = ?event.kind,
            "publishing event",
        );
        let _ = self.sender.send(event);
    }
}
