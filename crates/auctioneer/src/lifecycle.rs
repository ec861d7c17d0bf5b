use {
    anyhow::{Result, ensure},
    chrono::{DateTime, Utc},
    model::{AuctionItem, AuctionStatus},
};

/// Applies a status transition, rejecting anything the state machine does
/// not allow. Callers must hold the per-item lock.
pub fn transition(item: &mut AuctionItem, next: AuctionStatus) -> Result<()> {
    ensure!(
        item.status.can_transition_to(next),
        "illegal transition {} -> {next} for item {}",
        item.status,
        item.id,
    );
    tracing::debug!(item = %item.id, from = %item.status, to = %next, "status transition");
    item.status = next;
    Ok(())
}

/// Moves a draft item to `active` once its start time has arrived.
pub fn activate(item: &mut AuctionItem, now: DateTime<Utc>) -> bool {
    if item.status != AuctionStatus::Draft || now < item.start_time {
        return false;
    }
    // Can't fail: draft -> active is always legal.
    transition(item, AuctionStatus::Active).is_ok()
}

/// The closing claim: atomically moves `active → ended` once the deadline
/// has passed. Under the per-item lock the check-and-set is atomic, so of
/// any number of racing sweep workers exactly one observes `true`; everyone
/// else no-ops.
pub fn claim_ended(item: &mut AuctionItem, now: DateTime<Utc>) -> bool {
    if item.status != AuctionStatus::Active {
        // Expected under concurrent sweepers: someone else already claimed.
        tracing::debug!(item = %item.id, status = %item.status, "claim lost, item not active");
        return false;
    }
    if now < item.end_time {
        return false;
    }
    transition(item, AuctionStatus::Ended).is_ok()
}

/// Cancels an auction. Only permitted pre-bid; seller policy beyond the
/// zero-bids guard is enforced by the caller.
pub fn cancel(item: &mut AuctionItem) -> bool {
    if item.total_bids > 0 {
        return false;
    }
    if !matches!(item.status, AuctionStatus::Draft | AuctionStatus::Active) {
        return false;
    }
    transition(item, AuctionStatus::Cancelled).is_ok()
}
