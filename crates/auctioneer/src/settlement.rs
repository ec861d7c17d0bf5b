use {
    crate::{events::EventEmitter, ledger::Ledger, lifecycle, store::ItemState},
    anyhow::{Context, Result, anyhow, ensure},
    model::{AuctionStatus, BidStatus, EventKind},
};

/// Settles a claimed auction: picks the winner if the reserve is met,
/// captures the winning hold, releases everything else and marks the item
/// `sold` or `unsold`.
///
/// Runs exactly once per item because it is only invoked directly after a
/// successful claim (see [`crate::lifecycle::claim_ended`]), while the
/// per-item lock is still held.
pub fn settle(state: &mut ItemState, ledger: &Ledger, events: &EventEmitter) -> Result<()> {
    ensure!(
        state.item.status == AuctionStatus::Ended,
        "settlement requires a claimed item, got {} for item {}",
        state.item.status,
        state.item.id,
    );

    let winner = state
        .leader()
        .filter(|_| state.item.reserve_met())
        .map(|bid| bid.id);

    match winner {
        Some(winning_bid) => {
            let (bidder, amount, reservation) = {
                let bid = state.bid(winning_bid).context("winning bid vanished")?;
                (bid.bidder, bid.amount, bid.reservation)
            };
            let reservation = reservation.context("winning bid has no backing hold")?;
            // The winner's hold may still be at their proxy ceiling; they
            // only pay what bidding actually reached.
            ledger
                .adjust(reservation, amount)
                .map_err(|err| anyhow!("trimming winning hold failed: {err}"))?;
            ledger.capture(reservation)?;

            for bid in &mut state.bids {
                if bid.id == winning_bid {
                    bid.status = BidStatus::Won;
                    bid.reservation = None;
                } else {
                    if let Some(hold) = bid.reservation.take() {
                        ledger.release(hold)?;
                    }
                    bid.status = BidStatus::Lost;
                }
            }

            state.item.winner = Some(bidder);
            state.item.winning_bid = Some(winning_bid);
            lifecycle::transition(&mut state.item, AuctionStatus::Sold)?;
            tracing::info!(
                item = %state.item.id,
                %bidder,
                %amount,
                "auction settled as sold",
            );
            let event = state.next_event(EventKind::AuctionSold {
                winner: bidder,
                amount,
            });
            events.publish(event);
        }
        None => {
            // No bids, or the reserve was not met: every hold goes back.
            for bid in &mut state.bids {
                if let Some(hold) = bid.reservation.take() {
                    ledger.release(hold)?;
                }
                bid.status = BidStatus::Lost;
            }
            lifecycle::transition(&mut state.item, AuctionStatus::Unsold)?;
            tracing::info!(item = %state.item.id, "auction settled as unsold");
            let event = state.next_event(EventKind::AuctionUnsold);
            events.publish(event);
        }
    }
    Ok(())
}
