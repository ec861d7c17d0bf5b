use {
    chrono::{DateTime, Utc},
    model::AuctionItem,
};

/// Anti-snipe extension policy, evaluated after every successfully applied
/// bid: a bid landing within `extension_window` of the deadline grants a
/// fresh `extension_amount` of runway from the bid moment (not a cumulative
/// addition). There is no cap on repeated extensions.
pub fn extended_end_time(item: &AuctionItem, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    (item.end_time - now < item.extension_window).then(|| now + item.extension_amount)
}
