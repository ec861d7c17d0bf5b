use serde::{Deserialize, Serialize};

macro_rules! id_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Clone,
            Copy,
            Debug,
            Default,
            Eq,
            PartialEq,
            Ord,
            PartialOrd,
            Hash,
            Serialize,
            Deserialize,
            derive_more::Display,
            derive_more::From,
        )]
        #[serde(transparent)]
        #[display("{_0}")]
        pub struct $name(pub i64);
    };
}

id_type! {
    /// Identity of a user account, assigned by the accounts collaborator.
    UserId
}

id_type! {
    /// Identity of an auction item.
    ItemId
}

id_type! {
    /// Identity of a single bid on an item.
    BidId
}

id_type! {
    /// Identity of a balance reservation held by the ledger.
    ReservationId
}
