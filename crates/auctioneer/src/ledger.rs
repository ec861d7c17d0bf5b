use {
    anyhow::{Context, Result, bail},
    dashmap::DashMap,
    model::{Amount, BidId, ItemId, Reservation, ReservationId, ReservationState, UserId},
    std::{
        collections::HashMap,
        sync::{
            Arc, Mutex,
            atomic::{AtomicI64, Ordering},
        },
    },
    thiserror::Error,
};

#[derive(Debug, Error, Eq, PartialEq)]
pub enum ReserveError {
    #[error("insufficient balance")]
    InsufficientBalance,
    #[error("unknown account")]
    UnknownAccount,
    #[error("reservation is no longer held")]
    NotHeld,
}

/// Per-user balances and the reservations held against them.
///
/// Every operation on one user's account runs under that account's mutex, so
/// a user's `reserve`/`release`/`capture` calls never interleave. The
/// critical sections are synchronous and short; callers hold at most one
/// account lock at a time, and acquire it only after the item lock, keeping
/// the lock order acyclic.
#[derive(Default)]
pub struct Ledger {
    accounts: DashMap<UserId, Arc<Mutex<Account>>>,
    /// Routes a reservation id back to the account holding it.
    owners: DashMap<ReservationId, UserId>,
    next_reservation_id: AtomicI64,
}

#[derive(Default)]
struct Account {
    balance: Amount,
    banned: bool,
    reservations: HashMap<ReservationId, Reservation>,
}

impl Account {
    fn held(&self) -> Amount {
        self.reservations
            .values()
            .filter(|reservation| reservation.state == ReservationState::Held)
            .map(|reservation| reservation.amount)
            .sum()
    }

    fn available(&self) -> Amount {
        // Holds are only admitted up to the balance, so this never goes
        // below zero.
        self.balance - self.held()
    }
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an account with its canonical balance as maintained by the
    /// accounts collaborator. Re-registering updates the banned flag only.
    pub fn register(&self, user: UserId, opening_balance: Amount, banned: bool) {
        let account = self
            .accounts
            .entry(user)
            .or_insert_with(|| {
                Arc::new(Mutex::new(Account {
                    balance: opening_balance,
                    banned,
                    reservations: HashMap::new(),
                }))
            })
            .clone();
        account.lock().unwrap().banned = banned;
    }

    pub fn deposit(&self, user: UserId, amount: Amount) -> Result<()> {
        let account = self.account(user).context("deposit for unknown account")?;
        let mut account = account.lock().unwrap();
        account.balance = account
            .balance
            .checked_add(amount)
            .context("balance overflow")?;
        Ok(())
    }

    pub fn is_banned(&self, user: UserId) -> bool {
        self.account(user)
            .is_some_and(|account| account.lock().unwrap().banned)
    }

    /// `balance − Σ held reservations`, the amount new holds may draw from.
    pub fn available(&self, user: UserId) -> Option<Amount> {
        self.account(user)
            .map(|account| account.lock().unwrap().available())
    }

    /// The stored balance, ignoring holds.
    pub fn balance(&self, user: UserId) -> Option<Amount> {
        self.account(user)
            .map(|account| account.lock().unwrap().balance)
    }

    pub fn reservation(&self, id: ReservationId) -> Option<Reservation> {
        let user = *self.owners.get(&id)?;
        let account = self.account(user)?;
        let account = account.lock().unwrap();
        account.reservations.get(&id).cloned()
    }

    /// Places a hold of `amount` for the given bid, failing atomically if
    /// the user's available balance does not cover it.
    pub fn reserve(
        &self,
        user: UserId,
        item: ItemId,
        bid: BidId,
        amount: Amount,
    ) -> Result<ReservationId, ReserveError> {
        self.reserve_replacing(user, None, item, bid, amount)
    }

    /// Like [`Self::reserve`], but atomically releases the user's own prior
    /// hold (their previous bid on the same item) first, so its funds count
    /// towards the new hold. On failure nothing changes, the prior hold
    /// included.
    pub fn reserve_replacing(
        &self,
        user: UserId,
        replace: Option<ReservationId>,
        item: ItemId,
        bid: BidId,
        amount: Amount,
    ) -> Result<ReservationId, ReserveError> {
        let account = self.account(user).ok_or(ReserveError::UnknownAccount)?;
        let mut account = account.lock().unwrap();

        let reusable = replace
            .and_then(|id| account.reservations.get(&id))
            .filter(|reservation| reservation.state == ReservationState::Held)
            .map(|reservation| reservation.amount)
            .unwrap_or(Amount::ZERO);
        if account.available() + reusable < amount {
            return Err(ReserveError::InsufficientBalance);
        }

        if let Some(previous) = replace.and_then(|id| account.reservations.get_mut(&id)) {
            if previous.state == ReservationState::Held {
                previous.state = ReservationState::Released;
            }
        }

        let id = ReservationId(self.next_reservation_id.fetch_add(1, Ordering::SeqCst) + 1);
        account.reservations.insert(
            id,
            Reservation {
                id,
                user,
                item,
                bid,
                amount,
                state: ReservationState::Held,
            },
        );
        drop(account);
        self.owners.insert(id, user);
        tracing::debug!(%user, %item, %bid, reservation = %id, %amount, "reserved funds");
        Ok(id)
    }

    /// Changes the held amount of a live reservation, e.g. when a proxy bid
    /// is auto-raised or the leader's hold is trimmed to their actual bid.
    /// Raising fails if the extra funds are not available; lowering always
    /// succeeds.
    pub fn adjust(&self, id: ReservationId, amount: Amount) -> Result<(), ReserveError> {
        let user = *self.owners.get(&id).ok_or(ReserveError::UnknownAccount)?;
        let account = self.account(user).ok_or(ReserveError::UnknownAccount)?;
        let mut account = account.lock().unwrap();

        let available = account.available();
        let reservation = account
            .reservations
            .get_mut(&id)
            .ok_or(ReserveError::UnknownAccount)?;
        if reservation.state != ReservationState::Held {
            return Err(ReserveError::NotHeld);
        }
        if amount > reservation.amount && available < amount - reservation.amount {
            return Err(ReserveError::InsufficientBalance);
        }
        tracing::debug!(
            %user,
            reservation = %id,
            from = %reservation.amount,
            to = %amount,
            "adjusted hold",
        );
        reservation.amount = amount;
        Ok(())
    }

    /// Releases a hold back to the user. Idempotent: releasing a reservation
    /// that already reached a terminal state is a no-op, which defends
    /// against duplicate event delivery.
    pub fn release(&self, id: ReservationId) -> Result<()> {
        self.with_owner(id, |account, user| {
            let reservation = account
                .reservations
                .get_mut(&id)
                .context("reservation missing from owning account")?;
            match reservation.state {
                ReservationState::Held => {
                    reservation.state = ReservationState::Released;
                    tracing::debug!(%user, reservation = %id, "released hold");
                }
                ReservationState::Released => {
                    tracing::debug!(reservation = %id, "duplicate release ignored");
                }
                ReservationState::Captured => {
                    tracing::warn!(reservation = %id, "release of captured hold ignored");
                }
            }
            Ok(())
        })
    }

    /// Captures a hold: the held amount is debited from the user's balance
    /// for good. Idempotent like [`Self::release`].
    pub fn capture(&self, id: ReservationId) -> Result<()> {
        self.with_owner(id, |account, user| {
            let reservation = account
                .reservations
                .get(&id)
                .context("reservation missing from owning account")?;
            match reservation.state {
                ReservationState::Held => {
                    let amount = reservation.amount;
                    let remaining = account
                        .balance
                        .checked_sub(amount)
                        .context("balance underflow")?;
                    if remaining < Amount::ZERO {
                        // Holds are admitted against the balance, so hitting
                        // this means the serialization discipline is broken.
                        bail!("capturing {amount} would overdraw account {user}");
                    }
                    account.balance = remaining;
                    account
                        .reservations
                        .get_mut(&id)
                        .context("reservation missing from owning account")?
                        .state = ReservationState::Captured;
                    tracing::debug!(%user, reservation = %id, %amount, "captured hold");
                }
                ReservationState::Captured => {
                    tracing::debug!(reservation = %id, "duplicate capture ignored");
                }
                ReservationState::Released => {
                    tracing::warn!(reservation = %id, "capture of released hold ignored");
                }
            }
            Ok(())
        })
    }

    fn account(&self, user: UserId) -> Option<Arc<Mutex<Account>>> {
        self.accounts.get(&user).map(|account| account.clone())
    }

    /// Runs `f` under the mutex of the account owning reservation `id`.
    fn with_owner<T>(
        &self,
        id: ReservationId,
        f: impl FnOnce(&mut Account, UserId) -> Result<T>,
    ) -> Result<T> {
        let user = *self
            .owners
            .get(&id)
            .with_context(|| format!("unknown reservation {id}"))?;
        let account = self
            .account(user)
            .with_context(|| format!("unknown account {user}"))?;
        let mut account = account.lock().unwrap();
        f(&mut account, user)
    }
}
