// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Wager settlement.
//!
//! The [`Settlement`] service is the only writer of account balances. Each
//! operation is one logical transaction:
//!
//! 1. Return the recorded result if the request id was already settled.
//! 2. Read the account and validate the request against its balance.
//! 3. For spins, draw an outcome from server-side entropy.
//! 4. Commit the ledger entry and the new balance together.
//!
//! # Concurrency
//!
//! Operations for the same user are serialized by a per-user mutex held for
//! the whole sequence. Commits are additionally guarded by the account
//! version, so a writer outside this process surfaces as a conflict; the
//! sequence is then re-run from a fresh read up to `max_attempts` times.
//! Different users never contend.

use crate::account::AccountSnapshot;
use crate::base::{EntryId, RequestId, UserId};
use crate::config::Config;
use crate::error::{SettlementError, StoreError};
use crate::fairness::SampleSource;
use crate::ledger::{EntryKind, LedgerEntry, SpinRecord};
use crate::outcome::OutcomeTable;
use crate::store::{Commit, Store};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of a settled spin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SpinReceipt {
    pub entry_id: EntryId,
    pub segment: usize,
    pub stake: Decimal,
    pub payout: Decimal,
    pub new_balance: Decimal,
    pub nonce: Option<u64>,
    /// `true` when the request id had already been settled and this is the
    /// recorded result.
    pub replayed: bool,
}

impl SpinReceipt {
    fn from_entry(entry: &LedgerEntry, replayed: bool) -> Result<Self, SettlementError> {
        match (entry.kind.is_spin(), entry.spin) {
            (true, Some(spin)) => Ok(Self {
                entry_id: entry.entry_id,
                segment: spin.segment,
                stake: spin.stake,
                payout: spin.payout,
                new_balance: entry.resulting_balance,
                nonce: spin.nonce,
                replayed,
            }),
            _ => Err(SettlementError::RequestConflict),
        }
    }
}

/// Result of a settled deposit or withdrawal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BalanceReceipt {
    pub entry_id: EntryId,
    /// Signed balance change.
    pub amount: Decimal,
    pub new_balance: Decimal,
    pub replayed: bool,
}

impl BalanceReceipt {
    fn from_entry(
        entry: &LedgerEntry,
        kind: EntryKind,
        replayed: bool,
    ) -> Result<Self, SettlementError> {
        if entry.kind != kind {
            return Err(SettlementError::RequestConflict);
        }
        Ok(Self {
            entry_id: entry.entry_id,
            amount: entry.amount,
            new_balance: entry.resulting_balance,
            replayed,
        })
    }
}

/// Live balance compared with the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Reconciliation {
    pub user_id: UserId,
    pub account_balance: Decimal,
    pub ledger_balance: Decimal,
    pub entries: usize,
}

impl Reconciliation {
    pub fn is_consistent(&self) -> bool {
        self.account_balance == self.ledger_balance
    }

    /// `account_balance - ledger_balance`.
    pub fn drift(&self) -> Decimal {
        self.account_balance - self.ledger_balance
    }
}

/// Stake limits for a spin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BetLimits {
    pub min_bet: Decimal,
    pub max_bet: Decimal,
}

impl BetLimits {
    pub fn allows(&self, stake: Decimal) -> bool {
        stake > Decimal::ZERO && stake >= self.min_bet && stake <= self.max_bet
    }
}

impl Default for BetLimits {
    fn default() -> Self {
        Self {
            min_bet: dec!(1),
            max_bet: dec!(100),
        }
    }
}

/// Settlement service over a [`Store`] and a [`SampleSource`].
pub struct Settlement<S, R> {
    store: S,
    sampler: R,
    table: RwLock<Arc<OutcomeTable>>,
    limits: BetLimits,
    max_attempts: u32,
    /// Per-user serialization guards, created on first use.
    user_locks: DashMap<UserId, Arc<Mutex<()>>>,
}

impl<S: Store, R: SampleSource> Settlement<S, R> {
    /// Creates a service with the standard wheel, default bet limits and
    /// three commit attempts.
    pub fn new(store: S, sampler: R) -> Self {
        Self {
            store,
            sampler,
            table: RwLock::new(Arc::new(OutcomeTable::standard_wheel())),
            limits: BetLimits::default(),
            max_attempts: 3,
            user_locks: DashMap::new(),
        }
    }

    /// Creates a service from loaded configuration.
    pub fn with_config(store: S, sampler: R, config: &Config) -> Self {
        Self {
            table: RwLock::new(Arc::new(config.game.outcomes.clone())),
            limits: BetLimits {
                min_bet: config.game.min_bet,
                max_bet: config.game.max_bet,
            },
            max_attempts: config.settlement.max_attempts.max(1),
            ..Self::new(store, sampler)
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn limits(&self) -> BetLimits {
        self.limits
    }

    /// Current outcome table.
    pub fn outcome_table(&self) -> Arc<OutcomeTable> {
        Arc::clone(&self.table.read())
    }

    /// Replaces the outcome table. Spins already in progress finish with
    /// the table they started with.
    pub fn reconfigure(&self, table: OutcomeTable) {
        info!(segments = table.len(), "outcome table replaced");
        *self.table.write() = Arc::new(table);
    }

    /// Registers a user with a zero balance.
    pub fn open_account(&self, user_id: UserId) -> Result<AccountSnapshot, SettlementError> {
        let account = self.store.open_account(user_id)?;
        info!(user = %user_id, "account opened");
        Ok(account)
    }

    /// Deactivates an account. Its balance and ledger are kept.
    pub fn deactivate(&self, user_id: UserId) -> Result<AccountSnapshot, SettlementError> {
        let lock = self.user_lock(user_id);
        let _guard = lock.lock();
        let account = self.store.deactivate(user_id)?;
        info!(user = %user_id, "account deactivated");
        Ok(account)
    }

    pub fn account(&self, user_id: UserId) -> Result<AccountSnapshot, SettlementError> {
        self.store
            .account(user_id)?
            .ok_or(SettlementError::UserNotFound)
    }

    pub fn balance(&self, user_id: UserId) -> Result<Decimal, SettlementError> {
        Ok(self.account(user_id)?.balance)
    }

    /// Spins the wheel for `stake`.
    ///
    /// # Errors
    ///
    /// - [`SettlementError::InvalidStake`] - stake non-positive or outside the bet limits.
    /// - [`SettlementError::UserNotFound`] - no account.
    /// - [`SettlementError::AccountDeactivated`] - account closed.
    /// - [`SettlementError::InsufficientFunds`] - stake exceeds balance; nothing changes.
    /// - [`SettlementError::RequestConflict`] - request id used by a non-spin entry.
    /// - [`SettlementError::SettlementFailed`] - version conflicts outlasted the retry bound.
    ///
    /// A request id that was already settled returns the recorded receipt
    /// with `replayed` set; no new draw is made.
    pub fn spin(
        &self,
        user_id: UserId,
        stake: Decimal,
        request_id: impl Into<RequestId>,
    ) -> Result<SpinReceipt, SettlementError> {
        let request_id = request_id.into();
        if !self.limits.allows(stake) {
            return Err(SettlementError::InvalidStake);
        }
        let table = self.outcome_table();

        let (entry, replayed) = self.settle(user_id, &request_id, |account| {
            if stake > account.balance {
                return Err(SettlementError::InsufficientFunds);
            }
            let drawn = self.sampler.next_sample();
            let outcome = table.draw(drawn.sample);
            let new_balance = account
                .balance
                .checked_sub(stake)
                .and_then(|balance| balance.checked_add(outcome.payout))
                .ok_or(SettlementError::InvalidAmount)?;
            if new_balance < Decimal::ZERO {
                return Err(SettlementError::InsufficientFunds);
            }
            let kind = if outcome.payout > Decimal::ZERO {
                EntryKind::Win
            } else {
                EntryKind::Loss
            };
            Ok(Commit {
                user_id,
                expected_version: account.version,
                kind,
                amount: outcome.payout - stake,
                request_id: request_id.clone(),
                spin: Some(SpinRecord {
                    stake,
                    payout: outcome.payout,
                    segment: outcome.segment,
                    nonce: drawn.nonce,
                }),
            })
        })?;

        SpinReceipt::from_entry(&entry, replayed)
    }

    /// Credits a confirmed gateway deposit.
    ///
    /// Idempotent on `gateway_ref`: a repeated confirmation returns the
    /// recorded receipt and leaves the balance alone.
    pub fn credit_deposit(
        &self,
        user_id: UserId,
        amount: Decimal,
        gateway_ref: impl Into<RequestId>,
    ) -> Result<BalanceReceipt, SettlementError> {
        let gateway_ref = gateway_ref.into();
        if amount <= Decimal::ZERO {
            return Err(SettlementError::InvalidAmount);
        }

        let (entry, replayed) = self.settle(user_id, &gateway_ref, |account| {
            Ok(Commit {
                user_id,
                expected_version: account.version,
                kind: EntryKind::Deposit,
                amount,
                request_id: gateway_ref.clone(),
                spin: None,
            })
        })?;

        if !replayed {
            info!(user = %user_id, %amount, reference = %gateway_ref, "deposit credited");
        }
        BalanceReceipt::from_entry(&entry, EntryKind::Deposit, replayed)
    }

    /// Debits a cash-out. Idempotent on `request_id`.
    pub fn withdraw(
        &self,
        user_id: UserId,
        amount: Decimal,
        request_id: impl Into<RequestId>,
    ) -> Result<BalanceReceipt, SettlementError> {
        let request_id = request_id.into();
        if amount <= Decimal::ZERO {
            return Err(SettlementError::InvalidAmount);
        }

        let (entry, replayed) = self.settle(user_id, &request_id, |account| {
            if amount > account.balance {
                return Err(SettlementError::InsufficientFunds);
            }
            Ok(Commit {
                user_id,
                expected_version: account.version,
                kind: EntryKind::Withdrawal,
                amount: -amount,
                request_id: request_id.clone(),
                spin: None,
            })
        })?;

        BalanceReceipt::from_entry(&entry, EntryKind::Withdrawal, replayed)
    }

    /// Compares the live balance with the ledger.
    pub fn audit(&self, user_id: UserId) -> Result<Reconciliation, SettlementError> {
        let account = self.account(user_id)?;
        let entries = self.store.entries_for(user_id)?;
        let report = Reconciliation {
            user_id,
            account_balance: account.balance,
            ledger_balance: entries.iter().map(|entry| entry.amount).sum(),
            entries: entries.len(),
        };
        if !report.is_consistent() {
            warn!(user = %user_id, drift = %report.drift(), "ledger drift detected");
        }
        Ok(report)
    }

    pub fn entries_for(&self, user_id: UserId) -> Result<Vec<LedgerEntry>, SettlementError> {
        Ok(self.store.entries_for(user_id)?)
    }

    fn user_lock(&self, user_id: UserId) -> Arc<Mutex<()>> {
        Arc::clone(self.user_locks.entry(user_id).or_default().value())
    }

    /// Runs one settlement under the user's lock with bounded retry.
    ///
    /// `prepare` receives a fresh account snapshot on every attempt. Returns
    /// the committed entry and whether it was a replay of an earlier request.
    fn settle<F>(
        &self,
        user_id: UserId,
        request_id: &RequestId,
        mut prepare: F,
    ) -> Result<(LedgerEntry, bool), SettlementError>
    where
        F: FnMut(&AccountSnapshot) -> Result<Commit, SettlementError>,
    {
        let lock = self.user_lock(user_id);
        let _guard = lock.lock();

        for attempt in 1..=self.max_attempts {
            if let Some(entry) = self.store.find_entry(user_id, request_id)? {
                debug!(user = %user_id, request = %request_id, "replaying settled request");
                return Ok((entry, true));
            }

            let account = self
                .store
                .account(user_id)?
                .ok_or(SettlementError::UserNotFound)?;
            if !account.active {
                return Err(SettlementError::AccountDeactivated);
            }

            let commit = prepare(&account)?;
            match self.store.commit(commit) {
                Ok(entry) => return Ok((entry, false)),
                Err(StoreError::DuplicateRequest(entry)) => return Ok((*entry, true)),
                Err(StoreError::Conflict) => {
                    debug!(user = %user_id, request = %request_id, attempt, "version conflict");
                }
                Err(other) => return Err(other.into()),
            }
        }

        warn!(
            user = %user_id,
            request = %request_id,
            attempts = self.max_attempts,
            "settlement abandoned after repeated conflicts"
        );
        Err(SettlementError::SettlementFailed {
            attempts: self.max_attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fairness::SourcedSample;
    use crate::outcome::{Sample, Segment};
    use crate::store::MemoryStore;

    /// Always returns the same sample.
    struct Fixed(f64);

    impl SampleSource for Fixed {
        fn next_sample(&self) -> SourcedSample {
            Sample::new(self.0).unwrap().into()
        }
    }

    fn funded(sample: f64, balance: Decimal) -> Settlement<MemoryStore, Fixed> {
        let settlement = Settlement::new(MemoryStore::new(), Fixed(sample));
        settlement.open_account(UserId(1)).unwrap();
        settlement
            .credit_deposit(UserId(1), balance, "seed")
            .unwrap();
        settlement
    }

    #[test]
    fn winning_spin_credits_payout() {
        let settlement = funded(0.05, dec!(10));
        let receipt = settlement.spin(UserId(1), dec!(1), "spin-1").unwrap();

        assert_eq!(receipt.segment, 0);
        assert_eq!(receipt.payout, dec!(2));
        assert_eq!(receipt.new_balance, dec!(11));
        assert!(!receipt.replayed);

        let entry = settlement.entries_for(UserId(1)).unwrap().pop().unwrap();
        assert_eq!(entry.kind, EntryKind::Win);
        assert_eq!(entry.amount, dec!(1));
    }

    #[test]
    fn losing_spin_debits_stake() {
        let settlement = funded(0.2, dec!(10));
        let receipt = settlement.spin(UserId(1), dec!(3), "spin-1").unwrap();

        assert_eq!(receipt.segment, 1);
        assert_eq!(receipt.payout, dec!(0));
        assert_eq!(receipt.new_balance, dec!(7));

        let entry = settlement.entries_for(UserId(1)).unwrap().pop().unwrap();
        assert_eq!(entry.kind, EntryKind::Loss);
        assert_eq!(entry.amount, dec!(-3));
    }

    #[test]
    fn bet_limits_are_enforced() {
        let settlement = funded(0.2, dec!(500));
        for stake in [dec!(0), dec!(-1), dec!(0.5), dec!(100.01)] {
            assert_eq!(
                settlement.spin(UserId(1), stake, "bad"),
                Err(SettlementError::InvalidStake)
            );
        }
        assert!(settlement.spin(UserId(1), dec!(100), "max").is_ok());
    }

    #[test]
    fn request_id_reused_across_kinds_conflicts() {
        let settlement = funded(0.2, dec!(10));
        assert_eq!(
            settlement.spin(UserId(1), dec!(1), "seed"),
            Err(SettlementError::RequestConflict)
        );
        assert_eq!(settlement.balance(UserId(1)).unwrap(), dec!(10));
    }

    #[test]
    fn reconfigure_changes_future_draws() {
        let settlement = funded(0.05, dec!(10));
        settlement.reconfigure(OutcomeTable::new(vec![Segment::new(dec!(7), 1.0)]).unwrap());

        let receipt = settlement.spin(UserId(1), dec!(1), "spin-1").unwrap();
        assert_eq!(receipt.payout, dec!(7));
        assert_eq!(receipt.new_balance, dec!(16));
    }

    #[test]
    fn with_config_applies_limits() {
        let mut config = Config::default();
        config.game.max_bet = dec!(5);
        config.settlement.max_attempts = 0;
        let settlement = Settlement::with_config(MemoryStore::new(), Fixed(0.2), &config);

        assert_eq!(settlement.limits().max_bet, dec!(5));
        assert_eq!(settlement.max_attempts, 1);
    }

    #[test]
    fn reconciliation_drift() {
        let report = Reconciliation {
            user_id: UserId(1),
            account_balance: dec!(10),
            ledger_balance: dec!(8),
            entries: 2,
        };
        assert!(!report.is_consistent());
        assert_eq!(report.drift(), dec!(2));
    }
}
