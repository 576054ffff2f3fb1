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

//! Persistence for accounts and the ledger.
//!
//! The [`Store`] trait is the session object the settlement service holds for
//! its whole lifetime. A [`Commit`] writes one ledger entry and the matching
//! balance change as a single all-or-nothing step, guarded by the account
//! version the caller read.
//!
//! [`MemoryStore`] keeps everything in process memory.

use crate::account::{Account, AccountSnapshot};
use crate::base::{RequestId, UserId};
use crate::error::{LedgerError, StoreError};
use crate::ledger::{EntryKind, Ledger, LedgerEntry, NewEntry, SpinRecord};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::debug;

/// A versioned balance change plus the ledger entry that records it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub user_id: UserId,
    /// Account version the change was computed against.
    pub expected_version: u64,
    pub kind: EntryKind,
    /// Signed balance change.
    pub amount: Decimal,
    pub request_id: RequestId,
    pub spin: Option<SpinRecord>,
}

/// Durable state behind the settlement service.
///
/// Implementations must make [`Store::commit`] atomic: either the ledger
/// entry is appended and the balance updated, or neither happens.
pub trait Store: Send + Sync {
    /// Registers a new account with a zero balance.
    fn open_account(&self, user_id: UserId) -> Result<AccountSnapshot, StoreError>;

    fn account(&self, user_id: UserId) -> Result<Option<AccountSnapshot>, StoreError>;

    fn accounts(&self) -> Result<Vec<AccountSnapshot>, StoreError>;

    fn deactivate(&self, user_id: UserId) -> Result<AccountSnapshot, StoreError>;

    /// Looks up an entry by its idempotency key.
    fn find_entry(
        &self,
        user_id: UserId,
        request_id: &RequestId,
    ) -> Result<Option<LedgerEntry>, StoreError>;

    /// Applies `commit` and returns the written entry.
    ///
    /// # Errors
    ///
    /// - [`StoreError::DuplicateRequest`] - the request id is already recorded;
    ///   carries the existing entry.
    /// - [`StoreError::Conflict`] - the account version moved.
    /// - [`StoreError::Overdraft`] - the balance would go negative.
    /// - [`StoreError::AccountDeactivated`] / [`StoreError::UserNotFound`].
    fn commit(&self, commit: Commit) -> Result<LedgerEntry, StoreError>;

    fn entries_for(&self, user_id: UserId) -> Result<Vec<LedgerEntry>, StoreError>;

    /// Balance recomputed from the ledger.
    fn reconcile_balance(&self, user_id: UserId) -> Result<Decimal, StoreError> {
        Ok(self
            .entries_for(user_id)?
            .iter()
            .map(|entry| entry.amount)
            .sum())
    }
}

impl<T: Store + ?Sized> Store for Arc<T> {
    fn open_account(&self, user_id: UserId) -> Result<AccountSnapshot, StoreError> {
        (**self).open_account(user_id)
    }

    fn account(&self, user_id: UserId) -> Result<Option<AccountSnapshot>, StoreError> {
        (**self).account(user_id)
    }

    fn accounts(&self) -> Result<Vec<AccountSnapshot>, StoreError> {
        (**self).accounts()
    }

    fn deactivate(&self, user_id: UserId) -> Result<AccountSnapshot, StoreError> {
        (**self).deactivate(user_id)
    }

    fn find_entry(
        &self,
        user_id: UserId,
        request_id: &RequestId,
    ) -> Result<Option<LedgerEntry>, StoreError> {
        (**self).find_entry(user_id, request_id)
    }

    fn commit(&self, commit: Commit) -> Result<LedgerEntry, StoreError> {
        (**self).commit(commit)
    }

    fn entries_for(&self, user_id: UserId) -> Result<Vec<LedgerEntry>, StoreError> {
        (**self).entries_for(user_id)
    }

    fn reconcile_balance(&self, user_id: UserId) -> Result<Decimal, StoreError> {
        (**self).reconcile_balance(user_id)
    }
}

/// In-memory store.
///
/// Accounts live in a [`DashMap`]; each account's mutex is held across the
/// ledger append and the balance write so the pair is never observed half
/// applied.
#[derive(Debug, Default)]
pub struct MemoryStore {
    accounts: DashMap<UserId, Arc<Account>>,
    ledger: Ledger,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    fn get(&self, user_id: UserId) -> Result<Arc<Account>, StoreError> {
        self.accounts
            .get(&user_id)
            .map(|account| Arc::clone(account.value()))
            .ok_or(StoreError::UserNotFound)
    }
}

impl Store for MemoryStore {
    fn open_account(&self, user_id: UserId) -> Result<AccountSnapshot, StoreError> {
        match self.accounts.entry(user_id) {
            Entry::Occupied(_) => Err(StoreError::AccountExists),
            Entry::Vacant(slot) => {
                let account = Arc::new(Account::new(user_id));
                let snapshot = account.snapshot();
                slot.insert(account);
                Ok(snapshot)
            }
        }
    }

    fn account(&self, user_id: UserId) -> Result<Option<AccountSnapshot>, StoreError> {
        Ok(self.accounts.get(&user_id).map(|account| account.snapshot()))
    }

    fn accounts(&self) -> Result<Vec<AccountSnapshot>, StoreError> {
        let mut accounts: Vec<AccountSnapshot> = self
            .accounts
            .iter()
            .map(|account| account.snapshot())
            .collect();
        accounts.sort_by_key(|account| account.user_id);
        Ok(accounts)
    }

    fn deactivate(&self, user_id: UserId) -> Result<AccountSnapshot, StoreError> {
        Ok(self.get(user_id)?.deactivate())
    }

    fn find_entry(
        &self,
        user_id: UserId,
        request_id: &RequestId,
    ) -> Result<Option<LedgerEntry>, StoreError> {
        Ok(self.ledger.find(user_id, request_id))
    }

    fn commit(&self, commit: Commit) -> Result<LedgerEntry, StoreError> {
        let account = self.get(commit.user_id)?;
        let mut data = account.lock();

        if let Some(existing) = self.ledger.find(commit.user_id, &commit.request_id) {
            return Err(StoreError::DuplicateRequest(Box::new(existing)));
        }
        let balance = data.check(commit.expected_version, commit.amount)?;

        // The append is the last fallible step; the balance is written only
        // once the entry exists.
        let entry_id = self
            .ledger
            .append(NewEntry {
                user_id: commit.user_id,
                kind: commit.kind,
                amount: commit.amount,
                request_id: commit.request_id,
                resulting_balance: balance,
                spin: commit.spin,
            })
            .map_err(|LedgerError::DuplicateRequest(existing)| {
                match self.ledger.get(existing) {
                    Some(entry) => StoreError::DuplicateRequest(Box::new(entry)),
                    None => StoreError::Conflict,
                }
            })?;
        data.apply(balance);

        let snapshot = AccountSnapshot::of(&data);
        debug!(
            user = %snapshot.user_id,
            entry = %entry_id,
            balance = %snapshot.balance,
            version = snapshot.version,
            "committed"
        );

        self.ledger
            .get(entry_id)
            .ok_or_else(|| StoreError::Unavailable(format!("entry {entry_id} vanished")))
    }

    fn entries_for(&self, user_id: UserId) -> Result<Vec<LedgerEntry>, StoreError> {
        Ok(self.ledger.entries_for(user_id))
    }

    fn reconcile_balance(&self, user_id: UserId) -> Result<Decimal, StoreError> {
        Ok(self.ledger.reconcile_balance(user_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn deposit(user: u32, version: u64, request: &str, amount: Decimal) -> Commit {
        Commit {
            user_id: UserId(user),
            expected_version: version,
            kind: EntryKind::Deposit,
            amount,
            request_id: request.into(),
            spin: None,
        }
    }

    #[test]
    fn open_account_twice_fails() {
        let store = MemoryStore::new();
        store.open_account(UserId(1)).unwrap();
        assert_eq!(store.open_account(UserId(1)), Err(StoreError::AccountExists));
    }

    #[test]
    fn commit_updates_balance_and_ledger() {
        let store = MemoryStore::new();
        store.open_account(UserId(1)).unwrap();

        let entry = store.commit(deposit(1, 0, "ref-1", dec!(50))).unwrap();
        assert_eq!(entry.resulting_balance, dec!(50));

        let account = store.account(UserId(1)).unwrap().unwrap();
        assert_eq!(account.balance, dec!(50));
        assert_eq!(account.version, 1);
        assert_eq!(store.reconcile_balance(UserId(1)).unwrap(), dec!(50));
    }

    #[test]
    fn stale_version_leaves_state_untouched() {
        let store = MemoryStore::new();
        store.open_account(UserId(1)).unwrap();
        store.commit(deposit(1, 0, "a", dec!(10))).unwrap();

        let result = store.commit(deposit(1, 0, "b", dec!(10)));
        assert_eq!(result, Err(StoreError::Conflict));
        assert_eq!(store.account(UserId(1)).unwrap().unwrap().balance, dec!(10));
        assert_eq!(store.ledger().len(), 1);
    }

    #[test]
    fn overdraft_leaves_state_untouched() {
        let store = MemoryStore::new();
        store.open_account(UserId(1)).unwrap();
        store.commit(deposit(1, 0, "a", dec!(10))).unwrap();

        let mut withdrawal = deposit(1, 1, "w", dec!(-10.01));
        withdrawal.kind = EntryKind::Withdrawal;
        assert_eq!(store.commit(withdrawal), Err(StoreError::Overdraft));
        assert_eq!(store.ledger().len(), 1);
    }

    #[test]
    fn duplicate_request_returns_existing_entry() {
        let store = MemoryStore::new();
        store.open_account(UserId(1)).unwrap();
        let first = store.commit(deposit(1, 0, "ref-1", dec!(50))).unwrap();

        let result = store.commit(deposit(1, 1, "ref-1", dec!(50)));
        assert_eq!(result, Err(StoreError::DuplicateRequest(Box::new(first))));
        assert_eq!(store.account(UserId(1)).unwrap().unwrap().balance, dec!(50));
    }

    #[test]
    fn commit_to_unknown_user_fails() {
        let store = MemoryStore::new();
        assert_eq!(
            store.commit(deposit(1, 0, "a", dec!(1))),
            Err(StoreError::UserNotFound)
        );
    }

    #[test]
    fn deactivated_account_rejects_commit() {
        let store = MemoryStore::new();
        store.open_account(UserId(1)).unwrap();
        let snapshot = store.deactivate(UserId(1)).unwrap();
        assert!(!snapshot.active);

        let result = store.commit(deposit(1, snapshot.version, "a", dec!(1)));
        assert_eq!(result, Err(StoreError::AccountDeactivated));
    }

    #[test]
    fn accounts_are_sorted_by_user() {
        let store = MemoryStore::new();
        for user in [3, 1, 2] {
            store.open_account(UserId(user)).unwrap();
        }
        let users: Vec<u32> = store
            .accounts()
            .unwrap()
            .iter()
            .map(|a| a.user_id.0)
            .collect();
        assert_eq!(users, vec![1, 2, 3]);
    }
}
