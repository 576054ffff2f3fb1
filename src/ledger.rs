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

//! Append-only balance ledger with per-user idempotency.
//!
//! Every balance-affecting event is written once as a [`LedgerEntry`] and
//! never updated or removed. The `(user, request)` pair is unique, which makes
//! the request id an idempotency key for spins, withdrawals and deposits.
//!
//! Summing a user's entry amounts reproduces the account balance; an auditor
//! compares the two to detect drift.

use crate::base::{EntryId, RequestId, UserId, unix_millis};
use crate::error::LedgerError;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Kind of balance-affecting event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Deposit,
    Withdrawal,
    Win,
    Loss,
}

impl EntryKind {
    /// `Win` and `Loss` are produced by spins.
    pub fn is_spin(self) -> bool {
        matches!(self, Self::Win | Self::Loss)
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Deposit => "deposit",
            Self::Withdrawal => "withdrawal",
            Self::Win => "win",
            Self::Loss => "loss",
        };
        f.write_str(name)
    }
}

/// Game result attached to `Win`/`Loss` entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpinRecord {
    pub stake: Decimal,
    pub payout: Decimal,
    /// Index of the drawn wheel segment.
    pub segment: usize,
    /// Provably-fair nonce, when the sample came from a seeded source.
    pub nonce: Option<u64>,
}

/// An entry before the ledger has assigned its id and timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEntry {
    pub user_id: UserId,
    pub kind: EntryKind,
    /// Signed balance change.
    pub amount: Decimal,
    pub request_id: RequestId,
    pub resulting_balance: Decimal,
    pub spin: Option<SpinRecord>,
}

impl NewEntry {
    fn into_entry(self, entry_id: EntryId, timestamp: u64) -> LedgerEntry {
        LedgerEntry {
            entry_id,
            user_id: self.user_id,
            kind: self.kind,
            amount: self.amount,
            request_id: self.request_id,
            resulting_balance: self.resulting_balance,
            timestamp,
            spin: self.spin,
        }
    }
}

/// An immutable ledger record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub entry_id: EntryId,
    pub user_id: UserId,
    pub kind: EntryKind,
    /// Signed balance change: positive for deposits, negative for
    /// withdrawals, `payout - stake` for spins.
    pub amount: Decimal,
    pub request_id: RequestId,
    /// Account balance right after this entry was applied.
    pub resulting_balance: Decimal,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    pub spin: Option<SpinRecord>,
}

/// Thread-safe append-only ledger.
///
/// Uses the [`DashMap`] entry API on the idempotency index so that the
/// duplicate check and the insert are a single atomic step.
#[derive(Debug, Default)]
pub struct Ledger {
    /// Entries indexed by id.
    entries: DashMap<EntryId, Arc<LedgerEntry>>,
    /// Idempotency index.
    requests: DashMap<(UserId, RequestId), EntryId>,
    /// Entry ids per user in append order.
    users: DashMap<UserId, Vec<EntryId>>,
    last_id: AtomicU64,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes `entry` and returns its id.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::DuplicateRequest`] with the existing entry's id
    /// if the user already has an entry for the same request id.
    pub fn append(&self, entry: NewEntry) -> Result<EntryId, LedgerError> {
        let user_id = entry.user_id;
        match self.requests.entry((user_id, entry.request_id.clone())) {
            Entry::Occupied(existing) => Err(LedgerError::DuplicateRequest(*existing.get())),
            Entry::Vacant(slot) => {
                let entry_id = EntryId(self.last_id.fetch_add(1, Ordering::SeqCst) + 1);
                self.entries
                    .insert(entry_id, Arc::new(entry.into_entry(entry_id, unix_millis())));
                self.users.entry(user_id).or_default().push(entry_id);
                slot.insert(entry_id);
                Ok(entry_id)
            }
        }
    }

    pub fn get(&self, entry_id: EntryId) -> Option<LedgerEntry> {
        self.entries.get(&entry_id).map(|entry| entry.as_ref().clone())
    }

    /// Looks up the entry recorded for `request_id`, if any.
    pub fn find(&self, user_id: UserId, request_id: &RequestId) -> Option<LedgerEntry> {
        let entry_id = *self.requests.get(&(user_id, request_id.clone()))?;
        self.get(entry_id)
    }

    /// Returns the user's entries in chronological order.
    pub fn entries_for(&self, user_id: UserId) -> Vec<LedgerEntry> {
        let mut entries: Vec<LedgerEntry> = match self.users.get(&user_id) {
            Some(ids) => ids.iter().filter_map(|id| self.get(*id)).collect(),
            None => Vec::new(),
        };
        entries.sort_by_key(|entry| entry.entry_id);
        entries
    }

    /// Recomputes the user's balance from the ledger alone.
    pub fn reconcile_balance(&self, user_id: UserId) -> Decimal {
        self.entries_for(user_id)
            .iter()
            .map(|entry| entry.amount)
            .sum()
    }

    /// Returns every entry in global append order.
    pub fn entries(&self) -> Vec<LedgerEntry> {
        let mut entries: Vec<LedgerEntry> = self
            .entries
            .iter()
            .map(|entry| entry.value().as_ref().clone())
            .collect();
        entries.sort_by_key(|entry| entry.entry_id);
        entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
