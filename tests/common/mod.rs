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

//! Shared test fixtures.

#![allow(dead_code)]

use rust_decimal::Decimal;
use spin_ledger_rs::{
    AccountSnapshot, Commit, EntryKind, LedgerEntry, MemoryStore, RequestId, Sample,
    SampleSource, Settlement, SourcedSample, Store, StoreError, UserId,
};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

/// Replays a fixed list of samples in a loop.
pub struct ScriptedSamples {
    samples: Vec<f64>,
    next: AtomicUsize,
}

impl ScriptedSamples {
    pub fn new(samples: &[f64]) -> Self {
        assert!(!samples.is_empty());
        Self {
            samples: samples.to_vec(),
            next: AtomicUsize::new(0),
        }
    }

    /// Number of samples handed out.
    pub fn drawn(&self) -> usize {
        self.next.load(Ordering::SeqCst)
    }
}

impl SampleSource for ScriptedSamples {
    fn next_sample(&self) -> SourcedSample {
        let index = self.next.fetch_add(1, Ordering::SeqCst);
        Sample::new(self.samples[index % self.samples.len()])
            .expect("scripted sample in [0, 1)")
            .into()
    }
}

/// Sample that lands on segment 0 of the standard wheel (payout 2).
pub const WIN_2: f64 = 0.05;
/// Sample that lands on segment 1 of the standard wheel (payout 0).
pub const LOSE: f64 = 0.2;
/// Sample that lands on segment 6 of the standard wheel (payout 10).
pub const WIN_10: f64 = 1.21 / 1.52;

/// Service with user 1 registered and funded with `balance`.
pub fn funded(
    samples: &[f64],
    balance: Decimal,
) -> Settlement<MemoryStore, ScriptedSamples> {
    let settlement = Settlement::new(MemoryStore::new(), ScriptedSamples::new(samples));
    settlement.open_account(UserId(1)).unwrap();
    if balance > Decimal::ZERO {
        settlement
            .credit_deposit(UserId(1), balance, "initial-deposit")
            .unwrap();
    }
    settlement
}

/// Store that sneaks an external deposit in before the next `conflicts`
/// commits, so those commits hit a real version conflict.
pub struct InterleavingStore {
    inner: MemoryStore,
    conflicts: AtomicU32,
    external: AtomicU32,
    pub attempts: AtomicU32,
}

impl InterleavingStore {
    pub fn new(conflicts: u32) -> Self {
        Self {
            inner: MemoryStore::new(),
            conflicts: AtomicU32::new(conflicts),
            external: AtomicU32::new(0),
            attempts: AtomicU32::new(0),
        }
    }

    /// Arms `n` more conflicting commits.
    pub fn inject(&self, n: u32) {
        self.conflicts.store(n, Ordering::SeqCst);
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }
}

impl Store for InterleavingStore {
    fn open_account(&self, user_id: UserId) -> Result<AccountSnapshot, StoreError> {
        self.inner.open_account(user_id)
    }

    fn account(&self, user_id: UserId) -> Result<Option<AccountSnapshot>, StoreError> {
        self.inner.account(user_id)
    }

    fn accounts(&self) -> Result<Vec<AccountSnapshot>, StoreError> {
        self.inner.accounts()
    }

    fn deactivate(&self, user_id: UserId) -> Result<AccountSnapshot, StoreError> {
        self.inner.deactivate(user_id)
    }

    fn find_entry(
        &self,
        user_id: UserId,
        request_id: &RequestId,
    ) -> Result<Option<LedgerEntry>, StoreError> {
        self.inner.find_entry(user_id, request_id)
    }

    fn commit(&self, commit: Commit) -> Result<LedgerEntry, StoreError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let inject = self
            .conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if inject {
            let current = self
                .inner
                .account(commit.user_id)?
                .ok_or(StoreError::UserNotFound)?;
            let n = self.external.fetch_add(1, Ordering::SeqCst);
            self.inner.commit(Commit {
                user_id: commit.user_id,
                expected_version: current.version,
                kind: EntryKind::Deposit,
                amount: Decimal::ONE,
                request_id: format!("external-{n}").into(),
                spin: None,
            })?;
        }
        self.inner.commit(commit)
    }

    fn entries_for(&self, user_id: UserId) -> Result<Vec<LedgerEntry>, StoreError> {
        self.inner.entries_for(user_id)
    }
}
