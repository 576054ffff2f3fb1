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

//! Player accounts.
//!
//! An account holds a non-negative balance and a version number that is
//! bumped on every committed change. Commits name the version they were
//! computed against, so a stale writer is rejected instead of overwriting a
//! newer balance.
//!
//! # Example
//!
//! ```
//! use rust_decimal_macros::dec;
//! use spin_ledger_rs::{Account, UserId};
//!
//! let account = Account::new(UserId(1));
//! assert_eq!(account.balance(), dec!(0));
//! assert!(account.active());
//! ```

use crate::base::UserId;
use crate::error::StoreError;
use parking_lot::{Mutex, MutexGuard};
use rust_decimal::Decimal;
use serde::ser::{Serialize, SerializeStruct, Serializer};

#[derive(Debug)]
pub(crate) struct AccountData {
    user_id: UserId,
    balance: Decimal,
    version: u64,
    active: bool,
}

impl AccountData {
    fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            balance: Decimal::ZERO,
            version: 0,
            active: true,
        }
    }

    fn assert_invariants(&self) {
        debug_assert!(
            self.balance >= Decimal::ZERO,
            "Invariant violated: balance went negative: {}",
            self.balance
        );
    }

    /// Checks that a commit computed against `expected_version` may apply
    /// `delta`, and returns the resulting balance. Does not mutate.
    pub(crate) fn check(
        &self,
        expected_version: u64,
        delta: Decimal,
    ) -> Result<Decimal, StoreError> {
        if self.version != expected_version {
            return Err(StoreError::Conflict);
        }
        if !self.active {
            return Err(StoreError::AccountDeactivated);
        }
        let balance = self
            .balance
            .checked_add(delta)
            .ok_or(StoreError::Overflow)?;
        if balance < Decimal::ZERO {
            return Err(StoreError::Overdraft);
        }
        Ok(balance)
    }

    /// Writes a balance previously returned by [`AccountData::check`].
    pub(crate) fn apply(&mut self, balance: Decimal) {
        self.balance = balance;
        self.version += 1;
        self.assert_invariants();
    }

    fn deactivate(&mut self) {
        if self.active {
            self.active = false;
            self.version += 1;
        }
    }

    fn snapshot(&self) -> AccountSnapshot {
        AccountSnapshot {
            user_id: self.user_id,
            balance: self.balance,
            version: self.version,
            active: self.active,
        }
    }
}

/// Player account.
#[derive(Debug)]
pub struct Account {
    inner: Mutex<AccountData>,
}

impl Account {
    const DECIMAL_PRECISION: u32 = 4;

    pub fn new(user_id: UserId) -> Self {
        Self {
            inner: Mutex::new(AccountData::new(user_id)),
        }
    }

    pub fn user_id(&self) -> UserId {
        self.inner.lock().user_id
    }

    pub fn balance(&self) -> Decimal {
        self.inner.lock().balance
    }

    pub fn version(&self) -> u64 {
        self.inner.lock().version
    }

    pub fn active(&self) -> bool {
        self.inner.lock().active
    }

    /// Consistent copy of all fields.
    pub fn snapshot(&self) -> AccountSnapshot {
        self.inner.lock().snapshot()
    }

    /// Marks the account inactive. Accounts are never deleted.
    pub fn deactivate(&self) -> AccountSnapshot {
        let mut data = self.inner.lock();
        data.deactivate();
        data.snapshot()
    }

    /// Locks the account for a check-then-apply commit.
    pub(crate) fn lock(&self) -> MutexGuard<'_, AccountData> {
        self.inner.lock()
    }
}

/// Point-in-time view of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountSnapshot {
    pub user_id: UserId,
    pub balance: Decimal,
    pub version: u64,
    pub active: bool,
}

impl AccountSnapshot {
    pub(crate) fn of(data: &AccountData) -> Self {
        data.snapshot()
    }
}

impl Serialize for AccountSnapshot {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("Account", 4)?;
        state.serialize_field("user", &self.user_id)?;
        state.serialize_field(
            "balance",
            &self.balance.round_dp(Account::DECIMAL_PRECISION),
        )?;
        state.serialize_field("version", &self.version)?;
        state.serialize_field("active", &self.active)?;
        state.end()
    }
}

impl Serialize for Account {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.snapshot().serialize(serializer)
    }
}
