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

//! Error types for outcome tables, the ledger, the store, settlement,
//! the payment gateway and configuration.

use crate::base::EntryId;
use crate::ledger::LedgerEntry;
use thiserror::Error;

/// Settlement errors, surfaced to the caller of the settlement service.
///
/// Every variant is distinguishable so a client can decide whether to retry
/// with the same idempotency key. See [`SettlementError::is_retryable`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SettlementError {
    /// Deposit or withdrawal amount is zero or negative
    #[error("invalid amount (must be positive)")]
    InvalidAmount,

    /// Stake is non-positive or outside the configured bet limits
    #[error("invalid stake (must be positive and within bet limits)")]
    InvalidStake,

    /// Stake or withdrawal exceeds the current balance
    #[error("insufficient funds")]
    InsufficientFunds,

    /// No account is registered for the user
    #[error("user not found")]
    UserNotFound,

    /// An account is already registered for the user
    #[error("account already exists")]
    AccountExists,

    /// Account has been deactivated
    #[error("account is deactivated")]
    AccountDeactivated,

    /// Request id was already used for a different kind of operation
    #[error("request id already used for a different operation")]
    RequestConflict,

    /// Balance version changed between read and commit
    #[error("persistence conflict")]
    PersistenceConflict,

    /// Conflicts persisted past the retry bound
    #[error("settlement failed after {attempts} attempts")]
    SettlementFailed { attempts: u32 },

    /// Underlying store failure
    #[error("store error: {0}")]
    Store(StoreError),
}

impl SettlementError {
    /// Returns `true` when repeating the request with the same idempotency key
    /// may succeed.
    ///
    /// Validation failures such as [`SettlementError::InsufficientFunds`] are
    /// final for the given balance and must not be retried blindly.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::PersistenceConflict
                | Self::SettlementFailed { .. }
                | Self::Store(StoreError::Unavailable(_))
        )
    }
}

impl From<StoreError> for SettlementError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Conflict => Self::PersistenceConflict,
            StoreError::UserNotFound => Self::UserNotFound,
            StoreError::AccountExists => Self::AccountExists,
            StoreError::AccountDeactivated => Self::AccountDeactivated,
            StoreError::Overdraft => Self::InsufficientFunds,
            StoreError::Overflow => Self::InvalidAmount,
            other => Self::Store(other),
        }
    }
}

/// Errors returned by a [`Store`](crate::Store) implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Expected account version did not match
    #[error("account version conflict")]
    Conflict,

    /// An entry with the same idempotency key is already committed
    #[error("request already committed as entry {}", .0.entry_id)]
    DuplicateRequest(Box<LedgerEntry>),

    /// No account for the user
    #[error("account not found")]
    UserNotFound,

    /// Account already registered
    #[error("account already exists")]
    AccountExists,

    /// Account is deactivated and accepts no further commits
    #[error("account is deactivated")]
    AccountDeactivated,

    /// Commit would drive the balance negative
    #[error("commit would overdraw the account")]
    Overdraft,

    /// Commit would exceed the representable balance
    #[error("commit would overflow the balance")]
    Overflow,

    /// Backend could not be reached
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Ledger append errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// The `(user, request)` pair already has an entry
    #[error("duplicate request (already recorded as entry {0})")]
    DuplicateRequest(EntryId),
}

/// Outcome table validation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OutcomeTableError {
    /// Table has no segments
    #[error("outcome table is empty")]
    Empty,

    /// Weight is zero, negative, NaN or infinite
    #[error("segment {index} has an invalid weight (must be positive and finite)")]
    InvalidWeight { index: usize },

    /// Payout is negative
    #[error("segment {index} has a negative payout")]
    NegativePayout { index: usize },
}

/// Payment gateway and webhook errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Webhook arrived without a signature header
    #[error("missing webhook signature")]
    MissingSignature,

    /// Signature header is malformed or the MAC does not match
    #[error("invalid webhook signature")]
    InvalidSignature,

    /// Signature timestamp is outside the tolerance window
    #[error("webhook signature timestamp outside tolerance")]
    StaleSignature,

    /// Webhook body is not a recognizable event
    #[error("malformed webhook payload: {0}")]
    MalformedPayload(String),

    /// No pending deposit for the reference
    #[error("unknown payment reference: {0}")]
    UnknownReference(String),

    /// The gateway returned a reference that is already recorded
    #[error("duplicate payment reference: {0}")]
    DuplicateReference(String),

    /// The gateway refused to create a payment intent
    #[error("payment gateway declined: {0}")]
    Declined(String),

    /// Confirmed deposit could not be settled
    #[error(transparent)]
    Settlement(#[from] SettlementError),
}

/// Configuration loading errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
