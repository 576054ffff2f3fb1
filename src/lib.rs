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

//! # Spin Ledger
//!
//! This library provides the outcome and ledger engine behind a
//! spin-the-wheel game: weighted wheel draws from server-side entropy,
//! idempotent wager settlement, and an append-only balance ledger.
//!
//! ## Core Components
//!
//! - [`OutcomeTable`] and [`draw`]: pure weighted selection of a wheel segment
//! - [`Settlement`]: spins, deposits and withdrawals against account balances
//! - [`Ledger`]: append-only record of every balance change
//! - [`Store`] / [`MemoryStore`]: versioned, atomic persistence of both
//! - [`OsEntropy`] / [`ProvablyFair`]: where draw samples come from
//! - [`Cashier`]: pending deposits and signed payment gateway webhooks
//!
//! ## Example
//!
//! ```
//! use spin_ledger_rs::{MemoryStore, OsEntropy, Settlement, UserId};
//! use rust_decimal_macros::dec;
//!
//! let settlement = Settlement::new(MemoryStore::new(), OsEntropy);
//! settlement.open_account(UserId(1)).unwrap();
//! settlement.credit_deposit(UserId(1), dec!(50), "pi_123").unwrap();
//!
//! let receipt = settlement.spin(UserId(1), dec!(5), "spin-1").unwrap();
//! assert_eq!(receipt.new_balance, dec!(45) + receipt.payout);
//!
//! // The ledger always reproduces the balance.
//! assert!(settlement.audit(UserId(1)).unwrap().is_consistent());
//! ```
//!
//! ## Thread Safety
//!
//! Operations for one user are serialized; operations for different users
//! run in parallel.

pub mod account;
mod base;
pub mod cashier;
pub mod config;
pub mod error;
pub mod fairness;
pub mod ledger;
pub mod outcome;
pub mod settlement;
pub mod store;
pub mod webhook;

pub use account::{Account, AccountSnapshot};
pub use base::{EntryId, RequestId, UserId};
pub use cashier::{Cashier, DepositStatus, PaymentGateway, PaymentIntent, PendingDeposit, WebhookOutcome};
pub use config::{Config, GameConfig, GatewayConfig, SettlementConfig};
pub use error::{
    ConfigError, GatewayError, LedgerError, OutcomeTableError, SettlementError, StoreError,
};
pub use fairness::{OsEntropy, ProvablyFair, SampleSource, SourcedSample, verify_outcome};
pub use ledger::{EntryKind, Ledger, LedgerEntry, NewEntry, SpinRecord};
pub use outcome::{Outcome, OutcomeTable, Sample, Segment, draw};
pub use settlement::{BalanceReceipt, BetLimits, Reconciliation, Settlement, SpinReceipt};
pub use store::{Commit, MemoryStore, Store};
pub use webhook::{SignatureVerifier, WebhookEvent};
