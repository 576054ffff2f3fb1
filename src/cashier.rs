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

//! Deposits through an external payment gateway.
//!
//! ```text
//!  begin_deposit ──► PaymentGateway::create_intent ──► PendingDeposit (Pending)
//!                                                          │
//!  handle_webhook(payment_intent.succeeded) ───────────────┴──► credit_deposit ──► Completed
//!  handle_webhook(payment_intent.payment_failed) ─────────────────────────────────► Failed
//! ```
//!
//! A pending deposit never touches the balance. Confirmation credits the
//! amount recorded when the intent was opened, keyed by the gateway
//! reference, so a replayed webhook cannot credit twice.

use crate::base::UserId;
use crate::config::GatewayConfig;
use crate::error::{ConfigError, GatewayError, SettlementError};
use crate::fairness::SampleSource;
use crate::settlement::{BalanceReceipt, Settlement};
use crate::store::Store;
use crate::webhook::{SignatureVerifier, WebhookEvent, unix_secs};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// A payment the client can confirm with the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentIntent {
    /// Gateway reference, later echoed by the webhook.
    pub reference: String,
    /// Secret the client uses to complete payment with the gateway.
    pub client_secret: String,
}

/// The external payment processor.
pub trait PaymentGateway: Send + Sync {
    fn create_intent(&self, user_id: UserId, amount: Decimal)
    -> Result<PaymentIntent, GatewayError>;
}

impl<T: PaymentGateway + ?Sized> PaymentGateway for Arc<T> {
    fn create_intent(
        &self,
        user_id: UserId,
        amount: Decimal,
    ) -> Result<PaymentIntent, GatewayError> {
        (**self).create_intent(user_id, amount)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DepositStatus {
    Pending,
    Completed,
    Failed,
}

/// A deposit awaiting gateway confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingDeposit {
    pub reference: String,
    pub user_id: UserId,
    pub amount: Decimal,
    pub status: DepositStatus,
}

/// What a webhook did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    Credited(BalanceReceipt),
    MarkedFailed { reference: String },
    Ignored { kind: String },
}

/// Deposit desk in front of the settlement service.
pub struct Cashier<G, S, R> {
    gateway: G,
    settlement: Arc<Settlement<S, R>>,
    verifier: SignatureVerifier,
    min_deposit: Decimal,
    deposits: DashMap<String, PendingDeposit>,
}

impl<G: PaymentGateway, S: Store, R: SampleSource> Cashier<G, S, R> {
    /// # Errors
    ///
    /// Fails if `config` has no webhook secret and does not explicitly skip
    /// signature verification.
    pub fn new(
        gateway: G,
        settlement: Arc<Settlement<S, R>>,
        config: &GatewayConfig,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            gateway,
            settlement,
            verifier: SignatureVerifier::new(config)?,
            min_deposit: config.min_deposit,
            deposits: DashMap::new(),
        })
    }

    pub fn settlement(&self) -> &Settlement<S, R> {
        &self.settlement
    }

    pub fn verifier(&self) -> &SignatureVerifier {
        &self.verifier
    }

    pub fn deposit(&self, reference: &str) -> Option<PendingDeposit> {
        self.deposits.get(reference).map(|deposit| deposit.clone())
    }

    /// Opens a payment intent and records it as pending.
    pub fn begin_deposit(
        &self,
        user_id: UserId,
        amount: Decimal,
    ) -> Result<PaymentIntent, GatewayError> {
        if amount <= Decimal::ZERO || amount < self.min_deposit {
            return Err(SettlementError::InvalidAmount.into());
        }
        if !self.settlement.account(user_id)?.active {
            return Err(SettlementError::AccountDeactivated.into());
        }

        let intent = self.gateway.create_intent(user_id, amount)?;
        match self.deposits.entry(intent.reference.clone()) {
            Entry::Occupied(existing) => {
                warn!(
                    user = %user_id,
                    reference = %intent.reference,
                    status = ?existing.get().status,
                    "gateway reused a recorded reference"
                );
                return Err(GatewayError::DuplicateReference(intent.reference));
            }
            Entry::Vacant(slot) => {
                slot.insert(PendingDeposit {
                    reference: intent.reference.clone(),
                    user_id,
                    amount,
                    status: DepositStatus::Pending,
                });
            }
        }
        info!(user = %user_id, %amount, reference = %intent.reference, "deposit pending");
        Ok(intent)
    }

    /// Verifies and applies a gateway webhook.
    pub fn handle_webhook(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookOutcome, GatewayError> {
        self.handle_webhook_at(payload, signature, unix_secs())
    }

    /// [`Cashier::handle_webhook`] with an explicit clock (unix seconds).
    pub fn handle_webhook_at(
        &self,
        payload: &[u8],
        signature: Option<&str>,
        now: u64,
    ) -> Result<WebhookOutcome, GatewayError> {
        if let Err(error) = self.verifier.verify(payload, signature, now) {
            warn!(%error, "webhook rejected");
            return Err(error);
        }

        match WebhookEvent::parse(payload)? {
            WebhookEvent::PaymentSucceeded { reference } => self.confirm(&reference),
            WebhookEvent::PaymentFailed { reference } => {
                let mut deposit = self
                    .deposits
                    .get_mut(&reference)
                    .ok_or_else(|| GatewayError::UnknownReference(reference.clone()))?;
                if deposit.status == DepositStatus::Pending {
                    deposit.status = DepositStatus::Failed;
                    info!(reference = %reference, "deposit failed");
                }
                Ok(WebhookOutcome::MarkedFailed { reference })
            }
            WebhookEvent::Other { kind } => Ok(WebhookOutcome::Ignored { kind }),
        }
    }

    fn confirm(&self, reference: &str) -> Result<WebhookOutcome, GatewayError> {
        let (user_id, amount) = {
            let deposit = self
                .deposits
                .get(reference)
                .ok_or_else(|| GatewayError::UnknownReference(reference.to_owned()))?;
            (deposit.user_id, deposit.amount)
        };

        let receipt = self.settlement.credit_deposit(user_id, amount, reference)?;
        if let Some(mut deposit) = self.deposits.get_mut(reference) {
            deposit.status = DepositStatus::Completed;
        }
        Ok(WebhookOutcome::Credited(receipt))
    }
}
