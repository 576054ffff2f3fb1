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

//! Payment gateway webhook signatures and events.
//!
//! The signature header has the form `t=<unix seconds>,v1=<hex mac>` where
//! the MAC is `HMAC-SHA256(secret, "<t>.<payload>")`. Several `v1` values may
//! be present during secret rotation; any match is accepted.

use crate::config::GatewayConfig;
use crate::error::{ConfigError, GatewayError};
use crate::fairness::hmac_sha256;
use hmac::Mac;
use serde::Deserialize;

/// Verifies webhook signatures with a shared secret.
#[derive(Debug, Clone)]
pub struct SignatureVerifier {
    secret: Vec<u8>,
    tolerance_secs: u64,
    skip: bool,
}

impl SignatureVerifier {
    pub fn new(config: &GatewayConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            secret: config.webhook_secret.as_bytes().to_vec(),
            tolerance_secs: config.signature_tolerance_secs,
            skip: config.skip_signature_verification,
        })
    }

    /// Produces a header for `payload` signed at `timestamp`.
    pub fn sign(&self, payload: &[u8], timestamp: u64) -> String {
        format!(
            "t={timestamp},v1={}",
            hex::encode(self.mac(payload, timestamp).finalize().into_bytes())
        )
    }

    /// Checks `header` against `payload` at time `now` (unix seconds).
    ///
    /// # Errors
    ///
    /// - [`GatewayError::MissingSignature`] - no header.
    /// - [`GatewayError::InvalidSignature`] - malformed header or no matching MAC.
    /// - [`GatewayError::StaleSignature`] - timestamp outside the tolerance.
    pub fn verify(
        &self,
        payload: &[u8],
        header: Option<&str>,
        now: u64,
    ) -> Result<(), GatewayError> {
        if self.skip {
            return Ok(());
        }
        let header = header.ok_or(GatewayError::MissingSignature)?;

        let mut timestamp = None;
        let mut signatures = Vec::new();
        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => {
                    timestamp = Some(
                        value
                            .parse::<u64>()
                            .map_err(|_| GatewayError::InvalidSignature)?,
                    );
                }
                Some(("v1", value)) => {
                    signatures
                        .push(hex::decode(value).map_err(|_| GatewayError::InvalidSignature)?);
                }
                _ => {}
            }
        }
        let timestamp = timestamp.ok_or(GatewayError::InvalidSignature)?;
        if signatures.is_empty() {
            return Err(GatewayError::InvalidSignature);
        }
        if now.abs_diff(timestamp) > self.tolerance_secs {
            return Err(GatewayError::StaleSignature);
        }

        let matched = signatures
            .iter()
            .any(|signature| self.mac(payload, timestamp).verify_slice(signature).is_ok());
        if matched {
            Ok(())
        } else {
            Err(GatewayError::InvalidSignature)
        }
    }

    fn mac(&self, payload: &[u8], timestamp: u64) -> crate::fairness::HmacSha256 {
        let mut mac = hmac_sha256(&self.secret);
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        mac
    }
}

/// Gateway event relevant to deposits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEvent {
    PaymentSucceeded { reference: String },
    PaymentFailed { reference: String },
    /// Any other event type; acknowledged and ignored.
    Other { kind: String },
}

#[derive(Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    kind: String,
    data: RawData,
}

#[derive(Deserialize)]
struct RawData {
    object: RawObject,
}

#[derive(Deserialize)]
struct RawObject {
    id: String,
}

impl WebhookEvent {
    /// Parses a JSON event body.
    pub fn parse(payload: &[u8]) -> Result<Self, GatewayError> {
        let raw: RawEvent = serde_json::from_slice(payload)
            .map_err(|e| GatewayError::MalformedPayload(e.to_string()))?;
        Ok(match raw.kind.as_str() {
            "payment_intent.succeeded" => Self::PaymentSucceeded {
                reference: raw.data.object.id,
            },
            "payment_intent.payment_failed" => Self::PaymentFailed {
                reference: raw.data.object.id,
            },
            _ => Self::Other { kind: raw.kind },
        })
    }
}

/// Current unix time in seconds.
pub(crate) fn unix_secs() -> u64 {
    crate::base::unix_millis() / 1000
}
