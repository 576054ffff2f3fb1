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

//! TOML configuration.
//!
//! Every section and field is optional; missing values fall back to the
//! defaults of the standard game.
//!
//! ```toml
//! [game]
//! min_bet = "1"
//! max_bet = "100"
//!
//! [[game.outcomes]]
//! payout = "2"
//! weight = 0.1
//!
//! [[game.outcomes]]
//! payout = "0"
//! weight = 0.3
//!
//! [settlement]
//! max_attempts = 3
//!
//! [gateway]
//! webhook_secret = "whsec_..."
//! signature_tolerance_secs = 300
//! min_deposit = "1"
//! ```

use crate::error::ConfigError;
use crate::outcome::OutcomeTable;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub game: GameConfig,
    pub settlement: SettlementConfig,
    pub gateway: GatewayConfig,
}

/// Bet limits and the wheel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GameConfig {
    pub min_bet: Decimal,
    pub max_bet: Decimal,
    pub outcomes: OutcomeTable,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            min_bet: dec!(1),
            max_bet: dec!(100),
            outcomes: OutcomeTable::standard_wheel(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SettlementConfig {
    /// Commit attempts per request before giving up on version conflicts.
    pub max_attempts: u32,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self { max_attempts: 3 }
    }
}

/// Payment gateway webhook settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GatewayConfig {
    /// Shared secret for webhook signatures.
    pub webhook_secret: String,
    /// Maximum age of a signed webhook.
    pub signature_tolerance_secs: u64,
    /// Accept unsigned webhooks. For tests only.
    pub skip_signature_verification: bool,
    pub min_deposit: Decimal,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            webhook_secret: String::new(),
            signature_tolerance_secs: 300,
            skip_signature_verification: false,
            min_deposit: dec!(1),
        }
    }
}

impl GatewayConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.webhook_secret.is_empty() && !self.skip_signature_verification {
            return Err(ConfigError::Invalid(
                "gateway.webhook_secret is required unless skip_signature_verification is set"
                    .into(),
            ));
        }
        if self.min_deposit <= Decimal::ZERO {
            return Err(ConfigError::Invalid(
                "gateway.min_deposit must be positive".into(),
            ));
        }
        Ok(())
    }
}

impl Config {
    /// Reads and validates a TOML file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// Parses and validates TOML text.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks bet limits and the retry bound. Gateway settings are checked
    /// when a [`Cashier`](crate::Cashier) is built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.game.min_bet <= Decimal::ZERO {
            return Err(ConfigError::Invalid("game.min_bet must be positive".into()));
        }
        if self.game.max_bet < self.game.min_bet {
            return Err(ConfigError::Invalid(
                "game.max_bet must not be below game.min_bet".into(),
            ));
        }
        if self.settlement.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "settlement.max_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
