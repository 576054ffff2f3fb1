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

//! Weighted outcome generation.
//!
//! An [`OutcomeTable`] is an ordered list of wheel segments, each with a
//! payout and a relative weight. [`draw`] maps a [`Sample`] in `[0, 1)` onto
//! a segment by walking the table and accumulating weights. It is a pure
//! function: the caller supplies the sample from a server-side entropy source
//! (see [`crate::fairness`]).
//!
//! # Example
//!
//! ```
//! use spin_ledger_rs::{OutcomeTable, Sample, draw};
//! use rust_decimal_macros::dec;
//!
//! let table = OutcomeTable::standard_wheel();
//! let outcome = draw(&table, Sample::new(0.05).unwrap());
//! assert_eq!(outcome.segment, 0);
//! assert_eq!(outcome.payout, dec!(2));
//! ```

use crate::error::OutcomeTableError;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// A uniformly distributed value in `[0, 1)`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Sample(f64);

impl Sample {
    /// Returns `None` unless `0.0 <= value < 1.0`.
    pub fn new(value: f64) -> Option<Self> {
        (0.0..1.0).contains(&value).then_some(Self(value))
    }

    /// Maps 32 random bits onto `[0, 1)`.
    pub fn from_u32(bits: u32) -> Self {
        Self(f64::from(bits) / (f64::from(u32::MAX) + 1.0))
    }

    /// Maps the top 53 of 64 random bits onto `[0, 1)`.
    pub fn from_u64(bits: u64) -> Self {
        Self((bits >> 11) as f64 / (1u64 << 53) as f64)
    }

    pub fn value(self) -> f64 {
        self.0
    }
}

/// One wheel segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    /// Amount credited back when this segment is drawn.
    pub payout: Decimal,
    /// Relative draw weight. Need not sum to 1 across the table.
    pub weight: f64,
}

impl Segment {
    pub fn new(payout: Decimal, weight: f64) -> Self {
        Self { payout, weight }
    }
}

/// Result of a draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    /// Index of the selected segment in table order.
    pub segment: usize,
    pub payout: Decimal,
}

/// Validated, immutable outcome table.
///
/// # Invariants
///
/// - At least one segment.
/// - Every weight is positive and finite.
/// - Every payout is non-negative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Segment>", into = "Vec<Segment>")]
pub struct OutcomeTable {
    segments: Vec<Segment>,
    total_weight: f64,
}

impl OutcomeTable {
    pub fn new(segments: Vec<Segment>) -> Result<Self, OutcomeTableError> {
        if segments.is_empty() {
            return Err(OutcomeTableError::Empty);
        }
        for (index, segment) in segments.iter().enumerate() {
            if !segment.weight.is_finite() || segment.weight <= 0.0 {
                return Err(OutcomeTableError::InvalidWeight { index });
            }
            if segment.payout < Decimal::ZERO {
                return Err(OutcomeTableError::NegativePayout { index });
            }
        }
        let total_weight = segments.iter().map(|s| s.weight).sum();
        Ok(Self {
            segments,
            total_weight,
        })
    }

    /// The eight-segment game wheel, in the order the segments appear on
    /// the wheel.
    pub fn standard_wheel() -> Self {
        let segments = vec![
            Segment::new(dec!(2), 0.1),
            Segment::new(dec!(0), 0.3),
            Segment::new(dec!(5), 0.05),
            Segment::new(dec!(0), 0.3),
            Segment::new(dec!(1), 0.15),
            Segment::new(dec!(0), 0.3),
            Segment::new(dec!(10), 0.02),
            Segment::new(dec!(0), 0.3),
        ];
        let total_weight = segments.iter().map(|s| s.weight).sum();
        Self {
            segments,
            total_weight,
        }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn total_weight(&self) -> f64 {
        self.total_weight
    }

    /// Normalized probability of drawing `segment`.
    pub fn probability(&self, segment: usize) -> Option<f64> {
        self.segments
            .get(segment)
            .map(|s| s.weight / self.total_weight)
    }

    /// Mean payout per spin.
    pub fn expected_payout(&self) -> f64 {
        self.segments
            .iter()
            .map(|s| s.payout.to_f64().unwrap_or(0.0) * s.weight / self.total_weight)
            .sum()
    }

    /// Selects a segment for `sample`.
    pub fn draw(&self, sample: Sample) -> Outcome {
        let segment = self.locate(sample.value() * self.total_weight);
        Outcome {
            segment,
            payout: self.segments[segment].payout,
        }
    }

    /// Index of the first segment whose cumulative weight reaches `target`.
    ///
    /// Falls back to the last segment if rounding leaves `target` above the
    /// accumulated total.
    fn locate(&self, target: f64) -> usize {
        let mut running = 0.0;
        for (index, segment) in self.segments.iter().enumerate() {
            running += segment.weight;
            if target <= running {
                return index;
            }
        }
        self.segments.len() - 1
    }
}

impl TryFrom<Vec<Segment>> for OutcomeTable {
    type Error = OutcomeTableError;

    fn try_from(segments: Vec<Segment>) -> Result<Self, Self::Error> {
        Self::new(segments)
    }
}

impl From<OutcomeTable> for Vec<Segment> {
    fn from(table: OutcomeTable) -> Self {
        table.segments
    }
}

impl Default for OutcomeTable {
    fn default() -> Self {
        Self::standard_wheel()
    }
}

/// Draws one outcome from `table`. See [`OutcomeTable::draw`].
pub fn draw(table: &OutcomeTable, sample: Sample) -> Outcome {
    table.draw(sample)
}
