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

//! Server-side entropy for draws.
//!
//! The settlement service never takes a sample from the client. It asks a
//! [`SampleSource`] instead:
//!
//! - [`OsEntropy`] reads the operating system CSPRNG.
//! - [`ProvablyFair`] derives each sample as
//!   `HMAC-SHA256(server_seed, "{client_seed}:{nonce}")`. The SHA-256 of the
//!   server seed is published up front as a commitment; once the seed is
//!   revealed anyone can re-derive every sample with [`verify_outcome`].

use crate::outcome::{Outcome, OutcomeTable, Sample};
use hmac::{Hmac, Mac};
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

pub(crate) type HmacSha256 = Hmac<Sha256>;

/// Builds an HMAC-SHA256 instance. HMAC accepts keys of any length.
pub(crate) fn hmac_sha256(key: &[u8]) -> HmacSha256 {
    match <HmacSha256 as Mac>::new_from_slice(key) {
        Ok(mac) => mac,
        Err(_) => unreachable!("HMAC-SHA256 accepts keys of any length"),
    }
}

/// A sample plus the nonce that produced it, if the source is seeded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourcedSample {
    pub sample: Sample,
    pub nonce: Option<u64>,
}

impl From<Sample> for SourcedSample {
    fn from(sample: Sample) -> Self {
        Self {
            sample,
            nonce: None,
        }
    }
}

/// Source of draw samples. Shared across request threads.
pub trait SampleSource: Send + Sync {
    fn next_sample(&self) -> SourcedSample;
}

impl<T: SampleSource + ?Sized> SampleSource for Box<T> {
    fn next_sample(&self) -> SourcedSample {
        (**self).next_sample()
    }
}

impl<T: SampleSource + ?Sized> SampleSource for Arc<T> {
    fn next_sample(&self) -> SourcedSample {
        (**self).next_sample()
    }
}

/// Operating system CSPRNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsEntropy;

impl SampleSource for OsEntropy {
    fn next_sample(&self) -> SourcedSample {
        Sample::from_u64(OsRng.next_u64()).into()
    }
}

/// Hex SHA-256 of `input`.
pub fn sha256_hex(input: &[u8]) -> String {
    hex::encode(Sha256::digest(input))
}

/// Derives the sample for one spin from the seeds and nonce.
pub fn derive_sample(server_seed: &str, client_seed: &str, nonce: u64) -> Sample {
    let mut mac = hmac_sha256(server_seed.as_bytes());
    mac.update(format!("{client_seed}:{nonce}").as_bytes());
    let bytes = mac.finalize().into_bytes();
    let mut head = [0u8; 8];
    head.copy_from_slice(&bytes[..8]);
    Sample::from_u64(u64::from_be_bytes(head))
}

/// Checks a recorded outcome against the revealed server seed.
///
/// Returns `true` only if `server_seed` hashes to `commitment` and the
/// derived sample draws `outcome` from `table`.
pub fn verify_outcome(
    table: &OutcomeTable,
    server_seed: &str,
    commitment: &str,
    client_seed: &str,
    nonce: u64,
    outcome: &Outcome,
) -> bool {
    sha256_hex(server_seed.as_bytes()) == commitment
        && table.draw(derive_sample(server_seed, client_seed, nonce)) == *outcome
}

/// Seeded, verifiable sample source.
///
/// Nonces are handed out atomically, so concurrent spins never share one.
#[derive(Debug)]
pub struct ProvablyFair {
    server_seed: String,
    client_seed: String,
    nonce: AtomicU64,
}

impl ProvablyFair {
    pub fn new(server_seed: impl Into<String>, client_seed: impl Into<String>) -> Self {
        Self {
            server_seed: server_seed.into(),
            client_seed: client_seed.into(),
            nonce: AtomicU64::new(0),
        }
    }

    /// Creates a source with a fresh 32-byte server seed from the OS CSPRNG.
    pub fn generate(client_seed: impl Into<String>) -> Self {
        let mut seed = [0u8; 32];
        OsRng.fill_bytes(&mut seed);
        Self::new(hex::encode(seed), client_seed)
    }

    /// Hash of the server seed, safe to publish before any spin.
    pub fn commitment(&self) -> String {
        sha256_hex(self.server_seed.as_bytes())
    }

    pub fn client_seed(&self) -> &str {
        &self.client_seed
    }

    /// Number of samples handed out so far.
    pub fn nonce(&self) -> u64 {
        self.nonce.load(Ordering::SeqCst)
    }

    /// Ends the seed's lifetime and returns it for verification.
    pub fn reveal(self) -> String {
        self.server_seed
    }
}

impl SampleSource for ProvablyFair {
    fn next_sample(&self) -> SourcedSample {
        let nonce = self.nonce.fetch_add(1, Ordering::SeqCst);
        SourcedSample {
            sample: derive_sample(&self.server_seed, &self.client_seed, nonce),
            nonce: Some(nonce),
        }
    }
}
