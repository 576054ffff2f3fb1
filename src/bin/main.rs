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

use clap::Parser;
use csv::{ReaderBuilder, Trim, Writer};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use spin_ledger_rs::{
    Config, MemoryStore, OsEntropy, ProvablyFair, SampleSource, Settlement, SettlementError,
    Store, UserId,
};
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::PathBuf;
use std::process;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

type Service = Settlement<MemoryStore, Box<dyn SampleSource>>;

/// Spin Ledger - Replay wheel operations from a CSV file
///
/// Reads operations from a CSV file, settles them against in-memory accounts
/// and writes the resulting account states to stdout.
#[derive(Parser, Debug)]
#[command(name = "spin-ledger-rs")]
#[command(about = "Settles spin-the-wheel operations from a CSV file", long_about = None)]
struct Args {
    /// Path to CSV file with operations
    ///
    /// Expected format: type,user,request,amount
    /// Example: cargo run -- operations.csv > accounts.csv
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// TOML configuration (bet limits, outcome table, retry bound)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Use a provably-fair sample source with this server seed instead of
    /// OS entropy
    #[arg(long, requires = "client_seed")]
    server_seed: Option<String>,

    /// Client seed for the provably-fair source
    #[arg(long)]
    client_seed: Option<String>,

    /// Also write every ledger entry to this CSV file
    #[arg(long, value_name = "FILE")]
    ledger: Option<PathBuf>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "spin_ledger_rs=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => match Config::from_path(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Error loading config '{}': {}", path.display(), e);
                process::exit(1);
            }
        },
        None => Config::default(),
    };

    let sampler: Box<dyn SampleSource> = match (&args.server_seed, &args.client_seed) {
        (Some(server_seed), Some(client_seed)) => {
            let source = ProvablyFair::new(server_seed.clone(), client_seed.clone());
            info!(commitment = %source.commitment(), "using provably-fair samples");
            Box::new(source)
        }
        _ => Box::new(OsEntropy),
    };
    let service = Settlement::with_config(MemoryStore::new(), sampler, &config);

    let file = match File::open(&args.input) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error opening file '{}': {}", args.input.display(), e);
            process::exit(1);
        }
    };

    if let Err(e) = process_operations(&service, BufReader::new(file)) {
        eprintln!("Error processing operations: {}", e);
        process::exit(1);
    }

    audit_accounts(&service);

    if let Some(path) = &args.ledger {
        let result = File::create(path)
            .map_err(csv::Error::from)
            .and_then(|file| write_ledger(&service, file));
        if let Err(e) = result {
            eprintln!("Error writing ledger '{}': {}", path.display(), e);
            process::exit(1);
        }
    }

    if let Err(e) = write_accounts(&service, std::io::stdout()) {
        eprintln!("Error writing output: {}", e);
        process::exit(1);
    }
}

/// Raw CSV record matching the input format.
///
/// Fields: `type, user, request, amount`
#[derive(Debug, Deserialize)]
struct CsvRecord {
    #[serde(rename = "type")]
    op_type: String,
    user: u32,
    #[serde(default)]
    request: String,
    #[serde(deserialize_with = "csv::invalid_option")]
    amount: Option<Decimal>,
}

/// A parsed operation.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Operation {
    Open { user: UserId },
    Deposit { user: UserId, reference: String, amount: Decimal },
    Spin { user: UserId, request: String, stake: Decimal },
    Withdraw { user: UserId, request: String, amount: Decimal },
    Deactivate { user: UserId },
}

impl CsvRecord {
    /// Converts a CSV record to an operation.
    ///
    /// Returns `None` for unknown types or missing required fields.
    fn into_operation(self) -> Option<Operation> {
        let user = UserId(self.user);
        let needs_request = !self.request.is_empty();

        match self.op_type.to_lowercase().as_str() {
            "open" => Some(Operation::Open { user }),
            "deactivate" => Some(Operation::Deactivate { user }),
            "deposit" if needs_request => Some(Operation::Deposit {
                user,
                reference: self.request,
                amount: self.amount?,
            }),
            "spin" if needs_request => Some(Operation::Spin {
                user,
                request: self.request,
                stake: self.amount?,
            }),
            "withdraw" | "withdrawal" if needs_request => Some(Operation::Withdraw {
                user,
                request: self.request,
                amount: self.amount?,
            }),
            _ => None,
        }
    }
}

fn apply(service: &Service, operation: Operation) -> Result<(), SettlementError> {
    match operation {
        Operation::Open { user } => {
            service.open_account(user)?;
        }
        Operation::Deactivate { user } => {
            service.deactivate(user)?;
        }
        Operation::Deposit {
            user,
            reference,
            amount,
        } => {
            service.credit_deposit(user, amount, reference)?;
        }
        Operation::Spin {
            user,
            request,
            stake,
        } => {
            let receipt = service.spin(user, stake, request)?;
            debug!(
                user = %user,
                segment = receipt.segment,
                payout = %receipt.payout,
                balance = %receipt.new_balance,
                "spin settled"
            );
        }
        Operation::Withdraw {
            user,
            request,
            amount,
        } => {
            service.withdraw(user, amount, request)?;
        }
    }
    Ok(())
}

/// Process operations from a CSV reader.
///
/// Rows are streamed; malformed rows and rejected operations are logged and
/// skipped.
///
/// # CSV Format
///
/// Expected columns: `type, user, request, amount`
/// - `type`: open, deposit, spin, withdraw, deactivate
/// - `user`: User ID (u32)
/// - `request`: Idempotency key (gateway reference for deposits)
/// - `amount`: Decimal amount or stake (empty for open/deactivate)
///
/// # Example
///
/// ```csv
/// type,user,request,amount
/// open,1,,
/// deposit,1,pi_1,50.0
/// spin,1,spin-1,5.0
/// ```
///
/// # Errors
///
/// Returns a CSV error if the reader fails.
fn process_operations<R: Read>(service: &Service, reader: R) -> Result<(), csv::Error> {
    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .has_headers(true)
        .from_reader(reader);

    for (line, result) in rdr.deserialize::<CsvRecord>().enumerate() {
        match result {
            Ok(record) => {
                let Some(operation) = record.into_operation() else {
                    warn!(line = line + 2, "skipping invalid operation");
                    continue;
                };
                if let Err(e) = apply(service, operation.clone()) {
                    warn!(line = line + 2, error = %e, ?operation, "operation rejected");
                }
            }
            Err(e) => {
                warn!(line = line + 2, error = %e, "skipping malformed row");
            }
        }
    }

    Ok(())
}

/// Reconciles every account against the ledger and logs any that fail.
///
/// Returns the number of accounts that drifted or could not be audited.
fn audit_accounts<S: Store, R: SampleSource>(service: &Settlement<S, R>) -> usize {
    let accounts = match service.store().accounts() {
        Ok(accounts) => accounts,
        Err(e) => {
            warn!(error = %e, "could not list accounts for audit");
            return 0;
        }
    };

    let mut failed = 0;
    for account in accounts {
        match service.audit(account.user_id) {
            Ok(report) if report.is_consistent() => {}
            Ok(report) => {
                warn!(user = %account.user_id, drift = %report.drift(), "reconciliation failed");
                failed += 1;
            }
            Err(e) => {
                warn!(user = %account.user_id, error = %e, "audit failed");
                failed += 1;
            }
        }
    }
    failed
}

/// Write account states as CSV.
///
/// Columns: `user, balance, version, active`
fn write_accounts<W: Write>(service: &Service, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);
    let accounts = service
        .store()
        .accounts()
        .map_err(|e| csv::Error::from(std::io::Error::other(e.to_string())))?;
    for account in accounts {
        wtr.serialize(account)?;
    }
    wtr.flush()?;
    Ok(())
}

/// One ledger entry flattened for CSV.
#[derive(Debug, Serialize)]
struct LedgerRow {
    entry: u64,
    user: u32,
    kind: String,
    amount: Decimal,
    request: String,
    balance: Decimal,
    timestamp: u64,
    stake: Option<Decimal>,
    payout: Option<Decimal>,
    segment: Option<usize>,
    nonce: Option<u64>,
}

/// Write every ledger entry in append order.
fn write_ledger<W: Write>(service: &Service, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);
    for entry in service.store().ledger().entries() {
        wtr.serialize(LedgerRow {
            entry: entry.entry_id.0,
            user: entry.user_id.0,
            kind: entry.kind.to_string(),
            amount: entry.amount,
            request: entry.request_id.0,
            balance: entry.resulting_balance,
            timestamp: entry.timestamp,
            stake: entry.spin.map(|s| s.stake),
            payout: entry.spin.map(|s| s.payout),
            segment: entry.spin.map(|s| s.segment),
            nonce: entry.spin.and_then(|s| s.nonce),
        })?;
    }
    wtr.flush()?;
    Ok(())
}
