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

//! Benchmarks for outcome draws and settlement.
//!
//! Run with: cargo bench
//!
//! Benchmarks include:
//! - Raw outcome table draws and sample derivation
//! - Single-threaded spin and deposit settlement
//! - Multi-threaded settlement for one user and across users

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use rayon::prelude::*;
use rust_decimal::Decimal;
use spin_ledger_rs::{
    MemoryStore, OsEntropy, OutcomeTable, ProvablyFair, Sample, Settlement, UserId,
    fairness::derive_sample,
};
use std::sync::atomic::{AtomicU64, Ordering};

// =============================================================================
// Helper Functions
// =============================================================================

fn funded_service(users: u32, balance: i64) -> Settlement<MemoryStore, ProvablyFair> {
    let settlement = Settlement::new(MemoryStore::new(), ProvablyFair::new("bench", "client"));
    for user in 1..=users {
        settlement.open_account(UserId(user)).unwrap();
        settlement
            .credit_deposit(UserId(user), Decimal::from(balance), "initial-deposit")
            .unwrap();
    }
    settlement
}

// =============================================================================
// Outcome Benchmarks
// =============================================================================

fn bench_draw(c: &mut Criterion) {
    let table = OutcomeTable::standard_wheel();
    let mut bits = 0u64;
    c.bench_function("draw_standard_wheel", |b| {
        b.iter(|| {
            bits = bits.wrapping_add(0x9E37_79B9_7F4A_7C15);
            black_box(table.draw(Sample::from_u64(black_box(bits))))
        })
    });
}

fn bench_samples(c: &mut Criterion) {
    let mut group = c.benchmark_group("samples");

    group.bench_function("os_entropy", |b| {
        use spin_ledger_rs::SampleSource;
        b.iter(|| black_box(OsEntropy.next_sample()))
    });

    group.bench_function("derive_sample", |b| {
        let mut nonce = 0u64;
        b.iter(|| {
            nonce += 1;
            black_box(derive_sample("server", "client", black_box(nonce)))
        })
    });

    group.finish();
}

// =============================================================================
// Single-Threaded Benchmarks
// =============================================================================

fn bench_single_spin(c: &mut Criterion) {
    c.bench_function("single_spin", |b| {
        let settlement = funded_service(1, 1_000_000_000);
        let mut request = 0u64;
        b.iter(|| {
            request += 1;
            black_box(
                settlement
                    .spin(UserId(1), Decimal::ONE, format!("spin-{request}"))
                    .unwrap(),
            );
        })
    });
}

fn bench_replayed_spin(c: &mut Criterion) {
    c.bench_function("replayed_spin", |b| {
        let settlement = funded_service(1, 100);
        settlement.spin(UserId(1), Decimal::ONE, "spin-1").unwrap();
        b.iter(|| black_box(settlement.spin(UserId(1), Decimal::ONE, "spin-1").unwrap()))
    });
}

fn bench_spin_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("spin_throughput");

    for count in [100, 1_000, 10_000].iter() {
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            b.iter(|| {
                let settlement = funded_service(1, 1_000_000);
                for i in 0..count {
                    let _ = settlement.spin(UserId(1), Decimal::ONE, format!("spin-{i}"));
                }
                black_box(&settlement);
            })
        });
    }
    group.finish();
}

// =============================================================================
// Multi-Threaded Benchmarks
// =============================================================================

fn bench_parallel_spins_same_user(c: &mut Criterion) {
    let mut group = c.benchmark_group("parallel_spins_same_user");

    for count in [1_000, 10_000].iter() {
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            b.iter(|| {
                let settlement = funded_service(1, 1_000_000);
                let request = AtomicU64::new(0);

                (0..count).into_par_iter().for_each(|_| {
                    let id = request.fetch_add(1, Ordering::SeqCst);
                    let _ = settlement.spin(UserId(1), Decimal::ONE, format!("spin-{id}"));
                });

                black_box(&settlement);
            })
        });
    }
    group.finish();
}

fn bench_parallel_spins_different_users(c: &mut Criterion) {
    let mut group = c.benchmark_group("parallel_spins_different_users");

    for num_users in [10, 100, 1_000].iter() {
        let spins_per_user = 100u64;
        let total = *num_users as u64 * spins_per_user;

        group.throughput(Throughput::Elements(total));
        group.bench_with_input(
            BenchmarkId::from_parameter(num_users),
            num_users,
            |b, &num_users| {
                b.iter_batched(
                    || funded_service(num_users, 1_000_000),
                    |settlement| {
                        (1..=num_users).into_par_iter().for_each(|user| {
                            for i in 0..spins_per_user {
                                let _ = settlement.spin(
                                    UserId(user),
                                    Decimal::ONE,
                                    format!("spin-{i}"),
                                );
                            }
                        });
                        black_box(&settlement);
                    },
                    criterion::BatchSize::SmallInput,
                )
            },
        );
    }
    group.finish();
}

fn bench_audit(c: &mut Criterion) {
    let mut group = c.benchmark_group("audit");

    for entries in [100, 1_000, 10_000].iter() {
        group.throughput(Throughput::Elements(*entries as u64));
        group.bench_with_input(BenchmarkId::from_parameter(entries), entries, |b, &entries| {
            let settlement = funded_service(1, 1_000_000);
            for i in 0..entries {
                let _ = settlement.spin(UserId(1), Decimal::ONE, format!("spin-{i}"));
            }
            b.iter(|| black_box(settlement.audit(UserId(1)).unwrap()))
        });
    }
    group.finish();
}

criterion_group!(outcome_benches, bench_draw, bench_samples);

criterion_group!(
    single_threaded_benches,
    bench_single_spin,
    bench_replayed_spin,
    bench_spin_throughput,
    bench_audit,
);

criterion_group!(
    multi_threaded_benches,
    bench_parallel_spins_same_user,
    bench_parallel_spins_different_users,
);

criterion_main!(outcome_benches, single_threaded_benches, multi_threaded_benches);
