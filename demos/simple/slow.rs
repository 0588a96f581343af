// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! CPU-heavy busywork that shows up clearly in a CPU profile.

use std::hint::black_box;
use std::time::Duration;

#[inline(never)]
fn collatz_steps(mut n: u64) -> u64 {
    let mut steps = 0;
    while n != 1 {
        n = if n % 2 == 0 { n / 2 } else { 3 * n + 1 };
        steps += 1;
    }
    steps
}

#[inline(never)]
fn longest_collatz(limit: u64) -> u64 {
    (1..limit)
        .max_by_key(|&n| collatz_steps(black_box(n)))
        .unwrap_or(1)
}

#[inline(never)]
fn sum_of_primes(limit: u64) -> u64 {
    (2..limit)
        .filter(|&n| (2..n).take_while(|d| d * d <= n).all(|d| n % d != 0))
        .sum()
}

/// Burns CPU on the blocking pool forever, pausing briefly between rounds.
pub async fn run() {
    loop {
        let (collatz, primes) = tokio::task::spawn_blocking(|| {
            (longest_collatz(black_box(300_000)), sum_of_primes(black_box(200_000)))
        })
        .await
        .unwrap();
        tracing::debug!(collatz, primes, "round done");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
