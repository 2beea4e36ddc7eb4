// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Advisory lock keys and acquisition policy.

use std::fmt;
use std::time::Duration;

use rand::Rng;
use sha2::{Digest, Sha256};
use tracing::debug;
use uuid::Uuid;

use crate::error::Result;
use crate::store::Transaction;

/// A transaction-scoped named mutex key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockKey(i64);

impl LockKey {
    /// Derive a key from an arbitrary name.
    ///
    /// The first eight bytes of the SHA-256 digest are read big-endian and the
    /// sign bit is cleared, so keys are always non-negative `bigint`s.
    pub fn from_name(name: &str) -> Self {
        let digest = Sha256::digest(name.as_bytes());
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        let raw = u64::from_be_bytes(prefix) & 0x7fff_ffff_ffff_ffff;
        LockKey(raw as i64)
    }

    /// Key guarding a single machine.
    pub fn machine(machine_id: &str) -> Self {
        Self::from_name(machine_id)
    }

    /// Key guarding instance-type capacity of a tenant.
    pub fn tenant_instance_type(tenant_id: Uuid, instance_type_id: Uuid) -> Self {
        Self::from_name(&format!("{tenant_id}-{instance_type_id}"))
    }

    /// Raw value passed to `pg_try_advisory_xact_lock`.
    pub fn value(self) -> i64 {
        self.0
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Bounded retry policy for a non-blocking lock attempt.
///
/// Delays grow exponentially from `delay` with up to `jitter` of random
/// extra wait. Once `attempts` are used up the caller gets `false` and
/// reports the contention; the request itself is never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockPolicy {
    /// Total attempts, at least one.
    pub attempts: u32,
    /// Base delay before the second attempt.
    pub delay: Duration,
    /// Upper bound of random jitter added to each delay.
    pub jitter: Duration,
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_millis(300),
            jitter: Duration::from_millis(100),
        }
    }
}

impl LockPolicy {
    /// A single attempt with no waiting.
    pub fn no_retry() -> Self {
        Self {
            attempts: 1,
            delay: Duration::ZERO,
            jitter: Duration::ZERO,
        }
    }

    /// Policy with a custom number of attempts and default timings.
    pub fn with_attempts(attempts: u32) -> Self {
        Self {
            attempts: attempts.max(1),
            ..Self::default()
        }
    }

    /// Wait before attempt `attempt` (1-based; attempt 1 has no wait).
    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let base = self.delay.saturating_mul(1u32 << (attempt - 2).min(16));
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return base;
        }
        base + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }
}

/// Try to take `key` within `tx`, following `policy`.
///
/// Returns `Ok(false)` when the lock stayed held by another transaction for
/// every attempt.
pub async fn acquire<T>(tx: &mut T, key: LockKey, policy: &LockPolicy) -> Result<bool>
where
    T: Transaction + ?Sized,
{
    let attempts = policy.attempts.max(1);
    for attempt in 1..=attempts {
        let wait = policy.backoff(attempt);
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
        if tx.try_acquire_advisory_lock(key).await? {
            return Ok(true);
        }
        debug!(lock_key = %key, attempt, attempts, "Advisory lock busy");
    }
    Ok(false)
}
