//! Rolling 24h window and cap evaluation.
//!
//! Pure logic: nothing here touches storage or the clock.

use crate::ledger::Counter;
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

/// Length of one accounting window.
pub fn window_length() -> Duration {
    Duration::hours(24)
}

/// Which cap rejected a request.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapExceeded {
    #[error("transaction exceeds total allowed funds per day")]
    Total,
    #[error("transaction exceeds daily allowed funds per address")]
    Address,
}

/// Resets a counter whose window never started or has elapsed.
///
/// Idempotent: applying it twice at the same `now` yields the same counter.
pub fn apply_window(counter: Counter, now: DateTime<Utc>) -> Counter {
    if counter.is_unset() || now - counter.window_start >= window_length() {
        Counter {
            amount: 0,
            window_start: now,
        }
    } else {
        counter
    }
}

/// Daily caps and the fixed amount each disbursement adds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapPolicy {
    pub total_cap: u64,
    pub address_cap: u64,
    pub disbursement: u64,
}

impl CapPolicy {
    /// Global cap first, so an exhausted pool is always reported as such.
    pub fn check(&self, global: &Counter, address: &Counter) -> Result<(), CapExceeded> {
        if self.exhausted(global.amount, self.total_cap) {
            return Err(CapExceeded::Total);
        }
        if self.exhausted(address.amount, self.address_cap) {
            return Err(CapExceeded::Address);
        }
        Ok(())
    }

    /// Full once at the cap, or when one more disbursement would pass it.
    fn exhausted(&self, amount: u64, cap: u64) -> bool {
        amount >= cap || amount.saturating_add(self.disbursement) > cap
    }
}
