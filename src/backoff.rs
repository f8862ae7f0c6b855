/// Simplified from crossbeam-utils
use std::cell::Cell;

use crate::{Conflictable, Result, warn};

const SPIN_LIMIT: u32 = 6;
const YIELD_LIMIT: u32 = 10;
const CONTENDED_ATTEMPTS: usize = 10_000;

/// Performs exponential backoff in optimistic retry loops.
///
/// Each step spins roughly twice as long as the previous one. Past the
/// spin limit the current thread yields to the OS scheduler instead, so a
/// writer that keeps losing the same compare-and-swap race stops burning
/// the core the winner needs.
pub(crate) struct Backoff {
    step: Cell<u32>,
}

impl Backoff {
    pub(crate) const fn new() -> Self {
        Backoff { step: Cell::new(0) }
    }

    /// Backs off after losing a race against another thread that made
    /// progress.
    #[inline]
    pub(crate) fn spin(&self) {
        if self.step.get() <= SPIN_LIMIT {
            for _ in 0..1 << self.step.get() {
                std::hint::spin_loop();
            }
        } else {
            std::thread::yield_now();
        }

        if self.step.get() <= YIELD_LIMIT {
            self.step.set(self.step.get() + 1);
        }
    }
}

/// Runs `attempt` until it completes without a `Conflict`, backing off
/// between attempts. Real errors are returned immediately.
pub(crate) fn retry<T, F>(mut attempt: F) -> Result<T>
where
    F: FnMut() -> Result<Conflictable<T>>,
{
    let backoff = Backoff::new();
    let mut attempts = 0_usize;
    loop {
        if let Ok(ret) = attempt()? {
            return Ok(ret);
        }
        attempts += 1;
        if attempts == CONTENDED_ATTEMPTS {
            warn!("still retrying after {} conflicting attempts", attempts);
        }
        backoff.spin();
    }
}
