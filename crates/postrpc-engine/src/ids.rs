//! Request id generation.

use std::sync::LazyLock;
use std::sync::atomic::{AtomicI64, Ordering};

use rand::Rng;

/// Upper bound for the random starting point. Leaves headroom so the
/// counter never wraps in practice.
const MAX_START: i64 = u32::MAX as i64;

/// Monotonic id source starting at a random offset.
#[derive(Debug)]
pub struct IdGenerator {
    next: AtomicI64,
}

impl IdGenerator {
    pub fn new() -> Self {
        let mut rng = rand::rng();
        Self::starting_at(rng.random_range(0..MAX_START))
    }

    pub fn starting_at(start: i64) -> Self {
        Self {
            next: AtomicI64::new(start),
        }
    }

    pub fn next_id(&self) -> i64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

static GLOBAL: LazyLock<IdGenerator> = LazyLock::new(IdGenerator::new);

/// Process-wide unique id.
pub fn unique_id() -> i64 {
    GLOBAL.next_id()
}
