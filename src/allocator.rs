use crate::error::Error;
use std::alloc::Layout;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// A pluggable allocation gate.
///
/// The tree calls [`Allocator::try_reserve`] before constructing every new
/// node, branch split, or cloned payload. Implementations do not actually
/// hand back memory; the real allocation is performed by `Arc::new` right
/// after a successful reservation. This mirrors a C-style `alloc(size) ->
/// ptr-or-null` contract while keeping the actual node storage in safe,
/// GC-free `Arc`s.
pub trait Allocator {
    /// Reserve capacity for a block with the given layout.
    ///
    /// Returns `Err(Error::OutOfMemory)` if the reservation is denied; the
    /// caller must not allocate anything in that case.
    fn try_reserve(&self, layout: Layout) -> Result<(), Error>;
}

/// The default allocator: every reservation succeeds.
///
/// This delegates to the global allocator's normal, infallible-in-practice
/// behaviour; Rust gives no portable way to probe the global allocator for
/// remaining capacity ahead of time, so this is unconditional.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemAllocator;

impl Allocator for SystemAllocator {
    fn try_reserve(&self, _layout: Layout) -> Result<(), Error> {
        Ok(())
    }
}

/// An allocator that denies a configurable fraction of reservations.
///
/// Used to drive the chaos-testing scenario (SPEC_FULL §8, scenario 6):
/// under repeated random denial, every failed tree operation must leave the
/// tree observably unchanged. `odds` matches the C reference harness's
/// `rand_alloc_fail_odds`: a reservation fails with probability `1 / odds`.
pub struct FaultInjectingAllocator {
    odds: u64,
    counter: AtomicU64,
    denied: AtomicUsize,
}

impl FaultInjectingAllocator {
    /// Creates an allocator that denies roughly one in `odds` reservations.
    ///
    /// `odds` of 0 or 1 denies every reservation.
    pub fn new(odds: u64) -> Self {
        Self {
            odds: odds.max(1),
            counter: AtomicU64::new(0),
            denied: AtomicUsize::new(0),
        }
    }

    /// Number of reservations denied so far.
    pub fn denied_count(&self) -> usize {
        self.denied.load(Ordering::Relaxed)
    }
}

impl Allocator for FaultInjectingAllocator {
    fn try_reserve(&self, _layout: Layout) -> Result<(), Error> {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        if n % self.odds == 0 {
            self.denied.fetch_add(1, Ordering::Relaxed);
            log::warn!("fault-injecting allocator denied reservation #{n}");
            return Err(Error::OutOfMemory);
        }
        Ok(())
    }
}
