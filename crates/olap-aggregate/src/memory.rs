#![forbid(unsafe_code)]

use crate::error::{AggError, AggResult};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Byte budget shared by every table of a query (or of several concurrent queries).
///
/// Tables reserve before they allocate; a refused reservation surfaces as
/// [`AggError::InsufficientResources`] instead of an allocator abort or silent degradation.
#[derive(Debug)]
pub struct MemoryBudget {
    limit: usize,
    used: AtomicUsize,
}

impl MemoryBudget {
    pub fn new(limit: usize) -> Arc<Self> {
        log::debug!("created aggregation memory budget of {limit} bytes");
        Arc::new(Self {
            limit,
            used: AtomicUsize::new(0),
        })
    }

    pub fn unbounded() -> Arc<Self> {
        Self::new(usize::MAX)
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn used(&self) -> usize {
        self.used.load(Ordering::Relaxed)
    }

    pub fn available(&self) -> usize {
        self.limit.saturating_sub(self.used())
    }

    /// An empty reservation against this budget.
    pub fn reservation(self: &Arc<Self>) -> MemoryReservation {
        MemoryReservation {
            budget: Arc::clone(self),
            size: 0,
        }
    }

    fn try_grow(&self, what: &'static str, bytes: usize) -> AggResult<()> {
        self.used
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |used| {
                used.checked_add(bytes).filter(|&next| next <= self.limit)
            })
            .map(|_| ())
            .map_err(|used| AggError::InsufficientResources {
                what,
                requested: bytes,
                available: self.limit.saturating_sub(used),
                limit: self.limit,
            })
    }

    fn release(&self, bytes: usize) {
        self.used.fetch_sub(bytes, Ordering::Relaxed);
    }
}

/// Bytes held against a [`MemoryBudget`]; released on drop.
#[derive(Debug)]
pub struct MemoryReservation {
    budget: Arc<MemoryBudget>,
    size: usize,
}

impl MemoryReservation {
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn budget(&self) -> &Arc<MemoryBudget> {
        &self.budget
    }

    pub fn try_grow(&mut self, what: &'static str, bytes: usize) -> AggResult<()> {
        if bytes == 0 {
            return Ok(());
        }
        self.budget.try_grow(what, bytes)?;
        self.size += bytes;
        Ok(())
    }

    pub fn shrink(&mut self, bytes: usize) {
        let bytes = bytes.min(self.size);
        self.budget.release(bytes);
        self.size -= bytes;
    }

    /// Moves up to `bytes` of this reservation into a new one on the same budget.
    pub fn split(&mut self, bytes: usize) -> MemoryReservation {
        let bytes = bytes.min(self.size);
        self.size -= bytes;
        MemoryReservation {
            budget: Arc::clone(&self.budget),
            size: bytes,
        }
    }

    /// Takes over `other`'s bytes without touching the budget.
    pub fn merge(&mut self, mut other: MemoryReservation) {
        debug_assert!(Arc::ptr_eq(&self.budget, &other.budget));
        self.size += other.size;
        other.size = 0;
    }
}

impl Drop for MemoryReservation {
    fn drop(&mut self) {
        if self.size > 0 {
            self.budget.release(self.size);
        }
    }
}

/// `len` copies of `value`, reserved against `reservation` and allocated fallibly.
pub(crate) fn try_alloc_filled<T: Clone>(
    reservation: &mut MemoryReservation,
    what: &'static str,
    len: usize,
    value: T,
) -> AggResult<Vec<T>> {
    let bytes = len
        .checked_mul(std::mem::size_of::<T>())
        .ok_or_else(|| AggError::InsufficientResources {
            what,
            requested: usize::MAX,
            available: reservation.budget.available(),
            limit: reservation.budget.limit(),
        })?;
    reservation.try_grow(what, bytes)?;
    let mut out = Vec::new();
    if out.try_reserve_exact(len).is_err() {
        reservation.shrink(bytes);
        return Err(AggError::InsufficientResources {
            what,
            requested: bytes,
            available: reservation.budget.available(),
            limit: reservation.budget.limit(),
        });
    }
    out.resize(len, value);
    Ok(out)
}

/// Makes room for `additional` more elements in `vec`, reserving the extra capacity first.
///
/// Capacity at least doubles so that repeated pushes stay amortized.
pub(crate) fn try_reserve_vec<T>(
    vec: &mut Vec<T>,
    additional: usize,
    reservation: &mut MemoryReservation,
    what: &'static str,
) -> AggResult<()> {
    let needed = vec.len().saturating_add(additional);
    if needed <= vec.capacity() {
        return Ok(());
    }
    let target = needed.max(vec.capacity().saturating_mul(2)).max(8);
    let bytes = (target - vec.capacity()).saturating_mul(std::mem::size_of::<T>());
    reservation.try_grow(what, bytes)?;
    if vec.try_reserve_exact(target - vec.len()).is_err() {
        reservation.shrink(bytes);
        return Err(AggError::InsufficientResources {
            what,
            requested: bytes,
            available: reservation.budget.available(),
            limit: reservation.budget.limit(),
        });
    }
    Ok(())
}
