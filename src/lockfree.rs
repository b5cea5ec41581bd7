//! Lock-free cells for the live control path.
//!
//! Writers (the UI side) never wait on the render pass and vice versa: every
//! write is a single atomic store and the last value written wins.

use std::sync::atomic::{AtomicU64, Ordering};

use atomic_float::AtomicF64;

/// Cache-line aligned atomic f64.
#[derive(Debug)]
#[repr(align(64))]
pub struct AtomicDouble {
    value: AtomicF64,
}

impl AtomicDouble {
    pub fn new(value: f64) -> Self {
        Self {
            value: AtomicF64::new(value),
        }
    }

    #[inline]
    pub fn get(&self) -> f64 {
        self.value.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn set(&self, value: f64) {
        self.value.store(value, Ordering::Relaxed);
    }
}

impl Default for AtomicDouble {
    fn default() -> Self {
        Self::new(0.0)
    }
}

/// Monotonic revision counter guarding a group of [`AtomicDouble`]s.
///
/// Values are stored first, then the revision is bumped with `Release`; a
/// reader that observes the new revision with `Acquire` sees those values or
/// newer ones.
#[derive(Debug, Default)]
#[repr(align(64))]
pub struct Revision {
    value: AtomicU64,
}

impl Revision {
    #[inline]
    pub fn bump(&self) -> u64 {
        self.value.fetch_add(1, Ordering::Release) + 1
    }

    #[inline]
    pub fn current(&self) -> u64 {
        self.value.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn last_write_wins() {
        let cell = AtomicDouble::new(1.0);
        cell.set(2.0);
        cell.set(-3.5);
        assert_eq!(cell.get(), -3.5);
    }

    #[test]
    fn revision_is_monotonic() {
        let rev = Revision::default();
        assert_eq!(rev.current(), 0);
        assert_eq!(rev.bump(), 1);
        assert_eq!(rev.bump(), 2);
        assert_eq!(rev.current(), 2);
    }

    #[test]
    fn concurrent_reader_never_sees_value_older_than_revision() {
        let cell = Arc::new(AtomicDouble::new(0.0));
        let rev = Arc::new(Revision::default());

        let writer = {
            let (cell, rev) = (Arc::clone(&cell), Arc::clone(&rev));
            thread::spawn(move || {
                for i in 1..=10_000 {
                    cell.set(i as f64);
                    rev.bump();
                }
            })
        };
        let reader = {
            let (cell, rev) = (Arc::clone(&cell), Arc::clone(&rev));
            thread::spawn(move || {
                loop {
                    let seen = rev.current();
                    let value = cell.get();
                    assert!(value >= seen as f64, "revision {seen} but value {value}");
                    if seen == 10_000 {
                        break;
                    }
                }
            })
        };
        writer.join().unwrap();
        reader.join().unwrap();

        assert_eq!(rev.current(), 10_000);
        assert_eq!(cell.get(), 10_000.0);
    }
}
