//! Double-buffered state with single-writer / multi-reader handoff.
//!
//! Two preallocated slots hold the state. The writer claims an
//! update-in-progress flag with a compare-and-swap, copies the active slot
//! into the inactive one, mutates the copy and publishes it with a single
//! atomic store of the active index. Readers pin the slot the active index
//! names for the duration of their read, so they see either the old or the
//! new state, never a partial write.
//!
//! Neither side ever blocks: a writer that finds the flag taken, or the
//! inactive slot still pinned by a reader after a short bounded spin, skips
//! the update and reports it to the caller.

use std::cell::UnsafeCell;
use std::hint;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// How many times the writer re-checks a pinned inactive slot before giving up.
const WRITER_SPIN_LIMIT: u32 = 64;

struct Slot<T> {
    value: UnsafeCell<T>,
    readers: AtomicUsize,
}

impl<T> Slot<T> {
    fn new(value: T) -> Self {
        Self {
            value: UnsafeCell::new(value),
            readers: AtomicUsize::new(0),
        }
    }
}

/// Why an update was not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateSkipped {
    /// Another writer holds the update flag.
    Contended,
    /// A reader still pins the inactive slot.
    ReaderPinned,
}

/// Two state slots plus an atomic active index.
pub struct DoubleBuffer<T> {
    slots: [Slot<T>; 2],
    active: AtomicUsize,
    updating: AtomicBool,
}

// SAFETY: the inactive slot is only written while the `updating` flag is held
// and no reader pins it; the active slot is only read. All index and counter
// accesses are SeqCst, so a reader that pins a slot after the writer checked
// it observes that the slot is not active and backs off before reading.
unsafe impl<T: Send> Send for DoubleBuffer<T> {}
unsafe impl<T: Send + Sync> Sync for DoubleBuffer<T> {}

impl<T: Clone> DoubleBuffer<T> {
    /// Create a buffer with both slots holding `initial`.
    pub fn new(initial: T) -> Self {
        Self {
            slots: [Slot::new(initial.clone()), Slot::new(initial)],
            active: AtomicUsize::new(0),
            updating: AtomicBool::new(false),
        }
    }

    /// Apply `f` to a copy of the current state and publish the result.
    ///
    /// Returns `Err` instead of waiting when the update cannot proceed.
    pub fn try_update<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R, UpdateSkipped> {
        if self
            .updating
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(UpdateSkipped::Contended);
        }
        let _claim = Claim(&self.updating);

        let current = self.active.load(Ordering::SeqCst);
        let next = 1 - current;

        let mut spins = 0;
        while self.slots[next].readers.load(Ordering::SeqCst) != 0 {
            if spins == WRITER_SPIN_LIMIT {
                return Err(UpdateSkipped::ReaderPinned);
            }
            spins += 1;
            hint::spin_loop();
        }

        // SAFETY: we hold the update flag, so no other writer touches either
        // slot, and `next` is inactive with no pinned readers. `current` is
        // only read here, which readers may do concurrently.
        let result = unsafe {
            let source = &*self.slots[current].value.get();
            let target = &mut *self.slots[next].value.get();
            target.clone_from(source);
            f(target)
        };

        self.active.store(next, Ordering::SeqCst);
        Ok(result)
    }

    /// Read the currently published state.
    pub fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        loop {
            let index = self.active.load(Ordering::SeqCst);
            let slot = &self.slots[index];
            slot.readers.fetch_add(1, Ordering::SeqCst);
            let _pin = Pin(&slot.readers);
            if self.active.load(Ordering::SeqCst) == index {
                // SAFETY: the slot is active and pinned; the writer never
                // writes a pinned slot and never writes the active one.
                return f(unsafe { &*slot.value.get() });
            }
            hint::spin_loop();
        }
    }

    /// Clone the currently published state.
    pub fn snapshot(&self) -> T {
        self.read(T::clone)
    }

    /// Index of the published slot (0 or 1).
    pub fn active_index(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

impl<T> std::fmt::Debug for DoubleBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DoubleBuffer")
            .field("active", &self.active.load(Ordering::SeqCst))
            .field("updating", &self.updating.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

/// Releases the update flag even if the update closure panics.
struct Claim<'a>(&'a AtomicBool);

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Unpins a slot when the read finishes.
struct Pin<'a>(&'a AtomicUsize);

impl Drop for Pin<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[derive(Clone, Default)]
    struct Record {
        a: u64,
        b: u64,
        c: f64,
        history: Vec<u64>,
    }

    #[test]
    fn test_update_flips_active_index() {
        let buffer = DoubleBuffer::new(0u32);
        assert_eq!(buffer.active_index(), 0);
        buffer.try_update(|v| *v = 7).unwrap();
        assert_eq!(buffer.active_index(), 1);
        assert_eq!(buffer.snapshot(), 7);
        buffer.try_update(|v| *v += 1).unwrap();
        assert_eq!(buffer.active_index(), 0);
        assert_eq!(buffer.snapshot(), 8);
    }

    #[test]
    fn test_nested_update_is_skipped() {
        let buffer = DoubleBuffer::new(1u32);
        let inner = buffer.try_update(|_| buffer.try_update(|v| *v = 99));
        assert_eq!(inner, Ok(Err(UpdateSkipped::Contended)));
        assert_eq!(buffer.snapshot(), 1);
    }

    #[test]
    fn test_pinned_inactive_slot_skips_update() {
        let buffer = DoubleBuffer::new(0u32);
        buffer.try_update(|v| *v = 1).unwrap();
        // Slot 0 is now inactive; pin it the way a slow reader would.
        buffer.slots[0].readers.fetch_add(1, Ordering::SeqCst);
        assert_eq!(
            buffer.try_update(|v| *v = 2),
            Err(UpdateSkipped::ReaderPinned)
        );
        buffer.slots[0].readers.fetch_sub(1, Ordering::SeqCst);
        buffer.try_update(|v| *v = 2).unwrap();
        assert_eq!(buffer.snapshot(), 2);
    }

    #[test]
    fn test_concurrent_readers_never_see_torn_state() {
        let buffer = Arc::new(DoubleBuffer::new(Record::default()));
        let writer_buffer = buffer.clone();

        let writer = thread::spawn(move || {
            let mut published = 0u64;
            for i in 1..=20_000u64 {
                let applied = writer_buffer.try_update(|r| {
                    r.a = i;
                    r.b = i * 2;
                    r.c = i as f64 * 0.5;
                    r.history.push(i);
                    if r.history.len() > 16 {
                        r.history.remove(0);
                    }
                });
                if applied.is_ok() {
                    published = i;
                }
            }
            published
        });

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let buffer = buffer.clone();
                thread::spawn(move || {
                    let mut last_seen = 0;
                    for _ in 0..20_000 {
                        let r = buffer.snapshot();
                        assert_eq!(r.b, r.a * 2);
                        assert_eq!(r.c, r.a as f64 * 0.5);
                        if r.a > 0 {
                            assert_eq!(r.history.last().copied(), Some(r.a));
                        }
                        // A single writer publishes monotonically increasing values.
                        assert!(r.a >= last_seen);
                        last_seen = r.a;
                    }
                })
            })
            .collect();

        let published = writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(buffer.snapshot().a, published);
    }
}
