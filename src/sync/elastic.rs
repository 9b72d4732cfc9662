//! Growable thread-safe byte buffer.
//!
//! [`ElasticRing`] wraps the core ring in a reader/writer lock and grows the
//! backing storage instead of rejecting writes. Reads and steady-state
//! writes share the lock and proceed concurrently against the ring's atomic
//! counters; only the rare grow-then-write slow path takes it exclusively.
//!
//! # Overview
//!
//! - `put` never fails for lack of space: the buffer grows by ×3/2 steps
//!   from a floor of 16 bytes until the write fits
//! - Capacity is monotonic: the buffer never shrinks
//! - Many threads may *take turns* in the writer role or the reader role;
//!   a role mutex serializes each role, so the API stays safe even when the
//!   one-logical-writer/one-logical-reader discipline is ignored
//!
//! # Example
//!
//! ```
//! use raceway::sync::elastic::ElasticRing;
//!
//! let ring = ElasticRing::new(4);
//! ring.put(&[0u8; 20])?;           // grows transparently
//! assert!(ring.capacity() >= 20);
//!
//! let mut buf = [0u8; 20];
//! assert!(ring.get(&mut buf));
//! # Ok::<(), raceway::sync::elastic::CapacityOverflow>(())
//! ```

use bytemuck::{Pod, Zeroable};
use parking_lot::{Mutex, RwLock};
use thiserror::Error;

use crate::spsc::ring::{Ring, zeroed_arena};
use crate::trace::{debug, error};

/// Smallest capacity the growth procedure will produce.
const GROWTH_FLOOR: usize = 16;

/// The ×3/2 capacity sequence overflowed `usize` before reaching the
/// target.
///
/// This is the only failure `put` can report; it is unrecoverable for the
/// write in question, but the buffer itself remains valid and untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cannot grow ring buffer to hold {required} bytes: capacity sequence overflows usize")]
pub struct CapacityOverflow {
    /// Total bytes (used + pending write) the buffer would have to hold.
    pub required: usize,
}

/// Computes the next capacity: from `max(current, 16)`, multiply by 3/2
/// until the candidate covers `required`.
///
/// Pure arithmetic, separated from the locking so the progression can be
/// pinned in tests. The checked multiply is what turns an impossible
/// request into [`CapacityOverflow`] instead of a wrapped allocation size.
fn grow_capacity(current: usize, required: usize) -> Result<usize, CapacityOverflow> {
    let mut candidate = current.max(GROWTH_FLOOR);
    while candidate < required {
        candidate = candidate.checked_mul(3).ok_or(CapacityOverflow { required })? / 2;
    }
    Ok(candidate)
}

/// Growable byte ring buffer shared between threads.
///
/// Semantically a [`crate::sync::spsc`] channel whose `put` cannot fail:
/// oversupply is resolved by reallocating to a larger arena while holding
/// the lock exclusively, preserving the buffered bytes in order.
///
/// # Locking
///
/// | Operation | Role mutex | RwLock |
/// |-----------|------------|--------|
/// | `get`/`peek`/`discard` | reader role | shared |
/// | `put` fast path | writer role | shared |
/// | `put` grow path | writer role | exclusive |
/// | accessors | — | shared |
///
/// One writer and one reader proceed concurrently on the shared lock; the
/// role mutexes only serialize threads competing for the *same* role.
pub struct ElasticRing {
    ring: RwLock<Ring>,
    write_role: Mutex<()>,
    read_role: Mutex<()>,
}

impl ElasticRing {
    /// Creates a buffer with an initial capacity in bytes.
    ///
    /// The capacity is a starting point, not a limit: writes beyond it
    /// reallocate. A capacity of 0 is valid.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: RwLock::new(Ring::new(capacity)),
            write_role: Mutex::new(()),
            read_role: Mutex::new(()),
        }
    }

    /// Current usable byte capacity. Monotonically non-decreasing.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.ring.read().capacity()
    }

    /// Bytes currently readable. A snapshot.
    #[must_use]
    pub fn size_used(&self) -> usize {
        self.ring.read().size_used()
    }

    /// Bytes currently free at the current capacity. A snapshot.
    #[must_use]
    pub fn size_free(&self) -> usize {
        self.ring.read().size_free()
    }

    /// Appends `src`, growing the buffer if it does not fit.
    ///
    /// The common case takes the lock in shared mode and writes in place;
    /// only when free space is insufficient does the call upgrade to the
    /// exclusive lock, reallocate, and retry.
    ///
    /// # Errors
    ///
    /// [`CapacityOverflow`] if the required total size cannot be reached by
    /// the ×3/2 growth sequence without overflowing `usize`. The buffer is
    /// left untouched in that case.
    pub fn put(&self, src: &[u8]) -> Result<(), CapacityOverflow> {
        let _role = self.write_role.lock();

        {
            let ring = self.ring.read();
            if ring.size_free() >= src.len() {
                // SAFETY: The writer-role mutex makes this thread the sole
                // producer; the shared lock keeps the structure stable. A
                // concurrent reader is the peer the ring's protocol handles.
                let ok = unsafe { ring.put_bytes(src) };
                debug_assert!(ok, "free space was checked under the same lock");
                return Ok(());
            }
        }

        let mut ring = self.ring.write();

        // Re-check under the exclusive lock: a reader may have drained, or
        // a writer ahead of us in the role queue may have already grown.
        if ring.size_free() < src.len() {
            let used = ring.size_used();
            let required = used.saturating_add(src.len());
            let new_capacity = match grow_capacity(ring.capacity(), required) {
                Ok(cap) => cap,
                Err(overflow) => {
                    error!("ring buffer growth failed: {overflow}");
                    return Err(overflow);
                }
            };
            debug!(
                "growing ring buffer: capacity {} -> {new_capacity}, {used} bytes live",
                ring.capacity()
            );
            ring.replace_storage(zeroed_arena(new_capacity + 1), used);
        }

        // SAFETY: Exclusive lock; no other thread holds any access.
        let ok = unsafe { ring.put_bytes(src) };
        assert!(ok, "grown ring must accept the pending write");
        Ok(())
    }

    /// Appends a single fixed-size value via its raw byte representation.
    ///
    /// # Errors
    ///
    /// See [`put`](Self::put).
    pub fn put_value<T: Pod>(&self, value: &T) -> Result<(), CapacityOverflow> {
        self.put(bytemuck::bytes_of(value))
    }

    /// Appends a slice of fixed-size values.
    ///
    /// # Errors
    ///
    /// See [`put`](Self::put).
    pub fn put_slice<T: Pod>(&self, values: &[T]) -> Result<(), CapacityOverflow> {
        self.put(bytemuck::cast_slice(values))
    }

    /// Fills `dst` with the next bytes and consumes them.
    ///
    /// Returns `false` without any state change if fewer than `dst.len()`
    /// bytes are readable. Never triggers growth.
    pub fn get(&self, dst: &mut [u8]) -> bool {
        let _role = self.read_role.lock();
        let ring = self.ring.read();
        // SAFETY: The reader-role mutex makes this thread the sole
        // consumer; the shared lock keeps the structure stable. A
        // concurrent fast-path writer is the peer the protocol handles.
        unsafe { ring.read_bytes(dst, true) }
    }

    /// Fills `dst` with the next bytes without consuming them.
    pub fn peek(&self, dst: &mut [u8]) -> bool {
        let _role = self.read_role.lock();
        let ring = self.ring.read();
        // SAFETY: As in `get`.
        unsafe { ring.read_bytes(dst, false) }
    }

    /// Advances past `len` bytes without copying them.
    pub fn discard(&self, len: usize) -> bool {
        let _role = self.read_role.lock();
        let ring = self.ring.read();
        // SAFETY: As in `get`.
        unsafe { ring.discard(len) }
    }

    /// Reads a single fixed-size value via its raw byte representation.
    #[must_use]
    pub fn get_value<T: Pod>(&self) -> Option<T> {
        let mut value = T::zeroed();
        self.get(bytemuck::bytes_of_mut(&mut value)).then_some(value)
    }

    /// Reads a single fixed-size value without consuming it.
    #[must_use]
    pub fn peek_value<T: Pod>(&self) -> Option<T> {
        let mut value = T::zeroed();
        self.peek(bytemuck::bytes_of_mut(&mut value)).then_some(value)
    }

    /// Fills a slice of fixed-size values and consumes them.
    pub fn get_slice<T: Pod>(&self, dst: &mut [T]) -> bool {
        self.get(bytemuck::cast_slice_mut(dst))
    }

    /// Fills a slice of fixed-size values without consuming them.
    pub fn peek_slice<T: Pod>(&self, dst: &mut [T]) -> bool {
        self.peek(bytemuck::cast_slice_mut(dst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grow_capacity_progression() {
        // Floor kicks in below 16.
        assert_eq!(grow_capacity(0, 1), Ok(16));
        assert_eq!(grow_capacity(4, 5), Ok(16));
        // 4 -> 16 -> 24 for a 20-byte requirement.
        assert_eq!(grow_capacity(4, 20), Ok(24));
        // Already sufficient: unchanged.
        assert_eq!(grow_capacity(16, 16), Ok(16));
        assert_eq!(grow_capacity(100, 50), Ok(100));
        // 24 -> 36 -> 54.
        assert_eq!(grow_capacity(24, 25), Ok(36));
        assert_eq!(grow_capacity(24, 37), Ok(54));
    }

    #[test]
    fn grow_capacity_overflow() {
        let required = usize::MAX;
        assert_eq!(
            grow_capacity(usize::MAX / 2, required),
            Err(CapacityOverflow { required })
        );
    }

    #[test]
    fn put_get_without_growth() {
        let ring = ElasticRing::new(16);
        ring.put(&[1, 2, 3]).unwrap();
        assert_eq!(ring.capacity(), 16);
        assert_eq!(ring.size_used(), 3);

        let mut out = [0u8; 3];
        assert!(ring.get(&mut out));
        assert_eq!(out, [1, 2, 3]);
        assert_eq!(ring.size_used(), 0);
    }

    #[test]
    fn oversized_put_grows_and_preserves_bytes() {
        let ring = ElasticRing::new(4);

        let payload: Vec<u8> = (0..20).collect();
        ring.put(&payload).unwrap();

        // 4 -> 16 -> 24 following the floor-16, ×3/2 rule.
        assert_eq!(ring.capacity(), 24);
        assert_eq!(ring.size_used(), 20);

        let mut out = [0u8; 20];
        assert!(ring.get(&mut out));
        assert_eq!(out.as_slice(), payload.as_slice());
        assert_eq!(ring.size_used(), 0);
    }

    #[test]
    fn growth_preserves_wrapped_contents() {
        let ring = ElasticRing::new(4);
        ring.put(&[1, 2, 3, 4]).unwrap();

        let mut head = [0u8; 3];
        assert!(ring.get(&mut head));
        assert_eq!(head, [1, 2, 3]);

        // This write wraps across the end of the 5-slot arena.
        ring.put(&[5, 6]).unwrap();
        assert_eq!(ring.capacity(), 4);

        // Now force growth with the live bytes [4, 5, 6] in wrapped form.
        let tail: Vec<u8> = (7..17).collect();
        ring.put(&tail).unwrap();
        assert!(ring.capacity() >= 13);

        let mut out = [0u8; 13];
        assert!(ring.get(&mut out));
        assert_eq!(out[..3], [4, 5, 6]);
        assert_eq!(out[3..], tail[..]);
    }

    #[test]
    fn capacity_is_monotonic() {
        let ring = ElasticRing::new(0);
        let mut last = ring.capacity();

        for chunk in 1..64usize {
            ring.put(&vec![0u8; chunk]).unwrap();
            assert!(ring.capacity() >= last);
            last = ring.capacity();

            let mut out = vec![0u8; chunk];
            assert!(ring.get(&mut out));
            assert_eq!(ring.capacity(), last, "reads must never shrink the buffer");
        }
    }

    #[test]
    fn read_side_matches_fixed_semantics() {
        let ring = ElasticRing::new(8);
        ring.put(&[1, 2, 3, 4]).unwrap();

        let mut big = [0u8; 5];
        assert!(!ring.get(&mut big));
        assert!(!ring.peek(&mut big));
        assert!(!ring.discard(5));
        assert_eq!(ring.size_used(), 4);

        let mut peeked = [0u8; 2];
        assert!(ring.peek(&mut peeked));
        assert_eq!(peeked, [1, 2]);
        assert_eq!(ring.size_used(), 4);

        assert!(ring.discard(2));
        let mut rest = [0u8; 2];
        assert!(ring.get(&mut rest));
        assert_eq!(rest, [3, 4]);
    }

    #[test]
    fn typed_roundtrip_through_growth() {
        let ring = ElasticRing::new(0);

        for i in 0..100u64 {
            ring.put_value(&i).unwrap();
        }
        assert!(ring.capacity() >= 800);

        for i in 0..100u64 {
            assert_eq!(ring.get_value::<u64>(), Some(i));
        }
        assert_eq!(ring.get_value::<u64>(), None);
    }

    #[test]
    fn concurrent_writer_and_reader() {
        use std::sync::Arc;

        let ring = Arc::new(ElasticRing::new(32));
        let count = 10_000u64;

        let writer = {
            let ring = Arc::clone(&ring);
            std::thread::spawn(move || {
                for i in 0..count {
                    ring.put_value(&i).unwrap();
                }
            })
        };

        let reader = {
            let ring = Arc::clone(&ring);
            std::thread::spawn(move || {
                for expected in 0..count {
                    loop {
                        if let Some(value) = ring.get_value::<u64>() {
                            assert_eq!(value, expected);
                            break;
                        }
                        std::hint::spin_loop();
                    }
                }
            })
        };

        writer.join().unwrap();
        reader.join().unwrap();
    }
}
