//! Core lock-free SPSC byte ring algorithm.
//!
//! This module provides the fundamental circular byte buffer shared by the
//! lock-free channel ([`crate::sync::spsc`]) and the growable buffer
//! ([`crate::sync::elastic`]).
//!
//! # Algorithm
//!
//! The arena holds `capacity + 1` bytes; one slot is always kept empty so
//! that `read_pos == write_pos` means empty and never full. Each position
//! counter is owned by one side for writes (producer owns `write_pos`,
//! consumer owns `read_pos`) and read by the other side only for
//! availability checks.
//!
//! The publish protocol is the usual acquire/release pairing:
//! - The producer copies payload bytes into the arena *before* the
//!   release-store of `write_pos`, so a consumer that acquire-loads the new
//!   `write_pos` is guaranteed to see the bytes it reveals.
//! - The consumer copies bytes out *before* the release-store of `read_pos`,
//!   so a producer that acquire-loads the new `read_pos` cannot overwrite
//!   bytes still being read.
//!
//! # Safety
//!
//! The byte-level operations are unsafe because they require the caller to
//! uphold the SPSC invariant: at most one thread in the producer role and at
//! most one thread in the consumer role, with no concurrent access to either
//! role.

use std::cell::UnsafeCell;
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::spsc::wrap;

/// One byte of the shared arena, with interior mutability.
///
/// The cell exists so that both sides can touch the arena through `&Ring`:
/// byte writes go through raw pointers derived from the cell, never through
/// `&mut` references that would assert exclusive access to the whole arena.
#[repr(transparent)]
pub(crate) struct ByteCell(UnsafeCell<u8>);

// SAFETY: ByteCell is Sync because the SPSC protocol guarantees that any
// byte is either inside the producer's in-flight region or the consumer's,
// never both. The atomic position counters with Release/Acquire ordering
// provide the synchronization barrier between the two sides' copies.
unsafe impl Sync for ByteCell {}
unsafe impl Send for ByteCell {}

/// Allocates a zeroed arena of `slots` byte cells.
pub(crate) fn zeroed_arena(slots: usize) -> Box<[ByteCell]> {
    let mut arena = Vec::with_capacity(slots);
    for _ in 0..slots {
        arena.push(ByteCell(UnsafeCell::new(0)));
    }
    arena.into_boxed_slice()
}

/// A position counter isolated on its own cache line.
///
/// The producer stores `write_pos` while the consumer stores `read_pos`;
/// keeping each counter on a separate line prevents false sharing between
/// the two sides.
#[repr(C)]
#[repr(align(64))]
struct Cursor(AtomicUsize);

impl Cursor {
    const fn new() -> Self {
        Self(AtomicUsize::new(0))
    }
}

/// Fixed-capacity circular byte buffer with atomic position counters.
///
/// `Ring` is the crate-internal core: the safe public surfaces in
/// [`crate::sync`] wrap it and supply the role exclusivity its unsafe
/// operations require.
#[repr(C)]
pub(crate) struct Ring {
    /// Next byte to write. Owned by the producer, read by the consumer.
    write_pos: Cursor,

    /// Next byte to read. Owned by the consumer, read by the producer.
    read_pos: Cursor,

    /// Shared byte arena of `capacity + 1` slots.
    arena: Box<[ByteCell]>,
}

impl Ring {
    /// Creates a ring with `capacity` usable bytes.
    ///
    /// A capacity of 0 yields a valid buffer that accepts only empty
    /// reads and writes.
    pub(crate) fn new(capacity: usize) -> Self {
        let slots = capacity.checked_add(1).expect("ring capacity too large");
        Self {
            write_pos: Cursor::new(),
            read_pos: Cursor::new(),
            arena: zeroed_arena(slots),
        }
    }

    /// Total slot count, one more than the usable capacity.
    #[inline]
    fn slots(&self) -> usize {
        self.arena.len()
    }

    /// Configured usable byte capacity.
    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.slots() - 1
    }

    /// Bytes readable given a snapshot of both counters.
    #[inline]
    fn used_between(&self, read_pos: usize, write_pos: usize) -> usize {
        write_pos + if write_pos < read_pos { self.slots() } else { 0 } - read_pos
    }

    /// Number of bytes currently readable.
    ///
    /// A snapshot: in a concurrent setting the value is only a lower bound
    /// for the consumer and an upper bound for the producer.
    #[inline]
    pub(crate) fn size_used(&self) -> usize {
        let write_pos = self.write_pos.0.load(Ordering::Acquire);
        let read_pos = self.read_pos.0.load(Ordering::Acquire);
        self.used_between(read_pos, write_pos)
    }

    /// Number of bytes currently writable.
    #[inline]
    pub(crate) fn size_free(&self) -> usize {
        self.capacity() - self.size_used()
    }

    /// Base pointer of the arena for raw byte copies.
    ///
    /// Writing through this pointer is interior mutability via [`ByteCell`],
    /// not an aliasing violation: the pointer is derived from the cells, and
    /// the SPSC protocol keeps concurrent copies disjoint.
    #[inline]
    fn base(&self) -> *mut u8 {
        self.arena.as_ptr().cast_mut().cast::<u8>()
    }

    /// Attempts to append `src` to the buffer.
    ///
    /// Returns `false` without any state change if fewer than `src.len()`
    /// bytes are free.
    ///
    /// # Safety
    ///
    /// Caller must ensure only one thread at a time acts as the producer
    /// (calls this method) on this ring.
    #[inline]
    pub(crate) unsafe fn put_bytes(&self, src: &[u8]) -> bool {
        // Load own counter (producer-local, relaxed is fine), then the
        // consumer's with acquire to pair with its release-store: once we
        // observe a slot as free, the consumer's copy out of it is complete.
        let write_pos = self.write_pos.0.load(Ordering::Relaxed);
        let read_pos = self.read_pos.0.load(Ordering::Acquire);

        if self.capacity() - self.used_between(read_pos, write_pos) < src.len() {
            return false;
        }

        let base = self.base();
        let [(tail_off, tail_len), (rest_off, rest_len)] =
            wrap::split(self.slots(), write_pos, src.len());

        // SAFETY: The target region holds only free slots: the check above
        // ensures used + len <= capacity, and the consumer never reads past
        // the published write_pos. Ranges from wrap::split are in bounds.
        unsafe {
            ptr::copy_nonoverlapping(src.as_ptr(), base.add(tail_off), tail_len);
            ptr::copy_nonoverlapping(src.as_ptr().add(tail_len), base.add(rest_off), rest_len);
        }

        // Publish the payload (release pairs with the consumer's acquire).
        self.write_pos.0.store(
            wrap::advance(self.slots(), write_pos, src.len()),
            Ordering::Release,
        );
        true
    }

    /// Copies the next `dst.len()` bytes out of the buffer, consuming them
    /// if `advance` is set.
    ///
    /// Returns `false` without any state change if fewer than `dst.len()`
    /// bytes are readable.
    ///
    /// # Safety
    ///
    /// Caller must ensure only one thread at a time acts as the consumer
    /// (calls this method or [`discard`](Self::discard)) on this ring.
    #[inline]
    pub(crate) unsafe fn read_bytes(&self, dst: &mut [u8], advance: bool) -> bool {
        // Acquire-load of write_pos pairs with the producer's release-store,
        // making the payload bytes it published visible before the copy.
        let read_pos = self.read_pos.0.load(Ordering::Relaxed);
        let write_pos = self.write_pos.0.load(Ordering::Acquire);

        if self.used_between(read_pos, write_pos) < dst.len() {
            return false;
        }

        let base = self.base();
        let [(tail_off, tail_len), (rest_off, rest_len)] =
            wrap::split(self.slots(), read_pos, dst.len());

        // SAFETY: The source region holds published bytes: the check above
        // ensures len <= used, and the producer never writes into [read_pos,
        // write_pos). Ranges from wrap::split are in bounds.
        unsafe {
            ptr::copy_nonoverlapping(base.add(tail_off), dst.as_mut_ptr(), tail_len);
            ptr::copy_nonoverlapping(base.add(rest_off), dst.as_mut_ptr().add(tail_len), rest_len);
        }

        if advance {
            // Release the slots (pairs with the producer's acquire) only
            // after the copy out of them is complete.
            self.read_pos.0.store(
                wrap::advance(self.slots(), read_pos, dst.len()),
                Ordering::Release,
            );
        }
        true
    }

    /// Advances the read position by `len` bytes without copying.
    ///
    /// Returns `false` without any state change if fewer than `len` bytes
    /// are readable.
    ///
    /// # Safety
    ///
    /// Same contract as [`read_bytes`](Self::read_bytes): single consumer.
    #[inline]
    pub(crate) unsafe fn discard(&self, len: usize) -> bool {
        let read_pos = self.read_pos.0.load(Ordering::Relaxed);
        let write_pos = self.write_pos.0.load(Ordering::Acquire);

        if self.used_between(read_pos, write_pos) < len {
            return false;
        }

        self.read_pos
            .0
            .store(wrap::advance(self.slots(), read_pos, len), Ordering::Release);
        true
    }

    /// Replaces the arena, compacting the live bytes to the front.
    ///
    /// The growth hook for [`crate::sync::elastic`]: copies the `used` live
    /// bytes (tail run, then wrap remainder) from the old arena into the
    /// start of `arena`, installs it, and resets `read_pos = 0`,
    /// `write_pos = used`. The old arena is dropped only after the copy
    /// completes. `&mut self` guarantees no concurrent access.
    pub(crate) fn replace_storage(&mut self, arena: Box<[ByteCell]>, used: usize) {
        debug_assert!(arena.len() > used, "new arena must fit used bytes plus the empty slot");
        debug_assert_eq!(self.size_used(), used);

        let read_pos = *self.read_pos.0.get_mut();
        let [(tail_off, tail_len), (rest_off, rest_len)] =
            wrap::split(self.slots(), read_pos, used);

        let src = self.base();
        let dst = arena.as_ptr().cast_mut().cast::<u8>();

        // SAFETY: src ranges are in bounds of the old arena per wrap::split;
        // dst receives tail_len + rest_len == used bytes into a fresh arena
        // of at least used + 1 slots. No other thread can touch either arena
        // while we hold &mut self.
        unsafe {
            ptr::copy_nonoverlapping(src.add(tail_off), dst, tail_len);
            ptr::copy_nonoverlapping(src.add(rest_off), dst.add(tail_len), rest_len);
        }

        self.arena = arena;
        *self.read_pos.0.get_mut() = 0;
        *self.write_pos.0.get_mut() = used;
    }
}
