//! Lock-free SPSC byte channel for in-process (inter-thread) communication.
//!
//! A wait-free bounded byte stream using a heap-allocated ring buffer with
//! atomic position counters.
//!
//! # Overview
//!
//! - [`Writer`] - Write end (single writer per channel)
//! - [`Reader`] - Read end (single reader per channel)
//! - Lock-free, wait-free: no mutexes or syscalls in the hot path
//!
//! # Example
//!
//! ```
//! use raceway::sync::spsc;
//!
//! let (writer, reader) = spsc::channel(64);
//!
//! // Writer thread
//! assert!(writer.put(b"hello"));
//!
//! // Reader thread
//! let mut buf = [0u8; 5];
//! assert!(reader.get(&mut buf));
//! assert_eq!(&buf, b"hello");
//! ```
//!
//! # Differences from [`crate::sync::elastic`]
//!
//! - Fixed capacity: `put` fails when free space runs out instead of growing
//! - No locks anywhere: exclusivity is structural (`Writer` and `Reader` are
//!   `Send` but not `Sync`), so the SPSC discipline holds by construction

use std::cell::Cell;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use bytemuck::{Pod, Zeroable};
use minstant::Instant;

use crate::spsc::ring::Ring;
use crate::trace::debug;

/// Timeout specification for blocking operations.
#[derive(Debug, Clone, Copy)]
pub enum Timeout {
    /// Wait indefinitely.
    Infinite,
    /// Wait for at most the specified duration.
    Duration(Duration),
}

impl From<Duration> for Timeout {
    fn from(d: Duration) -> Self {
        Self::Duration(d)
    }
}

/// Marker type to opt-out of `Sync` while remaining `Send`.
type PhantomUnsync = PhantomData<Cell<&'static ()>>;

/// Write end of the byte channel.
///
/// Only one writer exists per channel: the type is not `Clone`, and not
/// `Sync`, so concurrent `put` calls cannot be expressed in safe code.
///
/// # Thread Safety
///
/// `Writer` is [`Send`] but **not** [`Sync`]:
/// - Can transfer ownership to another thread
/// - Cannot share `&Writer` (no concurrent `put()`)
pub struct Writer {
    ring: Arc<Ring>,
    _unsync: PhantomUnsync,
}

/// Read end of the byte channel.
///
/// Only one reader exists per channel. See [`Writer`] for thread safety
/// details (same semantics apply).
pub struct Reader {
    ring: Arc<Ring>,
    _unsync: PhantomUnsync,
}

/// Creates a new SPSC byte channel with the given capacity in bytes.
///
/// Returns a `(Writer, Reader)` pair sharing one ring; either end can be
/// sent to another thread. A capacity of 0 yields a valid channel that
/// accepts only empty transfers.
#[must_use]
pub fn channel(capacity: usize) -> (Writer, Reader) {
    let ring = Arc::new(Ring::new(capacity));
    debug!("created spsc byte channel, capacity {capacity}");

    let writer = Writer {
        ring: Arc::clone(&ring),
        _unsync: PhantomData,
    };

    let reader = Reader {
        ring,
        _unsync: PhantomData,
    };

    (writer, reader)
}

impl Writer {
    /// Attempts to append `src` to the channel (wait-free).
    ///
    /// Returns `false` without any state change if fewer than `src.len()`
    /// bytes are free.
    #[inline]
    pub fn put(&self, src: &[u8]) -> bool {
        // SAFETY: Writer is the unique producer endpoint and is !Sync, so
        // no other thread can be in the producer role concurrently.
        unsafe { self.ring.put_bytes(src) }
    }

    /// Appends a single fixed-size value via its raw byte representation.
    #[inline]
    pub fn put_value<T: Pod>(&self, value: &T) -> bool {
        self.put(bytemuck::bytes_of(value))
    }

    /// Appends a slice of fixed-size values; the byte length is
    /// `values.len() * size_of::<T>()`.
    #[inline]
    pub fn put_slice<T: Pod>(&self, values: &[T]) -> bool {
        self.put(bytemuck::cast_slice(values))
    }

    /// Spins until space is available, then appends.
    ///
    /// Returns `false` on timeout; the channel is unchanged in that case.
    pub fn put_blocking(&self, src: &[u8], timeout: Timeout) -> bool {
        let deadline = match timeout {
            Timeout::Infinite => None,
            Timeout::Duration(d) => Some(Instant::now() + d),
        };
        loop {
            if self.put(src) {
                return true;
            }
            if let Some(dl) = deadline
                && Instant::now() > dl
            {
                return false;
            }
            std::hint::spin_loop();
        }
    }

    /// Configured usable byte capacity.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Bytes currently free. A snapshot; only a lower bound while the
    /// reader is active.
    #[inline]
    #[must_use]
    pub fn size_free(&self) -> usize {
        self.ring.size_free()
    }

    /// Bytes currently readable. A snapshot.
    #[inline]
    #[must_use]
    pub fn size_used(&self) -> usize {
        self.ring.size_used()
    }
}

impl Reader {
    /// Fills `dst` with the next bytes and consumes them (wait-free).
    ///
    /// Returns `false` without any state change if fewer than `dst.len()`
    /// bytes are readable.
    #[inline]
    pub fn get(&self, dst: &mut [u8]) -> bool {
        // SAFETY: Reader is the unique consumer endpoint and is !Sync, so
        // no other thread can be in the consumer role concurrently.
        unsafe { self.ring.read_bytes(dst, true) }
    }

    /// Fills `dst` with the next bytes without consuming them.
    ///
    /// Identical to [`get`](Self::get) except the read position does not
    /// advance; a subsequent `get` returns the same bytes.
    #[inline]
    pub fn peek(&self, dst: &mut [u8]) -> bool {
        // SAFETY: As in `get`.
        unsafe { self.ring.read_bytes(dst, false) }
    }

    /// Advances past `len` bytes without copying them.
    ///
    /// Fails under the same undersupply condition as [`get`](Self::get).
    #[inline]
    pub fn discard(&self, len: usize) -> bool {
        // SAFETY: As in `get`.
        unsafe { self.ring.discard(len) }
    }

    /// Reads a single fixed-size value via its raw byte representation.
    ///
    /// Returns `None` if fewer than `size_of::<T>()` bytes are readable.
    #[inline]
    #[must_use]
    pub fn get_value<T: Pod>(&self) -> Option<T> {
        let mut value = T::zeroed();
        self.get(bytemuck::bytes_of_mut(&mut value)).then_some(value)
    }

    /// Reads a single fixed-size value without consuming it.
    #[inline]
    #[must_use]
    pub fn peek_value<T: Pod>(&self) -> Option<T> {
        let mut value = T::zeroed();
        self.peek(bytemuck::bytes_of_mut(&mut value)).then_some(value)
    }

    /// Fills a slice of fixed-size values; the byte length is
    /// `dst.len() * size_of::<T>()`.
    #[inline]
    pub fn get_slice<T: Pod>(&self, dst: &mut [T]) -> bool {
        self.get(bytemuck::cast_slice_mut(dst))
    }

    /// Fills a slice of fixed-size values without consuming them.
    #[inline]
    pub fn peek_slice<T: Pod>(&self, dst: &mut [T]) -> bool {
        self.peek(bytemuck::cast_slice_mut(dst))
    }

    /// Spins until enough bytes are available, then reads.
    ///
    /// Returns `false` on timeout; the channel is unchanged in that case.
    pub fn get_blocking(&self, dst: &mut [u8], timeout: Timeout) -> bool {
        let deadline = match timeout {
            Timeout::Infinite => None,
            Timeout::Duration(d) => Some(Instant::now() + d),
        };
        loop {
            if self.get(dst) {
                return true;
            }
            if let Some(dl) = deadline
                && Instant::now() > dl
            {
                return false;
            }
            std::hint::spin_loop();
        }
    }

    /// Configured usable byte capacity.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Bytes currently readable. A snapshot; only a lower bound while the
    /// writer is active.
    #[inline]
    #[must_use]
    pub fn size_used(&self) -> usize {
        self.ring.size_used()
    }

    /// Bytes currently free. A snapshot.
    #[inline]
    #[must_use]
    pub fn size_free(&self) -> usize {
        self.ring.size_free()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_put_get() {
        let (writer, reader) = channel(16);

        assert!(writer.put(&[1, 2, 3]));
        let mut buf = [0u8; 3];
        assert!(reader.get(&mut buf));
        assert_eq!(buf, [1, 2, 3]);
        assert!(!reader.get(&mut buf));
    }

    #[test]
    fn test_capacity_invariant() {
        let (writer, reader) = channel(8);
        assert_eq!(writer.size_used() + writer.size_free(), writer.capacity());

        assert!(writer.put(&[1, 2, 3, 4, 5]));
        assert_eq!(writer.size_used() + writer.size_free(), writer.capacity());

        let mut buf = [0u8; 2];
        assert!(reader.get(&mut buf));
        assert_eq!(reader.size_used() + reader.size_free(), reader.capacity());

        assert!(reader.discard(3));
        assert_eq!(reader.size_used() + reader.size_free(), reader.capacity());
    }

    #[test]
    fn test_full_and_wrap_scenario() {
        // Capacity 4 gives 5 internal slots.
        let (writer, reader) = channel(4);

        assert!(writer.put(&[1, 2, 3, 4]));
        assert_eq!(writer.size_used(), 4);
        assert_eq!(writer.size_free(), 0);

        assert!(!writer.put(&[5]));

        let mut two = [0u8; 2];
        assert!(reader.get(&mut two));
        assert_eq!(two, [1, 2]);
        assert_eq!(reader.size_used(), 2);

        // Wraps across the physical end of storage.
        assert!(writer.put(&[5, 6]));
        assert_eq!(writer.size_used(), 4);

        let mut four = [0u8; 4];
        assert!(reader.get(&mut four));
        assert_eq!(four, [3, 4, 5, 6]);
    }

    #[test]
    fn test_fifo_across_many_wraps() {
        let (writer, reader) = channel(7);

        let mut expected = 0u8;
        for round in 0..50u8 {
            let chunk: Vec<u8> = (0..5).map(|i| round.wrapping_mul(5).wrapping_add(i)).collect();
            assert!(writer.put(&chunk));

            let mut out = [0u8; 5];
            assert!(reader.get(&mut out));
            for byte in out {
                assert_eq!(byte, expected);
                expected = expected.wrapping_add(1);
            }
        }
    }

    #[test]
    fn test_undersupply_is_noop() {
        let (writer, reader) = channel(8);
        assert!(writer.put(&[1, 2, 3]));

        let mut big = [0u8; 4];
        assert!(!reader.get(&mut big));
        assert!(!reader.peek(&mut big));
        assert!(!reader.discard(4));
        assert_eq!(reader.size_used(), 3);

        let mut out = [0u8; 3];
        assert!(reader.get(&mut out));
        assert_eq!(out, [1, 2, 3]);
    }

    #[test]
    fn test_peek_then_get() {
        let (writer, reader) = channel(8);
        assert!(writer.put(&[9, 8, 7]));

        let mut peeked = [0u8; 3];
        assert!(reader.peek(&mut peeked));
        assert_eq!(reader.size_used(), 3);

        let mut got = [0u8; 3];
        assert!(reader.get(&mut got));
        assert_eq!(peeked, got);
        assert_eq!(reader.size_used(), 0);
    }

    #[test]
    fn test_zero_capacity_channel() {
        let (writer, reader) = channel(0);
        assert_eq!(writer.capacity(), 0);
        assert!(writer.put(&[]));
        assert!(!writer.put(&[1]));
        assert!(reader.get(&mut []));
    }

    #[test]
    fn test_typed_value_roundtrip() {
        let (writer, reader) = channel(64);

        assert!(writer.put_value(&0xdead_beef_u64));
        assert_eq!(reader.size_used(), 8);

        assert_eq!(reader.peek_value::<u64>(), Some(0xdead_beef_u64));
        assert_eq!(reader.size_used(), 8);

        assert_eq!(reader.get_value::<u64>(), Some(0xdead_beef_u64));
        assert_eq!(reader.size_used(), 0);
        assert_eq!(reader.get_value::<u64>(), None);
    }

    #[test]
    fn test_typed_slice_roundtrip() {
        let (writer, reader) = channel(64);

        let values = [1u32, 2, 3, 4];
        assert!(writer.put_slice(&values));
        assert_eq!(writer.size_used(), 16);

        let mut out = [0u32; 4];
        assert!(reader.get_slice(&mut out));
        assert_eq!(out, values);
    }

    #[test]
    fn test_typed_struct_roundtrip() {
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
        #[repr(C)]
        struct Sample {
            seq: u64,
            tag: u32,
            pad: u32,
        }

        let (writer, reader) = channel(64);
        let sample = Sample {
            seq: 7,
            tag: 0xabcd,
            pad: 0,
        };
        assert!(writer.put_value(&sample));
        assert_eq!(reader.get_value::<Sample>(), Some(sample));
    }

    #[test]
    fn test_blocking_timeout_expires() {
        let (writer, reader) = channel(4);
        assert!(writer.put(&[1, 2, 3, 4]));

        // Full channel, nobody draining: the blocking put must time out.
        assert!(!writer.put_blocking(&[5], Timeout::Duration(Duration::from_millis(10))));

        // Empty the channel; a blocking get on more bytes than will ever
        // arrive must also time out.
        let mut out = [0u8; 4];
        assert!(reader.get(&mut out));
        assert!(!reader.get_blocking(&mut out, Timeout::Duration(Duration::from_millis(10))));
    }

    #[test]
    fn test_send_to_thread() {
        let (writer, reader) = channel(1024);

        let handle = std::thread::spawn(move || {
            for i in 0..100u64 {
                assert!(writer.put_value(&i));
            }
        });
        handle.join().unwrap();

        for i in 0..100u64 {
            assert_eq!(reader.get_value::<u64>(), Some(i));
        }
    }

    #[test]
    fn test_concurrent_put_get() {
        let (writer, reader) = channel(64);
        let count = 10_000u64;

        let writer_handle = std::thread::spawn(move || {
            for i in 0..count {
                while !writer.put_value(&i) {
                    std::hint::spin_loop();
                }
            }
        });

        let reader_handle = std::thread::spawn(move || {
            let mut received = Vec::with_capacity(count as usize);
            while received.len() < count as usize {
                if let Some(value) = reader.get_value::<u64>() {
                    received.push(value);
                } else {
                    std::hint::spin_loop();
                }
            }
            received
        });

        writer_handle.join().unwrap();
        let received = reader_handle.join().unwrap();

        // Verify FIFO order
        for (i, &value) in received.iter().enumerate() {
            assert_eq!(value, i as u64);
        }
    }
}
