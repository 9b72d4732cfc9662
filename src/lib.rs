//! Byte-oriented SPSC ring buffers for message passing between threads.
//!
//! Two building blocks, the second layered on the first:
//!
//! - [`sync::spsc`] - a fixed-capacity circular byte buffer used lock-free
//!   by exactly one writer thread and one reader thread, with
//!   acquire/release publication of the payload bytes
//! - [`sync::elastic`] - a growable thread-safe variant behind a
//!   reader/writer lock, whose `put` reallocates instead of failing
//!
//! # Example
//!
//! ```
//! let (writer, reader) = raceway::channel(1024);
//!
//! let producer = std::thread::spawn(move || {
//!     for i in 0..100u64 {
//!         while !writer.put_value(&i) {
//!             std::hint::spin_loop();
//!         }
//!     }
//! });
//!
//! for i in 0..100u64 {
//!     loop {
//!         if let Some(value) = reader.get_value::<u64>() {
//!             assert_eq!(value, i);
//!             break;
//!         }
//!         std::hint::spin_loop();
//!     }
//! }
//! producer.join().unwrap();
//! ```

pub(crate) mod spsc;
pub mod sync;
pub mod trace;

#[doc(inline)]
pub use sync::elastic::{CapacityOverflow, ElasticRing};
#[doc(inline)]
pub use sync::spsc::{Reader, Timeout, Writer, channel};

pub use trace::init_tracing;
