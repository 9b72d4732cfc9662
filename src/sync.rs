//! Thread-safe byte buffer surfaces.
//!
//! This module provides the safe public forms of the core ring:
//! communication between threads within the same process, either over a
//! fixed-capacity lock-free channel or a growable lock-guarded buffer.

pub mod elastic;
pub mod spsc;
