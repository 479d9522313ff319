//! The term-partitioned, memory-mapped log buffer that publishers and
//! subscribers rendezvous over. See `aeron_protocol` for the wire layout
//! and position algebra this crate builds on.

pub mod buffer;
pub mod error;
pub mod metadata;

pub use buffer::{ FrameClaim, FrameScan, LogBuffer };
pub use error::{ LogBufferError, Result };
