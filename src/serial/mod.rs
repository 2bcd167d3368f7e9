//! Serial connection and line decoding
//!
//! This module provides:
//! - Port configuration and device access (`port`)
//! - Byte stream to text line decoding (`lines`)
//! - The connection lifecycle and line dispatch loop (`connection`)

pub mod connection;
pub mod event;
pub mod lines;
pub mod port;

#[cfg(test)]
pub(crate) mod testing;

pub use connection::{ConnectionState, LineHandler, SerialConnection};
pub use event::PortEvent;
pub use lines::{DecoderState, DecoderStats, LineDecoder};
pub use port::{AcquireError, PortBackend, PortConfig, PortIo};

#[cfg(feature = "serial")]
pub use port::SystemBackend;
