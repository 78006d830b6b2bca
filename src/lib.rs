//! Register protocol for an external motor controller on a CAN bus.
//!
//! [`protocol`] holds the wire format, status decoding, identity handshake
//! and dispatch; [`transport`] reaches the bus through a serial CAN adapter;
//! [`runtime`] ties both to the vehicle safety layer over zenoh.

pub mod config;
pub mod messages;
pub mod protocol;
pub mod runtime;
pub mod transport;
