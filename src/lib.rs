//! Bridges a stream socket to a virtual Ethernet (feth) tap interface.
//!
//! The building blocks are libraries so they can be unit-tested and embedded;
//! the binary in `main.rs` wires them to the command line.

pub mod cli;
pub mod codec;
pub mod config;
pub mod error;
pub mod frame;
pub mod hexdump;
pub mod poll;
pub mod server;
pub mod tap;
