//! Small generic utilities shared by the other BrlAPI core crates.
//!
//! Nothing in this crate knows about the wire protocol, the braille
//! window, or the tty tree — it only provides the broadcast/shutdown
//! primitives that the protocol-aware crates build on.

pub mod event;
pub mod shutdown;
