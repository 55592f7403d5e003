//! Protocol-level logic for a BrlAPI server: packet framing, the
//! key-code/key-range space, the braille window, the parameter engine,
//! the tty tree and connection model, and the `Driver` contract the
//! host's device integration implements. Nothing in this crate touches
//! a socket or a thread; that lives in `brlapi-device` and
//! `brlapi-server`.

pub mod connection;
pub mod driver;
pub mod error;
pub mod keyrange;
pub mod packet;
pub mod param;
pub mod tty;
pub mod window;

pub use error::{Error, ErrorCode, ErrorKind, Result};
