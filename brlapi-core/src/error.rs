//! Wire error codes (spec.md §6/§7) plus the crate-wide `Error` wrapper.
//!
//! Follows the teacher's shape: a small `Error { kind, message }` struct,
//! an `ErrorKind` that distinguishes a handful of named cases from an
//! `Internal(...)` bucket, and `From` impls installed at the boundary
//! where a lower-level error first appears.

use strum::{Display, IntoStaticStr};

/// The `u32` codes a server ERROR/EXCEPTION packet may carry (spec.md §6).
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq, Ord, PartialOrd, Hash, IntoStaticStr)]
#[repr(u32)]
pub enum ErrorCode {
    NoMem = 1,
    InvalidPacket = 2,
    InvalidParameter = 3,
    IllegalInstruction = 4,
    OpNotSupp = 5,
    Authentication = 6,
    ProtocolVersion = 7,
    DeviceBusy = 8,
    DriverError = 9,
    ReadonlyParameter = 10,
    ConnRefused = 11,
    UnknownInstruction = 12,
}

impl ErrorCode {
    pub const fn code(self) -> u32 {
        self as u32
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct Error {
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Clone, Debug, Display, Eq, PartialEq, Hash, IntoStaticStr)]
pub enum ErrorKind {
    /// A violation the client should see as one of the wire error codes.
    Wire(ErrorCode),
    /// Internal causes that never escape to the wire directly; they are
    /// always translated to a wire code by the caller before being sent.
    Internal(InternalErrorKind),
}

#[derive(Clone, Debug, Display, Eq, PartialEq, Hash)]
pub enum InternalErrorKind {
    Io(std::io::ErrorKind),
    JoinError,
    EventSubscriptionFailed,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: String::new(),
        }
    }

    pub fn wire(code: ErrorCode) -> Self {
        Self::new(ErrorKind::Wire(code))
    }

    pub fn with_message(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// The wire code to report this error as, defaulting internal causes
    /// to `ILLEGAL_INSTRUCTION` the way an uncategorized server fault
    /// would surface to a client per spec.md §7.
    pub fn as_wire_code(&self) -> ErrorCode {
        match self.kind {
            ErrorKind::Wire(code) => code,
            ErrorKind::Internal(InternalErrorKind::Io(_)) => ErrorCode::DriverError,
            ErrorKind::Internal(_) => ErrorCode::IllegalInstruction,
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", &self.kind)
        } else {
            write!(f, "{}: {}", &self.kind, &self.message)
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self {
            kind: ErrorKind::Internal(InternalErrorKind::Io(err.kind())),
            message: err.to_string(),
        }
    }
}

impl From<ErrorCode> for Error {
    fn from(code: ErrorCode) -> Self {
        Self::wire(code)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
