//! Connection data model (spec.md §3, §9 design notes).
//!
//! The reference description lists a pile of booleans on `Connection`
//! (raw, suspended, attached, ...) whose combinations are not all
//! legal. Rust expresses the legal set directly with a tagged enum
//! instead: a connection is unattached, attached to a tty, holding the
//! driver in raw mode, or holding it suspended, and never more than one
//! of those at once.

use crate::error::{Error, ErrorCode};
use crate::keyrange::KeyRangeSet;
use crate::tty::TtyId;
use crate::window::BrailleWindow;

pub const DEFAULT_PRIORITY: u32 = 50;
pub const MIN_PRIORITY: u32 = 1;
pub const MAX_PRIORITY: u32 = 99;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn from_raw(id: u64) -> Self {
        Self(id)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Whether key events delivered to an attached connection are BrlAPI
/// commands or raw driver key codes (spec.md §3 `how`).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AttachHow {
    Commands,
    DriverKeyCodes,
}

#[derive(Debug)]
pub enum ConnectionMode {
    Unattached,
    Attached {
        tty: TtyId,
        how: AttachHow,
        retain_dots: bool,
        accepted: KeyRangeSet,
        window: BrailleWindow,
    },
    Raw,
    Suspend,
}

#[derive(Debug)]
pub struct Connection {
    pub id: ConnectionId,
    pub authenticated: bool,
    pub priority: u32,
    pub mode: ConnectionMode,
}

impl Connection {
    pub fn new(id: ConnectionId) -> Self {
        Self {
            id,
            authenticated: false,
            priority: DEFAULT_PRIORITY,
            mode: ConnectionMode::Unattached,
        }
    }

    pub fn is_attached(&self) -> bool {
        matches!(self.mode, ConnectionMode::Attached { .. })
    }

    pub fn is_raw(&self) -> bool {
        matches!(self.mode, ConnectionMode::Raw)
    }

    pub fn is_suspended(&self) -> bool {
        matches!(self.mode, ConnectionMode::Suspend)
    }

    pub fn set_priority(&mut self, priority: u32) -> Result<(), Error> {
        if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&priority) {
            return Err(Error::from(ErrorCode::InvalidParameter));
        }
        self.priority = priority;
        Ok(())
    }

    pub fn enter_tty_mode(
        &mut self,
        tty: TtyId,
        how: AttachHow,
        retain_dots: bool,
        window_size: usize,
    ) -> Result<(), Error> {
        if !matches!(self.mode, ConnectionMode::Unattached) {
            return Err(Error::from(ErrorCode::IllegalInstruction));
        }
        self.mode = ConnectionMode::Attached {
            tty,
            how,
            retain_dots,
            accepted: KeyRangeSet::empty(),
            window: BrailleWindow::new(window_size),
        };
        Ok(())
    }

    pub fn leave_tty_mode(&mut self) -> Result<(), Error> {
        if !self.is_attached() {
            return Err(Error::from(ErrorCode::IllegalInstruction));
        }
        self.mode = ConnectionMode::Unattached;
        Ok(())
    }

    pub fn enter_raw_mode(&mut self) -> Result<(), Error> {
        if !matches!(self.mode, ConnectionMode::Unattached) {
            return Err(Error::from(ErrorCode::IllegalInstruction));
        }
        self.mode = ConnectionMode::Raw;
        Ok(())
    }

    pub fn enter_suspend(&mut self) -> Result<(), Error> {
        if !matches!(self.mode, ConnectionMode::Unattached) {
            return Err(Error::from(ErrorCode::IllegalInstruction));
        }
        self.mode = ConnectionMode::Suspend;
        Ok(())
    }

    pub fn leave_raw_or_suspend(&mut self) -> Result<(), Error> {
        if !matches!(self.mode, ConnectionMode::Raw | ConnectionMode::Suspend) {
            return Err(Error::from(ErrorCode::IllegalInstruction));
        }
        self.mode = ConnectionMode::Unattached;
        Ok(())
    }

    pub fn tty(&self) -> Option<TtyId> {
        match self.mode {
            ConnectionMode::Attached { tty, .. } => Some(tty),
            _ => None,
        }
    }

    pub fn accepted_keys_mut(&mut self) -> Option<&mut KeyRangeSet> {
        match &mut self.mode {
            ConnectionMode::Attached { accepted, .. } => Some(accepted),
            _ => None,
        }
    }

    pub fn window_mut(&mut self) -> Option<&mut BrailleWindow> {
        match &mut self.mode {
            ConnectionMode::Attached { window, .. } => Some(window),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_connection_is_unattached_and_unauthenticated() {
        let conn = Connection::new(ConnectionId::from_raw(1));
        assert!(!conn.authenticated);
        assert!(!conn.is_attached());
        assert_eq!(conn.priority, DEFAULT_PRIORITY);
    }

    #[test]
    fn double_attach_is_rejected() {
        let mut conn = Connection::new(ConnectionId::from_raw(1));
        conn.enter_tty_mode(TtyId::from_raw(1), AttachHow::Commands, false, 40)
            .unwrap();
        let err = conn
            .enter_tty_mode(TtyId::from_raw(2), AttachHow::Commands, false, 40)
            .unwrap_err();
        assert_eq!(err.as_wire_code(), ErrorCode::IllegalInstruction);
    }

    #[test]
    fn raw_mode_excludes_attach() {
        let mut conn = Connection::new(ConnectionId::from_raw(1));
        conn.enter_raw_mode().unwrap();
        assert!(conn.is_raw());
        let err = conn
            .enter_tty_mode(TtyId::from_raw(1), AttachHow::Commands, false, 40)
            .unwrap_err();
        assert_eq!(err.as_wire_code(), ErrorCode::IllegalInstruction);
    }

    #[test]
    fn priority_out_of_range_rejected() {
        let mut conn = Connection::new(ConnectionId::from_raw(1));
        assert!(conn.set_priority(0).is_err());
        assert!(conn.set_priority(100).is_err());
        assert!(conn.set_priority(10).is_ok());
    }

    #[test]
    fn leave_raw_returns_to_unattached() {
        let mut conn = Connection::new(ConnectionId::from_raw(1));
        conn.enter_suspend().unwrap();
        conn.leave_raw_or_suspend().unwrap();
        assert!(matches!(conn.mode, ConnectionMode::Unattached));
    }
}
