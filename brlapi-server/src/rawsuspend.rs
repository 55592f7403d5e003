//! C9: raw and suspend paths (spec.md §4.9, §9).
//!
//! Raw mode and driver suspension are mutually exclusive and
//! single-owner: once a connection holds either, every other
//! connection's ENTERRAWMODE/SUSPENDDRIVER is refused with DEVICEBUSY
//! until the owner leaves or disconnects.
//!
//! Resolved open question (spec.md §9): when the raw-mode owner
//! disconnects abruptly rather than sending LEAVERAWMODE, the server
//! tries [`brlapi_core::driver::Driver::reset`] first; only if that
//! fails does it fall back to a full destruct/construct cycle hopped
//! onto the core task.

use brlapi_core::connection::ConnectionId;
use brlapi_core::driver::{CoreTaskRunner, Driver};
use brlapi_core::error::{Error, ErrorCode, Result};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Mode {
    Raw,
    Suspend,
}

#[derive(Debug, Default)]
pub struct RawSuspendState {
    owner: Option<(ConnectionId, Mode)>,
}

impl RawSuspendState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_enter(&mut self, connection: ConnectionId, mode: Mode) -> Result<()> {
        if let Some((owner, _)) = self.owner {
            if owner != connection {
                return Err(Error::from(ErrorCode::DeviceBusy));
            }
        }
        self.owner = Some((connection, mode));
        Ok(())
    }

    pub fn leave(&mut self, connection: ConnectionId) -> Result<()> {
        match self.owner {
            Some((owner, _)) if owner == connection => {
                self.owner = None;
                Ok(())
            }
            _ => Err(Error::from(ErrorCode::IllegalInstruction)),
        }
    }

    pub fn owner(&self) -> Option<(ConnectionId, Mode)> {
        self.owner
    }

    /// Recovers after `connection` drops without leaving raw/suspend
    /// cleanly. No-op if it wasn't the owner.
    pub async fn recover_from_disconnect(
        &mut self,
        connection: ConnectionId,
        driver: &dyn Driver,
        core_task: &dyn CoreTaskRunner,
    ) -> Result<()> {
        let Some((owner, _mode)) = self.owner else {
            return Ok(());
        };
        if owner != connection {
            return Ok(());
        }
        self.owner = None;
        if driver.reset().await.is_ok() {
            return Ok(());
        }
        core_task
            .run_on_core_task(true, Box::new(|| {}))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use brlapi_core::driver::fake::FakeDriver;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FakeCoreTask {
        ran: AtomicBool,
    }

    #[async_trait]
    impl CoreTaskRunner for FakeCoreTask {
        async fn run_on_core_task(&self, _wait: bool, task: Box<dyn FnOnce() + Send>) -> Result<()> {
            task();
            self.ran.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn conn(n: u64) -> ConnectionId {
        ConnectionId::from_raw(n)
    }

    #[test]
    fn second_connection_is_refused_while_owned() {
        let mut state = RawSuspendState::new();
        state.try_enter(conn(1), Mode::Raw).unwrap();
        let err = state.try_enter(conn(2), Mode::Raw).unwrap_err();
        assert_eq!(err.as_wire_code(), ErrorCode::DeviceBusy);
    }

    #[test]
    fn owner_can_leave_and_free_the_slot() {
        let mut state = RawSuspendState::new();
        state.try_enter(conn(1), Mode::Suspend).unwrap();
        state.leave(conn(1)).unwrap();
        assert!(state.try_enter(conn(2), Mode::Raw).is_ok());
    }

    #[tokio::test]
    async fn disconnect_recovery_prefers_reset_over_core_task_hop() {
        let mut state = RawSuspendState::new();
        state.try_enter(conn(1), Mode::Raw).unwrap();
        let driver = FakeDriver::new(4);
        let core_task = FakeCoreTask {
            ran: AtomicBool::new(false),
        };
        state
            .recover_from_disconnect(conn(1), &driver, &core_task)
            .await
            .unwrap();
        assert_eq!(driver.reset_count(), 1);
        assert!(!core_task.ran.load(Ordering::SeqCst));
        assert!(state.owner().is_none());
    }
}
