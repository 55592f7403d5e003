//! The host-provided collaborators spec.md §6 says the core only ever
//! reaches through narrow contracts: the braille driver itself, the
//! screen scraper, text tables, the core-task hop, the report bus, and
//! the auth backend. Each becomes a trait here; `brlapi-device` gives
//! them concrete bodies, tests get an in-memory fake.
//!
//! Grounded on the `Transport`/`ProtocolTransport` split in the
//! teacher's `controller/protocol` module: an async trait over
//! read/write/reset, with pause handled out of band rather than baked
//! into every call.

use crate::error::Result;
use async_trait::async_trait;

/// The physical braille display (spec.md §4.11, §6).
#[async_trait]
pub trait Driver: Send + Sync {
    fn name(&self) -> &str;
    fn model_id(&self) -> &str;
    fn display_size(&self) -> usize;

    async fn read_packet(&self) -> Result<Vec<u8>>;
    async fn write_packet(&self, packet: &[u8]) -> Result<()>;

    /// Re-synchronizes the driver's internal state without a full
    /// construct/destruct cycle; used first when a raw-mode owner
    /// disconnects abruptly (resolved open question, spec.md §9).
    async fn reset(&self) -> Result<()>;

    /// Pushes a rendered display image (spec.md §3 braille window
    /// render formula already applied by the caller).
    async fn write_window(&self, dots: &[u8]) -> Result<()>;

    /// Polls for a driver command; returns `None` when nothing is
    /// pending. Driver key codes are reported as raw `u64` wire
    /// key-codes already in [`crate::keyrange::KeyCode::from_driver`]
    /// form, so the arbitrator can filter them the same way it filters
    /// commands.
    async fn read_command(&self) -> Result<Option<u64>>;
}

/// Converts a character code to its raw dot pattern (spec.md §6 text
/// tables). A concrete implementation loads the active literary or
/// computer-braille table; tests can use [`IdentityTextTable`].
pub trait TextTable: Send + Sync {
    fn convert_character_to_dots(&self, character: u8) -> u8;
}

pub struct IdentityTextTable;

impl TextTable for IdentityTextTable {
    fn convert_character_to_dots(&self, character: u8) -> u8 {
        character
    }
}

/// The screen scraper's one exposed fact: which virtual terminal is
/// currently active (spec.md §6).
#[async_trait]
pub trait ScreenScraper: Send + Sync {
    async fn current_virtual_terminal(&self) -> Option<u32>;
}

/// Hops a closure onto the host's core task (spec.md §6
/// `runCoreTask(callback, data, wait)`); device construct/destruct must
/// run there rather than on the caller's own task.
#[async_trait]
pub trait CoreTaskRunner: Send + Sync {
    async fn run_on_core_task(&self, wait: bool, task: Box<dyn FnOnce() + Send>) -> Result<()>;
}

/// A single fact published to the host's report bus (spec.md §6).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Report {
    BrailleDeviceOnline,
    BrailleDeviceOffline,
}

pub trait ReportBus: Send + Sync {
    fn publish(&self, report: Report);
}

/// The auth backend's two entry points (spec.md §4.3, §6).
#[async_trait]
pub trait AuthBackend: Send + Sync {
    async fn begin_server(&self, methods: &[String]) -> Result<()>;
    async fn perform(&self, credentials: &[u8]) -> Result<bool>;
    fn end(&self);

    /// Wire method codes to list in the AUTH packet sent after VERSION
    /// (spec.md §4.3 step 2: `{NONE}`, or `{KEY}` when a key file is
    /// configured). Defaults to offering `NONE` only.
    fn offered_methods(&self) -> Vec<u32> {
        vec![0]
    }
}

#[cfg(any(test, feature = "test-util"))]
pub mod fake {
    use super::*;
    use std::sync::Mutex;

    /// An in-memory `Driver` for tests: records writes, serves queued
    /// commands, never talks to real hardware.
    pub struct FakeDriver {
        display_size: usize,
        written: Mutex<Vec<Vec<u8>>>,
        commands: Mutex<Vec<u64>>,
        reset_count: Mutex<u32>,
    }

    impl FakeDriver {
        pub fn new(display_size: usize) -> Self {
            Self {
                display_size,
                written: Mutex::new(Vec::new()),
                commands: Mutex::new(Vec::new()),
                reset_count: Mutex::new(0),
            }
        }

        pub fn push_command(&self, code: u64) {
            self.commands.lock().unwrap().push(code);
        }

        pub fn writes(&self) -> Vec<Vec<u8>> {
            self.written.lock().unwrap().clone()
        }

        pub fn reset_count(&self) -> u32 {
            *self.reset_count.lock().unwrap()
        }
    }

    #[async_trait]
    impl Driver for FakeDriver {
        fn name(&self) -> &str {
            "fake"
        }

        fn model_id(&self) -> &str {
            "fake-model"
        }

        fn display_size(&self) -> usize {
            self.display_size
        }

        async fn read_packet(&self) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }

        async fn write_packet(&self, _packet: &[u8]) -> Result<()> {
            Ok(())
        }

        async fn reset(&self) -> Result<()> {
            *self.reset_count.lock().unwrap() += 1;
            Ok(())
        }

        async fn write_window(&self, dots: &[u8]) -> Result<()> {
            self.written.lock().unwrap().push(dots.to_vec());
            Ok(())
        }

        async fn read_command(&self) -> Result<Option<u64>> {
            Ok(self.commands.lock().unwrap().pop())
        }
    }

    #[tokio::test]
    async fn fake_driver_records_window_writes() {
        let driver = FakeDriver::new(4);
        driver.write_window(&[1, 2, 3, 4]).await.unwrap();
        assert_eq!(driver.writes(), vec![vec![1, 2, 3, 4]]);
    }

    #[tokio::test]
    async fn fake_driver_serves_queued_commands() {
        let driver = FakeDriver::new(4);
        driver.push_command(42);
        assert_eq!(driver.read_command().await.unwrap(), Some(42));
        assert_eq!(driver.read_command().await.unwrap(), None);
    }
}
