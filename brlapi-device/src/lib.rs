//! I/O for a BrlAPI server: listener sockets, the local-socket lock
//! file protocol, the per-connection packet stream, and a concrete
//! `Driver` that speaks the same length-prefixed framing to the
//! physical display process.
pub mod conn_stream;
pub mod driver;
pub mod listener;
pub mod lockfile;
pub mod semaphore;

pub use semaphore::BoundedSemaphore;
