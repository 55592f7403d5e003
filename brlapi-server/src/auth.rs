//! C3: authentication (spec.md §4.3, §5).
//!
//! A freshly accepted connection has `UNAUTH_TIMEOUT` to authenticate
//! before it's dropped — this bounds both a single slow
//! `AuthBackend::perform` call and the whole pre-auth idle period, so a
//! peer that never sends anything past VERSION is dropped at the same
//! 30-second mark as one whose credential check hangs. The server also
//! caps how many connections may be mid-authentication at once:
//! `MAX_UNAUTH_CONNECTIONS`, enforced with the same `BoundedSemaphore`
//! the teacher uses for flow control, refusing outright (CONNREFUSED)
//! rather than queuing past the ceiling.

use async_trait::async_trait;
use brlapi_core::driver::AuthBackend;
use brlapi_core::error::{Error, ErrorCode, Result};
use brlapi_device::semaphore::{BoundedSemaphore, OwnedBoundedSemaphorePermit};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub const MAX_UNAUTH_CONNECTIONS: usize = 5;
pub const UNAUTH_TIMEOUT: Duration = Duration::from_secs(30);

/// AUTH packet method codes (spec.md §4.3).
pub const AUTH_METHOD_NONE: u32 = 0;
pub const AUTH_METHOD_KEY: u32 = 1;

/// Shared ceiling on connections currently mid-authentication.
#[derive(Clone)]
pub struct UnauthLimiter {
    sem: Arc<BoundedSemaphore>,
}

impl UnauthLimiter {
    pub fn new() -> Self {
        Self {
            sem: Arc::new(BoundedSemaphore::new(
                MAX_UNAUTH_CONNECTIONS,
                MAX_UNAUTH_CONNECTIONS,
            )),
        }
    }

    /// Claims a slot for a newly accepted, not-yet-authenticated
    /// connection. `None` means the ceiling (spec.md §5) is reached and
    /// the connection must be refused with CONNREFUSED.
    pub fn try_claim(&self) -> Option<OwnedBoundedSemaphorePermit> {
        self.sem.clone().try_acquire_owned().ok()
    }
}

impl Default for UnauthLimiter {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs one authentication attempt against the host's auth backend,
/// bounded by [`UNAUTH_TIMEOUT`].
pub async fn authenticate(backend: &dyn AuthBackend, credentials: &[u8]) -> Result<()> {
    match tokio::time::timeout(UNAUTH_TIMEOUT, backend.perform(credentials)).await {
        Ok(Ok(true)) => Ok(()),
        Ok(Ok(false)) => Err(Error::from(ErrorCode::Authentication)),
        Ok(Err(err)) => Err(err),
        Err(_elapsed) => Err(Error::from(ErrorCode::Authentication)),
    }
}

pub fn connrefused() -> Error {
    Error::from(ErrorCode::ConnRefused)
}

/// Accepts every handshake outright: the `none` method from `--auth`.
pub struct NoneAuthBackend;

#[async_trait]
impl AuthBackend for NoneAuthBackend {
    async fn begin_server(&self, _methods: &[String]) -> Result<()> {
        Ok(())
    }

    async fn perform(&self, _credentials: &[u8]) -> Result<bool> {
        Ok(true)
    }

    fn end(&self) {}

    fn offered_methods(&self) -> Vec<u32> {
        vec![AUTH_METHOD_NONE]
    }
}

/// Compares the client's credential bytes against a key file loaded at
/// `begin_server` time, in constant time. The `keyfile:<path>` method
/// from `--auth`.
pub struct KeyfileAuthBackend {
    path: PathBuf,
    key: tokio::sync::Mutex<Vec<u8>>,
}

impl KeyfileAuthBackend {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            key: tokio::sync::Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl AuthBackend for KeyfileAuthBackend {
    async fn begin_server(&self, _methods: &[String]) -> Result<()> {
        let bytes = tokio::fs::read(&self.path).await?;
        *self.key.lock().await = bytes;
        Ok(())
    }

    async fn perform(&self, credentials: &[u8]) -> Result<bool> {
        let key = self.key.lock().await;
        Ok(constant_time_eq(&key, credentials))
    }

    fn end(&self) {}

    fn offered_methods(&self) -> Vec<u32> {
        vec![AUTH_METHOD_KEY]
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct AlwaysAccept;
    struct AlwaysReject;
    struct NeverResponds;

    #[async_trait]
    impl AuthBackend for AlwaysAccept {
        async fn begin_server(&self, _methods: &[String]) -> Result<()> {
            Ok(())
        }
        async fn perform(&self, _credentials: &[u8]) -> Result<bool> {
            Ok(true)
        }
        fn end(&self) {}
    }

    #[async_trait]
    impl AuthBackend for AlwaysReject {
        async fn begin_server(&self, _methods: &[String]) -> Result<()> {
            Ok(())
        }
        async fn perform(&self, _credentials: &[u8]) -> Result<bool> {
            Ok(false)
        }
        fn end(&self) {}
    }

    #[async_trait]
    impl AuthBackend for NeverResponds {
        async fn begin_server(&self, _methods: &[String]) -> Result<()> {
            Ok(())
        }
        async fn perform(&self, _credentials: &[u8]) -> Result<bool> {
            std::future::pending().await
        }
        fn end(&self) {}
    }

    #[tokio::test]
    async fn accepted_credentials_succeed() {
        authenticate(&AlwaysAccept, b"secret").await.unwrap();
    }

    #[tokio::test]
    async fn rejected_credentials_error() {
        let err = authenticate(&AlwaysReject, b"secret").await.unwrap_err();
        assert_eq!(err.as_wire_code(), ErrorCode::Authentication);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_counts_as_authentication_failure() {
        let fut = authenticate(&NeverResponds, b"secret");
        tokio::pin!(fut);
        tokio::time::advance(UNAUTH_TIMEOUT + Duration::from_secs(1)).await;
        let err = fut.await.unwrap_err();
        assert_eq!(err.as_wire_code(), ErrorCode::Authentication);
    }

    #[test]
    fn ceiling_refuses_the_sixth_connection() {
        let limiter = UnauthLimiter::new();
        let mut held = Vec::new();
        for _ in 0..MAX_UNAUTH_CONNECTIONS {
            held.push(limiter.try_claim().expect("slot available"));
        }
        assert!(limiter.try_claim().is_none());
        drop(held.pop());
        assert!(limiter.try_claim().is_some());
    }

    #[tokio::test]
    async fn none_backend_accepts_anything() {
        let backend = NoneAuthBackend;
        backend.begin_server(&[]).await.unwrap();
        authenticate(&backend, b"").await.unwrap();
    }

    #[tokio::test]
    async fn keyfile_backend_matches_loaded_key() {
        let dir = std::env::temp_dir().join(format!("brlapi-keyfile-test-{}", std::process::id()));
        tokio::fs::write(&dir, b"correct horse battery staple")
            .await
            .unwrap();
        let backend = KeyfileAuthBackend::new(dir.clone());
        backend.begin_server(&[]).await.unwrap();
        authenticate(&backend, b"correct horse battery staple")
            .await
            .unwrap();
        let err = authenticate(&backend, b"wrong").await.unwrap_err();
        assert_eq!(err.as_wire_code(), ErrorCode::Authentication);
        tokio::fs::remove_file(&dir).await.unwrap();
    }
}
