//! C2: local-socket lock file protocol (spec.md §4.2).
//!
//! Before binding a Unix-domain listener the server claims a lock file
//! next to it, following the classic X11-style protocol: write our pid
//! to a uniquely-named temp file, hard-link it onto the lock path, and
//! check the link count. A count of two means we own the lock; a
//! failure means something else already holds it, in which case we
//! read its pid and probe whether that process is still alive before
//! deciding the lock is stale and safe to steal.

use std::fs;
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use tracing::warn;

#[cfg(unix)]
const WORLD_RWX_STICKY: u32 = 0o1777;

pub struct LockFile {
    path: PathBuf,
}

impl LockFile {
    /// Acquires the lock at `path`, removing a stale lock left by a
    /// dead process first if one is found.
    pub fn acquire(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        check_directory_permissions(&path);
        loop {
            let tmp_path = tmp_path_for(&path);
            fs::write(&tmp_path, std::process::id().to_string())?;
            let link_result = fs::hard_link(&tmp_path, &path);
            match link_result {
                Ok(()) => {
                    let meta = fs::metadata(&path)?;
                    let _ = fs::remove_file(&tmp_path);
                    if meta.nlink() == 2 {
                        return Ok(Self { path });
                    }
                    // Raced with another acquirer; back off and retry.
                    let _ = fs::remove_file(&path);
                }
                Err(_) => {
                    let _ = fs::remove_file(&tmp_path);
                    if !steal_if_stale(&path)? {
                        return Err(io::Error::new(io::ErrorKind::AddrInUse, "lock held by a live process"));
                    }
                }
            }
        }
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(format!(".lock-tmp-{}", std::process::id()));
    PathBuf::from(tmp)
}

/// Reads the pid recorded in an existing lock file and removes it if
/// that process no longer exists. Returns whether the lock was stolen.
fn steal_if_stale(path: &Path) -> io::Result<bool> {
    let contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(_) => return Ok(false),
    };
    let Ok(pid) = contents.trim().parse::<i32>() else {
        return Ok(false);
    };
    if process_is_alive(pid) {
        return Ok(false);
    }
    warn!(pid, path = %path.display(), "removing stale lock file");
    fs::remove_file(path)?;
    Ok(true)
}

#[cfg(unix)]
fn process_is_alive(pid: i32) -> bool {
    // kill(pid, 0) checks existence/permission without sending a signal.
    unsafe { libc::kill(pid, 0) == 0 || io::Error::last_os_error().kind() == io::ErrorKind::PermissionDenied }
}

#[cfg(not(unix))]
fn process_is_alive(_pid: i32) -> bool {
    true
}

#[cfg(unix)]
fn check_directory_permissions(path: &Path) {
    let Some(dir) = path.parent() else { return };
    let Ok(meta) = fs::metadata(dir) else { return };
    if meta.mode() & 0o1777 != WORLD_RWX_STICKY {
        warn!(
            dir = %dir.display(),
            mode = format!("{:o}", meta.mode() & 0o7777),
            "socket directory does not have the expected 1777 permissions"
        );
    }
}

#[cfg(not(unix))]
fn check_directory_permissions(_path: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn acquire_then_drop_removes_the_lock() {
        let path = PathBuf::from(format!("/tmp/brlapi-lockfile-test-{}", std::process::id()));
        let _ = fs::remove_file(&path);
        {
            let _lock = LockFile::acquire(&path).unwrap();
            assert!(path.exists());
        }
        assert!(!path.exists());
    }

    #[test]
    fn stale_lock_from_dead_pid_is_stolen() {
        let path = PathBuf::from(format!("/tmp/brlapi-lockfile-stale-{}", std::process::id()));
        let _ = fs::remove_file(&path);
        // pid 999999 is most likely not a live process in this environment.
        fs::write(&path, "999999").unwrap();
        let lock = LockFile::acquire(&path).unwrap();
        assert!(path.exists());
        drop(lock);
        assert!(!path.exists());
    }
}
