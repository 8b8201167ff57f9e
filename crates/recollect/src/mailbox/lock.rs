//! Per-key advisory lock tokens.
//!
//! Each key has a sibling `<key>.lock` token. On Unix the token is locked
//! with `flock`, which the kernel drops when the holder exits, so a crashed
//! hook never wedges a key. The holder unlinks the token on release;
//! waiters that locked the unlinked inode notice and retry on the new one.

use crate::error::{HookError, HookResult};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Held lock on one key. Released (and the token removed) on drop.
#[derive(Debug)]
pub struct KeyLock {
    path: PathBuf,
    _file: File,
}

impl KeyLock {
    /// Take the lock at `token`, waiting at most `timeout`.
    pub fn acquire(token: &Path, key: &str, timeout: Duration) -> HookResult<KeyLock> {
        let started = Instant::now();
        loop {
            if let Some(file) = sys::try_acquire(token)? {
                return Ok(KeyLock {
                    path: token.to_path_buf(),
                    _file: file,
                });
            }
            let waited = started.elapsed();
            if waited >= timeout {
                return Err(HookError::LockTimeout {
                    key: key.to_string(),
                    waited,
                });
            }
            std::thread::sleep(POLL_INTERVAL.min(timeout - waited));
        }
    }
}

impl Drop for KeyLock {
    fn drop(&mut self) {
        // Unlink while still holding the lock; the fd closes right after.
        if let Err(e) = std::fs::remove_file(&self.path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            log::debug!("could not remove lock token {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(unix)]
mod sys {
    use std::fs::{File, OpenOptions};
    use std::io;
    use std::os::unix::fs::MetadataExt;
    use std::os::unix::io::AsRawFd;
    use std::path::Path;

    pub(super) fn try_acquire(token: &Path) -> io::Result<Option<File>> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(token)?;

        // SAFETY: the fd is owned by `file` and stays open for the call.
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc != 0 {
            let err = io::Error::last_os_error();
            return match err.kind() {
                io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => Ok(None),
                _ => Err(err),
            };
        }

        // The previous holder may have unlinked the token between our open
        // and our flock; then we hold a lock nobody else will ever see.
        let held = file.metadata()?;
        match std::fs::metadata(token) {
            Ok(current) if current.dev() == held.dev() && current.ino() == held.ino() => {
                Ok(Some(file))
            }
            Ok(_) => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(not(unix))]
mod sys {
    use std::fs::{File, OpenOptions};
    use std::io;
    use std::path::Path;
    use std::time::Duration;

    /// Tokens older than this belong to a holder that died.
    const STALE_TOKEN_AGE: Duration = Duration::from_secs(60);

    pub(super) fn try_acquire(token: &Path) -> io::Result<Option<File>> {
        match OpenOptions::new().write(true).create_new(true).open(token) {
            Ok(file) => Ok(Some(file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                let stale = std::fs::metadata(token)
                    .and_then(|m| m.modified())
                    .ok()
                    .and_then(|modified| modified.elapsed().ok())
                    .is_some_and(|age| age > STALE_TOKEN_AGE);
                if stale {
                    log::warn!("reclaiming stale lock token {}", token.display());
                    let _ = std::fs::remove_file(token);
                }
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn second_acquire_times_out_while_held() {
        let dir = TempDir::new().unwrap();
        let token = dir.path().join("k.lock");
        let held = KeyLock::acquire(&token, "k", Duration::from_millis(100)).unwrap();

        let err = KeyLock::acquire(&token, "k", Duration::from_millis(80)).unwrap_err();
        match err {
            HookError::LockTimeout { key, waited } => {
                assert_eq!(key, "k");
                assert!(waited >= Duration::from_millis(80));
            }
            other => panic!("expected LockTimeout, got {other:?}"),
        }
        drop(held);
    }

    #[test]
    fn release_removes_token_and_allows_reacquire() {
        let dir = TempDir::new().unwrap();
        let token = dir.path().join("k.lock");
        let lock = KeyLock::acquire(&token, "k", Duration::from_millis(100)).unwrap();
        assert!(token.exists());
        drop(lock);
        assert!(!token.exists());

        let again = KeyLock::acquire(&token, "k", Duration::from_millis(100));
        assert!(again.is_ok());
    }

    #[test]
    fn waiter_gets_lock_after_release() {
        let dir = TempDir::new().unwrap();
        let token = dir.path().join("k.lock");
        let lock = KeyLock::acquire(&token, "k", Duration::from_secs(1)).unwrap();

        let waiter_token = token.clone();
        let waiter = std::thread::spawn(move || {
            KeyLock::acquire(&waiter_token, "k", Duration::from_secs(5)).map(|_| ())
        });
        std::thread::sleep(Duration::from_millis(100));
        drop(lock);

        assert!(waiter.join().unwrap().is_ok());
    }
}
