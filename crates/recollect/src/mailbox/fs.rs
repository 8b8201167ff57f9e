use super::lock::KeyLock;
use super::{Mailbox, MailboxKey};
use crate::error::HookResult;
use async_trait::async_trait;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

const RECORD_EXT: &str = ".json";
const LOCK_EXT: &str = ".lock";

/// A `Mailbox` backed by one directory shared by every hook process.
///
/// Records live in `<key>.json`. A write locks `<key>.lock`, writes a
/// hidden temporary sibling, syncs it and renames it over the record, so
/// readers never see a partial record and need no lock themselves.
#[derive(Debug, Clone)]
pub struct FsMailbox {
    dir: PathBuf,
    lock_timeout: Duration,
}

impl FsMailbox {
    /// Opens the mailbox at `dir`, creating the directory if needed.
    pub fn open(dir: impl Into<PathBuf>, lock_timeout: Duration) -> HookResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir, lock_timeout })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    pub fn record_path(&self, key: &MailboxKey) -> PathBuf {
        self.dir.join(format!("{key}{RECORD_EXT}"))
    }

    fn lock_path(&self, key: &MailboxKey) -> PathBuf {
        self.dir.join(format!("{key}{LOCK_EXT}"))
    }

    fn temp_path(&self, key: &MailboxKey) -> PathBuf {
        self.dir.join(format!(".{key}.{}.tmp", Uuid::new_v4().simple()))
    }

    /// Take the lock for `key` directly. Used by tests that need to
    /// simulate a stuck writer.
    pub fn lock_key(&self, key: &MailboxKey) -> HookResult<KeyLock> {
        KeyLock::acquire(&self.lock_path(key), key.as_str(), self.lock_timeout)
    }

    fn write_blocking(&self, key: &MailboxKey, record: &[u8]) -> HookResult<()> {
        let _lock = self.lock_key(key)?;
        self.replace_locked(key, record)
    }

    fn create_blocking(&self, key: &MailboxKey, record: &[u8]) -> HookResult<bool> {
        let _lock = self.lock_key(key)?;
        if fs::exists(self.record_path(key))? {
            return Ok(false);
        }
        self.replace_locked(key, record)?;
        Ok(true)
    }

    /// Caller holds the key's lock.
    fn replace_locked(&self, key: &MailboxKey, record: &[u8]) -> HookResult<()> {
        let temp = self.temp_path(key);
        let written =
            write_synced(&temp, record).and_then(|()| fs::rename(&temp, self.record_path(key)));
        if let Err(e) = written {
            let _ = fs::remove_file(&temp);
            return Err(e.into());
        }
        Ok(())
    }

    fn read_blocking(&self, key: &MailboxKey) -> HookResult<Option<Vec<u8>>> {
        match fs::read(self.record_path(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn delete_blocking(&self, key: &MailboxKey) -> HookResult<bool> {
        let _lock = self.lock_key(key)?;
        match fs::remove_file(self.record_path(key)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn list_blocking(&self, prefix: &str) -> HookResult<Vec<MailboxKey>> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            // Temporaries start with a dot and lock tokens lack the suffix.
            let Some(stem) = name.strip_suffix(RECORD_EXT) else {
                continue;
            };
            if !stem.starts_with(prefix) {
                continue;
            }
            if let Ok(key) = MailboxKey::parse(stem) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }

    /// Runs a filesystem operation on the blocking pool.
    async fn run_blocking<F, R>(&self, f: F) -> HookResult<R>
    where
        F: FnOnce(&FsMailbox) -> HookResult<R> + Send + 'static,
        R: Send + 'static,
    {
        let mailbox = self.clone();
        tokio::task::spawn_blocking(move || f(&mailbox)).await?
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

#[async_trait]
impl Mailbox for FsMailbox {
    async fn write(&self, key: &MailboxKey, record: Vec<u8>) -> HookResult<()> {
        let key = key.clone();
        self.run_blocking(move |mb| mb.write_blocking(&key, &record))
            .await
    }

    async fn create(&self, key: &MailboxKey, record: Vec<u8>) -> HookResult<bool> {
        let key = key.clone();
        self.run_blocking(move |mb| mb.create_blocking(&key, &record))
            .await
    }

    async fn read(&self, key: &MailboxKey) -> HookResult<Option<Vec<u8>>> {
        let key = key.clone();
        self.run_blocking(move |mb| mb.read_blocking(&key)).await
    }

    async fn delete(&self, key: &MailboxKey) -> HookResult<bool> {
        let key = key.clone();
        self.run_blocking(move |mb| mb.delete_blocking(&key)).await
    }

    async fn list(&self, prefix: &str) -> HookResult<Vec<MailboxKey>> {
        let prefix = prefix.to_string();
        self.run_blocking(move |mb| mb.list_blocking(&prefix)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HookError;
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> FsMailbox {
        FsMailbox::open(dir.path().join("mailbox"), Duration::from_millis(200)).unwrap()
    }

    #[tokio::test]
    async fn write_read_delete() {
        let dir = TempDir::new().unwrap();
        let mailbox = open(&dir);
        let key = MailboxKey::pending("abc").unwrap();

        mailbox.write(&key, b"{\"a\":1}".to_vec()).await.unwrap();
        assert_eq!(
            mailbox.read(&key).await.unwrap().as_deref(),
            Some(&b"{\"a\":1}"[..])
        );
        assert!(mailbox.record_path(&key).ends_with("pre_abc.json"));

        assert!(mailbox.delete(&key).await.unwrap());
        assert!(!mailbox.delete(&key).await.unwrap());
        assert_eq!(mailbox.read(&key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn overwrite_replaces_whole_record() {
        let dir = TempDir::new().unwrap();
        let mailbox = open(&dir);
        let key = MailboxKey::completed("x").unwrap();
        mailbox.write(&key, vec![b'a'; 4096]).await.unwrap();
        mailbox.write(&key, b"short".to_vec()).await.unwrap();
        assert_eq!(mailbox.read(&key).await.unwrap().unwrap(), b"short");
    }

    #[tokio::test]
    async fn create_never_replaces_existing_record() {
        let dir = TempDir::new().unwrap();
        let mailbox = open(&dir);
        let key = MailboxKey::completed("once").unwrap();
        assert!(mailbox.create(&key, b"first".to_vec()).await.unwrap());
        assert!(!mailbox.create(&key, b"second".to_vec()).await.unwrap());
        assert_eq!(mailbox.read(&key).await.unwrap().unwrap(), b"first");

        mailbox.delete(&key).await.unwrap();
        assert!(mailbox.create(&key, b"third".to_vec()).await.unwrap());
    }

    #[tokio::test]
    async fn list_filters_by_prefix_and_ignores_side_files() {
        let dir = TempDir::new().unwrap();
        let mailbox = open(&dir);
        for key in ["pre_b", "pre_a", "complete_a"] {
            let key = MailboxKey::parse(key).unwrap();
            mailbox.write(&key, b"{}".to_vec()).await.unwrap();
        }
        fs::write(mailbox.dir().join(".pre_c.1234.tmp"), b"partial").unwrap();
        fs::write(mailbox.dir().join("pre_d.lock"), b"").unwrap();
        fs::write(mailbox.dir().join("notes.txt"), b"").unwrap();

        let keys = mailbox.list("pre_").await.unwrap();
        let names: Vec<&str> = keys.iter().map(|k| k.as_str()).collect();
        assert_eq!(names, vec!["pre_a", "pre_b"]);
        assert_eq!(mailbox.list("").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn no_lock_tokens_left_behind() {
        let dir = TempDir::new().unwrap();
        let mailbox = open(&dir);
        let key = MailboxKey::pending("tok").unwrap();
        mailbox.write(&key, b"{}".to_vec()).await.unwrap();
        mailbox.delete(&key).await.unwrap();
        let leftovers: Vec<_> = fs::read_dir(mailbox.dir()).unwrap().collect();
        assert!(leftovers.is_empty(), "found {leftovers:?}");
    }

    #[tokio::test]
    async fn write_fails_with_lock_timeout_when_key_is_held() {
        let dir = TempDir::new().unwrap();
        let mailbox = open(&dir);
        let key = MailboxKey::pending("busy").unwrap();
        let _held = mailbox.lock_key(&key).unwrap();

        let err = mailbox.write(&key, b"{}".to_vec()).await.unwrap_err();
        assert!(matches!(err, HookError::LockTimeout { .. }), "{err:?}");
        let err = mailbox.delete(&key).await.unwrap_err();
        assert!(matches!(err, HookError::LockTimeout { .. }), "{err:?}");
        assert_eq!(mailbox.read(&key).await.unwrap(), None);
    }
}
