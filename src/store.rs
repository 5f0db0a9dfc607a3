use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::Context as _;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::Digest as _;

#[derive(Debug)]
pub enum LockError {
    Busy { document: PathBuf, waited: Duration },
    Io(std::io::Error),
}

impl std::fmt::Display for LockError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockError::Busy { document, waited } => write!(
                f,
                "lock busy for {} after {:.1}s",
                document.display(),
                waited.as_secs_f64()
            ),
            LockError::Io(err) => write!(f, "lock I/O error: {err}"),
        }
    }
}

impl std::error::Error for LockError {}

impl From<std::io::Error> for LockError {
    fn from(value: std::io::Error) -> Self {
        LockError::Io(value)
    }
}

/// Exclusive advisory lock on one document. Released on drop.
#[derive(Debug)]
pub struct DocumentLock {
    file: File,
}

impl Drop for DocumentLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}

/// JSON documents on the local filesystem.
///
/// Reads never lock (writes are atomic renames). Writers take a per-document
/// lock that is not re-entrant: never call [`DocumentStore::write`] or
/// [`DocumentStore::update`] for a path whose lock the current call stack
/// already holds.
#[derive(Debug, Clone)]
pub struct DocumentStore {
    lock_dir: PathBuf,
    lock_timeout: Duration,
    backup_on_write: bool,
}

impl DocumentStore {
    pub fn new(lock_dir: impl Into<PathBuf>) -> Self {
        Self {
            lock_dir: lock_dir.into(),
            lock_timeout: Duration::from_secs(30),
            backup_on_write: false,
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn with_backups(mut self, enabled: bool) -> Self {
        self.backup_on_write = enabled;
        self
    }

    /// Read a document, or the type's empty value when the file does not exist.
    pub fn read<T: DeserializeOwned + Default>(&self, path: &Path) -> anyhow::Result<T> {
        match self.read_existing(path)? {
            Some(value) => Ok(value),
            None => {
                tracing::info!(path = %path.display(), "document missing; using empty default");
                Ok(T::default())
            }
        }
    }

    pub fn read_existing<T: DeserializeOwned>(&self, path: &Path) -> anyhow::Result<Option<T>> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err).with_context(|| format!("read: {}", path.display())),
        };
        let value = serde_json::from_slice(&bytes)
            .with_context(|| format!("parse json: {}", path.display()))?;
        Ok(Some(value))
    }

    pub fn write<T: Serialize>(&self, path: &Path, value: &T) -> anyhow::Result<()> {
        let _lock = self.lock(path)?;
        self.write_locked(path, value)
    }

    /// Read-modify-write under one lock span. The document is written only when
    /// the closure actually changed it. Returns the closure's value and whether
    /// a write happened.
    pub fn update<T, R>(
        &self,
        path: &Path,
        f: impl FnOnce(&mut T) -> anyhow::Result<R>,
    ) -> anyhow::Result<(R, bool)>
    where
        T: Serialize + DeserializeOwned + Default,
    {
        let _lock = self.lock(path)?;
        let mut value = self.read_existing::<T>(path)?.unwrap_or_default();

        let before = serde_json::to_value(&value).context("serialize document snapshot")?;
        let result = f(&mut value)?;
        let after = serde_json::to_value(&value).context("serialize updated document")?;

        if before == after {
            return Ok((result, false));
        }
        self.write_locked(path, &value)?;
        Ok((result, true))
    }

    pub fn lock(&self, path: &Path) -> anyhow::Result<DocumentLock> {
        let lock_path = self.lock_path(path)?;
        acquire_lock(&lock_path, path, self.lock_timeout)
            .with_context(|| format!("lock document: {}", path.display()))
    }

    /// `*.json` documents directly inside `dir`, sorted by path.
    pub fn list_documents(&self, dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err).with_context(|| format!("read dir: {}", dir.display())),
        };

        let mut paths = Vec::new();
        for entry in entries {
            let path = entry
                .with_context(|| format!("read dir entry: {}", dir.display()))?
                .path();
            if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some("json") {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }

    fn write_locked<T: Serialize>(&self, path: &Path, value: &T) -> anyhow::Result<()> {
        let parent = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create parent dir: {}", parent.display()))?;

        if self.backup_on_write && path.exists() {
            let backup = backup_path(path);
            std::fs::copy(path, &backup)
                .with_context(|| format!("backup {} to {}", path.display(), backup.display()))?;
        }

        let tmp_path = path.with_extension(format!("tmp.{}", uuid::Uuid::new_v4().simple()));
        let mut data = serde_json::to_vec_pretty(value).context("serialize json")?;
        data.push(b'\n');
        std::fs::write(&tmp_path, &data)
            .with_context(|| format!("write tmp: {}", tmp_path.display()))?;
        if let Err(err) = std::fs::rename(&tmp_path, path) {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(err).with_context(|| format!("rename tmp to final: {}", path.display()));
        }
        tracing::debug!(path = %path.display(), bytes = data.len(), "wrote document");
        Ok(())
    }

    fn lock_path(&self, path: &Path) -> anyhow::Result<PathBuf> {
        let absolute = std::path::absolute(path)
            .with_context(|| format!("resolve absolute path: {}", path.display()))?;
        let digest = sha2::Sha256::digest(absolute.to_string_lossy().as_bytes());
        Ok(self.lock_dir.join(format!("{}.lock", hex::encode(digest))))
    }
}

pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".backup");
    path.with_file_name(name)
}

fn acquire_lock(
    lock_path: &Path,
    document: &Path,
    timeout: Duration,
) -> Result<DocumentLock, LockError> {
    if let Some(parent) = lock_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(lock_path)?;

    let start = Instant::now();
    loop {
        match fs2::FileExt::try_lock_exclusive(&file) {
            Ok(()) => return Ok(DocumentLock { file }),
            Err(err) if err.kind() == fs2::lock_contended_error().kind() => {
                if start.elapsed() >= timeout {
                    return Err(LockError::Busy {
                        document: document.to_path_buf(),
                        waited: start.elapsed(),
                    });
                }
                std::thread::sleep(Duration::from_millis(10));
            }
            Err(err) => return Err(LockError::Io(err)),
        }
    }
}
