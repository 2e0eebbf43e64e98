use crate::{IndexerError, Result};
use fs2::FileExt;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

static INDEX_WRITE_LOCK_WAIT_MS_LAST: AtomicU64 = AtomicU64::new(0);

pub fn index_write_lock_wait_ms_last() -> u64 {
    INDEX_WRITE_LOCK_WAIT_MS_LAST.load(Ordering::Relaxed)
}

/// Held for the whole read-rewrite-rename cycle of one index file.
pub(crate) struct IndexWriteLock {
    file: std::fs::File,
}

impl Drop for IndexWriteLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

pub(crate) fn lock_path_for_index(index_file: &Path) -> PathBuf {
    let mut name = index_file
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| OsString::from("INDEX"));
    name.push(".lock");
    index_file.with_file_name(name)
}

pub(crate) async fn acquire_index_write_lock(index_file: &Path) -> Result<IndexWriteLock> {
    let path = lock_path_for_index(index_file);

    tokio::task::spawn_blocking(move || -> Result<IndexWriteLock> {
        use std::fs::OpenOptions;

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|err| IndexerError::storage(&path, err))?;

        let start = Instant::now();
        FileExt::lock_exclusive(&file).map_err(|err| IndexerError::storage(&path, err))?;
        let waited = start.elapsed().as_millis() as u64;
        INDEX_WRITE_LOCK_WAIT_MS_LAST.store(waited, Ordering::Relaxed);
        log::debug!("acquired {} after {waited}ms", path.display());

        Ok(IndexWriteLock { file })
    })
    .await
    .map_err(|err| IndexerError::Other(format!("join index lock task: {err}")))?
}
