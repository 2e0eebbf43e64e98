use crate::error::{IndexerError, Result};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Rewritten index staged next to the original so the final rename stays on
/// one filesystem. Dropping it without committing removes the staging file.
pub struct StagedIndex {
    target: PathBuf,
    writer: BufWriter<NamedTempFile>,
}

impl StagedIndex {
    pub fn create(target: impl Into<PathBuf>) -> Result<Self> {
        let target = target.into();
        let dir = match target.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let name = target
            .file_name()
            .ok_or_else(|| {
                IndexerError::InvalidPath(format!("index file has no name: {}", target.display()))
            })?
            .to_string_lossy()
            .into_owned();

        let file = tempfile::Builder::new()
            .prefix(&format!("{name}."))
            .tempfile_in(&dir)
            .map_err(|err| IndexerError::storage(&dir, err))?;
        log::debug!("staging {} as {}", target.display(), file.path().display());

        Ok(Self {
            target,
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        self.writer.get_ref().path()
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn writer(&mut self) -> &mut BufWriter<NamedTempFile> {
        &mut self.writer
    }

    /// Flush, fsync and rename over the target. The target keeps its
    /// permission bits.
    pub fn commit(self) -> Result<()> {
        let Self { target, writer } = self;
        let file = writer
            .into_inner()
            .map_err(|err| IndexerError::storage(&target, err.into_error()))?;
        file.as_file()
            .sync_all()
            .map_err(|err| IndexerError::storage(file.path(), err))?;

        match std::fs::metadata(&target) {
            Ok(meta) => file
                .as_file()
                .set_permissions(meta.permissions())
                .map_err(|err| IndexerError::storage(file.path(), err))?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(IndexerError::storage(&target, err)),
        }

        file.persist(&target)
            .map_err(|err| IndexerError::storage(&target, err.error))?;
        Ok(())
    }

    pub fn discard(self) -> Result<()> {
        let Self { target, writer } = self;
        let file = match writer.into_inner() {
            Ok(file) => file,
            // Dropping the temp file still unlinks it.
            Err(err) => return Err(IndexerError::storage(&target, err.into_error())),
        };
        let staged = file.path().to_path_buf();
        file.close()
            .map_err(|err| IndexerError::storage(staged, err))
    }

    /// Commit when `replace` is set, otherwise discard. Returns `replace`.
    pub fn finish(self, replace: bool) -> Result<bool> {
        if replace {
            self.commit()?;
        } else {
            self.discard()?;
        }
        Ok(replace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn dir_entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .expect("read_dir")
            .map(|entry| entry.expect("entry").file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn commit_replaces_target_and_leaves_no_staging_file() {
        let temp = TempDir::new().expect("tempdir");
        let index = temp.path().join("INDEX-15");
        std::fs::write(&index, "old\n").expect("write");

        let mut staged = StagedIndex::create(&index).expect("stage");
        assert_eq!(staged.path().parent(), Some(temp.path()));
        assert!(staged
            .path()
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("INDEX-15.")));
        staged.writer().write_all(b"new\n").expect("write");
        assert!(staged.finish(true).expect("commit"));

        assert_eq!(std::fs::read_to_string(&index).expect("read"), "new\n");
        assert_eq!(dir_entries(temp.path()), vec!["INDEX-15".to_string()]);
    }

    #[test]
    fn discard_keeps_original_untouched() {
        let temp = TempDir::new().expect("tempdir");
        let index = temp.path().join("INDEX-15");
        std::fs::write(&index, "old\n").expect("write");
        let before = std::fs::metadata(&index).expect("meta").modified().expect("mtime");

        let mut staged = StagedIndex::create(&index).expect("stage");
        staged.writer().write_all(b"new\n").expect("write");
        assert!(!staged.finish(false).expect("discard"));

        assert_eq!(std::fs::read_to_string(&index).expect("read"), "old\n");
        let after = std::fs::metadata(&index).expect("meta").modified().expect("mtime");
        assert_eq!(before, after);
        assert_eq!(dir_entries(temp.path()), vec!["INDEX-15".to_string()]);
    }

    #[cfg(unix)]
    #[test]
    fn commit_preserves_target_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().expect("tempdir");
        let index = temp.path().join("INDEX-15");
        std::fs::write(&index, "old\n").expect("write");
        std::fs::set_permissions(&index, std::fs::Permissions::from_mode(0o644)).expect("chmod");

        let mut staged = StagedIndex::create(&index).expect("stage");
        staged.writer().write_all(b"new\n").expect("write");
        staged.commit().expect("commit");

        let mode = std::fs::metadata(&index).expect("meta").permissions().mode();
        assert_eq!(mode & 0o777, 0o644);
    }
}
