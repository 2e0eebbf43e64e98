//! Reconcile index rows against the described table.

use crate::config::ReleaseTokens;
use crate::error::ReconcileError;
use crate::origin::RemovedOrigins;
use crate::pool::ErrorSink;
use crate::record::{
    describe_field, index_field, join_record, origin_key, replace_first, split_record,
    DEPENDENCY_SEPARATOR,
};
use crate::table::{DescribedSnapshot, StrippedIndex};
use serde::{Deserialize, Serialize};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

const PORTDIR_COMPONENTS: usize = 2;
const DESCR_FILE_COMPONENTS: usize = 3;

/// Set `dst[idx]` to `prefix` joined with the last `count` `/`-separated
/// components of `src[idx]`. Leaves `dst` alone when `src[idx]` is empty, has
/// fewer than `count` components, or `idx` is out of range for either side.
pub fn update_path(dst: &mut [String], src: &[String], idx: usize, prefix: &Path, count: usize) {
    if idx >= dst.len() || idx >= src.len() || src[idx].is_empty() {
        return;
    }
    let parts: Vec<&str> = src[idx].split('/').collect();
    if parts.len() < count {
        return;
    }

    let mut path = PathBuf::from(prefix);
    for part in parts[parts.len() - count..].iter().filter(|p| !p.is_empty()) {
        path.push(part);
    }
    dst[idx] = path.to_string_lossy().into_owned();
}

/// Copy `src[sidx]` into `dst[didx]` when both exist and the source is non-empty.
pub fn safe_update(dst: &mut [String], didx: usize, src: &[String], sidx: usize) {
    if didx >= dst.len() || sidx >= src.len() || src[sidx].is_empty() {
        return;
    }
    dst[didx] = src[sidx].clone();
}

/// Rewrite a whitespace-separated dependency list: every token is replaced by
/// its canonical name-version when known, then has the first `stale` occurrence
/// swapped for `current`.
pub fn update_dependency(deps: &str, index: &StrippedIndex, stale: &str, current: &str) -> String {
    deps.split_whitespace()
        .map(|dep| {
            let dep = index.lookup(dep).unwrap_or(dep);
            replace_first(dep, stale, current)
        })
        .collect::<Vec<_>>()
        .join(DEPENDENCY_SEPARATOR)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergedLine {
    /// Fewer than 13 fields; carries the count found.
    Malformed(usize),
    /// The row's origin was removed from the tree.
    Removed,
    Row { text: String, changed: bool },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeStats {
    pub lines_read: usize,
    pub lines_changed: usize,
    pub lines_removed: usize,
    pub lines_written: usize,
    pub lines_malformed: usize,
}

impl MergeStats {
    /// Whether the staged output differs from the original index.
    pub fn needs_commit(&self) -> bool {
        self.lines_changed + self.lines_removed > 0
    }
}

pub struct IndexMerger<'a> {
    described: &'a DescribedSnapshot,
    removed: &'a RemovedOrigins,
    default_ports_dir: &'a Path,
    release: &'a ReleaseTokens,
}

impl<'a> IndexMerger<'a> {
    pub fn new(
        described: &'a DescribedSnapshot,
        removed: &'a RemovedOrigins,
        default_ports_dir: &'a Path,
        release: &'a ReleaseTokens,
    ) -> Self {
        Self {
            described,
            removed,
            default_ports_dir,
            release,
        }
    }

    pub fn merge_line(&self, line: &str) -> MergedLine {
        let mut fields = match split_record(line) {
            Ok(fields) => fields,
            Err(found) => return MergedLine::Malformed(found),
        };

        if self
            .removed
            .contains(&origin_key(&fields[index_field::PORTDIR]))
        {
            return MergedLine::Removed;
        }

        let stripped = self.described.stripped();
        if let Some(canonical) = stripped.lookup(&fields[index_field::NAME_VERSION]) {
            if let Some(row) = self.described.get(canonical) {
                self.apply_described(&mut fields, row.fields());
            }
            fields[index_field::NAME_VERSION] = canonical.to_string();
        }

        let ReleaseTokens { current, stale } = self.release;
        for idx in index_field::DEPENDENCIES {
            fields[idx] = update_dependency(&fields[idx], stripped, stale, current);
        }
        fields[index_field::NAME_VERSION] =
            replace_first(&fields[index_field::NAME_VERSION], stale, current);

        let text = join_record(&fields);
        let changed = text != line;
        MergedLine::Row { text, changed }
    }

    // portdir and descr_file sit at the same position in both layouts.
    fn apply_described(&self, fields: &mut [String], described: &[String]) {
        update_path(
            fields,
            described,
            index_field::PORTDIR,
            self.default_ports_dir,
            PORTDIR_COMPONENTS,
        );
        update_path(
            fields,
            described,
            index_field::DESCR_FILE,
            self.default_ports_dir,
            DESCR_FILE_COMPONENTS,
        );

        for (dst, src) in [
            (index_field::LOCAL_PREFIX, describe_field::LOCAL_PREFIX),
            (index_field::COMMENT, describe_field::COMMENT),
            (index_field::MAINTAINER, describe_field::MAINTAINER),
            (index_field::CATEGORIES, describe_field::CATEGORIES),
            (index_field::WWW, describe_field::WWW),
        ] {
            safe_update(fields, dst, described, src);
        }
    }

    /// Stream `reader` line by line into `writer`. Malformed lines are reported
    /// to `errors` and dropped, lines that are not UTF-8 are reported and
    /// copied through untouched; I/O failures are returned as-is.
    pub fn merge_stream<R: BufRead, W: Write>(
        &self,
        mut reader: R,
        writer: &mut W,
        errors: &ErrorSink,
    ) -> io::Result<MergeStats> {
        let mut stats = MergeStats::default();
        let mut buf = Vec::new();
        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf)? == 0 {
                break;
            }
            stats.lines_read += 1;
            let raw = buf.strip_suffix(b"\n").unwrap_or(&buf[..]);

            let Ok(line) = std::str::from_utf8(raw) else {
                errors.report(ReconcileError::UndecodableIndexLine {
                    line: stats.lines_read,
                });
                writer.write_all(raw)?;
                writer.write_all(b"\n")?;
                stats.lines_written += 1;
                continue;
            };

            match self.merge_line(line) {
                MergedLine::Malformed(found) => {
                    stats.lines_malformed += 1;
                    errors.report(ReconcileError::MalformedIndexLine {
                        line: stats.lines_read,
                        found,
                    });
                }
                MergedLine::Removed => stats.lines_removed += 1,
                MergedLine::Row { text, changed } => {
                    if changed {
                        stats.lines_changed += 1;
                    }
                    writer.write_all(text.as_bytes())?;
                    writer.write_all(b"\n")?;
                    stats.lines_written += 1;
                }
            }
        }
        Ok(stats)
    }
}
