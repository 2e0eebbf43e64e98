use crate::config::ReconcileConfig;
use crate::error::ReconcileError;
use crate::pool::Task;
use crate::record::origin_key;
use std::collections::HashSet;
use std::fmt;
use std::io;
use std::path::Path;

/// Where an origin was requested from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OriginSource {
    Args,
    Stdin,
}

impl fmt::Display for OriginSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Args => f.write_str("args"),
            Self::Stdin => f.write_str("stdin"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginRequest {
    pub origin: String,
    pub source: OriginSource,
}

impl OriginRequest {
    pub fn new(origin: impl Into<String>, source: OriginSource) -> Self {
        Self {
            origin: origin.into(),
            source,
        }
    }
}

#[derive(Debug)]
pub enum PathKind {
    Directory,
    RegularFile,
    NotFound,
    OtherError(io::Error),
}

/// Anything that exists but is not a directory (sockets, fifos) counts as a
/// regular file.
pub fn probe_path(path: &Path) -> PathKind {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_dir() => PathKind::Directory,
        Ok(_) => PathKind::RegularFile,
        Err(err) if err.kind() == io::ErrorKind::NotFound => PathKind::NotFound,
        Err(err) => PathKind::OtherError(err),
    }
}

/// Origin keys whose port directory no longer exists.
#[derive(Debug, Default, Clone)]
pub struct RemovedOrigins {
    keys: HashSet<String>,
}

impl RemovedOrigins {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>) -> bool {
        self.keys.insert(key.into())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[derive(Debug)]
pub enum ScanDecision {
    Query(Task),
    Removed(String),
    Inaccessible(ReconcileError),
    /// A directory without a descriptor file: neither queried nor removed.
    NotAPackage,
}

/// Turns requested origins into describe tasks or removal records.
pub struct OriginScanner<'a> {
    config: &'a ReconcileConfig,
}

impl<'a> OriginScanner<'a> {
    pub fn new(config: &'a ReconcileConfig) -> Self {
        Self { config }
    }

    pub fn classify(&self, request: &OriginRequest) -> ScanDecision {
        let dir = self.config.origin_dir(&request.origin);
        match probe_path(&dir) {
            PathKind::NotFound | PathKind::RegularFile => ScanDecision::Removed(origin_key(&dir)),
            PathKind::OtherError(source) => {
                ScanDecision::Inaccessible(ReconcileError::Access { path: dir, source })
            }
            PathKind::Directory => {
                let descriptor = dir.join(&self.config.descriptor_file);
                match probe_path(&descriptor) {
                    PathKind::RegularFile => {}
                    PathKind::OtherError(source) => {
                        return ScanDecision::Inaccessible(ReconcileError::Access {
                            path: descriptor,
                            source,
                        });
                    }
                    PathKind::Directory | PathKind::NotFound => {
                        log::debug!(
                            "{}: no {}, skipping",
                            dir.display(),
                            self.config.descriptor_file
                        );
                        return ScanDecision::NotAPackage;
                    }
                }
                let describe = &self.config.describe;
                ScanDecision::Query(Task {
                    origin: request.origin.clone(),
                    source: request.source,
                    args: describe.args_for(&dir),
                    program: describe.program.clone(),
                    dir,
                })
            }
        }
    }
}
