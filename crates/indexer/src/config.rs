use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const MAX_CONCURRENCY: usize = 64;
pub const DEFAULT_DESCRIPTOR_FILE: &str = "Makefile";
pub const DEFAULT_DESCRIBE_PROGRAM: &str = "make";

/// Current OS release token and the placeholder it replaces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseTokens {
    pub current: String,
    pub stale: String,
}

impl ReleaseTokens {
    /// The stale placeholder keeps the first two characters of `current` and
    /// fills the rest with `9`, e.g. `1500001` -> `1599999`.
    pub fn from_current(current: impl Into<String>) -> Self {
        let current = current.into();
        let stale = current
            .chars()
            .enumerate()
            .map(|(i, c)| if i < 2 { c } else { '9' })
            .collect();
        Self { current, stale }
    }
}

/// The per-origin query command. Arguments are `leading_args` followed by
/// `-C <dir> describe`.
#[derive(Debug, Clone)]
pub struct DescribeCommand {
    pub program: PathBuf,
    pub leading_args: Vec<OsString>,
}

impl DescribeCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
        }
    }

    pub fn with_leading_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.leading_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn args_for(&self, dir: &Path) -> Vec<OsString> {
        let mut args = self.leading_args.clone();
        args.push("-C".into());
        args.push(dir.as_os_str().to_os_string());
        args.push("describe".into());
        args
    }
}

impl Default for DescribeCommand {
    fn default() -> Self {
        Self::new(DEFAULT_DESCRIBE_PROGRAM)
    }
}

/// Immutable settings for one reconciliation run.
#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    /// Root that relative origins are resolved against.
    pub ports_dir: PathBuf,
    /// Prefix written into rewritten portdir and descr_file fields.
    pub default_ports_dir: PathBuf,
    pub index_file: PathBuf,
    pub release: ReleaseTokens,
    pub concurrency: usize,
    /// `None` waits on the describe command forever.
    pub task_timeout: Option<Duration>,
    pub describe: DescribeCommand,
    pub descriptor_file: String,
}

impl ReconcileConfig {
    pub fn new(
        ports_dir: impl Into<PathBuf>,
        index_file: impl Into<PathBuf>,
        release: ReleaseTokens,
    ) -> Self {
        let ports_dir = ports_dir.into();
        Self {
            default_ports_dir: ports_dir.clone(),
            ports_dir,
            index_file: index_file.into(),
            release,
            concurrency: default_concurrency(),
            task_timeout: None,
            describe: DescribeCommand::default(),
            descriptor_file: DEFAULT_DESCRIPTOR_FILE.to_string(),
        }
    }

    pub fn with_default_ports_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.default_ports_dir = dir.into();
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.clamp(1, MAX_CONCURRENCY);
        self
    }

    pub fn with_task_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.task_timeout = timeout;
        self
    }

    pub fn with_describe_command(mut self, describe: DescribeCommand) -> Self {
        self.describe = describe;
        self
    }

    pub fn with_descriptor_file(mut self, name: impl Into<String>) -> Self {
        self.descriptor_file = name.into();
        self
    }

    /// Absolute directory for an origin: taken as-is when absolute, otherwise
    /// joined onto `ports_dir`.
    pub fn origin_dir(&self, origin: &str) -> PathBuf {
        let path = Path::new(origin);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.ports_dir.join(path)
        }
    }
}

pub fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(MAX_CONCURRENCY)
}

/// Parse a worker count override such as `PORTSINDEX_JOBS`.
pub fn parse_concurrency(raw: Option<&str>, default_value: usize) -> usize {
    raw.map(str::trim)
        .filter(|v| !v.is_empty())
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(default_value)
        .clamp(1, MAX_CONCURRENCY)
}
