use anyhow::{bail, Context as AnyhowContext, Result};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tokio::time::{timeout, Duration};

// make -V parses the whole ports framework; keep a generous bound.
const MAKE_QUERY_TIMEOUT: Duration = Duration::from_secs(60);
const SYSCTL_TIMEOUT: Duration = Duration::from_secs(5);

pub(crate) const ROOT_DIR: &str = "/";

/// Run a command and return its stdout with the line breaks removed.
pub(crate) async fn read_stdout<I, S>(program: &Path, args: I, limit: Duration) -> Result<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = timeout(limit, Command::new(program).args(args).kill_on_drop(true).output())
        .await
        .with_context(|| format!("{} did not finish within {limit:?}", program.display()))?
        .with_context(|| format!("error running {}", program.display()))?;

    if !output.status.success() {
        bail!(
            "{} exited with {}: {}",
            program.display(),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    let text = String::from_utf8(output.stdout)
        .with_context(|| format!("{} printed non-UTF-8 output", program.display()))?;
    Ok(text.lines().collect())
}

/// `make -C <dir> -V <variable>`
pub(crate) async fn make_variable(make: &Path, dir: &Path, variable: &str) -> Result<String> {
    let value = read_stdout(
        make,
        [OsStr::new("-C"), dir.as_os_str(), OsStr::new("-V"), OsStr::new(variable)],
        MAKE_QUERY_TIMEOUT,
    )
    .await
    .with_context(|| format!("query {variable} in {}", dir.display()))?;
    if value.is_empty() {
        bail!("{variable} is empty in {}", dir.display());
    }
    Ok(value)
}

pub(crate) async fn default_ports_dir(make: &Path) -> Result<PathBuf> {
    make_variable(make, Path::new(ROOT_DIR), "PORTSDIR")
        .await
        .map(PathBuf::from)
}

pub(crate) async fn index_file(make: &Path, ports_dir: &Path) -> Result<PathBuf> {
    let name = make_variable(make, ports_dir, "INDEXFILE").await?;
    Ok(ports_dir.join(name))
}

/// Running kernel's `kern.osreldate`, e.g. `1500001`.
pub(crate) async fn current_osreldate() -> Result<String> {
    let value = read_stdout(Path::new("sysctl"), ["-n", "kern.osreldate"], SYSCTL_TIMEOUT)
        .await
        .context("read kern.osreldate")?;
    let value = value.trim().to_string();
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        bail!("unexpected kern.osreldate value: {value:?}");
    }
    Ok(value)
}
