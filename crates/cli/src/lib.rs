use anyhow::{Context as AnyhowContext, Result};
use clap::Parser;
use portsindex_indexer::{
    default_concurrency, parse_concurrency, DescribeCommand, OriginRequest, OriginSource,
    ReconcileConfig, Reconciler, ReleaseTokens, DEFAULT_DESCRIBE_PROGRAM,
};
use std::env;
use std::io::{self, BufRead, IsTerminal};
use std::path::PathBuf;
use std::time::Duration;

mod discovery;
mod report;

pub use report::{summary_line, RunSummary};

const JOBS_ENV: &str = "PORTSINDEX_JOBS";

fn print_stdout(text: &str) -> Result<()> {
    use std::io::Write;

    let mut stdout = io::stdout().lock();
    if let Err(err) = stdout
        .write_all(text.as_bytes())
        .and_then(|_| stdout.write_all(b"\n"))
        .and_then(|_| stdout.flush())
    {
        if err.kind() == io::ErrorKind::BrokenPipe {
            return Ok(());
        }
        return Err(err.into());
    }
    Ok(())
}

#[derive(Parser)]
#[command(name = "portsindexup")]
#[command(about = "Update the ports INDEX for the given origins", long_about = None)]
#[command(version)]
struct Cli {
    /// Origins to refresh (category/name or absolute paths); also read from stdin
    origins: Vec<String>,

    /// Ports tree that relative origins are resolved against (default: PORTSDIR)
    #[arg(short = 'p', long)]
    ports_dir: Option<PathBuf>,

    /// Prefix written into rewritten portdir and descr fields (default: PORTSDIR)
    #[arg(long)]
    default_ports_dir: Option<PathBuf>,

    /// Index file to update (default: <ports-dir>/<INDEXFILE>)
    #[arg(short = 'i', long)]
    index_file: Option<PathBuf>,

    /// Current OS release date (default: kern.osreldate)
    #[arg(long)]
    osreldate: Option<String>,

    /// make(1) binary used for describe and variable queries
    #[arg(long, default_value = DEFAULT_DESCRIBE_PROGRAM)]
    make: PathBuf,

    /// Concurrent describe jobs (overrides PORTSINDEX_JOBS)
    #[arg(short = 'j', long)]
    jobs: Option<usize>,

    /// Kill a describe that runs longer than this many seconds (0 disables)
    #[arg(long, default_value_t = 0)]
    timeout_secs: u64,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Quiet mode: log only warnings/errors
    #[arg(short, long)]
    quiet: bool,

    /// Print the run summary as JSON on stdout
    #[arg(long)]
    json: bool,
}

fn read_origins(cli_origins: Vec<String>) -> Result<Vec<OriginRequest>> {
    let mut requests: Vec<OriginRequest> = cli_origins
        .into_iter()
        .map(|origin| OriginRequest::new(origin, OriginSource::Args))
        .collect();

    let stdin = io::stdin();
    if !stdin.is_terminal() {
        for line in stdin.lock().lines() {
            let line = line.context("Failed to read origins from stdin")?;
            let origin = line.trim();
            if !origin.is_empty() {
                requests.push(OriginRequest::new(origin, OriginSource::Stdin));
            }
        }
    }
    Ok(requests)
}

async fn build_config(cli: &Cli) -> Result<ReconcileConfig> {
    let default_ports_dir = match &cli.default_ports_dir {
        Some(dir) => dir.clone(),
        None => discovery::default_ports_dir(&cli.make)
            .await
            .context("Failed to determine the default ports directory")?,
    };
    let ports_dir = cli
        .ports_dir
        .clone()
        .unwrap_or_else(|| default_ports_dir.clone());
    let index_file = match &cli.index_file {
        Some(path) => path.clone(),
        None => discovery::index_file(&cli.make, &ports_dir)
            .await
            .context("Failed to determine the index file")?,
    };
    let current = match &cli.osreldate {
        Some(token) => token.trim().to_string(),
        None => discovery::current_osreldate()
            .await
            .context("Failed to determine the OS release date")?,
    };
    let release = ReleaseTokens::from_current(current);

    let concurrency = cli.jobs.unwrap_or_else(|| {
        parse_concurrency(env::var(JOBS_ENV).ok().as_deref(), default_concurrency())
    });
    let task_timeout = (cli.timeout_secs > 0).then(|| Duration::from_secs(cli.timeout_secs));

    log::debug!("make: {}", cli.make.display());
    log::debug!("osreldate: {} -> {}", release.stale, release.current);
    log::debug!(
        "ports dir: {}, default ports dir: {}",
        ports_dir.display(),
        default_ports_dir.display()
    );

    Ok(ReconcileConfig::new(ports_dir, index_file, release)
        .with_default_ports_dir(default_ports_dir)
        .with_concurrency(concurrency)
        .with_task_timeout(task_timeout)
        .with_describe_command(DescribeCommand::new(cli.make.clone())))
}

pub async fn main_entry() -> Result<()> {
    let mut cli = Cli::parse();

    // Keep stdout clean for JSON consumers
    if cli.json {
        cli.quiet = true;
    }

    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if cli.quiet {
        builder.filter_level(log::LevelFilter::Warn);
    } else if cli.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.target(env_logger::Target::Stderr).init();

    let requests = read_origins(std::mem::take(&mut cli.origins))?;
    let config = build_config(&cli).await?;
    log::debug!(
        "index file: {}, {} origin(s), {} job(s)",
        config.index_file.display(),
        requests.len(),
        config.concurrency
    );

    let index_file = config.index_file.display().to_string();
    let report = Reconciler::new(config)
        .run(requests)
        .await
        .with_context(|| format!("Failed to update {index_file}"))?;

    for err in &report.errors {
        log::error!("{err}");
    }

    if cli.json {
        let summary = RunSummary::new(index_file, &report);
        print_stdout(&serde_json::to_string_pretty(&summary)?)?;
    } else {
        eprintln!("{}", summary_line(&report.stats));
    }
    Ok(())
}
