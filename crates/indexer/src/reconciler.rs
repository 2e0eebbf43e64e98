use crate::commit::StagedIndex;
use crate::config::ReconcileConfig;
use crate::error::{IndexerError, ReconcileError, Result};
use crate::index_lock::{acquire_index_write_lock, index_write_lock_wait_ms_last};
use crate::merge::{IndexMerger, MergeStats};
use crate::origin::{OriginRequest, OriginScanner, RemovedOrigins, ScanDecision};
use crate::pool::{ErrorSink, TaskOutcome, TaskReport, WorkerPool};
use crate::stats::ReconcileStats;
use crate::table::{DescribedSnapshot, DescribedTable};
use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;
use std::time::Instant;

/// Everything a finished run has to say.
#[derive(Debug)]
pub struct ReconcileReport {
    pub stats: ReconcileStats,
    /// Non-fatal errors in the order they were recorded
    pub errors: Vec<ReconcileError>,
    pub tasks: Vec<TaskReport>,
}

/// Runs the scan phase, then the merge phase, against one index file.
pub struct Reconciler {
    config: Arc<ReconcileConfig>,
}

impl Reconciler {
    pub fn new(config: ReconcileConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    pub async fn run<I>(&self, requests: I) -> Result<ReconcileReport>
    where
        I: IntoIterator<Item = OriginRequest>,
    {
        let started = Instant::now();
        let mut stats = ReconcileStats::new();
        let errors = Arc::new(ErrorSink::new());
        let table = Arc::new(DescribedTable::new());
        let mut removed = RemovedOrigins::new();

        let mut pool = WorkerPool::new(self.config.concurrency, self.config.task_timeout);
        pool.start(Arc::clone(&table), Arc::clone(&errors))?;

        let scanner = OriginScanner::new(&self.config);
        for request in requests {
            stats.origins_requested += 1;
            match scanner.classify(&request) {
                ScanDecision::Query(task) => {
                    stats.origins_queried += 1;
                    pool.add_task(task).await?;
                }
                ScanDecision::Removed(key) => {
                    log::debug!("{} ({}): removed as {key}", request.origin, request.source);
                    removed.insert(key);
                }
                ScanDecision::Inaccessible(err) => {
                    stats.origins_inaccessible += 1;
                    errors.report(err);
                }
                ScanDecision::NotAPackage => stats.origins_skipped += 1,
            }
        }

        let tasks = pool.stop().await?;
        let described = DescribedTable::freeze(table)?;
        stats.origins_removed = removed.len();
        stats.records_described = described.len();
        stats.tasks_failed = tasks
            .iter()
            .filter(|t| t.outcome == TaskOutcome::Failed)
            .count();
        log::info!(
            "{} origin(s) described into {} record(s), {} removed",
            stats.origins_queried,
            stats.records_described,
            stats.origins_removed
        );

        if described.is_empty() && removed.is_empty() {
            log::info!("nothing to reconcile, leaving {} alone", self.config.index_file.display());
        } else {
            let lock = acquire_index_write_lock(&self.config.index_file).await?;
            stats.lock_wait_ms = index_write_lock_wait_ms_last();

            let config = Arc::clone(&self.config);
            let sink = Arc::clone(&errors);
            let (merge, replaced) = tokio::task::spawn_blocking(move || {
                merge_into_index(&config, &described, &removed, &sink)
            })
            .await
            .map_err(|err| IndexerError::Other(format!("join merge task: {err}")))??;
            drop(lock);

            stats.merge = Some(merge);
            stats.replaced = replaced;
        }

        stats.time_ms = started.elapsed().as_millis() as u64;
        Ok(ReconcileReport {
            stats,
            errors: errors.take(),
            tasks,
        })
    }
}

/// Stream the index through the merger into a staging file, then replace the
/// index only if a line changed or was removed.
pub fn merge_into_index(
    config: &ReconcileConfig,
    described: &DescribedSnapshot,
    removed: &RemovedOrigins,
    errors: &ErrorSink,
) -> Result<(MergeStats, bool)> {
    let index_file = &config.index_file;
    let input = File::open(index_file).map_err(|err| IndexerError::storage(index_file, err))?;
    let mut staged = StagedIndex::create(index_file)?;
    log::debug!(
        "index_file: {}, temp_file: {}",
        index_file.display(),
        staged.path().display()
    );

    let merger = IndexMerger::new(
        described,
        removed,
        &config.default_ports_dir,
        &config.release,
    );
    let stats = merger
        .merge_stream(BufReader::new(input), staged.writer(), errors)
        .map_err(|err| IndexerError::storage(index_file, err))?;

    let replaced = staged.finish(stats.needs_commit())?;
    if replaced {
        log::info!("rewrote {}", index_file.display());
    }
    Ok((stats, replaced))
}
