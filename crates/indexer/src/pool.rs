use crate::describe::run_describe;
use crate::error::{IndexerError, ReconcileError, Result};
use crate::origin::OriginSource;
use crate::table::DescribedTable;
use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex as TokioMutex};
use tokio::task::JoinHandle;

/// One describe invocation for one origin.
#[derive(Debug, Clone)]
pub struct Task {
    pub origin: String,
    pub source: OriginSource,
    pub dir: PathBuf,
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    /// The failure itself is in the [`ErrorSink`].
    Failed,
}

/// Every dequeued task produces exactly one report.
#[derive(Debug, Clone)]
pub struct TaskReport {
    pub origin: String,
    pub source: OriginSource,
    pub records: usize,
    pub outcome: TaskOutcome,
}

/// Lock-guarded collector for non-fatal errors. Producers push synchronously,
/// so everything reported by a worker is visible once that worker is joined.
#[derive(Debug, Default)]
pub struct ErrorSink {
    errors: Mutex<Vec<ReconcileError>>,
}

impl ErrorSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&self, error: ReconcileError) {
        log::debug!("recorded error: {error}");
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(error);
    }

    pub fn len(&self) -> usize {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn take(&self) -> Vec<ReconcileError> {
        std::mem::take(&mut *self.errors.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// Fixed-size pool running describe tasks.
///
/// The queue holds a single slot, so [`WorkerPool::add_task`] waits while every
/// worker is busy and at most `size` describe processes run at once.
pub struct WorkerPool {
    size: usize,
    task_timeout: Option<Duration>,
    sender: Option<mpsc::Sender<Task>>,
    workers: Vec<JoinHandle<Vec<TaskReport>>>,
}

impl WorkerPool {
    pub fn new(size: usize, task_timeout: Option<Duration>) -> Self {
        Self {
            size: size.max(1),
            task_timeout,
            sender: None,
            workers: Vec::new(),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn start(&mut self, table: Arc<DescribedTable>, errors: Arc<ErrorSink>) -> Result<()> {
        if self.sender.is_some() {
            return Err(IndexerError::Other("worker pool already started".into()));
        }

        let (sender, receiver) = mpsc::channel::<Task>(1);
        let queue = Arc::new(TokioMutex::new(receiver));
        self.workers = (0..self.size)
            .map(|id| {
                tokio::spawn(worker_loop(
                    id,
                    Arc::clone(&queue),
                    Arc::clone(&table),
                    Arc::clone(&errors),
                    self.task_timeout,
                ))
            })
            .collect();
        self.sender = Some(sender);
        log::debug!("started {} describe workers", self.size);
        Ok(())
    }

    pub async fn add_task(&self, task: Task) -> Result<()> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| IndexerError::Other("worker pool is not running".into()))?;
        sender
            .send(task)
            .await
            .map_err(|err| IndexerError::Other(format!("no worker accepted {}", err.0.origin)))
    }

    /// Close the queue and wait for every worker to finish. Nothing written
    /// to the shared table or error sink happens after this returns.
    pub async fn stop(mut self) -> Result<Vec<TaskReport>> {
        drop(self.sender.take());

        let mut reports = Vec::new();
        let mut first_panic = None;
        for handle in self.workers.drain(..) {
            match handle.await {
                Ok(mut worker_reports) => reports.append(&mut worker_reports),
                Err(err) => {
                    log::error!("describe worker failed: {err}");
                    first_panic.get_or_insert(err);
                }
            }
        }
        if let Some(err) = first_panic {
            return Err(IndexerError::Other(format!("join describe worker: {err}")));
        }
        Ok(reports)
    }
}

async fn worker_loop(
    id: usize,
    queue: Arc<TokioMutex<mpsc::Receiver<Task>>>,
    table: Arc<DescribedTable>,
    errors: Arc<ErrorSink>,
    task_timeout: Option<Duration>,
) -> Vec<TaskReport> {
    let mut reports = Vec::new();
    loop {
        let next = queue.lock().await.recv().await;
        let Some(task) = next else {
            break;
        };

        log::debug!(
            "[worker {id}] executing: {} {:?} for {} ({})",
            task.program.display(),
            task.args,
            task.origin,
            task.source
        );
        let (records, outcome) = run_describe(&task, &table, &errors, task_timeout).await;
        reports.push(TaskReport {
            origin: task.origin,
            source: task.source,
            records,
            outcome,
        });
    }
    reports
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::error::ProcessFailure;
    use tempfile::TempDir;

    fn shell_task(origin: &str, dir: &std::path::Path, script: &str) -> Task {
        Task {
            origin: origin.to_string(),
            source: OriginSource::Args,
            dir: dir.to_path_buf(),
            program: PathBuf::from("/bin/sh"),
            args: vec!["-c".into(), script.into()],
        }
    }

    fn record(name_version: &str) -> String {
        format!("{name_version}|/usr/ports/x/{name_version}|/usr/local|c|d|m|x||||||")
    }

    async fn run_pool(
        size: usize,
        timeout: Option<Duration>,
        tasks: Vec<Task>,
    ) -> (Arc<DescribedTable>, Arc<ErrorSink>, Vec<TaskReport>) {
        let table = Arc::new(DescribedTable::new());
        let errors = Arc::new(ErrorSink::new());
        let mut pool = WorkerPool::new(size, timeout);
        pool.start(Arc::clone(&table), Arc::clone(&errors))
            .expect("start");
        for task in tasks {
            pool.add_task(task).await.expect("enqueue");
        }
        let reports = pool.stop().await.expect("stop");
        (table, errors, reports)
    }

    #[tokio::test]
    async fn table_size_does_not_depend_on_pool_size() {
        let temp = TempDir::new().expect("tempdir");
        for size in [1, 2, 7] {
            let tasks = (0..12)
                .map(|i| {
                    let line = record(&format!("pkg{i}-1.{i}"));
                    shell_task(&format!("cat/pkg{i}"), temp.path(), &format!("echo '{line}'"))
                })
                .collect();
            let (table, errors, reports) = run_pool(size, None, tasks).await;
            assert_eq!(table.len(), 12, "pool size {size}");
            assert!(errors.is_empty(), "pool size {size}");
            assert_eq!(reports.len(), 12);
            assert!(reports.iter().all(|r| r.outcome == TaskOutcome::Completed && r.records == 1));
        }
    }

    #[tokio::test]
    async fn malformed_lines_are_reported_and_skipped() {
        let temp = TempDir::new().expect("tempdir");
        let script = format!(
            "echo '{}'; echo 'short|line'; echo '{}'",
            record("good-1"),
            record("also-2")
        );
        let (table, errors, reports) =
            run_pool(2, None, vec![shell_task("cat/mixed", temp.path(), &script)]).await;

        assert_eq!(table.len(), 2);
        assert_eq!(reports[0].outcome, TaskOutcome::Completed);
        let errors = errors.take();
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            errors[0],
            ReconcileError::MalformedRecord { line: 2, found: 2, .. }
        ));
    }

    #[tokio::test]
    async fn non_utf8_line_is_skipped_without_failing_the_task() {
        let temp = TempDir::new().expect("tempdir");
        let script = format!(
            "echo '{}'; printf 'bad-1|caf\\351|l|c|d|m|x||||||\\n'; echo '{}'",
            record("before-1"),
            record("after-2")
        );
        let (table, errors, reports) =
            run_pool(1, None, vec![shell_task("cat/mixed", temp.path(), &script)]).await;

        assert_eq!(table.len(), 2);
        assert_eq!(reports[0].outcome, TaskOutcome::Completed);
        assert_eq!(reports[0].records, 2);
        assert!(matches!(
            errors.take().as_slice(),
            [ReconcileError::UndecodableRecord { line: 2, .. }]
        ));
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported_with_code() {
        let temp = TempDir::new().expect("tempdir");
        let script = format!("echo '{}'; exit 3", record("partial-1"));
        let tasks = vec![
            shell_task("cat/broken", temp.path(), &script),
            shell_task("cat/fine", temp.path(), &format!("echo '{}'", record("fine-1"))),
        ];
        let (table, errors, reports) = run_pool(2, None, tasks).await;

        assert_eq!(table.len(), 2);
        let broken = reports.iter().find(|r| r.origin == "cat/broken").expect("report");
        assert_eq!(broken.outcome, TaskOutcome::Failed);
        let errors = errors.take();
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            &errors[0],
            ReconcileError::Process { origin, failure: ProcessFailure::Exit { code: 3 }, .. } if origin == "cat/broken"
        ));
    }

    #[tokio::test]
    async fn spawn_failure_still_yields_a_report() {
        let temp = TempDir::new().expect("tempdir");
        let mut task = shell_task("cat/missing", temp.path(), "true");
        task.program = temp.path().join("no-such-program");
        let (table, errors, reports) = run_pool(1, None, vec![task]).await;

        assert!(table.is_empty());
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].outcome, TaskOutcome::Failed);
        assert!(matches!(
            errors.take().as_slice(),
            [ReconcileError::Process { failure: ProcessFailure::Spawn(_), .. }]
        ));
    }

    #[tokio::test]
    async fn hung_describe_times_out_without_stalling_siblings() {
        let temp = TempDir::new().expect("tempdir");
        let tasks = vec![
            shell_task("cat/hang", temp.path(), "exec sleep 30"),
            shell_task("cat/quick", temp.path(), &format!("echo '{}'", record("quick-1"))),
        ];
        let started = std::time::Instant::now();
        let (table, errors, reports) =
            run_pool(1, Some(Duration::from_millis(300)), tasks).await;

        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(table.len(), 1);
        assert_eq!(reports.len(), 2);
        assert!(matches!(
            errors.take().as_slice(),
            [ReconcileError::Process { failure: ProcessFailure::TimedOut { .. }, .. }]
        ));
    }

    #[tokio::test]
    async fn add_task_before_start_is_rejected() {
        let temp = TempDir::new().expect("tempdir");
        let pool = WorkerPool::new(2, None);
        let result = pool.add_task(shell_task("cat/x", temp.path(), "true")).await;
        assert!(result.is_err());
    }
}
