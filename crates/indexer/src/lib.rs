//! # Ports Index Reconciler
//!
//! Brings a flat-file ports index up to date with what each port's own
//! `make describe` reports, then atomically replaces the index if anything
//! changed.
//!
//! ## Pipeline
//!
//! ```text
//! Origins (args / stdin)
//!     │
//!     ├──> OriginScanner
//!     │      ├─> describe tasks ──> WorkerPool (N workers) ──> DescribedTable
//!     │      └─> missing dirs   ──> RemovedOrigins
//!     │
//!     ├──> drain barrier (WorkerPool::stop)
//!     │
//!     ├──> IndexMerger (single pass over the index)
//!     │      └─> staging file next to the index
//!     │
//!     └──> StagedIndex::finish
//!            └─> rename over the index, or discard when nothing changed
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use portsindex_indexer::{OriginRequest, OriginSource, ReconcileConfig, Reconciler, ReleaseTokens};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ReconcileConfig::new(
//!         "/usr/ports",
//!         "/usr/ports/INDEX-15",
//!         ReleaseTokens::from_current("1500001"),
//!     );
//!     let report = Reconciler::new(config)
//!         .run([OriginRequest::new("www/nginx", OriginSource::Args)])
//!         .await?;
//!
//!     println!("{} line(s) changed", report.stats.lines_changed());
//!     Ok(())
//! }
//! ```

mod commit;
mod config;
mod describe;
mod error;
mod index_lock;
mod merge;
mod origin;
mod pool;
mod reconciler;
pub mod record;
mod stats;
mod table;

pub use commit::StagedIndex;
pub use config::{
    default_concurrency, parse_concurrency, DescribeCommand, ReconcileConfig, ReleaseTokens,
    DEFAULT_DESCRIBE_PROGRAM, DEFAULT_DESCRIPTOR_FILE, MAX_CONCURRENCY,
};
pub use error::{IndexerError, ProcessFailure, ReconcileError, Result};
pub use index_lock::index_write_lock_wait_ms_last;
pub use merge::{
    safe_update, update_dependency, update_path, IndexMerger, MergeStats, MergedLine,
};
pub use origin::{
    probe_path, OriginRequest, OriginScanner, OriginSource, PathKind, RemovedOrigins,
    ScanDecision,
};
pub use pool::{ErrorSink, Task, TaskOutcome, TaskReport, WorkerPool};
pub use reconciler::{merge_into_index, ReconcileReport, Reconciler};
pub use stats::ReconcileStats;
pub use table::{DescribedRow, DescribedSnapshot, DescribedTable, StrippedIndex};
