use crate::error::{ProcessFailure, ReconcileError};
use crate::pool::{ErrorSink, Task, TaskOutcome};
use crate::record::split_record;
use crate::table::{DescribedRow, DescribedTable};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};

/// Run one describe command and merge every well-formed output line into
/// `table`. Returns the number of records inserted along with the outcome.
pub(crate) async fn run_describe(
    task: &Task,
    table: &DescribedTable,
    errors: &ErrorSink,
    timeout: Option<Duration>,
) -> (usize, TaskOutcome) {
    let process_error = |failure: ProcessFailure| ReconcileError::Process {
        origin: task.origin.clone(),
        source_tag: task.source.to_string(),
        failure,
    };

    let mut child = match Command::new(&task.program)
        .args(&task.args)
        .current_dir(&task.dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(err) => {
            errors.report(process_error(ProcessFailure::Spawn(err)));
            return (0, TaskOutcome::Failed);
        }
    };

    let Some(stdout) = child.stdout.take() else {
        errors.report(process_error(ProcessFailure::Pipe));
        return (0, TaskOutcome::Failed);
    };

    let mut records = 0usize;
    let streamed = match timeout {
        Some(limit) => {
            let drive = stream_records(task, stdout, &mut child, table, errors, &mut records);
            let finished = tokio::time::timeout(limit, drive).await;
            match finished {
                Ok(result) => result,
                Err(_) => {
                    if let Err(err) = child.start_kill() {
                        log::warn!("failed to kill describe for {}: {err}", task.origin);
                    }
                    if let Err(err) = child.wait().await {
                        log::warn!("failed to reap describe for {}: {err}", task.origin);
                    }
                    Err(ProcessFailure::TimedOut { after: limit })
                }
            }
        }
        None => stream_records(task, stdout, &mut child, table, errors, &mut records).await,
    };

    let outcome = match streamed {
        Ok(status) if status.success() => TaskOutcome::Completed,
        Ok(status) => {
            let failure = match status.code() {
                Some(code) => ProcessFailure::Exit { code },
                None => ProcessFailure::Signal,
            };
            errors.report(process_error(failure));
            TaskOutcome::Failed
        }
        Err(failure) => {
            errors.report(process_error(failure));
            TaskOutcome::Failed
        }
    };
    (records, outcome)
}

async fn stream_records(
    task: &Task,
    stdout: ChildStdout,
    child: &mut Child,
    table: &DescribedTable,
    errors: &ErrorSink,
    records: &mut usize,
) -> std::result::Result<ExitStatus, ProcessFailure> {
    let mut reader = BufReader::new(stdout);
    let mut buf = Vec::new();
    let mut line_no = 0usize;
    let mut read_error = None;
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                line_no += 1;
                let Ok(line) = std::str::from_utf8(trim_line_end(&buf)) else {
                    errors.report(ReconcileError::UndecodableRecord {
                        origin: task.origin.clone(),
                        source_tag: task.source.to_string(),
                        line: line_no,
                    });
                    continue;
                };
                match split_record(line) {
                    Ok(fields) => {
                        table.insert(DescribedRow::new(fields));
                        *records += 1;
                    }
                    Err(found) => errors.report(ReconcileError::MalformedRecord {
                        origin: task.origin.clone(),
                        source_tag: task.source.to_string(),
                        line: line_no,
                        found,
                    }),
                }
            }
            Err(err) => {
                read_error = Some(err);
                break;
            }
        }
    }
    // Close our end before waiting so a child blocked on a full pipe can exit.
    drop(reader);

    let status = child.wait().await.map_err(ProcessFailure::Wait)?;
    match read_error {
        Some(err) => Err(ProcessFailure::Read(err)),
        None => Ok(status),
    }
}

fn trim_line_end(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}
