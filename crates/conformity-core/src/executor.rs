//! Bounded worker pool over an index set.
//!
//! Each worker runs one query task; completed results are handed to the
//! caller's sink as they arrive (not buffered until the end), so the driver
//! can checkpoint mid-pass. The pool enforces a per-task timeout and drains
//! promptly on cancellation without losing already-completed results.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::error;

use crate::cancel::CancelFlag;
use crate::model::TaskResult;

pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(500);

/// How a pass over the index set ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecEnd {
    /// Every scheduled index produced a result.
    Drained,
    /// Cancellation stopped the pass; unfinished indices produced nothing.
    Interrupted,
}

pub struct TaskExecutor {
    batch_width: usize,
    task_timeout: Duration,
}

impl TaskExecutor {
    pub fn new(batch_width: usize, task_timeout: Duration) -> Self {
        Self {
            batch_width: batch_width.max(1),
            task_timeout,
        }
    }

    /// Run `task` for every index, at most `batch_width` concurrently. The
    /// sink runs on the coordinating task only; a sink error aborts the pass.
    ///
    /// On a drained pass every index is delivered to the sink exactly once: a
    /// worker that panics is folded in as a terminal failure for its index.
    pub async fn run<F, Fut, S>(
        &self,
        indices: &[usize],
        cancel: &CancelFlag,
        task: F,
        mut sink: S,
    ) -> Result<ExecEnd>
    where
        F: Fn(usize) -> Fut,
        Fut: Future<Output = TaskResult> + Send + 'static,
        S: FnMut(TaskResult) -> Result<()>,
    {
        let semaphore = Arc::new(Semaphore::new(self.batch_width));
        let mut join_set: JoinSet<TaskResult> = JoinSet::new();
        let mut delivered: HashSet<usize> = HashSet::with_capacity(indices.len());
        let timeout_limit = self.task_timeout;

        for &index in indices {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return drain_interrupted(&mut join_set, &mut delivered, &mut sink).await;
                }
                permit = semaphore.clone().acquire_owned() => permit?,
            };
            let fut = task(index);
            join_set.spawn(async move {
                let _permit = permit;
                match tokio::time::timeout(timeout_limit, fut).await {
                    Ok(result) => result,
                    Err(_) => TaskResult::timed_out(index, timeout_limit),
                }
            });

            // Fold whatever already finished so the caller sees results (and
            // can checkpoint) while later tasks are still being scheduled.
            while let Some(joined) = join_set.try_join_next() {
                fold(joined, &mut delivered, &mut sink)?;
            }
        }

        loop {
            let joined = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return drain_interrupted(&mut join_set, &mut delivered, &mut sink).await;
                }
                joined = join_set.join_next() => joined,
            };
            match joined {
                None => break,
                Some(joined) => fold(joined, &mut delivered, &mut sink)?,
            }
        }

        // A panicked worker leaves its index undelivered; surface it as a
        // terminal failure so the run state still covers the full index set.
        for &index in indices {
            if !delivered.contains(&index) {
                sink(TaskResult::failure(index, "worker panicked".to_string()))?;
            }
        }

        Ok(ExecEnd::Drained)
    }
}

impl Default for TaskExecutor {
    fn default() -> Self {
        Self::new(1, DEFAULT_TASK_TIMEOUT)
    }
}

fn fold<S>(
    joined: std::result::Result<TaskResult, tokio::task::JoinError>,
    delivered: &mut HashSet<usize>,
    sink: &mut S,
) -> Result<()>
where
    S: FnMut(TaskResult) -> Result<()>,
{
    match joined {
        Ok(result) => {
            delivered.insert(result.index);
            sink(result)
        }
        Err(join_error) if join_error.is_cancelled() => Ok(()),
        Err(join_error) => {
            error!(%join_error, "worker task failed to join");
            Ok(())
        }
    }
}

/// Abort outstanding work, keep what already completed, and report the
/// interruption to the caller.
async fn drain_interrupted<S>(
    join_set: &mut JoinSet<TaskResult>,
    delivered: &mut HashSet<usize>,
    sink: &mut S,
) -> Result<ExecEnd>
where
    S: FnMut(TaskResult) -> Result<()>,
{
    join_set.abort_all();
    while let Some(joined) = join_set.join_next().await {
        fold(joined, delivered, sink)?;
    }
    Ok(ExecEnd::Interrupted)
}
