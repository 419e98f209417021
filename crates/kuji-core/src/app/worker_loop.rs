//! WorkerLoop - dequeue → FormatPendingUsecase → ログ を繰り返す
//!
//! # 終了条件
//! - `QueueClosed` / `ContextClosed`（キュー停止か呼び出し側のキャンセル）
//!
//! それ以外の dequeue エラーは `retry_delay` 待ってやり直す。
//! ユースケースの失敗はエラー分類ごとにログを出し分けるだけで、ループは止めない。

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::app::format_pending::{FormatOutcome, FormatPendingError, FormatPendingUsecase};
use crate::context::{Context, ContextError};
use crate::domain::{ErrorKind, PostId};
use crate::ports::{JobQueue, QueueError};

pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Why a loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    QueueClosed,
    ContextClosed(ContextError),
}

/// Counters returned when a loop stops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerReport {
    pub worker_id: usize,
    /// Jobs handed to the usecase.
    pub processed: u64,
    /// Published or rejected by validation.
    pub succeeded: u64,
    pub failed: u64,
    pub exit: WorkerExit,
}

pub struct WorkerLoop {
    worker_id: usize,
    queue: Arc<dyn JobQueue>,
    usecase: Arc<FormatPendingUsecase>,
    retry_delay: Duration,
}

impl WorkerLoop {
    pub fn new(
        worker_id: usize,
        queue: Arc<dyn JobQueue>,
        usecase: Arc<FormatPendingUsecase>,
    ) -> Self {
        Self {
            worker_id,
            queue,
            usecase,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub async fn run(&self, ctx: &Context) -> WorkerReport {
        let worker_id = self.worker_id;
        let mut report = WorkerReport {
            worker_id,
            processed: 0,
            succeeded: 0,
            failed: 0,
            exit: WorkerExit::QueueClosed,
        };
        info!(worker_id, "worker started");

        loop {
            if let Some(reason) = ctx.err() {
                report.exit = WorkerExit::ContextClosed(reason);
                break;
            }

            let post_id = match self.queue.dequeue_format(ctx).await {
                Ok(post_id) => post_id,
                Err(QueueError::QueueClosed) => {
                    report.exit = WorkerExit::QueueClosed;
                    break;
                }
                Err(QueueError::ContextClosed(reason)) => {
                    report.exit = WorkerExit::ContextClosed(reason);
                    break;
                }
                Err(err) => {
                    error!(
                        worker_id,
                        error = %err,
                        retry_in_ms = self.retry_delay.as_millis() as u64,
                        "dequeue failed"
                    );
                    tokio::select! {
                        reason = ctx.done() => {
                            report.exit = WorkerExit::ContextClosed(reason);
                            break;
                        }
                        _ = tokio::time::sleep(self.retry_delay) => continue,
                    }
                }
            };

            report.processed += 1;
            match self.usecase.execute(ctx, post_id.as_str()).await {
                Ok(outcome) => {
                    report.succeeded += 1;
                    log_outcome(worker_id, &post_id, &outcome);
                }
                Err(err) => {
                    report.failed += 1;
                    log_failure(worker_id, &post_id, &err);
                }
            }
        }

        info!(worker_id, processed = report.processed, exit = ?report.exit, "worker stopped");
        report
    }
}

fn log_outcome(worker_id: usize, post_id: &PostId, outcome: &FormatOutcome) {
    match outcome {
        FormatOutcome::Published => info!(worker_id, post_id = %post_id, "formatted post"),
        FormatOutcome::Rejected { reason } => {
            info!(
                worker_id,
                post_id = %post_id,
                reason = reason.as_deref().unwrap_or(""),
                "post rejected by validation"
            )
        }
    }
}

fn log_failure(worker_id: usize, post_id: &PostId, err: &FormatPendingError) {
    match err.kind() {
        ErrorKind::Transient => {
            warn!(worker_id, post_id = %post_id, error = %err, "draw creation failed (requeued)")
        }
        ErrorKind::Fatal => {
            error!(
                worker_id,
                post_id = %post_id,
                error = %err,
                alert = true,
                "draw creation failed and job was lost"
            )
        }
        ErrorKind::Permanent => {
            warn!(worker_id, post_id = %post_id, error = %err, "format error")
        }
    }
}

/// `n` independent loops over one queue, sharing a root context.
pub struct WorkerGroup {
    ctx: Context,
    joins: Vec<JoinHandle<WorkerReport>>,
}

impl WorkerGroup {
    pub fn spawn(
        n: usize,
        ctx: &Context,
        queue: Arc<dyn JobQueue>,
        usecase: Arc<FormatPendingUsecase>,
        retry_delay: Duration,
    ) -> Self {
        let ctx = ctx.child();
        let joins = (0..n)
            .map(|worker_id| {
                let worker = WorkerLoop::new(worker_id, Arc::clone(&queue), Arc::clone(&usecase))
                    .with_retry_delay(retry_delay);
                let ctx = ctx.clone();
                tokio::spawn(async move { worker.run(&ctx).await })
            })
            .collect();
        Self { ctx, joins }
    }

    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    /// Wait for every loop to stop on its own (e.g. after the queue is closed).
    pub async fn join(self) -> Vec<WorkerReport> {
        let mut reports = Vec::with_capacity(self.joins.len());
        for join in self.joins {
            match join.await {
                Ok(report) => reports.push(report),
                Err(err) => error!(error = %err, "worker task panicked"),
            }
        }
        reports
    }

    /// Wait up to `grace` for the loops to stop on their own, then cancel the
    /// group's context and wait for the rest.
    ///
    /// Close the queue first: idle loops then exit with `QueueClosed` and a job
    /// already dequeued runs to completion under a live context.
    pub async fn join_within(self, grace: Duration) -> Vec<WorkerReport> {
        let deadline = tokio::time::Instant::now() + grace;
        let mut reports = Vec::with_capacity(self.joins.len());
        let mut cancelled = false;
        for mut join in self.joins {
            let joined = match tokio::time::timeout_at(deadline, &mut join).await {
                Ok(joined) => joined,
                Err(_) => {
                    if !cancelled {
                        warn!(
                            grace_ms = grace.as_millis() as u64,
                            "shutdown grace expired, cancelling workers"
                        );
                        self.ctx.cancel();
                        cancelled = true;
                    }
                    join.await
                }
            };
            match joined {
                Ok(report) => reports.push(report),
                Err(err) => error!(error = %err, "worker task panicked"),
            }
        }
        reports
    }

    /// Cancel the group's context, then wait. In-flight jobs see the cancelled context.
    pub async fn shutdown_and_join(self) -> Vec<WorkerReport> {
        self.ctx.cancel();
        self.join().await
    }
}
