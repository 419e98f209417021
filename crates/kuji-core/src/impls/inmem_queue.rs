//! InMemoryJobQueue - プロセス内で完結する整形キュー
//!
//! # 実装詳細
//! - 有界の `mpsc` チャネル（満杯なら enqueue が待つ、空なら dequeue が待つ）
//! - 受信側は 1 本しかないので `tokio::sync::Mutex` で複数ワーカーから共有する
//! - 未処理 ID の集合を持ち、同じ ID の二重登録を `AlreadyScheduled` で弾く
//! - close は `CancellationToken` 1 本。待機中の呼び出しもすぐ起きる
//!
//! プロセスが落ちればジョブも消える。永続化が必要なら `SqliteJobQueue` を使う。

use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::context::Context;
use crate::domain::PostId;
use crate::ports::job_queue::{JobQueue, QueueError, ensure_ready};

pub struct InMemoryJobQueue {
    tx: mpsc::Sender<PostId>,
    rx: AsyncMutex<mpsc::Receiver<PostId>>,
    /// enqueue 済みで、まだ誰にも渡していない ID
    outstanding: Mutex<HashSet<PostId>>,
    closed: CancellationToken,
}

impl InMemoryJobQueue {
    pub const DEFAULT_BUFFER: usize = 10;

    /// `buffer` is the channel capacity; zero is bumped to one.
    pub fn new(buffer: usize) -> Self {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        Self {
            tx,
            rx: AsyncMutex::new(rx),
            outstanding: Mutex::new(HashSet::new()),
            closed: CancellationToken::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    /// Number of jobs enqueued but not yet dequeued.
    pub fn len(&self) -> usize {
        self.outstanding().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn outstanding(&self) -> std::sync::MutexGuard<'_, HashSet<PostId>> {
        self.outstanding.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for InMemoryJobQueue {
    fn default() -> Self {
        Self::new(Self::DEFAULT_BUFFER)
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue_format(&self, ctx: &Context, post_id: &PostId) -> Result<(), QueueError> {
        ensure_ready(self.closed.is_cancelled(), ctx)?;

        if !self.outstanding().insert(post_id.clone()) {
            return Err(QueueError::AlreadyScheduled(post_id.clone()));
        }

        // 満杯なら空きが出るまで待つ。停止・キャンセルが先に来たら諦める
        let sent = tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(QueueError::QueueClosed),
            reason = ctx.done() => Err(QueueError::ContextClosed(reason)),
            res = self.tx.send(post_id.clone()) => res.map_err(|_| QueueError::QueueClosed),
        };

        if sent.is_err() {
            self.outstanding().remove(post_id);
        } else {
            debug!(post_id = %post_id, "format job enqueued");
        }
        sent
    }

    async fn dequeue_format(&self, ctx: &Context) -> Result<PostId, QueueError> {
        ensure_ready(self.closed.is_cancelled(), ctx)?;

        let mut rx = tokio::select! {
            biased;
            _ = self.closed.cancelled() => return Err(QueueError::QueueClosed),
            reason = ctx.done() => return Err(QueueError::ContextClosed(reason)),
            guard = self.rx.lock() => guard,
        };

        let post_id = tokio::select! {
            biased;
            _ = self.closed.cancelled() => return Err(QueueError::QueueClosed),
            reason = ctx.done() => return Err(QueueError::ContextClosed(reason)),
            msg = rx.recv() => msg.ok_or(QueueError::QueueClosed)?,
        };
        drop(rx);

        self.outstanding().remove(&post_id);
        debug!(post_id = %post_id, "format job dequeued");
        Ok(post_id)
    }

    async fn close(&self) -> Result<(), QueueError> {
        self.closed.cancel();
        Ok(())
    }
}
