//! JobQueue port - 整形ジョブの受け渡し
//!
//! キューが運ぶのは投稿 ID だけ（本文や状態は投稿リポジトリが正本）。
//!
//! # 契約
//! - enqueue: 同じ ID のジョブが残っていれば `AlreadyScheduled`
//! - dequeue: 一番古いジョブを 1 件 claim する。無ければ待つ
//! - claim = 削除（ack は存在しない）
//! - close: 何度呼んでもよい。以降はすべて `QueueClosed`

use async_trait::async_trait;

use crate::context::{Context, ContextError};
use crate::domain::PostId;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// A job for this post is still outstanding. Caller input, not a queue health problem.
    #[error("queue: format job for {0} is already scheduled")]
    AlreadyScheduled(PostId),

    #[error("queue: job queue is closed")]
    QueueClosed,

    #[error("queue: context closed: {0}")]
    ContextClosed(#[source] ContextError),

    #[error("queue: storage failure: {0}")]
    Storage(#[source] BoxError),
}

impl QueueError {
    pub fn storage(err: impl Into<BoxError>) -> Self {
        QueueError::Storage(err.into())
    }
}

/// Durable hand-off of post IDs awaiting moderation.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue_format(&self, ctx: &Context, post_id: &PostId) -> Result<(), QueueError>;

    /// Claims the oldest outstanding job, waiting until one exists,
    /// the queue is closed, or `ctx` is done.
    async fn dequeue_format(&self, ctx: &Context) -> Result<PostId, QueueError>;

    async fn close(&self) -> Result<(), QueueError>;
}

/// 停止済みか、呼び出し側の文脈が終わっていないかを先に確認する。
pub(crate) fn ensure_ready(closed: bool, ctx: &Context) -> Result<(), QueueError> {
    if closed {
        return Err(QueueError::QueueClosed);
    }
    match ctx.err() {
        Some(reason) => Err(QueueError::ContextClosed(reason)),
        None => Ok(()),
    }
}
