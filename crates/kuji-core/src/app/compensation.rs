//! Compensation - 後続の失敗を打ち消す補償ステップ
//!
//! 今あるのは「Draw の保存に失敗したらジョブを積み直す」の 1 つだけ。
//! 新しい補償を足すときは `CompensatingAction` を実装してユースケースに渡す。

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::context::Context;
use crate::domain::PostId;
use crate::ports::{JobQueue, QueueError};

#[derive(Debug, thiserror::Error)]
pub enum CompensationError {
    #[error("compensation {step}: {source}")]
    Queue {
        step: &'static str,
        #[source]
        source: QueueError,
    },
}

impl CompensationError {
    pub fn step(&self) -> &'static str {
        match self {
            CompensationError::Queue { step, .. } => step,
        }
    }
}

/// A named step that undoes (or makes up for) a failed pipeline step.
#[async_trait]
pub trait CompensatingAction: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, ctx: &Context, post_id: &PostId) -> Result<(), CompensationError>;
}

/// Puts the format job back so a later run can retry it.
pub struct RequeueFormatJob {
    queue: Arc<dyn JobQueue>,
}

impl RequeueFormatJob {
    pub const NAME: &'static str = "requeue_format_job";

    pub fn new(queue: Arc<dyn JobQueue>) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl CompensatingAction for RequeueFormatJob {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn run(&self, ctx: &Context, post_id: &PostId) -> Result<(), CompensationError> {
        self.queue
            .enqueue_format(ctx, post_id)
            .await
            .map_err(|source| CompensationError::Queue {
                step: Self::NAME,
                source,
            })?;
        info!(post_id = %post_id, step = Self::NAME, "format job requeued");
        Ok(())
    }
}
