//! Test doubles for the app layer.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::context::Context;
use crate::domain::{Draw, FormattedContent, Post, PostId};
use crate::impls::InMemoryPostRepository;
use crate::ports::{
    DrawRepository, FormatRequest, FormatResult, Formatter, FormatterError, JobQueue,
    PostRepository, QueueError, RepositoryError,
};

/// What `StubFormatter::validate` should do.
#[derive(Debug, Clone)]
pub enum ValidateBehavior {
    /// Verified with the given text (formatted text if `None`).
    Verify(Option<String>),
    Reject(String),
    FailRejected,
    FailOther,
}

/// Formatter whose results are fixed up front.
pub struct StubFormatter {
    /// `format` fails with `Unavailable`.
    pub unavailable: bool,
    pub format_other_error: bool,
    pub validate: ValidateBehavior,
    calls: Mutex<Vec<&'static str>>,
}

impl StubFormatter {
    pub fn verifying() -> Self {
        Self::with(ValidateBehavior::Verify(None))
    }

    pub fn verifying_as(text: impl Into<String>) -> Self {
        Self::with(ValidateBehavior::Verify(Some(text.into())))
    }

    pub fn rejecting(reason: impl Into<String>) -> Self {
        Self::with(ValidateBehavior::Reject(reason.into()))
    }

    pub fn with(validate: ValidateBehavior) -> Self {
        Self {
            unavailable: false,
            format_other_error: false,
            validate,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::verifying()
        }
    }

    pub fn broken() -> Self {
        Self {
            format_other_error: true,
            ..Self::verifying()
        }
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Formatter for StubFormatter {
    async fn format(
        &self,
        _ctx: &Context,
        request: &FormatRequest,
    ) -> Result<FormatResult, FormatterError> {
        self.calls.lock().unwrap().push("format");
        if self.unavailable {
            return Err(FormatterError::Unavailable("connection refused".into()));
        }
        if self.format_other_error {
            return Err(FormatterError::InvalidFormat("garbled".into()));
        }
        Ok(FormatResult::pending(
            request.post_id.clone(),
            FormattedContent::new(request.content.clone()),
        ))
    }

    async fn validate(
        &self,
        _ctx: &Context,
        result: FormatResult,
    ) -> Result<FormatResult, FormatterError> {
        self.calls.lock().unwrap().push("validate");
        match &self.validate {
            ValidateBehavior::Verify(text) => {
                let text = text
                    .clone()
                    .map(FormattedContent::new)
                    .unwrap_or_else(|| result.formatted.clone());
                Ok(result.verified(text))
            }
            ValidateBehavior::Reject(reason) => Ok(result.rejected(reason.clone())),
            ValidateBehavior::FailRejected => {
                Err(FormatterError::ContentRejected("banned word".into()))
            }
            ValidateBehavior::FailOther => {
                Err(FormatterError::InvalidFormat("no verdict".into()))
            }
        }
    }
}

/// Draw repository whose `create` always fails with a storage error.
#[derive(Default)]
pub struct FailingDrawRepository {
    attempts: Mutex<usize>,
}

impl FailingDrawRepository {
    pub fn attempts(&self) -> usize {
        *self.attempts.lock().unwrap()
    }
}

#[derive(Debug, thiserror::Error)]
#[error("disk full")]
pub struct DiskFull;

#[async_trait]
impl DrawRepository for FailingDrawRepository {
    async fn create(&self, _ctx: &Context, _draw: &Draw) -> Result<(), RepositoryError> {
        *self.attempts.lock().unwrap() += 1;
        Err(RepositoryError::storage(DiskFull))
    }

    async fn get_by_post_id(
        &self,
        _ctx: &Context,
        post_id: &PostId,
    ) -> Result<Draw, RepositoryError> {
        Err(RepositoryError::DrawNotFound(post_id.clone()))
    }

    async fn list_ready(&self, _ctx: &Context) -> Result<Vec<Draw>, RepositoryError> {
        Ok(Vec::new())
    }
}

/// In-memory post repository whose `update` always fails with a storage error.
#[derive(Default)]
pub struct UpdateFailingPostRepository {
    inner: InMemoryPostRepository,
    update_attempts: Mutex<usize>,
}

impl UpdateFailingPostRepository {
    pub fn update_attempts(&self) -> usize {
        *self.update_attempts.lock().unwrap()
    }
}

#[async_trait]
impl PostRepository for UpdateFailingPostRepository {
    async fn create(&self, ctx: &Context, post: &Post) -> Result<(), RepositoryError> {
        self.inner.create(ctx, post).await
    }

    async fn get(&self, ctx: &Context, id: &PostId) -> Result<Post, RepositoryError> {
        self.inner.get(ctx, id).await
    }

    async fn list_ready(&self, ctx: &Context, limit: usize) -> Result<Vec<Post>, RepositoryError> {
        self.inner.list_ready(ctx, limit).await
    }

    async fn update(&self, _ctx: &Context, _post: &Post) -> Result<(), RepositoryError> {
        *self.update_attempts.lock().unwrap() += 1;
        Err(RepositoryError::storage(DiskFull))
    }
}

/// Queue that records successful enqueues; optionally fails every enqueue.
#[derive(Default)]
pub struct RecordingQueue {
    pub fail_enqueue: bool,
    enqueued: Mutex<Vec<PostId>>,
    failed: Mutex<usize>,
}

impl RecordingQueue {
    pub fn failing() -> Self {
        Self {
            fail_enqueue: true,
            ..Self::default()
        }
    }

    pub fn enqueued(&self) -> Vec<PostId> {
        self.enqueued.lock().unwrap().clone()
    }

    pub fn failed_attempts(&self) -> usize {
        *self.failed.lock().unwrap()
    }
}

#[async_trait]
impl JobQueue for RecordingQueue {
    async fn enqueue_format(&self, _ctx: &Context, post_id: &PostId) -> Result<(), QueueError> {
        if self.fail_enqueue {
            *self.failed.lock().unwrap() += 1;
            return Err(QueueError::storage(DiskFull));
        }
        self.enqueued.lock().unwrap().push(post_id.clone());
        Ok(())
    }

    async fn dequeue_format(&self, ctx: &Context) -> Result<PostId, QueueError> {
        Err(QueueError::ContextClosed(ctx.done().await))
    }

    async fn close(&self) -> Result<(), QueueError> {
        Ok(())
    }
}
