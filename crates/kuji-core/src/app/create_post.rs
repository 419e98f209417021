//! CreatePostUsecase - 闇投稿を保存して整形ジョブを積む

use std::sync::Arc;

use tracing::info;

use crate::context::Context;
use crate::domain::{IdError, Post, PostError, PostId};
use crate::ports::{JobQueue, PostRepository, QueueError, RepositoryError};

#[derive(Debug, thiserror::Error)]
pub enum CreatePostError {
    #[error("create_post: {0}")]
    InvalidId(#[from] IdError),

    #[error("create_post: {0}")]
    InvalidPost(#[from] PostError),

    #[error("create_post: post {0} already exists")]
    PostAlreadyExists(PostId),

    #[error("create_post: format job for {0} already scheduled")]
    JobAlreadyScheduled(PostId),

    #[error("create_post: save post")]
    Repository(#[source] RepositoryError),

    #[error("create_post: enqueue format job")]
    Queue(#[source] QueueError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatePostInput {
    /// Caller-assigned id; a `post-<ULID>` is generated when absent.
    pub post_id: Option<String>,
    pub content: String,
}

impl CreatePostInput {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            post_id: None,
            content: content.into(),
        }
    }

    pub fn with_id(post_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            post_id: Some(post_id.into()),
            content: content.into(),
        }
    }
}

pub struct CreatePostUsecase {
    post_repo: Arc<dyn PostRepository>,
    job_queue: Arc<dyn JobQueue>,
}

impl CreatePostUsecase {
    pub fn new(post_repo: Arc<dyn PostRepository>, job_queue: Arc<dyn JobQueue>) -> Self {
        Self { post_repo, job_queue }
    }

    pub async fn execute(
        &self,
        ctx: &Context,
        input: CreatePostInput,
    ) -> Result<PostId, CreatePostError> {
        let post_id = match input.post_id {
            Some(raw) => PostId::new(raw)?,
            None => PostId::generate(),
        };
        let post = Post::new(post_id.clone(), input.content)?;

        match self.post_repo.create(ctx, &post).await {
            Ok(()) => {}
            Err(RepositoryError::PostAlreadyExists(_)) => {
                return Err(CreatePostError::PostAlreadyExists(post_id));
            }
            Err(err) => return Err(CreatePostError::Repository(err)),
        }

        match self.job_queue.enqueue_format(ctx, &post_id).await {
            Ok(()) => {}
            Err(QueueError::AlreadyScheduled(_)) => {
                return Err(CreatePostError::JobAlreadyScheduled(post_id));
            }
            Err(err) => return Err(CreatePostError::Queue(err)),
        }

        info!(post_id = %post_id, "post created");
        Ok(post_id)
    }
}
