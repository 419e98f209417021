//! Repository ports - 投稿とおみくじ結果の保存先
//!
//! どちらもストレージの中身には立ち入らない。区別したい失敗（未存在・重複）だけを
//! `RepositoryError` の variant として返す。

use async_trait::async_trait;

use crate::context::Context;
use crate::domain::{Draw, Post, PostId};
use crate::ports::job_queue::BoxError;

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("repository: post {0} not found")]
    PostNotFound(PostId),

    #[error("repository: post {0} already exists")]
    PostAlreadyExists(PostId),

    #[error("repository: draw for {0} not found")]
    DrawNotFound(PostId),

    #[error("repository: draw for {0} already exists")]
    DrawAlreadyExists(PostId),

    #[error("repository: storage failure: {0}")]
    Storage(#[source] BoxError),
}

impl RepositoryError {
    pub fn storage(err: impl Into<BoxError>) -> Self {
        RepositoryError::Storage(err.into())
    }
}

/// Posts.
///
/// - create: duplicate id -> `PostAlreadyExists`
/// - get / update: missing id -> `PostNotFound`
/// - list_ready: at most `limit` ready posts
#[async_trait]
pub trait PostRepository: Send + Sync {
    async fn create(&self, ctx: &Context, post: &Post) -> Result<(), RepositoryError>;
    async fn get(&self, ctx: &Context, id: &PostId) -> Result<Post, RepositoryError>;
    async fn list_ready(&self, ctx: &Context, limit: usize) -> Result<Vec<Post>, RepositoryError>;
    async fn update(&self, ctx: &Context, post: &Post) -> Result<(), RepositoryError>;
}

/// Draws. At most one per post id; a second create is `DrawAlreadyExists`.
#[async_trait]
pub trait DrawRepository: Send + Sync {
    async fn create(&self, ctx: &Context, draw: &Draw) -> Result<(), RepositoryError>;
    async fn get_by_post_id(&self, ctx: &Context, post_id: &PostId)
    -> Result<Draw, RepositoryError>;
    /// Verified draws only.
    async fn list_ready(&self, ctx: &Context) -> Result<Vec<Draw>, RepositoryError>;
}
