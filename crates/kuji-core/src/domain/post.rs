//! Post - 闇投稿とその状態
//!
//! 状態遷移は pending -> ready の一方向のみ。ready から戻ることはない。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::ids::PostId;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PostError {
    #[error("post: content is empty")]
    EmptyContent,

    #[error("post: invalid status {0:?}")]
    InvalidStatus(String),

    #[error("post: invalid status transition {from} -> {to}")]
    InvalidTransition { from: PostStatus, to: PostStatus },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    Pending,
    Ready,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Pending => "pending",
            PostStatus::Ready => "ready",
        }
    }
}

impl fmt::Display for PostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PostStatus {
    type Err = PostError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PostStatus::Pending),
            "ready" => Ok(PostStatus::Ready),
            other => Err(PostError::InvalidStatus(other.to_string())),
        }
    }
}

/// Raw user-submitted text awaiting moderation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Post {
    id: PostId,
    content: String,
    status: PostStatus,
}

impl Post {
    /// New post in `Pending`.
    pub fn new(id: PostId, content: impl Into<String>) -> Result<Self, PostError> {
        let content = content.into();
        if content.is_empty() {
            return Err(PostError::EmptyContent);
        }
        Ok(Self {
            id,
            content,
            status: PostStatus::Pending,
        })
    }

    /// Rebuild a post from persisted fields.
    ///
    /// `status` is the stored string; anything other than `pending`/`ready` is rejected here
    /// so business logic only ever sees a valid `PostStatus`.
    pub fn restore(
        id: PostId,
        content: impl Into<String>,
        status: &str,
    ) -> Result<Self, PostError> {
        let content = content.into();
        if content.is_empty() {
            return Err(PostError::EmptyContent);
        }
        let status = status.parse()?;
        Ok(Self {
            id,
            content,
            status,
        })
    }

    pub fn id(&self) -> &PostId {
        &self.id
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn status(&self) -> PostStatus {
        self.status
    }

    pub fn is_ready(&self) -> bool {
        self.status == PostStatus::Ready
    }

    /// Fails unless the post is still `Pending`.
    pub fn ensure_pending(&self) -> Result<(), PostError> {
        match self.status {
            PostStatus::Pending => Ok(()),
            PostStatus::Ready => Err(PostError::InvalidTransition {
                from: PostStatus::Ready,
                to: PostStatus::Ready,
            }),
        }
    }

    /// pending -> ready. Any other starting state is an invalid transition.
    pub fn mark_ready(&mut self) -> Result<(), PostError> {
        self.ensure_pending()?;
        self.status = PostStatus::Ready;
        Ok(())
    }
}
