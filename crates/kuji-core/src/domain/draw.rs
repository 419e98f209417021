//! Draw - 公開可能なおみくじ結果
//!
//! 1 投稿につき 1 件まで（重複はリポジトリ側で衝突として扱う）。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::ids::PostId;
use super::post::Post;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DrawError {
    #[error("draw: result is empty")]
    EmptyResult,

    #[error("draw: invalid status {0:?}")]
    InvalidStatus(String),

    #[error("draw: post {0} is not ready")]
    PostNotReady(PostId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DrawStatus {
    Pending,
    Verified,
    Rejected,
}

impl DrawStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DrawStatus::Pending => "pending",
            DrawStatus::Verified => "verified",
            DrawStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for DrawStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DrawStatus {
    type Err = DrawError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DrawStatus::Pending),
            "verified" => Ok(DrawStatus::Verified),
            "rejected" => Ok(DrawStatus::Rejected),
            other => Err(DrawError::InvalidStatus(other.to_string())),
        }
    }
}

/// Text produced by the formatter (and later trimmed for persistence).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FormattedContent(String);

impl FormattedContent {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for FormattedContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for FormattedContent {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for FormattedContent {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Draw {
    post_id: PostId,
    result: FormattedContent,
    status: DrawStatus,
}

impl Draw {
    /// New draw in `Pending`.
    pub fn new(post_id: PostId, result: FormattedContent) -> Result<Self, DrawError> {
        if result.is_empty() {
            return Err(DrawError::EmptyResult);
        }
        Ok(Self {
            post_id,
            result,
            status: DrawStatus::Pending,
        })
    }

    /// Rebuild from persisted fields; unknown status strings are rejected.
    pub fn restore(
        post_id: PostId,
        result: FormattedContent,
        status: &str,
    ) -> Result<Self, DrawError> {
        if result.is_empty() {
            return Err(DrawError::EmptyResult);
        }
        let status = status.parse()?;
        Ok(Self {
            post_id,
            result,
            status,
        })
    }

    /// Draw for a post that has already been published.
    pub fn from_post(post: &Post, result: FormattedContent) -> Result<Self, DrawError> {
        if !post.is_ready() {
            return Err(DrawError::PostNotReady(post.id().clone()));
        }
        Self::new(post.id().clone(), result)
    }

    pub fn post_id(&self) -> &PostId {
        &self.post_id
    }

    pub fn result(&self) -> &FormattedContent {
        &self.result
    }

    pub fn status(&self) -> DrawStatus {
        self.status
    }

    pub fn is_verified(&self) -> bool {
        self.status == DrawStatus::Verified
    }

    pub fn mark_verified(&mut self) {
        self.status = DrawStatus::Verified;
    }
}
