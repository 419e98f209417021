//! Format job record.
//!
//! キューに積まれている間だけ存在するレコード。claim（取り出し）と同時に削除されるので
//! 監査ログではない。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::ids::PostId;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("format job: invalid status {0:?}")]
pub struct InvalidJobStatus(pub String);

/// Queued jobs are always `Pending`; claimed jobs no longer exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = InvalidJobStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            other => Err(InvalidJobStatus(other.to_string())),
        }
    }
}

/// One outstanding format job. Keyed by `post_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatJob {
    pub post_id: PostId,
    pub status: JobStatus,
    /// Assigned by the backing store at enqueue time.
    pub queued_at: DateTime<Utc>,
}

impl FormatJob {
    pub fn pending(post_id: PostId, queued_at: DateTime<Utc>) -> Self {
        Self {
            post_id,
            status: JobStatus::Pending,
            queued_at,
        }
    }
}
