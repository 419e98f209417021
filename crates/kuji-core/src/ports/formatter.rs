//! Formatter port - 本文の整形と公開可否の検証
//!
//! プロンプトや禁止語などの中身は実装側の関心。ここでは入出力と
//! 呼び出し側が分岐に使う失敗の種類だけを決める。

use async_trait::async_trait;

use crate::context::Context;
use crate::domain::{DrawStatus, FormattedContent, PostId};
use crate::ports::job_queue::BoxError;

#[derive(Debug, thiserror::Error)]
pub enum FormatterError {
    /// The backing service could not be reached.
    #[error("formatter: service unavailable: {0}")]
    Unavailable(String),

    /// The content itself violates policy.
    #[error("formatter: content rejected: {0}")]
    ContentRejected(String),

    #[error("formatter: unexpected output: {0}")]
    InvalidFormat(String),

    #[error("formatter: {0}")]
    Other(#[source] BoxError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatRequest {
    pub post_id: PostId,
    pub content: String,
}

/// Output of `format` (always `Pending`) and of `validate` (`Verified` or `Rejected`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatResult {
    pub post_id: PostId,
    pub formatted: FormattedContent,
    pub status: DrawStatus,
    /// Set when `status` is `Rejected`.
    pub validation_reason: Option<String>,
}

impl FormatResult {
    pub fn pending(post_id: PostId, formatted: FormattedContent) -> Self {
        Self {
            post_id,
            formatted,
            status: DrawStatus::Pending,
            validation_reason: None,
        }
    }

    pub fn verified(self, formatted: FormattedContent) -> Self {
        Self {
            formatted,
            status: DrawStatus::Verified,
            validation_reason: None,
            ..self
        }
    }

    pub fn rejected(self, reason: impl Into<String>) -> Self {
        Self {
            status: DrawStatus::Rejected,
            validation_reason: Some(reason.into()),
            ..self
        }
    }
}

#[async_trait]
pub trait Formatter: Send + Sync {
    async fn format(
        &self,
        ctx: &Context,
        request: &FormatRequest,
    ) -> Result<FormatResult, FormatterError>;
    async fn validate(
        &self,
        ctx: &Context,
        result: FormatResult,
    ) -> Result<FormatResult, FormatterError>;
}
