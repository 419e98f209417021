//! FormatPendingUsecase - 整形待ち投稿を 1 件処理する
//!
//! # フロー
//! 1. 投稿を取得（ready 済みならここで止める）
//! 2. Formatter::format
//! 3. Formatter::validate（Rejected なら何もせず正常終了）
//! 4. 本文を trim して 400 文字に切り詰める
//! 5. Draw を Verified で保存。失敗したら補償としてジョブを積み直す
//! 6. 投稿を ready にして保存
//!
//! 6 で失敗しても保存済みの Draw は消さない。

use std::sync::Arc;

use tracing::debug;

use crate::app::compensation::{CompensatingAction, CompensationError, RequeueFormatJob};
use crate::context::Context;
use crate::domain::{Draw, DrawError, DrawStatus, ErrorKind, FormattedContent, PostError, PostId};
use crate::ports::{
    DrawRepository, FormatRequest, Formatter, FormatterError, JobQueue, PostRepository,
    RepositoryError,
};

/// Upper bound (in chars) of a persisted draw result.
pub const MAX_DRAW_RESULT_CHARS: usize = 400;

#[derive(Debug, thiserror::Error)]
pub enum FormatPendingError {
    #[error("format_pending: usecase is not initialised")]
    NilUsecase,

    #[error("format_pending: no context given")]
    NilContext,

    #[error("format_pending: post id is empty")]
    EmptyPostId,

    #[error("format_pending: post {0} not found")]
    PostNotFound(PostId),

    #[error("format_pending: post {post_id} is not pending")]
    PostNotPending {
        post_id: PostId,
        #[source]
        source: PostError,
    },

    #[error("format_pending: formatter unavailable for {post_id}")]
    FormatterUnavailable {
        post_id: PostId,
        #[source]
        source: FormatterError,
    },

    #[error("format_pending: content of {post_id} rejected")]
    ContentRejected {
        post_id: PostId,
        #[source]
        source: FormatterError,
    },

    /// Draw が保存できなかった。ジョブは積み直し済み。
    #[error("format_pending: could not save draw for {post_id} (requeued)")]
    DrawCreationFailed {
        post_id: PostId,
        #[source]
        source: RepositoryError,
    },

    /// Draw の保存にも、その後の積み直しにも失敗した。ジョブは失われている。
    #[error("format_pending: requeue of {post_id} failed after draw save error ({draw_error})")]
    RequeueFailed {
        post_id: PostId,
        draw_error: RepositoryError,
        #[source]
        source: CompensationError,
    },

    #[error("format_pending: fetch post {post_id}")]
    FetchPost {
        post_id: PostId,
        #[source]
        source: RepositoryError,
    },

    #[error("format_pending: format {post_id}")]
    Format {
        post_id: PostId,
        #[source]
        source: FormatterError,
    },

    #[error("format_pending: validate {post_id}")]
    Validate {
        post_id: PostId,
        #[source]
        source: FormatterError,
    },

    #[error("format_pending: build draw for {post_id}")]
    BuildDraw {
        post_id: PostId,
        #[source]
        source: DrawError,
    },

    #[error("format_pending: update post {post_id}")]
    UpdatePost {
        post_id: PostId,
        #[source]
        source: RepositoryError,
    },
}

impl FormatPendingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FormatPendingError::DrawCreationFailed { .. } => ErrorKind::Transient,
            FormatPendingError::RequeueFailed { .. } => ErrorKind::Fatal,
            _ => ErrorKind::Permanent,
        }
    }
}

/// How a successful run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatOutcome {
    /// Draw saved and post marked ready.
    Published,
    /// Validation said no. Nothing was written.
    Rejected { reason: Option<String> },
}

pub struct FormatPendingUsecase {
    post_repo: Arc<dyn PostRepository>,
    draw_repo: Arc<dyn DrawRepository>,
    formatter: Arc<dyn Formatter>,
    on_draw_failure: Arc<dyn CompensatingAction>,
}

impl FormatPendingUsecase {
    pub fn new(
        post_repo: Arc<dyn PostRepository>,
        draw_repo: Arc<dyn DrawRepository>,
        formatter: Arc<dyn Formatter>,
        job_queue: Arc<dyn JobQueue>,
    ) -> Self {
        Self {
            post_repo,
            draw_repo,
            formatter,
            on_draw_failure: Arc::new(RequeueFormatJob::new(job_queue)),
        }
    }

    /// Replace the compensation run when the draw cannot be saved.
    pub fn with_draw_failure_compensation(mut self, action: Arc<dyn CompensatingAction>) -> Self {
        self.on_draw_failure = action;
        self
    }

    pub async fn execute(
        &self,
        ctx: &Context,
        post_id: &str,
    ) -> Result<FormatOutcome, FormatPendingError> {
        execute(Some(self), Some(ctx), post_id).await
    }

    async fn run(
        &self,
        ctx: &Context,
        post_id: PostId,
    ) -> Result<FormatOutcome, FormatPendingError> {
        let mut post = match self.post_repo.get(ctx, &post_id).await {
            Ok(post) => post,
            Err(RepositoryError::PostNotFound(_)) => {
                return Err(FormatPendingError::PostNotFound(post_id));
            }
            Err(source) => return Err(FormatPendingError::FetchPost { post_id, source }),
        };
        // 二重実行は formatter に届く前に弾く
        if let Err(source) = post.ensure_pending() {
            return Err(FormatPendingError::PostNotPending { post_id, source });
        }

        let request = FormatRequest {
            post_id: post_id.clone(),
            content: post.content().to_string(),
        };
        let formatted = match self.formatter.format(ctx, &request).await {
            Ok(formatted) => formatted,
            Err(source @ FormatterError::Unavailable(_)) => {
                return Err(FormatPendingError::FormatterUnavailable { post_id, source });
            }
            Err(source) => return Err(FormatPendingError::Format { post_id, source }),
        };

        let validated = match self.formatter.validate(ctx, formatted).await {
            Ok(validated) => validated,
            Err(source @ FormatterError::ContentRejected(_)) => {
                return Err(FormatPendingError::ContentRejected { post_id, source });
            }
            Err(source) => return Err(FormatPendingError::Validate { post_id, source }),
        };
        if validated.status != DrawStatus::Verified {
            debug!(
                post_id = %post_id,
                reason = ?validated.validation_reason,
                "post not publishable"
            );
            return Ok(FormatOutcome::Rejected {
                reason: validated.validation_reason,
            });
        }

        let content = normalize_draw_content(&validated.formatted);
        let mut draw = match Draw::new(post_id.clone(), content) {
            Ok(draw) => draw,
            Err(source) => return Err(FormatPendingError::BuildDraw { post_id, source }),
        };
        draw.mark_verified();

        if let Err(draw_error) = self.draw_repo.create(ctx, &draw).await {
            let step = self.on_draw_failure.name();
            debug!(
                post_id = %post_id,
                step,
                error = %draw_error,
                "draw save failed, compensating"
            );
            return Err(match self.on_draw_failure.run(ctx, &post_id).await {
                Ok(()) => FormatPendingError::DrawCreationFailed {
                    post_id,
                    source: draw_error,
                },
                Err(source) => FormatPendingError::RequeueFailed {
                    post_id,
                    draw_error,
                    source,
                },
            });
        }

        // ここから先の失敗では Draw を消さない（保存済みのまま返す）

        if let Err(source) = post.mark_ready() {
            return Err(FormatPendingError::PostNotPending { post_id, source });
        }
        if let Err(source) = self.post_repo.update(ctx, &post).await {
            return Err(FormatPendingError::UpdatePost { post_id, source });
        }

        Ok(FormatOutcome::Published)
    }
}

/// Runs the usecase after checking the preconditions a caller can get wrong
/// (missing usecase, missing context, empty id).
pub async fn execute(
    usecase: Option<&FormatPendingUsecase>,
    ctx: Option<&Context>,
    post_id: &str,
) -> Result<FormatOutcome, FormatPendingError> {
    let usecase = usecase.ok_or(FormatPendingError::NilUsecase)?;
    let ctx = ctx.ok_or(FormatPendingError::NilContext)?;
    let post_id = PostId::new(post_id).map_err(|_| FormatPendingError::EmptyPostId)?;
    usecase.run(ctx, post_id).await
}

/// Trim surrounding whitespace and cap at `MAX_DRAW_RESULT_CHARS` chars.
pub fn normalize_draw_content(content: &FormattedContent) -> FormattedContent {
    let trimmed = content.as_str().trim();
    match trimmed.char_indices().nth(MAX_DRAW_RESULT_CHARS) {
        Some((cut, _)) => FormattedContent::new(&trimmed[..cut]),
        None => FormattedContent::new(trimmed),
    }
}
