//! PlainFormatter - 外部サービスを使わない Formatter
//!
//! ローカル実行用。空白をまとめるだけで、空になった本文だけを却下する。

use async_trait::async_trait;

use crate::context::Context;
use crate::domain::FormattedContent;
use crate::ports::{FormatRequest, FormatResult, Formatter, FormatterError};

#[derive(Debug, Clone, Copy, Default)]
pub struct PlainFormatter;

impl PlainFormatter {
    pub fn new() -> Self {
        Self
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn check_ctx(ctx: &Context) -> Result<(), FormatterError> {
    match ctx.err() {
        Some(reason) => Err(FormatterError::Other(Box::new(reason))),
        None => Ok(()),
    }
}

#[async_trait]
impl Formatter for PlainFormatter {
    async fn format(
        &self,
        ctx: &Context,
        request: &FormatRequest,
    ) -> Result<FormatResult, FormatterError> {
        check_ctx(ctx)?;
        Ok(FormatResult::pending(
            request.post_id.clone(),
            FormattedContent::new(collapse_whitespace(&request.content)),
        ))
    }

    async fn validate(
        &self,
        ctx: &Context,
        result: FormatResult,
    ) -> Result<FormatResult, FormatterError> {
        check_ctx(ctx)?;
        let cleaned = FormattedContent::new(result.formatted.as_str().trim());
        if cleaned.is_empty() {
            return Ok(result.rejected("formatted text is empty"));
        }
        Ok(result.verified(cleaned))
    }
}
