//! Errors - 失敗の運用分類
//!
//! 個々のエラー型はそれぞれのモジュールに置き、ここでは「ワーカーがどう扱うか」
//! の分類だけを持つ。

use std::fmt;

/// ErrorKind は処理失敗の運用分類
///
/// - Transient: ジョブは再キュー済み。ログを残して次へ
/// - Fatal: ジョブが失われた。自動復旧はないので要アラート
/// - Permanent: 入力やコンテンツ起因。ログを残して破棄
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Fatal,
    Permanent,
}

impl ErrorKind {
    /// Whether an operator has to look at this.
    pub fn needs_alert(&self) -> bool {
        matches!(self, ErrorKind::Fatal)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Transient => "transient",
            ErrorKind::Fatal => "fatal",
            ErrorKind::Permanent => "permanent",
        };
        f.write_str(s)
    }
}
