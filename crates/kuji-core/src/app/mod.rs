//! App - アプリケーション層
//!
//! ports を組み合わせたユースケースと、それを回すワーカー。
//!
//! # 主要コンポーネント
//! - **CreatePostUsecase**: 投稿の保存と整形ジョブの登録
//! - **FormatPendingUsecase**: 1 件分の format → validate → 保存 → 公開
//! - **RequeueFormatJob**: Draw 保存失敗時の補償
//! - **WorkerLoop / WorkerGroup**: dequeue してユースケースを回すループ

pub mod compensation;
pub mod create_post;
pub mod format_pending;
pub mod worker_loop;

#[cfg(test)]
pub(crate) mod testing;

pub use self::compensation::{CompensatingAction, CompensationError, RequeueFormatJob};
pub use self::create_post::{CreatePostError, CreatePostInput, CreatePostUsecase};
pub use self::format_pending::{FormatOutcome, FormatPendingError, FormatPendingUsecase};
pub use self::worker_loop::{WorkerExit, WorkerGroup, WorkerLoop, WorkerReport};
