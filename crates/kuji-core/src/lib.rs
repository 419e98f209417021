//! kuji-core
//!
//! 闇投稿の整形ジョブを回すためのコア。
//!
//! # モジュール構成
//! - **context**: キャンセルと期限（`Context`）
//! - **domain**: ドメインモデル（ids, post, draw, job, errors）
//! - **ports**: 抽象化レイヤー（JobQueue, PostRepository, DrawRepository, Formatter）
//! - **impls**: 実装（SqliteJobQueue, InMemoryJobQueue, in-memory リポジトリ, PlainFormatter）
//! - **app**: ユースケースとワーカー（CreatePost, FormatPending, WorkerLoop）

pub mod app;
pub mod context;
pub mod domain;
pub mod impls;
pub mod ports;

pub use self::context::{Context, ContextError};
