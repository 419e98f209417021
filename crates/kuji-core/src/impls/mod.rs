//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **SqliteJobQueue**: 永続キュー（トランザクションで claim）
//! - **InMemoryJobQueue**: チャネルベースのプロセス内キュー
//! - **InMemoryPostRepository / InMemoryDrawRepository**: 開発用リポジトリ
//! - **PlainFormatter**: 外部サービスなしの Formatter

pub mod inmem_queue;
pub mod inmem_repository;
pub mod plain_formatter;
pub mod sqlite_queue;

pub use self::inmem_queue::InMemoryJobQueue;
pub use self::inmem_repository::{InMemoryDrawRepository, InMemoryPostRepository};
pub use self::plain_formatter::PlainFormatter;
pub use self::sqlite_queue::{SqliteJobQueue, SqliteQueueConfig};
