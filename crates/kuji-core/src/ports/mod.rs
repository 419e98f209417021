//! Ports - 抽象化レイヤー
//!
//! Hexagonal Architecture の「ポート」。ユースケースはこの trait だけに依存し、
//! SQLite / メモリ / LLM などの実装は `impls` に置く。

pub mod formatter;
pub mod job_queue;
pub mod repository;

pub use self::formatter::{FormatRequest, FormatResult, Formatter, FormatterError};
pub use self::job_queue::{BoxError, JobQueue, QueueError};
pub use self::repository::{DrawRepository, PostRepository, RepositoryError};
