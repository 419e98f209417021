//! Domain model (ids, post, draw, format job, error classification).

pub mod draw;
pub mod errors;
pub mod ids;
pub mod job;
pub mod post;

pub use self::draw::{Draw, DrawError, DrawStatus, FormattedContent};
pub use self::errors::ErrorKind;
pub use self::ids::{IdError, PostId};
pub use self::job::{FormatJob, InvalidJobStatus, JobStatus};
pub use self::post::{Post, PostError, PostStatus};
