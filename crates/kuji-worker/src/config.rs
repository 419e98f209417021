use anyhow::{Context, Result, bail};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Which `JobQueue` implementation the worker runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueBackend {
    Memory,
    Sqlite,
}

impl FromStr for QueueBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "memory" => Ok(QueueBackend::Memory),
            "sqlite" => Ok(QueueBackend::Sqlite),
            other => bail!("JOB_QUEUE_BACKEND {other:?} is not supported (memory | sqlite)"),
        }
    }
}

/// Worker configuration loaded from environment variables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    pub queue_backend: QueueBackend,
    pub database_url: String,
    pub queue_buffer: usize,
    pub poll_interval: Duration,
    pub concurrency: usize,
    pub retry_delay: Duration,
    /// How long in-flight jobs get to finish after the queue is closed.
    pub shutdown_grace: Duration,
    pub seed_sample_posts: bool,
}

impl WorkerConfig {
    /// Load configuration from the process environment (and `.env` if present)
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let queue_backend: QueueBackend =
            lookup("JOB_QUEUE_BACKEND").unwrap_or_default().parse()?;

        let database_url =
            lookup("DATABASE_URL").unwrap_or_else(|| "sqlite://kuji.db".to_string());

        let queue_buffer: i64 = parse_or(&lookup, "JOB_QUEUE_BUFFER", 10)?;
        let poll_interval_ms: u64 = parse_or(&lookup, "JOB_QUEUE_POLL_INTERVAL_MS", 200)?;
        let concurrency: usize = parse_or(&lookup, "WORKER_CONCURRENCY", 1)?;
        let retry_delay_ms: u64 = parse_or(&lookup, "WORKER_RETRY_DELAY_MS", 500)?;
        let shutdown_grace_ms: u64 = parse_or(&lookup, "WORKER_SHUTDOWN_GRACE_MS", 10_000)?;
        let seed_sample_posts = parse_or(
            &lookup,
            "SEED_SAMPLE_POSTS",
            queue_backend == QueueBackend::Memory,
        )?;

        if concurrency == 0 {
            bail!("WORKER_CONCURRENCY must be at least 1");
        }

        Ok(Self {
            queue_backend,
            database_url,
            queue_buffer: usize::try_from(queue_buffer.max(1)).unwrap_or(1),
            poll_interval: Duration::from_millis(poll_interval_ms),
            concurrency,
            retry_delay: Duration::from_millis(retry_delay_ms),
            shutdown_grace: Duration::from_millis(shutdown_grace_ms),
            seed_sample_posts,
        })
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} must be a valid value, got {raw:?}")),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<WorkerConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        WorkerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.queue_backend, QueueBackend::Memory);
        assert_eq!(cfg.database_url, "sqlite://kuji.db");
        assert_eq!(cfg.queue_buffer, 10);
        assert_eq!(cfg.poll_interval, Duration::from_millis(200));
        assert_eq!(cfg.concurrency, 1);
        assert_eq!(cfg.retry_delay, Duration::from_millis(500));
        assert_eq!(cfg.shutdown_grace, Duration::from_secs(10));
        assert!(cfg.seed_sample_posts);
    }

    #[test]
    fn shutdown_grace_is_configurable() {
        let cfg = config(&[("WORKER_SHUTDOWN_GRACE_MS", "2500")]).unwrap();
        assert_eq!(cfg.shutdown_grace, Duration::from_millis(2500));
    }

    #[rstest]
    #[case("memory", QueueBackend::Memory)]
    #[case("MEMORY", QueueBackend::Memory)]
    #[case(" sqlite ", QueueBackend::Sqlite)]
    #[case("", QueueBackend::Memory)]
    fn backend_parsing(#[case] raw: &str, #[case] expected: QueueBackend) {
        let cfg = config(&[("JOB_QUEUE_BACKEND", raw)]).unwrap();
        assert_eq!(cfg.queue_backend, expected);
    }

    #[test]
    fn unknown_backend_is_an_error() {
        let err = config(&[("JOB_QUEUE_BACKEND", "firestore")]).unwrap_err();
        assert!(err.to_string().contains("firestore"));
    }

    #[test]
    fn sqlite_does_not_seed_unless_asked() {
        assert!(!config(&[("JOB_QUEUE_BACKEND", "sqlite")]).unwrap().seed_sample_posts);
        assert!(
            config(&[("JOB_QUEUE_BACKEND", "sqlite"), ("SEED_SAMPLE_POSTS", "true")])
                .unwrap()
                .seed_sample_posts
        );
    }

    #[rstest]
    #[case("0", 1)]
    #[case("-3", 1)]
    #[case("64", 64)]
    fn buffer_is_at_least_one(#[case] raw: &str, #[case] expected: usize) {
        assert_eq!(config(&[("JOB_QUEUE_BUFFER", raw)]).unwrap().queue_buffer, expected);
    }

    #[rstest]
    #[case("JOB_QUEUE_BUFFER", "ten")]
    #[case("WORKER_CONCURRENCY", "0")]
    #[case("WORKER_RETRY_DELAY_MS", "-1")]
    #[case("WORKER_SHUTDOWN_GRACE_MS", "soon")]
    #[case("SEED_SAMPLE_POSTS", "yes")]
    fn invalid_values_are_rejected(#[case] key: &str, #[case] raw: &str) {
        assert!(config(&[(key, raw)]).is_err());
    }
}
