//! SqliteJobQueue - SQLite を正本にする永続整形キュー
//!
//! # テーブル
//! `format_jobs(post_id PRIMARY KEY, status, created_at)`。主キーが投稿 ID なので
//! 「1 投稿につき未処理ジョブは 1 件まで」がストレージ側で保証される。
//! `created_at` はストア側の時計（ミリ秒精度の RFC 3339）で、同時刻は rowid 順。
//!
//! # claim
//! 「最古の行を選んで削除し、その行を返す」を 1 文の `DELETE ... RETURNING` で行う。
//! 最初から書き込みロックを取りに行くので、他の書き手がいる間は `busy_timeout`
//! まで待つ。1 文なので「読んだ行を他のワーカーも消す」ことは起きない。
//! それでも BUSY/LOCKED が返れば、間隔を倍々に広げながら数回だけやり直し、
//! だめならストレージエラーとして返す。
//!
//! # enqueue
//! 停止とキャンセルは INSERT を始める前にだけ確認する。始めた INSERT は最後まで
//! 待つので、「保存されたのにエラーを返す」ことはない。
//!
//! # 既知の制約
//! 削除が ack を兼ねるので、claim 後に落ちたワーカーのジョブは戻らない
//! （lease / 可視性タイムアウトは持たない）。

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use sqlx::FromRow;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::context::Context;
use crate::domain::{FormatJob, JobStatus, PostId};
use crate::ports::job_queue::{JobQueue, QueueError, ensure_ready};

const FORMAT_JOBS_TABLE: &str = "format_jobs";

/// Tunables for [`SqliteJobQueue`].
#[derive(Debug, Clone)]
pub struct SqliteQueueConfig {
    /// How long an idle `dequeue_format` sleeps between polls.
    pub poll_interval: Duration,
    /// Claim attempts before a transactional conflict is surfaced.
    pub max_claim_attempts: u32,
    /// Pause before the second claim attempt; doubled for each further attempt.
    pub retry_backoff: Duration,
    /// Upper bound of the random pause added to each backoff.
    pub max_retry_jitter: Duration,
    /// How long SQLite itself waits for a competing writer.
    pub busy_timeout: Duration,
}

impl Default for SqliteQueueConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(200),
            max_claim_attempts: 5,
            retry_backoff: Duration::from_millis(20),
            max_retry_jitter: Duration::from_millis(10),
            busy_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, FromRow)]
struct JobRow {
    post_id: String,
    status: String,
    created_at: String,
}

impl JobRow {
    fn into_job(self) -> Result<FormatJob, sqlx::Error> {
        let post_id = PostId::new(self.post_id).map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
        let status = self
            .status
            .parse::<JobStatus>()
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
        let queued_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?
            .with_timezone(&Utc);
        Ok(FormatJob {
            post_id,
            status,
            queued_at,
        })
    }
}

pub struct SqliteJobQueue {
    pool: SqlitePool,
    config: SqliteQueueConfig,
    closed: CancellationToken,
}

impl SqliteJobQueue {
    /// Connect to `database_url` (e.g. `sqlite://kuji.db`), creating the file if needed.
    pub async fn connect(
        database_url: &str,
        config: SqliteQueueConfig,
    ) -> Result<Self, QueueError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(QueueError::storage)?
            .create_if_missing(true);
        Self::connect_with(options, 5, config).await
    }

    /// Open (or create) a queue database at `path`.
    pub async fn open(
        path: impl AsRef<Path>,
        config: SqliteQueueConfig,
    ) -> Result<Self, QueueError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        Self::connect_with(options, 5, config).await
    }

    /// Single-connection in-memory database, for local runs and tests.
    pub async fn in_memory(config: SqliteQueueConfig) -> Result<Self, QueueError> {
        let options =
            SqliteConnectOptions::from_str("sqlite::memory:").map_err(QueueError::storage)?;
        // 接続ごとに別 DB になるので 1 本に固定し、閉じられないようにする
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(QueueError::storage)?;
        Self::with_pool(pool, config).await
    }

    async fn connect_with(
        options: SqliteConnectOptions,
        max_connections: u32,
        config: SqliteQueueConfig,
    ) -> Result<Self, QueueError> {
        let options = options
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(config.busy_timeout);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(QueueError::storage)?;
        Self::with_pool(pool, config).await
    }

    /// Use an existing pool. The `format_jobs` table is created if missing.
    pub async fn with_pool(
        pool: SqlitePool,
        config: SqliteQueueConfig,
    ) -> Result<Self, QueueError> {
        let queue = Self {
            pool,
            config,
            closed: CancellationToken::new(),
        };
        queue.run_migrations().await?;
        Ok(queue)
    }

    async fn run_migrations(&self) -> Result<(), QueueError> {
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {FORMAT_JOBS_TABLE} (
                post_id TEXT PRIMARY KEY NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            )
            "#
        ))
        .execute(&self.pool)
        .await
        .map_err(QueueError::storage)?;

        sqlx::query(&format!(
            r#"
            CREATE INDEX IF NOT EXISTS idx_{FORMAT_JOBS_TABLE}_created_at
            ON {FORMAT_JOBS_TABLE}(created_at)
            "#
        ))
        .execute(&self.pool)
        .await
        .map_err(QueueError::storage)?;

        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Outstanding jobs in delivery order.
    pub async fn pending_jobs(&self) -> Result<Vec<FormatJob>, QueueError> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            SELECT post_id, status, created_at FROM {FORMAT_JOBS_TABLE}
            ORDER BY created_at ASC, rowid ASC
            "#
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(QueueError::storage)?;

        rows.into_iter()
            .map(|row| row.into_job().map_err(QueueError::storage))
            .collect()
    }

    pub async fn pending_count(&self) -> Result<u64, QueueError> {
        let (count,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {FORMAT_JOBS_TABLE}"))
            .fetch_one(&self.pool)
            .await
            .map_err(QueueError::storage)?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    /// 衝突時は間隔を広げながら `max_claim_attempts` 回まで試す。
    async fn claim_oldest(&self) -> Result<Option<PostId>, QueueError> {
        let max_attempts = self.config.max_claim_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.try_claim().await {
                Ok(claimed) => return Ok(claimed),
                Err(err) if is_conflict(&err) && attempt < max_attempts => {
                    let pause = retry_pause(&self.config, attempt);
                    debug!(
                        attempt,
                        pause_ms = pause.as_millis() as u64,
                        error = %err,
                        "format job claim conflicted, retrying"
                    );
                    attempt += 1;
                    tokio::time::sleep(pause).await;
                }
                Err(err) => {
                    warn!(attempt, error = %err, "format job claim failed");
                    return Err(QueueError::storage(err));
                }
            }
        }
    }

    async fn try_claim(&self) -> Result<Option<PostId>, sqlx::Error> {
        let sql = format!(
            r#"
            DELETE FROM {FORMAT_JOBS_TABLE}
            WHERE post_id = (
                SELECT post_id FROM {FORMAT_JOBS_TABLE}
                ORDER BY created_at ASC, rowid ASC
                LIMIT 1
            )
            RETURNING post_id, status, created_at
            "#
        );
        let row = sqlx::query_as::<_, JobRow>(&sql)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| row.into_job().map(|job| job.post_id))
            .transpose()
    }
}

/// `retry_backoff * 2^(attempt-1)` plus up to `max_retry_jitter`.
fn retry_pause(config: &SqliteQueueConfig, attempt: u32) -> Duration {
    let backoff = config
        .retry_backoff
        .saturating_mul(1u32 << attempt.saturating_sub(1).min(10));
    let max_ms = u64::try_from(config.max_retry_jitter.as_millis()).unwrap_or(u64::MAX);
    backoff + Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
}

#[async_trait]
impl JobQueue for SqliteJobQueue {
    async fn enqueue_format(&self, ctx: &Context, post_id: &PostId) -> Result<(), QueueError> {
        ensure_ready(self.closed.is_cancelled(), ctx)?;

        let sql =
            format!("INSERT INTO {FORMAT_JOBS_TABLE} (post_id, status) VALUES (?, 'pending')");
        let result = sqlx::query(&sql)
            .bind(post_id.as_str())
            .execute(&self.pool)
            .await;

        match result {
            Ok(_) => {
                debug!(post_id = %post_id, "format job enqueued");
                Ok(())
            }
            Err(err) if is_unique_violation(&err) => {
                Err(QueueError::AlreadyScheduled(post_id.clone()))
            }
            Err(err) => Err(QueueError::storage(err)),
        }
    }

    async fn dequeue_format(&self, ctx: &Context) -> Result<PostId, QueueError> {
        loop {
            ensure_ready(self.closed.is_cancelled(), ctx)?;

            if let Some(post_id) = self.claim_oldest().await? {
                debug!(post_id = %post_id, "format job claimed");
                return Ok(post_id);
            }

            // まだジョブが無い: 停止指示とキャンセルを見張りながら次のポーリングまで待つ
            tokio::select! {
                biased;
                _ = self.closed.cancelled() => return Err(QueueError::QueueClosed),
                reason = ctx.done() => return Err(QueueError::ContextClosed(reason)),
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
    }

    async fn close(&self) -> Result<(), QueueError> {
        self.closed.cancel();
        Ok(())
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|db| db.is_unique_violation())
}

/// SQLITE_BUSY (5) / SQLITE_LOCKED (6), including their extended codes.
fn is_conflict(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db| db.code())
        .and_then(|code| code.parse::<i32>().ok())
        .is_some_and(|code| matches!(code & 0xff, 5 | 6))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn id(s: &str) -> PostId {
        PostId::new(s).unwrap()
    }

    fn fast_config() -> SqliteQueueConfig {
        SqliteQueueConfig {
            poll_interval: Duration::from_millis(20),
            ..SqliteQueueConfig::default()
        }
    }

    async fn file_queue() -> (TempDir, SqliteJobQueue) {
        let dir = tempfile::tempdir().unwrap();
        let queue = SqliteJobQueue::open(dir.path().join("jobs.db"), fast_config())
            .await
            .unwrap();
        (dir, queue)
    }

    #[tokio::test]
    async fn enqueue_then_dequeue() {
        let (_dir, queue) = file_queue().await;
        let ctx = Context::background();

        queue.enqueue_format(&ctx, &id("post-1")).await.unwrap();
        let jobs = queue.pending_jobs().await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].post_id, id("post-1"));
        assert_eq!(jobs[0].status, JobStatus::Pending);

        assert_eq!(queue.dequeue_format(&ctx).await.unwrap(), id("post-1"));
        assert_eq!(queue.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn duplicate_enqueue_keeps_single_record() {
        let (_dir, queue) = file_queue().await;
        let ctx = Context::background();

        queue.enqueue_format(&ctx, &id("post-1")).await.unwrap();
        let err = queue.enqueue_format(&ctx, &id("post-1")).await.unwrap_err();
        assert!(matches!(err, QueueError::AlreadyScheduled(ref p) if *p == id("post-1")));
        assert_eq!(queue.pending_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn dequeue_returns_oldest_first() {
        let (_dir, queue) = file_queue().await;
        let ctx = Context::background();
        for name in ["a", "b", "c"] {
            queue.enqueue_format(&ctx, &id(name)).await.unwrap();
        }

        assert_eq!(queue.dequeue_format(&ctx).await.unwrap(), id("a"));
        // 取り出し直後の再登録は最後尾に並ぶ
        queue.enqueue_format(&ctx, &id("a")).await.unwrap();
        assert_eq!(queue.dequeue_format(&ctx).await.unwrap(), id("b"));
        assert_eq!(queue.dequeue_format(&ctx).await.unwrap(), id("c"));
        assert_eq!(queue.dequeue_format(&ctx).await.unwrap(), id("a"));
    }

    #[tokio::test]
    async fn blocked_dequeue_wakes_on_enqueue_then_times_out() {
        let (_dir, queue) = file_queue().await;
        let queue = Arc::new(queue);

        let waiter = tokio::spawn({
            let queue = queue.clone();
            async move { queue.dequeue_format(&Context::background()).await }
        });
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!waiter.is_finished());

        queue
            .enqueue_format(&Context::background(), &id("post-1"))
            .await
            .unwrap();
        assert_eq!(waiter.await.unwrap().unwrap(), id("post-1"));

        let short = Context::background().with_timeout(Duration::from_millis(80));
        let err = queue.dequeue_format(&short).await.unwrap_err();
        assert!(matches!(err, QueueError::ContextClosed(_)));
    }

    #[tokio::test]
    async fn enqueue_with_done_context_fails() {
        let (_dir, queue) = file_queue().await;
        let ctx = Context::background();
        ctx.cancel();

        let err = queue.enqueue_format(&ctx, &id("post-1")).await.unwrap_err();
        assert!(matches!(err, QueueError::ContextClosed(_)));
        assert_eq!(queue.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn close_is_idempotent_and_stops_everything() {
        let (_dir, queue) = file_queue().await;
        let queue = Arc::new(queue);

        let waiter = tokio::spawn({
            let queue = queue.clone();
            async move { queue.dequeue_format(&Context::background()).await }
        });
        tokio::time::sleep(Duration::from_millis(30)).await;

        let closers: Vec<_> = (0..4)
            .map(|_| {
                let queue = queue.clone();
                tokio::spawn(async move { queue.close().await })
            })
            .collect();
        for closer in closers {
            closer.await.unwrap().unwrap();
        }

        assert!(matches!(waiter.await.unwrap(), Err(QueueError::QueueClosed)));
        let ctx = Context::background();
        assert!(matches!(
            queue.enqueue_format(&ctx, &id("post-1")).await,
            Err(QueueError::QueueClosed)
        ));
        assert!(matches!(
            queue.dequeue_format(&ctx).await,
            Err(QueueError::QueueClosed)
        ));
    }

    #[tokio::test]
    async fn calls_racing_close_end_in_queue_closed_or_succeed() {
        let (_dir, queue) = file_queue().await;
        let queue = Arc::new(queue);
        let ctx = Context::background();

        let mut handles = Vec::new();
        for i in 0..8 {
            let queue = queue.clone();
            let ctx = ctx.clone();
            handles.push(tokio::spawn(async move {
                queue.enqueue_format(&ctx, &id(&format!("post-{i}"))).await
            }));
        }
        queue.close().await.unwrap();

        let mut accepted = HashSet::new();
        for (i, handle) in handles.into_iter().enumerate() {
            match handle.await.unwrap() {
                Ok(()) => {
                    accepted.insert(id(&format!("post-{i}")));
                }
                Err(QueueError::QueueClosed) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        // 成功と返した登録だけが保存されている
        let stored: HashSet<_> = queue
            .pending_jobs()
            .await
            .unwrap()
            .into_iter()
            .map(|job| job.post_id)
            .collect();
        assert_eq!(stored, accepted);
        assert!(matches!(
            queue.dequeue_format(&ctx).await,
            Err(QueueError::QueueClosed)
        ));
    }

    #[tokio::test]
    async fn started_insert_completes_even_if_context_expires() {
        let (_dir, queue) = file_queue().await;
        let queue = Arc::new(queue);

        // 別接続で書き込みロックを握り、INSERT を待たせる
        let mut holder = queue.pool().acquire().await.unwrap();
        sqlx::query("BEGIN IMMEDIATE")
            .execute(&mut *holder)
            .await
            .unwrap();

        let short = Context::background().with_timeout(Duration::from_millis(30));
        let enqueue = tokio::spawn({
            let queue = queue.clone();
            async move { queue.enqueue_format(&short, &id("post-1")).await }
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        sqlx::query("COMMIT").execute(&mut *holder).await.unwrap();
        drop(holder);

        enqueue.await.unwrap().unwrap();
        assert_eq!(queue.pending_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn dequeue_waits_for_a_competing_writer() {
        let (_dir, queue) = file_queue().await;
        let queue = Arc::new(queue);
        queue
            .enqueue_format(&Context::background(), &id("post-1"))
            .await
            .unwrap();

        let mut holder = queue.pool().acquire().await.unwrap();
        sqlx::query("BEGIN IMMEDIATE")
            .execute(&mut *holder)
            .await
            .unwrap();

        let waiter = tokio::spawn({
            let queue = queue.clone();
            async move { queue.dequeue_format(&Context::background()).await }
        });

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(!waiter.is_finished());
        sqlx::query("COMMIT").execute(&mut *holder).await.unwrap();
        drop(holder);

        assert_eq!(waiter.await.unwrap().unwrap(), id("post-1"));
        assert_eq!(queue.pending_count().await.unwrap(), 0);
    }

    #[test]
    fn retry_pause_doubles_per_attempt() {
        let config = SqliteQueueConfig {
            retry_backoff: Duration::from_millis(20),
            max_retry_jitter: Duration::ZERO,
            ..SqliteQueueConfig::default()
        };
        let pauses: Vec<_> = (1..=4).map(|attempt| retry_pause(&config, attempt)).collect();
        assert_eq!(
            pauses,
            vec![
                Duration::from_millis(20),
                Duration::from_millis(40),
                Duration::from_millis(80),
                Duration::from_millis(160),
            ]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_workers_claim_each_job_exactly_once() {
        const JOBS: usize = 20;
        const WORKERS: usize = 4;

        let (_dir, queue) = file_queue().await;
        let queue = Arc::new(queue);
        let ctx = Context::background();
        for i in 0..JOBS {
            queue
                .enqueue_format(&ctx, &id(&format!("post-{i:02}")))
                .await
                .unwrap();
        }

        let mut workers = Vec::new();
        for _ in 0..WORKERS {
            let queue = queue.clone();
            workers.push(tokio::spawn(async move {
                let mut claimed = Vec::new();
                loop {
                    let ctx = Context::background().with_timeout(Duration::from_millis(300));
                    match queue.dequeue_format(&ctx).await {
                        Ok(post_id) => claimed.push(post_id),
                        Err(QueueError::ContextClosed(_)) => break,
                        // 衝突がリトライ上限を超えた場合はワーカーループ同様に再試行する
                        Err(QueueError::Storage(_)) => continue,
                        Err(other) => panic!("unexpected error: {other}"),
                    }
                }
                claimed
            }));
        }

        let mut all = Vec::new();
        for worker in workers {
            all.extend(worker.await.unwrap());
        }

        let unique: HashSet<_> = all.iter().cloned().collect();
        assert_eq!(all.len(), JOBS, "no job may be delivered twice");
        assert_eq!(unique.len(), JOBS, "no job may be lost");
        assert_eq!(queue.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn in_memory_database_works_for_local_runs() {
        let queue = SqliteJobQueue::in_memory(fast_config()).await.unwrap();
        let ctx = Context::background();
        queue.enqueue_format(&ctx, &id("post-1")).await.unwrap();
        assert_eq!(queue.pending_count().await.unwrap(), 1);
        assert_eq!(queue.dequeue_format(&ctx).await.unwrap(), id("post-1"));
    }
}
