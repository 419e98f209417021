//! kuji-worker
//!
//! 整形待ちの闇投稿を取り出して FormatPendingUsecase を回し続ける。
//! Ctrl-C ではまずキューを閉じ、処理中のジョブを猶予期間だけ待つ。
//! 猶予を過ぎたらワーカーの context をキャンセルする。

mod config;

use std::sync::Arc;

use anyhow::{Context as _, Result};
use kuji_core::Context;
use kuji_core::app::{CreatePostInput, CreatePostUsecase, FormatPendingUsecase, WorkerGroup};
use kuji_core::impls::{
    InMemoryDrawRepository, InMemoryJobQueue, InMemoryPostRepository, PlainFormatter,
    SqliteJobQueue, SqliteQueueConfig,
};
use kuji_core::ports::{JobQueue, PostRepository};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{QueueBackend, WorkerConfig};

const SAMPLE_POSTS: &[&str] = &[
    "締め切り前夜に限ってコンパイルが通らない",
    "会議が 3 本連続で、全部同じ話だった",
    "  昼休みに   寝過ごして   午後の定例に遅刻した  ",
];

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,kuji_core=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_line_number(true),
        )
        .init();

    let config = WorkerConfig::from_env().context("Failed to load configuration")?;
    info!(
        backend = ?config.queue_backend,
        concurrency = config.concurrency,
        "configuration loaded"
    );

    let queue = build_queue(&config).await?;
    let posts: Arc<dyn PostRepository> = Arc::new(InMemoryPostRepository::new());
    let draws = Arc::new(InMemoryDrawRepository::new());
    let usecase = Arc::new(FormatPendingUsecase::new(
        posts.clone(),
        draws,
        Arc::new(PlainFormatter::new()),
        queue.clone(),
    ));

    let root = Context::background();
    if config.seed_sample_posts {
        seed_sample_posts(&root, posts.clone(), queue.clone()).await?;
    }

    let group = WorkerGroup::spawn(
        config.concurrency,
        &root,
        queue.clone(),
        usecase,
        config.retry_delay,
    );
    info!(workers = group.len(), "worker started (pending format)");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!(grace_ms = config.shutdown_grace.as_millis() as u64, "shutdown requested");

    // 取り出し済みのジョブは生きた context のまま最後まで走らせる
    if let Err(err) = queue.close().await {
        warn!(error = %err, "job queue close failed");
    }
    for report in group.join_within(config.shutdown_grace).await {
        info!(
            worker_id = report.worker_id,
            processed = report.processed,
            succeeded = report.succeeded,
            failed = report.failed,
            exit = ?report.exit,
            "worker report"
        );
    }

    Ok(())
}

async fn build_queue(config: &WorkerConfig) -> Result<Arc<dyn JobQueue>> {
    let queue: Arc<dyn JobQueue> = match config.queue_backend {
        QueueBackend::Memory => Arc::new(InMemoryJobQueue::new(config.queue_buffer)),
        QueueBackend::Sqlite => {
            let queue_config = SqliteQueueConfig {
                poll_interval: config.poll_interval,
                ..SqliteQueueConfig::default()
            };
            let queue = SqliteJobQueue::connect(&config.database_url, queue_config)
                .await
                .with_context(|| format!("Failed to open job queue at {}", config.database_url))?;
            info!(pending = queue.pending_count().await?, "sqlite job queue ready");
            Arc::new(queue)
        }
    };
    Ok(queue)
}

async fn seed_sample_posts(
    ctx: &Context,
    posts: Arc<dyn PostRepository>,
    queue: Arc<dyn JobQueue>,
) -> Result<()> {
    let create = CreatePostUsecase::new(posts, queue);
    for content in SAMPLE_POSTS {
        let post_id = create
            .execute(ctx, CreatePostInput::new(*content))
            .await
            .context("Failed to seed sample post")?;
        info!(post_id = %post_id, "sample post seeded");
    }
    Ok(())
}
