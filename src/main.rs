use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;

use appealbot::broker::{AmqpTransport, HttpBroker, ResilientBrokerConnection};
use appealbot::cli::{Cli, Commands};
use appealbot::core::retry::RetryConfig;
use appealbot::core::{config, init_logger, log_startup_configuration};
use appealbot::deadline::DeadlineTimer;
use appealbot::executors;
use appealbot::photos::{PhotoStagingPipeline, TelegraphClient};
use appealbot::relay::{CaptchaRelay, LogNotifier};
use appealbot::scheduler::{DurableTaskStore, TaskScheduler, TaskTypes};
use appealbot::storage::RedisStore;
use appealbot::workers::WorkerAssignmentPool;

/// Main entry point of the orchestration core
///
/// Parses CLI arguments and dispatches to the chosen subcommand.
///
/// # Errors
/// Returns an error if initialization fails (logging, storage, HTTP clients).
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    // Load environment variables from .env if present
    let _ = dotenv();

    init_logger(&config::LOG_FILE_PATH)?;

    match cli.command {
        Some(Commands::ListTasks { user }) => list_tasks(user).await,
        Some(Commands::SweepOnce) => sweep_once().await,
        Some(Commands::Run) | None => run().await,
    }
}

struct Components {
    scheduler: Arc<TaskScheduler>,
    relay: Arc<CaptchaRelay>,
}

fn task_store() -> Result<Arc<DurableTaskStore>> {
    let kv = RedisStore::open(&config::REDIS_URL).context("Failed to open task storage")?;
    Ok(Arc::new(DurableTaskStore::new(
        Arc::new(kv),
        config::TASKS_KEY.as_str(),
        TaskTypes::builtin(),
    )))
}

fn build() -> Result<Components> {
    let telegraph = Arc::new(TelegraphClient::from_env()?);
    let photos = PhotoStagingPipeline::new(
        config::PHOTO_STORAGE_DIR.as_str(),
        telegraph.clone(),
        telegraph,
        RetryConfig::upload(),
    )?;

    let relay = Arc::new(CaptchaRelay::new(
        Arc::new(HttpBroker::from_env()?),
        Arc::new(WorkerAssignmentPool::new()),
        Arc::new(DeadlineTimer::new()),
        Arc::new(LogNotifier),
    ));

    let mut scheduler = TaskScheduler::new(task_store()?);
    executors::register_builtin(&mut scheduler, &photos, &relay);

    Ok(Components {
        scheduler: Arc::new(scheduler),
        relay,
    })
}

/// Runs every loop until Ctrl+C
async fn run() -> Result<()> {
    log_startup_configuration();
    let Components { scheduler, relay } = build()?;
    let shutdown = CancellationToken::new();

    let scheduler_task = tokio::spawn(
        Arc::clone(&scheduler).run(config::scheduler::sweep_interval(), shutdown.clone()),
    );

    let deadline_task = {
        let relay = Arc::clone(&relay);
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            relay
                .deadlines()
                .run(relay.as_ref(), config::deadline::sweep_interval(), shutdown)
                .await;
        })
    };

    let consumer_task = {
        let consumer = ResilientBrokerConnection::new(
            Arc::new(AmqpTransport::new(&config::AMQP_URL)),
            &config::STATUS_QUEUE,
            relay.clone(),
        );
        let shutdown = shutdown.clone();
        tokio::spawn(async move { consumer.run(shutdown).await })
    };

    signal::ctrl_c().await.context("Failed to listen for Ctrl+C")?;
    log::info!("Shutdown requested, stopping loops");
    shutdown.cancel();

    for (name, task) in [
        ("scheduler", scheduler_task),
        ("deadline timer", deadline_task),
        ("broker consumer", consumer_task),
    ] {
        if let Err(e) = task.await {
            log::error!("{} task ended abnormally: {}", name, e);
        }
    }

    log::info!("Stopped");
    Ok(())
}

async fn list_tasks(user: Option<i64>) -> Result<()> {
    let store = task_store()?;
    let output = match user {
        Some(user_id) => serde_json::to_string_pretty(&store.tasks_for(user_id).await)?,
        None => serde_json::to_string_pretty(&store.load().await)?,
    };
    println!("{}", output);
    Ok(())
}

async fn sweep_once() -> Result<()> {
    let Components { scheduler, .. } = build()?;
    let report = scheduler.sweep().await;
    log::info!(
        "Sweep done: {} ok, {} failed, {} without executor",
        report.executed,
        report.failed,
        report.unknown
    );
    Ok(())
}
