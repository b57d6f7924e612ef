//! Logging initialization and startup diagnostics
//!
//! This module provides:
//! - Logger initialization (console + file)
//! - A startup summary of the orchestration endpoints

use anyhow::Result;
use simplelog::*;
use std::fs::File;

use crate::core::config;

/// Initialize logger for both console and file output
///
/// # Arguments
/// * `log_file_path` - Path to the log file
///
/// # Returns
/// * `Ok(())` - Logger initialized successfully
/// * `Err(anyhow::Error)` - Failed to initialize logger
pub fn init_logger(log_file_path: &str) -> Result<()> {
    let log_file = File::create(log_file_path).map_err(|e| anyhow::anyhow!("Failed to create log file: {}", e))?;

    CombinedLogger::init(vec![
        TermLogger::new(
            LevelFilter::Info,
            Config::default(),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        ),
        WriteLogger::new(LevelFilter::Info, Config::default(), log_file),
    ])
    .map_err(|e| anyhow::anyhow!("Failed to initialize logger: {}", e))?;

    Ok(())
}

/// Logs where every collaborator of the core points to.
///
/// Secrets (broker password, Telegraph token) are reported only as set/unset.
pub fn log_startup_configuration() {
    log::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    log::info!("Task store:     {} (key {})", *config::REDIS_URL, *config::TASKS_KEY);
    log::info!("Photo storage:  {}", *config::PHOTO_STORAGE_DIR);
    log::info!("Status queue:   {}", *config::STATUS_QUEUE);
    log::info!("Broker HTTP:    {} (vhost {})", *config::BROKER_HTTP_URL, *config::BROKER_VHOST);
    log::info!("Captcha window: {} min", *config::CAPTCHA_TIMEOUT_MINUTES);
    if config::TELEGRAPH_TOKEN.is_empty() {
        log::warn!("TELEGRAPH_TOKEN is not set, page creation will fail");
    }
    log::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
}
