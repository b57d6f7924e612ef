//! Appealbot - job orchestration core of a traffic-violation appeal bot
//!
//! This library schedules durable per-user tasks, stages appeal photos in
//! the background, times out idle captchas and keeps a self-healing broker
//! consumer running.
//!
//! # Module Structure
//!
//! - `core`: Configuration, errors, logging, retry policy, shared types
//! - `storage`: Key-value storage backends
//! - `scheduler`: Durable task store and periodic task scheduler
//! - `photos`: Per-user photo staging pipeline and Telegraph client
//! - `deadline`: In-memory deadline timer
//! - `workers`: Idle sender worker pool
//! - `broker`: Broker message model, resilient consumer, HTTP client
//! - `relay`: Captcha relay between users and senders
//! - `executors`: Built-in scheduler executors

pub mod broker;
pub mod cli;
pub mod core;
pub mod deadline;
pub mod executors;
pub mod photos;
pub mod relay;
pub mod scheduler;
pub mod storage;
pub mod workers;

// Re-export commonly used types for convenience
pub use crate::core::{config, AppError, AppResult};
pub use broker::{BrokerMessage, ResilientBrokerConnection};
pub use deadline::DeadlineTimer;
pub use photos::PhotoStagingPipeline;
pub use relay::CaptchaRelay;
pub use scheduler::{DurableTaskStore, ScheduledTask, TaskScheduler};
pub use workers::WorkerAssignmentPool;
