//! Long-lived consumer that survives broker outages.
//!
//! The supervisor opens a session, consumes until anything goes wrong and
//! then reconnects after an exponential backoff (1s doubling up to 30s).
//! Messages are acknowledged only after the handler succeeded; an unacked
//! message is redelivered by the broker after reconnect.

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::core::error::{AppError, AppResult};
use crate::core::retry::{Backoff, RetryConfig};

/// One message pulled from a consumer session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub tag: u64,
    pub body: Vec<u8>,
}

/// An attached consumer on one queue.
#[async_trait]
pub trait BrokerSession: Send {
    /// `None` once the broker closed the stream.
    async fn next_delivery(&mut self) -> AppResult<Option<Delivery>>;

    async fn ack(&mut self, tag: u64) -> AppResult<()>;
}

#[async_trait]
pub trait BrokerTransport: Send + Sync {
    /// Connects and attaches to an existing queue; never declares it.
    async fn open(&self, queue: &str) -> AppResult<Box<dyn BrokerSession>>;
}

/// Receives decoded message bodies. An error leaves the message unacked.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, body: String) -> anyhow::Result<()>;
}

pub struct ResilientBrokerConnection {
    transport: Arc<dyn BrokerTransport>,
    queue: String,
    handler: Arc<dyn MessageHandler>,
    backoff: RetryConfig,
}

impl ResilientBrokerConnection {
    pub fn new(transport: Arc<dyn BrokerTransport>, queue: &str, handler: Arc<dyn MessageHandler>) -> Self {
        Self {
            transport,
            queue: queue.to_string(),
            handler,
            backoff: RetryConfig::reconnect(),
        }
    }

    pub fn with_backoff(mut self, backoff: RetryConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Consumes until `shutdown` is cancelled, reconnecting as often as needed.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut backoff = Backoff::new(self.backoff.clone());
        log::info!("Broker consumer for '{}' starting", self.queue);

        while !shutdown.is_cancelled() {
            let err = match self.connect(&shutdown, &mut backoff).await {
                Ok(()) => break,
                Err(e) => e,
            };

            let delay = backoff.next_delay();
            log::error!(
                "Broker consumer for '{}' lost ({}), reconnecting in {}s",
                self.queue,
                err,
                delay.as_secs_f64()
            );
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        log::info!("Broker consumer for '{}' stopped", self.queue);
    }

    /// One connection lifetime. `Ok` only when stopped by `shutdown`.
    async fn connect(&self, shutdown: &CancellationToken, backoff: &mut Backoff) -> AppResult<()> {
        let mut session = self.transport.open(&self.queue).await?;
        backoff.reset();
        log::info!("Attached to queue '{}'", self.queue);

        loop {
            let delivery = tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                delivery = session.next_delivery() => delivery?,
            };
            let Some(delivery) = delivery else {
                return Err(AppError::Broker(format!("consumer on '{}' was closed", self.queue)));
            };

            let body = String::from_utf8(delivery.body)
                .map_err(|e| AppError::Broker(format!("message {} is not UTF-8: {}", delivery.tag, e)))?;
            self.handler.handle(body).await?;
            session.ack(delivery.tag).await?;
        }
    }
}
