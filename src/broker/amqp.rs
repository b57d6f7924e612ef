//! Native AMQP transport built on `lapin`.

use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::options::{BasicAckOptions, BasicConsumeOptions, QueueDeclareOptions};
use lapin::protocol::{AMQPErrorKind, AMQPSoftError};
use lapin::types::FieldTable;
use lapin::{Channel, Connection, ConnectionProperties, Consumer};

use crate::broker::connection::{BrokerSession, BrokerTransport, Delivery};
use crate::core::error::{AppError, AppResult};

pub struct AmqpTransport {
    uri: String,
    consumer_tag: String,
}

impl AmqpTransport {
    pub fn new(uri: &str) -> Self {
        Self {
            uri: uri.to_string(),
            consumer_tag: format!("appealbot-{}", uuid::Uuid::new_v4()),
        }
    }
}

fn is_not_found(err: &lapin::Error) -> bool {
    matches!(
        err,
        lapin::Error::ProtocolError(amqp) if *amqp.kind() == AMQPErrorKind::Soft(AMQPSoftError::NOTFOUND)
    )
}

#[async_trait]
impl BrokerTransport for AmqpTransport {
    async fn open(&self, queue: &str) -> AppResult<Box<dyn BrokerSession>> {
        let connection = Connection::connect(&self.uri, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;

        // Passive: the queue must already exist
        let declare = QueueDeclareOptions {
            passive: true,
            ..QueueDeclareOptions::default()
        };
        if let Err(e) = channel.queue_declare(queue, declare, FieldTable::default()).await {
            return Err(if is_not_found(&e) {
                AppError::QueueMissing(queue.to_string())
            } else {
                e.into()
            });
        }

        let consumer = channel
            .basic_consume(
                queue,
                &self.consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        Ok(Box::new(AmqpSession {
            _connection: connection,
            channel,
            consumer,
        }))
    }
}

struct AmqpSession {
    // Dropping the connection closes the consumer
    _connection: Connection,
    channel: Channel,
    consumer: Consumer,
}

#[async_trait]
impl BrokerSession for AmqpSession {
    async fn next_delivery(&mut self) -> AppResult<Option<Delivery>> {
        match self.consumer.next().await {
            Some(Ok(delivery)) => Ok(Some(Delivery {
                tag: delivery.delivery_tag,
                body: delivery.data,
            })),
            Some(Err(e)) => Err(e.into()),
            None => Ok(None),
        }
    }

    async fn ack(&mut self, tag: u64) -> AppResult<()> {
        self.channel.basic_ack(tag, BasicAckOptions::default()).await?;
        Ok(())
    }
}
