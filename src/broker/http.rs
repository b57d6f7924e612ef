//! Publish/pull over the broker management HTTP API.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::broker::message::BrokerMessage;
use crate::core::config;
use crate::core::error::{AppError, AppResult};

/// Outbound side of the broker used by the relay and executors.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    async fn publish(&self, exchange: &str, routing_key: &str, message: &BrokerMessage) -> AppResult<()>;

    /// Takes at most one message off `queue`. `None` if the queue is empty.
    async fn pull(&self, queue: &str) -> AppResult<Option<BrokerMessage>>;
}

#[derive(Debug, Serialize)]
struct PublishRequest<'a> {
    properties: serde_json::Map<String, serde_json::Value>,
    routing_key: &'a str,
    payload: String,
    payload_encoding: &'static str,
}

#[derive(Debug, Deserialize)]
struct PublishResponse {
    routed: bool,
}

#[derive(Debug, Serialize)]
struct GetRequest {
    count: u32,
    ackmode: &'static str,
    encoding: &'static str,
}

#[derive(Debug, Deserialize)]
struct GetResponseItem {
    payload: String,
    #[serde(default)]
    payload_encoding: String,
}

pub struct HttpBroker {
    http: Client,
    base_url: String,
    vhost: String,
    user: String,
    password: String,
}

impl HttpBroker {
    pub fn new(base_url: &str, vhost: &str, user: &str, password: &str) -> AppResult<Self> {
        let http = Client::builder()
            .connect_timeout(config::network::connect_timeout())
            .timeout(config::network::timeout())
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            vhost: vhost.to_string(),
            user: user.to_string(),
            password: password.to_string(),
        })
    }

    /// Client configured from `BROKER_*` environment variables.
    pub fn from_env() -> AppResult<Self> {
        Self::new(
            &config::BROKER_HTTP_URL,
            &config::BROKER_VHOST,
            &config::BROKER_USER,
            &config::BROKER_PASSWORD,
        )
    }

    fn endpoint(&self, kind: &str, name: &str, action: &str) -> String {
        format!(
            "{}/api/{}/{}/{}/{}",
            self.base_url,
            kind,
            urlencoding::encode(&self.vhost),
            urlencoding::encode(name),
            action
        )
    }
}

#[async_trait]
impl BrokerClient for HttpBroker {
    async fn publish(&self, exchange: &str, routing_key: &str, message: &BrokerMessage) -> AppResult<()> {
        let request = PublishRequest {
            properties: serde_json::Map::new(),
            routing_key,
            payload: message.to_json()?,
            payload_encoding: "string",
        };
        let response = self
            .http
            .post(self.endpoint("exchanges", exchange, "publish"))
            .basic_auth(&self.user, Some(&self.password))
            .json(&request)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(AppError::HttpStatus(response.status()));
        }

        let published: PublishResponse = response.json().await?;
        if !published.routed {
            return Err(AppError::Broker(format!(
                "'{}' to {}/{} was not routed",
                message.kind(),
                exchange,
                routing_key
            )));
        }
        log::debug!("Published '{}' to {}/{}", message.kind(), exchange, routing_key);
        Ok(())
    }

    async fn pull(&self, queue: &str) -> AppResult<Option<BrokerMessage>> {
        let request = GetRequest {
            count: 1,
            ackmode: "ack_requeue_false",
            encoding: "auto",
        };
        let response = self
            .http
            .post(self.endpoint("queues", queue, "get"))
            .basic_auth(&self.user, Some(&self.password))
            .json(&request)
            .send()
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND => return Err(AppError::QueueMissing(queue.to_string())),
            status if !status.is_success() => return Err(AppError::HttpStatus(status)),
            _ => {}
        }

        let items: Vec<GetResponseItem> = response.json().await?;
        let Some(item) = items.into_iter().next() else {
            return Ok(None);
        };
        if item.payload_encoding == "base64" {
            return Err(AppError::Broker(format!("binary message pulled from '{}'", queue)));
        }
        BrokerMessage::from_json(&item.payload).map(Some)
    }
}
