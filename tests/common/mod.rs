//! Common test utilities
//!
//! This module is shared across all integration tests

#![allow(dead_code)]

use appealbot::broker::{BrokerClient, BrokerMessage};
use appealbot::core::AppResult;
use async_trait::async_trait;
use serde_json::json;
use std::collections::VecDeque;
use tokio::sync::Mutex;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Telegraph and a photo CDN on one mock server.
///
/// Serves `/photos/a.jpg`, answers `/upload` with a stable file path and
/// `createPage` with a fixed page URL.
pub async fn telegraph_and_cdn() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/photos/.+$"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"\xff\xd8\xff\xe0jpeg".to_vec()))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/upload"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"src": "/file/evidence.jpg"}])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/createPage"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"ok": true, "result": {"url": "https://telegra.ph/Evidence-10-19"}})),
        )
        .mount(&server)
        .await;
    server
}

/// Broker double: appeal publishes land in one queue, the rest is recorded.
#[derive(Default)]
pub struct RecordingBroker {
    pub queue: Mutex<VecDeque<BrokerMessage>>,
    pub sent: Mutex<Vec<(String, String, BrokerMessage)>>,
}

#[async_trait]
impl BrokerClient for RecordingBroker {
    async fn publish(&self, exchange: &str, routing_key: &str, message: &BrokerMessage) -> AppResult<()> {
        if exchange == appealbot::config::broker::APPEAL_EXCHANGE {
            self.queue.lock().await.push_back(message.clone());
        } else {
            self.sent
                .lock()
                .await
                .push((exchange.to_string(), routing_key.to_string(), message.clone()));
        }
        Ok(())
    }

    async fn pull(&self, _queue: &str) -> AppResult<Option<BrokerMessage>> {
        Ok(self.queue.lock().await.pop_front())
    }
}
