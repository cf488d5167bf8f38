//! Best-effort mobile push notifications

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::{json, Value};

/// Provider limit on messages per request
const CHUNK_SIZE: usize = 100;

pub const EXPO_PUSH_URL: &str = "https://exp.host/--/api/v2/push/send";

#[derive(Debug, Clone, PartialEq)]
pub struct PushMessage {
    pub tokens: Vec<String>,
    pub title: String,
    pub body: String,
    pub data: Value,
}

impl PushMessage {
    pub fn new(
        tokens: impl IntoIterator<Item = String>,
        title: impl Into<String>,
        body: impl Into<String>,
        data: Value,
    ) -> Self {
        Self {
            tokens: tokens.into_iter().filter(|t| !t.is_empty()).collect(),
            title: title.into(),
            body: body.into(),
            data,
        }
    }
}

/// Push delivery. Failures are logged by the implementation and never reported.
#[async_trait]
pub trait PushSender: Send + Sync {
    async fn send(&self, message: PushMessage);
}

pub struct NoopPushSender;

#[async_trait]
impl PushSender for NoopPushSender {
    async fn send(&self, message: PushMessage) {
        tracing::debug!(
            recipients = message.tokens.len(),
            title = %message.title,
            "Push disabled, dropping notification"
        );
    }
}

#[derive(Debug, Serialize)]
struct ExpoMessage<'a> {
    to: &'a str,
    sound: &'static str,
    title: &'a str,
    body: &'a str,
    data: &'a Value,
    priority: &'static str,
}

/// Expo push API client
pub struct ExpoPushSender {
    client: Client,
    url: String,
}

impl ExpoPushSender {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| Client::new()),
            url: url.into(),
        }
    }
}

#[async_trait]
impl PushSender for ExpoPushSender {
    async fn send(&self, message: PushMessage) {
        if message.tokens.is_empty() {
            return;
        }

        let payload: Vec<ExpoMessage<'_>> = message
            .tokens
            .iter()
            .map(|token| ExpoMessage {
                to: token,
                sound: "default",
                title: &message.title,
                body: &message.body,
                data: &message.data,
                priority: "high",
            })
            .collect();

        for chunk in payload.chunks(CHUNK_SIZE) {
            let result = self
                .client
                .post(&self.url)
                .header("Accept", "application/json")
                .json(&chunk)
                .send()
                .await
                .and_then(|resp| resp.error_for_status());

            match result {
                Ok(_) => tracing::debug!(
                    recipients = chunk.len(),
                    title = %message.title,
                    "Push notification sent"
                ),
                Err(e) => tracing::error!(
                    recipients = chunk.len(),
                    error = %e,
                    "Push notification failed"
                ),
            }
        }
    }
}

/// Data payload for a booking push
pub fn booking_data(kind: &str, booking_id: &str) -> Value {
    json!({ "type": kind, "bookingId": booking_id })
}
