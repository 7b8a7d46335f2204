// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Publisher
//!
//! Serializes a payload, attaches a fresh unique message identity and
//! publishes it to the shared exchange under the target queue's routing key.
//! Persistence is on by default. The returned receipt reflects channel
//! acceptance of the write; there is no publisher-confirm handshake and no
//! local buffering or retry of the send itself.

use crate::{connection::AmqpConnection, errors::AmqpError, otel};
use lapin::{
    options::BasicPublishOptions,
    types::{AMQPValue, FieldTable, ShortString},
    BasicProperties,
};
use serde::Serialize;
use std::{
    collections::BTreeMap,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};
use tracing::{debug, error};
use uuid::Uuid;

/// Content type attached to every published message
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Result of a publish call: whether the channel accepted the write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishReceipt {
    pub sent: bool,
}

/// Publishes payloads to one logical queue through the shared exchange.
pub struct Publisher {
    connection: Arc<AmqpConnection>,
    queue: String,
    persistent: bool,
}

impl Publisher {
    /// Creates a publisher for the given queue, persistent by default.
    pub fn new(connection: Arc<AmqpConnection>, queue: &str) -> Publisher {
        Publisher {
            connection,
            queue: queue.to_owned(),
            persistent: true,
        }
    }

    /// Opts out of persistent delivery.
    pub fn transient(mut self) -> Self {
        self.persistent = false;
        self
    }

    /// Serializes `payload` and publishes it with a fresh message id.
    ///
    /// Fails with [`AmqpError::NotInitializedError`] before the connection is
    /// initialized and with [`AmqpError::PublishingError`] when the channel
    /// rejects the write.
    pub async fn send<T: Serialize + Sync>(
        &self,
        payload: &T,
    ) -> Result<PublishReceipt, AmqpError> {
        let channel = self.connection.channel().await?;
        let exchange = self.connection.exchange().await?;

        let body = match serde_json::to_vec(payload) {
            Ok(body) => Ok(body),
            Err(err) => {
                error!(error = err.to_string(), "failure to serialize the payload");
                Err(AmqpError::ParsePayloadError)
            }
        }?;

        let mut headers = BTreeMap::<ShortString, AMQPValue>::default();
        otel::inject_current_context(&mut headers);

        let delivery_mode: u8 = if self.persistent { 2 } else { 1 };

        match channel
            .basic_publish(
                &exchange,
                &self.queue,
                BasicPublishOptions {
                    immediate: false,
                    mandatory: false,
                },
                &body,
                BasicProperties::default()
                    .with_content_type(ShortString::from(JSON_CONTENT_TYPE))
                    .with_message_id(ShortString::from(unique_message_id()))
                    .with_delivery_mode(delivery_mode)
                    .with_headers(FieldTable::from(headers)),
            )
            .await
        {
            Err(err) => {
                error!(
                    error = err.to_string(),
                    queue = %self.queue,
                    "error publishing message"
                );
                Err(AmqpError::PublishingError)
            }
            _ => {
                debug!(queue = %self.queue, bytes = body.len(), "message sent");
                Ok(PublishReceipt { sent: true })
            }
        }
    }
}

/// Generates a message identity: unix-millisecond timestamp plus a random
/// suffix. Monotonically informative and collision-resistant for tracing and
/// dedup, not for protocol correctness.
pub(crate) fn unique_message_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let suffix = Uuid::new_v4().simple().to_string();

    format!("{}-{}", millis, &suffix[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_ids_are_unique() {
        let ids: Vec<String> = (0..64).map(|_| unique_message_id()).collect();
        let mut deduped = ids.clone();
        deduped.sort();
        deduped.dedup();
        assert_eq!(deduped.len(), ids.len());
    }

    #[test]
    fn message_id_is_timestamp_prefixed() {
        let id = unique_message_id();
        let (prefix, suffix) = id.split_once('-').unwrap();
        assert!(prefix.parse::<u128>().is_ok());
        assert_eq!(suffix.len(), 8);
    }

    #[tokio::test]
    async fn send_fails_before_initialize() {
        let connection = Arc::new(crate::connection::AmqpConnection::new(
            crate::config::AmqpConfig::new("amqp://localhost:5672", "events"),
        ));
        let publisher = Publisher::new(connection, "orders");

        let err = publisher.send(&serde_json::json!({"a": 1})).await;
        assert_eq!(err, Err(AmqpError::NotInitializedError));
    }
}
