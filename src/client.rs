// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Facade
//!
//! Thin composition of the connection manager, publishers and listeners
//! behind one entry point:
//!
//! ```no_run
//! use std::{sync::Arc, time::Duration};
//! use usagi::{
//!     client::Usagi,
//!     config::AmqpConfig,
//!     handler::{ConsumerHandler, FnHandler},
//!     listener::RetryPolicy,
//! };
//!
//! # async fn run() -> Result<(), usagi::errors::AmqpError> {
//! let bus = Usagi::new(AmqpConfig::new("amqp://localhost:5672", "events"));
//! bus.initialize("orders-service").await?;
//!
//! let handler: Arc<dyn ConsumerHandler<serde_json::Value>> =
//!     Arc::new(FnHandler::new(|order: &serde_json::Value| {
//!         order.get("data").is_some()
//!     }));
//!
//! let _consumer = bus
//!     .queue("orders")
//!     .policy(
//!         RetryPolicy::new()
//!             .max_retries(3)
//!             .retry_delay(Duration::from_secs(5)),
//!     )
//!     .listen(handler)
//!     .await?;
//!
//! bus.publish("orders", &serde_json::json!({"data": "ok"})).await?;
//! bus.close().await?;
//! # Ok(())
//! # }
//! ```

use crate::{
    config::AmqpConfig,
    connection::AmqpConnection,
    errors::AmqpError,
    listener::Listener,
    publisher::{PublishReceipt, Publisher},
};
use serde::Serialize;
use std::sync::Arc;

/// Entry point composing one connection with publishers and listeners.
pub struct Usagi {
    connection: Arc<AmqpConnection>,
}

impl Usagi {
    pub fn new(config: AmqpConfig) -> Usagi {
        Usagi {
            connection: Arc::new(AmqpConnection::new(config)),
        }
    }

    /// Connects and declares the shared exchange; a no-op when already
    /// connected.
    pub async fn initialize(&self, name: &str) -> Result<(), AmqpError> {
        self.connection.initialize(name).await
    }

    /// Creates a publisher bound to `queue`.
    pub fn publisher(&self, queue: &str) -> Publisher {
        Publisher::new(self.connection.clone(), queue)
    }

    /// Publishes one payload to `queue` with the default publisher options.
    pub async fn publish<T: Serialize + Sync>(
        &self,
        queue: &str,
        payload: &T,
    ) -> Result<PublishReceipt, AmqpError> {
        self.publisher(queue).send(payload).await
    }

    /// Creates a listener for `queue`; configure it fluently and call
    /// `listen`.
    pub fn queue(&self, name: &str) -> Listener {
        Listener::new(self.connection.clone(), name)
    }

    /// The underlying connection manager, for callers that need raw channel
    /// access (inspection, custom topology).
    pub fn connection(&self) -> Arc<AmqpConnection> {
        self.connection.clone()
    }

    /// Tears down the channel and the connection. Listeners observe the
    /// closed consumer stream and stop.
    pub async fn close(&self) -> Result<(), AmqpError> {
        self.connection.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_fails_before_initialize() {
        let bus = Usagi::new(AmqpConfig::new("amqp://localhost:5672", "events"));
        let err = bus.publish("orders", &serde_json::json!({"a": 1})).await;
        assert_eq!(err, Err(AmqpError::NotInitializedError));
    }

    #[tokio::test]
    async fn close_before_initialize_is_a_noop() {
        let bus = Usagi::new(AmqpConfig::new("amqp://localhost:5672", "events"));
        assert_eq!(bus.close().await, Ok(()));
    }
}
