// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Queue Listener
//!
//! Binds a logical queue together with its delay and dead-letter companions,
//! registers a manually-acked consumer and drives every delivery through the
//! retry state machine in [`crate::consumer`].
//!
//! The topology triad installed per `listen` call, for a queue `Q` on the
//! shared exchange `E`:
//!
//! - `Q` — durable, dead-letters to `E`/`Q.nack`; bound to `E` under `Q`
//! - `Q.retry` — durable, per-message TTL = retry delay, dead-letters back to
//!   `E`/`Q`; bound to `E` under `Q.retry`
//! - `Q.nack` — durable, terminal; bound to `E` under `Q.nack`

use crate::{
    connection::AmqpConnection,
    consumer::consume,
    errors::AmqpError,
    handler::ConsumerHandler,
    queue::{QueueBinding, QueueDefinition},
    topology::AmqpTopology,
};
use futures_util::StreamExt;
use lapin::{
    options::{BasicConsumeOptions, BasicQosOptions},
    types::FieldTable,
};
use opentelemetry::global;
use serde::de::DeserializeOwned;
use std::{sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Retry budget and delay for one listener. Immutable once `listen` starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub(crate) max_retries: u32,
    pub(crate) retry_delay: Duration,
}

impl Default for RetryPolicy {
    /// No retries, 60 second delay.
    fn default() -> Self {
        RetryPolicy {
            max_retries: 0,
            retry_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn new() -> RetryPolicy {
        RetryPolicy::default()
    }

    /// Number of redeliveries after the initial attempt.
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Time a failed message waits in the delay queue before redelivery.
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }
}

/// Names of the queue triad and the exchange they route through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RetryRoute {
    pub(crate) queue: String,
    pub(crate) retry_queue: String,
    pub(crate) nack_queue: String,
    pub(crate) exchange: String,
}

impl RetryRoute {
    pub(crate) fn new(queue: &str, exchange: &str) -> RetryRoute {
        RetryRoute {
            queue: queue.to_owned(),
            retry_queue: format!("{queue}.retry"),
            nack_queue: format!("{queue}.nack"),
            exchange: exchange.to_owned(),
        }
    }
}

/// Consumes one logical queue with bounded retries and dead-letter routing.
pub struct Listener {
    connection: Arc<AmqpConnection>,
    queue: String,
    policy: RetryPolicy,
    prefetch: u16,
}

impl Listener {
    /// Creates a listener with the default policy (no retries) and a
    /// prefetch of one unacknowledged delivery.
    pub fn new(connection: Arc<AmqpConnection>, queue: &str) -> Listener {
        Listener {
            connection,
            queue: queue.to_owned(),
            policy: RetryPolicy::default(),
            prefetch: 1,
        }
    }

    /// Sets the retry policy.
    pub fn policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets the number of unacknowledged deliveries the broker pushes at
    /// once.
    pub fn prefetch(mut self, count: u16) -> Self {
        self.prefetch = count;
        self
    }

    /// Installs the queue triad, registers the consumer and spawns the
    /// consume loop.
    ///
    /// The returned handle resolves when the consumer stream ends, which
    /// happens when the connection is closed; in-flight deliveries then
    /// surface ack/publish errors and are redelivered by the broker.
    pub async fn listen<T>(
        &self,
        handler: Arc<dyn ConsumerHandler<T>>,
    ) -> Result<JoinHandle<()>, AmqpError>
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        let channel = self.connection.channel().await?;
        let exchange = self.connection.exchange().await?;

        let route = RetryRoute::new(&self.queue, &exchange);
        let delay_ms = self.policy.retry_delay.as_millis().min(i32::MAX as u128) as i32;

        AmqpTopology::new(channel.clone())
            .queue(
                QueueDefinition::new(&route.retry_queue)
                    .durable()
                    .ttl(delay_ms)
                    .dead_letter_to(&route.exchange, &route.queue),
            )
            .queue(QueueDefinition::new(&route.nack_queue).durable())
            .queue(
                QueueDefinition::new(&route.queue)
                    .durable()
                    .dead_letter_to(&route.exchange, &route.nack_queue),
            )
            .queue_binding(
                QueueBinding::new(&route.retry_queue)
                    .exchange(&route.exchange)
                    .routing_key(&route.retry_queue),
            )
            .queue_binding(
                QueueBinding::new(&route.nack_queue)
                    .exchange(&route.exchange)
                    .routing_key(&route.nack_queue),
            )
            .queue_binding(
                QueueBinding::new(&route.queue)
                    .exchange(&route.exchange)
                    .routing_key(&route.queue),
            )
            .install()
            .await?;

        if let Err(err) = channel
            .basic_qos(self.prefetch, BasicQosOptions::default())
            .await
        {
            error!(error = err.to_string(), "failure to configure qos");
            return Err(AmqpError::QoSDeclarationError(err.to_string()));
        }

        let mut consumer = match channel
            .basic_consume(
                &self.queue,
                &format!("{}.consumer", self.queue),
                BasicConsumeOptions {
                    no_local: false,
                    no_ack: false,
                    exclusive: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
        {
            Ok(consumer) => Ok(consumer),
            Err(err) => {
                error!(error = err.to_string(), "failure to create the consumer");
                Err(AmqpError::ConsumerDeclarationError(self.queue.clone()))
            }
        }?;

        debug!(queue = %self.queue, "queue bound, consuming");

        let policy = self.policy.clone();
        let task_channel = channel.clone();

        let handle = tokio::spawn(async move {
            let tracer = global::tracer("amqp consumer");

            while let Some(result) = consumer.next().await {
                match result {
                    Ok(delivery) => {
                        if let Err(err) = consume(
                            &tracer,
                            &delivery,
                            &route,
                            &policy,
                            handler.as_ref(),
                            task_channel.clone(),
                        )
                        .await
                        {
                            error!(error = err.to_string(), "error consuming message");
                        }
                    }
                    Err(err) => error!(error = err.to_string(), "error receiving delivery"),
                }
            }

            debug!(queue = %route.queue, "consumer stream closed");
        });

        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_defaults_to_no_retries_after_a_minute() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 0);
        assert_eq!(policy.retry_delay, Duration::from_secs(60));
    }

    #[test]
    fn policy_builder_overrides_defaults() {
        let policy = RetryPolicy::new()
            .max_retries(3)
            .retry_delay(Duration::from_millis(500));
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.retry_delay, Duration::from_millis(500));
    }

    #[test]
    fn route_derives_companion_queue_names() {
        let route = RetryRoute::new("orders", "events");
        assert_eq!(route.queue, "orders");
        assert_eq!(route.retry_queue, "orders.retry");
        assert_eq!(route.nack_queue, "orders.nack");
        assert_eq!(route.exchange, "events");
    }

    #[tokio::test]
    async fn listen_fails_before_initialize() {
        use crate::handler::FnHandler;

        let connection = Arc::new(AmqpConnection::new(crate::config::AmqpConfig::new(
            "amqp://localhost:5672",
            "events",
        )));
        let listener = Listener::new(connection, "orders");

        let handler: Arc<dyn ConsumerHandler<serde_json::Value>> =
            Arc::new(FnHandler::new(|_: &serde_json::Value| true));
        let err = listener.listen(handler).await.err();
        assert_eq!(err, Some(AmqpError::NotInitializedError));
    }
}
