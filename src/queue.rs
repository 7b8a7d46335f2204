// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Queue Definitions
//!
//! Builders for queue declarations and queue-to-exchange bindings. The retry
//! topology is built from three of these per logical queue: the main queue,
//! its delay queue and its terminal dead-letter queue (see
//! [`crate::listener::RetryRoute`]).

use lapin::types::{AMQPValue, FieldTable, LongInt, LongString, ShortString};
use std::collections::BTreeMap;

/// Header field naming the dead-letter exchange of a queue
pub const AMQP_HEADERS_DEAD_LETTER_EXCHANGE: &str = "x-dead-letter-exchange";
/// Header field naming the dead-letter routing key of a queue
pub const AMQP_HEADERS_DEAD_LETTER_ROUTING_KEY: &str = "x-dead-letter-routing-key";
/// Header field for the per-message TTL of a queue
pub const AMQP_HEADERS_MESSAGE_TTL: &str = "x-message-ttl";
/// Header field for the maximum queue length
pub const AMQP_HEADERS_MAX_LENGTH: &str = "x-max-length";

/// Definition of a queue with its declaration parameters.
///
/// Re-declaring a queue with an identical definition is idempotent on the
/// broker side; the argument table produced by [`QueueDefinition::arguments`]
/// is deterministic so repeated installs assert the same arguments.
#[derive(Debug, Clone, Default)]
pub struct QueueDefinition {
    pub(crate) name: String,
    pub(crate) durable: bool,
    pub(crate) exclusive: bool,
    pub(crate) delete: bool,
    pub(crate) ttl: Option<i32>,
    pub(crate) max_length: Option<i32>,
    pub(crate) dead_letter_exchange: Option<String>,
    pub(crate) dead_letter_routing_key: Option<String>,
}

impl QueueDefinition {
    /// Creates a new definition with default settings.
    pub fn new(name: &str) -> QueueDefinition {
        QueueDefinition {
            name: name.to_owned(),
            ..QueueDefinition::default()
        }
    }

    /// Makes the queue survive broker restarts.
    pub fn durable(mut self) -> Self {
        self.durable = true;
        self
    }

    /// Makes the queue exclusive to the declaring connection.
    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    /// Auto-deletes the queue when the last consumer goes away.
    pub fn delete(mut self) -> Self {
        self.delete = true;
        self
    }

    /// Sets the per-message TTL in milliseconds. Expired messages follow the
    /// dead-letter route when one is configured, otherwise they are dropped.
    pub fn ttl(mut self, ttl: i32) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Caps the number of messages the queue holds.
    pub fn max_length(mut self, max: i32) -> Self {
        self.max_length = Some(max);
        self
    }

    /// Routes rejected, expired or overflowed messages to the given exchange
    /// under the given routing key.
    pub fn dead_letter_to(mut self, exchange: &str, routing_key: &str) -> Self {
        self.dead_letter_exchange = Some(exchange.to_owned());
        self.dead_letter_routing_key = Some(routing_key.to_owned());
        self
    }

    /// Builds the AMQP argument table for the declaration.
    pub(crate) fn arguments(&self) -> FieldTable {
        let mut args = BTreeMap::new();

        if let Some(exchange) = &self.dead_letter_exchange {
            args.insert(
                ShortString::from(AMQP_HEADERS_DEAD_LETTER_EXCHANGE),
                AMQPValue::LongString(LongString::from(exchange.clone())),
            );
        }

        if let Some(key) = &self.dead_letter_routing_key {
            args.insert(
                ShortString::from(AMQP_HEADERS_DEAD_LETTER_ROUTING_KEY),
                AMQPValue::LongString(LongString::from(key.clone())),
            );
        }

        if let Some(ttl) = self.ttl {
            args.insert(
                ShortString::from(AMQP_HEADERS_MESSAGE_TTL),
                AMQPValue::LongInt(LongInt::from(ttl)),
            );
        }

        if let Some(max) = self.max_length {
            args.insert(
                ShortString::from(AMQP_HEADERS_MAX_LENGTH),
                AMQPValue::LongInt(LongInt::from(max)),
            );
        }

        FieldTable::from(args)
    }
}

/// Binding of a queue to an exchange under a routing key.
#[derive(Debug, Clone)]
pub struct QueueBinding {
    pub(crate) queue_name: String,
    pub(crate) exchange_name: String,
    pub(crate) routing_key: String,
}

impl QueueBinding {
    /// Creates a binding for the given queue; exchange and routing key are
    /// set with the builder methods.
    pub fn new(queue: &str) -> QueueBinding {
        QueueBinding {
            queue_name: queue.to_owned(),
            exchange_name: String::new(),
            routing_key: String::new(),
        }
    }

    /// Sets the exchange to bind to.
    pub fn exchange(mut self, exchange: &str) -> Self {
        self.exchange_name = exchange.to_owned();
        self
    }

    /// Sets the routing key of the binding.
    pub fn routing_key(mut self, key: &str) -> Self {
        self.routing_key = key.to_owned();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arguments_carry_dead_letter_route_and_ttl() {
        let def = QueueDefinition::new("orders.retry")
            .durable()
            .ttl(60_000)
            .dead_letter_to("events", "orders");

        let args = def.arguments();
        let inner = args.inner();

        assert_eq!(
            inner.get(&ShortString::from(AMQP_HEADERS_DEAD_LETTER_EXCHANGE)),
            Some(&AMQPValue::LongString(LongString::from("events")))
        );
        assert_eq!(
            inner.get(&ShortString::from(AMQP_HEADERS_DEAD_LETTER_ROUTING_KEY)),
            Some(&AMQPValue::LongString(LongString::from("orders")))
        );
        assert_eq!(
            inner.get(&ShortString::from(AMQP_HEADERS_MESSAGE_TTL)),
            Some(&AMQPValue::LongInt(60_000))
        );
    }

    #[test]
    fn plain_queue_has_no_arguments() {
        let args = QueueDefinition::new("orders.nack").durable().arguments();
        assert!(args.inner().is_empty());
    }

    #[test]
    fn identical_definitions_produce_identical_arguments() {
        let build = || {
            QueueDefinition::new("q")
                .durable()
                .ttl(1000)
                .dead_letter_to("ex", "q.nack")
                .arguments()
        };
        assert_eq!(format!("{:?}", build()), format!("{:?}", build()));
    }
}
