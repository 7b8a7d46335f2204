// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Topology Installation
//!
//! Collects exchange, queue and binding definitions and asserts them on the
//! broker. Declarations are idempotent: re-installing a topology with
//! identical definitions never errors and never duplicates bindings, so every
//! listener installs its own triad on startup without coordination.

use crate::{
    errors::AmqpError,
    exchange::ExchangeDefinition,
    queue::{QueueBinding, QueueDefinition},
};
use lapin::{
    options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions},
    types::FieldTable,
    Channel,
};
use std::sync::Arc;
use tracing::{debug, error};

/// Accumulates definitions and installs them in order: exchanges, queues,
/// bindings.
pub struct AmqpTopology {
    channel: Arc<Channel>,
    exchanges: Vec<ExchangeDefinition>,
    queues: Vec<QueueDefinition>,
    bindings: Vec<QueueBinding>,
}

impl AmqpTopology {
    pub fn new(channel: Arc<Channel>) -> AmqpTopology {
        AmqpTopology {
            channel,
            exchanges: vec![],
            queues: vec![],
            bindings: vec![],
        }
    }

    /// Adds an exchange definition.
    pub fn exchange(mut self, def: ExchangeDefinition) -> Self {
        self.exchanges.push(def);
        self
    }

    /// Adds a queue definition.
    pub fn queue(mut self, def: QueueDefinition) -> Self {
        self.queues.push(def);
        self
    }

    /// Adds a queue-to-exchange binding.
    pub fn queue_binding(mut self, binding: QueueBinding) -> Self {
        self.bindings.push(binding);
        self
    }

    /// Asserts every collected definition on the broker.
    pub async fn install(&self) -> Result<(), AmqpError> {
        self.install_exchanges().await?;
        self.install_queues().await?;
        self.install_bindings().await
    }

    async fn install_exchanges(&self) -> Result<(), AmqpError> {
        for exch in &self.exchanges {
            debug!(exchange = %exch.name, "declaring exchange");

            match self
                .channel
                .exchange_declare(
                    &exch.name,
                    exch.kind.into(),
                    ExchangeDeclareOptions {
                        passive: false,
                        durable: exch.durable,
                        auto_delete: exch.delete,
                        internal: exch.internal,
                        nowait: false,
                    },
                    FieldTable::default(),
                )
                .await
            {
                Err(err) => {
                    error!(
                        error = err.to_string(),
                        exchange = %exch.name,
                        "failure to declare the exchange"
                    );
                    Err(AmqpError::DeclareExchangeError(exch.name.clone()))
                }
                _ => Ok(()),
            }?;
        }

        Ok(())
    }

    async fn install_queues(&self) -> Result<(), AmqpError> {
        for def in &self.queues {
            debug!(queue = %def.name, "declaring queue");

            match self
                .channel
                .queue_declare(
                    &def.name,
                    QueueDeclareOptions {
                        passive: false,
                        durable: def.durable,
                        exclusive: def.exclusive,
                        auto_delete: def.delete,
                        nowait: false,
                    },
                    def.arguments(),
                )
                .await
            {
                Err(err) => {
                    error!(
                        error = err.to_string(),
                        queue = %def.name,
                        "failure to declare the queue"
                    );
                    Err(AmqpError::DeclareQueueError(def.name.clone()))
                }
                _ => Ok(()),
            }?;
        }

        Ok(())
    }

    async fn install_bindings(&self) -> Result<(), AmqpError> {
        for binding in &self.bindings {
            debug!(
                queue = %binding.queue_name,
                exchange = %binding.exchange_name,
                routing_key = %binding.routing_key,
                "binding queue"
            );

            match self
                .channel
                .queue_bind(
                    &binding.queue_name,
                    &binding.exchange_name,
                    &binding.routing_key,
                    QueueBindOptions { nowait: false },
                    FieldTable::default(),
                )
                .await
            {
                Err(err) => {
                    error!(
                        error = err.to_string(),
                        "failure to bind the queue to the exchange"
                    );
                    Err(AmqpError::BindingQueueError(
                        binding.queue_name.clone(),
                        binding.exchange_name.clone(),
                    ))
                }
                _ => Ok(()),
            }?;
        }

        Ok(())
    }
}
