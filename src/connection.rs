// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Connection Lifecycle
//!
//! [`AmqpConnection`] owns the physical connection and the single multiplexed
//! channel shared by every publisher and listener built on it. Initializing
//! declares the shared exchange, so a live connection always implies a usable
//! topology root. There is no automatic reconnection: a dropped connection is
//! fatal for in-flight operations and callers re-initialize explicitly.

use crate::{
    config::AmqpConfig, errors::AmqpError, exchange::ExchangeDefinition, topology::AmqpTopology,
};
use lapin::{types::LongString, Channel, Connection, ConnectionProperties};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error};

struct Active {
    connection: Connection,
    channel: Arc<Channel>,
}

/// Owner of one broker connection, one channel and the shared exchange.
///
/// All operations take `&self`; the live state sits behind a mutex so
/// `initialize`/`close` serialize against handle lookups.
pub struct AmqpConnection {
    config: AmqpConfig,
    state: Mutex<Option<Active>>,
}

impl AmqpConnection {
    pub fn new(config: AmqpConfig) -> AmqpConnection {
        AmqpConnection {
            config,
            state: Mutex::new(None),
        }
    }

    /// Connects to the broker, opens the channel and declares the shared
    /// exchange (durable, configured kind).
    ///
    /// `name` labels the connection in the broker's client properties for
    /// observability. Calling this while already connected is a no-op.
    pub async fn initialize(&self, name: &str) -> Result<(), AmqpError> {
        let mut state = self.state.lock().await;

        if state.is_some() {
            debug!(connection = name, "connection already exists");
            return Ok(());
        }

        debug!(connection = name, "creating amqp connection...");
        let options =
            ConnectionProperties::default().with_connection_name(LongString::from(name));

        let connection = match Connection::connect(&self.config.uri, options).await {
            Ok(conn) => Ok(conn),
            Err(err) => {
                error!(error = err.to_string(), "failure to connect");
                Err(AmqpError::ConnectionError)
            }
        }?;

        // A dropped connection is fatal for in-flight operations; the
        // observer only logs, callers re-initialize explicitly.
        let label = name.to_owned();
        connection.on_error(move |err| {
            error!(
                error = err.to_string(),
                connection = %label,
                "connection error"
            );
        });
        debug!(connection = name, "amqp connected");

        let channel = match connection.create_channel().await {
            Ok(channel) => Ok(Arc::new(channel)),
            Err(err) => {
                error!(error = err.to_string(), "failure to create the channel");
                Err(AmqpError::ChannelError)
            }
        }?;
        debug!("channel created");

        AmqpTopology::new(channel.clone())
            .exchange(
                ExchangeDefinition::new(&self.config.exchange)
                    .kind(self.config.exchange_kind)
                    .durable(),
            )
            .install()
            .await?;
        debug!(exchange = %self.config.exchange, "exchange declared");

        *state = Some(Active {
            connection,
            channel,
        });

        Ok(())
    }

    /// Returns the shared channel, failing when the connection was never
    /// initialized or was closed.
    pub async fn channel(&self) -> Result<Arc<Channel>, AmqpError> {
        match self.state.lock().await.as_ref() {
            Some(active) => Ok(active.channel.clone()),
            None => Err(AmqpError::NotInitializedError),
        }
    }

    /// Returns the shared exchange name, failing before `initialize`.
    pub async fn exchange(&self) -> Result<String, AmqpError> {
        match self.state.lock().await.as_ref() {
            Some(_) => Ok(self.config.exchange.clone()),
            None => Err(AmqpError::NotInitializedError),
        }
    }

    /// Closes the channel, then the connection, and clears both handles.
    /// Safe to call on an already closed connection.
    pub async fn close(&self) -> Result<(), AmqpError> {
        let Some(active) = self.state.lock().await.take() else {
            return Ok(());
        };

        debug!("closing connection");

        if let Err(err) = active
            .channel
            .close(200, "closing")
            .await
        {
            error!(error = err.to_string(), "failure to close the channel");
        }

        if let Err(err) = active
            .connection
            .close(200, "closing")
            .await
        {
            error!(error = err.to_string(), "failure to close the connection");
        }

        debug!("connection closed");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection() -> AmqpConnection {
        AmqpConnection::new(AmqpConfig::new("amqp://localhost:5672", "events"))
    }

    #[tokio::test]
    async fn channel_fails_before_initialize() {
        let conn = connection();
        assert_eq!(
            conn.channel().await.unwrap_err(),
            AmqpError::NotInitializedError
        );
    }

    #[tokio::test]
    async fn exchange_fails_before_initialize() {
        let conn = connection();
        assert_eq!(
            conn.exchange().await.unwrap_err(),
            AmqpError::NotInitializedError
        );
    }

    #[tokio::test]
    async fn close_is_a_noop_when_never_initialized() {
        let conn = connection();
        assert_eq!(conn.close().await, Ok(()));
        // and stays uninitialized afterwards
        assert_eq!(
            conn.channel().await.unwrap_err(),
            AmqpError::NotInitializedError
        );
    }
}
