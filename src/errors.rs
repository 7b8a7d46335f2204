// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types
//!
//! Failure taxonomy for the messaging layer. Connection and topology errors
//! stop the affected component; handler outcomes are never represented here,
//! the retry state machine absorbs them (see [`crate::listener`]).

use thiserror::Error;

/// Errors surfaced by connection, topology, publish and consume operations.
///
/// Broker-level call failures are not retried internally; they propagate to
/// the caller of `initialize`/`send`/`listen`.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum AmqpError {
    /// Failure to establish a connection to the broker
    #[error("failure to connect")]
    ConnectionError,

    /// Failure to open a channel on an established connection
    #[error("failure to create a channel")]
    ChannelError,

    /// An operation was invoked before `initialize` completed
    #[error("connection has not been initialized")]
    NotInitializedError,

    /// Failure to declare an exchange with the given name
    #[error("failure to declare the exchange `{0}`")]
    DeclareExchangeError(String),

    /// Failure to declare a queue with the given name
    #[error("failure to declare the queue `{0}`")]
    DeclareQueueError(String),

    /// Failure to bind a queue to an exchange
    #[error("failure to bind the queue `{0}` to the exchange `{1}`")]
    BindingQueueError(String, String),

    /// Failure to configure the channel prefetch
    #[error("failure to configure qos `{0}`")]
    QoSDeclarationError(String),

    /// Failure to register a consumer on a queue
    #[error("failure to declare a consumer for the queue `{0}`")]
    ConsumerDeclarationError(String),

    /// Failure to publish a message
    #[error("failure to publish")]
    PublishingError,

    /// Failure to serialize or deserialize a payload
    #[error("failure to parse payload")]
    ParsePayloadError,

    /// Failure to acknowledge a delivery
    #[error("failure to ack message")]
    AckMessageError,

    /// Failure to republish a message for a retry attempt
    #[error("failure to requeue message")]
    RequeuingMessageError,

    /// Failure to park a message in its terminal dead-letter queue
    #[error("failure to publish to the dead-letter queue")]
    ParkMessageError,
}
