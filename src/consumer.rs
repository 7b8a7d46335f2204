// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Per-Delivery Retry State Machine
//!
//! One delivery moves through `DELIVERED -> PROCESSING -> {ACKED | REQUEUED |
//! DEAD_LETTERED}`. The delivery itself is always acked exactly once; a retry
//! or a terminal dead-letter rides on a new message this module publishes, so
//! the whole state machine stays observable through broker primitives and
//! redelivery storms cannot happen.
//!
//! Retries are delayed: a recoverable failure below the retry budget goes to
//! the `<queue>.retry` delay queue, whose per-message TTL dead-letters it
//! back into the main queue carrying the incremented `x-retry-count` header.
//! Exhausted or terminally rejected messages are sent straight to the
//! `<queue>.nack` parking queue through the default exchange.

use crate::{
    errors::AmqpError,
    handler::{ConsumerHandler, ConsumerOutcome},
    listener::{RetryPolicy, RetryRoute},
    otel,
};
use lapin::{
    message::Delivery,
    options::{BasicAckOptions, BasicPublishOptions},
    protocol::basic::AMQPProperties,
    types::{AMQPValue, FieldTable, ShortString},
    BasicProperties, Channel,
};
use opentelemetry::{
    global::BoxedTracer,
    trace::{Span, Status},
};
use serde::de::DeserializeOwned;
use std::{borrow::Cow, sync::Arc};
use tracing::{debug, error, warn};

/// Header carrying the number of attempts already consumed by a message
pub const AMQP_HEADERS_RETRY_COUNT: &str = "x-retry-count";

/// Next transition for a delivery, derived from the handler outcome, the
/// attempt counter and the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RetryStep {
    /// Ack only; the message leaves the main queue permanently.
    Complete,
    /// Republish onto the delay queue with the incremented counter, then ack.
    Redeliver { attempt: i64 },
    /// Send to the terminal dead-letter queue, then ack.
    Park,
}

pub(crate) fn next_step(
    outcome: ConsumerOutcome,
    attempt: i64,
    policy: &RetryPolicy,
) -> RetryStep {
    match outcome {
        ConsumerOutcome::Completed => RetryStep::Complete,
        ConsumerOutcome::Rejected => RetryStep::Park,
        ConsumerOutcome::Failed if attempt < i64::from(policy.max_retries) => {
            RetryStep::Redeliver {
                attempt: attempt + 1,
            }
        }
        ConsumerOutcome::Failed => RetryStep::Park,
    }
}

/// Reads the attempt counter from the delivery headers; absent or malformed
/// reads as zero.
pub(crate) fn retry_attempt(props: &AMQPProperties) -> i64 {
    let Some(headers) = props.headers() else {
        return 0;
    };

    match headers.inner().get(&ShortString::from(AMQP_HEADERS_RETRY_COUNT)) {
        Some(AMQPValue::LongLongInt(value)) => *value,
        Some(AMQPValue::LongInt(value)) => i64::from(*value),
        Some(AMQPValue::ShortInt(value)) => i64::from(*value),
        Some(AMQPValue::LongUInt(value)) => i64::from(*value),
        _ => 0,
    }
}

/// Clones the delivery properties with the counter set to `attempt` and
/// persistence enabled, for the republished retry message.
pub(crate) fn retry_properties(props: &AMQPProperties, attempt: i64) -> BasicProperties {
    let mut headers = match props.headers() {
        Some(table) => table.inner().clone(),
        None => Default::default(),
    };

    headers.insert(
        ShortString::from(AMQP_HEADERS_RETRY_COUNT),
        AMQPValue::LongLongInt(attempt),
    );

    props
        .clone()
        .with_headers(FieldTable::from(headers))
        .with_delivery_mode(2)
}

/// Deserializes the payload and runs the handler. A payload that cannot be
/// parsed is treated exactly like a recoverable handler failure so the
/// consume loop never dies on bad input.
pub(crate) async fn process_delivery<T>(
    handler: &dyn ConsumerHandler<T>,
    ctx: &opentelemetry::Context,
    body: &[u8],
) -> ConsumerOutcome
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    match serde_json::from_slice::<T>(body) {
        Ok(payload) => handler.handle(ctx, &payload).await,
        Err(err) => {
            warn!(error = err.to_string(), "failure to parse payload");
            ConsumerOutcome::Failed
        }
    }
}

/// Drives one delivery through the state machine.
///
/// Broker call failures (publish, ack) are not retried here; they surface to
/// the consume loop as [`AmqpError`] for that message's processing attempt.
pub(crate) async fn consume<T>(
    tracer: &BoxedTracer,
    delivery: &Delivery,
    route: &RetryRoute,
    policy: &RetryPolicy,
    handler: &dyn ConsumerHandler<T>,
    channel: Arc<Channel>,
) -> Result<(), AmqpError>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    let attempt = retry_attempt(&delivery.properties);
    let (ctx, mut span) = otel::consumer_span(&delivery.properties, tracer, &route.queue);

    debug!(queue = %route.queue, attempt, "delivery received");

    let outcome = process_delivery(handler, &ctx, &delivery.data).await;

    match next_step(outcome, attempt, policy) {
        RetryStep::Complete => {
            debug!(queue = %route.queue, "message successfully processed");
        }
        RetryStep::Redeliver { attempt } => {
            warn!(
                queue = %route.queue,
                attempt,
                "processing failed, scheduling retry"
            );

            if let Err(err) = channel
                .basic_publish(
                    &route.exchange,
                    &route.retry_queue,
                    BasicPublishOptions::default(),
                    &delivery.data,
                    retry_properties(&delivery.properties, attempt),
                )
                .await
            {
                error!(error = err.to_string(), "failure to requeue message");
                span.record_error(&err);
                span.set_status(Status::Error {
                    description: Cow::from("failure to requeue message"),
                });
                return Err(AmqpError::RequeuingMessageError);
            }
        }
        RetryStep::Park => {
            error!(
                queue = %route.queue,
                attempt,
                "retries exhausted, sending to the dead-letter queue"
            );

            if let Err(err) = channel
                .basic_publish(
                    "",
                    &route.nack_queue,
                    BasicPublishOptions::default(),
                    &delivery.data,
                    delivery.properties.clone().with_delivery_mode(2),
                )
                .await
            {
                error!(error = err.to_string(), "failure to park message");
                span.record_error(&err);
                span.set_status(Status::Error {
                    description: Cow::from("failure to park message"),
                });
                return Err(AmqpError::ParkMessageError);
            }
        }
    }

    match delivery.ack(BasicAckOptions { multiple: false }).await {
        Err(err) => {
            error!(error = err.to_string(), "failure to ack message");
            span.record_error(&err);
            span.set_status(Status::Error {
                description: Cow::from("failure to ack message"),
            });
            Err(AmqpError::AckMessageError)
        }
        _ => {
            span.set_status(Status::Ok);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::MockConsumerHandler;
    use lapin::types::LongLongInt;
    use serde_json::Value;
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new()
            .max_retries(max_retries)
            .retry_delay(Duration::from_millis(100))
    }

    fn props_with_attempt(attempt: i64) -> BasicProperties {
        let mut headers = BTreeMap::new();
        headers.insert(
            ShortString::from(AMQP_HEADERS_RETRY_COUNT),
            AMQPValue::LongLongInt(LongLongInt::from(attempt)),
        );
        BasicProperties::default().with_headers(FieldTable::from(headers))
    }

    #[test]
    fn success_always_completes() {
        assert_eq!(
            next_step(ConsumerOutcome::Completed, 0, &policy(3)),
            RetryStep::Complete
        );
        assert_eq!(
            next_step(ConsumerOutcome::Completed, 99, &policy(0)),
            RetryStep::Complete
        );
    }

    #[test]
    fn failure_redelivers_within_budget() {
        assert_eq!(
            next_step(ConsumerOutcome::Failed, 0, &policy(3)),
            RetryStep::Redeliver { attempt: 1 }
        );
        assert_eq!(
            next_step(ConsumerOutcome::Failed, 2, &policy(3)),
            RetryStep::Redeliver { attempt: 3 }
        );
    }

    #[test]
    fn failure_parks_when_budget_exhausted() {
        assert_eq!(next_step(ConsumerOutcome::Failed, 3, &policy(3)), RetryStep::Park);
        assert_eq!(next_step(ConsumerOutcome::Failed, 0, &policy(0)), RetryStep::Park);
    }

    #[test]
    fn rejection_parks_regardless_of_budget() {
        assert_eq!(
            next_step(ConsumerOutcome::Rejected, 0, &policy(10)),
            RetryStep::Park
        );
    }

    // An always-failing handler with max_retries = N is observed exactly
    // N + 1 times before the message becomes terminal.
    #[test]
    fn always_failing_message_is_observed_max_retries_plus_one_times() {
        let policy = policy(3);
        let mut observations = 0;
        let mut attempt = 0;

        loop {
            observations += 1;
            match next_step(ConsumerOutcome::Failed, attempt, &policy) {
                RetryStep::Redeliver { attempt: next } => attempt = next,
                RetryStep::Park => break,
                RetryStep::Complete => unreachable!(),
            }
        }

        assert_eq!(observations, 4);
    }

    #[test]
    fn attempt_defaults_to_zero_without_headers() {
        assert_eq!(retry_attempt(&BasicProperties::default()), 0);
    }

    #[test]
    fn attempt_defaults_to_zero_for_malformed_header() {
        let mut headers = BTreeMap::new();
        headers.insert(
            ShortString::from(AMQP_HEADERS_RETRY_COUNT),
            AMQPValue::LongString("two".into()),
        );
        let props = BasicProperties::default().with_headers(FieldTable::from(headers));
        assert_eq!(retry_attempt(&props), 0);
    }

    #[test]
    fn attempt_reads_the_counter_header() {
        assert_eq!(retry_attempt(&props_with_attempt(2)), 2);
    }

    #[test]
    fn retry_properties_round_trip_and_persist() {
        let props = retry_properties(&props_with_attempt(1), 2);
        assert_eq!(retry_attempt(&props), 2);
        assert_eq!(*props.delivery_mode(), Some(2));
    }

    #[test]
    fn retry_properties_keep_unrelated_headers() {
        let mut headers = BTreeMap::new();
        headers.insert(
            ShortString::from("traceparent"),
            AMQPValue::LongString("00-abc".into()),
        );
        let props = BasicProperties::default().with_headers(FieldTable::from(headers));

        let rewritten = retry_properties(&props, 1);
        let inner = rewritten.headers().as_ref().unwrap().inner();
        assert!(inner.contains_key(&ShortString::from("traceparent")));
        assert_eq!(retry_attempt(&rewritten), 1);
    }

    #[tokio::test]
    async fn valid_payload_reaches_the_handler() {
        let mut handler = MockConsumerHandler::<Value>::new();
        handler
            .expect_handle()
            .times(1)
            .returning(|_, _| ConsumerOutcome::Completed);

        let outcome = process_delivery(
            &handler,
            &opentelemetry::Context::new(),
            br#"{"data":"ok"}"#,
        )
        .await;
        assert_eq!(outcome, ConsumerOutcome::Completed);
    }

    #[tokio::test]
    async fn malformed_payload_fails_without_reaching_the_handler() {
        let mut handler = MockConsumerHandler::<Value>::new();
        handler.expect_handle().times(0);

        let outcome =
            process_delivery(&handler, &opentelemetry::Context::new(), b"not json").await;
        assert_eq!(outcome, ConsumerOutcome::Failed);
    }
}
