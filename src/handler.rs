// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Consumer Handlers
//!
//! The processing seam between the consume loop and application code. A
//! handler reports its outcome as an explicit three-way value instead of
//! throwing: the retry decision stays visible and testable without any
//! panic machinery, and nothing a handler returns ever escapes the loop.

use async_trait::async_trait;
use opentelemetry::Context;

/// Outcome of one processing attempt for one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerOutcome {
    /// Processing succeeded; the delivery is acked and leaves the main queue.
    Completed,
    /// Recoverable failure; the message re-enters the retry path while the
    /// retry budget lasts, then parks in the dead-letter queue.
    Failed,
    /// Terminal failure; the message parks in the dead-letter queue
    /// immediately, regardless of the remaining budget.
    Rejected,
}

/// Processes deserialized payloads of type `T`.
///
/// Implementations run on the consume loop one delivery at a time per
/// consumer (bounded by the channel prefetch), so they should not block.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConsumerHandler<T: Send + Sync + 'static>: Send + Sync {
    async fn handle(&self, ctx: &Context, message: &T) -> ConsumerOutcome;
}

/// Adapter turning a plain `Fn(&T) -> bool` into a handler.
///
/// `true` maps to [`ConsumerOutcome::Completed`], `false` to
/// [`ConsumerOutcome::Failed`]; suspending or terminal handlers implement
/// [`ConsumerHandler`] directly.
pub struct FnHandler<F> {
    callback: F,
}

impl<F> FnHandler<F> {
    pub fn new(callback: F) -> FnHandler<F> {
        FnHandler { callback }
    }
}

#[async_trait]
impl<T, F> ConsumerHandler<T> for FnHandler<F>
where
    T: Send + Sync + 'static,
    F: Fn(&T) -> bool + Send + Sync,
{
    async fn handle(&self, _ctx: &Context, message: &T) -> ConsumerOutcome {
        if (self.callback)(message) {
            ConsumerOutcome::Completed
        } else {
            ConsumerOutcome::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[tokio::test]
    async fn fn_handler_maps_true_to_completed() {
        let handler = FnHandler::new(|_: &Value| true);
        let outcome = handler
            .handle(&Context::new(), &serde_json::json!({"a": 1}))
            .await;
        assert_eq!(outcome, ConsumerOutcome::Completed);
    }

    #[tokio::test]
    async fn fn_handler_maps_false_to_failed() {
        let handler = FnHandler::new(|_: &Value| false);
        let outcome = handler
            .handle(&Context::new(), &serde_json::json!({"a": 1}))
            .await;
        assert_eq!(outcome, ConsumerOutcome::Failed);
    }
}
