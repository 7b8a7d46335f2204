// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Trace-context propagation through AMQP message headers: the publisher
//! injects the current context, the consumer extracts it and opens a span
//! per delivery.

use lapin::{
    protocol::basic::AMQPProperties,
    types::{AMQPValue, ShortString},
};
use opentelemetry::{
    global::{BoxedSpan, BoxedTracer},
    propagation::{Extractor, Injector},
    trace::{SpanKind, Tracer},
    Context,
};
use std::{borrow::Cow, collections::BTreeMap};
use tracing::error;

/// Adapter mapping the OpenTelemetry carrier interface onto an AMQP header
/// table.
pub(crate) struct AmqpTracePropagator<'a> {
    headers: &'a mut BTreeMap<ShortString, AMQPValue>,
}

impl<'a> AmqpTracePropagator<'a> {
    pub(crate) fn new(headers: &'a mut BTreeMap<ShortString, AMQPValue>) -> Self {
        Self { headers }
    }
}

impl Injector for AmqpTracePropagator<'_> {
    fn set(&mut self, key: &str, value: String) {
        self.headers.insert(
            key.to_lowercase().into(),
            AMQPValue::LongString(value.into()),
        );
    }
}

impl Extractor for AmqpTracePropagator<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.headers.get(&ShortString::from(key)).and_then(|value| {
            if let AMQPValue::LongString(value) = value {
                std::str::from_utf8(value.as_bytes())
                    .map_err(|err| error!(error = err.to_string(), "invalid trace header"))
                    .ok()
            } else {
                None
            }
        })
    }

    fn keys(&self) -> Vec<&str> {
        self.headers.keys().map(|header| header.as_str()).collect()
    }
}

/// Injects the current trace context into an outgoing header table.
pub(crate) fn inject_current_context(headers: &mut BTreeMap<ShortString, AMQPValue>) {
    let ctx = Context::current();
    opentelemetry::global::get_text_map_propagator(|propagator| {
        propagator.inject_context(&ctx, &mut AmqpTracePropagator::new(headers))
    });
}

/// Extracts the upstream context from delivery properties and starts a
/// consumer span under it.
pub(crate) fn consumer_span(
    props: &AMQPProperties,
    tracer: &BoxedTracer,
    name: &str,
) -> (Context, BoxedSpan) {
    let ctx = opentelemetry::global::get_text_map_propagator(|propagator| {
        propagator.extract(&AmqpTracePropagator::new(
            &mut props.headers().clone().unwrap_or_default().inner().clone(),
        ))
    });

    let span = tracer
        .span_builder(Cow::from(name.to_owned()))
        .with_kind(SpanKind::Consumer)
        .start_with_context(tracer, &ctx);

    (ctx, span)
}
