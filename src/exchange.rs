// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Exchange Definitions
//!
//! Builder for exchange declarations. The retry topology uses a single
//! durable topic exchange; the builder still covers the other standard kinds
//! so the topology module stays reusable.

use serde::Deserialize;

/// The standard exchange kinds.
///
/// Routing behavior:
/// - `Direct`: exact routing-key match
/// - `Fanout`: broadcast to every bound queue
/// - `Topic`: wildcard pattern match on the routing key
/// - `Headers`: match on header values
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeKind {
    Direct,
    Fanout,
    #[default]
    Topic,
    Headers,
}

impl From<ExchangeKind> for lapin::ExchangeKind {
    fn from(kind: ExchangeKind) -> Self {
        match kind {
            ExchangeKind::Direct => lapin::ExchangeKind::Direct,
            ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
            ExchangeKind::Topic => lapin::ExchangeKind::Topic,
            ExchangeKind::Headers => lapin::ExchangeKind::Headers,
        }
    }
}

/// Definition of an exchange with its declaration parameters.
#[derive(Debug, Clone)]
pub struct ExchangeDefinition {
    pub(crate) name: String,
    pub(crate) kind: ExchangeKind,
    pub(crate) durable: bool,
    pub(crate) delete: bool,
    pub(crate) internal: bool,
}

impl ExchangeDefinition {
    /// Creates a new definition: a non-durable topic exchange by default.
    pub fn new(name: &str) -> ExchangeDefinition {
        ExchangeDefinition {
            name: name.to_owned(),
            kind: ExchangeKind::Topic,
            durable: false,
            delete: false,
            internal: false,
        }
    }

    /// Sets the exchange kind.
    pub fn kind(mut self, kind: ExchangeKind) -> Self {
        self.kind = kind;
        self
    }

    /// Makes the exchange survive broker restarts.
    pub fn durable(mut self) -> Self {
        self.durable = true;
        self
    }

    /// Auto-deletes the exchange when no longer used.
    pub fn delete(mut self) -> Self {
        self.delete = true;
        self
    }

    /// Makes the exchange internal, refusing direct publishes.
    pub fn internal(mut self) -> Self {
        self.internal = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_to_lapin_kind() {
        assert_eq!(
            lapin::ExchangeKind::from(ExchangeKind::Topic),
            lapin::ExchangeKind::Topic
        );
        assert_eq!(
            lapin::ExchangeKind::from(ExchangeKind::Direct),
            lapin::ExchangeKind::Direct
        );
    }

    #[test]
    fn builder_flags() {
        let def = ExchangeDefinition::new("events").durable();
        assert!(def.durable);
        assert!(!def.delete);
        assert_eq!(def.kind, ExchangeKind::Topic);
    }
}
