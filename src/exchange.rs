// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Exchange Definitions
//!
//! This module provides the types used to describe an exchange before it is
//! declared on the broker. Exchanges are the routing entities that receive
//! published messages and forward them to bound queues.

use crate::errors::AmqpError;
use lapin::types::{AMQPValue, ShortString};
use serde::Deserialize;
use std::{collections::BTreeMap, fmt, str::FromStr};

/// Routing rule of an exchange. `direct` matches the routing key exactly,
/// `fanout` ignores it, `topic` matches it against dotted patterns and
/// `headers` routes on header values.
///
/// Names are matched case-insensitively, both when parsed and when read
/// from configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum ExchangeKind {
    #[default]
    Direct,
    Fanout,
    Topic,
    Headers,
}

impl ExchangeKind {
    /// The type name used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeKind::Direct => "direct",
            ExchangeKind::Fanout => "fanout",
            ExchangeKind::Topic => "topic",
            ExchangeKind::Headers => "headers",
        }
    }
}

impl fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExchangeKind {
    type Err = AmqpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "direct" => Ok(ExchangeKind::Direct),
            "fanout" => Ok(ExchangeKind::Fanout),
            "topic" => Ok(ExchangeKind::Topic),
            "headers" => Ok(ExchangeKind::Headers),
            _ => Err(AmqpError::InvalidExchangeKind(s.to_owned())),
        }
    }
}

impl TryFrom<String> for ExchangeKind {
    type Error = AmqpError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
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
///
/// Built with chained setters; every flag starts out `false` and the kind
/// starts out as `Direct`.
#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeDefinition {
    pub(crate) name: String,
    pub(crate) kind: ExchangeKind,
    pub(crate) delete: bool,
    pub(crate) durable: bool,
    pub(crate) passive: bool,
    pub(crate) internal: bool,
    pub(crate) no_wait: bool,
    pub(crate) arguments: BTreeMap<ShortString, AMQPValue>,
}

impl ExchangeDefinition {
    /// Creates a new direct exchange definition with the given name.
    pub fn new(name: &str) -> ExchangeDefinition {
        ExchangeDefinition {
            name: name.to_owned(),
            kind: ExchangeKind::Direct,
            delete: false,
            durable: false,
            passive: false,
            internal: false,
            no_wait: false,
            arguments: BTreeMap::default(),
        }
    }

    /// Exchange name as declared on the broker.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Routing rule of the exchange.
    pub fn exchange_kind(&self) -> ExchangeKind {
        self.kind
    }

    /// Whether the exchange survives a broker restart.
    pub fn is_durable(&self) -> bool {
        self.durable
    }

    /// Whether the broker removes the exchange once it is unused.
    pub fn is_auto_delete(&self) -> bool {
        self.delete
    }

    /// Whether the declaration only checks for existence.
    pub fn is_passive(&self) -> bool {
        self.passive
    }

    /// Whether publishers are refused direct access.
    pub fn is_internal(&self) -> bool {
        self.internal
    }

    /// Whether the declaration is sent without waiting for a reply.
    pub fn is_no_wait(&self) -> bool {
        self.no_wait
    }

    /// Extra declaration arguments, e.g. `alternate-exchange`.
    pub fn arguments(&self) -> &BTreeMap<ShortString, AMQPValue> {
        &self.arguments
    }

    /// Sets the routing rule.
    pub fn kind(mut self, kind: ExchangeKind) -> Self {
        self.kind = kind;
        self
    }

    /// Routes on an exact routing-key match.
    pub fn direct(self) -> Self {
        self.kind(ExchangeKind::Direct)
    }

    /// Routes to every bound queue.
    pub fn fanout(mut self) -> Self {
        self.kind = ExchangeKind::Fanout;
        self
    }

    /// Routes on routing-key patterns.
    pub fn topic(mut self) -> Self {
        self.kind = ExchangeKind::Topic;
        self
    }

    /// Routes on header values instead of the routing key.
    pub fn headers(self) -> Self {
        self.kind(ExchangeKind::Headers)
    }

    /// Replaces the declaration arguments.
    pub fn with_arguments(mut self, arguments: BTreeMap<ShortString, AMQPValue>) -> Self {
        self.arguments = arguments;
        self
    }

    /// Adds a single declaration argument.
    pub fn argument(mut self, key: &str, value: AMQPValue) -> Self {
        self.arguments.insert(ShortString::from(key), value);
        self
    }

    /// Removed by the broker once the last queue is unbound.
    pub fn delete(mut self) -> Self {
        self.delete = true;
        self
    }

    /// Survives a broker restart.
    pub fn durable(mut self) -> Self {
        self.durable = true;
        self
    }

    /// Only checks that the exchange exists.
    pub fn passive(mut self) -> Self {
        self.passive = true;
        self
    }

    /// Reachable only through exchange-to-exchange bindings.
    pub fn internal(mut self) -> Self {
        self.internal = true;
        self
    }

    /// Sets no_wait flag, the broker will not reply to the declaration.
    pub fn no_wait(mut self) -> Self {
        self.no_wait = true;
        self
    }
}
