// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types
//!
//! This module provides the error type shared by every layer of the crate.
//! The `AmqpError` enum covers connection and channel lifecycle failures,
//! topology declarations, publishing, consuming and configuration loading.

use thiserror::Error;

/// Represents errors that can occur during AMQP operations.
///
/// Broker failures are never retried or swallowed inside the crate: each
/// variant is surfaced to the immediate caller with the broker's reason.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmqpError {
    /// Internal errors that don't fit into other categories
    #[error("internal error")]
    InternalError,

    /// The broker could not be reached or refused the connection handshake
    #[error("broker unavailable: {0}")]
    BrokerUnavailable(String),

    /// A channel could not be opened on an established connection
    #[error("failure to open a channel: {0}")]
    ChannelOpenFailed(String),

    /// A declaration or binding was refused by the broker
    #[error("topology conflict on {object}: {reason}")]
    TopologyConflict { object: String, reason: String },

    /// The broker rejected a publish write
    #[error("failure to publish: {0}")]
    PublishFailed(String),

    /// The consumer could not be registered or the delivery stream failed
    #[error("failure to consume: {0}")]
    ConsumerError(String),

    /// A message handler reported a failure
    #[error("handler failure: {0}")]
    HandlerError(String),

    /// Closing a live channel or connection failed
    #[error("failure to close: {0}")]
    CloseFailed(String),

    /// Configuration could not be read or parsed
    #[error("invalid configuration: {0}")]
    ConfigError(String),

    /// An exchange type name that the broker does not know
    #[error("unknown exchange kind `{0}`")]
    InvalidExchangeKind(String),
}

impl AmqpError {
    /// Builds a `TopologyConflict` for the given object description.
    pub fn conflict(object: impl Into<String>, reason: impl ToString) -> Self {
        AmqpError::TopologyConflict {
            object: object.into(),
            reason: reason.to_string(),
        }
    }
}
