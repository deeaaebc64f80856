// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Publisher
//!
//! Fire-and-forget publishing to a named exchange. The target exchange is
//! declared before every publish so a publisher never depends on a prior
//! setup run.

use crate::{
    broker::Message,
    channel::ChannelManager,
    errors::AmqpError,
    exchange::{ExchangeDefinition, ExchangeKind},
    otel,
};
use opentelemetry::trace::{Span, Status};
use std::borrow::Cow;
use tracing::{debug, error};

/// Publishes messages on the managed channel.
pub struct Publisher<'a> {
    channels: &'a mut ChannelManager,
}

impl<'a> Publisher<'a> {
    /// Publisher borrowing the managed channel.
    pub fn new(channels: &'a mut ChannelManager) -> Self {
        Publisher { channels }
    }

    /// Declares `exchange` (durable, not auto-deleted, not passive) and
    /// publishes `message` to it with `routing_key`.
    ///
    /// The message body and properties are sent as given. No publisher
    /// confirm is awaited.
    ///
    /// # Errors
    /// Channel acquisition errors, `TopologyConflict` if the exchange exists
    /// with other parameters, `PublishFailed` if the write is rejected.
    pub async fn publish(
        &mut self,
        exchange: &str,
        routing_key: &str,
        message: &Message,
        kind: ExchangeKind,
    ) -> Result<(), AmqpError> {
        let tracer = otel::tracer();
        let mut span = otel::producer_span(&tracer, exchange);

        let result = self.declare_and_publish(exchange, routing_key, message, kind).await;

        match &result {
            Ok(()) => span.set_status(Status::Ok),
            Err(err) => {
                span.record_error(err);
                span.set_status(Status::Error {
                    description: Cow::from(err.to_string()),
                });
            }
        }

        result
    }

    async fn declare_and_publish(
        &mut self,
        exchange: &str,
        routing_key: &str,
        message: &Message,
        kind: ExchangeKind,
    ) -> Result<(), AmqpError> {
        let channel = self.channels.get_channel().await?;

        let def = ExchangeDefinition::new(exchange).kind(kind).durable();
        channel.exchange_declare(&def).await.map_err(|err| {
            error!(
                error = err.to_string(),
                exchange, "error to declare the publish exchange"
            );
            err
        })?;

        channel
            .basic_publish(exchange, routing_key, message)
            .await
            .map_err(|err| {
                error!(error = err.to_string(), exchange, "error publishing message");
                err
            })?;

        debug!(
            exchange,
            routing_key,
            bytes = message.body.len(),
            "message published"
        );
        Ok(())
    }
}
