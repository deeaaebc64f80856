// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Consumer
//!
//! This module provides the consume loop. A consume call optionally
//! declares its exchange, queue and binding, registers an auto-acknowledged
//! consumer and then dispatches every delivery to a handler until the broker
//! stops delivering.
//!
//! Deliveries are acknowledged by the broker as they are sent, so a message
//! whose handler fails is dropped, not requeued. The failure ends the loop
//! and is returned to the caller.

use crate::{
    broker::Message,
    channel::ChannelManager,
    errors::AmqpError,
    exchange::{ExchangeDefinition, ExchangeKind},
    otel,
    queue::QueueDefinition,
};
use async_trait::async_trait;
use futures_util::StreamExt;
use opentelemetry::{
    trace::{Span, Status},
    Context,
};
use std::borrow::Cow;
use tracing::{debug, error, info};

/// Handles one delivered message.
#[async_trait]
pub trait ConsumerHandler: Send + Sync {
    async fn exec(&self, ctx: &Context, msg: &Message) -> Result<(), AmqpError>;
}

#[async_trait]
impl<F> ConsumerHandler for F
where
    F: Fn(&Message) -> Result<(), AmqpError> + Send + Sync,
{
    async fn exec(&self, _ctx: &Context, msg: &Message) -> Result<(), AmqpError> {
        self(msg)
    }
}

/// What to consume: the queue and, optionally, the exchange it should be
/// bound to first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerDefinition {
    pub(crate) queue: String,
    pub(crate) exchange: String,
    pub(crate) kind: ExchangeKind,
    pub(crate) routing_key: String,
}

impl ConsumerDefinition {
    /// Consumes `queue` directly, without declaring any exchange.
    pub fn new(queue: &str) -> ConsumerDefinition {
        ConsumerDefinition {
            queue: queue.to_owned(),
            exchange: String::new(),
            kind: ExchangeKind::Direct,
            routing_key: String::new(),
        }
    }

    /// Declares `exchange` and binds the queue to it before consuming.
    pub fn exchange(mut self, exchange: &str) -> Self {
        self.exchange = exchange.to_owned();
        self
    }

    /// Routing rule of the declared exchange.
    pub fn kind(mut self, kind: ExchangeKind) -> Self {
        self.kind = kind;
        self
    }

    /// Binding key used with the exchange.
    pub fn routing_key(mut self, key: &str) -> Self {
        self.routing_key = key.to_owned();
        self
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    fn exchange_definition(&self) -> Option<ExchangeDefinition> {
        if self.exchange.is_empty() {
            return None;
        }

        Some(ExchangeDefinition::new(&self.exchange).kind(self.kind).durable())
    }

    fn queue_definition(&self) -> QueueDefinition {
        QueueDefinition::new(&self.queue).durable()
    }
}

/// Runs consume loops on the managed channel.
pub struct Consumer<'a> {
    channels: &'a mut ChannelManager,
}

impl<'a> Consumer<'a> {
    /// Consumer borrowing the managed channel.
    pub fn new(channels: &'a mut ChannelManager) -> Self {
        Consumer { channels }
    }

    /// Declares the consumer's topology, registers it and dispatches every
    /// delivery to `handler`.
    ///
    /// Resolves only once the broker stops delivering (consumer cancelled
    /// or channel closed), or as soon as the handler or the delivery stream
    /// fails.
    pub async fn consume(
        &mut self,
        def: &ConsumerDefinition,
        handler: &dyn ConsumerHandler,
    ) -> Result<(), AmqpError> {
        let channel = self.channels.get_channel().await?;

        let queue_def = def.queue_definition();
        match def.exchange_definition() {
            Some(exchange_def) => {
                channel.exchange_declare(&exchange_def).await.map_err(|err| {
                    error!(
                        error = err.to_string(),
                        exchange = %def.exchange,
                        "error to declare the consumer exchange"
                    );
                    err
                })?;
                channel.queue_declare(&queue_def).await.map_err(|err| {
                    error!(error = err.to_string(), queue = %def.queue, "error to declare the consumer queue");
                    err
                })?;
                channel
                    .queue_bind(&def.queue, &def.exchange, &def.routing_key)
                    .await
                    .map_err(|err| {
                        error!(
                            error = err.to_string(),
                            queue = %def.queue,
                            exchange = %def.exchange,
                            "error to bind the consumer queue"
                        );
                        err
                    })?;
            }
            None => channel.queue_declare(&queue_def).await.map_err(|err| {
                error!(error = err.to_string(), queue = %def.queue, "error to declare the consumer queue");
                err
            })?,
        }

        let mut deliveries = channel
            .basic_consume(&def.queue, "", true)
            .await
            .map_err(|err| {
                error!(error = err.to_string(), queue = %def.queue, "error to create the consumer");
                err
            })?;

        info!(queue = %def.queue, "consuming");

        let tracer = otel::tracer();
        let mut handled: u64 = 0;

        while let Some(delivery) = deliveries.next().await {
            let msg = delivery.map_err(|err| {
                error!(error = err.to_string(), queue = %def.queue, "errors consume msg");
                err
            })?;

            let (ctx, mut span) = otel::consumer_span(&msg.properties, &tracer, &def.queue);
            debug!(queue = %def.queue, bytes = msg.body.len(), "received");

            if let Err(err) = handler.exec(&ctx, &msg).await {
                error!(error = err.to_string(), queue = %def.queue, "handler failure, stopping consumer");
                span.record_error(&err);
                span.set_status(Status::Error {
                    description: Cow::from(err.to_string()),
                });
                return Err(err);
            }

            span.set_status(Status::Ok);
            handled += 1;
        }

        info!(queue = %def.queue, handled, "consumer stopped");
        Ok(())
    }
}
