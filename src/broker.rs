// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Broker Primitives
//!
//! The broker client is an external collaborator. This module names the
//! primitives the crate relies on (open a connection, open a channel,
//! declare, bind, publish, consume, close) as async traits so that the
//! lifecycle and topology logic can run against any implementation.
//! `crate::lapin_broker` provides the production one.

use crate::{
    config::ConnectionConfig,
    errors::AmqpError,
    exchange::ExchangeDefinition,
    handle::Liveness,
    queue::QueueDefinition,
};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use lapin::BasicProperties;

/// A message as it travels through the crate: an opaque body plus the
/// broker properties (headers, content type, delivery mode...), both passed
/// through unmodified.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Message {
    pub body: Vec<u8>,
    pub properties: BasicProperties,
}

impl Message {
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Message {
            body: body.into(),
            properties: BasicProperties::default(),
        }
    }

    pub fn with_properties(mut self, properties: BasicProperties) -> Self {
        self.properties = properties;
        self
    }
}

impl From<lapin::message::Delivery> for Message {
    fn from(delivery: lapin::message::Delivery) -> Self {
        Message {
            body: delivery.data,
            properties: delivery.properties,
        }
    }
}

/// Deliveries of a running consumer. The stream ends once the broker stops
/// delivering, i.e. the consumer was cancelled or the channel closed.
pub type DeliveryStream = BoxStream<'static, Result<Message, AmqpError>>;

/// Opens connections to a broker.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Broker: Send + Sync {
    /// Performs the connection handshake. Fails with `BrokerUnavailable`.
    async fn connect(
        &self,
        config: &ConnectionConfig,
    ) -> Result<Box<dyn BrokerConnection>, AmqpError>;
}

/// One physical broker connection.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    fn is_connected(&self) -> bool;

    /// Opens a channel on this connection. Fails with `ChannelOpenFailed`.
    async fn create_channel(&self) -> Result<Box<dyn BrokerChannel>, AmqpError>;

    async fn close(&self) -> Result<(), AmqpError>;
}

/// A logical session multiplexed over a connection.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    fn is_open(&self) -> bool;

    async fn exchange_declare(&self, def: &ExchangeDefinition) -> Result<(), AmqpError>;

    async fn queue_declare(&self, def: &QueueDefinition) -> Result<(), AmqpError>;

    async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), AmqpError>;

    /// Writes one message; no publisher confirm is awaited.
    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: &Message,
    ) -> Result<(), AmqpError>;

    /// Registers a consumer. An empty `consumer_tag` lets the broker pick one.
    async fn basic_consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        auto_ack: bool,
    ) -> Result<DeliveryStream, AmqpError>;

    async fn close(&self) -> Result<(), AmqpError>;
}

impl Liveness for Box<dyn BrokerConnection> {
    fn is_live(&self) -> bool {
        self.is_connected()
    }
}

impl Liveness for Box<dyn BrokerChannel> {
    fn is_live(&self) -> bool {
        self.is_open()
    }
}
