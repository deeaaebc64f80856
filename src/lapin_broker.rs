// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # lapin Broker
//!
//! Production implementation of the broker primitives on top of `lapin`.
//! Every client error is mapped to the `AmqpError` variant of the operation
//! that raised it.

use crate::{
    broker::{Broker, BrokerChannel, BrokerConnection, DeliveryStream, Message},
    config::ConnectionConfig,
    errors::AmqpError,
    exchange::ExchangeDefinition,
    queue::QueueDefinition,
};
use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::{
    options::{
        BasicConsumeOptions, BasicPublishOptions, ExchangeDeclareOptions, QueueBindOptions,
        QueueDeclareOptions,
    },
    protocol::{AMQPErrorKind, AMQPSoftError},
    types::{FieldTable, LongString},
    Channel, Connection, ConnectionProperties,
};
use tracing::debug;

/// Reply code sent with a regular close.
const REPLY_SUCCESS: u16 = 200;

/// Maps a declare or bind failure. Only a channel-level refusal from the
/// broker is a conflict on `object`; transport and state failures mean the
/// broker is out of reach.
fn declare_error(object: String, err: lapin::Error) -> AmqpError {
    match &err {
        lapin::Error::ProtocolError(amqp)
            if matches!(
                amqp.kind(),
                AMQPErrorKind::Soft(
                    AMQPSoftError::PRECONDITIONFAILED
                        | AMQPSoftError::NOTFOUND
                        | AMQPSoftError::ACCESSREFUSED
                        | AMQPSoftError::RESOURCELOCKED
                )
            ) =>
        {
            AmqpError::conflict(object, &err)
        }
        _ => AmqpError::BrokerUnavailable(format!("{object}: {err}")),
    }
}

/// Connects through `lapin`, naming every connection after the service.
#[derive(Debug, Clone)]
pub struct LapinBroker {
    connection_name: String,
}

impl LapinBroker {
    /// Broker whose connections announce `connection_name` to the server.
    pub fn new(connection_name: &str) -> Self {
        LapinBroker {
            connection_name: connection_name.to_owned(),
        }
    }
}

impl Default for LapinBroker {
    fn default() -> Self {
        LapinBroker::new(env!("CARGO_PKG_NAME"))
    }
}

#[async_trait]
impl Broker for LapinBroker {
    async fn connect(
        &self,
        config: &ConnectionConfig,
    ) -> Result<Box<dyn BrokerConnection>, AmqpError> {
        let options = ConnectionProperties::default()
            .with_connection_name(LongString::from(self.connection_name.clone()));

        match Connection::connect_uri(config.amqp_uri(), options).await {
            Ok(inner) => Ok(Box::new(LapinConnection { inner })),
            Err(err) => Err(AmqpError::BrokerUnavailable(err.to_string())),
        }
    }
}

/// Open `lapin` connection.
pub struct LapinConnection {
    inner: Connection,
}

#[async_trait]
impl BrokerConnection for LapinConnection {
    fn is_connected(&self) -> bool {
        self.inner.status().connected()
    }

    async fn create_channel(&self) -> Result<Box<dyn BrokerChannel>, AmqpError> {
        match self.inner.create_channel().await {
            Ok(inner) => Ok(Box::new(LapinChannel { inner })),
            Err(err) => Err(AmqpError::ChannelOpenFailed(err.to_string())),
        }
    }

    async fn close(&self) -> Result<(), AmqpError> {
        self.inner
            .close(REPLY_SUCCESS, "closing connection")
            .await
            .map_err(|err| AmqpError::CloseFailed(err.to_string()))
    }
}

/// Open `lapin` channel.
pub struct LapinChannel {
    inner: Channel,
}

#[async_trait]
impl BrokerChannel for LapinChannel {
    fn is_open(&self) -> bool {
        self.inner.status().connected()
    }

    async fn exchange_declare(&self, def: &ExchangeDefinition) -> Result<(), AmqpError> {
        self.inner
            .exchange_declare(
                &def.name,
                def.kind.into(),
                ExchangeDeclareOptions {
                    passive: def.passive,
                    durable: def.durable,
                    auto_delete: def.delete,
                    internal: def.internal,
                    nowait: def.no_wait,
                },
                FieldTable::from(def.arguments.clone()),
            )
            .await
            .map_err(|err| declare_error(format!("exchange `{}`", def.name), err))
    }

    async fn queue_declare(&self, def: &QueueDefinition) -> Result<(), AmqpError> {
        let queue = self
            .inner
            .queue_declare(
                &def.name,
                QueueDeclareOptions {
                    passive: def.passive,
                    durable: def.durable,
                    exclusive: def.exclusive,
                    auto_delete: def.delete,
                    nowait: def.no_wait,
                },
                FieldTable::from(def.arguments.clone()),
            )
            .await
            .map_err(|err| declare_error(format!("queue `{}`", def.name), err))?;

        debug!(
            queue = %def.name,
            messages = queue.message_count(),
            consumers = queue.consumer_count(),
            "queue declared"
        );
        Ok(())
    }

    async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), AmqpError> {
        self.inner
            .queue_bind(
                queue,
                exchange,
                routing_key,
                QueueBindOptions { nowait: false },
                FieldTable::default(),
            )
            .await
            .map_err(|err| {
                declare_error(
                    format!("binding of queue `{queue}` to exchange `{exchange}`"),
                    err,
                )
            })
    }

    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: &Message,
    ) -> Result<(), AmqpError> {
        // The returned confirm is dropped: the channel is not in confirm mode.
        self.inner
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions {
                    immediate: false,
                    mandatory: false,
                },
                &message.body,
                message.properties.clone(),
            )
            .await
            .map(|_| ())
            .map_err(|err| AmqpError::PublishFailed(err.to_string()))
    }

    async fn basic_consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        auto_ack: bool,
    ) -> Result<DeliveryStream, AmqpError> {
        let consumer = self
            .inner
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions {
                    no_local: false,
                    no_ack: auto_ack,
                    exclusive: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
            .map_err(|err| AmqpError::ConsumerError(err.to_string()))?;

        debug!(queue, tag = ?consumer.tag(), "consumer registered");

        Ok(consumer
            .map(|delivery| {
                delivery
                    .map(Message::from)
                    .map_err(|err| AmqpError::ConsumerError(err.to_string()))
            })
            .boxed())
    }

    async fn close(&self) -> Result<(), AmqpError> {
        self.inner
            .close(REPLY_SUCCESS, "closing channel")
            .await
            .map_err(|err| AmqpError::CloseFailed(err.to_string()))
    }
}
