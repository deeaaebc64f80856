// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Service
//!
//! Single entry point for applications: owns the connection and channel
//! lifecycle and hands out the topology, publish and consume views over it.

use crate::{
    broker::{Broker, BrokerChannel, BrokerConnection},
    channel::ChannelManager,
    config::ConnectionConfig,
    connection::ConnectionManager,
    consumer::Consumer,
    errors::AmqpError,
    handle::HandleState,
    lapin_broker::LapinBroker,
    publisher::Publisher,
    topology::TopologyConfigurator,
};
use std::sync::Arc;
use tracing::info;

/// Connection, channel and the operations that run on them.
pub struct AmqpService {
    channels: ChannelManager,
}

impl AmqpService {
    /// Service over any broker implementation. Nothing is opened until first use.
    pub fn new(config: ConnectionConfig, broker: Arc<dyn Broker>) -> Self {
        AmqpService {
            channels: ChannelManager::new(ConnectionManager::new(config, broker)),
        }
    }

    /// Service backed by a real broker through `lapin`.
    pub fn with_lapin(config: ConnectionConfig) -> Self {
        Self::new(config, Arc::new(LapinBroker::default()))
    }

    /// Connection settings in use.
    pub fn config(&self) -> &ConnectionConfig {
        self.channels.connections().config()
    }

    /// State of the underlying connection handle.
    pub fn connection_state(&self) -> HandleState {
        self.channels.connections().state()
    }

    /// Live connection, connecting or reconnecting as needed.
    pub async fn get_connection(&mut self) -> Result<&dyn BrokerConnection, AmqpError> {
        self.channels.connections_mut().get_connection().await
    }

    /// Live channel, opening or reopening it as needed.
    pub async fn get_channel(&mut self) -> Result<&dyn BrokerChannel, AmqpError> {
        self.channels.get_channel().await
    }

    /// Declares exchanges, queues and bindings.
    pub fn topology(&mut self) -> TopologyConfigurator<'_> {
        TopologyConfigurator::new(&mut self.channels)
    }

    /// Publishes messages.
    pub fn publisher(&mut self) -> Publisher<'_> {
        Publisher::new(&mut self.channels)
    }

    /// Runs consume loops.
    pub fn consumer(&mut self) -> Consumer<'_> {
        Consumer::new(&mut self.channels)
    }

    /// Closes the channel and then the connection. Calling it again, or on a
    /// service that never connected, does nothing.
    pub async fn close(&mut self) -> Result<(), AmqpError> {
        self.channels.shutdown().await?;
        info!(host = %self.config().host, "amqp service closed");
        Ok(())
    }
}
