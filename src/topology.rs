// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Topology Management
//!
//! This module turns exchange, queue and binding definitions into the
//! ordered sequence of broker declarations that creates them.
//!
//! The main components are:
//! - `TopologySpec`: ordered exchange and queue definitions
//! - `TopologyConfigurator`: issues the declarations on the managed channel
//! - `SetupReport`: what a full setup applied

use crate::{
    channel::ChannelManager,
    errors::AmqpError,
    exchange::ExchangeDefinition,
    queue::{QueueBinding, QueueDefinition},
};
use tracing::{debug, error, info};

/// Exchanges and queues to declare, in declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TopologySpec {
    exchanges: Vec<ExchangeDefinition>,
    queues: Vec<QueueDefinition>,
}

impl TopologySpec {
    /// Empty topology.
    pub fn new() -> Self {
        TopologySpec::default()
    }

    /// Appends an exchange definition.
    pub fn exchange(mut self, def: ExchangeDefinition) -> Self {
        self.exchanges.push(def);
        self
    }

    /// Appends a queue definition. Its binding, if any, is applied after
    /// every queue has been declared.
    pub fn queue(mut self, def: QueueDefinition) -> Self {
        self.queues.push(def);
        self
    }

    pub fn exchanges(&self) -> &[ExchangeDefinition] {
        &self.exchanges
    }

    pub fn queues(&self) -> &[QueueDefinition] {
        &self.queues
    }

    pub fn bindings(&self) -> Vec<QueueBinding> {
        self.queues.iter().filter_map(QueueDefinition::binding).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.exchanges.is_empty() && self.queues.is_empty()
    }
}

/// Counts of what a setup run declared.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetupReport {
    pub exchanges: usize,
    pub queues: usize,
    pub bindings: usize,
}

/// Declares exchanges, queues and bindings on the managed channel.
pub struct TopologyConfigurator<'a> {
    channels: &'a mut ChannelManager,
}

impl<'a> TopologyConfigurator<'a> {
    /// Configurator borrowing the managed channel.
    pub fn new(channels: &'a mut ChannelManager) -> Self {
        TopologyConfigurator { channels }
    }

    /// Issues one exchange declaration.
    ///
    /// # Errors
    /// `TopologyConflict` when an exchange with the same name but different
    /// parameters exists, or channel acquisition errors.
    pub async fn declare_exchange(&mut self, def: &ExchangeDefinition) -> Result<(), AmqpError> {
        debug!("creating exchange: {}", def.name);

        let channel = self.channels.get_channel().await?;
        channel.exchange_declare(def).await.map_err(|err| {
            error!(
                error = err.to_string(),
                name = %def.name,
                "error to declare the exchange"
            );
            err
        })?;

        debug!("exchange: {} was created", def.name);
        Ok(())
    }

    /// Issues one queue declaration.
    pub async fn declare_queue(&mut self, def: &QueueDefinition) -> Result<(), AmqpError> {
        debug!("creating queue: {}", def.name);

        let channel = self.channels.get_channel().await?;
        channel.queue_declare(def).await.map_err(|err| {
            error!(
                error = err.to_string(),
                name = %def.name,
                "error to declare the queue"
            );
            err
        })?;

        debug!("queue: {} was created", def.name);
        Ok(())
    }

    /// Binds `queue` to `exchange` with `routing_key`.
    pub async fn bind_queue(
        &mut self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), AmqpError> {
        debug!(
            "binding queue: {} to the exchange: {} with the key: {}",
            queue, exchange, routing_key
        );

        let channel = self.channels.get_channel().await?;
        channel
            .queue_bind(queue, exchange, routing_key)
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error to bind queue to exchange");
                err
            })
    }

    /// Applies a whole topology: every exchange, then every queue, then the
    /// bindings of the queues that name an exchange.
    ///
    /// The first failure stops the run and is returned as is. Declarations
    /// already applied stay in place.
    pub async fn setup_from_config(
        &mut self,
        topology: &TopologySpec,
    ) -> Result<SetupReport, AmqpError> {
        let mut report = SetupReport::default();

        for exchange in topology.exchanges() {
            self.declare_exchange(exchange).await?;
            report.exchanges += 1;
        }

        for queue in topology.queues() {
            self.declare_queue(queue).await?;
            report.queues += 1;
        }

        for binding in topology.bindings() {
            self.bind_queue(
                binding.queue_name(),
                binding.exchange_name(),
                binding.key(),
            )
            .await?;
            report.bindings += 1;
        }

        info!(
            exchanges = report.exchanges,
            queues = report.queues,
            bindings = report.bindings,
            "topology installed"
        );

        Ok(report)
    }
}
