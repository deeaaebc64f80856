// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Connection Management
//!
//! This module owns the single broker connection of a service instance.
//! The connection is opened on first use, replaced transparently when the
//! broker drops it, and closed explicitly by its owner.

use crate::{
    broker::{Broker, BrokerConnection},
    config::ConnectionConfig,
    errors::AmqpError,
    handle::{HandleState, ManagedHandle},
};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Owns at most one live broker connection.
///
/// Access is sequential by contract: every operation takes `&mut self`.
pub struct ConnectionManager {
    broker: Arc<dyn Broker>,
    config: ConnectionConfig,
    connection: ManagedHandle<Box<dyn BrokerConnection>>,
}

impl ConnectionManager {
    /// Manager that connects through `broker` on first use.
    pub fn new(config: ConnectionConfig, broker: Arc<dyn Broker>) -> Self {
        ConnectionManager {
            broker,
            config,
            connection: ManagedHandle::new("connection"),
        }
    }

    /// Settings every connection attempt uses.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Whether a connection is held and still connected.
    pub fn state(&self) -> HandleState {
        self.connection.state()
    }

    /// Returns the live connection, connecting first if there is none or
    /// the previous one is no longer connected.
    ///
    /// # Errors
    /// `BrokerUnavailable` when the handshake fails.
    pub async fn get_connection(&mut self) -> Result<&dyn BrokerConnection, AmqpError> {
        let broker = &self.broker;
        let config = &self.config;

        let connection = self
            .connection
            .ensure(|| async move {
                debug!(uri = %config, "creating amqp connection...");
                match broker.connect(config).await {
                    Ok(conn) => {
                        debug!("amqp connected");
                        Ok(conn)
                    }
                    Err(err) => {
                        error!(error = err.to_string(), uri = %config, "failure to connect");
                        Err(err)
                    }
                }
            })
            .await?;

        Ok(connection.as_ref())
    }

    /// Closes the connection if it is live. Closing an absent, stale or
    /// already closed connection is a no-op.
    pub async fn close(&mut self) -> Result<(), AmqpError> {
        let Some(connection) = self.connection.take_live() else {
            return Ok(());
        };

        match connection.close().await {
            Ok(()) => {
                info!(uri = %self.config, "amqp connection closed");
                Ok(())
            }
            Err(err) => {
                error!(error = err.to_string(), "failure to close the connection");
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{MockBroker, MockBrokerConnection};
    use std::sync::atomic::{AtomicBool, Ordering};

    fn connection_with_flag(alive: Arc<AtomicBool>) -> MockBrokerConnection {
        let mut conn = MockBrokerConnection::new();
        conn.expect_is_connected()
            .returning(move || alive.load(Ordering::SeqCst));
        conn.expect_close().returning(|| Ok(()));
        conn
    }

    fn always_live_broker(connects: usize) -> MockBroker {
        let mut broker = MockBroker::new();
        broker
            .expect_connect()
            .times(connects)
            .returning(|_| Ok(Box::new(connection_with_flag(Arc::new(AtomicBool::new(true))))));
        broker
    }

    #[tokio::test]
    async fn connects_once_for_repeated_access() {
        let mut manager =
            ConnectionManager::new(ConnectionConfig::default(), Arc::new(always_live_broker(1)));

        for _ in 0..5 {
            assert!(manager.get_connection().await.unwrap().is_connected());
        }
        assert_eq!(manager.state(), HandleState::Live);
    }

    #[tokio::test]
    async fn passes_configuration_to_the_broker() {
        let config = ConnectionConfig {
            host: "test-host".to_owned(),
            port: 1234,
            user: "test-user".to_owned(),
            ..Default::default()
        };

        let mut broker = MockBroker::new();
        broker
            .expect_connect()
            .withf(|cfg| cfg.host == "test-host" && cfg.port == 1234 && cfg.user == "test-user")
            .times(1)
            .returning(|_| Ok(Box::new(connection_with_flag(Arc::new(AtomicBool::new(true))))));

        let mut manager = ConnectionManager::new(config, Arc::new(broker));
        manager.get_connection().await.unwrap();
    }

    #[tokio::test]
    async fn reconnects_after_close() {
        let mut manager =
            ConnectionManager::new(ConnectionConfig::default(), Arc::new(always_live_broker(2)));

        manager.get_connection().await.unwrap();
        manager.close().await.unwrap();
        assert_eq!(manager.state(), HandleState::Absent);

        manager.get_connection().await.unwrap();
        assert_eq!(manager.state(), HandleState::Live);
    }

    #[tokio::test]
    async fn replaces_a_dropped_connection() {
        let first = Arc::new(AtomicBool::new(true));
        let first_conn = connection_with_flag(first.clone());

        let mut broker = MockBroker::new();
        let mut seq = mockall::Sequence::new();
        broker
            .expect_connect()
            .times(1)
            .in_sequence(&mut seq)
            .return_once(move |_| Ok(Box::new(first_conn)));
        broker
            .expect_connect()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(Box::new(connection_with_flag(Arc::new(AtomicBool::new(true))))));

        let mut manager = ConnectionManager::new(ConnectionConfig::default(), Arc::new(broker));
        manager.get_connection().await.unwrap();

        first.store(false, Ordering::SeqCst);
        assert_eq!(manager.state(), HandleState::Stale);

        assert!(manager.get_connection().await.unwrap().is_connected());
    }

    #[tokio::test]
    async fn connect_failure_is_broker_unavailable() {
        let mut broker = MockBroker::new();
        broker
            .expect_connect()
            .returning(|_| Err(AmqpError::BrokerUnavailable("auth refused".to_owned())));

        let mut manager = ConnectionManager::new(ConnectionConfig::default(), Arc::new(broker));

        assert_eq!(
            manager.get_connection().await.err(),
            Some(AmqpError::BrokerUnavailable("auth refused".to_owned()))
        );
        assert_eq!(manager.state(), HandleState::Absent);
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let mut never_used =
            ConnectionManager::new(ConnectionConfig::default(), Arc::new(MockBroker::new()));
        assert!(never_used.close().await.is_ok());
        assert!(never_used.close().await.is_ok());

        let mut conn = MockBrokerConnection::new();
        conn.expect_is_connected().return_const(true);
        conn.expect_close().times(1).returning(|| Ok(()));
        let mut broker = MockBroker::new();
        broker
            .expect_connect()
            .times(1)
            .return_once(move |_| Ok(Box::new(conn)));

        let mut manager = ConnectionManager::new(ConnectionConfig::default(), Arc::new(broker));
        manager.get_connection().await.unwrap();
        assert!(manager.close().await.is_ok());
        assert!(manager.close().await.is_ok());
    }

    #[tokio::test]
    async fn stale_connection_is_not_closed() {
        let alive = Arc::new(AtomicBool::new(true));
        let mut conn = MockBrokerConnection::new();
        let flag = alive.clone();
        conn.expect_is_connected()
            .returning(move || flag.load(Ordering::SeqCst));
        conn.expect_close().never();

        let mut broker = MockBroker::new();
        broker
            .expect_connect()
            .return_once(move |_| Ok(Box::new(conn)));

        let mut manager = ConnectionManager::new(ConnectionConfig::default(), Arc::new(broker));
        manager.get_connection().await.unwrap();
        alive.store(false, Ordering::SeqCst);

        assert!(manager.close().await.is_ok());
    }
}
