// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Channel Management
//!
//! This module keeps the one channel every publish, consume and topology
//! call runs on. The channel is opened lazily from the managed connection
//! and reopened when the broker closes it. Since the channel manager owns
//! the connection manager, it is also where teardown order is decided:
//! channel first, connection second.

use crate::{
    broker::BrokerChannel,
    connection::ConnectionManager,
    errors::AmqpError,
    handle::{HandleState, ManagedHandle},
};
use tracing::{debug, error};

/// Owns at most one live channel on top of a [`ConnectionManager`].
pub struct ChannelManager {
    connections: ConnectionManager,
    channel: ManagedHandle<Box<dyn BrokerChannel>>,
}

impl ChannelManager {
    /// Manager opening channels on `connections`.
    pub fn new(connections: ConnectionManager) -> Self {
        ChannelManager {
            connections,
            channel: ManagedHandle::new("channel"),
        }
    }

    /// Whether a channel is held and still open.
    pub fn state(&self) -> HandleState {
        self.channel.state()
    }

    /// The owned connection manager.
    pub fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    /// Mutable access to the owned connection manager.
    pub fn connections_mut(&mut self) -> &mut ConnectionManager {
        &mut self.connections
    }

    /// Returns the live channel, opening one when there is none or the
    /// previous one was closed. A dropped connection is repaired first.
    ///
    /// # Errors
    /// `BrokerUnavailable` from the connection layer, `ChannelOpenFailed`
    /// when the broker refuses the channel.
    pub async fn get_channel(&mut self) -> Result<&dyn BrokerChannel, AmqpError> {
        let connections = &mut self.connections;

        let channel = self
            .channel
            .ensure(|| async move {
                let connection = connections.get_connection().await?;

                debug!("creating amqp channel...");
                match connection.create_channel().await {
                    Ok(channel) => {
                        debug!("channel created");
                        Ok(channel)
                    }
                    Err(err) => {
                        error!(error = err.to_string(), "error to create the channel");
                        Err(err)
                    }
                }
            })
            .await?;

        Ok(channel.as_ref())
    }

    /// Closes the channel only; the connection stays up. A no-op when no
    /// live channel is held.
    pub async fn close(&mut self) -> Result<(), AmqpError> {
        let Some(channel) = self.channel.take_live() else {
            return Ok(());
        };

        channel.close().await.map_err(|err| {
            error!(error = err.to_string(), "failure to close the channel");
            err
        })?;
        debug!("channel closed");

        Ok(())
    }

    /// Closes the channel, then the connection. Both are attempted even if
    /// the first fails; the first error is returned.
    pub async fn shutdown(&mut self) -> Result<(), AmqpError> {
        let channel = self.close().await;
        let connection = self.connections.close().await;

        channel.and(connection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        broker::{MockBroker, MockBrokerChannel, MockBrokerConnection},
        config::ConnectionConfig,
    };
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    };

    fn open_channel() -> MockBrokerChannel {
        let mut channel = MockBrokerChannel::new();
        channel.expect_is_open().return_const(true);
        channel.expect_close().returning(|| Ok(()));
        channel
    }

    fn manager_for(broker: MockBroker) -> ChannelManager {
        ChannelManager::new(ConnectionManager::new(
            ConnectionConfig::default(),
            Arc::new(broker),
        ))
    }

    fn broker_with(connection: MockBrokerConnection) -> MockBroker {
        let mut broker = MockBroker::new();
        broker
            .expect_connect()
            .times(1)
            .return_once(move |_| Ok(Box::new(connection)));
        broker
    }

    #[tokio::test]
    async fn opens_one_channel_for_repeated_access() {
        let mut conn = MockBrokerConnection::new();
        conn.expect_is_connected().return_const(true);
        conn.expect_create_channel()
            .times(1)
            .returning(|| Ok(Box::new(open_channel())));

        let mut manager = manager_for(broker_with(conn));
        for _ in 0..4 {
            assert!(manager.get_channel().await.unwrap().is_open());
        }
        assert_eq!(manager.state(), HandleState::Live);
        assert_eq!(manager.connections().state(), HandleState::Live);
    }

    #[tokio::test]
    async fn reopens_after_close_on_the_same_connection() {
        let mut conn = MockBrokerConnection::new();
        conn.expect_is_connected().return_const(true);
        conn.expect_create_channel()
            .times(2)
            .returning(|| Ok(Box::new(open_channel())));

        let mut manager = manager_for(broker_with(conn));
        manager.get_channel().await.unwrap();
        manager.close().await.unwrap();
        assert_eq!(manager.state(), HandleState::Absent);
        assert_eq!(manager.connections().state(), HandleState::Live);

        manager.get_channel().await.unwrap();
        assert_eq!(manager.state(), HandleState::Live);
    }

    #[tokio::test]
    async fn replaces_a_channel_closed_by_the_broker() {
        let open = Arc::new(AtomicBool::new(true));
        let flag = open.clone();
        let mut first = MockBrokerChannel::new();
        first
            .expect_is_open()
            .returning(move || flag.load(Ordering::SeqCst));

        let mut conn = MockBrokerConnection::new();
        conn.expect_is_connected().return_const(true);
        let mut seq = mockall::Sequence::new();
        conn.expect_create_channel()
            .times(1)
            .in_sequence(&mut seq)
            .return_once(move || Ok(Box::new(first)));
        conn.expect_create_channel()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(Box::new(open_channel())));

        let mut manager = manager_for(broker_with(conn));
        manager.get_channel().await.unwrap();

        open.store(false, Ordering::SeqCst);
        assert_eq!(manager.state(), HandleState::Stale);
        assert!(manager.get_channel().await.unwrap().is_open());
    }

    #[tokio::test]
    async fn repairs_a_dropped_connection_before_opening() {
        let connected = Arc::new(AtomicBool::new(true));
        let flag = connected.clone();

        let channel_open = Arc::new(AtomicBool::new(true));
        let channel_flag = channel_open.clone();
        let mut first_channel = MockBrokerChannel::new();
        first_channel
            .expect_is_open()
            .returning(move || channel_flag.load(Ordering::SeqCst));

        let mut first = MockBrokerConnection::new();
        first
            .expect_is_connected()
            .returning(move || flag.load(Ordering::SeqCst));
        first
            .expect_create_channel()
            .times(1)
            .return_once(move || Ok(Box::new(first_channel)));

        let mut second = MockBrokerConnection::new();
        second.expect_is_connected().return_const(true);
        second
            .expect_create_channel()
            .times(1)
            .returning(|| Ok(Box::new(open_channel())));

        let mut broker = MockBroker::new();
        let mut seq = mockall::Sequence::new();
        broker
            .expect_connect()
            .times(1)
            .in_sequence(&mut seq)
            .return_once(move |_| Ok(Box::new(first)));
        broker
            .expect_connect()
            .times(1)
            .in_sequence(&mut seq)
            .return_once(move |_| Ok(Box::new(second)));

        let mut manager = manager_for(broker);
        manager.get_channel().await.unwrap();

        connected.store(false, Ordering::SeqCst);
        channel_open.store(false, Ordering::SeqCst);

        manager.get_channel().await.unwrap();
        assert_eq!(manager.connections().state(), HandleState::Live);
    }

    #[tokio::test]
    async fn connection_failure_propagates() {
        let mut broker = MockBroker::new();
        broker
            .expect_connect()
            .returning(|_| Err(AmqpError::BrokerUnavailable("unreachable".to_owned())));

        let mut manager = manager_for(broker);

        assert_eq!(
            manager.get_channel().await.err(),
            Some(AmqpError::BrokerUnavailable("unreachable".to_owned()))
        );
    }

    #[tokio::test]
    async fn channel_open_failure_propagates() {
        let mut conn = MockBrokerConnection::new();
        conn.expect_is_connected().return_const(true);
        conn.expect_create_channel()
            .returning(|| Err(AmqpError::ChannelOpenFailed("channel_max reached".to_owned())));

        let mut manager = manager_for(broker_with(conn));

        assert_eq!(
            manager.get_channel().await.err(),
            Some(AmqpError::ChannelOpenFailed("channel_max reached".to_owned()))
        );
        assert_eq!(manager.state(), HandleState::Absent);
    }

    #[tokio::test]
    async fn close_without_channel_is_a_no_op() {
        let mut manager = manager_for(MockBroker::new());

        assert!(manager.close().await.is_ok());
        assert!(manager.close().await.is_ok());
        assert!(manager.shutdown().await.is_ok());
    }

    #[tokio::test]
    async fn shutdown_closes_channel_before_connection() {
        let mut seq = mockall::Sequence::new();

        let mut channel = MockBrokerChannel::new();
        channel.expect_is_open().return_const(true);
        channel
            .expect_close()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(()));

        let mut conn = MockBrokerConnection::new();
        conn.expect_is_connected().return_const(true);
        conn.expect_create_channel()
            .return_once(move || Ok(Box::new(channel)));
        conn.expect_close()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(()));

        let mut manager = manager_for(broker_with(conn));
        manager.get_channel().await.unwrap();

        assert!(manager.shutdown().await.is_ok());
        assert!(manager.shutdown().await.is_ok());
        assert_eq!(manager.state(), HandleState::Absent);
        assert_eq!(manager.connections().state(), HandleState::Absent);
    }

    #[tokio::test]
    async fn shutdown_still_closes_connection_when_channel_close_fails() {
        let mut channel = MockBrokerChannel::new();
        channel.expect_is_open().return_const(true);
        channel
            .expect_close()
            .returning(|| Err(AmqpError::CloseFailed("channel".to_owned())));

        let mut conn = MockBrokerConnection::new();
        conn.expect_is_connected().return_const(true);
        conn.expect_create_channel()
            .return_once(move || Ok(Box::new(channel)));
        conn.expect_close().times(1).returning(|| Ok(()));

        let mut manager = manager_for(broker_with(conn));
        manager.get_channel().await.unwrap();

        assert_eq!(
            manager.shutdown().await,
            Err(AmqpError::CloseFailed("channel".to_owned()))
        );
        assert_eq!(manager.connections().state(), HandleState::Absent);
    }
}
