// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Configuration
//!
//! Connection settings and the declarative topology tree. The configuration
//! is read once from a JSON document, overridden by `AMQP_*` environment
//! variables, and treated as read-only afterwards.
//!
//! Exchange and queue tables keep the key order of the document, since the
//! setup declares them in that order.

use crate::{
    errors::AmqpError,
    exchange::{ExchangeDefinition, ExchangeKind},
    queue::QueueDefinition,
    topology::TopologySpec,
};
use lapin::{
    types::{AMQPValue, FieldArray, FieldTable, LongString, ShortString},
    uri::{AMQPAuthority, AMQPUri, AMQPUserInfo},
};
use serde::{
    de::{MapAccess, Visitor},
    Deserialize, Deserializer,
};
use serde_json::Value;
use std::{collections::BTreeMap, fmt, fs, marker::PhantomData, path::Path};
use tracing::debug;

pub const ENV_HOST: &str = "AMQP_HOST";
pub const ENV_PORT: &str = "AMQP_PORT";
pub const ENV_USER: &str = "AMQP_USER";
pub const ENV_PASSWORD: &str = "AMQP_PASSWORD";
pub const ENV_VHOST: &str = "AMQP_VHOST";

/// Broker connection settings.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub vhost: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            host: "localhost".to_owned(),
            port: 5672,
            user: "guest".to_owned(),
            password: "guest".to_owned(),
            vhost: "/".to_owned(),
        }
    }
}

impl ConnectionConfig {
    /// Structured URI for the client; credentials and vhost are passed as is.
    pub fn amqp_uri(&self) -> AMQPUri {
        AMQPUri {
            authority: AMQPAuthority {
                userinfo: AMQPUserInfo {
                    username: self.user.clone(),
                    password: self.password.clone(),
                },
                host: self.host.clone(),
                port: self.port,
            },
            vhost: self.vhost.clone(),
            ..Default::default()
        }
    }
}

// The password never reaches logs.
impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"***")
            .field("vhost", &self.vhost)
            .finish()
    }
}

impl fmt::Display for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "amqp://{}@{}:{}/{}",
            self.user, self.host, self.port, self.vhost
        )
    }
}

/// Exchange entry of the topology tree.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    #[serde(rename = "type")]
    pub kind: ExchangeKind,
    pub durable: bool,
    pub auto_delete: bool,
    pub passive: bool,
    pub internal: bool,
    pub nowait: bool,
    pub arguments: BTreeMap<String, Value>,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        ExchangeConfig {
            kind: ExchangeKind::Direct,
            durable: true,
            auto_delete: false,
            passive: false,
            internal: false,
            nowait: false,
            arguments: BTreeMap::default(),
        }
    }
}

impl ExchangeConfig {
    pub fn definition(&self, name: &str) -> ExchangeDefinition {
        ExchangeDefinition {
            name: name.to_owned(),
            kind: self.kind,
            delete: self.auto_delete,
            durable: self.durable,
            passive: self.passive,
            internal: self.internal,
            no_wait: self.nowait,
            arguments: amqp_arguments(&self.arguments),
        }
    }
}

/// Queue entry of the topology tree.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub durable: bool,
    pub exclusive: bool,
    pub auto_delete: bool,
    pub passive: bool,
    pub nowait: bool,
    pub arguments: BTreeMap<String, Value>,
    pub exchange: Option<String>,
    pub routing_key: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        QueueConfig {
            durable: true,
            exclusive: false,
            auto_delete: false,
            passive: false,
            nowait: false,
            arguments: BTreeMap::default(),
            exchange: None,
            routing_key: String::new(),
        }
    }
}

impl QueueConfig {
    pub fn definition(&self, name: &str) -> QueueDefinition {
        QueueDefinition {
            name: name.to_owned(),
            durable: self.durable,
            delete: self.auto_delete,
            exclusive: self.exclusive,
            passive: self.passive,
            no_wait: self.nowait,
            arguments: amqp_arguments(&self.arguments),
            exchange: self.exchange.clone(),
            routing_key: self.routing_key.clone(),
        }
    }
}

/// The whole configuration tree: connection settings plus the optional
/// exchange and queue tables.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AmqpConfig {
    #[serde(flatten)]
    pub connection: ConnectionConfig,
    #[serde(default, deserialize_with = "ordered_entries")]
    pub exchanges: Vec<(String, ExchangeConfig)>,
    #[serde(default, deserialize_with = "ordered_entries")]
    pub queues: Vec<(String, QueueConfig)>,
}

impl AmqpConfig {
    pub fn from_json(document: &str) -> Result<Self, AmqpError> {
        serde_json::from_str(document).map_err(|err| AmqpError::ConfigError(err.to_string()))
    }

    /// Reads the document at `path` (defaults when `None`), then applies the
    /// process environment on top of it.
    pub fn load(path: Option<&Path>) -> Result<Self, AmqpError> {
        let config = match path {
            Some(path) => {
                debug!(path = %path.display(), "reading amqp configuration");
                let document = fs::read_to_string(path).map_err(|err| {
                    AmqpError::ConfigError(format!("{}: {}", path.display(), err))
                })?;
                Self::from_json(&document)?
            }
            None => AmqpConfig::default(),
        };

        config.apply_env(|key| std::env::var(key).ok())
    }

    /// Overrides connection settings with the values `lookup` returns for
    /// the `AMQP_*` keys.
    pub fn apply_env<F>(mut self, lookup: F) -> Result<Self, AmqpError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup(ENV_HOST) {
            self.connection.host = host;
        }
        if let Some(port) = lookup(ENV_PORT) {
            self.connection.port = port
                .trim()
                .parse()
                .map_err(|_| AmqpError::ConfigError(format!("{ENV_PORT}=`{port}` is not a port")))?;
        }
        if let Some(user) = lookup(ENV_USER) {
            self.connection.user = user;
        }
        if let Some(password) = lookup(ENV_PASSWORD) {
            self.connection.password = password;
        }
        if let Some(vhost) = lookup(ENV_VHOST) {
            self.connection.vhost = vhost;
        }

        Ok(self)
    }
}

impl From<&AmqpConfig> for TopologySpec {
    fn from(config: &AmqpConfig) -> Self {
        let spec = config
            .exchanges
            .iter()
            .fold(TopologySpec::new(), |spec, (name, exchange)| {
                spec.exchange(exchange.definition(name))
            });

        config
            .queues
            .iter()
            .fold(spec, |spec, (name, queue)| spec.queue(queue.definition(name)))
    }
}

/// Converts JSON declaration arguments into AMQP field values.
pub fn amqp_arguments(arguments: &BTreeMap<String, Value>) -> BTreeMap<ShortString, AMQPValue> {
    arguments
        .iter()
        .map(|(key, value)| (ShortString::from(key.as_str()), amqp_value(value)))
        .collect()
}

fn amqp_value(value: &Value) -> AMQPValue {
    match value {
        Value::Null => AMQPValue::Void,
        Value::Bool(b) => AMQPValue::Boolean(*b),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => AMQPValue::LongLongInt(i),
            (None, Some(f)) => AMQPValue::Double(f),
            (None, None) => AMQPValue::LongString(LongString::from(n.to_string())),
        },
        Value::String(s) => AMQPValue::LongString(LongString::from(s.as_str())),
        Value::Array(items) => AMQPValue::FieldArray(FieldArray::from(
            items.iter().map(amqp_value).collect::<Vec<_>>(),
        )),
        Value::Object(map) => {
            let table: BTreeMap<ShortString, AMQPValue> = map
                .iter()
                .map(|(key, value)| (ShortString::from(key.as_str()), amqp_value(value)))
                .collect();
            AMQPValue::FieldTable(FieldTable::from(table))
        }
    }
}

fn ordered_entries<'de, D, T>(deserializer: D) -> Result<Vec<(String, T)>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    struct OrderedVisitor<T>(PhantomData<T>);

    impl<'de, T> Visitor<'de> for OrderedVisitor<T>
    where
        T: Deserialize<'de>,
    {
        type Value = Vec<(String, T)>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a map of named definitions")
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E> {
            Ok(Vec::new())
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some(entry) = map.next_entry::<String, T>()? {
                entries.push(entry);
            }
            Ok(entries)
        }
    }

    deserializer.deserialize_any(OrderedVisitor(PhantomData))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const DOCUMENT: &str = r#"{
        "host": "rabbit.internal",
        "port": 5673,
        "exchanges": {
            "ex1": { "type": "fanout", "durable": true },
            "ex2": { "type": "direct", "durable": false }
        },
        "queues": {
            "q1": { "durable": true, "exchange": "ex1", "routing_key": "rk1" },
            "q2": { "durable": false }
        }
    }"#;

    #[test]
    fn missing_connection_fields_use_defaults() {
        let config = AmqpConfig::from_json(DOCUMENT).unwrap();

        assert_eq!(config.connection.host, "rabbit.internal");
        assert_eq!(config.connection.port, 5673);
        assert_eq!(config.connection.user, "guest");
        assert_eq!(config.connection.password, "guest");
        assert_eq!(config.connection.vhost, "/");
    }

    #[test]
    fn tables_keep_document_order() {
        let json = r#"{ "exchanges": { "zeta": {}, "alpha": {}, "mid": {} } }"#;
        let config = AmqpConfig::from_json(json).unwrap();

        let names: Vec<&str> = config.exchanges.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn empty_document_has_no_topology() {
        let config = AmqpConfig::from_json("{}").unwrap();

        assert_eq!(config.connection, ConnectionConfig::default());
        assert!(config.exchanges.is_empty());
        assert!(config.queues.is_empty());
    }

    #[test]
    fn topology_defaults_are_durable_and_unbound() {
        let json = r#"{ "exchanges": { "e": {} }, "queues": { "q": {} } }"#;
        let config = AmqpConfig::from_json(json).unwrap();

        let exchange = config.exchanges[0].1.definition("e");
        assert_eq!(exchange.exchange_kind(), ExchangeKind::Direct);
        assert!(exchange.is_durable());
        assert!(!exchange.is_auto_delete());
        assert!(!exchange.is_passive());

        let queue = config.queues[0].1.definition("q");
        assert!(queue.is_durable());
        assert!(!queue.is_exclusive());
        assert_eq!(queue.binding(), None);
    }

    #[test]
    fn unknown_exchange_type_is_rejected() {
        let json = r#"{ "exchanges": { "e": { "type": "bogus" } } }"#;

        let kind_error = AmqpError::InvalidExchangeKind("bogus".to_owned()).to_string();

        match AmqpConfig::from_json(json) {
            Err(AmqpError::ConfigError(reason)) => assert!(reason.contains(&kind_error)),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn exchange_type_is_case_insensitive() {
        let json = r#"{ "exchanges": { "e": { "type": "Fanout" } } }"#;

        let config = AmqpConfig::from_json(json).unwrap();

        assert_eq!(config.exchanges[0].1.kind, ExchangeKind::Fanout);
    }

    #[test]
    fn arguments_are_converted_to_field_values() {
        let json = r#"{ "queues": { "q": { "arguments": {
            "x-message-ttl": 60000,
            "x-dead-letter-exchange": "dlx",
            "x-single-active-consumer": true
        } } } }"#;
        let config = AmqpConfig::from_json(json).unwrap();
        let args = config.queues[0].1.definition("q").arguments().clone();

        assert_eq!(
            args.get(&ShortString::from("x-message-ttl")),
            Some(&AMQPValue::LongLongInt(60000))
        );
        assert_eq!(
            args.get(&ShortString::from("x-dead-letter-exchange")),
            Some(&AMQPValue::LongString(LongString::from("dlx")))
        );
        assert_eq!(
            args.get(&ShortString::from("x-single-active-consumer")),
            Some(&AMQPValue::Boolean(true))
        );
    }

    #[test]
    fn environment_overrides_the_document() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_HOST, "env-host"),
            (ENV_PORT, "1234"),
            (ENV_USER, "env-user"),
        ]);
        let config = AmqpConfig::from_json(DOCUMENT)
            .unwrap()
            .apply_env(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.connection.host, "env-host");
        assert_eq!(config.connection.port, 1234);
        assert_eq!(config.connection.user, "env-user");
        assert_eq!(config.connection.password, "guest");
    }

    #[test]
    fn invalid_port_in_environment_is_an_error() {
        let result = AmqpConfig::default().apply_env(|key| {
            (key == ENV_PORT).then(|| "not-a-port".to_owned())
        });

        assert!(matches!(result, Err(AmqpError::ConfigError(_))));
    }

    #[test]
    fn password_is_redacted_from_debug_and_display() {
        let config = ConnectionConfig {
            password: "s3cret".to_owned(),
            ..Default::default()
        };

        assert!(!format!("{config:?}").contains("s3cret"));
        assert!(!config.to_string().contains("s3cret"));
    }

    #[test]
    fn uri_carries_credentials_and_vhost() {
        let uri = ConnectionConfig::default().amqp_uri();

        assert_eq!(uri.authority.host, "localhost");
        assert_eq!(uri.authority.port, 5672);
        assert_eq!(uri.authority.userinfo.username, "guest");
        assert_eq!(uri.vhost, "/");
    }

    #[test]
    fn topology_spec_follows_config_order() {
        let config = AmqpConfig::from_json(DOCUMENT).unwrap();
        let spec = TopologySpec::from(&config);

        let exchanges: Vec<&str> = spec.exchanges().iter().map(|e| e.name()).collect();
        let queues: Vec<&str> = spec.queues().iter().map(|q| q.name()).collect();
        assert_eq!(exchanges, vec!["ex1", "ex2"]);
        assert_eq!(queues, vec!["q1", "q2"]);
    }
}
