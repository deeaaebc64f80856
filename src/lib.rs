// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

mod otel;

pub mod broker;
pub mod channel;
pub mod config;
pub mod connection;
pub mod consumer;
pub mod errors;
pub mod exchange;
pub mod handle;
pub mod lapin_broker;
pub mod logger;
pub mod publisher;
pub mod queue;
pub mod service;
pub mod setup;
pub mod topology;
