// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Logging
//!
//! Installs the global `tracing` subscriber. `RUST_LOG` takes precedence
//! over the level passed by the caller.

use thiserror::Error;
use tracing_subscriber::EnvFilter;

#[derive(Error, Debug)]
pub enum LoggerError {
    #[error("invalid log filter `{directive}`: {reason}")]
    InvalidFilter { directive: String, reason: String },

    #[error("logger initialization error: {0}")]
    InitializationError(String),
}

/// Builds the filter from `RUST_LOG`, falling back to `default_level`.
pub fn env_filter(default_level: &str) -> Result<EnvFilter, LoggerError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    EnvFilter::try_new(default_level).map_err(|err| LoggerError::InvalidFilter {
        directive: default_level.to_owned(),
        reason: err.to_string(),
    })
}

/// Installs a fmt subscriber. Fails if one is already installed.
pub fn init(default_level: &str) -> Result<(), LoggerError> {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(default_level)?)
        .with_target(false)
        .try_init()
        .map_err(|err| LoggerError::InitializationError(err.to_string()))
}
