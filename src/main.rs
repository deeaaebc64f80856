// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! amqp-setup: declares the configured exchanges, queues and bindings.

use std::{path::PathBuf, process::ExitCode};

use amqp_service::{
    config::AmqpConfig, logger, service::AmqpService, setup::SetupCommand,
    topology::TopologySpec,
};
use clap::Parser;
use tracing::error;

/// Installs an AMQP topology from a JSON configuration file
#[derive(Parser, Debug)]
#[command(name = "amqp-setup")]
#[command(about = "Declare AMQP exchanges, queues and bindings from configuration")]
struct Args {
    /// Path to the JSON configuration; defaults only when omitted
    #[arg(short, long, env = "AMQP_CONFIG")]
    config: Option<PathBuf>,

    /// Run even in the production environment
    #[arg(long)]
    force: bool,

    /// Deployment environment name
    #[arg(long = "env", env = "APP_ENV", default_value = "local")]
    environment: String,

    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    let args = Args::parse();

    if let Err(err) = logger::init(&args.log_level) {
        eprintln!("{err}");
        return ExitCode::FAILURE;
    }

    let config = match AmqpConfig::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "failure to load the amqp configuration");
            return ExitCode::FAILURE;
        }
    };

    let topology = TopologySpec::from(&config);
    let mut service = AmqpService::with_lapin(config.connection);

    let status = SetupCommand::new(&args.environment, args.force)
        .execute(&mut service, &topology)
        .await;

    ExitCode::from(status.exit_code())
}
