// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Topology Setup Command
//!
//! Installs a configured topology once and reports the outcome as an exit
//! status. Production environments are skipped unless the run is forced.

use crate::{
    errors::AmqpError,
    service::AmqpService,
    topology::{SetupReport, TopologySpec},
};
use tracing::{error, info, warn};

pub const PRODUCTION_ENVIRONMENT: &str = "production";

/// Outcome of one setup run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupStatus {
    /// Production guard engaged; the broker was not contacted.
    Skipped,
    Completed(SetupReport),
    Failed,
}

impl SetupStatus {
    /// Process exit status: 0 unless the setup failed.
    pub fn exit_code(&self) -> u8 {
        match self {
            SetupStatus::Skipped | SetupStatus::Completed(_) => 0,
            SetupStatus::Failed => 1,
        }
    }
}

/// One-shot topology installation guarded by environment.
#[derive(Debug, Clone)]
pub struct SetupCommand {
    environment: String,
    force: bool,
}

impl SetupCommand {
    /// `force` lifts the production guard.
    pub fn new(environment: &str, force: bool) -> Self {
        SetupCommand {
            environment: environment.to_owned(),
            force,
        }
    }

    fn is_guarded(&self) -> bool {
        self.environment.eq_ignore_ascii_case(PRODUCTION_ENVIRONMENT) && !self.force
    }

    /// Runs the setup against `service` and closes it afterwards.
    ///
    /// Failures are logged and folded into [`SetupStatus::Failed`]; nothing
    /// is retried.
    pub async fn execute(&self, service: &mut AmqpService, topology: &TopologySpec) -> SetupStatus {
        if self.is_guarded() {
            warn!(
                environment = %self.environment,
                "refusing to set up amqp topology in production without --force"
            );
            return SetupStatus::Skipped;
        }

        info!(
            exchanges = topology.exchanges().len(),
            queues = topology.queues().len(),
            host = %service.config().host,
            "creating amqp topology"
        );

        let status = match service.topology().setup_from_config(topology).await {
            Ok(report) => {
                info!(
                    exchanges = report.exchanges,
                    queues = report.queues,
                    bindings = report.bindings,
                    "amqp setup completed"
                );
                SetupStatus::Completed(report)
            }
            Err(err) => {
                let object = match &err {
                    AmqpError::TopologyConflict { object, .. } => object.as_str(),
                    _ => "broker",
                };
                error!(
                    error = %err,
                    object,
                    exchanges_count = topology.exchanges().len(),
                    queues_count = topology.queues().len(),
                    "amqp setup failed"
                );
                SetupStatus::Failed
            }
        };

        if let Err(err) = service.close().await {
            warn!(error = %err, "failure to close the amqp service after setup");
        }

        status
    }
}
