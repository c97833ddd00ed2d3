// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::process::ExitCode;

use person_service::config::{Config, Environment, DEV_ENCRYPTION_KEY};
use person_service::{logging, server};
use tracing::{error, warn};

#[tokio::main]
async fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = logging::init(config.log_format, config.gcp_project_id.clone()) {
        eprintln!("failed to initialise logging: {e}");
        return ExitCode::FAILURE;
    }

    if config.environment == Environment::Development
        && config.keys.current().expose() == DEV_ENCRYPTION_KEY
    {
        warn!("ENCRYPTION_KEY_1 not set; using the development placeholder key");
    }

    match server::run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Server failed");
            ExitCode::FAILURE
        }
    }
}
