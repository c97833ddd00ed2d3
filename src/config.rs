// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! This module defines environment variable names, default values and the
//! typed [`Config`] loaded from the environment at startup.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `3000` |
//! | `DATABASE_URL` | Postgres connection string | Required |
//! | `GCP_PROJECT_ID` | Project used to build canonical trace names in logs | Optional |
//! | `ENCRYPTION_KEY_1..N` | Attribute encryption key ring, one variable per key version | Required in production |
//! | `APP_ENV` | `production` or `development` | `development` |
//! | `API_KEY` | Shared credential for `/persons/*` | Required |
//! | `API_KEY_HEADER` | Header carrying the credential | `x-api-key` |
//! | `REQUEST_TIMEOUT_SECS` | Deadline applied to database work of one request | `15` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `json` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=info,sqlx=warn` |

use std::time::Duration;

use crate::crypto::{EncryptionKey, KeyRing};

pub const HOST_ENV: &str = "HOST";
pub const PORT_ENV: &str = "PORT";
pub const DATABASE_URL_ENV: &str = "DATABASE_URL";
pub const GCP_PROJECT_ID_ENV: &str = "GCP_PROJECT_ID";
pub const APP_ENV_ENV: &str = "APP_ENV";
pub const API_KEY_ENV: &str = "API_KEY";
pub const API_KEY_HEADER_ENV: &str = "API_KEY_HEADER";
pub const REQUEST_TIMEOUT_ENV: &str = "REQUEST_TIMEOUT_SECS";
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

/// Prefix of the key ring variables. Version `n` is read from
/// `ENCRYPTION_KEY_n`; versions must be consecutive starting at 1.
pub const ENCRYPTION_KEY_PREFIX: &str = "ENCRYPTION_KEY_";

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_API_KEY_HEADER: &str = "x-api-key";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Placeholder key used outside production when no key ring is configured.
///
/// Anything encrypted with it is readable by anyone holding the source.
pub const DEV_ENCRYPTION_KEY: &str = "default-key-for-dev";

/// Upper bound on key ring size, so a typo cannot make startup scan forever.
const MAX_KEY_VERSIONS: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable is not set")]
    Missing(&'static str),

    #[error("invalid {name} value {value:?}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

/// Log output style.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per line (Cloud Logging compatible).
    Json,
    /// Human readable multi-line output for local work.
    Pretty,
}

/// Typed service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub gcp_project_id: Option<String>,
    pub environment: Environment,
    pub keys: KeyRing,
    pub api_key: ApiKey,
    pub api_key_header: String,
    pub request_timeout: Duration,
    pub log_format: LogFormat,
}

/// Shared static credential for the authenticated surface.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// Empty values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let environment = match get(APP_ENV_ENV).as_deref() {
            None | Some("development") | Some("dev") | Some("local") => Environment::Development,
            Some("production") | Some("prod") => Environment::Production,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: APP_ENV_ENV,
                    value: other.to_string(),
                    reason: "expected production or development".to_string(),
                })
            }
        };

        let port = match get(PORT_ENV) {
            Some(raw) => raw.trim().parse::<u16>().map_err(|e| ConfigError::Invalid {
                name: PORT_ENV,
                value: raw.clone(),
                reason: e.to_string(),
            })?,
            None => DEFAULT_PORT,
        };

        let database_url = get(DATABASE_URL_ENV).ok_or(ConfigError::Missing(DATABASE_URL_ENV))?;
        url::Url::parse(&database_url).map_err(|e| ConfigError::Invalid {
            name: DATABASE_URL_ENV,
            value: redact_database_url(&database_url),
            reason: e.to_string(),
        })?;

        let mut keys = Vec::new();
        while keys.len() < MAX_KEY_VERSIONS {
            let name = format!("{ENCRYPTION_KEY_PREFIX}{}", keys.len() + 1);
            match get(&name) {
                Some(secret) => keys.push(EncryptionKey::new(secret)),
                None => break,
            }
        }
        if keys.is_empty() {
            if environment == Environment::Production {
                return Err(ConfigError::Missing("ENCRYPTION_KEY_1"));
            }
            keys.push(EncryptionKey::new(DEV_ENCRYPTION_KEY));
        }
        let keys = KeyRing::new(keys).map_err(|e| ConfigError::Invalid {
            name: "ENCRYPTION_KEY_1",
            value: "***".to_string(),
            reason: e.to_string(),
        })?;

        let api_key = get(API_KEY_ENV)
            .map(ApiKey::new)
            .ok_or(ConfigError::Missing(API_KEY_ENV))?;

        let request_timeout = match get(REQUEST_TIMEOUT_ENV) {
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => {
                    return Err(ConfigError::Invalid {
                        name: REQUEST_TIMEOUT_ENV,
                        value: raw,
                        reason: "expected a positive number of seconds".to_string(),
                    })
                }
            },
            None => DEFAULT_REQUEST_TIMEOUT,
        };

        let log_format = match get(LOG_FORMAT_ENV).as_deref() {
            None | Some("json") => LogFormat::Json,
            Some("pretty") => LogFormat::Pretty,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: LOG_FORMAT_ENV,
                    value: other.to_string(),
                    reason: "expected json or pretty".to_string(),
                })
            }
        };

        Ok(Self {
            host: get(HOST_ENV).unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port,
            database_url,
            gcp_project_id: get(GCP_PROJECT_ID_ENV),
            environment,
            keys,
            api_key,
            api_key_header: get(API_KEY_HEADER_ENV)
                .map(|h| h.to_ascii_lowercase())
                .unwrap_or_else(|| DEFAULT_API_KEY_HEADER.to_string()),
            request_timeout,
            log_format,
        })
    }

    /// Bind address in `host:port` form.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Render a database URL without its password, for logging.
pub fn redact_database_url(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("***"));
            }
            parsed.to_string()
        }
        Err(_) => "<unparseable database url>".to_string(),
    }
}
