//! Connection settings, assembled from discrete fields.

use std::str::FromStr;
use std::time::Duration;

use sqlx::postgres::{PgConnectOptions, PgSslMode};
use sqlx::ConnectOptions;
use thiserror::Error;

/// Deployment environment, read from `ENVIRONMENT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    Production,
    Staging,
    Demo,
    #[default]
    Development,
    Test,
}

impl Environment {
    pub fn is_test(self) -> bool {
        self == Self::Test
    }

    pub fn is_online(self) -> bool {
        matches!(self, Self::Production | Self::Staging | Self::Demo)
    }
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "production" => Ok(Self::Production),
            "staging" => Ok(Self::Staging),
            "demo" => Ok(Self::Demo),
            "development" | "" => Ok(Self::Development),
            "test" => Ok(Self::Test),
            other => Err(ConfigError::Invalid {
                key: "ENVIRONMENT",
                value: other.to_owned(),
            }),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid value '{value}' for {key}")]
    Invalid { key: &'static str, value: String },
}

/// Everything needed to open the pool.
#[derive(Debug, Clone)]
pub struct PgConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    /// libpq-style SSL mode (`disable`, `prefer`, `require`, ...).
    pub ssl_mode: String,
    /// Default schema placed ahead of `public` on the search path.
    pub schema: Option<String>,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    /// Log every statement and its arguments at `info`.
    pub log_queries: bool,
    pub environment: Environment,
}

impl Default for PgConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 5432,
            user: "postgres".into(),
            password: String::new(),
            database: "postgres".into(),
            ssl_mode: "disable".into(),
            schema: None,
            max_connections: 10,
            acquire_timeout: Duration::from_secs(30),
            log_queries: false,
            environment: Environment::default(),
        }
    }
}

impl PgConfig {
    /// Read `POSTGRES_*`, `LOG_DB` and `ENVIRONMENT` from the process
    /// environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`PgConfig::from_env`] but with an injectable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &'static str| {
            lookup(key)
                .filter(|v| !v.is_empty())
                .ok_or(ConfigError::Missing(key))
        };
        let defaults = Self::default();

        let port = match lookup("POSTGRES_PORT") {
            Some(raw) => parse(&raw, "POSTGRES_PORT")?,
            None => defaults.port,
        };
        let max_connections = match lookup("POSTGRES_MAX_CONNECTIONS") {
            Some(raw) => parse(&raw, "POSTGRES_MAX_CONNECTIONS")?,
            None => defaults.max_connections,
        };
        let log_queries = match lookup("LOG_DB") {
            Some(raw) => parse_bool(&raw, "LOG_DB")?,
            None => false,
        };
        let environment = match lookup("ENVIRONMENT") {
            Some(raw) => raw.parse()?,
            None => Environment::default(),
        };

        let config = Self {
            host: required("POSTGRES_HOST")?,
            port,
            user: required("POSTGRES_USER")?,
            password: required("POSTGRES_PASSWORD")?,
            database: required("POSTGRES_DB")?,
            ssl_mode: lookup("POSTGRES_SSLMODE").unwrap_or(defaults.ssl_mode),
            schema: lookup("POSTGRES_SCHEMA").filter(|s| !s.is_empty()),
            max_connections,
            acquire_timeout: defaults.acquire_timeout,
            log_queries,
            environment,
        };
        config.ssl()?;
        Ok(config)
    }

    fn ssl(&self) -> Result<PgSslMode, ConfigError> {
        self.ssl_mode.parse().map_err(|_| ConfigError::Invalid {
            key: "POSTGRES_SSLMODE",
            value: self.ssl_mode.clone(),
        })
    }

    /// Build sqlx connect options from the discrete fields.
    pub fn connect_options(&self) -> Result<PgConnectOptions, ConfigError> {
        let mut options = PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(&self.password)
            .database(&self.database)
            .ssl_mode(self.ssl()?);
        if let Some(schema) = &self.schema {
            options = options.options([("search_path", format!("{schema},public"))]);
        }
        // Statement logging is done by the store so it can include arguments.
        Ok(options.disable_statement_logging())
    }
}

fn parse<T: FromStr>(raw: &str, key: &'static str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::Invalid {
        key,
        value: raw.to_owned(),
    })
}

fn parse_bool(raw: &str, key: &'static str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key,
            value: raw.to_owned(),
        }),
    }
}
