//! PostgreSQL connection configuration.

use std::time::Duration;

use sqlstash_core::{CacheConfig, CacheSettings};

use crate::error::{PgError, PgResult};

/// Default PostgreSQL port.
pub const DEFAULT_PORT: u16 = 5432;

/// Default connection timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// PostgreSQL connection configuration.
#[derive(Debug, Clone)]
pub struct PgConfig {
    /// Database URL.
    pub url: String,
    /// Host (extracted from URL or explicit).
    pub host: String,
    /// Port (default: 5432).
    pub port: u16,
    /// Database name.
    pub database: String,
    /// Username.
    pub user: String,
    /// Password.
    pub password: Option<String>,
    /// SSL mode.
    pub ssl_mode: SslMode,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Server-side statement timeout, applied once after connecting.
    pub statement_timeout: Option<Duration>,
    /// Application name (shown in pg_stat_activity).
    pub application_name: Option<String>,
    /// Statement cache policy for connections built from this config.
    pub cache: CacheConfig,
    /// Unrecognized URL parameters, passed to the server as run-time options.
    pub options: Vec<(String, String)>,
}

/// SSL mode for connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SslMode {
    /// Disable SSL.
    Disable,
    /// Prefer SSL but allow non-SSL.
    #[default]
    Prefer,
    /// Require SSL.
    Require,
}

impl SslMode {
    fn parse(value: &str) -> PgResult<Self> {
        match value {
            "disable" => Ok(Self::Disable),
            "prefer" => Ok(Self::Prefer),
            "require" => Ok(Self::Require),
            other => Err(PgError::config(format!("invalid sslmode: {}", other))),
        }
    }
}

impl PgConfig {
    /// Create a configuration from a database URL.
    ///
    /// Besides the usual libpq parameters, `cache_shards`,
    /// `cache_min_promote`, `cache_janitor_ms` and `cache_idle_ttl_ms` tune
    /// the statement cache.
    pub fn from_url(url: impl Into<String>) -> PgResult<Self> {
        let url = url.into();
        let parsed = url::Url::parse(&url)
            .map_err(|e| PgError::config(format!("invalid database URL: {}", e)))?;

        if parsed.scheme() != "postgresql" && parsed.scheme() != "postgres" {
            return Err(PgError::config(format!(
                "invalid scheme: expected 'postgresql' or 'postgres', got '{}'",
                parsed.scheme()
            )));
        }

        let host = parsed
            .host_str()
            .ok_or_else(|| PgError::config("missing host in URL"))?
            .to_string();
        let port = parsed.port().unwrap_or(DEFAULT_PORT);

        let database = parsed.path().trim_start_matches('/').to_string();
        if database.is_empty() {
            return Err(PgError::config("missing database name in URL"));
        }

        let user = if parsed.username().is_empty() {
            "postgres".to_string()
        } else {
            parsed.username().to_string()
        };
        let password = parsed.password().map(String::from);

        let mut ssl_mode = SslMode::Prefer;
        let mut connect_timeout = DEFAULT_CONNECT_TIMEOUT;
        let mut statement_timeout = None;
        let mut application_name = None;
        let mut cache = CacheSettings::default();
        let mut options = Vec::new();

        for (key, value) in parsed.query_pairs() {
            let value: &str = &value;
            match &*key {
                "sslmode" => ssl_mode = SslMode::parse(value)?,
                "connect_timeout" => {
                    connect_timeout = Duration::from_secs(parse_number(&key, value)?);
                }
                "statement_timeout" => {
                    statement_timeout = Some(Duration::from_millis(parse_number(&key, value)?));
                }
                "application_name" => application_name = Some(value.to_string()),
                "cache_shards" => cache.shards = parse_number(&key, value)? as usize,
                "cache_min_promote" => cache.min_promote_count = parse_number(&key, value)?,
                "cache_janitor_ms" => cache.janitor_interval_ms = parse_number(&key, value)?,
                "cache_idle_ttl_ms" => cache.idle_ttl_ms = parse_number(&key, value)?,
                other => options.push((other.to_string(), value.to_string())),
            }
        }

        Ok(Self {
            url,
            host,
            port,
            database,
            user,
            password,
            ssl_mode,
            connect_timeout,
            statement_timeout,
            application_name,
            cache: cache.into_config()?,
            options,
        })
    }

    /// Create a builder for configuration.
    pub fn builder() -> PgConfigBuilder {
        PgConfigBuilder::new()
    }

    /// Convert to tokio-postgres config.
    pub fn to_pg_config(&self) -> tokio_postgres::Config {
        let mut config = tokio_postgres::Config::new();
        config.host(&self.host);
        config.port(self.port);
        config.dbname(&self.database);
        config.user(&self.user);

        if let Some(ref password) = self.password {
            config.password(password);
        }
        if let Some(ref app_name) = self.application_name {
            config.application_name(app_name);
        }
        config.ssl_mode(match self.ssl_mode {
            SslMode::Disable => tokio_postgres::config::SslMode::Disable,
            SslMode::Prefer => tokio_postgres::config::SslMode::Prefer,
            SslMode::Require => tokio_postgres::config::SslMode::Require,
        });
        config.connect_timeout(self.connect_timeout);

        if !self.options.is_empty() {
            let options = self
                .options
                .iter()
                .map(|(key, value)| format!("-c {}={}", key, value))
                .collect::<Vec<_>>()
                .join(" ");
            config.options(&options);
        }

        config
    }
}

fn parse_number(key: &str, value: &str) -> PgResult<u64> {
    value
        .parse()
        .map_err(|_| PgError::config(format!("invalid {}: '{}'", key, value)))
}

/// Builder for PostgreSQL configuration.
#[derive(Debug, Default)]
pub struct PgConfigBuilder {
    url: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    database: Option<String>,
    user: Option<String>,
    password: Option<String>,
    ssl_mode: Option<SslMode>,
    connect_timeout: Option<Duration>,
    statement_timeout: Option<Duration>,
    application_name: Option<String>,
    cache: Option<CacheConfig>,
}

impl PgConfigBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the database URL (parses all connection parameters).
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Set the host.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Set the port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set the database name.
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Set the username.
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Set the password.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set the SSL mode.
    pub fn ssl_mode(mut self, mode: SslMode) -> Self {
        self.ssl_mode = Some(mode);
        self
    }

    /// Set the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Set the statement timeout.
    pub fn statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = Some(timeout);
        self
    }

    /// Set the application name.
    pub fn application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = Some(name.into());
        self
    }

    /// Set the statement cache policy.
    pub fn cache(mut self, cache: CacheConfig) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Build the configuration.
    pub fn build(self) -> PgResult<PgConfig> {
        let mut config = match self.url {
            Some(url) => PgConfig::from_url(url)?,
            None => {
                let host = self.host.clone().unwrap_or_else(|| "localhost".to_string());
                let port = self.port.unwrap_or(DEFAULT_PORT);
                let database = self
                    .database
                    .clone()
                    .ok_or_else(|| PgError::config("database name is required"))?;
                let user = self.user.clone().unwrap_or_else(|| "postgres".to_string());
                let url = format!("postgresql://{}@{}:{}/{}", user, host, port, database);

                PgConfig {
                    url,
                    host,
                    port,
                    database,
                    user,
                    password: None,
                    ssl_mode: SslMode::default(),
                    connect_timeout: DEFAULT_CONNECT_TIMEOUT,
                    statement_timeout: None,
                    application_name: None,
                    cache: CacheConfig::default(),
                    options: Vec::new(),
                }
            }
        };

        // Explicit values win over the URL.
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(database) = self.database {
            config.database = database;
        }
        if let Some(user) = self.user {
            config.user = user;
        }
        if let Some(password) = self.password {
            config.password = Some(password);
        }
        if let Some(ssl_mode) = self.ssl_mode {
            config.ssl_mode = ssl_mode;
        }
        if let Some(timeout) = self.connect_timeout {
            config.connect_timeout = timeout;
        }
        if let Some(timeout) = self.statement_timeout {
            config.statement_timeout = Some(timeout);
        }
        if let Some(name) = self.application_name {
            config.application_name = Some(name);
        }
        if let Some(cache) = self.cache {
            cache.validate()?;
            config.cache = cache;
        }

        Ok(config)
    }
}
