//! Pool and engine configuration

use super::error::{DatabaseError, Result};
use super::value::DatabaseValue;
use std::time::Duration;

/// Default timeout for database operations (30 seconds)
const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Default pause between bulk-update chunks
const DEFAULT_CHUNK_PAUSE: Duration = Duration::from_secs(1);

/// Pool configuration shared by the blocking and the async handle
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// SQLite path or `file:` URI
    pub connection_string: String,
    /// Maximum number of connections in the pool
    pub max_size: usize,
    /// Timeout for acquiring a connection from the pool
    pub timeout: Duration,
    /// Timeout for database operations (query, execute, etc.)
    pub operation_timeout: Duration,
    /// How long SQLite waits on a locked database before failing
    pub busy_timeout: Duration,
    /// Throttle between bulk-update chunks; zero disables it
    pub chunk_pause: Duration,
    /// Chunk size used when a caller does not pass one
    pub default_chunk_size: usize,
    /// Log every statement at debug level
    pub echo: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            connection_string: String::new(),
            max_size: 16,
            timeout: Duration::from_secs(5),
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            busy_timeout: Duration::from_secs(5),
            chunk_pause: DEFAULT_CHUNK_PAUSE,
            default_chunk_size: 1000,
            echo: false,
        }
    }
}

impl PoolConfig {
    /// Create a new pool configuration
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: connection_string.into(),
            ..Default::default()
        }
    }

    /// Build a configuration from `DATABASE_*` environment variables
    ///
    /// `DATABASE_URL` is required; `DATABASE_POOL_SIZE`, `DATABASE_ECHO` and
    /// `DATABASE_CHUNK_PAUSE_MS` are optional.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`PoolConfig::from_env`], reading variables through `lookup`
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let url = lookup("DATABASE_URL")
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| DatabaseError::invalid("DATABASE_URL is not set"))?;
        let mut config = Self::new(url);

        if let Some(size) = lookup("DATABASE_POOL_SIZE") {
            config.max_size = parse_number("DATABASE_POOL_SIZE", &size)?;
        }
        if let Some(echo) = lookup("DATABASE_ECHO") {
            config.echo = DatabaseValue::from(echo.trim())
                .as_bool()
                .ok_or_else(|| DatabaseError::invalid(format!("DATABASE_ECHO: '{}' is not a boolean", echo)))?;
        }
        if let Some(pause) = lookup("DATABASE_CHUNK_PAUSE_MS") {
            config.chunk_pause = Duration::from_millis(parse_number("DATABASE_CHUNK_PAUSE_MS", &pause)?);
        }
        Ok(config)
    }

    /// Set maximum pool size
    pub fn with_max_size(mut self, size: usize) -> Self {
        self.max_size = size;
        self
    }

    /// Set connection acquisition timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set database operation timeout (for query, execute, etc.)
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// Set the pause between bulk-update chunks
    pub fn with_chunk_pause(mut self, pause: Duration) -> Self {
        self.chunk_pause = pause;
        self
    }

    pub fn with_default_chunk_size(mut self, size: usize) -> Self {
        self.default_chunk_size = size;
        self
    }

    /// Log statements at debug level
    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    /// Reject settings no pool can run with
    pub fn validate(&self) -> Result<()> {
        if self.connection_string.is_empty() {
            return Err(DatabaseError::invalid("connection string is empty"));
        }
        if self.max_size == 0 {
            return Err(DatabaseError::invalid("pool max_size must be at least 1"));
        }
        if self.default_chunk_size == 0 {
            return Err(DatabaseError::invalid("default_chunk_size must be at least 1"));
        }
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| DatabaseError::invalid(format!("{}: '{}' is not a valid number", key, raw)))
}
