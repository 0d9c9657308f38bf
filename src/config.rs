//! Server configuration.
//!
//! Values come from command-line arguments, then a small set of keys stored
//! alongside the articles (`maxarticlesize`, `timeout`) may override them at
//! startup.

use crate::storage::{ArticleStore, StorageResult};
use std::net::IpAddr;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Standard NNTP port.
pub const DEFAULT_PORT: u16 = 119;

/// The default host newsd binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Storage config key overriding `max_article_size` (bytes).
pub const KEY_MAX_ARTICLE_SIZE: &str = "maxarticlesize";

/// Storage config key overriding `idle_timeout` (seconds).
pub const KEY_TIMEOUT: &str = "timeout";

/// Errors raised while parsing command-line arguments.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} requires a value")]
    MissingValue(String),

    #[error("invalid value for {flag}: {value}")]
    InvalidValue { flag: String, value: String },

    #[error("unknown argument: {0}")]
    UnknownArgument(String),
}

/// What the command line asked for.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgsOutcome {
    Run(ServerConfig),
    Help,
    Version,
}

/// Runtime configuration shared by every component.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Host name announced in the greeting and stamped into Path/Message-ID
    pub hostname: String,
    /// Largest accepted article body, in bytes
    pub max_article_size: usize,
    /// Connections idle for longer than this are purged
    pub idle_timeout: Duration,
    /// How often the idle reaper runs
    pub reaper_interval: Duration,
    /// Capacity of every pooled buffer (one protocol line)
    pub buffer_capacity: usize,
    /// Maximum number of idle buffers kept for reuse
    pub buffer_pool_size: usize,
    /// Number of protocol worker tasks
    pub worker_count: usize,
    /// Capacity of the ready-connection queue
    pub ready_queue_capacity: usize,
    /// Peers allowed to post straight into mailing-list mirrored groups
    pub trusted_peers: Vec<IpAddr>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2)
            .max(2);
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            hostname: "localhost".to_string(),
            max_article_size: 1024 * 1024,
            idle_timeout: Duration::from_secs(600),
            reaper_interval: Duration::from_secs(10),
            buffer_capacity: crate::buffer::DEFAULT_BUFFER_CAPACITY,
            buffer_pool_size: 1024,
            worker_count: workers,
            ready_queue_capacity: 1024,
            trusted_peers: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Parses command-line arguments (without the program name).
    pub fn from_args<I, S>(args: I) -> Result<ArgsOutcome, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut config = ServerConfig::default();
        let mut args = args.into_iter().map(Into::into);

        while let Some(arg) = args.next() {
            let mut value = |flag: &str| {
                args.next()
                    .ok_or_else(|| ConfigError::MissingValue(flag.to_string()))
            };

            match arg.as_str() {
                "--host" | "-h" => config.host = value(&arg)?,
                "--port" | "-p" => config.port = parse(&arg, value(&arg)?)?,
                "--hostname" => config.hostname = value(&arg)?,
                "--max-article-size" => config.max_article_size = parse(&arg, value(&arg)?)?,
                "--timeout" => {
                    config.idle_timeout = Duration::from_secs(parse(&arg, value(&arg)?)?)
                }
                "--workers" => config.worker_count = parse::<usize>(&arg, value(&arg)?)?.max(1),
                "--pool-size" => config.buffer_pool_size = parse(&arg, value(&arg)?)?,
                "--trust" => config.trusted_peers.push(parse(&arg, value(&arg)?)?),
                "--help" => return Ok(ArgsOutcome::Help),
                "--version" | "-v" => return Ok(ArgsOutcome::Version),
                _ => return Err(ConfigError::UnknownArgument(arg.clone())),
            }
        }

        Ok(ArgsOutcome::Run(config))
    }

    /// Returns the bind address as a string
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Loopback peers are always trusted.
    pub fn is_trusted(&self, peer: IpAddr) -> bool {
        peer.is_loopback() || self.trusted_peers.contains(&peer)
    }

    /// Applies overrides stored under [`KEY_MAX_ARTICLE_SIZE`] and
    /// [`KEY_TIMEOUT`]. Malformed values are logged and ignored.
    pub async fn apply_store_overrides(&mut self, store: &dyn ArticleStore) -> StorageResult<()> {
        if let Some(raw) = store.config_value(KEY_MAX_ARTICLE_SIZE).await? {
            match raw.trim().parse::<usize>() {
                Ok(size) => {
                    info!(max_article_size = size, "Using stored article size limit");
                    self.max_article_size = size;
                }
                Err(_) => warn!(value = %raw, "Ignoring malformed stored article size limit"),
            }
        }
        if let Some(raw) = store.config_value(KEY_TIMEOUT).await? {
            match raw.trim().parse::<u64>() {
                Ok(secs) => {
                    info!(timeout_secs = secs, "Using stored idle timeout");
                    self.idle_timeout = Duration::from_secs(secs);
                }
                Err(_) => warn!(value = %raw, "Ignoring malformed stored idle timeout"),
            }
        }
        Ok(())
    }
}

fn parse<T: std::str::FromStr>(flag: &str, value: String) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        flag: flag.to_string(),
        value,
    })
}
