//! Broker configuration from environment variables

use std::fmt::Display;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use crate::BrokerError;

/// Broker settings
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Interface to listen on (`BIND_ADDR`)
    pub bind_addr: IpAddr,
    /// HTTP/websocket port (`PORT`); 0 picks an ephemeral port
    pub port: u16,
    /// Largest accepted websocket message in bytes (`WS_MAX_MESSAGE_SIZE`)
    pub max_message_size: usize,
    /// Websocket ping cadence (`WS_PING_INTERVAL_MS`)
    pub ping_interval: Duration,
    /// Close a connection silent for this long (`WS_PING_TIMEOUT_MS`)
    pub ping_timeout: Duration,
    /// Give up on a single write after this long (`WS_WRITE_TIMEOUT_MS`)
    pub write_timeout: Duration,
    /// Outbound queue per connection (`WS_CLIENT_BUFFER`)
    pub client_buffer: usize,
    /// Time a new connection has to send its join (`JOIN_TIMEOUT_MS`)
    pub join_timeout: Duration,
    /// Resend every room's snapshot to its members this often (`SNAPSHOT_INTERVAL_MS`)
    pub snapshot_interval: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 8080,
            max_message_size: 64 * 1024,
            ping_interval: Duration::from_millis(10_000),
            ping_timeout: Duration::from_millis(30_000),
            write_timeout: Duration::from_millis(5_000),
            client_buffer: 64,
            join_timeout: Duration::from_millis(10_000),
            snapshot_interval: Duration::from_millis(5_000),
        }
    }
}

impl BrokerConfig {
    /// Read settings from the process environment
    pub fn from_env() -> Result<Self, BrokerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through `lookup`, falling back to defaults for unset keys
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, BrokerError> {
        let defaults = Self::default();

        let config = Self {
            bind_addr: parse(&lookup, "BIND_ADDR", defaults.bind_addr)?,
            port: parse(&lookup, "PORT", defaults.port)?,
            max_message_size: positive(&lookup, "WS_MAX_MESSAGE_SIZE", defaults.max_message_size)?,
            ping_interval: millis(&lookup, "WS_PING_INTERVAL_MS", defaults.ping_interval)?,
            ping_timeout: millis(&lookup, "WS_PING_TIMEOUT_MS", defaults.ping_timeout)?,
            write_timeout: millis(&lookup, "WS_WRITE_TIMEOUT_MS", defaults.write_timeout)?,
            client_buffer: positive(&lookup, "WS_CLIENT_BUFFER", defaults.client_buffer)?,
            join_timeout: millis(&lookup, "JOIN_TIMEOUT_MS", defaults.join_timeout)?,
            snapshot_interval: millis(&lookup, "SNAPSHOT_INTERVAL_MS", defaults.snapshot_interval)?,
        };

        if config.ping_timeout <= config.ping_interval {
            return Err(BrokerError::Config {
                key: "WS_PING_TIMEOUT_MS",
                reason: "must be longer than WS_PING_INTERVAL_MS".to_string(),
            });
        }

        Ok(config)
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &'static str, default: T) -> Result<T, BrokerError>
where
    T: FromStr,
    T::Err: Display,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => {
            raw.trim().parse().map_err(|e: T::Err| BrokerError::Config {
                key,
                reason: format!("{:?}: {}", raw, e),
            })
        }
        _ => Ok(default),
    }
}

fn positive(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: usize,
) -> Result<usize, BrokerError> {
    let value = parse(lookup, key, default)?;
    if value == 0 {
        return Err(BrokerError::Config {
            key,
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(value)
}

fn millis(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: Duration,
) -> Result<Duration, BrokerError> {
    let default_ms = default.as_millis() as usize;
    positive(lookup, key, default_ms).map(|ms| Duration::from_millis(ms as u64))
}
