use std::time::Duration;

use clap::Parser;

/// Default read deadline armed before every line read on an active session
pub const READ_TIMEOUT: Duration = Duration::from_secs(35);
/// How often the liveness monitor checks a client
pub const LIVENESS_INTERVAL: Duration = Duration::from_secs(10);
/// Inactivity after which a client is considered stale
pub const STALE_AFTER: Duration = Duration::from_secs(45);

/// Longest accepted line, newline included
pub const MAX_LINE_BYTES: usize = 64 * 1024;
/// Frames queued for a client before further frames to it are dropped
pub const OUTBOX_CAPACITY: usize = 256;

const MAX_TOTAL_CONNECTIONS: usize = 1000;
const MAX_PER_IP: usize = 16;

/// Room relay server
#[derive(Parser, Debug)]
#[command(name = "roomrelay", version, about = "Line-delimited JSON room relay")]
pub struct Args {
    /// Host to listen on
    #[arg(long, default_value = "localhost")]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = 26388)]
    pub port: u16,

    /// Maximum number of concurrent connections
    #[arg(long, default_value_t = MAX_TOTAL_CONNECTIONS)]
    pub max_connections: usize,

    /// Maximum number of concurrent connections from a single IP
    #[arg(long, default_value_t = MAX_PER_IP)]
    pub max_per_ip: usize,

    /// Read deadline for a single line, in seconds
    #[arg(long, default_value_t = READ_TIMEOUT.as_secs())]
    pub read_timeout_secs: u64,

    /// Interval between liveness checks, in seconds
    #[arg(long, default_value_t = LIVENESS_INTERVAL.as_secs())]
    pub liveness_interval_secs: u64,

    /// Inactivity threshold before a client is disconnected, in seconds
    #[arg(long, default_value_t = STALE_AFTER.as_secs())]
    pub stale_after_secs: u64,

    /// Longest accepted line in bytes, newline included
    #[arg(long, default_value_t = MAX_LINE_BYTES)]
    pub max_line_bytes: usize,

    /// Frames queued per client before delivery to it is dropped
    #[arg(long, default_value_t = OUTBOX_CAPACITY)]
    pub outbox_capacity: usize,

    /// Default log level, overridden by RUST_LOG
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Args {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            read_timeout: Duration::from_secs(self.read_timeout_secs),
            liveness_interval: Duration::from_secs(self.liveness_interval_secs),
            stale_after: Duration::from_secs(self.stale_after_secs),
            max_connections: self.max_connections,
            max_per_ip: self.max_per_ip,
            max_line_bytes: self.max_line_bytes,
            outbox_capacity: self.outbox_capacity.max(1),
        }
    }
}

/// Runtime settings shared by every connection task
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub read_timeout: Duration,
    pub liveness_interval: Duration,
    pub stale_after: Duration,
    pub max_connections: usize,
    pub max_per_ip: usize,
    pub max_line_bytes: usize,
    pub outbox_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            read_timeout: READ_TIMEOUT,
            liveness_interval: LIVENESS_INTERVAL,
            stale_after: STALE_AFTER,
            max_connections: MAX_TOTAL_CONNECTIONS,
            max_per_ip: MAX_PER_IP,
            max_line_bytes: MAX_LINE_BYTES,
            outbox_capacity: OUTBOX_CAPACITY,
        }
    }
}
