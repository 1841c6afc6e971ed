use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;

/// Why a connection was refused admission
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LimitError {
    #[error("maximum total connections reached ({0})")]
    TotalLimitReached(usize),
    #[error("maximum connections per IP reached ({0})")]
    IpLimitReached(usize),
}

/// Caps concurrent connections overall and per source address
#[derive(Debug, Clone)]
pub struct ConnectionLimiter {
    inner: Arc<Mutex<LimiterState>>,
    max_total: usize,
    max_per_ip: usize,
}

#[derive(Debug, Default)]
struct LimiterState {
    per_ip: HashMap<IpAddr, usize>,
    total: usize,
}

impl ConnectionLimiter {
    pub fn new(max_total: usize, max_per_ip: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(LimiterState::default())),
            max_total,
            max_per_ip,
        }
    }

    /// Reserve a slot for a new connection from `ip`.
    ///
    /// Every successful call must be paired with [`ConnectionLimiter::disconnect`]
    /// once the connection task ends.
    pub async fn try_connect(&self, ip: IpAddr) -> Result<(), LimitError> {
        let mut state = self.inner.lock().await;

        if state.total >= self.max_total {
            warn!(limit = self.max_total, "total connection limit reached");
            return Err(LimitError::TotalLimitReached(self.max_total));
        }

        let ip_count = state.per_ip.get(&ip).copied().unwrap_or(0);
        if ip_count >= self.max_per_ip {
            warn!(%ip, limit = self.max_per_ip, "per-ip connection limit reached");
            return Err(LimitError::IpLimitReached(self.max_per_ip));
        }

        state.total += 1;
        *state.per_ip.entry(ip).or_insert(0) += 1;

        Ok(())
    }

    /// Release the slot held by a connection from `ip`
    pub async fn disconnect(&self, ip: IpAddr) {
        let mut state = self.inner.lock().await;

        let Some(count) = state.per_ip.get_mut(&ip) else {
            return;
        };
        *count -= 1;
        if *count == 0 {
            state.per_ip.remove(&ip);
        }
        state.total = state.total.saturating_sub(1);
    }

    /// (active connections, distinct source addresses)
    pub async fn stats(&self) -> (usize, usize) {
        let state = self.inner.lock().await;
        (state.total, state.per_ip.len())
    }
}
