//! Environment-driven configuration.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    /// Address the WebSocket listener binds to.
    pub bind_addr: String,
    /// How long an unanswered invite may stay pending before both sides
    /// are notified and the call is dropped. `None` (the default) means
    /// invites never expire.
    pub invite_ttl: Option<Duration>,
}

impl Config {
    /// Read `SIGNAL_BIND_ADDR` and `SIGNAL_INVITE_TTL_SECS` from the
    /// environment. Zero or unparsable TTL values disable expiry.
    pub fn from_env() -> Self {
        let bind_addr =
            std::env::var("SIGNAL_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let invite_ttl = std::env::var("SIGNAL_INVITE_TTL_SECS")
            .ok()
            .and_then(|raw| raw.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);
        Self {
            bind_addr,
            invite_ttl,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".to_string(),
            invite_ttl: None,
        }
    }
}
