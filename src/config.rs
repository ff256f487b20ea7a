//! Configuration types.
//!
//! Plain structs with `Default` impls; `from_env()` constructors read the
//! environment at the binary edge. Components that are optional in a
//! deployment (the HTTP gateway) return `None` when unconfigured.

use std::time::Duration;

use secrecy::SecretString;

/// When an inbound message is marked as read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MarkReadPolicy {
    /// Mark read after any definitive resolution (accept or reject).
    #[default]
    Definitive,
    /// Mark read only after a rejection.
    RejectOnly,
}

/// HTTP messaging gateway settings.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Base URL of the SMS/push provider REST API.
    pub base_url: String,
    /// Bearer token for the provider.
    pub api_token: SecretString,
}

impl GatewayConfig {
    /// Build from environment. Returns `None` if `GATEWAY_BASE_URL` is not
    /// set — the service then runs with the in-process dev gateway.
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("GATEWAY_BASE_URL").ok()?;
        let api_token =
            SecretString::from(std::env::var("GATEWAY_API_TOKEN").unwrap_or_default());
        Some(Self {
            base_url,
            api_token,
        })
    }
}

/// Inbound poller settings.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Max gateway polls per cycle.
    pub repeat_count: u32,
    /// Wall-clock bound per cycle.
    pub timeout: Duration,
    /// Upper bound of the randomized reschedule delay.
    pub reschedule_jitter: Duration,
    /// TTL of the singleton lease; a crashed holder frees up after this.
    pub lease_ttl: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            repeat_count: 30,
            timeout: Duration::from_secs(30),
            reschedule_jitter: Duration::from_secs(10),
            lease_ttl: Duration::from_secs(60),
        }
    }
}

impl PollerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            repeat_count: env_parse("POLLER_REPEAT_COUNT", defaults.repeat_count),
            timeout: Duration::from_secs(env_parse(
                "POLLER_TIMEOUT_SECS",
                defaults.timeout.as_secs(),
            )),
            reschedule_jitter: Duration::from_secs(env_parse(
                "POLLER_JITTER_SECS",
                defaults.reschedule_jitter.as_secs(),
            )),
            lease_ttl: Duration::from_secs(env_parse(
                "POLLER_LEASE_TTL_SECS",
                defaults.lease_ttl.as_secs(),
            )),
        }
    }
}

/// HTTP API settings.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_addr: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
        }
    }
}

impl ApiConfig {
    pub fn from_env() -> Self {
        Self {
            bind_addr: std::env::var("API_BIND_ADDR")
                .unwrap_or_else(|_| Self::default().bind_addr),
        }
    }
}

/// Top-level service configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: String,
    pub gateway: Option<GatewayConfig>,
    pub poller: PollerConfig,
    pub api: ApiConfig,
    pub mark_read: MarkReadPolicy,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: "./data/aid-relay.db".to_string(),
            gateway: None,
            poller: PollerConfig::default(),
            api: ApiConfig::default(),
            mark_read: MarkReadPolicy::default(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let mark_read = match std::env::var("MARK_READ_POLICY").as_deref() {
            Ok("reject_only") => MarkReadPolicy::RejectOnly,
            _ => MarkReadPolicy::Definitive,
        };
        Self {
            db_path: std::env::var("AID_RELAY_DB_PATH")
                .unwrap_or_else(|_| Self::default().db_path),
            gateway: GatewayConfig::from_env(),
            poller: PollerConfig::from_env(),
            api: ApiConfig::from_env(),
            mark_read,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poller_defaults() {
        let cfg = PollerConfig::default();
        assert_eq!(cfg.repeat_count, 30);
        assert_eq!(cfg.timeout, Duration::from_secs(30));
        assert_eq!(cfg.reschedule_jitter, Duration::from_secs(10));
    }

    #[test]
    fn mark_read_defaults_to_definitive() {
        assert_eq!(MarkReadPolicy::default(), MarkReadPolicy::Definitive);
    }
}
