use serde::{Deserialize, Serialize};

/// Proxy engine configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProxyConfig {
    /// Per-route TCP connect timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Upper bound on routes tried per request
    #[serde(default = "default_failover_max_attempts")]
    pub failover_max_attempts: usize,
    /// Consecutive failures before a route is passively unhealthy
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Lifetime of a passive-health entry in seconds
    #[serde(default = "default_passive_unhealthy_ttl")]
    pub passive_unhealthy_ttl_secs: u64,
    /// Request body ceiling in bytes
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: u64,
    /// Bodies above this size spool to a temp file instead of memory
    #[serde(default = "default_spool_threshold")]
    pub spool_threshold_bytes: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            failover_max_attempts: default_failover_max_attempts(),
            failure_threshold: default_failure_threshold(),
            passive_unhealthy_ttl_secs: default_passive_unhealthy_ttl(),
            max_body_bytes: default_max_body_bytes(),
            spool_threshold_bytes: default_spool_threshold(),
        }
    }
}

impl ProxyConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.connect_timeout_secs == 0 {
            return Err(anyhow::anyhow!(
                "proxy connect_timeout_secs must be greater than 0"
            ));
        }
        if self.failover_max_attempts == 0 {
            return Err(anyhow::anyhow!(
                "proxy failover_max_attempts must be at least 1"
            ));
        }
        if self.failure_threshold == 0 {
            return Err(anyhow::anyhow!(
                "proxy failure_threshold must be at least 1"
            ));
        }
        if self.spool_threshold_bytes > self.max_body_bytes {
            return Err(anyhow::anyhow!(
                "proxy spool_threshold_bytes must not exceed max_body_bytes"
            ));
        }
        Ok(())
    }
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_failover_max_attempts() -> usize {
    3
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_passive_unhealthy_ttl() -> u64 {
    60
}

fn default_max_body_bytes() -> u64 {
    20 * 1024 * 1024 * 1024
}

fn default_spool_threshold() -> u64 {
    2 * 1024 * 1024
}
