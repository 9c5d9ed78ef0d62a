use serde::{Deserialize, Serialize};

/// Resolution API client configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResolverConfig {
    /// Base URL of the resolution API
    #[serde(default = "default_backend_url")]
    pub backend_url: String,
    /// Per-attempt request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Attempts per protocol version
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay between attempts in milliseconds
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
    /// Route cache TTL in seconds
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
    /// Route cache capacity bound
    #[serde(default = "default_cache_max_entries")]
    pub cache_max_entries: usize,
    /// Where the fetched CA bundle is written and loaded from
    #[serde(default = "default_ca_bundle_path")]
    pub ca_bundle_path: String,
    /// Attempts for the startup `/ca-cert` fetch
    #[serde(default = "default_ca_fetch_retries")]
    pub ca_fetch_retries: u32,
    /// Delay between `/ca-cert` attempts in seconds
    #[serde(default = "default_ca_fetch_delay")]
    pub ca_fetch_delay_secs: u64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            backend_url: default_backend_url(),
            request_timeout_secs: default_request_timeout(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay(),
            cache_ttl_secs: default_cache_ttl(),
            cache_max_entries: default_cache_max_entries(),
            ca_bundle_path: default_ca_bundle_path(),
            ca_fetch_retries: default_ca_fetch_retries(),
            ca_fetch_delay_secs: default_ca_fetch_delay(),
        }
    }
}

impl ResolverConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.backend_url.starts_with("http://") && !self.backend_url.starts_with("https://") {
            return Err(anyhow::anyhow!(
                "resolver backend_url must be an http(s) URL, got {}",
                self.backend_url
            ));
        }
        if self.max_retries == 0 {
            return Err(anyhow::anyhow!("resolver max_retries must be at least 1"));
        }
        if self.request_timeout_secs == 0 {
            return Err(anyhow::anyhow!(
                "resolver request_timeout_secs must be greater than 0"
            ));
        }
        if self.cache_max_entries == 0 {
            return Err(anyhow::anyhow!(
                "resolver cache_max_entries must be greater than 0"
            ));
        }
        Ok(())
    }
}

fn default_backend_url() -> String {
    "http://localhost:8192".to_string()
}

fn default_request_timeout() -> u64 {
    5
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    150
}

fn default_cache_ttl() -> u64 {
    60
}

fn default_cache_max_entries() -> usize {
    10_000
}

fn default_ca_bundle_path() -> String {
    "ca-bundle.pem".to_string()
}

fn default_ca_fetch_retries() -> u32 {
    30
}

fn default_ca_fetch_delay() -> u64 {
    2
}
