use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Listener configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Plain-HTTP listener address
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,
    pub workers: Option<usize>,
    /// Idle keep-alive timeout in seconds
    pub connection_timeout: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            workers: None,
            connection_timeout: None,
        }
    }
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 80))
}

/// Tenant-domain configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DomainConfig {
    /// Suffix that tenant subdomains hang off (e.g. "example.com")
    pub server_domain: String,
    /// Backend URL used when no tenant resolves; empty disables the branch
    #[serde(default)]
    pub default_backend: Option<String>,
}

impl DomainConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server_domain.is_empty() {
            return Err(anyhow::anyhow!("server_domain must not be empty"));
        }
        if self.server_domain.starts_with('.') || self.server_domain.ends_with('.') {
            return Err(anyhow::anyhow!(
                "server_domain must not have leading or trailing dots"
            ));
        }
        if let Some(url) = &self.default_backend {
            if !url.is_empty() && !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(anyhow::anyhow!(
                    "default_backend must be an http(s) URL, got {}",
                    url
                ));
            }
        }
        Ok(())
    }

    /// The default backend, treating the empty string as unset.
    pub fn default_backend(&self) -> Option<&str> {
        self.default_backend.as_deref().filter(|u| !u.is_empty())
    }
}
