//! Configuration loading and validation.
//!
//! Two sources are supported:
//! - a TOML file with `${VAR}` / `${VAR:-default}` environment expansion,
//! - a pure-environment fallback for container deployments, honoring
//!   `SERVER_DOMAIN`, `BACKEND_URL`, `CACHE_TTL` and `DEFAULT_BACKEND`.
//!
//! All values are immutable after startup.

pub mod monitoring;
pub mod proxy;
pub mod resolver;
pub mod server;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use tracing::{info, warn};

pub use monitoring::MonitoringConfig;
pub use proxy::ProxyConfig;
pub use resolver::ResolverConfig;
pub use server::{DomainConfig, ServerConfig};

pub use crate::tls::TlsConfig;

/// Top-level gateway configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Plain-HTTP listener
    #[serde(default)]
    pub server: ServerConfig,
    /// Tenant domain and default backend
    pub domain: DomainConfig,
    /// Resolution API client and route cache
    #[serde(default)]
    pub resolver: ResolverConfig,
    /// Failover engine and passive health
    #[serde(default)]
    pub proxy: ProxyConfig,
    /// HTTPS listener (optional)
    pub tls: Option<TlsConfig>,
    /// Metrics and liveness side-server
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

impl Config {
    /// Load configuration from a TOML file with environment variable expansion.
    pub async fn from_file_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = tokio::fs::read_to_string(path.as_ref()).await?;
        let expanded = expand_env_vars(&content);

        let config: Config = toml::from_str(&expanded)?;
        config.validate()?;

        info!("Configuration loaded from {:?}", path.as_ref());
        Ok(config)
    }

    /// Build a configuration purely from the process environment.
    ///
    /// `SERVER_DOMAIN` is required; everything else falls back to defaults.
    pub fn from_env() -> Result<Self> {
        let server_domain = env::var("SERVER_DOMAIN")
            .map_err(|_| anyhow::anyhow!("SERVER_DOMAIN must be set"))?;

        let mut resolver = ResolverConfig::default();
        if let Ok(url) = env::var("BACKEND_URL") {
            if !url.is_empty() {
                resolver.backend_url = url;
            }
        }
        if let Ok(ttl) = env::var("CACHE_TTL") {
            match ttl.parse::<u64>() {
                Ok(secs) => resolver.cache_ttl_secs = secs,
                Err(_) => warn!("CACHE_TTL is not a number, keeping default"),
            }
        }
        if let Ok(path) = env::var("CA_BUNDLE_PATH") {
            if !path.is_empty() {
                resolver.ca_bundle_path = path;
            }
        }

        let default_backend = env::var("DEFAULT_BACKEND").ok().filter(|s| !s.is_empty());

        let config = Self {
            server: ServerConfig::default(),
            domain: DomainConfig {
                server_domain,
                default_backend,
            },
            resolver,
            proxy: ProxyConfig::default(),
            tls: None,
            monitoring: MonitoringConfig::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the entire configuration.
    pub fn validate(&self) -> Result<()> {
        self.domain.validate()?;
        self.resolver.validate()?;
        self.proxy.validate()?;

        if let Some(workers) = self.server.workers {
            if workers == 0 {
                return Err(anyhow::anyhow!("server workers must be greater than 0"));
            }
        }
        if let Some(timeout) = self.server.connection_timeout {
            if timeout == 0 {
                return Err(anyhow::anyhow!(
                    "server connection_timeout must be greater than 0"
                ));
            }
        }

        if let Some(tls) = &self.tls {
            if tls.enabled && (tls.cert_path.is_none() || tls.key_path.is_none()) {
                return Err(anyhow::anyhow!(
                    "tls.cert_path and tls.key_path are required when TLS is enabled"
                ));
            }
        }

        Ok(())
    }

    /// Check if the HTTPS listener is enabled
    pub fn is_tls_enabled(&self) -> bool {
        self.tls.as_ref().is_some_and(|t| t.enabled)
    }
}

/// Expand environment variables in configuration content.
/// Supports `${VAR}` and `${VAR:-default}` syntax.
fn expand_env_vars(content: &str) -> String {
    let mut result = content.to_string();

    while let Some(start) = result.find("${") {
        if let Some(end) = result[start..].find('}') {
            let var_expr = &result[start + 2..start + end];
            let replacement = if let Some(default_pos) = var_expr.find(":-") {
                let var_name = &var_expr[..default_pos];
                let default_value = &var_expr[default_pos + 2..];
                env::var(var_name).unwrap_or_else(|_| default_value.to_string())
            } else {
                env::var(var_expr).unwrap_or_else(|_| {
                    warn!(
                        "Environment variable '{}' not found, using empty string",
                        var_expr
                    );
                    String::new()
                })
            };

            result.replace_range(start..start + end + 1, &replacement);
        } else {
            break; // malformed ${VAR expression
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config_file(content: &str) -> NamedTempFile {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(content.as_bytes()).unwrap();
        temp_file.flush().unwrap();
        temp_file
    }

    #[tokio::test]
    async fn test_basic_config_loading() {
        let config_content = r#"
[server]
bind = "127.0.0.1:8080"

[domain]
server_domain = "example.com"
default_backend = "http://landing:80"

[resolver]
backend_url = "http://resolver:8192"
cache_ttl_secs = 30

[proxy]
connect_timeout_secs = 2
failover_max_attempts = 4
"#;

        let temp_file = create_temp_config_file(config_content);
        let config = Config::from_file_with_env(temp_file.path()).await.unwrap();

        assert_eq!(config.server.bind, "127.0.0.1:8080".parse().unwrap());
        assert_eq!(config.domain.server_domain, "example.com");
        assert_eq!(config.domain.default_backend(), Some("http://landing:80"));
        assert_eq!(config.resolver.backend_url, "http://resolver:8192");
        assert_eq!(config.resolver.cache_ttl_secs, 30);
        assert_eq!(config.proxy.connect_timeout_secs, 2);
        assert_eq!(config.proxy.failover_max_attempts, 4);
        // Untouched sections keep their defaults
        assert_eq!(config.proxy.failure_threshold, 3);
        assert_eq!(config.resolver.max_retries, 3);
        assert_eq!(config.resolver.retry_delay_ms, 150);
    }

    #[tokio::test]
    async fn test_minimal_config_uses_defaults() {
        let temp_file = create_temp_config_file(
            r#"
[domain]
server_domain = "mesh.example"
"#,
        );
        let config = Config::from_file_with_env(temp_file.path()).await.unwrap();

        assert_eq!(
            config.server.bind,
            std::net::SocketAddr::from(([0, 0, 0, 0], 80))
        );
        assert_eq!(config.resolver.backend_url, "http://localhost:8192");
        assert_eq!(config.resolver.cache_ttl_secs, 60);
        assert_eq!(config.proxy.passive_unhealthy_ttl_secs, 60);
        assert!(config.domain.default_backend().is_none());
        assert!(!config.is_tls_enabled());
    }

    #[tokio::test]
    async fn test_env_var_expansion() {
        std::env::set_var("MESHGATE_TEST_DOMAIN", "expanded.example");
        let temp_file = create_temp_config_file(
            r#"
[domain]
server_domain = "${MESHGATE_TEST_DOMAIN}"
default_backend = "${MESHGATE_TEST_MISSING_BACKEND:-http://fallback:80}"
"#,
        );
        let config = Config::from_file_with_env(temp_file.path()).await.unwrap();
        assert_eq!(config.domain.server_domain, "expanded.example");
        assert_eq!(config.domain.default_backend(), Some("http://fallback:80"));
        std::env::remove_var("MESHGATE_TEST_DOMAIN");
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let temp_file = create_temp_config_file(
            r#"
[domain]
server_domain = ""
"#,
        );
        assert!(Config::from_file_with_env(temp_file.path()).await.is_err());

        let temp_file = create_temp_config_file(
            r#"
[domain]
server_domain = "example.com"

[resolver]
backend_url = "ftp://nope"
"#,
        );
        assert!(Config::from_file_with_env(temp_file.path()).await.is_err());

        let temp_file = create_temp_config_file(
            r#"
[domain]
server_domain = "example.com"

[proxy]
failover_max_attempts = 0
"#,
        );
        assert!(Config::from_file_with_env(temp_file.path()).await.is_err());
    }

    #[test]
    fn test_from_env_contract() {
        std::env::set_var("SERVER_DOMAIN", "env.example");
        std::env::set_var("BACKEND_URL", "http://resolver.internal:8192");
        std::env::set_var("CACHE_TTL", "120");
        std::env::set_var("DEFAULT_BACKEND", "http://landing:80");

        let config = Config::from_env().unwrap();
        assert_eq!(config.domain.server_domain, "env.example");
        assert_eq!(config.resolver.backend_url, "http://resolver.internal:8192");
        assert_eq!(config.resolver.cache_ttl_secs, 120);
        assert_eq!(config.domain.default_backend(), Some("http://landing:80"));

        std::env::remove_var("SERVER_DOMAIN");
        std::env::remove_var("BACKEND_URL");
        std::env::remove_var("CACHE_TTL");
        std::env::remove_var("DEFAULT_BACKEND");
    }
}
