use std::fmt;
use thiserror::Error;
use tokio::time::Duration;

/// Main error type for the meshgate gateway
#[derive(Error, Debug, Clone)]
pub enum GateError {
    /// Host does not belong to the configured server domain
    #[error("Invalid subdomain: {host}")]
    InvalidSubdomain { host: String },

    /// Resolution backend answered with a non-200 status on every protocol version
    #[error("Tenant not found: {tenant}")]
    NotFound { tenant: String },

    /// Resolution backend unreachable on every retry of every protocol version
    #[error("Resolution backend unavailable: {message}")]
    BackendUnavailable { message: String },

    /// Resolution backend returned 200 with an undecodable body
    #[error("Invalid resolution response: {message}")]
    InvalidResponse { message: String },

    /// Resolution succeeded but carried no routes
    #[error("No routes for tenant: {tenant}")]
    NoRoutes { tenant: String },

    /// TCP connect to a route failed
    #[error("Connect to {target} failed: {message}")]
    Connect { target: String, message: String },

    /// TLS handshake with a route failed
    #[error("TLS handshake with {target} failed: {message}")]
    TlsHandshake { target: String, message: String },

    /// The route accepted the connection but the HTTP exchange died
    /// before response headers arrived
    #[error("Upstream error from {target}: {message}")]
    Upstream { target: String, message: String },

    /// Every route in the failover sequence failed
    #[error("All backend routes failed after {attempts} attempts")]
    RoutesExhausted { attempts: usize },

    /// Operation timed out
    #[error("Operation timed out after {duration:?}: {operation}")]
    Timeout {
        duration: Duration,
        operation: String,
    },

    /// Request body exceeded the configured ceiling
    #[error("Payload too large: {message}")]
    PayloadTooLarge { message: String },

    /// Configuration related errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// TLS setup errors (certificate loading, trust bundle)
    #[error("TLS error: {message}")]
    Tls { message: String },

    /// IO related errors
    #[error("IO error: {message}")]
    Io { message: String },

    /// Internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Message fragments that mark a transport failure as retriable when the
/// error carries no structural tag. Matched case-insensitively.
const RETRIABLE_FRAGMENTS: &[&str] = &[
    "connection refused",
    "connection reset by peer",
    "no route to host",
    "network is unreachable",
    "timeout",
    "connection timed out",
    "handshake failed",
    "certificate verify failed",
    "ssl handshake failed",
    "bad ssl client hello",
];

impl GateError {
    pub fn invalid_subdomain<S: Into<String>>(host: S) -> Self {
        Self::InvalidSubdomain { host: host.into() }
    }

    pub fn not_found<S: Into<String>>(tenant: S) -> Self {
        Self::NotFound {
            tenant: tenant.into(),
        }
    }

    pub fn backend_unavailable<S: Into<String>>(message: S) -> Self {
        Self::BackendUnavailable {
            message: message.into(),
        }
    }

    pub fn invalid_response<S: Into<String>>(message: S) -> Self {
        Self::InvalidResponse {
            message: message.into(),
        }
    }

    pub fn no_routes<S: Into<String>>(tenant: S) -> Self {
        Self::NoRoutes {
            tenant: tenant.into(),
        }
    }

    pub fn connect<T: Into<String>, S: Into<String>>(target: T, message: S) -> Self {
        Self::Connect {
            target: target.into(),
            message: message.into(),
        }
    }

    pub fn tls_handshake<T: Into<String>, S: Into<String>>(target: T, message: S) -> Self {
        Self::TlsHandshake {
            target: target.into(),
            message: message.into(),
        }
    }

    pub fn upstream<T: Into<String>, S: Into<String>>(target: T, message: S) -> Self {
        Self::Upstream {
            target: target.into(),
            message: message.into(),
        }
    }

    pub fn timeout<S: Into<String>>(duration: Duration, operation: S) -> Self {
        Self::Timeout {
            duration,
            operation: operation.into(),
        }
    }

    pub fn payload_too_large<S: Into<String>>(message: S) -> Self {
        Self::PayloadTooLarge {
            message: message.into(),
        }
    }

    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn tls<S: Into<String>>(message: S) -> Self {
        Self::Tls {
            message: message.into(),
        }
    }

    pub fn io<S: Into<String>>(message: S) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether a per-route proxy failure should advance the failover loop
    /// to the next route.
    ///
    /// Connect and handshake failures are structurally retriable; timeouts
    /// likewise. Anything else falls back to a case-insensitive substring
    /// scan over the message, which catches retriable conditions surfacing
    /// through opaque io/TLS error strings.
    pub fn is_retriable(&self) -> bool {
        match self {
            GateError::Connect { .. } | GateError::TlsHandshake { .. } => true,
            GateError::Timeout { .. } => true,
            GateError::Upstream { message, .. } => message_is_retriable(message),
            GateError::Io { message } => message_is_retriable(message),
            _ => false,
        }
    }

    /// Error severity, used for log-level selection in the handler.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            GateError::Config { .. } => ErrorSeverity::Critical,
            GateError::Tls { .. } => ErrorSeverity::High,
            GateError::BackendUnavailable { .. } => ErrorSeverity::High,
            GateError::InvalidResponse { .. } => ErrorSeverity::High,
            GateError::RoutesExhausted { .. } => ErrorSeverity::High,
            GateError::Internal { .. } => ErrorSeverity::High,
            GateError::Connect { .. } => ErrorSeverity::Medium,
            GateError::TlsHandshake { .. } => ErrorSeverity::Medium,
            GateError::Upstream { .. } => ErrorSeverity::Medium,
            GateError::Timeout { .. } => ErrorSeverity::Medium,
            GateError::Io { .. } => ErrorSeverity::Medium,
            GateError::InvalidSubdomain { .. } => ErrorSeverity::Low,
            GateError::NotFound { .. } => ErrorSeverity::Low,
            GateError::NoRoutes { .. } => ErrorSeverity::Low,
            GateError::PayloadTooLarge { .. } => ErrorSeverity::Low,
        }
    }
}

/// Substring classifier over an opaque error message.
pub fn message_is_retriable(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    RETRIABLE_FRAGMENTS.iter().any(|f| lower.contains(f))
}

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low = 1,
    Medium = 2,
    High = 3,
    Critical = 4,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorSeverity::Low => write!(f, "LOW"),
            ErrorSeverity::Medium => write!(f, "MEDIUM"),
            ErrorSeverity::High => write!(f, "HIGH"),
            ErrorSeverity::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Result type alias for meshgate operations
pub type GateResult<T> = Result<T, GateError>;

impl From<std::io::Error> for GateError {
    fn from(err: std::io::Error) -> Self {
        GateError::io(err.to_string())
    }
}

impl From<hyper::Error> for GateError {
    fn from(err: hyper::Error) -> Self {
        if err.is_timeout() {
            GateError::timeout(Duration::from_secs(5), "HTTP request")
        } else {
            GateError::io(format!("HTTP error: {}", err))
        }
    }
}

impl From<hyper::http::Error> for GateError {
    fn from(err: hyper::http::Error) -> Self {
        GateError::internal(format!("HTTP build error: {}", err))
    }
}

impl From<hyper::http::uri::InvalidUri> for GateError {
    fn from(err: hyper::http::uri::InvalidUri) -> Self {
        GateError::config(format!("Invalid URI: {}", err))
    }
}

impl From<serde_json::Error> for GateError {
    fn from(err: serde_json::Error) -> Self {
        GateError::invalid_response(format!("JSON decode error: {}", err))
    }
}

impl From<toml::de::Error> for GateError {
    fn from(err: toml::de::Error) -> Self {
        GateError::config(format!("TOML parsing error: {}", err))
    }
}

impl From<tokio::time::error::Elapsed> for GateError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        GateError::timeout(Duration::from_secs(5), "operation")
    }
}
