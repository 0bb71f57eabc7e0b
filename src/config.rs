//! Client configuration.
//!
//! Mirrors the option set in spec.md §6, plus the ambient timeout fields
//! called for in SPEC_FULL.md §6 — styled on RustyDB's `TcpConfig`/
//! `PoolConfig`: a plain `Default`-implementing struct with `with_*`
//! builder methods, consumed by the router's `connect`.

use std::time::Duration;

use crate::error::{ClientError, Result};
use crate::types::Endpoint;

/// Opaque platform TLS configuration, supplied by the embedding
/// application. The core never inspects it beyond passing it to the
/// transport layer.
#[derive(Debug, Clone, Default)]
pub struct TlsOptions {
    pub ca_cert_path: Option<String>,
    pub client_cert_path: Option<String>,
    pub client_key_path: Option<String>,
}

/// Client configuration (spec.md §6).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// `host:port` endpoints to try; must be non-empty.
    pub endpoints: Vec<Endpoint>,
    pub user_name: Option<String>,
    pub password: Option<String>,
    pub use_tls: bool,
    pub tls_options: Option<TlsOptions>,
    pub partition_awareness: bool,
    /// Handshake timeout. Recommended default 30s (spec.md §5).
    pub connect_timeout: Duration,
    /// Per-request timeout. `None` means wait indefinitely (spec.md §5
    /// recommends infinite with heartbeats, left to the implementer).
    pub request_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            user_name: None,
            password: None,
            use_tls: false,
            tls_options: None,
            partition_awareness: false,
            connect_timeout: Duration::from_secs(30),
            request_timeout: None,
        }
    }
}

impl ClientConfig {
    pub fn new(endpoints: Vec<Endpoint>) -> Self {
        Self {
            endpoints,
            ..Default::default()
        }
    }

    pub fn with_credentials(mut self, user_name: impl Into<String>, password: impl Into<String>) -> Self {
        self.user_name = Some(user_name.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_tls(mut self, tls_options: TlsOptions) -> Self {
        self.use_tls = true;
        self.tls_options = Some(tls_options);
        self
    }

    pub fn with_partition_awareness(mut self, enabled: bool) -> Self {
        self.partition_awareness = enabled;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Validate the configuration (spec.md §7, `IllegalArgument`).
    pub fn validate(&self) -> Result<()> {
        if self.endpoints.is_empty() {
            return Err(ClientError::IllegalArgument(
                "endpoints must not be empty".to_string(),
            ));
        }
        for endpoint in &self.endpoints {
            if endpoint.rsplit_once(':').is_none() {
                return Err(ClientError::IllegalArgument(format!(
                    "invalid endpoint '{endpoint}', expected host:port"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_endpoints() {
        let cfg = ClientConfig::default();
        assert!(matches!(cfg.validate(), Err(ClientError::IllegalArgument(_))));
    }

    #[test]
    fn rejects_malformed_endpoint() {
        let cfg = ClientConfig::new(vec!["localhost".to_string()]);
        assert!(matches!(cfg.validate(), Err(ClientError::IllegalArgument(_))));
    }

    #[test]
    fn accepts_valid_config() {
        let cfg = ClientConfig::new(vec!["127.0.0.1:10800".to_string()])
            .with_partition_awareness(true);
        assert!(cfg.validate().is_ok());
    }
}
