use async_trait::async_trait;
use std::fmt::Debug;
use std::time::Duration;
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};

/// Opens transport channels for direct (non-discovery) targets.
#[async_trait]
pub trait Dialer: Send + Sync + Debug {
    async fn dial(&self, endpoint: Endpoint) -> Result<Channel, tonic::transport::Error>;
}

/// Connects eagerly over TCP, failing fast when the target is unreachable.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpDialer;

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial(&self, endpoint: Endpoint) -> Result<Channel, tonic::transport::Error> {
        endpoint.connect().await
    }
}

/// Transport settings shared by every endpoint of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointSettings {
    pub plaintext: bool,
    pub connect_timeout: Duration,
    pub user_agent: Option<String>,
}

impl EndpointSettings {
    /// Builds an endpoint for `authority` (`host:port`). TLS endpoints trust the roots enabled
    /// in the build (the platform's native store).
    pub fn endpoint(&self, authority: &str) -> Result<Endpoint, tonic::transport::Error> {
        let scheme = if self.plaintext { "http" } else { "https" };

        let mut endpoint = Endpoint::from_shared(format!("{scheme}://{authority}"))?
            .connect_timeout(self.connect_timeout);

        if let Some(user_agent) = &self.user_agent {
            endpoint = endpoint.user_agent(user_agent.clone())?;
        }

        if !self.plaintext {
            endpoint = endpoint.tls_config(ClientTlsConfig::new().with_enabled_roots())?;
        }

        Ok(endpoint)
    }
}
