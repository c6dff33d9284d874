//! # Service Discovery
//!
//! Resolves logical service names to concrete endpoints through a naming registry.
//!
//! A target such as `discovery:///orders` names a scheme, which selects a [`ResolverBuilder`]
//! from the [`ResolverRegistry`], and a path, which names the service. The resolver subscribes
//! to the registry for that service and writes every pushed endpoint list into an
//! [`AddressSink`]. In production the sink is a [`BalanceSink`] feeding a tonic balance channel.
//!
//! Subscriptions are deduplicated through a [`SubscriptionTable`]: however many resolvers watch
//! the same service, the registry sees a single subscription, and its pushes are fanned out to
//! every watcher.
mod instance;
mod memory;
mod naming;
mod resolver;
mod sink;
mod table;

pub use instance::{Address, Instance, to_addresses};
pub use memory::MemoryRegistry;
pub use naming::{NamingClient, PushSender, SubscribeParam};
pub use resolver::{DiscoveryResolver, DiscoveryResolverBuilder, ResolverState};
pub use sink::{AddressSink, BalanceSink, EndpointTemplate};
pub use table::{SubscriptionEntry, SubscriptionTable};

use crate::BoxError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::sync::Arc;

/// Scheme used by the default discovery resolver.
pub const DISCOVERY_SCHEME: &str = "discovery";

/// Group used when a resolver isn't configured with one.
pub const DEFAULT_GROUP: &str = "DEFAULT_GROUP";

/// Cluster selector matching every cluster of a service.
pub const ALL_CLUSTERS: &str = "ALL";

/// Instance metadata key whose value, when it parses as a port, replaces the declared port.
pub const GRPC_PORT_KEY: &str = "gRPC_port";

/// Address attribute carrying the instance's cluster.
pub const CLUSTER_NAME_ATTR: &str = "ClusterName";

/// Address attribute carrying the logical service name.
pub const PROVIDER_SERVICE_NAME_ATTR: &str = "ProviderServiceName";

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("Target '{0}' is not of the form 'scheme://authority/service'")]
    InvalidTarget(String),
    #[error("Target '{0}' doesn't name a service")]
    MissingService(String),
    #[error("Failed to subscribe to service '{service}': '{source}'")]
    Subscribe { service: String, source: BoxError },
    #[error("Failed to unsubscribe from service '{service}': '{source}'")]
    Unsubscribe { service: String, source: BoxError },
    #[error("Failed to query instances of service '{service}': '{source}'")]
    Query { service: String, source: BoxError },
    #[error("Registry push failed: '{0}'")]
    Push(#[source] BoxError),
    #[error("Failed to update the address set: '{0}'")]
    Sink(#[source] BoxError),
}

/// A parsed `scheme://authority/path` target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub scheme: String,
    pub authority: String,
    pub path: String,
}

impl Target {
    /// Parses a target URL.
    ///
    /// Returns `None` when the string has no `scheme://` prefix, which is the case for plain
    /// `host:port` addresses.
    pub fn parse(target: &str) -> Option<Self> {
        let (scheme, rest) = target.split_once("://")?;
        if scheme.is_empty()
            || !scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        {
            return None;
        }

        let (authority, path) = match rest.find('/') {
            Some(idx) => rest.split_at(idx),
            None => (rest, ""),
        };

        Some(Self {
            scheme: scheme.to_ascii_lowercase(),
            authority: authority.to_string(),
            path: path.to_string(),
        })
    }

    /// The logical service name: the path with a single leading `/` removed.
    ///
    /// Only one separator is stripped, so `discovery:////svc` names the service `/svc`.
    pub fn service_name(&self) -> &str {
        self.path.strip_prefix('/').unwrap_or(&self.path)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}{}", self.scheme, self.authority, self.path)
    }
}

/// A live resolver. Dropping it without calling [`Resolver::close`] leaves its subscription
/// slot taken until the process exits.
#[async_trait]
pub trait Resolver: Send + Sync + Debug {
    /// Refreshes the address set on demand. Best effort, errors are logged.
    async fn resolve_now(&self);

    /// Stops watching. Calling it more than once is a no-op.
    async fn close(&self);
}

/// Creates resolvers for one target scheme.
#[async_trait]
pub trait ResolverBuilder: Send + Sync + Debug {
    fn scheme(&self) -> &str;

    async fn build(
        &self,
        target: &Target,
        sink: Arc<dyn AddressSink>,
    ) -> Result<Box<dyn Resolver>, DiscoveryError>;
}

/// Scheme to builder mapping consulted by the connector.
#[derive(Debug, Clone, Default)]
pub struct ResolverRegistry {
    builders: HashMap<String, Arc<dyn ResolverBuilder>>,
}

impl ResolverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `builder` under its scheme, replacing any previous builder for that scheme.
    pub fn register(&mut self, builder: Arc<dyn ResolverBuilder>) {
        self.builders
            .insert(builder.scheme().to_ascii_lowercase(), builder);
    }

    pub fn with(mut self, builder: Arc<dyn ResolverBuilder>) -> Self {
        self.register(builder);
        self
    }

    pub fn get(&self, scheme: &str) -> Option<Arc<dyn ResolverBuilder>> {
        self.builders.get(&scheme.to_ascii_lowercase()).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.builders.is_empty()
    }
}
