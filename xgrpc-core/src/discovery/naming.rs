use super::{ALL_CLUSTERS, DEFAULT_GROUP, DiscoveryError, Instance};
use async_trait::async_trait;
use std::fmt::Debug;
use tokio::sync::mpsc;

/// Channel on which a naming client delivers instance lists (or push failures) for one
/// subscription.
pub type PushSender = mpsc::UnboundedSender<Result<Vec<Instance>, DiscoveryError>>;

/// Identifies a subscription on the naming registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscribeParam {
    pub service_name: String,
    pub group: String,
    pub clusters: Vec<String>,
}

impl SubscribeParam {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            group: DEFAULT_GROUP.to_string(),
            clusters: vec![ALL_CLUSTERS.to_string()],
        }
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    pub fn with_clusters(mut self, clusters: Vec<String>) -> Self {
        self.clusters = clusters;
        self
    }
}

/// Client side of a naming registry.
///
/// Implementations push the full instance list of the service on `sender` every time it
/// changes, until [`NamingClient::unsubscribe`] is called for the same parameters.
#[async_trait]
pub trait NamingClient: Send + Sync + Debug {
    async fn subscribe(&self, param: &SubscribeParam, sender: PushSender)
    -> Result<(), DiscoveryError>;

    async fn unsubscribe(&self, param: &SubscribeParam) -> Result<(), DiscoveryError>;

    /// Queries the current instance list once.
    async fn get_instances(&self, param: &SubscribeParam) -> Result<Vec<Instance>, DiscoveryError>;
}
