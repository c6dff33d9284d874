use super::{
    ALL_CLUSTERS, AddressSink, DEFAULT_GROUP, DISCOVERY_SCHEME, DiscoveryError, Instance,
    NamingClient, Resolver, ResolverBuilder, SubscribeParam, SubscriptionEntry, SubscriptionTable,
    Target, table::Push, to_addresses,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt::{self, Debug};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Lifecycle of a [`DiscoveryResolver`]. There is no way back from `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolverState {
    Created,
    Watching,
    Closed,
}

/// Builds [`DiscoveryResolver`]s backed by one naming registry.
#[derive(Clone)]
pub struct DiscoveryResolverBuilder {
    naming: Arc<dyn NamingClient>,
    table: SubscriptionTable,
    scheme: String,
    registry_key: String,
    group: String,
    clusters: Vec<String>,
}

impl DiscoveryResolverBuilder {
    pub fn new(naming: Arc<dyn NamingClient>, table: SubscriptionTable) -> Self {
        Self {
            naming,
            table,
            scheme: DISCOVERY_SCHEME.to_string(),
            registry_key: "default".to_string(),
            group: DEFAULT_GROUP.to_string(),
            clusters: vec![ALL_CLUSTERS.to_string()],
        }
    }

    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    /// Names the registry in subscription keys, so two registries serving the same service
    /// name get separate subscriptions.
    pub fn with_registry_key(mut self, key: impl Into<String>) -> Self {
        self.registry_key = key.into();
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    pub fn with_clusters(mut self, clusters: Vec<String>) -> Self {
        self.clusters = clusters;
        self
    }

    /// Creates a resolver without starting it. [`ResolverBuilder::build`] also starts it.
    pub fn resolver(
        &self,
        target: &Target,
        sink: Arc<dyn AddressSink>,
    ) -> Result<DiscoveryResolver, DiscoveryError> {
        let service = target.service_name();
        if service.is_empty() {
            return Err(DiscoveryError::MissingService(target.to_string()));
        }

        let param = SubscribeParam::new(service)
            .with_group(self.group.clone())
            .with_clusters(self.clusters.clone());

        Ok(DiscoveryResolver {
            inner: Arc::new(Inner {
                key: format!("{}/{}/{}", self.registry_key, self.group, service),
                naming: self.naming.clone(),
                table: self.table.clone(),
                param,
                sink,
                state: Mutex::new(ResolverState::Created),
                watch: Mutex::new(None),
            }),
        })
    }
}

impl Debug for DiscoveryResolverBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscoveryResolverBuilder")
            .field("scheme", &self.scheme)
            .field("registry_key", &self.registry_key)
            .field("group", &self.group)
            .field("clusters", &self.clusters)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ResolverBuilder for DiscoveryResolverBuilder {
    fn scheme(&self) -> &str {
        &self.scheme
    }

    async fn build(
        &self,
        target: &Target,
        sink: Arc<dyn AddressSink>,
    ) -> Result<Box<dyn Resolver>, DiscoveryError> {
        let resolver = self.resolver(target, sink)?;
        resolver.start().await?;
        Ok(Box::new(resolver))
    }
}

/// Keeps an [`AddressSink`] in sync with the available instances of one service.
#[derive(Clone)]
pub struct DiscoveryResolver {
    inner: Arc<Inner>,
}

struct Inner {
    key: String,
    naming: Arc<dyn NamingClient>,
    table: SubscriptionTable,
    param: SubscribeParam,
    sink: Arc<dyn AddressSink>,
    state: Mutex<ResolverState>,
    watch: Mutex<Option<Watch>>,
}

struct Watch {
    entry: Arc<SubscriptionEntry>,
    task: JoinHandle<()>,
}

impl DiscoveryResolver {
    pub fn state(&self) -> ResolverState {
        *self.inner.state.lock()
    }

    pub fn service_name(&self) -> &str {
        &self.inner.param.service_name
    }

    /// Starts watching the service and warms the sink with one synchronous query.
    pub async fn start(&self) -> Result<(), DiscoveryError> {
        self.watch().await?;
        self.inner.resolve_now().await;
        Ok(())
    }

    async fn watch(&self) -> Result<(), DiscoveryError> {
        if self.state() != ResolverState::Created {
            return Ok(());
        }

        let inner = &self.inner;
        let entry = inner.table.join(&inner.key);
        let pushes = entry.watch();

        let guard = entry.lock().await;
        if !entry.is_subscribed() {
            let (tx, rx) = mpsc::unbounded_channel();

            if let Err(e) = inner.naming.subscribe(&inner.param, tx).await {
                if inner.table.leave(&entry) {
                    inner.table.prune(&entry);
                }
                return Err(e);
            }

            entry.forward(rx);
            info!(
                service = %inner.param.service_name,
                group = %inner.param.group,
                "Subscribed to naming registry"
            );
        }
        drop(guard);

        let task = tokio::spawn(watch_pushes(inner.clone(), pushes));

        *inner.watch.lock() = Some(Watch { entry, task });
        *inner.state.lock() = ResolverState::Watching;

        Ok(())
    }
}

impl Debug for DiscoveryResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscoveryResolver")
            .field("key", &self.inner.key)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Resolver for DiscoveryResolver {
    async fn resolve_now(&self) {
        if self.state() == ResolverState::Closed {
            return;
        }
        self.inner.resolve_now().await;
    }

    async fn close(&self) {
        let inner = &self.inner;

        let Some(watch) = inner.watch.lock().take() else {
            *inner.state.lock() = ResolverState::Closed;
            return;
        };
        *inner.state.lock() = ResolverState::Closed;

        watch.task.abort();

        let entry = watch.entry;
        let _guard = entry.lock().await;
        if !inner.table.leave(&entry) {
            return;
        }

        if entry.stop_forwarding() {
            match inner.naming.unsubscribe(&inner.param).await {
                Ok(()) => info!(
                    service = %inner.param.service_name,
                    "Unsubscribed from naming registry"
                ),
                Err(e) => warn!(service = %inner.param.service_name, "{e}"),
            }
        }
        inner.table.prune(&entry);
    }
}

impl Inner {
    async fn resolve_now(&self) {
        match self.naming.get_instances(&self.param).await {
            Ok(instances) => self.apply(&instances).await,
            Err(e) => warn!(service = %self.param.service_name, "{e}"),
        }
    }

    async fn apply(&self, instances: &[Instance]) {
        let addresses = to_addresses(instances, &self.param.service_name);

        if addresses.is_empty() {
            debug!(
                service = %self.param.service_name,
                "No available instances, keeping the current address set"
            );
            return;
        }

        if let Err(e) = self.sink.update(addresses).await {
            warn!(service = %self.param.service_name, "{e}");
        }
    }
}

async fn watch_pushes(inner: Arc<Inner>, mut pushes: broadcast::Receiver<Push>) {
    loop {
        match pushes.recv().await {
            Ok(Ok(instances)) => inner.apply(&instances).await,
            Ok(Err(e)) => warn!(service = %inner.param.service_name, "{e}"),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(
                    service = %inner.param.service_name,
                    skipped,
                    "Resolver fell behind registry pushes"
                );
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
