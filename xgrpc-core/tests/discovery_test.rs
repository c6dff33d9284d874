use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tonic::transport::Endpoint;
use tonic::transport::channel::Change;
use xgrpc_core::discovery::{
    Address, AddressSink, BalanceSink, CLUSTER_NAME_ATTR, DEFAULT_GROUP, DiscoveryError,
    DiscoveryResolverBuilder, Instance, MemoryRegistry, NamingClient, PROVIDER_SERVICE_NAME_ATTR,
    PushSender, Resolver, ResolverBuilder, ResolverState, SubscribeParam, SubscriptionTable,
    Target,
};

const SERVICE: &str = "echo.EchoService";

/// Forwards every address update to the test.
#[derive(Debug)]
struct RecordingSink {
    tx: mpsc::UnboundedSender<Vec<Address>>,
}

#[async_trait]
impl AddressSink for RecordingSink {
    async fn update(&self, addresses: Vec<Address>) -> Result<(), DiscoveryError> {
        self.tx
            .send(addresses)
            .map_err(|e| DiscoveryError::Sink(e.to_string().into()))
    }
}

fn recording_sink() -> (Arc<RecordingSink>, mpsc::UnboundedReceiver<Vec<Address>>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(RecordingSink { tx }), rx)
}

fn target() -> Target {
    Target::parse(&format!("discovery:///{SERVICE}")).unwrap()
}

fn builder(registry: &MemoryRegistry, table: &SubscriptionTable) -> DiscoveryResolverBuilder {
    DiscoveryResolverBuilder::new(Arc::new(registry.clone()), table.clone())
}

async fn next_update(rx: &mut mpsc::UnboundedReceiver<Vec<Address>>) -> Vec<Address> {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no address update within 5s")
        .expect("sink dropped")
}

async fn no_update(rx: &mut mpsc::UnboundedReceiver<Vec<Address>>) -> bool {
    tokio::time::timeout(Duration::from_millis(100), rx.recv())
        .await
        .is_err()
}

/// A [`MemoryRegistry`] that rejects its first `failures` subscriptions and answers slowly.
#[derive(Debug, Clone, Default)]
struct FlakyRegistry {
    inner: MemoryRegistry,
    failures: Arc<AtomicUsize>,
    subscribe_delay: Duration,
    unsubscribe_delay: Duration,
}

impl FlakyRegistry {
    fn failing(failures: usize) -> Self {
        Self {
            failures: Arc::new(AtomicUsize::new(failures)),
            ..Default::default()
        }
    }
}

#[async_trait]
impl NamingClient for FlakyRegistry {
    async fn subscribe(
        &self,
        param: &SubscribeParam,
        sender: PushSender,
    ) -> Result<(), DiscoveryError> {
        tokio::time::sleep(self.subscribe_delay).await;

        if self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(DiscoveryError::Subscribe {
                service: param.service_name.clone(),
                source: "registry unavailable".into(),
            });
        }
        self.inner.subscribe(param, sender).await
    }

    async fn unsubscribe(&self, param: &SubscribeParam) -> Result<(), DiscoveryError> {
        tokio::time::sleep(self.unsubscribe_delay).await;
        self.inner.unsubscribe(param).await
    }

    async fn get_instances(&self, param: &SubscribeParam) -> Result<Vec<Instance>, DiscoveryError> {
        self.inner.get_instances(param).await
    }
}

fn addrs(addresses: &[Address]) -> Vec<&str> {
    addresses.iter().map(|a| a.addr.as_str()).collect()
}

#[tokio::test]
async fn test_only_available_instances_reach_the_sink_in_order() {
    let registry = MemoryRegistry::new();
    let table = SubscriptionTable::new();
    registry.publish(
        DEFAULT_GROUP,
        SERVICE,
        vec![
            Instance::new("10.0.0.1", 8080),
            Instance::new("10.0.0.2", 8080).with_health(false),
            Instance::new("10.0.0.3", 8080).with_enabled(false),
            Instance::new("10.0.0.4", 8080).with_cluster("blue"),
        ],
    );

    let (sink, mut rx) = recording_sink();
    let resolver = builder(&registry, &table).build(&target(), sink).await.unwrap();

    let update = next_update(&mut rx).await;
    assert_eq!(addrs(&update), ["10.0.0.1:8080", "10.0.0.4:8080"]);
    assert_eq!(update[1].attributes[CLUSTER_NAME_ATTR], "blue");
    assert_eq!(update[1].attributes[PROVIDER_SERVICE_NAME_ATTR], SERVICE);
    assert!(!update[0].attributes.contains_key(CLUSTER_NAME_ATTR));

    resolver.close().await;
}

#[tokio::test]
async fn test_grpc_port_metadata_overrides_the_port() {
    let registry = MemoryRegistry::new();
    let table = SubscriptionTable::new();
    registry.publish(
        DEFAULT_GROUP,
        SERVICE,
        vec![Instance::new("10.0.0.1", 8080).with_metadata("gRPC_port", "9100")],
    );

    let (sink, mut rx) = recording_sink();
    let resolver = builder(&registry, &table).build(&target(), sink).await.unwrap();

    assert_eq!(addrs(&next_update(&mut rx).await), ["10.0.0.1:9100"]);

    resolver.close().await;
}

#[tokio::test]
async fn test_pushes_replace_the_address_set() {
    let registry = MemoryRegistry::new();
    let table = SubscriptionTable::new();

    let (sink, mut rx) = recording_sink();
    let resolver = builder(&registry, &table).build(&target(), sink).await.unwrap();

    // Nothing published yet: the warm-up query finds no instances and must not touch the sink.
    assert!(no_update(&mut rx).await);

    registry.publish(DEFAULT_GROUP, SERVICE, vec![Instance::new("10.0.0.1", 8080)]);
    assert_eq!(addrs(&next_update(&mut rx).await), ["10.0.0.1:8080"]);

    registry.publish(
        DEFAULT_GROUP,
        SERVICE,
        vec![Instance::new("10.0.0.2", 8080), Instance::new("10.0.0.3", 8080)],
    );
    assert_eq!(
        addrs(&next_update(&mut rx).await),
        ["10.0.0.2:8080", "10.0.0.3:8080"]
    );

    resolver.close().await;
}

#[tokio::test]
async fn test_empty_or_unavailable_pushes_are_ignored() {
    let registry = MemoryRegistry::new();
    let table = SubscriptionTable::new();

    let (sink, mut rx) = recording_sink();
    let resolver = builder(&registry, &table).build(&target(), sink).await.unwrap();

    registry.publish(DEFAULT_GROUP, SERVICE, vec![Instance::new("10.0.0.1", 8080)]);
    next_update(&mut rx).await;

    registry.publish(DEFAULT_GROUP, SERVICE, vec![]);
    registry.publish(
        DEFAULT_GROUP,
        SERVICE,
        vec![Instance::new("10.0.0.2", 8080).with_health(false)],
    );
    assert!(no_update(&mut rx).await);

    resolver.close().await;
}

#[tokio::test]
async fn test_push_errors_keep_the_resolver_watching() {
    let registry = MemoryRegistry::new();
    let table = SubscriptionTable::new();

    let (sink, mut rx) = recording_sink();
    let resolver = builder(&registry, &table).build(&target(), sink).await.unwrap();

    registry.fail(DEFAULT_GROUP, SERVICE, "registry unavailable");
    registry.publish(DEFAULT_GROUP, SERVICE, vec![Instance::new("10.0.0.1", 8080)]);

    assert_eq!(addrs(&next_update(&mut rx).await), ["10.0.0.1:8080"]);

    resolver.close().await;
}

#[tokio::test]
async fn test_watchers_of_one_service_share_a_subscription() {
    let registry = MemoryRegistry::new();
    let table = SubscriptionTable::new();
    let builder = builder(&registry, &table);

    let (first_sink, mut first_rx) = recording_sink();
    let (second_sink, mut second_rx) = recording_sink();
    let first = builder.resolver(&target(), first_sink).unwrap();
    let second = builder.resolver(&target(), second_sink).unwrap();

    let (a, b) = tokio::join!(first.start(), second.start());
    a.unwrap();
    b.unwrap();

    assert_eq!(registry.subscribe_calls(), 1);
    assert_eq!(registry.subscriber_count(DEFAULT_GROUP, SERVICE), 1);
    assert_eq!(table.len(), 1);

    registry.publish(DEFAULT_GROUP, SERVICE, vec![Instance::new("10.0.0.1", 8080)]);
    assert_eq!(addrs(&next_update(&mut first_rx).await), ["10.0.0.1:8080"]);
    assert_eq!(addrs(&next_update(&mut second_rx).await), ["10.0.0.1:8080"]);

    // The subscription outlives the resolver that created it.
    first.close().await;
    assert_eq!(registry.unsubscribe_calls(), 0);

    registry.publish(DEFAULT_GROUP, SERVICE, vec![Instance::new("10.0.0.2", 8080)]);
    assert_eq!(addrs(&next_update(&mut second_rx).await), ["10.0.0.2:8080"]);

    second.close().await;
    assert_eq!(registry.unsubscribe_calls(), 1);
    assert!(table.is_empty());
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let registry = MemoryRegistry::new();
    let table = SubscriptionTable::new();

    let (sink, _rx) = recording_sink();
    let resolver = builder(&registry, &table).resolver(&target(), sink).unwrap();
    assert_eq!(resolver.state(), ResolverState::Created);

    resolver.start().await.unwrap();
    assert_eq!(resolver.state(), ResolverState::Watching);

    resolver.close().await;
    resolver.close().await;

    assert_eq!(resolver.state(), ResolverState::Closed);
    assert_eq!(registry.unsubscribe_calls(), 1);
    assert_eq!(registry.subscriber_count(DEFAULT_GROUP, SERVICE), 0);
}

#[tokio::test]
async fn test_resubscribes_after_every_watcher_left() {
    let registry = MemoryRegistry::new();
    let table = SubscriptionTable::new();
    let builder = builder(&registry, &table);

    let (sink, _rx) = recording_sink();
    builder.build(&target(), sink).await.unwrap().close().await;

    let (sink, mut rx) = recording_sink();
    let resolver = builder.build(&target(), sink).await.unwrap();

    assert_eq!(registry.subscribe_calls(), 2);

    registry.publish(DEFAULT_GROUP, SERVICE, vec![Instance::new("10.0.0.1", 8080)]);
    assert_eq!(addrs(&next_update(&mut rx).await), ["10.0.0.1:8080"]);

    resolver.close().await;
}

#[tokio::test]
async fn test_groups_are_separate_services() {
    let registry = MemoryRegistry::new();
    let table = SubscriptionTable::new();
    registry.publish("canary", SERVICE, vec![Instance::new("10.0.1.1", 8080)]);
    registry.publish(DEFAULT_GROUP, SERVICE, vec![Instance::new("10.0.0.1", 8080)]);

    let (sink, mut rx) = recording_sink();
    let resolver = builder(&registry, &table)
        .with_group("canary")
        .build(&target(), sink)
        .await
        .unwrap();

    assert_eq!(addrs(&next_update(&mut rx).await), ["10.0.1.1:8080"]);

    resolver.close().await;
}

#[tokio::test]
async fn test_target_without_service_is_rejected() {
    let registry = MemoryRegistry::new();
    let table = SubscriptionTable::new();
    let (sink, _rx) = recording_sink();

    let target = Target::parse("discovery://default/").unwrap();
    let err = builder(&registry, &table).resolver(&target, sink).unwrap_err();

    assert!(matches!(err, DiscoveryError::MissingService(_)));
    assert_eq!(registry.subscribe_calls(), 0);
}

#[tokio::test]
async fn test_build_fails_when_the_subscription_is_rejected() {
    let registry = FlakyRegistry::failing(1);
    let table = SubscriptionTable::new();
    let builder = DiscoveryResolverBuilder::new(Arc::new(registry.clone()), table.clone());

    let (sink, _rx) = recording_sink();
    let err = builder.build(&target(), sink).await.unwrap_err();

    assert!(matches!(err, DiscoveryError::Subscribe { service, .. } if service == SERVICE));
    assert!(table.is_empty());
    assert_eq!(registry.inner.subscribe_calls(), 0);

    // The next resolver subscribes from scratch.
    let (sink, mut rx) = recording_sink();
    let resolver = builder.build(&target(), sink).await.unwrap();
    assert_eq!(registry.inner.subscriber_count(DEFAULT_GROUP, SERVICE), 1);

    registry
        .inner
        .publish(DEFAULT_GROUP, SERVICE, vec![Instance::new("10.0.0.1", 8080)]);
    assert_eq!(addrs(&next_update(&mut rx).await), ["10.0.0.1:8080"]);

    resolver.close().await;
}

#[tokio::test]
async fn test_failed_subscription_is_retried_by_waiting_watchers() {
    let registry = FlakyRegistry {
        subscribe_delay: Duration::from_millis(20),
        ..FlakyRegistry::failing(1)
    };
    let table = SubscriptionTable::new();
    let builder = DiscoveryResolverBuilder::new(Arc::new(registry.clone()), table.clone());

    let (first_sink, first_rx) = recording_sink();
    let (second_sink, second_rx) = recording_sink();
    let first = builder.resolver(&target(), first_sink).unwrap();
    let second = builder.resolver(&target(), second_sink).unwrap();

    let (a, b) = tokio::join!(first.start(), second.start());
    let (watching, mut rx) = match (a, b) {
        (Err(e), Ok(())) => {
            assert!(matches!(e, DiscoveryError::Subscribe { .. }));
            (second, second_rx)
        }
        (Ok(()), Err(e)) => {
            assert!(matches!(e, DiscoveryError::Subscribe { .. }));
            (first, first_rx)
        }
        other => panic!("expected exactly one failed start, got {other:?}"),
    };

    assert_eq!(watching.state(), ResolverState::Watching);
    assert_eq!(registry.inner.subscribe_calls(), 1);
    assert_eq!(registry.inner.subscriber_count(DEFAULT_GROUP, SERVICE), 1);

    // Later watchers join the live subscription.
    let (third_sink, mut third_rx) = recording_sink();
    let third = builder.build(&target(), third_sink).await.unwrap();
    assert_eq!(registry.inner.subscribe_calls(), 1);

    registry
        .inner
        .publish(DEFAULT_GROUP, SERVICE, vec![Instance::new("10.0.0.1", 8080)]);
    assert_eq!(addrs(&next_update(&mut rx).await), ["10.0.0.1:8080"]);
    assert_eq!(addrs(&next_update(&mut third_rx).await), ["10.0.0.1:8080"]);

    watching.close().await;
    third.close().await;
    assert_eq!(registry.inner.unsubscribe_calls(), 1);
    assert!(table.is_empty());
}

#[tokio::test]
async fn test_resolver_built_during_a_slow_unsubscribe_stays_subscribed() {
    let registry = FlakyRegistry {
        unsubscribe_delay: Duration::from_millis(50),
        ..Default::default()
    };
    let table = SubscriptionTable::new();
    let builder = DiscoveryResolverBuilder::new(Arc::new(registry.clone()), table.clone());

    let (sink, _rx) = recording_sink();
    let first = builder.resolver(&target(), sink).unwrap();
    first.start().await.unwrap();

    let closing = tokio::spawn({
        let first = first.clone();
        async move { first.close().await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    let (sink, mut rx) = recording_sink();
    let second = builder.build(&target(), sink).await.unwrap();
    closing.await.unwrap();

    assert_eq!(registry.inner.unsubscribe_calls(), 1);
    assert_eq!(registry.inner.subscribe_calls(), 2);
    assert_eq!(registry.inner.subscriber_count(DEFAULT_GROUP, SERVICE), 1);
    assert_eq!(table.len(), 1);

    registry
        .inner
        .publish(DEFAULT_GROUP, SERVICE, vec![Instance::new("10.0.0.1", 8080)]);
    assert_eq!(addrs(&next_update(&mut rx).await), ["10.0.0.1:8080"]);

    second.close().await;
    assert!(table.is_empty());
}

#[tokio::test]
async fn test_sink_errors_keep_the_resolver_watching() {
    let registry = MemoryRegistry::new();
    let table = SubscriptionTable::new();

    let (tx, mut rx) = mpsc::channel(16);
    let sink = BalanceSink::new(
        tx,
        Arc::new(|addr: &str| Endpoint::from_shared(format!("http://{addr}"))),
    );
    let resolver = builder(&registry, &table)
        .build(&target(), Arc::new(sink))
        .await
        .unwrap();

    registry.publish(DEFAULT_GROUP, SERVICE, vec![Instance::new("bad host", 8080)]);
    registry.publish(DEFAULT_GROUP, SERVICE, vec![Instance::new("10.0.0.1", 8080)]);

    let change = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(change, Change::Insert(key, _) if key == "10.0.0.1:8080"));
    assert!(rx.try_recv().is_err());

    resolver.close().await;
}
