use super::{DiscoveryError, Instance, NamingClient, PushSender, SubscribeParam};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

type ServiceKey = (String, String);

/// An in-process naming registry.
///
/// Services are keyed by group and name. Subscribers receive the current instance list when
/// they subscribe (if the service was published) and again on every [`MemoryRegistry::publish`].
#[derive(Debug, Clone, Default)]
pub struct MemoryRegistry {
    state: Arc<Mutex<State>>,
}

#[derive(Debug, Default)]
struct State {
    services: HashMap<ServiceKey, Vec<Instance>>,
    subscribers: HashMap<ServiceKey, Vec<PushSender>>,
    subscribe_calls: usize,
    unsubscribe_calls: usize,
}

fn key(group: &str, service: &str) -> ServiceKey {
    (group.to_string(), service.to_string())
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the instance list of a service and pushes it to its subscribers.
    pub fn publish(&self, group: &str, service: &str, instances: Vec<Instance>) {
        let mut state = self.state.lock();
        let key = key(group, service);

        if let Some(subscribers) = state.subscribers.get_mut(&key) {
            subscribers.retain(|tx| tx.send(Ok(instances.clone())).is_ok());
        }
        state.services.insert(key, instances);
    }

    /// Pushes a failure to the subscribers of a service.
    pub fn fail(&self, group: &str, service: &str, message: &str) {
        let mut state = self.state.lock();

        if let Some(subscribers) = state.subscribers.get_mut(&key(group, service)) {
            subscribers.retain(|tx| {
                tx.send(Err(DiscoveryError::Push(message.to_string().into())))
                    .is_ok()
            });
        }
    }

    pub fn subscriber_count(&self, group: &str, service: &str) -> usize {
        self.state
            .lock()
            .subscribers
            .get(&key(group, service))
            .map_or(0, Vec::len)
    }

    /// How many times `subscribe` was called, across all services.
    pub fn subscribe_calls(&self) -> usize {
        self.state.lock().subscribe_calls
    }

    pub fn unsubscribe_calls(&self) -> usize {
        self.state.lock().unsubscribe_calls
    }
}

#[async_trait]
impl NamingClient for MemoryRegistry {
    async fn subscribe(
        &self,
        param: &SubscribeParam,
        sender: PushSender,
    ) -> Result<(), DiscoveryError> {
        let mut state = self.state.lock();
        let key = key(&param.group, &param.service_name);
        state.subscribe_calls += 1;

        if let Some(instances) = state.services.get(&key) {
            // A closed receiver here is dropped by the next publish.
            let _ = sender.send(Ok(instances.clone()));
        }
        state.subscribers.entry(key).or_default().push(sender);

        Ok(())
    }

    async fn unsubscribe(&self, param: &SubscribeParam) -> Result<(), DiscoveryError> {
        let mut state = self.state.lock();
        state.unsubscribe_calls += 1;
        state
            .subscribers
            .remove(&key(&param.group, &param.service_name));

        Ok(())
    }

    async fn get_instances(&self, param: &SubscribeParam) -> Result<Vec<Instance>, DiscoveryError> {
        let state = self.state.lock();

        Ok(state
            .services
            .get(&key(&param.group, &param.service_name))
            .cloned()
            .unwrap_or_default())
    }
}
