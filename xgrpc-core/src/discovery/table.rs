use super::{DiscoveryError, Instance};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{MutexGuard, broadcast, mpsc};
use tokio::task::JoinHandle;

/// A push as seen by watchers. Errors are shared because every watcher receives the same one.
pub type Push = Result<Vec<Instance>, Arc<DiscoveryError>>;

const FAN_OUT_CAPACITY: usize = 16;

/// Tracks the registry subscriptions of a process, one entry per discovery key.
///
/// Cloning the table yields a handle to the same entries.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionTable {
    entries: Arc<Mutex<HashMap<String, Arc<SubscriptionEntry>>>>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a watcher for `key`, creating the entry if needed.
    pub fn join(&self, key: &str) -> Arc<SubscriptionEntry> {
        let mut entries = self.entries.lock();
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(SubscriptionEntry::new(key)));
        *entry.watchers.lock() += 1;
        entry.clone()
    }

    /// Releases a watcher slot. Returns `true` when it was the last one, in which case the
    /// caller owns the teardown and must [`prune`](Self::prune) the entry afterwards.
    ///
    /// The entry stays in the table until then, so watchers joining during the teardown wait
    /// on [`SubscriptionEntry::lock`] and subscribe again once it is over.
    pub fn leave(&self, entry: &Arc<SubscriptionEntry>) -> bool {
        let _entries = self.entries.lock();
        let mut watchers = entry.watchers.lock();
        *watchers = watchers.saturating_sub(1);
        *watchers == 0
    }

    /// Removes `entry` if it still has no watchers. Returns whether it was removed.
    pub fn prune(&self, entry: &Arc<SubscriptionEntry>) -> bool {
        let mut entries = self.entries.lock();
        if *entry.watchers.lock() > 0 {
            return false;
        }

        if entries
            .get(&entry.key)
            .is_some_and(|current| Arc::ptr_eq(current, entry))
        {
            entries.remove(&entry.key);
            return true;
        }
        false
    }

    pub fn get(&self, key: &str) -> Option<Arc<SubscriptionEntry>> {
        self.entries.lock().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// The shared state behind one discovery key.
#[derive(Debug)]
pub struct SubscriptionEntry {
    key: String,
    subscription: tokio::sync::Mutex<()>,
    watchers: Mutex<usize>,
    pushes: broadcast::Sender<Push>,
    forwarder: Mutex<Option<JoinHandle<()>>>,
}

impl SubscriptionEntry {
    fn new(key: &str) -> Self {
        let (pushes, _) = broadcast::channel(FAN_OUT_CAPACITY);
        Self {
            key: key.to_string(),
            subscription: tokio::sync::Mutex::new(()),
            watchers: Mutex::new(0),
            pushes,
            forwarder: Mutex::new(None),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Serializes registry subscribe and unsubscribe calls for this key.
    ///
    /// Whoever holds the guard and finds the entry unsubscribed must subscribe, so a failed
    /// attempt leaves the job to the next watcher.
    pub async fn lock(&self) -> MutexGuard<'_, ()> {
        self.subscription.lock().await
    }

    /// Whether a registry subscription currently feeds this entry.
    pub fn is_subscribed(&self) -> bool {
        self.forwarder.lock().is_some()
    }

    pub fn watchers(&self) -> usize {
        *self.watchers.lock()
    }

    /// A receiver for every push delivered after this call.
    pub fn watch(&self) -> broadcast::Receiver<Push> {
        self.pushes.subscribe()
    }

    /// Starts relaying the registry's pushes to all watchers.
    pub fn forward(
        &self,
        mut pushes: mpsc::UnboundedReceiver<Result<Vec<Instance>, DiscoveryError>>,
    ) {
        let fan_out = self.pushes.clone();
        let handle = tokio::spawn(async move {
            while let Some(push) = pushes.recv().await {
                // No receivers only means every watcher is between close and leave.
                let _ = fan_out.send(push.map_err(Arc::new));
            }
        });

        if let Some(previous) = self.forwarder.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Stops relaying. Returns whether a registry subscription was active.
    pub fn stop_forwarding(&self) -> bool {
        match self.forwarder.lock().take() {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }
}
