use super::{Address, DiscoveryError};
use async_trait::async_trait;
use std::collections::HashSet;
use std::fmt::{self, Debug};
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tonic::transport::Endpoint;
use tonic::transport::channel::Change;
use tracing::debug;

/// Receives the resolved address set of a target.
#[async_trait]
pub trait AddressSink: Send + Sync + Debug {
    /// Replaces the current address set with `addresses`.
    async fn update(&self, addresses: Vec<Address>) -> Result<(), DiscoveryError>;
}

/// Feeds a tonic balance channel (see `Channel::balance_channel`).
///
/// Every update is diffed against the endpoints already inserted: stale ones are removed and
/// new ones inserted, so existing connections survive unchanged lists.
pub struct BalanceSink {
    tx: mpsc::Sender<Change<String, Endpoint>>,
    template: EndpointTemplate,
    current: Mutex<HashSet<String>>,
}

/// Turns a `host:port` address into a configured tonic endpoint.
pub type EndpointTemplate =
    Arc<dyn Fn(&str) -> Result<Endpoint, tonic::transport::Error> + Send + Sync>;

impl BalanceSink {
    pub fn new(tx: mpsc::Sender<Change<String, Endpoint>>, template: EndpointTemplate) -> Self {
        Self {
            tx,
            template,
            current: Mutex::new(HashSet::new()),
        }
    }
}

impl Debug for BalanceSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BalanceSink").finish_non_exhaustive()
    }
}

#[async_trait]
impl AddressSink for BalanceSink {
    async fn update(&self, addresses: Vec<Address>) -> Result<(), DiscoveryError> {
        let mut current = self.current.lock().await;
        let next: HashSet<String> = addresses.into_iter().map(|a| a.addr).collect();

        // Nothing reaches the channel unless every new address yields an endpoint.
        let fresh = next
            .difference(&current)
            .map(|addr| Ok((addr.clone(), (self.template)(addr)?)))
            .collect::<Result<Vec<_>, tonic::transport::Error>>()
            .map_err(|e| DiscoveryError::Sink(e.into()))?;
        let stale: Vec<String> = current.difference(&next).cloned().collect();

        for addr in stale {
            self.tx
                .send(Change::Remove(addr.clone()))
                .await
                .map_err(|e| DiscoveryError::Sink(e.into()))?;
            current.remove(&addr);
        }

        for (addr, endpoint) in fresh {
            self.tx
                .send(Change::Insert(addr.clone(), endpoint))
                .await
                .map_err(|e| DiscoveryError::Sink(e.into()))?;
            current.insert(addr);
        }

        debug!(endpoints = current.len(), "Updated balance channel endpoints");
        Ok(())
    }
}
