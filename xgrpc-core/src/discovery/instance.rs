use super::{CLUSTER_NAME_ATTR, GRPC_PORT_KEY, PROVIDER_SERVICE_NAME_ATTR};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// One registered endpoint of a service, as reported by the naming registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    pub ip: String,
    pub port: u16,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub healthy: bool,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub cluster_name: String,
}

fn default_true() -> bool {
    true
}

fn default_weight() -> f64 {
    100.0
}

impl Instance {
    /// A healthy, enabled instance with no metadata.
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self {
            ip: ip.into(),
            port,
            enabled: true,
            healthy: true,
            weight: default_weight(),
            metadata: HashMap::new(),
            cluster_name: String::new(),
        }
    }

    pub fn with_health(mut self, healthy: bool) -> Self {
        self.healthy = healthy;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_cluster(mut self, cluster: impl Into<String>) -> Self {
        self.cluster_name = cluster.into();
        self
    }

    /// Whether the instance may receive traffic.
    pub fn is_available(&self) -> bool {
        self.enabled && self.healthy
    }

    /// The port calls should use. A `gRPC_port` metadata entry wins over the declared port
    /// when it parses as a port number.
    pub fn effective_port(&self) -> u16 {
        self.metadata
            .get(GRPC_PORT_KEY)
            .and_then(|port| port.trim().parse::<u16>().ok())
            .filter(|port| *port != 0)
            .unwrap_or(self.port)
    }

    /// Maps the instance to a dialable address carrying its metadata as attributes.
    pub fn to_address(&self, service_name: &str) -> Address {
        let host = if self.ip.contains(':') && !self.ip.starts_with('[') {
            format!("[{}]", self.ip)
        } else {
            self.ip.clone()
        };

        let mut attributes: BTreeMap<String, String> = self
            .metadata
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if !self.cluster_name.is_empty() {
            attributes.insert(CLUSTER_NAME_ATTR.to_string(), self.cluster_name.clone());
        }
        if !service_name.is_empty() {
            attributes.insert(
                PROVIDER_SERVICE_NAME_ATTR.to_string(),
                service_name.to_string(),
            );
        }

        Address {
            addr: format!("{host}:{}", self.effective_port()),
            attributes,
        }
    }
}

/// A resolved endpoint in `host:port` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address {
    pub addr: String,
    pub attributes: BTreeMap<String, String>,
}

/// Maps the available instances to addresses, keeping their order.
pub fn to_addresses(instances: &[Instance], service_name: &str) -> Vec<Address> {
    instances
        .iter()
        .filter(|i| i.is_available())
        .map(|i| i.to_address(service_name))
        .collect()
}
