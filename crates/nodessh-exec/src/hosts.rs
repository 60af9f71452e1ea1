//! Node descriptors and SSH host resolution

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::SSH_PORT;
use crate::error::ExecError;
use crate::traits::NodeInventory;

/// Kind of a node address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressKind {
    /// Reachable from outside the cluster network
    External,
    /// Reachable from inside the cluster network
    Internal,
    /// DNS hostname
    Hostname,
}

/// One address reported by a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAddress {
    /// Address kind
    pub kind: AddressKind,
    /// IP or hostname, possibly empty
    pub address: String,
}

impl NodeAddress {
    /// Create an address of the given kind
    pub fn new(kind: AddressKind, address: impl Into<String>) -> Self {
        Self {
            kind,
            address: address.into(),
        }
    }
}

/// Cluster node as reported by the inventory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Node name
    pub name: String,
    /// Reported addresses
    #[serde(default)]
    pub addresses: Vec<NodeAddress>,
    /// Whether workloads may be scheduled on the node
    #[serde(default = "default_schedulable")]
    pub schedulable: bool,
}

fn default_schedulable() -> bool {
    true
}

impl Node {
    /// Create a schedulable node without addresses
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            addresses: Vec::new(),
            schedulable: true,
        }
    }

    /// Add an address
    #[must_use]
    pub fn with_address(mut self, kind: AddressKind, address: impl Into<String>) -> Self {
        self.addresses.push(NodeAddress::new(kind, address));
        self
    }

    /// Mark the node unschedulable
    #[must_use]
    pub fn unschedulable(mut self) -> Self {
        self.schedulable = false;
        self
    }

    /// First non-empty address of the given kind
    #[must_use]
    pub fn address(&self, kind: AddressKind) -> Option<&str> {
        self.addresses
            .iter()
            .find(|a| a.kind == kind && !a.address.is_empty())
            .map(|a| a.address.as_str())
    }
}

/// Host resolution errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum HostError {
    /// Some nodes lack the chosen address kind; `hosts` holds what was found
    #[error("only found {} IPs on nodes, but found {nodes} nodes", .hosts.len())]
    IncompleteAddresses {
        /// Resolved `host:port` strings
        hosts: Vec<String>,
        /// Number of input nodes
        nodes: usize,
    },

    /// Node has neither an external nor an internal address
    #[error("couldn't find any IP address for node {0}")]
    NoAddress(String),

    /// Not a `host:port` string
    #[error("invalid host:port {0:?}")]
    InvalidHostPort(String),
}

/// One address per node of the given kind, skipping nodes without one
#[must_use]
pub fn node_addresses(nodes: &[Node], kind: AddressKind) -> Vec<String> {
    nodes
        .iter()
        .filter_map(|n| n.address(kind))
        .map(str::to_string)
        .collect()
}

/// SSH-reachable `host:port` strings for every node
///
/// External addresses are used when any node has one; otherwise every node
/// is resolved through its internal address.
///
/// # Errors
/// Returns `HostError::IncompleteAddresses`, carrying the partial list, when
/// some node has no address of the chosen kind
pub fn resolve_ssh_hosts(nodes: &[Node]) -> Result<Vec<String>, HostError> {
    let mut addresses = node_addresses(nodes, AddressKind::External);
    if addresses.is_empty() {
        info!("no external IP address on nodes, falling back to internal IPs");
        addresses = node_addresses(nodes, AddressKind::Internal);
    }

    let hosts: Vec<String> = addresses
        .iter()
        .map(|a| join_host_port(a, SSH_PORT))
        .collect();

    if hosts.len() != nodes.len() {
        warn!(found = hosts.len(), nodes = nodes.len(), "nodes without SSH address");
        return Err(HostError::IncompleteAddresses {
            hosts,
            nodes: nodes.len(),
        });
    }

    Ok(hosts)
}

/// SSH hosts of every schedulable node in `inventory`
///
/// # Errors
/// Returns `ExecError::Inventory` if listing fails and `ExecError::Host`
/// (incomplete addresses, partial list included) from [`resolve_ssh_hosts`]
pub async fn schedulable_ssh_hosts(
    inventory: &dyn NodeInventory,
) -> Result<Vec<String>, ExecError> {
    let nodes = inventory.list_schedulable_nodes().await?;
    Ok(resolve_ssh_hosts(&nodes)?)
}

/// SSH-reachable `host:port` for one node, external address first
///
/// # Errors
/// Returns `HostError::NoAddress` if the node has no usable address
pub fn node_ssh_host(node: &Node) -> Result<String, HostError> {
    node.address(AddressKind::External)
        .or_else(|| node.address(AddressKind::Internal))
        .map(|a| join_host_port(a, SSH_PORT))
        .ok_or_else(|| HostError::NoAddress(node.name.clone()))
}

/// Join host and port, bracketing IPv6 literals
#[must_use]
pub fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

/// Split `host:port` or `[v6]:port`
///
/// # Errors
/// Returns `HostError::InvalidHostPort` when the port is missing or invalid
pub fn split_host_port(host_port: &str) -> Result<(String, u16), HostError> {
    let invalid = || HostError::InvalidHostPort(host_port.to_string());

    let (host, port) = if let Some(rest) = host_port.strip_prefix('[') {
        let (host, port) = rest.split_once("]:").ok_or_else(invalid)?;
        (host, port)
    } else {
        let (host, port) = host_port.rsplit_once(':').ok_or_else(invalid)?;
        if host.contains(':') {
            return Err(invalid());
        }
        (host, port)
    };

    if host.is_empty() {
        return Err(invalid());
    }
    let port = port.parse::<u16>().map_err(|_| invalid())?;
    Ok((host.to_string(), port))
}
