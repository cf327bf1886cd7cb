//! Cluster members as the harness sees them.

use std::fmt;
use std::sync::Arc;

use crate::peer::PeerApi;

/// Default peer ports, fixed by the workload manifest.
pub const P2P_PORT: u16 = 7513;
pub const API_PORT: u16 = 9092;

#[derive(Debug, thiserror::Error)]
#[error("identity of {name} is already set")]
pub struct IdentityAlreadySet {
    pub name: String,
}

/// A scheduled peer: pod name, pod address and ports, plus the network
/// identity once readiness resolution has succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRecord {
    pub name: String,
    pub address: String,
    pub p2p_port: u16,
    pub api_port: u16,
    identity: Option<String>,
}

impl NodeRecord {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            p2p_port: P2P_PORT,
            api_port: API_PORT,
            identity: None,
        }
    }

    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    /// Only readiness resolution sets the identity, and only once.
    pub(crate) fn set_identity(&mut self, identity: String) -> Result<(), IdentityAlreadySet> {
        if self.identity.is_some() {
            return Err(IdentityAlreadySet {
                name: self.name.clone(),
            });
        }
        self.identity = Some(identity);
        Ok(())
    }

    /// `address:api_port`, the management RPC endpoint.
    pub fn api_endpoint(&self) -> String {
        format!("{}:{}", self.address, self.api_port)
    }

    /// Full p2p endpoint including the identity, as expected by `--bootnodes`.
    pub fn p2p_endpoint(&self) -> Option<String> {
        self.identity
            .as_ref()
            .map(|id| format!("/ip4/{}/tcp/{}/p2p/{}", self.address, self.p2p_port, id))
    }
}

/// A resolved member with its RPC client attached.
#[derive(Clone)]
pub struct NodeClient {
    record: NodeRecord,
    api: Arc<dyn PeerApi>,
}

impl NodeClient {
    pub fn new(record: NodeRecord, api: Arc<dyn PeerApi>) -> Self {
        Self { record, api }
    }

    pub fn name(&self) -> &str {
        &self.record.name
    }

    pub fn record(&self) -> &NodeRecord {
        &self.record
    }

    pub fn api(&self) -> &Arc<dyn PeerApi> {
        &self.api
    }
}

impl fmt::Debug for NodeClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeClient")
            .field("record", &self.record)
            .finish_non_exhaustive()
    }
}

/// Names of the given members, in order. Handy for fault selectors.
pub fn names<'a>(clients: impl IntoIterator<Item = &'a NodeClient>) -> Vec<String> {
    clients.into_iter().map(|c| c.name().to_string()).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Bootnode,
    Workload,
}

impl Role {
    pub fn workload_name(&self) -> &'static str {
        match self {
            Role::Bootnode => "boot",
            Role::Workload => "smesher",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Bootnode => f.write_str("bootnode"),
            Role::Workload => f.write_str("workload"),
        }
    }
}

/// Members of one role. Replica ordinal `i` is always element `i`; the group
/// only grows, and a failed growth leaves it poisoned.
#[derive(Debug)]
pub struct NodeGroup {
    role: Role,
    clients: Vec<NodeClient>,
    poisoned: bool,
}

impl NodeGroup {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            clients: Vec::new(),
            poisoned: false,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// StatefulSet name; pods are `<name>-<ordinal>`.
    pub fn name(&self) -> &'static str {
        self.role.workload_name()
    }

    pub fn headless_service(&self) -> String {
        format!("{}-headless", self.name())
    }

    pub fn pod_name(&self, ordinal: usize) -> String {
        format!("{}-{}", self.name(), ordinal)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    pub(crate) fn poison(&mut self) {
        self.poisoned = true;
    }

    pub(crate) fn extend(&mut self, clients: Vec<NodeClient>) {
        self.clients.extend(clients);
    }

    pub fn clients(&self) -> &[NodeClient] {
        &self.clients
    }

    pub fn get(&self, i: usize) -> Option<&NodeClient> {
        self.clients.get(i)
    }
}
