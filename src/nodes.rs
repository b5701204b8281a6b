//! Node lifecycle and registry.
//!
//! Lookup is linear — this registry is sized for hundreds of simulated
//! nodes, not the kind of count that would justify a secondary index. Names,
//! MAC addresses, and IP addresses are each unique across alive nodes; `add`
//! enforces that before inserting.

use std::sync::Arc;

use crate::node::{IpAddr, MacAddr, Node, NodeId};

/// Registry of nodes participating in a [`crate::world::World`]. Guarded
/// externally by the world's `nodes` re-entrant mutex; this type itself does
/// no locking.
#[derive(Default)]
pub struct NodeRegistry {
    nodes: Vec<Arc<Node>>,
    next_id: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    DuplicateName(String),
    DuplicateMac(String),
    DuplicateIp(String),
    NotFound,
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::DuplicateName(n) => write!(f, "node name '{n}' already in use"),
            RegistryError::DuplicateMac(m) => write!(f, "mac address '{m}' already in use"),
            RegistryError::DuplicateIp(i) => write!(f, "ip address '{i}' already in use"),
            RegistryError::NotFound => write!(f, "node not found"),
        }
    }
}

impl NodeRegistry {
    pub fn new() -> Self {
        NodeRegistry { nodes: Vec::new(), next_id: 1 }
    }

    /// Allocate the next [`NodeId`] without inserting anything. Callers build
    /// a [`Node`] with this id and pass it to [`Self::add`].
    pub fn allocate_id(&mut self) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id = self.next_id.checked_add(1).expect("node id space exhausted");
        id
    }

    /// Add a node, rejecting it if its name, MAC, or IP collides with an
    /// existing node.
    pub fn add(&mut self, node: Node) -> Result<Arc<Node>, RegistryError> {
        if self.find_by_name(&node.name).is_some() {
            return Err(RegistryError::DuplicateName(node.name.clone()));
        }
        if self.find_by_mac(&node.mac).is_some() {
            return Err(RegistryError::DuplicateMac(node.mac.0.clone()));
        }
        if self.find_by_ip(&node.ip).is_some() {
            return Err(RegistryError::DuplicateIp(node.ip.0.clone()));
        }
        let arc = Arc::new(node);
        self.nodes.push(arc.clone());
        Ok(arc)
    }

    /// Remove a node from the registry. Does not cancel its pending events
    /// or clean up routes referencing it — that is `event_node_kill`'s job,
    /// orchestrated by `World` since it needs the scheduler and every other
    /// node's route table.
    pub fn remove(&mut self, id: NodeId) -> Result<Arc<Node>, RegistryError> {
        let idx = self.nodes.iter().position(|n| n.id == id).ok_or(RegistryError::NotFound)?;
        Ok(self.nodes.remove(idx))
    }

    pub fn find(&self, id: NodeId) -> Option<Arc<Node>> {
        self.nodes.iter().find(|n| n.id == id).cloned()
    }

    pub fn find_by_name(&self, name: &str) -> Option<Arc<Node>> {
        self.nodes.iter().find(|n| n.name == name).cloned()
    }

    pub fn find_by_mac(&self, mac: &MacAddr) -> Option<Arc<Node>> {
        self.nodes.iter().find(|n| &n.mac == mac).cloned()
    }

    pub fn find_by_ip(&self, ip: &IpAddr) -> Option<Arc<Node>> {
        self.nodes.iter().find(|n| &n.ip == ip).cloned()
    }

    pub fn list_snapshot(&self) -> Vec<Arc<Node>> {
        self.nodes.clone()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
