//! Event registry.
//!
//! Events are registered once during world initialization; each registration
//! returns a stable non-zero 16-bit id and records a name for diagnostics.
//! Two categories exist: node events (delivered via the per-node dispatcher)
//! and system events (processed directly by the scheduler worker). The
//! category is fixed at registration and never changes afterward.

use std::collections::HashMap;

/// Stable, non-zero event identifier assigned at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventId(pub u16);

/// Category fixed at registration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventCategory {
    /// Delivered via the target node's dispatcher; runs serialized per node.
    Node,
    /// Processed directly by the scheduler worker, not routed through a node.
    System,
}

#[derive(Debug, Clone)]
struct EventMeta {
    name: String,
    category: EventCategory,
}

/// Maps symbolic event names to stable ids and records their category.
#[derive(Debug, Default)]
pub struct EventRegistry {
    by_id: HashMap<EventId, EventMeta>,
    by_name: HashMap<String, EventId>,
    next_id: u16,
}

impl EventRegistry {
    pub fn new() -> Self {
        EventRegistry {
            by_id: HashMap::new(),
            by_name: HashMap::new(),
            next_id: 1,
        }
    }

    /// Register a new event, returning its assigned id. Registering the same
    /// name twice is a programmer error; it returns the existing id and logs
    /// at `warn` rather than panicking — misused event ids are diagnosed
    /// loudly but never take the simulation down.
    pub fn register(&mut self, name: &str, category: EventCategory) -> EventId {
        if let Some(&id) = self.by_name.get(name) {
            log::warn!("event '{name}' already registered as {id:?}; reusing");
            return id;
        }
        let id = EventId(self.next_id);
        self.next_id = self
            .next_id
            .checked_add(1)
            .expect("event registry exhausted 16-bit id space");
        self.by_id.insert(
            id,
            EventMeta {
                name: name.to_string(),
                category,
            },
        );
        self.by_name.insert(name.to_string(), id);
        id
    }

    pub fn category(&self, id: EventId) -> Option<EventCategory> {
        self.by_id.get(&id).map(|m| m.category)
    }

    pub fn name(&self, id: EventId) -> Option<&str> {
        self.by_id.get(&id).map(|m| m.name.as_str())
    }

    pub fn id_of(&self, name: &str) -> Option<EventId> {
        self.by_name.get(name).copied()
    }
}

/// Well-known system event names registered by [`World::create`](crate::world::World::create).
pub mod well_known {
    pub const NODE_WAKE: &str = "event_node_wake";
    pub const NODE_KILL: &str = "event_node_kill";
    pub const PDU_RECEIVE: &str = "sys_event_pdu_receive";
    pub const PDU_SEND_TIMEOUT_CHECK: &str = "event_pdu_send_timeout_check";
    pub const NEIGHBOR_CACHE_TIMEOUT_CHECK: &str = "event_neighbor_cache_timeout_check";
    pub const RPL_DIO_INTERVAL: &str = "event_rpl_dio_interval";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_ids_are_stable_and_nonzero() {
        let mut reg = EventRegistry::new();
        let a = reg.register("a", EventCategory::Node);
        let b = reg.register("b", EventCategory::System);
        assert_ne!(a, b);
        assert_ne!(a.0, 0);
        assert_ne!(b.0, 0);
        assert_eq!(reg.category(a), Some(EventCategory::Node));
        assert_eq!(reg.category(b), Some(EventCategory::System));
        assert_eq!(reg.id_of("a"), Some(a));
    }

    #[test]
    fn duplicate_registration_reuses_id() {
        let mut reg = EventRegistry::new();
        let a1 = reg.register("dup", EventCategory::Node);
        let a2 = reg.register("dup", EventCategory::Node);
        assert_eq!(a1, a2);
    }
}
