//! Shared test scaffolding for the integration suite: a `WorldConfig` with
//! the same tight, fast-settling thresholds across every scenario file, plus
//! a `Hooks` implementation that records what it was called with instead of
//! doing anything — enough to observe the pipeline/scheduler from outside
//! the crate the way a host embedding this engine would.

use std::sync::{Arc, Mutex};

use rpl_sim::config::{PhyTransmitMode, WorldConfig};
use rpl_sim::node::NodeHandle;
use rpl_sim::pdu::{DaoPayload, DioPayload, Hooks, MacPdu};
use rpl_sim::prelude::{EventId, NodeId, Payload};

#[allow(dead_code)]
pub fn test_config() -> WorldConfig {
    WorldConfig {
        auto_wake_nodes: true,
        deterministic_random: true,
        real_time: false,
        width: 500.0,
        height: 500.0,
        no_link_dist_thresh: 30.0,
        no_link_quality_thresh: 0.2,
        transmission_time: 5,
        mac_pdu_timeout: 1_000,
        ip_pdu_timeout: 1_000,
        ip_neighbor_timeout: 60_000,
        measure_pdu_timeout: 1_000,
        ip_queue_size: 8,
        phy_transmit_mode: PhyTransmitMode::Unicast,
        ..WorldConfig::default()
    }
}

/// `Hooks` impl that records every call it receives, instead of an
/// out-of-scope RPL layer's real DODAG logic. Every recorded vector is
/// append-only in hook-invocation order, which is what FIFO/ordering
/// assertions need. Cloning shares the underlying recordings (each field is
/// `Arc<Mutex<..>>`), so a test can hand one clone to `World::create` (which
/// needs ownership) and keep another to inspect afterward.
#[derive(Default, Clone)]
#[allow(dead_code)]
pub struct RecordingHooks {
    /// Every node whose MAC layer physically received a frame — fires
    /// regardless of whether the frame's IP destination is this node, which
    /// is what makes it the right observation point for broadcast fanout:
    /// "receive" there means "reached by the medium", not "was the final
    /// RPL recipient".
    pub mac_received: Arc<Mutex<Vec<NodeId>>>,
    pub dis_received: Arc<Mutex<Vec<NodeId>>>,
    pub dio_received: Arc<Mutex<Vec<(NodeId, DioPayload)>>>,
    pub dao_received: Arc<Mutex<Vec<(NodeId, DaoPayload)>>>,
    pub node_events: Arc<Mutex<Vec<(NodeId, EventId, Payload, Payload)>>>,
}

impl Hooks for RecordingHooks {
    fn mac_after_received(&self, node: &NodeHandle<'_>, _pdu: &mut MacPdu) -> bool {
        self.mac_received.lock().unwrap().push(node.id());
        true
    }

    fn rpl_dis_after_received(&self, node: &NodeHandle<'_>) -> bool {
        self.dis_received.lock().unwrap().push(node.id());
        true
    }

    fn rpl_dio_after_received(&self, node: &NodeHandle<'_>, payload: &DioPayload) -> bool {
        self.dio_received.lock().unwrap().push((node.id(), payload.clone()));
        true
    }

    fn rpl_dao_after_received(&self, node: &NodeHandle<'_>, payload: &DaoPayload) -> bool {
        self.dao_received.lock().unwrap().push((node.id(), payload.clone()));
        true
    }

    fn node_event(&self, node: &NodeHandle<'_>, event_id: EventId, payload1: &Payload, payload2: &Payload) -> bool {
        self.node_events
            .lock()
            .unwrap()
            .push((node.id(), event_id, payload1.clone(), payload2.clone()));
        true
    }
}
