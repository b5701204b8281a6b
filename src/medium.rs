//! Wireless medium: link quality and transmit modes.
//!
//! Distance between two positions is plain Euclidean
//! `sqrt((x2-x1)^2 + (y2-y1)^2)`.

use crate::config::PhyTransmitMode;
use crate::node::NodeId;

/// Link quality from `src` to `dst`: `tx_power(src) * max(0, (thresh - distance) / thresh)`.
/// Symmetric in distance, monotonically decreasing with distance, zero
/// beyond `no_link_dist_thresh`, scaled by the source's transmit power.
pub fn link_quality(
    src_pos: (f64, f64),
    src_tx_power: f32,
    dst_pos: (f64, f64),
    dist_thresh: f32,
) -> f32 {
    let dx = dst_pos.0 - src_pos.0;
    let dy = dst_pos.1 - src_pos.1;
    let distance = (dx * dx + dy * dy).sqrt() as f32;
    let attenuation = ((dist_thresh - distance) / dist_thresh).max(0.0);
    src_tx_power * attenuation
}

/// Whether a link is viable: quality at or above the threshold and both
/// endpoints alive.
pub fn is_viable(quality: f32, quality_thresh: f32, src_alive: bool, dst_alive: bool) -> bool {
    src_alive && dst_alive && quality >= quality_thresh
}

/// One scheduled delivery produced by [`plan_transmission`]: the recipient
/// and the simulator time at which `sys_event_pdu_receive` should fire for
/// it. Viability for broadcast recipients is re-checked at delivery time by
/// the caller, not baked in here.
#[derive(Debug, Clone, Copy)]
pub struct PlannedDelivery {
    pub recipient: NodeId,
}

/// Compute the recipient set for a transmission, given the configured
/// [`PhyTransmitMode`]. Unicast viability is checked now (non-viable unicast
/// frames are dropped at send time); broadcast viability is deliberately
/// deferred to delivery time to model topology churn between send and
/// delivery.
pub fn plan_transmission(
    mode: PhyTransmitMode,
    source: NodeId,
    intended_unicast_dst: Option<NodeId>,
    all_other_alive_nodes: &[NodeId],
) -> Vec<PlannedDelivery> {
    match mode {
        PhyTransmitMode::Unicast => intended_unicast_dst
            .into_iter()
            .map(|recipient| PlannedDelivery { recipient })
            .collect(),
        PhyTransmitMode::Broadcast => all_other_alive_nodes
            .iter()
            .filter(|&&id| id != source)
            .map(|&recipient| PlannedDelivery { recipient })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_quality_is_symmetric() {
        let a = (0.0, 0.0);
        let b = (10.0, 0.0);
        let ab = link_quality(a, 1.0, b, 30.0);
        let ba = link_quality(b, 1.0, a, 30.0);
        assert!((ab - ba).abs() < 1e-6);
    }

    #[test]
    fn link_quality_zero_beyond_threshold() {
        let a = (0.0, 0.0);
        let b = (100.0, 0.0);
        assert_eq!(link_quality(a, 1.0, b, 30.0), 0.0);
    }

    #[test]
    fn link_quality_decreases_monotonically_with_distance() {
        let a = (0.0, 0.0);
        let near = link_quality(a, 1.0, (5.0, 0.0), 30.0);
        let far = link_quality(a, 1.0, (20.0, 0.0), 30.0);
        assert!(near > far);
    }

    #[test]
    fn link_quality_scales_with_tx_power() {
        let a = (0.0, 0.0);
        let b = (10.0, 0.0);
        let full = link_quality(a, 1.0, b, 30.0);
        let half = link_quality(a, 0.5, b, 30.0);
        assert!((half - full / 2.0).abs() < 1e-6);
    }

    #[test]
    fn broadcast_excludes_source_and_includes_all_others() {
        let plan = plan_transmission(
            PhyTransmitMode::Broadcast,
            NodeId(1),
            None,
            &[NodeId(1), NodeId(2), NodeId(3)],
        );
        let recipients: Vec<NodeId> = plan.iter().map(|p| p.recipient).collect();
        assert_eq!(recipients, vec![NodeId(2), NodeId(3)]);
    }

    #[test]
    fn unicast_targets_only_intended_destination() {
        let plan = plan_transmission(
            PhyTransmitMode::Unicast,
            NodeId(1),
            Some(NodeId(2)),
            &[NodeId(1), NodeId(2), NodeId(3)],
        );
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].recipient, NodeId(2));
    }
}
