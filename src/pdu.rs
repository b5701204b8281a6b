//! The layered PDU pipeline.
//!
//! Each layer's service data unit is a sum type rather than a
//! void-pointer-plus-type-discriminant chain: `PhySdu = Mac(MacPdu)`,
//! `MacSdu = Ip(IpPdu)`, `IpSdu = Icmp(IcmpPdu)`, `IcmpSdu = Rpl(RplMessage)`,
//! `RplMessage = Dis | Dio(..) | Dao(..)`. A malformed chain is a compile
//! error, not a downcast that fails at runtime.
//!
//! Hooks are a trait with default no-op (`true`) implementations for every
//! layer/direction/message-kind combination, so external RPL code overrides
//! only what it needs and this crate never special-cases which hooks are
//! "wired up".

use crate::clock::SimTime;
use crate::config::WorldConfig;
use crate::error::DropReason;
use crate::node::{IpAddr, MacAddr, Node, NodeHandle, NodeId};
use crate::registry::EventId;
use crate::route::RouteType;
use crate::scheduler::Payload;

pub const MAC_TYPE_IP: u16 = 0x86DD;
pub const NEXT_HEADER_ICMP: u8 = 58;
pub const ICMP_TYPE_RPL: u8 = 155;
pub const RPL_CODE_DIS: u8 = 0x00;
pub const RPL_CODE_DIO: u8 = 0x01;
pub const RPL_CODE_DAO: u8 = 0x02;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlowLabel {
    pub going_down: bool,
    pub from_sibling: bool,
    pub rank_error: bool,
    pub forward_error: bool,
    pub sender_rank: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DioPayload {
    pub rank: u16,
    pub dodag_id: IpAddr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DaoPayload {
    pub target: IpAddr,
    pub path_sequence: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RplMessage {
    Dis,
    Dio(DioPayload),
    Dao(DaoPayload),
}

#[derive(Debug, Clone, PartialEq)]
pub enum IcmpSdu {
    Rpl(RplMessage),
}

#[derive(Debug, Clone, PartialEq)]
pub struct IcmpPdu {
    pub icmp_type: u8,
    pub code: u8,
    pub sdu: IcmpSdu,
}

impl IcmpPdu {
    pub fn for_rpl(message: RplMessage) -> Self {
        let code = match &message {
            RplMessage::Dis => RPL_CODE_DIS,
            RplMessage::Dio(_) => RPL_CODE_DIO,
            RplMessage::Dao(_) => RPL_CODE_DAO,
        };
        IcmpPdu {
            icmp_type: ICMP_TYPE_RPL,
            code,
            sdu: IcmpSdu::Rpl(message),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum IpSdu {
    Icmp(IcmpPdu),
}

#[derive(Debug, Clone, PartialEq)]
pub struct IpPdu {
    pub src: IpAddr,
    pub dst: IpAddr,
    pub next_header: u8,
    pub hop_limit: u8,
    pub flow_label: FlowLabel,
    pub sdu: IpSdu,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MacSdu {
    Ip(IpPdu),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MacPdu {
    pub src: MacAddr,
    pub dst: MacAddr,
    pub ether_type: u16,
    pub sdu: MacSdu,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PhySdu {
    Mac(MacPdu),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PhyPdu {
    pub sdu: PhySdu,
}

/// A send request that outlived the active handler and is sitting in a
/// node's bounded IP queue.
#[derive(Debug, Clone)]
pub struct QueuedSend {
    pub dst: IpAddr,
    pub next_header: u8,
    pub sdu: IpSdu,
    pub enqueued_at: SimTime,
}

/// Per-layer, per-direction hooks. Every method defaults to
/// `true` (accept, no mutation); external RPL code overrides the subset it
/// implements.
pub trait Hooks: Send + Sync {
    fn phy_before_sent(&self, _node: &NodeHandle<'_>, _pdu: &mut PhyPdu) -> bool {
        true
    }
    fn phy_after_received(&self, _node: &NodeHandle<'_>, _pdu: &mut PhyPdu) -> bool {
        true
    }
    fn mac_before_sent(&self, _node: &NodeHandle<'_>, _pdu: &mut MacPdu) -> bool {
        true
    }
    fn mac_after_received(&self, _node: &NodeHandle<'_>, _pdu: &mut MacPdu) -> bool {
        true
    }
    fn ip_before_sent(&self, _node: &NodeHandle<'_>, _pdu: &mut IpPdu) -> bool {
        true
    }
    fn ip_after_received(&self, _node: &NodeHandle<'_>, _pdu: &mut IpPdu) -> bool {
        true
    }
    fn icmp_before_sent(&self, _node: &NodeHandle<'_>, _pdu: &mut IcmpPdu) -> bool {
        true
    }
    fn icmp_after_received(&self, _node: &NodeHandle<'_>, _pdu: &mut IcmpPdu) -> bool {
        true
    }
    fn rpl_dis_before_sent(&self, _node: &NodeHandle<'_>) -> bool {
        true
    }
    fn rpl_dis_after_received(&self, _node: &NodeHandle<'_>) -> bool {
        true
    }
    fn rpl_dio_before_sent(&self, _node: &NodeHandle<'_>, _payload: &mut DioPayload) -> bool {
        true
    }
    fn rpl_dio_after_received(&self, _node: &NodeHandle<'_>, _payload: &DioPayload) -> bool {
        true
    }
    fn rpl_dao_before_sent(&self, _node: &NodeHandle<'_>, _payload: &mut DaoPayload) -> bool {
        true
    }
    fn rpl_dao_after_received(&self, _node: &NodeHandle<'_>, _payload: &DaoPayload) -> bool {
        true
    }
    /// Per-frame mangling hook for the medium to inject errors. Identity by
    /// default.
    fn mangle(&self, _node: &NodeHandle<'_>, _frame: &mut PhyPdu) -> bool {
        true
    }

    /// Catch-all for node events a host registered itself via
    /// [`crate::world::World::register_node_event`] (e.g. an RPL layer's own
    /// DIO-interval timer). `World::schedule`/`cancel` accept any
    /// [`EventId`], including host-registered ones; the six built-in ids
    /// (`event_node_wake` and friends) never reach this hook, only ids a host
    /// registered itself. Default accepts and does nothing, matching every
    /// other hook's default.
    fn node_event(
        &self,
        _node: &NodeHandle<'_>,
        _event_id: EventId,
        _payload1: &Payload,
        _payload2: &Payload,
    ) -> bool {
        true
    }
}

/// Hooks implementation that accepts everything and mutates nothing. Useful
/// for tests and for hosts that haven't wired up RPL logic yet.
pub struct NoopHooks;
impl Hooks for NoopHooks {}

fn rpl_before_sent(hooks: &dyn Hooks, node: &NodeHandle<'_>, message: &mut RplMessage) -> bool {
    match message {
        RplMessage::Dis => hooks.rpl_dis_before_sent(node),
        RplMessage::Dio(payload) => hooks.rpl_dio_before_sent(node, payload),
        RplMessage::Dao(payload) => hooks.rpl_dao_before_sent(node, payload),
    }
}

fn rpl_after_received(hooks: &dyn Hooks, node: &NodeHandle<'_>, message: &RplMessage) -> bool {
    match message {
        RplMessage::Dis => hooks.rpl_dis_after_received(node),
        RplMessage::Dio(payload) => hooks.rpl_dio_after_received(node, payload),
        RplMessage::Dao(payload) => hooks.rpl_dao_after_received(node, payload),
    }
}

/// Outcome of [`originate_send`].
#[derive(Debug)]
pub enum SendOutcome {
    /// The frame cleared every send-path hook and is ready for the medium.
    Ready(PhyPdu),
    /// The node was busy; the request was queued for later draining.
    Queued,
    Dropped(DropReason),
}

/// Build the IP→ICMP chain, run before-sent hooks at each layer, and hand
/// back a fully wrapped frame ready for the medium — or queue/drop it.
pub fn originate_send(
    node: &Node,
    hooks: &dyn Hooks,
    config: &WorldConfig,
    now: SimTime,
    dst: IpAddr,
    next_header: u8,
    sdu: IpSdu,
) -> SendOutcome {
    let was_busy = node.execute_sync(|h| h.with_ip(|ip| ip.busy));
    if was_busy {
        let accepted = node.execute_sync(|h| {
            h.with_ip_mut(|ip| {
                if ip.send_queue.len() >= config.ip_queue_size {
                    false
                } else {
                    ip.send_queue.push_back(QueuedSend {
                        dst: IpAddr(dst.0.clone()),
                        next_header,
                        sdu: sdu.clone(),
                        enqueued_at: now,
                    });
                    ip.enqueued_count += 1;
                    true
                }
            })
        });
        return if accepted {
            SendOutcome::Queued
        } else {
            node.execute_sync(|h| h.record_drop(DropReason::QueueFull));
            SendOutcome::Dropped(DropReason::QueueFull)
        };
    }
    node.execute_sync(|h| h.with_ip_mut(|ip| ip.busy = true));
    build_and_hook_send_path(node, hooks, dst, next_header, sdu)
}

/// Drain one queued send after the node frees up (called when
/// `event_pdu_send_timeout_check` or a drain point observes `busy -> idle`).
/// Returns `None` if the queue was empty; otherwise the destination the
/// drained send was bound for, alongside its outcome, so the caller (world.rs)
/// can schedule the resulting frame without needing to inspect queue
/// internals itself.
pub fn drain_one_queued(
    node: &Node,
    hooks: &dyn Hooks,
) -> Option<(IpAddr, SendOutcome)> {
    let next = node.execute_sync(|h| h.with_ip_mut(|ip| ip.send_queue.pop_front()));
    let queued = next?;
    node.execute_sync(|h| h.with_ip_mut(|ip| ip.busy = true));
    let dst = IpAddr(queued.dst.0.clone());
    Some((dst, build_and_hook_send_path(node, hooks, queued.dst, queued.next_header, queued.sdu)))
}

/// Drop queued sends older than `ip_pdu_timeout` (called from
/// `event_pdu_send_timeout_check`). Returns the number dropped.
pub fn expire_queued_sends(node: &Node, now: SimTime, ip_pdu_timeout: SimTime) -> usize {
    let dropped = node.execute_sync(|h| {
        h.with_ip_mut(|ip| {
            let before = ip.send_queue.len();
            ip.send_queue.retain(|q| now.saturating_sub(q.enqueued_at) <= ip_pdu_timeout);
            before - ip.send_queue.len()
        })
    });
    for _ in 0..dropped {
        node.execute_sync(|h| h.record_drop(DropReason::QueueFull));
    }
    dropped
}

fn build_and_hook_send_path(
    node: &Node,
    hooks: &dyn Hooks,
    dst: IpAddr,
    next_header: u8,
    sdu: IpSdu,
) -> SendOutcome {
    let src_ip = IpAddr(node.ip.0.clone());
    let mut ip_pdu = IpPdu {
        src: src_ip,
        dst,
        next_header,
        hop_limit: 64,
        flow_label: FlowLabel::default(),
        sdu,
    };
    let ip_ok = node.execute_sync(|h| hooks.ip_before_sent(h, &mut ip_pdu));
    if !ip_ok {
        node.execute_sync(|h| h.record_drop(DropReason::HookRejected));
        return SendOutcome::Dropped(DropReason::HookRejected);
    }
    if let IpSdu::Icmp(icmp) = &mut ip_pdu.sdu {
        let icmp_ok = node.execute_sync(|h| hooks.icmp_before_sent(h, icmp));
        if !icmp_ok {
            node.execute_sync(|h| h.record_drop(DropReason::HookRejected));
            return SendOutcome::Dropped(DropReason::HookRejected);
        }
        if let IcmpSdu::Rpl(msg) = &mut icmp.sdu {
            let rpl_ok = node.execute_sync(|h| rpl_before_sent(hooks, h, msg));
            if !rpl_ok {
                node.execute_sync(|h| h.record_drop(DropReason::HookRejected));
                return SendOutcome::Dropped(DropReason::HookRejected);
            }
        }
    }

    let mut mac_pdu = MacPdu {
        src: MacAddr(node.mac.0.clone()),
        dst: MacAddr::broadcast(),
        ether_type: MAC_TYPE_IP,
        sdu: MacSdu::Ip(ip_pdu),
    };
    let mac_ok = node.execute_sync(|h| hooks.mac_before_sent(h, &mut mac_pdu));
    if !mac_ok {
        node.execute_sync(|h| h.record_drop(DropReason::HookRejected));
        return SendOutcome::Dropped(DropReason::HookRejected);
    }

    let mut phy_pdu = PhyPdu { sdu: PhySdu::Mac(mac_pdu) };
    let phy_ok = node.execute_sync(|h| hooks.phy_before_sent(h, &mut phy_pdu));
    if !phy_ok {
        node.execute_sync(|h| h.record_drop(DropReason::HookRejected));
        return SendOutcome::Dropped(DropReason::HookRejected);
    }
    let mangled_ok = node.execute_sync(|h| hooks.mangle(h, &mut phy_pdu));
    if !mangled_ok {
        node.execute_sync(|h| h.record_drop(DropReason::HookRejected));
        return SendOutcome::Dropped(DropReason::HookRejected);
    }

    SendOutcome::Ready(phy_pdu)
}

/// Mark a node's IP layer idle again. The next synchronous sender (or a
/// periodic drain point) is responsible for calling [`drain_one_queued`]
/// afterward.
pub fn mark_idle(node: &Node) {
    node.execute_sync(|h| h.with_ip_mut(|ip| ip.busy = false));
}

/// Outcome of [`receive`].
#[derive(Debug)]
pub enum ReceiveOutcome {
    /// The frame was consumed by this node's RPL hooks.
    Delivered,
    /// The frame must be forwarded on; the caller (world.rs) hands this to
    /// the medium for (re)transmission toward `next_hop`.
    Forward { next_hop: NodeId, frame: PhyPdu },
    Dropped(DropReason),
}

/// Run the receive path for a frame arriving at `node`: PHY → MAC → IP →
/// ICMP → RPL, decapsulating and dispatching as each layer's discriminant is
/// examined. Forwarding decisions (when the IP destination isn't `node`) call
/// `resolve_mac` to turn a next-hop's [`NodeId`] into its MAC address; the
/// caller (`world.rs`) resolves this with a brief registry lookup rather than
/// holding the node registry locked for the whole receive path, so a
/// host-supplied hook running inside this call is free to touch the registry
/// itself (e.g. add/remove a node) without deadlocking.
pub fn receive(
    node: &Node,
    hooks: &dyn Hooks,
    resolve_mac: &dyn Fn(NodeId) -> Option<MacAddr>,
    mut frame: PhyPdu,
) -> ReceiveOutcome {
    let phy_ok = node.execute_sync(|h| hooks.phy_after_received(h, &mut frame));
    if !phy_ok {
        node.execute_sync(|h| h.record_drop(DropReason::HookRejected));
        return ReceiveOutcome::Dropped(DropReason::HookRejected);
    }

    let PhySdu::Mac(mut mac_pdu) = frame.sdu;
    let mac_ok = node.execute_sync(|h| hooks.mac_after_received(h, &mut mac_pdu));
    if !mac_ok {
        node.execute_sync(|h| h.record_drop(DropReason::HookRejected));
        return ReceiveOutcome::Dropped(DropReason::HookRejected);
    }
    if mac_pdu.ether_type != MAC_TYPE_IP {
        node.execute_sync(|h| h.record_drop(DropReason::UnexpectedFormat));
        return ReceiveOutcome::Dropped(DropReason::UnexpectedFormat);
    }

    let MacSdu::Ip(mut ip_pdu) = mac_pdu.sdu;
    let ip_ok = node.execute_sync(|h| hooks.ip_after_received(h, &mut ip_pdu));
    if !ip_ok {
        node.execute_sync(|h| h.record_drop(DropReason::HookRejected));
        return ReceiveOutcome::Dropped(DropReason::HookRejected);
    }
    if ip_pdu.next_header != NEXT_HEADER_ICMP {
        node.execute_sync(|h| h.record_drop(DropReason::UnexpectedFormat));
        return ReceiveOutcome::Dropped(DropReason::UnexpectedFormat);
    }

    let self_ip = IpAddr(node.ip.0.clone());
    if ip_pdu.dst != self_ip {
        return forward(node, resolve_mac, ip_pdu);
    }

    let IpSdu::Icmp(mut icmp_pdu) = ip_pdu.sdu;
    let icmp_ok = node.execute_sync(|h| hooks.icmp_after_received(h, &mut icmp_pdu));
    if !icmp_ok {
        node.execute_sync(|h| h.record_drop(DropReason::HookRejected));
        return ReceiveOutcome::Dropped(DropReason::HookRejected);
    }
    if icmp_pdu.icmp_type != ICMP_TYPE_RPL {
        node.execute_sync(|h| h.record_drop(DropReason::UnexpectedFormat));
        return ReceiveOutcome::Dropped(DropReason::UnexpectedFormat);
    }

    let IcmpSdu::Rpl(message) = icmp_pdu.sdu;
    let rpl_ok = node.execute_sync(|h| rpl_after_received(hooks, h, &message));
    if !rpl_ok {
        node.execute_sync(|h| h.record_drop(DropReason::HookRejected));
        return ReceiveOutcome::Dropped(DropReason::HookRejected);
    }
    ReceiveOutcome::Delivered
}

fn forward(node: &Node, resolve_mac: &dyn Fn(NodeId) -> Option<MacAddr>, ip_pdu: IpPdu) -> ReceiveOutcome {
    let next_hop = node.execute_sync(|h| {
        h.with_ip(|ip| ip.routes.longest_prefix_match(&ip_pdu.dst).map(|r| r.next_hop))
    });
    let Some(next_hop) = next_hop else {
        node.execute_sync(|h| h.record_drop(DropReason::NoRoute));
        return ReceiveOutcome::Dropped(DropReason::NoRoute);
    };
    let Some(next_hop_mac) = resolve_mac(next_hop) else {
        node.execute_sync(|h| h.record_drop(DropReason::NoRoute));
        return ReceiveOutcome::Dropped(DropReason::NoRoute);
    };
    let mut forwarded = ip_pdu;
    forwarded.hop_limit = forwarded.hop_limit.saturating_sub(1);
    let mac_pdu = MacPdu {
        src: MacAddr(node.mac.0.clone()),
        dst: next_hop_mac,
        ether_type: MAC_TYPE_IP,
        sdu: MacSdu::Ip(forwarded),
    };
    ReceiveOutcome::Forward {
        next_hop,
        frame: PhyPdu { sdu: PhySdu::Mac(mac_pdu) },
    }
}

/// Install a connected route for `target` via `next_hop`, as the neighbor
/// discovery/DAO machinery (out of scope here) would when it learns one.
pub fn install_route(
    node: &Node,
    target: IpAddr,
    prefix_len: u8,
    next_hop: NodeId,
    route_type: RouteType,
    now: SimTime,
) {
    node.execute_sync(|h| {
        h.with_ip_mut(|ip| {
            ip.routes.install(crate::route::Route::new(target, prefix_len, next_hop, route_type, now));
        });
        true
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::MacAddr;

    fn sample_node(id: u32) -> Node {
        Node::new(
            NodeId(id),
            format!("n{id}"),
            MacAddr(format!("{id:012x}")),
            IpAddr(format!("fe80::{id:x}")),
            (0.0, 0.0),
            1.0,
        )
    }

    #[test]
    fn originate_send_wraps_icmp_in_ip_mac_phy() {
        let node = sample_node(1);
        let dst = IpAddr("fe80::2".to_string());
        let sdu = IpSdu::Icmp(IcmpPdu::for_rpl(RplMessage::Dis));
        match originate_send(&node, &NoopHooks, &WorldConfig::default(), 0, dst, NEXT_HEADER_ICMP, sdu) {
            SendOutcome::Ready(PhyPdu { sdu: PhySdu::Mac(mac) }) => {
                assert_eq!(mac.ether_type, MAC_TYPE_IP);
                match mac.sdu {
                    MacSdu::Ip(ip) => {
                        assert_eq!(ip.next_header, NEXT_HEADER_ICMP);
                        match ip.sdu {
                            IpSdu::Icmp(icmp) => assert_eq!(icmp.icmp_type, ICMP_TYPE_RPL),
                        }
                    }
                }
            }
            other => panic!("expected Ready, got {other:?}"),
        }
    }

    #[test]
    fn second_send_while_busy_queues_then_overflow_drops() {
        let node = sample_node(2);
        let mut config = WorldConfig::default();
        config.ip_queue_size = 1;
        let dst = IpAddr("fe80::3".to_string());
        let sdu = || IpSdu::Icmp(IcmpPdu::for_rpl(RplMessage::Dis));
        // First send transitions idle -> busy and returns Ready.
        assert!(matches!(
            originate_send(&node, &NoopHooks, &config, 0, dst.clone(), NEXT_HEADER_ICMP, sdu()),
            SendOutcome::Ready(_)
        ));
        // Node is still marked busy (caller hasn't called mark_idle), so the
        // next send queues.
        assert!(matches!(
            originate_send(&node, &NoopHooks, &config, 1, dst.clone(), NEXT_HEADER_ICMP, sdu()),
            SendOutcome::Queued
        ));
        // Queue is now full (size 1); a third send is dropped.
        assert!(matches!(
            originate_send(&node, &NoopHooks, &config, 2, dst.clone(), NEXT_HEADER_ICMP, sdu()),
            SendOutcome::Dropped(DropReason::QueueFull)
        ));
    }

    #[test]
    fn receive_rejects_non_ip_ether_type() {
        let node = sample_node(3);
        let mac_pdu = MacPdu {
            src: MacAddr::broadcast(),
            dst: MacAddr(node.mac.0.clone()),
            ether_type: 0x0800,
            sdu: MacSdu::Ip(IpPdu {
                src: IpAddr("fe80::9".to_string()),
                dst: IpAddr(node.ip.0.clone()),
                next_header: NEXT_HEADER_ICMP,
                hop_limit: 64,
                flow_label: FlowLabel::default(),
                sdu: IpSdu::Icmp(IcmpPdu::for_rpl(RplMessage::Dis)),
            }),
        };
        let frame = PhyPdu { sdu: PhySdu::Mac(mac_pdu) };
        let outcome = receive(&node, &NoopHooks, &|_| None, frame);
        assert!(matches!(outcome, ReceiveOutcome::Dropped(DropReason::UnexpectedFormat)));
    }

    #[test]
    fn receive_delivers_dis_addressed_to_self() {
        let node = sample_node(4);
        let mac_pdu = MacPdu {
            src: MacAddr::broadcast(),
            dst: MacAddr(node.mac.0.clone()),
            ether_type: MAC_TYPE_IP,
            sdu: MacSdu::Ip(IpPdu {
                src: IpAddr("fe80::9".to_string()),
                dst: IpAddr(node.ip.0.clone()),
                next_header: NEXT_HEADER_ICMP,
                hop_limit: 64,
                flow_label: FlowLabel::default(),
                sdu: IpSdu::Icmp(IcmpPdu::for_rpl(RplMessage::Dis)),
            }),
        };
        let frame = PhyPdu { sdu: PhySdu::Mac(mac_pdu) };
        let outcome = receive(&node, &NoopHooks, &|_| None, frame);
        assert!(matches!(outcome, ReceiveOutcome::Delivered));
    }

    #[test]
    fn receive_with_no_route_for_foreign_destination_drops() {
        let node = sample_node(5);
        let mac_pdu = MacPdu {
            src: MacAddr::broadcast(),
            dst: MacAddr(node.mac.0.clone()),
            ether_type: MAC_TYPE_IP,
            sdu: MacSdu::Ip(IpPdu {
                src: IpAddr("fe80::9".to_string()),
                dst: IpAddr("fe80::dead".to_string()),
                next_header: NEXT_HEADER_ICMP,
                hop_limit: 64,
                flow_label: FlowLabel::default(),
                sdu: IpSdu::Icmp(IcmpPdu::for_rpl(RplMessage::Dis)),
            }),
        };
        let frame = PhyPdu { sdu: PhySdu::Mac(mac_pdu) };
        let outcome = receive(&node, &NoopHooks, &|_| None, frame);
        assert!(matches!(outcome, ReceiveOutcome::Dropped(DropReason::NoRoute)));
    }
}
