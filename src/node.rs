//! Node identity, per-layer state, and the per-node dispatcher.
//!
//! Every node serializes its own event handling: at most one handler runs at
//! a time regardless of which thread calls in. This is built on
//! `parking_lot::ReentrantMutex`, which lets the thread already running a
//! node's handler re-enter synchronously without deadlocking on itself — the
//! same role `nodes`/`events`/`schedules` play at the world level, scoped to
//! one node.
//!
//! Handlers never receive a long-lived `&mut NodeState`. Instead they receive
//! a [`NodeHandle`] exposing narrow accessors that each take the lock, borrow
//! the `RefCell`, run a short closure, and drop both before returning. A
//! `RefCell` borrow held across a re-entrant call would panic on the second
//! `borrow_mut`; the lock is reentrant, the borrow is not, so the discipline
//! here is: never call back into a node while still holding one of its
//! borrows. Accessor closures must be leaves — read or write state, then
//! return, and only call `execute` again after the accessor call completes.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};

use parking_lot::ReentrantMutex;

use crate::error::DropReason;
use crate::pdu::QueuedSend;
use crate::route::{NeighborCache, RouteTable};

/// Stable per-node identifier assigned by [`crate::nodes::NodeRegistry::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

/// Short hex-string MAC address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MacAddr(pub String);

impl MacAddr {
    /// All-`0xff` sentinel meaning "no resolved neighbor yet".
    pub const BROADCAST_HEX: &'static str = "ffffffffffff";

    pub fn broadcast() -> Self {
        MacAddr(Self::BROADCAST_HEX.to_string())
    }

    pub fn is_broadcast(&self) -> bool {
        self.0.eq_ignore_ascii_case(Self::BROADCAST_HEX)
    }
}

/// Hex-string IP address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IpAddr(pub String);

#[derive(Debug, Clone, Default)]
pub struct PhyState {}

#[derive(Debug, Clone, Default)]
pub struct MacState {}

#[derive(Debug, Clone, Default)]
pub struct IcmpState {}

#[derive(Debug, Clone, Default)]
pub struct RplState {}

/// IP layer state: routing table, neighbor cache, and the bounded send queue
/// that applies backpressure when full.
#[derive(Debug, Clone, Default)]
pub struct IpState {
    pub routes: RouteTable,
    pub neighbors: NeighborCache,
    pub busy: bool,
    pub send_queue: VecDeque<QueuedSend>,
    pub enqueued_count: u64,
}

/// Mutable state behind a node's dispatcher lock. Never exposed directly;
/// reached only through [`NodeHandle`]'s narrow accessors.
struct NodeState {
    position: (f64, f64),
    tx_power: f32,
    alive: bool,
    reentrancy_depth: u32,
    phy: PhyState,
    mac: MacState,
    ip: IpState,
    icmp: IcmpState,
    rpl: RplState,
    drop_counts: HashMap<DropReason, u64>,
}

type PendingCall = Box<dyn FnOnce(&NodeHandle<'_>) -> bool + Send>;

struct NodeDispatcher {
    state: ReentrantMutex<RefCell<NodeState>>,
    pending: std::sync::Mutex<VecDeque<PendingCall>>,
}

/// A node: immutable identity plus the dispatcher-guarded mutable state.
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub mac: MacAddr,
    pub ip: IpAddr,
    dispatcher: NodeDispatcher,
}

impl Node {
    pub fn new(
        id: NodeId,
        name: impl Into<String>,
        mac: MacAddr,
        ip: IpAddr,
        position: (f64, f64),
        tx_power: f32,
    ) -> Self {
        Node {
            id,
            name: name.into(),
            mac,
            ip,
            dispatcher: NodeDispatcher {
                state: ReentrantMutex::new(RefCell::new(NodeState {
                    position,
                    tx_power,
                    alive: false,
                    reentrancy_depth: 0,
                    phy: PhyState::default(),
                    mac: MacState::default(),
                    ip: IpState::default(),
                    icmp: IcmpState::default(),
                    rpl: RplState::default(),
                    drop_counts: HashMap::new(),
                })),
                pending: std::sync::Mutex::new(VecDeque::new()),
            },
        }
    }

    /// Run `handler` against this node now: the caller blocks until the
    /// handler returns, running inline on the caller's thread (re-entrant if
    /// the caller already holds this node's guard). Unlike
    /// [`Self::execute_async`], the closure may borrow from the caller's
    /// stack — it has finished running before this call returns, so no
    /// `'static` bound is needed.
    pub fn execute_sync<F>(&self, handler: F) -> bool
    where
        F: FnOnce(&NodeHandle<'_>) -> bool,
    {
        let guard = self.dispatcher.state.lock();
        guard.borrow_mut().reentrancy_depth += 1;
        let handle = NodeHandle { node: self };
        let result = handler(&handle);
        let at_top_level = {
            let mut st = guard.borrow_mut();
            st.reentrancy_depth -= 1;
            st.reentrancy_depth == 0
        };
        drop(guard);
        if at_top_level {
            self.drain_pending();
        }
        result
    }

    /// Enqueue `handler` to run once the currently active top-level handler
    /// on this node returns. It runs on whichever thread happens to be the
    /// one that drops this node's re-entrancy depth back to zero — typically
    /// the scheduler
    /// worker finishing the event that was in progress when this was called.
    /// Because the closure escapes the calling stack frame, it must be
    /// `Send + 'static`, unlike [`Self::execute_sync`]'s.
    pub fn execute_async<F>(&self, handler: F)
    where
        F: FnOnce(&NodeHandle<'_>) -> bool + Send + 'static,
    {
        self.dispatcher.pending.lock().unwrap().push_back(Box::new(handler));
        // If no handler is currently active on this node, nothing will drain
        // the queue until the next synchronous call arrives. Drain eagerly
        // in that case so an async-only caller still runs.
        if self.dispatcher.state.lock().borrow().reentrancy_depth == 0 {
            self.drain_pending();
        }
    }

    fn drain_pending(&self) {
        loop {
            let next = self.dispatcher.pending.lock().unwrap().pop_front();
            match next {
                Some(call) => {
                    self.execute_sync(move |h| call(h));
                }
                None => break,
            }
        }
    }
}

/// Narrow, short-lived view into a node's state, handed to hook and event
/// handler closures. See the module doc for the borrow discipline this type
/// depends on.
pub struct NodeHandle<'a> {
    node: &'a Node,
}

impl<'a> NodeHandle<'a> {
    pub fn id(&self) -> NodeId {
        self.node.id
    }

    pub fn name(&self) -> &str {
        &self.node.name
    }

    pub fn mac(&self) -> &MacAddr {
        &self.node.mac
    }

    pub fn ip(&self) -> &IpAddr {
        &self.node.ip
    }

    pub fn position(&self) -> (f64, f64) {
        self.with_state(|s| s.position)
    }

    pub fn set_position(&self, position: (f64, f64)) {
        self.with_state_mut(|s| s.position = position)
    }

    pub fn tx_power(&self) -> f32 {
        self.with_state(|s| s.tx_power)
    }

    pub fn is_alive(&self) -> bool {
        self.with_state(|s| s.alive)
    }

    pub fn set_alive(&self, alive: bool) {
        self.with_state_mut(|s| s.alive = alive)
    }

    pub fn with_phy<R>(&self, f: impl FnOnce(&PhyState) -> R) -> R {
        self.with_state(|s| f(&s.phy))
    }

    pub fn with_phy_mut<R>(&self, f: impl FnOnce(&mut PhyState) -> R) -> R {
        self.with_state_mut(|s| f(&mut s.phy))
    }

    pub fn with_mac<R>(&self, f: impl FnOnce(&MacState) -> R) -> R {
        self.with_state(|s| f(&s.mac))
    }

    pub fn with_mac_mut<R>(&self, f: impl FnOnce(&mut MacState) -> R) -> R {
        self.with_state_mut(|s| f(&mut s.mac))
    }

    pub fn with_ip<R>(&self, f: impl FnOnce(&IpState) -> R) -> R {
        self.with_state(|s| f(&s.ip))
    }

    pub fn with_ip_mut<R>(&self, f: impl FnOnce(&mut IpState) -> R) -> R {
        self.with_state_mut(|s| f(&mut s.ip))
    }

    pub fn with_icmp<R>(&self, f: impl FnOnce(&IcmpState) -> R) -> R {
        self.with_state(|s| f(&s.icmp))
    }

    pub fn with_icmp_mut<R>(&self, f: impl FnOnce(&mut IcmpState) -> R) -> R {
        self.with_state_mut(|s| f(&mut s.icmp))
    }

    pub fn with_rpl<R>(&self, f: impl FnOnce(&RplState) -> R) -> R {
        self.with_state(|s| f(&s.rpl))
    }

    pub fn with_rpl_mut<R>(&self, f: impl FnOnce(&mut RplState) -> R) -> R {
        self.with_state_mut(|s| f(&mut s.rpl))
    }

    pub fn record_drop(&self, reason: DropReason) {
        self.with_state_mut(|s| *s.drop_counts.entry(reason).or_insert(0) += 1);
        log::warn!("node {:?}: dropped frame ({reason})", self.node.id);
    }

    pub fn drop_count(&self, reason: DropReason) -> u64 {
        self.with_state(|s| *s.drop_counts.get(&reason).unwrap_or(&0))
    }

    pub fn total_drops(&self) -> u64 {
        self.with_state(|s| s.drop_counts.values().sum())
    }

    fn with_state<R>(&self, f: impl FnOnce(&NodeState) -> R) -> R {
        let guard = self.node.dispatcher.state.lock();
        let st = guard.borrow();
        f(&st)
    }

    fn with_state_mut<R>(&self, f: impl FnOnce(&mut NodeState) -> R) -> R {
        let guard = self.node.dispatcher.state.lock();
        let mut st = guard.borrow_mut();
        f(&mut st)
    }
}
