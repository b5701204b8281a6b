//! The simulation world: control surface, concurrency, and the glue between
//! the scheduler, the node registry, and the PDU pipeline.
//!
//! There is no process-wide singleton here: `World::create` returns an
//! `Arc<World>` a host owns and threads it through explicitly, which is also
//! what lets tests construct independent worlds and run in parallel.
//!
//! Three `parking_lot::ReentrantMutex`es guard the `nodes`, `events`, and
//! `schedules` state; they're re-entrant so a handler invoked while one is
//! held can look things up again without deadlocking on itself. The fixed
//! acquisition order is `nodes → events → schedules` everywhere more than one
//! is taken together. A separate, non-reentrant `doorbell` `Mutex<()>` +
//! `Condvar` pair is used purely to wake the worker thread; it never guards
//! simulation state, so it can't participate in the three-lock ordering at
//! all.

use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::ReentrantMutex;

use crate::clock::{self, MwcRng, SimTime};
use crate::config::{PhyTransmitMode, WorldConfig};
use crate::error::{DropReason, SimError};
use crate::medium;
use crate::node::{IpAddr, MacAddr, Node, NodeId};
use crate::nodes::{NodeRegistry, RegistryError};
use crate::pdu::{self, Hooks, IpSdu, PhyPdu, ReceiveOutcome, SendOutcome};
use crate::registry::{well_known, EventCategory, EventId, EventRegistry};
use crate::scheduler::{CancelFilter, Payload, SchedulerState};

/// Event ids resolved once at [`World::create`] and reused by the dispatcher;
/// stable for the life of the world.
struct WellKnownIds {
    node_wake: EventId,
    node_kill: EventId,
    pdu_receive: EventId,
    pdu_send_timeout_check: EventId,
    neighbor_cache_timeout_check: EventId,
    rpl_dio_interval: EventId,
}

/// Everything guarded by the `events` mutex: the registry itself plus the
/// control-surface lifecycle flags.
struct EventsState {
    registry: EventRegistry,
    started: bool,
    paused: bool,
    step: bool,
}

/// Process-wide state for one simulation, minus the singleton part (see
/// module doc).
pub struct World {
    config: WorldConfig,
    hooks: Box<dyn Hooks>,
    ev: WellKnownIds,
    nodes: ReentrantMutex<RefCell<NodeRegistry>>,
    events: ReentrantMutex<RefCell<EventsState>>,
    schedules: ReentrantMutex<RefCell<SchedulerState>>,
    rng: Mutex<MwcRng>,
    doorbell: Mutex<()>,
    condvar: Condvar,
    events_processed: AtomicU64,
    buckets_drained: AtomicU64,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Drop for World {
    fn drop(&mut self) {
        // The worker thread only ever holds a `Weak<World>` (see `start`), so
        // it can never be the thing keeping this `Drop` from running; it's
        // safe to signal and join it here.
        self.events_state(|s| s.started = false);
        self.ring_doorbell();
        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

impl World {
    /// Initialize a world. The only path in this crate that returns `Result`
    /// to the host — every other fallible path inside a running simulation
    /// is logged and absorbed instead.
    pub fn create(config: WorldConfig, hooks: Box<dyn Hooks>) -> Result<Arc<World>, SimError> {
        config.validate()?;

        let mut registry = EventRegistry::new();
        let ev = WellKnownIds {
            node_wake: registry.register(well_known::NODE_WAKE, EventCategory::Node),
            node_kill: registry.register(well_known::NODE_KILL, EventCategory::Node),
            pdu_receive: registry.register(well_known::PDU_RECEIVE, EventCategory::System),
            pdu_send_timeout_check: registry
                .register(well_known::PDU_SEND_TIMEOUT_CHECK, EventCategory::Node),
            neighbor_cache_timeout_check: registry
                .register(well_known::NEIGHBOR_CACHE_TIMEOUT_CHECK, EventCategory::Node),
            rpl_dio_interval: registry.register(well_known::RPL_DIO_INTERVAL, EventCategory::Node),
        };

        let rng = if config.deterministic_random {
            MwcRng::deterministic()
        } else {
            MwcRng::from_wall_time()
        };

        log::info!("world created (deterministic_random={})", config.deterministic_random);

        Ok(Arc::new(World {
            config,
            hooks,
            ev,
            nodes: ReentrantMutex::new(RefCell::new(NodeRegistry::new())),
            events: ReentrantMutex::new(RefCell::new(EventsState {
                registry,
                started: false,
                paused: false,
                step: false,
            })),
            schedules: ReentrantMutex::new(RefCell::new(SchedulerState::new())),
            rng: Mutex::new(rng),
            doorbell: Mutex::new(()),
            condvar: Condvar::new(),
            events_processed: AtomicU64::new(0),
            buckets_drained: AtomicU64::new(0),
            worker: Mutex::new(None),
        }))
    }

    /// Tear down the world. Stops the worker if running. Because `World`
    /// lives behind `Arc`, this only has real
    /// effect once every other clone is also gone — callers intending a hard
    /// stop regardless of other handles should call [`Self::stop`] instead.
    pub fn destroy(self: Arc<Self>) {
        self.stop();
        drop(self);
    }

    // ---- control surface ----------------------------------------------------

    /// Spawn the worker thread. Idempotent: a second call while already
    /// started logs and does nothing.
    pub fn start(self: &Arc<Self>, paused: bool) {
        let already_started = self.events_state(|s| {
            if s.started {
                true
            } else {
                s.started = true;
                s.paused = paused;
                s.step = false;
                false
            }
        });
        if already_started {
            log::warn!("world already started; ignoring start()");
            return;
        }
        let weak = Arc::downgrade(self);
        let handle = thread::Builder::new()
            .name("rpl-sim-worker".into())
            .spawn(move || Self::worker_loop(weak))
            .expect("failed to spawn simulation worker thread");
        *self.worker.lock().unwrap() = Some(handle);
        log::info!("world started (paused={paused})");
    }

    /// Signal the worker to stop and join it. Safe to call when not started.
    pub fn stop(&self) {
        self.events_state(|s| s.started = false);
        self.ring_doorbell();
        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.join();
        }
        log::info!("world stopped");
    }

    /// Halt bucket draining; scheduling/node mutation remain available.
    pub fn pause(&self) {
        self.events_state(|s| s.paused = true);
        self.ring_doorbell();
    }

    /// Resume bucket draining after a pause.
    pub fn resume(&self) {
        self.events_state(|s| s.paused = false);
        self.ring_doorbell();
    }

    /// Drain exactly one bucket, then re-pause. A no-op if the world isn't
    /// paused.
    pub fn step(&self) {
        self.events_state(|s| {
            s.paused = true;
            s.step = true;
        });
        self.ring_doorbell();
    }

    pub fn is_started(&self) -> bool {
        self.events_state(|s| s.started)
    }

    pub fn is_paused(&self) -> bool {
        self.events_state(|s| s.paused)
    }

    pub fn now(&self) -> SimTime {
        let guard = self.schedules.lock();
        guard.borrow().now()
    }

    /// Render `now()` as `HH:MM:SS[.mmm]`.
    pub fn sim_time_to_string(&self, with_millis: bool) -> String {
        clock::sim_time_to_string(self.now(), self.config.simulation_second, with_millis)
    }

    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    /// Draw a uniform float in `[0, 1)` from the world's seeded PRNG.
    /// Exposed so a host building scenarios on top of this engine doesn't
    /// need its own RNG to stay within the same reproducibility guarantee
    /// under `deterministic_random`.
    pub fn rng_next_f64(&self) -> f64 {
        self.rng.lock().unwrap().next_f64()
    }

    // ---- node lifecycle & registry ------------------------------------------

    /// Add a node to the registry, optionally auto-waking it per
    /// `auto_wake_nodes`. Fails if name/MAC/IP collides with an existing
    /// alive node.
    pub fn add_node(
        &self,
        name: impl Into<String>,
        mac: MacAddr,
        ip: IpAddr,
        position: (f64, f64),
        tx_power: f32,
    ) -> Result<NodeId, RegistryError> {
        let id = {
            let guard = self.nodes.lock();
            guard.borrow_mut().allocate_id()
        };
        let node = Node::new(id, name, mac, ip, position, tx_power);
        let node_name = node.name.clone();
        {
            let guard = self.nodes.lock();
            guard.borrow_mut().add(node)?;
        }
        log::info!("node '{node_name}' added ({id:?})");
        if self.config.auto_wake_nodes {
            self.wake_node(id);
        }
        Ok(id)
    }

    /// Remove a node from the registry outright.
    /// Distinct from [`Self::kill_node`]: this doesn't cancel pending events
    /// or scrub routes — callers that want a clean shutdown call
    /// [`Self::kill_node`] first.
    pub fn remove_node(&self, id: NodeId) -> Result<(), RegistryError> {
        let guard = self.nodes.lock();
        guard.borrow_mut().remove(id)?;
        Ok(())
    }

    pub fn find_node(&self, id: NodeId) -> Option<Arc<Node>> {
        let guard = self.nodes.lock();
        guard.borrow().find(id)
    }

    pub fn find_node_by_name(&self, name: &str) -> Option<Arc<Node>> {
        let guard = self.nodes.lock();
        guard.borrow().find_by_name(name)
    }

    pub fn find_node_by_mac(&self, mac: &MacAddr) -> Option<Arc<Node>> {
        let guard = self.nodes.lock();
        guard.borrow().find_by_mac(mac)
    }

    pub fn find_node_by_ip(&self, ip: &IpAddr) -> Option<Arc<Node>> {
        let guard = self.nodes.lock();
        guard.borrow().find_by_ip(ip)
    }

    pub fn list_nodes(&self) -> Vec<Arc<Node>> {
        let guard = self.nodes.lock();
        guard.borrow().list_snapshot()
    }

    /// Schedule `event_node_wake` for `id` at `now`.
    pub fn wake_node(&self, id: NodeId) {
        self.schedule_event(id, self.ev.node_wake, Payload::None, Payload::None, 0);
    }

    /// Schedule `event_node_kill` for `id` at `now`.
    pub fn kill_node(&self, id: NodeId) {
        self.schedule_event(id, self.ev.node_kill, Payload::None, Payload::None, 0);
    }

    // ---- low-level timer access ----------------------------------------------

    pub fn schedule(
        &self,
        node: NodeId,
        event_id: EventId,
        payload1: Payload,
        payload2: Payload,
        delay: SimTime,
    ) -> SimTime {
        self.schedule_event(node, event_id, payload1, payload2, delay)
    }

    /// Register a new node event a host (e.g. an out-of-scope RPL layer)
    /// wants to `schedule`/`cancel` against directly.
    /// Dispatched entries for the returned id land in [`Hooks::node_event`];
    /// the six ids `World::create` registers for its own built-in timers are
    /// never exposed this way, so a host can't collide with them by name.
    pub fn register_node_event(&self, name: &str) -> EventId {
        self.events_state(|s| s.registry.register(name, EventCategory::Node))
    }

    /// Cancel matching pending events. Refuses an all-wildcard filter, since
    /// at least one field must be concrete.
    pub fn cancel(&self, filter: CancelFilter) -> usize {
        if !filter.is_concrete() {
            log::error!("cancel() called with an all-wildcard filter; refusing");
            return 0;
        }
        let guard = self.schedules.lock();
        guard.borrow_mut().cancel(&filter)
    }

    pub fn pending_event_count(&self) -> usize {
        let guard = self.schedules.lock();
        guard.borrow().pending_count()
    }

    // ---- medium inspection ---------------------------------------------------

    pub fn get_link_quality(&self, a: NodeId, b: NodeId) -> Option<f32> {
        let node_a = self.find_node(a)?;
        let node_b = self.find_node(b)?;
        let (pos_a, power_a, _) = node_snapshot(&node_a);
        let (pos_b, _, _) = node_snapshot(&node_b);
        Some(medium::link_quality(pos_a, power_a, pos_b, self.config.no_link_dist_thresh))
    }

    // ---- send path -------------------------------------------------------

    /// Submit an IP PDU for routing. Builds the
    /// PHY/MAC/IP/ICMP chain via `pdu::originate_send`, then hands any
    /// resulting frame to the medium for scheduling. Draining of the node's
    /// IP send queue's busy/idle state happens inline:
    /// since nothing here models an in-progress transmission blocking the
    /// node for a duration, a node is busy only for the span of one
    /// `send`/drain call.
    pub fn send(&self, src: NodeId, dst_ip: IpAddr, next_header: u8, sdu: IpSdu) -> SendOutcome {
        let Some(src_node) = self.find_node(src) else {
            log::error!("send: unknown source node {src:?}");
            return SendOutcome::Dropped(DropReason::UnexpectedFormat);
        };
        let now = self.now();
        let outcome =
            pdu::originate_send(&src_node, self.hooks.as_ref(), &self.config, now, dst_ip.clone(), next_header, sdu);
        if let SendOutcome::Ready(frame) = &outcome {
            self.schedule_frame(src, &dst_ip, frame.clone());
            pdu::mark_idle(&src_node);
            self.drain_queue(src, &src_node);
        }
        outcome
    }

    fn drain_queue(&self, src: NodeId, src_node: &Node) {
        while let Some((dst_ip, next_outcome)) = pdu::drain_one_queued(src_node, self.hooks.as_ref()) {
            match next_outcome {
                SendOutcome::Ready(frame) => {
                    self.schedule_frame(src, &dst_ip, frame);
                    pdu::mark_idle(src_node);
                }
                SendOutcome::Queued => break,
                SendOutcome::Dropped(_) => {}
            }
        }
    }

    /// Plan recipients for a built frame per the configured transmit mode
    /// and schedule delivery for each.
    fn schedule_frame(&self, src: NodeId, dst_ip: &IpAddr, frame: PhyPdu) {
        let intended = self.find_node_by_ip(dst_ip).map(|n| n.id);
        let all_other_alive = self.alive_node_ids_excluding(src);
        let plan = medium::plan_transmission(self.config.phy_transmit_mode, src, intended, &all_other_alive);
        match self.config.phy_transmit_mode {
            PhyTransmitMode::Unicast => {
                if let Some(delivery) = plan.first() {
                    self.schedule_unicast(src, delivery.recipient, frame);
                } else if let Some(src_node) = self.find_node(src) {
                    src_node.execute_sync(|h| {
                        h.record_drop(DropReason::NoRoute);
                        true
                    });
                }
            }
            PhyTransmitMode::Broadcast => {
                let recipients: Vec<NodeId> = plan.iter().map(|d| d.recipient).collect();
                self.schedule_broadcast(src, frame, &recipients);
            }
        }
    }

    /// Unicast viability is checked now: a non-viable link drops the frame
    /// silently and counts against the sender.
    fn schedule_unicast(&self, src: NodeId, dst: NodeId, frame: PhyPdu) {
        let Some(src_node) = self.find_node(src) else { return };
        let Some(dst_node) = self.find_node(dst) else { return };
        let (src_pos, src_power, src_alive) = node_snapshot(&src_node);
        let (dst_pos, _, dst_alive) = node_snapshot(&dst_node);
        let quality = medium::link_quality(src_pos, src_power, dst_pos, self.config.no_link_dist_thresh);
        if medium::is_viable(quality, self.config.no_link_quality_thresh, src_alive, dst_alive) {
            self.schedule_event(
                dst,
                self.ev.pdu_receive,
                Payload::Frame(Arc::new(frame)),
                Payload::Node(src),
                self.config.transmission_time,
            );
        } else {
            src_node.execute_sync(|h| {
                h.record_drop(DropReason::LinkNotViable);
                true
            });
        }
    }

    /// Broadcast schedules delivery to every other alive node unconditionally;
    /// viability is rechecked at delivery time, not here.
    fn schedule_broadcast(&self, src: NodeId, frame: PhyPdu, recipients: &[NodeId]) {
        let shared = Arc::new(frame);
        for &recipient in recipients {
            self.schedule_event(
                recipient,
                self.ev.pdu_receive,
                Payload::Frame(Arc::clone(&shared)),
                Payload::Node(src),
                self.config.transmission_time,
            );
        }
    }

    fn alive_node_ids_excluding(&self, exclude: NodeId) -> Vec<NodeId> {
        let guard = self.nodes.lock();
        guard
            .borrow()
            .list_snapshot()
            .into_iter()
            .filter(|n| n.id != exclude && node_snapshot(n).2)
            .map(|n| n.id)
            .collect()
    }

    // ---- internals ----------------------------------------------------------

    fn events_state<R>(&self, f: impl FnOnce(&mut EventsState) -> R) -> R {
        let guard = self.events.lock();
        let mut st = guard.borrow_mut();
        f(&mut st)
    }

    fn ring_doorbell(&self) {
        let _guard = self.doorbell.lock().unwrap();
        self.condvar.notify_all();
    }

    fn schedule_event(&self, node: NodeId, event_id: EventId, p1: Payload, p2: Payload, delay: SimTime) -> SimTime {
        let fire_time = {
            let guard = self.schedules.lock();
            guard.borrow_mut().schedule(node, event_id, p1, p2, delay)
        };
        self.ring_doorbell();
        fire_time
    }

    pub fn events_processed(&self) -> u64 {
        self.events_processed.load(Ordering::SeqCst)
    }

    pub fn buckets_drained(&self) -> u64 {
        self.buckets_drained.load(Ordering::SeqCst)
    }

    /// Poll `predicate` until it's true or `timeout` elapses. A convenience
    /// for hosts/tests driving a world whose worker runs on another thread;
    /// not part of the control surface contract itself.
    pub fn wait_until(&self, mut predicate: impl FnMut() -> bool, timeout: Duration) -> bool {
        let start = Instant::now();
        loop {
            if predicate() {
                return true;
            }
            if start.elapsed() >= timeout {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
    }

    // ---- worker loop ---------------------------------------------------------

    fn worker_loop(weak: Weak<World>) {
        const MAX_WAIT_SLICE: Duration = Duration::from_millis(1);
        loop {
            let Some(world) = weak.upgrade() else { return };

            if !world.events_state(|s| s.started) {
                return;
            }
            let (paused, step) = world.events_state(|s| (s.paused, s.step));
            if paused && !step {
                let guard = world.doorbell.lock().unwrap();
                let _ = world.condvar.wait_timeout(guard, MAX_WAIT_SLICE).unwrap();
                continue;
            }

            let next_fire = {
                let guard = world.schedules.lock();
                guard.borrow().next_fire_time()
            };
            let Some(fire_time) = next_fire else {
                let guard = world.doorbell.lock().unwrap();
                let _ = world.condvar.wait_timeout(guard, MAX_WAIT_SLICE).unwrap();
                continue;
            };

            if world.config.real_time {
                let abandoned = world.pace_until(fire_time, MAX_WAIT_SLICE);
                if abandoned {
                    continue;
                }
            }

            let drained = {
                let guard = world.schedules.lock();
                guard.borrow_mut().drain_next_bucket()
            };
            let Some((_, bucket)) = drained else { continue };
            for entry in bucket {
                world.dispatch(entry);
                world.events_processed.fetch_add(1, Ordering::SeqCst);
            }
            world.buckets_drained.fetch_add(1, Ordering::SeqCst);
            if step {
                world.events_state(|s| s.step = false);
            }
            world.ring_doorbell();
        }
    }

    /// Sleep in bounded slices until `fire_time` (scaled by
    /// `simulation_second`) arrives — real-time pacing mode.
    /// Returns `true` if pause/stop interrupted the wait before the target
    /// was reached, in which case the caller should re-evaluate rather than
    /// drain.
    fn pace_until(&self, fire_time: SimTime, max_slice: Duration) -> bool {
        let now = self.now();
        let delta = fire_time.saturating_sub(now);
        let wall_ns =
            (delta as u128 * 1_000_000_000u128 / self.config.simulation_second.max(1) as u128).min(u64::MAX as u128)
                as u64;
        let target = Instant::now() + Duration::from_nanos(wall_ns);
        loop {
            if !self.events_state(|s| s.started) {
                return true;
            }
            let (paused, step) = self.events_state(|s| (s.paused, s.step));
            if paused && !step {
                return true;
            }
            let remaining = target.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            let guard = self.doorbell.lock().unwrap();
            let _ = self.condvar.wait_timeout(guard, remaining.min(max_slice)).unwrap();
        }
    }

    fn dispatch(&self, entry: crate::scheduler::ScheduledEvent) {
        let category = self.events_state(|s| s.registry.category(entry.event_id));
        match category {
            None => log::error!(
                "unknown event id {:?} targeting node {:?} (programmer error)",
                entry.event_id,
                entry.node
            ),
            Some(EventCategory::System) => self.dispatch_system(entry),
            Some(EventCategory::Node) => self.dispatch_node(entry),
        }
    }

    fn dispatch_system(&self, entry: crate::scheduler::ScheduledEvent) {
        if entry.event_id != self.ev.pdu_receive {
            log::error!("unhandled system event id {:?} (programmer error)", entry.event_id);
            return;
        }
        let Payload::Frame(frame) = entry.payload1 else {
            log::error!("sys_event_pdu_receive fired without a frame payload");
            return;
        };
        let Payload::Node(src) = entry.payload2 else {
            log::error!("sys_event_pdu_receive fired without a source payload");
            return;
        };
        let Some(recipient) = self.find_node(entry.node) else {
            log::debug!("pdu for {:?} dropped: node no longer in registry", entry.node);
            return;
        };
        if !node_snapshot(&recipient).2 {
            log::debug!("pdu for {:?} dropped: node not alive", entry.node);
            return;
        }
        let Some(src_node) = self.find_node(src) else {
            recipient.execute_sync(|h| {
                h.record_drop(DropReason::LinkNotViable);
                true
            });
            return;
        };
        let (src_pos, src_power, src_alive) = node_snapshot(&src_node);
        let (dst_pos, _, dst_alive) = node_snapshot(&recipient);
        let quality = medium::link_quality(src_pos, src_power, dst_pos, self.config.no_link_dist_thresh);
        if !medium::is_viable(quality, self.config.no_link_quality_thresh, src_alive, dst_alive) {
            recipient.execute_sync(|h| {
                h.record_drop(DropReason::LinkNotViable);
                true
            });
            return;
        }

        let outcome = pdu::receive(
            &recipient,
            self.hooks.as_ref(),
            &|next_hop| self.find_node(next_hop).map(|n| n.mac.clone()),
            (*frame).clone(),
        );
        match outcome {
            ReceiveOutcome::Delivered | ReceiveOutcome::Dropped(_) => {}
            ReceiveOutcome::Forward { next_hop, frame } => {
                self.schedule_unicast(entry.node, next_hop, frame);
            }
        }
    }

    fn dispatch_node(&self, entry: crate::scheduler::ScheduledEvent) {
        let Some(node) = self.find_node(entry.node) else {
            log::warn!("event {:?} for unknown node {:?} (likely removed)", entry.event_id, entry.node);
            return;
        };
        if entry.event_id == self.ev.node_wake {
            self.handle_wake(&node);
        } else if entry.event_id == self.ev.node_kill {
            self.handle_kill(entry.node);
        } else if entry.event_id == self.ev.pdu_send_timeout_check {
            let now = self.now();
            pdu::expire_queued_sends(&node, now, self.config.ip_pdu_timeout);
            self.schedule_event(
                node.id,
                self.ev.pdu_send_timeout_check,
                Payload::None,
                Payload::None,
                self.config.ip_pdu_timeout,
            );
        } else if entry.event_id == self.ev.neighbor_cache_timeout_check {
            let now = self.now();
            let timeout = self.config.ip_neighbor_timeout;
            node.execute_sync(|h| {
                h.with_ip_mut(|ip| {
                    ip.neighbors.expire(now, timeout);
                });
                true
            });
            self.schedule_event(
                node.id,
                self.ev.neighbor_cache_timeout_check,
                Payload::None,
                Payload::None,
                self.config.ip_neighbor_timeout,
            );
        } else if entry.event_id == self.ev.rpl_dio_interval {
            // No DIO logic runs here; this just keeps the periodic timer
            // alive so a host-provided RPL layer has a live cadence to build
            // on once it starts overriding the relevant `Hooks` methods.
            self.schedule_event(
                node.id,
                self.ev.rpl_dio_interval,
                Payload::None,
                Payload::None,
                self.config.measure_pdu_timeout,
            );
        } else {
            // Not one of the six built-in ids, but `dispatch` already
            // confirmed it's registered (as `EventCategory::Node`) or this
            // call wouldn't have been reached — it must be a host's own
            // event from `register_node_event`. Route it to the catch-all
            // hook rather than treating it as a programmer error.
            let ok = node.execute_sync(|h| self.hooks.node_event(h, entry.event_id, &entry.payload1, &entry.payload2));
            if !ok {
                node.execute_sync(|h| h.record_drop(DropReason::HookRejected));
            }
        }
    }

    fn handle_wake(&self, node: &Node) {
        node.execute_sync(|h| {
            h.set_alive(true);
            true
        });
        log::info!("node '{}' woke", node.name);
        self.schedule_event(
            node.id,
            self.ev.pdu_send_timeout_check,
            Payload::None,
            Payload::None,
            self.config.ip_pdu_timeout,
        );
        self.schedule_event(
            node.id,
            self.ev.neighbor_cache_timeout_check,
            Payload::None,
            Payload::None,
            self.config.ip_neighbor_timeout,
        );
        self.schedule_event(
            node.id,
            self.ev.rpl_dio_interval,
            Payload::None,
            Payload::None,
            self.config.measure_pdu_timeout,
        );
    }

    /// Cancel pending events and scrub routes/neighbor entries referencing
    /// `id` before marking it dead.
    /// Holds `nodes` for the whole operation, nesting `schedules` inside it,
    /// respecting the `nodes → events → schedules` acquisition order.
    fn handle_kill(&self, id: NodeId) {
        let nodes_guard = self.nodes.lock();
        let registry = nodes_guard.borrow();
        for other in registry.list_snapshot() {
            other.execute_sync(|h| {
                h.with_ip_mut(|ip| {
                    ip.routes.remove_routes_via(id);
                    ip.neighbors.remove(id);
                });
                true
            });
        }
        {
            let sched_guard = self.schedules.lock();
            sched_guard.borrow_mut().cancel(&CancelFilter { node: Some(id), ..Default::default() });
        }
        if let Some(node) = registry.find(id) {
            node.execute_sync(|h| {
                h.set_alive(false);
                true
            });
            log::info!("node '{}' killed", node.name);
        }
    }
}

fn node_snapshot(node: &Node) -> ((f64, f64), f32, bool) {
    let mut position = (0.0, 0.0);
    let mut tx_power = 0.0f32;
    let mut alive = false;
    node.execute_sync(|h| {
        position = h.position();
        tx_power = h.tx_power();
        alive = h.is_alive();
        true
    });
    (position, tx_power, alive)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{IpAddr, MacAddr};
    use crate::pdu::{IcmpPdu, NoopHooks, RplMessage};
    use std::time::Duration;

    fn test_config() -> WorldConfig {
        WorldConfig {
            auto_wake_nodes: true,
            deterministic_random: true,
            real_time: false,
            width: 100.0,
            height: 100.0,
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

    fn dis_sdu() -> IpSdu {
        IpSdu::Icmp(IcmpPdu::for_rpl(RplMessage::Dis))
    }

    fn total_drops_of(node: &Node) -> u64 {
        let mut total = 0;
        node.execute_sync(|h| {
            total = h.total_drops();
            true
        });
        total
    }

    fn drop_count_of(node: &Node, reason: DropReason) -> u64 {
        let mut count = 0;
        node.execute_sync(|h| {
            count = h.drop_count(reason);
            true
        });
        count
    }

    #[test]
    fn two_node_unicast_hello_delivers_after_transmission_time() {
        let world = World::create(test_config(), Box::new(NoopHooks)).unwrap();
        let a = world
            .add_node("a", MacAddr("aaaaaaaaaaaa".into()), IpAddr("fe80::a".into()), (0.0, 0.0), 1.0)
            .unwrap();
        let b = world
            .add_node("b", MacAddr("bbbbbbbbbbbb".into()), IpAddr("fe80::b".into()), (10.0, 0.0), 1.0)
            .unwrap();
        world.start(false);
        let b_node = world.find_node(b).unwrap();
        assert!(world.wait_until(|| b_node.execute_sync(|h| h.is_alive()), Duration::from_secs(1)));

        let outcome = world.send(a, IpAddr("fe80::b".into()), pdu::NEXT_HEADER_ICMP, dis_sdu());
        assert!(matches!(outcome, SendOutcome::Ready(_)));

        let transmission_time = world.config().transmission_time;
        assert!(world.wait_until(|| world.now() >= transmission_time, Duration::from_secs(1)));
        assert_eq!(total_drops_of(&b_node), 0);
        world.stop();
    }

    #[test]
    fn out_of_range_unicast_is_dropped_at_send_time() {
        let world = World::create(test_config(), Box::new(NoopHooks)).unwrap();
        let a = world
            .add_node("a", MacAddr("aaaaaaaaaaaa".into()), IpAddr("fe80::a".into()), (0.0, 0.0), 1.0)
            .unwrap();
        let _b = world
            .add_node("b", MacAddr("bbbbbbbbbbbb".into()), IpAddr("fe80::b".into()), (100.0, 0.0), 1.0)
            .unwrap();
        world.start(false);
        let a_node = world.find_node(a).unwrap();
        assert!(world.wait_until(|| a_node.execute_sync(|h| h.is_alive()), Duration::from_secs(1)));

        world.send(a, IpAddr("fe80::b".into()), pdu::NEXT_HEADER_ICMP, dis_sdu());
        assert!(world.wait_until(
            || drop_count_of(&a_node, DropReason::LinkNotViable) >= 1,
            Duration::from_secs(1)
        ));
        world.stop();
    }

    #[test]
    fn pause_then_step_drains_exactly_one_bucket() {
        let world = World::create(test_config(), Box::new(NoopHooks)).unwrap();
        let a = world
            .add_node("a", MacAddr("aaaaaaaaaaaa".into()), IpAddr("fe80::a".into()), (0.0, 0.0), 1.0)
            .unwrap();
        world.start(true);
        assert!(world.is_paused());
        let wake_id = world.ev.node_wake;
        world.schedule(a, wake_id, Payload::None, Payload::None, 1);
        world.schedule(a, wake_id, Payload::None, Payload::None, 2);

        let before = world.buckets_drained();
        world.step();
        assert!(world.wait_until(|| world.buckets_drained() == before + 1, Duration::from_secs(1)));
        assert!(world.is_paused());
        assert_eq!(world.now(), 1);

        world.step();
        assert!(world.wait_until(|| world.buckets_drained() == before + 2, Duration::from_secs(1)));
        assert_eq!(world.now(), 2);
        world.stop();
    }

    #[test]
    fn kill_removes_routes_referencing_the_dead_node() {
        let world = World::create(test_config(), Box::new(NoopHooks)).unwrap();
        let a = world
            .add_node("a", MacAddr("aaaaaaaaaaaa".into()), IpAddr("fe80::a".into()), (0.0, 0.0), 1.0)
            .unwrap();
        let b = world
            .add_node("b", MacAddr("bbbbbbbbbbbb".into()), IpAddr("fe80::b".into()), (10.0, 0.0), 1.0)
            .unwrap();
        world.start(false);
        let b_node = world.find_node(b).unwrap();
        assert!(world.wait_until(|| b_node.execute_sync(|h| h.is_alive()), Duration::from_secs(1)));

        pdu::install_route(
            &b_node,
            IpAddr("fe80::c".into()),
            64,
            a,
            crate::route::RouteType::Manual,
            world.now(),
        );
        assert!(b_node.execute_sync(|h| h.with_ip(|ip| ip.routes.len() == 1)));

        world.kill_node(a);
        assert!(world.wait_until(|| b_node.execute_sync(|h| h.with_ip(|ip| ip.routes.is_empty())), Duration::from_secs(1)));
        world.stop();
    }
}
