//! Per-node routing table and neighbor cache.
//!
//! Addresses are hex strings; a route's destination prefix is pre-expanded
//! into a bit vector once, at install time, so longest-prefix match is a
//! linear scan with cheap per-route comparisons rather than repeated hex
//! parsing.

use std::collections::HashMap;

use crate::clock::SimTime;
use crate::node::{IpAddr, NodeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteType {
    Connected,
    Manual,
    Dao,
    Dio,
}

/// A single routing table entry.
#[derive(Debug, Clone)]
pub struct Route {
    pub destination: IpAddr,
    pub prefix_len: u8,
    pub next_hop: NodeId,
    pub route_type: RouteType,
    pub installation_time: SimTime,
    bits: Vec<bool>,
}

impl Route {
    pub fn new(
        destination: IpAddr,
        prefix_len: u8,
        next_hop: NodeId,
        route_type: RouteType,
        installation_time: SimTime,
    ) -> Self {
        let bits = expand_prefix(&destination.0, prefix_len);
        Route {
            destination,
            prefix_len,
            next_hop,
            route_type,
            installation_time,
            bits,
        }
    }

    fn matches(&self, address_bits: &[bool]) -> bool {
        address_bits.len() >= self.bits.len() && address_bits[..self.bits.len()] == self.bits[..]
    }
}

/// Expand a hex address string into its first `prefix_len` bits, MSB first.
fn expand_prefix(hex: &str, prefix_len: u8) -> Vec<bool> {
    let mut bits = Vec::with_capacity(prefix_len as usize);
    for ch in hex.chars() {
        if bits.len() >= prefix_len as usize {
            break;
        }
        let nibble = ch.to_digit(16).unwrap_or(0);
        for shift in (0..4).rev() {
            if bits.len() >= prefix_len as usize {
                break;
            }
            bits.push((nibble >> shift) & 1 == 1);
        }
    }
    bits
}

fn address_bits(hex: &str) -> Vec<bool> {
    expand_prefix(hex, (hex.len() as u32 * 4) as u8)
}

/// A node's routing table. Invariant: every entry's bit-expanded form is
/// consistent with `(destination, prefix_len)` by construction (`Route::new`
/// is the only constructor).
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    /// Install a route, replacing any existing entry for the same
    /// `(destination, prefix_len, route_type)`.
    pub fn install(&mut self, route: Route) {
        self.routes.retain(|r| {
            !(r.destination == route.destination
                && r.prefix_len == route.prefix_len
                && r.route_type == route.route_type)
        });
        self.routes.push(route);
    }

    /// Longest-prefix match over installed routes, used for forwarding.
    pub fn longest_prefix_match(&self, destination: &IpAddr) -> Option<&Route> {
        let bits = address_bits(&destination.0);
        self.routes
            .iter()
            .filter(|r| r.matches(&bits))
            .max_by_key(|r| r.prefix_len)
    }

    /// Drop every route whose next-hop is `node`, as part of killing it.
    pub fn remove_routes_via(&mut self, node: NodeId) {
        self.routes.retain(|r| r.next_hop != node);
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Route> {
        self.routes.iter()
    }
}

/// `(neighbor, last_packet_time)` entries, expired by `ip_neighbor_timeout`
/// relative to `now`.
#[derive(Debug, Clone, Default)]
pub struct NeighborCache {
    entries: HashMap<NodeId, SimTime>,
}

impl NeighborCache {
    pub fn touch(&mut self, neighbor: NodeId, now: SimTime) {
        self.entries.insert(neighbor, now);
    }

    pub fn remove(&mut self, neighbor: NodeId) {
        self.entries.remove(&neighbor);
    }

    pub fn contains(&self, neighbor: NodeId) -> bool {
        self.entries.contains_key(&neighbor)
    }

    pub fn last_seen(&self, neighbor: NodeId) -> Option<SimTime> {
        self.entries.get(&neighbor).copied()
    }

    /// Remove entries older than `timeout` relative to `now`, returning the
    /// expired neighbor ids.
    pub fn expire(&mut self, now: SimTime, timeout: SimTime) -> Vec<NodeId> {
        let expired: Vec<NodeId> = self
            .entries
            .iter()
            .filter(|(_, &last)| now.saturating_sub(last) > timeout)
            .map(|(&id, _)| id)
            .collect();
        for id in &expired {
            self.entries.remove(id);
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
