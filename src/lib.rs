//! Discrete-event simulation engine for an IPv6 low-power routing protocol
//! over a simplified wireless stack.
//!
//! A host picks a [`config::WorldConfig`], builds a [`World`](world::World)
//! with [`world::World::create`], adds nodes, and drives events through the
//! control surface (`start`/`pause`/`step`/`stop`). The layered PDU pipeline
//! (PHY → MAC → IP → ICMP → RPL) is exposed through [`pdu::Hooks`] so
//! protocol logic — RPL DIO/DAO exchange, route computation — plugs in
//! without this crate needing to know about it.

pub mod clock;
pub mod config;
pub mod error;
pub mod medium;
pub mod node;
pub mod nodes;
pub mod pdu;
pub mod registry;
pub mod route;
pub mod scheduler;
pub mod world;

/// Common imports for a host embedding this engine.
pub mod prelude {
    pub use crate::clock::SimTime;
    pub use crate::config::{PhyTransmitMode, WorldConfig};
    pub use crate::error::{DropReason, SimError};
    pub use crate::node::{IpAddr, MacAddr, NodeId};
    pub use crate::pdu::{Hooks, IcmpPdu, IpSdu, NoopHooks, RplMessage};
    pub use crate::registry::EventId;
    pub use crate::scheduler::{CancelFilter, Payload};
    pub use crate::world::World;
}

pub use world::World;
