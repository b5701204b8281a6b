//! Error kinds for the simulation engine.
//!
//! Only [`World::create`](crate::world::World::create) (bad configuration)
//! propagates failures through [`SimError`]. Registry failures (duplicate
//! name/MAC/IP, missing node) have their own dedicated
//! [`nodes::RegistryError`](crate::nodes::RegistryError) returned directly by
//! `World::add_node`/`remove_node`; route failures surface as
//! [`DropReason::NoRoute`] since they're absorbed rather than propagated.
//! Every other fallible path inside a running simulation is logged and
//! absorbed — the caller gets a `bool`/[`DropReason`] rather than a
//! `Result`, and the event loop keeps going.

use thiserror::Error;

/// Top-level error returned by configuration entry points.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("configuration error: {0}")]
    Configuration(String),
}

/// Why a PDU was dropped. Kept distinct (rather than a single drop counter)
/// so a host built on this engine can distinguish the cases and log or count
/// them separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DropReason {
    /// No route matched the destination (`RouteError`).
    NoRoute,
    /// The medium determined the link was not viable at delivery time
    /// (`LinkFailure`).
    LinkNotViable,
    /// The per-node IP queue was at `ip_queue_size` (`QueueFull`).
    QueueFull,
    /// A layer saw an unexpected `next_header`/`type` discriminant
    /// (`FormatError`).
    UnexpectedFormat,
    /// A registered hook returned `false` (`HookRejection`).
    HookRejected,
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            DropReason::NoRoute => "no route to destination",
            DropReason::LinkNotViable => "link not viable",
            DropReason::QueueFull => "ip queue full",
            DropReason::UnexpectedFormat => "unexpected layer format",
            DropReason::HookRejected => "hook rejected pdu",
        };
        f.write_str(text)
    }
}
