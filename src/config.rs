//! World configuration.
//!
//! Loadable from TOML: read the file, hand it to `toml::from_str`, and wrap
//! any failure in [`SimError::Configuration`].

use std::path::Path;

use serde::Deserialize;

use crate::error::SimError;

/// Transmit mode used by the PHY layer when handing a frame to the medium.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhyTransmitMode {
    Unicast,
    Broadcast,
}

/// World-wide configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct WorldConfig {
    /// On `add(node)`, automatically schedule `event_node_wake`.
    #[serde(default)]
    pub auto_wake_nodes: bool,
    /// Seed the PRNG with fixed constants instead of wall time.
    #[serde(default)]
    pub deterministic_random: bool,
    /// Simulator time units per wall second (real-time pacing divisor).
    #[serde(default = "default_simulation_second")]
    pub simulation_second: u32,
    /// When true, the worker paces bucket draining to wall-clock time scaled
    /// by `simulation_second`. When false (the default), the worker drains
    /// buckets as fast as it can, which is what test harnesses and other
    /// fully-deterministic runs want; nothing in the control API distinguishes
    /// these, so a host wanting a live, watchable simulation sets this
    /// explicitly.
    #[serde(default)]
    pub real_time: bool,
    /// World bounds, meters.
    pub width: f64,
    pub height: f64,
    /// Distance beyond which a link is never viable, meters.
    pub no_link_dist_thresh: f32,
    /// Minimum link quality for a link to be considered viable.
    pub no_link_quality_thresh: f32,
    /// Delivery delay applied to every scheduled frame, in simulator time units.
    pub transmission_time: u64,
    pub mac_pdu_timeout: u64,
    pub ip_pdu_timeout: u64,
    pub ip_neighbor_timeout: u64,
    pub measure_pdu_timeout: u64,
    /// Bound on the per-node IP send queue (backpressure).
    pub ip_queue_size: usize,
    #[serde(default = "default_transmit_mode")]
    pub phy_transmit_mode: PhyTransmitMode,
}

fn default_simulation_second() -> u32 {
    1000
}

fn default_transmit_mode() -> PhyTransmitMode {
    PhyTransmitMode::Unicast
}

impl WorldConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, SimError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SimError::Configuration(format!("failed to read config file: {e}")))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from an in-memory TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, SimError> {
        let cfg: WorldConfig = toml::from_str(content)
            .map_err(|e| SimError::Configuration(format!("failed to parse config: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Validate field combinations that can't be expressed in `serde`'s
    /// deserialization alone. Called by [`Self::from_toml_str`]; also public
    /// so [`crate::world::World::create`] can validate a config built
    /// programmatically (not loaded from TOML) before committing to it.
    pub fn validate(&self) -> Result<(), SimError> {
        if self.width <= 0.0 || self.height <= 0.0 {
            return Err(SimError::Configuration("width/height must be positive".into()));
        }
        if self.no_link_dist_thresh <= 0.0 {
            return Err(SimError::Configuration("no_link_dist_thresh must be positive".into()));
        }
        if self.ip_queue_size == 0 {
            return Err(SimError::Configuration("ip_queue_size must be non-zero".into()));
        }
        if self.simulation_second == 0 {
            return Err(SimError::Configuration("simulation_second must be non-zero".into()));
        }
        Ok(())
    }
}

impl Default for WorldConfig {
    fn default() -> Self {
        WorldConfig {
            auto_wake_nodes: true,
            deterministic_random: true,
            simulation_second: default_simulation_second(),
            real_time: false,
            width: 1000.0,
            height: 1000.0,
            no_link_dist_thresh: 50.0,
            no_link_quality_thresh: 0.2,
            transmission_time: 10,
            mac_pdu_timeout: 5_000,
            ip_pdu_timeout: 10_000,
            ip_neighbor_timeout: 60_000,
            measure_pdu_timeout: 10_000,
            ip_queue_size: 16,
            phy_transmit_mode: default_transmit_mode(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_document() {
        let doc = r#"
            width = 100.0
            height = 100.0
            no_link_dist_thresh = 30.0
            no_link_quality_thresh = 0.2
            transmission_time = 5
            mac_pdu_timeout = 1000
            ip_pdu_timeout = 1000
            ip_neighbor_timeout = 60000
            measure_pdu_timeout = 1000
            ip_queue_size = 8
        "#;
        let cfg = WorldConfig::from_toml_str(doc).unwrap();
        assert_eq!(cfg.simulation_second, 1000);
        assert!(!cfg.auto_wake_nodes);
        assert_eq!(cfg.phy_transmit_mode, PhyTransmitMode::Unicast);
    }

    #[test]
    fn rejects_zero_queue_size() {
        let doc = r#"
            width = 100.0
            height = 100.0
            no_link_dist_thresh = 30.0
            no_link_quality_thresh = 0.2
            transmission_time = 5
            mac_pdu_timeout = 1000
            ip_pdu_timeout = 1000
            ip_neighbor_timeout = 60000
            measure_pdu_timeout = 1000
            ip_queue_size = 0
        "#;
        assert!(WorldConfig::from_toml_str(doc).is_err());
    }
}
