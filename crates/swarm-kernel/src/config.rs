//! Configuration types for the kernel.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::sensor::SensorModel;

/// How an agent learns about its peers' claims.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Coordination {
    /// No peer communication: every agent picks its nearest target
    #[default]
    None,
    /// Claims are advertised over a best-effort broadcast medium
    #[serde(alias = "udp")]
    Broadcast,
}

impl Coordination {
    pub fn is_broadcast(&self) -> bool {
        matches!(self, Coordination::Broadcast)
    }
}

impl FromStr for Coordination {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Coordination::None),
            "broadcast" | "udp" => Ok(Coordination::Broadcast),
            other => anyhow::bail!("unknown coordination mode {other:?} (expected none|broadcast)"),
        }
    }
}

/// Loiter circle and cruise speed of a vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoiterConfig {
    /// Radius of the loiter circle around a pursued target
    pub radius: f64,
    /// Cruise speed in distance units per second
    pub speed: f64,
}

impl Default for LoiterConfig {
    fn default() -> Self {
        Self {
            radius: 50.0,
            speed: 10.0,
        }
    }
}

/// Top-level kernel configuration.
///
/// Loaded as part of the agent configuration from TOML/JSON at runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Tick interval in milliseconds
    pub tick_interval_ms: u64,

    /// Coverage zone and pursuit range
    pub sensor: SensorModel,

    /// Loiter geometry
    pub loiter: LoiterConfig,

    /// Peer coordination mode
    pub coordination: Coordination,

    /// Copies of each claim advertisement sent per tick
    pub redundancy: usize,

    /// Peers silent for longer than this are forgotten (0 disables expiry)
    pub peer_timeout_ms: u64,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            sensor: SensorModel::default(),
            loiter: LoiterConfig::default(),
            coordination: Coordination::None,
            redundancy: 3,
            peer_timeout_ms: 10_000,
        }
    }
}

impl KernelConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn peer_timeout(&self) -> Option<Duration> {
        (self.peer_timeout_ms > 0).then(|| Duration::from_millis(self.peer_timeout_ms))
    }
}
