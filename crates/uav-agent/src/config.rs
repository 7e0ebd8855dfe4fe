//! Agent process configuration.
//!
//! Loaded from a TOML or JSON file (picked by extension); every field has a
//! default so a partial file, or none at all, is enough. Command-line flags
//! are applied on top by the binary.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use swarm_kernel::{AgentId, KernelConfig, Point, TargetId};

/// Patrol waypoints of the default fleet, by agent id.
pub const PATROL_WAYPOINTS: [(AgentId, Point); 8] = [
    (1, Point::new(100.0, 150.0)),
    (2, Point::new(100.0, 300.0)),
    (3, Point::new(100.0, 450.0)),
    (4, Point::new(100.0, 600.0)),
    (6, Point::new(400.0, 150.0)),
    (7, Point::new(400.0, 300.0)),
    (8, Point::new(400.0, 450.0)),
    (9, Point::new(400.0, 600.0)),
];

/// Default target node ids.
pub const DEFAULT_TARGETS: [TargetId; 8] = [11, 12, 13, 14, 16, 17, 18, 19];

/// Patrol waypoint from the patrol table.
pub fn patrol_waypoint(agent: AgentId) -> Option<Point> {
    PATROL_WAYPOINTS
        .iter()
        .find(|(id, _)| *id == agent)
        .map(|(_, point)| *point)
}

/// Multicast advertisement medium.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    /// Multicast group
    pub group: Ipv4Addr,
    /// UDP port shared by every agent
    pub port: u16,
    /// Multicast TTL
    pub ttl: u32,
    /// Capacity of the inbound advertisement queue
    pub queue_capacity: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            group: Ipv4Addr::new(235, 1, 1, 1),
            port: 9100,
            ttl: 64,
            queue_capacity: 1024,
        }
    }
}

/// Motion-command RPC endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// Loopback address the motion unit serves on and the planner dials
    pub bind: SocketAddr,
    /// Pause before the server is re-bound after a transport failure
    pub restart_delay_ms: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 8000)),
            restart_delay_ms: 1000,
        }
    }
}

impl RpcConfig {
    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }
}

/// HTTP position & annotation service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PositionServiceConfig {
    /// Base URL of the service
    pub base_url: String,
    /// Directory holding the marker icons
    pub icon_dir: String,
}

impl Default for PositionServiceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://172.16.0.254:50051".to_string(),
            icon_dir: "/data/uas-core/icons/uav".to_string(),
        }
    }
}

/// Full configuration of one agent process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Node id of this vehicle
    pub agent_id: AgentId,

    /// Start position; defaults to the patrol waypoint
    pub start: Option<Point>,

    /// Patrol waypoint; defaults to the patrol table entry
    pub waypoint: Option<Point>,

    /// Target node ids known to the deployment
    pub targets: Vec<TargetId>,

    /// Motion step interval in milliseconds
    pub motion_interval_ms: u64,

    pub kernel: KernelConfig,
    pub broadcast: BroadcastConfig,
    pub rpc: RpcConfig,
    pub position_service: PositionServiceConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            agent_id: 1,
            start: None,
            waypoint: None,
            targets: DEFAULT_TARGETS.to_vec(),
            motion_interval_ms: 1000,
            kernel: KernelConfig::default(),
            broadcast: BroadcastConfig::default(),
            rpc: RpcConfig::default(),
            position_service: PositionServiceConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Load from a `.toml` or `.json` file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let config = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&text)
                .with_context(|| format!("Failed to parse JSON config {}", path.display()))?,
            Some("toml") | None => toml::from_str(&text)
                .with_context(|| format!("Failed to parse TOML config {}", path.display()))?,
            Some(other) => anyhow::bail!("Unsupported config format: .{}", other),
        };
        Ok(config)
    }

    /// Original patrol waypoint: configured, else the patrol table, else
    /// the start position.
    pub fn patrol_point(&self) -> Point {
        self.waypoint
            .or_else(|| patrol_waypoint(self.agent_id))
            .or(self.start)
            .unwrap_or_default()
    }

    pub fn start_position(&self) -> Point {
        self.start.unwrap_or_else(|| self.patrol_point())
    }

    pub fn motion_interval(&self) -> Duration {
        Duration::from_millis(self.motion_interval_ms)
    }

    /// Reject configurations the agent cannot run with.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.targets.is_empty(), "No targets configured");
        anyhow::ensure!(
            !self.targets.contains(&self.agent_id),
            "Agent id {} is also listed as a target",
            self.agent_id
        );
        anyhow::ensure!(self.kernel.tick_interval_ms > 0, "Tick interval must be positive");
        anyhow::ensure!(self.motion_interval_ms > 0, "Motion interval must be positive");
        anyhow::ensure!(self.kernel.loiter.speed >= 0.0, "Speed must not be negative");
        anyhow::ensure!(
            self.kernel.loiter.radius > 0.0,
            "Loiter radius must be positive, got {}",
            self.kernel.loiter.radius
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarm_kernel::Coordination;

    #[test]
    fn test_defaults() {
        let config = AgentConfig::default();
        assert_eq!(config.targets, vec![11, 12, 13, 14, 16, 17, 18, 19]);
        assert_eq!(config.broadcast.group, Ipv4Addr::new(235, 1, 1, 1));
        assert_eq!(config.broadcast.port, 9100);
        assert_eq!(config.broadcast.ttl, 64);
        assert_eq!(config.rpc.bind.port(), 8000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_patrol_table_fallback() {
        let config = AgentConfig {
            agent_id: 7,
            ..AgentConfig::default()
        };
        assert_eq!(config.patrol_point(), Point::new(400.0, 300.0));
        assert_eq!(config.start_position(), Point::new(400.0, 300.0));

        let config = AgentConfig {
            agent_id: 5,
            start: Some(Point::new(10.0, 20.0)),
            ..AgentConfig::default()
        };
        assert_eq!(config.patrol_point(), Point::new(10.0, 20.0));
    }

    #[test]
    fn test_partial_toml() {
        let config: AgentConfig = toml::from_str(
            r#"
            agent_id = 3
            start = { x = 50.0, y = 60.0 }

            [kernel]
            coordination = "broadcast"

            [kernel.loiter]
            radius = 80.0
            speed = 12.0

            [broadcast]
            port = 9200
            "#,
        )
        .unwrap();

        assert_eq!(config.agent_id, 3);
        assert_eq!(config.start_position(), Point::new(50.0, 60.0));
        assert_eq!(config.patrol_point(), Point::new(100.0, 450.0));
        assert_eq!(config.kernel.coordination, Coordination::Broadcast);
        assert_eq!(config.kernel.loiter.radius, 80.0);
        assert_eq!(config.broadcast.port, 9200);
        assert_eq!(config.broadcast.ttl, 64);
    }

    #[test]
    fn test_validate_rejects_empty_roster() {
        let config = AgentConfig {
            targets: Vec::new(),
            ..AgentConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_non_positive_radius() {
        let mut config = AgentConfig::default();
        config.kernel.loiter.radius = -5.0;
        assert!(config.validate().is_err());

        config.kernel.loiter.radius = 0.0;
        assert!(config.validate().is_err());

        config.kernel.loiter.radius = 0.5;
        assert!(config.validate().is_ok());
    }
}
