//! Motion unit: owns a vehicle's position, claim and waypoints, and moves
//! the vehicle toward its waypoint at a fixed interval.
//!
//! The planner drives it through [`MotionInterface`], either in-process or
//! over the motion-command RPC.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info, trace, warn};

use swarm_kernel::marker::{MarkerKind, NEUTRAL, target_color};
use swarm_kernel::{AgentId, LoiterConfig, Point, TargetId, candidate_targets, move_vehicle};

use crate::world::{PositionService, target_positions};

/// Commands a planner issues to a vehicle.
#[async_trait]
pub trait MotionInterface: Send + Sync {
    async fn position(&self) -> Result<Point>;
    async fn set_position(&self, position: Point) -> Result<()>;

    async fn claim(&self) -> Result<Option<TargetId>>;
    /// Record the committed claim. Returns the vehicle's new marker color.
    async fn set_claim(&self, claim: Option<TargetId>) -> Result<String>;

    async fn waypoint(&self) -> Result<Point>;
    async fn set_waypoint(&self, waypoint: Point) -> Result<()>;

    async fn original_waypoint(&self) -> Result<Point>;
    async fn set_original_waypoint(&self, waypoint: Point) -> Result<()>;

    /// Known targets inside the coverage zone and pursuit range, in roster
    /// order.
    async fn candidate_targets(
        &self,
        coverage_zone_x: f64,
        pursuit_range: f64,
    ) -> Result<Vec<TargetId>>;
}

/// Mutable state of one vehicle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VehicleState {
    pub position: Point,
    pub claim: Option<TargetId>,
    /// Point currently pursued
    pub waypoint: Point,
    /// Patrol point the vehicle returns to when redeployed
    pub original_waypoint: Point,
}

/// In-process motion unit.
///
/// The state lock is only held for field reads and writes, never across an
/// await.
pub struct MotionUnit {
    id: AgentId,
    state: RwLock<VehicleState>,
    world: Arc<dyn PositionService>,
    targets: Vec<TargetId>,
    loiter: LoiterConfig,
}

impl std::fmt::Debug for MotionUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MotionUnit")
            .field("id", &self.id)
            .field("state", &*self.read())
            .field("targets", &self.targets)
            .field("loiter", &self.loiter)
            .finish()
    }
}

impl MotionUnit {
    /// Create a vehicle at `start` that patrols `waypoint`.
    pub fn new(
        id: AgentId,
        start: Point,
        waypoint: Point,
        world: Arc<dyn PositionService>,
        targets: Vec<TargetId>,
        loiter: LoiterConfig,
    ) -> Self {
        Self {
            id,
            state: RwLock::new(VehicleState {
                position: start,
                claim: None,
                waypoint,
                original_waypoint: waypoint,
            }),
            world,
            targets,
            loiter,
        }
    }

    pub fn state(&self) -> VehicleState {
        *self.read()
    }

    fn read(&self) -> RwLockReadGuard<'_, VehicleState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, VehicleState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Marker color for a claim: the target's color for known targets,
    /// neutral otherwise.
    pub fn claim_color(&self, claim: Option<TargetId>) -> &'static str {
        match claim {
            Some(target) if self.targets.contains(&target) => target_color(target),
            _ => NEUTRAL,
        }
    }

    /// Paint the vehicle neutral and every known target in its own color.
    pub async fn init_markers(&self) -> Result<()> {
        self.world
            .set_marker(self.id, NEUTRAL, MarkerKind::Vehicle)
            .await?;
        for &target in &self.targets {
            self.world
                .set_marker(target, target_color(target), MarkerKind::Target)
                .await?;
        }
        Ok(())
    }

    /// Move one step of `dt` seconds toward the waypoint and publish the new
    /// position with the claim's marker.
    pub async fn advance(&self, dt: f64) -> Result<Point> {
        let state = self.state();
        let next = move_vehicle(
            state.position,
            state.waypoint,
            self.loiter.radius,
            self.loiter.speed,
            dt,
        );
        trace!(agent = self.id, from = %state.position, to = %next, waypoint = %state.waypoint, "Motion step");

        self.world.set_position(self.id, next).await?;
        self.world
            .set_marker(self.id, self.claim_color(state.claim), MarkerKind::Vehicle)
            .await?;
        self.write().position = next;
        Ok(next)
    }

    /// Step the vehicle forever at `interval`. A failed step is logged and
    /// retried on the next one.
    pub async fn run(self: Arc<Self>, interval: Duration) {
        let dt = interval.as_secs_f64();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        info!(agent = self.id, interval_ms = interval.as_millis() as u64, "Motion loop started");
        loop {
            ticker.tick().await;
            if let Err(e) = self.advance(dt).await {
                warn!(agent = self.id, error = %e, "Motion step skipped");
            }
        }
    }
}

#[async_trait]
impl MotionInterface for MotionUnit {
    async fn position(&self) -> Result<Point> {
        Ok(self.read().position)
    }

    async fn set_position(&self, position: Point) -> Result<()> {
        self.write().position = position;
        Ok(())
    }

    async fn claim(&self) -> Result<Option<TargetId>> {
        Ok(self.read().claim)
    }

    async fn set_claim(&self, claim: Option<TargetId>) -> Result<String> {
        self.write().claim = claim;
        let color = self.claim_color(claim);
        debug!(agent = self.id, claim = ?claim, color = color, "Claim recorded");
        self.world
            .set_marker(self.id, color, MarkerKind::Vehicle)
            .await?;
        Ok(color.to_string())
    }

    async fn waypoint(&self) -> Result<Point> {
        Ok(self.read().waypoint)
    }

    async fn set_waypoint(&self, waypoint: Point) -> Result<()> {
        self.write().waypoint = waypoint;
        Ok(())
    }

    async fn original_waypoint(&self) -> Result<Point> {
        Ok(self.read().original_waypoint)
    }

    async fn set_original_waypoint(&self, waypoint: Point) -> Result<()> {
        self.write().original_waypoint = waypoint;
        Ok(())
    }

    async fn candidate_targets(
        &self,
        coverage_zone_x: f64,
        pursuit_range: f64,
    ) -> Result<Vec<TargetId>> {
        let position = self.read().position;
        let targets = target_positions(self.world.as_ref(), &self.targets).await?;
        Ok(candidate_targets(position, targets, coverage_zone_x, pursuit_range).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::SimWorld;

    fn unit_with_world() -> (Arc<SimWorld>, MotionUnit) {
        let world = Arc::new(SimWorld::new());
        world.insert(1, Point::new(0.0, 0.0));
        world.insert(11, Point::new(100.0, 0.0));
        world.insert(12, Point::new(1300.0, 0.0));
        world.insert(13, Point::new(0.0, 700.0));
        world.insert(15, Point::new(10.0, 0.0));
        let unit = MotionUnit::new(
            1,
            Point::new(0.0, 0.0),
            Point::new(0.0, 300.0),
            world.clone(),
            vec![11, 12, 13],
            LoiterConfig::default(),
        );
        (world, unit)
    }

    #[tokio::test]
    async fn test_advance_moves_toward_waypoint_and_publishes() {
        let (world, unit) = unit_with_world();
        let next = unit.advance(1.0).await.unwrap();
        assert!(next.distance(&Point::new(0.0, 10.0)) < 1e-9);
        assert_eq!(world.get(1), Some(next));
        assert_eq!(unit.position().await.unwrap(), next);
        assert_eq!(world.marker(1).unwrap().color, NEUTRAL);
    }

    #[tokio::test]
    async fn test_set_claim_returns_color() {
        let (world, unit) = unit_with_world();
        assert_eq!(unit.set_claim(Some(13)).await.unwrap(), "red");
        assert_eq!(unit.claim().await.unwrap(), Some(13));
        assert_eq!(world.marker(1).unwrap().color, "red");

        // Node 15 exists but is not a known target.
        assert_eq!(unit.set_claim(Some(15)).await.unwrap(), NEUTRAL);
        assert_eq!(unit.set_claim(None).await.unwrap(), NEUTRAL);
    }

    #[tokio::test]
    async fn test_waypoints() {
        let (_world, unit) = unit_with_world();
        unit.set_waypoint(Point::new(5.0, 5.0)).await.unwrap();
        assert_eq!(unit.waypoint().await.unwrap(), Point::new(5.0, 5.0));
        assert_eq!(unit.original_waypoint().await.unwrap(), Point::new(0.0, 300.0));

        unit.set_original_waypoint(Point::new(1.0, 1.0)).await.unwrap();
        assert_eq!(unit.original_waypoint().await.unwrap(), Point::new(1.0, 1.0));
    }

    #[tokio::test]
    async fn test_candidate_targets_filters_roster() {
        let (_world, unit) = unit_with_world();
        // 12 is outside the coverage zone, 13 out of range, 15 not a target.
        assert_eq!(unit.candidate_targets(1200.0, 600.0).await.unwrap(), vec![11]);
        assert!(unit.candidate_targets(50.0, 600.0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_init_markers() {
        let (world, unit) = unit_with_world();
        unit.init_markers().await.unwrap();
        assert_eq!(world.marker(1).unwrap().kind, MarkerKind::Vehicle);
        assert_eq!(world.marker(11).unwrap().color, "yellow");
        assert_eq!(world.marker(13).unwrap().kind, MarkerKind::Target);
    }
}
