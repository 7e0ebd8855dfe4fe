//! In-process multi-agent simulation.
//!
//! N agents and M targets share an in-memory world and a lossy in-process
//! broadcast bus. Each step ticks every planner in agent order, then delivers
//! the advertisements sent during the step, then moves every vehicle by one
//! tick interval, then lets the targets random-walk. Agents ticking in the
//! same step therefore decide on the same information, as they would over a
//! real medium. Stepping is sequential and every random draw comes from the
//! run seed, so a seed reproduces the run exactly.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use rand::prelude::*;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use tracing::{info, trace, warn};

use swarm_kernel::{AgentId, Coordination, KernelConfig, Point, TargetId};

use crate::config::{DEFAULT_TARGETS, PATROL_WAYPOINTS};
use crate::motion::MotionUnit;
use crate::planner::{Planner, TickReport};
use crate::results::{SimulationResult, TickSnapshot};
use crate::transport::{AdvertTransport, LocalBus};
use crate::world::{PositionService, SimWorld};

/// A simulated vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AgentSpec {
    pub id: AgentId,
    pub start: Point,
    pub waypoint: Point,
}

/// A simulated target and where it starts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetSpec {
    pub id: TargetId,
    pub position: Point,
}

/// Simulation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Vehicles; defaults to the patrol fleet
    pub agents: Vec<AgentSpec>,
    /// Targets; placed at random when empty
    pub targets: Vec<TargetSpec>,
    /// Number of steps
    pub ticks: usize,
    /// Maximum per-axis target displacement per step
    pub target_step: f64,
    /// Probability that a delivered advertisement copy is lost
    pub loss_rate: f64,
    /// Random seed (None for random)
    pub seed: Option<u64>,
    pub kernel: KernelConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            agents: PATROL_WAYPOINTS
                .iter()
                .map(|&(id, waypoint)| AgentSpec {
                    id,
                    start: waypoint,
                    waypoint,
                })
                .collect(),
            targets: Vec::new(),
            ticks: 120,
            target_step: 2.0,
            loss_rate: 0.1,
            seed: None,
            kernel: KernelConfig {
                coordination: Coordination::Broadcast,
                ..KernelConfig::default()
            },
        }
    }
}

impl SimulationConfig {
    /// Random targets with the default ids, inside the coverage zone.
    pub fn random_targets<R: Rng>(&self, rng: &mut R) -> Vec<TargetSpec> {
        let max_x = self.kernel.sensor.coverage_zone_x.max(300.0) - 100.0;
        DEFAULT_TARGETS
            .iter()
            .map(|&id| TargetSpec {
                id,
                position: Point::new(rng.random_range(150.0..max_x), rng.random_range(100.0..700.0)),
            })
            .collect()
    }
}

struct SimAgent {
    unit: Arc<MotionUnit>,
    planner: Planner,
}

/// A running simulation.
pub struct Simulation {
    config: SimulationConfig,
    seed: u64,
    world: Arc<SimWorld>,
    bus: Arc<LocalBus>,
    agents: Vec<SimAgent>,
    targets: Vec<TargetId>,
    rng: StdRng,
    tick: u64,
}

impl std::fmt::Debug for Simulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulation")
            .field("seed", &self.seed)
            .field("agents", &self.agents.len())
            .field("targets", &self.targets)
            .field("tick", &self.tick)
            .finish()
    }
}

impl Simulation {
    /// Build the world, the bus and every agent, and start the planners.
    pub async fn new(mut config: SimulationConfig) -> Result<Self> {
        anyhow::ensure!(!config.agents.is_empty(), "Simulation needs at least one agent");

        let seed = config.seed.unwrap_or_else(|| rand::rng().random());
        let mut rng = StdRng::seed_from_u64(seed);

        if config.targets.is_empty() {
            config.targets = config.random_targets(&mut rng);
        }
        anyhow::ensure!(!config.targets.is_empty(), "Simulation needs at least one target");

        let world = Arc::new(SimWorld::new());
        for target in &config.targets {
            anyhow::ensure!(
                !config.agents.iter().any(|a| a.id == target.id),
                "Node id {} used for both an agent and a target",
                target.id
            );
            world.insert(target.id, target.position);
        }
        let targets: Vec<TargetId> = config.targets.iter().map(|t| t.id).collect();

        let bus = LocalBus::deferred(config.loss_rate, rng.random());
        let mut agents = Vec::with_capacity(config.agents.len());
        for spec in &config.agents {
            world.insert(spec.id, spec.start);
            let unit = Arc::new(MotionUnit::new(
                spec.id,
                spec.start,
                spec.waypoint,
                world.clone(),
                targets.clone(),
                config.kernel.loiter,
            ));
            unit.init_markers().await?;

            let (port, inbox) = bus.join(spec.id, 1024);
            let transport: Option<Arc<dyn AdvertTransport>> = config
                .kernel
                .coordination
                .is_broadcast()
                .then(|| Arc::new(port) as Arc<dyn AdvertTransport>);
            let mut planner = Planner::new(
                spec.id,
                config.kernel.clone(),
                inbox,
                unit.clone(),
                world.clone() as Arc<dyn PositionService>,
                transport,
            );
            planner
                .start()
                .await
                .with_context(|| format!("Failed to start agent {}", spec.id))?;
            agents.push(SimAgent { unit, planner });
        }

        info!(
            seed = seed,
            agents = agents.len(),
            targets = targets.len(),
            coordination = ?config.kernel.coordination,
            "Simulation ready"
        );

        Ok(Self {
            config,
            seed,
            world,
            bus,
            agents,
            targets,
            rng,
            tick: 0,
        })
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Advance the whole fleet by one tick.
    pub async fn step(&mut self) -> Result<TickSnapshot> {
        self.tick += 1;
        let dt = self.config.kernel.tick_interval().as_secs_f64();

        let mut reports: Vec<TickReport> = Vec::with_capacity(self.agents.len());
        for agent in &mut self.agents {
            match agent.planner.tick().await {
                Ok(report) => reports.push(report),
                Err(e) => warn!(agent = agent.planner.agent(), error = %e, "Tick skipped"),
            }
        }
        let delivered = self.bus.flush();
        trace!(tick = self.tick, delivered = delivered, "Advertisements delivered");

        for agent in &self.agents {
            agent.unit.advance(dt).await?;
        }
        self.world
            .random_walk(&self.targets, self.config.target_step, &mut self.rng);

        let snapshot = TickSnapshot::new(self.tick, reports);
        if !snapshot.duplicate_claims.is_empty() {
            info!(tick = self.tick, targets = ?snapshot.duplicate_claims, "Duplicate active claims");
        }
        Ok(snapshot)
    }

    /// Run all configured ticks.
    pub async fn run(mut self) -> Result<SimulationResult> {
        let started_at = Utc::now();
        let mut ticks = Vec::with_capacity(self.config.ticks);
        for _ in 0..self.config.ticks {
            ticks.push(self.step().await?);
        }

        let result = SimulationResult::new(self.config, self.seed, started_at, ticks);
        info!(
            ticks = result.ticks.len(),
            tracked = result.tracked_targets(),
            duplicate_ticks = result.duplicate_claim_ticks,
            last_change = ?result.last_change_tick,
            "Simulation complete"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarm_kernel::{Claim, TrackingMode};

    fn planner(simulation: &Simulation, agent: AgentId) -> &Planner {
        simulation
            .agents
            .iter()
            .map(|a| &a.planner)
            .find(|p| p.agent() == agent)
            .unwrap()
    }

    fn two_agents_one_target() -> SimulationConfig {
        SimulationConfig {
            agents: vec![
                AgentSpec {
                    id: 1,
                    start: Point::new(460.0, 300.0),
                    waypoint: Point::new(460.0, 300.0),
                },
                AgentSpec {
                    id: 2,
                    start: Point::new(500.0, 270.0),
                    waypoint: Point::new(500.0, 270.0),
                },
            ],
            targets: vec![TargetSpec {
                id: 11,
                position: Point::new(500.0, 300.0),
            }],
            ticks: 20,
            target_step: 0.0,
            loss_rate: 0.0,
            seed: Some(1),
            ..SimulationConfig::default()
        }
    }

    #[tokio::test]
    async fn test_nearer_agent_wins_contested_target() {
        // Agent 1 is 40 from the target, agent 2 is 30: both select it in
        // the first step and the contention pass settles it in the second.
        let mut simulation = Simulation::new(two_agents_one_target()).await.unwrap();
        let first = simulation.step().await.unwrap();
        assert!(first.agents.iter().all(|r| r.claim == Some(11)));
        assert!(first.agents.iter().all(|r| r.mode == TrackingMode::Pending));

        simulation.step().await.unwrap();
        simulation.step().await.unwrap();

        let near = planner(&simulation, 2);
        assert_eq!(near.registry().local().claim, Claim::Held(11));
        assert_eq!(near.registry().local().mode(), TrackingMode::Active);

        let far = planner(&simulation, 1);
        assert_eq!(far.registry().local().claim, Claim::Vacant);
        assert!(far.arbiter().seen().contains(&11));
    }

    #[tokio::test]
    async fn test_contested_run_ends_without_duplicates() {
        let result = Simulation::new(two_agents_one_target())
            .await
            .unwrap()
            .run()
            .await
            .unwrap();

        assert_eq!(result.final_assignments.get(&1), Some(&None));
        assert_eq!(result.final_assignments.get(&2), Some(&Some(11)));
        assert_eq!(result.duplicate_claim_ticks, 0);
    }

    #[tokio::test]
    async fn test_same_seed_same_run() {
        let config = SimulationConfig {
            ticks: 30,
            seed: Some(2024),
            ..SimulationConfig::default()
        };
        let a = Simulation::new(config.clone()).await.unwrap().run().await.unwrap();
        let b = Simulation::new(config).await.unwrap().run().await.unwrap();

        assert_eq!(a.seed, 2024);
        assert_eq!(a.config.targets, b.config.targets);
        assert_eq!(a.ticks, b.ticks);
    }

    #[tokio::test]
    async fn test_rejects_shared_node_ids() {
        let mut config = two_agents_one_target();
        config.targets[0].id = 2;
        assert!(Simulation::new(config).await.is_err());
    }

    #[test]
    fn test_random_targets_inside_coverage_zone() {
        let config = SimulationConfig::default();
        let mut rng = StdRng::seed_from_u64(5);
        let targets = config.random_targets(&mut rng);
        assert_eq!(targets.len(), DEFAULT_TARGETS.len());
        assert!(targets.iter().all(|t| t.position.x <= config.kernel.sensor.coverage_zone_x));
    }
}
