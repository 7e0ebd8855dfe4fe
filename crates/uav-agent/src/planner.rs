//! Planner: the per-agent orchestration loop.
//!
//! Every tick drains the advertisement queue into the registry, forgets
//! silent peers, senses, arbitrates, then executes the resulting motion
//! commands and publishes the advertisements. A tick that cannot read
//! positions or reach the motion unit is skipped and the next one retries;
//! a claim transition only counts as committed once its commands went through.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use swarm_kernel::marker::{MarkerKind, NEUTRAL, target_color};
use swarm_kernel::{
    Advertisement, AgentId, AgentRegistry, Arbiter, KernelConfig, MotionCommand, Observation,
    Point, TargetId, TrackingMode,
};

use crate::motion::MotionInterface;
use crate::transport::AdvertTransport;
use crate::world::PositionService;

/// What happened during one tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickReport {
    pub tick: u64,
    pub agent: AgentId,
    pub position: Point,
    pub claim: Option<TargetId>,
    pub mode: TrackingMode,
    /// Distance to the claimed target, when one is held
    pub distance: Option<f64>,
    pub candidates: usize,
    pub peers: usize,
    pub received: usize,
    pub sent: usize,
}

/// Orchestration loop of one agent.
pub struct Planner {
    config: KernelConfig,
    arbiter: Arbiter,
    registry: AgentRegistry,
    inbox: mpsc::Receiver<Advertisement>,
    motion: Arc<dyn MotionInterface>,
    world: Arc<dyn PositionService>,
    transport: Option<Arc<dyn AdvertTransport>>,
    /// Target last painted as tracked by this agent
    tracked: Option<TargetId>,
    ticks: u64,
}

impl std::fmt::Debug for Planner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Planner")
            .field("agent", &self.registry.local_id())
            .field("coordination", &self.config.coordination)
            .field("peers", &self.registry.peer_count())
            .field("tracked", &self.tracked)
            .field("ticks", &self.ticks)
            .finish()
    }
}

impl Planner {
    pub fn new(
        agent: AgentId,
        config: KernelConfig,
        inbox: mpsc::Receiver<Advertisement>,
        motion: Arc<dyn MotionInterface>,
        world: Arc<dyn PositionService>,
        transport: Option<Arc<dyn AdvertTransport>>,
    ) -> Self {
        Self {
            arbiter: Arbiter::new(&config),
            registry: AgentRegistry::new(agent),
            config,
            inbox,
            motion,
            world,
            transport,
            tracked: None,
            ticks: 0,
        }
    }

    pub fn agent(&self) -> AgentId {
        self.registry.local_id()
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn arbiter(&self) -> &Arbiter {
        &self.arbiter
    }

    /// Check the session and put the vehicle on its patrol with no claim.
    ///
    /// Any failure here is fatal.
    pub async fn start(&mut self) -> Result<()> {
        self.world
            .check_session()
            .await
            .context("No simulation session")?;
        self.redeploy().await?;
        self.motion
            .set_claim(None)
            .await
            .context("Failed to reset claim")?;
        info!(agent = self.agent(), coordination = ?self.config.coordination, "Planner started");
        Ok(())
    }

    /// Run one tick.
    pub async fn tick(&mut self) -> Result<TickReport> {
        let now = Instant::now();
        let agent = self.agent();

        let mut received = 0;
        while let Ok(advert) = self.inbox.try_recv() {
            self.registry.apply(&advert, now);
            received += 1;
        }

        if let Some(timeout) = self.config.peer_timeout() {
            for peer in self.registry.evict_silent(now, timeout) {
                info!(agent = agent, peer = peer, "Peer went silent, forgetting it");
            }
        }

        let observation = self.observe().await?;
        let committed = self.registry.local().prior_claim;
        let outcome = self.arbiter.tick(&mut self.registry, &observation);

        if let Err(e) = self.execute(&outcome.commands).await {
            // Roll back the commit so the next tick issues the transition again.
            self.registry.local_mut().prior_claim = committed;
            return Err(e.context("Failed to execute motion commands"));
        }
        let sent = self.publish(&outcome.adverts).await;

        self.ticks += 1;
        let local = self.registry.local();
        let report = TickReport {
            tick: self.ticks,
            agent,
            position: observation.position,
            claim: local.claim.target(),
            mode: local.mode(),
            distance: local.claim.is_held().then_some(local.contention_distance),
            candidates: observation.candidates.len(),
            peers: self.registry.peer_count(),
            received,
            sent,
        };
        debug!(
            agent = agent,
            tick = report.tick,
            claim = ?report.claim,
            mode = ?report.mode,
            candidates = report.candidates,
            peers = report.peers,
            "Tick complete"
        );
        Ok(report)
    }

    /// Tick forever at the configured interval.
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.config.tick_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if let Err(e) = self.tick().await {
                warn!(agent = self.agent(), error = %format!("{:#}", e), "Tick skipped");
            }
        }
    }

    async fn observe(&self) -> Result<Observation> {
        let position = self
            .motion
            .position()
            .await
            .context("Failed to read vehicle position")?;
        let sensor = self.config.sensor;
        let candidates = self
            .motion
            .candidate_targets(sensor.coverage_zone_x, sensor.pursuit_range)
            .await
            .context("Failed to read candidate targets")?;

        let mut positions = Vec::with_capacity(candidates.len());
        for target in candidates {
            let target_position = self
                .world
                .position(target)
                .await
                .with_context(|| format!("Failed to read position of target {}", target))?;
            positions.push((target, target_position));
        }
        Ok(Observation::new(position, positions))
    }

    async fn execute(&mut self, commands: &[MotionCommand]) -> Result<()> {
        for command in commands {
            match *command {
                MotionCommand::Track(claim) => self.track(claim).await?,
                MotionCommand::Redeploy => self.redeploy().await?,
                MotionCommand::SetWaypoint(waypoint) => self.motion.set_waypoint(waypoint).await?,
            }
        }
        Ok(())
    }

    /// Record the committed claim and recolor the targets involved.
    async fn track(&mut self, claim: Option<TargetId>) -> Result<()> {
        let color = self.motion.set_claim(claim).await?;
        debug!(agent = self.agent(), claim = ?claim, color = %color, "Claim recorded");

        match (self.tracked, claim) {
            (Some(previous), None) => {
                self.world
                    .set_marker(previous, NEUTRAL, MarkerKind::Target)
                    .await?;
            }
            (None, Some(target)) => {
                self.world
                    .set_marker(target, target_color(target), MarkerKind::Target)
                    .await?;
            }
            _ => {}
        }
        self.tracked = claim;
        Ok(())
    }

    async fn redeploy(&self) -> Result<()> {
        let waypoint = self.motion.original_waypoint().await?;
        info!(agent = self.agent(), waypoint = %waypoint, "Redeploying to patrol waypoint");
        self.motion.set_waypoint(waypoint).await
    }

    /// Send every advertisement; failures are logged. Returns how many went
    /// out.
    async fn publish(&self, adverts: &[Advertisement]) -> usize {
        let Some(transport) = &self.transport else {
            return 0;
        };
        let mut sent = 0;
        for advert in adverts {
            match transport.broadcast(advert).await {
                Ok(()) => sent += 1,
                Err(e) => warn!(agent = self.agent(), error = %e, "Failed to send advertisement"),
            }
        }
        sent
    }
}
