//! Integration tests for multi-agent claim arbitration.
//!
//! Agents are driven in lock step: every agent ticks on what it has received
//! so far, then all advertisements produced during the tick are delivered
//! (possibly with losses) before the next tick, mirroring a broadcast medium.

use std::time::Instant;

use swarm_kernel::{
    AgentId, AgentRegistry, Advertisement, Arbiter, Claim, Coordination, KernelConfig,
    MotionCommand, Observation, Point, SensorModel, TargetId, TickOutcome, TrackingMode,
    move_vehicle,
};

struct TestAgent {
    arbiter: Arbiter,
    registry: AgentRegistry,
    position: Point,
    inbox: Vec<Advertisement>,
    outcomes: Vec<TickOutcome>,
}

impl TestAgent {
    fn new(id: AgentId, position: Point, config: &KernelConfig) -> Self {
        Self {
            arbiter: Arbiter::new(config),
            registry: AgentRegistry::new(id),
            position,
            inbox: Vec::new(),
            outcomes: Vec::new(),
        }
    }

    fn claim(&self) -> Claim {
        self.registry.local().claim
    }

    fn mode(&self) -> TrackingMode {
        self.registry.local().mode()
    }
}

struct Fleet {
    agents: Vec<TestAgent>,
    targets: Vec<(TargetId, Point)>,
    sensor: SensorModel,
}

impl Fleet {
    fn new(agents: &[(AgentId, Point)], targets: &[(TargetId, Point)]) -> Self {
        let config = KernelConfig {
            coordination: Coordination::Broadcast,
            ..KernelConfig::default()
        };
        Self {
            agents: agents
                .iter()
                .map(|(id, position)| TestAgent::new(*id, *position, &config))
                .collect(),
            targets: targets.to_vec(),
            sensor: config.sensor,
        }
    }

    /// Tick every agent, then deliver the advertisements that `deliver`
    /// lets through (by sender, copy index).
    fn tick_with(&mut self, deliver: impl Fn(AgentId, usize) -> bool) {
        let now = Instant::now();
        let mut sent = Vec::new();

        for agent in &mut self.agents {
            for advert in agent.inbox.drain(..) {
                agent.registry.apply(&advert, now);
            }
            let candidates = self
                .sensor
                .candidates(agent.position, self.targets.iter().copied())
                .collect();
            let observation = Observation::new(agent.position, candidates);
            let outcome = agent.arbiter.tick(&mut agent.registry, &observation);
            sent.extend(outcome.adverts.iter().copied().enumerate());
            agent.outcomes.push(outcome);
        }

        for (copy, advert) in sent {
            if !deliver(advert.agent, copy) {
                continue;
            }
            for agent in &mut self.agents {
                agent.inbox.push(advert);
            }
        }
    }

    fn tick(&mut self) {
        self.tick_with(|_, _| true);
    }

    fn agent(&self, id: AgentId) -> &TestAgent {
        self.agents
            .iter()
            .find(|a| a.registry.local_id() == id)
            .expect("agent exists")
    }
}

#[test]
fn test_nearer_agent_wins_after_one_arbitration_pass() {
    let target = Point::new(500.0, 300.0);
    let mut fleet = Fleet::new(
        &[(1, Point::new(460.0, 300.0)), (2, Point::new(500.0, 270.0))],
        &[(11, target)],
    );

    fleet.tick();
    assert_eq!(fleet.agent(1).mode(), TrackingMode::Pending);
    assert_eq!(fleet.agent(2).mode(), TrackingMode::Pending);

    fleet.tick();
    let near = fleet.agent(2);
    assert_eq!(near.claim(), Claim::Held(11));
    assert_eq!(near.mode(), TrackingMode::Active);
    assert!(near.outcomes[1].commands.contains(&MotionCommand::Track(Some(11))));

    let far = fleet.agent(1);
    assert_eq!(far.claim(), Claim::Vacant);
    assert!(far.arbiter.seen().contains(&11));
}

#[test]
fn test_tie_goes_to_higher_id_reproducibly() {
    for _ in 0..5 {
        let mut fleet = Fleet::new(
            &[(3, Point::new(0.0, 30.0)), (7, Point::new(30.0, 0.0))],
            &[(12, Point::new(0.0, 0.0))],
        );
        fleet.tick();
        fleet.tick();
        assert_eq!(fleet.agent(7).mode(), TrackingMode::Active);
        assert_eq!(fleet.agent(3).claim(), Claim::Vacant);
    }
}

#[test]
fn test_loser_moves_on_to_free_target() {
    let mut fleet = Fleet::new(
        &[(1, Point::new(0.0, 0.0)), (2, Point::new(20.0, 0.0))],
        &[(11, Point::new(40.0, 0.0)), (12, Point::new(0.0, 200.0))],
    );

    for _ in 0..4 {
        fleet.tick();
    }

    assert_eq!(fleet.agent(2).claim(), Claim::Held(11));
    assert_eq!(fleet.agent(1).claim(), Claim::Held(12));
    assert_eq!(fleet.agent(1).mode(), TrackingMode::Active);
    assert_eq!(fleet.agent(2).mode(), TrackingMode::Active);
}

#[test]
fn test_double_claim_after_lost_tick_resolves_next_pass() {
    let mut fleet = Fleet::new(
        &[(1, Point::new(460.0, 300.0)), (2, Point::new(500.0, 270.0))],
        &[(11, Point::new(500.0, 300.0))],
    );

    // Everything from the first tick is lost: both commit.
    fleet.tick_with(|_, _| false);
    fleet.tick();
    assert_eq!(fleet.agent(1).mode(), TrackingMode::Active);
    assert_eq!(fleet.agent(2).mode(), TrackingMode::Active);

    // The contention pass on the next tick settles it.
    fleet.tick();
    assert_eq!(fleet.agent(2).mode(), TrackingMode::Active);
    assert_eq!(fleet.agent(1).claim(), Claim::Vacant);
    assert_eq!(
        fleet.agent(1).outcomes[2].commands,
        vec![MotionCommand::Track(None), MotionCommand::Redeploy]
    );
}

#[test]
fn test_redundant_copies_survive_partial_loss() {
    let mut fleet = Fleet::new(
        &[(1, Point::new(460.0, 300.0)), (2, Point::new(500.0, 270.0))],
        &[(11, Point::new(500.0, 300.0))],
    );

    // Only the last of each agent's three copies gets through.
    fleet.tick_with(|_, copy| copy == 2);
    fleet.tick();
    assert_eq!(fleet.agent(2).mode(), TrackingMode::Active);
    assert_eq!(fleet.agent(1).claim(), Claim::Vacant);
}

#[test]
fn test_single_agent_loiters_on_claimed_target() {
    let target = Point::new(300.0, 300.0);
    let config = KernelConfig::default();
    let mut agent = TestAgent::new(1, Point::new(100.0, 300.0), &config);
    let mut waypoint = agent.position;

    for tick in 0..40 {
        let candidates = config
            .sensor
            .candidates(agent.position, [(11 as TargetId, target)])
            .collect();
        let observation = Observation::new(agent.position, candidates);
        let outcome = agent.arbiter.tick(&mut agent.registry, &observation);
        for command in &outcome.commands {
            if let MotionCommand::SetWaypoint(p) = command {
                waypoint = *p;
            }
        }
        agent.position = move_vehicle(
            agent.position,
            waypoint,
            config.loiter.radius,
            config.loiter.speed,
            1.0,
        );
        if tick >= 15 {
            assert!((agent.position.distance(&target) - config.loiter.radius).abs() < 1e-6);
        }
    }
    assert_eq!(agent.mode(), TrackingMode::Active);
}
