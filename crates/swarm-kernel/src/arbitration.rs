//! Arbitration: decentralized target claiming with deterministic tie-breaks.
//!
//! Every agent runs the same single-pass decision once per tick over what it
//! currently knows (its registry and a fresh observation). There is no
//! negotiation round and no acknowledgement; conflicting claims are settled
//! from advertised contention distances:
//!
//! ```text
//! tick N    A and B both select T            → Pending, advertise (T, dist)
//! tick N+1  each compares against the other  → nearer one commits (Active),
//!           (lower distance wins, tie → higher id)   the other drops T and
//!                                                    remembers it as seen
//! ```
//!
//! Two agents may therefore both believe they hold T for one tick. The
//! decision is returned as a [`TickOutcome`] so the caller performs the
//! motion commands and advertisements.

use std::collections::BTreeSet;

use tracing::{debug, info};

use crate::advert::Advertisement;
use crate::config::{Coordination, KernelConfig};
use crate::geometry::{AgentId, Point, TargetId};
use crate::registry::{AgentRegistry, Claim};

/// Fresh state gathered at the start of a tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Observation {
    /// Live position of the local agent
    pub position: Point,
    /// Candidate targets with their live positions, in sensor order
    pub candidates: Vec<(TargetId, Point)>,
}

impl Observation {
    pub fn new(position: Point, candidates: Vec<(TargetId, Point)>) -> Self {
        Self {
            position,
            candidates,
        }
    }

    fn target_position(&self, target: TargetId) -> Option<Point> {
        self.candidates
            .iter()
            .find(|(id, _)| *id == target)
            .map(|(_, position)| *position)
    }
}

/// Instruction for the motion unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MotionCommand {
    /// Record the committed claim (`None` releases it)
    Track(Option<TargetId>),
    /// Send the vehicle back to its original patrol waypoint
    Redeploy,
    /// Pursue this point
    SetWaypoint(Point),
}

/// Everything one arbitration pass wants done, in order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickOutcome {
    pub commands: Vec<MotionCommand>,
    pub adverts: Vec<Advertisement>,
}

/// Whether agent `a` beats agent `b` for the same target.
///
/// Lower contention distance wins; on an exact tie the higher id wins.
pub fn outranks(a_id: AgentId, a_distance: f64, b_id: AgentId, b_distance: f64) -> bool {
    a_distance < b_distance || (a_distance == b_distance && a_id > b_id)
}

/// Per-agent arbitration state machine.
#[derive(Debug, Clone)]
pub struct Arbiter {
    coordination: Coordination,
    redundancy: usize,
    /// Targets lost in contention since the candidate list was last empty
    seen: BTreeSet<TargetId>,
}

impl Arbiter {
    pub fn new(config: &KernelConfig) -> Self {
        Self {
            coordination: config.coordination,
            redundancy: config.redundancy.max(1),
            seen: BTreeSet::new(),
        }
    }

    pub fn seen(&self) -> &BTreeSet<TargetId> {
        &self.seen
    }

    /// Run one arbitration pass.
    pub fn tick(&mut self, registry: &mut AgentRegistry, observation: &Observation) -> TickOutcome {
        let mut outcome = TickOutcome::default();

        self.check_range(registry, observation);
        self.resolve_contention(registry, &mut outcome);
        self.check_transition(registry, &mut outcome);
        self.select(registry, observation, &mut outcome);
        self.advertise(registry, observation, &mut outcome);

        if self.coordination.is_broadcast() {
            registry.age_peers();
        }

        outcome
    }

    /// Release a claim whose target is no longer a candidate.
    fn check_range(&mut self, registry: &mut AgentRegistry, observation: &Observation) {
        let local = registry.local_mut();

        if observation.candidates.is_empty() {
            if let Claim::Held(target) = local.claim {
                info!(agent = local.id, target_id = target, "Target out of range, releasing claim");
            }
            local.claim = Claim::Vacant;
            local.pursuing = false;
            self.seen.clear();
            return;
        }

        if let Claim::Held(target) = local.claim
            && observation.target_position(target).is_none()
        {
            info!(agent = local.id, target_id = target, "Claimed target no longer sensed, releasing claim");
            local.claim = Claim::Vacant;
            local.pursuing = false;
        }
    }

    /// Settle the local claim against peers pursuing the same target.
    fn resolve_contention(&mut self, registry: &mut AgentRegistry, outcome: &mut TickOutcome) {
        let (local, peers) = registry.split_mut();
        let Claim::Held(target) = local.claim else {
            return;
        };

        let mut won_any = false;
        for peer in peers {
            if peer.claim != Claim::Held(target) || !peer.pursuing {
                continue;
            }

            debug!(
                agent = local.id,
                peer = peer.id,
                target_id = target,
                distance = local.contention_distance,
                peer_distance = peer.contention_distance,
                "Contending for target"
            );

            if outranks(
                local.id,
                local.contention_distance,
                peer.id,
                peer.contention_distance,
            ) {
                peer.claim = Claim::Vacant;
                peer.pursuing = false;
                won_any = true;
            } else {
                info!(agent = local.id, winner = peer.id, target_id = target, "Lost contention");
                self.seen.insert(target);
                local.claim = Claim::Vacant;
                local.pursuing = false;
                return;
            }
        }

        if won_any && local.prior_claim != local.claim {
            info!(agent = local.id, target_id = target, "Won contention, tracking target");
            local.prior_claim = local.claim;
            outcome.commands.push(MotionCommand::Track(Some(target)));
        }
    }

    /// Commit a changed claim; a released claim also redeploys the vehicle.
    fn check_transition(&mut self, registry: &mut AgentRegistry, outcome: &mut TickOutcome) {
        let local = registry.local_mut();
        if local.claim == local.prior_claim {
            return;
        }

        local.prior_claim = local.claim;
        outcome.commands.push(MotionCommand::Track(local.claim.target()));

        match local.claim.target() {
            Some(target) => info!(agent = local.id, target_id = target, "Tracking target"),
            None => {
                info!(agent = local.id, "Claim released, redeploying");
                local.contention_distance = f64::INFINITY;
                local.pursuing = false;
                outcome.commands.push(MotionCommand::Redeploy);
            }
        }
    }

    /// Keep the committed target, or pick the nearest free one.
    fn select(
        &mut self,
        registry: &mut AgentRegistry,
        observation: &Observation,
        outcome: &mut TickOutcome,
    ) {
        let prior = registry.local().prior_claim;
        let broadcast = self.coordination.is_broadcast();

        let mut chosen: Option<(TargetId, Point)> = None;
        let mut closest = f64::INFINITY;

        for &(target, position) in &observation.candidates {
            if prior == Claim::Held(target) {
                chosen = Some((target, position));
                continue;
            }

            if prior != Claim::Vacant || self.seen.contains(&target) {
                continue;
            }

            if broadcast && registry.target_occupied(target) {
                debug!(agent = registry.local_id(), target_id = target, "Target already tracked by a peer");
                continue;
            }

            let distance = observation.position.distance(&position);
            if distance < closest {
                closest = distance;
                chosen = Some((target, position));
            }
        }

        if let Some((target, position)) = chosen {
            let local = registry.local_mut();
            if local.claim != Claim::Held(target) {
                debug!(agent = local.id, target_id = target, distance = closest, "Selected candidate target");
            }
            local.claim = Claim::Held(target);
            outcome.commands.push(MotionCommand::SetWaypoint(position));
        }
    }

    /// Refresh the contention distance and build this tick's advertisements.
    fn advertise(
        &mut self,
        registry: &mut AgentRegistry,
        observation: &Observation,
        outcome: &mut TickOutcome,
    ) {
        let broadcast = self.coordination.is_broadcast();
        let local = registry.local_mut();

        let held = local
            .claim
            .target()
            .and_then(|target| observation.target_position(target).map(|p| (target, p)));

        match held {
            Some((target, position)) => {
                local.contention_distance = observation.position.distance(&position);
                local.pursuing = true;
                if broadcast {
                    let advert =
                        Advertisement::pursuing(local.id, target, local.contention_distance);
                    outcome
                        .adverts
                        .extend(std::iter::repeat_n(advert, self.redundancy));
                }
            }
            None => {
                local.claim = Claim::Vacant;
                local.contention_distance = f64::INFINITY;
                local.pursuing = false;
                if broadcast {
                    outcome.adverts.push(Advertisement::idle(local.id));
                }
            }
        }
    }
}
