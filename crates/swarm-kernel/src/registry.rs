//! Agent registry: the tracking state of the local agent and every peer it
//! has heard from.
//!
//! The registry has a single owner (the planner loop). Advertisements decoded
//! by a transport are queued and applied here at the start of a tick, so no
//! lock is involved. Applying advertisements is idempotent and
//! last-applied-wins per peer.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::advert::Advertisement;
use crate::geometry::{AgentId, TargetId};

/// What an agent is known to claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Claim {
    /// No claim
    Vacant,
    /// Claim on a target
    Held(TargetId),
    /// Placeholder for a peer that has not advertised since the last tick
    Stale,
}

impl Claim {
    pub fn target(&self) -> Option<TargetId> {
        match self {
            Claim::Held(id) => Some(*id),
            Claim::Vacant | Claim::Stale => None,
        }
    }

    pub fn is_held(&self) -> bool {
        matches!(self, Claim::Held(_))
    }
}

impl From<Option<TargetId>> for Claim {
    fn from(target: Option<TargetId>) -> Self {
        target.map_or(Claim::Vacant, Claim::Held)
    }
}

/// Derived tracking mode of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackingMode {
    /// No claim held
    Idle,
    /// Claim selected but not yet committed
    Pending,
    /// Claim committed
    Active,
}

/// Tracking state of one agent.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentTrack {
    pub id: AgentId,
    /// Current claim
    pub claim: Claim,
    /// Last committed claim (local agent) or the claim seen on the previous
    /// tick (peers)
    pub prior_claim: Claim,
    /// Distance to the claimed target; `+inf` without a claim
    pub contention_distance: f64,
    /// Still contending for the claim this tick
    pub pursuing: bool,
    /// When this entry was last refreshed by an advertisement
    pub last_heard: Option<Instant>,
}

impl AgentTrack {
    pub fn new(id: AgentId) -> Self {
        Self {
            id,
            claim: Claim::Vacant,
            prior_claim: Claim::Vacant,
            contention_distance: f64::INFINITY,
            pursuing: false,
            last_heard: None,
        }
    }

    pub fn mode(&self) -> TrackingMode {
        match self.claim {
            Claim::Held(_) if self.claim == self.prior_claim => TrackingMode::Active,
            Claim::Held(_) => TrackingMode::Pending,
            Claim::Vacant | Claim::Stale => TrackingMode::Idle,
        }
    }

    /// Whether this agent is known to be on `target`: a fresh claim, or the
    /// claim from the previous tick when nothing fresh has arrived.
    pub fn occupies(&self, target: TargetId) -> bool {
        match self.claim {
            Claim::Held(id) => id == target,
            Claim::Stale => self.prior_claim == Claim::Held(target),
            Claim::Vacant => false,
        }
    }

    fn apply(&mut self, advert: &Advertisement, now: Instant) {
        self.claim = Claim::from(advert.claim);
        self.contention_distance = advert.distance;
        self.pursuing = advert.pursuing;
        self.last_heard = Some(now);
    }
}

/// Local agent plus every known peer, keyed by agent id.
///
/// Peers are iterated in ascending id order so that arbitration is
/// reproducible.
#[derive(Debug, Clone)]
pub struct AgentRegistry {
    local: AgentTrack,
    peers: BTreeMap<AgentId, AgentTrack>,
}

impl AgentRegistry {
    pub fn new(local_id: AgentId) -> Self {
        Self {
            local: AgentTrack::new(local_id),
            peers: BTreeMap::new(),
        }
    }

    pub fn local_id(&self) -> AgentId {
        self.local.id
    }

    pub fn local(&self) -> &AgentTrack {
        &self.local
    }

    pub fn local_mut(&mut self) -> &mut AgentTrack {
        &mut self.local
    }

    pub fn peer(&self, id: AgentId) -> Option<&AgentTrack> {
        self.peers.get(&id)
    }

    pub fn peers(&self) -> impl Iterator<Item = &AgentTrack> {
        self.peers.values()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Split borrow: the local agent mutably alongside the peers.
    pub fn split_mut(&mut self) -> (&mut AgentTrack, impl Iterator<Item = &mut AgentTrack>) {
        (&mut self.local, self.peers.values_mut())
    }

    /// Record a peer's advertisement, creating the peer on first contact.
    ///
    /// The local agent's own advertisements (echoed back by multicast) are
    /// ignored. Returns whether the registry changed.
    pub fn apply(&mut self, advert: &Advertisement, now: Instant) -> bool {
        if advert.agent == self.local.id {
            return false;
        }
        let peer = self.peers.entry(advert.agent).or_insert_with(|| {
            debug!(peer = advert.agent, "New peer observed");
            AgentTrack::new(advert.agent)
        });
        let before = (peer.claim, peer.contention_distance, peer.pursuing);
        peer.apply(advert, now);
        before != (peer.claim, peer.contention_distance, peer.pursuing)
    }

    /// Drop peers not heard from within `timeout`. Returns the evicted ids.
    pub fn evict_silent(&mut self, now: Instant, timeout: Duration) -> Vec<AgentId> {
        let expired: Vec<AgentId> = self
            .peers
            .values()
            .filter(|peer| {
                peer.last_heard
                    .is_none_or(|heard| now.saturating_duration_since(heard) > timeout)
            })
            .map(|peer| peer.id)
            .collect();
        for id in &expired {
            self.peers.remove(id);
        }
        expired
    }

    /// Whether any peer is known to be on `target`.
    pub fn target_occupied(&self, target: TargetId) -> bool {
        self.peers.values().any(|peer| peer.occupies(target))
    }

    /// Age every peer's claim: the current claim becomes the prior claim and
    /// the current one turns stale until a fresh advertisement arrives.
    ///
    /// Peers that are already stale keep their prior claim.
    pub fn age_peers(&mut self) {
        for peer in self.peers.values_mut() {
            if peer.claim != Claim::Stale {
                peer.prior_claim = peer.claim;
                peer.claim = Claim::Stale;
            }
        }
    }
}
