//! Results of a simulation run.
//!
//! Captures:
//! - every agent's tick report, tick by tick
//! - targets claimed actively by more than one agent in a tick
//! - the final assignment of agents to targets

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use swarm_kernel::{AgentId, TargetId, TrackingMode};

use crate::planner::TickReport;
use crate::simulation::SimulationConfig;

/// State of the fleet after one simulation tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickSnapshot {
    pub tick: u64,
    pub agents: Vec<TickReport>,
    /// Targets held actively by more than one agent
    pub duplicate_claims: Vec<TargetId>,
}

impl TickSnapshot {
    pub fn new(tick: u64, agents: Vec<TickReport>) -> Self {
        let mut holders: BTreeMap<TargetId, usize> = BTreeMap::new();
        for report in &agents {
            if let (TrackingMode::Active, Some(target)) = (report.mode, report.claim) {
                *holders.entry(target).or_default() += 1;
            }
        }
        let duplicate_claims = holders
            .into_iter()
            .filter(|(_, count)| *count > 1)
            .map(|(target, _)| target)
            .collect();

        Self {
            tick,
            agents,
            duplicate_claims,
        }
    }

    /// Claim of every agent in this tick.
    pub fn assignments(&self) -> BTreeMap<AgentId, Option<TargetId>> {
        self.agents.iter().map(|r| (r.agent, r.claim)).collect()
    }
}

/// Results of one simulation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationResult {
    /// Simulation configuration
    pub config: SimulationConfig,
    /// Seed actually used
    pub seed: u64,
    /// Start time
    pub started_at: DateTime<Utc>,
    /// End time
    pub ended_at: DateTime<Utc>,
    /// Per-tick snapshots
    pub ticks: Vec<TickSnapshot>,
    /// Claims after the last tick
    pub final_assignments: BTreeMap<AgentId, Option<TargetId>>,
    /// Ticks in which some target had more than one active holder
    pub duplicate_claim_ticks: usize,
    /// Last tick in which any agent's claim changed
    pub last_change_tick: Option<u64>,
}

impl SimulationResult {
    pub fn new(
        config: SimulationConfig,
        seed: u64,
        started_at: DateTime<Utc>,
        ticks: Vec<TickSnapshot>,
    ) -> Self {
        let final_assignments = ticks.last().map(|t| t.assignments()).unwrap_or_default();
        let duplicate_claim_ticks = ticks
            .iter()
            .filter(|t| !t.duplicate_claims.is_empty())
            .count();
        let last_change_tick = ticks
            .windows(2)
            .filter(|pair| pair[0].assignments() != pair[1].assignments())
            .map(|pair| pair[1].tick)
            .next_back();

        Self {
            config,
            seed,
            started_at,
            ended_at: Utc::now(),
            ticks,
            final_assignments,
            duplicate_claim_ticks,
            last_change_tick,
        }
    }

    /// Number of distinct targets held at the end.
    pub fn tracked_targets(&self) -> usize {
        let mut targets: Vec<TargetId> = self.final_assignments.values().flatten().copied().collect();
        targets.sort_unstable();
        targets.dedup();
        targets.len()
    }

    /// Save results to a JSON file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write results to {}", path.display()))?;
        Ok(())
    }

    /// Load results from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let results = serde_json::from_str(&json)?;
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarm_kernel::Point;

    fn report(agent: AgentId, claim: Option<TargetId>, mode: TrackingMode) -> TickReport {
        TickReport {
            tick: 1,
            agent,
            position: Point::default(),
            claim,
            mode,
            distance: claim.map(|_| 10.0),
            candidates: 1,
            peers: 0,
            received: 0,
            sent: 0,
        }
    }

    #[test]
    fn test_snapshot_counts_only_active_duplicates() {
        let snapshot = TickSnapshot::new(
            1,
            vec![
                report(1, Some(11), TrackingMode::Active),
                report(2, Some(11), TrackingMode::Active),
                report(3, Some(12), TrackingMode::Active),
                report(4, Some(12), TrackingMode::Pending),
            ],
        );
        assert_eq!(snapshot.duplicate_claims, vec![11]);
    }

    #[test]
    fn test_result_summary() {
        let ticks = vec![
            TickSnapshot::new(
                1,
                vec![
                    report(1, Some(11), TrackingMode::Pending),
                    report(2, Some(11), TrackingMode::Pending),
                ],
            ),
            TickSnapshot::new(
                2,
                vec![
                    report(1, Some(11), TrackingMode::Active),
                    report(2, Some(11), TrackingMode::Active),
                ],
            ),
            TickSnapshot::new(
                3,
                vec![
                    report(1, None, TrackingMode::Idle),
                    report(2, Some(11), TrackingMode::Active),
                ],
            ),
            TickSnapshot::new(
                4,
                vec![
                    report(1, None, TrackingMode::Idle),
                    report(2, Some(11), TrackingMode::Active),
                ],
            ),
        ];
        let result = SimulationResult::new(SimulationConfig::default(), 42, Utc::now(), ticks);

        assert_eq!(result.duplicate_claim_ticks, 1);
        assert_eq!(result.last_change_tick, Some(3));
        assert_eq!(result.final_assignments.get(&1), Some(&None));
        assert_eq!(result.final_assignments.get(&2), Some(&Some(11)));
        assert_eq!(result.tracked_targets(), 1);
    }

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir().join(format!("uav-sim-{}.json", std::process::id()));
        let ticks = vec![TickSnapshot::new(1, vec![report(1, Some(11), TrackingMode::Pending)])];
        let result = SimulationResult::new(SimulationConfig::default(), 7, Utc::now(), ticks);

        result.save(&path).unwrap();
        let loaded = SimulationResult::load(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded.seed, 7);
        assert_eq!(loaded.ticks, result.ticks);
        assert_eq!(loaded.final_assignments, result.final_assignments);
    }
}
