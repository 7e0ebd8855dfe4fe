//! Sensor model: which targets an agent can currently pursue.
//!
//! A target is a candidate when it lies inside the coverage zone (its X
//! coordinate does not exceed the zone limit) and within pursuit range of the
//! agent. Candidates are produced lazily in the order the targets are given;
//! nothing is sorted by distance here.

use serde::{Deserialize, Serialize};

use crate::geometry::{Point, TargetId};

/// Coverage zone and pursuit range of an agent's sensor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorModel {
    /// Coverage zone limit on the X axis
    pub coverage_zone_x: f64,
    /// Maximum distance at which a target can be pursued
    pub pursuit_range: f64,
}

impl Default for SensorModel {
    fn default() -> Self {
        Self {
            coverage_zone_x: 1200.0,
            pursuit_range: 600.0,
        }
    }
}

impl SensorModel {
    pub fn new(coverage_zone_x: f64, pursuit_range: f64) -> Self {
        Self {
            coverage_zone_x,
            pursuit_range,
        }
    }

    /// Whether a target at `target` is visible from `agent`.
    pub fn covers(&self, agent: Point, target: Point) -> bool {
        target.x <= self.coverage_zone_x && agent.distance(&target) <= self.pursuit_range
    }

    /// Lazily filter `targets` down to the candidates visible from `agent`.
    ///
    /// The returned iterator is `Clone` whenever the input is, so callers can
    /// restart the scan without re-fetching positions.
    pub fn candidates<I>(&self, agent: Point, targets: I) -> Candidates<I::IntoIter>
    where
        I: IntoIterator<Item = (TargetId, Point)>,
    {
        Candidates {
            sensor: *self,
            agent,
            targets: targets.into_iter(),
        }
    }
}

/// Free-function form of [`SensorModel::candidates`], yielding only ids.
pub fn candidate_targets<I>(
    agent_position: Point,
    targets: I,
    coverage_zone_x: f64,
    pursuit_range: f64,
) -> impl Iterator<Item = TargetId> + Clone
where
    I: IntoIterator<Item = (TargetId, Point)>,
    I::IntoIter: Clone,
{
    SensorModel::new(coverage_zone_x, pursuit_range)
        .candidates(agent_position, targets)
        .map(|(id, _)| id)
}

/// Iterator over the targets visible from one agent position.
#[derive(Debug, Clone)]
pub struct Candidates<I> {
    sensor: SensorModel,
    agent: Point,
    targets: I,
}

impl<I> Iterator for Candidates<I>
where
    I: Iterator<Item = (TargetId, Point)>,
{
    type Item = (TargetId, Point);

    fn next(&mut self) -> Option<Self::Item> {
        let sensor = self.sensor;
        let agent = self.agent;
        self.targets
            .by_ref()
            .find(|(_, position)| sensor.covers(agent, *position))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field() -> Vec<(TargetId, Point)> {
        vec![
            (11, Point::new(300.0, 0.0)),   // in range
            (12, Point::new(1300.0, 0.0)),  // beyond coverage zone
            (13, Point::new(0.0, 700.0)),   // out of pursuit range
            (14, Point::new(50.0, 50.0)),   // in range, closer than 11
            (16, Point::new(600.0, 0.0)),   // exactly at pursuit range
        ]
    }

    #[test]
    fn test_filters_zone_and_range_in_insertion_order() {
        let ids: Vec<_> = candidate_targets(Point::new(0.0, 0.0), field(), 1200.0, 600.0).collect();
        assert_eq!(ids, vec![11, 14, 16]);
    }

    #[test]
    fn test_zone_limit_is_inclusive() {
        let sensor = SensorModel::new(100.0, 1000.0);
        assert!(sensor.covers(Point::new(0.0, 0.0), Point::new(100.0, 0.0)));
        assert!(!sensor.covers(Point::new(0.0, 0.0), Point::new(100.1, 0.0)));
    }

    #[test]
    fn test_candidates_are_restartable() {
        let sensor = SensorModel::default();
        let scan = sensor.candidates(Point::new(0.0, 0.0), field());
        let first: Vec<_> = scan.clone().collect();
        let second: Vec<_> = scan.collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 3);
    }

    #[test]
    fn test_no_targets_yields_nothing() {
        let sensor = SensorModel::default();
        assert_eq!(sensor.candidates(Point::new(0.0, 0.0), Vec::new()).count(), 0);
    }
}
