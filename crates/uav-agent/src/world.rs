//! Position & annotation service: the oracle for node positions and the
//! display markers drawn for them.
//!
//! Vehicles and targets share one node id space. [`SimWorld`] is the
//! in-memory implementation used by the simulation and the tests; the HTTP
//! client lives in [`crate::http_world`].

use anyhow::{Context, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use rand::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::trace;

use swarm_kernel::marker::MarkerKind;
use swarm_kernel::{Point, TargetId};

/// Identifier of any node (vehicle or target).
pub type NodeId = u32;

#[async_trait]
pub trait PositionService: Send + Sync {
    /// Fail when there is no simulation session to work in.
    async fn check_session(&self) -> Result<()>;

    async fn position(&self, node: NodeId) -> Result<Point>;

    async fn set_position(&self, node: NodeId, position: Point) -> Result<()>;

    /// Annotate a node with a colored marker.
    async fn set_marker(&self, node: NodeId, color: &str, kind: MarkerKind) -> Result<()>;
}

/// Live positions of `targets`, in roster order.
pub async fn target_positions(
    world: &dyn PositionService,
    targets: &[TargetId],
) -> Result<Vec<(TargetId, Point)>> {
    let mut positions = Vec::with_capacity(targets.len());
    for &target in targets {
        let position = world
            .position(target)
            .await
            .with_context(|| format!("Failed to read position of target {}", target))?;
        positions.push((target, position));
    }
    Ok(positions)
}

/// A marker as last set on a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Marker {
    pub color: String,
    pub kind: MarkerKind,
}

#[derive(Debug, Clone, PartialEq)]
struct Node {
    position: Point,
    marker: Option<Marker>,
}

/// In-memory world backed by a concurrent map.
#[derive(Debug, Default)]
pub struct SimWorld {
    nodes: DashMap<NodeId, Node>,
}

impl SimWorld {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node, or move an existing one.
    pub fn insert(&self, node: NodeId, position: Point) {
        self.nodes
            .entry(node)
            .and_modify(|n| n.position = position)
            .or_insert(Node {
                position,
                marker: None,
            });
    }

    pub fn remove(&self, node: NodeId) -> bool {
        self.nodes.remove(&node).is_some()
    }

    pub fn get(&self, node: NodeId) -> Option<Point> {
        self.nodes.get(&node).map(|n| n.position)
    }

    pub fn marker(&self, node: NodeId) -> Option<Marker> {
        self.nodes.get(&node).and_then(|n| n.marker.clone())
    }

    /// Move each of `nodes` by a random offset of at most `max_step` per axis.
    ///
    /// Nodes are visited in the given order so a seeded `rng` reproduces the
    /// same walk.
    pub fn random_walk<R: Rng>(&self, nodes: &[NodeId], max_step: f64, rng: &mut R) {
        if max_step <= 0.0 {
            return;
        }
        for id in nodes {
            if let Some(mut node) = self.nodes.get_mut(id) {
                let dx = rng.random_range(-max_step..=max_step);
                let dy = rng.random_range(-max_step..=max_step);
                node.position = Point::new(node.position.x + dx, node.position.y + dy);
                trace!(node = id, position = %node.position, "Target moved");
            }
        }
    }
}

#[async_trait]
impl PositionService for SimWorld {
    async fn check_session(&self) -> Result<()> {
        anyhow::ensure!(!self.nodes.is_empty(), "No simulation session: world has no nodes");
        Ok(())
    }

    async fn position(&self, node: NodeId) -> Result<Point> {
        self.get(node).with_context(|| format!("Unknown node {}", node))
    }

    async fn set_position(&self, node: NodeId, position: Point) -> Result<()> {
        let mut entry = self
            .nodes
            .get_mut(&node)
            .with_context(|| format!("Unknown node {}", node))?;
        entry.position = position;
        Ok(())
    }

    async fn set_marker(&self, node: NodeId, color: &str, kind: MarkerKind) -> Result<()> {
        let mut entry = self
            .nodes
            .get_mut(&node)
            .with_context(|| format!("Unknown node {}", node))?;
        entry.marker = Some(Marker {
            color: color.to_string(),
            kind,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;

    #[tokio::test]
    async fn test_positions_and_markers() {
        let world = SimWorld::new();
        world.insert(1, Point::new(1.0, 2.0));
        world.insert(11, Point::new(10.0, 20.0));

        assert_eq!(world.position(11).await.unwrap(), Point::new(10.0, 20.0));
        world.set_position(1, Point::new(3.0, 4.0)).await.unwrap();
        assert_eq!(world.get(1), Some(Point::new(3.0, 4.0)));

        world.set_marker(1, "grey", MarkerKind::Vehicle).await.unwrap();
        assert_eq!(
            world.marker(1),
            Some(Marker {
                color: "grey".to_string(),
                kind: MarkerKind::Vehicle
            })
        );

        // Moving an existing node keeps its marker.
        world.insert(1, Point::new(0.0, 0.0));
        assert!(world.marker(1).is_some());
    }

    #[tokio::test]
    async fn test_unknown_node_is_an_error() {
        let world = SimWorld::new();
        assert!(world.check_session().await.is_err());
        assert!(world.position(42).await.is_err());
        assert!(world.set_position(42, Point::default()).await.is_err());
        assert!(world.set_marker(42, "red", MarkerKind::Target).await.is_err());
    }

    #[tokio::test]
    async fn test_target_positions_in_roster_order() {
        let world = SimWorld::new();
        world.insert(12, Point::new(2.0, 0.0));
        world.insert(11, Point::new(1.0, 0.0));

        let positions = target_positions(&world, &[12, 11]).await.unwrap();
        assert_eq!(
            positions,
            vec![(12, Point::new(2.0, 0.0)), (11, Point::new(1.0, 0.0))]
        );
        assert!(target_positions(&world, &[13]).await.is_err());
    }

    #[test]
    fn test_random_walk_is_reproducible_and_bounded() {
        let walk = |seed| {
            let world = SimWorld::new();
            world.insert(11, Point::new(100.0, 100.0));
            world.insert(12, Point::new(200.0, 200.0));
            let mut rng = StdRng::seed_from_u64(seed);
            for _ in 0..10 {
                world.random_walk(&[11, 12], 2.0, &mut rng);
            }
            (world.get(11).unwrap(), world.get(12).unwrap())
        };

        let (a, b) = walk(7);
        assert_eq!((a, b), walk(7));
        assert!((a.x - 100.0).abs() <= 20.0 && (a.y - 100.0).abs() <= 20.0);
        assert!((b.x - 200.0).abs() <= 20.0 && (b.y - 200.0).abs() <= 20.0);
    }
}
