//! Plane geometry and identifier types shared by every component.

use serde::{Deserialize, Serialize};

/// Unique identifier of an agent (a UAV node). Assigned externally.
pub type AgentId = u32;

/// Unique identifier of a target node.
pub type TargetId = u32;

/// A position on the simulation plane.
///
/// The plane uses display coordinates: X grows to the right and Y grows
/// downwards. This matters for the loiter direction, see
/// [`crate::kinematics::LOITER_TURN_SIGN`].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to `other`.
    pub fn distance(&self, other: &Point) -> f64 {
        (other.x - self.x).hypot(other.y - self.y)
    }

    /// Point at fraction `t` of the segment from `self` to `other`.
    pub fn lerp(&self, other: &Point, t: f64) -> Point {
        Point {
            x: self.x + (other.x - self.x) * t,
            y: self.y + (other.y - self.y) * t,
        }
    }
}

impl std::fmt::Display for Point {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.1}, {:.1})", self.x, self.y)
    }
}
