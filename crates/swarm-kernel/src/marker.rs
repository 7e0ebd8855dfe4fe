//! Display markers: colors and icons used to annotate nodes.
//!
//! Purely cosmetic, but every position update carries one so the display
//! shows which vehicle is on which target.

use serde::{Deserialize, Serialize};

use crate::geometry::TargetId;

/// Fixed target palette, indexed by `target_id % PALETTE.len()`.
pub const PALETTE: [&str; 10] = [
    "blue", "yellow", "green", "red", "lime", "orange", "pink", "purple", "lavender", "cyan",
];

/// Color of a vehicle without a claim (and of released targets).
pub const NEUTRAL: &str = "grey";

/// Color assigned to a target.
pub fn target_color(target: TargetId) -> &'static str {
    PALETTE[target as usize % PALETTE.len()]
}

/// What a marker is drawn for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkerKind {
    Vehicle,
    Target,
}

impl MarkerKind {
    /// Icon file name for this kind in `color`.
    pub fn icon(&self, color: &str) -> String {
        match self {
            MarkerKind::Vehicle => format!("{color}_plane.png"),
            MarkerKind::Target => format!("{color}_dot.png"),
        }
    }
}
