//! Claim advertisements: the only message agents exchange.
//!
//! Wire format, one datagram per advertisement, ASCII, single spaces:
//!
//! ```text
//! <agent_id> <target_id> <contention_distance> <pursuing>
//! ```
//!
//! - `target_id` is `-1` when the agent holds no claim;
//! - `contention_distance` is a decimal float (`inf` when no claim);
//! - `pursuing` is `0` or `1`.
//!
//! Decoding accepts any whitespace between fields and rejects anything else.
//! The codec knows nothing about the transport carrying it.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geometry::{AgentId, TargetId};

/// Wire token for "no claim".
const NO_CLAIM: i64 = -1;

/// An agent's announcement of its current claim.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Advertisement {
    /// Sender
    pub agent: AgentId,
    /// Claimed target, if any
    pub claim: Option<TargetId>,
    /// Sender's distance to the claimed target
    pub distance: f64,
    /// Whether the sender is actively contending for the claim
    pub pursuing: bool,
}

impl Advertisement {
    /// Advertisement of an agent pursuing `target` from `distance` away.
    pub fn pursuing(agent: AgentId, target: TargetId, distance: f64) -> Self {
        Self {
            agent,
            claim: Some(target),
            distance,
            pursuing: true,
        }
    }

    /// Advertisement of an agent holding no claim.
    pub fn idle(agent: AgentId) -> Self {
        Self {
            agent,
            claim: None,
            distance: f64::INFINITY,
            pursuing: false,
        }
    }

    /// Encode into the wire text.
    pub fn encode(&self) -> String {
        self.to_string()
    }

    /// Decode a received datagram.
    pub fn decode(bytes: &[u8]) -> Result<Self, AdvertError> {
        let text = std::str::from_utf8(bytes).map_err(|_| AdvertError::NotUtf8)?;
        text.parse()
    }
}

impl fmt::Display for Advertisement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let target = self.claim.map(i64::from).unwrap_or(NO_CLAIM);
        write!(
            f,
            "{} {} {} {}",
            self.agent,
            target,
            self.distance,
            u8::from(self.pursuing)
        )
    }
}

/// Reasons a datagram is not a valid advertisement.
#[derive(Debug, Error, PartialEq)]
pub enum AdvertError {
    #[error("advertisement is not valid UTF-8")]
    NotUtf8,
    #[error("expected 4 fields, found {0}")]
    FieldCount(usize),
    #[error("invalid agent id {0:?}")]
    AgentId(String),
    #[error("invalid target id {0:?}")]
    TargetId(String),
    #[error("invalid contention distance {0:?}")]
    Distance(String),
    #[error("invalid pursuing flag {0:?}")]
    Pursuing(String),
}

impl FromStr for Advertisement {
    type Err = AdvertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.split_whitespace().collect();
        let &[agent, target, distance, pursuing] = fields.as_slice() else {
            return Err(AdvertError::FieldCount(fields.len()));
        };

        let agent: AgentId = agent
            .parse()
            .map_err(|_| AdvertError::AgentId(agent.to_string()))?;

        let claim = match target.parse::<i64>() {
            Ok(NO_CLAIM) => None,
            Ok(id) => Some(
                TargetId::try_from(id).map_err(|_| AdvertError::TargetId(target.to_string()))?,
            ),
            Err(_) => return Err(AdvertError::TargetId(target.to_string())),
        };

        let distance: f64 = distance
            .parse()
            .ok()
            .filter(|d: &f64| !d.is_nan() && *d >= 0.0)
            .ok_or_else(|| AdvertError::Distance(distance.to_string()))?;

        let pursuing = match pursuing {
            "0" => false,
            "1" => true,
            other => return Err(AdvertError::Pursuing(other.to_string())),
        };

        Ok(Self {
            agent,
            claim,
            distance,
            pursuing,
        })
    }
}
