//! Swarm Kernel: decentralized target arbitration for UAV swarms.
//!
//! This crate implements the per-agent motion model and the claim
//! arbitration protocol. Agents share nothing but best-effort claim
//! advertisements; each one decides locally, once per tick, whether to keep,
//! release or take a target, and conflicting claims converge through a
//! deterministic distance/id comparison.
//!
//! Everything here is synchronous and free of I/O. The agent process wires it
//! to a position service, a motion unit and a broadcast transport.

pub mod advert;
pub mod arbitration;
pub mod config;
pub mod geometry;
pub mod kinematics;
pub mod marker;
pub mod registry;
pub mod sensor;

pub use advert::{AdvertError, Advertisement};
pub use arbitration::{Arbiter, MotionCommand, Observation, TickOutcome, outranks};
pub use config::{Coordination, KernelConfig, LoiterConfig};
pub use geometry::{AgentId, Point, TargetId};
pub use kinematics::{LOITER_TURN_SIGN, move_on_arc, move_toward, move_vehicle};
pub use registry::{AgentRegistry, AgentTrack, Claim, TrackingMode};
pub use sensor::{SensorModel, candidate_targets};
