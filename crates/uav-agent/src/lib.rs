//! UAV agent: runs the swarm kernel against a live or simulated world.
//!
//! This crate wires the arbitration kernel to its collaborators:
//! - a position & annotation service (in-memory or HTTP)
//! - a motion unit that flies the vehicle, reachable in-process or over RPC
//! - an advertisement transport (UDP multicast or an in-process bus)
//!
//! and runs the planner loop on top of them, either for one agent process or
//! for a whole simulated fleet.

pub mod config;
pub mod http_world;
pub mod motion;
pub mod planner;
pub mod results;
pub mod rpc;
pub mod simulation;
pub mod transport;
pub mod world;
