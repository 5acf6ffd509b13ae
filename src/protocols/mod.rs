//! Protocol implementations.
//!
//! - `swarm`: control messages and chunk transfer between swarm peers

pub mod swarm;
