//! Simulation wiring and lifecycle.
//!
//! [`SimulationController`] owns every collaborator — bus, journal, metrics,
//! transport, chains, nodes, relayers, and the optional traffic generator —
//! and tears them down in reverse order on [`SimulationController::stop`].
//!
//! Configuration comes in two layers: one [`ChainConfig`] per chain
//! (consensus kind and knobs, node count) and a global [`SimulationConfig`]
//! (link parameters, run duration, traffic shape, logging toggles).

mod config;
mod controller;
mod traffic;

pub use config::{ChainConfig, ConsensusKindConfig, SimulationConfig};
pub use controller::SimulationController;
