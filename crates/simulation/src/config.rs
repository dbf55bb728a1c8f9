//! Simulation configuration schema.

use chainmesh_consensus::{ConsensusKind, EngineConfig};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Per-chain parameters and consensus selection.
#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub chain_id: String,

    #[serde(default = "default_consensus_kind")]
    pub consensus_kind: ConsensusKindConfig,

    #[serde(default = "default_node_count")]
    pub node_count: usize,

    /// Target block cadence. Reserved: block production is driven
    /// externally, not by a runtime timer.
    #[serde(default = "default_block_time_ms")]
    pub block_time_ms: u64,

    #[serde(default = "default_pow_difficulty")]
    pub pow_difficulty: u32,

    #[serde(default = "default_validator_set_size")]
    pub validator_set_size: usize,

    #[serde(default = "default_pbft_fault_tolerance")]
    pub pbft_fault_tolerance: usize,
}

/// Serde-friendly mirror of [`ConsensusKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsensusKindConfig {
    Pow,
    Pos,
    Pbft,
}

impl From<ConsensusKindConfig> for ConsensusKind {
    fn from(kind: ConsensusKindConfig) -> ConsensusKind {
        match kind {
            ConsensusKindConfig::Pow => ConsensusKind::PoW,
            ConsensusKindConfig::Pos => ConsensusKind::PoS,
            ConsensusKindConfig::Pbft => ConsensusKind::Pbft,
        }
    }
}

impl ChainConfig {
    pub fn new(chain_id: impl Into<String>, kind: ConsensusKindConfig) -> ChainConfig {
        ChainConfig {
            chain_id: chain_id.into(),
            consensus_kind: kind,
            node_count: default_node_count(),
            block_time_ms: default_block_time_ms(),
            pow_difficulty: default_pow_difficulty(),
            validator_set_size: default_validator_set_size(),
            pbft_fault_tolerance: default_pbft_fault_tolerance(),
        }
    }

    /// The engine-facing slice of this config.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            kind: self.consensus_kind.into(),
            pow_difficulty: self.pow_difficulty,
            validator_set_size: self.validator_set_size,
            pbft_fault_tolerance: self.pbft_fault_tolerance,
        }
    }
}

fn default_consensus_kind() -> ConsensusKindConfig {
    ConsensusKindConfig::Pow
}

fn default_node_count() -> usize {
    4
}

fn default_block_time_ms() -> u64 {
    1000
}

fn default_pow_difficulty() -> u32 {
    4
}

fn default_validator_set_size() -> usize {
    4
}

fn default_pbft_fault_tolerance() -> usize {
    1
}

/// Global knobs: transport, run duration, traffic shape, logging.
#[derive(Debug, Clone, Deserialize)]
pub struct SimulationConfig {
    #[serde(default = "default_link_latency_ms")]
    pub default_link_latency_ms: u64,

    #[serde(default = "default_packet_drop_rate")]
    pub packet_drop_rate: f64,

    #[serde(default = "default_run_for_ms")]
    pub run_for_ms: u64,

    #[serde(default = "default_rng_seed")]
    pub rng_seed: u64,

    /// Mean inter-arrival time of generated traffic (Poisson process).
    #[serde(default = "default_traffic_interval_ms")]
    pub traffic_gen_interval_ms: u64,

    /// Fraction of generated traffic that is IBC rather than regular.
    #[serde(default = "default_ibc_traffic_ratio")]
    pub ibc_traffic_ratio: f64,

    #[serde(default = "default_true")]
    pub enable_continuous_traffic: bool,

    #[serde(default = "default_relayer_count")]
    pub relayer_count: usize,

    /// When true every relayer serves every chain and duplicates race; when
    /// false chains are assigned to relayers round-robin.
    #[serde(default = "default_true")]
    pub enable_relayer_competition: bool,

    #[serde(default = "default_true")]
    pub enable_transaction_logs: bool,

    #[serde(default = "default_true")]
    pub enable_ibc_event_logs: bool,

    #[serde(default = "default_true")]
    pub enable_network_drop_logs: bool,

    #[serde(default = "default_true")]
    pub enable_node_state_snapshots: bool,

    #[serde(default = "default_true")]
    pub enable_relayer_state_logs: bool,

    /// Directory receiving every JSONL artifact.
    #[serde(default = "default_artifact_dir")]
    pub artifact_dir: PathBuf,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            default_link_latency_ms: default_link_latency_ms(),
            packet_drop_rate: default_packet_drop_rate(),
            run_for_ms: default_run_for_ms(),
            rng_seed: default_rng_seed(),
            traffic_gen_interval_ms: default_traffic_interval_ms(),
            ibc_traffic_ratio: default_ibc_traffic_ratio(),
            enable_continuous_traffic: true,
            relayer_count: default_relayer_count(),
            enable_relayer_competition: true,
            enable_transaction_logs: true,
            enable_ibc_event_logs: true,
            enable_network_drop_logs: true,
            enable_node_state_snapshots: true,
            enable_relayer_state_logs: true,
            artifact_dir: default_artifact_dir(),
        }
    }
}

impl SimulationConfig {
    pub fn link_latency(&self) -> Duration {
        Duration::from_millis(self.default_link_latency_ms)
    }

    pub fn run_for(&self) -> Duration {
        Duration::from_millis(self.run_for_ms)
    }

    pub fn traffic_gen_interval(&self) -> Duration {
        Duration::from_millis(self.traffic_gen_interval_ms)
    }
}

fn default_link_latency_ms() -> u64 {
    50
}

fn default_packet_drop_rate() -> f64 {
    0.01
}

fn default_run_for_ms() -> u64 {
    120_000
}

fn default_rng_seed() -> u64 {
    42
}

fn default_traffic_interval_ms() -> u64 {
    100
}

fn default_ibc_traffic_ratio() -> f64 {
    0.3
}

fn default_relayer_count() -> usize {
    3
}

fn default_true() -> bool {
    true
}

fn default_artifact_dir() -> PathBuf {
    PathBuf::from("logs")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_values() {
        let cfg = SimulationConfig::default();
        assert_eq!(cfg.default_link_latency_ms, 50);
        assert_eq!(cfg.packet_drop_rate, 0.01);
        assert_eq!(cfg.run_for(), Duration::from_secs(120));
        assert_eq!(cfg.rng_seed, 42);
        assert_eq!(cfg.relayer_count, 3);
        assert!(cfg.enable_relayer_competition);
    }

    #[test]
    fn test_chain_config_deserializes_with_defaults() {
        let cfg: ChainConfig =
            serde_json::from_str(r#"{"chain_id": "chain-A", "consensus_kind": "pbft"}"#).unwrap();
        assert_eq!(cfg.chain_id, "chain-A");
        assert_eq!(cfg.consensus_kind, ConsensusKindConfig::Pbft);
        assert_eq!(cfg.node_count, 4);
        assert_eq!(cfg.pbft_fault_tolerance, 1);
    }

    #[test]
    fn test_engine_config_projection() {
        let mut cfg = ChainConfig::new("chain-A", ConsensusKindConfig::Pow);
        cfg.pow_difficulty = 3;
        let engine = cfg.engine_config();
        assert_eq!(engine.kind, chainmesh_consensus::ConsensusKind::PoW);
        assert_eq!(engine.pow_difficulty, 3);
    }
}
