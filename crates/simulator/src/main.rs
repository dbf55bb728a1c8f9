//! Chainmesh simulator CLI.
//!
//! Runs a three-chain federation (PoW, PoS, PBFT) exchanging IBC traffic over
//! a simulated lossy network, writing JSONL artifacts for offline analysis.
//!
//! # Example
//!
//! ```bash
//! # Two minutes with the default seed
//! chainmesh-sim
//!
//! # Short lossy run with five competing relayers
//! chainmesh-sim -d 10 --drop-rate 0.05 --relayers 5 --seed 7
//! ```
//!
//! Exit codes: 0 success, 1 init failure, 2 start failure. SIGINT stops the
//! run early but still tears down cleanly.

use clap::Parser;
use chainmesh_simulation::{ChainConfig, ConsensusKindConfig, SimulationConfig, SimulationController};
use chainmesh_types::{ChannelId, PortId};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Chainmesh federation simulator.
///
/// Deterministic for a fixed seed modulo OS thread scheduling.
#[derive(Parser, Debug)]
#[command(name = "chainmesh-sim")]
#[command(version, about, long_about = None)]
struct Args {
    /// Run duration in seconds
    #[arg(short = 'd', long, default_value = "120")]
    duration: u64,

    /// RNG seed for transport drops and traffic generation
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Link latency in milliseconds
    #[arg(long, default_value = "50")]
    latency_ms: u64,

    /// Transport drop probability (0.0-1.0)
    #[arg(long, default_value = "0.01")]
    drop_rate: f64,

    /// Number of competing relayers
    #[arg(long, default_value = "3")]
    relayers: usize,

    /// Mean milliseconds between generated transactions
    #[arg(long, default_value = "100")]
    traffic_interval_ms: u64,

    /// Fraction of generated traffic that is IBC (0.0-1.0)
    #[arg(long, default_value = "0.3")]
    ibc_ratio: f64,

    /// Disable the continuous traffic generator
    #[arg(long)]
    no_traffic: bool,

    /// Directory for JSONL artifacts
    #[arg(long, default_value = "logs")]
    artifact_dir: PathBuf,
}

/// The reference topology: one chain per consensus kind.
fn chain_configs() -> Vec<ChainConfig> {
    let mut chain_a = ChainConfig::new("chain-A", ConsensusKindConfig::Pow);
    chain_a.node_count = 3;
    chain_a.block_time_ms = 1000;
    chain_a.pow_difficulty = 3;

    let mut chain_b = ChainConfig::new("chain-B", ConsensusKindConfig::Pos);
    chain_b.node_count = 4;
    chain_b.block_time_ms = 800;
    chain_b.validator_set_size = 4;

    let mut chain_c = ChainConfig::new("chain-C", ConsensusKindConfig::Pbft);
    chain_c.node_count = 4;
    chain_c.block_time_ms = 500;
    chain_c.pbft_fault_tolerance = 1;

    vec![chain_a, chain_b, chain_c]
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let stop_flag = Arc::new(AtomicBool::new(false));
    if let Err(e) = signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&stop_flag))
    {
        error!(error = %e, "failed to install SIGINT handler");
    }

    let sim_cfg = SimulationConfig {
        default_link_latency_ms: args.latency_ms,
        packet_drop_rate: args.drop_rate,
        run_for_ms: args.duration * 1000,
        rng_seed: args.seed,
        traffic_gen_interval_ms: args.traffic_interval_ms,
        ibc_traffic_ratio: args.ibc_ratio,
        enable_continuous_traffic: !args.no_traffic,
        relayer_count: args.relayers,
        artifact_dir: args.artifact_dir.clone(),
        ..SimulationConfig::default()
    };

    info!(
        duration_secs = args.duration,
        seed = args.seed,
        latency_ms = args.latency_ms,
        drop_rate = args.drop_rate,
        relayers = args.relayers,
        "starting simulation"
    );

    let mut controller = SimulationController::new(chain_configs(), sim_cfg);
    if let Err(e) = controller.init() {
        error!(error = %e, "simulation init failed");
        return ExitCode::from(1);
    }
    if let Err(e) = controller.start() {
        error!(error = %e, "simulation start failed");
        return ExitCode::from(2);
    }

    // One cross-chain channel between the PoW and PoS chains.
    if let Err(e) = controller.open_ibc(
        "chain-A",
        &PortId::new("port-A"),
        &ChannelId::new("channel-A"),
        "chain-B",
        &PortId::new("port-B"),
        &ChannelId::new("channel-B"),
    ) {
        error!(error = %e, "failed to open IBC channel");
    }

    controller.inject_traffic();
    info!("simulation running (press Ctrl-C to stop early)");

    let controller = Arc::new(controller);
    let runner = {
        let controller = Arc::clone(&controller);
        std::thread::spawn(move || controller.run())
    };

    // Wait for the run to complete or the user to interrupt.
    while !stop_flag.load(Ordering::Acquire) && !runner.is_finished() {
        std::thread::sleep(Duration::from_millis(200));
    }

    info!("stopping simulation");
    controller.stop();
    let _ = runner.join();
    info!("simulation stopped");
    ExitCode::SUCCESS
}
