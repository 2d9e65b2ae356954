//! zstor Benchmark Orchestrator Library
//!
//! This library sweeps benchmark parameters over a local zstor deployment.
//! For every point of the sweep it deploys a fresh cluster of data shards
//! (`zstordb`) and metadata shards (`etcd`), runs the benchmark client against
//! it, tears the cluster down again and aggregates the measured throughput
//! into a markdown report with charts.
//!
//! ## Features
//!
//! - **Parameter Sweeps**: one or two varying parameters per benchmark, typed
//!   mutation of an arbitrary YAML template
//! - **Cluster Lifecycle**: free-port allocation, readiness polling with a
//!   deadline, graceful-then-forced shutdown of every process
//! - **Reports**: throughput tables, grouped bar charts, per-interval line
//!   charts and a JSON summary
//! - **Profiling**: optional CPU, memory, trace or block profiles per point
//!
//! ## Architecture
//!
//! - `config`: typed configuration tree and YAML I/O
//! - `sweep`: benchmark descriptors and the working configuration tree
//! - `cluster`: deployment, readiness probing and teardown of server processes
//! - `scenario`: parsing and validation of benchmark client results
//! - `report`: throughput aggregation and report output
//! - `chart`: chart descriptions and the SVG renderer
//! - `orchestrator`: the control loop tying it all together
//! - `utils`: unit formatting and file helpers

pub mod chart;
pub mod cli;
pub mod cluster;
pub mod config;
pub mod orchestrator;
pub mod report;
pub mod scenario;
pub mod sweep;
pub mod types;
pub mod utils;

pub use orchestrator::{Orchestrator, RunPaths, SweepOutcome};
pub use types::{BenchError, BenchResult, StopFlag};

/// Initialize logging for the orchestrator
///
/// Logs at `Info` by default, or `Debug` when `verbose` is set. `RUST_LOG`
/// still overrides both.
pub fn init_logging(verbose: bool) -> BenchResult<()> {
    let level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    env_logger::builder()
        .filter_level(level)
        .parse_default_env()
        .format_timestamp_millis()
        .format_module_path(false)
        .format_target(false)
        .try_init()
        .map_err(|e| BenchError::Initialization(format!("Failed to initialize logging: {e}")))?;

    Ok(())
}
