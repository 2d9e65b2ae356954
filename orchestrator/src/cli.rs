//! Command-line interface definitions for the benchmark orchestrator

use std::path::PathBuf;

use clap::Parser;

/// zstor Benchmark Orchestrator
///
/// Controls the benchmarking process, aggregating results and producing a report.
#[derive(Parser, Debug)]
#[command(
    version,
    about = "zstor Benchmark Orchestrator - parameter sweeps over a local zstor cluster",
    long_about = "
The orchestrator reads a sweep config holding a zstor/benchmark template and a
list of benchmarks. Each benchmark varies a prime parameter and optionally a
second parameter. For every combination a fresh local cluster is deployed,
the benchmark client is run once and the throughput is collected.

Results are written as a markdown report with charts to the output directory.
"
)]
pub struct Cli {
    /// Path to the sweep config file (YAML)
    #[arg(short = 'C', long, default_value = "bench_config.yaml", value_name = "FILE")]
    pub conf: PathBuf,

    /// Directory where the benchmark report is written
    #[arg(long, default_value = "report", value_name = "DIR")]
    pub out: PathBuf,

    /// Scenario config handed to the benchmark client on every run
    #[arg(long, default_value = "scenarios_config.yaml", value_name = "FILE")]
    pub scenario_config: PathBuf,

    /// Result file written by the benchmark client
    #[arg(long, default_value = "benchmark_result.yaml", value_name = "FILE")]
    pub result_file: PathBuf,

    /// Seconds to wait for all servers to accept connections
    #[arg(long, default_value = "20", value_name = "SECONDS")]
    pub ready_timeout: u64,

    /// Data-shard server binary
    #[arg(long, default_value = "zstordb", value_name = "BIN")]
    pub zstordb_bin: String,

    /// Metadata-shard server binary
    #[arg(long, default_value = "etcd", value_name = "BIN")]
    pub etcd_bin: String,

    /// Benchmark client binary
    #[arg(long, default_value = "zstorbench", value_name = "BIN")]
    pub client_bin: String,

    /// Log at debug level
    #[arg(short, long)]
    pub verbose: bool,
}
