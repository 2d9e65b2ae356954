//! zstor Benchmark Orchestrator
//!
//! Runs a parameter sweep against locally deployed zstor clusters and writes
//! a throughput report.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin orchestrator -- --conf bench_config.yaml --out report
//! ```
//!
//! The binaries `zstordb`, `etcd` and `zstorbench` must be on `PATH` unless
//! given explicitly with `--zstordb-bin`, `--etcd-bin` and `--client-bin`.

use std::time::Duration;

use anyhow::Context;
use bench_orchestrator::{
    chart::SvgRenderer,
    cli::Cli,
    cluster::{Binaries, ClusterManager, DEFAULT_POLL_INTERVAL},
    init_logging,
    report::Report,
    sweep::SweepConfig,
    BenchError, Orchestrator, RunPaths, StopFlag,
};
use clap::Parser;
use log::{error, info, warn};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose).context("cannot set up logging")?;

    info!("Starting zstor Benchmark Orchestrator");

    let stop = StopFlag::new();
    let handler_flag = stop.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        warn!("Interrupt received, stopping after the current step");
        handler_flag.trigger();
    }) {
        warn!("Failed to set interrupt handler: {e}");
    }

    let result = Binaries::resolve(&cli.zstordb_bin, &cli.etcd_bin, &cli.client_bin)
        .and_then(|binaries| {
            let sweep = SweepConfig::load(&cli.conf)?;
            let report = Report::create(&cli.out, Box::new(SvgRenderer))?;
            let cluster = ClusterManager::new(binaries, stop.clone()).with_ready_timeout(
                Duration::from_secs(cli.ready_timeout),
                DEFAULT_POLL_INTERVAL,
            );
            let paths = RunPaths {
                scenario_config: cli.scenario_config.clone(),
                result_file: cli.result_file.clone(),
            };
            Orchestrator::new(sweep, cluster, report, paths, stop.clone()).run()
        });

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) => {
            error!("Benchmarking failed: {e}");
            match e {
                BenchError::InvalidConfig(_) => {
                    error!("Please check the sweep config {}", cli.conf.display());
                }
                BenchError::ProcessFailure { .. } => {
                    error!("Please ensure zstordb, etcd and the benchmark client are installed");
                }
                BenchError::Interrupted => {
                    info!("Partial report kept in {}", cli.out.display());
                }
                _ => {}
            }
            std::process::exit(1);
        }
    };

    for failure in &outcome.failed {
        error!("Failed: {failure}");
    }
    if !outcome.is_success() {
        std::process::exit(1);
    }

    info!(
        "Report written to {}",
        cli.out.join(bench_orchestrator::report::MAIN_REPORT).display()
    );
    println!("sweep complete");
    Ok(())
}
