//! Sweep control loop
//!
//! Drives one benchmark descriptor at a time: for every value of the second
//! parameter a new throughput bucket is opened, and for every value of the
//! prime parameter the working tree is mutated, a fresh cluster is deployed,
//! the benchmark client is run against it and the result is ingested. Points
//! run strictly one after another since every cluster draws from the same
//! local port range.
//!
//! A failing point aborts its descriptor only. The working tree is restored
//! and the loop moves on to the next descriptor. Operator interrupts and
//! report I/O failures stop the whole sweep.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use log::{error, info, warn};

use crate::{
    cluster::{ClusterHandle, ClusterManager},
    config::Scalar,
    report::{Aggregator, Report},
    scenario::ScenarioResult,
    sweep::{BenchmarkPair, ProfileDirs, ProfileMode, SweepConfig},
    types::{BenchResult, StopFlag},
};

/// Files exchanged with the benchmark client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPaths {
    /// Scenario config written before every client run
    pub scenario_config: PathBuf,
    /// Result file the client writes
    pub result_file: PathBuf,
}

impl Default for RunPaths {
    fn default() -> Self {
        Self {
            scenario_config: PathBuf::from("scenarios_config.yaml"),
            result_file: PathBuf::from("benchmark_result.yaml"),
        }
    }
}

/// Summary of a finished sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    pub completed: usize,
    /// One line per failed descriptor
    pub failed: Vec<String>,
}

impl SweepOutcome {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct Orchestrator {
    sweep: SweepConfig,
    cluster: ClusterManager,
    report: Report,
    paths: RunPaths,
    stop: StopFlag,
    /// Coordinates of the configuration point being run
    point: Option<String>,
}

impl Orchestrator {
    pub fn new(
        sweep: SweepConfig,
        cluster: ClusterManager,
        report: Report,
        paths: RunPaths,
        stop: StopFlag,
    ) -> Self {
        Self {
            sweep,
            cluster,
            report,
            paths,
            stop,
            point: None,
        }
    }

    /// Runs every descriptor of the sweep
    ///
    /// # Errors
    ///
    /// Returns only errors that stop the whole sweep (see
    /// [`BenchError::aborts_sweep`](crate::types::BenchError::aborts_sweep));
    /// descriptor failures are collected in the outcome.
    pub fn run(&mut self) -> BenchResult<SweepOutcome> {
        let descriptors: Vec<_> = self.sweep.descriptors().collect();
        let mut outcome = SweepOutcome::default();

        for (n, descriptor) in descriptors.into_iter().enumerate() {
            self.stop.check()?;

            self.point = None;
            let result = descriptor.and_then(|pair| self.run_descriptor(&pair));
            self.sweep.restore();
            let at = self
                .point
                .take()
                .map(|point| format!(" at {point}"))
                .unwrap_or_default();

            match result {
                Ok(()) => outcome.completed += 1,
                Err(e) if e.aborts_sweep() => {
                    error!("Sweep aborted during benchmark {n}{at}: {e}");
                    return Err(e);
                }
                Err(e) => {
                    error!("Benchmark {n} failed{at}: {e}");
                    outcome.failed.push(format!("benchmark {n}{at}: {e}"));
                }
            }
        }

        info!(
            "Sweep finished: {} benchmark(s) completed, {} failed",
            outcome.completed,
            outcome.failed.len()
        );
        Ok(outcome)
    }

    fn run_descriptor(&mut self, pair: &BenchmarkPair) -> BenchResult<()> {
        info!(
            "Benchmark: prime {} x {} value(s), second {} x {} value(s)",
            display_name(&pair.prime.name()),
            pair.prime.range.len(),
            display_name(&pair.second.name()),
            pair.second.range.len()
        );
        let mut aggregator = Aggregator::new(pair.clone());

        for second in &pair.second.range {
            aggregator.new_bucket();
            self.point = Some(coordinates(pair, second, None));
            if let Some(id) = &pair.second.id {
                self.sweep.mutate(id, second)?;
            }

            for prime in &pair.prime.range {
                self.point = Some(coordinates(pair, second, Some(prime)));
                if let Some(id) = &pair.prime.id {
                    self.sweep.mutate(id, prime)?;
                }

                let result = self.run_point()?;
                aggregator.ingest(&result)?;
                self.report.add_timeplot(&result)?;
            }
        }

        self.point = None;
        self.report.add_aggregation(&aggregator)
    }

    /// Deploys a cluster for the current working tree and benchmarks it once
    fn run_point(&mut self) -> BenchResult<ScenarioResult> {
        self.stop.check()?;

        let profile_dirs = self.sweep.new_profile_dir(self.report.dir())?;
        let profile = self.sweep.profile().zip(profile_dirs.as_ref());
        let spec = self.sweep.deployment()?;

        let mut cluster = self.cluster.deploy(&spec, profile)?;
        let run = self.benchmark_cluster(&mut cluster, profile);
        cluster.teardown();
        self.sweep.clear_endpoints();
        run?;

        ScenarioResult::load(&self.paths.result_file)
    }

    fn benchmark_cluster(
        &mut self,
        cluster: &mut ClusterHandle,
        profile: Option<(ProfileMode, &ProfileDirs)>,
    ) -> BenchResult<()> {
        self.cluster.await_ready(cluster)?;
        self.sweep
            .record_endpoints(&cluster.data_endpoints(), &cluster.meta_endpoints());
        self.sweep.save(&self.paths.scenario_config)?;

        remove_stale(&self.paths.result_file)?;
        self.stop.check()?;

        let run = self.cluster.run_client(
            &self.paths.scenario_config,
            &self.paths.result_file,
            profile,
        )?;
        if !run.status.success() && !self.paths.result_file.exists() {
            warn!("Benchmark client wrote no result file");
        }
        Ok(())
    }
}

/// Describes a configuration point as `id = value` pairs, second parameter first
fn coordinates(pair: &BenchmarkPair, second: &Scalar, prime: Option<&Scalar>) -> String {
    let mut parts = Vec::new();
    if let Some(id) = &pair.second.id {
        parts.push(format!("{id} = {second}"));
    }
    if let (Some(id), Some(value)) = (&pair.prime.id, prime) {
        parts.push(format!("{id} = {value}"));
    }
    if parts.is_empty() {
        "the unmodified template".to_string()
    } else {
        parts.join(", ")
    }
}

fn display_name(name: &str) -> &str {
    if name.is_empty() {
        "<none>"
    } else {
        name
    }
}

/// Removes a result file left over from an earlier run
fn remove_stale(path: &Path) -> BenchResult<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        chart::SvgRenderer,
        cluster::{Binaries, PortProbe, Program},
        config::ConfigValue,
        report::{MAIN_REPORT, SUMMARY_FILE},
        types::BenchError,
    };

    struct AlwaysUp;

    impl PortProbe for AlwaysUp {
        fn is_listening(&self, _endpoint: &str) -> bool {
            true
        }
    }

    struct NeverUp;

    impl PortProbe for NeverUp {
        fn is_listening(&self, _endpoint: &str) -> bool {
            false
        }
    }

    // Turns the scenario config into a result with one record of 10 ops in 1s
    const CLIENT: &str = r#"
while [ $# -gt 0 ]; do
  case "$1" in
    --conf) conf="$2"; shift ;;
    --out-benchmark) out="$2"; shift ;;
  esac
  shift
done
{
  echo "scenarios:"
  echo "  bench:"
  tail -n +2 "$conf" | sed 's/^/  /'
  echo "    results:"
  echo "      - {duration: 1.0, count: 10}"
} > "$out"
echo run >> "$(dirname "$out")/runs"
"#;

    fn sh(script: &str, name: &str) -> Program {
        Program::new("sh").with_args(["-c", script, name])
    }

    fn manager(probe: Box<dyn PortProbe>, stop: StopFlag) -> ClusterManager {
        let binaries = Binaries {
            zstordb: sh("exec sleep 30", "zstordb"),
            etcd: sh("exec sleep 30", "etcd"),
            client: sh(CLIENT, "client"),
        };
        ClusterManager::new(binaries, stop)
            .with_probe(probe)
            .with_ready_timeout(Duration::from_millis(200), Duration::from_millis(20))
            .with_stop_grace(Duration::from_millis(200))
    }

    fn sweep(yaml: &str) -> SweepConfig {
        SweepConfig::from_config(serde_yaml::from_str::<ConfigValue>(yaml).unwrap()).unwrap()
    }

    fn orchestrator(
        dir: &Path,
        yaml: &str,
        probe: Box<dyn PortProbe>,
        stop: StopFlag,
    ) -> Orchestrator {
        let report = Report::create(dir.join("report"), Box::new(SvgRenderer)).unwrap();
        let paths = RunPaths {
            scenario_config: dir.join("scenarios_config.yaml"),
            result_file: dir.join("benchmark_result.yaml"),
        };
        Orchestrator::new(sweep(yaml), manager(probe, stop.clone()), report, paths, stop)
    }

    const SWEEP: &str = r#"
template:
  zstor:
    datastor:
      pipeline:
        distribution: {data_shards: 1, parity_shards: 0}
    metastor:
      meta_shards_nr: 1
  benchmark:
    value_size: 100
    clients: 1
benchmarks:
  - prime_parameter:
      id: value_size
      range: [100, 200]
"#;

    #[test]
    fn test_sweep_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let mut orch = orchestrator(dir.path(), SWEEP, Box::new(AlwaysUp), StopFlag::new());

        let outcome = orch.run().unwrap();

        assert!(outcome.is_success(), "{:?}", outcome.failed);
        assert_eq!(outcome.completed, 1);
        let main = fs::read_to_string(dir.path().join("report").join(MAIN_REPORT)).unwrap();
        assert!(main.contains("| 100 B | 1000.00 B/s |"));
        assert!(main.contains("| 200 B | 1.95 KiB/s |"));
        assert!(dir.path().join("report").join("fig0.svg").exists());
        assert!(dir.path().join("report").join(SUMMARY_FILE).exists());

        // the working tree is back to the baseline, endpoints included
        assert_eq!(orch.sweep.template(), orch.sweep.baseline());
    }

    #[test]
    fn test_scenario_config_carries_endpoints() {
        let dir = tempfile::tempdir().unwrap();
        let mut orch = orchestrator(dir.path(), SWEEP, Box::new(AlwaysUp), StopFlag::new());
        orch.run().unwrap();

        let saved = crate::config::load_yaml_file(dir.path().join("scenarios_config.yaml")).unwrap();
        let shards = saved
            .as_mapping()
            .and_then(|m| m.get_path(&["scenarios", "scenario", "zstor", "datastor", "shards"]))
            .and_then(ConfigValue::as_sequence)
            .unwrap();
        assert_eq!(shards.len(), 1);
    }

    #[test]
    fn test_bad_descriptor_does_not_stop_sweep() {
        let yaml = format!("{SWEEP}  - prime_parameter: {{id: no_such_key, range: [1]}}\n");
        let yaml = yaml.replace(
            "benchmarks:\n",
            "benchmarks:\n  - prime_parameter: {id: not_allowed_param, range: [1]}\n",
        );
        let dir = tempfile::tempdir().unwrap();
        let mut orch = orchestrator(dir.path(), &yaml, Box::new(AlwaysUp), StopFlag::new());

        let outcome = orch.run().unwrap();

        assert_eq!(outcome.completed, 1);
        assert_eq!(outcome.failed.len(), 2);
        assert!(!outcome.is_success());
    }

    #[test]
    fn test_deployment_timeout_fails_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        let mut orch = orchestrator(dir.path(), SWEEP, Box::new(NeverUp), StopFlag::new());

        let outcome = orch.run().unwrap();

        assert_eq!(outcome.completed, 0);
        assert!(outcome.failed[0].contains("Deployment timeout"));
        assert!(outcome.failed[0].starts_with("benchmark 0 at value_size = 100:"));
        assert!(!dir.path().join("benchmark_result.yaml").exists());
    }

    #[test]
    fn test_interrupt_stops_sweep() {
        let dir = tempfile::tempdir().unwrap();
        let stop = StopFlag::new();
        let mut orch = orchestrator(dir.path(), SWEEP, Box::new(AlwaysUp), stop.clone());
        stop.trigger();

        assert!(matches!(orch.run(), Err(BenchError::Interrupted)));
    }

    #[test]
    fn test_no_descriptors_runs_template_once() {
        let yaml = SWEEP
            .split("benchmarks:")
            .next()
            .unwrap()
            .to_string();
        let dir = tempfile::tempdir().unwrap();
        let mut orch = orchestrator(dir.path(), &yaml, Box::new(AlwaysUp), StopFlag::new());

        let outcome = orch.run().unwrap();

        assert!(outcome.is_success(), "{:?}", outcome.failed);
        assert_eq!(outcome.completed, 1);
        let runs = fs::read_to_string(dir.path().join("runs")).unwrap();
        assert_eq!(runs.lines().count(), 1);

        let main = fs::read_to_string(dir.path().join("report").join(MAIN_REPORT)).unwrap();
        let rows: Vec<&str> = main.lines().filter(|l| l.ends_with("B/s |")).collect();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].contains("1000.00 B/s"));
        assert!(!dir.path().join("report").join("fig0.svg").exists());
    }

    #[test]
    fn test_coordinates() {
        let pair = BenchmarkPair::new(
            crate::sweep::Benchmark::new(
                crate::sweep::ParameterId::Flat("value_size".into()),
                vec![Scalar::Int(128)],
            )
            .unwrap(),
            crate::sweep::Benchmark::new(
                crate::sweep::ParameterId::Flat("clients".into()),
                vec![Scalar::Int(2)],
            )
            .unwrap(),
        )
        .unwrap();
        assert_eq!(coordinates(&pair, &Scalar::Int(2), None), "clients = 2");
        assert_eq!(
            coordinates(&pair, &Scalar::Int(2), Some(&Scalar::Int(128))),
            "clients = 2, value_size = 128"
        );
        assert_eq!(
            coordinates(&BenchmarkPair::default(), &Scalar::Str(" ".into()), Some(&Scalar::Str(" ".into()))),
            "the unmodified template"
        );
    }

    #[test]
    fn test_remove_stale() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("old.yaml");
        remove_stale(&file).unwrap();
        fs::write(&file, "stale").unwrap();
        remove_stale(&file).unwrap();
        assert!(!file.exists());
    }
}
