//! Benchmark result parsing
//!
//! The benchmark client writes one YAML document per run. It holds a
//! `scenarios` mapping with exactly one named scenario, and that scenario
//! carries the configuration the client actually ran plus one record per
//! benchmarked operation.
//!
//! ```yaml
//! scenarios:
//!   bench_1:
//!     scenario:
//!       zstor: { ... }
//!       benchmark:
//!         value_size: 128
//!         result_output: per_second
//!     results:
//!       - duration: 10.2
//!         count: 1000
//!         perinterval: [98, 101, 99]
//! ```

use std::{fmt, fs, io, path::Path, str::FromStr};

use crate::{
    config::{ConfigMap, ConfigValue, Scalar},
    types::{BenchError, BenchResult},
};

/// Keys stripped from a result configuration before it is written to a report
pub const FILTER_KEYS: &[&str] = &[
    "organization",
    "namespace",
    "iyo",
    "shards",
    "db",
    "hashing",
    "metastor",
    "datastor",
    "tls",
];

/// Aggregation unit of the per-interval operation counts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    PerSecond,
    PerMinute,
    PerHour,
}

impl TimeUnit {
    /// Length of one interval in seconds
    pub const fn seconds(self) -> u64 {
        match self {
            Self::PerSecond => 1,
            Self::PerMinute => 60,
            Self::PerHour => 3600,
        }
    }

    /// Unit name used in chart axis labels
    pub const fn label(self) -> &'static str {
        match self {
            Self::PerSecond => "second",
            Self::PerMinute => "minute",
            Self::PerHour => "hour",
        }
    }
}

impl FromStr for TimeUnit {
    type Err = BenchError;

    fn from_str(s: &str) -> BenchResult<Self> {
        match s {
            "per_second" => Ok(Self::PerSecond),
            "per_minute" => Ok(Self::PerMinute),
            "per_hour" => Ok(Self::PerHour),
            other => Err(BenchError::InvalidResult(format!(
                "unsupported result_output '{other}'"
            ))),
        }
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "per_{}", self.label())
    }
}

/// One per-operation record of a benchmark run
#[derive(Debug, Clone, PartialEq)]
pub struct OperationRecord {
    fields: ConfigMap,
    per_interval: Vec<u64>,
}

impl OperationRecord {
    fn from_config(value: &ConfigValue, keep_intervals: bool) -> BenchResult<Self> {
        let fields = value
            .as_mapping()
            .cloned()
            .ok_or_else(|| BenchError::InvalidResult("result record is not a mapping".into()))?;

        let mut per_interval = Vec::new();
        if keep_intervals {
            if let Some(samples) = fields.get("perinterval").and_then(ConfigValue::as_sequence) {
                for sample in samples {
                    let count = sample
                        .as_scalar()
                        .and_then(Scalar::as_i64)
                        .and_then(|v| u64::try_from(v).ok())
                        .ok_or_else(|| {
                            BenchError::InvalidResult(format!(
                                "perinterval sample {sample:?} is not a count"
                            ))
                        })?;
                    per_interval.push(count);
                }
            }
        }

        Ok(Self {
            fields,
            per_interval,
        })
    }

    fn number(&self, key: &str) -> BenchResult<f64> {
        self.fields
            .get(key)
            .and_then(ConfigValue::as_scalar)
            .and_then(Scalar::as_f64)
            .ok_or_else(|| {
                BenchError::InvalidResult(format!("'{key}' is missing or not numeric"))
            })
    }

    /// Wall-clock duration of the operation in seconds
    pub fn duration(&self) -> BenchResult<f64> {
        let duration = self.number("duration")?;
        if duration > 0.0 && duration.is_finite() {
            Ok(duration)
        } else {
            Err(BenchError::InvalidResult(format!(
                "duration must be positive, got {duration}"
            )))
        }
    }

    /// Number of operations completed
    pub fn count(&self) -> BenchResult<f64> {
        self.number("count")
    }

    /// Operation counts per aggregation interval
    ///
    /// Empty when the result carries no supported aggregation unit.
    pub fn per_interval(&self) -> &[u64] {
        &self.per_interval
    }

    fn to_config(&self) -> ConfigValue {
        let mut fields = self.fields.clone();
        let samples = self
            .per_interval
            .iter()
            .map(|&v| ConfigValue::Scalar(Scalar::Int(i64::try_from(v).unwrap_or(i64::MAX))))
            .collect();
        fields.insert("perinterval", ConfigValue::Sequence(samples));
        fields.into()
    }
}

/// Validated output of one benchmark client invocation
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioResult {
    name: String,
    config: ConfigMap,
    records: Vec<OperationRecord>,
    time_unit: Option<TimeUnit>,
}

impl ScenarioResult {
    /// Reads and validates the result file written by the benchmark client
    ///
    /// # Errors
    ///
    /// A missing or unparseable file and any validation failure are reported
    /// as `InvalidResult`, since both mean the run produced nothing usable.
    pub fn load<P: AsRef<Path>>(path: P) -> BenchResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => BenchError::InvalidResult(format!(
                "result file {} was not written",
                path.display()
            )),
            _ => BenchError::Io(e),
        })?;
        let root: ConfigValue = serde_yaml::from_str(&content).map_err(|e| {
            BenchError::InvalidResult(format!("result file {} is not YAML: {e}", path.display()))
        })?;
        Self::from_config(&root)
    }

    /// Validates an already parsed result document
    pub fn from_config(root: &ConfigValue) -> BenchResult<Self> {
        let scenarios = root
            .as_mapping()
            .and_then(|m| m.get("scenarios"))
            .and_then(ConfigValue::as_mapping)
            .ok_or_else(|| BenchError::InvalidResult("'scenarios' is missing".into()))?;

        let mut entries = scenarios.iter();
        let (name, scenario) = match (entries.next(), entries.next()) {
            (Some(only), None) => only,
            _ => {
                return Err(BenchError::InvalidResult(
                    "output for exactly one scenario is expected".into(),
                ))
            }
        };
        let scenario = scenario.as_mapping().ok_or_else(|| {
            BenchError::InvalidResult(format!("scenario '{name}' is not a mapping"))
        })?;

        if let Some(err) = scenario.get("error").filter(|e| e.is_truthy()) {
            let message = match err {
                ConfigValue::Scalar(s) => s.to_string(),
                other => format!("{other:?}"),
            };
            return Err(BenchError::InvalidResult(format!(
                "benchmark exited with error: {message}"
            )));
        }

        let config = required_mapping(scenario, "scenario", "scenario config")?;
        required_mapping(config, "zstor", "zstor config")?;
        let bench = required_mapping(config, "benchmark", "benchmark config")?;

        let time_unit = match bench.get("result_output").and_then(ConfigValue::as_scalar) {
            Some(Scalar::Str(unit)) => unit.parse().ok(),
            _ => None,
        };
        if time_unit.is_none() {
            log::debug!("No supported result_output in '{name}', dropping per-interval samples");
        }

        let records = scenario
            .get("results")
            .and_then(ConfigValue::as_sequence)
            .filter(|r| !r.is_empty())
            .ok_or_else(|| BenchError::InvalidResult("results are missing".into()))?
            .iter()
            .map(|r| OperationRecord::from_config(r, time_unit.is_some()))
            .collect::<BenchResult<Vec<_>>>()?;

        Ok(Self {
            name: name.to_string(),
            config: config.clone(),
            records,
            time_unit,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configuration the client ran with
    pub const fn config(&self) -> &ConfigMap {
        &self.config
    }

    pub fn records(&self) -> &[OperationRecord] {
        &self.records
    }

    pub const fn time_unit(&self) -> Option<TimeUnit> {
        self.time_unit
    }

    /// Size in bytes of each value written or read by the client
    pub fn value_size(&self) -> BenchResult<f64> {
        self.config
            .get_path(&["benchmark", "value_size"])
            .and_then(ConfigValue::as_scalar)
            .and_then(Scalar::as_f64)
            .ok_or_else(|| {
                BenchError::InvalidResult("'value_size' is missing or not numeric".into())
            })
    }

    /// Configuration with deployment details stripped, for report output
    #[must_use]
    pub fn filtered_config(&self) -> ConfigMap {
        let mut config = self.config.clone();
        config.filter_keys(FILTER_KEYS);
        config
    }

    /// Filtered configuration together with the raw result records
    #[must_use]
    pub fn report_dump(&self) -> ConfigValue {
        let mut dump = ConfigMap::new();
        dump.insert("scenario", self.filtered_config());
        dump.insert(
            "results",
            ConfigValue::Sequence(self.records.iter().map(OperationRecord::to_config).collect()),
        );
        dump.into()
    }
}

fn required_mapping<'a>(map: &'a ConfigMap, key: &str, what: &str) -> BenchResult<&'a ConfigMap> {
    map.get(key)
        .filter(|v| v.is_truthy())
        .and_then(ConfigValue::as_mapping)
        .ok_or_else(|| BenchError::InvalidResult(format!("{what} is missing")))
}
