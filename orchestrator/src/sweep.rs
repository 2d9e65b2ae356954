//! Parameter Sweep Engine
//!
//! Owns the baseline configuration tree loaded from the sweep file and hands
//! out benchmark descriptors. For each descriptor the orchestrator mutates a
//! working copy of the tree one parameter at a time and restores it from the
//! baseline before moving on, so mutations never leak between descriptors.
//!
//! ## Sweep file layout
//!
//! ```yaml
//! template:            # baseline scenario tree
//!   zstor: { ... }
//!   benchmark: { zstordb_jobs: 0, value_size: 1024, ... }
//! benchmarks:
//!   - prime_parameter: { id: value_size, range: [128, 1024] }
//!     second_parameter: { id: { encryption: type }, range: [aes, none] }
//! profile: cpu         # optional: cpu | mem | trace | block
//! ```

use std::{
    fmt,
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use log::{debug, info};

use crate::{
    config::{
        find_and_replace, load_yaml_file, save_yaml_file, scenario_envelope, ConfigMap,
        ConfigValue, Scalar,
    },
    types::{BenchError, BenchResult},
};

/// Scalar parameters that can be swept by name
pub const PARAMETERS: &[&str] = &[
    "block_size",
    "key_size",
    "value_size",
    "clients",
    "method",
    "data_shards",
    "parity_shards",
    "meta_shards_nr",
    "zstordb_jobs",
];

/// Compound parameters, as `(group, fields)`
pub const COMPOUND_PARAMETERS: &[(&str, &[&str])] = &[
    ("encryption", &["type", "private_key"]),
    ("compression", &["type", "mode"]),
];

/// Parameters whose values are sizes in bytes
pub const BYTE_PARAMETERS: &[&str] = &["value_size", "block_size", "key_size"];

/// Identifier of a sweepable parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParameterId {
    /// Key name searched at any depth of the tree
    Flat(String),
    /// Chain of mapping lookups ending in a key name
    Compound(Vec<String>),
}

impl ParameterId {
    /// Parses an id written either as a string or as a nested single-key mapping
    pub fn from_config(value: &ConfigValue) -> BenchResult<Self> {
        let mut path = Vec::new();
        let mut node = value;
        loop {
            match node {
                ConfigValue::Scalar(Scalar::Str(s)) if !s.is_empty() => {
                    path.push(s.clone());
                    break;
                }
                ConfigValue::Mapping(m) if m.len() == 1 => {
                    let Some((key, inner)) = m.iter().next() else {
                        break;
                    };
                    path.push(key.to_string());
                    node = inner;
                }
                other => {
                    return Err(BenchError::InvalidConfig(format!(
                        "parameter id {other:?} is not supported"
                    )))
                }
            }
        }

        let id = if path.len() == 1 {
            Self::Flat(path.remove(0))
        } else {
            Self::Compound(path)
        };
        id.validate()?;
        Ok(id)
    }

    fn validate(&self) -> BenchResult<()> {
        let supported = match self {
            Self::Flat(key) => PARAMETERS.contains(&key.as_str()),
            Self::Compound(path) => match path.as_slice() {
                [group, field] => COMPOUND_PARAMETERS
                    .iter()
                    .any(|(g, fields)| *g == group.as_str() && fields.contains(&field.as_str())),
                _ => false,
            },
        };
        if supported {
            Ok(())
        } else {
            Err(BenchError::InvalidConfig(format!(
                "parameter {self} is not supported"
            )))
        }
    }

    /// Key chain used to locate the parameter in the tree
    #[must_use]
    pub fn key_path(&self) -> Vec<String> {
        match self {
            Self::Flat(key) => vec![key.clone()],
            Self::Compound(path) => path.clone(),
        }
    }

    /// Whether values of this parameter are byte sizes
    #[must_use]
    pub fn is_byte_sized(&self) -> bool {
        matches!(self, Self::Flat(key) if BYTE_PARAMETERS.contains(&key.as_str()))
    }
}

impl fmt::Display for ParameterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Flat(key) => f.write_str(key),
            Self::Compound(path) => f.write_str(&path.join(".")),
        }
    }
}

/// One sweep dimension: a parameter and its candidate values
#[derive(Debug, Clone, PartialEq)]
pub struct Benchmark {
    pub id: Option<ParameterId>,
    pub range: Vec<Scalar>,
}

impl Default for Benchmark {
    /// The "do not vary anything" dimension with a single placeholder value
    fn default() -> Self {
        Self {
            id: None,
            range: vec![Scalar::Str(" ".to_string())],
        }
    }
}

impl Benchmark {
    pub fn new(id: ParameterId, range: Vec<Scalar>) -> BenchResult<Self> {
        if range.is_empty() {
            return Err(BenchError::InvalidConfig(format!(
                "parameter {id}: range is missing"
            )));
        }
        id.validate()?;
        Ok(Self {
            id: Some(id),
            range,
        })
    }

    /// Parses a `{id, range}` descriptor; an absent descriptor is the empty dimension
    pub fn from_config(value: Option<&ConfigValue>) -> BenchResult<Self> {
        let map = match value {
            None | Some(ConfigValue::Scalar(Scalar::Null)) => return Ok(Self::default()),
            Some(ConfigValue::Mapping(m)) if m.is_empty() => return Ok(Self::default()),
            Some(ConfigValue::Mapping(m)) => m,
            Some(other) => {
                return Err(BenchError::InvalidConfig(format!(
                    "parameter descriptor must be a mapping, got {other:?}"
                )))
            }
        };

        let id = map.get("id").filter(|v| v.is_truthy());
        let range = map.get("range").and_then(ConfigValue::as_sequence);
        let (Some(id), Some(range)) = (id, range.filter(|r| !r.is_empty())) else {
            return Err(BenchError::InvalidConfig(
                "parameter id or range is missing".to_string(),
            ));
        };

        let id = ParameterId::from_config(id)?;
        let range = range
            .iter()
            .map(|v| {
                v.as_scalar().cloned().ok_or_else(|| {
                    BenchError::InvalidConfig(format!(
                        "parameter {id}: range values must be scalars"
                    ))
                })
            })
            .collect::<BenchResult<Vec<_>>>()?;
        Self::new(id, range)
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.id.is_none()
    }

    /// Display name of the parameter, empty for the empty dimension
    #[must_use]
    pub fn name(&self) -> String {
        self.id.as_ref().map(ToString::to_string).unwrap_or_default()
    }
}

/// Prime and second parameter of one benchmark descriptor
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BenchmarkPair {
    pub prime: Benchmark,
    pub second: Benchmark,
}

impl BenchmarkPair {
    pub fn new(prime: Benchmark, second: Benchmark) -> BenchResult<Self> {
        if prime.is_empty() && !second.is_empty() {
            return Err(BenchError::InvalidConfig(
                "if secondary parameter is given, primary parameter has to be given".to_string(),
            ));
        }
        if !prime.is_empty() && prime.id == second.id {
            return Err(BenchError::InvalidConfig(format!(
                "primary and secondary parameters should be different (both {})",
                prime.name()
            )));
        }
        Ok(Self { prime, second })
    }

    pub fn from_config(value: &ConfigValue) -> BenchResult<Self> {
        let map = value.as_mapping().ok_or_else(|| {
            BenchError::InvalidConfig(format!("benchmark descriptor must be a mapping: {value:?}"))
        })?;
        let prime = Benchmark::from_config(map.get("prime_parameter"))?;
        let second = Benchmark::from_config(map.get("second_parameter"))?;
        Self::new(prime, second)
    }
}

/// Profiling modes understood by the server and client binaries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileMode {
    Cpu,
    Mem,
    Trace,
    Block,
}

impl ProfileMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Mem => "mem",
            Self::Trace => "trace",
            Self::Block => "block",
        }
    }
}

impl FromStr for ProfileMode {
    type Err = BenchError;

    fn from_str(s: &str) -> BenchResult<Self> {
        match s {
            "cpu" => Ok(Self::Cpu),
            "mem" => Ok(Self::Mem),
            "trace" => Ok(Self::Trace),
            "block" => Ok(Self::Block),
            other => Err(BenchError::InvalidConfig(format!(
                "profile mode '{other}' is not supported"
            ))),
        }
    }
}

/// Cluster shape derived from the current working tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeploymentSpec {
    /// Data plus parity shards
    pub data_shards: usize,
    pub meta_shards: usize,
    pub auth_required: bool,
    pub jobs: i64,
}

/// Profiling output locations of one configuration point
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileDirs {
    /// Prefix of the per-shard profile directories (`<prefix>_<i>`)
    pub zstordb: PathBuf,
    pub client: PathBuf,
}

/// Sweep session: baseline tree, working tree and descriptor list
#[derive(Debug)]
pub struct SweepConfig {
    baseline: ConfigMap,
    template: ConfigMap,
    benchmarks: Vec<ConfigValue>,
    profile: Option<ProfileMode>,
    profile_count: usize,
}

impl SweepConfig {
    /// Loads the sweep file from disk
    pub fn load<P: AsRef<Path>>(path: P) -> BenchResult<Self> {
        let root = load_yaml_file(path.as_ref()).map_err(|e| match e {
            BenchError::Io(io) => BenchError::InvalidConfig(format!(
                "cannot read {}: {io}",
                path.as_ref().display()
            )),
            other => other,
        })?;
        Self::from_config(root)
    }

    /// Validates a parsed sweep document
    pub fn from_config(root: ConfigValue) -> BenchResult<Self> {
        let ConfigValue::Mapping(mut root) = root else {
            return Err(BenchError::InvalidConfig(
                "sweep config must be a mapping".to_string(),
            ));
        };

        let baseline = match root.remove("template") {
            Some(ConfigValue::Mapping(m)) if !m.is_empty() => m,
            _ => {
                return Err(BenchError::InvalidConfig(
                    "no zstor config given".to_string(),
                ))
            }
        };

        if !baseline.get("benchmark").is_some_and(ConfigValue::is_truthy) {
            return Err(BenchError::InvalidConfig(
                "no benchmark config given in the template".to_string(),
            ));
        }

        let benchmarks = match root.remove("benchmarks") {
            None | Some(ConfigValue::Scalar(Scalar::Null)) => Vec::new(),
            Some(ConfigValue::Sequence(items)) => items,
            Some(other) => {
                return Err(BenchError::InvalidConfig(format!(
                    "benchmarks must be a list, got {other:?}"
                )))
            }
        };

        let profile = match root.get("profile") {
            None | Some(ConfigValue::Scalar(Scalar::Null)) => None,
            Some(ConfigValue::Scalar(s)) => Some(s.to_string().parse::<ProfileMode>()?),
            Some(other) => {
                return Err(BenchError::InvalidConfig(format!(
                    "profile mode {other:?} is not supported"
                )))
            }
        };

        info!(
            "Loaded sweep config: {} benchmark descriptor(s), profile: {}",
            benchmarks.len(),
            profile.map_or("none", ProfileMode::as_str)
        );

        Ok(Self {
            template: baseline.clone(),
            baseline,
            benchmarks,
            profile,
            profile_count: 0,
        })
    }

    /// Yields every benchmark descriptor, validated as it is reached
    ///
    /// With no descriptors configured a single empty pair is produced so that
    /// the template is benchmarked once as-is.
    pub fn descriptors(&self) -> impl Iterator<Item = BenchResult<BenchmarkPair>> {
        let raw = self.benchmarks.clone();
        let fallback: Option<BenchResult<BenchmarkPair>> =
            raw.is_empty().then(|| Ok(BenchmarkPair::default()));
        fallback
            .into_iter()
            .chain(raw.into_iter().map(|v| BenchmarkPair::from_config(&v)))
    }

    /// Sets `value` on the first matching key of the working tree
    pub fn mutate(&mut self, id: &ParameterId, value: &Scalar) -> BenchResult<()> {
        debug!("Setting {id} = {value}");
        if find_and_replace(&mut self.template, &id.key_path(), value)? {
            Ok(())
        } else {
            Err(BenchError::InvalidConfig(format!(
                "parameter {id} is not supported"
            )))
        }
    }

    /// Resets the working tree to a copy of the baseline
    pub fn restore(&mut self) {
        self.template = self.baseline.clone();
    }

    /// Writes the working tree, wrapped as a single scenario, to `path`
    pub fn save<P: AsRef<Path>>(&self, path: P) -> BenchResult<()> {
        save_yaml_file(path.as_ref(), &scenario_envelope(&self.template))?;
        debug!("Scenario config written to {}", path.as_ref().display());
        Ok(())
    }

    #[must_use]
    pub const fn template(&self) -> &ConfigMap {
        &self.template
    }

    #[must_use]
    pub const fn baseline(&self) -> &ConfigMap {
        &self.baseline
    }

    #[must_use]
    pub const fn profile(&self) -> Option<ProfileMode> {
        self.profile
    }

    /// Creates the profile directory of the next configuration point
    ///
    /// Returns `None` when profiling is off. Otherwise creates
    /// `<report_dir>/profile_information/profile_<n>/`, dumps the working tree
    /// there as `config.yaml` and advances the run counter.
    pub fn new_profile_dir(&mut self, report_dir: &Path) -> BenchResult<Option<ProfileDirs>> {
        if self.profile.is_none() {
            return Ok(None);
        }

        let dir = report_dir
            .join("profile_information")
            .join(format!("profile_{}", self.profile_count));
        fs::create_dir_all(&dir)?;
        save_yaml_file(dir.join("config.yaml"), &scenario_envelope(&self.template))?;

        self.profile_count += 1;
        Ok(Some(ProfileDirs {
            zstordb: dir.join("zstordb"),
            client: dir.join("zstorclient"),
        }))
    }

    /// Normalises the storage sub-tree and derives the cluster shape from it
    ///
    /// Missing distribution settings default to one data shard and no parity
    /// shards, a missing metadata store to a single shard.
    pub fn deployment(&mut self) -> BenchResult<DeploymentSpec> {
        let jobs = match self.template.get("benchmark").and_then(ConfigValue::as_mapping) {
            Some(bench) => count_at(bench, "zstordb_jobs", 0)?,
            None => 0,
        };

        let zstor = self.template.mapping_entry("zstor");
        let auth_required = zstor.get("iyo").is_some_and(ConfigValue::is_truthy);

        let pipeline = zstor.mapping_entry("datastor").mapping_entry("pipeline");
        let distribution = pipeline.mapping_entry("distribution");
        let data = count_at(distribution, "data_shards", 1)?;
        let parity = count_at(distribution, "parity_shards", 0)?;
        distribution.insert("data_shards", data);
        distribution.insert("parity_shards", parity);

        let metastor = zstor.mapping_entry("metastor");
        let meta = count_at(metastor, "meta_shards_nr", 1)?;

        let to_usize =
            |v: i64, key: &str| usize::try_from(v).map_err(|_| invalid_count(key));
        Ok(DeploymentSpec {
            data_shards: to_usize(data, "data_shards")? + to_usize(parity, "parity_shards")?,
            meta_shards: to_usize(meta, "meta_shards_nr")?,
            auth_required,
            jobs,
        })
    }

    /// Publishes cluster endpoints into the working tree
    pub fn record_endpoints(&mut self, data_shards: &[String], meta_shards: &[String]) {
        let zstor = self.template.mapping_entry("zstor");
        zstor
            .mapping_entry("datastor")
            .insert("shards", data_shards.to_vec());
        zstor
            .mapping_entry("metastor")
            .mapping_entry("db")
            .insert("endpoints", meta_shards.to_vec());
    }

    /// Empties the endpoint lists after the cluster is gone
    pub fn clear_endpoints(&mut self) {
        self.record_endpoints(&[], &[]);
    }
}

fn invalid_count(key: &str) -> BenchError {
    BenchError::InvalidConfig(format!("'{key}' must be a non-negative integer"))
}

fn count_at(map: &ConfigMap, key: &str, default: i64) -> BenchResult<i64> {
    match map.get(key) {
        None | Some(ConfigValue::Scalar(Scalar::Null)) => Ok(default),
        Some(ConfigValue::Scalar(s)) => s
            .as_i64()
            .filter(|v| *v >= 0)
            .ok_or_else(|| invalid_count(key)),
        Some(_) => Err(invalid_count(key)),
    }
}
