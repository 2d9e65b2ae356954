//! Typed configuration tree
//!
//! The sweep template, the per-run scenario file and the benchmark result file
//! are all arbitrarily nested YAML documents. They are held here as a
//! [`ConfigValue`], a tagged sum over scalars, sequences and ordered mappings,
//! so that parameter mutation is an explicit tree walk with typed coercion
//! instead of duck-typed assignment.
//!
//! ## Features
//!
//! - **Order preserving**: mappings keep document order, which decides which
//!   occurrence of a key a depth-first search reaches first
//! - **Typed coercion**: a new value takes the type of the value it replaces
//! - **YAML I/O**: load and save through `serde_yaml`

use std::{fmt, fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::types::{BenchError, BenchResult};

/// Leaf value of the configuration tree
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Scalar {
    /// Human name of the scalar type, used in coercion errors
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "string",
        }
    }

    /// Integer view of the scalar, accepting integral floats and numeric strings
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Float(f) if f.fract() == 0.0 && f.is_finite() => Some(*f as i64),
            Self::Str(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Float view of the scalar, accepting integers and numeric strings
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(f) => Some(*f),
            Self::Str(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Converts `self` to the type of `target`
    ///
    /// A `Null` target adopts the new value unchanged, since there is no type
    /// to preserve.
    #[must_use]
    pub fn coerce_like(&self, target: &Self) -> Option<Self> {
        match target {
            Self::Null => Some(self.clone()),
            Self::Int(_) => self.as_i64().map(Self::Int),
            Self::Float(_) => self.as_f64().map(Self::Float),
            Self::Str(_) => match self {
                Self::Null => None,
                other => Some(Self::Str(other.to_string())),
            },
            Self::Bool(_) => match self {
                Self::Bool(b) => Some(Self::Bool(*b)),
                Self::Str(s) => s.trim().to_ascii_lowercase().parse().ok().map(Self::Bool),
                _ => None,
            },
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Str(s) => f.write_str(s),
        }
    }
}

/// Ordered string-keyed mapping
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConfigMap {
    entries: Vec<(String, ConfigValue)>,
}

impl ConfigMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut ConfigValue> {
        self.entries
            .iter_mut()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// Follows a chain of mapping lookups
    #[must_use]
    pub fn get_path(&self, path: &[&str]) -> Option<&ConfigValue> {
        let (last, parents) = path.split_last()?;
        let mut map = self;
        for key in parents {
            map = map.get(key)?.as_mapping()?;
        }
        map.get(last)
    }

    /// Sets `key`, replacing the value in place if present
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<ConfigValue>) {
        let key = key.into();
        let value = value.into();
        match self.get_mut(&key) {
            Some(slot) => *slot = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<ConfigValue> {
        let idx = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(idx).1)
    }

    /// Returns the mapping under `key`, replacing a missing or non-mapping value with `{}`
    pub fn mapping_entry(&mut self, key: &str) -> &mut ConfigMap {
        if !matches!(self.get(key), Some(ConfigValue::Mapping(_))) {
            self.insert(key, ConfigValue::Mapping(ConfigMap::new()));
        }
        match self.get_mut(key) {
            Some(ConfigValue::Mapping(m)) => m,
            _ => unreachable!("mapping was just inserted"),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ConfigValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Recursively deletes every key in `keys` at any mapping depth
    pub fn filter_keys(&mut self, keys: &[&str]) {
        self.entries.retain(|(k, _)| !keys.contains(&k.as_str()));
        for (_, value) in &mut self.entries {
            if let ConfigValue::Mapping(inner) = value {
                inner.filter_keys(keys);
            }
        }
    }
}

impl<K: Into<String>, V: Into<ConfigValue>> FromIterator<(K, V)> for ConfigMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

/// Node of the configuration tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "serde_yaml::Value", into = "serde_yaml::Value")]
pub enum ConfigValue {
    Scalar(Scalar),
    Sequence(Vec<ConfigValue>),
    Mapping(ConfigMap),
}

impl ConfigValue {
    #[must_use]
    pub const fn as_mapping(&self) -> Option<&ConfigMap> {
        match self {
            Self::Mapping(m) => Some(m),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_scalar(&self) -> Option<&Scalar> {
        match self {
            Self::Scalar(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_sequence(&self) -> Option<&Vec<ConfigValue>> {
        match self {
            Self::Sequence(s) => Some(s),
            _ => None,
        }
    }

    /// Mirrors YAML truthiness: null, false, zero and empty collections are falsy
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Scalar(Scalar::Null) => false,
            Self::Scalar(Scalar::Bool(b)) => *b,
            Self::Scalar(Scalar::Int(v)) => *v != 0,
            Self::Scalar(Scalar::Float(v)) => *v != 0.0,
            Self::Scalar(Scalar::Str(s)) => !s.is_empty(),
            Self::Sequence(s) => !s.is_empty(),
            Self::Mapping(m) => !m.is_empty(),
        }
    }
}

impl From<Scalar> for ConfigValue {
    fn from(s: Scalar) -> Self {
        Self::Scalar(s)
    }
}

impl From<ConfigMap> for ConfigValue {
    fn from(m: ConfigMap) -> Self {
        Self::Mapping(m)
    }
}

impl From<i64> for ConfigValue {
    fn from(v: i64) -> Self {
        Self::Scalar(Scalar::Int(v))
    }
}

impl From<&str> for ConfigValue {
    fn from(v: &str) -> Self {
        Self::Scalar(Scalar::Str(v.to_string()))
    }
}

impl From<Vec<String>> for ConfigValue {
    fn from(items: Vec<String>) -> Self {
        Self::Sequence(
            items
                .into_iter()
                .map(|s| Self::Scalar(Scalar::Str(s)))
                .collect(),
        )
    }
}

fn key_to_string(key: serde_yaml::Value) -> BenchResult<String> {
    match key {
        serde_yaml::Value::String(s) => Ok(s),
        serde_yaml::Value::Number(n) => Ok(n.to_string()),
        serde_yaml::Value::Bool(b) => Ok(b.to_string()),
        other => Err(BenchError::InvalidConfig(format!(
            "unsupported mapping key: {other:?}"
        ))),
    }
}

impl TryFrom<serde_yaml::Value> for ConfigValue {
    type Error = BenchError;

    fn try_from(value: serde_yaml::Value) -> BenchResult<Self> {
        use serde_yaml::Value;

        Ok(match value {
            Value::Null => Self::Scalar(Scalar::Null),
            Value::Bool(b) => Self::Scalar(Scalar::Bool(b)),
            Value::Number(n) => match n.as_i64() {
                Some(v) => Self::Scalar(Scalar::Int(v)),
                None => Self::Scalar(Scalar::Float(n.as_f64().unwrap_or(f64::NAN))),
            },
            Value::String(s) => Self::Scalar(Scalar::Str(s)),
            Value::Sequence(items) => Self::Sequence(
                items
                    .into_iter()
                    .map(Self::try_from)
                    .collect::<BenchResult<_>>()?,
            ),
            Value::Mapping(mapping) => {
                let mut map = ConfigMap::new();
                for (k, v) in mapping {
                    map.insert(key_to_string(k)?, Self::try_from(v)?);
                }
                Self::Mapping(map)
            }
            Value::Tagged(tagged) => Self::try_from(tagged.value)?,
        })
    }
}

impl From<Scalar> for serde_yaml::Value {
    fn from(s: Scalar) -> Self {
        match s {
            Scalar::Null => Self::Null,
            Scalar::Bool(b) => Self::Bool(b),
            Scalar::Int(v) => Self::Number(v.into()),
            Scalar::Float(v) => Self::Number(v.into()),
            Scalar::Str(s) => Self::String(s),
        }
    }
}

impl From<ConfigValue> for serde_yaml::Value {
    fn from(value: ConfigValue) -> Self {
        match value {
            ConfigValue::Scalar(s) => s.into(),
            ConfigValue::Sequence(items) => {
                Self::Sequence(items.into_iter().map(Self::from).collect())
            }
            ConfigValue::Mapping(map) => Self::Mapping(
                map.entries
                    .into_iter()
                    .map(|(k, v)| (Self::String(k), Self::from(v)))
                    .collect(),
            ),
        }
    }
}

/// Replaces the first matching leaf under `path` with `value`
///
/// A single-element path is a flat key: the first occurrence of that key,
/// at any depth and in depth-first document order, whose value is not a
/// mapping gets replaced. A longer path is a chain of mapping lookups; the
/// first mapping named by the head of the chain is entered and the rest of
/// the chain is resolved inside it with the same rule.
///
/// # Returns
///
/// `Ok(true)` if a key was updated, `Ok(false)` if no matching key exists
///
/// # Errors
///
/// `InvalidConfig` if the matching leaf cannot hold `value`
pub fn find_and_replace(map: &mut ConfigMap, path: &[String], value: &Scalar) -> BenchResult<bool> {
    let Some((head, rest)) = path.split_first() else {
        return Ok(false);
    };

    for (key, current) in &mut map.entries {
        match current {
            ConfigValue::Mapping(inner) => {
                if !rest.is_empty() && key.as_str() == head.as_str() {
                    return find_and_replace(inner, rest, value);
                }
                if find_and_replace(inner, path, value)? {
                    return Ok(true);
                }
            }
            leaf => {
                if rest.is_empty() && key.as_str() == head.as_str() {
                    *leaf = coerce_leaf(key, leaf, value)?;
                    return Ok(true);
                }
            }
        }
    }

    Ok(false)
}

fn coerce_leaf(key: &str, leaf: &ConfigValue, value: &Scalar) -> BenchResult<ConfigValue> {
    let coerced = match leaf {
        ConfigValue::Scalar(target) => value.coerce_like(target).map(ConfigValue::Scalar),
        _ => None,
    };
    coerced.ok_or_else(|| {
        let type_name = leaf.as_scalar().map_or("sequence", Scalar::type_name);
        BenchError::InvalidConfig(format!(
            "for '{key}' cannot convert value {value} to type {type_name}"
        ))
    })
}

/// Wraps a tree in the single-scenario envelope read by the benchmark client
#[must_use]
pub fn scenario_envelope(tree: &ConfigMap) -> ConfigValue {
    let scenario: ConfigMap = [("scenario", ConfigValue::Mapping(tree.clone()))]
        .into_iter()
        .collect();
    [("scenarios", ConfigValue::Mapping(scenario))]
        .into_iter()
        .collect::<ConfigMap>()
        .into()
}

/// Loads a YAML document from `path`
pub fn load_yaml_file<P: AsRef<Path>>(path: P) -> BenchResult<ConfigValue> {
    let content = fs::read_to_string(path.as_ref())?;
    Ok(serde_yaml::from_str(&content)?)
}

/// Writes `value` as YAML to `path`, truncating any previous content
pub fn save_yaml_file<P: AsRef<Path>>(path: P, value: &ConfigValue) -> BenchResult<()> {
    let content = serde_yaml::to_string(value)?;
    fs::write(path.as_ref(), content)?;
    Ok(())
}
