//! Utility Functions Module
//!
//! Helpers shared by the aggregator and the report writer: averaging,
//! unit-aware formatting of byte sizes and data rates, and JSON output.
//!
//! ## Example Usage
//!
//! ```rust
//! use bench_orchestrator::utils::{calculate_average, format_rate};
//!
//! let rates = vec![100_000.0, 100_000.0];
//! assert_eq!(format_rate(calculate_average(&rates)), "97.66 KiB/s");
//! ```

use std::{fs::File, io::Write, path::Path};

use serde::Serialize;

use crate::types::BenchResult;

pub const KIB: f64 = 1024.0;
pub const MIB: f64 = 1024.0 * 1024.0;
pub const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Calculates the arithmetic mean of a slice of values
///
/// # Returns
///
/// Returns the average value, or 0.0 if the slice is empty
pub fn calculate_average(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Data-rate unit chosen for a value in bytes per second
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateUnit {
    BytesPerSec,
    KibPerSec,
    MibPerSec,
}

impl RateUnit {
    /// Picks the largest unit the value reaches at least once
    pub fn for_value(bytes_per_sec: f64) -> Self {
        if bytes_per_sec >= MIB {
            Self::MibPerSec
        } else if bytes_per_sec >= KIB {
            Self::KibPerSec
        } else {
            Self::BytesPerSec
        }
    }

    /// Number of bytes per second in one unit
    pub const fn divisor(self) -> f64 {
        match self {
            Self::BytesPerSec => 1.0,
            Self::KibPerSec => KIB,
            Self::MibPerSec => MIB,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::BytesPerSec => "B/s",
            Self::KibPerSec => "KiB/s",
            Self::MibPerSec => "MiB/s",
        }
    }
}

/// Formats a rate in bytes per second with the unit it reaches
///
/// ```rust
/// use bench_orchestrator::utils::format_rate;
///
/// assert_eq!(format_rate(512.0), "512.00 B/s");
/// assert_eq!(format_rate(2.5 * 1024.0 * 1024.0), "2.50 MiB/s");
/// ```
pub fn format_rate(bytes_per_sec: f64) -> String {
    let unit = RateUnit::for_value(bytes_per_sec);
    format!("{:.2} {}", bytes_per_sec / unit.divisor(), unit.label())
}

/// Formats a byte count with binary prefixes
pub fn format_bytes(bytes: f64) -> String {
    if bytes < KIB {
        format!("{bytes} B")
    } else if bytes < MIB {
        format!("{:.1} KiB", bytes / KIB)
    } else if bytes < GIB {
        format!("{:.1} MiB", bytes / MIB)
    } else {
        format!("{:.1} GiB", bytes / GIB)
    }
}

/// Saves any serializable data structure to a JSON file
pub fn save_json_results<T: Serialize>(data: &T, filename: &Path) -> BenchResult<()> {
    let json = serde_json::to_string_pretty(data)?;

    let mut file = File::create(filename)?;
    file.write_all(json.as_bytes())?;

    log::debug!("Results saved to {}", filename.display());
    Ok(())
}
