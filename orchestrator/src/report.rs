//! Throughput aggregation and report generation
//!
//! An [`Aggregator`] is opened per sweep descriptor and holds the throughput
//! matrix: one bucket per value of the second parameter, one sample per value
//! of the prime parameter. When the descriptor completes, [`Report`] appends a
//! section with the configuration, a bar chart and a markdown table to
//! `report.md`. Runs with per-interval samples get line charts in
//! `timeplots.md`.
//!
//! ## Features
//!
//! - **Append-only output**: earlier sections are never rewritten
//! - **Humanized units**: rates in B/s, KiB/s or MiB/s, byte-sized parameters
//!   with binary prefixes
//! - **JSON summary**: the raw matrix of every descriptor in `summary.json`

use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use log::{debug, info};
use serde::Serialize;

use crate::{
    chart::{BarChart, BarSeries, ChartRenderer, LineChart},
    config::{ConfigMap, ConfigValue, Scalar},
    scenario::ScenarioResult,
    sweep::{Benchmark, BenchmarkPair},
    types::{BenchError, BenchResult},
    utils::{calculate_average, format_bytes, format_rate, save_json_results, RateUnit},
};

pub const MAIN_REPORT: &str = "report.md";
pub const TIMEPLOT_REPORT: &str = "timeplots.md";
pub const SUMMARY_FILE: &str = "summary.json";

/// Mean bytes per second across the operation records of one run
///
/// Each record contributes `count * value_size / duration`.
pub fn throughput(result: &ScenarioResult) -> BenchResult<f64> {
    let value_size = result.value_size()?;
    let rates = result
        .records()
        .iter()
        .map(|r| Ok(r.count()? * value_size / r.duration()?))
        .collect::<BenchResult<Vec<f64>>>()?;
    Ok(calculate_average(&rates))
}

/// Throughput matrix of one sweep descriptor
#[derive(Debug, Clone)]
pub struct Aggregator {
    pair: BenchmarkPair,
    buckets: Vec<Vec<f64>>,
    last_config: Option<ConfigMap>,
}

impl Aggregator {
    pub fn new(pair: BenchmarkPair) -> Self {
        Self {
            pair,
            buckets: Vec::new(),
            last_config: None,
        }
    }

    pub const fn pair(&self) -> &BenchmarkPair {
        &self.pair
    }

    /// Opens the bucket for the next value of the second parameter
    pub fn new_bucket(&mut self) {
        self.buckets.push(Vec::new());
    }

    /// Computes the throughput of a finished run and appends it to the open bucket
    ///
    /// # Errors
    ///
    /// Returns `InvalidResult` if a record lacks a numeric duration or count,
    /// or the run config lacks `value_size`. Nothing is recorded then.
    pub fn ingest(&mut self, result: &ScenarioResult) -> BenchResult<f64> {
        let value = throughput(result)?;
        if self.buckets.is_empty() {
            self.new_bucket();
        }
        if let Some(bucket) = self.buckets.last_mut() {
            bucket.push(value);
        }
        self.last_config = Some(result.filtered_config());
        debug!("Ingested {} from {}", format_rate(value), result.name());
        Ok(value)
    }

    pub fn buckets(&self) -> &[Vec<f64>] {
        &self.buckets
    }

    pub fn sample_count(&self) -> usize {
        self.buckets.iter().map(Vec::len).sum()
    }

    /// Filtered configuration of the most recent ingested run
    pub const fn last_config(&self) -> Option<&ConfigMap> {
        self.last_config.as_ref()
    }

    /// Checks that every bucket holds one sample per prime value
    fn validate(&self) -> BenchResult<()> {
        let expected = self.pair.prime.range.len();
        if self.buckets.is_empty() || self.buckets.iter().any(Vec::is_empty) {
            return Err(BenchError::InvalidResult("throughput bucket is empty".into()));
        }
        if let Some(bucket) = self.buckets.iter().find(|b| b.len() != expected) {
            return Err(BenchError::InvalidResult(format!(
                "throughput bucket holds {} samples, expected {expected}",
                bucket.len()
            )));
        }
        Ok(())
    }
}

fn value_label(benchmark: &Benchmark, value: &Scalar) -> String {
    if benchmark.id.as_ref().is_some_and(|id| id.is_byte_sized()) {
        if let Some(bytes) = value.as_f64() {
            return format_bytes(bytes);
        }
    }
    value.to_string()
}

fn second_label(second: &Benchmark, value: &Scalar) -> String {
    match &second.id {
        Some(id) => format!("{id} = {}", value_label(second, value)),
        None => String::new(),
    }
}

fn yaml_block(value: &ConfigValue) -> BenchResult<String> {
    Ok(format!("```yaml\n{}```\n", serde_yaml::to_string(value)?))
}

/// Raw matrix of one descriptor as written to the JSON summary
#[derive(Debug, Clone, Serialize)]
pub struct DescriptorSummary {
    pub report: usize,
    pub timestamp: String,
    pub prime: String,
    pub prime_values: Vec<String>,
    pub second: Option<String>,
    pub second_values: Vec<String>,
    /// Bytes per second, one row per second value
    pub throughput: Vec<Vec<f64>>,
}

/// Markdown report with its figures
pub struct Report {
    dir: PathBuf,
    renderer: Box<dyn ChartRenderer>,
    reports_added: usize,
    timeplots_added: usize,
    summary: Vec<DescriptorSummary>,
}

impl Report {
    /// Creates the output directory and starts fresh report files
    pub fn create<P: AsRef<Path>>(dir: P, renderer: Box<dyn ChartRenderer>) -> BenchResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        fs::write(
            dir.join(MAIN_REPORT),
            format!("# Benchmark report\n[Timeplot collection is here]({TIMEPLOT_REPORT})\n"),
        )?;
        fs::write(
            dir.join(TIMEPLOT_REPORT),
            format!("# Timeplot collection report\n[Main report in here]({MAIN_REPORT})\n"),
        )?;
        info!("Writing report to {}", dir.display());

        Ok(Self {
            dir,
            renderer,
            reports_added: 0,
            timeplots_added: 0,
            summary: Vec::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub const fn reports_added(&self) -> usize {
        self.reports_added
    }

    fn append(&self, file: &str, text: &str) -> BenchResult<()> {
        let mut f = OpenOptions::new().append(true).open(self.dir.join(file))?;
        f.write_all(text.as_bytes())?;
        Ok(())
    }

    /// Appends the section of a completed descriptor to the main report
    ///
    /// The bar chart is drawn only when the matrix holds more than one
    /// sample; the throughput table is always written.
    ///
    /// # Errors
    ///
    /// Returns `InvalidResult` for an empty or ragged matrix, before anything
    /// is written.
    pub fn add_aggregation(&mut self, aggregator: &Aggregator) -> BenchResult<()> {
        aggregator.validate()?;
        let pair = aggregator.pair();
        let index = self.reports_added;

        let mut section = format!("\n# Report {index}\n");
        if let Some(config) = aggregator.last_config() {
            section.push_str("**Benchmark config:**\n");
            section.push_str(&yaml_block(&ConfigValue::Mapping(config.clone()))?);
        }

        if aggregator.sample_count() > 1 {
            let figure = format!("fig{index}.{}", self.renderer.extension());
            self.renderer
                .render_bar(&bar_chart(aggregator), &self.dir.join(&figure))?;
            section.push_str(&format!("\n![Fig: throughput vs parameter]({figure})\n"));
        }

        section.push_str("\n### Throughput:\n");
        section.push_str(&throughput_table(aggregator));

        self.append(MAIN_REPORT, &section)?;
        self.reports_added += 1;

        self.summary.push(DescriptorSummary {
            report: index,
            timestamp: chrono::Utc::now().to_rfc3339(),
            prime: pair.prime.name(),
            prime_values: pair.prime.range.iter().map(ToString::to_string).collect(),
            second: pair.second.id.as_ref().map(ToString::to_string),
            second_values: pair.second.range.iter().map(ToString::to_string).collect(),
            throughput: aggregator.buckets().to_vec(),
        });
        save_json_results(&self.summary, &self.dir.join(SUMMARY_FILE))?;

        info!("Report {index} added for {}", pair.prime.name());
        Ok(())
    }

    /// Appends line charts of the per-interval samples of one run
    ///
    /// Records without samples are skipped. A run with no samples at all,
    /// including one without a supported aggregation unit, leaves the
    /// timeplot log untouched.
    pub fn add_timeplot(&mut self, result: &ScenarioResult) -> BenchResult<()> {
        let Some(unit) = result.time_unit() else {
            return Ok(());
        };
        let first = self.timeplots_added;

        let mut figures = Vec::new();
        for record in result.records() {
            let samples = record.per_interval();
            if samples.is_empty() {
                continue;
            }
            let points = samples.len().min(record.duration()? as usize);
            if points == 0 {
                continue;
            }
            let chart = LineChart {
                x_label: format!("time, {}", unit.label()),
                y_label: format!("operations per {}", unit.label()),
                points: samples
                    .iter()
                    .take(points)
                    .enumerate()
                    .map(|(i, &count)| ((i + 1) as f64, count as f64))
                    .collect(),
            };

            let figure = format!(
                "plot_per_interval_{}.{}",
                first + figures.len(),
                self.renderer.extension()
            );
            self.renderer.render_line(&chart, &self.dir.join(&figure))?;
            figures.push(figure);
        }
        if figures.is_empty() {
            debug!("No per-interval samples in {}", result.name());
            return Ok(());
        }

        let mut section = format!("\n## Timeplot {first}\n");
        section.push_str("**Config:**\n");
        section.push_str(&yaml_block(&result.report_dump())?);
        for figure in &figures {
            section.push_str(&format!("\n![Fig: operations per {}]({figure})\n", unit.label()));
        }
        self.append(TIMEPLOT_REPORT, &section)?;
        self.timeplots_added += figures.len();
        Ok(())
    }
}

/// Bar chart of the matrix, scaled to the unit of its largest sample
fn bar_chart(aggregator: &Aggregator) -> BarChart {
    let pair = aggregator.pair();
    let max = aggregator
        .buckets()
        .iter()
        .flatten()
        .copied()
        .fold(0.0, f64::max);
    let unit = RateUnit::for_value(max);

    let series = aggregator
        .buckets()
        .iter()
        .zip(&pair.second.range)
        .map(|(bucket, value)| BarSeries {
            label: second_label(&pair.second, value),
            values: bucket.iter().map(|v| v / unit.divisor()).collect(),
            bar_labels: bucket.iter().map(|v| format_rate(*v)).collect(),
        })
        .collect();

    BarChart {
        x_label: pair.prime.name(),
        y_label: format!("throughput, {}", unit.label()),
        categories: pair
            .prime
            .range
            .iter()
            .map(|v| value_label(&pair.prime, v))
            .collect(),
        series,
    }
}

/// Markdown table: rows are prime values, columns are second values
fn throughput_table(aggregator: &Aggregator) -> String {
    let pair = aggregator.pair();
    let mut table = format!("| {} |", pair.prime.name());
    for value in &pair.second.range {
        table.push_str(&format!(" {} |", second_label(&pair.second, value)));
    }
    table.push('\n');
    table.push_str(&"|---".repeat(pair.second.range.len() + 1));
    table.push_str("|\n");

    for (row, prime_value) in pair.prime.range.iter().enumerate() {
        table.push_str(&format!("| {} |", value_label(&pair.prime, prime_value)));
        for bucket in aggregator.buckets() {
            let cell = bucket.get(row).map_or_else(String::new, |v| format_rate(*v));
            table.push_str(&format!(" {cell} |"));
        }
        table.push('\n');
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{chart::SvgRenderer, sweep::ParameterId};

    fn result_yaml(value_size: u64, durations: &[f64], counts: &[u64]) -> String {
        let records: String = durations
            .iter()
            .zip(counts)
            .map(|(d, c)| format!("      - {{duration: {d:?}, count: {c}, perinterval: [5, 6, 7]}}\n"))
            .collect();
        format!(
            "scenarios:\n  bench:\n    scenario:\n      zstor: {{namespace: ns}}\n      benchmark: {{value_size: {value_size}, result_output: per_second}}\n    results:\n{records}"
        )
    }

    fn result(value_size: u64, durations: &[f64], counts: &[u64]) -> ScenarioResult {
        let yaml = result_yaml(value_size, durations, counts);
        ScenarioResult::from_config(&serde_yaml::from_str(&yaml).unwrap()).unwrap()
    }

    fn pair(primes: &[i64], seconds: Option<&[&str]>) -> BenchmarkPair {
        let prime = Benchmark::new(
            ParameterId::Flat("value_size".into()),
            primes.iter().map(|v| Scalar::Int(*v)).collect(),
        )
        .unwrap();
        let second = match seconds {
            Some(values) => Benchmark::new(
                ParameterId::Compound(vec!["encryption".into(), "type".into()]),
                values.iter().map(|v| Scalar::Str((*v).into())).collect(),
            )
            .unwrap(),
            None => Benchmark::default(),
        };
        BenchmarkPair::new(prime, second).unwrap()
    }

    #[test]
    fn test_throughput_worked_example() {
        let r = result(100, &[1.0, 2.0], &[1000, 2000]);
        let value = throughput(&r).unwrap();
        assert_eq!(value, 100_000.0);
        assert_eq!(format_rate(value), "97.66 KiB/s");
    }

    #[test]
    fn test_throughput_is_mean_of_record_rates() {
        // 100 * 1000 / 1.0 = 100000 and 100 * 1000 / 4.0 = 25000 bytes/s.
        // Total bytes over total time would give 40000 instead.
        let r = result(100, &[1.0, 4.0], &[1000, 1000]);
        assert_eq!(throughput(&r).unwrap(), 62_500.0);
    }

    #[test]
    fn test_ingest_rejects_bad_record() {
        let yaml = result_yaml(100, &[1.0], &[1000]).replace("count: 1000", "count: many");
        let r = ScenarioResult::from_config(&serde_yaml::from_str(&yaml).unwrap()).unwrap();
        let mut agg = Aggregator::new(pair(&[1], None));
        agg.new_bucket();
        assert!(matches!(agg.ingest(&r), Err(BenchError::InvalidResult(_))));
        assert_eq!(agg.sample_count(), 0);
    }

    #[test]
    fn test_buckets_follow_second_values() {
        let mut agg = Aggregator::new(pair(&[128, 256], Some(&["aes", "none"])));
        for _ in 0..2 {
            agg.new_bucket();
            agg.ingest(&result(100, &[1.0], &[10])).unwrap();
            agg.ingest(&result(100, &[1.0], &[20])).unwrap();
        }
        assert_eq!(agg.buckets(), &[vec![1000.0, 2000.0], vec![1000.0, 2000.0]]);
        assert_eq!(agg.sample_count(), 4);
        // filtered keys are gone from the recorded config
        assert!(agg.last_config().unwrap().get_path(&["zstor", "namespace"]).is_none());
    }

    #[test]
    fn test_report_headers() {
        let dir = tempfile::tempdir().unwrap();
        Report::create(dir.path(), Box::new(SvgRenderer)).unwrap();
        let main = fs::read_to_string(dir.path().join(MAIN_REPORT)).unwrap();
        let timeplots = fs::read_to_string(dir.path().join(TIMEPLOT_REPORT)).unwrap();
        assert!(main.starts_with("# Benchmark report\n[Timeplot collection is here](timeplots.md)"));
        assert!(timeplots.starts_with("# Timeplot collection report\n[Main report in here](report.md)"));
    }

    #[test]
    fn test_add_aggregation_with_chart_and_table() {
        let dir = tempfile::tempdir().unwrap();
        let mut report = Report::create(dir.path(), Box::new(SvgRenderer)).unwrap();
        let mut agg = Aggregator::new(pair(&[128, 4096], Some(&["aes", "none"])));
        for _ in 0..2 {
            agg.new_bucket();
            agg.ingest(&result(100, &[1.0, 2.0], &[1000, 2000])).unwrap();
            agg.ingest(&result(100, &[1.0], &[10])).unwrap();
        }

        report.add_aggregation(&agg).unwrap();

        let main = fs::read_to_string(dir.path().join(MAIN_REPORT)).unwrap();
        assert!(main.contains("# Report 0"));
        assert!(main.contains("**Benchmark config:**"));
        assert!(main.contains("![Fig: throughput vs parameter](fig0.svg)"));
        assert!(main.contains("| value_size | encryption.type = aes | encryption.type = none |"));
        assert!(main.contains("|---|---|---|"));
        assert!(main.contains("| 128 B | 97.66 KiB/s | 97.66 KiB/s |"));
        assert!(main.contains("| 4.0 KiB | 1000.00 B/s | 1000.00 B/s |"));
        assert!(dir.path().join("fig0.svg").exists());

        let summary: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(dir.path().join(SUMMARY_FILE)).unwrap())
                .unwrap();
        assert_eq!(summary[0]["prime"], "value_size");
        assert_eq!(summary[0]["second"], "encryption.type");
        assert_eq!(summary[0]["throughput"][0][0], 100_000.0);
        assert_eq!(report.reports_added(), 1);
    }

    #[test]
    fn test_single_sample_has_no_chart() {
        let dir = tempfile::tempdir().unwrap();
        let mut report = Report::create(dir.path(), Box::new(SvgRenderer)).unwrap();
        let mut agg = Aggregator::new(pair(&[128], None));
        agg.new_bucket();
        agg.ingest(&result(100, &[1.0], &[1000])).unwrap();

        report.add_aggregation(&agg).unwrap();

        let main = fs::read_to_string(dir.path().join(MAIN_REPORT)).unwrap();
        assert!(main.contains("| 128 B | 97.66 KiB/s |"));
        assert!(!main.contains("fig0"));
        assert!(!dir.path().join("fig0.svg").exists());
    }

    #[test]
    fn test_empty_bucket_fails_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let mut report = Report::create(dir.path(), Box::new(SvgRenderer)).unwrap();
        let before = fs::read_to_string(dir.path().join(MAIN_REPORT)).unwrap();
        let mut agg = Aggregator::new(pair(&[128], None));
        agg.new_bucket();

        assert!(matches!(
            report.add_aggregation(&agg),
            Err(BenchError::InvalidResult(_))
        ));
        assert_eq!(fs::read_to_string(dir.path().join(MAIN_REPORT)).unwrap(), before);
        assert_eq!(report.reports_added(), 0);
    }

    #[test]
    fn test_ragged_matrix_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut report = Report::create(dir.path(), Box::new(SvgRenderer)).unwrap();
        let mut agg = Aggregator::new(pair(&[128, 256], None));
        agg.new_bucket();
        agg.ingest(&result(100, &[1.0], &[1000])).unwrap();
        assert!(report.add_aggregation(&agg).is_err());
    }

    #[test]
    fn test_add_timeplot_truncates_to_duration() {
        let dir = tempfile::tempdir().unwrap();
        let mut report = Report::create(dir.path(), Box::new(SvgRenderer)).unwrap();
        // three samples but only two seconds of run time
        report.add_timeplot(&result(100, &[2.5], &[1000])).unwrap();

        let plots = fs::read_to_string(dir.path().join(TIMEPLOT_REPORT)).unwrap();
        assert!(plots.contains("## Timeplot 0"));
        assert!(plots.contains("plot_per_interval_0.svg"));
        assert!(!plots.contains("namespace"));
        let svg = fs::read_to_string(dir.path().join("plot_per_interval_0.svg")).unwrap();
        assert!(svg.contains("time, second"));
        let points = svg
            .split("points=\"")
            .nth(1)
            .and_then(|rest| rest.split('"').next())
            .unwrap();
        assert_eq!(points.split_whitespace().count(), 2);
    }

    #[test]
    fn test_add_timeplot_without_unit_leaves_log_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let mut report = Report::create(dir.path(), Box::new(SvgRenderer)).unwrap();
        let before = fs::read_to_string(dir.path().join(TIMEPLOT_REPORT)).unwrap();
        let yaml = result_yaml(100, &[3.0], &[1000]).replace(", result_output: per_second", "");
        let r = ScenarioResult::from_config(&serde_yaml::from_str(&yaml).unwrap()).unwrap();

        report.add_timeplot(&r).unwrap();
        report.add_timeplot(&r).unwrap();

        assert!(!dir.path().join("plot_per_interval_0.svg").exists());
        assert_eq!(fs::read_to_string(dir.path().join(TIMEPLOT_REPORT)).unwrap(), before);
    }

    #[test]
    fn test_add_timeplot_skips_records_without_samples() {
        let dir = tempfile::tempdir().unwrap();
        let mut report = Report::create(dir.path(), Box::new(SvgRenderer)).unwrap();
        let before = fs::read_to_string(dir.path().join(TIMEPLOT_REPORT)).unwrap();
        let yaml = result_yaml(100, &[3.0], &[1000]).replace("perinterval: [5, 6, 7]", "perinterval: []");
        let r = ScenarioResult::from_config(&serde_yaml::from_str(&yaml).unwrap()).unwrap();

        report.add_timeplot(&r).unwrap();

        assert_eq!(fs::read_to_string(dir.path().join(TIMEPLOT_REPORT)).unwrap(), before);
    }

    #[test]
    fn test_timeplot_sections_are_numbered_per_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut report = Report::create(dir.path(), Box::new(SvgRenderer)).unwrap();

        report.add_timeplot(&result(100, &[3.0, 3.0], &[10, 20])).unwrap();
        report.add_timeplot(&result(100, &[3.0], &[10])).unwrap();

        let plots = fs::read_to_string(dir.path().join(TIMEPLOT_REPORT)).unwrap();
        assert_eq!(plots.matches("## Timeplot ").count(), 2);
        assert!(plots.contains("## Timeplot 0"));
        assert!(plots.contains("## Timeplot 2"));
        for n in 0..3 {
            assert!(dir.path().join(format!("plot_per_interval_{n}.svg")).exists());
        }
    }
}
