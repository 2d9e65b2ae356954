//! Chart rendering
//!
//! The report embeds two kinds of figures: grouped bar charts of the
//! throughput matrix and line charts of per-interval operation counts.
//! Charts are described as plain data ([`BarChart`], [`LineChart`]) and drawn
//! by a [`ChartRenderer`]. [`SvgRenderer`] writes self-contained SVG files
//! that render inline in markdown viewers.

use std::{fmt::Write as _, fs, path::Path};

use crate::types::BenchResult;

const WIDTH: f64 = 960.0;
const HEIGHT: f64 = 540.0;
const MARGIN_LEFT: f64 = 90.0;
const MARGIN_RIGHT: f64 = 30.0;
const MARGIN_TOP: f64 = 40.0;
const MARGIN_BOTTOM: f64 = 70.0;
const Y_TICKS: usize = 5;

const PALETTE: &[&str] = &[
    "#1f77b4", "#ff7f0e", "#2ca02c", "#d62728", "#9467bd", "#8c564b", "#e377c2", "#7f7f7f",
];

/// One bar group member: a bucket of the throughput matrix
#[derive(Debug, Clone, PartialEq)]
pub struct BarSeries {
    pub label: String,
    pub values: Vec<f64>,
    /// Text drawn above each bar
    pub bar_labels: Vec<String>,
}

/// Grouped bar chart, one group per category
#[derive(Debug, Clone, PartialEq)]
pub struct BarChart {
    pub x_label: String,
    pub y_label: String,
    pub categories: Vec<String>,
    pub series: Vec<BarSeries>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LineChart {
    pub x_label: String,
    pub y_label: String,
    pub points: Vec<(f64, f64)>,
}

/// Backend that turns chart descriptions into image files
pub trait ChartRenderer {
    /// File extension of the produced images, without the dot
    fn extension(&self) -> &'static str;

    fn render_bar(&self, chart: &BarChart, path: &Path) -> BenchResult<()>;

    fn render_line(&self, chart: &LineChart, path: &Path) -> BenchResult<()>;
}

/// Renders charts as standalone SVG documents
#[derive(Debug, Clone, Copy, Default)]
pub struct SvgRenderer;

impl ChartRenderer for SvgRenderer {
    fn extension(&self) -> &'static str {
        "svg"
    }

    fn render_bar(&self, chart: &BarChart, path: &Path) -> BenchResult<()> {
        fs::write(path, bar_svg(chart))?;
        Ok(())
    }

    fn render_line(&self, chart: &LineChart, path: &Path) -> BenchResult<()> {
        fs::write(path, line_svg(chart))?;
        Ok(())
    }
}

/// Rounds `max` up to a value that divides evenly into axis ticks
fn nice_max(max: f64) -> f64 {
    if max <= 0.0 || !max.is_finite() {
        return 1.0;
    }
    let magnitude = 10f64.powf(max.log10().floor());
    let scaled = max / magnitude;
    let step = [1.0, 2.0, 2.5, 5.0, 10.0]
        .into_iter()
        .find(|s| scaled <= *s)
        .unwrap_or(10.0);
    step * magnitude
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn format_tick(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{value:.0}")
    } else {
        format!("{value:.2}")
    }
}

struct Plot {
    svg: String,
    x0: f64,
    y0: f64,
    width: f64,
    height: f64,
    y_max: f64,
}

impl Plot {
    fn new(x_label: &str, y_label: &str, y_max: f64) -> Self {
        let mut svg = String::new();
        let _ = writeln!(
            svg,
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{WIDTH}" height="{HEIGHT}" viewBox="0 0 {WIDTH} {HEIGHT}" font-family="sans-serif" font-size="12">"#
        );
        let _ = writeln!(svg, r#"<rect width="100%" height="100%" fill="white"/>"#);

        let plot = Self {
            svg,
            x0: MARGIN_LEFT,
            y0: HEIGHT - MARGIN_BOTTOM,
            width: WIDTH - MARGIN_LEFT - MARGIN_RIGHT,
            height: HEIGHT - MARGIN_TOP - MARGIN_BOTTOM,
            y_max: nice_max(y_max),
        };
        plot.with_axes(x_label, y_label)
    }

    fn with_axes(mut self, x_label: &str, y_label: &str) -> Self {
        let (x0, y0, w, h) = (self.x0, self.y0, self.width, self.height);
        let _ = writeln!(
            self.svg,
            r#"<line x1="{x0}" y1="{y0}" x2="{}" y2="{y0}" stroke="black"/>"#,
            x0 + w
        );
        let _ = writeln!(
            self.svg,
            r#"<line x1="{x0}" y1="{y0}" x2="{x0}" y2="{}" stroke="black"/>"#,
            y0 - h
        );

        for i in 0..=Y_TICKS {
            let value = self.y_max * i as f64 / Y_TICKS as f64;
            let y = self.y_of(value);
            let _ = writeln!(
                self.svg,
                r##"<line x1="{x0}" y1="{y:.1}" x2="{}" y2="{y:.1}" stroke="#dddddd"/>"##,
                x0 + w
            );
            let _ = writeln!(
                self.svg,
                r#"<text x="{}" y="{:.1}" text-anchor="end">{}</text>"#,
                x0 - 6.0,
                y + 4.0,
                format_tick(value)
            );
        }

        let _ = writeln!(
            self.svg,
            r#"<text x="{:.1}" y="{}" text-anchor="middle">{}</text>"#,
            x0 + w / 2.0,
            HEIGHT - 20.0,
            escape(x_label)
        );
        let _ = writeln!(
            self.svg,
            r#"<text x="20" y="{:.1}" text-anchor="middle" transform="rotate(-90 20 {:.1})">{}</text>"#,
            y0 - h / 2.0,
            y0 - h / 2.0,
            escape(y_label)
        );
        self
    }

    fn y_of(&self, value: f64) -> f64 {
        self.y0 - self.height * (value / self.y_max)
    }

    fn finish(mut self) -> String {
        self.svg.push_str("</svg>\n");
        self.svg
    }
}

/// Draws a grouped bar chart
pub fn bar_svg(chart: &BarChart) -> String {
    let max = chart
        .series
        .iter()
        .flat_map(|s| s.values.iter().copied())
        .fold(0.0, f64::max);
    let mut plot = Plot::new(&chart.x_label, &chart.y_label, max);

    let groups = chart.categories.len().max(1) as f64;
    let group_width = plot.width / groups;
    let bar_width = group_width * 0.8 / chart.series.len().max(1) as f64;

    for (c, category) in chart.categories.iter().enumerate() {
        let group_x = plot.x0 + group_width * c as f64;
        let _ = writeln!(
            plot.svg,
            r#"<text x="{:.1}" y="{}" text-anchor="middle">{}</text>"#,
            group_x + group_width / 2.0,
            plot.y0 + 18.0,
            escape(category)
        );

        for (s, series) in chart.series.iter().enumerate() {
            let Some(&value) = series.values.get(c) else {
                continue;
            };
            let x = group_x + group_width * 0.1 + bar_width * s as f64;
            let y = plot.y_of(value);
            let color = PALETTE[s % PALETTE.len()];
            let _ = writeln!(
                plot.svg,
                r#"<rect x="{x:.1}" y="{y:.1}" width="{bar_width:.1}" height="{:.1}" fill="{color}"/>"#,
                plot.y0 - y
            );
            if let Some(label) = series.bar_labels.get(c) {
                let _ = writeln!(
                    plot.svg,
                    r#"<text x="{:.1}" y="{:.1}" text-anchor="middle" font-size="10">{}</text>"#,
                    x + bar_width / 2.0,
                    y - 4.0,
                    escape(label)
                );
            }
        }
    }

    // legend only when there is something to tell apart
    if chart.series.len() > 1 || chart.series.iter().any(|s| !s.label.is_empty()) {
        for (s, series) in chart.series.iter().enumerate() {
            let y = MARGIN_TOP + 16.0 * s as f64;
            let x = plot.x0 + plot.width - 180.0;
            let _ = writeln!(
                plot.svg,
                r#"<rect x="{x:.1}" y="{:.1}" width="10" height="10" fill="{}"/>"#,
                y - 9.0,
                PALETTE[s % PALETTE.len()]
            );
            let _ = writeln!(
                plot.svg,
                r#"<text x="{:.1}" y="{y:.1}">{}</text>"#,
                x + 14.0,
                escape(&series.label)
            );
        }
    }

    plot.finish()
}

/// Draws a single-series line chart
pub fn line_svg(chart: &LineChart) -> String {
    let y_max = chart.points.iter().map(|p| p.1).fold(0.0, f64::max);
    let x_min = chart.points.iter().map(|p| p.0).fold(f64::INFINITY, f64::min);
    let x_max = chart.points.iter().map(|p| p.0).fold(f64::NEG_INFINITY, f64::max);
    let mut plot = Plot::new(&chart.x_label, &chart.y_label, y_max);

    let span = if x_max > x_min { x_max - x_min } else { 1.0 };
    let x_of = |x: f64| plot.x0 + plot.width * (x - x_min) / span;

    let mut points = String::new();
    for &(x, y) in &chart.points {
        let _ = write!(points, "{:.1},{:.1} ", x_of(x), plot.y_of(y));
    }
    let mut ticks = String::new();
    if let (Some(first), Some(last)) = (chart.points.first(), chart.points.last()) {
        for x in [first.0, last.0] {
            let _ = writeln!(
                ticks,
                r#"<text x="{:.1}" y="{}" text-anchor="middle">{}</text>"#,
                x_of(x),
                plot.y0 + 18.0,
                format_tick(x)
            );
        }
    }

    let _ = writeln!(
        plot.svg,
        r#"<polyline points="{}" fill="none" stroke="{}" stroke-width="2"/>"#,
        points.trim_end(),
        PALETTE[0]
    );
    plot.svg.push_str(&ticks);
    plot.finish()
}
