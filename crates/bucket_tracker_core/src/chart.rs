//! Size-over-time chart rendering.
//!
//! Points stream in page by page through [`SeriesBuilder`], which keeps at
//! most `max_points` by merging neighbours (keeping the larger value) once
//! full. [`render_svg`] turns the collected series into a standalone SVG
//! document.

use std::fmt::Write as _;

pub const DEFAULT_MAX_POINTS: usize = 1_000;
pub const DEFAULT_WIDTH: u32 = 1_000;
pub const DEFAULT_HEIGHT: u32 = 600;

const MARGIN_LEFT: f64 = 80.0;
const MARGIN_RIGHT: f64 = 220.0;
const MARGIN_TOP: f64 = 50.0;
const MARGIN_BOTTOM: f64 = 70.0;
const TICKS: usize = 5;
const PALETTE: [&str; 6] = [
    "#1f77b4", "#2ca02c", "#9467bd", "#8c564b", "#e377c2", "#17becf",
];
const HIGH_COLOR: &str = "#d62728";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeriesPoint {
    pub timestamp_ms: i64,
    pub value: f64,
}

/// Bounded accumulator for a time-ordered stream of points.
#[derive(Debug, Clone)]
pub struct SeriesBuilder {
    max_points: usize,
    stride: usize,
    points: Vec<SeriesPoint>,
    pending: Option<SeriesPoint>,
    pending_count: usize,
    seen: usize,
}

impl SeriesBuilder {
    pub fn new(max_points: usize) -> Self {
        let max_points = max_points.max(2);
        Self {
            max_points,
            stride: 1,
            points: Vec::with_capacity(max_points),
            pending: None,
            pending_count: 0,
            seen: 0,
        }
    }

    pub fn push(&mut self, point: SeriesPoint) {
        self.seen += 1;
        self.pending = Some(match self.pending {
            Some(current) => keep_larger(current, point),
            None => point,
        });
        self.pending_count += 1;

        if self.pending_count >= self.stride {
            self.flush_pending();
        }
    }

    /// Number of points pushed, before any merging.
    pub fn seen(&self) -> usize {
        self.seen
    }

    pub fn finish(mut self) -> Vec<SeriesPoint> {
        self.flush_pending();
        self.points
    }

    fn flush_pending(&mut self) {
        if let Some(point) = self.pending.take() {
            self.points.push(point);
            self.pending_count = 0;
            if self.points.len() >= self.max_points {
                self.compact();
            }
        }
    }

    fn compact(&mut self) {
        self.points = self
            .points
            .chunks(2)
            .map(|pair| match pair {
                [left, right] => keep_larger(*left, *right),
                [single] => *single,
                _ => unreachable!("chunks(2) yields one or two points"),
            })
            .collect();
        self.stride = self.stride.saturating_mul(2);
    }
}

fn keep_larger(left: SeriesPoint, right: SeriesPoint) -> SeriesPoint {
    if right.value >= left.value {
        right
    } else {
        left
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChartSeries {
    pub label: String,
    pub points: Vec<SeriesPoint>,
    pub historical_high: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChartSpec {
    pub title: String,
    pub x_label: String,
    pub y_label: String,
    pub width: u32,
    pub height: u32,
    /// Time origin for the x axis; points are drawn relative to it in seconds.
    pub reference_ms: i64,
    pub series: Vec<ChartSeries>,
}

impl ChartSpec {
    pub fn bucket_sizes(reference_ms: i64, series: Vec<ChartSeries>) -> Self {
        Self {
            title: "S3 Bucket Size Over Time".to_string(),
            x_label: "Relative Time (seconds)".to_string(),
            y_label: "Size (Bytes)".to_string(),
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            reference_ms,
            series,
        }
    }

    pub fn point_count(&self) -> usize {
        self.series.iter().map(|series| series.points.len()).sum()
    }
}

struct Bounds {
    x_min: f64,
    x_max: f64,
    y_max: f64,
}

impl Bounds {
    fn of(spec: &ChartSpec) -> Self {
        let relative =
            |point: &SeriesPoint| (point.timestamp_ms - spec.reference_ms) as f64 / 1_000.0;
        let xs = spec
            .series
            .iter()
            .flat_map(|series| series.points.iter().map(relative));
        let (mut x_min, mut x_max) = xs.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), x| {
            (lo.min(x), hi.max(x))
        });
        if !x_min.is_finite() || !x_max.is_finite() {
            x_min = -10.0;
            x_max = 0.0;
        }
        if (x_max - x_min).abs() < f64::EPSILON {
            x_min -= 1.0;
            x_max += 1.0;
        }

        let y_data = spec
            .series
            .iter()
            .flat_map(|series| {
                series
                    .points
                    .iter()
                    .map(|point| point.value)
                    .chain(series.historical_high)
            })
            .fold(0.0_f64, f64::max);
        let y_max = if y_data > 0.0 { y_data * 1.1 } else { 1.0 };

        Self { x_min, x_max, y_max }
    }
}

pub fn render_svg(spec: &ChartSpec) -> String {
    let width = f64::from(spec.width.max(400));
    let height = f64::from(spec.height.max(300));
    let plot_w = width - MARGIN_LEFT - MARGIN_RIGHT;
    let plot_h = height - MARGIN_TOP - MARGIN_BOTTOM;
    let bounds = Bounds::of(spec);

    let sx = |x: f64| MARGIN_LEFT + (x - bounds.x_min) / (bounds.x_max - bounds.x_min) * plot_w;
    let sy = |y: f64| MARGIN_TOP + plot_h - (y / bounds.y_max) * plot_h;

    let mut svg = String::new();
    let _ = writeln!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{width}" height="{height}" viewBox="0 0 {width} {height}" font-family="sans-serif" font-size="12">"#
    );
    let _ = writeln!(
        svg,
        r#"<rect x="0" y="0" width="{width}" height="{height}" fill="white"/>"#
    );
    let _ = writeln!(
        svg,
        r#"<text x="{}" y="28" text-anchor="middle" font-size="16">{}</text>"#,
        MARGIN_LEFT + plot_w / 2.0,
        escape_xml(&spec.title)
    );

    // axes
    let x_axis_y = MARGIN_TOP + plot_h;
    let _ = writeln!(
        svg,
        r#"<line x1="{MARGIN_LEFT}" y1="{x_axis_y}" x2="{}" y2="{x_axis_y}" stroke="black"/>"#,
        MARGIN_LEFT + plot_w
    );
    let _ = writeln!(
        svg,
        r#"<line x1="{MARGIN_LEFT}" y1="{MARGIN_TOP}" x2="{MARGIN_LEFT}" y2="{x_axis_y}" stroke="black"/>"#
    );

    for tick in 0..=TICKS {
        let fraction = tick as f64 / TICKS as f64;
        let x_value = bounds.x_min + fraction * (bounds.x_max - bounds.x_min);
        let x = sx(x_value);
        let _ = writeln!(
            svg,
            r#"<text x="{x:.1}" y="{:.1}" text-anchor="middle">{x_value:.1}</text>"#,
            x_axis_y + 18.0
        );

        let y_value = fraction * bounds.y_max;
        let y = sy(y_value);
        let _ = writeln!(
            svg,
            r##"<line x1="{MARGIN_LEFT}" y1="{y:.1}" x2="{:.1}" y2="{y:.1}" stroke="#e0e0e0"/>"##,
            MARGIN_LEFT + plot_w
        );
        let _ = writeln!(
            svg,
            r#"<text x="{:.1}" y="{:.1}" text-anchor="end">{y_value:.0}</text>"#,
            MARGIN_LEFT - 8.0,
            y + 4.0
        );
    }

    let _ = writeln!(
        svg,
        r#"<text x="{:.1}" y="{:.1}" text-anchor="middle">{}</text>"#,
        MARGIN_LEFT + plot_w / 2.0,
        height - 20.0,
        escape_xml(&spec.x_label)
    );
    let _ = writeln!(
        svg,
        r#"<text x="20" y="{:.1}" text-anchor="middle" transform="rotate(-90 20 {:.1})">{}</text>"#,
        MARGIN_TOP + plot_h / 2.0,
        MARGIN_TOP + plot_h / 2.0,
        escape_xml(&spec.y_label)
    );

    if spec.point_count() == 0 {
        let _ = writeln!(
            svg,
            r##"<text x="{:.1}" y="{:.1}" text-anchor="middle" fill="#666666">No data points</text>"##,
            MARGIN_LEFT + plot_w / 2.0,
            MARGIN_TOP + plot_h / 2.0
        );
    }

    let legend_x = MARGIN_LEFT + plot_w + 20.0;
    let mut legend_y = MARGIN_TOP + 10.0;
    for (index, series) in spec.series.iter().enumerate() {
        let color = PALETTE[index % PALETTE.len()];

        if !series.points.is_empty() {
            let coords: Vec<String> = series
                .points
                .iter()
                .map(|point| {
                    let x = (point.timestamp_ms - spec.reference_ms) as f64 / 1_000.0;
                    format!("{:.1},{:.1}", sx(x), sy(point.value))
                })
                .collect();
            let _ = writeln!(
                svg,
                r#"<polyline fill="none" stroke="{color}" stroke-width="2" points="{}"/>"#,
                coords.join(" ")
            );
        }

        let _ = writeln!(
            svg,
            r#"<line x1="{legend_x:.1}" y1="{legend_y:.1}" x2="{:.1}" y2="{legend_y:.1}" stroke="{color}" stroke-width="2"/>"#,
            legend_x + 20.0
        );
        let _ = writeln!(
            svg,
            r#"<text x="{:.1}" y="{:.1}">{}</text>"#,
            legend_x + 26.0,
            legend_y + 4.0,
            escape_xml(&series.label)
        );
        legend_y += 18.0;

        if let Some(high) = series.historical_high {
            let y = sy(high);
            let _ = writeln!(
                svg,
                r#"<line x1="{MARGIN_LEFT}" y1="{y:.1}" x2="{:.1}" y2="{y:.1}" stroke="{HIGH_COLOR}" stroke-dasharray="6 4"/>"#,
                MARGIN_LEFT + plot_w
            );
            let _ = writeln!(
                svg,
                r#"<line x1="{legend_x:.1}" y1="{legend_y:.1}" x2="{:.1}" y2="{legend_y:.1}" stroke="{HIGH_COLOR}" stroke-dasharray="6 4"/>"#,
                legend_x + 20.0
            );
            let _ = writeln!(
                svg,
                r#"<text x="{:.1}" y="{:.1}">{} historical high</text>"#,
                legend_x + 26.0,
                legend_y + 4.0,
                escape_xml(&series.label)
            );
            legend_y += 18.0;
        }
    }

    svg.push_str("</svg>\n");
    svg
}

fn escape_xml(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(timestamp_ms: i64, value: f64) -> SeriesPoint {
        SeriesPoint {
            timestamp_ms,
            value,
        }
    }

    #[test]
    fn builder_keeps_everything_below_capacity() {
        let mut builder = SeriesBuilder::new(10);
        for i in 0..5 {
            builder.push(point(i, i as f64));
        }
        assert_eq!(builder.finish().len(), 5);
    }

    #[test]
    fn builder_stays_bounded_and_keeps_peaks() {
        let mut builder = SeriesBuilder::new(64);
        for i in 0..10_000 {
            let value = if i == 7_777 { 1_000_000.0 } else { (i % 50) as f64 };
            builder.push(point(i, value));
        }
        assert_eq!(builder.seen(), 10_000);
        let points = builder.finish();
        assert!(points.len() <= 64);
        assert!(points.iter().any(|p| p.value == 1_000_000.0));
        assert!(points
            .windows(2)
            .all(|pair| pair[0].timestamp_ms < pair[1].timestamp_ms));
    }

    #[test]
    fn empty_chart_is_valid_svg_with_caption() {
        let svg = render_svg(&ChartSpec::bucket_sizes(0, Vec::new()));
        assert!(svg.starts_with("<svg"));
        assert!(svg.trim_end().ends_with("</svg>"));
        assert!(svg.contains("No data points"));
        assert!(!svg.contains("<polyline"));
    }

    #[test]
    fn renders_series_and_historical_high() {
        let spec = ChartSpec::bucket_sizes(
            20_000,
            vec![ChartSeries {
                label: "tracked & <co>".to_string(),
                points: vec![point(0, 19.0), point(10_000, 46.0), point(20_000, 2.0)],
                historical_high: Some(46.0),
            }],
        );
        let svg = render_svg(&spec);
        assert_eq!(svg.matches("<polyline").count(), 1);
        assert!(svg.contains("stroke-dasharray"));
        assert!(svg.contains("tracked &amp; &lt;co&gt; historical high"));
        assert!(!svg.contains("No data points"));
    }

    #[test]
    fn single_point_chart_has_finite_coordinates() {
        let spec = ChartSpec::bucket_sizes(
            5_000,
            vec![ChartSeries {
                label: "b1".to_string(),
                points: vec![point(5_000, 0.0)],
                historical_high: None,
            }],
        );
        let svg = render_svg(&spec);
        assert!(!svg.contains("NaN"));
        assert!(!svg.contains("inf"));
    }
}
