//! Backend-neutral figure model. Builders turn analysis output into
//! [`Figure`]s; a [`PlotBackend`] (the CLI's plotters renderer) draws them.

use crate::config::DisplayRange;
use crate::detectors::events::Event;
use crate::metrics::power::to_db;
use crate::signal::Channel;
use crate::spectral::Spectrogram;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Axis {
    pub label: Option<String>,
    /// When set, values on this axis are seconds after this instant and
    /// ticks also show the wall-clock time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_origin: Option<DateTime<Utc>>,
}

impl Axis {
    fn new() -> Self {
        Self {
            label: None,
            time_origin: None,
        }
    }

    /// Tick text: `"<offset>s MM-DD HH:MM"` with a time origin, the plain
    /// value otherwise.
    pub fn tick_label(&self, value: f64) -> String {
        match self.time_origin {
            Some(origin) => format!("{value:.0}s {}", format_offset(Some(origin), value)),
            None => format!("{value:.1}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Style {
    pub width: f32,
    pub color: Color,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color(pub u32);

impl Color {
    pub const RED: Color = Color(0xD62728);
    pub const BLUE: Color = Color(0x1F77B4);

    pub fn rgb(self) -> (u8, u8, u8) {
        (
            ((self.0 >> 16) & 0xFF) as u8,
            ((self.0 >> 8) & 0xFF) as u8,
            (self.0 & 0xFF) as u8,
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineSeries {
    pub name: String,
    pub points: Vec<[f64; 2]>,
    pub style: Style,
}

/// Filled rectangle spanning `x[0]..x[1]`, `y[0]..y[1]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeatCell {
    pub x: [f64; 2],
    pub y: [f64; 2],
    pub color: Color,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeatmapSeries {
    pub name: String,
    pub cells: Vec<HeatCell>,
}

/// Horizontal or arbitrary line segments, e.g. event extents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentSeries {
    pub name: String,
    pub segments: Vec<[[f64; 2]; 2]>,
    pub style: Style,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkerSeries {
    pub name: String,
    pub points: Vec<[f64; 2]>,
    pub style: Style,
}

/// Histogram bars as `[left, right, height]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BarSeries {
    pub name: String,
    pub bars: Vec<[f64; 3]>,
    pub style: Style,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Series {
    Line(LineSeries),
    Heatmap(HeatmapSeries),
    Segments(SegmentSeries),
    Markers(MarkerSeries),
    Bars(BarSeries),
}

impl Series {
    fn extent(&self) -> Vec<[f64; 2]> {
        match self {
            Series::Line(line) => line.points.clone(),
            Series::Markers(markers) => markers.points.clone(),
            Series::Heatmap(map) => map
                .cells
                .iter()
                .flat_map(|c| [[c.x[0], c.y[0]], [c.x[1], c.y[1]]])
                .collect(),
            Series::Segments(segs) => segs.segments.iter().flatten().copied().collect(),
            Series::Bars(bars) => bars
                .bars
                .iter()
                .flat_map(|b| [[b[0], 0.0], [b[1], b[2]]])
                .collect(),
        }
    }
}

/// Text placed at a data coordinate. `align_right` puts the text to the
/// left of the anchor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Annotation {
    pub at: [f64; 2],
    pub text: String,
    pub color: Color,
    pub align_right: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Figure {
    pub title: Option<String>,
    pub x: Axis,
    pub y: Axis,
    pub series: Vec<Series>,
    pub annotations: Vec<Annotation>,
}

impl Figure {
    pub fn new(title: impl Into<Option<String>>) -> Self {
        Self {
            title: title.into(),
            x: Axis::new(),
            y: Axis::new(),
            series: Vec::new(),
            annotations: Vec::new(),
        }
    }

    pub fn with_labels(mut self, x: &str, y: &str) -> Self {
        self.x.label = Some(x.into());
        self.y.label = Some(y.into());
        self
    }

    /// Anchor the x axis (seconds) to an absolute start time.
    pub fn with_time_origin(mut self, origin: Option<DateTime<Utc>>) -> Self {
        self.x.time_origin = origin;
        self
    }

    pub fn add_series(&mut self, series: Series) {
        self.series.push(series);
    }

    /// Data range `([x_min, x_max], [y_min, y_max])` over finite points.
    /// Degenerate spans are widened so a backend can always build axes.
    pub fn bounds(&self) -> ([f64; 2], [f64; 2]) {
        let mut x = [f64::INFINITY, f64::NEG_INFINITY];
        let mut y = [f64::INFINITY, f64::NEG_INFINITY];
        let points = self
            .series
            .iter()
            .flat_map(Series::extent)
            .chain(self.annotations.iter().map(|a| a.at));
        for [px, py] in points {
            if px.is_finite() && py.is_finite() {
                x = [x[0].min(px), x[1].max(px)];
                y = [y[0].min(py), y[1].max(py)];
            }
        }
        (widen(x), widen(y))
    }
}

fn widen(range: [f64; 2]) -> [f64; 2] {
    if !(range[0].is_finite() && range[1].is_finite()) {
        return [0.0, 1.0];
    }
    if range[1] - range[0] < 1e-12 {
        return [range[0] - 0.5, range[1] + 0.5];
    }
    range
}

/// One figure in a vertical stack; `weight` sets its share of the height.
#[derive(Debug, Clone)]
pub struct Panel {
    pub figure: Figure,
    pub weight: u32,
}

pub trait PlotBackend {
    type Error;
    /// Draw the panels top to bottom.
    fn draw(&mut self, panels: &[Panel]) -> Result<(), Self::Error>;
}

pub fn decimate_points(points: &[[f64; 2]], max_points: usize) -> Vec<[f64; 2]> {
    if points.len() <= max_points {
        return points.to_vec();
    }
    let bucket_size = points.len() as f64 / max_points as f64;
    let mut result = Vec::with_capacity(max_points);
    for i in 0..max_points {
        let start = (i as f64 * bucket_size).floor() as usize;
        if start >= points.len() {
            break;
        }
        result.push(points[start]);
    }
    result
}

const PLASMA: [(f64, f64, f64); 5] = [
    (13.0, 8.0, 135.0),
    (126.0, 3.0, 168.0),
    (204.0, 71.0, 120.0),
    (248.0, 149.0, 64.0),
    (240.0, 249.0, 33.0),
];

/// Plasma-like gradient; `v` is clamped to `0..=1`.
pub fn plasma(v: f64) -> Color {
    let v = if v.is_nan() { 0.0 } else { v.clamp(0.0, 1.0) };
    let scaled = v * (PLASMA.len() - 1) as f64;
    let idx = (scaled.floor() as usize).min(PLASMA.len() - 2);
    let t = scaled - idx as f64;
    let (a, b) = (PLASMA[idx], PLASMA[idx + 1]);
    let mix = |p: f64, q: f64| (p + (q - p) * t).round() as u32;
    Color((mix(a.0, b.0) << 16) | (mix(a.1, b.1) << 8) | mix(a.2, b.2))
}

/// Half-width of each bin around its center.
fn bin_edges(centers: &[f64]) -> Vec<[f64; 2]> {
    let half = match centers {
        [a, b, ..] => (b - a) / 2.0,
        _ => 0.5,
    };
    centers.iter().map(|c| [c - half, c + half]).collect()
}

pub fn figure_from_spectrogram(spec: &Spectrogram, range: DisplayRange) -> Figure {
    let mut fig = Figure::new(Some("Specgram of frequency".into()))
        .with_labels("time (s)", "freq (hz)");
    let span = (range.max_db - range.min_db).max(f64::EPSILON);
    let x_edges = bin_edges(&spec.times);
    let y_edges = bin_edges(&spec.freqs);
    let mut cells = Vec::with_capacity(spec.n_freqs() * spec.n_times());
    for (row, y) in spec.power.iter().zip(&y_edges) {
        for (p, x) in row.iter().zip(&x_edges) {
            let level = (to_db(*p) - range.min_db) / span;
            cells.push(HeatCell {
                x: *x,
                y: [y[0].max(0.0), y[1]],
                color: plasma(level),
            });
        }
    }
    fig.add_series(Series::Heatmap(HeatmapSeries {
        name: "power".into(),
        cells,
    }));
    fig
}

/// Label for an offset: absolute `MM-DD HH:MM` when an origin is known,
/// otherwise the offset in seconds.
pub fn format_offset(origin: Option<DateTime<Utc>>, offset_s: f64) -> String {
    let micros = (offset_s * 1e6).round() as i64;
    match origin.and_then(|o| o.checked_add_signed(Duration::microseconds(micros))) {
        Some(t) => t.format("%m-%d %H:%M").to_string(),
        None => format!("{offset_s:.1}"),
    }
}

/// Power curve with peak markers and one bar per event at its boundary level.
pub fn figure_from_power_curve(
    curve: &[f64],
    time_bins: &[f64],
    events: &[Event],
    peak_bins: &[usize],
    origin: Option<DateTime<Utc>>,
) -> Figure {
    let mut fig = Figure::new(None).with_labels("time (s)", "power (dB)");
    fig.add_series(Series::Line(LineSeries {
        name: "power".into(),
        points: time_bins
            .iter()
            .zip(curve)
            .map(|(t, p)| [*t, *p])
            .collect(),
        style: Style {
            width: 1.4,
            color: Color::BLUE,
        },
    }));
    fig.add_series(Series::Markers(MarkerSeries {
        name: "peaks".into(),
        points: peak_bins
            .iter()
            .filter(|&&i| i < curve.len() && i < time_bins.len())
            .map(|&i| [time_bins[i], curve[i]])
            .collect(),
        style: Style {
            width: 1.0,
            color: Color::RED,
        },
    }));
    fig.add_series(Series::Segments(SegmentSeries {
        name: "events".into(),
        segments: events
            .iter()
            .map(|e| {
                [
                    [e.start_offset_s, e.boundary_power_db],
                    [e.end_offset_s, e.boundary_power_db],
                ]
            })
            .collect(),
        style: Style {
            width: 2.0,
            color: Color::RED,
        },
    }));
    for e in events {
        fig.annotations.push(Annotation {
            at: [e.end_offset_s, e.boundary_power_db],
            text: format!("{:.1}s", e.duration_s),
            color: Color::RED,
            align_right: false,
        });
        fig.annotations.push(Annotation {
            at: [e.start_offset_s, e.boundary_power_db],
            text: format_offset(origin, e.start_offset_s),
            color: Color::RED,
            align_right: true,
        });
    }
    fig
}

/// Channel against time (seconds from the first row), decimated.
pub fn figure_from_channel(channel: &Channel, fs: f64, max_points: usize, color: u32) -> Figure {
    let dt = 1.0 / fs.max(f64::MIN_POSITIVE);
    let points: Vec<[f64; 2]> = channel
        .data
        .iter()
        .enumerate()
        .filter(|(_, v)| v.is_finite())
        .map(|(i, value)| [i as f64 * dt, *value])
        .collect();
    let mut fig = Figure::new(Some(channel.name.clone())).with_labels("time (s)", &channel.name);
    fig.add_series(Series::Line(LineSeries {
        name: channel.name.clone(),
        points: decimate_points(&points, max_points),
        style: Style {
            width: 1.4,
            color: Color(color),
        },
    }));
    fig
}

/// Equal-width histogram of finite values as `[left, right, count]`.
pub fn histogram(values: &[f64], bins: usize) -> Vec<[f64; 3]> {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() || bins == 0 {
        return Vec::new();
    }
    let lo = finite.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = finite.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let (lo, hi) = if hi > lo { (lo, hi) } else { (lo - 0.5, hi + 0.5) };
    let width = (hi - lo) / bins as f64;
    let mut counts = vec![0usize; bins];
    for v in finite {
        let idx = (((v - lo) / width) as usize).min(bins - 1);
        counts[idx] += 1;
    }
    counts
        .into_iter()
        .enumerate()
        .map(|(i, c)| {
            let left = lo + i as f64 * width;
            [left, left + width, c as f64]
        })
        .collect()
}

/// Histogram of the spacing between consecutive samples, in milliseconds.
pub fn figure_from_interval_histogram(intervals_s: &[f64], bins: usize) -> Figure {
    let ms: Vec<f64> = intervals_s.iter().map(|dt| dt * 1e3).collect();
    let mut fig = Figure::new(Some("Sample intervals".into()))
        .with_labels("interval (ms)", "count");
    fig.add_series(Series::Bars(BarSeries {
        name: "intervals".into(),
        bars: histogram(&ms, bins),
        style: Style {
            width: 1.0,
            color: Color::BLUE,
        },
    }));
    fig
}
