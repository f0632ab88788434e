use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use imuscope_lib::{
    analyze,
    config::{AnalysisConfig, ChannelSource, DisplayRange},
    io::csv::load_imu_csv,
    plot::{
        self, figure_from_channel, figure_from_interval_histogram, figure_from_power_curve,
        figure_from_spectrogram, format_offset, Figure, Panel, PlotBackend,
    },
    spectral::{Detrend, Window},
    summarize, AnalysisReport,
};
use log::info;
use plotters::coord::Shift;
use plotters::prelude::*;
use plotters::style::text_anchor::{HPos, Pos, VPos};
use std::path::{Path, PathBuf};

const TEMP_COLUMN: &str = "temp";

#[derive(Parser)]
#[command(
    name = "imuscope",
    version,
    about = "imuscope: spectral event detection for IMU logs"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum WindowArg {
    None,
    Hann,
    Hamming,
}

impl From<WindowArg> for Window {
    fn from(arg: WindowArg) -> Self {
        match arg {
            WindowArg::None => Window::None,
            WindowArg::Hann => Window::Hann,
            WindowArg::Hamming => Window::Hamming,
        }
    }
}

/// Flags shared by `analyze` and `events`. Unset flags keep the value from
/// `--config` (or the built-in default).
#[derive(Args, Debug)]
struct AnalysisArgs {
    #[arg(long)]
    input: PathBuf,
    /// TOML file with analysis settings
    #[arg(long)]
    config: Option<PathBuf>,
    /// Sensor group whose x/y/z magnitude is analyzed (e.g. acc, mag)
    #[arg(long, conflicts_with = "column")]
    channel: Option<String>,
    /// Raw column analyzed as-is
    #[arg(long)]
    column: Option<String>,
    /// Samples per FFT segment
    #[arg(long)]
    nfft: Option<usize>,
    #[arg(long)]
    overlap: Option<usize>,
    /// Rows dropped from each end of the log
    #[arg(long)]
    trim: Option<usize>,
    /// Minimum event peak height (dB)
    #[arg(long, allow_hyphen_values = true)]
    detect_threshold: Option<f64>,
    #[arg(long)]
    detect_rel_height: Option<f64>,
    /// Minimum distance between event peaks (time bins)
    #[arg(long)]
    min_separation: Option<usize>,
    #[arg(long)]
    window: Option<WindowArg>,
    #[arg(long)]
    no_detrend: bool,
    /// Absolute time of the first analyzed sample (RFC 3339 or "YYYY-mm-dd HH:MM:SS", UTC)
    #[arg(long)]
    start: Option<String>,
    /// Render spectrogram and power curve to this PNG
    #[arg(long)]
    plot: Option<PathBuf>,
    #[arg(long, allow_hyphen_values = true)]
    min_power: Option<f64>,
    #[arg(long, allow_hyphen_values = true)]
    max_power: Option<f64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print sample count, duration, sample rate and columns of a log
    Summary {
        #[arg(long)]
        input: PathBuf,
        #[arg(long, default_value_t = 1)]
        trim: usize,
    },
    /// Run the spectral analysis and print the report as JSON
    Analyze(AnalysisArgs),
    /// Run the spectral analysis and print one JSON event per line
    Events(AnalysisArgs),
    /// Render the sample-interval histogram and temperature trace
    AuxPlots {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        out_dir: PathBuf,
        #[arg(long, default_value_t = 1)]
        trim: usize,
        #[arg(long, default_value_t = 50)]
        bins: usize,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    match cli.command {
        Commands::Summary { input, trim } => cmd_summary(&input, trim)?,
        Commands::Analyze(args) => cmd_analyze(&args)?,
        Commands::Events(args) => cmd_events(&args)?,
        Commands::AuxPlots {
            input,
            out_dir,
            trim,
            bins,
        } => cmd_aux_plots(&input, &out_dir, trim, bins)?,
    }
    Ok(())
}

fn build_config(args: &AnalysisArgs) -> Result<AnalysisConfig> {
    let mut cfg = match &args.config {
        Some(path) => AnalysisConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => AnalysisConfig::default(),
    };
    if let Some(group) = &args.channel {
        cfg.channel = ChannelSource::Magnitude(group.clone());
    }
    if let Some(column) = &args.column {
        cfg.channel = ChannelSource::Column(column.clone());
    }
    if let Some(nfft) = args.nfft {
        cfg.window_size = nfft;
    }
    if let Some(overlap) = args.overlap {
        cfg.overlap = overlap;
    }
    if let Some(trim) = args.trim {
        cfg.trim = trim;
    }
    if let Some(threshold) = args.detect_threshold {
        cfg.detection.threshold_db = threshold;
    }
    if let Some(rel_height) = args.detect_rel_height {
        cfg.detection.rel_height = rel_height;
    }
    if let Some(distance) = args.min_separation {
        cfg.detection.min_separation_bins = distance;
    }
    if let Some(window) = args.window {
        cfg.window = window.into();
    }
    if args.no_detrend {
        cfg.detrend = Detrend::None;
    }
    if let Some(min_db) = args.min_power {
        cfg.display.min_db = min_db;
    }
    if let Some(max_db) = args.max_power {
        cfg.display.max_db = max_db;
    }
    Ok(cfg)
}

fn parse_start(text: &str) -> Result<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(text) {
        return Ok(t.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S")
        .map(|naive| naive.and_utc())
        .map_err(|_| anyhow!("unrecognized start time '{text}'"))
}

fn run_analysis(args: &AnalysisArgs) -> Result<AnalysisReport> {
    let cfg = build_config(args)?;
    cfg.validate()?;
    let start = args.start.as_deref().map(parse_start).transpose()?;
    let series = load_imu_csv(&args.input)
        .with_context(|| format!("reading {}", args.input.display()))?;
    let mut report = analyze(series, &cfg)?;
    if let Some(origin) = start {
        report.start_time = Some(origin);
        report.events = report
            .events
            .into_iter()
            .map(|e| e.anchored(origin))
            .collect();
    }
    if let Some(out) = &args.plot {
        render_report(out, &report, cfg.display)?;
        info!("wrote {}", out.display());
    }
    Ok(report)
}

fn cmd_summary(input: &Path, trim: usize) -> Result<()> {
    let series = load_imu_csv(input)
        .with_context(|| format!("reading {}", input.display()))?
        .trim(trim)?;
    let summary = summarize(&series);
    println!("{}", serde_json::to_string(&summary)?);
    Ok(())
}

fn cmd_analyze(args: &AnalysisArgs) -> Result<()> {
    let report = run_analysis(args)?;
    println!("{}", serde_json::to_string(&report)?);
    Ok(())
}

fn cmd_events(args: &AnalysisArgs) -> Result<()> {
    let report = run_analysis(args)?;
    for event in &report.events {
        info!(
            "Starting at {} for {:.1}s",
            format_offset(report.start_time, event.start_offset_s),
            event.duration_s
        );
        println!("{}", serde_json::to_string(event)?);
    }
    Ok(())
}

fn cmd_aux_plots(input: &Path, out_dir: &Path, trim: usize, bins: usize) -> Result<()> {
    let series = load_imu_csv(input)
        .with_context(|| format!("reading {}", input.display()))?
        .trim(trim)?;
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("creating {}", out_dir.display()))?;

    let intervals = series.sample_intervals_s();
    let histogram = figure_from_interval_histogram(&intervals, bins);
    let path = out_dir.join("intervals.png");
    PngBackend::new(&path, (800, 480)).draw(&[Panel {
        figure: histogram,
        weight: 1,
    }])?;
    info!("wrote {}", path.display());

    if series.has_column(TEMP_COLUMN) {
        let fs = series.estimate_sample_rate()?;
        let temp = series.column(TEMP_COLUMN)?;
        let figure = figure_from_channel(&temp, fs, 2000, 0x2CA02C);
        let path = out_dir.join("temperature.png");
        PngBackend::new(&path, (800, 480)).draw(&[Panel { figure, weight: 1 }])?;
        info!("wrote {}", path.display());
    }
    Ok(())
}

fn render_report(out: &Path, report: &AnalysisReport, display: DisplayRange) -> Result<()> {
    let spectrogram =
        figure_from_spectrogram(&report.spectrogram, display).with_time_origin(report.start_time);
    let power = figure_from_power_curve(
        &report.power_curve,
        &report.spectrogram.times,
        &report.events,
        &report.peak_bins,
        report.start_time,
    )
    .with_time_origin(report.start_time);
    PngBackend::new(out, (1200, 900)).draw(&[
        Panel {
            figure: spectrogram,
            weight: 3,
        },
        Panel {
            figure: power,
            weight: 1,
        },
    ])
}

/// Renders figures to a PNG file through plotters' bitmap backend.
struct PngBackend {
    path: PathBuf,
    size: (u32, u32),
}

impl PngBackend {
    fn new(path: &Path, size: (u32, u32)) -> Self {
        Self {
            path: path.to_path_buf(),
            size,
        }
    }
}

impl PlotBackend for PngBackend {
    type Error = anyhow::Error;

    fn draw(&mut self, panels: &[Panel]) -> Result<()> {
        let root = BitMapBackend::new(&self.path, self.size).into_drawing_area();
        root.fill(&WHITE)?;
        let total: u32 = panels.iter().map(|p| p.weight).sum::<u32>().max(1);
        let mut rest = root.clone();
        for (i, panel) in panels.iter().enumerate() {
            let area = if i + 1 == panels.len() {
                rest.clone()
            } else {
                let height = self.size.1 * panel.weight / total;
                let (top, bottom) = rest.split_vertically(height);
                rest = bottom;
                top
            };
            draw_figure(&area, &panel.figure)?;
        }
        root.present()
            .with_context(|| format!("writing {}", self.path.display()))?;
        Ok(())
    }
}

fn rgb(color: plot::Color) -> RGBColor {
    let (r, g, b) = color.rgb();
    RGBColor(r, g, b)
}

fn stroke(width: f32) -> u32 {
    width.round().max(1.0) as u32
}

fn draw_figure(area: &DrawingArea<BitMapBackend<'_>, Shift>, fig: &Figure) -> Result<()> {
    let ([x_min, x_max], [y_min, y_max]) = fig.bounds();
    let mut builder = ChartBuilder::on(area);
    builder.margin(10).x_label_area_size(30).y_label_area_size(50);
    if let Some(title) = &fig.title {
        builder.caption(title, ("sans-serif", 20));
    }
    let mut chart = builder.build_cartesian_2d(x_min..x_max, y_min..y_max)?;
    let tick = |value: &f64| fig.x.tick_label(*value);
    let mut mesh = chart.configure_mesh();
    if fig.x.time_origin.is_some() {
        mesh.x_labels(6).x_label_formatter(&tick);
    }
    if let Some(label) = &fig.x.label {
        mesh.x_desc(label.as_str());
    }
    if let Some(label) = &fig.y.label {
        mesh.y_desc(label.as_str());
    }
    mesh.draw()?;

    for series in &fig.series {
        match series {
            plot::Series::Line(line) => {
                let style = rgb(line.style.color).stroke_width(stroke(line.style.width));
                chart.draw_series(LineSeries::new(
                    line.points.iter().map(|p| (p[0], p[1])),
                    style,
                ))?;
            }
            plot::Series::Heatmap(map) => {
                chart.draw_series(map.cells.iter().map(|c| {
                    Rectangle::new([(c.x[0], c.y[0]), (c.x[1], c.y[1])], rgb(c.color).filled())
                }))?;
            }
            plot::Series::Segments(segs) => {
                let style = rgb(segs.style.color).stroke_width(stroke(segs.style.width));
                chart.draw_series(segs.segments.iter().map(|[a, b]| {
                    PathElement::new(vec![(a[0], a[1]), (b[0], b[1])], style)
                }))?;
            }
            plot::Series::Markers(markers) => {
                let style = rgb(markers.style.color).filled();
                chart.draw_series(
                    markers
                        .points
                        .iter()
                        .map(|p| Circle::new((p[0], p[1]), 3, style)),
                )?;
            }
            plot::Series::Bars(bars) => {
                let style = rgb(bars.style.color).filled();
                chart.draw_series(
                    bars.bars
                        .iter()
                        .map(|b| Rectangle::new([(b[0], 0.0), (b[1], b[2])], style)),
                )?;
            }
        }
    }

    for note in &fig.annotations {
        let h = if note.align_right { HPos::Right } else { HPos::Left };
        let font = ("sans-serif", 12)
            .into_font()
            .color(&rgb(note.color))
            .pos(Pos::new(h, VPos::Bottom));
        chart.draw_series(std::iter::once(Text::new(
            note.text.clone(),
            (note.at[0], note.at[1]),
            font,
        )))?;
    }
    Ok(())
}
