use crate::{
    config::AnalysisConfig,
    detectors::events::{detect_events_with_config, find_peaks, Event},
    error::Result,
    io::csv::load_imu_csv,
    metrics::power::{power_curve, power_range_db, PowerRange},
    signal::ImuSeries,
    spectral::{spectrogram, Spectrogram},
};
use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Shape of a loaded log, before any spectral work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesSummary {
    pub sample_count: usize,
    pub invalid_timestamps: usize,
    pub columns: Vec<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub duration_s: Option<f64>,
    pub sample_rate_hz: Option<f64>,
}

pub fn summarize(series: &ImuSeries) -> SeriesSummary {
    SeriesSummary {
        sample_count: series.len(),
        invalid_timestamps: series.invalid_timestamp_count(),
        columns: series.columns().to_vec(),
        start_time: series.start_time(),
        duration_s: series.duration_s(),
        sample_rate_hz: series.estimate_sample_rate().ok(),
    }
}

/// Result of one analysis run.
///
/// The spectrogram and power curve are kept for rendering but left out of
/// the JSON summary.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub sample_count: usize,
    pub invalid_timestamps: usize,
    pub duration_s: Option<f64>,
    pub sample_rate_hz: f64,
    pub channel: String,
    /// Timestamp of offset zero (first sample after trimming).
    pub start_time: Option<DateTime<Utc>>,
    pub time_bins: usize,
    pub freq_bins: usize,
    pub power_range: Option<PowerRange>,
    pub peak_frequency_hz: Option<f64>,
    pub events: Vec<Event>,
    #[serde(skip)]
    pub peak_bins: Vec<usize>,
    #[serde(skip)]
    pub spectrogram: Spectrogram,
    #[serde(skip)]
    pub power_curve: Vec<f64>,
}

/// Trim, derive the channel, estimate the rate, then run the spectral
/// analysis and event detection.
pub fn analyze(series: ImuSeries, cfg: &AnalysisConfig) -> Result<AnalysisReport> {
    cfg.validate()?;
    let series = series.trim(cfg.trim)?;
    let duration_s = series.duration_s();
    info!(
        "Loaded {} samples over {:.3}s",
        series.len(),
        duration_s.unwrap_or(0.0)
    );
    let channel = cfg.channel.extract(&series)?;
    let fs = series.estimate_sample_rate()?;
    debug!("channel '{}' at {:.3} Hz", channel.name, fs);

    let spec = spectrogram(
        &channel.data,
        fs,
        cfg.window_size,
        cfg.overlap,
        &cfg.window,
        cfg.detrend,
    )?;
    let curve = power_curve(&spec.power);
    let power_range = power_range_db(&spec);
    if let Some(range) = power_range {
        debug!(
            "power range {:.3} dB .. {:.3} dB",
            range.min_db, range.max_db
        );
    }

    // Offset zero is the first row; if its timestamp is missing, derive it
    // from the first valid one using the estimated rate.
    let start_time = series
        .samples()
        .iter()
        .position(|s| s.time.is_some())
        .and_then(|idx| {
            let first = series.samples()[idx].time?;
            let back = chrono::Duration::microseconds((idx as f64 / fs * 1e6).round() as i64);
            first.checked_sub_signed(back)
        });

    let mut events = detect_events_with_config(&curve, &spec.times, &cfg.detection)?;
    if let Some(origin) = start_time {
        events = events.into_iter().map(|e| e.anchored(origin)).collect();
    }
    let peak_bins = find_peaks(
        &curve,
        cfg.detection.threshold_db,
        cfg.detection.min_separation_bins,
    );
    info!("{} event(s) above {} dB", events.len(), cfg.detection.threshold_db);

    Ok(AnalysisReport {
        sample_count: series.len(),
        invalid_timestamps: series.invalid_timestamp_count(),
        duration_s,
        sample_rate_hz: fs,
        channel: channel.name,
        start_time,
        time_bins: spec.n_times(),
        freq_bins: spec.n_freqs(),
        power_range,
        peak_frequency_hz: spec.peak_frequency(),
        events,
        peak_bins,
        spectrogram: spec,
        power_curve: curve,
    })
}

/// Load a CSV log and analyze it.
pub fn analyze_file(path: &Path, cfg: &AnalysisConfig) -> Result<AnalysisReport> {
    cfg.validate()?;
    let series = load_imu_csv(path)?;
    analyze(series, cfg)
}
