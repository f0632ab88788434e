use crate::error::{ImuError, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Parameters of the elevated-power event detector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventDetectorConfig {
    /// Minimum peak height (dB) for a local maximum to count as an event.
    pub threshold_db: f64,
    /// Peaks closer than this many bins to a higher peak are dropped.
    pub min_separation_bins: usize,
    /// Fraction of the peak-to-base drop at which event boundaries are taken.
    pub rel_height: f64,
}

impl EventDetectorConfig {
    /// Reject settings the detector cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.min_separation_bins < 1 {
            return Err(ImuError::InvalidParameter(
                "minimum peak separation must be at least 1 bin".into(),
            ));
        }
        if !(self.rel_height.is_finite() && self.rel_height >= 0.0) {
            return Err(ImuError::InvalidParameter(format!(
                "relative height must be a non-negative number, got {}",
                self.rel_height
            )));
        }
        if self.threshold_db.is_nan() {
            return Err(ImuError::InvalidParameter("detection threshold is NaN".into()));
        }
        Ok(())
    }
}

impl Default for EventDetectorConfig {
    fn default() -> Self {
        Self {
            threshold_db: -65.0,
            min_separation_bins: 10,
            rel_height: 0.75,
        }
    }
}

/// Interval of elevated power on the power curve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub start_offset_s: f64,
    pub end_offset_s: f64,
    pub duration_s: f64,
    pub peak_power_db: f64,
    pub peak_offset_s: f64,
    /// Level at which the boundaries were evaluated.
    pub boundary_power_db: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
}

impl Event {
    /// Attach an absolute start time, given the timestamp of offset zero.
    pub fn anchored(mut self, origin: DateTime<Utc>) -> Self {
        let micros = (self.start_offset_s * 1e6).round() as i64;
        self.start_time = origin.checked_add_signed(Duration::microseconds(micros));
        self
    }
}

/// Prominence of a peak together with the bases it was measured from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prominence {
    pub prominence: f64,
    pub left_base: usize,
    pub right_base: usize,
}

/// Interpolated crossing positions of a peak at a relative height.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeakWidth {
    pub width_height: f64,
    pub left_ip: f64,
    pub right_ip: f64,
}

impl PeakWidth {
    pub fn width(&self) -> f64 {
        self.right_ip - self.left_ip
    }
}

/// Indices of local maxima at or above `threshold`, at least `distance` bins
/// apart (higher peaks win). Flat tops resolve to their middle sample; the
/// first and last samples are never peaks.
pub fn find_peaks(x: &[f64], threshold: f64, distance: usize) -> Vec<usize> {
    let peaks: Vec<usize> = local_maxima(x)
        .into_iter()
        .filter(|&i| x[i] >= threshold)
        .collect();
    select_by_distance(x, &peaks, distance.max(1))
}

fn local_maxima(x: &[f64]) -> Vec<usize> {
    let mut out = Vec::new();
    if x.len() < 3 {
        return out;
    }
    let last = x.len() - 1;
    let mut i = 1;
    while i < last {
        if x[i - 1] < x[i] {
            let mut ahead = i + 1;
            while ahead < last && x[ahead] == x[i] {
                ahead += 1;
            }
            if x[ahead] < x[i] {
                out.push((i + ahead - 1) / 2);
                i = ahead;
            }
        }
        i += 1;
    }
    out
}

fn select_by_distance(x: &[f64], peaks: &[usize], distance: usize) -> Vec<usize> {
    if distance <= 1 || peaks.len() < 2 {
        return peaks.to_vec();
    }
    let mut keep = vec![true; peaks.len()];
    let mut order: Vec<usize> = (0..peaks.len()).collect();
    order.sort_by(|&a, &b| x[peaks[a]].total_cmp(&x[peaks[b]]));
    for &j in order.iter().rev() {
        if !keep[j] {
            continue;
        }
        for k in (0..j).rev() {
            if peaks[j] - peaks[k] >= distance {
                break;
            }
            keep[k] = false;
        }
        for k in j + 1..peaks.len() {
            if peaks[k] - peaks[j] >= distance {
                break;
            }
            keep[k] = false;
        }
    }
    peaks
        .iter()
        .zip(keep)
        .filter_map(|(&p, k)| k.then_some(p))
        .collect()
}

/// Height of `x[peak]` above the higher of the two minima reached by walking
/// outwards until a higher sample or the edge.
pub fn peak_prominence(x: &[f64], peak: usize) -> Prominence {
    let top = x[peak];
    let (mut left_min, mut left_base) = (top, peak);
    let mut i = peak;
    loop {
        if x[i] > top {
            break;
        }
        if x[i] < left_min {
            left_min = x[i];
            left_base = i;
        }
        if i == 0 {
            break;
        }
        i -= 1;
    }
    let (mut right_min, mut right_base) = (top, peak);
    for (i, &v) in x.iter().enumerate().skip(peak) {
        if v > top {
            break;
        }
        if v < right_min {
            right_min = v;
            right_base = i;
        }
    }
    Prominence {
        prominence: top - left_min.max(right_min),
        left_base,
        right_base,
    }
}

/// Where the curve around `peak` falls below `rel_height` of the way from the
/// peak down to its prominence base.
pub fn peak_width(x: &[f64], peak: usize, rel_height: f64) -> PeakWidth {
    let prom = peak_prominence(x, peak);
    let height = x[peak] - prom.prominence * rel_height;

    let mut i = peak;
    while prom.left_base < i && height < x[i] {
        i -= 1;
    }
    let mut left_ip = i as f64;
    if x[i] < height {
        left_ip += (height - x[i]) / (x[i + 1] - x[i]);
    }

    let mut i = peak;
    while i < prom.right_base && height < x[i] {
        i += 1;
    }
    let mut right_ip = i as f64;
    if x[i] < height {
        right_ip -= (height - x[i]) / (x[i - 1] - x[i]);
    }

    PeakWidth {
        width_height: height,
        left_ip,
        right_ip,
    }
}

/// Detect elevated-power intervals on a power curve.
///
/// `time_bins` holds the offset (s) of every curve sample. Event ends are
/// advanced by one bin to cover the trailing edge of the last active bin.
pub fn detect_events(
    power_curve: &[f64],
    time_bins: &[f64],
    threshold_db: f64,
    min_separation_bins: usize,
    rel_height: f64,
) -> Result<Vec<Event>> {
    detect_events_with_config(
        power_curve,
        time_bins,
        &EventDetectorConfig {
            threshold_db,
            min_separation_bins,
            rel_height,
        },
    )
}

pub fn detect_events_with_config(
    power_curve: &[f64],
    time_bins: &[f64],
    cfg: &EventDetectorConfig,
) -> Result<Vec<Event>> {
    validate(power_curve, time_bins, cfg)?;
    let peaks = find_peaks(power_curve, cfg.threshold_db, cfg.min_separation_bins);
    let last = time_bins.len().saturating_sub(1);
    let mut events: Vec<Event> = peaks
        .into_iter()
        .map(|peak| {
            let width = peak_width(power_curve, peak, cfg.rel_height);
            let start_idx = (width.left_ip.floor().max(0.0) as usize).min(last);
            let end_idx = (width.right_ip.floor() as usize + 1).min(last);
            let start = time_bins[start_idx];
            let end = time_bins[end_idx];
            Event {
                start_offset_s: start,
                end_offset_s: end,
                duration_s: end - start,
                peak_power_db: power_curve[peak],
                peak_offset_s: time_bins[peak],
                boundary_power_db: width.width_height,
                start_time: None,
            }
        })
        .collect();
    events.sort_by(|a, b| a.start_offset_s.total_cmp(&b.start_offset_s));
    Ok(events)
}

fn validate(power_curve: &[f64], time_bins: &[f64], cfg: &EventDetectorConfig) -> Result<()> {
    if power_curve.len() != time_bins.len() {
        return Err(ImuError::InvalidParameter(format!(
            "power curve has {} bins but {} time offsets were given",
            power_curve.len(),
            time_bins.len()
        )));
    }
    cfg.validate()
}
