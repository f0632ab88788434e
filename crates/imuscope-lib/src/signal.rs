use crate::error::{ImuError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One CSV row: timestamp plus raw readings in column order.
///
/// `time` is `None` when the source value was malformed or broke the
/// non-decreasing order of the log. Missing readings are stored as `NaN`.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub time: Option<DateTime<Utc>>,
    pub values: Vec<f64>,
}

/// Ordered IMU log as read from disk (no re-sorting is performed).
#[derive(Debug, Clone)]
pub struct ImuSeries {
    columns: Vec<String>,
    samples: Vec<Sample>,
}

/// Named scalar series aligned row-for-row with the series it came from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub name: String,
    pub data: Vec<f64>,
}

impl Channel {
    pub fn len(&self) -> usize {
        self.data.len()
    }
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl ImuSeries {
    /// `columns` names the entries of every `Sample::values`, excluding `time`.
    pub fn new(columns: Vec<String>, samples: Vec<Sample>) -> Self {
        Self { columns, samples }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|column| column.eq_ignore_ascii_case(name))
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Raw column as a channel, e.g. `temp`.
    pub fn column(&self, name: &str) -> Result<Channel> {
        let idx = self
            .column_index(name)
            .ok_or_else(|| ImuError::Schema(vec![name.to_string()]))?;
        Ok(Channel {
            name: name.to_string(),
            data: self.samples.iter().map(|s| s.values[idx]).collect(),
        })
    }

    /// Per-row Euclidean norm of `<group>_x`, `<group>_y`, `<group>_z`.
    pub fn derive_magnitude(&self, group: &str) -> Result<Channel> {
        let names = ["x", "y", "z"].map(|axis| format!("{group}_{axis}"));
        let missing: Vec<String> = names
            .iter()
            .filter(|name| !self.has_column(name))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(ImuError::Schema(missing));
        }
        let idx = names.map(|name| self.column_index(&name).unwrap_or_default());
        let data = self
            .samples
            .iter()
            .map(|s| {
                let (x, y, z) = (s.values[idx[0]], s.values[idx[1]], s.values[idx[2]]);
                (x * x + y * y + z * z).sqrt()
            })
            .collect();
        Ok(Channel {
            name: group.to_string(),
            data,
        })
    }

    /// Drop the first and last `n` rows (partial sensor buffers at the edges).
    pub fn trim(mut self, n: usize) -> Result<Self> {
        let len = self.samples.len();
        let needed = n.saturating_mul(2).saturating_add(2);
        if len < needed {
            return Err(ImuError::InsufficientData(format!(
                "trimming {n} sample(s) from each end of {len} leaves fewer than 2"
            )));
        }
        self.samples.truncate(len - n);
        self.samples.drain(..n);
        Ok(self)
    }

    pub fn valid_timestamp_count(&self) -> usize {
        self.samples.iter().filter(|s| s.time.is_some()).count()
    }

    pub fn invalid_timestamp_count(&self) -> usize {
        self.len() - self.valid_timestamp_count()
    }

    /// First valid timestamp.
    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.samples.iter().find_map(|s| s.time)
    }

    /// Last valid timestamp.
    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.samples.iter().rev().find_map(|s| s.time)
    }

    /// Seconds between the first and last valid timestamps.
    pub fn duration_s(&self) -> Option<f64> {
        match (self.start_time(), self.end_time()) {
            (Some(start), Some(end)) => Some(seconds_between(start, end)),
            _ => None,
        }
    }

    /// Spacing of consecutive rows whose timestamps are both valid, in seconds.
    pub fn sample_intervals_s(&self) -> Vec<f64> {
        self.samples
            .windows(2)
            .filter_map(|w| match (w[0].time, w[1].time) {
                (Some(a), Some(b)) => Some(seconds_between(a, b)),
                _ => None,
            })
            .collect()
    }

    /// `1 / median(Δt)`; the median keeps dropped samples and I/O stalls from
    /// dragging the estimate down.
    pub fn estimate_sample_rate(&self) -> Result<f64> {
        if self.valid_timestamp_count() < 2 {
            return Err(ImuError::InsufficientData(format!(
                "{} valid timestamp(s); need at least 2 to estimate the sample rate",
                self.valid_timestamp_count()
            )));
        }
        let intervals = self.sample_intervals_s();
        let dt = median(&intervals).ok_or_else(|| {
            ImuError::InsufficientData("no consecutive pair of valid timestamps".into())
        })?;
        if dt <= 0.0 {
            return Err(ImuError::InsufficientData(format!(
                "median sample spacing is {dt}s; timestamps do not advance"
            )));
        }
        Ok(1.0 / dt)
    }
}

fn seconds_between(a: DateTime<Utc>, b: DateTime<Utc>) -> f64 {
    (b.timestamp_micros() - a.timestamp_micros()) as f64 / 1e6
}

/// Median of the values; even lengths average the two middle values.
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

    fn at_ms(ms: i64) -> Option<DateTime<Utc>> {
        DateTime::<Utc>::from_timestamp_millis(ms)
    }

    fn series_from_times(times: &[Option<i64>]) -> ImuSeries {
        let samples = times
            .iter()
            .map(|t| Sample {
                time: t.and_then(at_ms),
                values: vec![3.0, 4.0, 0.0],
            })
            .collect();
        ImuSeries::new(vec!["acc_x".into(), "acc_y".into(), "acc_z".into()], samples)
    }

    #[test]
    fn magnitude_of_three_four_zero_is_five() {
        let ts = series_from_times(&[Some(0), Some(10), Some(20)]);
        let acc = ts.derive_magnitude("acc").unwrap();
        assert_eq!(acc.name, "acc");
        assert_eq!(acc.data, vec![5.0, 5.0, 5.0]);
    }

    #[test]
    fn magnitude_reports_missing_axes() {
        let ts = series_from_times(&[Some(0), Some(10)]);
        match ts.derive_magnitude("mag") {
            Err(ImuError::Schema(cols)) => {
                assert_eq!(cols, vec!["mag_x", "mag_y", "mag_z"]);
            }
            other => panic!("expected schema error, got {other:?}"),
        }
        assert!(matches!(ts.column("temp"), Err(ImuError::Schema(_))));
    }

    #[test]
    fn trim_removes_both_edges() {
        let times: Vec<Option<i64>> = (0..10).map(|i| Some(i * 10)).collect();
        let ts = series_from_times(&times).trim(2).unwrap();
        assert_eq!(ts.len(), 6);
        assert_eq!(ts.start_time(), at_ms(20));
        assert_eq!(ts.end_time(), at_ms(70));
    }

    #[test]
    fn trim_rejects_leaving_fewer_than_two() {
        let times: Vec<Option<i64>> = (0..5).map(|i| Some(i * 10)).collect();
        assert!(series_from_times(&times).trim(1).is_ok());
        let err = series_from_times(&times).trim(2).unwrap_err();
        assert!(matches!(err, ImuError::InsufficientData(_)));
        let short = series_from_times(&[Some(0), Some(10)]);
        assert_eq!(short.trim(0).unwrap().len(), 2);
    }

    #[test]
    fn sample_rate_uses_median_spacing() {
        // one stall of 500 ms among 10 ms steps
        let ts = series_from_times(&[Some(0), Some(10), Some(20), Some(520), Some(530)]);
        let fs = ts.estimate_sample_rate().unwrap();
        assert_eq!(fs, 1.0 / 0.01);
    }

    #[test]
    fn sample_rate_matches_reference_median() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut deltas: Vec<i64> = vec![9, 10, 10, 11, 10, 12, 10, 9, 40, 10, 11];
        let seconds: Vec<f64> = deltas.iter().map(|d| *d as f64 / 1e3).collect();
        let reference = 1.0 / median(&seconds).unwrap();
        for _ in 0..5 {
            deltas.shuffle(&mut rng);
            let mut t = 1_700_000_000_000i64;
            let mut times = vec![Some(t)];
            for d in &deltas {
                t += d;
                times.push(Some(t));
            }
            let fs = series_from_times(&times).estimate_sample_rate().unwrap();
            assert_eq!(fs, reference);
        }
    }

    #[test]
    fn sample_rate_skips_missing_timestamps() {
        let ts = series_from_times(&[Some(0), None, Some(20), Some(30), Some(40)]);
        assert_eq!(ts.invalid_timestamp_count(), 1);
        assert_eq!(ts.sample_intervals_s().len(), 2);
        assert_eq!(ts.estimate_sample_rate().unwrap(), 100.0);
    }

    #[test]
    fn sample_rate_needs_two_valid_samples() {
        let ts = series_from_times(&[Some(0), None, None]);
        assert!(matches!(
            ts.estimate_sample_rate(),
            Err(ImuError::InsufficientData(_))
        ));
        let flat = series_from_times(&[Some(5), Some(5), Some(5)]);
        assert!(flat.estimate_sample_rate().is_err());
    }

    #[test]
    fn median_handles_even_lengths() {
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), Some(2.5));
        assert_eq!(median(&[2.0, 9.0, 1.0]), Some(2.0));
        assert_eq!(median(&[]), None);
    }
}
