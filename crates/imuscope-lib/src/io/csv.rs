use crate::error::{ImuError, Result};
use crate::signal::{ImuSeries, Sample};
use chrono::{DateTime, Utc};
use csv::{ReaderBuilder, Trim};
use log::{debug, warn};
use std::io::Read;
use std::path::Path;

/// Name of the required timestamp column (milliseconds since the Unix epoch).
pub const TIME_COLUMN: &str = "time";

/// Convert a milliseconds-since-epoch field into a UTC timestamp.
///
/// Accepts integers and finite decimals; anything else yields `None`.
pub fn parse_time(field: &str) -> Option<DateTime<Utc>> {
    let trimmed = field.trim();
    if let Ok(ms) = trimmed.parse::<i64>() {
        return DateTime::<Utc>::from_timestamp_millis(ms);
    }
    let ms = trimmed.parse::<f64>().ok().filter(|v| v.is_finite())?;
    let micros = (ms * 1000.0).round() as i64;
    let nanos = (micros.rem_euclid(1_000_000) * 1000) as u32;
    DateTime::<Utc>::from_timestamp(micros.div_euclid(1_000_000), nanos)
}

/// Load an IMU CSV log from disk.
pub fn load_imu_csv(path: &Path) -> Result<ImuSeries> {
    let file = std::fs::File::open(path)?;
    let series = read_imu_csv(file)?;
    debug!(
        "read {} rows with columns {:?} from {}",
        series.len(),
        series.columns(),
        path.display()
    );
    Ok(series)
}

/// Parse an IMU CSV from any reader. The header must contain `time`; every
/// other column is read as `f64`.
pub fn read_imu_csv<R: Read>(reader: R) -> Result<ImuSeries> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(reader);
    let headers = reader.headers()?.clone();
    let time_idx = headers
        .iter()
        .position(|h| h.eq_ignore_ascii_case(TIME_COLUMN))
        .ok_or_else(|| ImuError::Schema(vec![TIME_COLUMN.to_string()]))?;
    let value_idx: Vec<usize> = (0..headers.len()).filter(|&i| i != time_idx).collect();
    let columns: Vec<String> = value_idx.iter().map(|&i| headers[i].to_string()).collect();

    let mut samples = Vec::new();
    let mut last_valid: Option<DateTime<Utc>> = None;
    let mut malformed_times = 0usize;
    let mut out_of_order = 0usize;
    let mut malformed_values = 0usize;
    let mut short_rows = 0usize;
    for record in reader.records() {
        let record = record?;
        if record.len() < headers.len() {
            short_rows += 1;
        }
        let raw_time = record.get(time_idx).unwrap_or("");
        let time = match parse_time(raw_time) {
            Some(t) if last_valid.is_some_and(|prev| t < prev) => {
                out_of_order += 1;
                None
            }
            Some(t) => {
                last_valid = Some(t);
                Some(t)
            }
            None => {
                malformed_times += 1;
                None
            }
        };
        let values = value_idx
            .iter()
            .map(|&i| {
                let field = record.get(i).unwrap_or("");
                match field.parse::<f64>() {
                    Ok(v) => v,
                    Err(_) => {
                        if !field.is_empty() {
                            malformed_values += 1;
                        }
                        f64::NAN
                    }
                }
            })
            .collect();
        samples.push(Sample { time, values });
    }

    if malformed_times > 0 {
        warn!("{malformed_times} row(s) have an unparseable timestamp; treated as gaps");
    }
    if out_of_order > 0 {
        warn!("{out_of_order} row(s) go back in time; timestamps treated as missing");
    }
    if short_rows > 0 {
        warn!("{short_rows} row(s) are missing trailing fields; filled as missing");
    }
    if malformed_values > 0 {
        warn!("{malformed_values} non-numeric reading(s) treated as missing");
    }
    Ok(ImuSeries::new(columns, samples))
}
