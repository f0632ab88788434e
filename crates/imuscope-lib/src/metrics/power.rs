use crate::spectral::Spectrogram;
use serde::{Deserialize, Serialize};

/// Smallest linear power fed to the logarithm. A silent segment has exactly
/// zero power, and `log10(0)` is not finite.
pub const POWER_FLOOR: f64 = 1e-10;

/// [`POWER_FLOOR`] expressed in dB.
pub const FLOOR_DB: f64 = -100.0;

/// Convert linear power to dB, clamping at [`POWER_FLOOR`].
pub fn to_db(power: f64) -> f64 {
    if power == f64::INFINITY {
        return 10.0 * f64::MAX.log10();
    }
    if power.is_finite() && power > POWER_FLOOR {
        10.0 * power.log10()
    } else {
        FLOOR_DB
    }
}

/// Mean power across all frequency bins for every time bin, in dB.
///
/// Always finite: a zero, negative or NaN mean maps to `-100 dB`.
pub fn power_curve(power: &[Vec<f64>]) -> Vec<f64> {
    let n_freqs = power.len();
    let n_times = power.first().map_or(0, Vec::len);
    (0..n_times)
        .map(|t| {
            let mean = power.iter().map(|row| row[t]).sum::<f64>() / n_freqs as f64;
            to_db(mean)
        })
        .collect()
}

/// Minimum and maximum cell power of a spectrogram, in dB.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PowerRange {
    pub min_db: f64,
    pub max_db: f64,
}

pub fn power_range_db(spec: &Spectrogram) -> Option<PowerRange> {
    let values = spec.power.iter().flatten().copied().filter(|p| !p.is_nan());
    let (min, max) = values.fold(None, |acc: Option<(f64, f64)>, p| match acc {
        None => Some((p, p)),
        Some((lo, hi)) => Some((lo.min(p), hi.max(p))),
    })?;
    Some(PowerRange {
        min_db: to_db(min),
        max_db: to_db(max),
    })
}
