//! Short-time Fourier transform power spectrogram.
//!
//! Output follows the usual one-sided power spectral density convention:
//! each cell is `|X_k|² / (fs · Σw²)`, doubled for every bin except DC and
//! (for even segment sizes) Nyquist, so that summing a column times the bin
//! width recovers the segment's variance.

use crate::error::{ImuError, Result};
use log::debug;
use realfft::RealFftPlanner;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Taper applied to each segment before the transform.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Window {
    /// Rectangular (all ones).
    #[default]
    None,
    Hann,
    Hamming,
    /// Caller-supplied coefficients; length must equal the segment size.
    Custom(Vec<f64>),
}

impl Window {
    pub fn coefficients(&self, size: usize) -> Result<Vec<f64>> {
        let symmetric = |a0: f64| -> Vec<f64> {
            if size < 2 {
                return vec![1.0; size];
            }
            let denom = (size - 1) as f64;
            (0..size)
                .map(|i| a0 - (1.0 - a0) * (2.0 * PI * i as f64 / denom).cos())
                .collect()
        };
        match self {
            Window::None => Ok(vec![1.0; size]),
            Window::Hann => Ok(symmetric(0.5)),
            Window::Hamming => Ok(symmetric(0.54)),
            Window::Custom(coeffs) => {
                if coeffs.len() != size {
                    return Err(ImuError::InvalidParameter(format!(
                        "custom window has {} coefficients; segment size is {}",
                        coeffs.len(),
                        size
                    )));
                }
                Ok(coeffs.clone())
            }
        }
    }
}

/// Per-segment trend removal before the transform.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Detrend {
    /// Subtract the segment mean (suppresses the DC bin).
    #[default]
    Mean,
    None,
}

/// Power grid with its bin centers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Spectrogram {
    /// `power[f][t]`: rows are frequency bins, columns are time bins.
    pub power: Vec<Vec<f64>>,
    /// Frequency bin centers (Hz).
    pub freqs: Vec<f64>,
    /// Time bin centers, seconds from the first sample.
    pub times: Vec<f64>,
}

impl Spectrogram {
    pub fn n_freqs(&self) -> usize {
        self.freqs.len()
    }

    pub fn n_times(&self) -> usize {
        self.times.len()
    }

    /// Power values of one time bin across all frequencies.
    pub fn column(&self, t: usize) -> impl Iterator<Item = f64> + '_ {
        self.power.iter().map(move |row| row[t])
    }

    pub fn bin_width_hz(&self) -> f64 {
        match self.freqs.as_slice() {
            [first, second, ..] => second - first,
            _ => 0.0,
        }
    }

    /// Frequency whose time-averaged power is highest.
    pub fn peak_frequency(&self) -> Option<f64> {
        if self.n_times() == 0 {
            return None;
        }
        self.power
            .iter()
            .zip(&self.freqs)
            .map(|(row, f)| (row.iter().sum::<f64>() / row.len() as f64, *f))
            .filter(|(p, _)| p.is_finite())
            .max_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, f)| f)
    }
}

/// Number of segments the STFT produces for the given sizes.
pub fn segment_count(len: usize, window_size: usize, overlap: usize) -> usize {
    if len < window_size || overlap >= window_size {
        return 0;
    }
    (len - window_size) / (window_size - overlap) + 1
}

/// Check segment size, overlap and window shape without touching any data.
pub fn validate_segments(window_size: usize, overlap: usize, window: &Window) -> Result<()> {
    if window_size < 2 {
        return Err(ImuError::InvalidParameter(format!(
            "window size must be at least 2, got {window_size}"
        )));
    }
    if overlap >= window_size {
        return Err(ImuError::InvalidParameter(format!(
            "overlap {overlap} must be smaller than window size {window_size}"
        )));
    }
    if let Window::Custom(coeffs) = window {
        if coeffs.len() != window_size {
            return Err(ImuError::InvalidParameter(format!(
                "custom window has {} coefficients; segment size is {}",
                coeffs.len(),
                window_size
            )));
        }
    }
    Ok(())
}

/// Compute the power spectrogram of `data` sampled at `fs` Hz.
pub fn spectrogram(
    data: &[f64],
    fs: f64,
    window_size: usize,
    overlap: usize,
    window: &Window,
    detrend: Detrend,
) -> Result<Spectrogram> {
    validate_segments(window_size, overlap, window)?;
    if data.len() < window_size {
        return Err(ImuError::InvalidParameter(format!(
            "channel has {} samples; window size {} needs at least as many",
            data.len(),
            window_size
        )));
    }
    if !(fs.is_finite() && fs > 0.0) {
        return Err(ImuError::InvalidParameter(format!(
            "sample rate must be positive and finite, got {fs}"
        )));
    }
    let taper = window.coefficients(window_size)?;
    let taper_energy: f64 = taper.iter().map(|w| w * w).sum();
    if taper_energy <= 0.0 {
        return Err(ImuError::InvalidParameter("window has zero energy".into()));
    }

    let step = window_size - overlap;
    let n_times = segment_count(data.len(), window_size, overlap);
    let n_freqs = window_size / 2 + 1;
    debug!(
        "spectrogram: {} samples, fs {:.3} Hz, {} segments x {} bins",
        data.len(),
        fs,
        n_times,
        n_freqs
    );

    let mut planner = RealFftPlanner::<f64>::new();
    let r2c = planner.plan_fft_forward(window_size);
    let mut frame = r2c.make_input_vec();
    let mut spectrum = r2c.make_output_vec();
    let scale = 1.0 / (fs * taper_energy);

    let mut power = vec![vec![0.0; n_times]; n_freqs];
    let mut times = Vec::with_capacity(n_times);
    for t in 0..n_times {
        let start = t * step;
        let segment = &data[start..start + window_size];
        let offset = match detrend {
            Detrend::Mean => segment.iter().sum::<f64>() / window_size as f64,
            Detrend::None => 0.0,
        };
        for ((slot, x), w) in frame.iter_mut().zip(segment).zip(&taper) {
            *slot = (x - offset) * w;
        }
        r2c.process(&mut frame, &mut spectrum)
            .map_err(|e| ImuError::InvalidParameter(e.to_string()))?;
        for (k, val) in spectrum.iter().enumerate() {
            let one_sided = if k == 0 || (window_size % 2 == 0 && k == window_size / 2) {
                1.0
            } else {
                2.0
            };
            power[k][t] = one_sided * val.norm_sqr() * scale;
        }
        times.push((start as f64 + window_size as f64 / 2.0) / fs);
    }

    let freqs = (0..n_freqs)
        .map(|k| k as f64 * fs / window_size as f64)
        .collect();
    Ok(Spectrogram {
        power,
        freqs,
        times,
    })
}
