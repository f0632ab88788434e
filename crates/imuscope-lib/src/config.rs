use crate::detectors::events::EventDetectorConfig;
use crate::error::Result;
use crate::signal::{Channel, ImuSeries};
use crate::spectral::{validate_segments, Detrend, Window};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Which scalar series feeds the spectrogram.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelSource {
    /// Euclidean norm of `<group>_x/_y/_z`.
    Magnitude(String),
    /// A raw column used as-is (never assumed equal to a derived magnitude).
    Column(String),
}

impl Default for ChannelSource {
    fn default() -> Self {
        ChannelSource::Magnitude("acc".into())
    }
}

impl ChannelSource {
    pub fn name(&self) -> &str {
        match self {
            ChannelSource::Magnitude(group) => group,
            ChannelSource::Column(column) => column,
        }
    }

    pub fn extract(&self, series: &ImuSeries) -> Result<Channel> {
        match self {
            ChannelSource::Magnitude(group) => series.derive_magnitude(group),
            ChannelSource::Column(column) => series.column(column),
        }
    }
}

/// Color scale limits of the rendered spectrogram (dB).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayRange {
    pub min_db: f64,
    pub max_db: f64,
}

impl Default for DisplayRange {
    fn default() -> Self {
        Self {
            min_db: -80.0,
            max_db: -40.0,
        }
    }
}

/// Everything the analysis pipeline needs from its caller.
///
/// Loadable from TOML; absent keys keep their defaults:
///
/// ```toml
/// trim = 1
/// window_size = 256
/// overlap = 32
/// window = "none"
/// channel = { magnitude = "acc" }
///
/// [detection]
/// threshold_db = -65.0
/// rel_height = 0.75
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub channel: ChannelSource,
    /// Samples dropped from each end of the log.
    pub trim: usize,
    /// Samples per STFT segment.
    pub window_size: usize,
    /// Samples shared by consecutive segments.
    pub overlap: usize,
    pub window: Window,
    pub detrend: Detrend,
    pub detection: EventDetectorConfig,
    pub display: DisplayRange,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            channel: ChannelSource::default(),
            trim: 1,
            window_size: 256,
            overlap: 32,
            window: Window::None,
            detrend: Detrend::Mean,
            detection: EventDetectorConfig::default(),
            display: DisplayRange::default(),
        }
    }
}

impl AnalysisConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Check every stage's settings up front, before any data is touched.
    pub fn validate(&self) -> Result<()> {
        validate_segments(self.window_size, self.overlap, &self.window)?;
        self.detection.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ImuError;
    use std::io::Write;

    #[test]
    fn empty_config_uses_defaults() {
        let cfg = AnalysisConfig::from_toml_str("").unwrap();
        assert_eq!(cfg, AnalysisConfig::default());
        assert_eq!(cfg.window_size, 256);
        assert_eq!(cfg.overlap, 32);
        assert_eq!(cfg.detection.threshold_db, -65.0);
        assert_eq!(cfg.detection.min_separation_bins, 10);
        assert_eq!(cfg.channel.name(), "acc");
    }

    #[test]
    fn partial_tables_merge_with_defaults() {
        let text = r#"
            window_size = 128
            window = "hann"
            detrend = "none"
            channel = { column = "total" }

            [detection]
            rel_height = 0.5
        "#;
        let cfg = AnalysisConfig::from_toml_str(text).unwrap();
        assert_eq!(cfg.window_size, 128);
        assert_eq!(cfg.overlap, 32);
        assert_eq!(cfg.window, Window::Hann);
        assert_eq!(cfg.detrend, Detrend::None);
        assert_eq!(cfg.channel, ChannelSource::Column("total".into()));
        assert_eq!(cfg.detection.rel_height, 0.5);
        assert_eq!(cfg.detection.threshold_db, -65.0);
    }

    #[test]
    fn loads_from_file_and_reports_bad_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "trim = 3\n[display]\nmax_db = -20.0").unwrap();
        let cfg = AnalysisConfig::load(file.path()).unwrap();
        assert_eq!(cfg.trim, 3);
        assert_eq!(cfg.display.max_db, -20.0);
        assert_eq!(cfg.display.min_db, -80.0);

        let err = AnalysisConfig::from_toml_str("trim = \"lots\"").unwrap_err();
        assert!(matches!(err, ImuError::Config(_)));
    }

    #[test]
    fn validate_rejects_each_bad_setting() {
        assert!(AnalysisConfig::default().validate().is_ok());
        let bad = [
            AnalysisConfig {
                overlap: 256,
                ..AnalysisConfig::default()
            },
            AnalysisConfig {
                window_size: 1,
                overlap: 0,
                ..AnalysisConfig::default()
            },
            AnalysisConfig {
                window: Window::Custom(vec![1.0; 8]),
                ..AnalysisConfig::default()
            },
            AnalysisConfig {
                detection: EventDetectorConfig {
                    rel_height: -0.1,
                    ..EventDetectorConfig::default()
                },
                ..AnalysisConfig::default()
            },
            AnalysisConfig {
                detection: EventDetectorConfig {
                    min_separation_bins: 0,
                    ..EventDetectorConfig::default()
                },
                ..AnalysisConfig::default()
            },
            AnalysisConfig {
                detection: EventDetectorConfig {
                    threshold_db: f64::NAN,
                    ..EventDetectorConfig::default()
                },
                ..AnalysisConfig::default()
            },
        ];
        for cfg in bad {
            assert!(
                matches!(cfg.validate(), Err(ImuError::InvalidParameter(_))),
                "{cfg:?}"
            );
        }
    }
}
