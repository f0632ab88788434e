use assert_cmd::cargo::cargo_bin_cmd;
use serde::Deserialize;
use std::{error::Error, f64::consts::PI, fs, io::Write, path::PathBuf};

#[derive(Deserialize)]
struct Summary {
    sample_count: usize,
    invalid_timestamps: usize,
    columns: Vec<String>,
    duration_s: Option<f64>,
    sample_rate_hz: Option<f64>,
}

#[derive(Deserialize)]
struct EventOut {
    start_offset_s: f64,
    end_offset_s: f64,
    duration_s: f64,
    peak_power_db: f64,
    start_time: Option<String>,
}

#[derive(Deserialize)]
struct Report {
    sample_count: usize,
    channel: String,
    sample_rate_hz: f64,
    time_bins: usize,
    freq_bins: usize,
    peak_frequency_hz: Option<f64>,
    start_time: Option<String>,
    events: Vec<EventOut>,
}

/// 60 s at 100 Hz; acc_z carries a 12.5 Hz burst from 20 s to 30 s.
fn burst_csv() -> Result<tempfile::NamedTempFile, Box<dyn Error>> {
    let mut file = tempfile::Builder::new().suffix(".csv").tempfile()?;
    writeln!(file, "time,acc_x,acc_y,acc_z,temp")?;
    for i in 0..6000 {
        let t = i as f64 / 100.0;
        let vibration = if (20.0..30.0).contains(&t) {
            0.5 * (2.0 * PI * 12.5 * t).sin()
        } else {
            0.001 * (2.0 * PI * 3.0 * t).sin()
        };
        writeln!(
            file,
            "{},0.0,0.0,{:.6},{:.2}",
            1_700_000_000_000i64 + 10 * i,
            9.81 + vibration,
            21.0 + t / 60.0
        )?;
    }
    file.flush()?;
    Ok(file)
}

const BURST_ARGS: [&str; 6] = ["--nfft", "128", "--overlap", "64", "--min-separation", "200"];

#[test]
fn summary_reports_fixture_shape() -> Result<(), Box<dyn Error>> {
    let fixture = sample_path("test_data/imu_sample.csv");
    let output = cargo_bin_cmd!("imuscope")
        .args(["summary", "--input", &fixture])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let summary: Summary = serde_json::from_slice(&output)?;
    assert_eq!(summary.sample_count, 10);
    assert_eq!(summary.invalid_timestamps, 1);
    assert_eq!(summary.columns.len(), 7);
    assert_close(summary.duration_s.unwrap(), 0.09, 1e-9);
    assert_close(summary.sample_rate_hz.unwrap(), 100.0, 1e-9);
    Ok(())
}

#[test]
fn analyze_finds_burst_and_renders_plot() -> Result<(), Box<dyn Error>> {
    let csv = burst_csv()?;
    let dir = tempfile::tempdir()?;
    let png = dir.path().join("spectrogram.png");
    let output = cargo_bin_cmd!("imuscope")
        .args(["analyze", "--input", path_str(csv.path())])
        .args(BURST_ARGS)
        .args(["--plot", path_str(&png)])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let report: Report = serde_json::from_slice(&output)?;
    assert_eq!(report.sample_count, 5998);
    assert_eq!(report.channel, "acc");
    assert_close(report.sample_rate_hz, 100.0, 1e-9);
    assert_eq!(report.freq_bins, 65);
    assert!(report.time_bins > 0);
    assert_close(report.peak_frequency_hz.unwrap(), 12.5, 100.0 / 128.0);
    assert!(report.start_time.is_some());
    assert_eq!(report.events.len(), 1);
    let event = &report.events[0];
    assert!(event.start_offset_s > 18.0 && event.start_offset_s < 21.0);
    assert!(event.end_offset_s > 29.0 && event.end_offset_s < 32.0);
    assert!(event.peak_power_db > -65.0);
    assert!(fs::metadata(&png)?.len() > 0);
    Ok(())
}

#[test]
fn events_prints_one_line_per_event() -> Result<(), Box<dyn Error>> {
    let csv = burst_csv()?;
    let output = cargo_bin_cmd!("imuscope")
        .args(["events", "--input", path_str(csv.path())])
        .args(BURST_ARGS)
        .args(["--start", "2024-03-01 12:00:00"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8(output)?;
    let events: Vec<EventOut> = text
        .lines()
        .map(serde_json::from_str)
        .collect::<Result<_, _>>()?;
    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_close(event.duration_s, event.end_offset_s - event.start_offset_s, 1e-9);
    let start = event.start_time.as_deref().unwrap();
    assert!(start.starts_with("2024-03-01T12:00:"), "{start}");
    Ok(())
}

#[test]
fn threshold_above_curve_yields_no_events() -> Result<(), Box<dyn Error>> {
    let csv = burst_csv()?;
    let output = cargo_bin_cmd!("imuscope")
        .args(["events", "--input", path_str(csv.path())])
        .args(["--detect-threshold", "50"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    assert!(output.is_empty());
    Ok(())
}

#[test]
fn config_file_sets_defaults_and_flags_override() -> Result<(), Box<dyn Error>> {
    let csv = burst_csv()?;
    let mut config = tempfile::Builder::new().suffix(".toml").tempfile()?;
    writeln!(config, "window_size = 64\noverlap = 0\nwindow = \"hann\"")?;
    writeln!(config, "[detection]\nthreshold_db = 40.0")?;
    let output = cargo_bin_cmd!("imuscope")
        .args(["analyze", "--input", path_str(csv.path())])
        .args(["--config", path_str(config.path())])
        .args(["--nfft", "128"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let report: Report = serde_json::from_slice(&output)?;
    // nfft from the flag, overlap 0 from the file: 5998 / 128 segments
    assert_eq!(report.freq_bins, 65);
    assert_eq!(report.time_bins, 46);
    assert!(report.events.is_empty());
    Ok(())
}

#[test]
fn missing_group_fails_with_schema_error() {
    let fixture = sample_path("test_data/imu_sample.csv");
    let assert = cargo_bin_cmd!("imuscope")
        .args(["analyze", "--input", &fixture, "--channel", "gyro"])
        .assert()
        .failure();
    let stderr = String::from_utf8_lossy(&assert.get_output().stderr).to_string();
    assert!(stderr.contains("gyro_x"), "{stderr}");
}

#[test]
fn bad_settings_fail_before_reading_input() {
    let assert = cargo_bin_cmd!("imuscope")
        .args(["analyze", "--input", "does/not/exist.csv"])
        .args(["--nfft", "64", "--overlap", "64"])
        .assert()
        .failure();
    let stderr = String::from_utf8_lossy(&assert.get_output().stderr).to_string();
    assert!(stderr.contains("invalid parameter"), "{stderr}");
    assert!(!stderr.contains("reading"), "{stderr}");
}

#[test]
fn short_log_rejects_window_size() {
    let fixture = sample_path("test_data/imu_sample.csv");
    let assert = cargo_bin_cmd!("imuscope")
        .args(["analyze", "--input", &fixture])
        .assert()
        .failure();
    let stderr = String::from_utf8_lossy(&assert.get_output().stderr).to_string();
    assert!(stderr.contains("invalid parameter"), "{stderr}");
}

#[test]
fn aux_plots_writes_interval_and_temperature_figures() -> Result<(), Box<dyn Error>> {
    let fixture = sample_path("test_data/imu_sample.csv");
    let dir = tempfile::tempdir()?;
    let out = dir.path().join("aux");
    cargo_bin_cmd!("imuscope")
        .args(["aux-plots", "--input", &fixture, "--out-dir", path_str(&out)])
        .args(["--bins", "8"])
        .assert()
        .success();
    assert!(fs::metadata(out.join("intervals.png"))?.len() > 0);
    assert!(fs::metadata(out.join("temperature.png"))?.len() > 0);
    Ok(())
}

fn assert_close(a: f64, b: f64, tol: f64) {
    let diff = (a - b).abs();
    assert!(
        diff <= tol,
        "diff {} exceeded tol {} ({} vs {})",
        diff,
        tol,
        a,
        b
    );
}

fn path_str(path: &std::path::Path) -> &str {
    path.to_str().expect("utf8 path")
}

fn workspace_root() -> PathBuf {
    let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    manifest_dir
        .parent()
        .expect("crates dir")
        .parent()
        .expect("workspace root")
        .to_path_buf()
}

fn sample_path(relative: &str) -> String {
    workspace_root()
        .join(relative)
        .to_string_lossy()
        .to_string()
}
