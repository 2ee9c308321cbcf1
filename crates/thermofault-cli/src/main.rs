//! thermofault: detect thermal faults from a baseline/maintenance image pair.
//!
//! Reads the two images, runs the detection pipeline, prints a one-line
//! summary and optionally writes the JSON report, the annotated overlay
//! and every intermediate raster.
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin thermofault -- [OPTIONS] --asset-id <ID> <BASELINE> <MAINTENANCE>
//! ```
//!
//! Log verbosity follows `RUST_LOG` (default `info`); logs go to stderr.

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::Parser;
use thermofault_pipeline::diagnostics::{Clock, process_staged_with_diagnostics};
use thermofault_pipeline::{DetectionConfig, StagedDetection};
use tracing::{info, warn};

/// ΔE value mapped to white in the dumped difference image.
const DELTA_E_DUMP_CLAMP: f32 = 50.0;

/// Thermal fault detection for transformer inspection images.
///
/// Aligns the maintenance image onto the baseline, measures perceptual
/// color change and classifies hot regions as loose joints, point
/// overloads or full-wire overloads.
#[derive(Parser)]
#[command(name = "thermofault", version)]
struct Cli {
    /// Baseline image (PNG, JPEG, BMP, WebP).
    baseline: PathBuf,

    /// Maintenance image of the same asset.
    maintenance: PathBuf,

    /// Asset identifier recorded in the report.
    #[arg(long)]
    asset_id: String,

    /// Operator sensitivity in [0, 100]; higher flags smaller changes.
    #[arg(long)]
    sensitivity: Option<f64>,

    /// Write the annotated overlay PNG here.
    #[arg(long)]
    overlay: Option<PathBuf>,

    /// Write the JSON report here.
    #[arg(long)]
    report: Option<PathBuf>,

    /// Write every intermediate raster as PNG into this directory.
    #[arg(long)]
    dump_dir: Option<PathBuf>,

    /// Full detection config as a JSON string.
    ///
    /// Missing fields take their defaults.
    #[arg(long, conflicts_with = "config")]
    config_json: Option<String>,

    /// Read the detection config from a JSON file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print per-stage timings and counts to stderr.
    #[arg(long)]
    diagnostics: bool,

    /// Print the JSON report to stdout instead of the summary line.
    #[arg(long)]
    json: bool,
}

/// Build the detection config from `--config-json`, `--config`, or the
/// defaults.
fn config_from_cli(cli: &Cli) -> Result<DetectionConfig, String> {
    if let Some(ref json) = cli.config_json {
        return serde_json::from_str(json).map_err(|e| format!("Error parsing --config-json: {e}"));
    }
    if let Some(ref path) = cli.config {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("Error reading {}: {e}", path.display()))?;
        return serde_json::from_str(&text)
            .map_err(|e| format!("Error parsing {}: {e}", path.display()));
    }
    Ok(DetectionConfig::default())
}

fn read_input(path: &Path) -> Result<Vec<u8>, String> {
    std::fs::read(path).map_err(|e| format!("Error reading {}: {e}", path.display()))
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(msg) => {
            eprintln!("{msg}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<(), String> {
    let config = config_from_cli(cli)?;
    let baseline = read_input(&cli.baseline)?;
    let maintenance = read_input(&cli.maintenance)?;
    info!(
        baseline = %cli.baseline.display(),
        maintenance = %cli.maintenance.display(),
        asset_id = %cli.asset_id,
        "running detection"
    );

    let (staged, diagnostics) = process_staged_with_diagnostics(
        &baseline,
        &maintenance,
        &cli.asset_id,
        cli.sensitivity,
        &config,
        &StdClock,
    )
    .map_err(|e| format!("Detection error: {e}"))?;

    if cli.diagnostics {
        eprintln!("{}", diagnostics.report());
    }
    if let Some(degradation) = &staged.report.alignment.degradation {
        warn!(?degradation, "registration degraded");
    }

    let json = thermofault_export::to_json_with_metadata(
        &staged.report,
        &thermofault_export::ReportMetadata {
            baseline_path: cli.baseline.to_str(),
            maintenance_path: cli.maintenance.to_str(),
        },
    )
    .map_err(|e| format!("Error serializing report: {e}"))?;

    if let Some(ref path) = cli.report {
        std::fs::write(path, &json).map_err(|e| format!("Error writing {}: {e}", path.display()))?;
        info!(path = %path.display(), bytes = json.len(), "report written");
    }

    if let Some(ref path) = cli.overlay {
        let overlay = thermofault_export::render_overlay(&staged.warped, &staged.report)
            .map_err(|e| format!("Error rendering overlay: {e}"))?;
        overlay
            .save(path)
            .map_err(|e| format!("Error writing {}: {e}", path.display()))?;
        info!(path = %path.display(), "overlay written");
    }

    if let Some(ref dir) = cli.dump_dir {
        dump_stages(dir, &staged)?;
    }

    if cli.json {
        println!("{json}");
    } else {
        println!("{}", thermofault_pipeline::report::summary_line(&staged.report));
    }
    Ok(())
}

/// Write every intermediate raster of a run as PNG files in `dir`.
fn dump_stages(dir: &Path, staged: &StagedDetection) -> Result<(), String> {
    std::fs::create_dir_all(dir).map_err(|e| format!("Error creating {}: {e}", dir.display()))?;

    let save = |name: &str, result: image::ImageResult<()>| {
        result.map_err(|e| format!("Error writing {}: {e}", dir.join(name).display()))
    };
    save("baseline.png", staged.base.save(dir.join("baseline.png")))?;
    save("warped.png", staged.warped.save(dir.join("warped.png")))?;
    save(
        "delta_e.png",
        staged
            .delta
            .to_gray_image(DELTA_E_DUMP_CLAMP)
            .save(dir.join("delta_e.png")),
    )?;
    save("hot.png", staged.hot.save(dir.join("hot.png")))?;
    save("gate.png", staged.gate.save(dir.join("gate.png")))?;
    save("candidate.png", staged.candidate.save(dir.join("candidate.png")))?;
    save("skeleton.png", staged.skeleton.save(dir.join("skeleton.png")))?;
    info!(dir = %dir.display(), "intermediate rasters written");
    Ok(())
}

/// [`Clock`] implementation backed by [`std::time::Instant`].
struct StdClock;

impl Clock for StdClock {
    type Instant = Instant;

    fn now(&self) -> Instant {
        Instant::now()
    }

    fn elapsed(&self, since: &Instant) -> Duration {
        since.elapsed()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_all_options() {
        let cli = Cli::try_parse_from([
            "thermofault",
            "base.png",
            "maint.png",
            "--asset-id",
            "TX-1",
            "--sensitivity",
            "75",
            "--overlay",
            "out.png",
            "--report",
            "out.json",
            "--dump-dir",
            "stages",
            "--diagnostics",
            "--json",
        ])
        .unwrap();
        assert_eq!(cli.asset_id, "TX-1");
        assert_eq!(cli.sensitivity, Some(75.0));
        assert!(cli.diagnostics && cli.json);
        assert_eq!(cli.dump_dir, Some(PathBuf::from("stages")));
    }

    #[test]
    fn asset_id_is_required() {
        assert!(Cli::try_parse_from(["thermofault", "a.png", "b.png"]).is_err());
    }

    #[test]
    fn config_sources_conflict() {
        let result = Cli::try_parse_from([
            "thermofault",
            "a.png",
            "b.png",
            "--asset-id",
            "TX",
            "--config-json",
            "{}",
            "--config",
            "c.json",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn partial_config_json_fills_defaults() {
        let cli = Cli::try_parse_from([
            "thermofault",
            "a.png",
            "b.png",
            "--asset-id",
            "TX",
            "--config-json",
            r#"{"blobs": {"min_area": 40}}"#,
        ])
        .unwrap();
        let config = config_from_cli(&cli).unwrap();
        assert_eq!(config.blobs.min_area, 40);
        assert_eq!(config.topology, DetectionConfig::default().topology);
    }

    #[test]
    fn malformed_config_json_is_reported() {
        let cli = Cli::try_parse_from([
            "thermofault",
            "a.png",
            "b.png",
            "--asset-id",
            "TX",
            "--config-json",
            "{not json",
        ])
        .unwrap();
        assert!(config_from_cli(&cli).unwrap_err().contains("--config-json"));
    }
}
