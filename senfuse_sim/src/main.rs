//! SenFuse simulator CLI
//!
//! Run deterministic fusion scenarios against synthetic depth sensors.

use clap::Parser;
use senfuse_core::FusionConfig;
use senfuse_sim::scenarios::ScenarioId;
use senfuse_sim::{ScenarioResult, ScenarioRunner, SimExport};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// SenFuse deterministic fusion simulation CLI
#[derive(Parser, Debug)]
#[command(name = "senfuse-sim")]
#[command(about = "Run deterministic depth-fusion scenarios for SenFuse", long_about = None)]
struct Args {
    /// Master seed for determinism (0 = random from time)
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Scenario to run (single_sensor, dual_sensor, carving, border_training, all)
    #[arg(short = 'S', long, default_value = "all")]
    scenario: String,

    /// Frames integrated per scene and sensor
    #[arg(short, long, default_value = "12")]
    frames: usize,

    /// Rays per image axis
    #[arg(long, default_value = "24")]
    rays: usize,

    /// Fusion configuration (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory to save scene grids into
    #[arg(long)]
    save: Option<PathBuf>,

    /// Export per-frame statistics to a JSON file (single scenario only)
    #[arg(long)]
    export: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,
}

fn main() {
    let args = Args::parse();

    // Initialize logging; RUST_LOG overrides the verbosity flag.
    let level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        std::process::exit(1);
    }

    if !args.json {
        info!("SenFuse Simulator v{}", env!("CARGO_PKG_VERSION"));
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }

    let scenarios: Vec<ScenarioId> = if args.scenario == "all" {
        ScenarioId::all()
    } else {
        vec![args.scenario.parse().unwrap_or_else(|e| {
            eprintln!("Error: {}", e);
            eprintln!("Available scenarios: single_sensor, dual_sensor, carving, border_training, all");
            std::process::exit(1);
        })]
    };

    let config = match &args.config {
        Some(path) => FusionConfig::from_json_file(path).unwrap_or_else(|e| {
            eprintln!("Error: cannot load config {}: {}", path.display(), e);
            std::process::exit(1);
        }),
        None => FusionConfig::default(),
    };

    let seed = if args.seed == 0 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(42)
    } else {
        args.seed
    };

    let mut runner = ScenarioRunner::new(seed)
        .with_frames(args.frames)
        .with_rays_per_axis(args.rays)
        .with_config(config);
    if let Some(dir) = &args.save {
        runner = runner.with_save_dir(dir);
    }

    // Handle --export mode
    if let Some(export_path) = &args.export {
        if scenarios.len() > 1 {
            eprintln!("Error: --export only supports a single scenario, not 'all'");
            std::process::exit(1);
        }
        let scenario = scenarios[0];
        let mut export = SimExport::new(scenario.name(), seed);
        let result = runner.run_with_export(scenario, Some(&mut export));

        match export.write_to_file(export_path) {
            Ok(()) => info!("Exported {} frames to {}", export.frames.len(), export_path.display()),
            Err(e) => error!("Failed to write export: {}", e),
        }
        report(&result, args.json);
        if !result.passed {
            std::process::exit(1);
        }
        return;
    }

    let results: Vec<ScenarioResult> = scenarios.iter().map(|&scenario| runner.run(scenario)).collect();
    let failed_count = results.iter().filter(|r| !r.passed).count();

    if args.json {
        let summary = serde_json::json!({
            "total": results.len(),
            "passed": results.len() - failed_count,
            "failed": failed_count,
            "results": results.iter().map(result_json).collect::<Vec<_>>(),
        });
        match serde_json::to_string_pretty(&summary) {
            Ok(text) => println!("{}", text),
            Err(e) => error!("Failed to encode summary: {}", e),
        }
    } else {
        for result in &results {
            report(result, false);
        }
        info!("");
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        if failed_count == 0 {
            info!("✅ All {} scenario runs passed!", results.len());
        } else {
            error!("❌ {}/{} scenario runs failed!", failed_count, results.len());
        }
    }

    // Exit with proper code for CI
    if failed_count > 0 {
        std::process::exit(1);
    }
}

fn report(result: &ScenarioResult, json: bool) {
    if json {
        match serde_json::to_string_pretty(&result_json(result)) {
            Ok(text) => println!("{}", text),
            Err(e) => error!("Failed to encode result: {}", e),
        }
        return;
    }
    if result.passed {
        info!("✓ {} (seed={}) PASSED", result.scenario.name(), result.seed);
    } else {
        error!(
            "✗ {} (seed={}) FAILED: {}",
            result.scenario.name(),
            result.seed,
            result.failure_reason.as_deref().unwrap_or("unknown")
        );
    }
    if let Some(report) = &result.report {
        for (sensor, metrics) in &report.sensors {
            info!(
                "    {:<8} iou={:.3} acc={:.3} mad={:.4} mse={:.5}",
                sensor, metrics.iou, metrics.acc, metrics.mad, metrics.mse
            );
        }
        let fused = &report.fused;
        info!(
            "    {:<8} iou={:.3} acc={:.3} mad={:.4} mse={:.5}",
            "fused", fused.iou, fused.acc, fused.mad, fused.mse
        );
    }
    if !result.saved_files.is_empty() {
        info!("    saved {} grid files", result.saved_files.len());
    }
}

fn result_json(result: &ScenarioResult) -> serde_json::Value {
    serde_json::json!({
        "scenario": result.scenario.name(),
        "seed": result.seed,
        "passed": result.passed,
        "frames": result.frames,
        "integrations": result.metrics.integrations,
        "surface_updates": result.metrics.surface_updates,
        "empty_updates": result.metrics.empty_updates,
        "dropped": result.metrics.dropped,
        "failure_reason": result.failure_reason,
        "fused": result.report.as_ref().map(|r| r.fused.to_map()),
        "sensors": result.report.as_ref().map(|r| {
            r.sensors
                .iter()
                .map(|(name, m)| (name.clone(), m.to_map()))
                .collect::<std::collections::BTreeMap<_, _>>()
        }),
    })
}
