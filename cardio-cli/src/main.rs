//! Cardio CLI entrypoint.
//!
//! ```bash
//! cardio analyze --input frames/ --fps 30 --model-dir models/
//! cardio analyze --input frames/ --json
//! cardio models --model-dir models/ --json
//! cardio config --json
//! ```

use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use serde_json::{Value, json};

use cardio_core::clinical::{CheckOutcome, MetricId};
use cardio_core::error::{EngineError, Result};
use cardio_core::source::FrameSource;
use cardio_core::types::{PixelLayout, RawFrame};
use cardio_pipeline::pipeline::{CycleReport, ResultSink};
use cardio_pipeline::runtime::{RuntimeRequest, load_calibration, load_config, prepare_runtime};

#[derive(Parser, Debug)]
#[command(
    name = "cardio",
    version,
    about = "Cardiac ultrasound frame-to-metric inference engine",
    arg_required_else_help = true,
    after_help = "Examples:\n  cardio analyze --input frames/ --fps 30\n  cardio analyze --input frames/ --json\n  cardio models --model-dir models/ --json\n  cardio config --json"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replay a directory of images through the pipeline and print cycle reports.
    Analyze(AnalyzeArgs),
    /// Load every model and report availability and declared shapes.
    Models(ModelsArgs),
    /// Print the effective configuration and calibration table.
    Config(ConfigArgs),
}

#[derive(Args, Debug, Clone)]
struct RuntimeArgs {
    /// Pipeline configuration JSON.
    #[arg(long = "config")]
    config: Option<PathBuf>,

    /// Calibration multipliers JSON (metric id → factor).
    #[arg(long = "calibration")]
    calibration: Option<PathBuf>,

    /// Directory holding ef_regressor.onnx, segmentation.onnx, multi_output.onnx.
    #[arg(long = "model-dir")]
    model_dir: Option<PathBuf>,

    /// ONNX Runtime intra-op threads per model.
    #[arg(long = "intra-threads")]
    intra_threads: Option<usize>,
}

impl RuntimeArgs {
    fn request(&self) -> RuntimeRequest {
        RuntimeRequest {
            config_path: self.config.clone(),
            calibration_path: self.calibration.clone(),
            model_dir: self.model_dir.clone(),
            intra_threads: self.intra_threads,
        }
    }
}

#[derive(Args, Debug, Clone)]
struct AnalyzeArgs {
    /// Directory of frames (png, jpg, jpeg, bmp), replayed in file name order.
    #[arg(short = 'i', long = "input")]
    input: PathBuf,

    /// Synthetic capture rate used to timestamp the frames.
    #[arg(long = "fps", default_value_t = 30.0)]
    fps: f64,

    /// Emit one JSON document on stdout instead of per-cycle lines.
    #[arg(long = "json", default_value_t = false)]
    json: bool,

    #[command(flatten)]
    runtime: RuntimeArgs,
}

#[derive(Args, Debug, Clone)]
struct ModelsArgs {
    /// Emit JSON model listing.
    #[arg(long = "json", default_value_t = false)]
    json: bool,

    #[command(flatten)]
    runtime: RuntimeArgs,
}

#[derive(Args, Debug, Clone)]
struct ConfigArgs {
    /// Validate and print this configuration instead of the defaults.
    #[arg(long = "config")]
    config: Option<PathBuf>,

    /// Validate and print this calibration table instead of the defaults.
    #[arg(long = "calibration")]
    calibration: Option<PathBuf>,

    /// Wrap the output in the JSON result envelope.
    #[arg(long = "json", default_value_t = false)]
    json: bool,
}

const JSON_SCHEMA_VERSION: u32 = 1;

const FRAME_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp"];

fn main() {
    init_tracing();

    let cli = Cli::parse();
    let json_error_command = match &cli.command {
        Commands::Analyze(args) if args.json => Some("analyze"),
        Commands::Models(args) if args.json => Some("models"),
        Commands::Config(args) if args.json => Some("config"),
        _ => None,
    };

    let result = match cli.command {
        Commands::Analyze(args) => build_runtime().and_then(|rt| rt.block_on(run_analyze(args))),
        Commands::Models(args) => build_runtime().and_then(|rt| rt.block_on(run_models(args))),
        Commands::Config(args) => run_config(args),
    };

    match result {
        Ok(()) => std::process::exit(0),
        Err(err) => {
            if let Some(command) = json_error_command {
                println!("{}", command_error_json(command, &err));
            } else {
                tracing::error!(error = %err, code = err.error_code(), "Command failed");
            }
            std::process::exit(err.error_code() as i32);
        }
    }
}

fn init_tracing() {
    let ansi_enabled = std::env::var_os("NO_COLOR").is_none() && std::io::stderr().is_terminal();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_ansi(ansi_enabled)
        .init();
}

fn build_runtime() -> Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?)
}

// ─── analyze ────────────────────────────────────────────────────────────────

async fn run_analyze(args: AnalyzeArgs) -> Result<()> {
    if !(args.fps.is_finite() && args.fps > 0.0) {
        return Err(EngineError::Config(format!(
            "--fps must be positive, got {}",
            args.fps
        )));
    }
    let source = ImageDirSource::open(&args.input, args.fps)?;
    let frame_count = source.len();

    let setup = prepare_runtime(&args.runtime.request())?;
    let pipeline = setup.pipeline;
    let models = pipeline.warm_up().await;

    let cancel = pipeline.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, stopping after the current frame");
            cancel.cancel();
        }
    });

    let mut reports = Vec::new();
    let metrics = if args.json {
        let mut sink = JsonSink::default();
        let metrics = pipeline.run(source, &mut sink).await?;
        reports = sink.reports;
        metrics
    } else {
        pipeline.run(source, &mut TextSink).await?
    };

    if args.json {
        let doc = json!({
            "schema_version": JSON_SCHEMA_VERSION,
            "command": "analyze",
            "ok": true,
            "input": args.input,
            "frames": frame_count,
            "fps": args.fps,
            "models": models,
            "metrics": metrics,
            "reports": reports,
        });
        println!("{doc}");
    } else {
        println!(
            "{} frames, {} AI cycles ({} dropped under load, {} gated out)",
            metrics.frames_received,
            metrics.cycles_completed,
            metrics.ai_dropped,
            metrics.gate_rejections
        );
    }
    Ok(())
}

/// Replays still images as a frame stream.  Decoding happens lazily on the
/// pipeline's source thread.
struct ImageDirSource {
    paths: std::vec::IntoIter<PathBuf>,
    total: usize,
    next_index: usize,
    frame_interval_us: f64,
}

impl ImageDirSource {
    fn open(dir: &Path, fps: f64) -> Result<Self> {
        let entries = std::fs::read_dir(dir).map_err(|err| {
            EngineError::Config(format!("Cannot read input directory {}: {err}", dir.display()))
        })?;
        let mut paths = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let is_frame = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| FRAME_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
            if is_frame && path.is_file() {
                paths.push(path);
            }
        }
        if paths.is_empty() {
            return Err(EngineError::Config(format!(
                "No frames ({}) found in {}",
                FRAME_EXTENSIONS.join(", "),
                dir.display()
            )));
        }
        paths.sort();
        Ok(Self {
            total: paths.len(),
            paths: paths.into_iter(),
            next_index: 0,
            frame_interval_us: 1_000_000.0 / fps,
        })
    }

    fn len(&self) -> usize {
        self.total
    }
}

impl FrameSource for ImageDirSource {
    fn next_frame(&mut self) -> Result<Option<RawFrame>> {
        let Some(path) = self.paths.next() else {
            return Ok(None);
        };
        let image = image::open(&path)
            .map_err(|err| EngineError::Pipeline(format!("Cannot decode {}: {err}", path.display())))?
            .to_rgb8();
        let timestamp_us = (self.next_index as f64 * self.frame_interval_us).round() as i64;
        self.next_index += 1;
        let (width, height) = image.dimensions();
        RawFrame::new(width, height, PixelLayout::Rgb8, timestamp_us, image.into_raw()).map(Some)
    }
}

// ─── Sinks ──────────────────────────────────────────────────────────────────

struct TextSink;

impl ResultSink for TextSink {
    fn on_report(&mut self, report: &CycleReport) -> Result<()> {
        println!("{}", report_line(report));
        Ok(())
    }
}

#[derive(Default)]
struct JsonSink {
    reports: Vec<Value>,
}

impl ResultSink for JsonSink {
    fn on_report(&mut self, report: &CycleReport) -> Result<()> {
        self.reports.push(serde_json::to_value(report)?);
        Ok(())
    }
}

fn report_line(report: &CycleReport) -> String {
    let t = report.frame_timestamp_us as f64 / 1e6;
    if let Some(rejection) = report.gate.rejection {
        return format!(
            "cycle {:>3}  t={t:>7.3}s  gated out ({rejection:?})  quality={} ({:.2})",
            report.cycle, report.quality.rating, report.quality.overall
        );
    }
    let metrics = MetricId::ALL
        .iter()
        .map(|&id| match report.metrics.get(id) {
            Some(v) => format!("{id}={v:.1}{}", id.unit()),
            None => format!("{id}=n/a"),
        })
        .collect::<Vec<_>>()
        .join(" ");
    let mut line = format!(
        "cycle {:>3}  t={t:>7.3}s  {metrics}  quality={} ({:.2})  ef-check={}  physio-check={}",
        report.cycle,
        report.quality.rating,
        report.quality.overall,
        outcome_label(report.consistency.ef_consistency),
        outcome_label(report.consistency.physiologic_relationships),
    );
    if let Some(coverage) = report.mask_coverage {
        line.push_str(&format!("  mask={:.0}%", coverage * 100.0));
    }
    if !report.unavailable.is_empty() {
        let names: Vec<_> = report.unavailable.iter().map(|k| k.logical_name()).collect();
        line.push_str(&format!("  unavailable=[{}]", names.join(",")));
    }
    line
}

fn outcome_label(outcome: CheckOutcome) -> &'static str {
    match outcome {
        CheckOutcome::Pass => "pass",
        CheckOutcome::Fail => "FAIL",
        CheckOutcome::Unknown => "n/a",
    }
}

// ─── models ─────────────────────────────────────────────────────────────────

async fn run_models(args: ModelsArgs) -> Result<()> {
    let setup = prepare_runtime(&args.runtime.request())?;
    let status = setup.pipeline.warm_up().await;

    if args.json {
        let models: Vec<Value> = status
            .iter()
            .map(|s| {
                let file = setup.model_files.iter().find(|f| f.kind == s.kind);
                json!({ "status": s, "file": file })
            })
            .collect();
        let doc = json!({
            "schema_version": JSON_SCHEMA_VERSION,
            "command": "models",
            "ok": true,
            "runtime_enabled": cardio_onnx::RUNTIME_ENABLED,
            "model_dir": setup.model_dir,
            "models": models,
        });
        println!("{doc}");
        return Ok(());
    }

    println!(
        "model dir: {} (onnx runtime {})",
        setup.model_dir.display(),
        if cardio_onnx::RUNTIME_ENABLED { "linked" } else { "not built" }
    );
    for s in &status {
        if s.available {
            println!(
                "  {:<14} ready        input={:?} outputs={}",
                s.logical_name,
                s.input_shape.as_deref().unwrap_or_default(),
                s.outputs.join(",")
            );
        } else {
            println!(
                "  {:<14} unavailable  {}",
                s.logical_name,
                s.load_error.as_deref().unwrap_or("unknown reason")
            );
        }
    }
    Ok(())
}

// ─── config ─────────────────────────────────────────────────────────────────

fn run_config(args: ConfigArgs) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    let calibration = load_calibration(args.calibration.as_deref())?;

    if args.json {
        let doc = json!({
            "schema_version": JSON_SCHEMA_VERSION,
            "command": "config",
            "ok": true,
            "config": config,
            "calibration": calibration,
        });
        println!("{doc}");
    } else {
        println!("{}", config.to_json_pretty()?);
        println!("{}", serde_json::to_string_pretty(&calibration)?);
    }
    Ok(())
}

// ─── JSON helpers ───────────────────────────────────────────────────────────

fn command_error_json(command: &str, err: &EngineError) -> String {
    json!({
        "schema_version": JSON_SCHEMA_VERSION,
        "command": command,
        "ok": false,
        "error": err.to_string(),
        "error_code": err.error_code(),
    })
    .to_string()
}
