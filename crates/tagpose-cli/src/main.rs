//! `tagpose` – command-line front end for the detection-to-pose pipeline.
//!
//! * `tagpose replay` feeds a JSON recording of camera frames and raw
//!   detections through [`TagDetectorNode`] and prints every published bus
//!   event as one JSON line on stdout.
//! * `tagpose check-config` validates a node config and lists the markers it
//!   registers.
//!
//! Logs go to stderr (see `tagpose_runtime::telemetry`).

mod config;
mod replay;

use clap::{Args, Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

use tagpose_middleware::{EventBus, Topic};
use tagpose_perception::SharedTfEngine;
use tagpose_runtime::{TagDetectorNode, init_tracing};

use crate::replay::{Recording, ReplayDetector, replay_frames};

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "tagpose")]
#[command(about = "Resolve fiducial marker detections into camera-frame poses")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay recorded detections through the pipeline.
    Replay(ReplayArgs),

    /// Validate a config file and list its markers.
    CheckConfig {
        /// Path to the node config (TOML).
        #[arg(long)]
        config: PathBuf,
    },
}

#[derive(Debug, Clone, Args)]
struct ReplayArgs {
    /// Path to the node config (TOML).  A missing file means defaults and
    /// an empty marker registry.
    #[arg(long)]
    config: PathBuf,

    /// Path to the recording (JSON).
    #[arg(long)]
    recording: PathBuf,

    /// Do not publish annotated images.
    #[arg(long)]
    no_annotation: bool,
}

fn main() -> CliResult<()> {
    let _guard = init_tracing("tagpose");
    let cli = Cli::parse();

    match cli.command {
        Commands::Replay(args) => run_replay(&args),
        Commands::CheckConfig { config } => run_check_config(&config),
    }
}

// ── replay ─────────────────────────────────────────────────────────────

fn run_replay(args: &ReplayArgs) -> CliResult<()> {
    let cfg = config::load(&args.config)?.unwrap_or_else(|| {
        info!(path = %args.config.display(), "config not found; using defaults");
        config::NodeConfig::default()
    });
    let registry = cfg.build_registry()?;
    let mut settings = cfg.to_settings();
    if args.no_annotation {
        settings.image_annotation_on = false;
    }

    let recording = Recording::load(&args.recording)?;
    let base_dir = args
        .recording
        .parent()
        .map(PathBuf::from)
        .unwrap_or_default();

    let bus = EventBus::default();
    let mut receivers: Vec<_> = Topic::ALL.iter().map(|t| bus.subscribe_to(*t)).collect();
    let tf = SharedTfEngine::new();
    let detector = ReplayDetector::default();
    let node = TagDetectorNode::new(
        detector.clone(),
        registry,
        bus.clone(),
        (tf.clone(), bus.clone()),
        settings,
    );

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let stats = replay_frames(&node, &detector, &recording, &base_dir, || -> CliResult<()> {
        for rx in receivers.iter_mut() {
            while let Some(event) = rx.try_recv() {
                let line = serde_json::json!({ "topic": rx.topic().name(), "event": event });
                writeln!(out, "{line}")?;
            }
        }
        Ok(())
    })?;
    out.flush()?;

    let tf_edges = tf.edge_count()?;
    info!(
        frames = recording.frames.len(),
        processed = stats.processed,
        dropped = stats.dropped,
        posed = stats.posed,
        tf_edges,
        "replay finished"
    );
    Ok(())
}

// ── check-config ───────────────────────────────────────────────────────

fn run_check_config(path: &Path) -> CliResult<()> {
    let cfg = config::load(path)?
        .ok_or_else(|| format!("config file {} does not exist", path.display()))?;
    let registry = cfg.build_registry()?;
    let settings = cfg.to_settings();

    println!("tagpose config {}", path.display());
    println!(
        "  sensor frame:       {}",
        settings.sensor_frame_id.as_deref().unwrap_or("<image frame>")
    );
    println!("  image annotation:   {}", settings.image_annotation_on);
    println!(
        "  warn period:        {:.1} s",
        settings.unregistered_warn_period.as_secs_f64()
    );
    println!("  markers:            {}", registry.len());

    let mut markers: Vec<_> = registry.iter().collect();
    markers.sort_by_key(|d| d.id);
    for d in markers {
        println!("    id {:>5}  size {:>8.4} m  frame {}", d.id, d.size, d.frame_name);
    }
    Ok(())
}
