//! Panoptic Sample Preprocessor
//!
//! Builds the pose samples of one phase from the panoptic studio HD
//! captures: crops are rendered once into the derived-image cache and the
//! resulting group is written as JSON.
//!
//! Usage:
//! ```bash
//! cargo run --example panoptic_preprocess -- \
//!   --root-path /data/panoptic \
//!   --root-down /data/panoptic_down \
//!   --phase valid \
//!   --output valid_group.json
//! ```

use clap::Parser;
use depth_pose_tools::dataset::{build_panoptic_group, PanopticSplits};
use depth_pose_tools::{Phase, PipelineConfig};
use log::info;
use std::path::PathBuf;
use std::time::Instant;

/// Panoptic sample preprocessing tool
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Optional pipeline configuration (YAML)
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Root of the raw panoptic sequences
    #[arg(long)]
    root_path: Option<PathBuf>,

    /// Root of the derived-image cache
    #[arg(long)]
    root_down: Option<PathBuf>,

    /// Phase to build (train, valid, test)
    #[arg(short = 'p', long, default_value = "valid")]
    phase: String,

    /// Number of worker threads
    #[arg(short = 'n', long)]
    num_processes: Option<usize>,

    /// Where the sample group is written
    #[arg(short = 'o', long, default_value = "group.json")]
    output: PathBuf,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let phase: Phase = cli.phase.parse()?;

    let mut config = match &cli.config {
        Some(path) => PipelineConfig::from_yaml(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(root) = cli.root_path {
        config.root_path = root;
    }
    if let Some(root) = cli.root_down {
        config.root_down = root;
    }
    if let Some(workers) = cli.num_processes {
        config.num_processes = workers;
    }
    config.validate()?;

    println!("PANOPTIC SAMPLE PREPROCESSING");
    println!("=============================");
    println!("Phase: {phase}");
    println!("Raw data: {:?}", config.root_path);
    println!("Cache: {:?}", config.root_down);
    println!("Workers: {}\n", config.num_processes);

    let start = Instant::now();
    let splits = PanopticSplits::default();
    info!(
        "Building {phase} group from {} sequence(s)",
        splits.sequences(phase).len()
    );
    let group = build_panoptic_group(phase, &splits, &config)?;

    std::fs::write(&cli.output, serde_json::to_string(&group)?)?;

    println!(
        "Built {} samples in {:.1}s -> {:?}",
        group.len(),
        start.elapsed().as_secs_f64(),
        cli.output
    );
    Ok(())
}
