use anyhow::Context;
use clap::{Parser, ValueEnum};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use morphometer::{
    Batch, BatchItem, DetectorKind, DetectorRegistry, Engine, EngineConfig, ProcessingRequest,
    ReferencePopulation,
};

#[derive(Parser)]
#[command(name = "morphometer")]
#[command(about = "Locate anatomical landmarks and compute body measurements from animal photos")]
struct Cli {
    /// Input image files
    #[arg(value_name = "IMAGE", required = true)]
    images: Vec<PathBuf>,

    /// Known physical length (cm) used to calibrate the pixel scale
    #[arg(long, value_name = "CM")]
    reference_length: Option<f64>,

    /// Breed category for range checks and correction (e.g. boer, nubian, alpine)
    #[arg(long)]
    category: Option<String>,

    /// Downscale images whose longer side exceeds this
    #[arg(long, value_name = "PIXELS")]
    max_dimension: Option<u32>,

    /// Detector variants to run (comma separated)
    #[arg(long, value_enum, value_delimiter = ',')]
    detectors: Vec<DetectorArg>,

    /// Write annotated images to this directory
    #[arg(long, value_name = "DIR")]
    annotate_dir: Option<PathBuf>,

    /// Reference population JSON for the outlier check
    #[arg(long, value_name = "JSON")]
    population: Option<PathBuf>,

    /// Engine configuration JSON
    #[arg(long, value_name = "JSON")]
    config: Option<PathBuf>,

    /// Bootstrap trials per image
    #[arg(long)]
    samples: Option<usize>,

    /// Bootstrap seed
    #[arg(long)]
    seed: Option<u64>,

    /// Images processed concurrently (defaults to available cores)
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Run failed images once more after the first pass
    #[arg(long)]
    retry_failed: bool,

    /// Save intermediate images to directory (must be empty)
    #[arg(long, value_name = "DIR")]
    debug_out: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum DetectorArg {
    Primary,
    Broad,
    SecondaryFeature,
    Outline,
}

impl From<DetectorArg> for DetectorKind {
    fn from(arg: DetectorArg) -> Self {
        match arg {
            DetectorArg::Primary => DetectorKind::Primary,
            DetectorArg::Broad => DetectorKind::Broad,
            DetectorArg::SecondaryFeature => DetectorKind::SecondaryFeature,
            DetectorArg::Outline => DetectorKind::Outline,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = match &args.config {
        Some(path) => EngineConfig::from_json_file(path)?,
        None => EngineConfig::default(),
    };
    if let Some(max_dimension) = args.max_dimension {
        config = config.with_max_dimension(max_dimension);
    }
    if let Some(samples) = args.samples {
        config.bootstrap = config.bootstrap.with_samples(samples);
    }
    if let Some(seed) = args.seed {
        config.bootstrap = config.bootstrap.with_seed(seed);
    }
    if !args.detectors.is_empty() {
        config = config.with_detectors(args.detectors.iter().copied().map(DetectorKind::from).collect());
    }

    let mut engine = Engine::new(DetectorRegistry::builtin(), config)?;
    if let Some(debug_dir) = args.debug_out.clone() {
        engine = engine.with_debug(debug_dir)?;
    }
    let engine = Arc::new(engine);

    let population = match &args.population {
        Some(path) => Some(Arc::new(ReferencePopulation::from_json_file(path)?)),
        None => None,
    };

    let mut requests = Vec::with_capacity(args.images.len());
    for path in &args.images {
        let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        let mut request = ProcessingRequest::from_bytes(bytes).with_annotation(args.annotate_dir.is_some());
        if let Some(length) = args.reference_length {
            request = request.with_reference_length(length);
        }
        if let Some(category) = &args.category {
            request = request.with_category(category.clone());
        }
        if let Some(population) = &population {
            request = request.with_population(Arc::clone(population));
        }
        request.validate()?;
        requests.push((path.display().to_string(), request));
    }

    let jobs = args
        .jobs
        .unwrap_or_else(|| std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1));
    info!(images = requests.len(), jobs, "processing");

    let mut batch = Batch::new(requests);
    let mut progress = batch.run(Arc::clone(&engine), jobs).await;
    if args.retry_failed && progress.failed > 0 {
        progress = batch.retry_failed(Arc::clone(&engine), jobs).await;
    }

    if let Some(dir) = &args.annotate_dir {
        save_annotations(dir, batch.items())?;
    }

    let report = json!({
        "results": batch.items(),
        "summary": progress,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    if let Ok(engine) = Arc::try_unwrap(engine) {
        engine.shutdown();
    }
    Ok(())
}

fn save_annotations(dir: &Path, items: &[BatchItem]) -> anyhow::Result<()> {
    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    for item in items {
        let Some(annotated) = item.outcome.as_ref().and_then(|o| o.annotated.as_ref()) else {
            continue;
        };
        let stem = Path::new(&item.label)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("image_{:03}", item.order_index));
        let path = dir.join(format!("{:03}_{stem}_annotated.png", item.order_index));
        if let Err(e) = annotated.save(&path) {
            warn!(path = %path.display(), error = %e, "failed to save annotated image");
            continue;
        }
        info!(path = %path.display(), "saved annotated image");
    }
    Ok(())
}
