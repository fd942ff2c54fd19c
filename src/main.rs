use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use log::{debug, info, warn};

use ephemeral::config::{load_config, EmbeddingConfig, VariabilityConfig};
use ephemeral::data::{load_cohort_table, load_dataset, CohortAssignment, RepresentationKind};
use ephemeral::embedding::export::{output_dir, save_global_csv, save_trajectory_csv};
use ephemeral::embedding::{embed, OutputNaming};
use ephemeral::encoder::{EncoderKind, Metric};
use ephemeral::render::{self, RenderContext};
use ephemeral::variability::{analyse, DegeneratePolicy};

/// Variability analysis and trajectory embeddings of time-resolved
/// per-subject representations.
#[derive(Parser)]
#[command(name = "ephemeral", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Per-time-step variability of all subjects, optionally by cohort
    ///
    /// ```bash
    /// ephemeral variability images.json -r 3 -d
    /// ephemeral variability curves.json -s total_persistence -g -c cohorts.csv
    /// ```
    Variability(VariabilityArgs),

    /// Low-dimensional embeddings of every subject's trajectory
    ///
    /// ```bash
    /// ephemeral embed images.json -e tsne -m cosine
    /// ephemeral embed images.json -e m-phate --global -D 3
    /// ```
    Embed(EmbedArgs),
}

/// Options shared by both subcommands.
#[derive(Args)]
struct InputArgs {
    /// Input dataset (JSON)
    input: PathBuf,

    /// Summary statistic to use; without it the input holds persistence images
    #[arg(short, long)]
    statistic: Option<String>,

    /// Rolling-mean window (0 disables smoothing)
    #[arg(short = 'r', long = "rolling")]
    window: Option<usize>,

    /// Drop the leading time steps before smoothing
    #[arg(short, long)]
    drop: bool,

    /// JSON configuration file; explicit flags override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Skip PNG rendering
    #[arg(long)]
    no_plot: bool,
}

#[derive(Args)]
struct VariabilityArgs {
    #[command(flatten)]
    input: InputArgs,

    /// Normalise and aggregate per cohort
    #[arg(short, long)]
    group: bool,

    /// Cohort table (CSV, JSON or Parquet), one row per subject
    #[arg(short, long)]
    cohorts: Option<PathBuf>,

    /// Label column of the cohort table
    #[arg(long)]
    cohort_column: Option<String>,

    /// Value of zero-range normalisation columns
    #[arg(long, value_enum)]
    degenerate: Option<DegeneratePolicy>,

    /// Output CSV (default: `<input stem>_variability.csv`)
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Args)]
struct EmbedArgs {
    #[command(flatten)]
    input: InputArgs,

    /// Encoding/embedding method
    #[arg(short, long, value_enum)]
    encoder: Option<EncoderKind>,

    /// Dimension of the embedding (2 or 3)
    #[arg(short = 'D', long)]
    dimension: Option<usize>,

    /// Embed pairwise distances under this metric
    #[arg(short, long)]
    metric: Option<Metric>,

    /// Fit one encoder on all subjects jointly
    #[arg(short, long = "global-embedding", alias = "global")]
    global: bool,

    /// Fit once on all subjects, then embed each subject without refitting
    #[arg(long)]
    reuse_global_fit: bool,

    /// Seed of randomised initialisations
    #[arg(long)]
    seed: Option<u64>,

    /// Output directory; artifacts go to `<out-dir>/<input stem>/`
    #[arg(short, long, default_value = "figures")]
    out_dir: PathBuf,
}

fn main() -> Result<()> {
    env_logger::init();

    match Cli::parse().command {
        Command::Variability(args) => run_variability(args),
        Command::Embed(args) => run_embed(args),
    }
}

fn representation(input: &InputArgs) -> RepresentationKind {
    RepresentationKind::from_statistic(input.statistic.as_deref())
}

fn variability_config(args: &VariabilityArgs) -> Result<VariabilityConfig> {
    let mut config: VariabilityConfig = match &args.input.config {
        Some(path) => load_config(path)?,
        None => VariabilityConfig::default(),
    };
    if let Some(window) = args.input.window {
        config.preprocessing.window = window;
    }
    config.preprocessing.drop_leading |= args.input.drop;
    config.group |= args.group;
    if let Some(column) = &args.cohort_column {
        config.cohort_column = column.clone();
    }
    if let Some(policy) = args.degenerate {
        config.degenerate = policy;
    }
    Ok(config)
}

fn run_variability(args: VariabilityArgs) -> Result<()> {
    let config = variability_config(&args)?;
    let dataset = load_dataset(&args.input.input, &representation(&args.input))?;

    let cohorts = match &args.cohorts {
        Some(path) => {
            let table = load_cohort_table(path, &config.cohort_column)?;
            let assignment = CohortAssignment::align(&dataset, &table)?;
            for id in dataset.ids() {
                if let Some(label) = assignment.label_of(id) {
                    debug!("subject {id} is in cohort {label}");
                }
            }
            Some(assignment)
        }
        None if config.group => {
            return Err(anyhow!("--group requires a cohort table (--cohorts)"));
        }
        None => None,
    };

    let report = analyse(&dataset, &config, cohorts.as_ref())?;
    let steps = report.degenerate_time_steps();
    if !steps.is_empty() {
        warn!(
            "{} time steps have zero range and were set to {:?}: {steps:?}",
            steps.len(),
            config.degenerate
        );
    }

    let csv_path = args
        .output
        .clone()
        .unwrap_or_else(|| sibling(&args.input.input, "_variability.csv"));
    report.save_csv(&csv_path)?;
    info!("wrote {}", csv_path.display());

    if !args.input.no_plot {
        let png = csv_path.with_extension("png");
        render::variability_plot(&RenderContext::default(), &report, &png)
            .map_err(|e| anyhow!("rendering {}: {e}", png.display()))?;
        info!("wrote {}", png.display());
    }
    Ok(())
}

fn embedding_config(args: &EmbedArgs) -> Result<EmbeddingConfig> {
    let mut config: EmbeddingConfig = match &args.input.config {
        Some(path) => load_config(path)?,
        None => EmbeddingConfig::default(),
    };
    if let Some(window) = args.input.window {
        config.preprocessing.window = window;
    }
    config.preprocessing.drop_leading |= args.input.drop;
    if let Some(encoder) = args.encoder {
        config.encoder = encoder;
    }
    if let Some(dimension) = args.dimension {
        config.dimension = dimension;
    }
    if let Some(metric) = &args.metric {
        config.metric = Some(metric.clone());
    }
    config.global |= args.global;
    config.reuse_global_fit |= args.reuse_global_fit;
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    Ok(config)
}

fn run_embed(args: EmbedArgs) -> Result<()> {
    let config = embedding_config(&args)?;
    config.validate()?;
    let dataset = load_dataset(&args.input.input, &representation(&args.input))?;
    let result = embed(&dataset, &config)?;

    let dir = output_dir(&args.out_dir, &args.input.input);
    std::fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
    let naming = OutputNaming::from_config(&config);
    let ctx = RenderContext::default();
    let plot = !args.input.no_plot;

    for trajectory in &result.trajectories {
        let stem = naming.trajectory_stem(trajectory);
        save_trajectory_csv(trajectory, &dir.join(format!("{stem}.csv")))?;
        if plot {
            let png = dir.join(format!("{stem}.png"));
            render::trajectory_plot(&ctx, trajectory, &stem, &png)
                .map_err(|e| anyhow!("rendering {}: {e}", png.display()))?;
        }
    }

    if let Some(global) = &result.global {
        save_global_csv(global, &dir.join(naming.global_csv()))?;
        if plot {
            let title = format!("{} (all subjects)", config.encoder);
            let png = dir.join(naming.global_plot());
            render::global_plot(&ctx, global, &title, &png)
                .map_err(|e| anyhow!("rendering {}: {e}", png.display()))?;
            if config.dimension == 2 {
                let png = dir.join(naming.density_plot());
                render::density_plot(&ctx, global, 30, &title, &png)
                    .map_err(|e| anyhow!("rendering {}: {e}", png.display()))?;
            }
        }
    }

    for skipped in &result.skipped {
        warn!("subject {} skipped: {}", skipped.subject, skipped.failure.reason);
    }
    info!(
        "wrote {} trajectories ({} fit(s)) to {}",
        result.trajectories.len(),
        result.fits,
        dir.display()
    );
    Ok(())
}

/// `<dir>/<input stem><suffix>`
fn sibling(input: &Path, suffix: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "dataset".to_string());
    input.with_file_name(format!("{stem}{suffix}"))
}
