//! changemap CLI - unsupervised change detection between two rasters

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use changemap_algorithms::change::{detect_changes, ChangeDetection, ChannelRule, PipelineConfig, RunReport};
use changemap_algorithms::classification::{ComponentSelection, InitStrategy};
use changemap_algorithms::morphology::StructuringElement;
use changemap_core::io::{ImageSource, RasterSink, TiffDirectory, TiffFile};
use changemap_core::Image;

// ─── CLI structure ──────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "changemap")]
#[command(author, version, about = "Unsupervised change detection between two co-registered rasters", long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect changed pixels between two images
    Detect {
        /// Image at time T1
        before: PathBuf,
        /// Image at time T2
        after: PathBuf,
        /// Output directory for difference.tif, change_map.tif and change_map_clean.tif
        output: PathBuf,
        /// JSON configuration file; flags override its values
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
        #[command(flatten)]
        overrides: ConfigOverrides,
    },
    /// Show dimensions, bands and statistics of a raster file
    Info {
        /// Input raster file
        input: PathBuf,
    },
    /// Print the default configuration as JSON
    Config,
}

#[derive(Args, Default)]
struct ConfigOverrides {
    /// Block and neighborhood side h
    #[arg(short, long)]
    window: Option<usize>,
    /// Retain exactly this many eigen-components
    #[arg(long, conflicts_with = "variance")]
    components: Option<usize>,
    /// Retain the fewest components reaching this variance share (0, 1]
    #[arg(long)]
    variance: Option<f64>,
    /// Clustering iteration cap
    #[arg(long)]
    max_iterations: Option<usize>,
    /// Centroid-shift convergence threshold
    #[arg(long)]
    tolerance: Option<f64>,
    /// Seed for random initialization
    #[arg(long)]
    seed: Option<u64>,
    /// Cluster initialization
    #[arg(long, value_enum)]
    init: Option<InitArg>,
    /// Empty-cluster re-seeds allowed
    #[arg(long)]
    max_reinit: Option<usize>,
    /// Structuring element: square, cross, disk
    #[arg(long)]
    element: Option<String>,
    /// Structuring element radius
    #[arg(long, default_value = "1")]
    radius: usize,
    /// Opening iterations (0 disables cleanup)
    #[arg(long)]
    morph_iterations: Option<usize>,
    /// Band combination rule
    #[arg(long, value_enum)]
    channel_rule: Option<ChannelRuleArg>,
    /// Ridge added to a degenerate covariance
    #[arg(long)]
    ridge: Option<f64>,
    /// Rows per parallel chunk
    #[arg(long)]
    band_rows: Option<usize>,
    /// Cluster without storing the full feature space
    #[arg(long)]
    streaming: bool,
    /// Overall time limit in seconds
    #[arg(long)]
    timeout: Option<f64>,
}

#[derive(Clone, Copy, ValueEnum)]
enum InitArg {
    MeanFarthest,
    RandomPair,
}

#[derive(Clone, Copy, ValueEnum)]
enum ChannelRuleArg {
    Mean,
    Max,
    Euclidean,
}

impl ConfigOverrides {
    fn apply(&self, mut config: PipelineConfig) -> Result<PipelineConfig> {
        if let Some(w) = self.window {
            config.window = w;
        }
        if let Some(s) = self.components {
            config.components = ComponentSelection::Count(s);
        }
        if let Some(f) = self.variance {
            config.components = ComponentSelection::VarianceFraction(f);
        }
        if let Some(n) = self.max_iterations {
            config.max_iterations = n;
        }
        if let Some(t) = self.tolerance {
            config.tolerance = t;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if let Some(init) = self.init {
            config.init = match init {
                InitArg::MeanFarthest => InitStrategy::MeanFarthest,
                InitArg::RandomPair => InitStrategy::RandomPair,
            };
        }
        if let Some(n) = self.max_reinit {
            config.max_reinit = n;
        }
        if let Some(shape) = &self.element {
            config.element = parse_se(shape, self.radius)?;
        }
        if let Some(n) = self.morph_iterations {
            config.morph_iterations = n;
        }
        if let Some(rule) = self.channel_rule {
            config.channel_rule = match rule {
                ChannelRuleArg::Mean => ChannelRule::Mean,
                ChannelRuleArg::Max => ChannelRule::Max,
                ChannelRuleArg::Euclidean => ChannelRule::Euclidean,
            };
        }
        if let Some(r) = self.ridge {
            config.ridge = r;
        }
        if let Some(n) = self.band_rows {
            config.band_rows = n;
        }
        if self.streaming {
            config.streaming = true;
        }
        if let Some(t) = self.timeout {
            config.timeout_secs = Some(t);
        }
        Ok(config)
    }
}

// ─── Helpers ────────────────────────────────────────────────────────────

fn setup_logging(verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("setting default subscriber failed")
}

fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

fn read_image(path: &Path) -> Result<Image> {
    let pb = spinner("Reading image...");
    let image = TiffFile::new(path)
        .load()
        .with_context(|| format!("Failed to read {}", path.display()))?;
    pb.finish_and_clear();
    Ok(image)
}

fn parse_se(shape: &str, radius: usize) -> Result<StructuringElement> {
    let element = match shape.to_lowercase().as_str() {
        "square" => StructuringElement::Square(radius),
        "cross" => StructuringElement::Cross(radius),
        "disk" => StructuringElement::Disk(radius),
        _ => bail!("Unknown structuring element: {}. Use: square, cross, disk", shape),
    };
    element.validate().context("Invalid structuring element")?;
    Ok(element)
}

fn load_config(path: Option<&Path>, overrides: &ConfigOverrides) -> Result<PipelineConfig> {
    let base = match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            serde_json::from_str(&text).with_context(|| format!("Invalid config {}", path.display()))?
        }
        None => PipelineConfig::default(),
    };
    let config = overrides.apply(base)?;
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn write_outputs(run: &ChangeDetection, output: &Path) -> Result<Vec<PathBuf>> {
    let pb = spinner("Writing outputs...");
    let mut sink = TiffDirectory::create(output)
        .with_context(|| format!("Failed to create {}", output.display()))?;
    sink.write("difference", &run.difference).context("Failed to write difference image")?;
    sink.write("change_map", &run.change_map).context("Failed to write change map")?;
    sink.write("change_map_clean", &run.cleaned).context("Failed to write cleaned change map")?;
    pb.finish_and_clear();
    Ok(sink.written().to_vec())
}

fn print_report(report: &RunReport) {
    println!("Image: {} x {} ({} band(s))", report.cols, report.rows, report.bands);
    println!("Window: {0}x{0}, {1} blocks", report.window, report.blocks);
    println!(
        "Components: {} ({:.2}% of variance)",
        report.components,
        report.variance_retained * 100.0
    );
    if let Some(ridge) = report.ridge_applied {
        println!("Ridge applied: {:e}", ridge);
    }
    println!(
        "Clustering: {} iteration(s), {}{}",
        report.iterations,
        if report.converged { "converged" } else { "NOT converged" },
        if report.reinitializations > 0 {
            format!(", {} re-seed(s)", report.reinitializations)
        } else {
            String::new()
        }
    );
    if report.degenerate {
        println!("Feature space degenerate: no change separable");
    }
    let total = (report.rows * report.cols).max(1) as f64;
    println!(
        "Changed pixels: {} ({:.2}%), after cleanup {} ({:.2}%)",
        report.changed_pixels,
        report.changed_pixels as f64 / total * 100.0,
        report.changed_pixels_clean,
        report.changed_pixels_clean as f64 / total * 100.0
    );
    println!("Elapsed: {:.3}s", report.elapsed_secs);
}

fn run_detect(
    before: &Path,
    after: &Path,
    output: &Path,
    config: &PipelineConfig,
) -> Result<(RunReport, Vec<PathBuf>)> {
    let before = read_image(before)?;
    let after = read_image(after)?;

    let start = Instant::now();
    let pb = spinner("Detecting changes...");
    let run = detect_changes(&before, &after, config);
    pb.finish_and_clear();
    let run = run.context("Change detection failed")?;
    info!("Change detection: {:.2?}", start.elapsed());

    if !run.report.converged {
        warn!("clustering stopped at the iteration cap; the change map may be unstable");
    }
    let written = write_outputs(&run, output)?;
    Ok((run.report, written))
}

// ─── Main ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose)?;

    match cli.command {
        Commands::Detect {
            before,
            after,
            output,
            config,
            json,
            overrides,
        } => {
            let config = load_config(config.as_deref(), &overrides)?;
            let (report, written) = run_detect(&before, &after, &output, &config)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
                for path in written {
                    println!("Saved: {}", path.display());
                }
            }
        }

        Commands::Info { input } => {
            let image = read_image(&input)?;
            let (rows, cols, bands) = image.dims();

            println!("File: {}", input.display());
            println!("Dimensions: {} x {} ({} cells)", cols, rows, rows * cols);
            println!("Bands: {}", bands);
            for (i, band) in image.bands().iter().enumerate() {
                let stats = band.statistics();
                println!("\nBand {}:", i + 1);
                if let Some(min) = stats.min {
                    println!("  Min: {:.4}", min);
                }
                if let Some(max) = stats.max {
                    println!("  Max: {:.4}", max);
                }
                if let Some(mean) = stats.mean {
                    println!("  Mean: {:.4}", mean);
                }
                println!(
                    "  Valid cells: {} ({:.1}%)",
                    stats.valid_count,
                    stats.valid_count as f64 / (rows * cols).max(1) as f64 * 100.0
                );
            }
        }

        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&PipelineConfig::default())?);
        }
    }

    Ok(())
}
