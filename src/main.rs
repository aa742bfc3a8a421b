//! treeshrink CLI - Concurrent Batch Image Resizer
//!
//! Shrinks every image below a directory whose longer edge exceeds a bound,
//! or reports what sizes and densities a tree holds.

use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use console::style;
use tokio::signal;
use tracing::{info, warn};

use treeshrink::{
    survey, Config, ConsoleProgress, Coordinator, JsonProgress, NullSink, PipelineConfig, ProcessingEngine,
    ProgressSink, ResizeConfig, RunOptions,
};

/// treeshrink - Concurrent Batch Image Resizer
#[derive(Parser)]
#[command(
    name = "treeshrink",
    version,
    about = "Shrink every image in a directory tree to a maximum edge length",
    long_about = "treeshrink walks a directory tree breadth-first and resizes, in place or into \
                  a separate destination tree, every image whose longer edge exceeds --max-size. \
                  Aspect ratio, EXIF and (optionally clamped) DPI are preserved."
)]
struct Cli {
    /// Directory to process
    #[arg(value_name = "PATH")]
    path: PathBuf,

    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (TOML or YAML)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode (errors only)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
}

/// Available subcommands
#[derive(Subcommand)]
enum Commands {
    /// Resize every image whose longer edge exceeds the bound
    Resize {
        /// Longest allowed edge in pixels
        #[arg(long, value_name = "PIXELS")]
        max_size: Option<u32>,

        /// Clamp embedded DPI down to this value when the source exceeds it
        #[arg(long, value_name = "DPI")]
        dpi: Option<u32>,

        /// Write results under this directory instead of overwriting sources
        #[arg(short, long, value_name = "DIR")]
        destination: Option<PathBuf>,

        /// Number of worker threads (default: half the logical CPUs)
        #[arg(short, long, value_name = "COUNT")]
        workers: Option<usize>,

        /// Output progress as JSON lines
        #[arg(long)]
        json: bool,
    },
    /// Count images per size and per DPI without changing anything
    Stats,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("{}: {:#}", style("Error").red().bold(), e);
        process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = match &cli.config {
        Some(path) => {
            Config::from_file(path).with_context(|| format!("Failed to load configuration from {:?}", path))?
        }
        None => Config::default(),
    };

    if cli.quiet {
        config.logging.level = "error".to_string();
    } else if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    treeshrink::init_with_config(&config.logging);

    if !cli.path.is_dir() {
        bail!("{} is not a directory", cli.path.display());
    }
    let root = cli
        .path
        .canonicalize()
        .with_context(|| format!("Failed to resolve {}", cli.path.display()))?;

    match cli.command {
        Commands::Stats => run_stats(root).await,
        Commands::Resize {
            max_size,
            dpi,
            destination,
            workers,
            json,
        } => {
            let overrides = Config {
                resize: ResizeConfig {
                    max_size,
                    dpi_ceiling: dpi,
                },
                pipeline: PipelineConfig {
                    workers,
                    ..PipelineConfig::default()
                },
                ..Config::default()
            };
            let config = config.merge(overrides);
            let output = if json {
                Output::Json
            } else if cli.quiet {
                Output::Quiet
            } else {
                Output::Console
            };
            run_resize(root, destination, &config, output).await
        }
    }
}

/// Where progress goes
#[derive(Clone, Copy)]
enum Output {
    Console,
    Json,
    Quiet,
}

impl Output {
    fn sink(self) -> Box<dyn ProgressSink> {
        match self {
            Output::Console => Box::new(ConsoleProgress::new()),
            Output::Json => Box::new(JsonProgress::stdout()),
            Output::Quiet => Box::new(NullSink),
        }
    }
}

/// Run the resize pipeline
async fn run_resize(root: PathBuf, destination: Option<PathBuf>, config: &Config, output: Output) -> anyhow::Result<()> {
    let options = RunOptions::from_config(config, root, destination)?;
    if let Output::Console = output {
        println!("Reading images to process from {}", options.source_root.display());
    }
    if options.in_place() {
        info!("Resizing in place");
    } else {
        info!("Writing resized images under {}", options.destination_root.display());
    }

    let engine = Arc::new(ProcessingEngine::with_dpi_ceiling(config.resize.dpi_ceiling));
    let interrupt = Arc::new(AtomicBool::new(false));
    let coordinator = Coordinator::new(options, engine).with_interrupt(Arc::clone(&interrupt));

    let listener = tokio::spawn(watch_interrupt(interrupt));

    let report = tokio::task::spawn_blocking(move || {
        let mut sink = output.sink();
        coordinator.run(sink.as_mut())
    })
    .await
    .context("Coordinator task failed")??;

    listener.abort();

    if report.interrupted {
        info!("Run interrupted after {} of {} images", report.drained, report.discovered);
    }
    Ok(())
}

/// First Ctrl+C stops the run after in-flight images finish; a second one
/// exits immediately
async fn watch_interrupt(interrupt: Arc<AtomicBool>) {
    if signal::ctrl_c().await.is_err() {
        warn!("Cannot listen for Ctrl+C");
        return;
    }
    warn!("Interrupt received, finishing in-flight images (Ctrl+C again to force)");
    interrupt.store(true, Ordering::SeqCst);

    if signal::ctrl_c().await.is_ok() {
        eprintln!("{}", style("Forced exit").red().bold());
        process::exit(130);
    }
}

/// Print size and DPI tables for the tree
async fn run_stats(root: PathBuf) -> anyhow::Result<()> {
    println!("Reading images to process from {}", root.display());

    let inventory = tokio::task::spawn_blocking(move || survey(Path::new(&root), &ProcessingEngine::new()))
        .await
        .context("Survey task failed")?;

    print!("{}", inventory.render());
    if inventory.unreadable > 0 {
        println!("{} images could not be read.", style(inventory.unreadable).yellow());
    }
    println!("There's a total of {} images.", inventory.total);
    Ok(())
}
