use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use layerloom_anim::{AnimationDriver, AnimationSequence, Session};
use layerloom_core::LayerloomConfig;
use layerloom_encode::{EncoderOptions, FileSink, GifAccumulator};
use layerloom_render::{GpuSurface, LayerSource, RenderSurface, SoftwareSurface};

const DEFAULT_CONFIG: &str = "layerloom.toml";

#[derive(Parser)]
#[command(
    name = "layerloom",
    version,
    about = "Layerloom: layered sprite compositor and GIF exporter",
    long_about = "Layerloom composites up to seven independently loaded image layers through one shader\nand exports frame sequences of them as animated GIFs."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render every frame of the configured sequence and save the animation
    Export {
        /// Configuration file (default: ./layerloom.toml when present)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Directory or URL prefix holding one folder per layer
        #[arg(long)]
        base_path: Option<String>,

        /// Number of frames to export, starting at the first index
        #[arg(long)]
        frames: Option<u32>,

        /// Output directory for the artifact
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Rendering backend
        #[arg(long, value_enum, default_value_t = Backend::Software)]
        backend: Backend,

        /// Print a JSON summary instead of text
        #[arg(long)]
        json: bool,
    },

    /// Render a single composite to a PNG file
    Compose {
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Load every animated layer at this frame index first
        #[arg(long)]
        frame: Option<u32>,

        /// Replace a slot's image, e.g. `--layer 1=dark.png` (repeatable)
        #[arg(long = "layer", value_parser = parse_layer_arg)]
        layers: Vec<(usize, String)>,

        /// PNG file to write
        #[arg(short, long, default_value = "composite.png")]
        output: PathBuf,

        #[arg(long, value_enum, default_value_t = Backend::Software)]
        backend: Backend,
    },

    /// Print the effective configuration
    Info {
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Print as JSON instead of TOML
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Backend {
    /// Deterministic CPU rasterizer
    Software,
    /// Headless GPU device via wgpu
    Gpu,
}

fn parse_layer_arg(value: &str) -> std::result::Result<(usize, String), String> {
    let (slot, location) = value
        .split_once('=')
        .ok_or_else(|| format!("expected SLOT=PATH, got '{}'", value))?;
    let slot = slot
        .trim()
        .parse::<usize>()
        .map_err(|e| format!("invalid slot '{}': {}", slot, e))?;
    if location.is_empty() {
        return Err("layer location must not be empty".into());
    }
    Ok((slot, location.to_string()))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so `--json` output on stdout stays machine-readable.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Export {
            config,
            base_path,
            frames,
            output,
            backend,
            json,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(base_path) = base_path {
                config.animation.base_path = base_path;
            }
            if let Some(frames) = frames {
                config.animation.terminal_index =
                    terminal_for(config.animation.first_index, frames)?;
            }
            if let Some(output) = output {
                config.export.output_dir = output;
            }
            config.validate()?;

            let (width, height) = (config.canvas.width, config.canvas.height);
            match backend {
                Backend::Software => run_async(cmd_export(
                    SoftwareSurface::new(width, height)?,
                    config,
                    json,
                )),
                Backend::Gpu => run_async(cmd_export(
                    GpuSurface::headless(width, height)?,
                    config,
                    json,
                )),
            }
        }
        Commands::Compose {
            config,
            frame,
            layers,
            output,
            backend,
        } => {
            let config = load_config(config.as_deref())?;
            config.validate()?;
            let (width, height) = (config.canvas.width, config.canvas.height);
            match backend {
                Backend::Software => run_async(cmd_compose(
                    SoftwareSurface::new(width, height)?,
                    config,
                    frame,
                    layers,
                    output,
                )),
                Backend::Gpu => run_async(cmd_compose(
                    GpuSurface::headless(width, height)?,
                    config,
                    frame,
                    layers,
                    output,
                )),
            }
        }
        Commands::Info { config, json } => cmd_info(config.as_deref(), json),
    }
}

/// Exclusive end index for `frames` frames starting at `first`.
fn terminal_for(first: u32, frames: u32) -> Result<u32> {
    first
        .checked_add(frames)
        .with_context(|| format!("--frames {} overflows the frame index from {}", frames, first))
}

fn run_async<F>(future: F) -> Result<()>
where
    F: std::future::Future<Output = Result<()>>,
{
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to initialize async runtime")?;
    runtime.block_on(future)
}

/// Explicit path, else `./layerloom.toml` if it exists, else defaults.
fn load_config(path: Option<&Path>) -> Result<LayerloomConfig> {
    match path {
        Some(path) => LayerloomConfig::load_from_file(path)
            .with_context(|| format!("failed to load config: {}", path.display())),
        None if Path::new(DEFAULT_CONFIG).exists() => {
            LayerloomConfig::load_from_file(Path::new(DEFAULT_CONFIG))
                .with_context(|| format!("failed to load config: {}", DEFAULT_CONFIG))
        }
        None => Ok(LayerloomConfig::default()),
    }
}

async fn cmd_export<S: RenderSurface>(surface: S, config: LayerloomConfig, json: bool) -> Result<()> {
    let options = EncoderOptions::from_config(&config.canvas, &config.encoder, &config.export)?;
    let sink = FileSink::new(&config.export.output_dir);
    let mut accumulator = GifAccumulator::new(options)?;
    let mut session = Session::new(surface, config).context("failed to initialise compositor")?;

    let summary = AnimationDriver::new()
        .run(&mut session, &mut accumulator, &sink)
        .await
        .context("export failed")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("Exported {} frames ({} layers)", summary.frames, summary.layers);
        println!("   File:    {}", summary.location);
        println!("   Size:    {} bytes", summary.artifact.size_bytes);
        println!("   SHA-256: {}", summary.artifact.sha256);
        if summary.held_loads > 0 {
            println!("   Held:    {} layer load(s) failed and kept their previous image", summary.held_loads);
        }
        println!("   Time:    {}ms", summary.elapsed_ms);
    }
    Ok(())
}

async fn cmd_compose<S: RenderSurface>(
    surface: S,
    config: LayerloomConfig,
    frame: Option<u32>,
    layers: Vec<(usize, String)>,
    output: PathBuf,
) -> Result<()> {
    let sequence = AnimationSequence::from_config(&config.animation);
    let mut session = Session::new(surface, config).context("failed to initialise compositor")?;

    if let Some(index) = frame {
        let request = sequence.request_for(index)?;
        for (slot, source) in request.sources {
            let label = source.label();
            session
                .replace_layer(slot, source)
                .await
                .with_context(|| format!("failed to load {} into slot {}", label, slot))?;
        }
    }
    for (slot, location) in layers {
        let source = LayerSource::from_location(&location)?;
        session
            .replace_layer(slot, source)
            .await
            .with_context(|| format!("failed to load {} into slot {}", location, slot))?;
    }

    session.redraw()?;
    let composite = session.snapshot()?;
    let (width, height) = (composite.width, composite.height);
    let image = image::RgbaImage::from_raw(width, height, composite.data)
        .context("composite has an unexpected buffer size")?;
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    image
        .save(&output)
        .with_context(|| format!("failed to write {}", output.display()))?;
    println!("Wrote {}x{} composite to {}", width, height, output.display());
    Ok(())
}

fn cmd_info(path: Option<&Path>, json: bool) -> Result<()> {
    let config = load_config(path)?;
    config.validate()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&config)?);
    } else {
        println!("{}", toml::to_string_pretty(&config)?);
    }
    Ok(())
}
