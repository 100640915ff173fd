use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Context as _;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt as _, util::SubscriberInitExt as _};

use renderlink::{
    BackgroundProcessAgent, BlockingRenderCoordinator, EndpointAddress, FrameRange, Project,
    RenderAbort, RenderConfig, SequenceEngine,
};

/// Render one writer of a project, optionally as a supervised background process.
#[derive(Parser, Debug)]
#[command(name = "renderlink", version)]
struct Cli {
    /// Project JSON file.
    project: PathBuf,

    /// Run as a background render.
    #[arg(short = 'b', long = "background")]
    background: bool,

    /// Script name of the writer node to render.
    #[arg(short = 'w', long = "writer", value_name = "NAME")]
    writer: String,

    /// Output endpoint of the supervising process.
    #[arg(long = "IPCpipe", value_name = "ADDRESS")]
    ipc_pipe: Option<String>,

    /// Frame range override: `F`, `F-L` or `F-L:S`.
    #[arg(long, allow_hyphen_values = true)]
    frames: Option<FrameRange>,

    /// Render config JSON.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Worker threads: -1 renders inline, 0 picks automatically.
    #[arg(long, allow_negative_numbers = true)]
    threads: Option<i32>,

    /// Log filter used when `RUST_LOG` is not set.
    #[arg(long, default_value = "warn")]
    log_level: String,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level)?;
    let aborted = run(cli)?;
    if aborted {
        // Cancelled renders report a generic failure.
        std::process::exit(1);
    }
    Ok(())
}

fn init_tracing(level: &str) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level).with_context(|| format!("invalid log level '{level}'"))?,
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .context("install tracing subscriber")
}

fn load_config(cli: &Cli) -> anyhow::Result<RenderConfig> {
    let mut config = match &cli.config {
        Some(path) => RenderConfig::from_path(path)?,
        None => RenderConfig::default(),
    };
    if let Some(threads) = cli.threads {
        config.thread_count = threads;
        config.validate()?;
    }
    Ok(config)
}

fn run(cli: Cli) -> anyhow::Result<bool> {
    let config = load_config(&cli)?;
    let mut project = Project::from_path(&cli.project)?;
    project.resolve_paths(cli.project.parent().unwrap_or_else(|| Path::new(".")));
    project.writer(&cli.writer)?;
    info!(
        project = %cli.project.display(),
        writer = %cli.writer,
        background = cli.background,
        "render requested"
    );

    let abort = RenderAbort::new();
    let agent = cli.ipc_pipe.as_deref().map(|address| {
        Arc::new(BackgroundProcessAgent::start(
            &EndpointAddress::from_wire(address),
            &config,
            abort.clone(),
        ))
    });

    let mut engine = SequenceEngine::new(Arc::new(project), &cli.writer, config.clone(), abort);
    if let Some(frames) = cli.frames {
        engine = engine.with_frames(frames);
    }
    if let Some(agent) = &agent {
        engine = engine.with_agent(agent.clone());
    }

    let coordinator = BlockingRenderCoordinator::new(config);
    coordinator.render_full_sequence_blocking(&engine)?;
    let result = engine
        .take_result()
        .context("render finished without reporting a result")?;

    engine.release_agent();
    if let Some(agent) = agent {
        match Arc::try_unwrap(agent) {
            Ok(agent) => {
                if let Some(e) = agent.shutdown() {
                    warn!("input channel stopped with an error: {e}");
                }
            }
            Err(_) => warn!("control link still in use at exit"),
        }
    }

    let stats = result?;
    if stats.aborted {
        warn!(
            rendered = stats.frames_rendered,
            total = stats.frames_total,
            "render aborted"
        );
    }
    Ok(stats.aborted)
}
