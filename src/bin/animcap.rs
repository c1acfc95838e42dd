use std::path::{Path, PathBuf};

use anyhow::Context as _;
use clap::{Args, Parser, Subcommand};

use animcap::{
    CaptureConfig, CaptureOutput, CaptureService, CaptureTarget, DeterministicRequest,
    EventDrivenRequest, PageSource, Viewport, resolve_preset,
};

#[derive(Parser, Debug)]
#[command(name = "animcap", version, about = "Capture animated web content as a looping GIF")]
struct Cli {
    /// Service configuration JSON. Flags below override its values.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Maximum number of browser processes.
    #[arg(long, global = true)]
    pool_max: Option<usize>,

    /// Directory uploaded GIFs are written to.
    #[arg(long, global = true)]
    storage_root: Option<PathBuf>,

    /// Encoder binary.
    #[arg(long, global = true)]
    ffmpeg: Option<PathBuf>,

    /// Show the browser window.
    #[arg(long, global = true)]
    headed: bool,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Discover the page's animations and replay one group by seeking.
    Deterministic(DeterministicArgs),
    /// Capture whenever the page calls the injected capture function.
    EventDriven(EventDrivenArgs),
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct SourceArgs {
    /// Page to navigate to.
    #[arg(long)]
    url: Option<String>,

    /// HTML document to inject.
    #[arg(long)]
    html: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct TargetArgs {
    #[command(flatten)]
    source: SourceArgs,

    /// Element to capture; the whole document when omitted.
    #[arg(long)]
    selector: Option<String>,

    #[arg(long, default_value_t = 1280)]
    width: u32,

    #[arg(long, default_value_t = 720)]
    height: u32,

    /// low, medium or high.
    #[arg(long)]
    quality: Option<String>,
}

#[derive(Args, Debug)]
struct DeterministicArgs {
    #[command(flatten)]
    target: TargetArgs,

    #[arg(long, default_value_t = 20)]
    fps: u32,

    /// Which discovered animation group to capture.
    #[arg(long, default_value_t = 0)]
    animation_index: usize,
}

#[derive(Args, Debug)]
struct EventDrivenArgs {
    #[command(flatten)]
    target: TargetArgs,

    /// Delay between output frames, in seconds.
    #[arg(long, default_value_t = 0.05)]
    frame_duration: f64,

    /// In-page timers run this many times faster than real time.
    #[arg(long, default_value_t = 1.0)]
    time_compression: f64,

    /// Give up if the page has not signalled the end after this long.
    #[arg(long, default_value_t = 30_000)]
    timeout_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("animcap=info")),
        )
        .init();

    let config = load_config(&cli)?;
    let request = match &cli.cmd {
        Command::Deterministic(args) => Request::Deterministic(DeterministicRequest {
            target: read_target(&args.target)?,
            fps: args.fps,
            animation_index: args.animation_index,
            quality: args.target.quality.clone(),
        }),
        Command::EventDriven(args) => Request::EventDriven(EventDrivenRequest {
            target: read_target(&args.target)?,
            frame_duration_seconds: args.frame_duration,
            time_compression_factor: args.time_compression,
            timeout_ms: args.timeout_ms,
            quality: args.target.quality.clone(),
        }),
    };

    let service = CaptureService::from_config(config)?;
    let result = match &request {
        Request::Deterministic(req) => service.create_deterministic_capture(req).await,
        Request::EventDriven(req) => service.create_event_driven_capture(req).await,
    };
    service.shutdown().await;

    let output: CaptureOutput = result?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

enum Request {
    Deterministic(DeterministicRequest),
    EventDriven(EventDrivenRequest),
}

fn load_config(cli: &Cli) -> anyhow::Result<CaptureConfig> {
    let mut config = match cli.config.as_deref() {
        Some(path) => CaptureConfig::from_json_file(path)?,
        None => CaptureConfig::default(),
    };
    if let Some(max) = cli.pool_max {
        config.pool.max = max;
    }
    if let Some(root) = cli.storage_root.clone() {
        config.storage.root = root;
    }
    if let Some(program) = cli.ffmpeg.clone() {
        config.encoder.program = program;
    }
    if cli.headed {
        config.browser.headless = false;
    }
    config.validate()?;
    Ok(config)
}

fn read_target(args: &TargetArgs) -> anyhow::Result<CaptureTarget> {
    // Reject bad quality names before a browser is launched.
    resolve_preset(args.quality.as_deref())?;

    let source = match (&args.source.url, &args.source.html) {
        (Some(url), _) => PageSource::Url(url.clone()),
        (None, Some(path)) => PageSource::Html(read_html(path)?),
        (None, None) => anyhow::bail!("either --url or --html is required"),
    };
    let viewport = Viewport::new(args.width, args.height)?;
    let mut target = CaptureTarget::new(source, viewport);
    if let Some(selector) = args.selector.as_deref() {
        target = target.with_selector(selector);
    }
    Ok(target)
}

fn read_html(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("read html '{}'", path.display()))
}
