//! rhythm-autoplay - screen-driven rhythm game auto player
//!
//! Entry point for the command-line tool.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rhythm_autoplay::capture::{Frame, FrameSource, ImageDirSource};
use rhythm_autoplay::config::{Config, LoggingConfig};
use rhythm_autoplay::estimator::{NoteTimeEstimator, SpeedFactor};
use rhythm_autoplay::geometry::TrackGeometry;
use rhythm_autoplay::player::chart::build_program;
use rhythm_autoplay::player::{spawn_event_logger, AutoPlayer, Chart};
use rhythm_autoplay::touch::{LoggingTouchSink, TouchController};
use rhythm_autoplay::utils::{format_user_error, MetricsCollector};
use rhythm_autoplay::vision::{NoteFinder, StateLibrary};

/// Command-line arguments for rhythm-autoplay
#[derive(Parser, Debug)]
#[command(name = "rhythm-autoplay")]
#[command(version, about = "Screen-driven rhythm game auto player", long_about = None)]
pub struct Args {
    /// Configuration file path (defaults are used when omitted)
    #[arg(short, long, env = "RHYTHM_AUTOPLAY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Note scroll speed override (x6, x8, x9, x10, x11)
    #[arg(long, env = "RHYTHM_AUTOPLAY_SPEED")]
    pub speed: Option<SpeedFactor>,

    /// Prefer the chart-driven path when a chart is supplied
    #[arg(long)]
    pub chart_mode: Option<bool>,

    /// Verbose logging (can be specified multiple times)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Log format (json|pretty|compact)
    #[arg(long, default_value = "pretty")]
    pub log_format: String,

    /// Write logs to file (in addition to stdout)
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Command to run
    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Play against a directory of captured frames
    Run {
        /// Directory of frames, replayed in file name order
        #[arg(long)]
        frames: PathBuf,

        /// Restart from the first frame when the directory is exhausted
        #[arg(long)]
        looping: bool,

        /// Directory of screen-state templates
        #[arg(long)]
        states: Option<PathBuf>,

        /// Chart for chart-driven play
        #[arg(long)]
        chart: Option<PathBuf>,

        /// Touch slots of the logging sink
        #[arg(long, default_value = "10")]
        slots: u32,

        /// Stop after this many play sessions
        #[arg(long)]
        sessions: Option<u32>,

        /// Write collected metrics here (.prom for Prometheus text, JSON otherwise)
        #[arg(long)]
        metrics_out: Option<PathBuf>,
    },

    /// Validate and print the effective configuration
    CheckConfig {
        /// Display width to validate against
        #[arg(long, default_value = "1280")]
        width: u32,

        /// Display height to validate against
        #[arg(long, default_value = "720")]
        height: u32,
    },

    /// Print the row-to-delay table of the configured speed
    Table {
        /// Print every n-th row
        #[arg(long, default_value = "10")]
        step: usize,
    },

    /// Detect notes on still images
    Detect {
        /// Image files
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },

    /// Play a chart's gesture program against the logging sink
    Rehearse {
        /// Chart file
        chart: PathBuf,

        /// Touch slots of the logging sink
        #[arg(long, default_value = "10")]
        slots: u32,

        /// Write collected metrics here (.prom for Prometheus text, JSON otherwise)
        #[arg(long)]
        metrics_out: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_config(&args);
    let _log_guard = init_logging(&args, config.as_ref().ok().map(|c| &c.logging))?;

    info!("════════════════════════════════════════════════════════");
    info!("  rhythm-autoplay v{}", env!("CARGO_PKG_VERSION"));
    info!("  Built: {} {}", env!("BUILD_DATE"), env!("BUILD_TIME"));
    info!("  Commit: {}", env!("GIT_HASH"));
    info!("  Profile: {}", if cfg!(debug_assertions) { "debug" } else { "release" });
    info!("════════════════════════════════════════════════════════");

    let result = config.and_then(|config| {
        debug!("Config: {:?}", config);
        run_command(&args.command, config)
    });
    if let Err(e) = &result {
        eprintln!("{}", format_user_error(e));
    }
    result
}

fn load_config(args: &Args) -> Result<Config> {
    let config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default_config(),
    };
    Ok(config.with_overrides(args.speed, args.chart_mode))
}

fn run_command(command: &Command, config: Config) -> Result<()> {
    match command {
        Command::Run {
            frames,
            looping,
            states,
            chart,
            slots,
            sessions,
            metrics_out,
        } => {
            let mut config = config;
            if sessions.is_some() {
                config.play.max_sessions = *sessions;
            }
            let inputs = RunInputs {
                frames,
                looping: *looping,
                states: states.as_deref(),
                chart: chart.as_deref(),
                slots: *slots,
                metrics_out: metrics_out.as_deref(),
            };
            run(config, inputs)
        }
        Command::CheckConfig { width, height } => check_config(&config, *width, *height),
        Command::Table { step } => print_table(&config, *step),
        Command::Detect { images } => detect(&config, images),
        Command::Rehearse {
            chart,
            slots,
            metrics_out,
        } => rehearse(&config, chart, *slots, metrics_out.as_deref()),
    }
}

/// Arguments of the `run` subcommand
struct RunInputs<'a> {
    frames: &'a Path,
    looping: bool,
    states: Option<&'a Path>,
    chart: Option<&'a Path>,
    slots: u32,
    metrics_out: Option<&'a Path>,
}

fn run(config: Config, inputs: RunInputs<'_>) -> Result<()> {
    let RunInputs {
        frames,
        looping,
        states,
        chart,
        slots,
        metrics_out,
    } = inputs;
    let source = ImageDirSource::open(frames, looping)
        .with_context(|| format!("Failed to open frame directory {}", frames.display()))?;
    let (width, height) = source.display_size();
    config.validate_for_display(width, height)?;

    let states = match states {
        Some(dir) => StateLibrary::load_dir(dir)
            .with_context(|| format!("Failed to load state templates from {}", dir.display()))?,
        None => {
            warn!("No state templates; the alive point alone detects play");
            StateLibrary::new()
        }
    };
    let metrics = (config.logging.metrics || metrics_out.is_some())
        .then(|| Arc::new(MetricsCollector::new()));
    let controller = TouchController::new(LoggingTouchSink::new(slots));
    if chart.is_some() && !config.play.chart_mode {
        warn!("Chart supplied but chart mode is off; playing from live detection");
    }

    let mut player = AutoPlayer::new(config, source, controller.clone(), states, metrics.clone());
    if let Some(path) = chart {
        player = player.with_chart(Chart::load(path).context("Failed to load chart")?);
    }
    let logger = spawn_event_logger(player.events())?;

    player.start()?;
    let outcome = player.wait().context("Auto player failed");
    // Closes the event channel so the logger can finish
    drop(player);
    let logged = logger
        .join()
        .map_err(|_| anyhow::anyhow!("Event logger thread panicked"))?;
    debug!("Logged {} player event(s)", logged);
    outcome?;

    let touches = controller.with_sink(|sink| sink.events().len());
    info!("Sink received {} touch call(s)", touches);
    if let Some(metrics) = metrics {
        println!("{}", metrics.summary());
        if let Some(path) = metrics_out {
            write_metrics(&metrics, path)?;
        }
    }
    Ok(())
}

fn check_config(config: &Config, width: u32, height: u32) -> Result<()> {
    config.validate_for_display(width, height)?;
    let text = toml::to_string_pretty(config).context("Failed to serialize config")?;
    println!("{}", text);
    info!("Configuration valid for {}x{}", width, height);
    Ok(())
}

fn print_table(config: &Config, step: usize) -> Result<()> {
    let estimator = NoteTimeEstimator::new(
        config.play.speed,
        config.track.check_upper_y,
        config.track.check_lower_y,
    );
    println!("speed {}", estimator.speed());
    println!("{:>6}  {:>8}", "row", "delay_ms");
    for (y, ms) in estimator.rows().step_by(step.max(1)) {
        println!("{:>6}  {:>8}", y, ms);
    }
    Ok(())
}

fn detect(config: &Config, images: &[PathBuf]) -> Result<()> {
    let estimator = Arc::new(NoteTimeEstimator::new(
        config.play.speed,
        config.track.check_upper_y,
        config.track.check_lower_y,
    ));
    let epoch = Instant::now();
    let mut finder = NoteFinder::new(estimator, &config.track, &config.detection, epoch);
    let hit_line = TrackGeometry::new(&config.track).line_at(config.track.hit_line_y);
    info!("Hit line from {:?} to {:?}", hit_line.left(), hit_line.right());

    for path in images {
        let image = image::open(path)
            .with_context(|| format!("Failed to read image {}", path.display()))?
            .to_rgb8();
        let frame = Frame::new(image, epoch);
        println!("{}", path.display());
        for (color, notes) in finder.find_all_notes(&frame) {
            for note in notes {
                println!(
                    "  {:<6} x={:<5} hit_in={:>5}ms box={:?} hold={:?} flick={}",
                    color, note.hit_pos.x, note.hit_time_ms, note.bounding_box, note.hold, note.is_slide
                );
            }
        }
    }
    Ok(())
}

fn write_metrics(metrics: &MetricsCollector, path: &Path) -> Result<()> {
    metrics
        .write_report(path)
        .with_context(|| format!("Failed to write metrics to {}", path.display()))?;
    info!("Metrics written to {}", path.display());
    Ok(())
}

fn rehearse(config: &Config, path: &Path, slots: u32, metrics_out: Option<&Path>) -> Result<()> {
    let chart = Chart::load(path).context("Failed to load chart")?;
    let hit_line = TrackGeometry::new(&config.track).line_at(config.track.hit_line_y);
    let program = build_program(&chart, &hit_line, &config.gesture, config.play.chart_hit_delay_ms)
        .context("Failed to compile chart")?;
    let streams = program.len();

    let controller = TouchController::new(LoggingTouchSink::new(slots));
    let metrics = Arc::new(MetricsCollector::new());
    let executor = controller.create_executor(&config.touch, Some(Arc::clone(&metrics)));
    // Give the first gesture time to be scheduled before it is due
    let lead = Duration::from_millis(100);
    executor.set_base_time(Instant::now() + lead);
    for stream in program {
        executor.execute(stream).context("Failed to queue gesture")?;
    }

    info!(
        "Rehearsing {} stream(s) over {}ms",
        streams,
        chart.last_time_ms().unwrap_or(0)
    );
    executor.start().context("Failed to start touch executor")?;
    executor.stop();

    let calls = controller.with_sink(|sink| sink.events().len());
    println!("{} stream(s), {} touch call(s)", streams, calls);
    println!("{}", metrics.summary());
    if let Some(out) = metrics_out {
        write_metrics(&metrics, out)?;
    }
    Ok(())
}

fn init_logging(args: &Args, logging: Option<&LoggingConfig>) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let log_level = match args.verbose {
        0 => logging.map_or("info", |l| l.level.as_str()),
        1 => "debug",
        _ => "trace",
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("rhythm_autoplay={level},warn", level = log_level))
    });

    // A log file from the command line wins over the configured directory
    let mut guard = None;
    let file_writer = if let Some(path) = &args.log_file {
        let file = std::fs::File::create(path)
            .with_context(|| format!("Failed to create log file {}", path.display()))?;
        Some(BoxMakeWriter::new(Arc::new(file)))
    } else if let Some(dir) = logging.and_then(|l| l.log_dir.as_ref()) {
        let appender = tracing_appender::rolling::daily(dir, "rhythm-autoplay.log");
        let (writer, worker_guard) = tracing_appender::non_blocking(appender);
        guard = Some(worker_guard);
        Some(BoxMakeWriter::new(writer))
    } else {
        None
    };
    let has_file = file_writer.is_some();

    match args.log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stdout))
                .with(file_writer.map(|w| tracing_subscriber::fmt::layer().json().with_writer(w).with_ansi(false)))
                .init();
        }
        "compact" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().compact().with_writer(std::io::stdout))
                .with(file_writer.map(|w| tracing_subscriber::fmt::layer().compact().with_writer(w).with_ansi(false)))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty().with_writer(std::io::stdout))
                .with(file_writer.map(|w| tracing_subscriber::fmt::layer().with_writer(w).with_ansi(false)))
                .init();
        }
    }
    if has_file {
        info!("Logging to file");
    }

    Ok(guard)
}
