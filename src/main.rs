use std::error::Error;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use rocmon::collectors::linux::ProcStat;
use rocmon::collectors::rocm_smi::{RocmSmi, DEFAULT_PROGRAM};
use rocmon::config::{parse_positive_duration, CollectorConfig};
use rocmon::controller::{log_errors, Collector};
use rocmon::device_info::query_static_info;
use rocmon::history::DEFAULT_CAPACITY;
use rocmon::model::Sample;
use rocmon::sampler::Sampler;

/// How often the watch loop checks for new samples and the quit flag.
const POLL_RATE: Duration = Duration::from_millis(100);
/// Gap between the CPU baseline and the single round of `once`.
const CPU_SETTLE: Duration = Duration::from_millis(250);

#[derive(Parser, Debug)]
#[command(name = "rocmon", version, about = "Collect ROCm GPU telemetry from rocm-smi")]
struct Cli {
    /// Collection interval, e.g. 5, 500ms, 2s, 1m
    #[arg(long, default_value = "5s", value_parser = parse_positive_duration)]
    interval: Duration,

    /// Number of samples kept in memory
    #[arg(long, default_value_t = DEFAULT_CAPACITY)]
    history: usize,

    /// Time budget for one round of rocm-smi invocations
    #[arg(long, default_value = "3s", value_parser = parse_positive_duration)]
    timeout: Duration,

    /// rocm-smi binary to run
    #[arg(long, default_value = DEFAULT_PROGRAM)]
    tool: String,

    /// Also write logs to this file
    #[arg(long)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Collect until interrupted and print every new sample (default)
    Watch {
        /// One JSON object per line instead of a summary
        #[arg(long)]
        json: bool,
    },
    /// Run a single collection round and print it as JSON
    Once,
    /// Print static device information as JSON
    Info,
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let _log_guard = init_logging(cli.log_file.as_deref())?;

    let config = CollectorConfig {
        interval: cli.interval,
        max_history: cli.history,
        timeout: cli.timeout,
        tool: cli.tool,
    }
    .normalized();

    let should_quit = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&should_quit))?;
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&should_quit))?;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(2)
        .build()?;

    match cli.command.unwrap_or(Command::Watch { json: false }) {
        Command::Watch { json } => rt.block_on(watch(&config, json, &should_quit)),
        Command::Once => rt.block_on(once(&config)),
        Command::Info => rt.block_on(device_info(&config)),
    }
}

/// Log to stderr, and additionally to `log_file` when given. The returned
/// guard must stay alive for the file writer to flush.
fn init_logging(log_file: Option<&Path>) -> Result<Option<WorkerGuard>, Box<dyn Error>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("rocmon=info"));
    let stderr_layer = fmt::layer().with_writer(io::stderr);

    let Some(path) = log_file else {
        tracing_subscriber::registry()
            .with(filter)
            .with(stderr_layer)
            .init();
        return Ok(None);
    };

    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let file_name = path.file_name().ok_or("--log-file needs a file name")?;
    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(fmt::layer().with_ansi(false).with_writer(writer))
        .init();
    Ok(Some(guard))
}

async fn watch(config: &CollectorConfig, json: bool, should_quit: &AtomicBool) -> Result<(), Box<dyn Error>> {
    let collector = Collector::new(
        config,
        RocmSmi::new(config.tool.clone()),
        ProcStat::new(),
        log_errors(),
    );
    collector.start().await;
    info!(tool = %config.tool, interval = ?config.interval, "watching, Ctrl-C to stop");

    let mut stdout = io::stdout().lock();
    let mut last_printed = None;
    while !should_quit.load(Ordering::Relaxed) {
        if let Ok(sample) = collector.latest() {
            if last_printed != Some(sample.timestamp) {
                print_sample(&mut stdout, &sample, json)?;
                last_printed = Some(sample.timestamp);
            }
        }
        tokio::time::sleep(POLL_RATE).await;
    }

    collector.stop().await;
    let stats = collector.stats();
    info!(samples = stats.history.history_size, "shutting down");
    Ok(())
}

async fn once(config: &CollectorConfig) -> Result<(), Box<dyn Error>> {
    let runner = Arc::new(RocmSmi::new(config.tool.clone()));
    let mut sampler = Sampler::new(runner, ProcStat::new(), config.timeout);

    sampler.prime_cpu();
    tokio::time::sleep(CPU_SETTLE).await;
    let sample = sampler.collect().await?;

    println!("{}", serde_json::to_string_pretty(&sample)?);
    Ok(())
}

async fn device_info(config: &CollectorConfig) -> Result<(), Box<dyn Error>> {
    let runner = RocmSmi::new(config.tool.clone());
    let info = query_static_info(&runner, config.timeout).await;
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}

fn print_sample(out: &mut impl Write, sample: &Sample, json: bool) -> io::Result<()> {
    if json {
        serde_json::to_writer(&mut *out, sample)?;
        writeln!(out)?;
        return out.flush();
    }

    write!(
        out,
        "{} cpu {:>5.1}%",
        sample.timestamp.format("%H:%M:%S"),
        sample.host_cpu_usage
    )?;
    for d in &sample.devices {
        write!(
            out,
            " | gpu{} {:.0}°C {:.0}W use {:.0}%",
            d.id, d.temperature_c, d.power_w, d.gpu_usage_pct
        )?;
        if d.vram_total_gb > 0.0 {
            write!(out, " vram {:.1}/{:.1}GB", d.vram_used_gb, d.vram_total_gb)?;
        } else {
            write!(out, " vram {:.0}%", d.vram_used_pct)?;
        }
        if d.sclk_mhz > 0.0 {
            write!(out, " sclk {:.0}MHz", d.sclk_mhz)?;
        }
    }
    if sample.partial {
        write!(out, " (partial)")?;
    }
    writeln!(out)?;
    out.flush()
}
