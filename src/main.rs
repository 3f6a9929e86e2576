//! CLI entry point: open the configured transport, identify and initialize
//! the instrument, resolve the working query spelling, then stream
//! measurements to console and CSV until Ctrl+C.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};

use benchlink::{
    prober,
    sink::{ConsoleSink, CsvSink, MeasurementSink},
    transport::mock::MockTransport,
    CancelToken, Command, CommandChannel, Settings, StreamSession, StreamSettings, StreamSummary,
    Transport,
};

#[derive(Parser, Debug)]
#[command(
    name = "benchlink",
    about = "Stream measurements from a SCPI-like bench instrument over serial, TCP, or a USB HID-UART bridge."
)]
struct Cli {
    /// TOML configuration file (compiled-in defaults otherwise).
    #[arg(long)]
    config: Option<PathBuf>,

    /// CSV output path.
    #[arg(long, default_value = "benchlink_datalog.csv")]
    csv: PathBuf,

    /// Run against a simulated instrument instead of real hardware.
    #[arg(long)]
    mock: bool,

    /// Increase log verbosity (-v: debug, -vv: trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let settings =
        Settings::load(cli.config.as_deref()).context("failed to load configuration")?;

    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, stopping after the current cycle");
                cancel.fire();
            }
        });
    }

    // All instrument I/O is blocking with explicit deadlines; keep it off
    // the async runtime's core threads.
    let summary = tokio::task::spawn_blocking(move || run_pipeline(settings, cli, cancel))
        .await
        .context("stream task panicked")??;

    info!(
        "session complete: {} cycles emitted, {} skipped",
        summary.cycles, summary.skipped
    );
    Ok(())
}

fn run_pipeline(settings: Settings, cli: Cli, cancel: CancelToken) -> Result<StreamSummary> {
    let transport: Box<dyn Transport> = if cli.mock {
        info!("using simulated instrument");
        Box::new(MockTransport::demo())
    } else {
        settings
            .transport
            .open()
            .context("failed to open transport")?
    };
    info!("transport open: {}", transport.describe());

    let mut channel = CommandChannel::new(transport, settings.retry.clone());

    // Identity is informational; a silent instrument is not fatal here.
    match channel.execute(&Command::query("*IDN?")) {
        Ok(reply) => info!("instrument identity: {}", reply.text),
        Err(err) => warn!("no identity reply: {err}"),
    }

    channel
        .run_sequence(&settings.init_sequence())
        .context("device initialization sequence failed")?;

    let variants = settings.probe.variant_set(settings.stream.channels);
    let resolved = prober::resolve(&mut channel, &variants, settings.probe.expected_fields)
        .context("could not resolve a working measurement query")?;
    info!("using measurement query: {}", resolved.text);

    let mut sinks: Vec<Box<dyn MeasurementSink>> = vec![
        Box::new(ConsoleSink::stdout()),
        Box::new(CsvSink::create(&cli.csv)?),
    ];

    let session = StreamSession::new(
        channel,
        StreamSettings {
            poll_interval: settings.stream.poll_interval,
            unit: settings.stream.unit.clone(),
            channel_count: settings.stream.channels,
            farewell: settings.farewell_command(),
        },
    );
    session.run(&resolved, &mut sinks, &cancel)
}
