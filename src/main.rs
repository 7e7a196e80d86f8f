use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Once;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use chrono::NaiveDate;
use clap::Parser;
use simplelog::{
    ColorChoice, CombinedLogger, Config as LogConfig, LevelFilter, SharedLogger, TermLogger,
    TerminalMode, WriteLogger,
};

use traffic_collector::capture::live::LiveCapture;
use traffic_collector::config::load_settings;
use traffic_collector::monitoring::collector::{Collector, Outcome};
use traffic_collector::monitoring::correlation::Correlator;
use traffic_collector::procinfo::system::SystemProvider;
use traffic_collector::sink::{BufferedSink, CsvSink};
use traffic_collector::utils::{net, privilege};

// Global shutdown flag with atomic ordering
static RUNNING: AtomicBool = AtomicBool::new(true);
static SHUTDOWN_ONCE: Once = Once::new();

const LOG_FILE: &str = "collector.log";

#[derive(Parser)]
#[command(name = "collector")]
#[command(about = "Network traffic collector with process correlation", long_about = None)]
struct Args {
    /// Destination of the event log (overrides the settings file)
    #[arg(long)]
    output: Option<PathBuf>,

    /// First day of collection (YYYY-MM-DD)
    #[arg(long)]
    start_date: Option<NaiveDate>,

    /// Last day of collection (YYYY-MM-DD)
    #[arg(long)]
    end_date: Option<NaiveDate>,

    /// Path to the settings file
    #[arg(long, default_value = "config/collector.json")]
    config: String,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging()?;

    log::info!("=========================================");
    log::info!("      Traffic Collector Starting");
    log::info!("=========================================");

    let host = whoami::fallible::hostname().unwrap_or_else(|_| "unknown".to_string());
    let user = whoami::fallible::username().unwrap_or_else(|_| "unknown".to_string());
    log::info!("Host: {} (user: {})", host, user);

    let settings = load_settings(&args.config);
    let output = args
        .output
        .unwrap_or_else(|| PathBuf::from(&settings.output_path));
    log::info!("Event log: {}", output.display());
    if let Some(start) = args.start_date {
        log::info!("Collection starts on {}", start);
    }
    if let Some(end) = args.end_date {
        log::info!("Collection ends after {}", end);
    }

    if !privilege::has_capture_privilege() {
        log::warn!("Not running with capture privileges; packet capture will likely fail");
    }

    ctrlc::set_handler(|| {
        SHUTDOWN_ONCE.call_once(|| {
            log::info!("Received shutdown signal");
            RUNNING.store(false, Ordering::Relaxed);
        });
    })?;

    let local_addr = net::local_host_addr();
    match local_addr {
        Some(addr) => log::info!("Local address resolved to {}", addr),
        None => log::warn!("Could not resolve local address; byte direction will not be attributed"),
    }

    let sink = BufferedSink::new(
        CsvSink::new(&output)?,
        settings.buffer_capacity,
        settings.flush_threshold,
    );
    let capture = LiveCapture::new(settings.capture_device.clone());
    let provider = SystemProvider::new();
    let mut collector = Collector::new(
        capture,
        provider,
        Correlator::new(local_addr),
        sink,
        &settings,
        args.start_date,
        args.end_date,
    );

    match collector.run(&RUNNING) {
        Ok(Outcome::Stopped) => {
            log::info!("Collector stopped: end date reached");
            Ok(())
        }
        Ok(Outcome::Interrupted) => {
            log::info!("Collector stopped by operator");
            Ok(())
        }
        Err(e) => {
            log::error!("CRITICAL: {}", e);
            std::process::exit(1);
        }
    }
}

fn init_logging() -> Result<()> {
    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        LevelFilter::Info,
        LogConfig::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )];
    // Best effort: a missing log file never blocks collection.
    if let Ok(file) = OpenOptions::new().create(true).append(true).open(LOG_FILE) {
        loggers.push(WriteLogger::new(LevelFilter::Info, LogConfig::default(), file));
    }
    CombinedLogger::init(loggers)?;
    Ok(())
}
