use clap::{Parser, Subcommand};
use colored::*;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use anyhow::Result;
use chrono::{Duration, Local, NaiveDateTime};
use shared::models::{NetworkEvent, header_map};

const DEFAULT_LOG: &str = "data/network_traffic_data.csv";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

#[derive(Parser)]
#[command(name = "collector-cli")]
#[command(about = "Traffic collector log inspection", long_about = None)]
struct Cli {
    /// Path to the collected event log
    #[arg(long, default_value = DEFAULT_LOG)]
    log: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display collected events
    Events {
        /// Show only the last N events
        #[arg(short, long)]
        last: Option<usize>,

        /// Filter by process path substring
        #[arg(short, long)]
        process: Option<String>,

        /// Emit one JSON object per event instead of formatted output
        #[arg(long)]
        json: bool,
    },

    /// Show events within a time window (e.g. "1h", "24h", "7d")
    Timeline {
        #[arg(short, long, default_value = "24h")]
        last: String,
    },

    /// Show aggregate statistics
    Stats,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Events { last, process, json } => show_events(&cli.log, last, process, json)?,
        Commands::Timeline { last } => show_timeline(&cli.log, &last)?,
        Commands::Stats => show_stats(&cli.log)?,
    }

    Ok(())
}

fn load_events(path: &PathBuf) -> Result<Vec<NetworkEvent>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut lines = reader.lines();

    let headers = match lines.next() {
        Some(header_line) => header_map(&header_line?),
        None => return Ok(Vec::new()),
    };

    let mut events = Vec::new();
    for line in lines {
        let line = line?;
        if let Some(event) = NetworkEvent::from_csv_line(&line, &headers) {
            events.push(event);
        }
    }

    Ok(events)
}

fn show_events(
    path: &PathBuf,
    last_n: Option<usize>,
    process_filter: Option<String>,
    json: bool,
) -> Result<()> {
    let mut events = load_events(path)?;

    if let Some(ref filter) = process_filter {
        let filter = filter.to_lowercase();
        events.retain(|e| e.process_path.to_lowercase().contains(&filter));
    }

    if let Some(n) = last_n {
        let start = events.len().saturating_sub(n);
        events = events[start..].to_vec();
    }

    if json {
        for event in &events {
            println!("{}", serde_json::to_string(event)?);
        }
        return Ok(());
    }

    println!("\n{}", "═══════════════════════════════════════════════════════".cyan());
    println!("{} {}", "Traffic Collector".bright_cyan().bold(), "Events".white());
    println!("{}\n", "═══════════════════════════════════════════════════════".cyan());

    if events.is_empty() {
        println!("{}", "No events matching criteria.".yellow());
        return Ok(());
    }

    for event in &events {
        print_event(event);
    }

    Ok(())
}

fn print_event(event: &NetworkEvent) {
    let destination = if event.dest_domain.is_empty() {
        event.dest_ip.clone()
    } else {
        format!("{} ({})", event.dest_domain, event.dest_ip)
    };

    println!(
        "[{}] {} {} {}:{}",
        event.timestamp.bright_black(),
        event.protocol.bright_white().bold(),
        "→".white(),
        destination.bright_white(),
        event.dest_port
    );
    println!("  {} {}", "Process:".bright_blue(), event.process_path);
    println!("  {} {}", "Parent:".bright_blue(), event.parent_process);
    println!("  {} {}", "User:".bright_blue(), event.user_context);
    println!(
        "  {} sent {} / recv {}",
        "Bytes:".bright_blue(),
        event.bytes_sent,
        event.bytes_recv
    );

    if !event.dns_query.is_empty() {
        println!("  {} {}", "DNS:".bright_blue(), event.dns_query.bright_black());
    }

    println!();
}

fn show_timeline(path: &PathBuf, window: &str) -> Result<()> {
    let duration = parse_duration(window)?;
    let cutoff = Local::now().naive_local() - duration;

    println!("\n{}", "═══════════════════════════════════════════════════════".cyan());
    println!("{} {} {}", "Timeline".bright_cyan().bold(), "- Last".white(), window.bright_white());
    println!("{}\n", "═══════════════════════════════════════════════════════".cyan());

    let mut count = 0;
    for event in load_events(path)? {
        if let Ok(event_time) = NaiveDateTime::parse_from_str(&event.timestamp, TIMESTAMP_FORMAT) {
            if event_time >= cutoff {
                print_event(&event);
                count += 1;
            }
        }
    }

    if count == 0 {
        println!("{}", "No events in this time window.".yellow());
    }

    Ok(())
}

fn show_stats(path: &PathBuf) -> Result<()> {
    let events = load_events(path)?;

    if events.is_empty() {
        println!("{}", "No statistics available.".yellow());
        return Ok(());
    }

    let mut bytes_sent: u64 = 0;
    let mut bytes_recv: u64 = 0;
    let mut correlated = 0usize;
    let mut by_destination: HashMap<String, usize> = HashMap::new();
    let mut by_process: HashMap<String, usize> = HashMap::new();

    for event in &events {
        bytes_sent += event.bytes_sent;
        bytes_recv += event.bytes_recv;
        if event.process_path != "unknown" {
            correlated += 1;
        }

        let destination = if event.dest_domain.is_empty() {
            event.dest_ip.clone()
        } else {
            event.dest_domain.clone()
        };
        *by_destination.entry(destination).or_insert(0) += 1;
        *by_process.entry(event.process_path.clone()).or_insert(0) += 1;
    }

    println!("\n{}", "═══════════════════════════════════════════════════════".cyan());
    println!("{}", "Traffic Collector Statistics".bright_cyan().bold());
    println!("{}\n", "═══════════════════════════════════════════════════════".cyan());

    println!("{} {}", "Total Events:".bright_blue(), events.len().to_string().bright_white().bold());
    println!("{} {}", "Correlated:".bright_blue(), correlated);
    println!("{} {}", "Bytes Sent:".bright_blue(), bytes_sent);
    println!("{} {}", "Bytes Received:".bright_blue(), bytes_recv);

    println!("\n{}", "Top Destinations".bright_white().bold());
    for (name, count) in top_entries(by_destination, 5) {
        println!("  {:5}  {}", count, name);
    }

    println!("\n{}", "Top Processes".bright_white().bold());
    for (name, count) in top_entries(by_process, 5) {
        println!("  {:5}  {}", count, name);
    }

    println!();
    Ok(())
}

fn top_entries(counts: HashMap<String, usize>, limit: usize) -> Vec<(String, usize)> {
    let mut entries: Vec<(String, usize)> = counts.into_iter().collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    entries.truncate(limit);
    entries
}

fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.len() < 2 {
        return Err(anyhow::anyhow!("Invalid duration format"));
    }
    let num: i64 = s[..s.len() - 1].parse()?;
    let unit = &s[s.len() - 1..];

    match unit {
        "h" => Ok(Duration::hours(num)),
        "d" => Ok(Duration::days(num)),
        "m" => Ok(Duration::minutes(num)),
        _ => Err(anyhow::anyhow!("Invalid duration format")),
    }
}
