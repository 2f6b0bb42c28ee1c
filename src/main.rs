//! dnsentinel - DNS covert-channel detector
//!
//! Command-line front end: analyze an existing capture file, or drive
//! tshark for a short live capture and analyze the result.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use std::path::{Path, PathBuf};
use std::process::Command;

use dnsentinel::config::Config;
use dnsentinel::pipeline::run_capture_pipeline;

#[derive(Parser)]
#[command(name = "dnsentinel")]
#[command(version)]
#[command(about = "DNS covert-channel detector", long_about = None)]
struct Cli {
    /// Configuration file path (JSON)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a capture file and emit a JSON report
    Analyze {
        /// Path to the capture file
        pcap: PathBuf,

        /// Write the JSON report here instead of stdout
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Enable web/WHOIS/DNS enrichment of flagged domains
        #[arg(long)]
        enable_web_checks: bool,
    },

    /// Capture DNS traffic with tshark, then analyze it
    Capture {
        /// Tshark interface index or name (see `tshark -D`)
        #[arg(short, long)]
        interface: Option<String>,

        /// Capture duration in seconds
        #[arg(short, long, default_value_t = 60)]
        duration: u64,

        /// Where to save the captured file
        #[arg(long, default_value = "capture_dns.pcap")]
        out_pcap: PathBuf,

        /// Write the JSON report here instead of stdout
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Enable web/WHOIS/DNS enrichment of flagged domains
        #[arg(long)]
        enable_web_checks: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref());
    init_logging(cli.verbose, &config.logging.level);

    match cli.command {
        Commands::Analyze {
            pcap,
            out,
            enable_web_checks,
        } => {
            if enable_web_checks {
                config.pipeline.enable_web_checks = true;
            }
            analyze(&pcap, &config, out.as_deref())
        }
        Commands::Capture {
            interface,
            duration,
            out_pcap,
            out,
            enable_web_checks,
        } => {
            if enable_web_checks {
                config.pipeline.enable_web_checks = true;
            }
            capture_with_tshark(interface.as_deref(), duration, &out_pcap)?;
            analyze(&out_pcap, &config, out.as_deref())
        }
    }
}

fn init_logging(verbose: u8, configured_level: &str) {
    let level = match verbose {
        0 => configured_level
            .parse()
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::from_default_env()
        .filter_level(level)
        .format_timestamp_millis()
        .format_module_path(true)
        .init();
}

fn analyze(pcap: &Path, config: &Config, out: Option<&Path>) -> Result<()> {
    let report = run_capture_pipeline(pcap, config)
        .with_context(|| format!("analyzing {}", pcap.display()))?;

    let json = serde_json::to_string_pretty(&report)?;
    match out {
        Some(path) => {
            std::fs::write(path, &json)
                .with_context(|| format!("writing report to {}", path.display()))?;
            println!("Report written to {}", path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}

/// Shell out to tshark for a bounded port-53 capture in classic pcap
/// format. Live capture stays external; this tool only analyzes.
fn capture_with_tshark(interface: Option<&str>, duration: u64, out_pcap: &Path) -> Result<()> {
    let Some(interface) = interface else {
        // help the operator pick one, then bail
        match Command::new("tshark").arg("-D").output() {
            Ok(output) => {
                eprintln!("Available interfaces:");
                eprintln!("{}", String::from_utf8_lossy(&output.stdout));
            }
            Err(err) => {
                eprintln!("Unable to list interfaces ({}); run 'tshark -D' manually.", err);
            }
        }
        bail!("no capture interface given; rerun with -i <index|name>");
    };

    let duration_arg = format!("duration:{}", duration);
    info!(
        "starting tshark capture on {} for {}s -> {}",
        interface,
        duration,
        out_pcap.display()
    );

    let status = Command::new("tshark")
        .args(["-i", interface])
        .args(["-f", "udp port 53 or tcp port 53"])
        .args(["-a", &duration_arg])
        .args(["-F", "libpcap"])
        .arg("-w")
        .arg(out_pcap)
        .status()
        .context("launching tshark (is Wireshark installed and on PATH?)")?;

    if !status.success() {
        bail!("tshark capture failed with {}", status);
    }

    info!("capture complete, saved to {}", out_pcap.display());
    Ok(())
}
