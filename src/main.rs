// src/main.rs
//
// CLI entry point. Loads the manifest and run settings, opens file
// logging, and dispatches to the transmit or receive side per the
// manifest's `Function:` line (overridable from the command line for
// testing both roles against the same manifest).

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;

use diode_bridge::config::{Manifest, Role, Settings};
use diode_bridge::logging::{info, severe};
use diode_bridge::Links;

#[derive(Parser, Debug)]
#[command(name = "diode-bridge", about = "Data-diode industrial telemetry bridge")]
struct Cli {
    /// Directory containing config.txt, Settings.xml, and device config files.
    #[arg(long, default_value = ".")]
    config_dir: PathBuf,

    /// Override the manifest's Function: line.
    #[arg(long, value_enum)]
    role: Option<RoleArg>,

    /// Also write informational (non-SEVERE) log entries to logfile.txt.
    #[arg(long)]
    log_info: bool,

    /// Serial device for lane 1.
    #[arg(long, default_value = "/dev/ttyS0")]
    lane1: String,

    /// Serial device for lane 2.
    #[arg(long, default_value = "/dev/ttyS1")]
    lane2: String,

    /// Serial device for lane 3.
    #[arg(long, default_value = "/dev/ttyS2")]
    lane3: String,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum RoleArg {
    Transmit,
    Receive,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = diode_bridge::logging::init(&cli.config_dir, cli.log_info) {
        eprintln!("failed to start logging: {}", e);
    }

    let manifest_path = cli.config_dir.join("config.txt");
    let manifest = match Manifest::load(&manifest_path) {
        Ok(m) => m,
        Err(e) => {
            severe!("[main] cannot load manifest {}: {}", manifest_path.display(), e);
            std::process::exit(1);
        }
    };

    let settings_path = cli.config_dir.join("Settings.xml");
    let settings = match Settings::load_or_create(&settings_path) {
        Ok(s) => s,
        Err(e) => {
            severe!("[main] cannot load settings {}: {}", settings_path.display(), e);
            std::process::exit(1);
        }
    };

    let role = match cli.role {
        Some(RoleArg::Transmit) => Role::Transmit,
        Some(RoleArg::Receive) => Role::Receive,
        None => manifest.role,
    };

    let links = Links {
        lane1: cli.lane1,
        lane2: cli.lane2,
        lane3: cli.lane3,
    };

    let stop = Arc::new(AtomicBool::new(false));
    let stop_signal = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("[main] shutdown requested");
            stop_signal.store(true, Ordering::Relaxed);
        }
    });

    match role {
        Role::Transmit => {
            info!("[main] starting as transmitter");
            diode_bridge::run_transmit(manifest, links, settings.gather_interval_ms, stop).await;
        }
        Role::Receive => {
            info!("[main] starting as receiver");
            diode_bridge::run_receive(manifest, links, settings.db_url, stop).await;
        }
    }
}
