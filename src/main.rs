//! Serial Listener
//!
//! Connects to a serial device, prints every line it sends and the key/value
//! properties parsed from it.
//!
//! # Usage
//!
//! ```bash
//! # Listen on the default port (/dev/ttyACM0 at 9600 baud)
//! serial-listener listen
//!
//! # Listen on another port for 60 seconds
//! serial-listener listen -p /dev/ttyUSB0 -b 115200 --duration 60
//!
//! # Use a configuration file
//! serial-listener listen -c listener.toml
//!
//! # List available serial ports
//! serial-listener ports
//!
//! # Show the effective configuration
//! serial-listener config -c listener.toml
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use serial_listener::ListenerConfig;

#[cfg(feature = "serial")]
use {
    anyhow::Context,
    clap::Args,
    colored::Colorize,
    log::info,
    serial_listener::report::{PropertyReporter, ReportCounters},
    serial_listener::SerialConnection,
    std::sync::Arc,
    std::time::Duration,
};

/// Serial Listener
///
/// Prints newline-delimited key/value data from a serial device
#[derive(Parser)]
#[command(name = "serial-listener")]
#[command(version)]
#[command(about = "Prints newline-delimited key/value data from a serial device")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Listen for lines and print their properties (requires --features serial)
    #[cfg(feature = "serial")]
    Listen(ListenArgs),

    /// List available serial ports (requires --features serial)
    #[cfg(feature = "serial")]
    Ports,

    /// Print the effective configuration as TOML
    Config {
        /// Configuration file (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[cfg(feature = "serial")]
#[derive(Args)]
struct ListenArgs {
    /// Serial port path (e.g., /dev/ttyACM0, COM3)
    #[arg(short, long)]
    port: Option<String>,

    /// Baud rate (default: 9600)
    #[arg(short, long)]
    baud: Option<u32>,

    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Discard lines longer than this many bytes
    #[arg(long)]
    max_line: Option<usize>,

    /// Disable timestamps
    #[arg(long)]
    no_timestamps: bool,

    /// Stop after this many seconds instead of waiting for Ctrl+C
    #[arg(short, long)]
    duration: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    match cli.command {
        #[cfg(feature = "serial")]
        Commands::Listen(args) => handle_listen(args).await,
        #[cfg(feature = "serial")]
        Commands::Ports => serial_listener::serial::port::print_ports(),
        Commands::Config { config } => handle_config(config.as_deref()),
    }
}

fn load_config(path: Option<&Path>) -> Result<ListenerConfig> {
    match path {
        Some(path) => ListenerConfig::load(path),
        None => Ok(ListenerConfig::default()),
    }
}

fn handle_config(path: Option<&Path>) -> Result<()> {
    let config = load_config(path)?;
    print!("{}", config.to_toml()?);
    Ok(())
}

#[cfg(feature = "serial")]
fn apply_overrides(mut config: ListenerConfig, args: &ListenArgs) -> Result<ListenerConfig> {
    if let Some(ref port) = args.port {
        config.port.path = port.clone();
    }
    if let Some(baud) = args.baud {
        config.port.baud_rate = baud;
    }
    if args.max_line.is_some() {
        config.decoder.max_line_length = args.max_line;
    }
    if args.no_timestamps {
        config.output.timestamps = false;
    }

    config.validate()?;
    Ok(config)
}

#[cfg(feature = "serial")]
async fn handle_listen(args: ListenArgs) -> Result<()> {
    let config = apply_overrides(load_config(args.config.as_deref())?, &args)?;
    let port_config = config.port_config();

    let reporter = PropertyReporter::stdout().with_timestamps(config.output.timestamps);
    let counters = reporter.counters();
    let conn = Arc::new(
        SerialConnection::system(reporter).with_max_line_length(config.decoder.max_line_length),
    );

    print_header(&config);

    // open() may block for the whole open timeout
    let opener = Arc::clone(&conn);
    tokio::task::spawn_blocking(move || opener.open(port_config))
        .await
        .context("Open task failed")?
        .with_context(|| format!("Failed to open serial port: {}", config.port.path))?;

    println!(
        "{} Connected to {} at {} baud",
        "[OK]".green().bold(),
        config.port.path.white().bold(),
        config.port.baud_rate
    );
    println!("{}", "Press Ctrl+C to stop\n".yellow());

    wait_for_shutdown(args.duration.map(Duration::from_secs)).await?;

    let closer = Arc::clone(&conn);
    tokio::task::spawn_blocking(move || closer.close())
        .await
        .context("Close task failed")?;

    print_summary(&counters);
    Ok(())
}

/// Wait for Ctrl+C or the optional run duration
#[cfg(feature = "serial")]
async fn wait_for_shutdown(duration: Option<Duration>) -> Result<()> {
    let limit = async {
        match duration {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl+C")?;
            println!("\n{}", "Stopping listener...".yellow());
        }
        _ = limit => info!("Run duration elapsed"),
    }

    Ok(())
}

#[cfg(feature = "serial")]
fn print_header(config: &ListenerConfig) {
    println!("{}", "=".repeat(70).dimmed());
    println!("{}: {}", "Port".cyan(), config.port.path.white());
    println!("{}: {}", "Baud".cyan(), config.port.baud_rate.to_string().white());
    if let Some(limit) = config.decoder.max_line_length {
        println!("{}: {} bytes", "Max line".cyan(), limit.to_string().white());
    }
    println!("{}", "=".repeat(70).dimmed());
    println!();
}

#[cfg(feature = "serial")]
fn print_summary(counters: &ReportCounters) {
    println!("\n{}", "=".repeat(70).dimmed());
    println!("{}", "--- Listener Summary ---".cyan().bold());
    println!("Total lines: {}", counters.lines());
    println!("Parsed: {}", counters.parsed().to_string().green());
    println!(
        "Unparsed: {}",
        if counters.failed() > 0 {
            counters.failed().to_string().red().bold().to_string()
        } else {
            counters.failed().to_string().green().to_string()
        }
    );
    println!("{}", "=".repeat(70).dimmed());
}
