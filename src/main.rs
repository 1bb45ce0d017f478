//! Binary entrypoint for the culmax CLI.
//!
//! Commands:
//! - `start [--port <path>] [--pair]` - run the hub against the CUL stick
//! - `init` - create a starter `config.toml`
//! - `probe --port <path> [-b <baud>] [--timeout <s>]` - stick smoke test
//!
//! See the library crate docs for module-level details: `culmax::`.
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use log::{info, warn};

use culmax::config::Config;
use culmax::hub::CulHub;

#[derive(Parser)]
#[command(name = "culmax")]
#[command(about = "A MAX! heating-control hub for CUL transceiver sticks")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the hub
    Start {
        /// CUL device port (e.g., /dev/ttyUSB0); overrides the config
        #[arg(short, long)]
        port: Option<String>,

        /// Open the pairing window at startup (duration from config)
        #[arg(long)]
        pair: bool,
    },
    /// Initialize a new configuration file
    Init,
    /// Run a serial smoke test: fetch stick version and remaining budget
    Probe {
        /// Device serial port
        #[arg(short, long)]
        port: String,
        /// Baud rate
        #[arg(short = 'b', long, default_value_t = 38400)]
        baud: u32,
        /// Seconds to wait before giving up
        #[arg(short, long, default_value_t = 15)]
        timeout: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load config early so logging can honor it; Init writes it later.
    let pre_config = match cli.command {
        Commands::Init => None,
        _ => Config::load(&cli.config).await.ok(),
    };
    init_logging(&pre_config, cli.verbose);

    match cli.command {
        Commands::Start { port, pair } => {
            let mut config = match pre_config {
                Some(config) => config,
                None => Config::load(&cli.config).await?,
            };
            info!("Starting culmax v{}", env!("CARGO_PKG_VERSION"));

            // CLI port overrides the configured one.
            if let Some(port) = port {
                config.cul.port = port;
            }
            info!(
                "Using CUL on {} at {} baud",
                config.cul.port, config.cul.baud_rate
            );

            let hub = CulHub::new(&config)?;
            let handle = hub.handle();

            // Surface pairing and thermostat events in the log; external
            // consumers subscribe the same way.
            let mut events = handle.subscribe();
            tokio::spawn(async move {
                while let Ok(event) = events.recv().await {
                    match serde_json::to_string(&event) {
                        Ok(json) => info!("event: {}", json),
                        Err(err) => warn!("unserializable event: {}", err),
                    }
                }
            });

            if pair {
                let window = Duration::from_secs(config.hub.pairing_timeout_secs);
                handle.enable_pairing(window).await?;
            }

            let shutdown = hub.handle();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("shutdown requested");
                    shutdown.shutdown();
                }
            });

            hub.run().await?;
        }
        Commands::Init => {
            info!("Initializing new configuration");
            Config::create_default(&cli.config).await?;
            info!("Configuration file created at {}", cli.config);
        }
        Commands::Probe {
            port,
            baud,
            timeout,
        } => {
            probe(&port, baud, timeout).await?;
        }
    }

    Ok(())
}

/// Serial smoke test: open the port, fetch the firmware version, query the
/// duty-cycle budget, print a JSON summary. Exit code 0 iff the stick spoke.
async fn probe(port: &str, baud: u32, timeout: u64) -> Result<()> {
    use culmax::cul::port::{CulPort, SerialCulPort};
    use tokio::time::{sleep, Instant};

    info!("Starting probe on {} @ {} baud", port, baud);
    let mut link = SerialCulPort::open(port, baud)?;
    // Let USB serial bridges settle, then drain boot noise.
    sleep(Duration::from_secs(2)).await;
    while let Some(line) = link.read_line()? {
        log::debug!("boot output: {}", culmax::logutil::escape_log(&line));
    }

    let deadline = Instant::now() + Duration::from_secs(timeout);
    let mut version = None;
    while Instant::now() < deadline && version.is_none() {
        link.write_line("V")?;
        sleep(Duration::from_secs(1)).await;
        version = link.read_line()?;
    }

    let mut budget_ms = None;
    if version.is_some() {
        link.write_line("X")?;
        for _ in 0..10 {
            if let Some(line) = link.read_line()? {
                if let Some(rest) = line.strip_prefix("21") {
                    budget_ms = rest.trim().parse::<u32>().ok();
                    break;
                }
            }
            sleep(Duration::from_millis(100)).await;
        }
    } else {
        warn!("No version from CUL. Check the port and that culfw is flashed.");
    }

    let status_ok = version.is_some();
    let payload = serde_json::json!({
        "status": if status_ok { "ok" } else { "no-response" },
        "version": version,
        "budget_ms": budget_ms,
        "timeout_seconds": timeout,
    });
    println!("{}", payload);
    std::process::exit(if status_ok { 0 } else { 1 });
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity overrides the configured level.
    let base_level = match verbosity {
        0 => config
            .as_ref()
            .and_then(|c| c.logging.level.parse().ok())
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);

    let log_file = config.as_ref().and_then(|c| c.logging.file.clone());
    if let Some(file) = log_file {
        if let Ok(f) = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&file)
        {
            let sink = std::sync::Arc::new(std::sync::Mutex::new(f));
            // Echo to the console only when attached to a terminal.
            let is_tty = atty::is(atty::Stream::Stdout);
            builder.format(move |fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                let line = format!("{} [{}] {}", ts, record.level(), record.args());
                if let Ok(mut guard) = sink.lock() {
                    let _ = writeln!(guard, "{}", line);
                }
                if is_tty {
                    writeln!(fmt, "{}", line)
                } else {
                    Ok(())
                }
            });
        } else {
            eprintln!("Warning: cannot open log file {}, logging to stderr", file);
            builder.format(default_format);
        }
    } else {
        builder.format(default_format);
    }
    let _ = builder.try_init();
}

fn default_format(
    fmt: &mut env_logger::fmt::Formatter,
    record: &log::Record,
) -> std::io::Result<()> {
    use std::io::Write;
    writeln!(
        fmt,
        "{} [{}] {}",
        chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
        record.level(),
        record.args()
    )
}
