//! Robofocus Driver CLI
//!
//! Command-line interface for the Robofocus ASCOM Alpaca driver. Runs the
//! Alpaca HTTP server and the driver-specific JSON control panel
//! side-by-side, both backed by the same [`FocuserController`].

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::Level;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

#[cfg(feature = "mock")]
use robofocus_alpaca::{SimulatorOptions, SimulatorTransport};
use robofocus_alpaca::{
    gui, load_config, logging, Config, ServerBuilder, Transport, UserSettings,
};

#[derive(Parser)]
#[command(name = "robofocus-alpaca")]
#[command(about = "ASCOM Alpaca driver for Robofocus RS-232 focusers")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to the persisted, GUI-adjustable settings file
    #[arg(long, default_value = "settings.json")]
    settings: PathBuf,

    /// Serial port path (overrides config file)
    #[arg(long)]
    port: Option<String>,

    /// Server port (overrides config file)
    #[arg(long)]
    server_port: Option<u16>,

    /// Log level
    #[arg(short, long, default_value = "info", value_parser = parse_log_level)]
    log_level: Level,
}

fn parse_log_level(s: &str) -> Result<Level, String> {
    s.parse().map_err(|_| {
        format!(
            "Invalid log level: {}. Use: trace, debug, info, warn, error",
            s
        )
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let log_ring = logging::LogRing::default();
    tracing_subscriber::registry()
        .with(EnvFilter::new(args.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .with(logging::LogRingLayer::new(log_ring.clone()))
        .init();

    tracing::debug!(
        "Parsed command line arguments: config={:?}, port={:?}, server_port={:?}, log_level={:?}",
        args.config,
        args.port,
        args.server_port,
        args.log_level
    );

    let mut config = if let Some(config_path) = &args.config {
        tracing::debug!("Loading configuration from {:?}", config_path);
        load_config(config_path)?
    } else {
        tracing::debug!("Using default configuration");
        Config::default()
    };

    if let Some(port) = args.port {
        config.serial.port = port;
    }
    if let Some(server_port) = args.server_port {
        config.server.port = server_port;
    }

    let settings = UserSettings::load_or_init(&args.settings)?;

    tracing::info!("Starting Robofocus driver");
    tracing::info!("Baud rate: {}", config.serial.baud_rate);
    tracing::info!("Server port: {}", config.server.port);
    tracing::info!("GUI port: {}", config.gui.port);

    let hardware_max_travel = settings.max_travel;
    let mut builder = ServerBuilder::new(config.clone(), settings, args.settings.clone());

    #[cfg(feature = "mock")]
    if config.simulator.enabled {
        tracing::info!("Running with the in-process simulator - no real hardware");
        let default_options = SimulatorOptions::default();
        // movement_speed is steps/second; the tick loop only advances once
        // per tick_interval, so convert before handing it to the simulator.
        let steps_per_tick = (config.simulator.movement_speed as f64
            * default_options.tick_interval.as_secs_f64())
        .round()
        .max(1.0) as u32;
        let firmware_value = config
            .simulator
            .firmware_string
            .trim()
            .parse()
            .unwrap_or(default_options.firmware_value);
        let transport: Arc<dyn Transport> = Arc::new(SimulatorTransport::new(
            hardware_max_travel,
            SimulatorOptions {
                steps_per_tick,
                firmware_value,
                temperature_raw: ((config.simulator.temperature + 273.15) * 2.0) as u32,
                initial_position: config.simulator.initial_position,
                ..default_options
            },
        ));
        builder = builder.with_transport(transport);
    }
    #[cfg(not(feature = "mock"))]
    let _ = hardware_max_travel;
    #[cfg(not(feature = "mock"))]
    tracing::info!("Serial port: {}", config.serial.port);

    let (bound, controller) = builder.build().await?;

    let gui_state = gui::GuiState {
        controller: Arc::clone(&controller),
        logs: log_ring,
        scan_timeout: config.serial.scan_timeout,
    };
    let gui_addr = std::net::SocketAddr::new(config.server.ip.parse()?, config.gui.port);
    let gui_listener = tokio::net::TcpListener::bind(gui_addr).await?;
    tracing::info!("GUI control panel listening on {gui_addr}");
    let gui_router = gui::router(gui_state);
    tokio::spawn(async move {
        if let Err(e) = axum::serve(gui_listener, gui_router).await {
            tracing::error!(error = %e, "GUI server exited");
        }
    });

    bound.start().await?;

    Ok(())
}
