/*!
# V5 Vision Bridge

Serial bridge between the vision computer, the V5 robot brain and the VEX
GPS sensor.

## Features

- Discovers both devices by their USB description and reconnects on faults
- Streams GPS beacon frames into a smoothed, offset-corrected position
- Projects camera detections onto the field
- Answers every controller request with the latest telemetry frame

## Usage

### Run the bridge (default)
```bash
detector | bridge --config bridge.toml run
```

Each stdin line is a JSON array of detections, or an offset command:
```json
[{"class":0,"prob":0.92,"depth":1.4,"screenLocation":{"x":300,"y":200,"width":40,"height":40}}]
{"set_gps_offset":{"x":0,"y":-10,"z":25,"unit":"cm","heading_offset":180}}
```

### Tools
```bash
bridge config --output bridge.toml
bridge ports
bridge inspect AA55CC33...
```
*/

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod controller;
mod gps_link;
mod link;
mod pipeline;
mod serial;

use config::AppConfig;
use controller::ControllerLink;
use gps_link::GpsLink;
use pipeline::{assemble_record, BridgeInput, OffsetCommand};
use serial::{SerialBackend, SystemSerial};
use shared::{FieldMapper, JsonOffsetStore, OffsetRecord, TelemetryFrame};

#[derive(Parser)]
#[command(name = "bridge")]
#[command(about = "Serial bridge between the vision computer, the V5 brain and the GPS sensor")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path
    #[arg(short, long, default_value = "bridge.toml")]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Start both links and publish telemetry from stdin
    Run,

    /// Generate configuration file
    Config {
        /// Output path for configuration file
        #[arg(short, long, default_value = "bridge.toml")]
        output: PathBuf,
    },

    /// List serial devices and the links they would serve
    Ports,

    /// Decode a hex-encoded telemetry frame
    Inspect {
        /// Frame bytes as hex, whitespace allowed
        hex: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout is for tool output
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_bridge(cli.config),
        Commands::Config { output } => generate_config_file(output),
        Commands::Ports => list_ports(cli.config),
        Commands::Inspect { hex } => inspect_frame(&hex),
    }
}

fn load_config(path: &Path) -> Result<AppConfig> {
    if path.exists() {
        AppConfig::load_from_file(path)
    } else {
        warn!("⚠️ Config file {} not found, using defaults", path.display());
        Ok(AppConfig::new())
    }
}

/// Run both links until Ctrl+C
fn run_bridge(config_path: PathBuf) -> Result<()> {
    let config = load_config(&config_path)?;
    info!("🚀 Starting bridge (shared v{})", shared::VERSION);

    let gps_store = Arc::new(JsonOffsetStore::new(&config.offsets.gps_file));
    let gps_offset = gps_store
        .load_or_init(OffsetRecord::gps_default())
        .with_context(|| format!("Failed to load GPS offset: {}", gps_store.path().display()))?
        .to_offset()?;

    let camera_store = Arc::new(JsonOffsetStore::new(&config.offsets.camera_file));
    let camera_offset = camera_store
        .load_or_init(OffsetRecord::camera_default())
        .with_context(|| format!("Failed to load camera offset: {}", camera_store.path().display()))?
        .to_camera_offset()?;

    config.camera.validate()?;
    let mapper = FieldMapper::new(config.camera, camera_offset).with_store(camera_store);

    let backend: Arc<dyn SerialBackend> = Arc::new(SystemSerial);

    let mut gps = GpsLink::new(
        config.gps.link.settings()?,
        Arc::clone(&backend),
        config.gps.smoothing_window,
    )
    .with_offset(gps_offset)
    .with_store(gps_store);
    if let Some(path) = &config.gps.trace_file {
        gps = gps.with_trace(path.clone());
    }

    debug!("GPS mounting offset {:?}", gps.offset());

    let mut controller = ControllerLink::new(config.controller.settings()?, backend);

    // Set up Ctrl+C handler
    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    ctrlc::set_handler(move || {
        info!("🛑 Received Ctrl+C, shutting down gracefully...");
        flag.store(false, Ordering::SeqCst);
    })?;

    gps.start().context("Failed to start GPS link")?;
    controller.start().context("Failed to start controller link")?;

    let mut inputs = spawn_input_reader()?;
    let interval = Duration::from_millis(config.pipeline.publish_interval_ms);
    let mut health = (false, false);

    while running.load(Ordering::SeqCst) {
        let now = (controller.is_connected(), gps.is_connected());
        if now != health {
            info!("🔗 Links: controller {}, gps {}", link_label(now.0), link_label(now.1));
            health = now;
        }

        let detections = match inputs.recv_timeout(interval) {
            Ok(BridgeInput::Detections(batch)) => batch,
            Ok(BridgeInput::Command(command)) => {
                apply_command(command, &gps, &mapper);
                continue;
            }
            Err(RecvTimeoutError::Timeout) => Vec::new(),
            Err(RecvTimeoutError::Disconnected) => {
                info!("📭 Input closed, publishing position only");
                inputs = crossbeam_channel::never();
                continue;
            }
        };

        let record = assemble_record(gps.position(), &detections, &mapper);
        debug!("Publishing {} detections", record.detections.len());
        controller.set_telemetry(record);
    }

    controller.stop();
    gps.stop();
    info!(
        "✅ Bridge stopped (controller {:?}, gps {:?})",
        controller.state(),
        gps.state()
    );
    Ok(())
}

fn link_label(connected: bool) -> &'static str {
    if connected {
        "connected"
    } else {
        "down"
    }
}

fn apply_command(command: OffsetCommand, gps: &GpsLink, mapper: &FieldMapper) {
    let result = match &command {
        OffsetCommand::SetGpsOffset(record) => gps.update_offset(record),
        OffsetCommand::SetCameraOffset(record) => mapper.update_offset(record),
    };

    if let Err(e) = result {
        warn!("Rejected {:?}: {}", command, e);
    }
}

/// Read JSON lines from stdin on a background thread
fn spawn_input_reader() -> Result<Receiver<BridgeInput>> {
    let (tx, rx) = crossbeam_channel::bounded(16);

    thread::Builder::new()
        .name("stdin".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        warn!("Failed to read stdin: {}", e);
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }

                match serde_json::from_str::<BridgeInput>(&line) {
                    Ok(input) => {
                        if tx.send(input).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("Ignoring input line: {}", e),
                }
            }
        })
        .context("Failed to spawn stdin reader")?;

    Ok(rx)
}

/// Generate a default configuration file
fn generate_config_file(output_path: PathBuf) -> Result<()> {
    let config = AppConfig::new();
    config.save_to_file(&output_path)?;

    println!("✅ Generated configuration file: {}", output_path.display());
    println!("📝 Edit the file to customize settings, then run:");
    println!("   bridge --config {}", output_path.display());

    Ok(())
}

/// Print every serial device and which link pattern it matches
fn list_ports(config_path: PathBuf) -> Result<()> {
    let config = load_config(&config_path)?;
    let controller = config.controller.settings()?;
    let gps = config.gps.link.settings()?;

    let devices = SystemSerial.list_devices().context("Failed to enumerate serial devices")?;
    if devices.is_empty() {
        println!("No serial devices found");
        return Ok(());
    }

    for device in devices {
        let mut roles = Vec::new();
        if controller.device_pattern.is_match(&device.description) {
            roles.push("controller");
        }
        if gps.device_pattern.is_match(&device.description) {
            roles.push("gps");
        }
        let roles = if roles.is_empty() {
            "-".to_string()
        } else {
            roles.join(", ")
        };
        println!("{:<20} {:<40} {}", device.path, device.description, roles);
    }

    Ok(())
}

/// Decode and verify a telemetry frame, print its record as JSON
fn inspect_frame(input: &str) -> Result<()> {
    let cleaned: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = hex::decode(&cleaned).context("Frame is not valid hex")?;

    let (header, record) = TelemetryFrame::decode(&bytes).context("Invalid telemetry frame")?;
    println!(
        "📦 type {:#06x}, {} payload bytes, crc {:#010x} ✅",
        header.packet_type, header.length, header.crc
    );
    println!("{}", serde_json::to_string_pretty(&record)?);

    Ok(())
}
