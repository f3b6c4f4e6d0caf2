//! espac-config
//!
//! Command-line client for the ESP air conditioner controller. Reads and
//! writes the device configuration over the access point HTTP API and
//! follows the device through the reset that every save triggers.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use env_logger::{Builder, Env, Target};
use espac_config::{
    SyncController,
    config::AppConfig,
    device_transport::{Attachment, DeviceTransport, FirmwareImage, HttpDeviceTransport},
    services::codec,
    types::{ConfigField, ConfigRecord, SaveOutcome, SyncEvent},
};
use log::{error, info, warn};
use serde_json::{Map, Value};
use std::{
    io::Write,
    path::{Path, PathBuf},
};
use tokio::sync::broadcast::{self, error::TryRecvError};

#[derive(Parser)]
#[command(name = "espac-config")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Base URL of the device
    #[arg(global = true, long, env = "DEVICE_URL")]
    device_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the configuration stored on the device
    Show,

    /// Change configuration fields and wait for the device to come back
    Set {
        /// Field updates as KEY=VALUE, non-string fields take JSON values
        #[arg(required = true, value_parser = parse_update)]
        updates: Vec<(String, Value)>,

        /// File to send along, as FIELD=PATH
        #[arg(long = "attach", value_parser = parse_attachment)]
        attachments: Vec<(String, PathBuf)>,
    },

    /// Upload a firmware image and wait for the device to come back
    Flash {
        /// Path to the firmware image
        path: PathBuf,
    },

    /// Decode a hex configuration payload to JSON
    Decode { hex: String },

    /// Encode a JSON configuration object to a hex payload
    Encode { json: String },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("application error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    initialize();

    match cli.command {
        Command::Decode { hex } => {
            let record = codec::decode(&hex).context("failed to decode configuration")?;
            print_record(&record)
        }
        Command::Encode { json } => {
            let updates: Map<String, Value> =
                serde_json::from_str(&json).context("failed to parse configuration object")?;
            let mut record = ConfigRecord::default();
            record.apply_updates(&updates)?;
            record.validate()?;
            println!("{}", codec::encode(&record));
            Ok(())
        }
        command => {
            let config = load_config(cli.device_url)?;
            let transport = HttpDeviceTransport::new(&config.device)
                .context("failed to create device transport")?;
            info!("device: {}", transport.base_url());

            let controller = SyncController::new(transport, config.sync);
            run_device_command(&controller, command).await
        }
    }
}

/// Environment configuration with the device URL taken from the command line.
fn load_config(device_url: Option<String>) -> Result<AppConfig> {
    AppConfig::load_with(|key| match (key, &device_url) {
        ("DEVICE_URL", Some(url)) => Some(url.clone()),
        _ => std::env::var(key).ok(),
    })
    .context("failed to load configuration")
}

fn initialize() {
    log_panics::init();

    let mut builder = if cfg!(debug_assertions) {
        Builder::from_env(Env::default().default_filter_or("debug"))
    } else {
        Builder::from_env(Env::default().default_filter_or("info"))
    };

    builder.format(|f, record| match record.level() {
        log::Level::Error => {
            eprintln!("{}", record.args());
            Ok(())
        }
        _ => {
            writeln!(f, "{}", record.args())
        }
    });

    builder.target(Target::Stdout).init();

    info!(
        "module version: {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_SHORT_REV")
    );
}

async fn run_device_command<T>(controller: &SyncController<T>, command: Command) -> Result<()>
where
    T: DeviceTransport + Send + Sync + 'static,
{
    if !controller.load().await.context("failed to load device configuration")? {
        warn!("device has no saved configuration, using defaults");
    }

    let events = controller.subscribe();

    let outcome = match command {
        Command::Show => return print_record(&controller.record()),
        Command::Set {
            updates,
            attachments,
        } => {
            let updates: Map<String, Value> = updates.into_iter().collect();
            let attachments = read_attachments(attachments).await?;
            controller
                .save(&updates, attachments)
                .await
                .context("failed to save configuration")?
        }
        Command::Flash { path } => {
            let image = read_firmware(&path).await?;
            controller
                .upload_firmware(image)
                .await
                .context("failed to upload firmware")?
        }
        Command::Decode { .. } | Command::Encode { .. } => {
            bail!("offline command needs no device")
        }
    };

    if outcome == SaveOutcome::Unconfirmed {
        warn!("device did not confirm the update");
    }

    let record = follow_recovery(controller, events).await?;
    print_record(&record)
}

/// Wait for the device to come back, Ctrl-C cancels the recovery.
async fn follow_recovery<T>(
    controller: &SyncController<T>,
    mut events: broadcast::Receiver<SyncEvent>,
) -> Result<ConfigRecord>
where
    T: DeviceTransport + Send + Sync + 'static,
{
    let snapshot = tokio::select! {
        snapshot = controller.wait_until_idle() => snapshot,
        res = tokio::signal::ctrl_c() => {
            res.context("failed to listen for ctrl-c")?;
            controller.cancel_recovery();
            bail!("interrupted while waiting for the device");
        }
    };

    loop {
        match events.try_recv() {
            Ok(SyncEvent::Failed(failure)) => bail!("device did not resync: {failure}"),
            Ok(SyncEvent::StateChanged { .. }) | Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
        }
    }

    Ok(snapshot.record)
}

async fn read_attachments(attachments: Vec<(String, PathBuf)>) -> Result<Vec<Attachment>> {
    let mut read = Vec::with_capacity(attachments.len());

    for (field, path) in attachments {
        let content = tokio::fs::read(&path)
            .await
            .with_context(|| format!("failed to read attachment {}", path.display()))?;
        let mut attachment = Attachment::new(field, content);
        if let Some(file_name) = path.file_name() {
            attachment = attachment.with_file_name(file_name.to_string_lossy());
        }
        read.push(attachment);
    }

    Ok(read)
}

async fn read_firmware(path: &Path) -> Result<FirmwareImage> {
    let content = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read firmware image {}", path.display()))?;
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "firmware.bin".to_string());

    Ok(FirmwareImage { file_name, content })
}

fn print_record(record: &ConfigRecord) -> Result<()> {
    let json = serde_json::to_string_pretty(record).context("failed to serialize configuration")?;
    println!("{json}");
    Ok(())
}

fn parse_update(arg: &str) -> Result<(String, Value), String> {
    let (key, value) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got {arg}"))?;
    let is_string = ConfigField::from_key(key).is_some_and(|field| field.is_string());
    let value = if is_string {
        Value::String(value.to_string())
    } else {
        serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()))
    };

    Ok((key.to_string(), value))
}

fn parse_attachment(arg: &str) -> Result<(String, PathBuf), String> {
    let (field, path) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected FIELD=PATH, got {arg}"))?;

    Ok((field.to_string(), PathBuf::from(path)))
}
