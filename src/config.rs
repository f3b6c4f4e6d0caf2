use anyhow::{Context, Result, ensure};
use std::{env, time::Duration};

/// Delay between two liveness probes while the device resets.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_millis(1000);
/// How long the synced state is shown before settling back to idle.
pub const DEFAULT_SYNCED_DISPLAY: Duration = Duration::from_millis(3000);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(5000);
pub const DEFAULT_UPLOAD_TIMEOUT: Duration = Duration::from_millis(120_000);
/// Address of the device while it runs its own access point.
pub const DEFAULT_DEVICE_URL: &str = "http://192.168.4.1";

/// Application configuration loaded and validated at startup
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppConfig {
    /// Device connection configuration
    pub device: DeviceConfig,

    /// Save and recovery timing
    pub sync: SyncConfig,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceConfig {
    pub url: String,
    /// Timeout for fetches and pings.
    pub request_timeout: Duration,
    /// Timeout for configuration and firmware uploads.
    pub upload_timeout: Duration,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncConfig {
    pub ping_interval: Duration,
    pub synced_display: Duration,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_DEVICE_URL.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            upload_timeout: DEFAULT_UPLOAD_TIMEOUT,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            ping_interval: DEFAULT_PING_INTERVAL,
            synced_display: DEFAULT_SYNCED_DISPLAY,
        }
    }
}

impl AppConfig {
    /// Load and validate the configuration from environment variables
    ///
    /// Unset variables fall back to their defaults, malformed ones are errors.
    pub fn load() -> Result<Self> {
        Self::load_with(|key| env::var(key).ok())
    }

    /// Load the configuration from an arbitrary variable source
    pub fn load_with(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let device = DeviceConfig::load(&lookup)?;
        let sync = SyncConfig::load(&lookup)?;

        Ok(Self { device, sync })
    }
}

impl DeviceConfig {
    fn load(lookup: &impl Fn(&str) -> Option<String>) -> Result<Self> {
        let url = lookup("DEVICE_URL").unwrap_or_else(|| DEFAULT_DEVICE_URL.to_string());
        ensure!(
            url.starts_with("http://") || url.starts_with("https://"),
            "failed to parse DEVICE_URL: expected an http(s) URL, got {url}"
        );

        let request_timeout =
            millis(lookup, "REQUEST_TIMEOUT_MS", DEFAULT_REQUEST_TIMEOUT)?;
        let upload_timeout = millis(lookup, "UPLOAD_TIMEOUT_MS", DEFAULT_UPLOAD_TIMEOUT)?;

        Ok(Self {
            url,
            request_timeout,
            upload_timeout,
        })
    }
}

impl SyncConfig {
    fn load(lookup: &impl Fn(&str) -> Option<String>) -> Result<Self> {
        let ping_interval = millis(lookup, "PING_INTERVAL_MS", DEFAULT_PING_INTERVAL)?;
        let synced_display = millis(lookup, "SYNCED_DISPLAY_MS", DEFAULT_SYNCED_DISPLAY)?;

        Ok(Self {
            ping_interval,
            synced_display,
        })
    }
}

fn millis(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Result<Duration> {
    let Some(value) = lookup(key) else {
        return Ok(default);
    };

    let ms = value
        .trim()
        .parse::<u64>()
        .with_context(|| format!("failed to parse {key}: invalid format"))?;
    ensure!(ms > 0, "failed to parse {key}: must be greater than zero");

    Ok(Duration::from_millis(ms))
}
