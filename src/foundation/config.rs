use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context as _;

use crate::foundation::core::Viewport;
use crate::foundation::error::{CaptureError, CaptureResult};

/// Complete service configuration, loadable from JSON. Every field has a default.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub pool: PoolConfig,
    pub browser: BrowserConfig,
    pub discovery: DiscoveryConfig,
    pub encoder: EncoderConfig,
    pub storage: StorageConfig,
    pub event_capture: EventCaptureConfig,
}

/// Browser pool sizing and deadlines.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub min: usize,
    pub max: usize,
    pub idle_timeout_ms: u64,
    pub acquire_timeout_ms: u64,
    pub reap_interval_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min: 0,
            max: 2,
            idle_timeout_ms: 60_000,
            acquire_timeout_ms: 30_000,
            reap_interval_ms: 5_000,
        }
    }
}

/// Headless browser launch settings.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Browser binary; auto-detected when unset.
    pub executable: Option<PathBuf>,
    pub headless: bool,
    pub default_viewport: Viewport,
    pub launch_timeout_ms: u64,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            executable: None,
            headless: true,
            default_viewport: Viewport::default(),
            launch_timeout_ms: 20_000,
        }
    }
}

/// Animation discovery windows.
///
/// The quiescence window is a heuristic: discovery ends once no animation has started for that
/// long. The ceiling bounds discovery on pages whose animations keep retriggering.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub quiescence_ms: u64,
    pub ceiling_ms: u64,
    pub max_containment_retries: u32,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            quiescence_ms: 2_000,
            ceiling_ms: 15_000,
            max_containment_retries: 5,
        }
    }
}

impl DiscoveryConfig {
    pub fn quiescence(&self) -> Duration {
        Duration::from_millis(self.quiescence_ms)
    }

    pub fn ceiling(&self) -> Duration {
        Duration::from_millis(self.ceiling_ms)
    }
}

/// External encoder invocation.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    pub program: PathBuf,
    /// Extra arguments inserted before the encoder's input options.
    pub extra_input_args: Vec<String>,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("ffmpeg"),
            extra_input_args: Vec::new(),
        }
    }
}

/// Object storage location and public URL template.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub root: PathBuf,
    /// Public URL template; `{key}` is replaced by the storage key.
    pub media_url_template: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./media"),
            media_url_template: "https://media.example.com/{key}".to_string(),
        }
    }
}

/// Event-driven capture tuning.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct EventCaptureConfig {
    /// Near-zero rate the page runs at while a frame is being captured.
    pub hold_rate: f64,
}

impl Default for EventCaptureConfig {
    fn default() -> Self {
        Self { hold_rate: 0.001 }
    }
}

impl CaptureConfig {
    /// Read and validate a JSON config file.
    pub fn from_json_file(path: &Path) -> CaptureResult<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read config '{}'", path.display()))?;
        let cfg: CaptureConfig = serde_json::from_slice(&bytes).map_err(|e| {
            CaptureError::validation(format!("invalid config '{}': {e}", path.display()))
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> CaptureResult<()> {
        if self.pool.max == 0 {
            return Err(CaptureError::validation("pool.max must be at least 1"));
        }
        if self.pool.min > self.pool.max {
            return Err(CaptureError::validation("pool.min must be <= pool.max"));
        }
        if self.pool.acquire_timeout_ms == 0 || self.pool.reap_interval_ms == 0 {
            return Err(CaptureError::validation(
                "pool acquire/reap intervals must be non-zero",
            ));
        }
        if self.browser.launch_timeout_ms == 0 {
            return Err(CaptureError::validation(
                "browser.launch_timeout_ms must be non-zero",
            ));
        }
        if self.discovery.quiescence_ms == 0 {
            return Err(CaptureError::validation(
                "discovery.quiescence_ms must be non-zero",
            ));
        }
        if self.discovery.ceiling_ms < self.discovery.quiescence_ms {
            return Err(CaptureError::validation(
                "discovery.ceiling_ms must be >= discovery.quiescence_ms",
            ));
        }
        if !self.storage.media_url_template.contains("{key}") {
            return Err(CaptureError::validation(
                "storage.media_url_template must contain '{key}'",
            ));
        }
        let hold = self.event_capture.hold_rate;
        if !(hold > 0.0 && hold < 1.0) {
            return Err(CaptureError::validation(
                "event_capture.hold_rate must be in (0, 1)",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/config.rs"]
mod tests;
