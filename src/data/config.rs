//! Application Configuration
//!
//! Handles loading and saving client configuration. Every section and key is
//! optional; missing values fall back to the protocol defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::asr::{self, Protocol, SessionTiming};
use crate::audio::{DevicePolicy, DeviceRule, ResampleMethod, Resampler};

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub streaming: StreamingConfig,
    #[serde(default)]
    pub oneshot: OneshotConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub resample: ResampleConfig,
    #[serde(default)]
    pub receive: ReceiveConfig,
}

impl AppConfig {
    /// Default config file path, beside the executable
    pub fn config_path() -> PathBuf {
        let exe_dir = std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
            .unwrap_or_else(|| PathBuf::from("."));
        exe_dir.join("config.toml")
    }

    /// Load configuration from a file that must exist
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: AppConfig = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        tracing::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load `explicit` if given, else the default path if present, else defaults
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        let path = Self::config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            tracing::debug!("No config file at {}, using defaults", path.display());
            Ok(AppConfig::default())
        }
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("failed to serialize configuration")
    }

    /// Delays for a session speaking `protocol`
    pub fn session_timing(&self, protocol: Protocol) -> SessionTiming {
        let receive_poll = Duration::from_millis(self.receive.poll_ms.max(1));
        match protocol {
            Protocol::Streaming => SessionTiming {
                pacing: Duration::from_millis(self.streaming.pacing_ms),
                live_pacing: Duration::from_millis(self.streaming.live_pacing_ms),
                settle: Duration::ZERO,
                finite_trailing: Duration::from_millis(self.streaming.file_grace_ms),
                live_trailing: Duration::from_millis(self.streaming.live_grace_ms),
                receive_poll,
            },
            Protocol::Oneshot => SessionTiming {
                pacing: Duration::from_millis(self.oneshot.pacing_ms),
                live_pacing: Duration::from_millis(self.oneshot.live_pacing_ms),
                settle: Duration::from_millis(self.oneshot.settle_ms),
                finite_trailing: Duration::from_millis(self.oneshot.result_wait_ms),
                live_trailing: Duration::from_millis(self.oneshot.result_wait_ms),
                receive_poll,
            },
        }
    }

    /// Duration of one file chunk for `protocol`
    pub fn chunk_duration(&self, protocol: Protocol) -> Duration {
        let ms = match protocol {
            Protocol::Streaming => self.streaming.chunk_ms,
            Protocol::Oneshot => self.oneshot.chunk_ms,
        };
        Duration::from_millis(ms.max(1))
    }

    pub fn device_policy(&self) -> DevicePolicy {
        DevicePolicy {
            rules: self.capture.device_priorities.clone(),
            default_bonus: self.capture.default_device_bonus,
            fallback_rates: self.capture.fallback_rates.clone(),
        }
    }

    pub fn resampler(&self) -> Resampler {
        Resampler::new(self.resample.method)
    }
}

/// Server endpoint configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_url")]
    pub url: String,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
}

fn default_server_url() -> String {
    asr::DEFAULT_SERVER_URL.to_string()
}

fn default_sample_rate() -> u32 {
    asr::SAMPLE_RATE
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: default_server_url(),
            sample_rate: default_sample_rate(),
        }
    }
}

/// Continuous streaming protocol configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamingConfig {
    #[serde(default = "default_streaming_chunk_ms")]
    pub chunk_ms: u64,
    #[serde(default = "default_streaming_pacing_ms")]
    pub pacing_ms: u64,
    #[serde(default = "default_live_pacing_ms")]
    pub live_pacing_ms: u64,
    #[serde(default = "default_file_grace_ms")]
    pub file_grace_ms: u64,
    #[serde(default = "default_live_grace_ms")]
    pub live_grace_ms: u64,
}

fn default_streaming_chunk_ms() -> u64 {
    asr::STREAMING_CHUNK_MS
}

fn default_streaming_pacing_ms() -> u64 {
    asr::STREAMING_PACING_MS
}

fn default_live_pacing_ms() -> u64 {
    asr::LIVE_PACING_MS
}

fn default_file_grace_ms() -> u64 {
    asr::FILE_GRACE_MS
}

fn default_live_grace_ms() -> u64 {
    asr::LIVE_GRACE_MS
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            chunk_ms: default_streaming_chunk_ms(),
            pacing_ms: default_streaming_pacing_ms(),
            live_pacing_ms: default_live_pacing_ms(),
            file_grace_ms: default_file_grace_ms(),
            live_grace_ms: default_live_grace_ms(),
        }
    }
}

/// Oneshot protocol configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OneshotConfig {
    #[serde(default = "default_oneshot_chunk_ms")]
    pub chunk_ms: u64,
    #[serde(default = "default_oneshot_pacing_ms")]
    pub pacing_ms: u64,
    #[serde(default = "default_live_pacing_ms")]
    pub live_pacing_ms: u64,
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    #[serde(default = "default_result_wait_ms")]
    pub result_wait_ms: u64,
    /// Capture length when no duration is given
    #[serde(default = "default_mic_duration_secs")]
    pub mic_duration_secs: u64,
}

fn default_oneshot_chunk_ms() -> u64 {
    asr::ONESHOT_CHUNK_MS
}

fn default_oneshot_pacing_ms() -> u64 {
    asr::ONESHOT_PACING_MS
}

fn default_settle_ms() -> u64 {
    asr::ONESHOT_SETTLE_MS
}

fn default_result_wait_ms() -> u64 {
    asr::ONESHOT_RESULT_WAIT_MS
}

fn default_mic_duration_secs() -> u64 {
    asr::ONESHOT_MIC_DURATION_SECS
}

impl Default for OneshotConfig {
    fn default() -> Self {
        Self {
            chunk_ms: default_oneshot_chunk_ms(),
            pacing_ms: default_oneshot_pacing_ms(),
            live_pacing_ms: default_live_pacing_ms(),
            settle_ms: default_settle_ms(),
            result_wait_ms: default_result_wait_ms(),
            mic_duration_secs: default_mic_duration_secs(),
        }
    }
}

/// Capture device configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_fallback_rates")]
    pub fallback_rates: Vec<u32>,
    #[serde(default = "default_device_bonus")]
    pub default_device_bonus: i32,
    /// Highest priority first
    #[serde(default = "crate::audio::device::default_device_rules")]
    pub device_priorities: Vec<DeviceRule>,
}

fn default_chunk_size() -> usize {
    1024
}

fn default_fallback_rates() -> Vec<u32> {
    DevicePolicy::default().fallback_rates
}

fn default_device_bonus() -> i32 {
    DevicePolicy::default().default_bonus
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            fallback_rates: default_fallback_rates(),
            default_device_bonus: default_device_bonus(),
            device_priorities: crate::audio::device::default_device_rules(),
        }
    }
}

/// Resampling configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResampleConfig {
    #[serde(default)]
    pub method: ResampleMethod,
}

/// Receive loop configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiveConfig {
    #[serde(default = "default_poll_ms")]
    pub poll_ms: u64,
}

fn default_poll_ms() -> u64 {
    asr::RECEIVE_POLL_MS
}

impl Default for ReceiveConfig {
    fn default() -> Self {
        Self {
            poll_ms: default_poll_ms(),
        }
    }
}
