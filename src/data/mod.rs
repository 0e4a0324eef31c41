//! Data module for configuration management

mod config;

pub use config::{
    AppConfig, CaptureConfig, OneshotConfig, ReceiveConfig, ResampleConfig, ServerConfig,
    StreamingConfig,
};
