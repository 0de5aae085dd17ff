//! Configuration module for the live call client.
//!
//! Provides `AppConfig` (top-level settings), sub-configs for the streaming
//! session, audio and video uplink, `AppPaths` for the platform config
//! directory, and TOML persistence via `AppConfig::load` / `AppConfig::save`.

pub mod paths;
pub mod settings;

pub use paths::AppPaths;
pub use settings::{AppConfig, AudioConfig, LiveConfig, VideoConfig, API_KEY_ENV};
