//! Application entry point: headless live call client.
//!
//! # Startup sequence
//!
//! 1. Initialise logging.
//! 2. Load [`AppConfig`] from disk (writing the defaults on first run) and
//!    apply the API key environment override.
//! 3. Create the [`tokio`] runtime.
//! 4. Build the call controller from the system microphone, speaker,
//!    WebSocket connector and (when enabled) a still-image camera.
//! 5. Start the call; hang up on Ctrl-C or when the remote side closes.

use std::sync::Arc;

use anyhow::Context;
use live_call::{
    audio::{DefaultMicrophone, DefaultSpeaker},
    config::{AppConfig, AppPaths, API_KEY_ENV},
    live::WsConnector,
    playback::CallSignal,
    session::{lock_status, new_shared_status, CallController},
    video::StillImageCamera,
};

// ---------------------------------------------------------------------------
// Controller wiring
// ---------------------------------------------------------------------------

fn build_controller(config: &AppConfig) -> CallController {
    let status = new_shared_status();
    let connector = Arc::new(WsConnector::from_config(
        &config.live,
        config.audio.outbound_queue,
    ));
    let microphone = Arc::new(DefaultMicrophone {
        device_name: config.audio.input_device.clone(),
    });
    let speaker = Arc::new(DefaultSpeaker {
        device_name: config.audio.output_device.clone(),
    });

    let controller = CallController::new(config.clone(), status, connector, microphone, speaker);

    match (&config.video.still_image, config.video.enabled) {
        (Some(path), true) => controller.with_camera(Arc::new(StillImageCamera { path: path.clone() })),
        (None, true) => {
            log::warn!("video enabled but no `video.still_image` configured; audio only");
            controller
        }
        _ => controller,
    }
}

async fn run_call(controller: &mut CallController) -> anyhow::Result<()> {
    controller.start_call().await?;

    let status = controller.status().clone();
    println!("{}", lock_status(&status).status_line());

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for Ctrl-C")?;
            log::info!("hang-up requested");
        }
        signal = controller.wait_closed() => match signal {
            Some(CallSignal::Failed(message)) => log::error!("call failed: {message}"),
            Some(CallSignal::Closed(reason)) => log::info!("remote closed the call ({reason:?})"),
            None => log::info!("call ended"),
        },
    }

    controller.end_call().await;
    println!("{}", lock_status(&status).status_line());
    Ok(())
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

fn main() -> anyhow::Result<()> {
    // 1. Logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("live-call starting up");

    // 2. Configuration
    let mut config = AppConfig::load().unwrap_or_else(|e| {
        log::warn!("Failed to load config ({e}); using defaults");
        AppConfig::default()
    });
    let settings_file = AppPaths::new().settings_file;
    if !settings_file.exists() {
        match config.save() {
            Ok(()) => log::info!("wrote default settings to {}", settings_file.display()),
            Err(e) => log::warn!("could not write default settings: {e:#}"),
        }
    }
    config.live.apply_env();
    if config.live.api_key.is_none() {
        log::warn!("no API key configured; set {API_KEY_ENV} or `live.api_key`");
    }

    // 3. Tokio runtime
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    // 4. Controller
    let mut controller = build_controller(&config);

    // 5. Call (the controller owns device streams, so it stays on this thread)
    let result = rt.block_on(run_call(&mut controller));
    if let Err(e) = &result {
        eprintln!("{}", lock_status(controller.status()).status_line());
        log::error!("{e:#}");
    }
    result
}
