//! Viewer application
//!
//! Opens a window and runs the frame engine with the pulsing clear background until the
//! window closes. Pass a TOML or RON config path as the first argument to override
//! `viewer.toml`.

mod bootstrap;
mod window;

use frame_engine::foundation::logging;
use frame_engine::prelude::*;
use thiserror::Error;

use crate::bootstrap::GpuBootstrap;
use crate::window::{Window, WindowError};

const DEFAULT_CONFIG_PATH: &str = "viewer.toml";

#[derive(Error, Debug)]
enum ViewerError {
    #[error(transparent)]
    Window(#[from] WindowError),

    #[error(transparent)]
    Vulkan(#[from] VulkanError),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

fn main() {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

    let config = match EngineConfig::load_or_default(&config_path) {
        Ok(config) => config,
        Err(err) => {
            logging::init(&LoggingConfig::default());
            log::error!("Failed to load {}: {}", config_path, err);
            std::process::exit(1);
        }
    };
    logging::init(&config.logging);
    log::info!("Starting viewer");

    match run(config) {
        Ok(()) => log::info!("Viewer exited cleanly"),
        Err(err) => {
            log::error!("Viewer failed: {}", err);
            std::process::exit(1);
        }
    }
}

/// Every GPU object is released before this returns, on success and on failure
fn run(config: EngineConfig) -> Result<(), ViewerError> {
    let mut window = Window::new(&config.window.title, config.window.width, config.window.height)?;
    let bootstrap = GpuBootstrap::new(&window, &config.window.title)?;

    // Declared after the bootstrap so it drops first
    let mut engine = Engine::new(config, VulkanDevice::new(bootstrap.context())?)?;

    // The framebuffer may differ from the requested window size on scaled displays
    let (width, height) = window.framebuffer_size();
    engine.handle_event(WindowEvent::Resized { width, height });

    let result = engine.run(&mut window, &mut ClearBackground::default(), None);
    engine.shutdown();
    result.map_err(ViewerError::from)
}
