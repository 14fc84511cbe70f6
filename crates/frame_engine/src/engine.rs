//! Engine driver
//!
//! Owns the renderer, pumps window events into it and keeps drawing until the window
//! closes or a frame fails fatally. Only one engine may be alive at a time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use ash::vk;
use thiserror::Error;

use crate::config::ConfigError;
use crate::core::config::EngineConfig;
use crate::render::backends::vulkan::{
    BackgroundPass, FatalFrameError, GpuDevice, OverlayPass, VulkanError, VulkanRenderer,
};

static ENGINE_ALIVE: AtomicBool = AtomicBool::new(false);

/// Top-level engine errors
#[derive(Error, Debug)]
pub enum EngineError {
    /// The engine could not be constructed
    #[error("Engine initialization failed: {0}")]
    InitializationFailed(String),

    /// A Vulkan call failed outside the frame loop
    #[error(transparent)]
    Vulkan(#[from] VulkanError),

    /// A frame failed and the renderer cannot continue
    #[error(transparent)]
    Frame(#[from] FatalFrameError),

    /// Configuration was unusable
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Window-system notifications the engine reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowEvent {
    /// Framebuffer changed size (may be zero)
    Resized {
        /// New width in pixels
        width: u32,
        /// New height in pixels
        height: u32,
    },
    /// Window was minimized
    Minimized,
    /// Window was restored with this framebuffer size
    Restored {
        /// Width in pixels
        width: u32,
        /// Height in pixels
        height: u32,
    },
    /// User asked to close the window
    CloseRequested,
}

/// Source of window events, polled once per loop iteration
pub trait EventSource {
    /// Drain pending events without blocking
    fn poll_events(&mut self) -> Vec<WindowEvent>;
}

/// The running engine: renderer plus run loop
pub struct Engine<D: GpuDevice> {
    renderer: VulkanRenderer<D>,
    poll_interval: Duration,
}

impl<D: GpuDevice> Engine<D> {
    /// Validate `config` and build the renderer on `device`
    ///
    /// Fails with [`EngineError::InitializationFailed`] while another engine is alive.
    pub fn new(config: EngineConfig, device: D) -> Result<Self, EngineError> {
        if ENGINE_ALIVE
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(EngineError::InitializationFailed(
                "another engine instance is already running".to_string(),
            ));
        }

        match Self::build(&config, device) {
            Ok(engine) => {
                log::info!("Engine initialized: {}", config.window.title);
                Ok(engine)
            }
            Err(err) => {
                ENGINE_ALIVE.store(false, Ordering::Release);
                Err(err)
            }
        }
    }

    fn build(config: &EngineConfig, device: D) -> Result<Self, EngineError> {
        config.validate()?;
        let extent = vk::Extent2D {
            width: config.window.width,
            height: config.window.height,
        };
        let renderer = VulkanRenderer::new(device, &config.renderer, extent)?;
        Ok(Self {
            renderer,
            poll_interval: Duration::from_millis(config.renderer.minimized_poll_interval_ms),
        })
    }

    /// Apply one window event
    pub fn handle_event(&mut self, event: WindowEvent) {
        match event {
            WindowEvent::Resized { width, height } | WindowEvent::Restored { width, height } => {
                self.renderer.handle_resize(width, height);
            }
            WindowEvent::Minimized => self.renderer.suspend(),
            WindowEvent::CloseRequested => {}
        }
    }

    /// Draw until the window closes
    ///
    /// While suspended, events are polled every `minimized_poll_interval_ms` and nothing is
    /// drawn. A fatal frame error stops the loop and is returned.
    pub fn run(
        &mut self,
        events: &mut dyn EventSource,
        background: &mut dyn BackgroundPass,
        mut overlay: Option<&mut (dyn OverlayPass + '_)>,
    ) -> Result<(), EngineError> {
        log::info!("Entering main loop");
        loop {
            let mut close = false;
            for event in events.poll_events() {
                close |= event == WindowEvent::CloseRequested;
                self.handle_event(event);
            }
            if close {
                log::info!("Close requested after {} frames", self.renderer.frame_number());
                return Ok(());
            }

            if self.renderer.is_suspended() {
                std::thread::sleep(self.poll_interval);
                continue;
            }
            self.renderer.draw_frame(background, overlay.as_deref_mut())?;
        }
    }

    /// The renderer
    pub const fn renderer(&self) -> &VulkanRenderer<D> {
        &self.renderer
    }

    /// The renderer, mutably
    pub fn renderer_mut(&mut self) -> &mut VulkanRenderer<D> {
        &mut self.renderer
    }

    /// Release every GPU object; the engine stays alive until dropped
    pub fn shutdown(&mut self) {
        self.renderer.shutdown();
    }
}

impl<D: GpuDevice> Drop for Engine<D> {
    fn drop(&mut self) {
        self.renderer.shutdown();
        ENGINE_ALIVE.store(false, Ordering::Release);
        log::debug!("Engine dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::backends::vulkan::mock::{Completion, MockDevice, Op};
    use crate::render::backends::vulkan::{ClearBackground, GpuResource};
    use serial_test::serial;
    use std::collections::VecDeque;

    /// Replays one batch of events per poll, then asks to close
    struct ScriptedEvents {
        batches: VecDeque<Vec<WindowEvent>>,
        polls: usize,
    }

    impl ScriptedEvents {
        fn new(batches: Vec<Vec<WindowEvent>>) -> Self {
            Self {
                batches: batches.into(),
                polls: 0,
            }
        }
    }

    impl EventSource for ScriptedEvents {
        fn poll_events(&mut self) -> Vec<WindowEvent> {
            self.polls += 1;
            self.batches
                .pop_front()
                .unwrap_or_else(|| vec![WindowEvent::CloseRequested])
        }
    }

    fn fast_config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.renderer.minimized_poll_interval_ms = 1;
        config
    }

    #[test]
    #[serial]
    fn test_second_engine_is_rejected() {
        let first = Engine::new(fast_config(), MockDevice::new()).unwrap();
        let second = Engine::new(fast_config(), MockDevice::new());
        assert!(matches!(second, Err(EngineError::InitializationFailed(_))));

        drop(first);
        assert!(Engine::new(fast_config(), MockDevice::new()).is_ok());
    }

    #[test]
    #[serial]
    fn test_invalid_config_releases_guard() {
        let mut config = fast_config();
        config.renderer.frame_timeout_ns = 0;
        assert!(matches!(
            Engine::new(config, MockDevice::new()),
            Err(EngineError::Config(_))
        ));
        assert!(Engine::new(fast_config(), MockDevice::new()).is_ok());
    }

    #[test]
    #[serial]
    fn test_run_draws_until_close() {
        let mut engine = Engine::new(fast_config(), MockDevice::new()).unwrap();
        let mut events = ScriptedEvents::new(vec![vec![], vec![], vec![]]);
        engine
            .run(&mut events, &mut ClearBackground::default(), None)
            .unwrap();

        assert_eq!(engine.renderer().frame_number(), 3);
        assert_eq!(engine.renderer().device().count(|op| matches!(op, Op::Present { .. })), 3);
    }

    #[test]
    #[serial]
    fn test_minimized_window_draws_nothing() {
        let mut engine = Engine::new(fast_config(), MockDevice::new()).unwrap();
        let mut events = ScriptedEvents::new(vec![
            vec![WindowEvent::Minimized],
            vec![],
            vec![WindowEvent::Resized { width: 0, height: 10 }],
            vec![WindowEvent::Restored { width: 640, height: 480 }],
        ]);
        engine
            .run(&mut events, &mut ClearBackground::default(), None)
            .unwrap();

        assert_eq!(engine.renderer().frame_number(), 1);
        assert_eq!(events.polls, 5);
        assert_eq!(
            engine.renderer().swapchain().unwrap().extent,
            vk::Extent2D { width: 640, height: 480 }
        );
    }

    #[test]
    #[serial]
    fn test_fatal_frame_error_stops_run() {
        let mut engine = Engine::new(fast_config(), MockDevice::with_completion(Completion::Manual)).unwrap();
        let mut events = ScriptedEvents::new(vec![vec![]; 5]);
        let err = engine
            .run(&mut events, &mut ClearBackground::default(), None)
            .unwrap_err();

        assert!(matches!(err, EngineError::Frame(FatalFrameError { frame_number: 2, .. })));
        assert_eq!(events.polls, 3);
    }

    #[test]
    #[serial]
    fn test_drop_releases_gpu_objects() {
        let mut engine = Engine::new(fast_config(), MockDevice::new()).unwrap();
        engine
            .renderer_mut()
            .defer_release_global(GpuResource::Pipeline(ash::vk::Handle::from_raw(77)));
        engine.shutdown();
        assert!(engine
            .renderer()
            .device()
            .released()
            .contains(&GpuResource::Pipeline(ash::vk::Handle::from_raw(77))));
    }
}
