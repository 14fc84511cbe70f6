//! GLFW window for the viewer
//!
//! Opens a Vulkan-ready window (no client API) and turns GLFW events into the engine's
//! window events.

use ash::vk;
use frame_engine::{EventSource, WindowEvent};
use thiserror::Error;

/// Window management errors
#[derive(Error, Debug)]
pub enum WindowError {
    #[error("GLFW initialization failed")]
    InitializationFailed,

    #[error("Window creation failed")]
    CreationFailed,

    #[error("GLFW error: {0}")]
    GlfwError(String),
}

pub type WindowResult<T> = Result<T, WindowError>;

/// GLFW window plus its event receiver
pub struct Window {
    glfw: glfw::Glfw,
    window: glfw::PWindow,
    events: glfw::GlfwReceiver<(f64, glfw::WindowEvent)>,
}

impl Window {
    pub fn new(title: &str, width: u32, height: u32) -> WindowResult<Self> {
        let mut glfw = glfw::init(glfw::fail_on_errors)
            .map_err(|_| WindowError::InitializationFailed)?;

        if !glfw.vulkan_supported() {
            return Err(WindowError::GlfwError("Vulkan loader not found".to_string()));
        }

        glfw.window_hint(glfw::WindowHint::ClientApi(glfw::ClientApiHint::NoApi));
        glfw.window_hint(glfw::WindowHint::Resizable(true));

        let (mut window, events) = glfw
            .create_window(width, height, title, glfw::WindowMode::Windowed)
            .ok_or(WindowError::CreationFailed)?;

        window.set_key_polling(true);
        window.set_close_polling(true);
        window.set_iconify_polling(true);
        window.set_framebuffer_size_polling(true);

        Ok(Self {
            glfw,
            window,
            events,
        })
    }

    /// Framebuffer size in pixels; zero while minimized on some platforms
    pub fn framebuffer_size(&self) -> (u32, u32) {
        let (width, height) = self.window.get_framebuffer_size();
        (clamp_dimension(width), clamp_dimension(height))
    }

    /// Instance extensions GLFW needs to create a surface
    pub fn required_instance_extensions(&self) -> WindowResult<Vec<String>> {
        self.glfw
            .get_required_instance_extensions()
            .ok_or_else(|| WindowError::GlfwError("Failed to get required extensions".to_string()))
    }

    /// Create the presentation surface for this window
    pub fn create_vulkan_surface(&self, instance: vk::Instance) -> WindowResult<vk::SurfaceKHR> {
        let mut surface = vk::SurfaceKHR::null();
        let result = self.window.create_window_surface(instance, std::ptr::null(), &mut surface);

        if result == vk::Result::SUCCESS {
            Ok(surface)
        } else {
            Err(WindowError::GlfwError(format!("Failed to create Vulkan surface: {:?}", result)))
        }
    }

    fn translate(&self, event: glfw::WindowEvent) -> Option<WindowEvent> {
        match event {
            glfw::WindowEvent::FramebufferSize(width, height) => Some(WindowEvent::Resized {
                width: clamp_dimension(width),
                height: clamp_dimension(height),
            }),
            glfw::WindowEvent::Iconify(true) => Some(WindowEvent::Minimized),
            glfw::WindowEvent::Iconify(false) => {
                let (width, height) = self.framebuffer_size();
                Some(WindowEvent::Restored { width, height })
            }
            glfw::WindowEvent::Close
            | glfw::WindowEvent::Key(glfw::Key::Escape, _, glfw::Action::Press, _) => {
                Some(WindowEvent::CloseRequested)
            }
            _ => None,
        }
    }
}

impl EventSource for Window {
    fn poll_events(&mut self) -> Vec<WindowEvent> {
        self.glfw.poll_events();
        let pending: Vec<_> = glfw::flush_messages(&self.events)
            .map(|(_, event)| event)
            .collect();

        let mut translated: Vec<_> = pending
            .into_iter()
            .filter_map(|event| self.translate(event))
            .collect();
        if self.window.should_close() && !translated.contains(&WindowEvent::CloseRequested) {
            translated.push(WindowEvent::CloseRequested);
        }
        translated
    }
}

fn clamp_dimension(value: i32) -> u32 {
    u32::try_from(value).unwrap_or(0)
}
