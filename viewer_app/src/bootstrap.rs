//! Vulkan bootstrap for the viewer
//!
//! Creates the instance, surface, physical and logical device the engine borrows through
//! a [`DeviceContext`]. The bootstrap owns those handles and must outlive the engine.

use std::ffi::{CStr, CString};

use ash::extensions::ext::DebugUtils;
use ash::extensions::khr::{Surface, Swapchain as SwapchainLoader};
use ash::{vk, Entry};
use frame_engine::prelude::{DeviceContext, VulkanError, VulkanResult};

use crate::window::Window;

const VALIDATION_LAYER: &str = "VK_LAYER_KHRONOS_validation";

/// Instance, surface and device for one window
pub struct GpuBootstrap {
    _entry: Entry,
    debug: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
    context: DeviceContext,
}

impl GpuBootstrap {
    /// Bring up Vulkan for `window`
    ///
    /// Validation layers are requested only in debug builds, and only when installed.
    pub fn new(window: &Window, app_name: &str) -> VulkanResult<Self> {
        let entry = unsafe { Entry::load() }
            .map_err(|e| VulkanError::InitializationFailed(format!("Failed to load Vulkan: {e}")))?;

        let validation = cfg!(debug_assertions) && validation_layer_available(&entry);
        let instance = create_instance(&entry, window, app_name, validation)?;
        let debug = if validation {
            let debug_utils = DebugUtils::new(&entry, &instance);
            match create_debug_messenger(&debug_utils) {
                Ok(messenger) => Some((debug_utils, messenger)),
                Err(err) => {
                    log::warn!("Validation messenger unavailable: {}", err);
                    None
                }
            }
        } else {
            None
        };

        let surface_loader = Surface::new(&entry, &instance);
        let surface = match window.create_vulkan_surface(instance.handle()) {
            Ok(surface) => surface,
            Err(err) => {
                unsafe { destroy_instance(&instance, debug.as_ref()) };
                return Err(VulkanError::InitializationFailed(err.to_string()));
            }
        };

        let device = select_physical_device(&instance, surface, &surface_loader).and_then(
            |(physical_device, family)| {
                create_logical_device(&instance, physical_device, family)
                    .map(|device| (physical_device, family, device))
            },
        );
        let (physical_device, graphics_queue_family, device) = match device {
            Ok(selected) => selected,
            Err(err) => {
                unsafe {
                    surface_loader.destroy_surface(surface, None);
                    destroy_instance(&instance, debug.as_ref());
                }
                return Err(err);
            }
        };

        let graphics_queue = unsafe { device.get_device_queue(graphics_queue_family, 0) };
        log::info!("Vulkan device ready (queue family {})", graphics_queue_family);

        Ok(Self {
            _entry: entry,
            debug,
            context: DeviceContext {
                instance,
                device,
                physical_device,
                surface,
                surface_loader,
                graphics_queue,
                graphics_queue_family,
            },
        })
    }

    /// Handles for the engine
    pub fn context(&self) -> DeviceContext {
        self.context.clone()
    }
}

impl Drop for GpuBootstrap {
    fn drop(&mut self) {
        let ctx = &self.context;
        unsafe {
            if let Err(err) = ctx.device.device_wait_idle() {
                log::warn!("Device wait idle failed during teardown: {:?}", err);
            }
            ctx.device.destroy_device(None);
            ctx.surface_loader.destroy_surface(ctx.surface, None);
            destroy_instance(&ctx.instance, self.debug.as_ref());
        }
        log::debug!("Vulkan bootstrap destroyed");
    }
}

unsafe fn destroy_instance(
    instance: &ash::Instance,
    debug: Option<&(DebugUtils, vk::DebugUtilsMessengerEXT)>,
) {
    if let Some((debug_utils, messenger)) = debug {
        debug_utils.destroy_debug_utils_messenger(*messenger, None);
    }
    instance.destroy_instance(None);
}

fn validation_layer_available(entry: &Entry) -> bool {
    entry
        .enumerate_instance_layer_properties()
        .map(|layers| {
            layers.iter().any(|layer| {
                let name = unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) };
                name.to_str() == Ok(VALIDATION_LAYER)
            })
        })
        .unwrap_or(false)
}

fn to_cstring(value: &str) -> VulkanResult<CString> {
    CString::new(value)
        .map_err(|e| VulkanError::InitializationFailed(format!("Invalid name {value:?}: {e}")))
}

fn create_instance(
    entry: &Entry,
    window: &Window,
    app_name: &str,
    validation: bool,
) -> VulkanResult<ash::Instance> {
    let app_name = to_cstring(app_name)?;
    let engine_name = to_cstring("FrameEngine")?;
    let app_info = vk::ApplicationInfo::builder()
        .application_name(&app_name)
        .application_version(vk::make_api_version(0, 1, 0, 0))
        .engine_name(&engine_name)
        .engine_version(vk::make_api_version(0, 1, 0, 0))
        .api_version(vk::API_VERSION_1_0);

    let required = window
        .required_instance_extensions()
        .map_err(|e| VulkanError::InitializationFailed(e.to_string()))?;
    let extension_names = required
        .iter()
        .map(|ext| to_cstring(ext))
        .collect::<VulkanResult<Vec<_>>>()?;
    let mut extensions: Vec<*const i8> = extension_names.iter().map(|ext| ext.as_ptr()).collect();

    let layer_names = if validation {
        extensions.push(DebugUtils::name().as_ptr());
        vec![to_cstring(VALIDATION_LAYER)?]
    } else {
        Vec::new()
    };
    let layers: Vec<*const i8> = layer_names.iter().map(|name| name.as_ptr()).collect();

    let create_info = vk::InstanceCreateInfo::builder()
        .application_info(&app_info)
        .enabled_extension_names(&extensions)
        .enabled_layer_names(&layers);

    unsafe { entry.create_instance(&create_info, None) }.map_err(VulkanError::Api)
}

fn create_debug_messenger(debug_utils: &DebugUtils) -> VulkanResult<vk::DebugUtilsMessengerEXT> {
    let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback));

    unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }.map_err(VulkanError::Api)
}

unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if callback_data.is_null() || (*callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*callback_data).p_message).to_string_lossy();

    if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::ERROR {
        log::error!("[Vulkan] {:?} - {}", message_type, message);
    } else {
        log::warn!("[Vulkan] {:?} - {}", message_type, message);
    }
    vk::FALSE
}

/// First device with one queue family that both draws and presents, plus swapchain support
fn select_physical_device(
    instance: &ash::Instance,
    surface: vk::SurfaceKHR,
    surface_loader: &Surface,
) -> VulkanResult<(vk::PhysicalDevice, u32)> {
    let devices = unsafe { instance.enumerate_physical_devices() }.map_err(VulkanError::Api)?;

    for device in devices {
        let properties = unsafe { instance.get_physical_device_properties(device) };
        let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }.to_string_lossy();

        if !supports_swapchain(instance, device)? {
            log::debug!("Skipping {}: no swapchain extension", name);
            continue;
        }
        match graphics_present_family(instance, device, surface, surface_loader)? {
            Some(family) => {
                log::info!("Selected GPU: {}", name);
                return Ok((device, family));
            }
            None => log::debug!("Skipping {}: no graphics queue that can present", name),
        }
    }

    Err(VulkanError::InitializationFailed("No suitable GPU found".to_string()))
}

fn supports_swapchain(instance: &ash::Instance, device: vk::PhysicalDevice) -> VulkanResult<bool> {
    let extensions = unsafe { instance.enumerate_device_extension_properties(device) }
        .map_err(VulkanError::Api)?;
    Ok(extensions.iter().any(|ext| {
        let name = unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) };
        name == SwapchainLoader::name()
    }))
}

fn graphics_present_family(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    surface_loader: &Surface,
) -> VulkanResult<Option<u32>> {
    let families = unsafe { instance.get_physical_device_queue_family_properties(device) };
    for (index, family) in (0u32..).zip(families.iter()) {
        if !family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
            continue;
        }
        let present = unsafe {
            surface_loader.get_physical_device_surface_support(device, index, surface)
        }
        .map_err(VulkanError::Api)?;
        if present {
            return Ok(Some(index));
        }
    }
    Ok(None)
}

fn create_logical_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    family: u32,
) -> VulkanResult<ash::Device> {
    let priorities = [1.0];
    let queue_infos = [vk::DeviceQueueCreateInfo::builder()
        .queue_family_index(family)
        .queue_priorities(&priorities)
        .build()];
    let extensions = [SwapchainLoader::name().as_ptr()];
    let features = vk::PhysicalDeviceFeatures::default();

    let create_info = vk::DeviceCreateInfo::builder()
        .queue_create_infos(&queue_infos)
        .enabled_extension_names(&extensions)
        .enabled_features(&features);

    unsafe { instance.create_device(physical_device, &create_info, None) }.map_err(VulkanError::Api)
}
