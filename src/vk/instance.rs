use ash::vk;
use std::ffi::{c_void, CStr};

use crate::error::{RenderError, VkResultExt};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    msg_type: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user: *mut c_void,
) -> vk::Bool32 {
    let ty = match msg_type {
        vk::DebugUtilsMessageTypeFlagsEXT::GENERAL => "GEN",
        vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION => "VAL",
        vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE => "PERF",
        _ => "?",
    };
    let msg = unsafe { CStr::from_ptr((*data).p_message) }.to_string_lossy();
    match severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => log::error!("[VK {ty}] {msg}"),
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => log::warn!("[VK {ty}] {msg}"),
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => log::debug!("[VK {ty}] {msg}"),
        _ => log::trace!("[VK {ty}] {msg}"),
    }
    vk::FALSE
}

struct DebugMessenger {
    loader: ash::ext::debug_utils::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
}

pub struct VulkanInstance {
    debug: Option<DebugMessenger>,
    pub instance: ash::Instance,
    pub entry: ash::Entry,
}

impl VulkanInstance {
    /// Create an instance. `display` adds the window system surface
    /// extensions; `None` creates a headless instance.
    pub fn new(
        display: Option<raw_window_handle::RawDisplayHandle>,
        validation: bool,
    ) -> Result<Self, RenderError> {
        let entry = unsafe { ash::Entry::load()? };

        let app_info = vk::ApplicationInfo::default()
            .application_name(c"rt-compute")
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(c"No Engine")
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_2);

        let mut ext_names: Vec<*const i8> = match display {
            Some(display) => ash_window::enumerate_required_extensions(display)
                .call("vkEnumerateInstanceExtensionProperties")?
                .to_vec(),
            None => Vec::new(),
        };

        let validation = validation && layer_available(&entry, VALIDATION_LAYER);
        let layer_names = if validation {
            ext_names.push(ash::ext::debug_utils::NAME.as_ptr());
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            Vec::new()
        };

        let mut debug_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
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

        let mut create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_layer_names(&layer_names)
            .enabled_extension_names(&ext_names);
        if validation {
            create_info = create_info.push_next(&mut debug_info);
        }

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .call("vkCreateInstance")?;

        let debug = if validation {
            let loader = ash::ext::debug_utils::Instance::new(&entry, &instance);
            let messenger = unsafe { loader.create_debug_utils_messenger(&debug_info, None) }
                .call("vkCreateDebugUtilsMessengerEXT")?;
            Some(DebugMessenger { loader, messenger })
        } else {
            None
        };

        log::info!(
            "Vulkan instance created (validation: {}, surface: {})",
            validation,
            display.is_some()
        );

        Ok(VulkanInstance {
            debug,
            instance,
            entry,
        })
    }
}

fn layer_available(entry: &ash::Entry, name: &CStr) -> bool {
    let layers = unsafe { entry.enumerate_instance_layer_properties() }.unwrap_or_default();
    let found = layers.iter().any(|layer| {
        layer
            .layer_name_as_c_str()
            .map(|n| n == name)
            .unwrap_or(false)
    });
    if !found {
        log::warn!("Validation requested but {:?} is not installed", name);
    }
    found
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        unsafe {
            if let Some(debug) = self.debug.take() {
                debug
                    .loader
                    .destroy_debug_utils_messenger(debug.messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Presentation surface of a window.
pub struct Surface {
    pub loader: ash::khr::surface::Instance,
    pub surface: vk::SurfaceKHR,
}

impl Surface {
    pub fn new(
        instance: &VulkanInstance,
        display: raw_window_handle::RawDisplayHandle,
        window: raw_window_handle::RawWindowHandle,
    ) -> Result<Self, RenderError> {
        let surface = unsafe {
            ash_window::create_surface(&instance.entry, &instance.instance, display, window, None)
        }
        .call("vkCreateSurfaceKHR")?;
        let loader = ash::khr::surface::Instance::new(&instance.entry, &instance.instance);
        Ok(Surface { loader, surface })
    }

    pub fn supports_present(&self, pd: vk::PhysicalDevice, family: u32) -> bool {
        unsafe {
            self.loader
                .get_physical_device_surface_support(pd, family, self.surface)
                .unwrap_or(false)
        }
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe { self.loader.destroy_surface(self.surface, None) };
    }
}
