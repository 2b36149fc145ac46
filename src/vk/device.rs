use ash::vk;
use std::ffi::CStr;

use super::instance::{Surface, VulkanInstance};
use crate::error::{RenderError, VkResultExt};

/// Queue families used for the two stages. They may be the same family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilies {
    /// Graphics work and presentation
    pub graphics: u32,
    pub compute: u32,
}

impl QueueFamilies {
    pub fn shared(&self) -> bool {
        self.graphics == self.compute
    }
}

/// Pick a graphics family that can present and a compute family, preferring
/// a compute family without graphics support when `prefer_dedicated` is set.
pub fn select_queue_families(
    families: &[vk::QueueFamilyProperties],
    can_present: impl Fn(u32) -> bool,
    prefer_dedicated: bool,
) -> Option<QueueFamilies> {
    let usable = |props: &vk::QueueFamilyProperties, flag: vk::QueueFlags| {
        props.queue_count > 0 && props.queue_flags.contains(flag)
    };

    let graphics = families
        .iter()
        .enumerate()
        .find(|(idx, props)| usable(props, vk::QueueFlags::GRAPHICS) && can_present(*idx as u32))
        .map(|(idx, _)| idx as u32)?;

    let dedicated = prefer_dedicated
        .then(|| {
            families.iter().position(|props| {
                usable(props, vk::QueueFlags::COMPUTE)
                    && !props.queue_flags.contains(vk::QueueFlags::GRAPHICS)
            })
        })
        .flatten()
        .map(|idx| idx as u32);

    let compute = dedicated.or_else(|| {
        if usable(&families[graphics as usize], vk::QueueFlags::COMPUTE) {
            Some(graphics)
        } else {
            families
                .iter()
                .position(|props| usable(props, vk::QueueFlags::COMPUTE))
                .map(|idx| idx as u32)
        }
    })?;

    Some(QueueFamilies { graphics, compute })
}

pub struct VulkanDevice {
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub families: QueueFamilies,
    pub graphics_queue: vk::Queue,
    pub compute_queue: vk::Queue,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub swapchain_loader: Option<ash::khr::swapchain::Device>,
}

impl VulkanDevice {
    /// Create a logical device. With a surface, the graphics family must be
    /// able to present to it and the swapchain extension is enabled.
    pub fn new(
        vk_instance: &VulkanInstance,
        surface: Option<&Surface>,
        prefer_dedicated_compute: bool,
    ) -> Result<Self, RenderError> {
        let instance = &vk_instance.instance;

        let required_extensions: Vec<&CStr> = match surface {
            Some(_) => vec![ash::khr::swapchain::NAME],
            None => Vec::new(),
        };

        let devices = unsafe { instance.enumerate_physical_devices() }
            .call("vkEnumeratePhysicalDevices")?;

        let mut found = None;
        for pd in devices {
            let exts = unsafe { instance.enumerate_device_extension_properties(pd) }
                .call("vkEnumerateDeviceExtensionProperties")?;
            let has_all = required_extensions.iter().all(|req| {
                exts.iter()
                    .any(|e| e.extension_name_as_c_str().map(|n| n == *req).unwrap_or(false))
            });
            if !has_all {
                continue;
            }

            let qf_props = unsafe { instance.get_physical_device_queue_family_properties(pd) };
            let families = select_queue_families(
                &qf_props,
                |idx| surface.map_or(true, |s| s.supports_present(pd, idx)),
                prefer_dedicated_compute,
            );
            if let Some(families) = families {
                let props = unsafe { instance.get_physical_device_properties(pd) };
                log::info!(
                    "Selected GPU: {:?} (graphics family {}, compute family {})",
                    props.device_name_as_c_str().unwrap_or(c"unknown"),
                    families.graphics,
                    families.compute
                );
                found = Some((pd, families));
                break;
            }
        }
        let (physical_device, families) = found.ok_or_else(|| {
            RenderError::NoSuitableDevice(
                "no GPU with graphics, compute and presentation queues".to_string(),
            )
        })?;

        let priorities = [1.0f32];
        let mut queue_infos = vec![vk::DeviceQueueCreateInfo::default()
            .queue_family_index(families.graphics)
            .queue_priorities(&priorities)];
        if !families.shared() {
            queue_infos.push(
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(families.compute)
                    .queue_priorities(&priorities),
            );
        }

        let ext_name_ptrs: Vec<*const i8> =
            required_extensions.iter().map(|e| e.as_ptr()).collect();

        let device_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&ext_name_ptrs);

        let device = unsafe { instance.create_device(physical_device, &device_info, None) }
            .call("vkCreateDevice")?;
        let graphics_queue = unsafe { device.get_device_queue(families.graphics, 0) };
        let compute_queue = unsafe { device.get_device_queue(families.compute, 0) };
        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(physical_device) };

        let swapchain_loader =
            surface.map(|_| ash::khr::swapchain::Device::new(instance, &device));

        Ok(VulkanDevice {
            device,
            physical_device,
            families,
            graphics_queue,
            compute_queue,
            memory_properties,
            swapchain_loader,
        })
    }

    pub fn swapchain_loader(&self) -> Result<&ash::khr::swapchain::Device, RenderError> {
        self.swapchain_loader
            .as_ref()
            .ok_or(RenderError::Window("device was created without a surface".to_string()))
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        unsafe {
            self.device.device_wait_idle().ok();
            self.device.destroy_device(None);
        }
    }
}
