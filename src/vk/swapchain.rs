use ash::vk;

use super::device::VulkanDevice;
use super::instance::Surface;
use crate::config::PresentMode;
use crate::error::{RenderError, VkResultExt};

pub struct Swapchain {
    loader: ash::khr::swapchain::Device,
    device: ash::Device,
    pub swapchain: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

impl Swapchain {
    /// Create a swapchain for `surface`. Passing the previous swapchain as
    /// `old` lets the driver recycle its images; the caller still drops it.
    pub fn new(
        surface: &Surface,
        vk_dev: &VulkanDevice,
        width: u32,
        height: u32,
        present_mode: PresentMode,
        old: Option<&Swapchain>,
    ) -> Result<Self, RenderError> {
        let loader = vk_dev.swapchain_loader()?.clone();
        let pd = vk_dev.physical_device;

        let caps = unsafe {
            surface
                .loader
                .get_physical_device_surface_capabilities(pd, surface.surface)
        }
        .call("vkGetPhysicalDeviceSurfaceCapabilitiesKHR")?;
        let formats = unsafe {
            surface
                .loader
                .get_physical_device_surface_formats(pd, surface.surface)
        }
        .call("vkGetPhysicalDeviceSurfaceFormatsKHR")?;
        let modes = unsafe {
            surface
                .loader
                .get_physical_device_surface_present_modes(pd, surface.surface)
        }
        .call("vkGetPhysicalDeviceSurfacePresentModesKHR")?;

        let surface_format = choose_surface_format(&formats).ok_or_else(|| {
            RenderError::NoSuitableDevice("surface reports no formats".to_string())
        })?;
        let mode = choose_present_mode(&modes, present_mode);
        let extent = choose_extent(&caps, width, height);
        let image_count = choose_image_count(&caps);

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(mode)
            .clipped(true)
            .old_swapchain(old.map_or(vk::SwapchainKHR::null(), |s| s.swapchain));

        let swapchain = unsafe { loader.create_swapchain(&create_info, None) }
            .call("vkCreateSwapchainKHR")?;

        let mut result = Swapchain {
            loader,
            device: vk_dev.device.clone(),
            swapchain,
            images: Vec::new(),
            image_views: Vec::new(),
            format: surface_format.format,
            extent,
        };

        result.images = unsafe { result.loader.get_swapchain_images(swapchain) }
            .call("vkGetSwapchainImagesKHR")?;
        for &image in &result.images {
            let view_info = vk::ImageViewCreateInfo::default()
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(surface_format.format)
                .subresource_range(super::image::COLOR_RANGE)
                .image(image);
            let view = unsafe { result.device.create_image_view(&view_info, None) }
                .call("vkCreateImageView")?;
            result.image_views.push(view);
        }

        log::info!(
            "Swapchain created: {}x{}, format {:?}, {:?}, {} images",
            extent.width,
            extent.height,
            surface_format.format,
            mode,
            result.images.len()
        );

        Ok(result)
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for &view in &self.image_views {
                self.device.destroy_image_view(view, None);
            }
            self.loader.destroy_swapchain(self.swapchain, None);
        }
    }
}

/// Prefer B8G8R8A8 UNORM so the shared image's values reach the screen
/// without a second gamma encode; otherwise take the first format.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_UNORM
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| {
            formats.iter().find(|f| {
                f.format == vk::Format::R8G8B8A8_UNORM
                    && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
            })
        })
        .or_else(|| formats.first())
        .copied()
}

/// FIFO is always available and used when the requested mode is not.
pub fn choose_present_mode(
    available: &[vk::PresentModeKHR],
    wanted: PresentMode,
) -> vk::PresentModeKHR {
    let wanted = match wanted {
        PresentMode::Fifo => vk::PresentModeKHR::FIFO,
        PresentMode::Mailbox => vk::PresentModeKHR::MAILBOX,
        PresentMode::Immediate => vk::PresentModeKHR::IMMEDIATE,
    };
    if available.contains(&wanted) {
        wanted
    } else {
        vk::PresentModeKHR::FIFO
    }
}

pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, width: u32, height: u32) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: width.clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: height.clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        count.min(caps.max_image_count)
    } else {
        count
    }
}
