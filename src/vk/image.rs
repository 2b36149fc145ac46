use ash::vk;

use super::buffer::find_memory_type;
use super::commands::{cmd_image_barrier, init_release_scopes, CommandPool, OwnershipTransfer};
use super::device::VulkanDevice;
use super::instance::VulkanInstance;
use crate::error::{RenderError, VkResultExt};
use crate::sync::Extent;

pub const COLOR_RANGE: vk::ImageSubresourceRange = vk::ImageSubresourceRange {
    aspect_mask: vk::ImageAspectFlags::COLOR,
    base_mip_level: 0,
    level_count: 1,
    base_array_layer: 0,
    layer_count: 1,
};

/// Fail unless `format` can be written as a storage image with optimal
/// tiling.
pub fn check_storage_support(
    instance: &VulkanInstance,
    physical_device: vk::PhysicalDevice,
    format: vk::Format,
) -> Result<(), RenderError> {
    let props = unsafe {
        instance
            .instance
            .get_physical_device_format_properties(physical_device, format)
    };
    if props
        .optimal_tiling_features
        .contains(vk::FormatFeatureFlags::STORAGE_IMAGE)
    {
        Ok(())
    } else {
        Err(RenderError::UnsupportedFormat(format))
    }
}

/// The image the compute stage writes and the graphics stage samples.
pub struct SharedImage {
    device: ash::Device,
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub memory: vk::DeviceMemory,
    pub format: vk::Format,
    pub extent: Extent,
}

impl SharedImage {
    /// Create the image and move it to `GENERAL` with a one-time submit on
    /// `queue`. When `release` names two families the same submission
    /// releases ownership to the compute family.
    pub fn new(
        vk_dev: &VulkanDevice,
        extent: Extent,
        format: vk::Format,
        pool: &CommandPool,
        queue: vk::Queue,
        release: OwnershipTransfer,
    ) -> Result<Self, RenderError> {
        let device = &vk_dev.device;

        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(
                vk::ImageUsageFlags::STORAGE
                    | vk::ImageUsageFlags::SAMPLED
                    | vk::ImageUsageFlags::TRANSFER_SRC,
            )
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { device.create_image(&image_info, None) }.call("vkCreateImage")?;
        let mut shared = SharedImage {
            device: device.clone(),
            image,
            view: vk::ImageView::null(),
            memory: vk::DeviceMemory::null(),
            format,
            extent,
        };

        let mem_reqs = unsafe { device.get_image_memory_requirements(image) };
        let mem_info = vk::MemoryAllocateInfo::default()
            .allocation_size(mem_reqs.size)
            .memory_type_index(find_memory_type(
                &vk_dev.memory_properties,
                mem_reqs.memory_type_bits,
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
            )?);
        shared.memory =
            unsafe { device.allocate_memory(&mem_info, None) }.call("vkAllocateMemory")?;
        unsafe { device.bind_image_memory(image, shared.memory, 0) }
            .call("vkBindImageMemory")?;

        let view_info = vk::ImageViewCreateInfo::default()
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(COLOR_RANGE)
            .image(image);
        shared.view =
            unsafe { device.create_image_view(&view_info, None) }.call("vkCreateImageView")?;

        pool.one_time_submit(queue, |device, cmd| {
            let to_general = vk::ImageMemoryBarrier::default()
                .src_access_mask(vk::AccessFlags::empty())
                .dst_access_mask(vk::AccessFlags::SHADER_WRITE)
                .old_layout(vk::ImageLayout::UNDEFINED)
                .new_layout(vk::ImageLayout::GENERAL)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(image)
                .subresource_range(COLOR_RANGE);
            unsafe {
                device.cmd_pipeline_barrier(
                    cmd,
                    vk::PipelineStageFlags::TOP_OF_PIPE,
                    vk::PipelineStageFlags::ALL_COMMANDS,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    &[to_general],
                );
                if release.is_transfer() {
                    cmd_image_barrier(device, cmd, image, release, init_release_scopes());
                }
            }
        })?;

        log::info!(
            "Shared image created: {}x{} {:?}",
            extent.width,
            extent.height,
            format
        );
        Ok(shared)
    }

    pub fn vk_extent(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.extent.width,
            height: self.extent.height,
        }
    }
}

impl Drop for SharedImage {
    fn drop(&mut self) {
        unsafe {
            if self.view != vk::ImageView::null() {
                self.device.destroy_image_view(self.view, None);
            }
            self.device.destroy_image(self.image, None);
            if self.memory != vk::DeviceMemory::null() {
                self.device.free_memory(self.memory, None);
            }
        }
    }
}

/// Linear sampler with clamp-to-border addressing and an opaque white border.
pub struct Sampler {
    device: ash::Device,
    pub sampler: vk::Sampler,
}

impl Sampler {
    pub fn new(device: &ash::Device) -> Result<Self, RenderError> {
        let info = vk::SamplerCreateInfo::default()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_BORDER)
            .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_BORDER)
            .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_BORDER)
            .mip_lod_bias(0.0)
            .max_anisotropy(1.0)
            .compare_op(vk::CompareOp::NEVER)
            .min_lod(0.0)
            .max_lod(0.0)
            .border_color(vk::BorderColor::FLOAT_OPAQUE_WHITE);
        let sampler = unsafe { device.create_sampler(&info, None) }.call("vkCreateSampler")?;
        Ok(Sampler {
            device: device.clone(),
            sampler,
        })
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        unsafe { self.device.destroy_sampler(self.sampler, None) };
    }
}
