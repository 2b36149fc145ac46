use ash::vk;

use crate::error::{RenderError, VkResultExt};

/// Descriptor pool plus the compute and graphics sets.
pub struct Descriptors {
    device: ash::Device,
    pub pool: vk::DescriptorPool,
    pub compute_layout: vk::DescriptorSetLayout,
    pub graphics_layout: vk::DescriptorSetLayout,
    pub compute_set: vk::DescriptorSet,
    pub graphics_set: vk::DescriptorSet,
}

impl Descriptors {
    pub fn new(device: &ash::Device) -> Result<Self, RenderError> {
        // Compute layout:
        //   binding 0 = output storage image
        //   binding 1 = uniform block
        //   binding 2 = triangle storage buffer
        let compute_bindings = [
            vk::DescriptorSetLayoutBinding::default()
                .binding(0)
                .descriptor_count(1)
                .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
                .stage_flags(vk::ShaderStageFlags::COMPUTE),
            vk::DescriptorSetLayoutBinding::default()
                .binding(1)
                .descriptor_count(1)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .stage_flags(vk::ShaderStageFlags::COMPUTE),
            vk::DescriptorSetLayoutBinding::default()
                .binding(2)
                .descriptor_count(1)
                .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                .stage_flags(vk::ShaderStageFlags::COMPUTE),
        ];
        // Graphics layout: binding 0 = shared image sampled in the fragment stage
        let graphics_bindings = [vk::DescriptorSetLayoutBinding::default()
            .binding(0)
            .descriptor_count(1)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .stage_flags(vk::ShaderStageFlags::FRAGMENT)];

        let compute_layout = create_layout(device, &compute_bindings)?;
        let graphics_layout = create_layout(device, &graphics_bindings).inspect_err(|_| unsafe {
            device.destroy_descriptor_set_layout(compute_layout, None);
        })?;

        let mut descriptors = Descriptors {
            device: device.clone(),
            pool: vk::DescriptorPool::null(),
            compute_layout,
            graphics_layout,
            compute_set: vk::DescriptorSet::null(),
            graphics_set: vk::DescriptorSet::null(),
        };

        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: 2,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: 4,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::STORAGE_IMAGE,
                descriptor_count: 1,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::STORAGE_BUFFER,
                descriptor_count: 1,
            },
        ];
        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .pool_sizes(&pool_sizes)
            .max_sets(3);
        descriptors.pool = unsafe { device.create_descriptor_pool(&pool_info, None) }
            .call("vkCreateDescriptorPool")?;

        let layouts = [compute_layout, graphics_layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(descriptors.pool)
            .set_layouts(&layouts);
        let sets = unsafe { device.allocate_descriptor_sets(&alloc_info) }
            .call("vkAllocateDescriptorSets")?;
        descriptors.compute_set = sets[0];
        descriptors.graphics_set = sets[1];

        Ok(descriptors)
    }

    /// Point the compute set at the output image and the input buffers.
    pub fn write_compute(
        &self,
        image_view: vk::ImageView,
        uniforms: vk::DescriptorBufferInfo,
        triangles: vk::DescriptorBufferInfo,
    ) {
        let image_infos = [vk::DescriptorImageInfo::default()
            .image_layout(vk::ImageLayout::GENERAL)
            .image_view(image_view)];
        let uniform_infos = [uniforms];
        let triangle_infos = [triangles];

        let writes = [
            vk::WriteDescriptorSet::default()
                .dst_set(self.compute_set)
                .dst_binding(0)
                .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
                .image_info(&image_infos),
            vk::WriteDescriptorSet::default()
                .dst_set(self.compute_set)
                .dst_binding(1)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .buffer_info(&uniform_infos),
            vk::WriteDescriptorSet::default()
                .dst_set(self.compute_set)
                .dst_binding(2)
                .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                .buffer_info(&triangle_infos),
        ];
        unsafe { self.device.update_descriptor_sets(&writes, &[]) };
    }

    pub fn write_graphics(&self, sampler: vk::Sampler, image_view: vk::ImageView) {
        let image_infos = [vk::DescriptorImageInfo::default()
            .sampler(sampler)
            .image_view(image_view)
            .image_layout(vk::ImageLayout::GENERAL)];
        let write = vk::WriteDescriptorSet::default()
            .dst_set(self.graphics_set)
            .dst_binding(0)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .image_info(&image_infos);
        unsafe { self.device.update_descriptor_sets(&[write], &[]) };
    }
}

fn create_layout(
    device: &ash::Device,
    bindings: &[vk::DescriptorSetLayoutBinding<'_>],
) -> Result<vk::DescriptorSetLayout, RenderError> {
    let info = vk::DescriptorSetLayoutCreateInfo::default().bindings(bindings);
    unsafe { device.create_descriptor_set_layout(&info, None) }
        .call("vkCreateDescriptorSetLayout")
}

impl Drop for Descriptors {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_pool(self.pool, None);
            self.device
                .destroy_descriptor_set_layout(self.graphics_layout, None);
            self.device
                .destroy_descriptor_set_layout(self.compute_layout, None);
        }
    }
}
