use ash::vk;
use std::path::Path;

use super::buffer::BufferResource;
use super::commands::{CommandPool, OwnershipTransfer, LOCAL_SIZE};
use super::descriptor::Descriptors;
use super::device::VulkanDevice;
use super::image::{check_storage_support, SharedImage, COLOR_RANGE};
use super::instance::VulkanInstance;
use super::pipeline::Pipeline;
use super::sync::Fence;
use crate::config::AppConfig;
use crate::error::{RenderError, VkResultExt};
use crate::render::{dispatch_size, ComputeUbo, UniformState, COLOR_FORMAT};
use crate::scene::{Scene, Triangle};
use crate::sync::{Extent, FenceTimeout};

/// Fixed animation step between captured frames
const FRAME_DT: f32 = 1.0 / 60.0;

/// Runs the ray tracer without a surface and copies the Shared Image back
/// to host memory after every dispatch.
pub struct HeadlessRenderer {
    cmd: vk::CommandBuffer,
    fence: Fence,
    readback: BufferResource,
    pipeline: Pipeline,
    descriptors: Descriptors,
    image: SharedImage,
    uniform_buffer: BufferResource,
    _triangle_buffer: BufferResource,
    pool: CommandPool,
    uniforms: UniformState,
    fence_timeout: FenceTimeout,
    device: VulkanDevice,
    _instance: VulkanInstance,
}

impl HeadlessRenderer {
    pub fn new(config: &AppConfig, scene: &Scene, extent: Extent) -> Result<Self, RenderError> {
        let render = &config.render;
        let instance = VulkanInstance::new(None, render.validation)?;
        let device = VulkanDevice::new(&instance, None, render.prefer_dedicated_compute)?;
        check_storage_support(&instance, device.physical_device, COLOR_FORMAT)?;
        let dev = &device.device;

        let pool = CommandPool::new(dev, device.families.compute)?;
        let image = SharedImage::new(
            &device,
            extent,
            COLOR_FORMAT,
            &pool,
            device.compute_queue,
            OwnershipTransfer::NONE,
        )?;

        let triangle_buffer = BufferResource::new(
            dev,
            &device.memory_properties,
            scene.byte_size().max(std::mem::size_of::<Triangle>() as u64),
            vk::BufferUsageFlags::STORAGE_BUFFER,
        )?;
        triangle_buffer.store(scene.as_bytes())?;
        let uniform_buffer = BufferResource::new(
            dev,
            &device.memory_properties,
            std::mem::size_of::<ComputeUbo>() as u64,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
        )?;

        let descriptors = Descriptors::new(dev)?;
        descriptors.write_compute(
            image.view,
            uniform_buffer.descriptor_info(),
            triangle_buffer.descriptor_info(),
        );
        let pipeline = Pipeline::compute(dev, descriptors.compute_layout, &render.shader_dir)?;

        let readback = BufferResource::new(
            dev,
            &device.memory_properties,
            u64::from(extent.width) * u64::from(extent.height) * 4,
            vk::BufferUsageFlags::TRANSFER_DST,
        )?;
        let fence = Fence::new(dev, true)?;
        let cmd = pool.allocate(1)?[0];

        let renderer = HeadlessRenderer {
            cmd,
            fence,
            readback,
            pipeline,
            descriptors,
            image,
            uniform_buffer,
            _triangle_buffer: triangle_buffer,
            pool,
            uniforms: UniformState::new(&config.scene, extent.width, extent.height),
            fence_timeout: render.fence_timeout(),
            device,
            _instance: instance,
        };
        renderer.record()?;
        log::info!(
            "Headless renderer ready: {}x{}, {} triangles",
            extent.width,
            extent.height,
            scene.triangles.len()
        );
        Ok(renderer)
    }

    pub fn extent(&self) -> Extent {
        self.image.extent
    }

    /// Dispatch `frames` times, advancing the animation by a fixed step
    /// between dispatches, and return the last image as tightly packed RGBA.
    pub fn capture(&mut self, frames: u32) -> Result<Vec<u8>, RenderError> {
        for frame in 0..frames.max(1) {
            self.fence.wait(self.fence_timeout)?;
            self.fence.reset()?;
            if let Some(ubo) = self.uniforms.take_dirty() {
                self.uniform_buffer.store(bytemuck::bytes_of(&ubo))?;
            }

            let cmds = [self.cmd];
            let submit = vk::SubmitInfo::default().command_buffers(&cmds);
            unsafe {
                self.device.device.queue_submit(
                    self.device.compute_queue,
                    &[submit],
                    self.fence.fence,
                )
            }
            .call("vkQueueSubmit")?;
            log::trace!("Headless dispatch {}", frame);

            self.uniforms.update(FRAME_DT);
        }
        self.fence.wait(self.fence_timeout)?;
        self.readback.read()
    }

    fn record(&self) -> Result<(), RenderError> {
        let device = &self.device.device;
        let cmd = self.cmd;
        let image = self.image.image;
        let extent = self.image.vk_extent();

        unsafe {
            device
                .begin_command_buffer(cmd, &vk::CommandBufferBeginInfo::default())
                .call("vkBeginCommandBuffer")?;

            // Previous copy out must finish before the image is overwritten
            let before_write = vk::ImageMemoryBarrier::default()
                .src_access_mask(vk::AccessFlags::TRANSFER_READ)
                .dst_access_mask(vk::AccessFlags::SHADER_WRITE)
                .old_layout(vk::ImageLayout::GENERAL)
                .new_layout(vk::ImageLayout::GENERAL)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(image)
                .subresource_range(COLOR_RANGE);
            device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::COMPUTE_SHADER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[before_write],
            );

            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::COMPUTE, self.pipeline.pipeline);
            device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::COMPUTE,
                self.pipeline.layout,
                0,
                &[self.descriptors.compute_set],
                &[],
            );
            let (groups_x, groups_y) = dispatch_size(extent.width, extent.height, LOCAL_SIZE);
            device.cmd_dispatch(cmd, groups_x, groups_y, 1);

            let before_copy = before_write
                .src_access_mask(vk::AccessFlags::SHADER_WRITE)
                .dst_access_mask(vk::AccessFlags::TRANSFER_READ);
            device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::COMPUTE_SHADER,
                vk::PipelineStageFlags::TRANSFER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[before_copy],
            );

            let region = vk::BufferImageCopy::default()
                .buffer_offset(0)
                .buffer_row_length(0)
                .buffer_image_height(0)
                .image_subresource(vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: 0,
                    base_array_layer: 0,
                    layer_count: 1,
                })
                .image_extent(vk::Extent3D {
                    width: extent.width,
                    height: extent.height,
                    depth: 1,
                });
            device.cmd_copy_image_to_buffer(
                cmd,
                image,
                vk::ImageLayout::GENERAL,
                self.readback.buffer,
                &[region],
            );

            let to_host = vk::BufferMemoryBarrier::default()
                .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                .dst_access_mask(vk::AccessFlags::HOST_READ)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .buffer(self.readback.buffer)
                .offset(0)
                .size(vk::WHOLE_SIZE);
            device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::HOST,
                vk::DependencyFlags::empty(),
                &[],
                &[to_host],
                &[],
            );

            device.end_command_buffer(cmd).call("vkEndCommandBuffer")
        }
    }
}

impl Drop for HeadlessRenderer {
    fn drop(&mut self) {
        if let Err(e) = unsafe { self.device.device.device_wait_idle() } {
            log::warn!("vkDeviceWaitIdle failed during teardown: {:?}", e);
        }
        self.pool.free(&[self.cmd]);
    }
}

/// Save tightly packed RGBA pixels to `path`, dropping alpha. The file
/// extension picks the format (`.ppm`, `.png`).
pub fn save_capture(path: &Path, width: u32, height: u32, rgba: Vec<u8>) -> Result<(), RenderError> {
    let expected = width as usize * height as usize * 4;
    let actual = rgba.len();
    let img = image::RgbaImage::from_raw(width, height, rgba).ok_or(RenderError::CaptureSize {
        width,
        height,
        expected,
        actual,
    })?;
    image::DynamicImage::ImageRgba8(img).to_rgb8().save(path)?;
    log::debug!("Saved {}x{} capture to {}", width, height, path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_capture_ppm_drops_alpha() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.ppm");
        let rgba = vec![255, 0, 0, 255, 0, 255, 0, 128];
        save_capture(&path, 2, 1, rgba).unwrap();

        let img = image::open(&path).unwrap().to_rgb8();
        assert_eq!(img.dimensions(), (2, 1));
        assert_eq!(img.get_pixel(0, 0).0, [255, 0, 0]);
        assert_eq!(img.get_pixel(1, 0).0, [0, 255, 0]);
    }

    #[test]
    fn test_save_capture_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.png");
        let rgba = vec![10, 20, 30, 255, 40, 50, 60, 255, 70, 80, 90, 255, 1, 2, 3, 255];
        save_capture(&path, 2, 2, rgba).unwrap();

        let img = image::open(&path).unwrap().to_rgb8();
        assert_eq!(img.dimensions(), (2, 2));
        assert_eq!(img.get_pixel(1, 1).0, [1, 2, 3]);
    }

    #[test]
    fn test_save_capture_rejects_short_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let err = save_capture(&dir.path().join("short.ppm"), 2, 2, vec![0; 8]).unwrap_err();
        assert!(matches!(
            err,
            RenderError::CaptureSize {
                expected: 16,
                actual: 8,
                ..
            }
        ));
    }

    /// Two captures of the same scene must be bit-identical. Needs a Vulkan
    /// device and compiled shaders; skipped otherwise.
    #[test]
    fn test_capture_is_deterministic() {
        let mut config = AppConfig::default();
        config.render.shader_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("shaders");
        if !config.render.shader_dir.join(crate::vk::pipeline::COMPUTE_SHADER).exists() {
            eprintln!("skipping: compiled shaders not found");
            return;
        }
        let scene = Scene::two_triangles();
        let extent = Extent::new(64, 64);

        let mut first = match HeadlessRenderer::new(&config, &scene, extent) {
            Ok(renderer) => renderer,
            Err(e) => {
                eprintln!("skipping: no usable Vulkan device ({e})");
                return;
            }
        };
        let a = first.capture(3).unwrap();
        drop(first);

        let mut second = HeadlessRenderer::new(&config, &scene, extent).unwrap();
        let b = second.capture(3).unwrap();

        assert_eq!(a.len(), 64 * 64 * 4);
        assert!(a == b, "captures differ");
    }
}
