use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::path::PathBuf;
use winit::window::Window;

use super::buffer::BufferResource;
use super::commands::{
    record_compute, record_graphics, CommandPool, ComputeRecording, GraphicsRecording,
    OwnershipTransfer,
};
use super::descriptor::Descriptors;
use super::device::VulkanDevice;
use super::image::{check_storage_support, Sampler, SharedImage};
use super::instance::{Surface, VulkanInstance};
use super::pipeline::Pipeline;
use super::render_pass::{Framebuffers, RenderPass};
use super::swapchain::Swapchain;
use super::sync::{Fence, Semaphore};
use crate::config::{AppConfig, PresentMode};
use crate::error::{RenderError, VkResultExt};
use crate::render::{ComputeUbo, COLOR_FORMAT};
use crate::scene::{Scene, Triangle};
use crate::sync::{Acquire, Extent, FenceTimeout, FrameBackend, PresentOutcome};

/// Vulkan implementation of [`FrameBackend`] rendering into a window.
///
/// Fields are declared in reverse creation order so they drop in teardown
/// order; `Drop` waits for the device first.
pub struct VulkanBackend {
    graphics_cmds: Vec<vk::CommandBuffer>,
    compute_cmd: vk::CommandBuffer,

    // Per swapchain image
    render_finished: Vec<Semaphore>,
    images_in_flight: Vec<Option<usize>>,
    // Per frame in flight
    image_available: Vec<Semaphore>,
    frame_fences: Vec<Fence>,

    compute_done: Semaphore,
    graphics_done: Semaphore,
    compute_fence: Fence,
    /// `compute_done` is signaled and no graphics submission waited on it yet
    compute_done_pending: bool,
    /// `graphics_done` is signaled and no compute submission waited on it yet
    graphics_done_pending: bool,

    framebuffers: Framebuffers,
    graphics_pipeline: Pipeline,
    compute_pipeline: Pipeline,
    render_pass: RenderPass,
    descriptors: Descriptors,
    sampler: Sampler,
    shared_image: SharedImage,
    uniform_buffer: BufferResource,
    triangle_buffer: BufferResource,
    swapchain: Swapchain,
    _compute_pool: CommandPool,
    graphics_pool: CommandPool,

    shader_dir: PathBuf,
    present_mode: PresentMode,
    frames_in_flight: usize,

    device: VulkanDevice,
    surface: Surface,
    _instance: VulkanInstance,
}

impl VulkanBackend {
    pub fn new(window: &Window, config: &AppConfig, scene: &Scene) -> Result<Self, RenderError> {
        let render = &config.render;
        let display = window.display_handle()?.as_raw();
        let handle = window.window_handle()?.as_raw();

        let instance = VulkanInstance::new(Some(display), render.validation)?;
        let surface = Surface::new(&instance, display, handle)?;
        let device = VulkanDevice::new(&instance, Some(&surface), render.prefer_dedicated_compute)?;
        check_storage_support(&instance, device.physical_device, COLOR_FORMAT)?;
        let dev = &device.device;

        let graphics_pool = CommandPool::new(dev, device.families.graphics)?;
        let compute_pool = CommandPool::new(dev, device.families.compute)?;

        let size = window.inner_size();
        let swapchain = Swapchain::new(
            &surface,
            &device,
            size.width,
            size.height,
            render.present_mode,
            None,
        )?;

        let image_extent = if render.follow_surface {
            Extent::new(swapchain.extent.width, swapchain.extent.height)
        } else {
            Extent::new(render.target_size, render.target_size)
        };
        let shared_image = SharedImage::new(
            &device,
            image_extent,
            COLOR_FORMAT,
            &graphics_pool,
            device.graphics_queue,
            OwnershipTransfer::between(device.families.graphics, device.families.compute),
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

        let sampler = Sampler::new(dev)?;
        let descriptors = Descriptors::new(dev)?;
        descriptors.write_compute(
            shared_image.view,
            uniform_buffer.descriptor_info(),
            triangle_buffer.descriptor_info(),
        );
        descriptors.write_graphics(sampler.sampler, shared_image.view);

        let render_pass = RenderPass::new(dev, swapchain.format)?;
        let compute_pipeline =
            Pipeline::compute(dev, descriptors.compute_layout, &render.shader_dir)?;
        let graphics_pipeline = Pipeline::graphics(
            dev,
            descriptors.graphics_layout,
            render_pass.render_pass,
            &render.shader_dir,
        )?;
        let framebuffers = Framebuffers::new(
            dev,
            render_pass.render_pass,
            &swapchain.image_views,
            swapchain.extent,
        )?;

        let compute_fence = Fence::new(dev, true)?;
        let graphics_done = Semaphore::new(dev)?;
        let compute_done = Semaphore::new(dev)?;
        let frame_fences = (0..render.frames_in_flight)
            .map(|_| Fence::new(dev, true))
            .collect::<Result<Vec<_>, _>>()?;
        let image_available = Semaphore::many(dev, render.frames_in_flight)?;
        let image_count = swapchain.image_count();
        let render_finished = Semaphore::many(dev, image_count)?;

        let compute_cmd = compute_pool.allocate(1)?[0];
        let graphics_cmds = graphics_pool.allocate(image_count as u32)?;

        let backend = VulkanBackend {
            graphics_cmds,
            compute_cmd,
            render_finished,
            images_in_flight: vec![None; image_count],
            image_available,
            frame_fences,
            compute_done,
            graphics_done,
            compute_fence,
            compute_done_pending: false,
            graphics_done_pending: false,
            framebuffers,
            graphics_pipeline,
            compute_pipeline,
            render_pass,
            descriptors,
            sampler,
            shared_image,
            uniform_buffer,
            triangle_buffer,
            swapchain,
            _compute_pool: compute_pool,
            graphics_pool,
            shader_dir: render.shader_dir.clone(),
            present_mode: render.present_mode,
            frames_in_flight: render.frames_in_flight,
            device,
            surface,
            _instance: instance,
        };
        backend.record_compute()?;
        backend.record_graphics()?;

        log::info!(
            "Renderer ready: {} frames in flight, {} triangles, queue families {}",
            backend.frames_in_flight,
            scene.triangles.len(),
            if backend.device.families.shared() {
                "shared"
            } else {
                "distinct"
            }
        );
        Ok(backend)
    }

    pub fn surface_extent(&self) -> Extent {
        Extent::new(self.swapchain.extent.width, self.swapchain.extent.height)
    }

    fn record_compute(&self) -> Result<(), RenderError> {
        let families = self.device.families;
        record_compute(
            &self.device.device,
            self.compute_cmd,
            &ComputeRecording {
                pipeline: self.compute_pipeline.pipeline,
                layout: self.compute_pipeline.layout,
                set: self.descriptors.compute_set,
                image: self.shared_image.image,
                extent: self.shared_image.vk_extent(),
                acquire: OwnershipTransfer::between(families.graphics, families.compute),
            },
        )
    }

    fn record_graphics(&self) -> Result<(), RenderError> {
        let families = self.device.families;
        let rec = GraphicsRecording {
            pipeline: self.graphics_pipeline.pipeline,
            layout: self.graphics_pipeline.layout,
            set: self.descriptors.graphics_set,
            render_pass: self.render_pass.render_pass,
            image: self.shared_image.image,
            acquire: OwnershipTransfer::between(families.compute, families.graphics),
        };
        for (cmd, framebuffer) in self
            .graphics_cmds
            .iter()
            .zip(self.framebuffers.framebuffers.iter())
        {
            record_graphics(
                &self.device.device,
                *cmd,
                &rec,
                *framebuffer,
                self.swapchain.extent,
            )?;
        }
        Ok(())
    }
}

impl FrameBackend for VulkanBackend {
    fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    fn shared_image_extent(&self) -> Extent {
        self.shared_image.extent
    }

    fn acquire(&mut self, frame: usize) -> Result<Acquire, RenderError> {
        self.frame_fences[frame].wait(FenceTimeout::Unbounded)?;

        let loader = self.device.swapchain_loader()?;
        let result = unsafe {
            loader.acquire_next_image(
                self.swapchain.swapchain,
                u64::MAX,
                self.image_available[frame].semaphore,
                vk::Fence::null(),
            )
        };
        let (slot, suboptimal) = match result {
            Ok(acquired) => acquired,
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => return Ok(Acquire::OutOfDate),
            Err(result) => {
                return Err(RenderError::Vulkan {
                    call: "vkAcquireNextImageKHR",
                    result,
                })
            }
        };

        // The slot's command buffer may still be pending from another frame
        if let Some(previous) = self.images_in_flight[slot as usize] {
            if previous != frame {
                self.frame_fences[previous].wait(FenceTimeout::Unbounded)?;
            }
        }
        self.images_in_flight[slot as usize] = Some(frame);
        log::trace!("Frame {} acquired image {}", frame, slot);
        Ok(Acquire::Ready { slot, suboptimal })
    }

    fn submit_graphics(&mut self, frame: usize, slot: u32) -> Result<(), RenderError> {
        let fence = &self.frame_fences[frame];
        fence.reset()?;

        let mut wait_semaphores = vec![self.image_available[frame].semaphore];
        let mut wait_stages = vec![vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        if self.compute_done_pending {
            wait_semaphores.push(self.compute_done.semaphore);
            wait_stages.push(vk::PipelineStageFlags::FRAGMENT_SHADER);
        }
        let signal_semaphores = [
            self.render_finished[slot as usize].semaphore,
            self.graphics_done.semaphore,
        ];
        let cmds = [self.graphics_cmds[slot as usize]];
        let submit = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&cmds)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device
                .device
                .queue_submit(self.device.graphics_queue, &[submit], fence.fence)
        }
        .call("vkQueueSubmit")?;
        self.compute_done_pending = false;
        self.graphics_done_pending = true;
        Ok(())
    }

    fn present(&mut self, _frame: usize, slot: u32) -> Result<PresentOutcome, RenderError> {
        let wait_semaphores = [self.render_finished[slot as usize].semaphore];
        let swapchains = [self.swapchain.swapchain];
        let image_indices = [slot];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let loader = self.device.swapchain_loader()?;
        match unsafe { loader.queue_present(self.device.graphics_queue, &present_info) } {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(result) => Err(RenderError::Vulkan {
                call: "vkQueuePresentKHR",
                result,
            }),
        }
    }

    fn wait_compute_fence(&mut self, timeout: FenceTimeout) -> Result<(), RenderError> {
        self.compute_fence.wait(timeout)
    }

    fn reset_compute_fence(&mut self) -> Result<(), RenderError> {
        self.compute_fence.reset()
    }

    fn upload_uniforms(&mut self, ubo: &ComputeUbo) -> Result<(), RenderError> {
        self.uniform_buffer.store(bytemuck::bytes_of(ubo))
    }

    fn submit_compute(&mut self) -> Result<(), RenderError> {
        debug_assert!(
            !self.compute_done_pending,
            "compute_done would be signaled twice"
        );
        let mut wait_semaphores = Vec::with_capacity(1);
        let mut wait_stages = Vec::with_capacity(1);
        if self.graphics_done_pending {
            wait_semaphores.push(self.graphics_done.semaphore);
            wait_stages.push(vk::PipelineStageFlags::COMPUTE_SHADER);
        }
        let signal_semaphores = [self.compute_done.semaphore];
        let cmds = [self.compute_cmd];
        let submit = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&cmds)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device.device.queue_submit(
                self.device.compute_queue,
                &[submit],
                self.compute_fence.fence,
            )
        }
        .call("vkQueueSubmit")?;
        self.graphics_done_pending = false;
        self.compute_done_pending = true;
        Ok(())
    }

    fn wait_idle(&mut self) -> Result<(), RenderError> {
        unsafe { self.device.device.device_wait_idle() }.call("vkDeviceWaitIdle")
    }

    fn recreate_surface(&mut self, extent: Extent) -> Result<(), RenderError> {
        let swapchain = Swapchain::new(
            &self.surface,
            &self.device,
            extent.width,
            extent.height,
            self.present_mode,
            Some(&self.swapchain),
        )?;
        let dev = &self.device.device;

        if swapchain.format != self.render_pass.format {
            log::info!("Surface format changed to {:?}", swapchain.format);
            self.render_pass = RenderPass::new(dev, swapchain.format)?;
            self.graphics_pipeline = Pipeline::graphics(
                dev,
                self.descriptors.graphics_layout,
                self.render_pass.render_pass,
                &self.shader_dir,
            )?;
        }
        self.framebuffers = Framebuffers::new(
            dev,
            self.render_pass.render_pass,
            &swapchain.image_views,
            swapchain.extent,
        )?;

        let image_count = swapchain.image_count();
        if image_count != self.graphics_cmds.len() {
            self.graphics_pool.free(&self.graphics_cmds);
            self.graphics_cmds = self.graphics_pool.allocate(image_count as u32)?;
            self.render_finished = Semaphore::many(dev, image_count)?;
        }
        self.images_in_flight = vec![None; image_count];
        self.swapchain = swapchain;

        self.record_graphics()
    }

    fn recreate_shared_image(&mut self, extent: Extent) -> Result<(), RenderError> {
        let families = self.device.families;
        let image = SharedImage::new(
            &self.device,
            extent,
            COLOR_FORMAT,
            &self.graphics_pool,
            self.device.graphics_queue,
            OwnershipTransfer::between(families.graphics, families.compute),
        )?;
        self.descriptors.write_compute(
            image.view,
            self.uniform_buffer.descriptor_info(),
            self.triangle_buffer.descriptor_info(),
        );
        self.descriptors
            .write_graphics(self.sampler.sampler, image.view);
        self.shared_image = image;

        // The device is idle; fresh semaphores drop any signal left unconsumed
        let dev = &self.device.device;
        self.compute_done = Semaphore::new(dev)?;
        self.graphics_done = Semaphore::new(dev)?;
        self.compute_done_pending = false;
        self.graphics_done_pending = false;

        self.record_compute()?;
        self.record_graphics()
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        if let Err(e) = unsafe { self.device.device.device_wait_idle() } {
            log::warn!("vkDeviceWaitIdle failed during teardown: {:?}", e);
        }
    }
}
