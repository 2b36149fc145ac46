use ash::vk;

use super::image::COLOR_RANGE;
use crate::error::{RenderError, VkResultExt};
use crate::render::dispatch_size;

/// Compute shader workgroup edge (`local_size_x/y` in raytracing.comp)
pub const LOCAL_SIZE: u32 = 16;

/// Queue family pair for an ownership transfer of the shared image.
/// Both sides are `QUEUE_FAMILY_IGNORED` when no transfer is needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnershipTransfer {
    pub src: u32,
    pub dst: u32,
}

impl OwnershipTransfer {
    pub const NONE: OwnershipTransfer = OwnershipTransfer {
        src: vk::QUEUE_FAMILY_IGNORED,
        dst: vk::QUEUE_FAMILY_IGNORED,
    };

    pub fn between(src: u32, dst: u32) -> Self {
        if src == dst {
            Self::NONE
        } else {
            OwnershipTransfer { src, dst }
        }
    }

    pub fn is_transfer(&self) -> bool {
        *self != Self::NONE
    }

    pub fn reversed(&self) -> Self {
        OwnershipTransfer {
            src: self.dst,
            dst: self.src,
        }
    }
}

/// Barrier on the shared image, which stays in `GENERAL` layout for its
/// whole life. Used for both halves of an ownership transfer.
pub fn image_barrier(
    image: vk::Image,
    transfer: OwnershipTransfer,
    src_access: vk::AccessFlags,
    dst_access: vk::AccessFlags,
) -> vk::ImageMemoryBarrier<'static> {
    vk::ImageMemoryBarrier::default()
        .src_access_mask(src_access)
        .dst_access_mask(dst_access)
        .old_layout(vk::ImageLayout::GENERAL)
        .new_layout(vk::ImageLayout::GENERAL)
        .src_queue_family_index(transfer.src)
        .dst_queue_family_index(transfer.dst)
        .image(image)
        .subresource_range(COLOR_RANGE)
}

/// Stage and access mask on one side of a barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarrierScope {
    pub stage: vk::PipelineStageFlags,
    pub access: vk::AccessFlags,
}

impl BarrierScope {
    const fn new(stage: vk::PipelineStageFlags, access: vk::AccessFlags) -> Self {
        BarrierScope { stage, access }
    }

    /// Whether every access bit can be performed by some stage in the mask.
    /// `TOP_OF_PIPE` and `BOTTOM_OF_PIPE` perform no accesses.
    pub fn is_valid(&self) -> bool {
        if self.stage.contains(vk::PipelineStageFlags::ALL_COMMANDS) {
            return true;
        }
        let shader = vk::AccessFlags::SHADER_READ
            | vk::AccessFlags::SHADER_WRITE
            | vk::AccessFlags::UNIFORM_READ;
        let supported = [
            (vk::PipelineStageFlags::COMPUTE_SHADER, shader),
            (vk::PipelineStageFlags::VERTEX_SHADER, shader),
            (vk::PipelineStageFlags::FRAGMENT_SHADER, shader),
            (
                vk::PipelineStageFlags::TRANSFER,
                vk::AccessFlags::TRANSFER_READ | vk::AccessFlags::TRANSFER_WRITE,
            ),
            (
                vk::PipelineStageFlags::HOST,
                vk::AccessFlags::HOST_READ | vk::AccessFlags::HOST_WRITE,
            ),
            (
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            ),
        ]
        .iter()
        .filter(|(stage, _)| self.stage.contains(*stage))
        .fold(vk::AccessFlags::empty(), |acc, (_, access)| acc | *access);
        supported.contains(self.access)
    }
}

/// Source and destination scopes of one barrier on the shared image.
pub type BarrierScopes = (BarrierScope, BarrierScope);

/// Graphics family hands the freshly initialized image to compute. Chained
/// after the layout transition, which has already been made available.
pub fn init_release_scopes() -> BarrierScopes {
    (
        BarrierScope::new(vk::PipelineStageFlags::ALL_COMMANDS, vk::AccessFlags::empty()),
        BarrierScope::new(vk::PipelineStageFlags::BOTTOM_OF_PIPE, vk::AccessFlags::empty()),
    )
}

/// Compute takes the image from graphics before dispatching.
pub fn compute_acquire_scopes() -> BarrierScopes {
    (
        BarrierScope::new(vk::PipelineStageFlags::TOP_OF_PIPE, vk::AccessFlags::empty()),
        BarrierScope::new(vk::PipelineStageFlags::COMPUTE_SHADER, vk::AccessFlags::SHADER_WRITE),
    )
}

/// Compute gives the written image back to graphics.
pub fn compute_release_scopes() -> BarrierScopes {
    (
        BarrierScope::new(vk::PipelineStageFlags::COMPUTE_SHADER, vk::AccessFlags::SHADER_WRITE),
        BarrierScope::new(vk::PipelineStageFlags::BOTTOM_OF_PIPE, vk::AccessFlags::empty()),
    )
}

/// Makes the compute write visible to the fragment shader. Across families
/// this is an acquire: the writes were made available by the release and
/// the semaphore orders execution, so the source side is empty.
pub fn graphics_acquire_scopes(transfer: OwnershipTransfer) -> BarrierScopes {
    let src = if transfer.is_transfer() {
        BarrierScope::new(vk::PipelineStageFlags::TOP_OF_PIPE, vk::AccessFlags::empty())
    } else {
        BarrierScope::new(vk::PipelineStageFlags::COMPUTE_SHADER, vk::AccessFlags::SHADER_WRITE)
    };
    (
        src,
        BarrierScope::new(vk::PipelineStageFlags::FRAGMENT_SHADER, vk::AccessFlags::SHADER_READ),
    )
}

/// Graphics gives the sampled image back to compute.
pub fn graphics_release_scopes() -> BarrierScopes {
    (
        BarrierScope::new(vk::PipelineStageFlags::FRAGMENT_SHADER, vk::AccessFlags::SHADER_READ),
        BarrierScope::new(vk::PipelineStageFlags::BOTTOM_OF_PIPE, vk::AccessFlags::empty()),
    )
}

/// Record a `GENERAL` to `GENERAL` barrier on `image` with the given scopes.
///
/// # Safety
/// `cmd` must be in the recording state.
pub unsafe fn cmd_image_barrier(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    transfer: OwnershipTransfer,
    (src, dst): BarrierScopes,
) {
    let barrier = image_barrier(image, transfer, src.access, dst.access);
    device.cmd_pipeline_barrier(
        cmd,
        src.stage,
        dst.stage,
        vk::DependencyFlags::empty(),
        &[],
        &[],
        &[barrier],
    );
}

pub struct CommandPool {
    device: ash::Device,
    pub pool: vk::CommandPool,
}

impl CommandPool {
    pub fn new(device: &ash::Device, queue_family_index: u32) -> Result<Self, RenderError> {
        let info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family_index)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let pool =
            unsafe { device.create_command_pool(&info, None) }.call("vkCreateCommandPool")?;
        Ok(CommandPool {
            device: device.clone(),
            pool,
        })
    }

    pub fn allocate(&self, count: u32) -> Result<Vec<vk::CommandBuffer>, RenderError> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);
        unsafe { self.device.allocate_command_buffers(&alloc_info) }
            .call("vkAllocateCommandBuffers")
    }

    pub fn free(&self, buffers: &[vk::CommandBuffer]) {
        if !buffers.is_empty() {
            unsafe { self.device.free_command_buffers(self.pool, buffers) };
        }
    }

    /// Record with `record`, submit to `queue` and wait for the queue to go
    /// idle. Only for setup work.
    pub fn one_time_submit(
        &self,
        queue: vk::Queue,
        record: impl FnOnce(&ash::Device, vk::CommandBuffer),
    ) -> Result<(), RenderError> {
        let cmd = self.allocate(1)?[0];
        let result = (|| unsafe {
            self.device
                .begin_command_buffer(
                    cmd,
                    &vk::CommandBufferBeginInfo::default()
                        .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT),
                )
                .call("vkBeginCommandBuffer")?;
            record(&self.device, cmd);
            self.device
                .end_command_buffer(cmd)
                .call("vkEndCommandBuffer")?;
            let submit = vk::SubmitInfo::default().command_buffers(std::slice::from_ref(&cmd));
            self.device
                .queue_submit(queue, &[submit], vk::Fence::null())
                .call("vkQueueSubmit")?;
            self.device.queue_wait_idle(queue).call("vkQueueWaitIdle")
        })();
        self.free(&[cmd]);
        result
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe { self.device.destroy_command_pool(self.pool, None) };
    }
}

fn begin(device: &ash::Device, cmd: vk::CommandBuffer) -> Result<(), RenderError> {
    unsafe {
        device
            .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
            .call("vkResetCommandBuffer")?;
        device
            .begin_command_buffer(cmd, &vk::CommandBufferBeginInfo::default())
            .call("vkBeginCommandBuffer")
    }
}

/// Everything the compute command buffer binds.
pub struct ComputeRecording {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub set: vk::DescriptorSet,
    pub image: vk::Image,
    pub extent: vk::Extent2D,
    /// Graphics family to compute family
    pub acquire: OwnershipTransfer,
}

/// Record the ray tracing dispatch. With distinct families the buffer
/// acquires the image from graphics first and releases it back at the end.
pub fn record_compute(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    rec: &ComputeRecording,
) -> Result<(), RenderError> {
    begin(device, cmd)?;
    unsafe {
        if rec.acquire.is_transfer() {
            cmd_image_barrier(device, cmd, rec.image, rec.acquire, compute_acquire_scopes());
        }

        device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::COMPUTE, rec.pipeline);
        device.cmd_bind_descriptor_sets(
            cmd,
            vk::PipelineBindPoint::COMPUTE,
            rec.layout,
            0,
            &[rec.set],
            &[],
        );
        let (groups_x, groups_y) = dispatch_size(rec.extent.width, rec.extent.height, LOCAL_SIZE);
        device.cmd_dispatch(cmd, groups_x, groups_y, 1);

        if rec.acquire.is_transfer() {
            cmd_image_barrier(
                device,
                cmd,
                rec.image,
                rec.acquire.reversed(),
                compute_release_scopes(),
            );
        }

        device.end_command_buffer(cmd).call("vkEndCommandBuffer")
    }
}

/// Everything a graphics command buffer binds.
pub struct GraphicsRecording {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub set: vk::DescriptorSet,
    pub render_pass: vk::RenderPass,
    pub image: vk::Image,
    /// Compute family to graphics family
    pub acquire: OwnershipTransfer,
}

/// Record the full-screen draw sampling the shared image into
/// `framebuffer`. Starts with the compute-write to fragment-read barrier.
pub fn record_graphics(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    rec: &GraphicsRecording,
    framebuffer: vk::Framebuffer,
    extent: vk::Extent2D,
) -> Result<(), RenderError> {
    begin(device, cmd)?;
    unsafe {
        cmd_image_barrier(
            device,
            cmd,
            rec.image,
            rec.acquire,
            graphics_acquire_scopes(rec.acquire),
        );

        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue {
                float32: [0.025, 0.025, 0.025, 1.0],
            },
        }];
        let render_area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };
        let pass_info = vk::RenderPassBeginInfo::default()
            .render_pass(rec.render_pass)
            .framebuffer(framebuffer)
            .render_area(render_area)
            .clear_values(&clear_values);
        device.cmd_begin_render_pass(cmd, &pass_info, vk::SubpassContents::INLINE);

        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        device.cmd_set_viewport(cmd, 0, &[viewport]);
        device.cmd_set_scissor(cmd, 0, &[render_area]);

        device.cmd_bind_descriptor_sets(
            cmd,
            vk::PipelineBindPoint::GRAPHICS,
            rec.layout,
            0,
            &[rec.set],
            &[],
        );
        device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, rec.pipeline);
        device.cmd_draw(cmd, 3, 1, 0, 0);
        device.cmd_end_render_pass(cmd);

        if rec.acquire.is_transfer() {
            cmd_image_barrier(
                device,
                cmd,
                rec.image,
                rec.acquire.reversed(),
                graphics_release_scopes(),
            );
        }

        device.end_command_buffer(cmd).call("vkEndCommandBuffer")
    }
}
