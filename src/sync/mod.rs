//! Compute/graphics interop scheduling.
//!
//! The compute stage writes one shared image; the graphics stage samples it
//! and presents. [`InteropScheduler`] orders the two so the graphics stage
//! never samples a partially written image and the compute stage never
//! overwrites an image still being read. It talks to the GPU only through
//! [`FrameBackend`].

mod fence;
mod frame;
mod image_state;
mod scheduler;

#[cfg(test)]
pub(crate) mod sim;

pub use fence::{FenceState, FenceTracker};
pub use frame::FrameIndex;
pub use image_state::{ImagePhase, SharedImageState};
pub use scheduler::{InteropScheduler, SchedulerOptions};

use std::time::Duration;

use crate::error::RenderError;
use crate::render::ComputeUbo;

/// How long the host may block on the compute completion fence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FenceTimeout {
    /// Block until the device signals, however long that takes
    #[default]
    Unbounded,
    /// Give up after the duration and report the device as lost
    Bounded(Duration),
}

impl FenceTimeout {
    /// Timeout in nanoseconds as the Vulkan wait call expects it
    pub fn as_nanos(&self) -> u64 {
        match self {
            FenceTimeout::Unbounded => u64::MAX,
            FenceTimeout::Bounded(d) => u64::try_from(d.as_nanos()).unwrap_or(u64::MAX),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extent {
    pub width: u32,
    pub height: u32,
}

impl Extent {
    pub fn new(width: u32, height: u32) -> Self {
        Extent { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Result of asking the presentation subsystem for the next target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    Ready { slot: u32, suboptimal: bool },
    OutOfDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    OutOfDate,
}

/// What one call to [`InteropScheduler::advance_frame`] accomplished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented {
        frame: usize,
        slot: u32,
        suboptimal: bool,
    },
    /// The surface must be recreated before the next frame
    SurfaceOutOfDate,
    /// Rendering is suspended (zero-sized surface)
    Skipped,
}

/// GPU operations the scheduler drives.
///
/// Implementations submit work and return without waiting, except for
/// [`wait_compute_fence`](FrameBackend::wait_compute_fence) and
/// [`wait_idle`](FrameBackend::wait_idle).
pub trait FrameBackend {
    /// Number of frames that may be in flight on the graphics side
    fn frames_in_flight(&self) -> usize;

    fn shared_image_extent(&self) -> Extent;

    /// Acquire the next presentation target using the resources of `frame`
    fn acquire(&mut self, frame: usize) -> Result<Acquire, RenderError>;

    /// Submit the graphics work sampling the shared image into `slot`. The
    /// work waits on the device for the latest compute write.
    fn submit_graphics(&mut self, frame: usize, slot: u32) -> Result<(), RenderError>;

    fn present(&mut self, frame: usize, slot: u32) -> Result<PresentOutcome, RenderError>;

    /// Block until the most recent compute submission has completed
    fn wait_compute_fence(&mut self, timeout: FenceTimeout) -> Result<(), RenderError>;

    fn reset_compute_fence(&mut self) -> Result<(), RenderError>;

    fn upload_uniforms(&mut self, ubo: &ComputeUbo) -> Result<(), RenderError>;

    /// Submit the compute work writing the shared image; signals the fence
    fn submit_compute(&mut self) -> Result<(), RenderError>;

    /// Block until the device has no pending work
    fn wait_idle(&mut self) -> Result<(), RenderError>;

    /// Rebuild the presentation targets for a new surface size
    fn recreate_surface(&mut self, extent: Extent) -> Result<(), RenderError>;

    /// Rebuild the shared image (and everything referencing it) at `extent`
    fn recreate_shared_image(&mut self, extent: Extent) -> Result<(), RenderError>;
}
