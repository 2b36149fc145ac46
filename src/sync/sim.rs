//! Simulated device for scheduler tests.
//!
//! Work executes in submission order on a logical clock. Host-side misuse
//! that Vulkan leaves undefined (resetting a fence whose submission is
//! pending, writing uniforms a running dispatch reads, recreating resources
//! with work in flight) panics so a test fails at the offending call.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use super::{Acquire, Extent, FenceTimeout, FrameBackend, PresentOutcome};
use crate::error::RenderError;
use crate::render::ComputeUbo;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Event {
    Acquired { frame: usize, slot: u32 },
    GraphicsRead {
        slot: u32,
        generation: u64,
        at: u64,
        write_completed_at: u64,
    },
    Presented { slot: u32 },
    FenceWaited,
    FenceReset,
    UniformsUploaded,
    ComputeSubmitted { generation: u64, at: u64 },
    ComputeCompleted { generation: u64, at: u64 },
    Drained,
    SurfaceRecreated(Extent),
    SharedImageRecreated(Extent),
    Destroyed { pending_work: bool },
}

#[derive(Debug, Clone, Copy)]
struct PendingWrite {
    generation: u64,
    hung: bool,
}

pub struct SimDevice {
    log: Rc<RefCell<Vec<Event>>>,
    clock: u64,
    frames_in_flight: usize,
    image_count: u32,
    next_slot: u32,
    extent: Extent,
    fence_signaled: bool,
    pending: Option<PendingWrite>,
    generation: u64,
    last_completed: Option<(u64, u64)>,
    fence_resets: u64,
    compute_submissions: u64,
    hang_from: Option<u64>,
    acquire_script: VecDeque<Acquire>,
    present_script: VecDeque<PresentOutcome>,
    uniforms: Option<ComputeUbo>,
}

impl SimDevice {
    pub fn new(frames_in_flight: usize, image_count: u32, extent: Extent) -> Self {
        SimDevice {
            log: Rc::new(RefCell::new(Vec::new())),
            clock: 0,
            frames_in_flight,
            image_count,
            next_slot: 0,
            extent,
            fence_signaled: true,
            pending: None,
            generation: 0,
            last_completed: None,
            fence_resets: 0,
            compute_submissions: 0,
            hang_from: None,
            acquire_script: VecDeque::new(),
            present_script: VecDeque::new(),
            uniforms: None,
        }
    }

    pub fn log(&self) -> Rc<RefCell<Vec<Event>>> {
        Rc::clone(&self.log)
    }

    /// Queue a result for the next acquire instead of the default round robin
    pub fn script_acquire(&mut self, result: Acquire) {
        self.acquire_script.push_back(result);
    }

    pub fn script_present(&mut self, result: PresentOutcome) {
        self.present_script.push_back(result);
    }

    /// Compute submissions numbered `n` and later (1-based) never complete
    pub fn hang_compute_from(&mut self, n: u64) {
        self.hang_from = Some(n);
    }

    pub fn fence_resets(&self) -> u64 {
        self.fence_resets
    }

    pub fn compute_submissions(&self) -> u64 {
        self.compute_submissions
    }

    pub fn has_pending_work(&self) -> bool {
        self.pending.is_some()
    }

    pub fn uniforms(&self) -> Option<&ComputeUbo> {
        self.uniforms.as_ref()
    }

    fn record(&self, event: Event) {
        self.log.borrow_mut().push(event);
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn run_pending(&mut self) {
        let Some(write) = self.pending else {
            return;
        };
        if write.hung {
            return;
        }
        let at = self.tick();
        self.record(Event::ComputeCompleted {
            generation: write.generation,
            at,
        });
        self.last_completed = Some((write.generation, at));
        self.fence_signaled = true;
        self.pending = None;
    }
}

impl FrameBackend for SimDevice {
    fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    fn shared_image_extent(&self) -> Extent {
        self.extent
    }

    fn acquire(&mut self, frame: usize) -> Result<Acquire, RenderError> {
        assert!(frame < self.frames_in_flight, "frame index {} out of range", frame);
        let result = self.acquire_script.pop_front().unwrap_or_else(|| {
            let slot = self.next_slot;
            self.next_slot = (self.next_slot + 1) % self.image_count;
            Acquire::Ready {
                slot,
                suboptimal: false,
            }
        });
        if let Acquire::Ready { slot, .. } = result {
            self.record(Event::Acquired { frame, slot });
        }
        Ok(result)
    }

    fn submit_graphics(&mut self, frame: usize, slot: u32) -> Result<(), RenderError> {
        assert!(frame < self.frames_in_flight);
        assert!(self.generation > 0, "graphics read before any compute write");

        // The read waits on the device for the latest write
        self.run_pending();
        if self.pending.is_some() {
            return Ok(());
        }
        let (generation, completed_at) = self
            .last_completed
            .expect("a completed write exists when nothing is pending");
        assert_eq!(generation, self.generation, "read would see a stale image");
        let at = self.tick();
        self.record(Event::GraphicsRead {
            slot,
            generation,
            at,
            write_completed_at: completed_at,
        });
        Ok(())
    }

    fn present(&mut self, _frame: usize, slot: u32) -> Result<PresentOutcome, RenderError> {
        self.record(Event::Presented { slot });
        Ok(self
            .present_script
            .pop_front()
            .unwrap_or(PresentOutcome::Presented))
    }

    fn wait_compute_fence(&mut self, timeout: FenceTimeout) -> Result<(), RenderError> {
        assert!(
            self.fence_signaled || self.pending.is_some(),
            "wait on a reset fence with nothing submitted"
        );
        self.run_pending();
        if self.fence_signaled {
            self.record(Event::FenceWaited);
            return Ok(());
        }
        match timeout {
            FenceTimeout::Bounded(limit) => Err(RenderError::FenceTimeout(limit)),
            FenceTimeout::Unbounded => panic!("unbounded wait on a fence that never signals"),
        }
    }

    fn reset_compute_fence(&mut self) -> Result<(), RenderError> {
        assert!(self.pending.is_none(), "fence reset while its submission is pending");
        assert!(self.fence_signaled, "fence reset twice");
        self.fence_signaled = false;
        self.fence_resets += 1;
        self.record(Event::FenceReset);
        Ok(())
    }

    fn upload_uniforms(&mut self, ubo: &ComputeUbo) -> Result<(), RenderError> {
        assert!(self.pending.is_none(), "uniforms written while a dispatch reads them");
        self.uniforms = Some(*ubo);
        self.record(Event::UniformsUploaded);
        Ok(())
    }

    fn submit_compute(&mut self) -> Result<(), RenderError> {
        assert!(!self.fence_signaled, "compute submitted with a signaled fence");
        assert!(self.pending.is_none(), "overlapping compute writes");
        self.generation += 1;
        self.compute_submissions += 1;
        let hung = self
            .hang_from
            .is_some_and(|n| self.compute_submissions >= n);
        let at = self.tick();
        self.record(Event::ComputeSubmitted {
            generation: self.generation,
            at,
        });
        self.pending = Some(PendingWrite {
            generation: self.generation,
            hung,
        });
        Ok(())
    }

    fn wait_idle(&mut self) -> Result<(), RenderError> {
        self.run_pending();
        if self.pending.is_some() {
            return Err(RenderError::Vulkan {
                call: "vkDeviceWaitIdle",
                result: ash::vk::Result::ERROR_DEVICE_LOST,
            });
        }
        self.record(Event::Drained);
        Ok(())
    }

    fn recreate_surface(&mut self, extent: Extent) -> Result<(), RenderError> {
        assert!(self.pending.is_none(), "surface recreated with work in flight");
        self.next_slot = 0;
        self.record(Event::SurfaceRecreated(extent));
        Ok(())
    }

    fn recreate_shared_image(&mut self, extent: Extent) -> Result<(), RenderError> {
        assert!(self.pending.is_none(), "shared image recreated with work in flight");
        self.extent = extent;
        self.record(Event::SharedImageRecreated(extent));
        Ok(())
    }
}

impl Drop for SimDevice {
    fn drop(&mut self) {
        let pending_work = self.pending.is_some();
        self.record(Event::Destroyed { pending_work });
    }
}
