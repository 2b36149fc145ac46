use log::{debug, info, warn};

use super::{
    Acquire, Extent, FenceState, FenceTimeout, FenceTracker, FrameBackend, FrameIndex,
    FrameOutcome, ImagePhase, PresentOutcome, SharedImageState,
};
use crate::error::RenderError;
use crate::render::UniformState;

#[derive(Debug, Clone, Copy, Default)]
pub struct SchedulerOptions {
    pub fence_timeout: FenceTimeout,
    /// Keep the shared image the same size as the surface
    pub follow_surface: bool,
}

/// Drives one compute write and one graphics read per frame.
///
/// Per frame, in order: acquire a target, submit the graphics read of the
/// latest write, present, wait for that write to complete, reset the fence,
/// upload pending uniforms, submit the next write, advance the frame index.
/// The next write is therefore overlapped with presentation of the current
/// one, and the host never touches the fence or uniform buffer while a
/// compute submission may still be using them.
pub struct InteropScheduler<B: FrameBackend> {
    backend: B,
    uniforms: UniformState,
    options: SchedulerOptions,
    fence: FenceTracker,
    image: SharedImageState,
    frame: FrameIndex,
    surface: Extent,
    primed: bool,
    suspended: bool,
    shut_down: bool,
}

impl<B: FrameBackend> InteropScheduler<B> {
    pub fn new(backend: B, uniforms: UniformState, options: SchedulerOptions, surface: Extent) -> Self {
        let frame = FrameIndex::new(backend.frames_in_flight());
        InteropScheduler {
            backend,
            uniforms,
            options,
            fence: FenceTracker::new_signaled(),
            image: SharedImageState::new(),
            frame,
            surface,
            primed: false,
            suspended: surface.is_empty(),
            shut_down: false,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn uniforms(&self) -> &UniformState {
        &self.uniforms
    }

    pub fn uniforms_mut(&mut self) -> &mut UniformState {
        &mut self.uniforms
    }

    pub fn frame_index(&self) -> &FrameIndex {
        &self.frame
    }

    pub fn fence_state(&self) -> FenceState {
        self.fence.state()
    }

    pub fn image_phase(&self) -> ImagePhase {
        self.image.phase()
    }

    pub fn image_state(&self) -> &SharedImageState {
        &self.image
    }

    pub fn surface(&self) -> Extent {
        self.surface
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    /// Submit the first compute write so the first frame has something to
    /// sample. Called implicitly by the first `advance_frame`.
    pub fn start(&mut self) -> Result<(), RenderError> {
        if self.shut_down {
            return Err(RenderError::ShutDown);
        }
        if self.primed {
            return Ok(());
        }
        self.await_write()?;
        self.submit_write()?;
        self.primed = true;
        debug!("Primed shared image (generation {})", self.image.generation());
        Ok(())
    }

    pub fn advance_frame(&mut self) -> Result<FrameOutcome, RenderError> {
        if self.shut_down {
            return Err(RenderError::ShutDown);
        }
        if self.suspended {
            return Ok(FrameOutcome::Skipped);
        }
        self.start()?;

        let frame = self.frame.current();
        let (slot, acquire_suboptimal) = match self.backend.acquire(frame)? {
            Acquire::Ready { slot, suboptimal } => (slot, suboptimal),
            Acquire::OutOfDate => {
                debug!("Surface out of date on acquire");
                return Ok(FrameOutcome::SurfaceOutOfDate);
            }
        };

        let generation = self.image.record_read()?;
        self.backend.submit_graphics(frame, slot)?;
        let presented = self.backend.present(frame, slot)?;

        // The read above is ordered after the write on the device; the host
        // waits for that same write before reusing the fence.
        self.await_write()?;
        self.submit_write()?;
        self.frame.advance();

        Ok(match presented {
            PresentOutcome::OutOfDate => {
                debug!("Surface out of date on present (generation {})", generation);
                FrameOutcome::SurfaceOutOfDate
            }
            PresentOutcome::Presented | PresentOutcome::Suboptimal => FrameOutcome::Presented {
                frame,
                slot,
                suboptimal: acquire_suboptimal || presented == PresentOutcome::Suboptimal,
            },
        })
    }

    /// Rebuild for a new surface size. A zero-sized surface suspends
    /// rendering until a non-zero size arrives.
    pub fn resize(&mut self, extent: Extent) -> Result<(), RenderError> {
        if self.shut_down {
            return Err(RenderError::ShutDown);
        }
        if extent.is_empty() {
            if !self.suspended {
                info!("Surface minimized, suspending rendering");
            }
            self.suspended = true;
            return Ok(());
        }

        self.drain()?;
        self.backend.recreate_surface(extent)?;
        self.frame.reset(self.backend.frames_in_flight());
        self.uniforms.set_viewport(extent.width, extent.height);
        self.surface = extent;
        self.suspended = false;

        if self.options.follow_surface && self.backend.shared_image_extent() != extent {
            self.backend.recreate_shared_image(extent)?;
            self.image.reset();
            self.primed = false;
            self.start()?;
        }
        info!("Resized to {}x{}", extent.width, extent.height);
        Ok(())
    }

    /// Wait for all outstanding work. Further frames fail with
    /// [`RenderError::ShutDown`].
    pub fn shutdown(&mut self) -> Result<(), RenderError> {
        if self.shut_down {
            return Ok(());
        }
        let drained = self.drain();
        self.shut_down = true;
        drained?;
        info!(
            "Scheduler shut down after {} frames ({} compute writes)",
            self.frame.advanced(),
            self.image.generation()
        );
        Ok(())
    }

    fn drain(&mut self) -> Result<(), RenderError> {
        if self.fence.in_flight() {
            self.await_write()?;
        }
        self.backend.wait_idle()
    }

    fn await_write(&mut self) -> Result<(), RenderError> {
        self.fence.check_wait()?;
        self.backend.wait_compute_fence(self.options.fence_timeout)?;
        self.fence.mark_observed();
        self.image.complete_write();
        Ok(())
    }

    fn submit_write(&mut self) -> Result<(), RenderError> {
        self.fence.check_reset()?;
        self.backend.reset_compute_fence()?;
        self.fence.mark_reset();

        if let Some(ubo) = self.uniforms.take_dirty() {
            if let Err(e) = self.backend.upload_uniforms(&ubo) {
                self.uniforms.mark_dirty();
                return Err(e);
            }
        }

        self.fence.check_submit()?;
        self.image.begin_write()?;
        self.backend.submit_compute()?;
        self.fence.mark_submitted();
        Ok(())
    }
}

impl<B: FrameBackend> Drop for InteropScheduler<B> {
    fn drop(&mut self) {
        if !self.shut_down {
            if let Err(e) = self.shutdown() {
                warn!("Failed to drain device before teardown: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::SceneConfig;
    use crate::sync::sim::{Event, SimDevice};

    fn scheduler(device: SimDevice, options: SchedulerOptions) -> InteropScheduler<SimDevice> {
        let uniforms = UniformState::new(&SceneConfig::default(), 720, 720);
        InteropScheduler::new(device, uniforms, options, Extent::new(720, 720))
    }

    #[test]
    fn test_every_read_sees_a_completed_write() {
        let device = SimDevice::new(2, 3, Extent::new(64, 64));
        let log = device.log();
        let mut sched = scheduler(device, SchedulerOptions::default());

        for _ in 0..20 {
            assert!(matches!(
                sched.advance_frame().unwrap(),
                FrameOutcome::Presented { .. }
            ));
        }
        sched.shutdown().unwrap();

        let log = log.borrow();
        let mut reads = 0;
        for event in log.iter() {
            if let Event::GraphicsRead {
                generation,
                at,
                write_completed_at,
                ..
            } = *event
            {
                assert!(generation >= 1);
                assert!(write_completed_at < at);
                reads += 1;
            }
        }
        assert_eq!(reads, 20);
    }

    #[test]
    fn test_compute_not_submitted_while_previous_write_pending() {
        let device = SimDevice::new(2, 3, Extent::new(64, 64));
        let log = device.log();
        let mut sched = scheduler(device, SchedulerOptions::default());
        for _ in 0..10 {
            sched.advance_frame().unwrap();
        }

        // Between two submissions there is a completion of the first one
        let log = log.borrow();
        let mut pending: Option<u64> = None;
        for event in log.iter() {
            match *event {
                Event::ComputeSubmitted { generation, .. } => {
                    assert!(pending.is_none(), "overlapping compute writes");
                    pending = Some(generation);
                }
                Event::ComputeCompleted { generation, .. } => {
                    assert_eq!(pending.take(), Some(generation));
                }
                _ => {}
            }
        }
    }

    #[test]
    fn test_fence_reset_once_per_observation() {
        let device = SimDevice::new(2, 3, Extent::new(64, 64));
        let log = device.log();
        let mut sched = scheduler(device, SchedulerOptions::default());
        for _ in 0..8 {
            sched.advance_frame().unwrap();
        }

        let log = log.borrow();
        let mut waited = false;
        for event in log.iter() {
            match event {
                Event::FenceWaited => waited = true,
                Event::FenceReset => {
                    assert!(waited, "reset without an observed signal");
                    waited = false;
                }
                _ => {}
            }
        }
        // One prime plus one per frame
        assert_eq!(sched.backend().fence_resets(), 9);
    }

    #[test]
    fn test_uniforms_uploaded_only_between_wait_and_submit() {
        let device = SimDevice::new(2, 3, Extent::new(64, 64));
        let log = device.log();
        let mut sched = scheduler(device, SchedulerOptions::default());
        sched.advance_frame().unwrap();
        sched.uniforms_mut().mark_dirty();
        sched.advance_frame().unwrap();
        sched.advance_frame().unwrap();

        let log = log.borrow();
        let uploads: Vec<usize> = log
            .iter()
            .enumerate()
            .filter(|(_, e)| matches!(e, Event::UniformsUploaded))
            .map(|(i, _)| i)
            .collect();
        // Initial state plus the explicit change; the unchanged frame skips it
        assert_eq!(uploads.len(), 2);
        for i in uploads {
            assert!(matches!(log[i - 1], Event::FenceReset));
            assert!(matches!(log[i + 1], Event::ComputeSubmitted { .. }));
        }
    }

    #[test]
    fn test_frame_index_cycles() {
        let device = SimDevice::new(3, 3, Extent::new(64, 64));
        let log = device.log();
        let mut sched = scheduler(device, SchedulerOptions::default());
        for _ in 0..7 {
            sched.advance_frame().unwrap();
        }
        let frames: Vec<usize> = log
            .borrow()
            .iter()
            .filter_map(|e| match e {
                Event::Acquired { frame, .. } => Some(*frame),
                _ => None,
            })
            .collect();
        assert_eq!(frames, vec![0, 1, 2, 0, 1, 2, 0]);
        assert_eq!(sched.frame_index().current(), 1);
    }

    #[test]
    fn test_out_of_date_acquire_submits_nothing() {
        let mut device = SimDevice::new(2, 3, Extent::new(64, 64));
        device.script_acquire(Acquire::OutOfDate);
        let log = device.log();
        let mut sched = scheduler(device, SchedulerOptions::default());

        assert_eq!(sched.advance_frame().unwrap(), FrameOutcome::SurfaceOutOfDate);
        assert_eq!(sched.frame_index().current(), 0);
        assert!(!log
            .borrow()
            .iter()
            .any(|e| matches!(e, Event::GraphicsRead { .. })));

        // The primed write is still pending and gets consumed next frame
        assert_eq!(sched.fence_state(), FenceState::InFlight);
        assert!(matches!(
            sched.advance_frame().unwrap(),
            FrameOutcome::Presented { frame: 0, .. }
        ));
    }

    #[test]
    fn test_out_of_date_present_still_recycles_compute() {
        let mut device = SimDevice::new(2, 3, Extent::new(64, 64));
        device.script_present(PresentOutcome::OutOfDate);
        let mut sched = scheduler(device, SchedulerOptions::default());

        assert_eq!(sched.advance_frame().unwrap(), FrameOutcome::SurfaceOutOfDate);
        assert_eq!(sched.image_state().generation(), 2);
        assert_eq!(sched.frame_index().current(), 1);
    }

    #[test]
    fn test_suboptimal_is_reported() {
        let mut device = SimDevice::new(2, 3, Extent::new(64, 64));
        device.script_present(PresentOutcome::Suboptimal);
        let mut sched = scheduler(device, SchedulerOptions::default());
        assert!(matches!(
            sched.advance_frame().unwrap(),
            FrameOutcome::Presented {
                suboptimal: true,
                ..
            }
        ));
    }

    #[test]
    fn test_resize_drains_and_resets_frame_index() {
        let device = SimDevice::new(2, 3, Extent::new(64, 64));
        let log = device.log();
        let mut sched = scheduler(device, SchedulerOptions::default());
        sched.advance_frame().unwrap();
        assert_eq!(sched.frame_index().current(), 1);

        sched.resize(Extent::new(1280, 720)).unwrap();
        assert_eq!(sched.frame_index().current(), 0);
        assert!((sched.uniforms().aspect_ratio() - 1280.0 / 720.0).abs() < 1e-6);
        // Fixed-size shared image is kept
        assert_eq!(sched.backend().shared_image_extent(), Extent::new(64, 64));

        let log = log.borrow();
        let recreate = log
            .iter()
            .position(|e| matches!(e, Event::SurfaceRecreated(_)))
            .expect("surface recreated");
        assert!(matches!(log[recreate - 1], Event::Drained));
        drop(log);

        // The next write carries the new aspect ratio to the device
        sched.advance_frame().unwrap();
        let uploaded = sched.backend().uniforms().expect("uniforms uploaded");
        assert!((uploaded.aspect_ratio - 1280.0 / 720.0).abs() < 1e-6);
    }

    #[test]
    fn test_resize_with_follow_surface_recreates_image_and_primes() {
        let device = SimDevice::new(2, 3, Extent::new(720, 720));
        let log = device.log();
        let options = SchedulerOptions {
            follow_surface: true,
            ..SchedulerOptions::default()
        };
        let mut sched = scheduler(device, options);
        sched.advance_frame().unwrap();

        sched.resize(Extent::new(800, 600)).unwrap();
        assert_eq!(sched.backend().shared_image_extent(), Extent::new(800, 600));
        assert_eq!(sched.image_phase(), ImagePhase::Writing);
        sched.advance_frame().unwrap();

        // Same size again: nothing to rebuild
        sched.resize(Extent::new(800, 600)).unwrap();
        let recreations = log
            .borrow()
            .iter()
            .filter(|e| matches!(e, Event::SharedImageRecreated(_)))
            .count();
        assert_eq!(recreations, 1);
    }

    #[test]
    fn test_zero_extent_suspends_until_restored() {
        let device = SimDevice::new(2, 3, Extent::new(64, 64));
        let mut sched = scheduler(device, SchedulerOptions::default());
        sched.advance_frame().unwrap();

        sched.resize(Extent::new(0, 0)).unwrap();
        assert_eq!(sched.advance_frame().unwrap(), FrameOutcome::Skipped);
        assert_eq!(sched.advance_frame().unwrap(), FrameOutcome::Skipped);

        sched.resize(Extent::new(640, 480)).unwrap();
        assert!(matches!(
            sched.advance_frame().unwrap(),
            FrameOutcome::Presented { .. }
        ));
    }

    #[test]
    fn test_shutdown_leaves_no_pending_work() {
        let device = SimDevice::new(2, 3, Extent::new(64, 64));
        let mut sched = scheduler(device, SchedulerOptions::default());
        for _ in 0..3 {
            sched.advance_frame().unwrap();
        }
        sched.shutdown().unwrap();
        assert!(!sched.backend().has_pending_work());
        assert!(matches!(sched.advance_frame(), Err(RenderError::ShutDown)));
        assert!(matches!(
            sched.resize(Extent::new(10, 10)),
            Err(RenderError::ShutDown)
        ));
        // Idempotent
        sched.shutdown().unwrap();
    }

    #[test]
    fn test_drop_drains_before_device_teardown() {
        let device = SimDevice::new(2, 3, Extent::new(64, 64));
        let log = device.log();
        {
            let mut sched = scheduler(device, SchedulerOptions::default());
            sched.advance_frame().unwrap();
        }
        let log = log.borrow();
        let n = log.len();
        assert_eq!(log[n - 1], Event::Destroyed { pending_work: false });
        assert_eq!(log[n - 2], Event::Drained);
    }

    #[test]
    fn test_bounded_timeout_reports_fence_timeout() {
        let mut device = SimDevice::new(2, 3, Extent::new(64, 64));
        device.hang_compute_from(1);
        let options = SchedulerOptions {
            fence_timeout: FenceTimeout::Bounded(Duration::from_millis(5)),
            ..SchedulerOptions::default()
        };
        let mut sched = scheduler(device, options);
        // Prime succeeds, the first frame waits on the hung write
        let err = sched.advance_frame().unwrap_err();
        assert!(matches!(err, RenderError::FenceTimeout(d) if d == Duration::from_millis(5)));
        assert!(err.is_device_lost());
    }

    #[test]
    fn test_single_frame_in_flight() {
        let device = SimDevice::new(1, 2, Extent::new(64, 64));
        let mut sched = scheduler(device, SchedulerOptions::default());
        for _ in 0..4 {
            assert!(matches!(
                sched.advance_frame().unwrap(),
                FrameOutcome::Presented { frame: 0, .. }
            ));
        }
    }

    #[test]
    fn test_created_with_empty_surface_starts_suspended() {
        let device = SimDevice::new(2, 3, Extent::new(64, 64));
        let uniforms = UniformState::new(&SceneConfig::default(), 720, 720);
        let mut sched =
            InteropScheduler::new(device, uniforms, SchedulerOptions::default(), Extent::new(0, 0));
        assert!(sched.is_suspended());
        assert_eq!(sched.advance_frame().unwrap(), FrameOutcome::Skipped);
        assert_eq!(sched.backend().compute_submissions(), 0);
    }
}
