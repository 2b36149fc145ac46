//! winit application shell around the interop scheduler.

use std::time::Instant;

use winit::application::ApplicationHandler;
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowId};

use crate::config::AppConfig;
use crate::error::RenderError;
use crate::render::UniformState;
use crate::scene::Scene;
use crate::sync::{Extent, FrameOutcome, InteropScheduler, SchedulerOptions};
use crate::vk::VulkanBackend;

/// Frames averaged per timing report
const STATS_WINDOW: u32 = 30;

/// Rolling frame time average, reported every [`STATS_WINDOW`] frames.
#[derive(Debug, Default)]
pub struct FrameStats {
    count: u32,
    sum_ms: f32,
    total: u64,
}

impl FrameStats {
    /// Record one frame time. Returns `(average ms, fps)` when a window
    /// completes.
    pub fn record(&mut self, frame_ms: f32) -> Option<(f32, f32)> {
        self.count += 1;
        self.total += 1;
        self.sum_ms += frame_ms;
        if self.count < STATS_WINDOW {
            return None;
        }
        let avg = self.sum_ms / self.count as f32;
        self.count = 0;
        self.sum_ms = 0.0;
        let fps = if avg > 0.0 { 1000.0 / avg } else { 0.0 };
        Some((avg, fps))
    }

    pub fn total(&self) -> u64 {
        self.total
    }
}

struct Renderer {
    scheduler: InteropScheduler<VulkanBackend>,
    stats: FrameStats,
    last_time: Instant,
}

impl Renderer {
    fn new(window: &Window, config: &AppConfig, scene: &Scene) -> Result<Self, RenderError> {
        let backend = VulkanBackend::new(window, config, scene)?;
        let surface = backend.surface_extent();
        let uniforms = UniformState::new(&config.scene, surface.width, surface.height);
        let options = SchedulerOptions {
            fence_timeout: config.render.fence_timeout(),
            follow_surface: config.render.follow_surface,
        };
        let mut scheduler = InteropScheduler::new(backend, uniforms, options, surface);
        scheduler.start()?;
        Ok(Renderer {
            scheduler,
            stats: FrameStats::default(),
            last_time: Instant::now(),
        })
    }

    fn render_frame(&mut self) -> Result<FrameOutcome, RenderError> {
        let now = Instant::now();
        let dt = now.duration_since(self.last_time).as_secs_f32();
        self.last_time = now;

        if let Some((avg_ms, fps)) = self.stats.record(dt * 1000.0) {
            log::info!(
                "[Frame {:<6}] {:.2} ms/frame ({:.1} FPS)",
                self.stats.total(),
                avg_ms,
                fps
            );
        }

        self.scheduler.uniforms_mut().update(dt);
        self.scheduler.advance_frame()
    }
}

/// Field order matters: the renderer owns the surface and must drop before
/// the window.
pub struct App {
    config: AppConfig,
    scene: Scene,
    renderer: Option<Renderer>,
    window: Option<Window>,
    error: Option<Box<dyn std::error::Error>>,
}

impl App {
    pub fn new(config: AppConfig, scene: Scene) -> Self {
        App {
            config,
            scene,
            renderer: None,
            window: None,
            error: None,
        }
    }

    /// Run the event loop until the window closes or rendering fails.
    pub fn run(mut self) -> Result<(), Box<dyn std::error::Error>> {
        let event_loop = EventLoop::new()?;
        event_loop.run_app(&mut self)?;
        match self.error.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: Box<dyn std::error::Error>) {
        log::error!("{}", error);
        self.error.get_or_insert(error);
        self.shutdown();
        event_loop.exit();
    }

    fn shutdown(&mut self) {
        if let Some(mut renderer) = self.renderer.take() {
            if let Err(e) = renderer.scheduler.shutdown() {
                log::warn!("Shutdown failed: {}", e);
            }
        }
    }

    fn resize_to_window(&mut self) -> Result<(), RenderError> {
        let (Some(renderer), Some(window)) = (self.renderer.as_mut(), self.window.as_ref()) else {
            return Ok(());
        };
        let size = window.inner_size();
        renderer
            .scheduler
            .resize(Extent::new(size.width, size.height))
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let attrs = Window::default_attributes()
            .with_title(self.config.window.title.clone())
            .with_inner_size(winit::dpi::LogicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));
        let window = match event_loop.create_window(attrs) {
            Ok(window) => window,
            Err(e) => return self.fail(event_loop, Box::new(RenderError::Window(e.to_string()))),
        };

        match Renderer::new(&window, &self.config, &self.scene) {
            Ok(renderer) => self.renderer = Some(renderer),
            Err(e) => return self.fail(event_loop, Box::new(e)),
        }
        window.request_redraw();
        self.window = Some(window);
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                self.shutdown();
                event_loop.exit();
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(key_code),
                        state: ElementState::Pressed,
                        ..
                    },
                ..
            } => match key_code {
                KeyCode::Escape => {
                    self.shutdown();
                    event_loop.exit();
                }
                KeyCode::KeyP => {
                    if let Some(renderer) = self.renderer.as_mut() {
                        let paused = renderer.scheduler.uniforms_mut().toggle_pause();
                        log::info!("Animation {}", if paused { "paused" } else { "resumed" });
                    }
                }
                _ => {}
            },
            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                if let Err(e) = self.resize_to_window() {
                    return self.fail(event_loop, Box::new(e));
                }
                if let Some(window) = self.window.as_ref() {
                    window.request_redraw();
                }
            }
            WindowEvent::RedrawRequested => {
                let Some(renderer) = self.renderer.as_mut() else {
                    return;
                };
                let outcome = match renderer.render_frame() {
                    Ok(outcome) => outcome,
                    Err(e) => return self.fail(event_loop, Box::new(e)),
                };
                log::trace!("{:?}", outcome);

                let stale = matches!(
                    outcome,
                    FrameOutcome::SurfaceOutOfDate
                        | FrameOutcome::Presented {
                            suboptimal: true,
                            ..
                        }
                );
                if stale {
                    if let Err(e) = self.resize_to_window() {
                        return self.fail(event_loop, Box::new(e));
                    }
                }
                // A suspended renderer waits for the next resize instead
                if outcome != FrameOutcome::Skipped {
                    if let Some(window) = self.window.as_ref() {
                        window.request_redraw();
                    }
                }
            }
            _ => {}
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_report_every_window() {
        let mut stats = FrameStats::default();
        for _ in 0..STATS_WINDOW - 1 {
            assert!(stats.record(10.0).is_none());
        }
        let (avg, fps) = stats.record(10.0).unwrap();
        assert!((avg - 10.0).abs() < 1e-4);
        assert!((fps - 100.0).abs() < 1e-2);
        assert_eq!(stats.total(), STATS_WINDOW as u64);

        // The window restarts after a report
        assert!(stats.record(20.0).is_none());
    }

    #[test]
    fn test_stats_average_mixed_frames() {
        let mut stats = FrameStats::default();
        let mut report = None;
        for i in 0..STATS_WINDOW {
            report = stats.record(if i % 2 == 0 { 5.0 } else { 15.0 });
        }
        let (avg, _) = report.unwrap();
        assert!((avg - 10.0).abs() < 1e-4);
    }

    #[test]
    fn test_stats_zero_frame_time() {
        let mut stats = FrameStats::default();
        let mut report = None;
        for _ in 0..STATS_WINDOW {
            report = stats.record(0.0);
        }
        assert_eq!(report, Some((0.0, 0.0)));
    }
}
