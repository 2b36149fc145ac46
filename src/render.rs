use glam::Vec3;

use crate::config::SceneConfig;

pub const COLOR_FORMAT: ash::vk::Format = ash::vk::Format::R8G8B8A8_UNORM;

/// Compute shader uniform block (binding 1), std140.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ComputeUbo {
    pub light_pos: [f32; 3],
    pub aspect_ratio: f32,
    pub fog_color: [f32; 4],
    pub camera_pos: [f32; 3],
    pub _pad0: f32,
    pub camera_look_at: [f32; 3],
    pub camera_fov: f32,
}

/// Host-side state behind the compute uniform block.
///
/// Changes mark the state dirty; the scheduler uploads it only between a
/// fence observation and the next compute submission.
pub struct UniformState {
    light_pos: Vec3,
    fog_color: [f32; 4],
    camera_pos: Vec3,
    camera_look_at: Vec3,
    camera_fov: f32,
    aspect_ratio: f32,
    orbit: Option<LightOrbit>,
    paused: bool,
    dirty: bool,
}

struct LightOrbit {
    radius: f32,
    speed: f32,
    angle: f32,
}

impl UniformState {
    pub fn new(scene: &SceneConfig, width: u32, height: u32) -> Self {
        let orbit = scene.light_orbit.enabled.then(|| LightOrbit {
            radius: scene.light_orbit.radius,
            speed: scene.light_orbit.speed,
            angle: 0.0,
        });
        UniformState {
            light_pos: Vec3::from(scene.light_position),
            fog_color: scene.fog_color,
            camera_pos: Vec3::from(scene.camera.position),
            camera_look_at: Vec3::from(scene.camera.look_at),
            camera_fov: scene.camera.fov,
            aspect_ratio: aspect(width, height),
            orbit,
            paused: false,
            dirty: true,
        }
    }

    /// Recompute the aspect ratio for a new viewport. Zero-sized viewports
    /// are ignored.
    pub fn set_viewport(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        let ratio = aspect(width, height);
        if ratio != self.aspect_ratio {
            self.aspect_ratio = ratio;
            self.dirty = true;
        }
    }

    pub fn aspect_ratio(&self) -> f32 {
        self.aspect_ratio
    }

    /// Advance the light animation by `dt` seconds unless paused.
    pub fn update(&mut self, dt: f32) {
        if self.paused {
            return;
        }
        if let Some(orbit) = self.orbit.as_mut() {
            orbit.angle += orbit.speed * std::f32::consts::TAU * dt;
            if orbit.angle > std::f32::consts::TAU {
                orbit.angle -= std::f32::consts::TAU;
            }
            self.light_pos = Vec3::new(
                orbit.angle.sin() * orbit.radius,
                orbit.angle.cos() * orbit.radius,
                orbit.angle.sin() * orbit.radius,
            );
            self.dirty = true;
        }
    }

    pub fn toggle_pause(&mut self) -> bool {
        self.paused = !self.paused;
        self.paused
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Returns the block to upload if anything changed since the last call.
    pub fn take_dirty(&mut self) -> Option<ComputeUbo> {
        if self.dirty {
            self.dirty = false;
            Some(self.to_ubo())
        } else {
            None
        }
    }

    pub fn to_ubo(&self) -> ComputeUbo {
        ComputeUbo {
            light_pos: self.light_pos.into(),
            aspect_ratio: self.aspect_ratio,
            fog_color: self.fog_color,
            camera_pos: self.camera_pos.into(),
            _pad0: 0.0,
            camera_look_at: self.camera_look_at.into(),
            camera_fov: self.camera_fov,
        }
    }
}

fn aspect(width: u32, height: u32) -> f32 {
    width as f32 / height.max(1) as f32
}

/// Workgroup counts covering `extent` with `local_size` square groups.
pub fn dispatch_size(width: u32, height: u32, local_size: u32) -> (u32, u32) {
    (width.div_ceil(local_size), height.div_ceil(local_size))
}
