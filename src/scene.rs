use glam::Vec3;

/// Triangle primitive as laid out in the compute shader's storage buffer.
///
/// The shader declares the block with 16-byte aligned members, so every
/// `vec3` is followed by a 4-byte scalar (or explicit padding).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Triangle {
    pub v0: [f32; 3],
    pub _pad0: i32,
    pub v1: [f32; 3],
    pub _pad1: i32,
    pub v2: [f32; 3],
    /// Identifies the primitive to the shader (hit/shadow tests)
    pub id: u32,
    pub normal: [f32; 3],
    pub distance: f32,
    pub diffuse: [f32; 3],
    pub specular: f32,
}

/// Surface parameters shared by a primitive's shading
#[derive(Debug, Clone, Copy)]
pub struct Material {
    pub diffuse: Vec3,
    pub specular: f32,
}

/// Builds the primitive list and hands out unique primitive ids.
#[derive(Debug, Default)]
pub struct SceneBuilder {
    next_id: u32,
    triangles: Vec<Triangle>,
}

impl SceneBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn triangle(
        &mut self,
        vertices: [Vec3; 3],
        normal: Vec3,
        distance: f32,
        material: Material,
    ) -> &mut Self {
        let id = self.next_id;
        self.next_id += 1;
        self.triangles.push(Triangle {
            v0: vertices[0].into(),
            _pad0: 0,
            v1: vertices[1].into(),
            _pad1: 0,
            v2: vertices[2].into(),
            id,
            normal: normal.into(),
            distance,
            diffuse: material.diffuse.into(),
            specular: material.specular,
        });
        self
    }

    /// Id the next primitive will receive
    pub fn next_id(&self) -> u32 {
        self.next_id
    }

    pub fn build(self) -> Scene {
        Scene {
            triangles: self.triangles,
        }
    }
}

/// Immutable set of primitives uploaded once to the storage buffer
#[derive(Debug, Clone)]
pub struct Scene {
    pub triangles: Vec<Triangle>,
}

impl Scene {
    /// Two facing triangles on the z = -4 plane, green and red.
    pub fn two_triangles() -> Self {
        let mut builder = SceneBuilder::new();
        let facing = Vec3::new(0.0, 0.0, 1.0);
        builder
            .triangle(
                [
                    Vec3::new(-1.0, -1.0, -4.0),
                    Vec3::new(1.0, -1.0, -4.0),
                    Vec3::new(0.0, 1.0, -4.0),
                ],
                facing,
                4.0,
                Material {
                    diffuse: Vec3::new(0.0, 1.0, 0.0),
                    specular: 32.0,
                },
            )
            .triangle(
                [
                    Vec3::new(1.0, 1.0, -4.0),
                    Vec3::new(0.0, 1.0, -4.0),
                    Vec3::new(1.0, 0.0, -4.0),
                ],
                facing,
                4.0,
                Material {
                    diffuse: Vec3::new(1.0, 0.0, 0.0),
                    specular: 32.0,
                },
            );
        builder.build()
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.triangles)
    }

    pub fn byte_size(&self) -> u64 {
        std::mem::size_of_val(self.triangles.as_slice()) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_triangle_matches_shader_layout() {
        assert_eq!(std::mem::size_of::<Triangle>(), 80);
        assert_eq!(std::mem::size_of::<Triangle>() % 16, 0);
        assert_eq!(std::mem::offset_of!(Triangle, v1), 16);
        assert_eq!(std::mem::offset_of!(Triangle, v2), 32);
        assert_eq!(std::mem::offset_of!(Triangle, id), 44);
        assert_eq!(std::mem::offset_of!(Triangle, normal), 48);
        assert_eq!(std::mem::offset_of!(Triangle, distance), 60);
        assert_eq!(std::mem::offset_of!(Triangle, diffuse), 64);
        assert_eq!(std::mem::offset_of!(Triangle, specular), 76);
    }

    #[test]
    fn test_builder_assigns_sequential_ids() {
        let material = Material {
            diffuse: Vec3::ONE,
            specular: 8.0,
        };
        let mut builder = SceneBuilder::new();
        for _ in 0..3 {
            builder.triangle([Vec3::ZERO, Vec3::X, Vec3::Y], Vec3::Z, 0.0, material);
        }
        assert_eq!(builder.next_id(), 3);

        let scene = builder.build();
        let ids: Vec<u32> = scene.triangles.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn test_separate_builders_do_not_share_ids() {
        let a = Scene::two_triangles();
        let b = Scene::two_triangles();
        assert_eq!(a.triangles[0].id, b.triangles[0].id);
        assert_eq!(a.triangles[1].id, 1);
    }

    #[test]
    fn test_two_triangles_scene() {
        let scene = Scene::two_triangles();
        assert_eq!(scene.triangles.len(), 2);
        assert_eq!(scene.byte_size(), 160);
        assert_eq!(scene.as_bytes().len(), 160);
        assert_eq!(scene.triangles[0].diffuse, [0.0, 1.0, 0.0]);
        assert_eq!(scene.triangles[1].diffuse, [1.0, 0.0, 0.0]);
        assert!(scene.triangles.iter().all(|t| t.v0[2] == -4.0));
    }
}
