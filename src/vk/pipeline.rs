use ash::vk;
use std::path::Path;

use crate::error::{RenderError, VkResultExt};

pub const COMPUTE_SHADER: &str = "raytracing.comp.spv";
pub const VERTEX_SHADER: &str = "texture.vert.spv";
pub const FRAGMENT_SHADER: &str = "texture.frag.spv";

/// Read a SPIR-V file from `dir`.
pub fn load_spirv(dir: &Path, name: &str) -> Result<Vec<u32>, RenderError> {
    let path = dir.join(name);
    let mut file = std::fs::File::open(&path).map_err(|source| RenderError::ShaderLoad {
        path: path.clone(),
        source,
    })?;
    ash::util::read_spv(&mut file).map_err(|source| RenderError::ShaderLoad { path, source })
}

/// Shader module that is destroyed once the pipeline using it is built.
struct ShaderModule<'a> {
    device: &'a ash::Device,
    module: vk::ShaderModule,
}

impl<'a> ShaderModule<'a> {
    fn load(device: &'a ash::Device, dir: &Path, name: &str) -> Result<Self, RenderError> {
        let code = load_spirv(dir, name)?;
        let module = create_shader_module(device, &code)?;
        Ok(ShaderModule { device, module })
    }
}

impl Drop for ShaderModule<'_> {
    fn drop(&mut self) {
        unsafe { self.device.destroy_shader_module(self.module, None) };
    }
}

fn create_shader_module(device: &ash::Device, code: &[u32]) -> Result<vk::ShaderModule, RenderError> {
    let create_info = vk::ShaderModuleCreateInfo::default().code(code);
    unsafe { device.create_shader_module(&create_info, None) }.call("vkCreateShaderModule")
}

fn create_layout(
    device: &ash::Device,
    set_layout: vk::DescriptorSetLayout,
) -> Result<vk::PipelineLayout, RenderError> {
    let layouts = [set_layout];
    let info = vk::PipelineLayoutCreateInfo::default().set_layouts(&layouts);
    unsafe { device.create_pipeline_layout(&info, None) }.call("vkCreatePipelineLayout")
}

/// A pipeline together with its layout.
pub struct Pipeline {
    device: ash::Device,
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
}

impl Pipeline {
    pub fn compute(
        device: &ash::Device,
        set_layout: vk::DescriptorSetLayout,
        shader_dir: &Path,
    ) -> Result<Self, RenderError> {
        let shader = ShaderModule::load(device, shader_dir, COMPUTE_SHADER)?;
        let mut pipeline = Pipeline {
            device: device.clone(),
            pipeline: vk::Pipeline::null(),
            layout: create_layout(device, set_layout)?,
        };

        let stage = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(shader.module)
            .name(c"main");
        let info = vk::ComputePipelineCreateInfo::default()
            .stage(stage)
            .layout(pipeline.layout);

        pipeline.pipeline = unsafe {
            device
                .create_compute_pipelines(vk::PipelineCache::null(), &[info], None)
                .map_err(|(_, err)| err)
                .call("vkCreateComputePipelines")?[0]
        };
        log::debug!("Compute pipeline created");
        Ok(pipeline)
    }

    /// Full-screen triangle pipeline sampling the shared image. The vertex
    /// shader generates its own positions, so there is no vertex input.
    pub fn graphics(
        device: &ash::Device,
        set_layout: vk::DescriptorSetLayout,
        render_pass: vk::RenderPass,
        shader_dir: &Path,
    ) -> Result<Self, RenderError> {
        let vert = ShaderModule::load(device, shader_dir, VERTEX_SHADER)?;
        let frag = ShaderModule::load(device, shader_dir, FRAGMENT_SHADER)?;
        let mut pipeline = Pipeline {
            device: device.clone(),
            pipeline: vk::Pipeline::null(),
            layout: create_layout(device, set_layout)?,
        };

        let stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vert.module)
                .name(c"main"),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(frag.module)
                .name(c"main"),
        ];

        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default();
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST);
        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(vk::CullModeFlags::FRONT)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .line_width(1.0);
        let blend_attachments = [vk::PipelineColorBlendAttachmentState::default()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(false)];
        let color_blend =
            vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(false)
            .depth_write_enable(false);
        let viewport = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);
        let multisample = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);
        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .rasterization_state(&rasterization)
            .color_blend_state(&color_blend)
            .depth_stencil_state(&depth_stencil)
            .viewport_state(&viewport)
            .multisample_state(&multisample)
            .dynamic_state(&dynamic)
            .layout(pipeline.layout)
            .render_pass(render_pass)
            .subpass(0);

        pipeline.pipeline = unsafe {
            device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[info], None)
                .map_err(|(_, err)| err)
                .call("vkCreateGraphicsPipelines")?[0]
        };
        log::debug!("Graphics pipeline created");
        Ok(pipeline)
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline(self.pipeline, None);
            self.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_shader_names_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_spirv(dir.path(), COMPUTE_SHADER).unwrap_err();
        match err {
            RenderError::ShaderLoad { path, .. } => {
                assert_eq!(path, dir.path().join(COMPUTE_SHADER));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_reads_spirv_words() {
        let dir = tempfile::tempdir().unwrap();
        // SPIR-V magic followed by one word
        let bytes: Vec<u8> = [0x0723_0203u32, 42]
            .iter()
            .flat_map(|w| w.to_le_bytes())
            .collect();
        std::fs::write(dir.path().join("tiny.spv"), bytes).unwrap();
        let words = load_spirv(dir.path(), "tiny.spv").unwrap();
        assert_eq!(words, vec![0x0723_0203, 42]);
    }

    #[test]
    fn test_rejects_truncated_spirv() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.spv"), [1u8, 2, 3]).unwrap();
        assert!(matches!(
            load_spirv(dir.path(), "bad.spv"),
            Err(RenderError::ShaderLoad { .. })
        ));
    }
}
