//! Offscreen pass drawing the colored cube.

use bytemuck::{Pod, Zeroable};
use glam::Mat4;

use super::targets::OffscreenTargets;
use crate::geometry::{ColorVertex, CUBE_INDEX_COUNT, CUBE_INDICES, CUBE_VERTICES};
use crate::gfx::{
    Allocation, Bindings, BufferDesc, BufferId, BufferType, ColorTarget, CompareFunc, CullMode, DepthState, FaceWinding,
    GfxError, GraphicsDevice, IndexType, PassAction, PipelineDesc, PipelineId, PixelFormat, PrimitiveType,
    ShaderDesc, ShaderId, ShaderStage, UniformBlockDesc,
};

pub const OFFSCREEN_CLEAR_COLOR: [f32; 4] = [0.25, 0.25, 0.25, 1.0];

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct MeshUniforms {
    pub mvp: [[f32; 4]; 4],
}

impl MeshUniforms {
    pub fn new(mvp: Mat4) -> Self {
        Self {
            mvp: mvp.to_cols_array_2d(),
        }
    }
}

pub struct MeshPass {
    shader: ShaderId,
    pipeline: PipelineId,
    vertex_buffer: BufferId,
    index_buffer: BufferId,
}

impl MeshPass {
    pub fn new(alloc: &mut Allocation<'_>, sample_count: u32) -> Result<Self, GfxError> {
        let vertex_buffer = alloc.buffer(&BufferDesc {
            label: "cube-vertices",
            buffer_type: BufferType::Vertex,
            data: bytemuck::cast_slice(&CUBE_VERTICES),
        })?;
        let index_buffer = alloc.buffer(&BufferDesc {
            label: "cube-indices",
            buffer_type: BufferType::Index,
            data: bytemuck::cast_slice(&CUBE_INDICES),
        })?;
        let shader = alloc.shader(&ShaderDesc {
            label: "mesh-shader",
            source: include_str!("shader_mesh.wgsl"),
            vs_entry: "vs_main",
            fs_entry: "fs_main",
            uniform_blocks: vec![UniformBlockDesc {
                stage: ShaderStage::Vertex,
                slot: 0,
                size: std::mem::size_of::<MeshUniforms>(),
            }],
            images: vec![],
        })?;
        let pipeline = alloc.pipeline(&PipelineDesc {
            label: "mesh pipeline",
            shader,
            attributes: ColorVertex::attributes(),
            index_type: Some(IndexType::U16),
            primitive: PrimitiveType::Triangles,
            cull_mode: CullMode::Front,
            face_winding: FaceWinding::Cw,
            depth: DepthState {
                pixel_format: Some(PixelFormat::Depth),
                compare: CompareFunc::LessEqual,
                write_enabled: true,
            },
            color_target: ColorTarget::Offscreen(PixelFormat::Rgba8),
            sample_count,
        })?;
        Ok(Self {
            shader,
            pipeline,
            vertex_buffer,
            index_buffer,
        })
    }

    /// Render the cube into the scene color and depth targets.
    pub fn draw(&self, device: &mut dyn GraphicsDevice, targets: &OffscreenTargets, mvp: Mat4) -> Result<(), GfxError> {
        device.begin_pass(targets.pass, &PassAction::clear(OFFSCREEN_CLEAR_COLOR))?;
        device.apply_pipeline(self.pipeline)?;
        device.apply_bindings(&Bindings {
            vertex_buffers: vec![self.vertex_buffer],
            index_buffer: Some(self.index_buffer),
            fs_images: vec![],
        })?;
        let uniforms = MeshUniforms::new(mvp);
        device.apply_uniforms(ShaderStage::Vertex, 0, bytemuck::bytes_of(&uniforms))?;
        device.draw(0, CUBE_INDEX_COUNT, 1)?;
        device.end_pass()
    }

    pub fn destroy(self, device: &mut dyn GraphicsDevice) {
        device.destroy_pipeline(self.pipeline);
        device.destroy_shader(self.shader);
        device.destroy_buffer(self.index_buffer);
        device.destroy_buffer(self.vertex_buffer);
    }
}
