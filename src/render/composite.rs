//! Fullscreen quad into the default framebuffer.

use crate::geometry::{QuadVertex, QUAD_VERTEX_COUNT};
use crate::gfx::{
    Allocation, Bindings, BufferId, ColorTarget, CompareFunc, CullMode, DepthState, FaceWinding, GfxError, GraphicsDevice,
    ImageId, ImageSlotDesc, ImageType, PassAction, PipelineDesc, PipelineId, PixelFormat, PrimitiveType,
    ShaderDesc, ShaderId,
};

pub const DEFAULT_CLEAR_COLOR: [f32; 4] = [0.25 / 15.0, 0.5 / 15.0, 0.75 / 15.0, 1.0];

pub struct CompositePass {
    shader: ShaderId,
    pipeline: PipelineId,
}

impl CompositePass {
    /// `sample_count` must match the default framebuffer.
    pub fn new(alloc: &mut Allocation<'_>, sample_count: u32) -> Result<Self, GfxError> {
        let shader = alloc.shader(&ShaderDesc {
            label: "fsq-shader",
            source: include_str!("shader_fsq.wgsl"),
            vs_entry: "vs_main",
            fs_entry: "fs_main",
            uniform_blocks: vec![],
            images: vec![ImageSlotDesc {
                slot: 0,
                image_type: ImageType::Dim2,
            }],
        })?;
        let pipeline = alloc.pipeline(&PipelineDesc {
            label: "fullscreen quad pipeline",
            shader,
            attributes: QuadVertex::attributes(),
            index_type: None,
            primitive: PrimitiveType::TriangleStrip,
            cull_mode: CullMode::None,
            face_winding: FaceWinding::default(),
            // The default pass carries a depth buffer; the quad ignores it.
            depth: DepthState {
                pixel_format: Some(PixelFormat::Depth),
                compare: CompareFunc::Always,
                write_enabled: false,
            },
            color_target: ColorTarget::Default,
            sample_count,
        })?;
        Ok(Self { shader, pipeline })
    }

    /// Draw `source` over the whole framebuffer. Does not commit.
    pub fn draw(
        &self,
        device: &mut dyn GraphicsDevice,
        source: ImageId,
        quad: BufferId,
        width: u32,
        height: u32,
    ) -> Result<(), GfxError> {
        device.begin_default_pass(&PassAction::clear(DEFAULT_CLEAR_COLOR), width, height)?;
        device.apply_pipeline(self.pipeline)?;
        device.apply_bindings(&Bindings {
            vertex_buffers: vec![quad],
            index_buffer: None,
            fs_images: vec![source],
        })?;
        device.draw(0, QUAD_VERTEX_COUNT, 1)?;
        device.end_pass()
    }

    pub fn destroy(self, device: &mut dyn GraphicsDevice) {
        device.destroy_pipeline(self.pipeline);
        device.destroy_shader(self.shader);
    }
}
