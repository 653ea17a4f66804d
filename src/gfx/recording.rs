//! In-memory graphics device.
//!
//! Validates every call the same way the wgpu backend does and records the
//! command stream, so pass ordering and resource lifetimes can be checked
//! without a GPU.

use super::pool::Pool;
use super::{
    BufferDesc, BufferId, BufferType, Bindings, GfxError, GraphicsDevice, ImageDesc, ImageId,
    ImageInfo, PassAction, PassDesc, PassId, PipelineDesc, PipelineId, ShaderDesc, ShaderId,
    ShaderStage,
};

/// One recorded device call.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    BeginPass {
        pass: PassId,
        action: PassAction,
    },
    BeginDefaultPass {
        action: PassAction,
        width: u32,
        height: u32,
    },
    ApplyPipeline(PipelineId),
    ApplyBindings(Bindings),
    ApplyUniforms {
        stage: ShaderStage,
        slot: usize,
        data: Vec<u8>,
    },
    Draw {
        base_element: u32,
        num_elements: u32,
        num_instances: u32,
    },
    EndPass,
    Commit,
}

#[derive(Clone, Debug)]
pub struct RecordedBuffer {
    pub label: String,
    pub buffer_type: BufferType,
    pub len: usize,
}

#[derive(Default)]
pub struct RecordingBackend {
    buffers: Pool<RecordedBuffer>,
    images: Pool<ImageInfo>,
    shaders: Pool<ShaderDesc>,
    pipelines: Pool<PipelineDesc>,
    passes: Pool<PassDesc>,
    commands: Vec<Command>,
    in_pass: bool,
    current_pipeline: Option<PipelineId>,
    /// Remaining successful allocations before every further one fails.
    allocation_budget: Option<usize>,
    frames_committed: usize,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Let the next `count` allocations succeed, then fail all later ones.
    pub fn fail_allocations_after(&mut self, count: usize) {
        self.allocation_budget = Some(count);
    }

    pub fn clear_allocation_failures(&mut self) {
        self.allocation_budget = None;
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn take_commands(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.commands)
    }

    pub fn frames_committed(&self) -> usize {
        self.frames_committed
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    pub fn live_images(&self) -> usize {
        self.images.len()
    }

    pub fn live_shaders(&self) -> usize {
        self.shaders.len()
    }

    pub fn live_pipelines(&self) -> usize {
        self.pipelines.len()
    }

    pub fn live_passes(&self) -> usize {
        self.passes.len()
    }

    /// All live images with their parameters.
    pub fn images(&self) -> Vec<ImageInfo> {
        self.images.iter().map(|(_, info)| info.clone()).collect()
    }

    pub fn pass_desc(&self, id: PassId) -> Option<&PassDesc> {
        self.passes.get(id.handle())
    }

    pub fn pipeline_desc(&self, id: PipelineId) -> Option<&PipelineDesc> {
        self.pipelines.get(id.handle())
    }

    fn allocate(&mut self, kind: &'static str, label: &str) -> Result<(), GfxError> {
        match self.allocation_budget {
            Some(0) => Err(GfxError::Allocation {
                kind,
                label: label.to_string(),
                reason: "out of memory (simulated)".to_string(),
            }),
            Some(n) => {
                self.allocation_budget = Some(n - 1);
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn require_pass(&self, what: &'static str) -> Result<(), GfxError> {
        if self.in_pass {
            Ok(())
        } else {
            Err(GfxError::NoActivePass(what))
        }
    }

    fn current_shader(&self, what: &'static str) -> Result<&ShaderDesc, GfxError> {
        let pipeline = self
            .current_pipeline
            .and_then(|p| self.pipelines.get(p.handle()))
            .ok_or(GfxError::NoPipeline(what))?;
        self.shaders
            .get(pipeline.shader.handle())
            .ok_or(GfxError::InvalidHandle("shader"))
    }

    fn check_attachment(&self, id: ImageId, depth: bool) -> Result<&ImageInfo, GfxError> {
        let info = self
            .images
            .get(id.handle())
            .ok_or(GfxError::InvalidHandle("image"))?;
        if !info.render_target {
            return Err(GfxError::Attachment(format!("'{}' is not a render target", info.label)));
        }
        if info.pixel_format.is_depth() != depth {
            return Err(GfxError::Attachment(format!(
                "'{}' has the wrong pixel format for this attachment",
                info.label
            )));
        }
        Ok(info)
    }
}

impl GraphicsDevice for RecordingBackend {
    fn make_buffer(&mut self, desc: &BufferDesc<'_>) -> Result<BufferId, GfxError> {
        self.allocate("buffer", desc.label)?;
        Ok(BufferId(self.buffers.insert(RecordedBuffer {
            label: desc.label.to_string(),
            buffer_type: desc.buffer_type,
            len: desc.data.len(),
        })))
    }

    fn make_image(&mut self, desc: &ImageDesc<'_>) -> Result<ImageId, GfxError> {
        self.allocate("image", &desc.info.label)?;
        if let Some(data) = desc.data {
            if data.len() != desc.info.byte_len() {
                return Err(GfxError::Allocation {
                    kind: "image",
                    label: desc.info.label.clone(),
                    reason: format!("expected {} bytes of data, got {}", desc.info.byte_len(), data.len()),
                });
            }
        }
        Ok(ImageId(self.images.insert(desc.info.clone())))
    }

    fn make_shader(&mut self, desc: &ShaderDesc) -> Result<ShaderId, GfxError> {
        self.allocate("shader", desc.label)?;
        Ok(ShaderId(self.shaders.insert(desc.clone())))
    }

    fn make_pipeline(&mut self, desc: &PipelineDesc) -> Result<PipelineId, GfxError> {
        if !self.shaders.contains(desc.shader.handle()) {
            return Err(GfxError::InvalidHandle("shader"));
        }
        self.allocate("pipeline", desc.label)?;
        Ok(PipelineId(self.pipelines.insert(desc.clone())))
    }

    fn make_pass(&mut self, desc: &PassDesc) -> Result<PassId, GfxError> {
        if desc.color_attachments.is_empty() {
            return Err(GfxError::Attachment("a pass needs at least one color attachment".to_string()));
        }
        let mut extent = None;
        for &color in &desc.color_attachments {
            let info = self.check_attachment(color, false)?;
            let this = (info.width, info.height, info.sample_count);
            if *extent.get_or_insert(this) != this {
                return Err(GfxError::Attachment("color attachments differ in size".to_string()));
            }
        }
        if let Some(depth) = desc.depth_attachment {
            let info = self.check_attachment(depth, true)?;
            if Some((info.width, info.height, info.sample_count)) != extent {
                return Err(GfxError::Attachment(
                    "depth attachment does not match the color attachments".to_string(),
                ));
            }
        }
        self.allocate("pass", desc.label)?;
        Ok(PassId(self.passes.insert(desc.clone())))
    }

    fn destroy_buffer(&mut self, id: BufferId) {
        self.buffers.remove(id.handle());
    }

    fn destroy_image(&mut self, id: ImageId) {
        self.images.remove(id.handle());
    }

    fn destroy_shader(&mut self, id: ShaderId) {
        self.shaders.remove(id.handle());
    }

    fn destroy_pipeline(&mut self, id: PipelineId) {
        self.pipelines.remove(id.handle());
    }

    fn destroy_pass(&mut self, id: PassId) {
        self.passes.remove(id.handle());
    }

    fn image_info(&self, id: ImageId) -> Option<ImageInfo> {
        self.images.get(id.handle()).cloned()
    }

    fn begin_pass(&mut self, pass: PassId, action: &PassAction) -> Result<(), GfxError> {
        if self.in_pass {
            return Err(GfxError::PassAlreadyActive);
        }
        let desc = self
            .passes
            .get(pass.handle())
            .ok_or(GfxError::InvalidHandle("pass"))?;
        let attachments_live = desc
            .color_attachments
            .iter()
            .chain(desc.depth_attachment.iter())
            .all(|img| self.images.contains(img.handle()));
        if !attachments_live {
            return Err(GfxError::InvalidHandle("image"));
        }
        self.in_pass = true;
        self.current_pipeline = None;
        self.commands.push(Command::BeginPass { pass, action: *action });
        Ok(())
    }

    fn begin_default_pass(&mut self, action: &PassAction, width: u32, height: u32) -> Result<(), GfxError> {
        if self.in_pass {
            return Err(GfxError::PassAlreadyActive);
        }
        self.in_pass = true;
        self.current_pipeline = None;
        self.commands.push(Command::BeginDefaultPass {
            action: *action,
            width,
            height,
        });
        Ok(())
    }

    fn apply_pipeline(&mut self, pipeline: PipelineId) -> Result<(), GfxError> {
        self.require_pass("apply_pipeline")?;
        if !self.pipelines.contains(pipeline.handle()) {
            return Err(GfxError::InvalidHandle("pipeline"));
        }
        self.current_pipeline = Some(pipeline);
        self.commands.push(Command::ApplyPipeline(pipeline));
        Ok(())
    }

    fn apply_bindings(&mut self, bindings: &Bindings) -> Result<(), GfxError> {
        self.require_pass("apply_bindings")?;
        self.current_shader("apply_bindings")?;
        let buffers = bindings.vertex_buffers.iter().chain(bindings.index_buffer.iter());
        for buffer in buffers {
            if !self.buffers.contains(buffer.handle()) {
                return Err(GfxError::InvalidHandle("buffer"));
            }
        }
        for image in &bindings.fs_images {
            let info = self
                .images
                .get(image.handle())
                .ok_or(GfxError::InvalidHandle("image"))?;
            if info.pixel_format.is_depth() {
                return Err(GfxError::NotSampleable(info.label.clone()));
            }
        }
        self.commands.push(Command::ApplyBindings(bindings.clone()));
        Ok(())
    }

    fn apply_uniforms(&mut self, stage: ShaderStage, slot: usize, data: &[u8]) -> Result<(), GfxError> {
        self.require_pass("apply_uniforms")?;
        let shader = self.current_shader("apply_uniforms")?;
        let expected = shader.uniform_block(stage, slot).map(|b| b.size).unwrap_or(0);
        if expected != data.len() {
            return Err(GfxError::UniformSize {
                stage,
                slot,
                expected,
                actual: data.len(),
            });
        }
        self.commands.push(Command::ApplyUniforms {
            stage,
            slot,
            data: data.to_vec(),
        });
        Ok(())
    }

    fn draw(&mut self, base_element: u32, num_elements: u32, num_instances: u32) -> Result<(), GfxError> {
        self.require_pass("draw")?;
        self.current_shader("draw")?;
        self.commands.push(Command::Draw {
            base_element,
            num_elements,
            num_instances,
        });
        Ok(())
    }

    fn end_pass(&mut self) -> Result<(), GfxError> {
        self.require_pass("end_pass")?;
        self.in_pass = false;
        self.current_pipeline = None;
        self.commands.push(Command::EndPass);
        Ok(())
    }

    fn commit(&mut self) -> Result<(), GfxError> {
        if self.in_pass {
            return Err(GfxError::PassAlreadyActive);
        }
        self.frames_committed += 1;
        self.commands.push(Command::Commit);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::{ImageInfo, PixelFormat};

    fn color_target(gfx: &mut RecordingBackend, w: u32, h: u32) -> ImageId {
        let info = ImageInfo::render_target("color", w, h, PixelFormat::Rgba8);
        gfx.make_image(&ImageDesc { info, data: None }).unwrap()
    }

    #[test]
    fn test_destroy_stale_image_is_noop() {
        let mut gfx = RecordingBackend::new();
        let img = color_target(&mut gfx, 4, 4);
        gfx.destroy_image(img);
        gfx.destroy_image(img);
        assert_eq!(gfx.live_images(), 0);
    }

    #[test]
    fn test_begin_pass_with_destroyed_attachment_fails() {
        let mut gfx = RecordingBackend::new();
        let img = color_target(&mut gfx, 4, 4);
        let pass = gfx
            .make_pass(&PassDesc {
                label: "p",
                color_attachments: vec![img],
                depth_attachment: None,
            })
            .unwrap();
        gfx.destroy_image(img);

        let err = gfx.begin_pass(pass, &PassAction::load()).unwrap_err();
        assert!(matches!(err, GfxError::InvalidHandle("image")));
    }

    #[test]
    fn test_mismatched_depth_attachment_rejected() {
        let mut gfx = RecordingBackend::new();
        let color = color_target(&mut gfx, 8, 8);
        let depth = gfx
            .make_image(&ImageDesc {
                info: ImageInfo::render_target("depth", 4, 4, PixelFormat::Depth),
                data: None,
            })
            .unwrap();
        let result = gfx.make_pass(&PassDesc {
            label: "p",
            color_attachments: vec![color],
            depth_attachment: Some(depth),
        });
        assert!(matches!(result, Err(GfxError::Attachment(_))));
    }

    #[test]
    fn test_draw_outside_pass_fails() {
        let mut gfx = RecordingBackend::new();
        assert!(matches!(gfx.draw(0, 3, 1), Err(GfxError::NoActivePass("draw"))));
    }

    #[test]
    fn test_simulated_allocation_failure() {
        let mut gfx = RecordingBackend::new();
        gfx.fail_allocations_after(1);
        color_target(&mut gfx, 2, 2);
        let info = ImageInfo::render_target("second", 2, 2, PixelFormat::Rgba8);
        let result = gfx.make_image(&ImageDesc { info, data: None });
        assert!(matches!(result, Err(GfxError::Allocation { kind: "image", .. })));
        assert_eq!(gfx.live_images(), 1);
    }
}
