//! Grouped resource creation with rollback.
//!
//! Constructors that make several handles run inside [`Allocation::scoped`]:
//! if any step fails, everything created so far is destroyed in reverse order
//! and the error is returned, so a failed constructor leaves nothing behind.

use super::{
    BufferDesc, BufferId, GfxError, GraphicsDevice, ImageDesc, ImageId, PassDesc, PassId, PipelineDesc, PipelineId,
    ShaderDesc, ShaderId,
};

/// Any device handle.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Resource {
    Buffer(BufferId),
    Image(ImageId),
    Shader(ShaderId),
    Pipeline(PipelineId),
    Pass(PassId),
}

impl Resource {
    pub fn destroy(self, device: &mut dyn GraphicsDevice) {
        match self {
            Resource::Buffer(id) => device.destroy_buffer(id),
            Resource::Image(id) => device.destroy_image(id),
            Resource::Shader(id) => device.destroy_shader(id),
            Resource::Pipeline(id) => device.destroy_pipeline(id),
            Resource::Pass(id) => device.destroy_pass(id),
        }
    }
}

/// Tracks what one construction attempt has created.
pub struct Allocation<'a> {
    device: &'a mut dyn GraphicsDevice,
    created: Vec<Resource>,
}

impl Allocation<'_> {
    /// Run `build`; on error release every handle it created.
    pub fn scoped<T>(
        device: &mut dyn GraphicsDevice,
        build: impl FnOnce(&mut Allocation<'_>) -> Result<T, GfxError>,
    ) -> Result<T, GfxError> {
        let mut allocation = Allocation {
            device,
            created: Vec::new(),
        };
        match build(&mut allocation) {
            Ok(value) => Ok(value),
            Err(e) => {
                allocation.rollback();
                Err(e)
            }
        }
    }

    pub fn buffer(&mut self, desc: &BufferDesc<'_>) -> Result<BufferId, GfxError> {
        let id = self.device.make_buffer(desc)?;
        self.created.push(Resource::Buffer(id));
        Ok(id)
    }

    pub fn image(&mut self, desc: &ImageDesc<'_>) -> Result<ImageId, GfxError> {
        let id = self.device.make_image(desc)?;
        self.created.push(Resource::Image(id));
        Ok(id)
    }

    pub fn shader(&mut self, desc: &ShaderDesc) -> Result<ShaderId, GfxError> {
        let id = self.device.make_shader(desc)?;
        self.created.push(Resource::Shader(id));
        Ok(id)
    }

    pub fn pipeline(&mut self, desc: &PipelineDesc) -> Result<PipelineId, GfxError> {
        let id = self.device.make_pipeline(desc)?;
        self.created.push(Resource::Pipeline(id));
        Ok(id)
    }

    pub fn pass(&mut self, desc: &PassDesc) -> Result<PassId, GfxError> {
        let id = self.device.make_pass(desc)?;
        self.created.push(Resource::Pass(id));
        Ok(id)
    }

    fn rollback(self) {
        for resource in self.created.into_iter().rev() {
            resource.destroy(&mut *self.device);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::recording::RecordingBackend;
    use crate::gfx::{BufferType, ImageInfo, PixelFormat};

    #[test]
    fn test_failure_releases_everything_created() {
        let mut device = RecordingBackend::new();
        device.fail_allocations_after(2);

        let result = Allocation::scoped(&mut device, |alloc| {
            alloc.buffer(&BufferDesc {
                label: "b",
                buffer_type: BufferType::Vertex,
                data: &[0; 12],
            })?;
            for label in ["first", "second"] {
                let info = ImageInfo::render_target(label, 2, 2, PixelFormat::Rgba8);
                alloc.image(&ImageDesc { info, data: None })?;
            }
            Ok(())
        });

        assert!(matches!(result, Err(GfxError::Allocation { kind: "image", .. })));
        assert_eq!(device.live_buffers(), 0);
        assert_eq!(device.live_images(), 0);
    }

    #[test]
    fn test_success_keeps_handles() {
        let mut device = RecordingBackend::new();
        let image = Allocation::scoped(&mut device, |alloc| {
            let info = ImageInfo::render_target("kept", 2, 2, PixelFormat::Rgba8);
            alloc.image(&ImageDesc { info, data: None })
        })
        .unwrap();
        assert!(device.image_info(image).is_some());
    }
}
