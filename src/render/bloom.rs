//! Bloom scene: offscreen cube, ping-pong blur, composite.

use super::blur::{BlurPass, BlurPlan};
use super::composite::CompositePass;
use super::mesh_pass::MeshPass;
use super::targets::{OffscreenTargets, ResourceManager, OFFSCREEN_SAMPLE_COUNT};
use crate::camera::{Camera, CameraState};
use crate::geometry::QUAD_VERTICES;
use crate::gfx::{Allocation, BufferDesc, BufferId, BufferType, GfxError, GraphicsDevice, ImageId};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BloomSettings {
    pub width: u32,
    pub height: u32,
    /// Sample count of the default framebuffer.
    pub sample_count: u32,
    pub blur_iterations: u32,
}

/// Owns every handle the bloom scene uses.
pub struct BloomRenderer {
    resources: ResourceManager,
    mesh: MeshPass,
    blur: BlurPass,
    composite: CompositePass,
    quad: BufferId,
    plan: BlurPlan,
    camera: Camera,
    state: CameraState,
    width: u32,
    height: u32,
}

impl BloomRenderer {
    /// Create every handle and the initial targets. On failure nothing is
    /// left allocated.
    pub fn new(device: &mut dyn GraphicsDevice, settings: BloomSettings) -> Result<Self, GfxError> {
        let mut renderer = Allocation::scoped(device, |alloc| {
            let quad = alloc.buffer(&BufferDesc {
                label: "quad vertices",
                buffer_type: BufferType::Vertex,
                data: bytemuck::cast_slice(&QUAD_VERTICES),
            })?;
            Ok(Self {
                resources: ResourceManager::new(OFFSCREEN_SAMPLE_COUNT),
                mesh: MeshPass::new(alloc, OFFSCREEN_SAMPLE_COUNT)?,
                blur: BlurPass::new(alloc)?,
                composite: CompositePass::new(alloc, settings.sample_count)?,
                quad,
                plan: BlurPlan::new(settings.blur_iterations),
                camera: Camera::default(),
                state: CameraState::default(),
                width: settings.width,
                height: settings.height,
            })
        })?;

        let rebuilt = renderer
            .resources
            .rebuild_offscreen_targets(device, settings.width, settings.height)
            .map(|_| ());
        if let Err(e) = rebuilt {
            renderer.shutdown(device);
            return Err(e);
        }
        log::info!(
            "Bloom renderer ready ({}x{}, {} blur iterations)",
            settings.width,
            settings.height,
            settings.blur_iterations
        );
        Ok(renderer)
    }

    /// Rebuild the window-sized targets. Must complete before the next frame.
    pub fn resize(&mut self, device: &mut dyn GraphicsDevice, width: u32, height: u32) -> Result<(), GfxError> {
        self.resources.rebuild_offscreen_targets(device, width, height)?;
        self.width = width;
        self.height = height;
        Ok(())
    }

    /// Render and commit one frame. Returns the image the composite sampled.
    pub fn frame(&mut self, device: &mut dyn GraphicsDevice) -> Result<ImageId, GfxError> {
        let targets = self
            .resources
            .targets()
            .ok_or(GfxError::InvalidHandle("offscreen targets"))?;

        self.state.advance();
        let mvp = self.state.mvp(&self.camera, self.width, self.height);

        self.mesh.draw(device, targets, mvp)?;
        let source = self
            .blur
            .execute(device, &self.plan, targets.color, &targets.pingpong, self.quad)?;
        self.composite
            .draw(device, source, self.quad, self.width.max(1), self.height.max(1))?;
        device.commit()?;
        Ok(source)
    }

    pub fn targets(&self) -> Option<&OffscreenTargets> {
        self.resources.targets()
    }

    pub fn plan(&self) -> &BlurPlan {
        &self.plan
    }

    pub fn camera_state(&self) -> CameraState {
        self.state
    }

    /// Release every handle.
    pub fn shutdown(mut self, device: &mut dyn GraphicsDevice) {
        self.resources.release(device);
        self.composite.destroy(device);
        self.blur.destroy(device);
        self.mesh.destroy(device);
        device.destroy_buffer(self.quad);
        log::info!("Bloom renderer shut down");
    }
}
