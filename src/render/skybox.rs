//! Skybox scene: procedural cube map plus a rotating lit cube, drawn straight
//! into the default framebuffer.

use bytemuck::{Pod, Zeroable};
use glam::Mat4;

use crate::camera::{aspect_ratio, Camera, OrbitCamera};
use crate::cubemap::CubemapFaces;
use crate::geometry::{create_lit_cube_geometry, create_skybox_geometry, LitVertex, PositionVertex};
use crate::gfx::{
    Allocation, Bindings, BufferDesc, BufferId, BufferType, ColorTarget, CompareFunc, CullMode, DepthState, FaceWinding,
    Filter, GfxError, GraphicsDevice, ImageDesc, ImageId, ImageInfo, ImageSlotDesc, ImageType, IndexType,
    PassAction, PipelineDesc, PipelineId, PixelFormat, PrimitiveType, ShaderDesc, ShaderId, ShaderStage,
    UniformBlockDesc, Wrap,
};

const CLEAR_COLOR: [f32; 4] = [0.0, 0.0, 0.0, 1.0];
const SPIN_STEP: f32 = 0.01;
const LIGHT_DIR: [f32; 4] = [-0.4, -1.0, -0.6, 0.0];
/// rgb surface color, alpha is the ambient term.
const CUBE_COLOR: [f32; 4] = [0.9, 0.55, 0.2, 0.15];

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct SkyUniforms {
    view_proj: [[f32; 4]; 4],
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct LitVsUniforms {
    mvp: [[f32; 4]; 4],
    model: [[f32; 4]; 4],
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct LitFsUniforms {
    light_dir: [f32; 4],
    color: [f32; 4],
}

struct IndexedMesh {
    vertices: BufferId,
    indices: BufferId,
    index_count: u32,
}

impl IndexedMesh {
    fn new<V: Pod>(alloc: &mut Allocation<'_>, label: &str, vertices: &[V], indices: &[u16]) -> Result<Self, GfxError> {
        let vertex_buffer = alloc.buffer(&BufferDesc {
            label,
            buffer_type: BufferType::Vertex,
            data: bytemuck::cast_slice(vertices),
        })?;
        let index_buffer = alloc.buffer(&BufferDesc {
            label,
            buffer_type: BufferType::Index,
            data: bytemuck::cast_slice(indices),
        })?;
        Ok(Self {
            vertices: vertex_buffer,
            indices: index_buffer,
            index_count: indices.len() as u32,
        })
    }

    fn bindings(&self, fs_images: Vec<ImageId>) -> Bindings {
        Bindings {
            vertex_buffers: vec![self.vertices],
            index_buffer: Some(self.indices),
            fs_images,
        }
    }

    fn destroy(&self, device: &mut dyn GraphicsDevice) {
        device.destroy_buffer(self.indices);
        device.destroy_buffer(self.vertices);
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SkyboxSettings {
    pub width: u32,
    pub height: u32,
    pub sample_count: u32,
}

pub struct SkyboxRenderer {
    cubemap: ImageId,
    sky_shader: ShaderId,
    sky_pipeline: PipelineId,
    sky_mesh: IndexedMesh,
    lit_shader: ShaderId,
    lit_pipeline: PipelineId,
    lit_mesh: IndexedMesh,
    camera: Camera,
    orbit: OrbitCamera,
    spin: f32,
    width: u32,
    height: u32,
}

impl SkyboxRenderer {
    pub fn new(device: &mut dyn GraphicsDevice, settings: SkyboxSettings, faces: &CubemapFaces) -> Result<Self, GfxError> {
        let renderer = Allocation::scoped(device, |alloc| Self::build(alloc, settings, faces))?;
        log::info!("Skybox renderer ready ({}px faces)", faces.size());
        Ok(renderer)
    }

    fn build(alloc: &mut Allocation<'_>, settings: SkyboxSettings, faces: &CubemapFaces) -> Result<Self, GfxError> {
        let cubemap = alloc.image(&ImageDesc {
            info: ImageInfo {
                label: "sky-cubemap".to_string(),
                image_type: ImageType::Cube,
                width: faces.size(),
                height: faces.size(),
                pixel_format: PixelFormat::Rgba8,
                sample_count: 1,
                filter: Filter::Linear,
                wrap: Wrap::ClampToEdge,
                render_target: false,
            },
            data: Some(faces.as_bytes()),
        })?;

        let (sky_vertices, sky_indices) = create_skybox_geometry();
        let sky_mesh = IndexedMesh::new(alloc, "skybox-cube", &sky_vertices, &sky_indices)?;
        let sky_shader = alloc.shader(&ShaderDesc {
            label: "skybox-shader",
            source: include_str!("shader_skybox.wgsl"),
            vs_entry: "vs_main",
            fs_entry: "fs_main",
            uniform_blocks: vec![UniformBlockDesc {
                stage: ShaderStage::Vertex,
                slot: 0,
                size: std::mem::size_of::<SkyUniforms>(),
            }],
            images: vec![ImageSlotDesc {
                slot: 0,
                image_type: ImageType::Cube,
            }],
        })?;
        // Front faces culled so the inside of the cube is visible
        let sky_pipeline = alloc.pipeline(&PipelineDesc {
            label: "skybox pipeline",
            shader: sky_shader,
            attributes: PositionVertex::attributes(),
            index_type: Some(IndexType::U16),
            primitive: PrimitiveType::Triangles,
            cull_mode: CullMode::Front,
            face_winding: FaceWinding::Cw,
            depth: DepthState {
                pixel_format: Some(PixelFormat::Depth),
                compare: CompareFunc::LessEqual,
                write_enabled: false,
            },
            color_target: ColorTarget::Default,
            sample_count: settings.sample_count,
        })?;

        let (lit_vertices, lit_indices) = create_lit_cube_geometry();
        let lit_mesh = IndexedMesh::new(alloc, "lit-cube", &lit_vertices, &lit_indices)?;
        let lit_shader = alloc.shader(&ShaderDesc {
            label: "lit-shader",
            source: include_str!("shader_lit.wgsl"),
            vs_entry: "vs_main",
            fs_entry: "fs_main",
            uniform_blocks: vec![
                UniformBlockDesc {
                    stage: ShaderStage::Vertex,
                    slot: 0,
                    size: std::mem::size_of::<LitVsUniforms>(),
                },
                UniformBlockDesc {
                    stage: ShaderStage::Fragment,
                    slot: 0,
                    size: std::mem::size_of::<LitFsUniforms>(),
                },
            ],
            images: vec![],
        })?;
        let lit_pipeline = alloc.pipeline(&PipelineDesc {
            label: "lit cube pipeline",
            shader: lit_shader,
            attributes: LitVertex::attributes(),
            index_type: Some(IndexType::U16),
            primitive: PrimitiveType::Triangles,
            cull_mode: CullMode::Back,
            face_winding: FaceWinding::Cw,
            depth: DepthState {
                pixel_format: Some(PixelFormat::Depth),
                compare: CompareFunc::LessEqual,
                write_enabled: true,
            },
            color_target: ColorTarget::Default,
            sample_count: settings.sample_count,
        })?;

        Ok(Self {
            cubemap,
            sky_shader,
            sky_pipeline,
            sky_mesh,
            lit_shader,
            lit_pipeline,
            lit_mesh,
            camera: Camera::default(),
            orbit: OrbitCamera::default(),
            spin: 0.0,
            width: settings.width,
            height: settings.height,
        })
    }

    /// No offscreen targets here; only the projection changes.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
    }

    pub fn rotate_view(&mut self, d_yaw: f32, d_pitch: f32) {
        self.orbit.rotate(d_yaw, d_pitch);
    }

    pub fn cubemap(&self) -> ImageId {
        self.cubemap
    }

    pub fn frame(&mut self, device: &mut dyn GraphicsDevice) -> Result<(), GfxError> {
        self.spin += SPIN_STEP;
        let proj = self.camera.projection_matrix(aspect_ratio(self.width, self.height));

        device.begin_default_pass(&PassAction::clear(CLEAR_COLOR), self.width.max(1), self.height.max(1))?;

        let sky = SkyUniforms {
            view_proj: (proj * self.orbit.rotation_only()).to_cols_array_2d(),
        };
        device.apply_pipeline(self.sky_pipeline)?;
        device.apply_bindings(&self.sky_mesh.bindings(vec![self.cubemap]))?;
        device.apply_uniforms(ShaderStage::Vertex, 0, bytemuck::bytes_of(&sky))?;
        device.draw(0, self.sky_mesh.index_count, 1)?;

        let model = Mat4::from_rotation_y(self.spin) * Mat4::from_rotation_x(self.spin * 0.5);
        let vs = LitVsUniforms {
            mvp: (proj * self.orbit.view_matrix() * model).to_cols_array_2d(),
            model: model.to_cols_array_2d(),
        };
        let fs = LitFsUniforms {
            light_dir: LIGHT_DIR,
            color: CUBE_COLOR,
        };
        device.apply_pipeline(self.lit_pipeline)?;
        device.apply_bindings(&self.lit_mesh.bindings(vec![]))?;
        device.apply_uniforms(ShaderStage::Vertex, 0, bytemuck::bytes_of(&vs))?;
        device.apply_uniforms(ShaderStage::Fragment, 0, bytemuck::bytes_of(&fs))?;
        device.draw(0, self.lit_mesh.index_count, 1)?;

        device.end_pass()?;
        device.commit()
    }

    pub fn shutdown(self, device: &mut dyn GraphicsDevice) {
        device.destroy_pipeline(self.lit_pipeline);
        device.destroy_shader(self.lit_shader);
        self.lit_mesh.destroy(device);
        device.destroy_pipeline(self.sky_pipeline);
        device.destroy_shader(self.sky_shader);
        self.sky_mesh.destroy(device);
        device.destroy_image(self.cubemap);
        log::info!("Skybox renderer shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cubemap::Coloring;
    use crate::gfx::recording::{Command, RecordingBackend};
    use crate::noise::SimplexNoise;

    fn renderer(device: &mut RecordingBackend) -> SkyboxRenderer {
        let faces = CubemapFaces::generate(4, Coloring::Gradient, &SimplexNoise::new()).unwrap();
        let settings = SkyboxSettings {
            width: 800,
            height: 600,
            sample_count: 4,
        };
        SkyboxRenderer::new(device, settings, &faces).unwrap()
    }

    #[test]
    fn test_cubemap_is_uploaded_as_cube() {
        let mut device = RecordingBackend::new();
        let sky = renderer(&mut device);
        let info = device.image_info(sky.cubemap()).unwrap();
        assert_eq!(info.image_type, ImageType::Cube);
        assert_eq!((info.width, info.height), (4, 4));
        assert!(!info.render_target);
    }

    #[test]
    fn test_frame_draws_sky_then_cube() {
        let mut device = RecordingBackend::new();
        let mut sky = renderer(&mut device);
        sky.frame(&mut device).unwrap();

        let draws: Vec<u32> = device
            .commands()
            .iter()
            .filter_map(|c| match c {
                Command::Draw { num_elements, .. } => Some(*num_elements),
                _ => None,
            })
            .collect();
        assert_eq!(draws, vec![36, 36]);
        assert!(matches!(device.commands().first(), Some(Command::BeginDefaultPass { .. })));
        assert_eq!(device.commands().last(), Some(&Command::Commit));
        assert_eq!(device.frames_committed(), 1);
    }

    /// Vertex uniforms of the sky draw in the recorded frame.
    fn sky_uniforms(device: &RecordingBackend) -> Vec<u8> {
        device
            .commands()
            .iter()
            .find_map(|c| match c {
                Command::ApplyUniforms { data, .. } => Some(data.clone()),
                _ => None,
            })
            .unwrap()
    }

    #[test]
    fn test_rotate_view_turns_the_sky() {
        let mut device = RecordingBackend::new();
        let mut sky = renderer(&mut device);
        sky.frame(&mut device).unwrap();
        let before = sky_uniforms(&device);
        device.take_commands();

        sky.rotate_view(0.3, 0.0);
        sky.frame(&mut device).unwrap();
        assert_ne!(sky_uniforms(&device), before);
        device.take_commands();

        sky.rotate_view(-0.3, 0.0);
        sky.frame(&mut device).unwrap();
        let back: [f32; 16] = bytemuck::pod_read_unaligned(&sky_uniforms(&device));
        let start: [f32; 16] = bytemuck::pod_read_unaligned(&before);
        for (a, b) in back.iter().zip(start) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn test_shutdown_releases_everything() {
        let mut device = RecordingBackend::new();
        let sky = renderer(&mut device);
        sky.shutdown(&mut device);
        assert_eq!(device.live_images(), 0);
        assert_eq!(device.live_buffers(), 0);
        assert_eq!(device.live_shaders(), 0);
        assert_eq!(device.live_pipelines(), 0);
    }

    #[test]
    fn test_failed_construction_leaves_nothing() {
        let faces = CubemapFaces::generate(4, Coloring::Gradient, &SimplexNoise::new()).unwrap();
        let settings = SkyboxSettings {
            width: 800,
            height: 600,
            sample_count: 4,
        };
        // Cubemap, sky buffers and shader succeed, the sky pipeline fails
        let mut device = RecordingBackend::new();
        device.fail_allocations_after(4);
        let result = SkyboxRenderer::new(&mut device, settings, &faces);

        assert!(matches!(result, Err(GfxError::Allocation { kind: "pipeline", .. })));
        assert_eq!(device.live_images(), 0);
        assert_eq!(device.live_buffers(), 0);
        assert_eq!(device.live_shaders(), 0);
    }
}
