//! wgpu implementation of [`GraphicsDevice`].
//!
//! Draw calls are recorded per pass and encoded into a wgpu render pass when
//! the pass ends; every draw gets its own uniform buffer, so several passes in
//! one submission can use different uniform values.
//!
//! Multisampled color targets carry a single-sample resolve texture. Passes
//! resolve into it and sampling always reads the resolved copy.

use std::collections::HashMap;
use std::sync::Arc;

use wgpu::util::DeviceExt;

use super::pool::Pool;
use super::{
    Bindings, BufferDesc, BufferId, BufferType, ColorTarget, CompareFunc, CullMode, FaceWinding, Filter,
    GfxError, GraphicsDevice, ImageDesc, ImageId, ImageInfo, ImageType, LoadAction, PassAction,
    PassDesc, PassId, PipelineDesc, PipelineId, PixelFormat, PrimitiveType, ShaderDesc, ShaderId,
    ShaderStage, VertexFormat, Wrap, FRAGMENT_UNIFORM_BINDING_BASE,
};

/// Depth format of the default framebuffer and of offscreen depth targets.
const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

/// Color format used when rendering without a window.
const HEADLESS_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

struct GpuBuffer {
    buffer: wgpu::Buffer,
    buffer_type: BufferType,
}

struct GpuImage {
    info: ImageInfo,
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    /// Cube view for sampling cube images.
    cube_view: Option<wgpu::TextureView>,
    /// Resolve texture and view for multisampled color targets.
    resolve: Option<(wgpu::Texture, wgpu::TextureView)>,
    sampler: wgpu::Sampler,
}

impl GpuImage {
    fn sampled_view(&self) -> Option<&wgpu::TextureView> {
        if self.info.pixel_format.is_depth() {
            return None;
        }
        if let Some((_, view)) = &self.resolve {
            return Some(view);
        }
        Some(self.cube_view.as_ref().unwrap_or(&self.view))
    }
}

struct GpuShader {
    desc: ShaderDesc,
    module: wgpu::ShaderModule,
    uniform_layout: wgpu::BindGroupLayout,
    image_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
}

struct GpuPipeline {
    desc: PipelineDesc,
    pipeline: wgpu::RenderPipeline,
}

enum Presenter {
    Surface {
        surface: wgpu::Surface<'static>,
        config: wgpu::SurfaceConfiguration,
    },
    Headless {
        texture: wgpu::Texture,
        view: wgpu::TextureView,
    },
}

/// The visible framebuffer (or its headless stand-in) with its MSAA and
/// depth buffers.
struct DefaultTarget {
    presenter: Presenter,
    format: wgpu::TextureFormat,
    width: u32,
    height: u32,
    sample_count: u32,
    msaa: Option<(wgpu::Texture, wgpu::TextureView)>,
    depth: (wgpu::Texture, wgpu::TextureView),
}

#[derive(Copy, Clone)]
enum RecordedTarget {
    Offscreen(PassId),
    Default { width: u32, height: u32 },
}

struct DrawCall {
    pipeline: PipelineId,
    bindings: Bindings,
    _uniform_buffers: Vec<wgpu::Buffer>,
    uniform_group: wgpu::BindGroup,
    image_group: wgpu::BindGroup,
    base_element: u32,
    num_elements: u32,
    num_instances: u32,
}

struct PassRecording {
    target: RecordedTarget,
    action: PassAction,
    pipeline: Option<PipelineId>,
    bindings: Bindings,
    uniforms: HashMap<(ShaderStage, usize), Vec<u8>>,
    draws: Vec<DrawCall>,
}

impl PassRecording {
    fn new(target: RecordedTarget, action: PassAction) -> Self {
        Self {
            target,
            action,
            pipeline: None,
            bindings: Bindings::default(),
            uniforms: HashMap::new(),
            draws: Vec::new(),
        }
    }
}

pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    default_target: DefaultTarget,

    buffers: Pool<GpuBuffer>,
    images: Pool<GpuImage>,
    shaders: Pool<GpuShader>,
    pipelines: Pool<GpuPipeline>,
    passes: Pool<PassDesc>,

    encoder: Option<wgpu::CommandEncoder>,
    frame: Option<wgpu::SurfaceTexture>,
    recording: Option<PassRecording>,
}

impl WgpuBackend {
    /// Create a backend presenting into `window`.
    pub async fn windowed(window: Arc<winit::window::Window>, sample_count: u32) -> Result<Self, GfxError> {
        let size = window.inner_size();
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
        let surface = instance
            .create_surface(window)
            .map_err(|e| GfxError::Surface(e.to_string()))?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .ok_or(GfxError::NoAdapter)?;
        log::info!("Using adapter: {}", adapter.get_info().name);

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor::default(), None)
            .await
            .map_err(|e| GfxError::Device(e.to_string()))?;

        let caps = surface.get_capabilities(&adapter);
        // Linear surface so the composite writes values unchanged.
        let format = caps
            .formats
            .iter()
            .copied()
            .find(|f| !f.is_srgb())
            .or_else(|| caps.formats.first().copied())
            .ok_or_else(|| GfxError::Surface("surface reports no formats".to_string()))?;
        let alpha_mode = caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::Fifo,
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        let default_target = DefaultTarget::new(
            &device,
            Presenter::Surface { surface, config },
            format,
            size.width.max(1),
            size.height.max(1),
            sample_count,
        );
        Ok(Self::from_parts(device, queue, default_target))
    }

    /// Create a backend rendering into an offscreen texture that can be read
    /// back with [`WgpuBackend::read_default_target`].
    pub async fn headless(width: u32, height: u32, sample_count: u32) -> Result<Self, GfxError> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or(GfxError::NoAdapter)?;
        log::info!("Using adapter (headless): {}", adapter.get_info().name);

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor::default(), None)
            .await
            .map_err(|e| GfxError::Device(e.to_string()))?;

        let width = width.max(1);
        let height = height.max(1);
        let (texture, view) = create_headless_texture(&device, width, height);
        let default_target = DefaultTarget::new(
            &device,
            Presenter::Headless { texture, view },
            HEADLESS_FORMAT,
            width,
            height,
            sample_count,
        );
        Ok(Self::from_parts(device, queue, default_target))
    }

    fn from_parts(device: wgpu::Device, queue: wgpu::Queue, default_target: DefaultTarget) -> Self {
        Self {
            device,
            queue,
            default_target,
            buffers: Pool::new(),
            images: Pool::new(),
            shaders: Pool::new(),
            pipelines: Pool::new(),
            passes: Pool::new(),
            encoder: None,
            frame: None,
            recording: None,
        }
    }

    /// Resize the default framebuffer. Offscreen targets are owned by the
    /// caller and rebuilt separately.
    pub fn resize(&mut self, width: u32, height: u32) {
        let width = width.max(1);
        let height = height.max(1);
        if width == self.default_target.width && height == self.default_target.height {
            return;
        }
        self.default_target.resize(&self.device, width, height);
    }

    pub fn default_size(&self) -> (u32, u32) {
        (self.default_target.width, self.default_target.height)
    }

    pub fn sample_count(&self) -> u32 {
        self.default_target.sample_count
    }

    /// Copy the headless default target into tightly packed RGBA8 rows.
    ///
    /// Must be called after [`GraphicsDevice::commit`].
    pub fn read_default_target(&self) -> Result<Vec<u8>, GfxError> {
        let texture = match &self.default_target.presenter {
            Presenter::Headless { texture, .. } => texture,
            Presenter::Surface { .. } => {
                return Err(GfxError::Readback("window surfaces cannot be read back".to_string()))
            }
        };
        let width = self.default_target.width;
        let height = self.default_target.height;

        // Rows must be padded to 256 bytes for texture-to-buffer copies
        let unpadded_bytes_per_row = 4 * width;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded_bytes_per_row = unpadded_bytes_per_row.div_ceil(align) * align;

        let output_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback Buffer"),
            size: (padded_bytes_per_row * height) as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("Readback Encoder") });
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &output_buffer,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bytes_per_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(Some(encoder.finish()));

        let buffer_slice = output_buffer.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |v| {
            let _ = tx.send(v);
        });
        self.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|e| GfxError::Readback(e.to_string()))?
            .map_err(|e| GfxError::Readback(e.to_string()))?;

        let data = buffer_slice.get_mapped_range();
        let mut unpadded = Vec::with_capacity((unpadded_bytes_per_row * height) as usize);
        for row in 0..height {
            let start = (row * padded_bytes_per_row) as usize;
            let end = start + unpadded_bytes_per_row as usize;
            unpadded.extend_from_slice(&data[start..end]);
        }
        drop(data);
        output_buffer.unmap();
        Ok(unpadded)
    }

    /// Run `create` inside validation and out-of-memory error scopes so
    /// failures surface as [`GfxError::Allocation`] instead of a panic.
    fn guarded<T>(&self, kind: &'static str, label: &str, create: impl FnOnce(&wgpu::Device) -> T) -> Result<T, GfxError> {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = create(&self.device);
        let validation = pollster::block_on(self.device.pop_error_scope());
        let out_of_memory = pollster::block_on(self.device.pop_error_scope());
        match validation.or(out_of_memory) {
            Some(err) => Err(GfxError::Allocation {
                kind,
                label: label.to_string(),
                reason: err.to_string(),
            }),
            None => Ok(value),
        }
    }

    fn acquire_frame(&mut self) -> Result<(), GfxError> {
        if self.frame.is_some() {
            return Ok(());
        }
        let Presenter::Surface { surface, config } = &self.default_target.presenter else {
            return Ok(());
        };
        let frame = match surface.get_current_texture() {
            Ok(frame) => frame,
            Err(wgpu::SurfaceError::Outdated | wgpu::SurfaceError::Lost) => {
                log::debug!("Surface outdated, reconfiguring");
                surface.configure(&self.device, config);
                surface
                    .get_current_texture()
                    .map_err(|e| GfxError::Surface(e.to_string()))?
            }
            Err(e) => return Err(GfxError::Surface(e.to_string())),
        };
        self.frame = Some(frame);
        Ok(())
    }

    fn build_draw(
        &self,
        recording: &PassRecording,
        base_element: u32,
        num_elements: u32,
        num_instances: u32,
    ) -> Result<DrawCall, GfxError> {
        let pipeline_id = recording.pipeline.ok_or(GfxError::NoPipeline("draw"))?;
        let pipeline = self
            .pipelines
            .get(pipeline_id.handle())
            .ok_or(GfxError::InvalidHandle("pipeline"))?;
        let shader = self
            .shaders
            .get(pipeline.desc.shader.handle())
            .ok_or(GfxError::InvalidHandle("shader"))?;

        let mut uniform_buffers = Vec::with_capacity(shader.desc.uniform_blocks.len());
        for block in &shader.desc.uniform_blocks {
            let mut contents = recording
                .uniforms
                .get(&(block.stage, block.slot))
                .cloned()
                .unwrap_or_else(|| vec![0; block.size]);
            contents.resize(block.size.next_multiple_of(16), 0);
            let buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(shader.desc.label),
                contents: &contents,
                usage: wgpu::BufferUsages::UNIFORM,
            });
            uniform_buffers.push((uniform_binding(block.stage, block.slot), buffer));
        }
        let uniform_entries: Vec<wgpu::BindGroupEntry> = uniform_buffers
            .iter()
            .map(|(binding, buffer)| wgpu::BindGroupEntry {
                binding: *binding,
                resource: buffer.as_entire_binding(),
            })
            .collect();
        let uniform_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Uniform Bind Group"),
            layout: &shader.uniform_layout,
            entries: &uniform_entries,
        });

        let mut image_entries = Vec::with_capacity(shader.desc.images.len() * 2);
        for slot in &shader.desc.images {
            let id = recording
                .bindings
                .fs_images
                .get(slot.slot)
                .ok_or(GfxError::InvalidHandle("image"))?;
            let image = self
                .images
                .get(id.handle())
                .ok_or(GfxError::InvalidHandle("image"))?;
            let view = image
                .sampled_view()
                .ok_or_else(|| GfxError::NotSampleable(image.info.label.clone()))?;
            image_entries.push(wgpu::BindGroupEntry {
                binding: 2 * slot.slot as u32,
                resource: wgpu::BindingResource::TextureView(view),
            });
            image_entries.push(wgpu::BindGroupEntry {
                binding: 2 * slot.slot as u32 + 1,
                resource: wgpu::BindingResource::Sampler(&image.sampler),
            });
        }
        let image_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Image Bind Group"),
            layout: &shader.image_layout,
            entries: &image_entries,
        });

        Ok(DrawCall {
            pipeline: pipeline_id,
            bindings: recording.bindings.clone(),
            _uniform_buffers: uniform_buffers.into_iter().map(|(_, b)| b).collect(),
            uniform_group,
            image_group,
            base_element,
            num_elements,
            num_instances,
        })
    }

    fn encode_pass(&self, encoder: &mut wgpu::CommandEncoder, recording: &PassRecording) -> Result<(), GfxError> {
        let surface_view = self
            .frame
            .as_ref()
            .map(|f| f.texture.create_view(&wgpu::TextureViewDescriptor::default()));

        let load = match recording.action.color {
            LoadAction::Clear(c) => wgpu::LoadOp::Clear(wgpu::Color {
                r: c[0] as f64,
                g: c[1] as f64,
                b: c[2] as f64,
                a: c[3] as f64,
            }),
            LoadAction::Load => wgpu::LoadOp::Load,
        };
        let ops = wgpu::Operations {
            load,
            store: wgpu::StoreOp::Store,
        };

        let mut color_attachments = Vec::new();
        let depth_view: Option<&wgpu::TextureView>;
        let label;
        match recording.target {
            RecordedTarget::Offscreen(pass) => {
                let desc = self
                    .passes
                    .get(pass.handle())
                    .ok_or(GfxError::InvalidHandle("pass"))?;
                label = desc.label;
                for id in &desc.color_attachments {
                    let image = self
                        .images
                        .get(id.handle())
                        .ok_or(GfxError::InvalidHandle("image"))?;
                    color_attachments.push(Some(wgpu::RenderPassColorAttachment {
                        view: &image.view,
                        resolve_target: image.resolve.as_ref().map(|(_, v)| v),
                        ops,
                    }));
                }
                depth_view = match desc.depth_attachment {
                    Some(id) => Some(
                        &self
                            .images
                            .get(id.handle())
                            .ok_or(GfxError::InvalidHandle("image"))?
                            .view,
                    ),
                    None => None,
                };
            }
            RecordedTarget::Default { .. } => {
                label = "Default Pass";
                let target = match (&self.default_target.presenter, surface_view.as_ref()) {
                    (Presenter::Headless { view, .. }, _) => view,
                    (Presenter::Surface { .. }, Some(view)) => view,
                    (Presenter::Surface { .. }, None) => {
                        return Err(GfxError::Surface("no frame acquired".to_string()))
                    }
                };
                let (view, resolve_target) = match &self.default_target.msaa {
                    Some((_, msaa_view)) => (msaa_view, Some(target)),
                    None => (target, None),
                };
                color_attachments.push(Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target,
                    ops,
                }));
                depth_view = Some(&self.default_target.depth.1);
            }
        }

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(label),
            color_attachments: &color_attachments,
            depth_stencil_attachment: depth_view.map(|view| wgpu::RenderPassDepthStencilAttachment {
                view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(recording.action.depth),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        if let RecordedTarget::Default { width, height } = recording.target {
            let w = width.clamp(1, self.default_target.width);
            let h = height.clamp(1, self.default_target.height);
            pass.set_viewport(0.0, 0.0, w as f32, h as f32, 0.0, 1.0);
        }

        for draw in &recording.draws {
            let pipeline = self
                .pipelines
                .get(draw.pipeline.handle())
                .ok_or(GfxError::InvalidHandle("pipeline"))?;
            pass.set_pipeline(&pipeline.pipeline);
            pass.set_bind_group(0, &draw.uniform_group, &[]);
            pass.set_bind_group(1, &draw.image_group, &[]);
            for (slot, id) in draw.bindings.vertex_buffers.iter().enumerate() {
                let buffer = self
                    .buffers
                    .get(id.handle())
                    .ok_or(GfxError::InvalidHandle("buffer"))?;
                pass.set_vertex_buffer(slot as u32, buffer.buffer.slice(..));
            }
            let elements = draw.base_element..draw.base_element + draw.num_elements;
            let instances = 0..draw.num_instances;
            match draw.bindings.index_buffer {
                Some(id) => {
                    let buffer = self
                        .buffers
                        .get(id.handle())
                        .ok_or(GfxError::InvalidHandle("buffer"))?;
                    pass.set_index_buffer(buffer.buffer.slice(..), wgpu::IndexFormat::Uint16);
                    pass.draw_indexed(elements, 0, instances);
                }
                None => pass.draw(elements, instances),
            }
        }
        Ok(())
    }

    fn recording_mut(&mut self, what: &'static str) -> Result<&mut PassRecording, GfxError> {
        self.recording.as_mut().ok_or(GfxError::NoActivePass(what))
    }
}

impl GraphicsDevice for WgpuBackend {
    fn make_buffer(&mut self, desc: &BufferDesc<'_>) -> Result<BufferId, GfxError> {
        let usage = match desc.buffer_type {
            BufferType::Vertex => wgpu::BufferUsages::VERTEX,
            BufferType::Index => wgpu::BufferUsages::INDEX,
        };
        let buffer = self.guarded("buffer", desc.label, |device| {
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(desc.label),
                contents: desc.data,
                usage,
            })
        })?;
        Ok(BufferId(self.buffers.insert(GpuBuffer {
            buffer,
            buffer_type: desc.buffer_type,
        })))
    }

    fn make_image(&mut self, desc: &ImageDesc<'_>) -> Result<ImageId, GfxError> {
        let info = &desc.info;
        if let Some(data) = desc.data {
            if data.len() != info.byte_len() {
                return Err(GfxError::Allocation {
                    kind: "image",
                    label: info.label.clone(),
                    reason: format!("expected {} bytes of data, got {}", info.byte_len(), data.len()),
                });
            }
        }

        let multisampled = info.render_target && info.sample_count > 1 && !info.pixel_format.is_depth();
        let image = self.guarded("image", &info.label, |device| {
            let size = wgpu::Extent3d {
                width: info.width.max(1),
                height: info.height.max(1),
                depth_or_array_layers: info.image_type.layers(),
            };
            let format = texture_format(info.pixel_format);
            let usage = if info.pixel_format.is_depth() || multisampled {
                wgpu::TextureUsages::RENDER_ATTACHMENT
            } else if info.render_target {
                wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING
            } else {
                wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST
            };
            let texture = device.create_texture(&wgpu::TextureDescriptor {
                label: Some(&info.label),
                size,
                mip_level_count: 1,
                sample_count: if info.render_target { info.sample_count.max(1) } else { 1 },
                dimension: wgpu::TextureDimension::D2,
                format,
                usage,
                view_formats: &[],
            });
            let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
            let cube_view = (info.image_type == ImageType::Cube).then(|| {
                texture.create_view(&wgpu::TextureViewDescriptor {
                    dimension: Some(wgpu::TextureViewDimension::Cube),
                    ..Default::default()
                })
            });
            let resolve = multisampled.then(|| {
                let resolve_texture = device.create_texture(&wgpu::TextureDescriptor {
                    label: Some(&info.label),
                    size,
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format,
                    usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
                    view_formats: &[],
                });
                let resolve_view = resolve_texture.create_view(&wgpu::TextureViewDescriptor::default());
                (resolve_texture, resolve_view)
            });
            let address_mode = address_mode(info.wrap);
            let filter = filter_mode(info.filter);
            let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
                label: Some(&info.label),
                address_mode_u: address_mode,
                address_mode_v: address_mode,
                address_mode_w: address_mode,
                mag_filter: filter,
                min_filter: filter,
                ..Default::default()
            });
            GpuImage {
                info: info.clone(),
                texture,
                view,
                cube_view,
                resolve,
                sampler,
            }
        })?;

        if let Some(data) = desc.data {
            self.queue.write_texture(
                wgpu::ImageCopyTexture {
                    texture: &image.texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                data,
                wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(info.width * info.pixel_format.bytes_per_pixel() as u32),
                    rows_per_image: Some(info.height),
                },
                wgpu::Extent3d {
                    width: info.width,
                    height: info.height,
                    depth_or_array_layers: info.image_type.layers(),
                },
            );
        }

        Ok(ImageId(self.images.insert(image)))
    }

    fn make_shader(&mut self, desc: &ShaderDesc) -> Result<ShaderId, GfxError> {
        let shader = self.guarded("shader", desc.label, |device| {
            let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(desc.label),
                source: wgpu::ShaderSource::Wgsl(desc.source.into()),
            });

            let uniform_entries: Vec<wgpu::BindGroupLayoutEntry> = desc
                .uniform_blocks
                .iter()
                .map(|block| wgpu::BindGroupLayoutEntry {
                    binding: uniform_binding(block.stage, block.slot),
                    visibility: match block.stage {
                        ShaderStage::Vertex => wgpu::ShaderStages::VERTEX,
                        ShaderStage::Fragment => wgpu::ShaderStages::FRAGMENT,
                    },
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                })
                .collect();
            let uniform_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Uniform Layout"),
                entries: &uniform_entries,
            });

            let mut image_entries = Vec::with_capacity(desc.images.len() * 2);
            for slot in &desc.images {
                image_entries.push(wgpu::BindGroupLayoutEntry {
                    binding: 2 * slot.slot as u32,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: match slot.image_type {
                            ImageType::Dim2 => wgpu::TextureViewDimension::D2,
                            ImageType::Cube => wgpu::TextureViewDimension::Cube,
                        },
                        multisampled: false,
                    },
                    count: None,
                });
                image_entries.push(wgpu::BindGroupLayoutEntry {
                    binding: 2 * slot.slot as u32 + 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                });
            }
            let image_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Image Layout"),
                entries: &image_entries,
            });

            let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(desc.label),
                bind_group_layouts: &[&uniform_layout, &image_layout],
                push_constant_ranges: &[],
            });

            GpuShader {
                desc: desc.clone(),
                module,
                uniform_layout,
                image_layout,
                pipeline_layout,
            }
        })?;
        Ok(ShaderId(self.shaders.insert(shader)))
    }

    fn make_pipeline(&mut self, desc: &PipelineDesc) -> Result<PipelineId, GfxError> {
        let shader = self
            .shaders
            .get(desc.shader.handle())
            .ok_or(GfxError::InvalidHandle("shader"))?;

        let color_format = match desc.color_target {
            ColorTarget::Default => {
                if desc.sample_count != self.default_target.sample_count {
                    return Err(GfxError::Attachment(format!(
                        "pipeline '{}' uses {} samples, default framebuffer has {}",
                        desc.label, desc.sample_count, self.default_target.sample_count
                    )));
                }
                self.default_target.format
            }
            ColorTarget::Offscreen(format) => texture_format(format),
        };

        let mut offset = 0;
        let attributes: Vec<wgpu::VertexAttribute> = desc
            .attributes
            .iter()
            .enumerate()
            .map(|(location, format)| {
                let attribute = wgpu::VertexAttribute {
                    format: vertex_format(*format),
                    offset,
                    shader_location: location as u32,
                };
                offset += format.size();
                attribute
            })
            .collect();
        let vertex_layout = wgpu::VertexBufferLayout {
            array_stride: offset,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &attributes,
        };

        let topology = match desc.primitive {
            PrimitiveType::Triangles => wgpu::PrimitiveTopology::TriangleList,
            PrimitiveType::TriangleStrip => wgpu::PrimitiveTopology::TriangleStrip,
        };
        let strip_index_format = (desc.primitive == PrimitiveType::TriangleStrip && desc.index_type.is_some())
            .then_some(wgpu::IndexFormat::Uint16);

        let depth_stencil = desc.depth.pixel_format.map(|format| wgpu::DepthStencilState {
            format: texture_format(format),
            depth_write_enabled: desc.depth.write_enabled,
            depth_compare: compare_function(desc.depth.compare),
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        });

        let pipeline = self.guarded("pipeline", desc.label, |device| {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(desc.label),
                layout: Some(&shader.pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &shader.module,
                    entry_point: Some(shader.desc.vs_entry),
                    buffers: &[vertex_layout],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &shader.module,
                    entry_point: Some(shader.desc.fs_entry),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: color_format,
                        blend: Some(wgpu::BlendState::REPLACE),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                }),
                primitive: wgpu::PrimitiveState {
                    topology,
                    strip_index_format,
                    front_face: match desc.face_winding {
                        FaceWinding::Cw => wgpu::FrontFace::Cw,
                        FaceWinding::Ccw => wgpu::FrontFace::Ccw,
                    },
                    cull_mode: match desc.cull_mode {
                        CullMode::None => None,
                        CullMode::Front => Some(wgpu::Face::Front),
                        CullMode::Back => Some(wgpu::Face::Back),
                    },
                    polygon_mode: wgpu::PolygonMode::Fill,
                    unclipped_depth: false,
                    conservative: false,
                },
                depth_stencil,
                multisample: wgpu::MultisampleState {
                    count: desc.sample_count.max(1),
                    mask: !0,
                    alpha_to_coverage_enabled: false,
                },
                multiview: None,
                cache: None,
            })
        })?;

        Ok(PipelineId(self.pipelines.insert(GpuPipeline {
            desc: desc.clone(),
            pipeline,
        })))
    }

    fn make_pass(&mut self, desc: &PassDesc) -> Result<PassId, GfxError> {
        if desc.color_attachments.is_empty() {
            return Err(GfxError::Attachment("a pass needs at least one color attachment".to_string()));
        }
        let attachments = desc.color_attachments.iter().chain(desc.depth_attachment.iter());
        let mut extent = None;
        for id in attachments {
            let image = self
                .images
                .get(id.handle())
                .ok_or(GfxError::InvalidHandle("image"))?;
            if !image.info.render_target {
                return Err(GfxError::Attachment(format!("'{}' is not a render target", image.info.label)));
            }
            let this = (image.info.width, image.info.height, image.info.sample_count);
            if *extent.get_or_insert(this) != this {
                return Err(GfxError::Attachment(format!(
                    "'{}' does not match the other attachments of '{}'",
                    image.info.label, desc.label
                )));
            }
        }
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
        self.images.get(id.handle()).map(|image| image.info.clone())
    }

    fn begin_pass(&mut self, pass: PassId, action: &PassAction) -> Result<(), GfxError> {
        if self.recording.is_some() {
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
        self.recording = Some(PassRecording::new(RecordedTarget::Offscreen(pass), *action));
        Ok(())
    }

    fn begin_default_pass(&mut self, action: &PassAction, width: u32, height: u32) -> Result<(), GfxError> {
        if self.recording.is_some() {
            return Err(GfxError::PassAlreadyActive);
        }
        self.acquire_frame()?;
        self.recording = Some(PassRecording::new(RecordedTarget::Default { width, height }, *action));
        Ok(())
    }

    fn apply_pipeline(&mut self, pipeline: PipelineId) -> Result<(), GfxError> {
        if !self.pipelines.contains(pipeline.handle()) {
            return Err(GfxError::InvalidHandle("pipeline"));
        }
        let recording = self.recording_mut("apply_pipeline")?;
        recording.pipeline = Some(pipeline);
        recording.bindings = Bindings::default();
        recording.uniforms.clear();
        Ok(())
    }

    fn apply_bindings(&mut self, bindings: &Bindings) -> Result<(), GfxError> {
        let recording = self.recording.as_ref().ok_or(GfxError::NoActivePass("apply_bindings"))?;
        if recording.pipeline.is_none() {
            return Err(GfxError::NoPipeline("apply_bindings"));
        }
        for (slot, id) in bindings.vertex_buffers.iter().enumerate() {
            match self.buffers.get(id.handle()) {
                Some(b) if b.buffer_type == BufferType::Vertex => {}
                Some(_) => return Err(GfxError::Attachment(format!("vertex slot {slot} bound to an index buffer"))),
                None => return Err(GfxError::InvalidHandle("buffer")),
            }
        }
        if let Some(id) = bindings.index_buffer {
            match self.buffers.get(id.handle()) {
                Some(b) if b.buffer_type == BufferType::Index => {}
                Some(_) => return Err(GfxError::Attachment("index slot bound to a vertex buffer".to_string())),
                None => return Err(GfxError::InvalidHandle("buffer")),
            }
        }
        for id in &bindings.fs_images {
            let image = self
                .images
                .get(id.handle())
                .ok_or(GfxError::InvalidHandle("image"))?;
            if image.sampled_view().is_none() {
                return Err(GfxError::NotSampleable(image.info.label.clone()));
            }
        }
        self.recording_mut("apply_bindings")?.bindings = bindings.clone();
        Ok(())
    }

    fn apply_uniforms(&mut self, stage: ShaderStage, slot: usize, data: &[u8]) -> Result<(), GfxError> {
        let recording = self.recording.as_ref().ok_or(GfxError::NoActivePass("apply_uniforms"))?;
        let pipeline = recording
            .pipeline
            .and_then(|p| self.pipelines.get(p.handle()))
            .ok_or(GfxError::NoPipeline("apply_uniforms"))?;
        let shader = self
            .shaders
            .get(pipeline.desc.shader.handle())
            .ok_or(GfxError::InvalidHandle("shader"))?;
        let expected = shader.desc.uniform_block(stage, slot).map(|b| b.size).unwrap_or(0);
        if expected != data.len() {
            return Err(GfxError::UniformSize {
                stage,
                slot,
                expected,
                actual: data.len(),
            });
        }
        self.recording_mut("apply_uniforms")?
            .uniforms
            .insert((stage, slot), data.to_vec());
        Ok(())
    }

    fn draw(&mut self, base_element: u32, num_elements: u32, num_instances: u32) -> Result<(), GfxError> {
        let recording = self.recording.as_ref().ok_or(GfxError::NoActivePass("draw"))?;
        let call = self.build_draw(recording, base_element, num_elements, num_instances)?;
        self.recording_mut("draw")?.draws.push(call);
        Ok(())
    }

    fn end_pass(&mut self) -> Result<(), GfxError> {
        let recording = self.recording.take().ok_or(GfxError::NoActivePass("end_pass"))?;
        let mut encoder = self.encoder.take().unwrap_or_else(|| {
            self.device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("Frame Encoder") })
        });
        let result = self.encode_pass(&mut encoder, &recording);
        self.encoder = Some(encoder);
        result
    }

    fn commit(&mut self) -> Result<(), GfxError> {
        if self.recording.is_some() {
            return Err(GfxError::PassAlreadyActive);
        }
        if let Some(encoder) = self.encoder.take() {
            self.queue.submit(Some(encoder.finish()));
        }
        if let Some(frame) = self.frame.take() {
            frame.present();
        }
        Ok(())
    }
}

impl DefaultTarget {
    fn new(
        device: &wgpu::Device,
        presenter: Presenter,
        format: wgpu::TextureFormat,
        width: u32,
        height: u32,
        sample_count: u32,
    ) -> Self {
        let sample_count = sample_count.max(1);
        Self {
            msaa: create_msaa(device, format, width, height, sample_count),
            depth: create_depth(device, width, height, sample_count),
            presenter,
            format,
            width,
            height,
            sample_count,
        }
    }

    fn resize(&mut self, device: &wgpu::Device, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        match &mut self.presenter {
            Presenter::Surface { surface, config } => {
                config.width = width;
                config.height = height;
                surface.configure(device, config);
            }
            Presenter::Headless { texture, view } => {
                let (new_texture, new_view) = create_headless_texture(device, width, height);
                *texture = new_texture;
                *view = new_view;
            }
        }
        self.msaa = create_msaa(device, self.format, width, height, self.sample_count);
        self.depth = create_depth(device, width, height, self.sample_count);
        log::debug!("Default framebuffer resized to {}x{}", width, height);
    }
}

fn create_headless_texture(device: &wgpu::Device, width: u32, height: u32) -> (wgpu::Texture, wgpu::TextureView) {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Headless Target"),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: HEADLESS_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    (texture, view)
}

fn create_msaa(
    device: &wgpu::Device,
    format: wgpu::TextureFormat,
    width: u32,
    height: u32,
    sample_count: u32,
) -> Option<(wgpu::Texture, wgpu::TextureView)> {
    if sample_count <= 1 {
        return None;
    }
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Default MSAA Color"),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    Some((texture, view))
}

fn create_depth(device: &wgpu::Device, width: u32, height: u32, sample_count: u32) -> (wgpu::Texture, wgpu::TextureView) {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Default Depth"),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count,
        dimension: wgpu::TextureDimension::D2,
        format: DEPTH_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    (texture, view)
}

fn uniform_binding(stage: ShaderStage, slot: usize) -> u32 {
    match stage {
        ShaderStage::Vertex => slot as u32,
        ShaderStage::Fragment => FRAGMENT_UNIFORM_BINDING_BASE + slot as u32,
    }
}

fn texture_format(format: PixelFormat) -> wgpu::TextureFormat {
    match format {
        PixelFormat::Rgba8 => wgpu::TextureFormat::Rgba8Unorm,
        PixelFormat::Depth => DEPTH_FORMAT,
    }
}

fn vertex_format(format: VertexFormat) -> wgpu::VertexFormat {
    match format {
        VertexFormat::Float2 => wgpu::VertexFormat::Float32x2,
        VertexFormat::Float3 => wgpu::VertexFormat::Float32x3,
        VertexFormat::Float4 => wgpu::VertexFormat::Float32x4,
    }
}

fn compare_function(compare: CompareFunc) -> wgpu::CompareFunction {
    match compare {
        CompareFunc::Always => wgpu::CompareFunction::Always,
        CompareFunc::Less => wgpu::CompareFunction::Less,
        CompareFunc::LessEqual => wgpu::CompareFunction::LessEqual,
    }
}

fn address_mode(wrap: Wrap) -> wgpu::AddressMode {
    match wrap {
        Wrap::Repeat => wgpu::AddressMode::Repeat,
        Wrap::ClampToEdge => wgpu::AddressMode::ClampToEdge,
    }
}

fn filter_mode(filter: Filter) -> wgpu::FilterMode {
    match filter {
        Filter::Nearest => wgpu::FilterMode::Nearest,
        Filter::Linear => wgpu::FilterMode::Linear,
    }
}
