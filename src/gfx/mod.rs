//! Graphics device boundary.
//!
//! Render passes talk to the GPU through the handle-based [`GraphicsDevice`]
//! trait. Two backends implement it:
//! - [`wgpu_backend::WgpuBackend`] - real GPU, windowed or headless
//! - [`recording::RecordingBackend`] - in-memory command log, used by tests
//!
//! Handles are generational: a handle to a destroyed resource never aliases a
//! newer one, so stale use is reported instead of silently hitting the wrong
//! resource.

pub mod allocation;
pub mod pool;
pub mod recording;
pub mod wgpu_backend;

use thiserror::Error;

pub use allocation::{Allocation, Resource};
pub use pool::Handle;

// ============================================================================
// Handles
// ============================================================================

macro_rules! resource_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
        pub struct $name(pub(crate) Handle);

        impl $name {
            pub(crate) fn handle(self) -> Handle {
                self.0
            }
        }
    };
}

resource_id!(
    /// Vertex or index buffer.
    BufferId
);
resource_id!(
    /// 2D or cube image, possibly a render target.
    ImageId
);
resource_id!(
    /// Compiled shader program.
    ShaderId
);
resource_id!(
    /// Immutable pipeline state.
    PipelineId
);
resource_id!(
    /// Set of attachments that draws can write into.
    PassId
);

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum GfxError {
    #[error("no suitable GPU adapter found")]
    NoAdapter,

    #[error("failed to create GPU device: {0}")]
    Device(String),

    #[error("failed to create window surface: {0}")]
    Surface(String),

    #[error("allocation of {kind} '{label}' failed: {reason}")]
    Allocation {
        kind: &'static str,
        label: String,
        reason: String,
    },

    #[error("invalid {0} handle")]
    InvalidHandle(&'static str),

    #[error("{0} requires an active pass")]
    NoActivePass(&'static str),

    #[error("begin_pass called while a pass is already active")]
    PassAlreadyActive,

    #[error("no pipeline applied before {0}")]
    NoPipeline(&'static str),

    #[error("uniform block {stage:?}/{slot} expects {expected} bytes, got {actual}")]
    UniformSize {
        stage: ShaderStage,
        slot: usize,
        expected: usize,
        actual: usize,
    },

    #[error("image cannot be sampled: {0}")]
    NotSampleable(String),

    #[error("attachment mismatch: {0}")]
    Attachment(String),

    #[error("readback failed: {0}")]
    Readback(String),
}

// ============================================================================
// Descriptors
// ============================================================================

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    Rgba8,
    Depth,
}

impl PixelFormat {
    pub fn is_depth(self) -> bool {
        matches!(self, PixelFormat::Depth)
    }

    pub fn bytes_per_pixel(self) -> usize {
        4
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum Filter {
    Nearest,
    #[default]
    Linear,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum Wrap {
    Repeat,
    #[default]
    ClampToEdge,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum ImageType {
    #[default]
    Dim2,
    Cube,
}

impl ImageType {
    pub fn layers(self) -> u32 {
        match self {
            ImageType::Dim2 => 1,
            ImageType::Cube => 6,
        }
    }
}

/// Image parameters without initial data.
#[derive(Clone, Debug, PartialEq)]
pub struct ImageInfo {
    pub label: String,
    pub image_type: ImageType,
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub sample_count: u32,
    pub filter: Filter,
    pub wrap: Wrap,
    pub render_target: bool,
}

impl ImageInfo {
    /// A color or depth render target.
    pub fn render_target(label: &str, width: u32, height: u32, pixel_format: PixelFormat) -> Self {
        Self {
            label: label.to_string(),
            image_type: ImageType::Dim2,
            width,
            height,
            pixel_format,
            sample_count: 1,
            filter: Filter::Linear,
            wrap: Wrap::ClampToEdge,
            render_target: true,
        }
    }

    pub fn with_sample_count(mut self, sample_count: u32) -> Self {
        self.sample_count = sample_count;
        self
    }

    /// Byte size of the full image (all layers) when tightly packed.
    pub fn byte_len(&self) -> usize {
        self.width as usize
            * self.height as usize
            * self.image_type.layers() as usize
            * self.pixel_format.bytes_per_pixel()
    }
}

#[derive(Clone, Debug)]
pub struct ImageDesc<'a> {
    pub info: ImageInfo,
    /// Tightly packed texel data, layer-major for cube images.
    pub data: Option<&'a [u8]>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BufferType {
    Vertex,
    Index,
}

#[derive(Clone, Debug)]
pub struct BufferDesc<'a> {
    pub label: &'a str,
    pub buffer_type: BufferType,
    pub data: &'a [u8],
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct UniformBlockDesc {
    pub stage: ShaderStage,
    pub slot: usize,
    pub size: usize,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ImageSlotDesc {
    pub slot: usize,
    pub image_type: ImageType,
}

/// WGSL program plus its resource interface.
///
/// Binding convention: group 0 holds uniforms (vertex slot `s` at binding `s`,
/// fragment slot `s` at binding `8 + s`); group 1 holds fragment images
/// (texture at `2 * slot`, sampler at `2 * slot + 1`).
#[derive(Clone, Debug)]
pub struct ShaderDesc {
    pub label: &'static str,
    pub source: &'static str,
    pub vs_entry: &'static str,
    pub fs_entry: &'static str,
    pub uniform_blocks: Vec<UniformBlockDesc>,
    pub images: Vec<ImageSlotDesc>,
}

impl ShaderDesc {
    pub fn uniform_block(&self, stage: ShaderStage, slot: usize) -> Option<&UniformBlockDesc> {
        self.uniform_blocks
            .iter()
            .find(|b| b.stage == stage && b.slot == slot)
    }
}

pub const FRAGMENT_UNIFORM_BINDING_BASE: u32 = 8;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum VertexFormat {
    Float2,
    Float3,
    Float4,
}

impl VertexFormat {
    pub fn size(self) -> u64 {
        match self {
            VertexFormat::Float2 => 8,
            VertexFormat::Float3 => 12,
            VertexFormat::Float4 => 16,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IndexType {
    U16,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum CullMode {
    #[default]
    None,
    Front,
    Back,
}

/// Which winding counts as front-facing.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum FaceWinding {
    #[default]
    Cw,
    Ccw,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum CompareFunc {
    #[default]
    Always,
    Less,
    LessEqual,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum PrimitiveType {
    #[default]
    Triangles,
    TriangleStrip,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DepthState {
    /// `None` when the target pass has no depth attachment.
    pub pixel_format: Option<PixelFormat>,
    pub compare: CompareFunc,
    pub write_enabled: bool,
}

impl DepthState {
    pub const NONE: DepthState = DepthState {
        pixel_format: None,
        compare: CompareFunc::Always,
        write_enabled: false,
    };
}

/// Which color attachment format a pipeline renders into.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ColorTarget {
    /// The visible (or headless) default framebuffer.
    Default,
    Offscreen(PixelFormat),
}

#[derive(Clone, Debug)]
pub struct PipelineDesc {
    pub label: &'static str,
    pub shader: ShaderId,
    /// Attribute formats of vertex buffer slot 0, in shader location order.
    pub attributes: Vec<VertexFormat>,
    pub index_type: Option<IndexType>,
    pub primitive: PrimitiveType,
    pub cull_mode: CullMode,
    pub face_winding: FaceWinding,
    pub depth: DepthState,
    pub color_target: ColorTarget,
    pub sample_count: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PassDesc {
    pub label: &'static str,
    pub color_attachments: Vec<ImageId>,
    pub depth_attachment: Option<ImageId>,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum LoadAction {
    Clear([f32; 4]),
    Load,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PassAction {
    pub color: LoadAction,
    /// Depth clear value; ignored for passes without a depth attachment.
    pub depth: f32,
}

impl PassAction {
    pub fn clear(color: [f32; 4]) -> Self {
        Self {
            color: LoadAction::Clear(color),
            depth: 1.0,
        }
    }

    pub fn load() -> Self {
        Self {
            color: LoadAction::Load,
            depth: 1.0,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Bindings {
    pub vertex_buffers: Vec<BufferId>,
    pub index_buffer: Option<BufferId>,
    pub fs_images: Vec<ImageId>,
}

// ============================================================================
// Device trait
// ============================================================================

/// Capability consumed by the render passes.
///
/// Resource creation returns an error on allocation failure; callers treat it
/// as fatal. `destroy_*` on an unknown or stale handle does nothing.
pub trait GraphicsDevice {
    fn make_buffer(&mut self, desc: &BufferDesc<'_>) -> Result<BufferId, GfxError>;
    fn make_image(&mut self, desc: &ImageDesc<'_>) -> Result<ImageId, GfxError>;
    fn make_shader(&mut self, desc: &ShaderDesc) -> Result<ShaderId, GfxError>;
    fn make_pipeline(&mut self, desc: &PipelineDesc) -> Result<PipelineId, GfxError>;
    fn make_pass(&mut self, desc: &PassDesc) -> Result<PassId, GfxError>;

    fn destroy_buffer(&mut self, id: BufferId);
    fn destroy_image(&mut self, id: ImageId);
    fn destroy_shader(&mut self, id: ShaderId);
    fn destroy_pipeline(&mut self, id: PipelineId);
    fn destroy_pass(&mut self, id: PassId);

    /// Parameters of a live image, `None` for stale handles.
    fn image_info(&self, id: ImageId) -> Option<ImageInfo>;

    fn begin_pass(&mut self, pass: PassId, action: &PassAction) -> Result<(), GfxError>;
    fn begin_default_pass(&mut self, action: &PassAction, width: u32, height: u32) -> Result<(), GfxError>;
    fn apply_pipeline(&mut self, pipeline: PipelineId) -> Result<(), GfxError>;
    fn apply_bindings(&mut self, bindings: &Bindings) -> Result<(), GfxError>;
    fn apply_uniforms(&mut self, stage: ShaderStage, slot: usize, data: &[u8]) -> Result<(), GfxError>;
    fn draw(&mut self, base_element: u32, num_elements: u32, num_instances: u32) -> Result<(), GfxError>;
    fn end_pass(&mut self) -> Result<(), GfxError>;
    /// Submit the frame and present it.
    fn commit(&mut self) -> Result<(), GfxError>;
}
