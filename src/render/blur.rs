//! Ping-pong Gaussian blur.
//!
//! The iteration sequence is computed up front as a [`BlurPlan`], a pure
//! value that can be inspected and tested without a device, then executed
//! pass by pass. Each step reads the previous result and writes the other
//! ping-pong target, alternating horizontal and vertical directions.

use bytemuck::{Pod, Zeroable};

use super::targets::{PingPongPair, Side};
use crate::geometry::{QuadVertex, QUAD_VERTEX_COUNT};
use crate::gfx::{
    Allocation, Bindings, BufferId, ColorTarget, CullMode, DepthState, FaceWinding, GfxError, GraphicsDevice, ImageId,
    ImageSlotDesc, ImageType, PassAction, PipelineDesc, PipelineId, PixelFormat, PrimitiveType, ShaderDesc,
    ShaderId, ShaderStage, UniformBlockDesc,
};

pub const DEFAULT_BLUR_ITERATIONS: u32 = 10;

/// Centre weight followed by the weights one to four texels out.
pub const BLUR_WEIGHTS: [f32; 5] = [0.227027, 0.1945946, 0.1216216, 0.054054, 0.016216];

// ============================================================================
// Plan
// ============================================================================

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Direction {
    Horizontal,
    Vertical,
}

impl Direction {
    /// Texel step passed to the shader.
    pub fn uniform(self) -> [f32; 2] {
        match self {
            Direction::Horizontal => [1.0, 0.0],
            Direction::Vertical => [0.0, 1.0],
        }
    }
}

/// Image a blur step reads from.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BlurSource {
    /// The offscreen scene color.
    Scene,
    PingPong(Side),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BlurStep {
    pub source: BlurSource,
    pub destination: Side,
    pub direction: Direction,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlurPlan {
    pub steps: Vec<BlurStep>,
    /// What the composite pass should sample after the last step.
    pub final_source: BlurSource,
}

impl BlurPlan {
    pub fn new(iterations: u32) -> Self {
        let mut steps = Vec::with_capacity(iterations as usize);
        let mut read = BlurSource::Scene;
        let mut horizontal = true;
        for _ in 0..iterations {
            let destination = Side::for_direction(horizontal);
            steps.push(BlurStep {
                source: read,
                destination,
                direction: if horizontal {
                    Direction::Horizontal
                } else {
                    Direction::Vertical
                },
            });
            read = BlurSource::PingPong(destination);
            horizontal = !horizontal;
        }
        Self {
            steps,
            final_source: read,
        }
    }
}

// ============================================================================
// Pass
// ============================================================================

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct BlurParams {
    pub hori: [f32; 2],
    pub _pad: [f32; 2],
}

pub struct BlurPass {
    shader: ShaderId,
    pipeline: PipelineId,
}

impl BlurPass {
    pub fn new(alloc: &mut Allocation<'_>) -> Result<Self, GfxError> {
        let shader = alloc.shader(&ShaderDesc {
            label: "blur-shader",
            source: include_str!("shader_blur.wgsl"),
            vs_entry: "vs_main",
            fs_entry: "fs_main",
            uniform_blocks: vec![UniformBlockDesc {
                stage: ShaderStage::Fragment,
                slot: 0,
                size: std::mem::size_of::<BlurParams>(),
            }],
            images: vec![ImageSlotDesc {
                slot: 0,
                image_type: ImageType::Dim2,
            }],
        })?;
        let pipeline = alloc.pipeline(&PipelineDesc {
            label: "blur pipeline",
            shader,
            attributes: QuadVertex::attributes(),
            index_type: None,
            primitive: PrimitiveType::TriangleStrip,
            cull_mode: CullMode::None,
            face_winding: FaceWinding::default(),
            depth: DepthState::NONE,
            color_target: ColorTarget::Offscreen(PixelFormat::Rgba8),
            sample_count: 1,
        })?;
        Ok(Self { shader, pipeline })
    }

    /// Run every step of `plan` and return the image holding the result.
    pub fn execute(
        &self,
        device: &mut dyn GraphicsDevice,
        plan: &BlurPlan,
        scene_color: ImageId,
        pingpong: &PingPongPair,
        quad: BufferId,
    ) -> Result<ImageId, GfxError> {
        for step in &plan.steps {
            let (read, write) = pingpong.split(step.destination);
            let source = match step.source {
                BlurSource::Scene => scene_color,
                BlurSource::PingPong(side) => {
                    debug_assert_eq!(side, read.side);
                    read.image
                }
            };

            device.begin_pass(write.pass, &PassAction::load())?;
            device.apply_pipeline(self.pipeline)?;
            device.apply_bindings(&Bindings {
                vertex_buffers: vec![quad],
                index_buffer: None,
                fs_images: vec![source],
            })?;
            let params = BlurParams {
                hori: step.direction.uniform(),
                _pad: [0.0; 2],
            };
            device.apply_uniforms(ShaderStage::Fragment, 0, bytemuck::bytes_of(&params))?;
            device.draw(0, QUAD_VERTEX_COUNT, 1)?;
            device.end_pass()?;
        }

        Ok(match plan.final_source {
            BlurSource::Scene => scene_color,
            BlurSource::PingPong(side) => pingpong.image(side),
        })
    }

    pub fn destroy(self, device: &mut dyn GraphicsDevice) {
        device.destroy_pipeline(self.pipeline);
        device.destroy_shader(self.shader);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_iterations_reads_scene() {
        let plan = BlurPlan::new(0);
        assert!(plan.steps.is_empty());
        assert_eq!(plan.final_source, BlurSource::Scene);
    }

    #[test]
    fn test_final_source_parity() {
        for n in 1..=21 {
            let expected = if n % 2 == 1 { Side::One } else { Side::Zero };
            assert_eq!(BlurPlan::new(n).final_source, BlurSource::PingPong(expected), "n = {n}");
        }
        assert_eq!(
            BlurPlan::new(DEFAULT_BLUR_ITERATIONS).final_source,
            BlurSource::PingPong(Side::Zero)
        );
    }

    #[test]
    fn test_first_step_reads_scene_and_writes_side_one() {
        let plan = BlurPlan::new(3);
        assert_eq!(
            plan.steps[0],
            BlurStep {
                source: BlurSource::Scene,
                destination: Side::One,
                direction: Direction::Horizontal,
            }
        );
        assert!(plan.steps[1..].iter().all(|s| s.source != BlurSource::Scene));
    }

    #[test]
    fn test_steps_never_read_their_destination() {
        let plan = BlurPlan::new(DEFAULT_BLUR_ITERATIONS);
        for step in &plan.steps {
            assert_ne!(step.source, BlurSource::PingPong(step.destination));
        }
    }

    #[test]
    fn test_each_step_reads_previous_destination() {
        let plan = BlurPlan::new(DEFAULT_BLUR_ITERATIONS);
        for pair in plan.steps.windows(2) {
            assert_eq!(pair[1].source, BlurSource::PingPong(pair[0].destination));
        }
    }

    #[test]
    fn test_directions_alternate_starting_horizontal() {
        let plan = BlurPlan::new(DEFAULT_BLUR_ITERATIONS);
        for (i, step) in plan.steps.iter().enumerate() {
            let expected = if i % 2 == 0 {
                Direction::Horizontal
            } else {
                Direction::Vertical
            };
            assert_eq!(step.direction, expected);
        }
    }

    #[test]
    fn test_kernel_is_normalized() {
        let total = BLUR_WEIGHTS[0] + 2.0 * BLUR_WEIGHTS[1..].iter().sum::<f32>();
        assert!((total - 1.0).abs() < 1e-3, "kernel sums to {total}");
    }

    #[test]
    fn test_params_layout() {
        assert_eq!(std::mem::size_of::<BlurParams>(), 16);
    }
}
