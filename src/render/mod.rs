//! Render passes and the scene renderers built from them.
//!
//! Bloom frame: [`mesh_pass`] into the offscreen targets, [`blur`] across the
//! ping-pong pair, [`composite`] into the default framebuffer. The skybox
//! scene draws directly into the default framebuffer.

pub mod bloom;
pub mod blur;
pub mod composite;
pub mod mesh_pass;
pub mod skybox;
pub mod targets;

pub use bloom::{BloomRenderer, BloomSettings};
pub use blur::{BlurPlan, BlurSource, BlurStep, Direction, DEFAULT_BLUR_ITERATIONS};
pub use skybox::{SkyboxRenderer, SkyboxSettings};
pub use targets::{OffscreenTargets, PingPongPair, ResourceManager, Side, OFFSCREEN_SAMPLE_COUNT};
