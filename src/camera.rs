//! Camera and per-frame model rotation.
//!
//! Matrices are glam's: column-major, right-handed, clip depth in [0, 1].

use glam::{Mat4, Vec3};

// ============================================================================
// Camera
// ============================================================================

/// Fixed look-at camera.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Camera {
    pub eye: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    /// Vertical field of view in radians.
    pub fov_y: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            eye: Vec3::new(0.0, 1.5, 6.0),
            target: Vec3::ZERO,
            up: Vec3::Y,
            fov_y: 1.047,
            near: 0.01,
            far: 10.0,
        }
    }
}

impl Camera {
    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.eye, self.target, self.up)
    }

    pub fn projection_matrix(&self, aspect: f32) -> Mat4 {
        Mat4::perspective_rh(self.fov_y, aspect, self.near, self.far)
    }

    pub fn view_projection_matrix(&self, aspect: f32) -> Mat4 {
        self.projection_matrix(aspect) * self.view_matrix()
    }
}

/// Width over height, with zero sizes treated as 1.
pub fn aspect_ratio(width: u32, height: u32) -> f32 {
    width.max(1) as f32 / height.max(1) as f32
}

// ============================================================================
// Cube rotation
// ============================================================================

/// Accumulated model rotation of the bloom cube.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct CameraState {
    pub rx: f32,
    pub ry: f32,
}

impl CameraState {
    pub const RX_STEP: f32 = 0.01;
    pub const RY_STEP: f32 = 0.02;

    /// Advance one frame.
    pub fn advance(&mut self) {
        self.rx += Self::RX_STEP;
        self.ry += Self::RY_STEP;
    }

    pub fn model_matrix(&self) -> Mat4 {
        Mat4::from_rotation_x(self.rx) * Mat4::from_rotation_y(self.ry)
    }

    /// `projection * view * model` for a framebuffer of the given size.
    pub fn mvp(&self, camera: &Camera, width: u32, height: u32) -> Mat4 {
        camera.view_projection_matrix(aspect_ratio(width, height)) * self.model_matrix()
    }
}

// ============================================================================
// Skybox orbit
// ============================================================================

/// Yaw/pitch view driven by the arrow keys in the skybox scene.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OrbitCamera {
    pub yaw: f32,
    pub pitch: f32,
    pub distance: f32,
}

impl Default for OrbitCamera {
    fn default() -> Self {
        Self {
            yaw: 0.0,
            pitch: 0.0,
            distance: 6.0,
        }
    }
}

impl OrbitCamera {
    const PITCH_LIMIT: f32 = 1.5;

    pub fn rotate(&mut self, d_yaw: f32, d_pitch: f32) {
        self.yaw += d_yaw;
        self.pitch = (self.pitch + d_pitch).clamp(-Self::PITCH_LIMIT, Self::PITCH_LIMIT);
    }

    pub fn eye(&self) -> Vec3 {
        let (sy, cy) = self.yaw.sin_cos();
        let (sp, cp) = self.pitch.sin_cos();
        Vec3::new(sy * cp, sp, cy * cp) * self.distance
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.eye(), Vec3::ZERO, Vec3::Y)
    }

    /// View matrix without translation, for drawing the sky at infinity.
    pub fn rotation_only(&self) -> Mat4 {
        let mut view = self.view_matrix();
        view.w_axis = glam::Vec4::W;
        view
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_increments() {
        let mut state = CameraState::default();
        state.advance();
        state.advance();
        assert_eq!(state.rx, 0.01 + 0.01);
        assert_eq!(state.ry, 0.02 + 0.02);
    }

    #[test]
    fn test_mvp_is_bit_identical() {
        let camera = Camera::default();
        let state = CameraState::default();
        let a = state.mvp(&camera, 800, 600);
        let b = state.mvp(&camera, 800, 600);
        let bits = |m: Mat4| m.to_cols_array().map(f32::to_bits);
        assert_eq!(bits(a), bits(b));
    }

    #[test]
    fn test_origin_maps_to_clip_center() {
        let camera = Camera::default();
        let mvp = CameraState::default().mvp(&camera, 800, 600);
        let clip = mvp * glam::Vec4::new(0.0, 0.0, 0.0, 1.0);
        let ndc = clip.truncate() / clip.w;
        assert!(ndc.x.abs() < 1e-6);
        assert!(ndc.y.abs() < 1e-6);
        assert!((0.0..=1.0).contains(&ndc.z));
    }

    #[test]
    fn test_zero_size_does_not_produce_nan() {
        let camera = Camera::default();
        let mvp = CameraState::default().mvp(&camera, 0, 0);
        assert!(mvp.to_cols_array().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_orbit_pitch_is_clamped() {
        let mut orbit = OrbitCamera::default();
        orbit.rotate(0.0, 10.0);
        assert_eq!(orbit.pitch, 1.5);
        orbit.rotate(0.0, -20.0);
        assert_eq!(orbit.pitch, -1.5);
    }

    #[test]
    fn test_rotation_only_drops_translation() {
        let orbit = OrbitCamera {
            yaw: 0.7,
            pitch: 0.3,
            distance: 6.0,
        };
        let m = orbit.rotation_only();
        let p = m.transform_point3(Vec3::ZERO);
        assert!(p.length() < 1e-6);
    }
}
