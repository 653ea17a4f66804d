//! Procedural sky cubemap.
//!
//! All six faces live in one RGBA8 buffer, face-major in the order
//! +X, -X, +Y, -Y, +Z, -Z, which is also the layer order of a cube texture.

use std::path::{Path, PathBuf};

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::noise::{NoiseError, SimplexNoise};

pub const DEFAULT_FACE_SIZE: u32 = 1024;

/// How cubemap texels are colored.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Coloring {
    /// Vertical sky gradient.
    #[default]
    Gradient,
    /// Gradient modulated by simplex noise.
    Noise,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CubeFace {
    PosX,
    NegX,
    PosY,
    NegY,
    PosZ,
    NegZ,
}

impl CubeFace {
    pub const ALL: [CubeFace; 6] = [
        CubeFace::PosX,
        CubeFace::NegX,
        CubeFace::PosY,
        CubeFace::NegY,
        CubeFace::PosZ,
        CubeFace::NegZ,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Direction through face coordinates `u, v` in [-1, 1] (v pointing
    /// down the face), following the usual cube texture layout.
    pub fn direction(self, u: f32, v: f32) -> Vec3 {
        match self {
            CubeFace::PosX => Vec3::new(1.0, -v, -u),
            CubeFace::NegX => Vec3::new(-1.0, -v, u),
            CubeFace::PosY => Vec3::new(u, 1.0, v),
            CubeFace::NegY => Vec3::new(u, -1.0, -v),
            CubeFace::PosZ => Vec3::new(u, -v, 1.0),
            CubeFace::NegZ => Vec3::new(-u, -v, -1.0),
        }
    }

    fn file_name(self) -> &'static str {
        match self {
            CubeFace::PosX => "pos_x.png",
            CubeFace::NegX => "neg_x.png",
            CubeFace::PosY => "pos_y.png",
            CubeFace::NegY => "neg_y.png",
            CubeFace::PosZ => "pos_z.png",
            CubeFace::NegZ => "neg_z.png",
        }
    }
}

const ZENITH: Vec3 = Vec3::new(0.15, 0.35, 0.8);
const HORIZON: Vec3 = Vec3::new(0.8, 0.87, 0.95);
const GROUND: Vec3 = Vec3::new(0.25, 0.22, 0.2);
const CLOUD: Vec3 = Vec3::ONE;

/// Scale applied to directions before sampling noise.
const NOISE_FREQUENCY: f32 = 4.0;

pub struct CubemapFaces {
    size: u32,
    data: Vec<u8>,
}

impl CubemapFaces {
    /// Build all six faces of `size`² texels.
    ///
    /// Fails only when `coloring` is [`Coloring::Noise`] and the noise field
    /// has not been initialised.
    pub fn generate(size: u32, coloring: Coloring, noise: &SimplexNoise) -> Result<Self, NoiseError> {
        let size = size.max(1);
        let mut faces = Self {
            size,
            data: vec![0; 6 * (size as usize).pow(2) * 4],
        };

        for face in CubeFace::ALL {
            for row in 0..size {
                for col in 0..size {
                    let u = 2.0 * (col as f32 + 0.5) / size as f32 - 1.0;
                    let v = 2.0 * (row as f32 + 0.5) / size as f32 - 1.0;
                    let dir = face.direction(u, v).normalize();
                    let color = match coloring {
                        Coloring::Gradient => sky_gradient(dir),
                        Coloring::Noise => noisy_sky(dir, noise)?,
                    };
                    let i = faces.index(face, row, col);
                    faces.data[i..i + 4].copy_from_slice(&to_rgba8(color));
                }
            }
        }
        Ok(faces)
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// Byte offset of a texel.
    pub fn index(&self, face: CubeFace, row: u32, col: u32) -> usize {
        let size = self.size as usize;
        ((face.index() * size + row as usize) * size + col as usize) * 4
    }

    #[cfg(test)]
    fn texel(&self, face: CubeFace, row: u32, col: u32) -> [u8; 4] {
        let i = self.index(face, row, col);
        [self.data[i], self.data[i + 1], self.data[i + 2], self.data[i + 3]]
    }

    pub fn face(&self, face: CubeFace) -> &[u8] {
        let len = (self.size as usize).pow(2) * 4;
        let start = face.index() * len;
        &self.data[start..start + len]
    }

    /// All faces, layer-major.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Write the +X and +Y faces to `dir` as `pos_x.png` and `pos_y.png`.
    ///
    /// Failures are logged and skipped. Returns the files written.
    pub fn dump_faces(&self, dir: &Path) -> Vec<PathBuf> {
        if let Err(e) = std::fs::create_dir_all(dir) {
            log::warn!("Failed to create dump directory {}: {}", dir.display(), e);
            return Vec::new();
        }

        let mut written = Vec::new();
        for face in [CubeFace::PosX, CubeFace::PosY] {
            let path = dir.join(face.file_name());
            match image::save_buffer(
                &path,
                self.face(face),
                self.size,
                self.size,
                image::ColorType::Rgba8,
            ) {
                Ok(()) => {
                    log::info!("Wrote cubemap face {}", path.display());
                    written.push(path);
                }
                Err(e) => log::warn!("Failed to write {}: {}", path.display(), e),
            }
        }
        written
    }
}

fn sky_gradient(dir: Vec3) -> Vec3 {
    if dir.y >= 0.0 {
        HORIZON.lerp(ZENITH, dir.y.sqrt())
    } else {
        HORIZON.lerp(GROUND, (-dir.y).sqrt())
    }
}

fn noisy_sky(dir: Vec3, noise: &SimplexNoise) -> Result<Vec3, NoiseError> {
    let p = dir * NOISE_FREQUENCY;
    let n = noise.sample(p.x, p.y, p.z)?;
    let base = sky_gradient(dir);
    if dir.y >= 0.0 {
        let cloud = ((n + 1.0) * 0.5).powi(2) * dir.y.sqrt();
        Ok(base.lerp(CLOUD, cloud * 0.8))
    } else {
        Ok(base * (0.85 + 0.15 * n))
    }
}

fn to_rgba8(color: Vec3) -> [u8; 4] {
    let c = color.clamp(Vec3::ZERO, Vec3::ONE) * 255.0;
    [c.x.round() as u8, c.y.round() as u8, c.z.round() as u8, 255]
}
