//! Static vertex and index data.

use bytemuck::{Pod, Zeroable};

use crate::gfx::VertexFormat;

/// Position + RGBA color, used by the bloom cube.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct ColorVertex {
    pub position: [f32; 3],
    pub color: [f32; 4],
}

impl ColorVertex {
    const fn new(position: [f32; 3], color: [f32; 4]) -> Self {
        Self { position, color }
    }

    pub fn attributes() -> Vec<VertexFormat> {
        vec![VertexFormat::Float3, VertexFormat::Float4]
    }
}

/// Fullscreen quad corner in [0, 1]².
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct QuadVertex {
    pub position: [f32; 2],
}

impl QuadVertex {
    pub fn attributes() -> Vec<VertexFormat> {
        vec![VertexFormat::Float2]
    }
}

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct PositionVertex {
    pub position: [f32; 3],
}

impl PositionVertex {
    pub fn attributes() -> Vec<VertexFormat> {
        vec![VertexFormat::Float3]
    }
}

/// Position + normal, used by the lit cube in the skybox scene.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct LitVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
}

impl LitVertex {
    pub fn attributes() -> Vec<VertexFormat> {
        vec![VertexFormat::Float3, VertexFormat::Float3]
    }
}

pub const CUBE_INDEX_COUNT: u32 = 36;
pub const QUAD_VERTEX_COUNT: u32 = 4;

const RED: [f32; 4] = [1.0, 0.0, 0.0, 1.0];
const GREEN: [f32; 4] = [0.0, 1.0, 0.0, 1.0];
const BLUE: [f32; 4] = [0.0, 0.0, 1.0, 1.0];
const ORANGE: [f32; 4] = [1.0, 0.5, 0.0, 1.0];
const SKY: [f32; 4] = [0.0, 0.5, 1.0, 1.0];
const PINK: [f32; 4] = [1.0, 0.0, 0.5, 1.0];

/// 24 vertices (4 per face, one color per face) in [-1, 1]³.
///
/// Faces are wound clockwise seen from outside.
pub const CUBE_VERTICES: [ColorVertex; 24] = [
    // z = -1
    ColorVertex::new([-1.0, -1.0, -1.0], RED),
    ColorVertex::new([1.0, -1.0, -1.0], RED),
    ColorVertex::new([1.0, 1.0, -1.0], RED),
    ColorVertex::new([-1.0, 1.0, -1.0], RED),
    // z = +1
    ColorVertex::new([-1.0, -1.0, 1.0], GREEN),
    ColorVertex::new([1.0, -1.0, 1.0], GREEN),
    ColorVertex::new([1.0, 1.0, 1.0], GREEN),
    ColorVertex::new([-1.0, 1.0, 1.0], GREEN),
    // x = -1
    ColorVertex::new([-1.0, -1.0, -1.0], BLUE),
    ColorVertex::new([-1.0, 1.0, -1.0], BLUE),
    ColorVertex::new([-1.0, 1.0, 1.0], BLUE),
    ColorVertex::new([-1.0, -1.0, 1.0], BLUE),
    // x = +1
    ColorVertex::new([1.0, -1.0, -1.0], ORANGE),
    ColorVertex::new([1.0, 1.0, -1.0], ORANGE),
    ColorVertex::new([1.0, 1.0, 1.0], ORANGE),
    ColorVertex::new([1.0, -1.0, 1.0], ORANGE),
    // y = -1
    ColorVertex::new([-1.0, -1.0, -1.0], SKY),
    ColorVertex::new([-1.0, -1.0, 1.0], SKY),
    ColorVertex::new([1.0, -1.0, 1.0], SKY),
    ColorVertex::new([1.0, -1.0, -1.0], SKY),
    // y = +1
    ColorVertex::new([-1.0, 1.0, -1.0], PINK),
    ColorVertex::new([-1.0, 1.0, 1.0], PINK),
    ColorVertex::new([1.0, 1.0, 1.0], PINK),
    ColorVertex::new([1.0, 1.0, -1.0], PINK),
];

#[rustfmt::skip]
pub const CUBE_INDICES: [u16; 36] = [
    0, 1, 2,  0, 2, 3,
    6, 5, 4,  7, 6, 4,
    8, 9, 10,  8, 10, 11,
    14, 13, 12,  15, 14, 12,
    16, 17, 18,  16, 18, 19,
    22, 21, 20,  23, 22, 20,
];

/// Triangle strip covering [0, 1]²; shaders map it to NDC.
pub const QUAD_VERTICES: [QuadVertex; 4] = [
    QuadVertex { position: [0.0, 0.0] },
    QuadVertex { position: [1.0, 0.0] },
    QuadVertex { position: [0.0, 1.0] },
    QuadVertex { position: [1.0, 1.0] },
];

/// Unit cube corners for the skybox, same winding as [`CUBE_INDICES`].
pub fn create_skybox_geometry() -> (Vec<PositionVertex>, Vec<u16>) {
    let (vertices, indices) = create_lit_cube_geometry();
    (
        vertices
            .into_iter()
            .map(|v| PositionVertex { position: v.position })
            .collect(),
        indices,
    )
}

/// Cube of half-extent 1 with per-face normals, clockwise seen from outside.
pub fn create_lit_cube_geometry() -> (Vec<LitVertex>, Vec<u16>) {
    // (normal, u, v) with u x v == normal
    let faces: [([f32; 3], [f32; 3], [f32; 3]); 6] = [
        ([1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]),
        ([-1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0]),
        ([0.0, 1.0, 0.0], [0.0, 0.0, 1.0], [1.0, 0.0, 0.0]),
        ([0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]),
        ([0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
        ([0.0, 0.0, -1.0], [0.0, 1.0, 0.0], [1.0, 0.0, 0.0]),
    ];

    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);
    for (n, u, v) in faces {
        let base = vertices.len() as u16;
        for (su, sv) in [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
            let position = [
                n[0] + su * u[0] + sv * v[0],
                n[1] + su * u[1] + sv * v[1],
                n[2] + su * u[2] + sv * v[2],
            ];
            vertices.push(LitVertex { position, normal: n });
        }
        // Corners run counter-clockwise from outside; emit them reversed
        indices.extend_from_slice(&[base, base + 2, base + 1, base, base + 3, base + 2]);
    }
    (vertices, indices)
}
