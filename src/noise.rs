//! 3D simplex noise.
//!
//! Tables are built by [`SimplexNoise::init`]; sampling before that is an
//! error rather than a read of empty tables. After init the field is
//! read-only and can be shared across threads.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NoiseError {
    #[error("noise field sampled before init()")]
    Uninitialized,
}

const F3: f32 = 1.0 / 3.0;
const G3: f32 = 1.0 / 6.0;

const GRAD3: [[f32; 3]; 12] = [
    [1.0, 1.0, 0.0],
    [-1.0, 1.0, 0.0],
    [1.0, -1.0, 0.0],
    [-1.0, -1.0, 0.0],
    [1.0, 0.0, 1.0],
    [-1.0, 0.0, 1.0],
    [1.0, 0.0, -1.0],
    [-1.0, 0.0, -1.0],
    [0.0, 1.0, 1.0],
    [0.0, -1.0, 1.0],
    [0.0, 1.0, -1.0],
    [0.0, -1.0, -1.0],
];

#[rustfmt::skip]
const PERMUTATION: [u8; 256] = [
    151, 160, 137, 91, 90, 15, 131, 13, 201, 95, 96, 53, 194, 233, 7, 225,
    140, 36, 103, 30, 69, 142, 8, 99, 37, 240, 21, 10, 23, 190, 6, 148,
    247, 120, 234, 75, 0, 26, 197, 62, 94, 252, 219, 203, 117, 35, 11, 32,
    57, 177, 33, 88, 237, 149, 56, 87, 174, 20, 125, 136, 171, 168, 68, 175,
    74, 165, 71, 134, 139, 48, 27, 166, 77, 146, 158, 231, 83, 111, 229, 122,
    60, 211, 133, 230, 220, 105, 92, 41, 55, 46, 245, 40, 244, 102, 143, 54,
    65, 25, 63, 161, 1, 216, 80, 73, 209, 76, 132, 187, 208, 89, 18, 169,
    200, 196, 135, 130, 116, 188, 159, 86, 164, 100, 109, 198, 173, 186, 3, 64,
    52, 217, 226, 250, 124, 123, 5, 202, 38, 147, 118, 126, 255, 82, 85, 212,
    207, 206, 59, 227, 47, 16, 58, 17, 182, 189, 28, 42, 223, 183, 170, 213,
    119, 248, 152, 2, 44, 154, 163, 70, 221, 153, 101, 155, 167, 43, 172, 9,
    129, 22, 39, 253, 19, 98, 108, 110, 79, 113, 224, 232, 178, 185, 112, 104,
    218, 246, 97, 228, 251, 34, 242, 193, 238, 210, 144, 12, 191, 179, 162, 241,
    81, 51, 145, 235, 249, 14, 239, 107, 49, 192, 214, 31, 181, 199, 106, 157,
    184, 84, 204, 176, 115, 121, 50, 45, 127, 4, 150, 254, 138, 236, 205, 93,
    222, 114, 67, 29, 24, 72, 243, 141, 128, 195, 78, 66, 215, 61, 156, 180,
];

/// Doubled permutation so lookups never wrap, plus the same table mod 12.
struct Tables {
    perm: [u8; 512],
    perm_mod12: [u8; 512],
}

impl Tables {
    fn build() -> Box<Self> {
        let mut tables = Box::new(Tables {
            perm: [0; 512],
            perm_mod12: [0; 512],
        });
        for i in 0..512 {
            let p = PERMUTATION[i & 255];
            tables.perm[i] = p;
            tables.perm_mod12[i] = p % 12;
        }
        tables
    }
}

#[derive(Default)]
pub struct SimplexNoise {
    tables: Option<Box<Tables>>,
}

impl SimplexNoise {
    /// An uninitialised field. Call [`init`](Self::init) before sampling.
    pub fn new() -> Self {
        Self { tables: None }
    }

    /// A field that is ready to sample.
    pub fn initialized() -> Self {
        let mut noise = Self::new();
        noise.init();
        noise
    }

    /// Build the permutation tables. Calling again rebuilds identical tables.
    pub fn init(&mut self) {
        self.tables = Some(Tables::build());
    }

    pub fn is_initialized(&self) -> bool {
        self.tables.is_some()
    }

    /// Noise value at `(x, y, z)`, roughly in `[-1, 1]`.
    pub fn sample(&self, x: f32, y: f32, z: f32) -> Result<f32, NoiseError> {
        let t = self.tables.as_deref().ok_or(NoiseError::Uninitialized)?;

        // Skew into simplex cell space
        let s = (x + y + z) * F3;
        let i = fast_floor(x + s);
        let j = fast_floor(y + s);
        let k = fast_floor(z + s);
        // Cells far from the origin wrap; only the low byte indexes the tables
        let u = i.wrapping_add(j).wrapping_add(k) as f32 * G3;
        let x0 = x - (i as f32 - u);
        let y0 = y - (j as f32 - u);
        let z0 = z - (k as f32 - u);

        let (i1, j1, k1, i2, j2, k2) = if x0 >= y0 {
            if y0 >= z0 {
                (1, 0, 0, 1, 1, 0)
            } else if x0 >= z0 {
                (1, 0, 0, 1, 0, 1)
            } else {
                (0, 0, 1, 1, 0, 1)
            }
        } else if y0 < z0 {
            (0, 0, 1, 0, 1, 1)
        } else if x0 < z0 {
            (0, 1, 0, 0, 1, 1)
        } else {
            (0, 1, 0, 1, 1, 0)
        };

        let x1 = x0 - i1 as f32 + G3;
        let y1 = y0 - j1 as f32 + G3;
        let z1 = z0 - k1 as f32 + G3;
        let x2 = x0 - i2 as f32 + 2.0 * G3;
        let y2 = y0 - j2 as f32 + 2.0 * G3;
        let z2 = z0 - k2 as f32 + 2.0 * G3;
        let x3 = x0 - 1.0 + 3.0 * G3;
        let y3 = y0 - 1.0 + 3.0 * G3;
        let z3 = z0 - 1.0 + 3.0 * G3;

        let ii = (i & 255) as usize;
        let jj = (j & 255) as usize;
        let kk = (k & 255) as usize;
        let hash = |di: usize, dj: usize, dk: usize| -> usize {
            let pk = t.perm[kk + dk] as usize;
            let pj = t.perm[jj + dj + pk] as usize;
            t.perm_mod12[ii + di + pj] as usize
        };
        let gi0 = hash(0, 0, 0);
        let gi1 = hash(i1, j1, k1);
        let gi2 = hash(i2, j2, k2);
        let gi3 = hash(1, 1, 1);

        let n0 = corner(gi0, x0, y0, z0);
        let n1 = corner(gi1, x1, y1, z1);
        let n2 = corner(gi2, x2, y2, z2);
        let n3 = corner(gi3, x3, y3, z3);

        Ok(32.0 * (n0 + n1 + n2 + n3))
    }
}

fn corner(gi: usize, x: f32, y: f32, z: f32) -> f32 {
    let t = 0.6 - x * x - y * y - z * z;
    if t < 0.0 {
        return 0.0;
    }
    let g = GRAD3[gi];
    let t2 = t * t;
    t2 * t2 * (g[0] * x + g[1] * y + g[2] * z)
}

fn fast_floor(x: f32) -> i32 {
    let xi = x as i32;
    if x < xi as f32 {
        xi.wrapping_sub(1)
    } else {
        xi
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Small deterministic LCG so the test inputs are reproducible.
    fn inputs(count: usize) -> Vec<[f32; 3]> {
        let mut state: u64 = 0x2545_F491_4F6C_DD1D;
        let mut next = move || {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            ((state >> 40) as f32 / (1u64 << 24) as f32) * 200.0 - 100.0
        };
        (0..count).map(|_| [next(), next(), next()]).collect()
    }

    #[test]
    fn test_uninitialized_sample_fails() {
        let mut noise = SimplexNoise::new();
        assert!(!noise.is_initialized());
        assert_eq!(noise.sample(0.5, 0.5, 0.5), Err(NoiseError::Uninitialized));

        noise.init();
        assert!(noise.is_initialized());
        assert!(noise.sample(0.5, 0.5, 0.5).is_ok());
    }

    #[test]
    fn test_output_range() {
        let noise = SimplexNoise::initialized();
        for [x, y, z] in inputs(20_000) {
            let v = noise.sample(x, y, z).unwrap();
            assert!((-1.001..=1.001).contains(&v), "noise({x}, {y}, {z}) = {v}");
        }
    }

    #[test]
    fn test_repeated_samples_are_bit_identical() {
        let noise = SimplexNoise::initialized();
        for [x, y, z] in inputs(500) {
            let a = noise.sample(x, y, z).unwrap();
            let b = noise.sample(x, y, z).unwrap();
            assert_eq!(a.to_bits(), b.to_bits());
        }
    }

    #[test]
    fn test_reinit_yields_identical_values() {
        let mut noise = SimplexNoise::initialized();
        let before: Vec<f32> = inputs(200)
            .iter()
            .map(|[x, y, z]| noise.sample(*x, *y, *z).unwrap())
            .collect();
        noise.init();
        let after: Vec<f32> = inputs(200)
            .iter()
            .map(|[x, y, z]| noise.sample(*x, *y, *z).unwrap())
            .collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_origin_is_zero() {
        let noise = SimplexNoise::initialized();
        assert_eq!(noise.sample(0.0, 0.0, 0.0).unwrap(), 0.0);
    }

    #[test]
    fn test_field_varies() {
        let noise = SimplexNoise::initialized();
        let a = noise.sample(0.3, 0.7, 0.1).unwrap();
        let b = noise.sample(1.3, 0.2, 2.9).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_shareable_across_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SimplexNoise>();

        let noise = std::sync::Arc::new(SimplexNoise::initialized());
        let expected = noise.sample(0.25, 0.5, 0.75).unwrap();
        let handle = {
            let noise = noise.clone();
            std::thread::spawn(move || noise.sample(0.25, 0.5, 0.75).unwrap())
        };
        assert_eq!(handle.join().unwrap().to_bits(), expected.to_bits());
    }

    #[test]
    fn test_huge_coordinates_stay_in_range() {
        let noise = SimplexNoise::initialized();
        let points = [
            [1.0e9, 1.0e9, 1.0e9],
            [-1.0e9, -1.0e9, -1.0e9],
            [1.0e10, 0.0, 0.0],
            [-1.0e10, 0.0, 0.0],
            [1.0e10, -1.0e9, 3.5],
            [f32::MAX, f32::MAX, f32::MAX],
            [-f32::MAX, -f32::MAX, -f32::MAX],
            [f32::MAX, -f32::MAX, 0.0],
        ];
        for [x, y, z] in points {
            let v = noise.sample(x, y, z).unwrap();
            assert!(v.abs() <= 1.0 + 1e-3, "noise({x}, {y}, {z}) = {v}");
        }
    }
}
