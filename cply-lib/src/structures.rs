use zerocopy::byteorder::little_endian::{F32, U32};
use zerocopy::{Immutable, IntoBytes};

pub const CHUNK_SIZE: usize = 256;
pub const SCALE_CLAMP: f32 = 20.0;

#[derive(Debug, Default, Clone)]
pub struct GaussianCloud {
    pub num_points: usize,
    pub sh_bands: usize,
    // Source rest coefficients per color channel.
    pub sh_dim: usize,
    pub positions: Vec<f32>,
    pub scales: Vec<f32>,
    // Stored as x, y, z, w per point.
    pub rotations: Vec<f32>,
    pub alphas: Vec<f32>,
    pub colors: Vec<f32>,
    // Raw f_rest values in declaration order per point.
    pub sh: Vec<f32>,
}

// Field order is the on-disk order of the 18 floats in each chunk record
// and must match the chunk element's property declarations.
#[repr(C)]
#[derive(IntoBytes, Immutable, Debug, Clone, Copy)]
pub struct ChunkRange {
    pub min_x: F32,
    pub min_y: F32,
    pub min_z: F32,
    pub max_x: F32,
    pub max_y: F32,
    pub max_z: F32,
    pub min_scale_x: F32,
    pub min_scale_y: F32,
    pub min_scale_z: F32,
    pub max_scale_x: F32,
    pub max_scale_y: F32,
    pub max_scale_z: F32,
    pub min_r: F32,
    pub min_g: F32,
    pub min_b: F32,
    pub max_r: F32,
    pub max_g: F32,
    pub max_b: F32,
}

impl ChunkRange {
    pub fn from_minmax(
        pos_min: [f32; 3],
        pos_max: [f32; 3],
        scale_min: [f32; 3],
        scale_max: [f32; 3],
        color_min: [f32; 3],
        color_max: [f32; 3],
    ) -> Self {
        ChunkRange {
            min_x: F32::new(pos_min[0]),
            min_y: F32::new(pos_min[1]),
            min_z: F32::new(pos_min[2]),
            max_x: F32::new(pos_max[0]),
            max_y: F32::new(pos_max[1]),
            max_z: F32::new(pos_max[2]),
            min_scale_x: F32::new(scale_min[0]),
            min_scale_y: F32::new(scale_min[1]),
            min_scale_z: F32::new(scale_min[2]),
            max_scale_x: F32::new(scale_max[0]),
            max_scale_y: F32::new(scale_max[1]),
            max_scale_z: F32::new(scale_max[2]),
            min_r: F32::new(color_min[0]),
            min_g: F32::new(color_min[1]),
            min_b: F32::new(color_min[2]),
            max_r: F32::new(color_max[0]),
            max_g: F32::new(color_max[1]),
            max_b: F32::new(color_max[2]),
        }
    }
}

// One record per point, written in permuted order.
#[repr(C)]
#[derive(IntoBytes, Immutable, Debug, Clone, Copy)]
pub struct PackedVertex {
    pub position: U32,
    pub rotation: U32,
    pub scale: U32,
    pub color: U32,
}
