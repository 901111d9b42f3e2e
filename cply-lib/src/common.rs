// Zeroth real spherical harmonic basis constant, maps DC color
// coefficients to display space via c * SH_C0 + 0.5.
pub(crate) const SH_C0: f32 = 0.28209479177387814;

#[inline]
pub(crate) fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

#[inline]
pub(crate) fn pack_unorm(v: f32, bits: u32) -> u32 {
    let max = ((1u32 << bits) - 1) as f32;
    (v.clamp(0.0, 1.0) * max).round() as u32
}

#[inline]
pub(crate) fn pack_111011(x: f32, y: f32, z: f32) -> u32 {
    (pack_unorm(x, 11) << 21) | (pack_unorm(y, 10) << 11) | pack_unorm(z, 11)
}

#[inline]
pub(crate) fn pack_8888(r: f32, g: f32, b: f32, a: f32) -> u32 {
    (pack_unorm(r, 8) << 24) | (pack_unorm(g, 8) << 16) | (pack_unorm(b, 8) << 8) | pack_unorm(a, 8)
}

// Smallest-three encoding: the largest component is dropped and rebuilt
// from the unit-norm constraint at decode time; its 2-bit index goes in
// the top bits, the remaining three components follow in attribute order.
pub(crate) fn pack_quaternion(q: [f32; 4]) -> u32 {
    let norm = (q[0] * q[0] + q[1] * q[1] + q[2] * q[2] + q[3] * q[3]).sqrt();
    let mut q = if norm > 0.0 {
        q.map(|c| c / norm)
    } else {
        [0.0, 0.0, 0.0, 1.0]
    };

    let mut largest = 0;
    for i in 1..4 {
        if q[i].abs() > q[largest].abs() {
            largest = i;
        }
    }
    // Collapse the double cover so the omitted component is always >= 0.
    if q[largest] < 0.0 {
        q = q.map(|c| -c);
    }

    let mut word = (largest as u32) << 30;
    let mut shift = 20i32;
    for (i, &c) in q.iter().enumerate() {
        if i == largest {
            continue;
        }
        word |= pack_unorm(c * std::f32::consts::FRAC_1_SQRT_2 + 0.5, 10) << shift;
        shift -= 10;
    }
    word
}

// Fixed affine quantization for SH rest coefficients, assumed within [-8, 8].
#[inline]
pub(crate) fn quantize_sh(x: f32) -> u8 {
    ((x * 0.125 + 0.5) * 256.0).round().clamp(0.0, 255.0) as u8
}

#[inline]
pub(crate) fn dim_for_bands(bands: usize) -> usize {
    match bands {
        1 => 3,
        2 => 8,
        3 => 15,
        _ => 0,
    }
}

#[inline]
pub(crate) const fn bands_for_rest_count(count: usize) -> usize {
    if count == 0 {
        0
    } else if count < 24 {
        1
    } else if count < 45 {
        2
    } else {
        3
    }
}

// Spreads the low 10 bits of x so they occupy every third bit.
#[inline]
pub(crate) fn part_1by2(mut x: u32) -> u32 {
    x &= 0x0000_03ff;
    x = (x | (x << 16)) & 0x0300_00ff;
    x = (x | (x << 8)) & 0x0300_f00f;
    x = (x | (x << 4)) & 0x030c_30c3;
    x = (x | (x << 2)) & 0x0924_9249;
    x
}

#[inline]
pub(crate) fn morton_3d(x: u32, y: u32, z: u32) -> u32 {
    (part_1by2(z) << 2) | (part_1by2(y) << 1) | part_1by2(x)
}
