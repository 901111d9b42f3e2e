pub mod common;
pub mod error;
mod structures;

use common::bands_for_rest_count;
use common::dim_for_bands;
use common::morton_3d;
use common::pack_111011;
use common::pack_8888;
use common::pack_quaternion;
use common::quantize_sh;
use common::sigmoid;
use common::SH_C0;
use error::CplyError;
use foldhash::HashMap;
use foldhash::HashMapExt;
use std::io::Write;
use structures::ChunkRange;
use structures::GaussianCloud;
use structures::PackedVertex;
use structures::CHUNK_SIZE;
use structures::SCALE_CLAMP;
use zerocopy::IntoBytes;

// Spans below this are treated as degenerate and normalize to 0.
const MIN_SPAN: f32 = 1e-5;

#[inline]
fn next_line<'b>(buffer: &'b [u8], offset: &mut usize) -> Option<&'b [u8]> {
    if *offset >= buffer.len() {
        return None;
    }
    let start = *offset;

    match memchr::memchr(b'\n', &buffer[*offset..]) {
        Some(pos) => {
            *offset = start + pos + 1;
            Some(&buffer[start..start + pos])
        }
        None => {
            *offset = buffer.len();
            Some(&buffer[start..])
        }
    }
}

#[inline(always)]
fn idx_of(hm: &HashMap<&str, usize>, name: &str) -> Result<usize, CplyError> {
    hm.get(name)
        .cloned()
        .ok_or_else(|| CplyError::MissingField(name.to_string()))
}

#[inline(always)]
fn bytes_to_f32(data: &[u8], field_name: &str) -> Result<f32, CplyError> {
    Ok(f32::from_le_bytes(data.try_into().map_err(|e| {
        CplyError::MalformedHeader(format!("Byte conversion error for {}: {}", field_name, e))
    })?))
}

fn parse_count(bytes: &[u8]) -> Result<usize, CplyError> {
    let s = std::str::from_utf8(bytes)
        .map_err(|e| CplyError::MalformedHeader(format!("UTF-8 error: {}", e)))?;
    s.trim()
        .parse()
        .map_err(|e| CplyError::MalformedHeader(format!("Invalid element count: {}", e)))
}

#[inline(never)]
fn parse_splat(raw_data: &[u8]) -> Result<GaussianCloud, CplyError> {
    let mut offset = 0;

    let magic = next_line(raw_data, &mut offset)
        .ok_or_else(|| CplyError::MalformedHeader("empty input".to_string()))?;
    if magic != b"ply" {
        return Err(CplyError::MalformedHeader(
            "not a .ply file (missing 'ply' magic)".to_string(),
        ));
    }

    let mut saw_format = false;
    let mut num_points: Option<usize> = None;
    let mut field_names: Vec<&[u8]> = Vec::new();

    loop {
        let line = next_line(raw_data, &mut offset).ok_or_else(|| {
            CplyError::MalformedHeader("no 'end_header' found before EOF".to_string())
        })?;

        if line.starts_with(b"end_header") {
            break;
        }
        if line.starts_with(b"comment") {
            continue;
        }

        if line.starts_with(b"format ") {
            if line != b"format binary_little_endian 1.0" {
                return Err(CplyError::MalformedHeader(
                    "only binary_little_endian 1.0 is supported".to_string(),
                ));
            }
            saw_format = true;
        } else if let Some(rest) = line.strip_prefix(b"element ") {
            if let Some(count) = rest.strip_prefix(b"vertex ") {
                num_points = Some(parse_count(count)?);
            } else {
                return Err(CplyError::MalformedHeader(format!(
                    "unsupported element: {}",
                    String::from_utf8_lossy(rest)
                )));
            }
        } else if let Some(prop) = line.strip_prefix(b"property ") {
            if num_points.is_none() {
                return Err(CplyError::MalformedHeader(
                    "property declared before any element".to_string(),
                ));
            }
            if let Some(name) = prop.strip_prefix(b"float ") {
                field_names.push(name);
            } else {
                // Every property must occupy a 4-byte float slot; anything
                // else would shift the payload stride.
                return Err(CplyError::UnsupportedProperty(
                    String::from_utf8_lossy(prop).into_owned(),
                ));
            }
        } else {
            return Err(CplyError::MalformedHeader(format!(
                "unknown header line: {}",
                String::from_utf8_lossy(line)
            )));
        }
    }

    if !saw_format {
        return Err(CplyError::MalformedHeader(
            "missing format line".to_string(),
        ));
    }
    let num_points = num_points.ok_or_else(|| CplyError::MissingElement("vertex".to_string()))?;

    // Build field map
    let mut field_map: HashMap<&str, usize> = HashMap::with_capacity(field_names.len());
    for (i, &f_bytes) in field_names.iter().enumerate() {
        let s = std::str::from_utf8(f_bytes)
            .map_err(|e| CplyError::MalformedHeader(format!("UTF-8 error in field name: {}", e)))?;
        field_map.insert(s, i);
    }

    // Retrieve field indices
    let ix = idx_of(&field_map, "x")?;
    let iy = idx_of(&field_map, "y")?;
    let iz = idx_of(&field_map, "z")?;
    let is0 = idx_of(&field_map, "scale_0")?;
    let is1 = idx_of(&field_map, "scale_1")?;
    let is2 = idx_of(&field_map, "scale_2")?;
    let ir0 = idx_of(&field_map, "rot_0")?;
    let ir1 = idx_of(&field_map, "rot_1")?;
    let ir2 = idx_of(&field_map, "rot_2")?;
    let ir3 = idx_of(&field_map, "rot_3")?;
    let iop = idx_of(&field_map, "opacity")?;
    let ic0 = idx_of(&field_map, "f_dc_0")?;
    let ic1 = idx_of(&field_map, "f_dc_1")?;
    let ic2 = idx_of(&field_map, "f_dc_2")?;

    // Optional spherical harmonics: f_rest_0 to f_rest_44 (up to 45)
    let mut sh_idx = Vec::new();
    for i in 0..45 {
        let nm = format!("f_rest_{}", i);
        if let Some(&found) = field_map.get(nm.as_str()) {
            sh_idx.push(found);
        } else {
            break;
        }
    }
    if sh_idx.len() % 3 != 0 {
        return Err(CplyError::MalformedHeader(
            "incomplete spherical harmonics fields".to_string(),
        ));
    }

    let fields_per_vertex = field_names.len();
    let stride = fields_per_vertex * 4;
    let expected_bytes = num_points
        .checked_mul(stride)
        .ok_or_else(|| CplyError::MalformedHeader("overflow in byte calculation".to_string()))?;

    if raw_data.len() < offset + expected_bytes {
        return Err(CplyError::Truncated {
            needed: expected_bytes,
            have: raw_data.len() - offset,
        });
    }
    let data = &raw_data[offset..offset + expected_bytes];

    let mut cloud = GaussianCloud {
        num_points,
        sh_bands: bands_for_rest_count(sh_idx.len()),
        sh_dim: sh_idx.len() / 3,
        positions: Vec::with_capacity(num_points * 3),
        scales: Vec::with_capacity(num_points * 3),
        rotations: Vec::with_capacity(num_points * 4),
        alphas: Vec::with_capacity(num_points),
        colors: Vec::with_capacity(num_points * 3),
        sh: Vec::with_capacity(num_points * sh_idx.len()),
    };

    for v in 0..num_points {
        let vd = &data[v * stride..(v + 1) * stride];

        let x = bytes_to_f32(&vd[ix * 4..(ix + 1) * 4], "x")?;
        let y = bytes_to_f32(&vd[iy * 4..(iy + 1) * 4], "y")?;
        let z = bytes_to_f32(&vd[iz * 4..(iz + 1) * 4], "z")?;
        cloud.positions.extend_from_slice(&[x, y, z]);

        let s0 = bytes_to_f32(&vd[is0 * 4..(is0 + 1) * 4], "scale_0")?;
        let s1 = bytes_to_f32(&vd[is1 * 4..(is1 + 1) * 4], "scale_1")?;
        let s2 = bytes_to_f32(&vd[is2 * 4..(is2 + 1) * 4], "scale_2")?;
        cloud.scales.extend_from_slice(&[s0, s1, s2]);

        // PLY stores the scalar first; keep x, y, z, w internally.
        let r0 = bytes_to_f32(&vd[ir0 * 4..(ir0 + 1) * 4], "rot_0")?;
        let r1 = bytes_to_f32(&vd[ir1 * 4..(ir1 + 1) * 4], "rot_1")?;
        let r2 = bytes_to_f32(&vd[ir2 * 4..(ir2 + 1) * 4], "rot_2")?;
        let r3 = bytes_to_f32(&vd[ir3 * 4..(ir3 + 1) * 4], "rot_3")?;
        cloud.rotations.extend_from_slice(&[r1, r2, r3, r0]);

        let opacity = bytes_to_f32(&vd[iop * 4..(iop + 1) * 4], "opacity")?;
        cloud.alphas.push(opacity);

        let c0 = bytes_to_f32(&vd[ic0 * 4..(ic0 + 1) * 4], "f_dc_0")?;
        let c1 = bytes_to_f32(&vd[ic1 * 4..(ic1 + 1) * 4], "f_dc_1")?;
        let c2 = bytes_to_f32(&vd[ic2 * 4..(ic2 + 1) * 4], "f_dc_2")?;
        cloud.colors.extend_from_slice(&[c0, c1, c2]);

        for &idx in &sh_idx {
            let c = bytes_to_f32(&vd[idx * 4..(idx + 1) * 4], "f_rest")?;
            cloud.sh.push(c);
        }
    }

    Ok(cloud)
}

// Stable permutation of point indices by ascending Morton code.
fn morton_order(positions: &[f32]) -> Vec<u32> {
    let num_points = positions.len() / 3;

    let mut min = [f32::INFINITY; 3];
    let mut max = [f32::NEG_INFINITY; 3];
    for p in positions.chunks_exact(3) {
        for a in 0..3 {
            min[a] = min[a].min(p[a]);
            max[a] = max[a].max(p[a]);
        }
    }

    let mut inv = [0.0f32; 3];
    for a in 0..3 {
        let extent = max[a] - min[a];
        // Degenerate axes get a unit extent so every point lands on grid 0.
        inv[a] = if extent > 0.0 { 1.0 / extent } else { 1.0 };
    }

    let codes: Vec<u32> = positions
        .chunks_exact(3)
        .map(|p| {
            let gx = (((p[0] - min[0]) * inv[0] * 1024.0) as u32).min(1023);
            let gy = (((p[1] - min[1]) * inv[1] * 1024.0) as u32).min(1023);
            let gz = (((p[2] - min[2]) * inv[2] * 1024.0) as u32).min(1023);
            morton_3d(gx, gy, gz)
        })
        .collect();

    let mut order: Vec<u32> = (0..num_points as u32).collect();
    order.sort_by_key(|&i| codes[i as usize]);
    order
}

// Reused per-chunk gather buffers, 256 points at most.
struct ChunkScratch {
    positions: Vec<[f32; 3]>,
    scales: Vec<[f32; 3]>,
    colors: Vec<[f32; 3]>,
}

impl ChunkScratch {
    fn new() -> Self {
        ChunkScratch {
            positions: Vec::with_capacity(CHUNK_SIZE),
            scales: Vec::with_capacity(CHUNK_SIZE),
            colors: Vec::with_capacity(CHUNK_SIZE),
        }
    }
}

fn minmax3(vals: &[[f32; 3]]) -> ([f32; 3], [f32; 3]) {
    let mut min = [f32::INFINITY; 3];
    let mut max = [f32::NEG_INFINITY; 3];
    for v in vals {
        for a in 0..3 {
            min[a] = min[a].min(v[a]);
            max[a] = max[a].max(v[a]);
        }
    }
    (min, max)
}

#[inline]
fn normalize(v: f32, min: f32, max: f32) -> f32 {
    let span = max - min;
    if span < MIN_SPAN {
        0.0
    } else {
        (v - min) / span
    }
}

#[inline]
fn normalize3(v: [f32; 3], min: [f32; 3], max: [f32; 3]) -> [f32; 3] {
    [
        normalize(v[0], min[0], max[0]),
        normalize(v[1], min[1], max[1]),
        normalize(v[2], min[2], max[2]),
    ]
}

fn encode_chunk(
    cloud: &GaussianCloud,
    chunk: &[u32],
    scratch: &mut ChunkScratch,
) -> (ChunkRange, Vec<PackedVertex>) {
    scratch.positions.clear();
    scratch.scales.clear();
    scratch.colors.clear();

    for &src in chunk {
        let i = src as usize;
        let p = &cloud.positions[i * 3..i * 3 + 3];
        scratch.positions.push([p[0], p[1], p[2]]);

        let s = &cloud.scales[i * 3..i * 3 + 3];
        scratch.scales.push([
            s[0].clamp(-SCALE_CLAMP, SCALE_CLAMP),
            s[1].clamp(-SCALE_CLAMP, SCALE_CLAMP),
            s[2].clamp(-SCALE_CLAMP, SCALE_CLAMP),
        ]);

        let c = &cloud.colors[i * 3..i * 3 + 3];
        scratch.colors.push([
            c[0] * SH_C0 + 0.5,
            c[1] * SH_C0 + 0.5,
            c[2] * SH_C0 + 0.5,
        ]);
    }

    let (pos_min, pos_max) = minmax3(&scratch.positions);
    let (scale_min, scale_max) = minmax3(&scratch.scales);
    let (color_min, color_max) = minmax3(&scratch.colors);
    let range = ChunkRange::from_minmax(
        pos_min, pos_max, scale_min, scale_max, color_min, color_max,
    );

    let mut packed = Vec::with_capacity(chunk.len());
    for (k, &src) in chunk.iter().enumerate() {
        let i = src as usize;
        let [px, py, pz] = normalize3(scratch.positions[k], pos_min, pos_max);
        let [sx, sy, sz] = normalize3(scratch.scales[k], scale_min, scale_max);
        let [cr, cg, cb] = normalize3(scratch.colors[k], color_min, color_max);

        let rot = [
            cloud.rotations[i * 4],
            cloud.rotations[i * 4 + 1],
            cloud.rotations[i * 4 + 2],
            cloud.rotations[i * 4 + 3],
        ];
        let alpha = sigmoid(cloud.alphas[i]);

        packed.push(PackedVertex {
            position: pack_111011(px, py, pz).into(),
            rotation: pack_quaternion(rot).into(),
            scale: pack_111011(sx, sy, sz).into(),
            color: pack_8888(cr, cg, cb, alpha).into(),
        });
    }

    (range, packed)
}

// Each chunk touches only its own range record and its own vertex slots,
// so chunks are independent and may be encoded concurrently.
cfg_if::cfg_if! {
    if #[cfg(feature = "parallel")] {
        fn encode_chunks(
            cloud: &GaussianCloud,
            order: &[u32],
        ) -> (Vec<ChunkRange>, Vec<PackedVertex>) {
            use rayon::prelude::*;

            let encoded: Vec<(ChunkRange, Vec<PackedVertex>)> = order
                .par_chunks(CHUNK_SIZE)
                .map_init(ChunkScratch::new, |scratch, chunk| {
                    encode_chunk(cloud, chunk, scratch)
                })
                .collect();

            let mut ranges = Vec::with_capacity(encoded.len());
            let mut packed = Vec::with_capacity(order.len());
            for (range, verts) in encoded {
                ranges.push(range);
                packed.extend(verts);
            }
            (ranges, packed)
        }
    } else {
        fn encode_chunks(
            cloud: &GaussianCloud,
            order: &[u32],
        ) -> (Vec<ChunkRange>, Vec<PackedVertex>) {
            let mut scratch = ChunkScratch::new();
            let mut ranges = Vec::with_capacity(order.len().div_ceil(CHUNK_SIZE));
            let mut packed = Vec::with_capacity(order.len());
            for chunk in order.chunks(CHUNK_SIZE) {
                let (range, verts) = encode_chunk(cloud, chunk, &mut scratch);
                ranges.push(range);
                packed.extend(verts);
            }
            (ranges, packed)
        }
    }
}

// SH bytes use a fixed affine quantization, not the per-chunk ranges, but
// share the vertex array's permuted order.
fn quantize_sh_block(cloud: &GaussianCloud, order: &[u32]) -> Vec<u8> {
    let out_dim = dim_for_bands(cloud.sh_bands);
    if out_dim == 0 {
        return Vec::new();
    }

    let src_dim = cloud.sh_dim;
    let src_len = src_dim * 3;
    let mut out = Vec::with_capacity(order.len() * out_dim * 3);
    for &src in order {
        let base = src as usize * src_len;
        for channel in 0..3 {
            for j in 0..out_dim {
                let c = if j < src_dim {
                    cloud.sh[base + channel * src_dim + j]
                } else {
                    0.0
                };
                out.push(quantize_sh(c));
            }
        }
    }
    out
}

const CHUNK_PROPS: [&str; 18] = [
    "min_x",
    "min_y",
    "min_z",
    "max_x",
    "max_y",
    "max_z",
    "min_scale_x",
    "min_scale_y",
    "min_scale_z",
    "max_scale_x",
    "max_scale_y",
    "max_scale_z",
    "min_r",
    "min_g",
    "min_b",
    "max_r",
    "max_g",
    "max_b",
];

// Readers compute byte offsets from declaration order, so the property
// order here is load-bearing.
fn build_header(
    num_chunks: usize,
    num_points: usize,
    sh_coeffs: usize,
) -> Result<Vec<u8>, CplyError> {
    let mut out = Vec::new();
    out.extend_from_slice(b"ply\nformat binary_little_endian 1.0\n");

    writeln!(out, "element chunk {}", num_chunks).map_err(CplyError::IoError)?;
    for name in CHUNK_PROPS {
        writeln!(out, "property float {}", name).map_err(CplyError::IoError)?;
    }

    writeln!(out, "element vertex {}", num_points).map_err(CplyError::IoError)?;
    out.extend_from_slice(
        b"property uint packed_position\nproperty uint packed_rotation\n\
          property uint packed_scale\nproperty uint packed_color\n",
    );

    if sh_coeffs > 0 {
        writeln!(out, "element sh {}", num_points).map_err(CplyError::IoError)?;
        for i in 0..sh_coeffs {
            writeln!(out, "property uchar f_rest_{}", i).map_err(CplyError::IoError)?;
        }
    }

    out.extend_from_slice(b"end_header\n");
    Ok(out)
}

pub fn compress(raw_data: &[u8], output: &mut Vec<u8>) -> Result<(), CplyError> {
    let cloud = parse_splat(raw_data)?;
    let order = morton_order(&cloud.positions);
    let (ranges, packed) = encode_chunks(&cloud, &order);
    let sh_bytes = quantize_sh_block(&cloud, &order);

    let sh_coeffs = dim_for_bands(cloud.sh_bands) * 3;
    let header = build_header(ranges.len(), cloud.num_points, sh_coeffs)?;

    output.clear();
    output.reserve(
        header.len()
            + ranges.len() * size_of::<ChunkRange>()
            + packed.len() * size_of::<PackedVertex>()
            + sh_bytes.len(),
    );
    output.extend_from_slice(&header);
    output.extend_from_slice(ranges.as_bytes());
    output.extend_from_slice(packed.as_bytes());
    output.extend_from_slice(&sh_bytes);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::pack_unorm;

    const FIELDS: [&str; 14] = [
        "x", "y", "z", "scale_0", "scale_1", "scale_2", "rot_0", "rot_1", "rot_2", "rot_3",
        "opacity", "f_dc_0", "f_dc_1", "f_dc_2",
    ];

    fn build_test_ply(points: &[[f32; 14]], rest: &[Vec<f32>]) -> Vec<u8> {
        let rest_count = rest.first().map_or(0, |r| r.len());
        let mut header = String::from("ply\nformat binary_little_endian 1.0\n");
        header.push_str(&format!("element vertex {}\n", points.len()));
        for name in FIELDS {
            header.push_str(&format!("property float {}\n", name));
        }
        for i in 0..rest_count {
            header.push_str(&format!("property float f_rest_{}\n", i));
        }
        header.push_str("end_header\n");

        let mut out = header.into_bytes();
        for (v, p) in points.iter().enumerate() {
            for &f in p {
                out.extend_from_slice(&f.to_le_bytes());
            }
            if rest_count > 0 {
                for &f in &rest[v] {
                    out.extend_from_slice(&f.to_le_bytes());
                }
            }
        }
        out
    }

    fn header_len(out: &[u8]) -> usize {
        let marker = b"end_header\n";
        out.windows(marker.len())
            .position(|w| w == marker)
            .expect("no end_header in output")
            + marker.len()
    }

    fn read_f32(out: &[u8], offset: usize) -> f32 {
        f32::from_le_bytes(out[offset..offset + 4].try_into().unwrap())
    }

    fn read_u32(out: &[u8], offset: usize) -> u32 {
        u32::from_le_bytes(out[offset..offset + 4].try_into().unwrap())
    }

    #[test]
    fn test_pack_unorm_round_trip_bound() {
        for bits in [8u32, 10, 11] {
            let max = ((1u32 << bits) - 1) as f32;
            for k in 0..=1000 {
                let v = k as f32 / 1000.0;
                let decoded = pack_unorm(v, bits) as f32 / max;
                assert!(
                    (decoded - v).abs() <= 1.0 / max,
                    "bits={} v={} decoded={}",
                    bits,
                    v,
                    decoded
                );
            }
        }
    }

    #[test]
    fn test_pack_quaternion_double_cover() {
        let quats = [
            [0.1, 0.2, 0.3, 0.9],
            [-0.5, 0.5, 0.5, -0.5],
            [0.0, 0.0, 1.0, 0.0],
            [0.7, -0.1, 0.05, -0.7],
        ];
        for q in quats {
            let neg = q.map(|c: f32| -c);
            assert_eq!(pack_quaternion(q), pack_quaternion(neg), "q={:?}", q);
        }
    }

    #[test]
    fn test_pack_quaternion_zero_norm_is_identity() {
        assert_eq!(
            pack_quaternion([0.0, 0.0, 0.0, 0.0]),
            pack_quaternion([0.0, 0.0, 0.0, 1.0])
        );
    }

    #[test]
    fn test_morton_order_stable_for_duplicates() {
        let positions = vec![
            0.0, 0.0, 0.0, // 0
            0.0, 0.0, 0.0, // 1
            1.0, 1.0, 1.0, // 2
            0.0, 0.0, 0.0, // 3
        ];
        assert_eq!(morton_order(&positions), vec![0, 1, 3, 2]);

        // Fully coincident points keep source order.
        let same = vec![0.5f32; 15];
        assert_eq!(morton_order(&same), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_morton_order_deterministic() {
        let positions: Vec<f32> = (0..300).map(|i| (i % 17) as f32 * 0.3).collect();
        assert_eq!(morton_order(&positions), morton_order(&positions));
    }

    #[test]
    fn test_morton_order_empty() {
        assert!(morton_order(&[]).is_empty());
    }

    #[test]
    fn test_sh_band_derivation() {
        assert_eq!(bands_for_rest_count(0), 0);
        assert_eq!(bands_for_rest_count(3), 1);
        assert_eq!(bands_for_rest_count(23), 1);
        assert_eq!(bands_for_rest_count(24), 2);
        assert_eq!(bands_for_rest_count(44), 2);
        assert_eq!(bands_for_rest_count(45), 3);
        assert_eq!(bands_for_rest_count(48), 3);
    }

    #[test]
    fn test_quantize_sh_range() {
        assert_eq!(quantize_sh(0.0), 128);
        assert_eq!(quantize_sh(8.0), 255);
        assert_eq!(quantize_sh(-8.0), 0);
        assert_eq!(quantize_sh(100.0), 255);
    }

    #[test]
    fn test_three_point_scene() {
        let mut p0 = [0.0f32; 14];
        let mut p1 = [0.0f32; 14];
        let mut p2 = [0.0f32; 14];
        p1[0] = 1.0;
        p1[1] = 1.0;
        p1[2] = 1.0;
        p2[0] = 0.5;
        p2[1] = 0.5;
        p2[2] = 0.5;
        // Feed them out of spatial order; the sorter puts them back.
        let ply = build_test_ply(&[p1, p0, p2], &[]);

        let mut out = Vec::new();
        compress(&ply, &mut out).expect("compress failed");

        let text = String::from_utf8_lossy(&out[..header_len(&out)]).into_owned();
        assert!(text.contains("element chunk 1\n"));
        assert!(text.contains("element vertex 3\n"));
        assert!(!text.contains("element sh"));

        let hl = header_len(&out);
        assert_eq!(out.len(), hl + 18 * 4 + 3 * 4 * 4);

        // Chunk range covers the full unit cube.
        assert_eq!(read_f32(&out, hl), 0.0);
        assert_eq!(read_f32(&out, hl + 3 * 4), 1.0);

        // Morton order: origin first, far corner last.
        let verts = hl + 18 * 4;
        assert_eq!(read_u32(&out, verts), 0);
        assert_eq!(read_u32(&out, verts + 2 * 16), 0xFFFF_FFFF);

        // Middle point: 0.5 in all three normalized axes.
        let mid = (pack_unorm(0.5, 11) << 21) | (pack_unorm(0.5, 10) << 11) | pack_unorm(0.5, 11);
        assert_eq!(read_u32(&out, verts + 16), mid);

        // Identity rotation from the zero-quaternion fallback, degenerate
        // color channels, opacity logit 0 -> 0.5.
        assert_eq!(read_u32(&out, verts + 4), (3 << 30) | (512 << 20) | (512 << 10) | 512);
        assert_eq!(read_u32(&out, verts + 12), 128);
    }

    #[test]
    fn test_257_points_make_two_chunks() {
        let points: Vec<[f32; 14]> = (0..257)
            .map(|i| {
                let mut p = [0.0f32; 14];
                p[0] = i as f32 / 256.0;
                p
            })
            .collect();
        let ply = build_test_ply(&points, &[]);

        let mut out = Vec::new();
        compress(&ply, &mut out).expect("compress failed");

        let text = String::from_utf8_lossy(&out[..header_len(&out)]).into_owned();
        assert!(text.contains("element chunk 2\n"));
        assert!(text.contains("element vertex 257\n"));

        let hl = header_len(&out);
        assert_eq!(out.len(), hl + 2 * 18 * 4 + 257 * 4 * 4);

        // The lone point in the second chunk makes every range degenerate.
        let second = hl + 18 * 4;
        for (lo, hi) in [(0, 3), (1, 4), (2, 5), (6, 9), (7, 10), (8, 11), (12, 15), (13, 16), (14, 17)] {
            assert_eq!(
                read_f32(&out, second + lo * 4),
                read_f32(&out, second + hi * 4)
            );
        }

        // Degenerate ranges normalize to 0, so its position word is 0.
        let last_vert = hl + 2 * 18 * 4 + 256 * 16;
        assert_eq!(read_u32(&out, last_vert), 0);
    }

    #[test]
    fn test_degenerate_axis_packs_to_zero() {
        // All points share y, so the y bits of every position word are 0.
        let points: Vec<[f32; 14]> = (0..4)
            .map(|i| {
                let mut p = [0.0f32; 14];
                p[0] = i as f32;
                p[1] = 2.5;
                p[2] = (3 - i) as f32;
                p
            })
            .collect();
        let ply = build_test_ply(&points, &[]);

        let mut out = Vec::new();
        compress(&ply, &mut out).expect("compress failed");

        let verts = header_len(&out) + 18 * 4;
        for v in 0..4 {
            let word = read_u32(&out, verts + v * 16);
            assert_eq!((word >> 11) & 0x3ff, 0, "vertex {}", v);
        }
    }

    #[test]
    fn test_sh_block_band_three() {
        let p = [0.0f32; 14];
        let ply = build_test_ply(&[p], &[vec![0.0; 45]]);

        let mut out = Vec::new();
        compress(&ply, &mut out).expect("compress failed");

        let text = String::from_utf8_lossy(&out[..header_len(&out)]).into_owned();
        assert!(text.contains("element sh 1\n"));
        assert!(text.contains("property uchar f_rest_44\n"));

        let hl = header_len(&out);
        assert_eq!(out.len(), hl + 18 * 4 + 4 * 4 + 45);
        // Zero coefficients quantize to the midpoint byte.
        assert!(out[hl + 18 * 4 + 4 * 4..].iter().all(|&b| b == 128));
    }

    #[test]
    fn test_sh_block_pads_missing_coefficients() {
        // One rest field per channel still derives band 1 (3 per channel);
        // the absent coefficients quantize as zero.
        let p = [0.0f32; 14];
        let ply = build_test_ply(&[p], &[vec![4.0, 0.0, 0.0]]);

        let mut out = Vec::new();
        compress(&ply, &mut out).expect("compress failed");

        let hl = header_len(&out);
        let sh = out[hl + 18 * 4 + 4 * 4..].to_vec();
        assert_eq!(sh, vec![255, 128, 128, 128, 128, 128, 128, 128, 128]);
    }

    #[test]
    fn test_zero_vertex_ply() {
        let ply = build_test_ply(&[], &[]);
        let mut out = Vec::new();
        compress(&ply, &mut out).expect("compress failed");

        let text = String::from_utf8_lossy(&out[..header_len(&out)]).into_owned();
        assert!(text.contains("element chunk 0\n"));
        assert!(text.contains("element vertex 0\n"));
        assert_eq!(out.len(), header_len(&out));
    }

    #[test]
    fn test_rejects_missing_magic() {
        let err = parse_splat(b"obj\nformat binary_little_endian 1.0\n").unwrap_err();
        assert!(matches!(err, CplyError::MalformedHeader(_)));
    }

    #[test]
    fn test_rejects_ascii_format() {
        let err =
            parse_splat(b"ply\nformat ascii 1.0\nelement vertex 0\nend_header\n").unwrap_err();
        assert!(matches!(err, CplyError::MalformedHeader(_)));
    }

    #[test]
    fn test_rejects_non_float_property() {
        let data = b"ply\nformat binary_little_endian 1.0\nelement vertex 0\n\
                     property uchar red\nend_header\n";
        let err = parse_splat(data).unwrap_err();
        assert!(matches!(err, CplyError::UnsupportedProperty(_)));
    }

    #[test]
    fn test_rejects_missing_vertex_element() {
        let err = parse_splat(b"ply\nformat binary_little_endian 1.0\nend_header\n").unwrap_err();
        assert!(matches!(err, CplyError::MissingElement(_)));
    }

    #[test]
    fn test_rejects_missing_required_field() {
        let data = b"ply\nformat binary_little_endian 1.0\nelement vertex 0\n\
                     property float x\nend_header\n";
        let err = parse_splat(data).unwrap_err();
        assert!(matches!(err, CplyError::MissingField(_)));
    }

    #[test]
    fn test_rejects_truncated_payload() {
        let p = [0.0f32; 14];
        let mut ply = build_test_ply(&[p], &[]);
        ply.truncate(ply.len() - 8);
        let err = parse_splat(&ply).unwrap_err();
        assert!(matches!(err, CplyError::Truncated { .. }));
    }

    #[test]
    fn test_chunk_partition_counts() {
        for n in [1usize, 255, 256, 257, 600] {
            let order: Vec<u32> = (0..n as u32).collect();
            let chunks: Vec<_> = order.chunks(CHUNK_SIZE).collect();
            assert_eq!(chunks.len(), n.div_ceil(CHUNK_SIZE));
            assert_eq!(chunks.iter().map(|c| c.len()).sum::<usize>(), n);
            for c in &chunks[..chunks.len() - 1] {
                assert_eq!(c.len(), CHUNK_SIZE);
            }
        }
    }
}
