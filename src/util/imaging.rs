// Channel count of the interleaved RGBA8 buffers handed in by decoders.
pub const RGBA_CHANNELS: usize = 4;

// ITU-R BT.601 luma weights, the same weights decoders use for RGBA -> gray.
pub const LUMA_WEIGHTS: [f32; 3] = [0.299, 0.587, 0.114];

const BYTES_PER_MEGABYTE: f64 = 1024.0 * 1024.0;

#[inline(always)]
pub fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

// Round to nearest and clamp into the 8-bit range. NaN maps to zero.
#[inline(always)]
pub fn saturate_u8(value: f32) -> u8 {
    if value.is_nan() {
        return 0;
    }
    value.round().clamp(0.0, 255.0) as u8
}

#[inline(always)]
pub fn luma(rgba: [u8; 4]) -> f32 {
    LUMA_WEIGHTS[0] * rgba[0] as f32
        + LUMA_WEIGHTS[1] * rgba[1] as f32
        + LUMA_WEIGHTS[2] * rgba[2] as f32
}

// Mirror an out-of-range index back into `0..len` without repeating the
// edge sample (`gfedcb|abcdefgh|gfedcba`). Handles offsets larger than
// `len` by folding repeatedly.
pub fn reflect_101(index: isize, len: usize) -> usize {
    if len <= 1 {
        return 0;
    }
    let len = len as isize;
    let period = 2 * (len - 1);
    let mut folded = index.rem_euclid(period);
    if folded >= len {
        folded = period - folded;
    }
    folded as usize
}

fn is_five_smooth(mut n: usize) -> bool {
    if n == 0 {
        return false;
    }
    for factor in [2, 3, 5] {
        while n % factor == 0 {
            n /= factor;
        }
    }
    n == 1
}

// Smallest 2^a * 3^b * 5^c that is >= n.
pub fn optimal_dft_size(n: usize) -> usize {
    let mut candidate = n.max(1);
    while !is_five_smooth(candidate) {
        candidate += 1;
    }
    candidate
}

// Smallest even 5-smooth length >= n. Even lengths keep the quadrant swap
// an exact fftshift.
pub fn even_dft_size(n: usize) -> usize {
    2 * optimal_dft_size(n.div_ceil(2).max(1))
}

pub fn rgba_megabytes(width: u32, height: u32) -> f64 {
    (width as f64 * height as f64 * RGBA_CHANNELS as f64) / BYTES_PER_MEGABYTE
}
