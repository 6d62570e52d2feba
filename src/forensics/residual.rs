//! Spatial noise residual: |luma - blur(luma)|.

use super::ProcessingParameters;
use super::clahe::Clahe;
use super::condition::ConditionedImage;
use crate::arena::PassArena;
use crate::error::{ForensicError, Result};
use crate::raster::{Plane, RawImage};
use crate::util::imaging::{luma, reflect_101, saturate_u8};
use tracing::debug;

// Binomial kernels for the small sizes; wider kernels are sampled from a
// Gaussian with sigma derived from the size.
const KERNEL_1: [f32; 1] = [1.0];
const KERNEL_3: [f32; 3] = [0.25, 0.5, 0.25];
const KERNEL_5: [f32; 5] = [0.0625, 0.25, 0.375, 0.25, 0.0625];
const KERNEL_7: [f32; 7] = [0.03125, 0.109375, 0.21875, 0.28125, 0.21875, 0.109375, 0.03125];

/// Residual planes produced by one pass.
#[derive(Debug)]
pub struct Residual<'a> {
    /// Unscaled magnitude at full precision; feeds the spectral stage.
    pub raw: Plane<'a, f32>,
    /// Gain-scaled, contrast-enhanced 8-bit view.
    pub display: Plane<'a, u8>,
}

pub fn gaussian_kernel(size: usize) -> Result<Vec<f32>> {
    match size {
        1 => Ok(KERNEL_1.to_vec()),
        3 => Ok(KERNEL_3.to_vec()),
        5 => Ok(KERNEL_5.to_vec()),
        7 => Ok(KERNEL_7.to_vec()),
        n if n % 2 == 1 => {
            let sigma = 0.3 * ((n as f32 - 1.0) * 0.5 - 1.0) + 0.8;
            let center = (n / 2) as f32;
            let mut kernel: Vec<f32> = (0..n)
                .map(|i| {
                    let d = i as f32 - center;
                    (-(d * d) / (2.0 * sigma * sigma)).exp()
                })
                .collect();
            let sum: f32 = kernel.iter().sum();
            kernel.iter_mut().for_each(|w| *w /= sum);
            Ok(kernel)
        }
        n => Err(ForensicError::invalid_input(format!(
            "blur kernel must be odd, got {n}"
        ))),
    }
}

pub fn luminance<'a>(arena: &'a PassArena, image: &RawImage) -> Result<Plane<'a, f32>> {
    let pixels: &[[u8; 4]] = bytemuck::try_cast_slice(image.pixels())
        .map_err(|err| ForensicError::processing(format!("RGBA buffer: {err}")))?;
    let (width, height) = (image.width() as usize, image.height() as usize);
    let mut gray = Plane::filled(arena, "luminance", width, height, 0.0f32);
    for (dst, &rgba) in gray.as_mut_slice().iter_mut().zip(pixels) {
        *dst = luma(rgba);
    }
    Ok(gray)
}

/// Separable blur with mirrored borders.
pub fn gaussian_blur<'a>(
    arena: &'a PassArena,
    src: &Plane<'_, f32>,
    kernel_size: usize,
) -> Result<Plane<'a, f32>> {
    let kernel = gaussian_kernel(kernel_size)?;
    let radius = (kernel.len() / 2) as isize;
    let (width, height) = (src.width(), src.height());

    let mut horizontal = Plane::filled(arena, "blur_h", width, height, 0.0f32);
    for y in 0..height {
        let row = src.row(y);
        for (x, dst) in horizontal.row_mut(y).iter_mut().enumerate() {
            *dst = kernel
                .iter()
                .enumerate()
                .map(|(k, w)| w * row[reflect_101(x as isize + k as isize - radius, width)])
                .sum();
        }
    }

    let mut blurred = Plane::filled(arena, "blurred", width, height, 0.0f32);
    for y in 0..height {
        let out = blurred.row_mut(y);
        for (k, w) in kernel.iter().enumerate() {
            let source = horizontal.row(reflect_101(y as isize + k as isize - radius, height));
            for (dst, value) in out.iter_mut().zip(source) {
                *dst += w * value;
            }
        }
    }
    horizontal.release();

    Ok(blurred)
}

pub fn extract_residual<'a>(
    arena: &'a PassArena,
    image: &ConditionedImage,
    params: &ProcessingParameters,
) -> Result<Residual<'a>> {
    let gray = luminance(arena, image.image())?;
    let smoothed = gaussian_blur(arena, &gray, params.blur_kernel as usize)?;

    let mut raw = Plane::filled(arena, "residual_raw", gray.width(), gray.height(), 0.0f32);
    for ((dst, g), s) in raw
        .as_mut_slice()
        .iter_mut()
        .zip(gray.as_slice())
        .zip(smoothed.as_slice())
    {
        *dst = (g - s).abs();
    }
    gray.release();
    smoothed.release();

    let mut scaled = Plane::filled(arena, "residual_scaled", raw.width(), raw.height(), 0u8);
    for (dst, value) in scaled.as_mut_slice().iter_mut().zip(raw.as_slice()) {
        *dst = saturate_u8(value * params.residual_gain);
    }
    let display = Clahe::new(params.clip_limit, params.tile_grid).apply(arena, &scaled)?;
    scaled.release();

    debug!(
        "[residual] {}x{} residual extracted (kernel {}, gain {})",
        raw.width(),
        raw.height(),
        params.blur_kernel,
        params.residual_gain
    );
    Ok(Residual { raw, display })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forensics::condition::{Bounds, condition};
    use crate::raster::Interpolation;

    fn conditioned(width: u32, height: u32, f: impl Fn(u32, u32) -> u8) -> ConditionedImage {
        let mut pixels = Vec::with_capacity((width * height * 4) as usize);
        for y in 0..height {
            for x in 0..width {
                let v = f(x, y);
                pixels.extend_from_slice(&[v, v, v, 255]);
            }
        }
        let image = RawImage::new(width, height, pixels).unwrap();
        condition(&image, Bounds::default(), Interpolation::default()).unwrap()
    }

    #[test]
    fn kernels_are_normalized() {
        for size in [1, 3, 5, 7, 9, 15] {
            let kernel = gaussian_kernel(size).unwrap();
            assert_eq!(kernel.len(), size);
            assert!((kernel.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        }
        assert!(gaussian_kernel(4).is_err());
    }

    #[test]
    fn uniform_gray_has_near_zero_residual() {
        let arena = PassArena::new(0);
        let image = conditioned(100, 100, |_, _| 128);
        let residual = extract_residual(&arena, &image, &ProcessingParameters::default()).unwrap();
        assert_eq!((residual.raw.width(), residual.raw.height()), (100, 100));
        assert!(residual.raw.as_slice().iter().all(|v| *v < 1e-3));
    }

    #[test]
    fn isolated_spike_leaves_residual_footprint() {
        let arena = PassArena::new(0);
        let image = conditioned(9, 9, |x, y| if (x, y) == (4, 4) { 200 } else { 0 });
        let residual = extract_residual(&arena, &image, &ProcessingParameters::default()).unwrap();
        let raw = &residual.raw;
        // Centre keeps 1 - 0.25 of the spike; direct neighbours see 0.125.
        assert!((raw.get(4, 4) - 150.0).abs() < 0.5);
        assert!((raw.get(3, 4) - 25.0).abs() < 0.5);
        assert!(raw.get(0, 0) < 1e-4);
        assert_eq!(residual.display.width(), 9);
    }

    #[test]
    fn all_intermediates_are_settled() {
        let arena = PassArena::new(0);
        let image = conditioned(32, 16, |x, y| ((x * 13 + y * 29) % 256) as u8);
        let residual = extract_residual(&arena, &image, &ProcessingParameters::default()).unwrap();
        drop(residual);
        assert_eq!(arena.stats().outstanding(), 0);
    }

    #[test]
    fn even_kernel_error_settles_the_luminance_plane() {
        let arena = PassArena::new(0);
        let image = conditioned(8, 8, |x, _| (x * 30) as u8);
        let params = ProcessingParameters {
            blur_kernel: 6,
            ..ProcessingParameters::default()
        };
        let err = extract_residual(&arena, &image, &params).unwrap_err();
        assert!(err.to_string().contains("odd"));

        let stats = arena.stats();
        assert_eq!(stats.leased, 1);
        assert_eq!(stats.released, 1);
        assert_eq!(stats.outstanding(), 0);
    }
}
