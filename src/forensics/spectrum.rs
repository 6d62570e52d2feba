//! Centered, log-compressed magnitude spectrum of the raw residual.
//!
//! Rows are transformed with a real-input FFT and completed through
//! Hermitian symmetry; columns then go through a complex FFT.

use crate::arena::PassArena;
use crate::error::{ForensicError, Result};
use crate::raster::Plane;
use crate::util::imaging::even_dft_size;
use realfft::RealFftPlanner;
use rustfft::FftPlanner;
use rustfft::num_complex::Complex32;
use tracing::debug;

/// Padded transform size for a `width`x`height` residual; never smaller
/// than the input on either axis.
pub fn padded_dimensions(width: usize, height: usize) -> (usize, usize) {
    (even_dft_size(width), even_dft_size(height))
}

/// Exchange diagonally opposite quadrants so the zero-frequency term lands
/// in the centre. For odd sizes the middle row/column stays in place, which
/// keeps the operation its own inverse.
pub fn quadrant_swap<'a>(arena: &'a PassArena, src: &Plane<'_, f32>) -> Plane<'a, f32> {
    let (width, height) = (src.width(), src.height());
    let (cx, cy) = (width / 2, height / 2);
    let mut out = Plane::filled(arena, "spectrum_centered", width, height, 0.0f32);
    out.as_mut_slice().copy_from_slice(src.as_slice());

    // (source x, source y, destination x, destination y) of each block.
    let blocks = [
        (0, 0, width - cx, height - cy),
        (width - cx, height - cy, 0, 0),
        (width - cx, 0, 0, height - cy),
        (0, height - cy, width - cx, 0),
    ];
    for (sx, sy, dx, dy) in blocks {
        for row in 0..cy {
            let from = &src.row(sy + row)[sx..sx + cx];
            out.row_mut(dy + row)[dx..dx + cx].copy_from_slice(from);
        }
    }
    out
}

/// Min-max normalize into [0, 1]. A flat plane becomes all zeros.
pub fn normalize_min_max(values: &mut [f32]) {
    let (min, max) = values
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let range = max - min;
    if !(range > 0.0) || !range.is_finite() {
        values.fill(0.0);
        return;
    }
    for value in values.iter_mut() {
        *value = ((*value - min) / range).clamp(0.0, 1.0);
    }
}

pub struct SpectrumAnalyzer {
    real_planner: RealFftPlanner<f32>,
    planner: FftPlanner<f32>,
}

impl std::fmt::Debug for SpectrumAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpectrumAnalyzer").finish_non_exhaustive()
    }
}

impl Default for SpectrumAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl SpectrumAnalyzer {
    pub fn new() -> Self {
        Self {
            real_planner: RealFftPlanner::new(),
            planner: FftPlanner::new(),
        }
    }

    /// Plan transforms for a residual size ahead of the first pass.
    pub fn warm_up(&mut self, width: usize, height: usize) {
        let (padded_w, padded_h) = padded_dimensions(width, height);
        let _ = self.real_planner.plan_fft_forward(padded_w);
        let _ = self.planner.plan_fft_forward(padded_h);
    }

    pub fn analyze<'a>(
        &mut self,
        arena: &'a PassArena,
        residual: &Plane<'_, f32>,
    ) -> Result<Plane<'a, f32>> {
        let (width, height) = (residual.width(), residual.height());
        if width == 0 || height == 0 {
            return Err(ForensicError::processing("cannot transform an empty residual"));
        }
        let (padded_w, padded_h) = padded_dimensions(width, height);

        let mut spectrum =
            arena.lease("complex_spectrum", padded_w * padded_h, Complex32::default());
        self.transform_rows(arena, residual, &mut spectrum, padded_w)?;
        self.transform_columns(arena, &mut spectrum, padded_w, padded_h);

        let mut magnitude = Plane::filled(arena, "magnitude", padded_w, padded_h, 0.0f32);
        for (dst, value) in magnitude.as_mut_slice().iter_mut().zip(spectrum.iter()) {
            *dst = value.norm().ln_1p();
        }
        spectrum.release();

        let mut centered = quadrant_swap(arena, &magnitude);
        magnitude.release();
        normalize_min_max(centered.as_mut_slice());

        debug!(
            "[spectrum] {width}x{height} residual analysed at {padded_w}x{padded_h}"
        );
        Ok(centered)
    }

    fn transform_rows(
        &mut self,
        arena: &PassArena,
        residual: &Plane<'_, f32>,
        spectrum: &mut [Complex32],
        padded_w: usize,
    ) -> Result<()> {
        let r2c = self.real_planner.plan_fft_forward(padded_w);
        let mut input = arena.lease("row_input", padded_w, 0.0f32);
        let mut output = arena.lease("row_output", padded_w / 2 + 1, Complex32::default());
        let mut scratch = arena.lease("row_scratch", r2c.get_scratch_len(), Complex32::default());

        // Padding rows below the residual are zero and transform to zero.
        for y in 0..residual.height() {
            input.fill(0.0);
            input[..residual.width()].copy_from_slice(residual.row(y));
            r2c.process_with_scratch(&mut input, &mut output, &mut scratch)
                .map_err(|err| ForensicError::processing(format!("row transform: {err}")))?;

            let row = &mut spectrum[y * padded_w..(y + 1) * padded_w];
            row[..output.len()].copy_from_slice(&output);
            for k in output.len()..padded_w {
                row[k] = output[padded_w - k].conj();
            }
        }
        Ok(())
    }

    fn transform_columns(
        &mut self,
        arena: &PassArena,
        spectrum: &mut [Complex32],
        padded_w: usize,
        padded_h: usize,
    ) {
        let fft = self.planner.plan_fft_forward(padded_h);
        let mut column = arena.lease("column", padded_h, Complex32::default());
        let scratch_len = fft.get_inplace_scratch_len();
        let mut scratch = arena.lease("column_scratch", scratch_len, Complex32::default());

        for x in 0..padded_w {
            for (y, value) in column.iter_mut().enumerate() {
                *value = spectrum[y * padded_w + x];
            }
            fft.process_with_scratch(&mut column, &mut scratch);
            for (y, value) in column.iter().enumerate() {
                spectrum[y * padded_w + x] = *value;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plane_from<'a>(
        arena: &'a PassArena,
        width: usize,
        height: usize,
        f: impl Fn(usize, usize) -> f32,
    ) -> Plane<'a, f32> {
        let mut plane = Plane::filled(arena, "input", width, height, 0.0f32);
        for y in 0..height {
            for (x, value) in plane.row_mut(y).iter_mut().enumerate() {
                *value = f(x, y);
            }
        }
        plane
    }

    fn argmax(values: &[f32]) -> usize {
        values
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .map(|(idx, _)| idx)
            .unwrap()
    }

    #[test]
    fn padding_never_shrinks() {
        assert_eq!(padded_dimensions(100, 97), (100, 100));
        assert_eq!(padded_dimensions(1, 1), (2, 2));
        let (w, h) = padded_dimensions(2048, 1536);
        assert!(w >= 2048 && h >= 1536);
    }

    #[test]
    fn quadrant_swap_is_an_involution() {
        let arena = PassArena::new(0);
        for (w, h) in [(8, 6), (7, 5), (1, 4), (9, 1)] {
            let plane = plane_from(&arena, w, h, |x, y| (x * 31 + y * 17) as f32);
            let once = quadrant_swap(&arena, &plane);
            let twice = quadrant_swap(&arena, &once);
            assert_eq!(twice.as_slice(), plane.as_slice(), "{w}x{h}");
        }
    }

    #[test]
    fn quadrant_swap_moves_origin_to_centre() {
        let arena = PassArena::new(0);
        let plane = plane_from(&arena, 4, 4, |x, y| if (x, y) == (0, 0) { 1.0 } else { 0.0 });
        let swapped = quadrant_swap(&arena, &plane);
        assert_eq!(swapped.get(2, 2), 1.0);
        assert_eq!(swapped.as_slice().iter().sum::<f32>(), 1.0);
    }

    #[test]
    fn normalization_spans_unit_range() {
        let mut values = vec![3.0, 5.0, 4.0, 7.0];
        normalize_min_max(&mut values);
        assert_eq!(values, vec![0.0, 0.5, 0.25, 1.0]);

        let mut flat = vec![2.5; 6];
        normalize_min_max(&mut flat);
        assert!(flat.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn constant_residual_peaks_at_centre() {
        let arena = PassArena::new(0);
        let residual = plane_from(&arena, 16, 12, |_, _| 1.0);
        let spectrum = SpectrumAnalyzer::new().analyze(&arena, &residual).unwrap();
        assert_eq!((spectrum.width(), spectrum.height()), (16, 12));
        let peak = argmax(spectrum.as_slice());
        assert_eq!((peak % 16, peak / 16), (8, 6));
        assert_eq!(spectrum.get(8, 6), 1.0);
        let off_peak = spectrum
            .as_slice()
            .iter()
            .enumerate()
            .filter(|(idx, _)| *idx != peak)
            .all(|(_, v)| *v < 1e-3);
        assert!(off_peak);
    }

    #[test]
    fn zero_residual_yields_all_zero_spectrum() {
        let arena = PassArena::new(0);
        let residual = plane_from(&arena, 10, 10, |_, _| 0.0);
        let spectrum = SpectrumAnalyzer::new().analyze(&arena, &residual).unwrap();
        assert!(spectrum.as_slice().iter().all(|v| *v == 0.0));
    }

    #[test]
    fn matches_direct_dft_magnitude() {
        let arena = PassArena::new(0);
        let (w, h) = (6, 4);
        let residual = plane_from(&arena, w, h, |x, y| ((x * 3 + y * 5) % 7) as f32);

        let mut spectrum = arena.lease("spectrum", w * h, Complex32::default());
        let mut analyzer = SpectrumAnalyzer::new();
        analyzer.transform_rows(&arena, &residual, &mut spectrum, w).unwrap();
        analyzer.transform_columns(&arena, &mut spectrum, w, h);

        for v in 0..h {
            for u in 0..w {
                let mut expected = Complex32::default();
                for y in 0..h {
                    for x in 0..w {
                        let phase = -std::f32::consts::TAU
                            * (u as f32 * x as f32 / w as f32 + v as f32 * y as f32 / h as f32);
                        expected += Complex32::from_polar(residual.get(x, y), phase);
                    }
                }
                let actual = spectrum[v * w + u];
                assert!((actual - expected).norm() < 1e-2, "bin ({u}, {v})");
            }
        }
    }

    #[test]
    fn sine_grating_peaks_off_centre() {
        let arena = PassArena::new(0);
        let residual = plane_from(&arena, 32, 32, |x, _| {
            1.0 + (std::f32::consts::TAU * 4.0 * x as f32 / 32.0).cos()
        });
        let spectrum = SpectrumAnalyzer::new().analyze(&arena, &residual).unwrap();
        // DC at (16, 16); the grating sits four bins either side horizontally.
        assert!(spectrum.get(20, 16) > 0.5);
        assert!(spectrum.get(12, 16) > 0.5);
        assert!(spectrum.get(16, 20) < 0.05);
    }
}
