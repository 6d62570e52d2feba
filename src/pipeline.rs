//! One forensic pass from conditioned image to display buffers, plus the
//! scheduling layers that decide when a pass runs.

pub mod coordinator;
pub mod worker;

use crate::arena::{ArenaStats, PassArena};
use crate::error::Result;
use crate::forensics::ProcessingParameters;
use crate::forensics::condition::ConditionedImage;
use crate::forensics::residual::{Residual, extract_residual};
use crate::forensics::spectrum::SpectrumAnalyzer;
use crate::forensics::tone::map_tone;
use crate::raster::{DisplayBuffer, Interpolation};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::debug;

pub const DEFAULT_RESIDUAL_WIDTH: u32 = 1024;
pub const DEFAULT_RESIDUAL_HEIGHT: u32 = 768;
pub const DEFAULT_SPECTRUM_SIZE: u32 = 512;
pub const MIN_VIEW_DIMENSION: u32 = 200;

/// Canvas sizes requested by the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresentationTarget {
    /// Bounding box for the residual view; the image aspect is kept.
    pub residual_width: u32,
    pub residual_height: u32,
    /// Side of the square spectrum view.
    pub spectrum_size: u32,
    pub residual_filter: Interpolation,
    pub spectrum_filter: Interpolation,
}

impl Default for PresentationTarget {
    fn default() -> Self {
        Self {
            residual_width: DEFAULT_RESIDUAL_WIDTH,
            residual_height: DEFAULT_RESIDUAL_HEIGHT,
            spectrum_size: DEFAULT_SPECTRUM_SIZE,
            residual_filter: Interpolation::Bilinear,
            spectrum_filter: Interpolation::Nearest,
        }
    }
}

impl PresentationTarget {
    pub fn sanitized(mut self) -> Self {
        let defaults = Self::default();
        if self.residual_width == 0 || self.residual_height == 0 {
            self.residual_width = defaults.residual_width;
            self.residual_height = defaults.residual_height;
        }
        if self.spectrum_size == 0 {
            self.spectrum_size = defaults.spectrum_size;
        }
        self
    }

    pub fn residual_dimensions(&self, source_width: u32, source_height: u32) -> (u32, u32) {
        fit_within(
            source_width,
            source_height,
            self.residual_width,
            self.residual_height,
            MIN_VIEW_DIMENSION,
        )
    }
}

/// Largest aspect-preserving size inside `max_w`x`max_h`. When both sides
/// end up under `min_dimension`, the larger side is raised to it.
pub fn fit_within(
    source_w: u32,
    source_h: u32,
    max_w: u32,
    max_h: u32,
    min_dimension: u32,
) -> (u32, u32) {
    if source_w == 0 || source_h == 0 {
        return (max_w.max(1), max_h.max(1));
    }
    let aspect = source_w as f64 / source_h as f64;
    let (max_w, max_h) = (max_w.max(1) as f64, max_h.max(1) as f64);

    let (mut w, mut h) = if max_w / max_h > aspect {
        (max_h * aspect, max_h)
    } else {
        (max_w, max_w / aspect)
    };

    let min = min_dimension as f64;
    if w < min && h < min {
        if aspect > 1.0 {
            (w, h) = (min, min / aspect);
        } else {
            (w, h) = (min * aspect, min);
        }
    }

    (w.round().max(1.0) as u32, h.round().max(1.0) as u32)
}

/// Everything a runner needs for one pass, captured when the pass is scheduled.
#[derive(Debug, Clone)]
pub struct PassJob {
    pub id: u64,
    pub image: ConditionedImage,
    pub params: ProcessingParameters,
    pub target: PresentationTarget,
}

#[derive(Debug, Clone)]
pub struct PassOutput {
    pub residual: DisplayBuffer,
    pub spectrum: DisplayBuffer,
    pub conditioned_dimensions: (u32, u32),
    pub elapsed: Duration,
    pub arena: ArenaStats,
}

/// Executes a single pass synchronously.
pub trait PassRunner {
    fn run(&mut self, job: &PassJob) -> Result<PassOutput>;
}

/// The real runner: residual, spectrum and tone stages over one arena.
#[derive(Debug, Default)]
pub struct ForensicPipeline {
    analyzer: SpectrumAnalyzer,
}

impl ForensicPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-plan transforms for the largest image the bounds admit.
    pub fn warmed_up(mut self, params: &ProcessingParameters) -> Self {
        let side = params.max_dimension as usize;
        self.analyzer.warm_up(side, side);
        self
    }
}

impl PassRunner for ForensicPipeline {
    fn run(&mut self, job: &PassJob) -> Result<PassOutput> {
        let started = Instant::now();
        let arena = PassArena::new(job.id);
        let (residual, spectrum) = self.render(&arena, job)?;

        let stats = arena.stats();
        debug!(
            "[pipeline] pass {}: residual {}x{}, spectrum {}x{}, peak {} bytes",
            job.id,
            residual.width,
            residual.height,
            spectrum.width,
            spectrum.height,
            stats.peak_bytes
        );
        Ok(PassOutput {
            residual,
            spectrum,
            conditioned_dimensions: job.image.dimensions(),
            elapsed: started.elapsed(),
            arena: stats,
        })
    }
}

impl ForensicPipeline {
    fn render(
        &mut self,
        arena: &PassArena,
        job: &PassJob,
    ) -> Result<(DisplayBuffer, DisplayBuffer)> {
        let Residual { raw, display } = extract_residual(arena, &job.image, &job.params)?;
        let spectrum = self.analyzer.analyze(arena, &raw)?;
        raw.release();
        let toned = map_tone(arena, &spectrum, &job.params.tone_curve());
        spectrum.release();

        let (residual_w, residual_h) = job
            .target
            .residual_dimensions(job.image.width(), job.image.height());
        let residual = DisplayBuffer::from_plane(display).resized(
            residual_w,
            residual_h,
            job.target.residual_filter,
        )?;
        let side = job.target.spectrum_size;
        let spectrum =
            DisplayBuffer::from_plane(toned).resized(side, side, job.target.spectrum_filter)?;

        Ok((residual, spectrum))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forensics::condition::{Bounds, condition};
    use crate::raster::RawImage;

    fn job(width: u32, height: u32) -> PassJob {
        let mut pixels = Vec::with_capacity((width * height * 4) as usize);
        for y in 0..height {
            for x in 0..width {
                let v = ((x * 37 + y * 11) % 251) as u8;
                pixels.extend_from_slice(&[v, v / 2, 255 - v, 255]);
            }
        }
        let raw = RawImage::new(width, height, pixels).unwrap();
        PassJob {
            id: 1,
            image: condition(&raw, Bounds::default(), Interpolation::default()).unwrap(),
            params: ProcessingParameters::default(),
            target: PresentationTarget {
                residual_width: 320,
                residual_height: 240,
                spectrum_size: 128,
                ..PresentationTarget::default()
            },
        }
    }

    #[test]
    fn fit_within_keeps_aspect() {
        assert_eq!(fit_within(2000, 1000, 1024, 768, 200), (1024, 512));
        assert_eq!(fit_within(1000, 2000, 1024, 768, 200), (384, 768));
        assert_eq!(fit_within(50, 50, 100, 100, 0), (100, 100));
    }

    #[test]
    fn fit_within_enforces_minimum_view() {
        assert_eq!(fit_within(400, 100, 150, 150, 200), (200, 50));
        assert_eq!(fit_within(100, 400, 150, 150, 200), (50, 200));
    }

    #[test]
    fn pass_produces_both_views_at_target_size() {
        let mut pipeline = ForensicPipeline::new();
        let output = pipeline.run(&job(64, 48)).unwrap();
        assert_eq!(output.residual.dimensions(), (320, 240));
        assert_eq!(output.spectrum.dimensions(), (128, 128));
        assert_eq!(output.conditioned_dimensions, (64, 48));
        assert_eq!(output.arena.outstanding(), 0);
        assert_eq!(output.arena.failed_releases, 0);
        assert_eq!(output.arena.handed_off, 2);
    }

    #[test]
    fn invalid_kernel_fails_the_pass() {
        let mut bad = job(16, 16);
        bad.params.blur_kernel = 4;
        assert!(ForensicPipeline::new().run(&bad).is_err());
    }

    #[test]
    fn failed_pass_settles_every_buffer() {
        let mut bad = job(16, 16);
        bad.params.blur_kernel = 4;
        let arena = PassArena::new(bad.id);
        let err = ForensicPipeline::new().render(&arena, &bad).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidInput);

        let stats = arena.stats();
        // The luminance plane was already leased when the blur stage failed.
        assert!(stats.leased >= 1);
        assert_eq!(stats.outstanding(), 0);
        assert_eq!(stats.failed_releases, 0);
        assert_eq!(stats.live_bytes, 0);
    }

    #[test]
    fn partial_target_json_fills_defaults() {
        let target: PresentationTarget =
            serde_json::from_str(r#"{ "spectrum_size": 256 }"#).unwrap();
        assert_eq!(target.spectrum_size, 256);
        assert_eq!(target.residual_width, DEFAULT_RESIDUAL_WIDTH);
        assert_eq!(target.spectrum_filter, Interpolation::Nearest);
    }
}
