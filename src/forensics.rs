//! Forensic transform stages: conditioning, residual extraction, spectral
//! analysis and tone mapping.

pub mod clahe;
pub mod condition;
pub mod residual;
pub mod spectrum;
pub mod tone;

use crate::error::{ForensicError, Result};
use crate::raster::Interpolation;
use condition::Bounds;
use serde::{Deserialize, Serialize};
use tone::ToneCurve;

pub const DEFAULT_MAX_DIMENSION: u32 = 2048;
pub const DEFAULT_MAX_PIXELS: u64 = 4_194_304;
pub const DEFAULT_BLUR_KERNEL: u32 = 3;
pub const MAX_BLUR_KERNEL: u32 = 31;
pub const DEFAULT_RESIDUAL_GAIN: f32 = 35.0;
pub const DEFAULT_CLIP_LIMIT: f32 = 20.0;
pub const MAX_TILES_PER_AXIS: u32 = 64;
pub const DEFAULT_GAMMA: f32 = 1.2;
pub const DEFAULT_GAIN: f32 = 1.0;
pub const DEFAULT_OFFSET: f32 = 0.0;

/// Tile layout for local contrast enhancement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileGrid {
    pub columns: u32,
    pub rows: u32,
}

impl Default for TileGrid {
    fn default() -> Self {
        Self {
            columns: 8,
            rows: 8,
        }
    }
}

impl TileGrid {
    fn is_valid(&self) -> bool {
        (1..=MAX_TILES_PER_AXIS).contains(&self.columns)
            && (1..=MAX_TILES_PER_AXIS).contains(&self.rows)
    }
}

/// Everything a pass needs besides the image. Immutable for the duration of a pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingParameters {
    pub gamma: f32,
    pub gain: f32,
    pub offset: f32,
    /// Side of the square low-pass kernel; odd.
    pub blur_kernel: u32,
    /// Visibility gain applied to the residual before contrast enhancement.
    pub residual_gain: f32,
    pub clip_limit: f32,
    pub tile_grid: TileGrid,
    pub max_dimension: u32,
    pub max_pixels: u64,
    pub resample: Interpolation,
}

impl Default for ProcessingParameters {
    fn default() -> Self {
        Self {
            gamma: DEFAULT_GAMMA,
            gain: DEFAULT_GAIN,
            offset: DEFAULT_OFFSET,
            blur_kernel: DEFAULT_BLUR_KERNEL,
            residual_gain: DEFAULT_RESIDUAL_GAIN,
            clip_limit: DEFAULT_CLIP_LIMIT,
            tile_grid: TileGrid::default(),
            max_dimension: DEFAULT_MAX_DIMENSION,
            max_pixels: DEFAULT_MAX_PIXELS,
            resample: Interpolation::default(),
        }
    }
}

fn positive(value: f32) -> bool {
    value.is_finite() && value > 0.0
}

fn valid_kernel(size: u32) -> bool {
    size % 2 == 1 && size <= MAX_BLUR_KERNEL
}

impl ProcessingParameters {
    pub fn bounds(&self) -> Bounds {
        Bounds {
            max_dimension: self.max_dimension,
            max_pixels: self.max_pixels,
        }
    }

    pub fn tone_curve(&self) -> ToneCurve {
        ToneCurve {
            gamma: self.gamma,
            gain: self.gain,
            offset: self.offset,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let problem = if !positive(self.gamma) {
            format!("gamma must be > 0, got {}", self.gamma)
        } else if !positive(self.gain) {
            format!("gain must be > 0, got {}", self.gain)
        } else if !self.offset.is_finite() {
            format!("offset must be finite, got {}", self.offset)
        } else if !valid_kernel(self.blur_kernel) {
            format!(
                "blur kernel must be odd and <= {MAX_BLUR_KERNEL}, got {}",
                self.blur_kernel
            )
        } else if !positive(self.residual_gain) {
            format!("residual gain must be > 0, got {}", self.residual_gain)
        } else if !(self.clip_limit.is_finite() && self.clip_limit >= 0.0) {
            format!("clip limit must be >= 0, got {}", self.clip_limit)
        } else if !self.tile_grid.is_valid() {
            format!(
                "tile grid must be 1..={MAX_TILES_PER_AXIS} per axis, got {}x{}",
                self.tile_grid.columns, self.tile_grid.rows
            )
        } else if self.max_dimension == 0 || self.max_pixels == 0 {
            format!(
                "bounds must be positive, got {} / {}",
                self.max_dimension, self.max_pixels
            )
        } else {
            return Ok(());
        };
        Err(ForensicError::InvalidInput(problem))
    }

    /// Replace every out-of-range field with its default.
    pub fn sanitized(mut self) -> Self {
        let defaults = Self::default();
        if !positive(self.gamma) {
            self.gamma = defaults.gamma;
        }
        if !positive(self.gain) {
            self.gain = defaults.gain;
        }
        if !self.offset.is_finite() {
            self.offset = defaults.offset;
        }
        if !valid_kernel(self.blur_kernel) {
            self.blur_kernel = defaults.blur_kernel;
        }
        if !positive(self.residual_gain) {
            self.residual_gain = defaults.residual_gain;
        }
        if !(self.clip_limit.is_finite() && self.clip_limit >= 0.0) {
            self.clip_limit = defaults.clip_limit;
        }
        if !self.tile_grid.is_valid() {
            self.tile_grid = defaults.tile_grid;
        }
        if self.max_dimension == 0 {
            self.max_dimension = defaults.max_dimension;
        }
        if self.max_pixels == 0 {
            self.max_pixels = defaults.max_pixels;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(ProcessingParameters::default().validate().is_ok());
    }

    #[test]
    fn rejects_non_positive_gamma_and_even_kernel() {
        let params = ProcessingParameters {
            gamma: 0.0,
            ..ProcessingParameters::default()
        };
        assert!(params.validate().is_err());

        let params = ProcessingParameters {
            blur_kernel: 4,
            ..ProcessingParameters::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn sanitize_restores_only_broken_fields() {
        let params = ProcessingParameters {
            gamma: -1.0,
            gain: 2.5,
            tile_grid: TileGrid { columns: 0, rows: 4 },
            ..ProcessingParameters::default()
        }
        .sanitized();
        assert_eq!(params.gamma, DEFAULT_GAMMA);
        assert_eq!(params.gain, 2.5);
        assert_eq!(params.tile_grid, TileGrid::default());
        assert!(params.validate().is_ok());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let params: ProcessingParameters = serde_json::from_str(r#"{ "gamma": 2.0 }"#).unwrap();
        assert_eq!(params.gamma, 2.0);
        assert_eq!(params.max_dimension, DEFAULT_MAX_DIMENSION);
        assert_eq!(params.resample, Interpolation::Bicubic);
    }
}
