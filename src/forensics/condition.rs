//! Bounds-enforcing input conditioner.

use crate::error::{ForensicError, Result};
use crate::raster::{Interpolation, RawImage};
use crate::util::imaging::rgba_megabytes;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{DEFAULT_MAX_DIMENSION, DEFAULT_MAX_PIXELS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bounds {
    pub max_dimension: u32,
    pub max_pixels: u64,
}

impl Default for Bounds {
    fn default() -> Self {
        Self {
            max_dimension: DEFAULT_MAX_DIMENSION,
            max_pixels: DEFAULT_MAX_PIXELS,
        }
    }
}

impl Bounds {
    pub fn admits(&self, width: u32, height: u32) -> bool {
        width <= self.max_dimension
            && height <= self.max_dimension
            && width as u64 * height as u64 <= self.max_pixels
    }

    fn validate(&self) -> Result<()> {
        if self.max_dimension == 0 || self.max_pixels == 0 {
            return Err(ForensicError::invalid_input(format!(
                "bounds must be positive (max_dimension={}, max_pixels={})",
                self.max_dimension, self.max_pixels
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ConditionedImage {
    image: RawImage,
    source_dimensions: (u32, u32),
    bounds: Bounds,
    was_resized: bool,
}

impl ConditionedImage {
    pub fn image(&self) -> &RawImage {
        &self.image
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn source_dimensions(&self) -> (u32, u32) {
        self.source_dimensions
    }

    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    pub fn was_resized(&self) -> bool {
        self.was_resized
    }

    pub fn describe(&self) -> String {
        let (width, height) = self.dimensions();
        let mut text = format!(
            "{width}×{height}px ({:.2}MB)",
            rgba_megabytes(width, height)
        );
        if self.was_resized {
            text.push_str(" [resized]");
        }
        text
    }
}

/// Largest aspect-preserving size inside `bounds`. Sources already inside
/// are returned unchanged.
///
/// The short side is always `long * source_short / source_long` rounded to
/// the nearest integer; when that overshoots the pixel budget the long side
/// shrinks by one pixel at a time.
pub fn target_dimensions(width: u32, height: u32, bounds: Bounds) -> (u32, u32) {
    if bounds.admits(width, height) {
        return (width, height);
    }

    let (source_long, source_short) = (width.max(height) as u64, width.min(height) as u64);
    let short_for =
        |long: u64| ((2 * long * source_short + source_long) / (2 * source_long)).max(1);

    // sqrt(P * L / S) is where the exact-aspect area meets the budget.
    let budget_long = (bounds.max_pixels as f64 * source_long as f64 / source_short as f64)
        .sqrt()
        .ceil() as u64;
    let mut long = source_long
        .min(bounds.max_dimension as u64)
        .min(budget_long.max(1));
    let mut short = short_for(long);
    while long > 1 && long * short > bounds.max_pixels {
        long -= 1;
        short = short_for(long);
    }

    let (long, short) = (long as u32, short as u32);
    if width >= height {
        (long, short)
    } else {
        (short, long)
    }
}

/// Enforce `bounds` on `image`. In-bounds sources are passed through without
/// copying.
pub fn condition(
    image: &RawImage,
    bounds: Bounds,
    filter: Interpolation,
) -> Result<ConditionedImage> {
    if image.is_empty() {
        return Err(ForensicError::invalid_input(format!(
            "source image is {}x{}",
            image.width(),
            image.height()
        )));
    }
    bounds.validate()?;

    let source_dimensions = image.dimensions();
    let (width, height) = target_dimensions(image.width(), image.height(), bounds);
    if (width, height) == source_dimensions {
        return Ok(ConditionedImage {
            image: image.clone(),
            source_dimensions,
            bounds,
            was_resized: false,
        });
    }

    debug!(
        "[condition] resizing {}x{} -> {width}x{height} ({filter:?})",
        source_dimensions.0, source_dimensions.1
    );
    Ok(ConditionedImage {
        image: image.resized(width, height, filter)?,
        source_dimensions,
        bounds,
        was_resized: true,
    })
}
