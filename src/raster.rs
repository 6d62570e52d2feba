//! Pixel containers passed between the pipeline stages.

use crate::arena::{Lease, PassArena};
use crate::error::{ForensicError, Result};
use crate::util::imaging::RGBA_CHANNELS;
use image::imageops::{self, FilterType};
use image::{GrayImage, ImageBuffer, Luma, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Resampling policy used whenever a buffer changes size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interpolation {
    Nearest,
    Bilinear,
    /// Catmull-Rom cubic.
    #[default]
    Bicubic,
    Lanczos3,
}

impl Interpolation {
    pub fn filter_type(self) -> FilterType {
        match self {
            Self::Nearest => FilterType::Nearest,
            Self::Bilinear => FilterType::Triangle,
            Self::Bicubic => FilterType::CatmullRom,
            Self::Lanczos3 => FilterType::Lanczos3,
        }
    }
}

/// Decoded source image: interleaved RGBA8, shared read-only.
#[derive(Debug, Clone)]
pub struct RawImage {
    width: u32,
    height: u32,
    pixels: Arc<[u8]>,
}

impl RawImage {
    pub fn new(width: u32, height: u32, pixels: impl Into<Arc<[u8]>>) -> Result<Self> {
        let pixels = pixels.into();
        let expected = width as usize * height as usize * RGBA_CHANNELS;
        if pixels.len() != expected {
            return Err(ForensicError::invalid_input(format!(
                "{width}x{height} RGBA image needs {expected} bytes, got {}",
                pixels.len()
            )));
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn from_rgba(image: RgbaImage) -> Result<Self> {
        let (width, height) = image.dimensions();
        Self::new(width, height, image.into_raw())
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// True when both images are backed by the same pixel allocation.
    pub fn shares_pixels_with(&self, other: &RawImage) -> bool {
        Arc::ptr_eq(&self.pixels, &other.pixels)
    }

    pub fn resized(&self, width: u32, height: u32, filter: Interpolation) -> Result<RawImage> {
        let view: ImageBuffer<Rgba<u8>, &[u8]> =
            ImageBuffer::from_raw(self.width, self.height, self.pixels()).ok_or_else(|| {
                ForensicError::processing("source buffer does not match its dimensions")
            })?;
        let resized = imageops::resize(&view, width, height, filter.filter_type());
        RawImage::from_rgba(resized)
    }
}

/// Single-channel row-major plane over an arena lease.
#[derive(Debug)]
pub struct Plane<'a, T> {
    width: usize,
    height: usize,
    data: Lease<'a, T>,
}

impl<'a, T: Clone> Plane<'a, T> {
    pub fn filled(
        arena: &'a PassArena,
        label: &'static str,
        width: usize,
        height: usize,
        fill: T,
    ) -> Self {
        Self {
            width,
            height,
            data: arena.lease(label, width * height, fill),
        }
    }
}

impl<'a, T> Plane<'a, T> {
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    pub fn row(&self, y: usize) -> &[T] {
        &self.data[y * self.width..(y + 1) * self.width]
    }

    pub fn row_mut(&mut self, y: usize) -> &mut [T] {
        let width = self.width;
        &mut self.data[y * width..(y + 1) * width]
    }

    pub fn into_lease(self) -> Lease<'a, T> {
        self.data
    }

    pub fn release(self) {
        self.data.release();
    }
}

impl<T: Copy> Plane<'_, T> {
    #[inline]
    pub fn get(&self, x: usize, y: usize) -> T {
        self.data[y * self.width + x]
    }
}

/// Final 8-bit single-channel buffer handed to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayBuffer {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl DisplayBuffer {
    /// Take ownership of a pass plane, settling its lease as handed off.
    pub fn from_plane(plane: Plane<'_, u8>) -> Self {
        let (width, height) = (plane.width() as u32, plane.height() as u32);
        Self {
            width,
            height,
            pixels: plane.into_lease().into_inner(),
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn resized(self, width: u32, height: u32, filter: Interpolation) -> Result<Self> {
        let (width, height) = (width.max(1), height.max(1));
        if (width, height) == self.dimensions() {
            return Ok(self);
        }
        let image = self.into_gray_image()?;
        let resized = imageops::resize(&image, width, height, filter.filter_type());
        Ok(Self {
            width,
            height,
            pixels: resized.into_raw(),
        })
    }

    pub fn into_gray_image(self) -> Result<GrayImage> {
        ImageBuffer::<Luma<u8>, Vec<u8>>::from_raw(self.width, self.height, self.pixels)
            .ok_or_else(|| {
                ForensicError::processing("display buffer does not match its dimensions")
            })
    }
}
