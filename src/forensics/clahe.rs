//! Contrast-limited adaptive histogram equalization on 8-bit planes.
//!
//! Tiles that do not divide the plane evenly are completed with mirrored
//! samples; each pixel blends the lookup tables of its four nearest tiles.

use super::TileGrid;
use crate::arena::PassArena;
use crate::error::{ForensicError, Result};
use crate::raster::Plane;
use crate::util::imaging::{lerp, reflect_101, saturate_u8};

const BINS: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Clahe {
    /// Histogram clip limit relative to a uniform tile histogram. Zero disables clipping.
    pub clip_limit: f32,
    pub grid: TileGrid,
}

impl Clahe {
    pub fn new(clip_limit: f32, grid: TileGrid) -> Self {
        Self { clip_limit, grid }
    }

    pub fn apply<'a>(&self, arena: &'a PassArena, src: &Plane<'_, u8>) -> Result<Plane<'a, u8>> {
        let (width, height) = (src.width(), src.height());
        let (tiles_x, tiles_y) = (self.grid.columns as usize, self.grid.rows as usize);
        if tiles_x == 0 || tiles_y == 0 {
            return Err(ForensicError::invalid_input("tile grid must be at least 1x1"));
        }
        if width == 0 || height == 0 {
            return Err(ForensicError::processing("cannot equalize an empty plane"));
        }

        let tile_w = width.div_ceil(tiles_x);
        let tile_h = height.div_ceil(tiles_y);
        let tile_area = (tile_w * tile_h) as f32;
        let clip = if self.clip_limit > 0.0 {
            Some(((self.clip_limit * tile_area / BINS as f32) as u32).max(1))
        } else {
            None
        };
        let lut_scale = (BINS - 1) as f32 / tile_area;

        let mut luts = arena.lease("clahe_luts", tiles_x * tiles_y * BINS, 0u8);
        let mut histogram = [0u32; BINS];
        for ty in 0..tiles_y {
            for tx in 0..tiles_x {
                histogram.fill(0);
                for y in ty * tile_h..(ty + 1) * tile_h {
                    let row = src.row(reflect_101(y as isize, height));
                    for x in tx * tile_w..(tx + 1) * tile_w {
                        histogram[row[reflect_101(x as isize, width)] as usize] += 1;
                    }
                }
                if let Some(limit) = clip {
                    clip_histogram(&mut histogram, limit);
                }
                let base = (ty * tiles_x + tx) * BINS;
                let mut sum = 0u32;
                for (bin, count) in histogram.iter().enumerate() {
                    sum += count;
                    luts[base + bin] = saturate_u8(sum as f32 * lut_scale);
                }
            }
        }

        let mut out = Plane::filled(arena, "clahe_out", width, height, 0u8);
        let (inv_tw, inv_th) = (1.0 / tile_w as f32, 1.0 / tile_h as f32);
        let lut = |tx: usize, ty: usize, value: u8| {
            luts[(ty * tiles_x + tx) * BINS + value as usize] as f32
        };
        for y in 0..height {
            let (ty1, ty2, ya) = neighbours(y, inv_th, tiles_y);
            let src_row = src.row(y);
            let out_row = out.row_mut(y);
            for (x, (dst, &value)) in out_row.iter_mut().zip(src_row).enumerate() {
                let (tx1, tx2, xa) = neighbours(x, inv_tw, tiles_x);
                let top = lerp(lut(tx1, ty1, value), lut(tx2, ty1, value), xa);
                let bottom = lerp(lut(tx1, ty2, value), lut(tx2, ty2, value), xa);
                *dst = saturate_u8(lerp(top, bottom, ya));
            }
        }
        luts.release();

        Ok(out)
    }
}

// Tile indices bracketing a pixel centre, plus the blend weight of the second.
fn neighbours(pos: usize, inv_tile: f32, tiles: usize) -> (usize, usize, f32) {
    let t = pos as f32 * inv_tile - 0.5;
    let lower = t.floor();
    let weight = t - lower;
    let lower = lower as isize;
    let first = lower.max(0) as usize;
    let second = ((lower + 1).max(0) as usize).min(tiles - 1);
    (first.min(tiles - 1), second, weight)
}

// Clip bins at `limit` and spread the excess evenly, remainder one-by-one
// at a fixed stride.
fn clip_histogram(histogram: &mut [u32; BINS], limit: u32) {
    let mut excess = 0u32;
    for count in histogram.iter_mut() {
        if *count > limit {
            excess += *count - limit;
            *count = limit;
        }
    }
    if excess == 0 {
        return;
    }

    let batch = excess / BINS as u32;
    let mut residual = excess - batch * BINS as u32;
    for count in histogram.iter_mut() {
        *count += batch;
    }
    if residual > 0 {
        let step = (BINS / residual as usize).max(1);
        let mut bin = 0;
        while bin < BINS && residual > 0 {
            histogram[bin] += 1;
            residual -= 1;
            bin += step;
        }
    }
}
