//! Gamma/gain/offset curve mapping a normalized spectrum to 8 bits.

use crate::arena::PassArena;
use crate::raster::Plane;
use crate::util::imaging::saturate_u8;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ToneCurve {
    pub gamma: f32,
    pub gain: f32,
    pub offset: f32,
}

impl Default for ToneCurve {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl ToneCurve {
    pub const IDENTITY: Self = Self {
        gamma: 1.0,
        gain: 1.0,
        offset: 0.0,
    };

    #[inline]
    pub fn map_value(&self, value: f32) -> u8 {
        let clamped = if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) };
        let shaped = if self.gamma == 1.0 {
            clamped
        } else {
            clamped.powf(self.gamma)
        };
        saturate_u8(shaped * self.gain * 255.0 + self.offset)
    }
}

pub fn map_tone<'a>(
    arena: &'a PassArena,
    spectrum: &Plane<'_, f32>,
    curve: &ToneCurve,
) -> Plane<'a, u8> {
    let (width, height) = (spectrum.width(), spectrum.height());
    let mut out = Plane::filled(arena, "spectrum_toned", width, height, 0u8);
    for (dst, &value) in out.as_mut_slice().iter_mut().zip(spectrum.as_slice()) {
        *dst = curve.map_value(value);
    }
    out
}
