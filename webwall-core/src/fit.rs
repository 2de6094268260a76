//! Downscale and aspect-fill arithmetic.
//!
//! Everything here is pure integer/float math so it can be checked without
//! any codec involved.

use anyhow::{bail, Result};

/// Upper bound on decoded pixels kept in memory at once.
pub const MAX_PIXEL_COUNT: u64 = 5_000_000;

/// Smallest power-of-two sample size that brings `width x height` under
/// [`MAX_PIXEL_COUNT`] after integer division.
pub fn sample_size_for(width: u32, height: u32) -> u32 {
    sample_size_within(width, height, MAX_PIXEL_COUNT)
}

pub fn sample_size_within(width: u32, height: u32, budget: u64) -> u32 {
    let mut scale = 1u32;
    let mut w = u64::from(width);
    let mut h = u64::from(height);
    while h * w > budget {
        scale *= 2;
        w /= 2;
        h /= 2;
    }
    scale
}

/// Half-up rounding, so `x.5` always goes towards positive infinity.
fn round_half_up_f32(value: f32) -> i64 {
    (value + 0.5).floor() as i64
}

fn round_half_up_f64(value: f64) -> i64 {
    (value + 0.5).floor() as i64
}

/// Axis-aligned rectangle given by its edges; `right` and `bottom` are exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl Rect {
    pub fn new(left: u32, top: u32, right: u32, bottom: u32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn width(&self) -> u32 {
        self.right.saturating_sub(self.left)
    }

    pub fn height(&self) -> u32 {
        self.bottom.saturating_sub(self.top)
    }
}

/// Output size plus the source crop and destination rectangles that fill a
/// square target without distortion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FitPlan {
    pub max_width: u32,
    pub max_height: u32,
    pub desired_width: u32,
    pub desired_height: u32,
    pub src: Rect,
    pub dst: Rect,
}

impl FitPlan {
    /// Plan for an `actual_width x actual_height` bitmap on a square target
    /// whose side is the display height.
    ///
    /// The image is first fitted by height. If that leaves it too narrow it is
    /// fitted by width instead. The overhanging dimension is cropped evenly on
    /// both sides, so the target is always filled.
    pub fn compute(actual_width: u32, actual_height: u32, max_height: u32) -> Result<Self> {
        if actual_width == 0 || actual_height == 0 {
            bail!("image has no pixels ({}x{})", actual_width, actual_height);
        }
        if max_height == 0 {
            bail!("display height must be positive");
        }
        let max_width = max_height;
        let max_w = i64::from(max_width);
        let max_h = i64::from(max_height);

        let mut desired_height = max_h;
        let mut scale = desired_height as f32 / actual_height as f32;
        let mut desired_width = round_half_up_f32(scale * actual_width as f32);
        let mut margin_x = 0i64;
        let mut margin_y = 0i64;

        if desired_width >= max_w {
            margin_x = round_half_up_f64(f64::from((desired_width - max_w) as f32 / scale) / 2.0);
            desired_width = max_w;
        } else {
            desired_width = max_w;
            scale = desired_width as f32 / actual_width as f32;
            desired_height = round_half_up_f32(scale * actual_height as f32);
            if desired_height >= max_h {
                margin_y =
                    round_half_up_f64(f64::from((desired_height - max_h) as f32 / scale) / 2.0);
                desired_height = max_h;
            }
        }

        // Keep at least one source row and column.
        let margin_x = margin_x.clamp(0, (i64::from(actual_width) - 1) / 2) as u32;
        let margin_y = margin_y.clamp(0, (i64::from(actual_height) - 1) / 2) as u32;
        let desired_width = desired_width.max(1) as u32;
        let desired_height = desired_height.max(1) as u32;

        Ok(Self {
            max_width,
            max_height,
            desired_width,
            desired_height,
            src: Rect::new(
                margin_x,
                margin_y,
                actual_width - margin_x,
                actual_height - margin_y,
            ),
            dst: Rect::new(0, 0, desired_width, desired_height),
        })
    }
}
