use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgba, RgbImage, RgbaImage};

use crate::fit::FitPlan;
use crate::services::PreviousBackground;

const OPAQUE_BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);

fn flatten(canvas: RgbaImage) -> RgbImage {
    DynamicImage::ImageRgba8(canvas).to_rgb8()
}

/// Draw the plan's source crop, filtered, into a new opaque bitmap of exactly
/// the desired size.
pub fn render_fit(source: &RgbaImage, plan: &FitPlan) -> RgbImage {
    let src = plan.src;
    let cropped = imageops::crop_imm(source, src.left, src.top, src.width(), src.height()).to_image();
    let scaled = imageops::resize(&cropped, plan.dst.width(), plan.dst.height(), FilterType::Triangle);
    drop(cropped);

    let mut canvas = RgbaImage::from_pixel(plan.desired_width, plan.desired_height, OPAQUE_BLACK);
    imageops::overlay(&mut canvas, &scaled, i64::from(plan.dst.left), i64::from(plan.dst.top));
    flatten(canvas)
}

/// Redraw the previous background at its own size.
pub fn render_previous(previous: &PreviousBackground) -> RgbImage {
    let mut canvas = RgbaImage::from_pixel(
        previous.intrinsic_width(),
        previous.intrinsic_height(),
        OPAQUE_BLACK,
    );
    imageops::overlay(&mut canvas, previous.pixels(), 0, 0);
    flatten(canvas)
}
