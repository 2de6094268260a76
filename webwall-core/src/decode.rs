use anyhow::{anyhow, bail, Context, Result};
use image::{ImageFormat, ImageReader, Limits, Rgba, RgbaImage};
use jpeg_decoder::{Decoder as JpegDecoder, PixelFormat};
use log::debug;
use std::io::{Cursor, Read};

use crate::fit::MAX_PIXEL_COUNT;

/// First read of the bounds probe; doubled until the header parses.
const PROBE_CHUNK: usize = 4 * 1024;
/// Give up on the probe once this much has been read without finding a header.
const MAX_PROBE_BYTES: usize = 8 * 1024 * 1024;

/// A decoded bitmap and whether the decoder honoured the sample size.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub pixels: RgbaImage,
    pub sampled: bool,
}

impl DecodedImage {
    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }
}

/// Image codec used by the wallpaper task.
pub trait ImageDecoder: Send + Sync {
    /// Read just enough of the stream to report `(width, height)`. Must not
    /// allocate pixel memory.
    fn decode_bounds(&self, reader: &mut dyn Read) -> Result<(u32, u32)>;

    /// Decode the whole image, decimating by `sample_size` where the codec
    /// allows it.
    fn decode(&self, reader: &mut dyn Read, sample_size: u32) -> Result<DecodedImage>;
}

/// Decoder backed by the `image` crate, with JPEG DCT scaling through
/// `jpeg-decoder`.
#[derive(Debug, Default, Clone, Copy)]
pub struct CodecDecoder;

impl CodecDecoder {
    pub fn new() -> Self {
        Self
    }
}

fn probe_dimensions(header: &[u8]) -> Result<(u32, u32)> {
    let mut reader = ImageReader::new(Cursor::new(header)).with_guessed_format()?;
    if reader.format().is_none() {
        bail!("unrecognised image format");
    }
    // Only the header is read, so the allocation limit does not apply.
    reader.no_limits();
    Ok(reader.into_dimensions()?)
}

impl ImageDecoder for CodecDecoder {
    fn decode_bounds(&self, reader: &mut dyn Read) -> Result<(u32, u32)> {
        let mut header = Vec::with_capacity(PROBE_CHUNK);
        let mut chunk = PROBE_CHUNK;
        loop {
            let read = (&mut *reader)
                .take(chunk as u64)
                .read_to_end(&mut header)
                .context("failed to read image header")?;
            match probe_dimensions(&header) {
                Ok(dims) => return Ok(dims),
                Err(err) if read == 0 || header.len() >= MAX_PROBE_BYTES => {
                    return Err(err.context(format!(
                        "could not decode image bounds from {} bytes",
                        header.len()
                    )));
                }
                Err(_) => chunk = (chunk * 2).min(MAX_PROBE_BYTES - header.len()),
            }
        }
    }

    fn decode(&self, reader: &mut dyn Read, sample_size: u32) -> Result<DecodedImage> {
        let sample_size = sample_size.max(1);
        let mut bytes = Vec::new();
        reader
            .read_to_end(&mut bytes)
            .context("failed to read image stream")?;
        let format = image::guess_format(&bytes).context("unrecognised image format")?;

        if format == ImageFormat::Jpeg && sample_size > 1 {
            match decode_jpeg_sampled(&bytes, sample_size) {
                Ok(decoded) => return Ok(decoded),
                Err(err) => debug!("scaled JPEG decode failed: {err:#}, decoding at full size"),
            }
        }

        if format == ImageFormat::Png {
            if let Some(decoded) = decode_png_sampled(&bytes, sample_size)? {
                return Ok(decoded);
            }
            debug!("interlaced PNG, decoding at full size");
        }

        let mut image_reader = ImageReader::with_format(Cursor::new(&bytes), format);
        image_reader.limits(decode_limits(sample_size));
        let pixels = image_reader
            .decode()
            .context("failed to decode image")?
            .to_rgba8();
        drop(bytes);

        if sample_size == 1 {
            return Ok(DecodedImage {
                pixels,
                sampled: false,
            });
        }
        Ok(DecodedImage {
            pixels: decimate(&pixels, sample_size),
            sampled: true,
        })
    }
}

/// Allocation ceiling for a full decode at `sample_size`: the pixel budget
/// scaled back up to source resolution, at 8 bytes per pixel.
pub fn decode_budget_bytes(sample_size: u32) -> u64 {
    let scale = u64::from(sample_size.max(1));
    MAX_PIXEL_COUNT
        .saturating_mul(scale * scale)
        .saturating_mul(8)
}

fn decode_limits(sample_size: u32) -> Limits {
    let mut limits = Limits::default();
    limits.max_alloc = Some(decode_budget_bytes(sample_size));
    limits
}

/// Row-by-row PNG decode that keeps every `sample_size`-th row and column,
/// so the full-resolution bitmap never exists. `None` for interlaced files,
/// whose rows arrive out of order.
fn decode_png_sampled(bytes: &[u8], sample_size: u32) -> Result<Option<DecodedImage>> {
    let limits = png::Limits {
        bytes: usize::try_from(decode_budget_bytes(sample_size)).unwrap_or(usize::MAX),
    };
    let mut decoder = png::Decoder::new_with_limits(Cursor::new(bytes), limits);
    decoder.set_transformations(png::Transformations::EXPAND | png::Transformations::STRIP_16);
    let mut reader = decoder.read_info().context("failed to read PNG header")?;

    let info = reader.info();
    if info.interlaced {
        return Ok(None);
    }
    let (width, height) = (info.width, info.height);
    let channels = match reader.output_color_type().0 {
        png::ColorType::Grayscale => 1,
        png::ColorType::GrayscaleAlpha => 2,
        png::ColorType::Rgb => 3,
        png::ColorType::Rgba => 4,
        png::ColorType::Indexed => bail!("indexed PNG was not expanded"),
    };

    let out_width = (width / sample_size).max(1);
    let out_height = (height / sample_size).max(1);
    let mut pixels = RgbaImage::new(out_width, out_height);
    let mut rows_read = 0u32;

    while rows_read < out_height * sample_size {
        let Some(row) = reader.next_row().context("failed to decode PNG row")? else {
            break;
        };
        if rows_read % sample_size == 0 {
            let data = row.data();
            let out_y = rows_read / sample_size;
            for out_x in 0..out_width {
                let offset = (out_x * sample_size) as usize * channels;
                let px = data
                    .get(offset..offset + channels)
                    .ok_or_else(|| anyhow!("PNG row {} is too short", rows_read))?;
                let rgba = match channels {
                    1 => [px[0], px[0], px[0], 255],
                    2 => [px[0], px[0], px[0], px[1]],
                    3 => [px[0], px[1], px[2], 255],
                    _ => [px[0], px[1], px[2], px[3]],
                };
                pixels.put_pixel(out_x, out_y, Rgba(rgba));
            }
        }
        rows_read += 1;
    }

    if rows_read < height.min(out_height * sample_size) {
        bail!("PNG ended after {} of {} rows", rows_read, height);
    }
    Ok(Some(DecodedImage {
        pixels,
        sampled: sample_size > 1,
    }))
}

/// Keep every `step`-th pixel in both directions.
pub fn decimate(source: &RgbaImage, step: u32) -> RgbaImage {
    let step = step.max(1);
    let width = (source.width() / step).max(1);
    let height = (source.height() / step).max(1);
    RgbaImage::from_fn(width, height, |x, y| *source.get_pixel(x * step, y * step))
}

fn decode_jpeg_sampled(bytes: &[u8], sample_size: u32) -> Result<DecodedImage> {
    use jpeg_decoder::Error as JpegError;

    let (full_width, full_height) = probe_dimensions(bytes)?;
    let mut decoder = JpegDecoder::new(Cursor::new(bytes));
    let target_width = (full_width / sample_size).max(1);
    let target_height = (full_height / sample_size).max(1);

    decoder
        .scale(
            target_width.min(u32::from(u16::MAX)) as u16,
            target_height.min(u32::from(u16::MAX)) as u16,
        )
        .map_err(|err| match err {
            JpegError::Unsupported(feature) => anyhow!("unsupported JPEG feature: {feature:?}"),
            other => anyhow!(other),
        })?;
    let pixels = decoder.decode().map_err(|err| match err {
        JpegError::Unsupported(feature) => anyhow!("unsupported JPEG feature: {feature:?}"),
        other => anyhow!(other),
    })?;
    let info = decoder
        .info()
        .ok_or_else(|| anyhow!("missing JPEG info after decode"))?;
    let width = u32::from(info.width);
    let height = u32::from(info.height);

    let rgba = match info.pixel_format {
        PixelFormat::RGB24 => {
            let mut rgba = Vec::with_capacity(pixels.len() / 3 * 4);
            for chunk in pixels.chunks_exact(3) {
                rgba.extend_from_slice(&[chunk[0], chunk[1], chunk[2], 255]);
            }
            rgba
        }
        PixelFormat::L8 => {
            let mut rgba = Vec::with_capacity(pixels.len() * 4);
            for &v in &pixels {
                rgba.extend_from_slice(&[v, v, v, 255]);
            }
            rgba
        }
        PixelFormat::CMYK32 => {
            let mut rgba = Vec::with_capacity(pixels.len());
            for chunk in pixels.chunks_exact(4) {
                let k = f32::from(chunk[3]) / 255.0;
                let channel = |v: u8| {
                    let c = f32::from(v) / 255.0 * (1.0 - k) + k;
                    ((1.0 - c) * 255.0).round().clamp(0.0, 255.0) as u8
                };
                rgba.extend_from_slice(&[channel(chunk[0]), channel(chunk[1]), channel(chunk[2]), 255]);
            }
            rgba
        }
        other => bail!("{other:?} JPEGs are not supported by the scaled decoder"),
    };

    let mut pixels = RgbaImage::from_raw(width, height, rgba)
        .ok_or_else(|| anyhow!("scaled JPEG buffer does not match {}x{}", width, height))?;
    let sampled = width < full_width || height < full_height;

    // DCT scaling stops at 1/8; finish larger sample sizes by decimation.
    let residual = width / target_width;
    if residual >= 2 {
        pixels = decimate(&pixels, 1 << residual.ilog2());
    }

    Ok(DecodedImage { pixels, sampled })
}
