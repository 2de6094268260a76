// Host collaborators the wallpaper task talks to
use anyhow::Result;
use image::{DynamicImage, RgbImage, RgbaImage};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::decode::{CodecDecoder, ImageDecoder};

/// The background that was active before the task touched anything.
#[derive(Debug, Clone)]
pub struct PreviousBackground {
    pixels: RgbaImage,
}

impl PreviousBackground {
    pub fn new(pixels: RgbaImage) -> Self {
        Self { pixels }
    }

    pub fn from_image(image: DynamicImage) -> Self {
        Self::new(image.to_rgba8())
    }

    pub fn intrinsic_width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn intrinsic_height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }
}

/// Where finished bitmaps end up.
pub trait WallpaperSink: Send + Sync {
    /// The background currently shown.
    fn current(&self) -> Result<PreviousBackground>;

    /// Hint about the size of the bitmap that is about to be committed.
    fn suggest_desired_dimensions(&self, width: u32, height: u32);

    /// Make `bitmap` the active background.
    fn set_bitmap(&self, bitmap: &RgbImage) -> Result<()>;
}

pub trait DisplayMetrics: Send + Sync {
    fn display_height(&self) -> u32;
}

/// Indefinite progress indicator shown while the task runs.
pub trait ProgressSurface: Send + Sync {
    fn show(&self, message: &str);
    fn is_showing(&self) -> bool;
    fn dismiss(&self);
}

/// Display with a known, fixed height.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedDisplay(pub u32);

impl DisplayMetrics for FixedDisplay {
    fn display_height(&self) -> u32 {
        self.0
    }
}

/// Progress surface that only remembers whether it is showing.
#[derive(Debug, Default)]
pub struct SilentProgress {
    showing: AtomicBool,
}

impl ProgressSurface for SilentProgress {
    fn show(&self, _message: &str) {
        self.showing.store(true, Ordering::SeqCst);
    }

    fn is_showing(&self) -> bool {
        self.showing.load(Ordering::SeqCst)
    }

    fn dismiss(&self) {
        self.showing.store(false, Ordering::SeqCst);
    }
}

/// Everything the task needs besides the stream itself.
#[derive(Clone)]
pub struct Services {
    pub sink: Arc<dyn WallpaperSink>,
    pub display: Arc<dyn DisplayMetrics>,
    pub decoder: Arc<dyn ImageDecoder>,
    pub progress: Arc<dyn ProgressSurface>,
}

impl Services {
    /// Default codec and a silent progress surface.
    pub fn new(sink: Arc<dyn WallpaperSink>, display: Arc<dyn DisplayMetrics>) -> Self {
        Self {
            sink,
            display,
            decoder: Arc::new(CodecDecoder::new()),
            progress: Arc::new(SilentProgress::default()),
        }
    }

    pub fn with_decoder(mut self, decoder: Arc<dyn ImageDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSurface>) -> Self {
        self.progress = progress;
        self
    }
}
