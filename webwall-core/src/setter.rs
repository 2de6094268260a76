use log::{debug, error, info, warn};
use std::io::BufReader;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::SetterError;
use crate::fit::{sample_size_for, FitPlan};
use crate::render::{render_fit, render_previous};
use crate::services::{PreviousBackground, Services};
use crate::source::{OpenedStream, StreamSource};
use crate::stream::BUFFER_SIZE;

/// Cancellation request shared between the worker and whoever shows the
/// progress surface.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Final state of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The new image is the background.
    Applied {
        width: u32,
        height: u32,
        sample_size: u32,
    },
    /// Cancelled or failed; the previous background was put back.
    Restored { width: u32, height: u32 },
    /// Cancelled or failed, and the previous background could not be put back.
    RestoreFailed,
    /// The reference could not be opened; nothing was committed.
    NotOpened,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Applied {
    width: u32,
    height: u32,
    sample_size: u32,
}

/// Downloads one image and makes it the background, or puts the previous
/// background back when cancelled or when anything in between fails.
pub struct WallpaperSetter {
    source: Arc<dyn StreamSource>,
    services: Services,
    cancel: CancelToken,
}

impl WallpaperSetter {
    pub fn new(source: Arc<dyn StreamSource>, services: Services, cancel: CancelToken) -> Self {
        Self {
            source,
            services,
            cancel,
        }
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn run(&self) -> Outcome {
        let outcome = self.run_pipeline();
        if self.services.progress.is_showing() {
            self.services.progress.dismiss();
        }
        outcome
    }

    fn run_pipeline(&self) -> Outcome {
        let previous = match self.services.sink.current() {
            Ok(previous) => Some(previous),
            Err(e) => {
                warn!("Unable to capture the current wallpaper: {:#}", e);
                None
            }
        };

        let stream = match self.source.open() {
            Ok(stream) => stream,
            Err(e) => {
                error!("{}", SetterError::Open(e));
                return Outcome::NotOpened;
            }
        };

        let applied = match self.apply(stream) {
            Ok(applied) => applied,
            Err(e) => {
                error!("Unable to set new wallpaper from {}: {}", self.source.describe(), e);
                // Failures take the same path as a user cancel.
                self.cancel.cancel();
                None
            }
        };

        // Single checkpoint: a cancel arriving after this read has no effect.
        let cancelled = self.cancel.is_cancelled();
        match (cancelled, applied) {
            (false, Some(applied)) => Outcome::Applied {
                width: applied.width,
                height: applied.height,
                sample_size: applied.sample_size,
            },
            _ => {
                let outcome = self.restore(previous.as_ref());
                self.cancel.clear();
                outcome
            }
        }
    }

    /// Returns `None` when a cancel was already pending before the commit,
    /// in which case nothing was committed.
    fn apply(&self, stream: OpenedStream) -> Result<Option<Applied>, SetterError> {
        let mut stream = stream.into_markable();
        stream.mark(BUFFER_SIZE);

        let (bounds_width, bounds_height) = {
            // Separate buffered view so the probe's read-ahead stays inside
            // the outer mark.
            let mut probe = BufReader::new(&mut *stream);
            self.services
                .decoder
                .decode_bounds(&mut probe)
                .map_err(SetterError::Decode)?
        };

        let mut sample_size = sample_size_for(bounds_width, bounds_height);
        debug!(
            "Image bounds {}x{}, sample size {}",
            bounds_width, bounds_height, sample_size
        );

        if let Err(e) = stream.reset() {
            debug!("{}, reopening {}", SetterError::from(e), self.source.describe());
            drop(stream);
            stream = self.source.open().map_err(SetterError::Open)?.into_markable();
        }

        let decoded = self
            .services
            .decoder
            .decode(&mut stream, sample_size)
            .map_err(SetterError::Decode)?;
        drop(stream);
        if !decoded.sampled && sample_size > 1 {
            debug!("Decoder ignored sample size {}", sample_size);
            sample_size = 1;
        }

        let max_height = self.services.display.display_height();
        let plan = FitPlan::compute(decoded.width(), decoded.height(), max_height)
            .map_err(SetterError::Decode)?;
        debug!(
            "Fitting {}x{} into {}x{}: crop {:?}",
            decoded.width(),
            decoded.height(),
            plan.desired_width,
            plan.desired_height,
            plan.src
        );

        self.services
            .sink
            .suggest_desired_dimensions(plan.desired_width, plan.desired_height);
        let bitmap = render_fit(&decoded.pixels, &plan);
        drop(decoded);

        if self.cancel.is_cancelled() {
            info!("Wallpaper request cancelled before commit");
            return Ok(None);
        }
        self.services
            .sink
            .set_bitmap(&bitmap)
            .map_err(SetterError::Commit)?;
        info!(
            "New wallpaper {}x{} applied (sample size {})",
            plan.desired_width, plan.desired_height, sample_size
        );

        Ok(Some(Applied {
            width: plan.desired_width,
            height: plan.desired_height,
            sample_size,
        }))
    }

    fn restore(&self, previous: Option<&PreviousBackground>) -> Outcome {
        let Some(previous) = previous else {
            error!("Unable to restore old wallpaper: it was never captured");
            return Outcome::RestoreFailed;
        };
        let (width, height) = (previous.intrinsic_width(), previous.intrinsic_height());
        self.services.sink.suggest_desired_dimensions(width, height);
        let bitmap = render_previous(previous);
        match self.services.sink.set_bitmap(&bitmap) {
            Ok(()) => {
                info!("Previous wallpaper {}x{} restored", width, height);
                Outcome::Restored { width, height }
            }
            Err(e) => {
                error!("Unable to restore old wallpaper: {:#}", e);
                Outcome::RestoreFailed
            }
        }
    }
}
