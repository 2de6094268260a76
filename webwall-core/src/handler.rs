use log::error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use crate::services::Services;
use crate::setter::{CancelToken, Outcome, WallpaperSetter};
use crate::source::{StreamSource, UrlSource};

pub const PROGRESS_MESSAGE: &str = "Setting wallpaper...";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerState {
    New,
    Running,
    Finished,
}

/// Runs a [`WallpaperSetter`] on its own worker thread, at most once.
pub struct WallpaperHandler {
    source: Option<Arc<dyn StreamSource>>,
    services: Services,
    cancel: CancelToken,
    started: AtomicBool,
    worker: Mutex<Option<JoinHandle<Outcome>>>,
}

impl WallpaperHandler {
    /// `url` may be absent when the request had no image under it; such a
    /// handler never starts.
    pub fn new(url: Option<String>, services: Services) -> Self {
        let source = url.map(|url| Arc::new(UrlSource::new(url)) as Arc<dyn StreamSource>);
        Self::from_source(source, services)
    }

    pub fn from_source(source: Option<Arc<dyn StreamSource>>, services: Services) -> Self {
        Self {
            source,
            services,
            cancel: CancelToken::new(),
            started: AtomicBool::new(false),
            worker: Mutex::new(None),
        }
    }

    fn worker(&self) -> MutexGuard<'_, Option<JoinHandle<Outcome>>> {
        self.worker.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start the worker unless one was already started. Always reports the
    /// request as handled.
    pub fn on_request(&self) -> bool {
        let Some(source) = self.source.clone() else {
            return true;
        };
        // Held until the handle is stored so `state` never sees a started
        // handler without its worker.
        let mut worker = self.worker();
        if self
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return true;
        }

        self.services.progress.show(PROGRESS_MESSAGE);
        let setter = WallpaperSetter::new(source, self.services.clone(), self.cancel.clone());
        let spawned = thread::Builder::new()
            .name("wallpaper-handler".to_string())
            .spawn(move || setter.run());
        match spawned {
            Ok(handle) => *worker = Some(handle),
            Err(e) => {
                error!("Unable to start wallpaper worker: {}", e);
                self.services.progress.dismiss();
            }
        }
        true
    }

    /// The progress surface was cancelled.
    pub fn on_cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> HandlerState {
        if !self.started.load(Ordering::SeqCst) {
            return HandlerState::New;
        }
        match self.worker().as_ref() {
            Some(handle) if !handle.is_finished() => HandlerState::Running,
            _ => HandlerState::Finished,
        }
    }

    /// Wait for the worker. `None` if it never ran or panicked.
    pub fn join(&self) -> Option<Outcome> {
        let handle = self.worker().take()?;
        match handle.join() {
            Ok(outcome) => Some(outcome),
            Err(_) => {
                error!("Wallpaper worker panicked");
                None
            }
        }
    }
}
