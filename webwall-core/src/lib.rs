use anyhow::{Context, Result};
use directories::ProjectDirs;
use log::warn;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub mod decode;
pub mod error;
pub mod fit;
pub mod handler;
pub mod render;
pub mod services;
pub mod setter;
pub mod source;
pub mod stream;
pub mod wallpaper;

pub use decode::{CodecDecoder, DecodedImage, ImageDecoder};
pub use error::SetterError;
pub use fit::{sample_size_for, FitPlan, Rect, MAX_PIXEL_COUNT};
pub use handler::{HandlerState, WallpaperHandler, PROGRESS_MESSAGE};
pub use services::{
    DisplayMetrics, FixedDisplay, PreviousBackground, ProgressSurface, Services, SilentProgress,
    WallpaperSink,
};
pub use setter::{CancelToken, Outcome, WallpaperSetter};
pub use source::{DataUri, ImageSource, OpenedStream, StreamSource, UrlSource};
pub use stream::{MarkableRead, MemoryStream, ReplayReader, BUFFER_SIZE};
pub use wallpaper::DesktopWallpaper;

/// Display height used when nothing better is known.
pub const DEFAULT_DISPLAY_HEIGHT: u32 = 1920;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub display_height: u32,
    /// How many generated wallpaper files to keep on disk.
    pub keep_generated: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            display_height: DEFAULT_DISPLAY_HEIGHT,
            keep_generated: 5,
        }
    }
}

#[derive(Debug)]
pub struct Config {
    pub config_dir: PathBuf,
    pub generated_dir: PathBuf,
    pub settings_file: PathBuf,
    pub settings: Settings,
}

impl Config {
    pub fn new() -> Result<Self> {
        let proj_dirs = ProjectDirs::from("com", "webwall", "webwall")
            .context("Failed to get project directories")?;
        Self::with_root(proj_dirs.config_dir())
    }

    /// Same layout as [`Config::new`], rooted at `config_dir`.
    pub fn with_root(config_dir: &Path) -> Result<Self> {
        let config_dir = config_dir.to_path_buf();
        let generated_dir = config_dir.join("generated");
        let settings_file = config_dir.join("settings.json");

        fs::create_dir_all(&config_dir)
            .with_context(|| format!("Failed to create {}", config_dir.display()))?;
        fs::create_dir_all(&generated_dir)?;

        let settings = load_settings(&settings_file)?;

        Ok(Config {
            config_dir,
            generated_dir,
            settings_file,
            settings,
        })
    }

    pub fn save(&self) -> Result<()> {
        save_settings(&self.settings_file, &self.settings)
    }
}

/// Missing or unreadable settings are replaced by the defaults on disk.
fn load_settings(settings_file: &Path) -> Result<Settings> {
    if settings_file.exists() {
        let content = fs::read_to_string(settings_file)?;
        match serde_json::from_str::<Settings>(&content) {
            Ok(settings) => return Ok(settings),
            Err(e) => warn!(
                "Ignoring unreadable settings {}: {}",
                settings_file.display(),
                e
            ),
        }
    }
    let settings = Settings::default();
    save_settings(settings_file, &settings)?;
    Ok(settings)
}

fn save_settings(settings_file: &Path, settings: &Settings) -> Result<()> {
    let content = serde_json::to_string_pretty(settings)?;
    fs::write(settings_file, content + "\n")
        .with_context(|| format!("Failed to write {}", settings_file.display()))?;
    Ok(())
}
