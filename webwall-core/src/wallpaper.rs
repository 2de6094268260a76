use anyhow::{anyhow, bail, Context, Result};
use chrono::Local;
use image::{ImageFormat, RgbImage};
use log::{info, warn};
use std::fs;
use std::path::{Path, PathBuf};
#[cfg(target_os = "linux")]
use std::process::Command;
use std::sync::Mutex;

use crate::services::{PreviousBackground, WallpaperSink};
use crate::Config;

const GENERATED_PREFIX: &str = "wallpaper-";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DesktopEnvironment {
    Gnome,
    Mate,
    Xfce,
    Lxde,
    Fluxbox,
    IceWm,
    Blackbox,
    Kde,
    Unknown,
}

impl DesktopEnvironment {
    pub fn detect() -> Self {
        let session = std::env::var("DESKTOP_SESSION").ok();
        let kde_full_session = std::env::var("KDE_FULL_SESSION").unwrap_or_default() == "true";
        let gnome_session = std::env::var("GNOME_DESKTOP_SESSION_ID").is_ok();
        Self::from_session(session.as_deref(), kde_full_session, gnome_session)
    }

    fn from_session(session: Option<&str>, kde_full_session: bool, gnome_session: bool) -> Self {
        if let Some(session) = session.map(str::to_lowercase) {
            match session.as_str() {
                "gnome" | "unity" | "cinnamon" => return Self::Gnome,
                "mate" => return Self::Mate,
                "xfce4" => return Self::Xfce,
                "lxde" => return Self::Lxde,
                "fluxbox" | "jwm" | "openbox" | "afterstep" => return Self::Fluxbox,
                "icewm" => return Self::IceWm,
                "blackbox" => return Self::Blackbox,
                "kde" | "trinity" => return Self::Kde,
                _ => {}
            }
            if session.contains("xfce") || session.starts_with("xubuntu") {
                return Self::Xfce;
            } else if session.starts_with("ubuntustudio") || session.starts_with("kubuntu") {
                return Self::Kde;
            } else if session.starts_with("ubuntu") {
                return Self::Gnome;
            } else if session.starts_with("lubuntu") {
                return Self::Lxde;
            }
        }
        if kde_full_session {
            return Self::Kde;
        }
        if gnome_session {
            return Self::Gnome;
        }
        Self::Unknown
    }
}

/// Desktop background through the `wallpaper` crate. Bitmaps are written as
/// PNG files under the generated directory before being applied.
pub struct DesktopWallpaper {
    output_dir: PathBuf,
    keep_generated: usize,
    suggested: Mutex<Option<(u32, u32)>>,
}

impl DesktopWallpaper {
    pub fn new(output_dir: PathBuf, keep_generated: usize) -> Self {
        Self {
            output_dir,
            keep_generated: keep_generated.max(1),
            suggested: Mutex::new(None),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.generated_dir.clone(), config.settings.keep_generated)
    }

    pub fn suggested_dimensions(&self) -> Option<(u32, u32)> {
        *self.suggested.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn write_bitmap(&self, bitmap: &RgbImage) -> Result<PathBuf> {
        fs::create_dir_all(&self.output_dir)?;
        let file_name = format!(
            "{}{}.png",
            GENERATED_PREFIX,
            Local::now().format("%Y%m%d-%H%M%S%.3f")
        );
        let path = self.output_dir.join(file_name);
        bitmap
            .save_with_format(&path, ImageFormat::Png)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path)
    }

    /// Delete the oldest generated files beyond `keep_generated`, never the
    /// one just applied.
    fn prune_generated(&self, current: &Path) -> Result<usize> {
        let mut generated: Vec<PathBuf> = fs::read_dir(&self.output_dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .map(|name| name.starts_with(GENERATED_PREFIX) && name.ends_with(".png"))
                    .unwrap_or(false)
            })
            .collect();
        if generated.len() <= self.keep_generated {
            return Ok(0);
        }
        // Timestamped names sort chronologically.
        generated.sort();
        let excess = generated.len() - self.keep_generated;
        let mut removed = 0;
        for path in generated.iter().take(excess).filter(|p| p.as_path() != current) {
            match fs::remove_file(path) {
                Ok(()) => removed += 1,
                Err(e) => warn!("Failed to remove old wallpaper {}: {}", path.display(), e),
            }
        }
        Ok(removed)
    }
}

impl WallpaperSink for DesktopWallpaper {
    fn current(&self) -> Result<PreviousBackground> {
        let location = wallpaper::get().map_err(|e| anyhow!("failed to query current wallpaper: {}", e))?;
        let path = local_path(&location);
        let image = image::open(&path)
            .with_context(|| format!("failed to load current wallpaper {}", path.display()))?;
        Ok(PreviousBackground::from_image(image))
    }

    fn suggest_desired_dimensions(&self, width: u32, height: u32) {
        info!("Suggested wallpaper dimensions: {}x{}", width, height);
        *self.suggested.lock().unwrap_or_else(|e| e.into_inner()) = Some((width, height));
    }

    fn set_bitmap(&self, bitmap: &RgbImage) -> Result<()> {
        let path = self.write_bitmap(bitmap)?;
        if !apply_wallpaper(&path)? {
            bail!("no wallpaper backend accepted {}", path.display());
        }
        if let Err(e) = self.prune_generated(&path) {
            warn!("Failed to prune generated wallpapers: {}", e);
        }
        Ok(())
    }
}

/// Desktops report either a plain path or a `file://` URI, sometimes quoted.
fn local_path(location: &str) -> PathBuf {
    let trimmed = location.trim().trim_matches('\'').trim_matches('"');
    PathBuf::from(trimmed.strip_prefix("file://").unwrap_or(trimmed))
}

pub fn apply_wallpaper(path: &Path) -> Result<bool> {
    let file_loc = path.to_string_lossy();
    match wallpaper::set_from_path(&file_loc) {
        Ok(_) => {
            info!("Wallpaper set to: {}", file_loc);
            Ok(true)
        }
        Err(e) => {
            warn!("wallpaper backend failed for {}: {}", file_loc, e);
            apply_desktop_fallback(path)
        }
    }
}

#[cfg(target_os = "linux")]
fn apply_desktop_fallback(path: &Path) -> Result<bool> {
    let file_loc = path.to_string_lossy().into_owned();
    let environment = DesktopEnvironment::detect();

    let status = match environment {
        DesktopEnvironment::Gnome => {
            let uri = format!("file://{}", file_loc);
            Command::new("gsettings")
                .args(["set", "org.gnome.desktop.background", "picture-uri", uri.as_str()])
                .status()?
        }
        DesktopEnvironment::Mate => Command::new("gsettings")
            .args(["set", "org.mate.background", "picture-filename", file_loc.as_str()])
            .status()?,
        DesktopEnvironment::Xfce => {
            let listed = Command::new("xfconf-query")
                .args(["-c", "xfce4-desktop", "-l"])
                .output()?;
            if listed.status.success() {
                let properties = String::from_utf8_lossy(&listed.stdout);
                for property in properties
                    .lines()
                    .map(str::trim)
                    .filter(|line| line.contains("workspace0/last-image"))
                {
                    Command::new("xfconf-query")
                        .args(["-c", "xfce4-desktop", "-p", property, "-s", file_loc.as_str()])
                        .status()?;
                }
            }
            Command::new("xfconf-query")
                .args(["-c", "xfce4-desktop", "-p", "/backdrop/screen0/monitor0/image-path", "-s", file_loc.as_str()])
                .status()?;
            Command::new("xfdesktop").arg("--reload").status()?
        }
        DesktopEnvironment::Lxde => Command::new("pcmanfm")
            .arg(format!("--set-wallpaper={}", file_loc))
            .arg("--wallpaper-mode=fit")
            .status()?,
        DesktopEnvironment::Fluxbox => Command::new("fbsetbg").arg(file_loc.as_str()).status()?,
        DesktopEnvironment::IceWm => Command::new("icewmbg").arg(file_loc.as_str()).status()?,
        DesktopEnvironment::Blackbox => Command::new("bsetbg")
            .args(["-full", file_loc.as_str()])
            .status()?,
        DesktopEnvironment::Kde | DesktopEnvironment::Unknown => {
            warn!("Desktop environment {:?} has no fallback wallpaper command", environment);
            return Ok(false);
        }
    };
    Ok(status.success())
}

#[cfg(not(target_os = "linux"))]
fn apply_desktop_fallback(_path: &Path) -> Result<bool> {
    Ok(false)
}
