use thiserror::Error;

/// Failures inside the wallpaper pipeline. None of these escape the task; they
/// decide what gets logged before the previous background is put back.
#[derive(Debug, Error)]
pub enum SetterError {
    /// The image reference could not be opened or reopened.
    #[error("unable to open image stream: {0:#}")]
    Open(anyhow::Error),

    /// Bounds probe or full decode failed, or produced no pixels.
    #[error("unable to decode image: {0:#}")]
    Decode(anyhow::Error),

    /// The bounds probe consumed more than the replay buffer holds.
    #[error("unable to rewind image stream: {0}")]
    Rewind(#[from] std::io::Error),

    /// The sink refused the new bitmap.
    #[error("unable to commit wallpaper: {0:#}")]
    Commit(anyhow::Error),
}
