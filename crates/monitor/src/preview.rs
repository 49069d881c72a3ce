//! Preview output for the latest frame

use camera_capture::Frame;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Receives every acquired frame; must not block
pub trait PreviewRenderer {
    fn show(&mut self, frame: &Frame);
}

impl<T: PreviewRenderer + ?Sized> PreviewRenderer for Box<T> {
    fn show(&mut self, frame: &Frame) {
        (**self).show(frame)
    }
}

/// Logs frame dimensions only
#[derive(Debug, Default)]
pub struct LogPreview;

impl PreviewRenderer for LogPreview {
    fn show(&mut self, frame: &Frame) {
        debug!(
            "Frame {} ({}x{})",
            frame.sequence,
            frame.width(),
            frame.height()
        );
    }
}

/// Writes the latest frame as a JPEG file
pub struct FilePreview {
    path: PathBuf,
    quality: u8,
}

impl FilePreview {
    pub fn new(path: impl Into<PathBuf>, quality: u8) -> Self {
        Self {
            path: path.into(),
            quality: quality.clamp(1, 100),
        }
    }

    fn write(&self, frame: &Frame) -> Result<(), String> {
        let bytes = frame.encode_jpeg(self.quality).map_err(|e| e.to_string())?;
        // Replace in one step so viewers never see a partial file
        let staging = self.path.with_extension("part");
        std::fs::write(&staging, bytes).map_err(|e| e.to_string())?;
        std::fs::rename(&staging, &self.path).map_err(|e| e.to_string())
    }
}

impl PreviewRenderer for FilePreview {
    fn show(&mut self, frame: &Frame) {
        if let Err(e) = self.write(frame) {
            warn!("Preview write to {} failed: {}", self.path.display(), e);
        }
    }
}
