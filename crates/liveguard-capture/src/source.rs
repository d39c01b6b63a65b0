use std::path::{Path, PathBuf};

use image::RgbImage;
use liveguard_core::VideoSize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("video source unavailable: {0}")]
    Unavailable(String),
    #[error("failed to read frame {path}: {source}")]
    Frame {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("video source stopped")]
    Stopped,
}

/// A live video stream.
///
/// `size` is the stream's intrinsic resolution and reads `0x0` until the
/// stream has produced metadata. `grab` returns the current frame at that
/// resolution.
pub trait VideoSource: Send {
    fn size(&self) -> VideoSize;
    fn grab(&mut self) -> Result<RgbImage, SourceError>;
    /// Stop all tracks. Called at most once by the owning capturer.
    fn stop(&mut self);
}

/// Replays a directory of still images as a looping stream.
pub struct ImageSequenceSource {
    frames: Vec<PathBuf>,
    next: usize,
    size: VideoSize,
    stopped: bool,
}

impl ImageSequenceSource {
    /// Open a directory of `.jpg`/`.jpeg`/`.png` frames, played in name order.
    pub fn open(dir: &Path) -> Result<Self, SourceError> {
        let entries = std::fs::read_dir(dir)
            .map_err(|e| SourceError::Unavailable(format!("{}: {e}", dir.display())))?;

        let mut frames: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| matches!(ext.to_ascii_lowercase().as_str(), "jpg" | "jpeg" | "png"))
                    .unwrap_or(false)
            })
            .collect();
        frames.sort();

        let first = frames.first().ok_or_else(|| {
            SourceError::Unavailable(format!("no image frames in {}", dir.display()))
        })?;
        let (width, height) = image::image_dimensions(first).map_err(|source| SourceError::Frame {
            path: first.clone(),
            source,
        })?;

        tracing::info!(
            dir = %dir.display(),
            frames = frames.len(),
            width,
            height,
            "image sequence opened"
        );

        Ok(Self {
            frames,
            next: 0,
            size: VideoSize { width, height },
            stopped: false,
        })
    }
}

impl VideoSource for ImageSequenceSource {
    fn size(&self) -> VideoSize {
        self.size
    }

    fn grab(&mut self) -> Result<RgbImage, SourceError> {
        if self.stopped {
            return Err(SourceError::Stopped);
        }
        let path = &self.frames[self.next % self.frames.len()];
        self.next = self.next.wrapping_add(1);
        let frame = image::open(path)
            .map_err(|source| SourceError::Frame {
                path: path.clone(),
                source,
            })?
            .to_rgb8();
        Ok(frame)
    }

    fn stop(&mut self) {
        self.stopped = true;
    }
}

/// A stream that shows the same frame forever.
pub struct StillSource {
    frame: RgbImage,
    stopped: bool,
}

impl StillSource {
    pub fn new(frame: RgbImage) -> Self {
        Self {
            frame,
            stopped: false,
        }
    }

    /// Uniform grey frame, handy where content does not matter.
    pub fn blank(width: u32, height: u32) -> Self {
        Self::new(RgbImage::from_pixel(width, height, image::Rgb([128, 128, 128])))
    }
}

impl VideoSource for StillSource {
    fn size(&self) -> VideoSize {
        let (width, height) = self.frame.dimensions();
        VideoSize { width, height }
    }

    fn grab(&mut self) -> Result<RgbImage, SourceError> {
        if self.stopped {
            return Err(SourceError::Stopped);
        }
        Ok(self.frame.clone())
    }

    fn stop(&mut self) {
        self.stopped = true;
    }
}
