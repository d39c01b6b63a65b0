use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use liveguard_core::{CaptureRegion, VideoSize};
use thiserror::Error;

use crate::source::{SourceError, VideoSource};

#[derive(Error, Debug)]
pub enum CaptureError {
    /// Expected and recoverable: retry on the next cycle.
    #[error("capture unavailable: {0}")]
    CaptureUnavailable(String),
    #[error("frame source error: {0}")]
    Source(#[from] SourceError),
    #[error("frame encoding failed: {0}")]
    Encode(#[from] image::ImageError),
    #[error("camera already released")]
    Released,
}

/// One captured frame, ready for the transport. Not retained after sending.
#[derive(Debug, Clone)]
pub struct FrameSample {
    /// `data:image/jpeg;base64,...`
    pub image_data: String,
    pub region: CaptureRegion,
    pub captured_at_ms: u64,
    pub width: u32,
    pub height: u32,
}

const DATA_URI_PREFIX: &str = "data:image/jpeg;base64,";

/// Exclusive owner of the video stream.
///
/// Frames are encoded at the stream's native resolution. The stream is
/// stopped exactly once, on [`FrameCapturer::release`] or drop.
pub struct FrameCapturer<S: VideoSource> {
    source: S,
    quality: u8,
    released: bool,
}

impl<S: VideoSource> FrameCapturer<S> {
    pub fn new(source: S, quality: u8) -> Self {
        Self {
            source,
            quality: quality.clamp(1, 100),
            released: false,
        }
    }

    pub fn video_size(&self) -> VideoSize {
        self.source.size()
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Copy the current frame and pair it with the region it was cropped for.
    pub fn capture(
        &mut self,
        region: CaptureRegion,
        now_ms: u64,
    ) -> Result<FrameSample, CaptureError> {
        if self.released {
            return Err(CaptureError::Released);
        }
        let size = self.source.size();
        if size.width == 0 || size.height == 0 {
            return Err(CaptureError::CaptureUnavailable(
                "video has no intrinsic size yet".to_string(),
            ));
        }

        let frame = self.source.grab()?;
        let (width, height) = frame.dimensions();
        if width == 0 || height == 0 {
            return Err(CaptureError::CaptureUnavailable("empty frame".to_string()));
        }
        if !region.fits_within(width, height) {
            return Err(CaptureError::CaptureUnavailable(format!(
                "region {region:?} outside {width}x{height} frame"
            )));
        }

        let mut jpeg = Vec::new();
        let encoder = JpegEncoder::new_with_quality(&mut jpeg, self.quality);
        DynamicImage::ImageRgb8(frame).write_with_encoder(encoder)?;
        if jpeg.is_empty() {
            return Err(CaptureError::CaptureUnavailable(
                "encoder produced no data".to_string(),
            ));
        }

        let mut image_data = String::with_capacity(DATA_URI_PREFIX.len() + jpeg.len() * 4 / 3 + 4);
        image_data.push_str(DATA_URI_PREFIX);
        STANDARD.encode_string(&jpeg, &mut image_data);

        tracing::trace!(width, height, bytes = jpeg.len(), "frame captured");

        Ok(FrameSample {
            image_data,
            region,
            captured_at_ms: now_ms,
            width,
            height,
        })
    }

    /// Stop the stream. Returns `false` if it was already stopped.
    pub fn release(&mut self) -> bool {
        if self.released {
            return false;
        }
        self.source.stop();
        self.released = true;
        tracing::info!("camera released");
        true
    }
}

impl<S: VideoSource> Drop for FrameCapturer<S> {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::StillSource;
    use image::RgbImage;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingSource {
        inner: StillSource,
        stops: Arc<AtomicUsize>,
    }

    impl VideoSource for CountingSource {
        fn size(&self) -> VideoSize {
            self.inner.size()
        }

        fn grab(&mut self) -> Result<RgbImage, SourceError> {
            self.inner.grab()
        }

        fn stop(&mut self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
            self.inner.stop();
        }
    }

    fn region() -> CaptureRegion {
        CaptureRegion {
            x: 10,
            y: 5,
            width: 40,
            height: 50,
        }
    }

    #[test]
    fn test_capture_encodes_native_resolution() {
        let mut capturer = FrameCapturer::new(StillSource::blank(64, 64), 80);
        let sample = capturer.capture(region(), 1234).unwrap();
        assert!(sample.image_data.starts_with(DATA_URI_PREFIX));
        assert_eq!((sample.width, sample.height), (64, 64));
        assert_eq!(sample.region, region());
        assert_eq!(sample.captured_at_ms, 1234);

        let jpeg = STANDARD
            .decode(&sample.image_data[DATA_URI_PREFIX.len()..])
            .unwrap();
        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (64, 64));
    }

    #[test]
    fn test_zero_size_stream_unavailable() {
        let mut capturer = FrameCapturer::new(StillSource::new(RgbImage::new(0, 0)), 80);
        let err = capturer.capture(region(), 0).unwrap_err();
        assert!(matches!(err, CaptureError::CaptureUnavailable(_)));
    }

    #[test]
    fn test_region_outside_frame_unavailable() {
        let mut capturer = FrameCapturer::new(StillSource::blank(32, 32), 80);
        let err = capturer.capture(region(), 0).unwrap_err();
        assert!(matches!(err, CaptureError::CaptureUnavailable(_)));
    }

    #[test]
    fn test_release_stops_stream_once() {
        let stops = Arc::new(AtomicUsize::new(0));
        let source = CountingSource {
            inner: StillSource::blank(64, 64),
            stops: stops.clone(),
        };
        let mut capturer = FrameCapturer::new(source, 80);
        assert!(capturer.release());
        assert!(!capturer.release());
        assert!(matches!(
            capturer.capture(region(), 0),
            Err(CaptureError::Released)
        ));
        drop(capturer);
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_releases_stream() {
        let stops = Arc::new(AtomicUsize::new(0));
        let source = CountingSource {
            inner: StillSource::blank(64, 64),
            stops: stops.clone(),
        };
        drop(FrameCapturer::new(source, 80));
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }
}
