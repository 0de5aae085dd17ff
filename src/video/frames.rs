//! Frame sources and JPEG encoding.

use std::path::{Path, PathBuf};

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::RgbImage;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VideoError {
    #[error("failed to load image: {0}")]
    Load(#[from] image::ImageError),

    #[error("frame source unavailable: {0}")]
    Unavailable(String),
}

/// Something that can produce the current camera frame.
pub trait FrameSource: Send {
    /// Grab the latest frame.  `Ok(None)` means no frame is ready yet.
    fn grab(&mut self) -> Result<Option<RgbImage>, VideoError>;
}

/// Opens a [`FrameSource`] for each call.
pub trait CameraSource: Send + Sync {
    fn open(&self) -> Result<Box<dyn FrameSource>, VideoError>;
}

/// Camera stand-in that serves an image file, loaded when the call starts.
#[derive(Debug, Clone)]
pub struct StillImageCamera {
    pub path: PathBuf,
}

impl CameraSource for StillImageCamera {
    fn open(&self) -> Result<Box<dyn FrameSource>, VideoError> {
        Ok(Box::new(StillFrameSource::open(&self.path)?))
    }
}

/// A fixed image served as every frame.
pub struct StillFrameSource {
    frame: RgbImage,
}

impl StillFrameSource {
    pub fn open(path: &Path) -> Result<Self, VideoError> {
        let frame = image::open(path)?.to_rgb8();
        log::info!(
            "video: still frame {}x{} from {}",
            frame.width(),
            frame.height(),
            path.display()
        );
        Ok(Self { frame })
    }

    pub fn from_image(frame: RgbImage) -> Self {
        Self { frame }
    }
}

impl FrameSource for StillFrameSource {
    fn grab(&mut self) -> Result<Option<RgbImage>, VideoError> {
        Ok(Some(self.frame.clone()))
    }
}

/// Scale `frame` to at most `max_width` pixels wide (keeping aspect ratio)
/// and compress it to JPEG at `quality` (clamped to 1–100).
pub fn encode_jpeg(frame: &RgbImage, quality: u8, max_width: u32) -> Result<Vec<u8>, VideoError> {
    let scaled;
    let frame = if max_width > 0 && frame.width() > max_width {
        let height = ((frame.height() as u64 * max_width as u64) / frame.width() as u64).max(1) as u32;
        scaled = image::imageops::resize(frame, max_width, height, FilterType::Triangle);
        &scaled
    } else {
        frame
    };

    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100)).encode_image(frame)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(w: u32, h: u32) -> RgbImage {
        RgbImage::from_fn(w, h, |x, y| image::Rgb([(x % 256) as u8, (y % 256) as u8, 128]))
    }

    #[test]
    fn encodes_jpeg_with_soi_marker() {
        let bytes = encode_jpeg(&gradient(32, 24), 70, 640).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn wide_frames_are_scaled_down() {
        let bytes = encode_jpeg(&gradient(1280, 720), 70, 320).unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!(decoded.width(), 320);
        assert_eq!(decoded.height(), 180);
    }

    #[test]
    fn still_source_repeats_frame() {
        let mut source = StillFrameSource::from_image(gradient(4, 4));
        let a = source.grab().unwrap().unwrap();
        let b = source.grab().unwrap().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn still_source_loads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.png");
        gradient(8, 6).save(&path).unwrap();

        let mut source = StillFrameSource::open(&path).unwrap();
        let frame = source.grab().unwrap().unwrap();
        assert_eq!(frame.dimensions(), (8, 6));
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(StillFrameSource::open(Path::new("/nonexistent/frame.png")).is_err());
    }

    #[test]
    fn still_camera_opens_a_fresh_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cam.png");
        gradient(4, 4).save(&path).unwrap();

        let camera = StillImageCamera { path };
        let mut source = camera.open().unwrap();
        assert!(source.grab().unwrap().is_some());
    }
}
