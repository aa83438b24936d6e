//! Camera sources and the guard that releases them

use crate::error::VisionError;
use image::RgbImage;
use mantion_core::CameraSource;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// A device or stream that yields RGB frames.
///
/// `read` blocks until the next frame is available. An error from `read`
/// means the source is gone; callers do not retry.
pub trait FrameSource: Send {
    fn read(&mut self) -> Result<RgbImage, VisionError>;

    /// Give the device back. Called once, by `CameraGuard`.
    fn release(&mut self) {}

    fn describe(&self) -> String;
}

/// Opens configured sources. The hub holds one of these so tests can swap in
/// scripted cameras.
pub trait SourceFactory: Send + Sync {
    fn open(&self, source: &CameraSource) -> Result<Box<dyn FrameSource>, VisionError>;
}

/// Opens image directories, and USB devices when built with `opencv`
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultSourceFactory;

impl SourceFactory for DefaultSourceFactory {
    fn open(&self, source: &CameraSource) -> Result<Box<dyn FrameSource>, VisionError> {
        match source {
            CameraSource::Images(dir) => Ok(Box::new(ImageSequenceSource::open(dir)?)),
            #[cfg(feature = "opencv")]
            CameraSource::Device(index) => Ok(Box::new(device::OpenCvCamera::open(*index)?)),
            #[cfg(not(feature = "opencv"))]
            CameraSource::Device(index) => Err(VisionError::Camera(format!(
                "Camera device {} requested but mantion-eye was built without the `opencv` feature",
                index
            ))),
        }
    }
}

/// Owns an opened source and releases it exactly once
pub struct CameraGuard {
    camera_id: String,
    source: Option<Box<dyn FrameSource>>,
}

impl CameraGuard {
    pub fn new(camera_id: impl Into<String>, source: Box<dyn FrameSource>) -> Self {
        Self {
            camera_id: camera_id.into(),
            source: Some(source),
        }
    }

    pub fn read(&mut self) -> Result<RgbImage, VisionError> {
        match self.source.as_mut() {
            Some(source) => source.read(),
            None => Err(VisionError::Acquisition(format!(
                "Camera {} already released",
                self.camera_id
            ))),
        }
    }

    pub fn is_released(&self) -> bool {
        self.source.is_none()
    }

    pub fn release(&mut self) {
        if let Some(mut source) = self.source.take() {
            source.release();
            info!("Camera {} released ({})", self.camera_id, source.describe());
        }
    }
}

impl Drop for CameraGuard {
    fn drop(&mut self) {
        self.release();
    }
}

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// Replays a directory of still images in file-name order
pub struct ImageSequenceSource {
    dir: PathBuf,
    files: Vec<PathBuf>,
    next: usize,
    looping: bool,
}

impl ImageSequenceSource {
    /// Open a directory and loop over its images forever
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, VisionError> {
        let dir = dir.as_ref().to_path_buf();
        let entries = std::fs::read_dir(&dir).map_err(|e| {
            VisionError::Camera(format!("Cannot open image directory {}: {}", dir.display(), e))
        })?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .collect();
        files.sort();

        if files.is_empty() {
            return Err(VisionError::Camera(format!(
                "No images found in {}",
                dir.display()
            )));
        }

        debug!("Image source {} has {} frames", dir.display(), files.len());
        Ok(Self {
            dir,
            files,
            next: 0,
            looping: true,
        })
    }

    /// Stop after the last image instead of starting over
    pub fn once(mut self) -> Self {
        self.looping = false;
        self
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl FrameSource for ImageSequenceSource {
    fn read(&mut self) -> Result<RgbImage, VisionError> {
        if self.next >= self.files.len() {
            if !self.looping {
                return Err(VisionError::Acquisition(format!(
                    "End of image sequence {}",
                    self.dir.display()
                )));
            }
            self.next = 0;
        }

        let path = &self.files[self.next];
        self.next += 1;
        match image::open(path) {
            Ok(img) => Ok(img.to_rgb8()),
            Err(e) => {
                warn!("Failed to decode {}: {}", path.display(), e);
                Err(VisionError::Acquisition(format!(
                    "Cannot decode {}: {}",
                    path.display(),
                    e
                )))
            }
        }
    }

    fn describe(&self) -> String {
        format!("images:{}", self.dir.display())
    }
}

#[cfg(feature = "opencv")]
pub mod device {
    //! USB webcam capture through OpenCV

    use super::FrameSource;
    use crate::error::VisionError;
    use image::RgbImage;
    use opencv::{
        core::Mat,
        imgproc,
        prelude::*,
        videoio::{VideoCapture, CAP_ANY},
    };
    use tracing::{info, warn};

    pub struct OpenCvCamera {
        index: u32,
        capture: VideoCapture,
    }

    impl OpenCvCamera {
        pub fn open(index: u32) -> Result<Self, VisionError> {
            let capture = VideoCapture::new(index as i32, CAP_ANY)
                .map_err(|e| VisionError::Camera(format!("Failed to open camera {}: {}", index, e)))?;

            let opened = capture
                .is_opened()
                .map_err(|e| VisionError::Camera(format!("Camera {} not opened: {}", index, e)))?;
            if !opened {
                return Err(VisionError::Camera(format!("Camera {} failed to open", index)));
            }

            info!("Camera device {} opened", index);
            Ok(Self { index, capture })
        }
    }

    impl FrameSource for OpenCvCamera {
        fn read(&mut self) -> Result<RgbImage, VisionError> {
            let mut bgr = Mat::default();
            let grabbed = self.capture.read(&mut bgr)?;
            if !grabbed || bgr.rows() <= 0 || bgr.cols() <= 0 {
                return Err(VisionError::Acquisition(format!(
                    "Camera {} returned no frame",
                    self.index
                )));
            }

            let mut rgb = Mat::default();
            imgproc::cvt_color(&bgr, &mut rgb, imgproc::COLOR_BGR2RGB, 0)?;
            let (width, height) = (rgb.cols() as u32, rgb.rows() as u32);
            let data = rgb.data_bytes()?.to_vec();

            RgbImage::from_raw(width, height, data).ok_or_else(|| {
                VisionError::Acquisition(format!(
                    "Camera {} frame has unexpected layout",
                    self.index
                ))
            })
        }

        fn release(&mut self) {
            if let Err(e) = self.capture.release() {
                warn!("Camera {} release failed: {}", self.index, e);
            }
        }

        fn describe(&self) -> String {
            format!("device:{}", self.index)
        }
    }
}
