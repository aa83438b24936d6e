//! Error types for mantion-eye

use mantion_core::Error as CoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VisionError {
    /// Camera could not be opened
    #[error("Camera error: {0}")]
    Camera(String),

    /// An opened camera stopped delivering frames
    #[error("Frame acquisition failed: {0}")]
    Acquisition(String),

    #[error("Detector error: {0}")]
    Detector(String),

    #[error("Capture error: {0}")]
    Capture(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[cfg(feature = "opencv")]
    #[error("OpenCV error: {0}")]
    OpenCv(String),

    #[error("Core error: {0}")]
    Core(#[from] CoreError),
}

impl From<VisionError> for CoreError {
    fn from(err: VisionError) -> Self {
        match err {
            VisionError::Camera(msg) => CoreError::Resource(msg),
            VisionError::Acquisition(msg) => CoreError::Acquisition(msg),
            VisionError::Detector(msg) => CoreError::Detection(msg),
            VisionError::Config(msg) => CoreError::Configuration(msg),
            VisionError::Core(inner) => inner,
            other => CoreError::Actuator(other.to_string()),
        }
    }
}

#[cfg(feature = "opencv")]
impl From<opencv::Error> for VisionError {
    fn from(err: opencv::Error) -> Self {
        VisionError::OpenCv(err.message)
    }
}
