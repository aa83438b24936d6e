use thiserror::Error;

/// Monitor error taxonomy.
///
/// Only `Resource` and `Acquisition` end a camera session. Every other variant
/// is recovered where it happens and logged.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Resource error: {0}")]
    Resource(String),

    #[error("Acquisition error: {0}")]
    Acquisition(String),

    #[error("Detection fault: {0}")]
    Detection(String),

    #[error("Actuator fault: {0}")]
    Actuator(String),

    #[error("Persistence fault: {0}")]
    Persistence(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for the faults that terminate the session that raised them.
    pub fn is_session_fatal(&self) -> bool {
        matches!(self, Error::Resource(_) | Error::Acquisition(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Resource("camera 3".to_string());
        assert_eq!(err.to_string(), "Resource error: camera 3");

        let err = Error::Detection("timeout".to_string());
        assert!(err.to_string().contains("Detection fault"));
    }

    #[test]
    fn test_only_resource_and_acquisition_are_fatal() {
        assert!(Error::Resource("x".into()).is_session_fatal());
        assert!(Error::Acquisition("x".into()).is_session_fatal());

        assert!(!Error::Detection("x".into()).is_session_fatal());
        assert!(!Error::Actuator("x".into()).is_session_fatal());
        assert!(!Error::Persistence("x".into()).is_session_fatal());
        assert!(!Error::Configuration("x".into()).is_session_fatal());
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: Error = io_err.into();
        match err {
            Error::Io(_) => {}
            _ => panic!("Expected Io error"),
        }
    }
}
