use std::{error, fmt, io};

/// Errors are rendered to strings at the point of failure so the type stays
/// `Clone` and can be stored inside view-model state.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Error {
    NetworkError(String),
    DecodeError(String),
}

impl error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NetworkError(err) => write!(f, "network error: {err}"),
            Self::DecodeError(err) => write!(f, "decode error: {err}"),
        }
    }
}

impl From<ureq::Error> for Error {
    fn from(err: ureq::Error) -> Self {
        Self::NetworkError(err.to_string())
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::NetworkError(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::DecodeError(err.to_string())
    }
}

impl From<image::ImageError> for Error {
    fn from(err: image::ImageError) -> Self {
        Self::DecodeError(err.to_string())
    }
}
