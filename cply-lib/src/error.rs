use std::{fmt, io};

#[derive(Debug)]
pub enum CplyError {
    MalformedHeader(String),
    MissingElement(String),
    UnsupportedProperty(String),
    MissingField(String),
    Truncated { needed: usize, have: usize },
    IoError(io::Error),
}

impl fmt::Display for CplyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CplyError::MalformedHeader(e) => {
                write!(f, "Failed to parse the PLY header: {}", e)
            }
            CplyError::MissingElement(e) => {
                write!(f, "Missing required element: {}", e)
            }
            CplyError::UnsupportedProperty(e) => {
                write!(f, "Unsupported property: {}", e)
            }
            CplyError::MissingField(e) => {
                write!(f, "Missing required field: {}", e)
            }
            CplyError::Truncated { needed, have } => {
                write!(
                    f,
                    "Binary data is too short, need {} bytes, have {}",
                    needed, have
                )
            }
            CplyError::IoError(e) => {
                write!(f, "An I/O error occurred: {}", e)
            }
        }
    }
}

impl std::error::Error for CplyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CplyError::IoError(e) => Some(e),
            _ => None,
        }
    }
}
