use std::io;

/// Reasons a raster could not be produced.
///
/// None of these escape the loader as hard failures; they end in an absent
/// result for the waiting consumers.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("source is empty")]
    Empty,
    #[error("could not decode image: {0}")]
    Decode(String),
    #[error("decode exceeded the allocation limit")]
    OutOfMemory,
    #[error("unsupported image source: {0}")]
    Unsupported(String),
    #[error("cancelled")]
    Cancelled,
}

impl DecodeError {
    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, DecodeError::OutOfMemory)
    }
}

impl From<image::ImageError> for DecodeError {
    fn from(err: image::ImageError) -> Self {
        match err {
            image::ImageError::Limits(_) => DecodeError::OutOfMemory,
            image::ImageError::IoError(e) => DecodeError::Io(e),
            image::ImageError::Unsupported(e) => DecodeError::Unsupported(e.to_string()),
            other => DecodeError::Decode(other.to_string()),
        }
    }
}
