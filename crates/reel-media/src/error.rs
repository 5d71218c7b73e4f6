//! Decode error taxonomy.

use reel_core::ReelError;
use thiserror::Error;

/// Errors raised while opening or decoding a clip's source.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The container could not be opened or the decoder could not start.
    #[error("Failed to open {path}: {reason}")]
    OpenFailed { path: String, reason: String },

    /// The container opened but its stream layout could not be read.
    #[error("Failed to read stream info from {path}: {reason}")]
    StreamInfoFailed { path: String, reason: String },

    /// A mid-stream decode error.
    #[error("Decode failed: {0}")]
    DecodeFailed(String),

    /// No more frames. Not fatal.
    #[error("End of stream")]
    EndOfStream,
}

impl DecodeError {
    pub fn open_failed(path: impl AsRef<std::path::Path>, reason: impl ToString) -> Self {
        Self::OpenFailed {
            path: path.as_ref().display().to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn stream_info_failed(path: impl AsRef<std::path::Path>, reason: impl ToString) -> Self {
        Self::StreamInfoFailed {
            path: path.as_ref().display().to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, Self::EndOfStream)
    }
}

impl From<DecodeError> for ReelError {
    fn from(err: DecodeError) -> Self {
        match err {
            DecodeError::OpenFailed { .. } | DecodeError::StreamInfoFailed { .. } => {
                ReelError::Media(err.to_string())
            }
            DecodeError::DecodeFailed(_) | DecodeError::EndOfStream => {
                ReelError::Decoder(err.to_string())
            }
        }
    }
}

/// Result type alias for decode operations.
pub type DecodeResult<T> = std::result::Result<T, DecodeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_errors_map_to_media() {
        let err: ReelError = DecodeError::open_failed("clip.mov", "no such file").into();
        assert!(matches!(err, ReelError::Media(ref msg) if msg.contains("clip.mov")));
    }

    #[test]
    fn test_decode_errors_map_to_decoder() {
        let err: ReelError = DecodeError::DecodeFailed("bad packet".into()).into();
        assert!(matches!(err, ReelError::Decoder(_)));
        assert!(DecodeError::EndOfStream.is_end_of_stream());
    }
}
