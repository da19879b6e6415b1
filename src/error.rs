use std::collections::TryReserveError;
use std::fmt;
use std::io;

/// Error raised by the codec. A load or save either produces a complete
/// result or exactly one of these; partially materialized data is dropped.
#[derive(Debug)]
pub enum P3sError {
    /// The stream ended mid-field or mid-chunk.
    Truncated,
    /// The header magic did not match.
    BadMagic,
    /// The header declared a format version this codec does not handle.
    UnsupportedVersion(u32),
    /// Unknown compression algo byte, or a zlib payload failed to inflate
    /// to its declared size.
    BadCompression,
    /// A required sub-chunk is absent or a size field is self-inconsistent.
    BadChunk(String),
    /// A payload buffer could not be allocated.
    AllocationFailed,
    /// Any other I/O failure from the underlying stream.
    Io(io::Error),
}

pub type Result<T> = std::result::Result<T, P3sError>;

impl fmt::Display for P3sError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated => write!(f, "stream ended mid-field or mid-chunk"),
            Self::BadMagic => write!(f, "incorrect magic bytes"),
            Self::UnsupportedVersion(version) => {
                write!(f, "file format version not supported: {version}")
            }
            Self::BadCompression => write!(f, "unsupported or corrupt chunk compression"),
            Self::BadChunk(detail) => write!(f, "malformed chunk: {detail}"),
            Self::AllocationFailed => write!(f, "failed to allocate payload buffer"),
            Self::Io(error) => write!(f, "io error: {error}"),
        }
    }
}

impl std::error::Error for P3sError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(error) => Some(error),
            _ => None,
        }
    }
}

impl From<io::Error> for P3sError {
    fn from(error: io::Error) -> Self {
        if error.kind() == io::ErrorKind::UnexpectedEof {
            Self::Truncated
        } else {
            Self::Io(error)
        }
    }
}

impl From<TryReserveError> for P3sError {
    fn from(_: TryReserveError) -> Self {
        Self::AllocationFailed
    }
}
