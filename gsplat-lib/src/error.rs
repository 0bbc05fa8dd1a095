use std::path::PathBuf;
use std::{fmt, io};

/// Coarse classification of a [`SplatError`], handed to hosts that only need
/// to branch on the failure type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplatErrorKind {
    FileNotFound,
    UnreadableFile,
    MissingMagic,
    UnknownFormat,
    MissingTerminator,
    MissingRequiredField,
    InvalidHeader,
    UnsupportedLayout,
    UnsupportedListProperty,
    TruncatedRow,
    TruncatedBinary,
}

#[derive(Debug)]
pub enum SplatError {
    FileNotFound(PathBuf),
    UnreadableFile(PathBuf, io::Error),
    MissingMagic,
    /// `None` when the header has no `format` line at all.
    UnknownFormat(Option<String>),
    MissingTerminator,
    MissingRequiredField(&'static str),
    InvalidHeader(String),
    UnsupportedLayout(String),
    UnsupportedListProperty(String),
    TruncatedRow(usize),
    TruncatedBinary(usize),
}

impl SplatError {
    pub fn kind(&self) -> SplatErrorKind {
        match self {
            SplatError::FileNotFound(_) => SplatErrorKind::FileNotFound,
            SplatError::UnreadableFile(..) => SplatErrorKind::UnreadableFile,
            SplatError::MissingMagic => SplatErrorKind::MissingMagic,
            SplatError::UnknownFormat(_) => SplatErrorKind::UnknownFormat,
            SplatError::MissingTerminator => SplatErrorKind::MissingTerminator,
            SplatError::MissingRequiredField(_) => SplatErrorKind::MissingRequiredField,
            SplatError::InvalidHeader(_) => SplatErrorKind::InvalidHeader,
            SplatError::UnsupportedLayout(_) => SplatErrorKind::UnsupportedLayout,
            SplatError::UnsupportedListProperty(_) => SplatErrorKind::UnsupportedListProperty,
            SplatError::TruncatedRow(_) => SplatErrorKind::TruncatedRow,
            SplatError::TruncatedBinary(_) => SplatErrorKind::TruncatedBinary,
        }
    }
}

impl fmt::Display for SplatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SplatError::FileNotFound(path) => {
                write!(f, "File not found: {}", path.display())
            }
            SplatError::UnreadableFile(path, e) => {
                write!(f, "Failed to read file {}: {}", path.display(), e)
            }
            SplatError::MissingMagic => {
                write!(f, "Not a .ply file (missing 'ply' header)")
            }
            SplatError::UnknownFormat(None) => {
                write!(f, "Missing 'format' line in the .ply header")
            }
            SplatError::UnknownFormat(Some(token)) if token.is_empty() => {
                write!(f, "The .ply 'format' line names no encoding")
            }
            SplatError::UnknownFormat(Some(token)) => {
                write!(f, "Unsupported .ply format: '{}'", token)
            }
            SplatError::MissingTerminator => {
                write!(f, "No 'end_header' found before EOF")
            }
            SplatError::MissingRequiredField(name) => {
                write!(f, "Missing required field: {}", name)
            }
            SplatError::InvalidHeader(e) => {
                write!(f, "Invalid .ply header: {}", e)
            }
            SplatError::UnsupportedLayout(e) => {
                write!(f, "Unsupported .ply layout: {}", e)
            }
            SplatError::UnsupportedListProperty(name) => {
                write!(
                    f,
                    "List property '{}' is not supported in binary vertex data",
                    name
                )
            }
            SplatError::TruncatedRow(row) => {
                write!(f, "Not enough values in ASCII row {}", row)
            }
            SplatError::TruncatedBinary(record) => {
                write!(f, "Unexpected end of binary data at record {}", record)
            }
        }
    }
}

impl std::error::Error for SplatError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SplatError::UnreadableFile(_, e) => Some(e),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    OutOfMemory { requested: usize, available: usize },
    InvalidHandle(u64),
    SizeMismatch { expected: usize, actual: usize },
    TooManyElements(usize),
    Lost,
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceError::OutOfMemory {
                requested,
                available,
            } => {
                write!(
                    f,
                    "Out of device memory: requested {} bytes, {} available",
                    requested, available
                )
            }
            DeviceError::InvalidHandle(id) => {
                write!(f, "Invalid buffer handle: {}", id)
            }
            DeviceError::SizeMismatch { expected, actual } => {
                write!(
                    f,
                    "Buffer size mismatch, expected {} bytes, got {}",
                    expected, actual
                )
            }
            DeviceError::TooManyElements(n) => {
                write!(f, "{} elements exceed the maximum buffer length", n)
            }
            DeviceError::Lost => {
                write!(f, "The device was lost")
            }
        }
    }
}

impl std::error::Error for DeviceError {}

#[derive(Debug)]
pub enum ProxyError {
    Device(DeviceError),
    UnknownInstance(u64),
    RenderThreadGone,
}

impl fmt::Display for ProxyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyError::Device(e) => {
                write!(f, "GPU buffer operation failed: {}", e)
            }
            ProxyError::UnknownInstance(id) => {
                write!(f, "No instance registered with id {}", id)
            }
            ProxyError::RenderThreadGone => {
                write!(f, "The presentation thread is no longer running")
            }
        }
    }
}

impl std::error::Error for ProxyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProxyError::Device(e) => Some(e),
            _ => None,
        }
    }
}

impl From<DeviceError> for ProxyError {
    fn from(e: DeviceError) -> Self {
        ProxyError::Device(e)
    }
}
