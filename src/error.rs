use std::{error::Error, fmt, io};

/// An error occured while reading or writing an Aseprite file.
#[derive(Debug)]
pub enum AsepriteError {
    /// The input data was malformed. String contains detailed message.
    InvalidInput(String),
    /// The input data was correct, but uses a feature that is not supported by
    /// this version of `asecodec`. String contains detailed message.
    UnsupportedFeature(String),
    /// The input ended before a value could be read completely.
    Truncated(String),
    /// An internal error occurred.
    InternalError(String),
    /// The operation was stopped on request of the caller.
    Cancelled,
    /// An IO error occured in the underlying reader or writer.
    IoError(io::Error),
}

impl From<io::Error> for AsepriteError {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            AsepriteError::Truncated(err.to_string())
        } else {
            AsepriteError::IoError(err)
        }
    }
}

impl fmt::Display for AsepriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AsepriteError::InvalidInput(msg) => write!(f, "Invalid Aseprite input: {}", msg),
            AsepriteError::UnsupportedFeature(msg) => {
                write!(f, "Unsupported Aseprite feature: {}", msg)
            }
            AsepriteError::Truncated(msg) => write!(f, "Input ended unexpectedly: {}", msg),
            AsepriteError::InternalError(msg) => {
                write!(f, "Internal error: {}", msg)
            }
            AsepriteError::Cancelled => write!(f, "Operation was cancelled"),
            AsepriteError::IoError(err) => write!(f, "I/O error: {}", err),
        }
    }
}

impl Error for AsepriteError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            AsepriteError::IoError(err) => Some(err),
            _ => None,
        }
    }
}

/// A problem with a single chunk that did not stop the rest of the file from
/// being decoded. The offending chunk (or cel) was skipped.
#[derive(Debug)]
pub struct Warning {
    pub(crate) frame: u32,
    pub(crate) chunk_type: u16,
    pub(crate) offset: u64,
    pub(crate) error: AsepriteError,
}

impl Warning {
    /// Frame in which the chunk was found.
    pub fn frame(&self) -> u32 {
        self.frame
    }

    /// Raw chunk type code, e.g. `0x2005` for a cel chunk.
    pub fn chunk_type(&self) -> u16 {
        self.chunk_type
    }

    /// Byte offset of the chunk header from the start of the file.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// The error that caused the chunk to be skipped.
    pub fn error(&self) -> &AsepriteError {
        &self.error
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "frame {}, chunk 0x{:04x} at offset {}: {}",
            self.frame, self.chunk_type, self.offset, self.error
        )
    }
}
