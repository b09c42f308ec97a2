//! Error taxonomy.
//!
//! Two layers: [`Error`] is the low-level kind produced by the key maker,
//! cipher and compressor; [`Status`] is the pipeline stage in which the
//! container codec observed the failure. [`CodecError`] carries both.

use std::fmt;

use thiserror::Error;

/// Low-level failure kind reported by the cryptographic and compression
/// primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    #[error("algorithm not implemented")]
    NotImplemented,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("integrity check failed")]
    IntegrityError,
    #[error("invalid data format")]
    InvalidFormat,
    #[error("out of memory")]
    OutOfMemory,
    #[error("unknown error")]
    UnknownError,
}

/// Pipeline stage outcome recorded by the container codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Status {
    #[default]
    Ok,
    ReadPastEnd,
    ReadCorruptData,
    WriteFailed,
    KeyDerivationError,
    CryptographicError,
    CompressionError,
}

impl Status {
    /// Returns `true` when retrying with a different password may succeed.
    pub fn is_retryable(self) -> bool {
        matches!(self, Status::KeyDerivationError | Status::CryptographicError)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            Status::Ok => "ok",
            Status::ReadPastEnd => "unable to read container",
            Status::ReadCorruptData => "container is corrupt or of an unsupported version",
            Status::WriteFailed => "unable to write container",
            Status::KeyDerivationError => "key derivation failed",
            Status::CryptographicError => "invalid password or corrupted data",
            Status::CompressionError => "decompression failed",
        };
        f.write_str(message)
    }
}

/// Failure of a container codec operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{status}")]
pub struct CodecError {
    status: Status,
    #[source]
    error: Option<Error>,
}

impl CodecError {
    pub fn new(status: Status, error: Option<Error>) -> Self {
        Self { status, error }
    }

    /// Builds a mapping closure that attributes a low-level error to `status`.
    pub(crate) fn at(status: Status) -> impl Fn(Error) -> CodecError {
        move |error| CodecError::new(status, Some(error))
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn error(&self) -> Option<Error> {
        self.error
    }

    pub fn is_retryable(&self) -> bool {
        self.status.is_retryable()
    }
}
