//! Lossless compression of container plaintext.

use std::io::{self, Write};

use flate2::bufread::{DeflateDecoder, GzDecoder, MultiGzDecoder, ZlibDecoder};
use flate2::write::{DeflateEncoder, GzEncoder, ZlibEncoder};
use tracing::error;

use crate::error::Error;
use crate::secure::SecureBytes;

/// Default compression level.
pub const DEFAULT_LEVEL: u32 = 6;

name_table! {
    /// Compression algorithm recorded in the container trailer.
    pub enum Compression {
        Identity => "Identity",
        Deflate => "Deflate",
        GZip => "GZip",
        ZLib => "ZLib",
    }
}

fn map_io(e: io::Error) -> Error {
    match e.kind() {
        io::ErrorKind::OutOfMemory => Error::OutOfMemory,
        io::ErrorKind::InvalidData | io::ErrorKind::InvalidInput | io::ErrorKind::UnexpectedEof => {
            Error::InvalidFormat
        }
        _ => {
            error!(error = %e, "unexpected compression failure");
            Error::UnknownError
        }
    }
}

fn encode<W: Write>(mut encoder: W, data: &[u8]) -> Result<W, Error> {
    encoder.write_all(data).map_err(map_io)?;
    Ok(encoder)
}

/// Decodes one member per iteration until the input is exhausted, or only
/// the first member when `repeat` is off.
fn decode_members<'a, D, F, I>(
    mut input: &'a [u8],
    repeat: bool,
    open: F,
    into_inner: I,
) -> Result<SecureBytes, Error>
where
    D: io::Read,
    F: Fn(&'a [u8]) -> D,
    I: Fn(D) -> &'a [u8],
{
    let mut out = SecureBytes::new();
    loop {
        let mut decoder = open(input);
        out.read_append(&mut decoder).map_err(map_io)?;
        input = into_inner(decoder);
        if !repeat || input.is_empty() {
            return Ok(out);
        }
    }
}

/// Algorithm-selectable compressor. `Identity` copies its input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Compressor {
    algorithm: Compression,
}

impl Compressor {
    pub fn new(algorithm: Compression) -> Self {
        Self { algorithm }
    }

    pub fn algorithm(&self) -> Compression {
        self.algorithm
    }

    /// Compresses `data` at `level` (clamped to 0..=9).
    pub fn deflate(&self, data: &[u8], level: u32) -> Result<SecureBytes, Error> {
        let level = flate2::Compression::new(level.min(9));
        match self.algorithm {
            Compression::Identity => SecureBytes::from_slice(data),
            Compression::Deflate => encode(DeflateEncoder::new(SecureBytes::new(), level), data)?
                .finish()
                .map_err(map_io),
            Compression::GZip => encode(GzEncoder::new(SecureBytes::new(), level), data)?
                .finish()
                .map_err(map_io),
            Compression::ZLib => encode(ZlibEncoder::new(SecureBytes::new(), level), data)?
                .finish()
                .map_err(map_io),
            Compression::Unknown => Err(Error::NotImplemented),
        }
    }

    /// Decompresses `data`. With `allow_multi_stream`, consecutive
    /// compressed members are decoded and concatenated.
    pub fn inflate(&self, data: &[u8], allow_multi_stream: bool) -> Result<SecureBytes, Error> {
        match self.algorithm {
            Compression::Identity => SecureBytes::from_slice(data),
            Compression::Deflate => decode_members(
                data,
                allow_multi_stream,
                DeflateDecoder::new,
                DeflateDecoder::into_inner,
            ),
            Compression::ZLib => decode_members(
                data,
                allow_multi_stream,
                ZlibDecoder::new,
                ZlibDecoder::into_inner,
            ),
            Compression::GZip if allow_multi_stream => {
                SecureBytes::read_from(MultiGzDecoder::new(data)).map_err(map_io)
            }
            Compression::GZip => {
                decode_members(data, false, GzDecoder::new, GzDecoder::into_inner)
            }
            Compression::Unknown => Err(Error::NotImplemented),
        }
    }
}
