//! Container format handling.
//!
//! Provides version detection, version-aware parsing and serialization of
//! containers, and the [`Codec`] that drives the full encrypt and decrypt
//! pipelines.

use std::fmt;
use std::io::{Read, Write};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::compress::{self, Compression, Compressor};
use crate::crypto::kdf::{DEFAULT_ITERATIONS, DEFAULT_MEMORY_COST_KIB};
use crate::crypto::{Cipher, CipherAlgorithm, Digest, KeyDerivation, KeyMaker, Operation};
use crate::error::{CodecError, Error, Status};
use crate::secure::SecureBytes;

pub mod markup;
pub mod v1;
pub mod v2;

use markup::{Field, Root};

/// Bytes inspected by [`detect_version`].
pub const PEEK_LEN: usize = 512;
/// Marker a legacy container's plaintext must start with.
pub const LEGACY_MARKER: &[u8] = b"<!DOCTYPE HTML";

/// Container format revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Version {
    /// Nothing detected yet.
    #[default]
    Unknown,
    /// Container markup with a schema version this crate cannot read.
    Unsupported,
    /// No container markup: the bytes are the plaintext.
    Plain,
    /// Schema version 1: cipher only, marker-checked plaintext.
    Legacy,
    /// Schema version 2: compression and a detached authentication tag.
    Current,
}

impl Version {
    /// Numeric code: the schema version, or a negative value when none applies.
    pub fn code(self) -> i64 {
        match self {
            Version::Unknown => -1,
            Version::Unsupported => -2,
            Version::Plain => 0,
            Version::Legacy => v1::SCHEMA_VERSION,
            Version::Current => v2::SCHEMA_VERSION,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Version::Unknown => "unknown",
            Version::Unsupported => "unsupported",
            Version::Plain => "plain",
            Version::Legacy => "legacy",
            Version::Current => "current",
        };
        write!(f, "{name} ({})", self.code())
    }
}

/// Classifies `data` by its first [`PEEK_LEN`] bytes.
pub fn detect_version(data: &[u8]) -> Version {
    let prefix = &data[..data.len().min(PEEK_LEN)];
    let version = match markup::root(prefix) {
        Root::Foreign => Version::Plain,
        Root::Container {
            version: Some(v1::SCHEMA_VERSION),
        } => Version::Legacy,
        Root::Container {
            version: Some(v2::SCHEMA_VERSION),
        } => Version::Current,
        Root::Container { .. } => Version::Unsupported,
    };
    debug!(version = version.code(), "detected container version");
    version
}

/// Key derivation and cipher parameters recorded in a container header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub(crate) digest: Digest,
    pub(crate) key_derivation: KeyDerivation,
    pub(crate) memory_cost_kib: u32,
    pub(crate) salt: Vec<u8>,
    pub(crate) iterations: u32,
    pub(crate) key_length: usize,
    pub(crate) cipher: CipherAlgorithm,
    pub(crate) operation: Operation,
    pub(crate) iv: Vec<u8>,
}

impl Default for Header {
    fn default() -> Self {
        Self {
            digest: Digest::Unknown,
            key_derivation: KeyDerivation::Pbkdf2,
            memory_cost_kib: DEFAULT_MEMORY_COST_KIB,
            salt: Vec::new(),
            iterations: 0,
            key_length: 0,
            cipher: CipherAlgorithm::Unknown,
            operation: Operation::Unknown,
            iv: Vec::new(),
        }
    }
}

impl Header {
    pub fn digest(&self) -> Digest {
        self.digest
    }

    pub fn key_derivation(&self) -> KeyDerivation {
        self.key_derivation
    }

    /// Argon2 memory cost in KiB; meaningless for PBKDF2.
    pub fn memory_cost_kib(&self) -> u32 {
        self.memory_cost_kib
    }

    pub fn salt(&self) -> &[u8] {
        &self.salt
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    pub fn key_length(&self) -> usize {
        self.key_length
    }

    pub fn cipher(&self) -> CipherAlgorithm {
        self.cipher
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn iv(&self) -> &[u8] {
        &self.iv
    }

    fn key_maker(&self) -> KeyMaker {
        KeyMaker::new(self.digest, self.iterations)
            .with_key_derivation(self.key_derivation)
            .with_memory_cost(self.memory_cost_kib)
            .with_salt(self.salt.clone())
    }
}

/// Values that follow the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trailer {
    pub(crate) length: Option<u64>,
    pub(crate) authentication: Vec<u8>,
    pub(crate) compression: Compression,
}

impl Default for Trailer {
    fn default() -> Self {
        Self {
            length: None,
            authentication: Vec::new(),
            compression: Compression::Identity,
        }
    }
}

impl Trailer {
    /// Plaintext length before compression, when recorded.
    pub fn length(&self) -> Option<u64> {
        self.length
    }

    pub fn authentication(&self) -> &[u8] {
        &self.authentication
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }
}

/// A parsed container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Container {
    pub(crate) version: Version,
    pub(crate) header: Header,
    pub(crate) payload: Vec<u8>,
    pub(crate) trailer: Trailer,
}

/// Parses a container of a known version.
pub(crate) fn parse(version: Version, data: &[u8]) -> Result<Container, Error> {
    match version {
        Version::Legacy => v1::parse(data),
        Version::Current => v2::parse(data),
        _ => Err(Error::InvalidFormat),
    }
}

/// Serializes a container; only the current version is ever written.
pub(crate) fn serialize(container: &Container) -> Result<Vec<u8>, Error> {
    match container.version {
        Version::Current => v2::serialize(container),
        _ => Err(Error::NotImplemented),
    }
}

/// Builds a container from the fields read by a version's element table.
pub(crate) fn assemble(version: Version, fields: Vec<(Field, String)>) -> Result<Container, Error> {
    let mut header = Header::default();
    let mut trailer = Trailer::default();
    let mut payload = Vec::new();
    let mut seen = Vec::with_capacity(fields.len());

    for (field, text) in fields {
        let text = text.trim();
        match field {
            Field::Digest => header.digest = Digest::from_name(text),
            Field::KeyDerivation => header.key_derivation = KeyDerivation::from_name(text),
            Field::MemoryCost => header.memory_cost_kib = parse_number(text)?,
            Field::Salt => header.salt = parse_hex(text)?,
            Field::IterationCount => header.iterations = parse_number(text)?,
            Field::KeyLength => header.key_length = parse_number(text)?,
            Field::Cipher => header.cipher = CipherAlgorithm::from_name(text),
            Field::Method => header.operation = Operation::from_name(text),
            Field::InitialVector => header.iv = parse_hex(text)?,
            Field::Data => payload.extend_from_slice(&parse_base64(text)?),
            Field::HexData => payload.extend_from_slice(&parse_hex(text)?),
            Field::Length => trailer.length = Some(parse_number(text)?),
            Field::Authentication => trailer.authentication = parse_hex(text)?,
            Field::Compression => trailer.compression = Compression::from_name(text),
        }
        seen.push(field);
    }

    let required = [
        Field::Digest,
        Field::Salt,
        Field::IterationCount,
        Field::KeyLength,
        Field::Cipher,
        Field::Method,
    ];
    if let Some(missing) = required.into_iter().find(|field| !seen.contains(field)) {
        warn!(field = ?missing, "container header is incomplete");
        return Err(Error::InvalidFormat);
    }

    Ok(Container {
        version,
        header,
        payload,
        trailer,
    })
}

fn parse_number<T: std::str::FromStr>(text: &str) -> Result<T, Error> {
    text.parse().map_err(|_| Error::InvalidFormat)
}

fn strip_whitespace(text: &str) -> String {
    text.chars().filter(|c| !c.is_ascii_whitespace()).collect()
}

fn parse_hex(text: &str) -> Result<Vec<u8>, Error> {
    hex::decode(strip_whitespace(text)).map_err(|_| Error::InvalidFormat)
}

fn parse_base64(text: &str) -> Result<Vec<u8>, Error> {
    STANDARD
        .decode(strip_whitespace(text))
        .map_err(|_| Error::InvalidFormat)
}

/// Algorithm choices applied when encrypting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Choices {
    pub cipher: CipherAlgorithm,
    pub operation: Operation,
    pub key_length: usize,
    pub digest: Digest,
    pub key_derivation: KeyDerivation,
    pub iterations: u32,
    /// Optional key derivation time budget in milliseconds.
    pub iteration_time_ms: Option<u64>,
    pub memory_cost_kib: u32,
    pub compression: Compression,
    pub compression_level: u32,
}

impl Default for Choices {
    fn default() -> Self {
        Self {
            cipher: CipherAlgorithm::Aes,
            operation: Operation::Gcm,
            key_length: 32,
            digest: Digest::Sha256,
            key_derivation: KeyDerivation::Pbkdf2,
            iterations: DEFAULT_ITERATIONS,
            iteration_time_ms: None,
            memory_cost_kib: DEFAULT_MEMORY_COST_KIB,
            compression: Compression::Deflate,
            compression_level: compress::DEFAULT_LEVEL,
        }
    }
}

/// Encrypts plaintext into containers and decrypts containers of every
/// readable version.
///
/// The outcome of the last operation stays observable through
/// [`status`](Codec::status), [`error`](Codec::error),
/// [`version`](Codec::version), [`header`](Codec::header) and
/// [`trailer`](Codec::trailer).
#[derive(Debug)]
pub struct Codec {
    choices: Choices,
    legacy_marker: Vec<u8>,
    version: Version,
    status: Status,
    error: Option<Error>,
    header: Option<Header>,
    trailer: Option<Trailer>,
}

impl Default for Codec {
    fn default() -> Self {
        Self::new(Choices::default())
    }
}

impl Codec {
    pub fn new(choices: Choices) -> Self {
        Self {
            choices,
            legacy_marker: LEGACY_MARKER.to_vec(),
            version: Version::Unknown,
            status: Status::Ok,
            error: None,
            header: None,
            trailer: None,
        }
    }

    /// Replaces the marker legacy plaintext is checked against.
    pub fn with_legacy_marker(mut self, marker: impl Into<Vec<u8>>) -> Self {
        self.legacy_marker = marker.into();
        self
    }

    pub fn choices(&self) -> &Choices {
        &self.choices
    }

    pub fn choices_mut(&mut self) -> &mut Choices {
        &mut self.choices
    }

    /// Version of the last container read or written.
    pub fn version(&self) -> Version {
        self.version
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn error(&self) -> Option<Error> {
        self.error
    }

    /// Header of the last container successfully read or written.
    pub fn header(&self) -> Option<&Header> {
        self.header.as_ref()
    }

    pub fn trailer(&self) -> Option<&Trailer> {
        self.trailer.as_ref()
    }

    /// Classifies `data` and remembers the result.
    pub fn detect_version(&mut self, data: &[u8]) -> Version {
        self.version = detect_version(data);
        self.version
    }

    /// Reads header and trailer without decrypting anything.
    pub fn inspect(&mut self, data: &[u8]) -> Result<Version, CodecError> {
        self.header = None;
        self.trailer = None;
        let result = match self.detect_version(data) {
            Version::Plain => Ok(Version::Plain),
            version @ (Version::Legacy | Version::Current) => parse(version, data)
                .map(|container| {
                    self.header = Some(container.header);
                    self.trailer = Some(container.trailer);
                    version
                })
                .map_err(CodecError::at(Status::ReadCorruptData)),
            Version::Unsupported | Version::Unknown => {
                Err(CodecError::new(Status::ReadCorruptData, None))
            }
        };
        self.record(result)
    }

    /// Decrypts a container held in memory.
    ///
    /// # Errors
    ///
    /// - [`Status::ReadCorruptData`] for empty input, malformed markup or an
    ///   unsupported schema version
    /// - [`Status::KeyDerivationError`] when no key can be derived
    /// - [`Status::CryptographicError`] for a wrong password or tampered data
    /// - [`Status::CompressionError`] when the decrypted payload does not inflate
    pub fn decrypt(&mut self, data: &[u8], password: &[u8]) -> Result<SecureBytes, CodecError> {
        self.header = None;
        self.trailer = None;
        let result = self.decode(data, password);
        self.record(result)
    }

    /// Reads `reader` to its end and decrypts the result.
    pub fn decrypt_from<R: Read>(
        &mut self,
        reader: R,
        password: &[u8],
    ) -> Result<SecureBytes, CodecError> {
        match SecureBytes::read_from(reader) {
            Ok(data) => self.decrypt(&data, password),
            Err(e) => {
                warn!(error = %e, "failed to read container");
                self.record(Err(CodecError::new(Status::ReadPastEnd, None)))
            }
        }
    }

    /// Encrypts `plaintext` into a current-version container. An empty
    /// password yields the plaintext itself.
    pub fn encrypt(&mut self, plaintext: &[u8], password: &[u8]) -> Result<Vec<u8>, CodecError> {
        self.header = None;
        self.trailer = None;
        let result = self.encode(plaintext, password);
        self.record(result)
    }

    /// Encrypts `plaintext` and writes the container to `writer`.
    pub fn encrypt_to<W: Write>(
        &mut self,
        mut writer: W,
        plaintext: &[u8],
        password: &[u8],
    ) -> Result<(), CodecError> {
        let container = self.encrypt(plaintext, password)?;
        let written = writer.write_all(&container).and_then(|()| writer.flush());
        match written {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(error = %e, "failed to write container");
                self.record(Err(CodecError::new(Status::WriteFailed, None)))
            }
        }
    }

    fn record<T>(&mut self, result: Result<T, CodecError>) -> Result<T, CodecError> {
        match &result {
            Ok(_) => {
                self.status = Status::Ok;
                self.error = None;
            }
            Err(e) => {
                warn!(status = ?e.status(), error = ?e.error(), "container operation failed");
                self.status = e.status();
                self.error = e.error();
            }
        }
        result
    }

    fn decode(&mut self, data: &[u8], password: &[u8]) -> Result<SecureBytes, CodecError> {
        match self.detect_version(data) {
            Version::Plain if data.is_empty() => {
                Err(CodecError::new(Status::ReadCorruptData, None))
            }
            Version::Plain => SecureBytes::from_slice(data).map_err(plain_copy_failed),
            version @ (Version::Legacy | Version::Current) => {
                let container =
                    parse(version, data).map_err(CodecError::at(Status::ReadCorruptData))?;
                self.open(container, password)
            }
            Version::Unsupported | Version::Unknown => {
                Err(CodecError::new(Status::ReadCorruptData, None))
            }
        }
    }

    fn open(&mut self, container: Container, password: &[u8]) -> Result<SecureBytes, CodecError> {
        let Container {
            version,
            header,
            payload,
            trailer,
        } = container;

        if header.salt.is_empty() {
            return Err(CodecError::new(Status::ReadCorruptData, Some(Error::InvalidFormat)));
        }

        let key = header
            .key_maker()
            .derive_key(password, header.key_length)
            .map_err(CodecError::at(Status::KeyDerivationError))?;

        let cipher = Cipher::new(header.cipher, header.operation);
        if version == Version::Current
            && !header.operation.is_authenticated()
            && trailer.authentication.is_empty()
        {
            return Err(CodecError::new(Status::CryptographicError, Some(Error::IntegrityError)));
        }

        let decrypted = cipher
            .decrypt(&payload, &key, &header.iv, &trailer.authentication)
            .map_err(CodecError::at(Status::CryptographicError))?;

        let plaintext = match version {
            Version::Legacy => {
                v1::check_marker(&decrypted, &self.legacy_marker)
                    .map_err(CodecError::at(Status::CryptographicError))?;
                decrypted
            }
            _ => {
                let plaintext = Compressor::new(trailer.compression)
                    .inflate(&decrypted, false)
                    .map_err(CodecError::at(Status::CompressionError))?;
                if let Some(expected) = trailer.length {
                    if plaintext.len() as u64 != expected {
                        warn!(expected, actual = plaintext.len(), "plaintext length mismatch");
                        return Err(CodecError::new(
                            Status::CompressionError,
                            Some(Error::IntegrityError),
                        ));
                    }
                }
                plaintext
            }
        };

        debug!(
            version = version.code(),
            cipher = %header.cipher,
            mode = %header.operation,
            "container decrypted"
        );
        self.header = Some(header);
        self.trailer = Some(trailer);
        Ok(plaintext)
    }

    fn encode(&mut self, plaintext: &[u8], password: &[u8]) -> Result<Vec<u8>, CodecError> {
        if password.is_empty() {
            self.version = Version::Plain;
            return Ok(plaintext.to_vec());
        }
        self.version = Version::Current;

        let choices = self.choices.clone();
        let (compressed, compression) = self.compress(plaintext)?;

        let cipher = Cipher::new(choices.cipher, choices.operation);
        let key_length = cipher
            .valid_key_length(choices.key_length)
            .map_err(CodecError::at(Status::CryptographicError))?;

        let mut key_maker = KeyMaker::new(choices.digest, choices.iterations)
            .with_key_derivation(choices.key_derivation)
            .with_memory_cost(choices.memory_cost_kib)
            .with_iteration_time(choices.iteration_time_ms.map(Duration::from_millis));
        let key = key_maker
            .derive_key(password, key_length)
            .map_err(CodecError::at(Status::KeyDerivationError))?;

        let sealed = cipher
            .encrypt(&compressed, &key)
            .map_err(CodecError::at(Status::CryptographicError))?;

        let container = Container {
            version: Version::Current,
            header: Header {
                digest: choices.digest,
                key_derivation: choices.key_derivation,
                memory_cost_kib: key_maker.memory_cost_kib(),
                salt: key_maker.salt().to_vec(),
                iterations: key_maker.iterations(),
                key_length,
                cipher: choices.cipher,
                operation: choices.operation,
                iv: sealed.iv,
            },
            payload: sealed.ciphertext,
            trailer: Trailer {
                length: Some(plaintext.len() as u64),
                authentication: sealed.authentication,
                compression,
            },
        };

        let bytes = serialize(&container).map_err(CodecError::at(Status::WriteFailed))?;
        debug!(
            cipher = %container.header.cipher,
            mode = %container.header.operation,
            iterations = container.header.iterations,
            %compression,
            "container encrypted"
        );
        self.header = Some(container.header);
        self.trailer = Some(container.trailer);
        Ok(bytes)
    }

    /// Compresses with the chosen algorithm, storing the plaintext as is
    /// when that fails.
    fn compress(&self, plaintext: &[u8]) -> Result<(SecureBytes, Compression), CodecError> {
        let chosen = self.choices.compression;
        match Compressor::new(chosen).deflate(plaintext, self.choices.compression_level) {
            Ok(packed) => Ok((packed, chosen)),
            Err(e) => {
                warn!(algorithm = %chosen, error = %e, "compression failed, storing uncompressed");
                let packed = Compressor::new(Compression::Identity)
                    .deflate(plaintext, 0)
                    .map_err(CodecError::at(Status::CompressionError))?;
                Ok((packed, Compression::Identity))
            }
        }
    }
}

/// An uncontained file that cannot be copied counts as unreadable.
fn plain_copy_failed(error: Error) -> CodecError {
    CodecError::new(Status::ReadCorruptData, Some(error))
}
