//! Password-encrypted document containers.
//!
//! A container is a small XML document carrying the key derivation and
//! cipher parameters, the encrypted (and usually compressed) payload, and
//! an authentication tag. [`Codec`] reads every container version and
//! writes the current one; [`Document`] ties a codec to a file on disk.

#[macro_use]
mod names;

pub mod compress;
pub mod crypto;
pub mod error;
pub mod format;
pub mod secure;
pub mod settings;
pub mod storage;

pub use crate::compress::{Compression, Compressor};
pub use crate::crypto::{Cipher, CipherAlgorithm, Digest, KeyDerivation, KeyMaker, Operation};
pub use crate::error::{CodecError, Error, Status};
pub use crate::format::{Choices, Codec, Header, Trailer, Version, detect_version};
pub use crate::secure::{SecureBuffer, SecureBytes, SecureChars};
pub use crate::settings::Settings;
pub use crate::storage::Storage;

use anyhow::{Context, Result};
use tracing::info;

/// A document file read and written through a [`Codec`].
#[derive(Debug)]
pub struct Document {
    storage: Storage,
    codec: Codec,
}

impl Document {
    pub fn new(storage: Storage, choices: Choices) -> Self {
        Self {
            storage,
            codec: Codec::new(choices),
        }
    }

    /// Reads and decrypts the file. Plain files come back as they are.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or decrypted; a
    /// [`CodecError`] can be recovered with `downcast_ref`.
    pub fn open(&mut self, password: &[u8]) -> Result<SecureBytes> {
        let data = self.storage.load()?;
        let plaintext = self
            .codec
            .decrypt(&data, password)
            .with_context(|| format!("failed to open {}", self.storage.path().display()))?;
        info!(
            path = %self.storage.path().display(),
            version = self.codec.version().code(),
            "document opened"
        );
        Ok(plaintext)
    }

    /// Encrypts `plaintext` and replaces the file. The file is untouched
    /// unless the whole pipeline succeeds.
    pub fn save(&mut self, plaintext: &[u8], password: &[u8]) -> Result<()> {
        let container = self
            .codec
            .encrypt(plaintext, password)
            .with_context(|| format!("failed to encrypt {}", self.storage.path().display()))?;
        self.storage.save(&container)?;
        info!(
            path = %self.storage.path().display(),
            version = self.codec.version().code(),
            "document saved"
        );
        Ok(())
    }

    /// Reads the header and trailer without a password.
    pub fn inspect(&mut self) -> Result<Version> {
        let data = self.storage.load()?;
        Ok(self.codec.inspect(&data)?)
    }

    pub fn version(&self) -> Version {
        self.codec.version()
    }

    pub fn codec(&self) -> &Codec {
        &self.codec
    }

    pub fn codec_mut(&mut self) -> &mut Codec {
        &mut self.codec
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }
}
