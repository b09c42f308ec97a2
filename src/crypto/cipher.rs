use aes_gcm::AesGcm;
use aes_gcm::aead::consts::{U12, U16};
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::generic_array::typenum::Unsigned;
use aes_gcm::aead::{Aead, AeadCore};
use chacha20poly1305::XChaCha20Poly1305;
use cipher::block_padding::Pkcs7;
use cipher::{
    AsyncStreamCipher, BlockDecrypt, BlockDecryptMut, BlockEncrypt, BlockEncryptMut,
    BlockSizeUser, InnerIvInit, KeyInit, KeySizeUser, StreamCipher, StreamCipherCoreWrapper,
};
use eax::Eax;
use tracing::error;

use super::generate_iv;
use super::kdf::DerivedKey;
use crate::error::Error;
use crate::secure::SecureBytes;

name_table! {
    /// Symmetric primitive.
    pub enum CipherAlgorithm {
        Aes => "AES",
        Blowfish => "Blowfish",
        Cast128 => "CAST-128",
        Camellia => "Camellia",
        DesEde3 => "DES-EDE3",
        Idea => "IDEA",
        Serpent => "Serpent",
        Twofish => "Twofish",
        XChaCha20 => "XChaCha20",
    }
}

name_table! {
    /// Mode of operation.
    pub enum Operation {
        Cbc => "CBC",
        Cfb => "CFB",
        Ctr => "CTR",
        Eax => "EAX",
        Gcm => "GCM",
        Ofb => "OFB",
        Ecb => "ECB",
        Poly1305 => "Poly1305",
    }
}

impl Operation {
    /// Modes that carry their own authentication tag inside the ciphertext.
    pub fn is_authenticated(self) -> bool {
        matches!(self, Operation::Eax | Operation::Gcm | Operation::Poly1305)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Encrypt,
    Decrypt,
}

/// Output of [`Cipher::encrypt`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub ciphertext: Vec<u8>,
    pub iv: Vec<u8>,
    /// HMAC over the plaintext for unauthenticated modes, empty otherwise.
    pub authentication: Vec<u8>,
}

/// Expands `$apply!(BlockCipherType, args..)` for the primitive selected by
/// an algorithm and key length.
macro_rules! with_block_cipher {
    ($algorithm:expr, $key_len:expr, $apply:ident ! ($($arg:expr),* $(,)?)) => {
        match ($algorithm, $key_len) {
            (CipherAlgorithm::Aes, 16) => $apply!(aes::Aes128 $(, $arg)*),
            (CipherAlgorithm::Aes, 24) => $apply!(aes::Aes192 $(, $arg)*),
            (CipherAlgorithm::Aes, _) => $apply!(aes::Aes256 $(, $arg)*),
            (CipherAlgorithm::Camellia, 16) => $apply!(camellia::Camellia128 $(, $arg)*),
            (CipherAlgorithm::Camellia, 24) => $apply!(camellia::Camellia192 $(, $arg)*),
            (CipherAlgorithm::Camellia, _) => $apply!(camellia::Camellia256 $(, $arg)*),
            (CipherAlgorithm::Serpent, _) => $apply!(serpent::Serpent $(, $arg)*),
            (CipherAlgorithm::Twofish, _) => $apply!(twofish::Twofish $(, $arg)*),
            (CipherAlgorithm::Blowfish, _) => $apply!(blowfish::Blowfish $(, $arg)*),
            (CipherAlgorithm::Cast128, _) => $apply!(cast5::Cast5 $(, $arg)*),
            (CipherAlgorithm::DesEde3, _) => $apply!(des::TdesEde3 $(, $arg)*),
            (CipherAlgorithm::Idea, _) => $apply!(idea::Idea $(, $arg)*),
            (CipherAlgorithm::XChaCha20, _) | (CipherAlgorithm::Unknown, _) => {
                Err(Error::NotImplemented)
            }
        }
    };
}

/// Same as [`with_block_cipher`], restricted to 128-bit block primitives.
macro_rules! with_wide_block_cipher {
    ($algorithm:expr, $key_len:expr, $apply:ident ! ($($arg:expr),* $(,)?)) => {
        match ($algorithm, $key_len) {
            (CipherAlgorithm::Aes, 16) => $apply!(aes::Aes128 $(, $arg)*),
            (CipherAlgorithm::Aes, 24) => $apply!(aes::Aes192 $(, $arg)*),
            (CipherAlgorithm::Aes, _) => $apply!(aes::Aes256 $(, $arg)*),
            (CipherAlgorithm::Camellia, 16) => $apply!(camellia::Camellia128 $(, $arg)*),
            (CipherAlgorithm::Camellia, 24) => $apply!(camellia::Camellia192 $(, $arg)*),
            (CipherAlgorithm::Camellia, _) => $apply!(camellia::Camellia256 $(, $arg)*),
            (CipherAlgorithm::Serpent, _) => $apply!(serpent::Serpent $(, $arg)*),
            (CipherAlgorithm::Twofish, _) => $apply!(twofish::Twofish $(, $arg)*),
            _ => Err(Error::NotImplemented),
        }
    };
}

/// Full-block GCM nonce written by older releases.
const BLOCK_NONCE_LEN: usize = 16;

macro_rules! block_size {
    ($c:ty) => {
        Ok(<$c as BlockSizeUser>::block_size())
    };
}

macro_rules! block_mode {
    ($c:ty, $operation:expr, $direction:expr, $key:expr, $iv:expr, $data:expr) => {{
        let block = <$c as KeyInit>::new_from_slice($key).map_err(|_| Error::InvalidArgument)?;
        let (iv, data): (&[u8], &[u8]) = ($iv, $data);
        match ($operation, $direction) {
            (Operation::Ecb, Direction::Encrypt) => Ok(block.encrypt_padded_vec::<Pkcs7>(data)),
            (Operation::Ecb, Direction::Decrypt) => block
                .decrypt_padded_vec::<Pkcs7>(data)
                .map_err(|_| Error::InvalidFormat),
            (Operation::Cbc, Direction::Encrypt) => {
                let mode = cbc::Encryptor::<$c>::inner_iv_slice_init(block, iv)
                    .map_err(|_| Error::InvalidArgument)?;
                Ok(mode.encrypt_padded_vec_mut::<Pkcs7>(data))
            }
            (Operation::Cbc, Direction::Decrypt) => {
                let mode = cbc::Decryptor::<$c>::inner_iv_slice_init(block, iv)
                    .map_err(|_| Error::InvalidArgument)?;
                mode.decrypt_padded_vec_mut::<Pkcs7>(data)
                    .map_err(|_| Error::InvalidFormat)
            }
            (Operation::Cfb, Direction::Encrypt) => {
                let mode = cfb_mode::Encryptor::<$c>::inner_iv_slice_init(block, iv)
                    .map_err(|_| Error::InvalidArgument)?;
                let mut buf = data.to_vec();
                AsyncStreamCipher::encrypt(mode, &mut buf);
                Ok(buf)
            }
            (Operation::Cfb, Direction::Decrypt) => {
                let mode = cfb_mode::Decryptor::<$c>::inner_iv_slice_init(block, iv)
                    .map_err(|_| Error::InvalidArgument)?;
                let mut buf = data.to_vec();
                AsyncStreamCipher::decrypt(mode, &mut buf);
                Ok(buf)
            }
            (Operation::Ctr, _) => {
                let core = ctr::CtrCore::<$c, ctr::flavors::Ctr64BE>::inner_iv_slice_init(block, iv)
                    .map_err(|_| Error::InvalidArgument)?;
                keystream(StreamCipherCoreWrapper::from_core(core), data)
            }
            (Operation::Ofb, _) => {
                let core = ofb::OfbCore::<$c>::inner_iv_slice_init(block, iv)
                    .map_err(|_| Error::InvalidArgument)?;
                keystream(StreamCipherCoreWrapper::from_core(core), data)
            }
            _ => Err(Error::NotImplemented),
        }
    }};
}

macro_rules! aead_mode {
    ($c:ty, $operation:expr, $direction:expr, $key:expr, $iv:expr, $data:expr) => {
        match $operation {
            Operation::Gcm => {
                let block =
                    <$c as KeyInit>::new_from_slice($key).map_err(|_| Error::InvalidArgument)?;
                let nonce: &[u8] = $iv;
                if nonce.len() == BLOCK_NONCE_LEN {
                    seal_or_open(AesGcm::<$c, U16>::from(block), $direction, nonce, $data)
                } else {
                    seal_or_open(AesGcm::<$c, U12>::from(block), $direction, nonce, $data)
                }
            }
            Operation::Eax => {
                let aead = Eax::<$c>::new_from_slice($key).map_err(|_| Error::InvalidArgument)?;
                seal_or_open(aead, $direction, $iv, $data)
            }
            _ => Err(Error::NotImplemented),
        }
    };
}

fn keystream<S: StreamCipher>(mut mode: S, data: &[u8]) -> Result<Vec<u8>, Error> {
    let mut buf = data.to_vec();
    mode.try_apply_keystream(&mut buf).map_err(|_| Error::InvalidArgument)?;
    Ok(buf)
}

fn seal_or_open<A: Aead>(
    aead: A,
    direction: Direction,
    nonce: &[u8],
    data: &[u8],
) -> Result<Vec<u8>, Error> {
    if nonce.len() != <A as AeadCore>::NonceSize::USIZE {
        return Err(Error::InvalidArgument);
    }
    let nonce = GenericArray::from_slice(nonce);
    match direction {
        Direction::Encrypt => aead.encrypt(nonce, data).map_err(|_| {
            error!("authenticated encryption failed");
            Error::UnknownError
        }),
        Direction::Decrypt => aead
            .decrypt(nonce, data)
            .map_err(|_| Error::IntegrityError),
    }
}

/// Symmetric encryption under an algorithm and mode.
///
/// Unauthenticated modes are paired with an HMAC over the plaintext, keyed
/// with the same derived key; authenticated modes keep their tag appended
/// to the ciphertext. A fresh random IV is drawn for every encryption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cipher {
    algorithm: CipherAlgorithm,
    operation: Operation,
}

impl Default for Cipher {
    fn default() -> Self {
        Self::new(CipherAlgorithm::Aes, Operation::Gcm)
    }
}

impl Cipher {
    pub fn new(algorithm: CipherAlgorithm, operation: Operation) -> Self {
        Self {
            algorithm,
            operation,
        }
    }

    pub fn algorithm(&self) -> CipherAlgorithm {
        self.algorithm
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    /// Whether this algorithm and mode can be combined.
    pub fn is_supported(&self) -> bool {
        use CipherAlgorithm::*;

        match (self.algorithm, self.operation) {
            (Unknown, _) | (_, Operation::Unknown) => false,
            (XChaCha20, Operation::Poly1305) => true,
            (XChaCha20, _) | (_, Operation::Poly1305) => false,
            (Aes | Camellia | Serpent | Twofish, _) => true,
            (_, Operation::Eax | Operation::Gcm) => false,
            _ => true,
        }
    }

    /// Accepted key lengths in bytes, ascending. Empty when unsupported.
    pub fn key_lengths(&self) -> Vec<usize> {
        use CipherAlgorithm::*;

        if !self.is_supported() {
            return Vec::new();
        }
        match (self.algorithm, self.operation) {
            (Serpent, Operation::Eax) => vec![<Eax<serpent::Serpent> as KeySizeUser>::key_size()],
            (Twofish, Operation::Eax) => vec![<Eax<twofish::Twofish> as KeySizeUser>::key_size()],
            (Aes | Camellia | Serpent | Twofish, _) => vec![16, 24, 32],
            (Blowfish, _) => (4..=56).collect(),
            (Cast128, _) => (5..=16).collect(),
            (DesEde3, _) => vec![<des::TdesEde3 as KeySizeUser>::key_size()],
            (Idea, _) => vec![<idea::Idea as KeySizeUser>::key_size()],
            (XChaCha20, _) => vec![<XChaCha20Poly1305 as KeySizeUser>::key_size()],
            (Unknown, _) => Vec::new(),
        }
    }

    /// Snaps `desired` to the smallest accepted length not below it, or to
    /// the largest accepted length.
    pub fn valid_key_length(&self, desired: usize) -> Result<usize, Error> {
        let lengths = self.key_lengths();
        let largest = lengths.last().copied().ok_or(Error::NotImplemented)?;
        Ok(lengths
            .into_iter()
            .find(|&len| len >= desired)
            .unwrap_or(largest))
    }

    /// IV (nonce) length drawn for every encryption; zero for ECB.
    pub fn iv_length(&self) -> Result<usize, Error> {
        if !self.is_supported() {
            return Err(Error::NotImplemented);
        }
        match self.operation {
            Operation::Ecb => Ok(0),
            Operation::Gcm => Ok(<AesGcm<aes::Aes128, U12> as AeadCore>::NonceSize::USIZE),
            Operation::Eax => Ok(<Eax<aes::Aes128> as AeadCore>::NonceSize::USIZE),
            Operation::Poly1305 => Ok(<XChaCha20Poly1305 as AeadCore>::NonceSize::USIZE),
            _ => with_block_cipher!(self.algorithm, 16, block_size!()),
        }
    }

    /// Encrypts `plaintext` under `key` with a freshly generated IV.
    ///
    /// # Errors
    ///
    /// - [`Error::NotImplemented`] if the algorithm and mode cannot be combined
    /// - [`Error::InvalidArgument`] if the key length is not accepted
    pub fn encrypt(&self, plaintext: &[u8], key: &DerivedKey) -> Result<Sealed, Error> {
        self.check_key(key.len())?;

        let iv = generate_iv(self.iv_length()?)?;
        let ciphertext = self.transform(Direction::Encrypt, key.as_bytes(), &iv, plaintext)?;
        let authentication = if self.operation.is_authenticated() {
            Vec::new()
        } else {
            key.authenticate(plaintext, None)?
        };

        Ok(Sealed {
            ciphertext,
            iv,
            authentication,
        })
    }

    /// Decrypts `ciphertext`. For unauthenticated modes a non-empty
    /// `authentication` is verified against the recovered plaintext.
    ///
    /// # Errors
    ///
    /// - [`Error::IntegrityError`] on tag or HMAC mismatch
    /// - [`Error::InvalidFormat`] on bad padding
    /// - [`Error::InvalidArgument`] on a key or IV of the wrong length
    pub fn decrypt(
        &self,
        ciphertext: &[u8],
        key: &DerivedKey,
        iv: &[u8],
        authentication: &[u8],
    ) -> Result<SecureBytes, Error> {
        self.check_key(key.len())?;
        if !self.accepts_iv(iv)? {
            return Err(Error::InvalidArgument);
        }

        let plaintext = SecureBytes::from_vec(self.transform(
            Direction::Decrypt,
            key.as_bytes(),
            iv,
            ciphertext,
        )?);

        if !self.operation.is_authenticated() && !authentication.is_empty() {
            key.verify(&plaintext, authentication)?;
        }
        Ok(plaintext)
    }

    /// Older releases recorded a block-sized IV for every mode: ECB ignores
    /// it and GCM takes it as a full-block nonce.
    fn accepts_iv(&self, iv: &[u8]) -> Result<bool, Error> {
        let expected = self.iv_length()?;
        Ok(match self.operation {
            Operation::Ecb => true,
            Operation::Gcm => iv.len() == expected || iv.len() == BLOCK_NONCE_LEN,
            _ => iv.len() == expected,
        })
    }

    fn check_key(&self, len: usize) -> Result<(), Error> {
        if !self.is_supported() {
            return Err(Error::NotImplemented);
        }
        if !self.key_lengths().contains(&len) {
            return Err(Error::InvalidArgument);
        }
        Ok(())
    }

    fn transform(
        &self,
        direction: Direction,
        key: &[u8],
        iv: &[u8],
        data: &[u8],
    ) -> Result<Vec<u8>, Error> {
        match self.operation {
            Operation::Poly1305 => {
                let aead =
                    XChaCha20Poly1305::new_from_slice(key).map_err(|_| Error::InvalidArgument)?;
                seal_or_open(aead, direction, iv, data)
            }
            Operation::Eax | Operation::Gcm => with_wide_block_cipher!(
                self.algorithm,
                key.len(),
                aead_mode!(self.operation, direction, key, iv, data)
            ),
            _ => with_block_cipher!(
                self.algorithm,
                key.len(),
                block_mode!(self.operation, direction, key, iv, data)
            ),
        }
    }
}
