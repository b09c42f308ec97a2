//! Cryptographic primitives for containers.
//!
//! Provides key derivation and message authentication ([`kdf`]), symmetric
//! encryption ([`cipher`]) and the randomness both of them draw from.

pub mod cipher;
pub mod kdf;

pub use self::cipher::{Cipher, CipherAlgorithm, Operation, Sealed};
pub use self::kdf::{DerivedKey, Digest, KeyDerivation, KeyMaker};

use getrandom::fill;
use tracing::error;

use crate::error::Error;

/// Upper bound on salt regeneration attempts before giving up.
const SALT_ATTEMPTS: usize = 16;

/// Fill buffer with cryptographically secure random bytes
pub fn secure_random(buf: &mut [u8]) -> Result<(), Error> {
    fill(buf).map_err(|e| {
        error!(error = %e, "OS random generator unavailable");
        Error::UnknownError
    })
}

/// Generate a salt of `len` bytes that is not mostly zero.
pub fn generate_salt(len: usize) -> Result<Vec<u8>, Error> {
    let mut salt = vec![0u8; len];
    for _ in 0..SALT_ATTEMPTS {
        secure_random(&mut salt)?;
        let zeros = salt.iter().filter(|&&b| b == 0).count();
        if zeros * 2 <= len {
            return Ok(salt);
        }
    }
    error!(len, "random generator keeps producing degenerate salts");
    Err(Error::UnknownError)
}

/// Generate a fresh initialization vector; zero length yields an empty one.
pub fn generate_iv(len: usize) -> Result<Vec<u8>, Error> {
    let mut iv = vec![0u8; len];
    secure_random(&mut iv)?;
    Ok(iv)
}
