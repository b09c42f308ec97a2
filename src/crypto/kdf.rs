use std::fmt;
use std::time::{Duration, Instant};

use argon2::{Argon2, Params};
use hmac::digest::OutputSizeUser;
use hmac::{Hmac, Mac};
use tracing::debug;
use zeroize::Zeroizing;

use super::generate_salt;
use crate::error::Error;
use crate::secure::SecureBytes;

/// Default PBKDF2 iteration count.
pub const DEFAULT_ITERATIONS: u32 = 100_000;
/// Default Argon2 memory cost (64 MiB).
pub const DEFAULT_MEMORY_COST_KIB: u32 = 64 * 1024;
/// Rounds spent measuring the host before a time-budgeted derivation.
const CALIBRATION_ROUNDS: u32 = 1 << 10;

name_table! {
    /// Digest driving PBKDF2 and HMAC, and sizing the salt.
    pub enum Digest {
        Ripemd160 => "RIPEMD-160",
        Ripemd320 => "RIPEMD-320",
        Sha1 => "SHA-1",
        Sha224 => "SHA-224",
        Sha256 => "SHA-256",
        Sha384 => "SHA-384",
        Sha512 => "SHA-512",
        Sha3_224 => "SHA3-224",
        Sha3_256 => "SHA3-256",
        Sha3_384 => "SHA3-384",
        Sha3_512 => "SHA3-512",
        Tiger => "Tiger",
        Whirlpool => "Whirlpool",
    }
}

name_table! {
    /// Password-based key derivation function.
    pub enum KeyDerivation {
        Pbkdf2 => "PBKDF2",
        Argon2id => "Argon2id",
    }
}

/// Expands `$apply!(DigestType, args..)` for the concrete digest behind a
/// [`Digest`] value.
macro_rules! with_digest {
    ($digest:expr, $apply:ident ! ($($arg:expr),* $(,)?)) => {
        match $digest {
            Digest::Ripemd160 => $apply!(ripemd::Ripemd160 $(, $arg)*),
            Digest::Ripemd320 => $apply!(ripemd::Ripemd320 $(, $arg)*),
            Digest::Sha1 => $apply!(sha1::Sha1 $(, $arg)*),
            Digest::Sha224 => $apply!(sha2::Sha224 $(, $arg)*),
            Digest::Sha256 => $apply!(sha2::Sha256 $(, $arg)*),
            Digest::Sha384 => $apply!(sha2::Sha384 $(, $arg)*),
            Digest::Sha512 => $apply!(sha2::Sha512 $(, $arg)*),
            Digest::Sha3_224 => $apply!(sha3::Sha3_224 $(, $arg)*),
            Digest::Sha3_256 => $apply!(sha3::Sha3_256 $(, $arg)*),
            Digest::Sha3_384 => $apply!(sha3::Sha3_384 $(, $arg)*),
            Digest::Sha3_512 => $apply!(sha3::Sha3_512 $(, $arg)*),
            Digest::Tiger => $apply!(tiger::Tiger $(, $arg)*),
            Digest::Whirlpool => $apply!(whirlpool::Whirlpool $(, $arg)*),
            Digest::Unknown => Err(Error::NotImplemented),
        }
    };
}

macro_rules! output_size {
    ($d:ty) => {
        Ok(<$d as OutputSizeUser>::output_size())
    };
}

macro_rules! pbkdf2_into {
    ($d:ty, $password:expr, $salt:expr, $rounds:expr, $out:expr) => {
        pbkdf2::pbkdf2::<Hmac<$d>>($password, $salt, $rounds, $out)
            .map_err(|_| Error::InvalidArgument)
    };
}

macro_rules! hmac_tag {
    ($d:ty, $key:expr, $message:expr, $truncated:expr) => {{
        let mut mac = <Hmac<$d> as Mac>::new_from_slice($key).map_err(|_| Error::InvalidArgument)?;
        mac.update($message);
        let code = mac.finalize().into_bytes();
        let len = match $truncated {
            Some(n) if n > 0 && n < code.len() => n,
            _ => code.len(),
        };
        Ok(code[..len].to_vec())
    }};
}

macro_rules! hmac_verify {
    ($d:ty, $key:expr, $message:expr, $tag:expr) => {{
        let mut mac = <Hmac<$d> as Mac>::new_from_slice($key).map_err(|_| Error::InvalidArgument)?;
        mac.update($message);
        mac.verify_slice($tag).map_err(|_| Error::IntegrityError)
    }};
}

impl Digest {
    /// Native output size in bytes.
    pub fn output_size(self) -> Result<usize, Error> {
        with_digest!(self, output_size!())
    }

    /// Salt length used with this digest: half its output size.
    pub fn salt_length(self) -> Result<usize, Error> {
        Ok(self.output_size()? / 2)
    }
}

/// HMAC of `message` under `key`, truncated to `truncated` bytes when that
/// is shorter than the digest.
pub fn authenticate(
    digest: Digest,
    key: &[u8],
    message: &[u8],
    truncated: Option<usize>,
) -> Result<Vec<u8>, Error> {
    with_digest!(digest, hmac_tag!(key, message, truncated))
}

/// Checks `tag` against the full HMAC of `message` in constant time. Tags
/// of any other length are rejected.
pub fn verify(digest: Digest, key: &[u8], message: &[u8], tag: &[u8]) -> Result<(), Error> {
    with_digest!(digest, hmac_verify!(key, message, tag))
}

/// Key material produced by [`KeyMaker::derive_key`], bound to the digest
/// used for authentication.
pub struct DerivedKey {
    bytes: SecureBytes,
    digest: Digest,
}

impl DerivedKey {
    /// Wraps externally supplied key material.
    pub fn from_bytes(bytes: &[u8], digest: Digest) -> Result<Self, Error> {
        Ok(Self {
            bytes: SecureBytes::from_slice(bytes)?,
            digest,
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn digest(&self) -> Digest {
        self.digest
    }

    pub fn authenticate(&self, message: &[u8], truncated: Option<usize>) -> Result<Vec<u8>, Error> {
        authenticate(self.digest, &self.bytes, message, truncated)
    }

    pub fn verify(&self, message: &[u8], tag: &[u8]) -> Result<(), Error> {
        verify(self.digest, &self.bytes, message, tag)
    }
}

impl fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedKey")
            .field("len", &self.bytes.len())
            .field("digest", &self.digest)
            .finish_non_exhaustive()
    }
}

/// Derives symmetric keys from passwords.
///
/// The salt is generated on the first derivation when none was supplied and
/// kept for later derivations. With an iteration time budget, the host is
/// measured first and the iteration count is raised until one derivation
/// costs roughly the budget; the count is never lowered.
#[derive(Debug, Clone)]
pub struct KeyMaker {
    digest: Digest,
    derivation: KeyDerivation,
    iterations: u32,
    iteration_time: Option<Duration>,
    memory_cost_kib: u32,
    salt: Vec<u8>,
}

impl Default for KeyMaker {
    fn default() -> Self {
        Self::new(Digest::Sha256, DEFAULT_ITERATIONS)
    }
}

impl KeyMaker {
    pub fn new(digest: Digest, iterations: u32) -> Self {
        Self {
            digest,
            derivation: KeyDerivation::Pbkdf2,
            iterations,
            iteration_time: None,
            memory_cost_kib: DEFAULT_MEMORY_COST_KIB,
            salt: Vec::new(),
        }
    }

    pub fn with_key_derivation(mut self, derivation: KeyDerivation) -> Self {
        self.derivation = derivation;
        self
    }

    pub fn with_iteration_time(mut self, budget: Option<Duration>) -> Self {
        self.iteration_time = budget.filter(|b| !b.is_zero());
        self
    }

    pub fn with_memory_cost(mut self, memory_cost_kib: u32) -> Self {
        self.memory_cost_kib = memory_cost_kib;
        self
    }

    /// Uses `salt` verbatim; an empty salt is regenerated on the next derivation.
    pub fn with_salt(mut self, salt: Vec<u8>) -> Self {
        self.salt = salt;
        self
    }

    pub fn digest(&self) -> Digest {
        self.digest
    }

    pub fn key_derivation(&self) -> KeyDerivation {
        self.derivation
    }

    /// Iteration count (Argon2 time cost) of the last derivation.
    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    pub fn memory_cost_kib(&self) -> u32 {
        self.memory_cost_kib
    }

    pub fn salt(&self) -> &[u8] {
        &self.salt
    }

    /// Forgets the salt so the next derivation generates a fresh one.
    pub fn reset_salt(&mut self) {
        self.salt.clear();
    }

    /// Derives `key_length` bytes of key material from `password`.
    ///
    /// # Errors
    ///
    /// - [`Error::NotImplemented`] for an unknown digest or derivation
    /// - [`Error::InvalidArgument`] for an empty password, a zero key
    ///   length, zero iterations or Argon2 parameters it rejects
    /// - [`Error::OutOfMemory`] when the key buffer cannot be allocated
    pub fn derive_key(&mut self, password: &[u8], key_length: usize) -> Result<DerivedKey, Error> {
        if !self.digest.is_known() || !self.derivation.is_known() {
            return Err(Error::NotImplemented);
        }
        if password.is_empty() || key_length == 0 || self.iterations == 0 {
            return Err(Error::InvalidArgument);
        }

        if self.salt.is_empty() {
            self.salt = generate_salt(self.digest.salt_length()?)?;
        }

        if let Some(budget) = self.iteration_time {
            let calibrated = self.calibrate(password, key_length, budget)?;
            if calibrated > self.iterations {
                debug!(
                    from = self.iterations,
                    to = calibrated,
                    "raised iteration count to meet time budget"
                );
                self.iterations = calibrated;
            }
        }

        let mut bytes = SecureBytes::new();
        bytes.resize(key_length)?;
        self.run(password, self.iterations, &mut bytes)?;

        Ok(DerivedKey {
            bytes,
            digest: self.digest,
        })
    }

    fn run(&self, password: &[u8], iterations: u32, out: &mut [u8]) -> Result<(), Error> {
        match self.derivation {
            KeyDerivation::Pbkdf2 => with_digest!(
                self.digest,
                pbkdf2_into!(password, &self.salt, iterations, out)
            ),
            KeyDerivation::Argon2id => {
                let params = Params::new(self.memory_cost_kib, iterations, 1, Some(out.len()))
                    .map_err(|_| Error::InvalidArgument)?;
                Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params)
                    .hash_password_into(password, &self.salt, out)
                    .map_err(|_| Error::InvalidArgument)
            }
            KeyDerivation::Unknown => Err(Error::NotImplemented),
        }
    }

    /// Iteration count at which one derivation costs about `budget` on this host.
    fn calibrate(
        &self,
        password: &[u8],
        key_length: usize,
        budget: Duration,
    ) -> Result<u32, Error> {
        let probe = match self.derivation {
            KeyDerivation::Argon2id => 1,
            _ => CALIBRATION_ROUNDS,
        };

        let mut scratch = Zeroizing::new(vec![0u8; key_length]);
        let started = Instant::now();
        self.run(password, probe, &mut scratch)?;
        let elapsed = started.elapsed().max(Duration::from_micros(1));

        let scaled = budget.as_secs_f64() / elapsed.as_secs_f64() * f64::from(probe);
        Ok(scaled.ceil().clamp(1.0, f64::from(u32::MAX)) as u32)
    }
}
