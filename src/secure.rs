//! Zero-on-release buffers for passwords and plaintext.
//!
//! [`SecureBuffer`] owns a single heap allocation. Whenever that allocation
//! is replaced or released, the whole backing capacity is wiped with
//! [`zeroize`], which uses volatile writes so the compiler cannot elide
//! them. Growth never reallocates in place: a new allocation is made, the
//! contents are copied, and the old allocation is wiped before it is freed.

use std::fmt;
use std::io::{self, Read, Write};
use std::ops::{Deref, DerefMut};

use zeroize::{DefaultIsZeroes, Zeroize};

use crate::error::Error;

/// Buffer of secret bytes.
pub type SecureBytes = SecureBuffer<u8>;
/// Buffer of secret characters, for text that is edited before being encoded.
pub type SecureChars = SecureBuffer<char>;

pub struct SecureBuffer<T: DefaultIsZeroes> {
    inner: Vec<T>,
}

impl<T: DefaultIsZeroes> SecureBuffer<T> {
    pub fn new() -> Self {
        Self { inner: Vec::new() }
    }

    /// Allocates an empty buffer able to hold `capacity` elements.
    pub fn with_capacity(capacity: usize) -> Result<Self, Error> {
        let mut buffer = Self::new();
        buffer.reserve(capacity)?;
        Ok(buffer)
    }

    pub fn from_slice(data: &[T]) -> Result<Self, Error> {
        let mut buffer = Self::with_capacity(data.len())?;
        buffer.inner.extend_from_slice(data);
        Ok(buffer)
    }

    /// Takes ownership of an existing allocation; it is wiped on release
    /// like any other.
    pub fn from_vec(inner: Vec<T>) -> Self {
        Self { inner }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.inner
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.inner
    }

    /// Ensures the backing store can hold at least `capacity` elements.
    pub fn reserve(&mut self, capacity: usize) -> Result<(), Error> {
        if capacity <= self.inner.capacity() {
            return Ok(());
        }

        let mut next = Vec::new();
        next.try_reserve_exact(capacity).map_err(|_| Error::OutOfMemory)?;
        next.extend_from_slice(&self.inner);

        // wipes the full old capacity before the allocation is dropped
        self.inner.zeroize();
        self.inner = next;
        Ok(())
    }

    pub fn append(&mut self, data: &[T]) -> Result<(), Error> {
        let needed = self
            .inner
            .len()
            .checked_add(data.len())
            .ok_or(Error::OutOfMemory)?;
        if needed > self.inner.capacity() {
            self.reserve(needed.max(self.inner.capacity().saturating_mul(2)))?;
        }
        self.inner.extend_from_slice(data);
        Ok(())
    }

    pub fn push(&mut self, value: T) -> Result<(), Error> {
        self.append(std::slice::from_ref(&value))
    }

    /// Replaces the contents with `data`.
    pub fn assign(&mut self, data: &[T]) -> Result<(), Error> {
        self.clear();
        self.append(data)
    }

    /// Grows with default (zero) values or shrinks, wiping the dropped tail.
    pub fn resize(&mut self, len: usize) -> Result<(), Error> {
        if len > self.inner.len() {
            self.reserve(len)?;
            self.inner.resize(len, T::default());
        } else {
            self.inner[len..].zeroize();
            self.inner.truncate(len);
        }
        Ok(())
    }

    /// Overwrites every element with `value`, resizing first when `len` is given.
    pub fn fill(&mut self, value: T, len: Option<usize>) -> Result<(), Error> {
        if let Some(len) = len {
            self.resize(len)?;
        }
        self.inner.fill(value);
        Ok(())
    }

    /// Wipes the full backing capacity and sets the length to zero.
    pub fn clear(&mut self) {
        self.inner.zeroize();
    }

    /// Full backing store, including the spare capacity beyond `len`.
    #[cfg(test)]
    fn backing(&self) -> &[T] {
        // SAFETY: every slot up to capacity was written by `zeroize` or by a
        // previous fill, and the slice does not outlive `self`.
        unsafe { std::slice::from_raw_parts(self.inner.as_ptr(), self.inner.capacity()) }
    }
}

impl SecureBuffer<u8> {
    /// Reads `reader` to its end without leaving copies behind in
    /// intermediate allocations.
    pub fn read_from<R: Read>(reader: R) -> io::Result<Self> {
        let mut buffer = Self::new();
        buffer.read_append(reader)?;
        Ok(buffer)
    }

    /// Appends everything `reader` yields, through a scratch chunk that is
    /// wiped before returning.
    pub fn read_append<R: Read>(&mut self, mut reader: R) -> io::Result<()> {
        let mut chunk = [0u8; 8 * 1024];
        let result = loop {
            match reader.read(&mut chunk) {
                Ok(0) => break Ok(()),
                Ok(n) => {
                    if let Err(e) = self.append(&chunk[..n]) {
                        break Err(io::Error::from(e));
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => break Err(e),
            }
        };
        chunk.zeroize();
        result
    }
}

impl From<Error> for io::Error {
    fn from(error: Error) -> Self {
        let kind = match error {
            Error::OutOfMemory => io::ErrorKind::OutOfMemory,
            Error::InvalidFormat | Error::IntegrityError => io::ErrorKind::InvalidData,
            Error::InvalidArgument => io::ErrorKind::InvalidInput,
            Error::NotImplemented => io::ErrorKind::Unsupported,
            Error::UnknownError => io::ErrorKind::Other,
        };
        io::Error::new(kind, error)
    }
}

impl Write for SecureBuffer<u8> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.append(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<T: DefaultIsZeroes> Default for SecureBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: DefaultIsZeroes> Drop for SecureBuffer<T> {
    fn drop(&mut self) {
        self.inner.zeroize();
    }
}

impl<T: DefaultIsZeroes> Deref for SecureBuffer<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.inner
    }
}

impl<T: DefaultIsZeroes> DerefMut for SecureBuffer<T> {
    fn deref_mut(&mut self) -> &mut [T] {
        &mut self.inner
    }
}

impl<T: DefaultIsZeroes> AsRef<[T]> for SecureBuffer<T> {
    fn as_ref(&self) -> &[T] {
        &self.inner
    }
}

impl<T: DefaultIsZeroes + PartialEq> PartialEq for SecureBuffer<T> {
    fn eq(&self, other: &Self) -> bool {
        self.inner == other.inner
    }
}

impl<T: DefaultIsZeroes> fmt::Debug for SecureBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureBuffer")
            .field("len", &self.inner.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clear_wipes_full_capacity() {
        let mut buffer = SecureBytes::with_capacity(64).unwrap();
        buffer.append(b"correct horse battery staple").unwrap();
        buffer.resize(7).unwrap();
        assert_eq!(buffer.as_slice(), b"correct");

        buffer.clear();

        assert!(buffer.is_empty());
        assert!(buffer.capacity() >= 64);
        assert!(buffer.backing().iter().all(|&b| b == 0));
    }

    #[test]
    fn shrinking_wipes_the_dropped_tail() {
        let mut buffer = SecureBytes::from_slice(b"secret-tail").unwrap();
        buffer.resize(6).unwrap();

        assert_eq!(buffer.as_slice(), b"secret");
        assert!(buffer.backing()[6..11].iter().all(|&b| b == 0));
    }

    #[test]
    fn growth_preserves_contents() {
        let mut buffer = SecureBytes::new();
        for chunk in [b"abc".as_slice(), b"defgh", b"", b"ijklmnopqrstuvwxyz"] {
            buffer.append(chunk).unwrap();
        }
        assert_eq!(buffer.as_slice(), b"abcdefghijklmnopqrstuvwxyz");

        buffer.reserve(4096).unwrap();
        assert!(buffer.capacity() >= 4096);
        assert_eq!(buffer.as_slice(), b"abcdefghijklmnopqrstuvwxyz");
    }

    #[test]
    fn assign_replaces_contents() {
        let mut buffer = SecureBytes::from_slice(b"first value").unwrap();
        buffer.assign(b"2nd").unwrap();
        assert_eq!(buffer.as_slice(), b"2nd");
        assert!(buffer.backing()[3..].iter().all(|&b| b == 0));
    }

    #[test]
    fn fill_and_indexed_access() {
        let mut buffer = SecureBytes::new();
        buffer.fill(0xAA, Some(4)).unwrap();
        assert_eq!(buffer.as_slice(), &[0xAA; 4]);

        buffer[1] = 0x01;
        assert_eq!(buffer[1], 0x01);

        buffer.fill(0x00, None).unwrap();
        assert_eq!(buffer.as_slice(), &[0; 4]);
    }

    #[test]
    fn resize_grows_with_zeroes() {
        let mut buffer = SecureBytes::from_slice(b"ab").unwrap();
        buffer.resize(5).unwrap();
        assert_eq!(buffer.as_slice(), b"ab\0\0\0");
    }

    #[test]
    fn chars_are_supported() {
        let mut chars = SecureChars::new();
        for c in "päss".chars() {
            chars.push(c).unwrap();
        }
        assert_eq!(chars.iter().collect::<String>(), "päss");

        chars.clear();
        assert!(chars.backing().iter().all(|&c| c == '\0'));
    }

    #[test]
    fn impossible_reservation_reports_out_of_memory() {
        let mut buffer = SecureBytes::new();
        assert_eq!(buffer.reserve(usize::MAX), Err(Error::OutOfMemory));
    }

    #[test]
    fn read_from_collects_everything() {
        let data = vec![7u8; 20_000];
        let buffer = SecureBytes::read_from(data.as_slice()).unwrap();
        assert_eq!(buffer.as_slice(), data.as_slice());
    }

    #[test]
    fn read_append_keeps_existing_content() {
        let mut buffer = SecureBytes::from_slice(b"head:").unwrap();
        buffer.read_append(&b"tail"[..]).unwrap();
        assert_eq!(buffer.as_slice(), b"head:tail");

        let mut failing = std::io::Cursor::new(vec![1u8; 4]).chain(Broken);
        let err = buffer.read_append(&mut failing).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::BrokenPipe);
    }

    struct Broken;

    impl Read for Broken {
        fn read(&mut self, _: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::ErrorKind::BrokenPipe.into())
        }
    }

    #[test]
    fn write_appends() {
        let mut buffer = SecureBytes::new();
        buffer.write_all(b"hello ").unwrap();
        buffer.write_all(b"world").unwrap();
        assert_eq!(buffer.as_slice(), b"hello world");
    }

    #[test]
    fn debug_does_not_leak_contents() {
        let buffer = SecureBytes::from_slice(b"hunter2").unwrap();
        let shown = format!("{buffer:?}");
        assert!(!shown.contains("hunter2"));
        assert!(!shown.contains("104"));
    }
}
