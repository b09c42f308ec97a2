//! Schema version 1 containers (read only).
//!
//! Version 1 carries no authentication tag and no compression. A decrypted
//! payload is accepted only when it starts with a known marker.

use tracing::warn;

use super::markup::{self, Element, Field};
use super::{Container, Version, assemble};
use crate::error::Error;

pub const SCHEMA_VERSION: i64 = 1;

const ELEMENTS: &[Element] = &[
    Element::new("/Header/Digest", Field::Digest),
    Element::new("/Header/Salt", Field::Salt),
    Element::new("/Header/IterationCount", Field::IterationCount),
    Element::new("/Header/KeyLength", Field::KeyLength),
    Element::new("/Header/Cipher", Field::Cipher),
    Element::new("/Header/Method", Field::Method),
    Element::new("/Header/InitVector", Field::InitialVector),
    Element::new("/Payload/Data", Field::Data),
    Element::new("/Payload/HexData", Field::HexData),
    Element::new("/Trailer/Length", Field::Length),
];

pub(crate) fn parse(data: &[u8]) -> Result<Container, Error> {
    let mut container = assemble(Version::Legacy, markup::read_fields(data, ELEMENTS)?)?;
    // Recorded lengths in this version were never reliable.
    container.trailer.length = None;
    Ok(container)
}

/// Checks that `plaintext`, after leading whitespace, starts with `marker`
/// (ASCII case-insensitive).
pub(crate) fn check_marker(plaintext: &[u8], marker: &[u8]) -> Result<(), Error> {
    let start = plaintext
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(plaintext.len());
    let head = &plaintext[start..];

    if head.len() >= marker.len() && head[..marker.len()].eq_ignore_ascii_case(marker) {
        Ok(())
    } else {
        warn!("legacy plaintext lacks the expected marker");
        Err(Error::IntegrityError)
    }
}

#[cfg(test)]
mod tests {
    use aes_gcm::AesGcm;
    use aes_gcm::aead::consts::U16;
    use aes_gcm::aead::generic_array::GenericArray;
    use aes_gcm::aead::{Aead, KeyInit};
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;

    use super::*;
    use crate::crypto::{Cipher, CipherAlgorithm, DerivedKey, Digest, KeyMaker, Operation};
    use crate::error::Status;
    use crate::format::{Codec, LEGACY_MARKER};

    const PAGE: &[u8] = b"<!DOCTYPE HTML><html><body><p>kept since 2009</p></body></html>";

    fn legacy_key(password: &[u8]) -> (KeyMaker, DerivedKey) {
        let mut maker = KeyMaker::new(Digest::Sha1, 1_000);
        let key = maker.derive_key(password, 16).unwrap();
        (maker, key)
    }

    /// Lays out a legacy document around an already encrypted payload.
    fn legacy_document(
        maker: &KeyMaker,
        operation: Operation,
        iv: &[u8],
        payload: &[u8],
    ) -> Vec<u8> {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<Cryptic xmlns="cryptic.xsd" schemaVersion="1">
  <Header>
    <Digest>SHA-1</Digest>
    <Salt>{salt}</Salt>
    <IterationCount>1000</IterationCount>
    <KeyLength>16</KeyLength>
    <Cipher>AES</Cipher>
    <Method>{operation}</Method>
    <InitVector>{iv}</InitVector>
  </Header>
  <Payload>
    <Data>{data}</Data>
  </Payload>
  <Trailer>
    <Length>999999</Length>
  </Trailer>
</Cryptic>
"#,
            salt = hex::encode(maker.salt()),
            iv = hex::encode(iv),
            data = STANDARD.encode(payload),
        )
        .into_bytes()
    }

    /// Writes a legacy container the way old releases did.
    fn legacy_container(plaintext: &[u8], password: &[u8], operation: Operation) -> Vec<u8> {
        let (maker, key) = legacy_key(password);
        let sealed = Cipher::new(CipherAlgorithm::Aes, operation)
            .encrypt(plaintext, &key)
            .unwrap();
        legacy_document(&maker, operation, &sealed.iv, &sealed.ciphertext)
    }

    #[test]
    fn reads_legacy_container() {
        let container = legacy_container(PAGE, b"hunter2", Operation::Cbc);

        let mut codec = Codec::default();
        let plaintext = codec.decrypt(&container, b"hunter2").unwrap();
        assert_eq!(plaintext.as_slice(), PAGE);
        assert_eq!(codec.version(), Version::Legacy);

        let header = codec.header().unwrap();
        assert_eq!(header.digest(), Digest::Sha1);
        assert_eq!(header.iterations(), 1_000);
        assert_eq!(codec.trailer().unwrap().length(), None);
    }

    #[test]
    fn wrong_password_is_cryptographic_error() {
        let container = legacy_container(PAGE, b"hunter2", Operation::Cbc);

        let err = Codec::default().decrypt(&container, b"hunter3").unwrap_err();
        assert_eq!(err.status(), Status::CryptographicError);
    }

    #[test]
    fn missing_marker_is_integrity_error() {
        let container = legacy_container(b"just a note", b"hunter2", Operation::Ctr);

        let err = Codec::default().decrypt(&container, b"hunter2").unwrap_err();
        assert_eq!(err.status(), Status::CryptographicError);
        assert_eq!(err.error(), Some(Error::IntegrityError));
    }

    #[test]
    fn marker_is_configurable() {
        let container = legacy_container(b"%PDF-1.4 body", b"hunter2", Operation::Ctr);

        let mut codec = Codec::default().with_legacy_marker(b"%pdf".to_vec());
        let plaintext = codec.decrypt(&container, b"hunter2").unwrap();
        assert_eq!(plaintext.as_slice(), b"%PDF-1.4 body");
    }

    #[test]
    fn hex_payload_is_accepted() {
        let container = String::from_utf8(legacy_container(PAGE, b"pw", Operation::Ofb)).unwrap();
        let start = container.find("<Data>").unwrap() + "<Data>".len();
        let end = container.find("</Data>").unwrap();
        let bytes = STANDARD.decode(&container[start..end]).unwrap();
        let hexed = format!(
            "{}<HexData>{}</HexData>{}",
            &container[..start - "<Data>".len()],
            hex::encode(bytes),
            &container[end + "</Data>".len()..]
        );

        let plaintext = Codec::default().decrypt(hexed.as_bytes(), b"pw").unwrap();
        assert_eq!(plaintext.as_slice(), PAGE);
    }

    #[test]
    fn ecb_container_with_recorded_iv() {
        let (maker, key) = legacy_key(b"hunter2");
        let sealed = Cipher::new(CipherAlgorithm::Aes, Operation::Ecb)
            .encrypt(PAGE, &key)
            .unwrap();
        let container = legacy_document(&maker, Operation::Ecb, &[0x3c; 16], &sealed.ciphertext);

        let plaintext = Codec::default().decrypt(&container, b"hunter2").unwrap();
        assert_eq!(plaintext.as_slice(), PAGE);
    }

    #[test]
    fn gcm_container_with_block_sized_nonce() {
        let (maker, key) = legacy_key(b"hunter2");
        let nonce = [0x42u8; 16];
        let ciphertext = AesGcm::<aes::Aes128, U16>::new_from_slice(key.as_bytes())
            .unwrap()
            .encrypt(GenericArray::from_slice(&nonce), PAGE)
            .unwrap();
        let container = legacy_document(&maker, Operation::Gcm, &nonce, &ciphertext);

        let mut codec = Codec::default();
        let plaintext = codec.decrypt(&container, b"hunter2").unwrap();
        assert_eq!(plaintext.as_slice(), PAGE);
        assert_eq!(codec.header().unwrap().iv().len(), 16);

        let err = codec.decrypt(&container, b"hunter3").unwrap_err();
        assert_eq!(err.status(), Status::CryptographicError);
    }

    #[test]
    fn marker_check_rules() {
        assert!(check_marker(b"  \n<!doctype html><html/>", LEGACY_MARKER).is_ok());
        assert!(check_marker(b"<!DOCTYPE HTML", LEGACY_MARKER).is_ok());
        assert_eq!(check_marker(b"<!DOCTYPE", LEGACY_MARKER), Err(Error::IntegrityError));
        assert_eq!(check_marker(b"", LEGACY_MARKER), Err(Error::IntegrityError));
        assert_eq!(check_marker(b"<html>", LEGACY_MARKER), Err(Error::IntegrityError));
    }
}
