//! Schema version 2 containers, the only version written.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use super::markup::{self, Element, Field, MarkupWriter};
use super::{Container, Version, assemble};
use crate::crypto::KeyDerivation;
use crate::error::Error;

pub const SCHEMA_VERSION: i64 = 2;

/// Binary bytes per `Data` element.
pub const CHUNK_SIZE: usize = 512 * 1024;
/// Column at which encoded chunks wrap.
pub const LINE_WIDTH: usize = 76;

const ELEMENTS: &[Element] = &[
    Element::new("/Header/Digest", Field::Digest),
    Element::new("/Header/KeyDerivation", Field::KeyDerivation),
    Element::new("/Header/MemoryCost", Field::MemoryCost),
    Element::new("/Header/Salt", Field::Salt),
    Element::new("/Header/IterationCount", Field::IterationCount),
    Element::new("/Header/KeyLength", Field::KeyLength),
    Element::new("/Header/Cipher", Field::Cipher),
    Element::new("/Header/Method", Field::Method),
    Element::new("/Header/InitialVector", Field::InitialVector),
    Element::new("/Payload/Data", Field::Data),
    Element::new("/Payload/HexData", Field::HexData),
    Element::new("/Trailer/Length", Field::Length),
    Element::new("/Trailer/Authentication", Field::Authentication),
    Element::new("/Trailer/Compression", Field::Compression),
];

pub(crate) fn parse(data: &[u8]) -> Result<Container, Error> {
    assemble(Version::Current, markup::read_fields(data, ELEMENTS)?)
}

pub(crate) fn serialize(container: &Container) -> Result<Vec<u8>, Error> {
    let header = &container.header;
    let trailer = &container.trailer;
    let mut w = MarkupWriter::new(SCHEMA_VERSION)?;

    w.start("Header")?;
    w.text_element("Digest", header.digest.name())?;
    if header.key_derivation != KeyDerivation::Pbkdf2 {
        w.text_element("KeyDerivation", header.key_derivation.name())?;
        w.text_element("MemoryCost", &header.memory_cost_kib.to_string())?;
    }
    w.text_element("Salt", &hex::encode(&header.salt))?;
    w.text_element("IterationCount", &header.iterations.to_string())?;
    w.text_element("KeyLength", &header.key_length.to_string())?;
    w.text_element("Cipher", header.cipher.name())?;
    w.text_element("Method", header.operation.name())?;
    w.text_element("InitialVector", &hex::encode(&header.iv))?;
    w.end("Header")?;

    w.start("Payload")?;
    if container.payload.is_empty() {
        w.text_element("Data", "")?;
    }
    for chunk in container.payload.chunks(CHUNK_SIZE) {
        w.text_element("Data", &wrap(&STANDARD.encode(chunk)))?;
    }
    w.end("Payload")?;

    w.start("Trailer")?;
    if let Some(length) = trailer.length {
        w.text_element("Length", &length.to_string())?;
    }
    w.text_element("Authentication", &hex::encode(&trailer.authentication))?;
    w.text_element("Compression", trailer.compression.name())?;
    w.end("Trailer")?;

    w.finish()
}

fn wrap(encoded: &str) -> String {
    let mut out = String::with_capacity(encoded.len() + encoded.len() / LINE_WIDTH + 1);
    for (i, c) in encoded.chars().enumerate() {
        if i > 0 && i % LINE_WIDTH == 0 {
            out.push('\n');
        }
        out.push(c);
    }
    out
}
