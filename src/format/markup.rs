//! Markup shared by the container versions.
//!
//! Containers are small XML documents. Readers walk the document once and
//! pick out the text of the elements listed in a per-version path table;
//! matches must appear in table order, except that payload elements may
//! repeat.

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use tracing::warn;

use crate::error::Error;

/// Root element of every container.
pub(crate) const ROOT: &str = "Cryptic";
pub(crate) const NAMESPACE: &str = "cryptic.xsd";
pub(crate) const VERSION_ATTRIBUTE: &str = "schemaVersion";

/// Header, payload and trailer values a version can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Field {
    Digest,
    KeyDerivation,
    MemoryCost,
    Salt,
    IterationCount,
    KeyLength,
    Cipher,
    Method,
    InitialVector,
    Data,
    HexData,
    Length,
    Authentication,
    Compression,
}

impl Field {
    fn is_repeatable(self) -> bool {
        matches!(self, Field::Data | Field::HexData)
    }
}

/// One row of a version's element-path table.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Element {
    pub(crate) path: &'static str,
    pub(crate) field: Field,
}

impl Element {
    pub(crate) const fn new(path: &'static str, field: Field) -> Self {
        Self { path, field }
    }
}

/// What the first element of a document says about it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Root {
    /// Not a container: no markup, or a different root element.
    Foreign,
    /// A container root, with its schema version when it parses as a number.
    Container { version: Option<i64> },
}

/// Inspects the first element of `prefix` without reading further.
pub(crate) fn root(prefix: &[u8]) -> Root {
    let mut reader = Reader::from_reader(prefix);
    reader.trim_text(true);

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() != ROOT.as_bytes() {
                    return Root::Foreign;
                }
                let version = e
                    .try_get_attribute(VERSION_ATTRIBUTE)
                    .ok()
                    .flatten()
                    .and_then(|attr| attr.unescape_value().ok())
                    .and_then(|value| value.trim().parse::<i64>().ok());
                return Root::Container { version };
            }
            Ok(Event::Text(_)) | Ok(Event::CData(_)) | Ok(Event::End(_)) | Ok(Event::Eof) => {
                return Root::Foreign;
            }
            Ok(_) => continue,
            Err(_) => return Root::Foreign,
        }
    }
}

/// Element currently being collected.
struct Capture {
    field: Field,
    depth: usize,
    text: String,
}

/// Collects the text of every element of `table` found in `data`, in
/// document order.
pub(crate) fn read_fields(data: &[u8], table: &[Element]) -> Result<Vec<(Field, String)>, Error> {
    let mut reader = Reader::from_reader(data);
    reader.trim_text(true);

    let mut path: Vec<String> = Vec::new();
    let mut depth = 0usize;
    let mut cursor = 0usize;
    let mut capture: Option<Capture> = None;
    let mut fields = Vec::new();

    loop {
        let event = reader.read_event().map_err(|e| {
            warn!(position = reader.buffer_position(), error = %e, "malformed container markup");
            Error::InvalidFormat
        })?;

        match event {
            Event::Start(e) => {
                if depth > 0 {
                    path.push(String::from_utf8_lossy(e.local_name().as_ref()).into_owned());
                }
                depth += 1;
                if capture.is_none() {
                    if let Some(field) = match_field(table, &mut cursor, &path) {
                        capture = Some(Capture {
                            field,
                            depth,
                            text: String::new(),
                        });
                    }
                }
            }
            Event::Empty(e) => {
                if depth == 0 {
                    continue;
                }
                path.push(String::from_utf8_lossy(e.local_name().as_ref()).into_owned());
                if capture.is_none() {
                    if let Some(field) = match_field(table, &mut cursor, &path) {
                        fields.push((field, String::new()));
                    }
                }
                path.pop();
            }
            Event::Text(t) => {
                if let Some(capture) = capture.as_mut() {
                    let text = t.unescape().map_err(|_| Error::InvalidFormat)?;
                    capture.text.push_str(&text);
                }
            }
            Event::CData(c) => {
                if let Some(capture) = capture.as_mut() {
                    capture.text.push_str(&String::from_utf8_lossy(&c));
                }
            }
            Event::End(_) => {
                if capture.as_ref().is_some_and(|c| c.depth == depth) {
                    if let Some(done) = capture.take() {
                        fields.push((done.field, done.text));
                    }
                }
                depth = depth.saturating_sub(1);
                path.pop();
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(fields)
}

/// Looks `path` up at or after `cursor` and advances the cursor past the
/// match; repeatable rows leave the cursor at the start of their run.
fn match_field(table: &[Element], cursor: &mut usize, path: &[String]) -> Option<Field> {
    if path.is_empty() {
        return None;
    }
    let joined = format!("/{}", path.join("/"));

    let index = (*cursor..table.len()).find(|&i| table[i].path == joined)?;
    let field = table[index].field;

    *cursor = if field.is_repeatable() {
        let mut start = index;
        while start > 0 && table[start - 1].field.is_repeatable() {
            start -= 1;
        }
        start
    } else {
        index + 1
    };
    Some(field)
}

/// Writes an indented container document.
pub(crate) struct MarkupWriter {
    writer: Writer<Vec<u8>>,
}

fn write_failed(e: quick_xml::Error) -> Error {
    warn!(error = %e, "failed to write container markup");
    Error::UnknownError
}

impl MarkupWriter {
    /// Starts a document whose root carries `version`.
    pub(crate) fn new(version: i64) -> Result<Self, Error> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .map_err(write_failed)?;

        let version = version.to_string();
        let root = BytesStart::new(ROOT)
            .with_attributes([("xmlns", NAMESPACE), (VERSION_ATTRIBUTE, version.as_str())]);
        writer.write_event(Event::Start(root)).map_err(write_failed)?;

        Ok(Self { writer })
    }

    pub(crate) fn start(&mut self, name: &str) -> Result<(), Error> {
        self.writer
            .write_event(Event::Start(BytesStart::new(name)))
            .map_err(write_failed)
    }

    pub(crate) fn end(&mut self, name: &str) -> Result<(), Error> {
        self.writer
            .write_event(Event::End(BytesEnd::new(name)))
            .map_err(write_failed)
    }

    /// Writes `<name>text</name>`, escaping the text.
    pub(crate) fn text_element(&mut self, name: &str, text: &str) -> Result<(), Error> {
        self.start(name)?;
        self.writer
            .write_event(Event::Text(BytesText::new(text)))
            .map_err(write_failed)?;
        self.end(name)
    }

    pub(crate) fn finish(mut self) -> Result<Vec<u8>, Error> {
        self.end(ROOT)?;
        let mut out = self.writer.into_inner();
        out.push(b'\n');
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &[Element] = &[
        Element::new("/Header/Digest", Field::Digest),
        Element::new("/Header/Salt", Field::Salt),
        Element::new("/Payload/Data", Field::Data),
        Element::new("/Payload/HexData", Field::HexData),
        Element::new("/Trailer/Length", Field::Length),
    ];

    #[test]
    fn root_reads_schema_version() {
        let doc = br#"<?xml version="1.0"?><Cryptic schemaVersion="2"><Header/></Cryptic>"#;
        assert_eq!(root(doc), Root::Container { version: Some(2) });
    }

    #[test]
    fn root_without_usable_version() {
        assert_eq!(root(b"<Cryptic/>"), Root::Container { version: None });
        assert_eq!(
            root(br#"<Cryptic schemaVersion="two">"#),
            Root::Container { version: None }
        );
    }

    #[test]
    fn root_rejects_other_documents() {
        assert_eq!(root(b"plain text notes"), Root::Foreign);
        assert_eq!(root(b"<!DOCTYPE HTML><html><body/></html>"), Root::Foreign);
        assert_eq!(root(b""), Root::Foreign);
        assert_eq!(root(b"<<<>>>"), Root::Foreign);
    }

    #[test]
    fn root_survives_truncated_prefix() {
        let doc = br#"<Cryptic schemaVersion="1"><Header><Digest>SHA-"#;
        assert_eq!(root(doc), Root::Container { version: Some(1) });
    }

    #[test]
    fn fields_are_read_in_document_order() {
        let doc = br#"<Cryptic schemaVersion="2">
            <Header><Digest>SHA-256</Digest><Salt>00ff</Salt></Header>
            <Payload><Data>QUJD</Data><HexData>4445</HexData><Data>Rg==</Data></Payload>
            <Trailer><Length>6</Length></Trailer>
        </Cryptic>"#;

        let fields = read_fields(doc, TABLE).unwrap();
        let kinds: Vec<Field> = fields.iter().map(|(f, _)| *f).collect();
        assert_eq!(
            kinds,
            vec![
                Field::Digest,
                Field::Salt,
                Field::Data,
                Field::HexData,
                Field::Data,
                Field::Length
            ]
        );
        assert_eq!(fields[0].1, "SHA-256");
        assert_eq!(fields[5].1, "6");
    }

    #[test]
    fn out_of_order_fields_are_ignored() {
        let doc = br#"<Cryptic>
            <Header><Salt>00ff</Salt><Digest>SHA-256</Digest></Header>
        </Cryptic>"#;

        let fields = read_fields(doc, TABLE).unwrap();
        assert_eq!(fields, vec![(Field::Salt, "00ff".to_string())]);
    }

    #[test]
    fn unknown_elements_are_skipped_and_empty_ones_kept() {
        let doc = br#"<Cryptic>
            <Header><Comment>hi</Comment><Digest/><Salt>ab</Salt></Header>
        </Cryptic>"#;

        let fields = read_fields(doc, TABLE).unwrap();
        assert_eq!(
            fields,
            vec![
                (Field::Digest, String::new()),
                (Field::Salt, "ab".to_string())
            ]
        );
    }

    #[test]
    fn malformed_markup_is_invalid_format() {
        let doc = b"<Cryptic><Header><Digest>SHA-256</Salt></Header></Cryptic>";
        assert_eq!(read_fields(doc, TABLE).unwrap_err(), Error::InvalidFormat);
    }

    #[test]
    fn writer_output_reads_back() {
        let mut writer = MarkupWriter::new(2).unwrap();
        writer.start("Header").unwrap();
        writer.text_element("Digest", "SHA-256").unwrap();
        writer.text_element("Salt", "a<b&c").unwrap();
        writer.end("Header").unwrap();
        let doc = writer.finish().unwrap();

        let text = String::from_utf8(doc.clone()).unwrap();
        assert!(text.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(text.contains(r#"<Cryptic xmlns="cryptic.xsd" schemaVersion="2">"#));
        assert!(text.contains("a&lt;b&amp;c"));

        assert_eq!(root(&doc), Root::Container { version: Some(2) });
        let fields = read_fields(&doc, TABLE).unwrap();
        assert_eq!(fields[1], (Field::Salt, "a<b&c".to_string()));
    }
}
