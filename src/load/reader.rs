//! Drives an [`XmlHandler`] from raw XML text using quick-xml.

use std::borrow::Cow;
use std::path::Path;

use encoding_rs::{Encoding, REPLACEMENT, UTF_8, UTF_16BE, UTF_16LE};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use url::Url;

use super::error::LoadError;
use super::events::{DocumentProlog, XmlAttribute, XmlEvent};
use super::handler::{LoadOutcome, XmlHandler};
use super::options::LoadOptions;
use crate::base::{LineCol, LineIndex, TextSize};
use crate::graph::Resource;
use crate::meta::{MetadataLoader, Metamodel};

/// Loads XML documents into [`Resource`]s. One loader can load many
/// documents in sequence; each load starts from a clean handler.
pub struct XmlLoader<'m> {
    handler: XmlHandler<'m>,
}

impl<'m> XmlLoader<'m> {
    pub fn new(meta: &'m mut Metamodel, options: LoadOptions) -> Self {
        Self {
            handler: XmlHandler::new(meta, options),
        }
    }

    pub fn with_metadata_loader(self, loader: impl MetadataLoader + 'm) -> Self {
        Self {
            handler: self.handler.with_metadata_loader(loader),
        }
    }

    pub fn handler(&self) -> &XmlHandler<'m> {
        &self.handler
    }

    /// Load a document. `uri` is the document's own location; relative
    /// references resolve against it.
    pub fn load_str(&mut self, text: &str, uri: Option<Url>) -> Result<LoadOutcome, LoadError> {
        self.load_text(text, uri, None)
    }

    /// Load a document from raw bytes. The encoding comes from a byte order
    /// mark, else from the XML declaration, else UTF-8.
    pub fn load_bytes(&mut self, bytes: &[u8], uri: Option<Url>) -> Result<LoadOutcome, LoadError> {
        let (text, encoding) = decode(bytes)?;
        tracing::trace!(encoding = encoding.name(), "decoded document");
        self.load_text(&text, uri, Some(encoding.name()))
    }

    fn load_text(&mut self, text: &str, uri: Option<Url>, encoding: Option<&str>) -> Result<LoadOutcome, LoadError> {
        let resource = match uri {
            Some(uri) => Resource::with_uri(uri),
            None => Resource::new(),
        };
        let system_id = resource.uri().map(|uri| uri.as_str().to_string());
        self.handler.prepare(resource);
        // A declaration, if any, overrides the detected name.
        if let Some(encoding) = encoding {
            self.handler.apply_document_info(&DocumentProlog {
                encoding: Some(encoding.to_string()),
                ..DocumentProlog::default()
            });
        }

        match drive(&mut self.handler, text, system_id) {
            Ok(()) => Ok(self.handler.finish()),
            Err(err) => {
                tracing::debug!(%err, "load failed");
                self.handler.abort();
                Err(err)
            }
        }
    }

    pub fn load_file(&mut self, path: impl AsRef<Path>) -> Result<LoadOutcome, LoadError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let absolute = std::path::absolute(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let uri = Url::from_file_path(&absolute).map_err(|()| LoadError::InvalidPath {
            path: path.to_path_buf(),
        })?;
        tracing::debug!(%uri, bytes = bytes.len(), "loading file");
        self.load_bytes(&bytes, Some(uri))
    }
}

/// Load `text` with a fresh handler.
pub fn load_str(meta: &mut Metamodel, text: &str, options: LoadOptions) -> Result<LoadOutcome, LoadError> {
    XmlLoader::new(meta, options).load_str(text, None)
}

pub fn load_bytes(meta: &mut Metamodel, bytes: &[u8], options: LoadOptions) -> Result<LoadOutcome, LoadError> {
    XmlLoader::new(meta, options).load_bytes(bytes, None)
}

pub fn load_file(meta: &mut Metamodel, path: impl AsRef<Path>, options: LoadOptions) -> Result<LoadOutcome, LoadError> {
    XmlLoader::new(meta, options).load_file(path)
}

// ============================================================================
// EVENT PUMP
// ============================================================================

fn drive(handler: &mut XmlHandler<'_>, text: &str, system_id: Option<String>) -> Result<(), LoadError> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let lines = LineIndex::new(text);
    let mut reader = Reader::from_str(text);

    let mut depth = 0usize;

    handler.handle_event(XmlEvent::StartDocument, LineCol::new(0, 0))?;
    loop {
        let position = lines.line_col(TextSize::from(reader.buffer_position() as u32));
        let event = match reader.read_event() {
            Ok(event) => event,
            Err(source) => {
                return Err(LoadError::Xml {
                    source,
                    position: lines.line_col(TextSize::from(reader.error_position() as u32)),
                });
            }
        };

        match event {
            Event::Start(start) => {
                depth += 1;
                start_element(handler, &start, position)?;
            }
            Event::Empty(start) => {
                start_element(handler, &start, position)?;
                let name = utf8(start.name().into_inner(), position)?;
                handler.handle_event(XmlEvent::EndElement { name }, position)?;
            }
            Event::End(end) => {
                depth = depth.saturating_sub(1);
                let name = utf8(end.name().into_inner(), position)?;
                handler.handle_event(XmlEvent::EndElement { name }, position)?;
            }
            Event::Text(content) => {
                let content = content
                    .unescape()
                    .map_err(|source| LoadError::Xml { source, position })?;
                handler.handle_event(XmlEvent::Characters(&content), position)?;
            }
            Event::CData(content) => {
                let content = utf8(&content, position)?;
                handler.handle_event(XmlEvent::StartCdata, position)?;
                handler.handle_event(XmlEvent::Characters(content), position)?;
                handler.handle_event(XmlEvent::EndCdata, position)?;
            }
            Event::Comment(content) => {
                let content = utf8(&content, position)?;
                handler.handle_event(XmlEvent::Comment(content), position)?;
            }
            Event::Decl(decl) => {
                let version = decl.version().map_err(|source| LoadError::Xml { source, position })?;
                let encoding = decl
                    .encoding()
                    .transpose()
                    .map_err(|source| LoadError::Xml { source: source.into(), position })?;
                let prolog = DocumentProlog {
                    encoding: encoding.map(|e| String::from_utf8_lossy(&e).into_owned()),
                    xml_version: Some(String::from_utf8_lossy(&version).into_owned()),
                    system_id: system_id.clone(),
                };
                handler.apply_document_info(&prolog);
            }
            Event::PI(instruction) => {
                let target = utf8(instruction.target(), position)?;
                let data = utf8(instruction.content(), position)?.trim();
                handler.handle_event(XmlEvent::ProcessingInstruction { target, data }, position)?;
            }
            Event::DocType(doctype) => {
                let doctype = utf8(&doctype, position)?;
                handler.handle_event(XmlEvent::Doctype(doctype), position)?;
            }
            Event::Eof => break,
        }
    }

    let end = lines.line_col(TextSize::of(text));
    if depth != 0 {
        return Err(LoadError::UnexpectedEof {
            position: end,
            open: depth,
        });
    }
    handler.handle_event(XmlEvent::EndDocument, end)
}

/// Emit prefix mappings, then the start tag itself.
fn start_element(handler: &mut XmlHandler<'_>, start: &BytesStart<'_>, position: LineCol) -> Result<(), LoadError> {
    let name = utf8(start.name().into_inner(), position)?;
    let mut attributes = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|err| LoadError::Xml {
            source: err.into(),
            position,
        })?;
        let key = utf8(attr.key.as_ref(), position)?;
        let value = attr
            .unescape_value()
            .map_err(|source| LoadError::Xml { source, position })?;
        attributes.push(XmlAttribute::new(key.to_string(), value.into_owned()));
    }

    for attr in &attributes {
        let prefix = match attr.name.as_ref() {
            "xmlns" => "",
            name => match name.strip_prefix("xmlns:") {
                Some(prefix) => prefix,
                None => continue,
            },
        };
        handler.handle_event(XmlEvent::StartPrefixMapping { prefix, uri: &attr.value }, position)?;
    }
    handler.handle_event(
        XmlEvent::StartElement {
            name,
            attributes: &attributes,
        },
        position,
    )
}

fn utf8(bytes: &[u8], position: LineCol) -> Result<&str, LoadError> {
    std::str::from_utf8(bytes).map_err(|source| LoadError::Utf8 { source, position })
}

// ============================================================================
// DECODING
// ============================================================================

fn decode(bytes: &[u8]) -> Result<(Cow<'_, str>, &'static Encoding), LoadError> {
    let (encoding, body) = match Encoding::for_bom(bytes) {
        Some((encoding, bom)) => (encoding, &bytes[bom..]),
        None => (sniff_encoding(bytes)?, bytes),
    };

    if encoding == UTF_8 {
        return match std::str::from_utf8(body) {
            Ok(text) => Ok((Cow::Borrowed(text), UTF_8)),
            Err(source) => {
                let valid = std::str::from_utf8(&body[..source.valid_up_to()]).unwrap_or_default();
                let position = LineIndex::new(valid).line_col(TextSize::of(valid));
                Err(LoadError::Utf8 { source, position })
            }
        };
    }
    encoding
        .decode_without_bom_handling_and_without_replacement(body)
        .map(|text| (text, encoding))
        .ok_or(LoadError::Decode {
            encoding: encoding.name(),
        })
}

/// Encoding of a document without a byte order mark.
fn sniff_encoding(bytes: &[u8]) -> Result<&'static Encoding, LoadError> {
    match bytes {
        [b'<', 0, _, 0, ..] => return Ok(UTF_16LE),
        [0, b'<', 0, _, ..] => return Ok(UTF_16BE),
        _ => {}
    }
    let Some(label) = declared_encoding(bytes) else {
        return Ok(UTF_8);
    };
    match Encoding::for_label(label) {
        // Declared UTF-16 but readable as ASCII: the declaration is wrong.
        Some(encoding) if encoding == UTF_16LE || encoding == UTF_16BE => Ok(UTF_8),
        Some(encoding) if encoding != REPLACEMENT => Ok(encoding),
        _ => Err(LoadError::UnsupportedEncoding {
            label: String::from_utf8_lossy(label).into_owned(),
        }),
    }
}

/// The `encoding` pseudo-attribute of a leading XML declaration.
fn declared_encoding(bytes: &[u8]) -> Option<&[u8]> {
    let decl = bytes.strip_prefix(b"<?xml")?;
    let end = decl.windows(2).position(|w| w == b"?>")?;
    let decl = &decl[..end];
    let at = decl.windows(8).position(|w| w == b"encoding")?;
    let value = decl[at + 8..].trim_ascii_start().strip_prefix(b"=")?.trim_ascii_start();
    let (&quote, value) = value.split_first()?;
    if quote != b'"' && quote != b'\'' {
        return None;
    }
    let len = value.iter().position(|&b| b == quote)?;
    Some(&value[..len])
}
