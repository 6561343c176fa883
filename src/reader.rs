//! Pull-parser event source.
//!
//! Parses a document with quick-xml and delivers namespace-aware content,
//! lexical and DTD events to a handler, the way a SAX parser would.

use encoding_rs::{Encoding, UTF_8, UTF_16BE, UTF_16LE};
use quick_xml::NsReader;
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::{PrefixDeclaration, ResolveResult};
use regex::Regex;
use std::borrow::Cow;
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use std::sync::LazyLock;

use crate::config::ParserConfig;
use crate::diagnostic::SourceLocation;
use crate::error::{Result, TransformError};
use crate::sax::{
    Attribute, Attributes, ContentHandler, DocumentLocator, DtdHandler, LexicalHandler,
};

const QUOTED: &str = r#"("[^"]*"|'[^']*')"#;

static DOCTYPE_HEAD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"^\s*([^\s\[>]+)(?:\s+(?:PUBLIC\s+{q}\s+{q}|PUBLIC\s+{q}|SYSTEM\s+{q}))?",
        q = QUOTED
    ))
    .expect("DOCTYPE head pattern is valid")
});

static NOTATION_DECL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"<!NOTATION\s+([^\s>]+)\s+(?:PUBLIC\s+{q}(?:\s+{q})?|SYSTEM\s+{q})\s*>",
        q = QUOTED
    ))
    .expect("NOTATION pattern is valid")
});

static UNPARSED_ENTITY_DECL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"<!ENTITY\s+([^\s%>]+)\s+(?:PUBLIC\s+{q}\s+{q}|SYSTEM\s+{q})\s+NDATA\s+([^\s>]+)\s*>",
        q = QUOTED
    ))
    .expect("unparsed ENTITY pattern is valid")
});

static ENCODING_DECL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^<\?xml\s[^>]*?\bencoding\s*=\s*["']([A-Za-z][A-Za-z0-9._-]*)["']"#)
        .expect("encoding declaration pattern is valid")
});

static INTERNAL_ENTITY_DECL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"<!ENTITY\s+([^\s%>]+)\s+{q}\s*>", q = QUOTED))
        .expect("internal ENTITY pattern is valid")
});

fn unquote(value: &str) -> String {
    value[1..value.len() - 1].to_string()
}

fn predefined_entity(name: &str) -> Option<&'static str> {
    match name {
        "lt" => Some("<"),
        "gt" => Some(">"),
        "amp" => Some("&"),
        "apos" => Some("'"),
        "quot" => Some("\""),
        _ => None,
    }
}

/// Parsed `<!DOCTYPE ...>` content
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DoctypeDecl {
    pub name: String,
    pub public_id: Option<String>,
    pub system_id: Option<String>,
    /// `(name, public_id, system_id)`
    pub notations: Vec<(String, Option<String>, Option<String>)>,
    /// `(name, public_id, system_id, notation)`
    pub unparsed_entities: Vec<(String, Option<String>, String, String)>,
    /// Internal general entities, usable in content
    pub entities: HashMap<String, String>,
}

impl DoctypeDecl {
    /// Parse the text between `<!DOCTYPE` and the closing `>`
    pub fn parse(content: &str) -> Option<Self> {
        let head = DOCTYPE_HEAD.captures(content)?;
        let mut decl = DoctypeDecl {
            name: head[1].to_string(),
            ..Default::default()
        };
        if let (Some(public_id), Some(system_id)) = (head.get(2), head.get(3)) {
            decl.public_id = Some(unquote(public_id.as_str()));
            decl.system_id = Some(unquote(system_id.as_str()));
        } else if let Some(public_id) = head.get(4) {
            decl.public_id = Some(unquote(public_id.as_str()));
        } else if let Some(system_id) = head.get(5) {
            decl.system_id = Some(unquote(system_id.as_str()));
        }

        let subset = match (content.find('['), content.rfind(']')) {
            (Some(start), Some(end)) if start < end => &content[start + 1..end],
            _ => return Some(decl),
        };
        for caps in NOTATION_DECL.captures_iter(subset) {
            let public_id = caps.get(2).map(|m| unquote(m.as_str()));
            let system_id = caps
                .get(3)
                .or_else(|| caps.get(4))
                .map(|m| unquote(m.as_str()));
            decl.notations
                .push((caps[1].to_string(), public_id, system_id));
        }
        for caps in UNPARSED_ENTITY_DECL.captures_iter(subset) {
            let (public_id, system_id) = match (caps.get(2), caps.get(3), caps.get(4)) {
                (Some(public_id), Some(system_id), _) => {
                    (Some(unquote(public_id.as_str())), unquote(system_id.as_str()))
                }
                (_, _, Some(system_id)) => (None, unquote(system_id.as_str())),
                _ => continue,
            };
            decl.unparsed_entities.push((
                caps[1].to_string(),
                public_id,
                system_id,
                caps[5].to_string(),
            ));
        }
        for caps in INTERNAL_ENTITY_DECL.captures_iter(subset) {
            decl.entities
                .entry(caps[1].to_string())
                .or_insert_with(|| unquote(&caps[2]));
        }
        Some(decl)
    }
}

/// Line and column (1-based) reached at a byte offset.
///
/// Advancing only scans the bytes since the previous offset. Columns count
/// characters, not bytes.
#[derive(Debug, Clone, Copy)]
struct Cursor {
    offset: usize,
    line: u64,
    column: u64,
}

impl Cursor {
    fn start() -> Self {
        Self {
            offset: 0,
            line: 1,
            column: 1,
        }
    }

    fn advance(&mut self, source: &[u8], offset: usize) -> (u64, u64) {
        let offset = offset.min(source.len());
        if offset < self.offset {
            *self = Self::start();
        }
        for byte in &source[self.offset..offset] {
            if *byte == b'\n' {
                self.line += 1;
                self.column = 1;
            } else if byte & 0xC0 != 0x80 {
                self.column += 1;
            }
        }
        self.offset = offset;
        (self.line, self.column)
    }
}

fn line_column(source: &str, offset: usize) -> (u64, u64) {
    Cursor::start().advance(source.as_bytes(), offset)
}

fn parse_error(system_id: Option<&str>, line: u64, column: u64, message: String) -> TransformError {
    TransformError::Parse {
        location: SourceLocation::new(system_id.map(String::from), line, column),
        message,
    }
}

/// Decode the raw bytes of a document.
///
/// A byte order mark decides the encoding, then the `encoding` of the XML
/// declaration, then UTF-8. Bytes that do not decode are a parse error at
/// the position where decoding failed.
pub fn decode_source(bytes: &[u8], system_id: Option<&str>) -> Result<String> {
    let (encoding, bom_length) = match Encoding::for_bom(bytes) {
        Some(found) => found,
        None => (declared_encoding(bytes, system_id)?, 0),
    };
    let body = &bytes[bom_length..];
    if let Some(text) = encoding.decode_without_bom_handling_and_without_replacement(body) {
        if encoding != UTF_8 {
            tracing::debug!(encoding = encoding.name(), "decoded document");
        }
        return Ok(text.into_owned());
    }

    let (replaced, _) = encoding.decode_without_bom_handling(body);
    let offset = replaced.find('\u{FFFD}').unwrap_or(replaced.len());
    let (line, column) = line_column(&replaced, offset);
    Err(parse_error(
        system_id,
        line,
        column,
        format!("document is not valid {}", encoding.name()),
    ))
}

fn declared_encoding(bytes: &[u8], system_id: Option<&str>) -> Result<&'static Encoding> {
    // "<?" in UTF-16 without a byte order mark
    let utf16 = match bytes {
        [0x3C, 0x00, 0x3F, 0x00, ..] => Some(UTF_16LE),
        [0x00, 0x3C, 0x00, 0x3F, ..] => Some(UTF_16BE),
        _ => None,
    };
    if let Some(encoding) = utf16 {
        return Ok(encoding);
    }

    let head_length = bytes
        .iter()
        .take(1024)
        .position(|b| *b == b'>')
        .map_or(0, |p| p + 1);
    let head = String::from_utf8_lossy(&bytes[..head_length]);
    let Some(caps) = ENCODING_DECL.captures(&head) else {
        return Ok(UTF_8);
    };
    match Encoding::for_label(caps[1].as_bytes()) {
        // An ASCII-readable declaration cannot be UTF-16
        Some(encoding) if encoding == UTF_16LE || encoding == UTF_16BE => Ok(UTF_8),
        Some(encoding) => Ok(encoding),
        None => Err(parse_error(
            system_id,
            1,
            1,
            format!("unsupported document encoding '{}'", &caps[1]),
        )),
    }
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// Delivers the events of an XML document to a handler
#[derive(Debug, Clone, Default)]
pub struct SaxDriver {
    config: ParserConfig,
    system_id: Option<String>,
}

impl SaxDriver {
    pub fn new(config: ParserConfig) -> Self {
        Self {
            config,
            system_id: None,
        }
    }

    /// System id reported in locations and parse errors
    pub fn with_system_id(mut self, system_id: impl Into<String>) -> Self {
        self.system_id = Some(system_id.into());
        self
    }

    pub fn system_id(&self) -> Option<&str> {
        self.system_id.as_deref()
    }

    /// Parse a file; its `file:` URI becomes the system id unless one was set
    pub fn parse_file<H>(&self, path: &Path, handler: &mut H) -> Result<()>
    where
        H: ContentHandler + LexicalHandler + DtdHandler + ?Sized,
    {
        let bytes = std::fs::read(path)?;
        let mut driver = self.clone();
        if driver.system_id.is_none() {
            driver.system_id = Some(file_system_id(path));
        }
        driver.parse_bytes(&bytes, handler)
    }

    pub fn parse_reader<H>(&self, mut reader: impl Read, handler: &mut H) -> Result<()>
    where
        H: ContentHandler + LexicalHandler + DtdHandler + ?Sized,
    {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        self.parse_bytes(&bytes, handler)
    }

    /// Decode raw bytes with [`decode_source`] and parse the text
    pub fn parse_bytes<H>(&self, bytes: &[u8], handler: &mut H) -> Result<()>
    where
        H: ContentHandler + LexicalHandler + DtdHandler + ?Sized,
    {
        let source = decode_source(bytes, self.system_id.as_deref())?;
        self.parse_str(&source, handler)
    }

    pub fn parse_str<H>(&self, source: &str, handler: &mut H) -> Result<()>
    where
        H: ContentHandler + LexicalHandler + DtdHandler + ?Sized,
    {
        tracing::debug!(system_id = ?self.system_id, bytes = source.len(), "parsing document");
        let mut reader = NsReader::from_str(source);
        reader.config_mut().trim_text(self.config.trim_text);
        reader.config_mut().expand_empty_elements = self.config.expand_empty_elements;

        let locator = DocumentLocator::new(self.system_id.clone());
        handler.set_document_locator(locator.clone());
        handler.start_document()?;

        let mut parse = Parse {
            source,
            system_id: self.system_id.clone(),
            locator,
            cursor: Cursor::start(),
            prefixes: Vec::new(),
            entities: HashMap::new(),
            depth: 0,
        };

        loop {
            let position = reader.buffer_position() as usize;
            parse.locate(position);
            let (uri, event) = match reader.read_resolved_event() {
                Ok((resolved, event)) => (parse.namespace(resolved, position), event),
                Err(e) => {
                    return Err(parse.error(reader.error_position() as usize, e.to_string()));
                }
            };

            match event {
                Event::Start(e) => {
                    let uri = uri?;
                    parse.start_element(&reader, uri, &e, handler)?;
                    parse.depth += 1;
                }
                Event::Empty(e) => {
                    let uri = uri?;
                    let local_name = lossy(e.local_name().as_ref());
                    let qname = lossy(e.name().as_ref());
                    parse.start_element(&reader, uri.clone(), &e, handler)?;
                    parse.end_element(&uri, &local_name, &qname, handler)?;
                }
                Event::End(e) => {
                    let uri = uri?;
                    parse.depth = parse.depth.saturating_sub(1);
                    let local_name = lossy(e.local_name().as_ref());
                    let qname = lossy(e.name().as_ref());
                    parse.end_element(&uri, &local_name, &qname, handler)?;
                }
                Event::Text(e) => {
                    let entities = &parse.entities;
                    let text = e
                        .unescape_with(|name| {
                            predefined_entity(name)
                                .or_else(|| entities.get(name).map(String::as_str))
                        })
                        .map_err(|err| parse.error(position, err.to_string()))?;
                    if parse.depth == 0 && text.trim().is_empty() {
                        continue;
                    }
                    handler.characters(&text)?;
                }
                Event::CData(e) => {
                    handler.start_cdata()?;
                    handler.characters(&String::from_utf8_lossy(&e))?;
                    handler.end_cdata()?;
                }
                Event::Comment(e) => handler.comment(&String::from_utf8_lossy(&e))?,
                Event::PI(e) => {
                    let target = lossy(e.target());
                    let content = String::from_utf8_lossy(e.content());
                    handler.processing_instruction(&target, content.trim_start())?;
                }
                Event::DocType(e) => {
                    let content = String::from_utf8_lossy(&e);
                    parse.doctype(&content, position, handler)?;
                }
                Event::Decl(_) => {}
                Event::Eof => break,
            }
        }

        if parse.depth > 0 {
            return Err(parse.error(source.len(), "unexpected end of document".to_string()));
        }
        handler.end_document()?;
        tracing::debug!(system_id = ?self.system_id, "document parsed");
        Ok(())
    }
}

/// The `file:` URI of a path, falling back to its display form
pub fn file_system_id(path: &Path) -> String {
    let absolute = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    url::Url::from_file_path(&absolute)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| path.display().to_string())
}

/// State of one parse
struct Parse<'s> {
    source: &'s str,
    system_id: Option<String>,
    locator: DocumentLocator,
    /// Position of the last located event
    cursor: Cursor,
    /// Prefixes declared on each open element
    prefixes: Vec<Vec<String>>,
    entities: HashMap<String, String>,
    depth: usize,
}

impl Parse<'_> {
    fn locate(&mut self, offset: usize) {
        let (line, column) = self.cursor.advance(self.source.as_bytes(), offset);
        self.locator.update(line, column);
    }

    fn error(&self, offset: usize, message: String) -> TransformError {
        let mut cursor = self.cursor;
        let (line, column) = cursor.advance(self.source.as_bytes(), offset);
        parse_error(self.system_id.as_deref(), line, column, message)
    }

    fn namespace(&self, resolved: ResolveResult<'_>, offset: usize) -> Result<String> {
        match resolved {
            ResolveResult::Bound(ns) => Ok(lossy(ns.as_ref())),
            ResolveResult::Unbound => Ok(String::new()),
            ResolveResult::Unknown(prefix) => Err(self.error(
                offset,
                format!("unbound namespace prefix '{}'", lossy(&prefix)),
            )),
        }
    }

    fn start_element<H>(
        &mut self,
        reader: &NsReader<&[u8]>,
        uri: String,
        start: &BytesStart<'_>,
        handler: &mut H,
    ) -> Result<()>
    where
        H: ContentHandler + LexicalHandler + DtdHandler + ?Sized,
    {
        let offset = reader.buffer_position() as usize;
        let mut declared = Vec::new();
        let mut attributes = Attributes::new();

        for attr in start.attributes() {
            let attr = attr.map_err(|e| self.error(offset, e.to_string()))?;
            let entities = &self.entities;
            let value: Cow<'_, str> = attr
                .unescape_value_with(|name| {
                    predefined_entity(name).or_else(|| entities.get(name).map(String::as_str))
                })
                .map_err(|e| self.error(offset, e.to_string()))?;

            if let Some(binding) = attr.key.as_namespace_binding() {
                let prefix = match binding {
                    PrefixDeclaration::Default => String::new(),
                    PrefixDeclaration::Named(prefix) => lossy(prefix),
                };
                handler.start_prefix_mapping(&prefix, &value)?;
                declared.push(prefix);
                continue;
            }

            let (resolved, local_name) = reader.resolve_attribute(attr.key);
            let attr_uri = self.namespace(resolved, offset)?;
            attributes.push(Attribute::namespaced(
                attr_uri,
                lossy(local_name.as_ref()),
                lossy(attr.key.as_ref()),
                value.into_owned(),
            ));
        }

        self.prefixes.push(declared);
        let local_name = lossy(start.local_name().as_ref());
        let qname = lossy(start.name().as_ref());
        handler.start_element(&uri, &local_name, &qname, &attributes)
    }

    fn end_element<H>(
        &mut self,
        uri: &str,
        local_name: &str,
        qname: &str,
        handler: &mut H,
    ) -> Result<()>
    where
        H: ContentHandler + LexicalHandler + DtdHandler + ?Sized,
    {
        handler.end_element(uri, local_name, qname)?;
        if let Some(declared) = self.prefixes.pop() {
            for prefix in declared.iter().rev() {
                handler.end_prefix_mapping(prefix)?;
            }
        }
        Ok(())
    }

    fn doctype<H>(&mut self, content: &str, offset: usize, handler: &mut H) -> Result<()>
    where
        H: ContentHandler + LexicalHandler + DtdHandler + ?Sized,
    {
        let decl = DoctypeDecl::parse(content)
            .ok_or_else(|| self.error(offset, "malformed DOCTYPE declaration".to_string()))?;
        handler.start_dtd(&decl.name, decl.public_id.as_deref(), decl.system_id.as_deref())?;
        for (name, public_id, system_id) in &decl.notations {
            handler.notation_decl(name, public_id.as_deref(), system_id.as_deref())?;
        }
        for (name, public_id, system_id, notation) in &decl.unparsed_entities {
            handler.unparsed_entity_decl(name, public_id.as_deref(), system_id, notation)?;
        }
        handler.end_dtd()?;
        self.entities = decl.entities;
        Ok(())
    }
}
