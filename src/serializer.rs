//! Output sinks the identity handler writes events into.

use quick_xml::Writer;
use quick_xml::escape::partial_escape;
use quick_xml::events::{BytesCData, BytesDecl, BytesEnd, BytesPI, BytesStart, BytesText, Event};
use std::io::Write;

use crate::error::Result;
use crate::result::{Document, DocumentType, Element, Node, TreeResult};
use crate::sax::Attributes;
use crate::transformer::OutputProperties;

/// Quote a DOCTYPE literal, with `'` when the value itself contains `"`
fn quote_literal(value: &str) -> String {
    if value.contains('"') {
        format!("'{}'", value)
    } else {
        format!("\"{}\"", value)
    }
}

/// Format the inside of a `<!DOCTYPE ...>` declaration
pub fn doctype_content(name: &str, public_id: Option<&str>, system_id: Option<&str>) -> String {
    match (public_id, system_id) {
        (Some(public_id), Some(system_id)) => format!(
            "{} PUBLIC {} {}",
            name,
            quote_literal(public_id),
            quote_literal(system_id)
        ),
        (None, Some(system_id)) => format!("{} SYSTEM {}", name, quote_literal(system_id)),
        _ => name.to_string(),
    }
}

/// Split text so that no CDATA section contains `]]>`
pub fn cdata_sections(text: &str) -> Vec<String> {
    let mut sections = Vec::new();
    let mut rest = text;
    while let Some(pos) = rest.find("]]>") {
        // "]]" ends one section, ">" starts the next
        sections.push(rest[..pos + 2].to_string());
        rest = &rest[pos + 2..];
    }
    sections.push(rest.to_string());
    sections
}

/// Writes events as XML markup through a quick-xml writer
pub struct XmlSerializer<W: Write> {
    writer: Writer<W>,
    pending_start: Option<BytesStart<'static>>,
    pending_prefixes: Vec<(String, String)>,
    cdata_elements: Vec<String>,
    open: Vec<String>,
    doctype_written: bool,
}

impl<W: Write> XmlSerializer<W> {
    pub fn new(inner: W, output: &OutputProperties) -> Self {
        let writer = if output.indent {
            Writer::new_with_indent(inner, b' ', output.indent_amount)
        } else {
            Writer::new(inner)
        };
        Self {
            writer,
            pending_start: None,
            pending_prefixes: Vec::new(),
            cdata_elements: output.cdata_section_elements.clone(),
            open: Vec::new(),
            doctype_written: false,
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }

    fn flush_pending(&mut self) -> Result<()> {
        if let Some(start) = self.pending_start.take() {
            self.writer.write_event(Event::Start(start))?;
        }
        Ok(())
    }

    pub fn declaration(
        &mut self,
        version: &str,
        encoding: &str,
        standalone: Option<bool>,
    ) -> Result<()> {
        let standalone = standalone.map(|s| if s { "yes" } else { "no" });
        self.writer
            .write_event(Event::Decl(BytesDecl::new(version, Some(encoding), standalone)))?;
        Ok(())
    }

    pub fn doctype(
        &mut self,
        name: &str,
        public_id: Option<&str>,
        system_id: Option<&str>,
    ) -> Result<()> {
        if self.doctype_written {
            return Ok(());
        }
        self.flush_pending()?;
        let content = doctype_content(name, public_id, system_id);
        self.writer
            .write_event(Event::DocType(BytesText::from_escaped(content)))?;
        self.doctype_written = true;
        Ok(())
    }

    pub fn doctype_written(&self) -> bool {
        self.doctype_written
    }

    pub fn prefix_mapping(&mut self, prefix: &str, uri: &str) {
        self.pending_prefixes.push((prefix.to_string(), uri.to_string()));
    }

    pub fn start_element(&mut self, qname: &str, attributes: &Attributes) -> Result<()> {
        self.flush_pending()?;
        let mut start = BytesStart::new(qname.to_string());
        for (prefix, uri) in self.pending_prefixes.drain(..) {
            let name = if prefix.is_empty() {
                "xmlns".to_string()
            } else {
                format!("xmlns:{}", prefix)
            };
            if attributes.value_by_qname(&name).is_none() {
                start.push_attribute((name.as_str(), uri.as_str()));
            }
        }
        for attribute in attributes {
            start.push_attribute((attribute.qname.as_str(), attribute.value.as_str()));
        }
        self.pending_start = Some(start);
        self.open.push(qname.to_string());
        Ok(())
    }

    pub fn end_element(&mut self, qname: &str) -> Result<()> {
        self.open.pop();
        match self.pending_start.take() {
            Some(start) => self.writer.write_event(Event::Empty(start))?,
            None => self.writer.write_event(Event::End(BytesEnd::new(qname)))?,
        }
        Ok(())
    }

    fn in_cdata_element(&self) -> bool {
        self.open
            .last()
            .is_some_and(|current| self.cdata_elements.iter().any(|name| name == current))
    }

    pub fn characters(&mut self, text: &str) -> Result<()> {
        if text.is_empty() {
            return Ok(());
        }
        if self.in_cdata_element() {
            return self.cdata(text);
        }
        self.flush_pending()?;
        // Only markup characters need escaping in content
        let escaped = partial_escape(text);
        self.writer
            .write_event(Event::Text(BytesText::from_escaped(escaped)))?;
        Ok(())
    }

    pub fn cdata(&mut self, text: &str) -> Result<()> {
        self.flush_pending()?;
        for section in cdata_sections(text) {
            self.writer
                .write_event(Event::CData(BytesCData::new(section)))?;
        }
        Ok(())
    }

    pub fn comment(&mut self, text: &str) -> Result<()> {
        self.flush_pending()?;
        self.writer
            .write_event(Event::Comment(BytesText::from_escaped(text)))?;
        Ok(())
    }

    pub fn processing_instruction(&mut self, target: &str, data: &str) -> Result<()> {
        self.flush_pending()?;
        let content = if data.is_empty() {
            target.to_string()
        } else {
            format!("{} {}", target, data)
        };
        self.writer.write_event(Event::PI(BytesPI::new(content)))?;
        Ok(())
    }

    pub fn entity_reference(&mut self, name: &str) -> Result<()> {
        self.flush_pending()?;
        self.writer
            .write_event(Event::Text(BytesText::from_escaped(format!("&{};", name))))?;
        Ok(())
    }

    pub fn finish(&mut self) -> Result<()> {
        self.flush_pending()?;
        self.writer.get_mut().flush()?;
        Ok(())
    }
}

/// Writes character data only, unescaped
pub struct TextSerializer<W: Write> {
    inner: W,
}

impl<W: Write> TextSerializer<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn characters(&mut self, text: &str) -> Result<()> {
        self.inner.write_all(text.as_bytes())?;
        Ok(())
    }

    pub fn finish(&mut self) -> Result<()> {
        self.inner.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// Builds a [`Document`] and stores it in a [`TreeResult`] when finished
pub struct TreeBuilder {
    target: TreeResult,
    document: Document,
    open: Vec<Element>,
    pending_prefixes: Vec<(String, String)>,
}

impl TreeBuilder {
    pub fn new(target: TreeResult) -> Self {
        Self {
            target,
            document: Document::default(),
            open: Vec::new(),
            pending_prefixes: Vec::new(),
        }
    }

    fn append(&mut self, node: Node) {
        let children = match self.open.last_mut() {
            Some(parent) => &mut parent.children,
            None => &mut self.document.children,
        };
        if let (Node::Text(text), Some(Node::Text(previous))) = (&node, children.last_mut()) {
            previous.push_str(text);
            return;
        }
        children.push(node);
    }

    pub fn doctype(&mut self, name: &str, public_id: Option<&str>, system_id: Option<&str>) {
        self.document.doctype = Some(DocumentType {
            name: name.to_string(),
            public_id: public_id.map(String::from),
            system_id: system_id.map(String::from),
        });
    }

    pub fn prefix_mapping(&mut self, prefix: &str, uri: &str) {
        self.pending_prefixes.push((prefix.to_string(), uri.to_string()));
    }

    pub fn start_element(
        &mut self,
        uri: &str,
        local_name: &str,
        qname: &str,
        attributes: &Attributes,
    ) {
        let mut element = Element {
            uri: uri.to_string(),
            local_name: local_name.to_string(),
            qname: qname.to_string(),
            ..Default::default()
        };
        for (prefix, uri) in self.pending_prefixes.drain(..) {
            let name = if prefix.is_empty() {
                "xmlns".to_string()
            } else {
                format!("xmlns:{}", prefix)
            };
            if attributes.value_by_qname(&name).is_none() {
                element.attributes.push((name, uri));
            }
        }
        element.attributes.extend(
            attributes
                .iter()
                .map(|a| (a.qname.clone(), a.value.clone())),
        );
        self.open.push(element);
    }

    pub fn end_element(&mut self) {
        if let Some(element) = self.open.pop() {
            self.append(Node::Element(element));
        }
    }

    pub fn characters(&mut self, text: &str) {
        if !text.is_empty() {
            self.append(Node::Text(text.to_string()));
        }
    }

    pub fn comment(&mut self, text: &str) {
        self.append(Node::Comment(text.to_string()));
    }

    pub fn processing_instruction(&mut self, target: &str, data: &str) {
        self.append(Node::ProcessingInstruction {
            target: target.to_string(),
            data: data.to_string(),
        });
    }

    /// Close anything still open and publish the document
    pub fn finish(&mut self) {
        while !self.open.is_empty() {
            self.end_element();
        }
        let document = std::mem::take(&mut self.document);
        *self.target.lock() = document;
    }
}
