//! The event-to-result handler contract and the identity handler.
//!
//! A [`TransformerHandler`] receives content, lexical and DTD events and turns
//! them into output at a [`ResultTarget`]. [`IdentityTransformerHandler`] is the
//! transformation without a stylesheet: every event is copied to the result.
//!
//! The result must be set before `start_document`. Output properties are read
//! once, when the document starts.

use std::fs::File;
use std::io::{BufWriter, Write};

use crate::diagnostic::{Diagnostic, Severity, SourceLocation};
use crate::error::{Result, TransformError};
use crate::result::{ResultTarget, system_id_to_path};
use crate::sax::{
    Attributes, ContentHandler, DocumentLocator, DtdHandler, EventSink, LexicalHandler,
};
use crate::serializer::{TextSerializer, TreeBuilder, XmlSerializer};
use crate::transformer::{OutputMethod, OutputProperties, Transformer};

/// Receives content, lexical and DTD events and transforms them to a result.
pub trait TransformerHandler: ContentHandler + LexicalHandler + DtdHandler {
    /// Set the destination of the output. Invalid targets are rejected with
    /// `InvalidArgument` and the previous target is kept.
    fn set_result(&mut self, result: ResultTarget) -> Result<()>;

    /// Set the base URI against which relative references are resolved
    fn set_system_id(&mut self, system_id: &str);

    /// The base URI set with [`set_system_id`](Self::set_system_id)
    fn system_id(&self) -> Option<&str>;

    /// The engine behind this handler, for parameters, output properties and the error listener
    fn transformer(&self) -> &Transformer;

    fn transformer_mut(&mut self) -> &mut Transformer;

    /// Resolve `href` against the base URI. Absolute references are returned as they are.
    fn resolve_uri(&self, href: &str) -> Result<String> {
        if url::Url::parse(href).is_ok() {
            return Ok(href.to_string());
        }
        let Some(base) = self.system_id() else {
            return Ok(href.to_string());
        };
        let base = match url::Url::parse(base) {
            Ok(base) => base,
            Err(_) => url::Url::from_file_path(base).map_err(|_| {
                TransformError::invalid_argument(format!("base URI is not absolute: {}", base))
            })?,
        };
        base.join(href).map(|u| u.to_string()).map_err(|e| {
            TransformError::invalid_argument(format!("cannot resolve '{}': {}", href, e))
        })
    }
}

type BoxedWriter = Box<dyn Write + Send>;

enum Output {
    Xml(XmlSerializer<BoxedWriter>),
    Text(TextSerializer<BoxedWriter>),
    Tree(TreeBuilder),
    Sax(Box<dyn EventSink>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Ready,
    InDocument,
    Finished,
}

#[derive(Debug, Clone)]
struct OpenElement {
    uri: String,
    local_name: String,
    qname: String,
}

/// Copies every event it receives to the result target
pub struct IdentityTransformerHandler {
    transformer: Transformer,
    system_id: Option<String>,
    target: Option<ResultTarget>,
    output: Option<Output>,
    properties: OutputProperties,
    locator: Option<DocumentLocator>,
    state: State,
    open: Vec<OpenElement>,
    root_seen: bool,
    in_cdata: bool,
    cdata_text: String,
    dtd_pending: Option<(String, Option<String>, Option<String>)>,
}

impl IdentityTransformerHandler {
    pub fn new() -> Self {
        Self::with_transformer(Transformer::new())
    }

    pub fn with_transformer(transformer: Transformer) -> Self {
        Self {
            transformer,
            system_id: None,
            target: None,
            output: None,
            properties: OutputProperties::default(),
            locator: None,
            state: State::Ready,
            open: Vec::new(),
            root_seen: false,
            in_cdata: false,
            cdata_text: String::new(),
            dtd_pending: None,
        }
    }

    /// Nesting depth of the element currently being written
    pub fn depth(&self) -> usize {
        self.open.len()
    }

    pub fn is_finished(&self) -> bool {
        self.state == State::Finished
    }

    fn location(&self) -> Option<SourceLocation> {
        match &self.locator {
            Some(locator) => {
                let mut location = locator.current();
                if location.system_id.is_none() {
                    location.system_id = self.system_id.clone();
                }
                Some(location)
            }
            None => self.system_id.as_ref().map(|system_id| SourceLocation {
                system_id: Some(system_id.clone()),
                ..Default::default()
            }),
        }
    }

    fn diagnose(&mut self, severity: Severity, message: String) -> Result<()> {
        let mut diagnostic = Diagnostic::new(severity, message);
        if let Some(location) = self.location() {
            diagnostic = diagnostic.with_location(location);
        }
        self.transformer.report(&diagnostic)
    }

    fn require_document(&self, event: &str) -> Result<()> {
        match self.state {
            State::InDocument => Ok(()),
            State::Ready => Err(TransformError::InvalidState(format!(
                "{} before start_document",
                event
            ))),
            State::Finished => Err(TransformError::InvalidState(format!(
                "{} after end_document",
                event
            ))),
        }
    }

    /// Create the file behind a file or system id target, leaving the target in place
    fn create_file(target: &ResultTarget) -> Result<Option<File>> {
        match target {
            ResultTarget::File(path) => Ok(Some(File::create(path)?)),
            ResultTarget::SystemId(uri) => Ok(Some(File::create(system_id_to_path(uri)?)?)),
            _ => Ok(None),
        }
    }

    fn open_writer(
        target: ResultTarget,
        file: Option<File>,
    ) -> std::result::Result<BoxedWriter, ResultTarget> {
        if let Some(file) = file {
            return Ok(Box::new(BufWriter::new(file)));
        }
        match target {
            ResultTarget::Stream(writer) => Ok(writer),
            ResultTarget::Buffer(buffer) => Ok(Box::new(buffer)),
            other => Err(other),
        }
    }

    fn open_output(&mut self, target: ResultTarget, file: Option<File>) -> Result<Output> {
        let kind = target.kind();
        let output = match Self::open_writer(target, file) {
            Ok(writer) => match self.properties.method {
                OutputMethod::Xml => Output::Xml(XmlSerializer::new(writer, &self.properties)),
                OutputMethod::Text => Output::Text(TextSerializer::new(writer)),
            },
            Err(ResultTarget::Tree(tree)) => Output::Tree(TreeBuilder::new(tree)),
            Err(ResultTarget::Sax(sink)) => Output::Sax(sink),
            Err(other) => {
                return Err(TransformError::InvalidState(format!(
                    "unexpected result target: {}",
                    other.kind()
                )));
            }
        };
        tracing::debug!(
            target_kind = kind,
            method = self.properties.method.as_str(),
            "result opened"
        );
        Ok(output)
    }

    fn flush_cdata(&mut self) -> Result<()> {
        if self.cdata_text.is_empty() {
            return Ok(());
        }
        let text = std::mem::take(&mut self.cdata_text);
        match self.output.as_mut() {
            Some(Output::Xml(xml)) => xml.cdata(&text)?,
            Some(Output::Text(out)) => out.characters(&text)?,
            Some(Output::Tree(tree)) => tree.characters(&text),
            Some(Output::Sax(sink)) => sink.characters(&text)?,
            None => {}
        }
        Ok(())
    }

    fn write_doctype(
        &mut self,
        name: &str,
        public_id: Option<&str>,
        system_id: Option<&str>,
    ) -> Result<()> {
        // doctype-system from the output properties wins over the source DOCTYPE
        let (public_id, system_id) = match &self.properties.doctype_system {
            Some(system) => (self.properties.doctype_public.clone(), Some(system.clone())),
            None => (public_id.map(String::from), system_id.map(String::from)),
        };
        match self.output.as_mut() {
            Some(Output::Xml(xml)) => {
                xml.doctype(name, public_id.as_deref(), system_id.as_deref())?
            }
            Some(Output::Tree(tree)) => {
                tree.doctype(name, public_id.as_deref(), system_id.as_deref())
            }
            _ => {}
        }
        Ok(())
    }

    fn close_element(&mut self, element: &OpenElement) -> Result<()> {
        match self.output.as_mut() {
            Some(Output::Xml(xml)) => xml.end_element(&element.qname)?,
            Some(Output::Tree(tree)) => tree.end_element(),
            Some(Output::Sax(sink)) => {
                sink.end_element(&element.uri, &element.local_name, &element.qname)?
            }
            Some(Output::Text(_)) | None => {}
        }
        Ok(())
    }
}

impl Default for IdentityTransformerHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl TransformerHandler for IdentityTransformerHandler {
    fn set_result(&mut self, result: ResultTarget) -> Result<()> {
        if self.state == State::InDocument {
            return Err(TransformError::InvalidState(
                "result cannot change while a document is in progress".to_string(),
            ));
        }
        result.validate()?;
        tracing::debug!(target_kind = result.kind(), "result set");
        self.target = Some(result);
        self.state = State::Ready;
        Ok(())
    }

    fn set_system_id(&mut self, system_id: &str) {
        self.system_id = Some(system_id.to_string());
    }

    fn system_id(&self) -> Option<&str> {
        self.system_id.as_deref()
    }

    fn transformer(&self) -> &Transformer {
        &self.transformer
    }

    fn transformer_mut(&mut self) -> &mut Transformer {
        &mut self.transformer
    }
}

impl ContentHandler for IdentityTransformerHandler {
    fn set_document_locator(&mut self, locator: DocumentLocator) {
        if let Some(Output::Sax(sink)) = self.output.as_mut() {
            sink.set_document_locator(locator.clone());
        }
        self.locator = Some(locator);
    }

    fn start_document(&mut self) -> Result<()> {
        if self.state != State::Ready {
            return Err(TransformError::InvalidState(
                "start_document called twice; set a new result to reuse the handler".to_string(),
            ));
        }
        let file = Self::create_file(self.target.as_ref().ok_or(TransformError::NoResult)?)?;
        let target = self.target.take().ok_or(TransformError::NoResult)?;
        self.properties = self.transformer.output_properties().clone();
        self.open.clear();
        self.root_seen = false;
        self.in_cdata = false;
        self.cdata_text.clear();
        self.dtd_pending = None;

        let mut output = self.open_output(target, file)?;
        if let Output::Sax(sink) = &mut output
            && let Some(locator) = &self.locator
        {
            sink.set_document_locator(locator.clone());
        }
        self.output = Some(output);
        self.state = State::InDocument;
        tracing::debug!(system_id = ?self.system_id, "document started");

        let mut encoding = self.properties.encoding.clone();
        let serialized = matches!(self.output, Some(Output::Xml(_)) | Some(Output::Text(_)));
        if !self.properties.is_utf8() && serialized {
            self.diagnose(
                Severity::Warning,
                format!("output encoding '{}' is not supported, writing UTF-8", encoding),
            )?;
            encoding = "UTF-8".to_string();
        }

        let omit = self.properties.omit_xml_declaration;
        let version = self.properties.version.clone();
        let standalone = self.properties.standalone;
        match self.output.as_mut() {
            Some(Output::Xml(xml)) if !omit => xml.declaration(&version, &encoding, standalone)?,
            Some(Output::Sax(sink)) => sink.start_document()?,
            _ => {}
        }
        Ok(())
    }

    fn end_document(&mut self) -> Result<()> {
        self.require_document("end_document")?;
        self.flush_cdata()?;
        if !self.open.is_empty() {
            let names: Vec<String> = self.open.iter().map(|e| e.qname.clone()).collect();
            self.diagnose(
                Severity::Fatal,
                format!("document ended with unclosed elements: {}", names.join(", ")),
            )?;
            while let Some(element) = self.open.pop() {
                self.close_element(&element)?;
            }
        }
        match self.output.as_mut() {
            Some(Output::Xml(xml)) => xml.finish()?,
            Some(Output::Text(out)) => out.finish()?,
            Some(Output::Tree(tree)) => tree.finish(),
            Some(Output::Sax(sink)) => sink.end_document()?,
            None => {}
        }
        self.output = None;
        self.state = State::Finished;
        tracing::debug!(system_id = ?self.system_id, "document finished");
        Ok(())
    }

    fn start_prefix_mapping(&mut self, prefix: &str, uri: &str) -> Result<()> {
        self.require_document("start_prefix_mapping")?;
        self.flush_cdata()?;
        match self.output.as_mut() {
            Some(Output::Xml(xml)) => xml.prefix_mapping(prefix, uri),
            Some(Output::Tree(tree)) => tree.prefix_mapping(prefix, uri),
            Some(Output::Sax(sink)) => sink.start_prefix_mapping(prefix, uri)?,
            _ => {}
        }
        Ok(())
    }

    fn end_prefix_mapping(&mut self, prefix: &str) -> Result<()> {
        self.require_document("end_prefix_mapping")?;
        if let Some(Output::Sax(sink)) = self.output.as_mut() {
            sink.end_prefix_mapping(prefix)?;
        }
        Ok(())
    }

    fn start_element(
        &mut self,
        uri: &str,
        local_name: &str,
        qname: &str,
        attributes: &Attributes,
    ) -> Result<()> {
        self.require_document("start_element")?;
        self.flush_cdata()?;
        if self.open.is_empty() {
            if self.root_seen {
                self.diagnose(
                    Severity::Warning,
                    format!("document has more than one root element: <{}>", qname),
                )?;
            } else if let Some(system) = self.properties.doctype_system.clone()
                && self.dtd_pending.is_none()
            {
                let public = self.properties.doctype_public.clone();
                if let Some(Output::Xml(xml)) = self.output.as_mut() {
                    xml.doctype(qname, public.as_deref(), Some(&system))?;
                }
            }
            self.root_seen = true;
        }
        match self.output.as_mut() {
            Some(Output::Xml(xml)) => xml.start_element(qname, attributes)?,
            Some(Output::Tree(tree)) => tree.start_element(uri, local_name, qname, attributes),
            Some(Output::Sax(sink)) => sink.start_element(uri, local_name, qname, attributes)?,
            _ => {}
        }
        self.open.push(OpenElement {
            uri: uri.to_string(),
            local_name: local_name.to_string(),
            qname: qname.to_string(),
        });
        Ok(())
    }

    fn end_element(&mut self, uri: &str, local_name: &str, qname: &str) -> Result<()> {
        self.require_document("end_element")?;
        self.flush_cdata()?;
        let Some(current) = self.open.last().cloned() else {
            return self.diagnose(
                Severity::Fatal,
                format!("end tag </{}> without an open element", qname),
            );
        };
        if current.qname != qname || current.uri != uri || current.local_name != local_name {
            self.diagnose(
                Severity::Fatal,
                format!(
                    "end tag </{}> does not match open element <{}>",
                    qname, current.qname
                ),
            )?;
        }
        self.open.pop();
        self.close_element(&current)
    }

    fn characters(&mut self, text: &str) -> Result<()> {
        self.require_document("characters")?;
        if self.in_cdata {
            self.cdata_text.push_str(text);
            return Ok(());
        }
        if self.open.is_empty() && !text.trim().is_empty() {
            self.diagnose(
                Severity::Error,
                format!("character data outside the root element: {:?}", text.trim()),
            )?;
        }
        match self.output.as_mut() {
            Some(Output::Xml(xml)) => xml.characters(text)?,
            Some(Output::Text(out)) => out.characters(text)?,
            Some(Output::Tree(tree)) => tree.characters(text),
            Some(Output::Sax(sink)) => sink.characters(text)?,
            None => {}
        }
        Ok(())
    }

    fn ignorable_whitespace(&mut self, text: &str) -> Result<()> {
        self.require_document("ignorable_whitespace")?;
        if let Some(Output::Sax(sink)) = self.output.as_mut() {
            return sink.ignorable_whitespace(text);
        }
        self.characters(text)
    }

    fn processing_instruction(&mut self, target: &str, data: &str) -> Result<()> {
        self.require_document("processing_instruction")?;
        self.flush_cdata()?;
        match self.output.as_mut() {
            Some(Output::Xml(xml)) => xml.processing_instruction(target, data)?,
            Some(Output::Tree(tree)) => tree.processing_instruction(target, data),
            Some(Output::Sax(sink)) => sink.processing_instruction(target, data)?,
            _ => {}
        }
        Ok(())
    }

    fn skipped_entity(&mut self, name: &str) -> Result<()> {
        self.require_document("skipped_entity")?;
        self.flush_cdata()?;
        self.diagnose(Severity::Warning, format!("entity '{}' was skipped", name))?;
        match self.output.as_mut() {
            Some(Output::Xml(xml)) => xml.entity_reference(name)?,
            Some(Output::Sax(sink)) => sink.skipped_entity(name)?,
            _ => {}
        }
        Ok(())
    }
}

impl LexicalHandler for IdentityTransformerHandler {
    fn start_dtd(
        &mut self,
        name: &str,
        public_id: Option<&str>,
        system_id: Option<&str>,
    ) -> Result<()> {
        self.require_document("start_dtd")?;
        if let Some(Output::Sax(sink)) = self.output.as_mut() {
            return sink.start_dtd(name, public_id, system_id);
        }
        self.dtd_pending = Some((
            name.to_string(),
            public_id.map(String::from),
            system_id.map(String::from),
        ));
        Ok(())
    }

    fn end_dtd(&mut self) -> Result<()> {
        self.require_document("end_dtd")?;
        if let Some(Output::Sax(sink)) = self.output.as_mut() {
            return sink.end_dtd();
        }
        if let Some((name, public_id, system_id)) = self.dtd_pending.clone() {
            self.write_doctype(&name, public_id.as_deref(), system_id.as_deref())?;
        }
        Ok(())
    }

    fn start_entity(&mut self, name: &str) -> Result<()> {
        self.require_document("start_entity")?;
        if let Some(Output::Sax(sink)) = self.output.as_mut() {
            sink.start_entity(name)?;
        }
        Ok(())
    }

    fn end_entity(&mut self, name: &str) -> Result<()> {
        self.require_document("end_entity")?;
        if let Some(Output::Sax(sink)) = self.output.as_mut() {
            sink.end_entity(name)?;
        }
        Ok(())
    }

    fn start_cdata(&mut self) -> Result<()> {
        self.require_document("start_cdata")?;
        if let Some(Output::Sax(sink)) = self.output.as_mut() {
            return sink.start_cdata();
        }
        self.in_cdata = true;
        Ok(())
    }

    fn end_cdata(&mut self) -> Result<()> {
        self.require_document("end_cdata")?;
        if let Some(Output::Sax(sink)) = self.output.as_mut() {
            return sink.end_cdata();
        }
        self.in_cdata = false;
        self.flush_cdata()
    }

    fn comment(&mut self, text: &str) -> Result<()> {
        self.require_document("comment")?;
        self.flush_cdata()?;
        let mut text = text.to_string();
        if text.contains("--") || text.ends_with('-') {
            self.diagnose(
                Severity::Error,
                "comment contains '--' or ends with '-'; inserting spaces".to_string(),
            )?;
            while text.contains("--") {
                text = text.replace("--", "- -");
            }
            if text.ends_with('-') {
                text.push(' ');
            }
        }
        match self.output.as_mut() {
            Some(Output::Xml(xml)) => xml.comment(&text)?,
            Some(Output::Tree(tree)) => tree.comment(&text),
            Some(Output::Sax(sink)) => sink.comment(&text)?,
            _ => {}
        }
        Ok(())
    }
}

impl DtdHandler for IdentityTransformerHandler {
    fn notation_decl(
        &mut self,
        name: &str,
        public_id: Option<&str>,
        system_id: Option<&str>,
    ) -> Result<()> {
        self.require_document("notation_decl")?;
        tracing::trace!(name, "notation declaration");
        if let Some(Output::Sax(sink)) = self.output.as_mut() {
            sink.notation_decl(name, public_id, system_id)?;
        }
        Ok(())
    }

    fn unparsed_entity_decl(
        &mut self,
        name: &str,
        public_id: Option<&str>,
        system_id: &str,
        notation_name: &str,
    ) -> Result<()> {
        self.require_document("unparsed_entity_decl")?;
        tracing::trace!(name, notation_name, "unparsed entity declaration");
        if let Some(Output::Sax(sink)) = self.output.as_mut() {
            sink.unparsed_entity_decl(name, public_id, system_id, notation_name)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_listener::{CollectingErrorListener, MockErrorListener};
    use crate::result::{Node, SharedBuffer, TreeResult};
    use crate::sax::Attribute;

    fn buffered() -> (IdentityTransformerHandler, SharedBuffer, CollectingErrorListener) {
        let buffer = SharedBuffer::new();
        let collected = CollectingErrorListener::new();
        let mut handler = IdentityTransformerHandler::new();
        handler.transformer_mut().set_error_listener(collected.clone());
        handler
            .set_result(ResultTarget::Buffer(buffer.clone()))
            .unwrap();
        (handler, buffer, collected)
    }

    #[test]
    fn test_system_id_round_trip() {
        let mut handler = IdentityTransformerHandler::new();
        assert_eq!(handler.system_id(), None);
        handler.set_system_id("file:///data/in.xml");
        assert_eq!(handler.system_id(), Some("file:///data/in.xml"));
    }

    #[test]
    fn test_resolve_uri() {
        let mut handler = IdentityTransformerHandler::new();
        assert_eq!(handler.resolve_uri("img/a.png").unwrap(), "img/a.png");

        handler.set_system_id("http://example.com/docs/index.xml");
        assert_eq!(
            handler.resolve_uri("img/a.png").unwrap(),
            "http://example.com/docs/img/a.png"
        );
        assert_eq!(
            handler.resolve_uri("../b.xml").unwrap(),
            "http://example.com/b.xml"
        );
        assert_eq!(
            handler.resolve_uri("urn:isbn:123").unwrap(),
            "urn:isbn:123"
        );

        handler.set_system_id("relative/base.xml");
        assert!(handler.resolve_uri("a.xml").is_err());
    }

    #[test]
    fn test_start_document_without_result() {
        let mut handler = IdentityTransformerHandler::new();
        assert!(matches!(
            handler.start_document(),
            Err(TransformError::NoResult)
        ));
    }

    #[test]
    fn test_invalid_result_keeps_previous() {
        let (mut handler, buffer, _) = buffered();
        let err = handler
            .set_result(ResultTarget::File(std::path::PathBuf::new()))
            .unwrap_err();
        assert!(matches!(err, TransformError::InvalidArgument(_)));

        handler.start_document().unwrap();
        handler.start_element("", "a", "a", &Attributes::new()).unwrap();
        handler.end_element("", "a", "a").unwrap();
        handler.end_document().unwrap();
        assert!(buffer.to_string_lossy().ends_with("<a/>"));
    }

    #[test]
    fn test_failed_open_keeps_result_for_retry() {
        let dir = tempfile::TempDir::new().unwrap();
        let sub = dir.path().join("sub");
        std::fs::create_dir(&sub).unwrap();
        let output = sub.join("out.xml");

        let mut handler = IdentityTransformerHandler::new();
        handler.set_result(ResultTarget::File(output.clone())).unwrap();
        std::fs::remove_dir(&sub).unwrap();

        let err = handler.start_document().unwrap_err();
        assert!(matches!(err, TransformError::Io(_)));
        // The same error again, not NoResult
        assert!(matches!(handler.start_document(), Err(TransformError::Io(_))));

        std::fs::create_dir(&sub).unwrap();
        handler.start_document().unwrap();
        handler.start_element("", "a", "a", &Attributes::new()).unwrap();
        handler.end_element("", "a", "a").unwrap();
        handler.end_document().unwrap();
        assert!(std::fs::read_to_string(&output).unwrap().ends_with("<a/>"));
    }

    #[test]
    fn test_events_before_start_document_rejected() {
        let mut handler = IdentityTransformerHandler::new();
        assert!(matches!(
            handler.characters("x"),
            Err(TransformError::InvalidState(_))
        ));
    }

    #[test]
    fn test_set_result_during_document_rejected() {
        let (mut handler, _, _) = buffered();
        handler.start_document().unwrap();
        assert!(matches!(
            handler.set_result(ResultTarget::Buffer(SharedBuffer::new())),
            Err(TransformError::InvalidState(_))
        ));
    }

    #[test]
    fn test_identity_xml_output() {
        let (mut handler, buffer, collected) = buffered();
        let attributes: Attributes = vec![Attribute::new("id", "1")].into_iter().collect();

        handler.start_document().unwrap();
        handler.start_prefix_mapping("", "urn:notes").unwrap();
        handler
            .start_element("urn:notes", "note", "note", &attributes)
            .unwrap();
        handler.characters("a & b").unwrap();
        handler.start_cdata().unwrap();
        handler.characters("<raw>").unwrap();
        handler.end_cdata().unwrap();
        handler.comment(" c ").unwrap();
        handler.processing_instruction("pi", "data").unwrap();
        handler.end_element("urn:notes", "note", "note").unwrap();
        handler.end_prefix_mapping("").unwrap();
        handler.end_document().unwrap();

        assert_eq!(
            buffer.to_string_lossy(),
            concat!(
                r#"<?xml version="1.0" encoding="UTF-8"?>"#,
                r#"<note xmlns="urn:notes" id="1">a &amp; b<![CDATA[<raw>]]>"#,
                r#"<!-- c --><?pi data?></note>"#
            )
        );
        assert!(collected.is_empty());
        assert!(handler.is_finished());
    }

    #[test]
    fn test_omit_declaration_and_doctype_property() {
        let (mut handler, buffer, _) = buffered();
        let transformer = handler.transformer_mut();
        transformer.set_output_property("omit-xml-declaration", "yes").unwrap();
        transformer.set_output_property("doctype-system", "note.dtd").unwrap();

        handler.start_document().unwrap();
        handler.start_element("", "note", "note", &Attributes::new()).unwrap();
        handler.end_element("", "note", "note").unwrap();
        handler.end_document().unwrap();

        let output = buffer.to_string_lossy();
        assert!(!output.contains("<?xml"));
        assert!(output.contains("note SYSTEM \"note.dtd\""));
        assert!(output.ends_with("<note/>"));
    }

    #[test]
    fn test_source_doctype_copied() {
        let (mut handler, buffer, _) = buffered();
        handler.start_document().unwrap();
        handler
            .start_dtd("html", Some("-//W3C//DTD XHTML 1.0 Strict//EN"), Some("xhtml1-strict.dtd"))
            .unwrap();
        handler.end_dtd().unwrap();
        handler.start_element("", "html", "html", &Attributes::new()).unwrap();
        handler.end_element("", "html", "html").unwrap();
        handler.end_document().unwrap();

        let output = buffer.to_string_lossy();
        assert!(output.contains(
            "html PUBLIC \"-//W3C//DTD XHTML 1.0 Strict//EN\" \"xhtml1-strict.dtd\""
        ));
    }

    #[test]
    fn test_text_method() {
        let (mut handler, buffer, _) = buffered();
        handler.transformer_mut().set_output_property("method", "text").unwrap();

        handler.start_document().unwrap();
        handler.start_element("", "p", "p", &Attributes::new()).unwrap();
        handler.characters("1 < 2").unwrap();
        handler.comment("dropped").unwrap();
        handler.end_element("", "p", "p").unwrap();
        handler.end_document().unwrap();

        assert_eq!(buffer.to_string_lossy(), "1 < 2");
    }

    #[test]
    fn test_tree_result() {
        let tree = TreeResult::new();
        let mut handler = IdentityTransformerHandler::new();
        handler.set_result(ResultTarget::Tree(tree.clone())).unwrap();

        handler.start_document().unwrap();
        handler.start_element("", "list", "list", &Attributes::new()).unwrap();
        for item in ["one", "two"] {
            handler.start_element("", "item", "item", &Attributes::new()).unwrap();
            handler.characters(item).unwrap();
            handler.end_element("", "item", "item").unwrap();
        }
        handler.end_element("", "list", "list").unwrap();
        handler.end_document().unwrap();

        let document = tree.document();
        let root = document.root_element().unwrap();
        assert_eq!(root.qname, "list");
        assert_eq!(root.child_elements().count(), 2);
        assert_eq!(root.text(), "onetwo");
    }

    #[test]
    fn test_mismatched_end_element_is_fatal_and_recovered() {
        let (mut handler, buffer, collected) = buffered();
        handler.start_document().unwrap();
        handler.start_element("", "a", "a", &Attributes::new()).unwrap();
        handler.characters("x").unwrap();
        handler.end_element("", "b", "b").unwrap();
        handler.end_document().unwrap();

        assert_eq!(collected.severities(), vec![Severity::Fatal]);
        assert!(buffer.to_string_lossy().ends_with("<a>x</a>"));
    }

    #[test]
    fn test_unclosed_elements_closed_at_end() {
        let (mut handler, buffer, collected) = buffered();
        handler.start_document().unwrap();
        handler.start_element("", "a", "a", &Attributes::new()).unwrap();
        handler.start_element("", "b", "b", &Attributes::new()).unwrap();
        handler.characters("x").unwrap();
        handler.end_document().unwrap();

        assert_eq!(collected.count(Severity::Fatal), 1);
        assert!(collected.messages()[0].contains("a, b"));
        assert!(buffer.to_string_lossy().ends_with("<a><b>x</b></a>"));
    }

    #[test]
    fn test_recoverable_and_warning_diagnostics() {
        let (mut handler, buffer, collected) = buffered();
        handler.transformer_mut().set_output_property("encoding", "ISO-8859-1").unwrap();

        handler.start_document().unwrap();
        handler.characters("stray").unwrap();
        handler.start_element("", "a", "a", &Attributes::new()).unwrap();
        handler.comment("x--y").unwrap();
        handler.end_element("", "a", "a").unwrap();
        handler.start_element("", "b", "b", &Attributes::new()).unwrap();
        handler.end_element("", "b", "b").unwrap();
        handler.end_document().unwrap();

        assert_eq!(
            collected.severities(),
            vec![
                Severity::Warning,
                Severity::Error,
                Severity::Error,
                Severity::Warning
            ]
        );
        let output = buffer.to_string_lossy();
        assert!(output.contains("encoding=\"UTF-8\""));
        assert!(output.contains("<!--x- -y-->"));
    }

    #[test]
    fn test_listener_abort_stops_handler() {
        let buffer = SharedBuffer::new();
        let mut mock = MockErrorListener::new();
        mock.expect_fatal_error()
            .times(1)
            .returning(|d| Err(TransformError::aborted(d)));
        let mut handler = IdentityTransformerHandler::new();
        handler.transformer_mut().set_error_listener(mock);
        handler.set_result(ResultTarget::Buffer(buffer)).unwrap();

        handler.start_document().unwrap();
        handler.start_element("", "a", "a", &Attributes::new()).unwrap();
        let err = handler.end_element("", "z", "z").unwrap_err();
        assert!(matches!(err, TransformError::Aborted(_)));
        assert_eq!(handler.depth(), 1);
    }

    #[test]
    fn test_handler_reusable_after_new_result() {
        let (mut handler, first, _) = buffered();
        handler.start_document().unwrap();
        handler.start_element("", "a", "a", &Attributes::new()).unwrap();
        handler.end_element("", "a", "a").unwrap();
        handler.end_document().unwrap();
        assert!(matches!(
            handler.start_document(),
            Err(TransformError::InvalidState(_))
        ));

        let second = SharedBuffer::new();
        handler.set_result(ResultTarget::Buffer(second.clone())).unwrap();
        handler.start_document().unwrap();
        handler.start_element("", "b", "b", &Attributes::new()).unwrap();
        handler.end_element("", "b", "b").unwrap();
        handler.end_document().unwrap();

        assert!(first.to_string_lossy().ends_with("<a/>"));
        assert!(second.to_string_lossy().ends_with("<b/>"));
    }

    #[test]
    fn test_tree_result_keeps_comments() {
        let tree = TreeResult::new();
        let mut handler = IdentityTransformerHandler::new();
        handler.set_result(ResultTarget::Tree(tree.clone())).unwrap();
        handler.start_document().unwrap();
        handler.comment("top").unwrap();
        handler.start_element("", "r", "r", &Attributes::new()).unwrap();
        handler.end_element("", "r", "r").unwrap();
        handler.end_document().unwrap();

        let document = tree.document();
        assert_eq!(document.children[0], Node::Comment("top".to_string()));
    }
}
