//! Event receiver contracts: content, lexical and DTD events.

use std::sync::{Arc, Mutex};

use crate::diagnostic::SourceLocation;
use crate::error::Result;

/// One attribute of a start-element event
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Attribute {
    /// Namespace URI, empty when the attribute is not in a namespace
    pub uri: String,
    pub local_name: String,
    /// Qualified name as written in the source (`prefix:local` or `local`)
    pub qname: String,
    pub value: String,
}

impl Attribute {
    /// An attribute in no namespace
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            uri: String::new(),
            local_name: name.clone(),
            qname: name,
            value: value.into(),
        }
    }

    pub fn namespaced(
        uri: impl Into<String>,
        local_name: impl Into<String>,
        qname: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            uri: uri.into(),
            local_name: local_name.into(),
            qname: qname.into(),
            value: value.into(),
        }
    }

    /// True for `xmlns` and `xmlns:*` declarations
    pub fn is_namespace_declaration(&self) -> bool {
        self.qname == "xmlns" || self.qname.starts_with("xmlns:")
    }
}

/// Ordered attribute list of a start-element event
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Attributes(Vec<Attribute>);

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, attribute: Attribute) {
        self.0.push(attribute);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Attribute> {
        self.0.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Attribute> {
        self.0.iter()
    }

    pub fn value_by_qname(&self, qname: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|a| a.qname == qname)
            .map(|a| a.value.as_str())
    }

    pub fn value_by_name(&self, uri: &str, local_name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|a| a.uri == uri && a.local_name == local_name)
            .map(|a| a.value.as_str())
    }
}

impl FromIterator<Attribute> for Attributes {
    fn from_iter<I: IntoIterator<Item = Attribute>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a Attributes {
    type Item = &'a Attribute;
    type IntoIter = std::slice::Iter<'a, Attribute>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Live position of the event source. Clones observe the same position.
#[derive(Debug, Clone, Default)]
pub struct DocumentLocator {
    position: Arc<Mutex<SourceLocation>>,
}

impl DocumentLocator {
    pub fn new(system_id: Option<String>) -> Self {
        Self {
            position: Arc::new(Mutex::new(SourceLocation {
                system_id,
                public_id: None,
                line: Some(1),
                column: Some(1),
            })),
        }
    }

    /// Snapshot of the current position
    pub fn current(&self) -> SourceLocation {
        self.position
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn update(&self, line: u64, column: u64) {
        let mut position = self.position.lock().unwrap_or_else(|e| e.into_inner());
        position.line = Some(line);
        position.column = Some(column);
    }
}

/// Receiver of the logical content of a document.
pub trait ContentHandler {
    /// Receive the locator for the events that follow. Sources are not required to call it.
    fn set_document_locator(&mut self, _locator: DocumentLocator) {}

    fn start_document(&mut self) -> Result<()>;

    fn end_document(&mut self) -> Result<()>;

    fn start_prefix_mapping(&mut self, _prefix: &str, _uri: &str) -> Result<()> {
        Ok(())
    }

    fn end_prefix_mapping(&mut self, _prefix: &str) -> Result<()> {
        Ok(())
    }

    fn start_element(
        &mut self,
        uri: &str,
        local_name: &str,
        qname: &str,
        attributes: &Attributes,
    ) -> Result<()>;

    fn end_element(&mut self, uri: &str, local_name: &str, qname: &str) -> Result<()>;

    fn characters(&mut self, text: &str) -> Result<()>;

    fn ignorable_whitespace(&mut self, text: &str) -> Result<()> {
        self.characters(text)
    }

    fn processing_instruction(&mut self, target: &str, data: &str) -> Result<()>;

    fn skipped_entity(&mut self, _name: &str) -> Result<()> {
        Ok(())
    }
}

/// Receiver of lexical details that do not change the content: comments,
/// CDATA and entity boundaries, the DOCTYPE.
pub trait LexicalHandler {
    fn start_dtd(
        &mut self,
        _name: &str,
        _public_id: Option<&str>,
        _system_id: Option<&str>,
    ) -> Result<()> {
        Ok(())
    }

    fn end_dtd(&mut self) -> Result<()> {
        Ok(())
    }

    fn start_entity(&mut self, _name: &str) -> Result<()> {
        Ok(())
    }

    fn end_entity(&mut self, _name: &str) -> Result<()> {
        Ok(())
    }

    fn start_cdata(&mut self) -> Result<()> {
        Ok(())
    }

    fn end_cdata(&mut self) -> Result<()> {
        Ok(())
    }

    fn comment(&mut self, _text: &str) -> Result<()> {
        Ok(())
    }
}

/// Receiver of notation and unparsed entity declarations.
pub trait DtdHandler {
    fn notation_decl(
        &mut self,
        _name: &str,
        _public_id: Option<&str>,
        _system_id: Option<&str>,
    ) -> Result<()> {
        Ok(())
    }

    fn unparsed_entity_decl(
        &mut self,
        _name: &str,
        _public_id: Option<&str>,
        _system_id: &str,
        _notation_name: &str,
    ) -> Result<()> {
        Ok(())
    }
}

/// Anything that accepts all three kinds of events
pub trait EventSink: ContentHandler + LexicalHandler + DtdHandler + Send {}

impl<T: ContentHandler + LexicalHandler + DtdHandler + Send> EventSink for T {}

macro_rules! forward_boxed {
    ($($ty:ty),*) => {$(
        impl<H: ContentHandler + ?Sized> ContentHandler for $ty {
            fn set_document_locator(&mut self, locator: DocumentLocator) {
                (**self).set_document_locator(locator)
            }
            fn start_document(&mut self) -> Result<()> {
                (**self).start_document()
            }
            fn end_document(&mut self) -> Result<()> {
                (**self).end_document()
            }
            fn start_prefix_mapping(&mut self, prefix: &str, uri: &str) -> Result<()> {
                (**self).start_prefix_mapping(prefix, uri)
            }
            fn end_prefix_mapping(&mut self, prefix: &str) -> Result<()> {
                (**self).end_prefix_mapping(prefix)
            }
            fn start_element(
                &mut self,
                uri: &str,
                local_name: &str,
                qname: &str,
                attributes: &Attributes,
            ) -> Result<()> {
                (**self).start_element(uri, local_name, qname, attributes)
            }
            fn end_element(&mut self, uri: &str, local_name: &str, qname: &str) -> Result<()> {
                (**self).end_element(uri, local_name, qname)
            }
            fn characters(&mut self, text: &str) -> Result<()> {
                (**self).characters(text)
            }
            fn ignorable_whitespace(&mut self, text: &str) -> Result<()> {
                (**self).ignorable_whitespace(text)
            }
            fn processing_instruction(&mut self, target: &str, data: &str) -> Result<()> {
                (**self).processing_instruction(target, data)
            }
            fn skipped_entity(&mut self, name: &str) -> Result<()> {
                (**self).skipped_entity(name)
            }
        }

        impl<H: LexicalHandler + ?Sized> LexicalHandler for $ty {
            fn start_dtd(
                &mut self,
                name: &str,
                public_id: Option<&str>,
                system_id: Option<&str>,
            ) -> Result<()> {
                (**self).start_dtd(name, public_id, system_id)
            }
            fn end_dtd(&mut self) -> Result<()> {
                (**self).end_dtd()
            }
            fn start_entity(&mut self, name: &str) -> Result<()> {
                (**self).start_entity(name)
            }
            fn end_entity(&mut self, name: &str) -> Result<()> {
                (**self).end_entity(name)
            }
            fn start_cdata(&mut self) -> Result<()> {
                (**self).start_cdata()
            }
            fn end_cdata(&mut self) -> Result<()> {
                (**self).end_cdata()
            }
            fn comment(&mut self, text: &str) -> Result<()> {
                (**self).comment(text)
            }
        }

        impl<H: DtdHandler + ?Sized> DtdHandler for $ty {
            fn notation_decl(
                &mut self,
                name: &str,
                public_id: Option<&str>,
                system_id: Option<&str>,
            ) -> Result<()> {
                (**self).notation_decl(name, public_id, system_id)
            }
            fn unparsed_entity_decl(
                &mut self,
                name: &str,
                public_id: Option<&str>,
                system_id: &str,
                notation_name: &str,
            ) -> Result<()> {
                (**self).unparsed_entity_decl(name, public_id, system_id, notation_name)
            }
        }
    )*};
}

forward_boxed!(Box<H>, &mut H);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_lookup() {
        let attributes: Attributes = vec![
            Attribute::new("id", "a1"),
            Attribute::namespaced("http://www.w3.org/1999/xlink", "href", "xlink:href", "#top"),
        ]
        .into_iter()
        .collect();

        assert_eq!(attributes.len(), 2);
        assert_eq!(attributes.value_by_qname("id"), Some("a1"));
        assert_eq!(
            attributes.value_by_name("http://www.w3.org/1999/xlink", "href"),
            Some("#top")
        );
        assert_eq!(attributes.value_by_name("", "href"), None);
        assert_eq!(attributes.get(1).unwrap().local_name, "href");
    }

    #[test]
    fn test_namespace_declaration_detection() {
        assert!(Attribute::new("xmlns", "urn:a").is_namespace_declaration());
        assert!(Attribute::new("xmlns:p", "urn:p").is_namespace_declaration());
        assert!(!Attribute::new("xmlnsfoo", "x").is_namespace_declaration());
    }

    #[test]
    fn test_locator_clones_share_position() {
        let locator = DocumentLocator::new(Some("in.xml".to_string()));
        let observer = locator.clone();

        locator.update(4, 12);
        let position = observer.current();
        assert_eq!(position.line, Some(4));
        assert_eq!(position.column, Some(12));
        assert_eq!(position.system_id.as_deref(), Some("in.xml"));
    }
}
