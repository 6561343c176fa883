#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use sax_transform::{
    Attributes, CollectingErrorListener, Config, ContentHandler, DtdHandler, LexicalHandler,
    Result, TransformerFactory,
};

pub const NOTE_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE note SYSTEM "note.dtd">
<note xmlns="urn:notes" xmlns:x="urn:x" x:id="7">
<to>Tove</to><body><![CDATA[<b>bold</b>]]></body><!--sent--><?render fast?>
</note>
"#;

/// Write `content` to `name` inside `dir`
pub fn write_xml(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
}

/// Factory whose handlers report every diagnostic to the returned collector
pub fn collecting_factory(config: &Config) -> (TransformerFactory, CollectingErrorListener) {
    let collector = CollectingErrorListener::new();
    let shared = collector.clone();
    let mut factory = TransformerFactory::from_config(config);
    factory.set_error_listener_builder(move || Box::new(shared.clone()));
    (factory, collector)
}

/// Event sink that writes one line per event into a shared log
#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    fn push(&self, event: String) {
        self.0.lock().unwrap().push(event);
    }
}

impl ContentHandler for EventLog {
    fn start_document(&mut self) -> Result<()> {
        self.push("start-document".to_string());
        Ok(())
    }

    fn end_document(&mut self) -> Result<()> {
        self.push("end-document".to_string());
        Ok(())
    }

    fn start_prefix_mapping(&mut self, prefix: &str, uri: &str) -> Result<()> {
        self.push(format!("prefix {}={}", prefix, uri));
        Ok(())
    }

    fn end_prefix_mapping(&mut self, prefix: &str) -> Result<()> {
        self.push(format!("end-prefix {}", prefix));
        Ok(())
    }

    fn start_element(
        &mut self,
        uri: &str,
        local_name: &str,
        _qname: &str,
        attributes: &Attributes,
    ) -> Result<()> {
        let attrs: Vec<String> = attributes
            .iter()
            .filter(|a| !a.is_namespace_declaration())
            .map(|a| format!("{{{}}}{}={}", a.uri, a.local_name, a.value))
            .collect();
        self.push(format!("<{{{}}}{} [{}]", uri, local_name, attrs.join(" ")));
        Ok(())
    }

    fn end_element(&mut self, uri: &str, local_name: &str, _qname: &str) -> Result<()> {
        self.push(format!("</{{{}}}{}", uri, local_name));
        Ok(())
    }

    fn characters(&mut self, text: &str) -> Result<()> {
        self.push(format!("text {:?}", text));
        Ok(())
    }

    fn processing_instruction(&mut self, target: &str, data: &str) -> Result<()> {
        self.push(format!("pi {} {}", target, data));
        Ok(())
    }
}

impl LexicalHandler for EventLog {
    fn start_dtd(
        &mut self,
        name: &str,
        public_id: Option<&str>,
        system_id: Option<&str>,
    ) -> Result<()> {
        self.push(format!("dtd {} {:?} {:?}", name, public_id, system_id));
        Ok(())
    }

    fn start_cdata(&mut self) -> Result<()> {
        self.push("start-cdata".to_string());
        Ok(())
    }

    fn end_cdata(&mut self) -> Result<()> {
        self.push("end-cdata".to_string());
        Ok(())
    }

    fn comment(&mut self, text: &str) -> Result<()> {
        self.push(format!("comment {:?}", text));
        Ok(())
    }
}

impl DtdHandler for EventLog {
    fn notation_decl(
        &mut self,
        name: &str,
        _public_id: Option<&str>,
        system_id: Option<&str>,
    ) -> Result<()> {
        self.push(format!("notation {} {:?}", name, system_id));
        Ok(())
    }

    fn unparsed_entity_decl(
        &mut self,
        name: &str,
        _public_id: Option<&str>,
        system_id: &str,
        notation_name: &str,
    ) -> Result<()> {
        self.push(format!("unparsed {} {} {}", name, system_id, notation_name));
        Ok(())
    }
}
