//! The transformation engine a handler belongs to: output properties,
//! parameters and the registered error listener.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::diagnostic::{Diagnostic, Severity};
use crate::error::{Result, TransformError};
use crate::error_listener::{ConsoleErrorListener, ErrorListener, notify};

/// Output method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMethod {
    #[default]
    Xml,
    Text,
}

impl OutputMethod {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "xml" => Some(OutputMethod::Xml),
            "text" => Some(OutputMethod::Text),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputMethod::Xml => "xml",
            OutputMethod::Text => "text",
        }
    }
}

pub const METHOD: &str = "method";
pub const VERSION: &str = "version";
pub const ENCODING: &str = "encoding";
pub const OMIT_XML_DECLARATION: &str = "omit-xml-declaration";
pub const STANDALONE: &str = "standalone";
pub const INDENT: &str = "indent";
pub const DOCTYPE_SYSTEM: &str = "doctype-system";
pub const DOCTYPE_PUBLIC: &str = "doctype-public";
pub const CDATA_SECTION_ELEMENTS: &str = "cdata-section-elements";
pub const MEDIA_TYPE: &str = "media-type";

/// Serialization settings of a transformation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputProperties {
    pub method: OutputMethod,
    pub version: String,
    pub encoding: String,
    pub omit_xml_declaration: bool,
    pub standalone: Option<bool>,
    pub indent: bool,
    /// Spaces per level when `indent` is on
    pub indent_amount: usize,
    pub doctype_system: Option<String>,
    pub doctype_public: Option<String>,
    /// Qualified names of elements whose text is written as CDATA sections
    pub cdata_section_elements: Vec<String>,
    pub media_type: String,
    /// `{uri}local` properties, stored untouched
    pub extensions: BTreeMap<String, String>,
}

impl Default for OutputProperties {
    fn default() -> Self {
        Self {
            method: OutputMethod::Xml,
            version: "1.0".to_string(),
            encoding: "UTF-8".to_string(),
            omit_xml_declaration: false,
            standalone: None,
            indent: false,
            indent_amount: 2,
            doctype_system: None,
            doctype_public: None,
            cdata_section_elements: Vec::new(),
            media_type: "text/xml".to_string(),
            extensions: BTreeMap::new(),
        }
    }
}

fn parse_yes_no(name: &str, value: &str) -> Result<bool> {
    match value.trim() {
        "yes" => Ok(true),
        "no" => Ok(false),
        other => Err(TransformError::invalid_argument(format!(
            "output property '{}' must be 'yes' or 'no', got '{}'",
            name, other
        ))),
    }
}

fn yes_no(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}

/// `{uri}local` with a non-empty local part
fn is_expanded_name(name: &str) -> bool {
    name.starts_with('{')
        && name
            .find('}')
            .is_some_and(|end| end + 1 < name.len())
}

impl OutputProperties {
    /// Set a property by its standard name
    pub fn set(&mut self, name: &str, value: &str) -> Result<()> {
        match name {
            METHOD => {
                self.method = OutputMethod::parse(value).ok_or_else(|| {
                    TransformError::invalid_argument(format!(
                        "unsupported output method: {}",
                        value
                    ))
                })?;
                if self.method == OutputMethod::Text && self.media_type == "text/xml" {
                    self.media_type = "text/plain".to_string();
                }
            }
            VERSION => self.version = value.to_string(),
            ENCODING => self.encoding = value.to_string(),
            OMIT_XML_DECLARATION => self.omit_xml_declaration = parse_yes_no(name, value)?,
            STANDALONE => self.standalone = Some(parse_yes_no(name, value)?),
            INDENT => self.indent = parse_yes_no(name, value)?,
            DOCTYPE_SYSTEM => self.doctype_system = Some(value.to_string()),
            DOCTYPE_PUBLIC => self.doctype_public = Some(value.to_string()),
            CDATA_SECTION_ELEMENTS => {
                self.cdata_section_elements = value.split_whitespace().map(String::from).collect()
            }
            MEDIA_TYPE => self.media_type = value.to_string(),
            _ if is_expanded_name(name) => {
                self.extensions.insert(name.to_string(), value.to_string());
            }
            _ => {
                return Err(TransformError::invalid_argument(format!(
                    "unknown output property: {}",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Get a property by its standard name. Unknown names are an error; unset
    /// optional ones are `None`.
    pub fn get(&self, name: &str) -> Result<Option<String>> {
        let value = match name {
            METHOD => Some(self.method.as_str().to_string()),
            VERSION => Some(self.version.clone()),
            ENCODING => Some(self.encoding.clone()),
            OMIT_XML_DECLARATION => Some(yes_no(self.omit_xml_declaration).to_string()),
            STANDALONE => self.standalone.map(|s| yes_no(s).to_string()),
            INDENT => Some(yes_no(self.indent).to_string()),
            DOCTYPE_SYSTEM => self.doctype_system.clone(),
            DOCTYPE_PUBLIC => self.doctype_public.clone(),
            CDATA_SECTION_ELEMENTS => {
                if self.cdata_section_elements.is_empty() {
                    None
                } else {
                    Some(self.cdata_section_elements.join(" "))
                }
            }
            MEDIA_TYPE => Some(self.media_type.clone()),
            _ if is_expanded_name(name) => self.extensions.get(name).cloned(),
            _ => {
                return Err(TransformError::invalid_argument(format!(
                    "unknown output property: {}",
                    name
                )));
            }
        };
        Ok(value)
    }

    pub fn is_utf8(&self) -> bool {
        matches!(
            self.encoding.to_ascii_lowercase().as_str(),
            "utf-8" | "utf8"
        )
    }
}

/// Engine state configured through a handler before or during event delivery
pub struct Transformer {
    output: OutputProperties,
    parameters: BTreeMap<String, String>,
    listener: Option<Box<dyn ErrorListener>>,
    default_listener: ConsoleErrorListener,
}

impl Transformer {
    pub fn new() -> Self {
        Self::with_output_properties(OutputProperties::default())
    }

    pub fn with_output_properties(output: OutputProperties) -> Self {
        Self {
            output,
            parameters: BTreeMap::new(),
            listener: None,
            default_listener: ConsoleErrorListener::default(),
        }
    }

    pub fn output_properties(&self) -> &OutputProperties {
        &self.output
    }

    /// Replace all output properties at once
    pub fn set_output_properties(&mut self, output: OutputProperties) {
        self.output = output;
    }

    pub fn set_output_property(&mut self, name: &str, value: &str) -> Result<()> {
        self.output.set(name, value)
    }

    pub fn output_property(&self, name: &str) -> Result<Option<String>> {
        self.output.get(name)
    }

    /// Set a stylesheet parameter. Names are plain (`name`) or expanded (`{uri}local`).
    pub fn set_parameter(&mut self, name: &str, value: impl Into<String>) -> Result<()> {
        if name.is_empty() || (name.starts_with('{') && !is_expanded_name(name)) {
            return Err(TransformError::invalid_argument(format!(
                "invalid parameter name: '{}'",
                name
            )));
        }
        self.parameters.insert(name.to_string(), value.into());
        Ok(())
    }

    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }

    pub fn remove_parameter(&mut self, name: &str) -> Option<String> {
        self.parameters.remove(name)
    }

    pub fn clear_parameters(&mut self) {
        self.parameters.clear();
    }

    pub fn parameters(&self) -> impl Iterator<Item = (&str, &str)> {
        self.parameters.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn set_error_listener(&mut self, listener: impl ErrorListener + 'static) {
        self.listener = Some(Box::new(listener));
    }

    pub fn set_boxed_error_listener(&mut self, listener: Box<dyn ErrorListener>) {
        self.listener = Some(listener);
    }

    /// Remove the registered listener, falling back to the console
    pub fn take_error_listener(&mut self) -> Option<Box<dyn ErrorListener>> {
        self.listener.take()
    }

    pub fn has_error_listener(&self) -> bool {
        self.listener.is_some()
    }

    /// Replace the listener used when none is registered
    pub fn set_default_listener(&mut self, listener: ConsoleErrorListener) {
        self.default_listener = listener;
    }

    /// Route a diagnostic to the registered listener, or the console when none is registered
    pub fn report(&mut self, diagnostic: &Diagnostic) -> Result<()> {
        let severity = diagnostic.severity();
        tracing::debug!(%severity, message = diagnostic.message(), "routing diagnostic");
        match self.listener.as_deref_mut() {
            Some(listener) => notify(listener, severity, diagnostic),
            None => notify(&mut self.default_listener, severity, diagnostic),
        }
    }

    pub fn warning(&mut self, message: impl Into<String>) -> Result<()> {
        self.report(&Diagnostic::new(Severity::Warning, message))
    }

    /// Restore default output properties and drop all parameters. The listener is kept.
    pub fn reset(&mut self) {
        self.output = OutputProperties::default();
        self.parameters.clear();
    }
}

impl Default for Transformer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Transformer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transformer")
            .field("output", &self.output)
            .field("parameters", &self.parameters)
            .field("has_error_listener", &self.listener.is_some())
            .finish()
    }
}
