//! # sax-transform Library
//!
//! Streaming XML identity transformation built on SAX-style event handlers,
//! with pluggable error listeners that decide whether a diagnostic aborts the run.

pub mod cli;
pub mod config;
pub mod diagnostic;
pub mod error;
pub mod error_listener;
pub mod factory;
pub mod handler;
pub mod reader;
pub mod result;
pub mod sax;
pub mod serializer;
pub mod transformer;

pub use cli::Cli;
pub use config::{
    Config, ConfigError, ConfigManager, DiagnosticsConfig, EnvProvider, OutputConfig,
    ParserConfig, SystemEnvProvider,
};
pub use diagnostic::{Diagnostic, Severity, SourceLocation};
pub use error::{Result, TransformError};
pub use error_listener::{
    CollectingErrorListener, ConsoleErrorListener, ErrorListener, NoopErrorListener,
    ThresholdErrorListener, VerbosityLevel, notify,
};
pub use factory::TransformerFactory;
pub use handler::{IdentityTransformerHandler, TransformerHandler};
pub use reader::{SaxDriver, decode_source, file_system_id};
pub use result::{Document, DocumentType, Element, Node, ResultTarget, SharedBuffer, TreeResult};
pub use sax::{
    Attribute, Attributes, ContentHandler, DocumentLocator, DtdHandler, EventSink, LexicalHandler,
};
pub use transformer::{OutputMethod, OutputProperties, Transformer};
