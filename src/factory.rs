use std::path::Path;
use std::sync::Arc;

use crate::config::{Config, DiagnosticsConfig, ParserConfig};
use crate::error::{Result, TransformError};
use crate::error_listener::{ConsoleErrorListener, ErrorListener, ThresholdErrorListener};
use crate::handler::{IdentityTransformerHandler, TransformerHandler};
use crate::reader::{SaxDriver, file_system_id};
use crate::result::ResultTarget;
use crate::transformer::{OutputProperties, Transformer};

type ListenerBuilder = Arc<dyn Fn() -> Box<dyn ErrorListener> + Send + Sync>;

/// Creates handlers and drivers that share one configuration
#[derive(Clone)]
pub struct TransformerFactory {
    output: OutputProperties,
    diagnostics: DiagnosticsConfig,
    parser: ParserConfig,
    listener_builder: Option<ListenerBuilder>,
}

impl TransformerFactory {
    pub fn new() -> Self {
        Self::from_config(&Config::default())
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            output: config.output.to_output_properties(),
            diagnostics: config.diagnostics.clone(),
            parser: config.parser.clone(),
            listener_builder: None,
        }
    }

    pub fn output_properties(&self) -> &OutputProperties {
        &self.output
    }

    /// Change a default output property for every handler created afterwards
    pub fn set_output_property(&mut self, name: &str, value: &str) -> Result<()> {
        self.output.set(name, value)
    }

    pub fn parser_config(&self) -> &ParserConfig {
        &self.parser
    }

    /// Install every new transformer with a listener from `builder` instead of the console
    pub fn set_error_listener_builder<F>(&mut self, builder: F)
    where
        F: Fn() -> Box<dyn ErrorListener> + Send + Sync + 'static,
    {
        self.listener_builder = Some(Arc::new(builder));
    }

    fn console_listener(&self) -> ConsoleErrorListener {
        ConsoleErrorListener::new(self.diagnostics.verbosity())
            .with_timestamps(self.diagnostics.timestamps)
    }

    /// A transformer carrying the default output properties and listener policy
    pub fn new_transformer(&self) -> Transformer {
        let mut transformer = Transformer::with_output_properties(self.output.clone());
        transformer.set_default_listener(self.console_listener());

        let listener = self.listener_builder.as_ref().map(|build| build());
        match (listener, self.diagnostics.fail_on) {
            (Some(listener), Some(threshold)) => {
                transformer.set_error_listener(ThresholdErrorListener::new(listener, threshold));
            }
            (Some(listener), None) => transformer.set_boxed_error_listener(listener),
            (None, Some(threshold)) => {
                transformer.set_error_listener(ThresholdErrorListener::new(
                    self.console_listener(),
                    threshold,
                ));
            }
            // Leave the console default in place; it reports and never aborts
            (None, None) => {}
        }
        transformer
    }

    pub fn new_transformer_handler(&self) -> IdentityTransformerHandler {
        tracing::debug!(
            method = self.output.method.as_str(),
            fail_on = ?self.diagnostics.fail_on,
            "creating transformer handler"
        );
        IdentityTransformerHandler::with_transformer(self.new_transformer())
    }

    pub fn new_driver(&self) -> SaxDriver {
        SaxDriver::new(self.parser.clone())
    }

    /// Parse `path` and copy it to `result` through `handler`
    pub fn transform_file<H>(
        &self,
        path: &Path,
        handler: &mut H,
        result: ResultTarget,
    ) -> Result<()>
    where
        H: TransformerHandler + ?Sized,
    {
        let system_id = file_system_id(path);
        let bytes = std::fs::read(path)?;
        self.transform_bytes(&bytes, &system_id, handler, result)
    }

    /// Decode `bytes` per their byte order mark or XML declaration, then
    /// transform them like [`transform_str`](Self::transform_str)
    pub fn transform_bytes<H>(
        &self,
        bytes: &[u8],
        system_id: &str,
        handler: &mut H,
        result: ResultTarget,
    ) -> Result<()>
    where
        H: TransformerHandler + ?Sized,
    {
        handler.set_system_id(system_id);
        handler.set_result(result)?;

        let driver = self.new_driver().with_system_id(system_id);
        let outcome = driver.parse_bytes(bytes, handler);
        Self::finish(outcome, system_id, handler)
    }

    /// Parse `source` and copy it to `result` through `handler`.
    ///
    /// Parse failures are reported to the handler's transformer as fatal
    /// diagnostics before being returned.
    pub fn transform_str<H>(
        &self,
        source: &str,
        system_id: &str,
        handler: &mut H,
        result: ResultTarget,
    ) -> Result<()>
    where
        H: TransformerHandler + ?Sized,
    {
        handler.set_system_id(system_id);
        handler.set_result(result)?;

        let driver = self.new_driver().with_system_id(system_id);
        let outcome = driver.parse_str(source, handler);
        Self::finish(outcome, system_id, handler)
    }

    fn finish<H>(outcome: Result<()>, system_id: &str, handler: &mut H) -> Result<()>
    where
        H: TransformerHandler + ?Sized,
    {
        match outcome {
            Ok(()) => {
                tracing::debug!(system_id, "transformation finished");
                Ok(())
            }
            Err(err @ TransformError::Parse { .. }) => {
                handler.transformer_mut().report(&err.to_diagnostic())?;
                Err(err)
            }
            Err(err) => Err(err),
        }
    }
}

impl Default for TransformerFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::Severity;
    use crate::error_listener::CollectingErrorListener;
    use crate::result::SharedBuffer;
    use crate::transformer::OutputMethod;

    fn collecting_factory(config: &Config) -> (TransformerFactory, CollectingErrorListener) {
        let collector = CollectingErrorListener::new();
        let mut factory = TransformerFactory::from_config(config);
        let shared = collector.clone();
        factory.set_error_listener_builder(move || Box::new(shared.clone()));
        (factory, collector)
    }

    #[test]
    fn test_handler_inherits_output_config() {
        let mut config = Config::default();
        config.output.method = OutputMethod::Text;
        config.output.indent = true;

        let factory = TransformerFactory::from_config(&config);
        let handler = factory.new_transformer_handler();
        let properties = handler.transformer().output_properties();
        assert_eq!(properties.method, OutputMethod::Text);
        assert!(properties.indent);
    }

    #[test]
    fn test_default_policy_registers_no_listener() {
        let factory = TransformerFactory::new();
        let transformer = factory.new_transformer();
        assert!(!transformer.has_error_listener());
    }

    #[test]
    fn test_fail_on_registers_threshold_listener() {
        let mut config = Config::default();
        config.diagnostics.fail_on = Some(Severity::Error);
        config.diagnostics.quiet = true;

        let mut transformer = TransformerFactory::from_config(&config).new_transformer();
        assert!(transformer.has_error_listener());
        assert!(transformer.warning("just a warning").is_ok());
        let err = transformer
            .report(&crate::diagnostic::Diagnostic::error("bad"))
            .unwrap_err();
        assert!(matches!(err, TransformError::Aborted(_)));
    }

    #[test]
    fn test_set_output_property_applies_to_new_handlers() {
        let mut factory = TransformerFactory::new();
        factory.set_output_property("omit-xml-declaration", "yes").unwrap();
        let handler = factory.new_transformer_handler();
        assert!(handler.transformer().output_properties().omit_xml_declaration);

        assert!(factory.set_output_property("indent", "maybe").is_err());
    }

    #[test]
    fn test_transform_str_into_buffer() {
        let factory = TransformerFactory::new();
        let mut handler = factory.new_transformer_handler();
        let buffer = SharedBuffer::new();

        factory
            .transform_str(
                "<doc><a x=\"1\">hi</a></doc>",
                "memory:doc",
                &mut handler,
                ResultTarget::Buffer(buffer.clone()),
            )
            .unwrap();

        let output = buffer.to_string_lossy();
        assert!(output.contains("<doc><a x=\"1\">hi</a></doc>"));
        assert_eq!(handler.system_id(), Some("memory:doc"));
        assert!(handler.is_finished());
    }

    #[test]
    fn test_parse_error_is_reported_as_fatal() {
        let (factory, collector) = collecting_factory(&Config::default());
        let mut handler = factory.new_transformer_handler();

        let err = factory
            .transform_str(
                "<doc><a></doc>",
                "memory:broken",
                &mut handler,
                ResultTarget::Buffer(SharedBuffer::new()),
            )
            .unwrap_err();

        assert!(matches!(err, TransformError::Parse { .. }));
        assert_eq!(collector.highest_severity(), Some(Severity::Fatal));
    }

    #[test]
    fn test_builder_listener_wrapped_by_threshold() {
        let mut config = Config::default();
        config.diagnostics.fail_on = Some(Severity::Warning);
        let (factory, collector) = collecting_factory(&config);
        let mut handler = factory.new_transformer_handler();

        // A second root element is a warning, which now aborts
        let err = factory
            .transform_str(
                "<a/><b/>",
                "memory:two-roots",
                &mut handler,
                ResultTarget::Buffer(SharedBuffer::new()),
            )
            .unwrap_err();

        assert!(matches!(err, TransformError::Aborted(_)));
        assert_eq!(collector.severities(), vec![Severity::Warning]);
    }

    #[test]
    fn test_transform_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let input = dir.path().join("in.xml");
        let output = dir.path().join("out.xml");
        std::fs::write(&input, "<doc>text</doc>").unwrap();

        let factory = TransformerFactory::new();
        let mut handler = factory.new_transformer_handler();
        factory
            .transform_file(&input, &mut handler, ResultTarget::File(output.clone()))
            .unwrap();

        let written = std::fs::read_to_string(&output).unwrap();
        assert!(written.contains("<doc>text</doc>"));
        assert!(handler.system_id().unwrap().starts_with("file:"));
    }

    #[test]
    fn test_transform_file_decodes_declared_encoding() {
        let dir = tempfile::TempDir::new().unwrap();
        let input = dir.path().join("latin1.xml");
        std::fs::write(
            &input,
            b"<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?><a>caf\xe9</a>".as_slice(),
        )
        .unwrap();

        let (factory, collector) = collecting_factory(&Config::default());
        let mut handler = factory.new_transformer_handler();
        let buffer = SharedBuffer::new();
        factory
            .transform_file(&input, &mut handler, ResultTarget::Buffer(buffer.clone()))
            .unwrap();

        let output = buffer.to_string_lossy();
        assert!(output.starts_with(r#"<?xml version="1.0" encoding="UTF-8"?>"#));
        assert!(output.ends_with("<a>café</a>"));
        assert!(collector.is_empty());
    }

    #[test]
    fn test_undecodable_bytes_reported_as_fatal() {
        let (factory, collector) = collecting_factory(&Config::default());
        let mut handler = factory.new_transformer_handler();

        let err = factory
            .transform_bytes(
                b"<a>\xff\xfe</a>",
                "memory:bytes",
                &mut handler,
                ResultTarget::Buffer(SharedBuffer::new()),
            )
            .unwrap_err();

        match err {
            TransformError::Parse { location, .. } => {
                assert_eq!(location.system_id.as_deref(), Some("memory:bytes"));
                assert_eq!(location.line, Some(1));
            }
            other => panic!("Expected parse error, got {:?}", other),
        }
        assert_eq!(collector.severities(), vec![Severity::Fatal]);
    }
}
