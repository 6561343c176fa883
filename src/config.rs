use crate::cli::Cli;
use crate::diagnostic::Severity;
use crate::error_listener::VerbosityLevel;
use crate::transformer::{OutputMethod, OutputProperties};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Trait for abstracting environment variable access
pub trait EnvProvider {
    fn get(&self, key: &str) -> Option<String>;
}

/// System environment variable provider for production use
pub struct SystemEnvProvider;

impl EnvProvider for SystemEnvProvider {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParsing(#[from] toml::de::Error),

    #[error("JSON parsing error: {0}")]
    JsonParsing(#[from] serde_json::Error),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Environment variable error: {0}")]
    Environment(String),

    #[error("Unsupported configuration file format: {0}")]
    UnsupportedFormat(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub output: OutputConfig,
    pub diagnostics: DiagnosticsConfig,
    pub parser: ParserConfig,
}

/// Serialization defaults applied to every handler
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OutputConfig {
    pub method: OutputMethod,
    pub encoding: String,
    pub omit_xml_declaration: bool,
    pub standalone: Option<bool>,
    pub indent: bool,
    /// Spaces per nesting level when indenting
    pub indent_amount: usize,
    pub doctype_system: Option<String>,
    pub doctype_public: Option<String>,
    pub cdata_section_elements: Vec<String>,
}

/// How diagnostics are reported and when they abort
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct DiagnosticsConfig {
    /// Abort at or above this severity; never abort when unset
    pub fail_on: Option<Severity>,
    pub verbose: bool,
    pub quiet: bool,
    pub timestamps: bool,
}

/// Event source settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ParserConfig {
    /// Trim whitespace around text events
    pub trim_text: bool,
    /// Report `<a/>` as separate start and end events from the pull parser
    pub expand_empty_elements: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        let defaults = OutputProperties::default();
        Self {
            method: defaults.method,
            encoding: defaults.encoding,
            omit_xml_declaration: defaults.omit_xml_declaration,
            standalone: defaults.standalone,
            indent: defaults.indent,
            indent_amount: defaults.indent_amount,
            doctype_system: None,
            doctype_public: None,
            cdata_section_elements: Vec::new(),
        }
    }
}

impl OutputConfig {
    pub fn to_output_properties(&self) -> OutputProperties {
        let mut properties = OutputProperties {
            method: self.method,
            encoding: self.encoding.clone(),
            omit_xml_declaration: self.omit_xml_declaration,
            standalone: self.standalone,
            indent: self.indent,
            indent_amount: self.indent_amount,
            doctype_system: self.doctype_system.clone(),
            doctype_public: self.doctype_public.clone(),
            cdata_section_elements: self.cdata_section_elements.clone(),
            ..OutputProperties::default()
        };
        if self.method == OutputMethod::Text {
            properties.media_type = "text/plain".to_string();
        }
        properties
    }
}

impl DiagnosticsConfig {
    pub fn verbosity(&self) -> VerbosityLevel {
        if self.quiet {
            VerbosityLevel::Quiet
        } else if self.verbose {
            VerbosityLevel::Verbose
        } else {
            VerbosityLevel::Normal
        }
    }
}

fn parse_env_bool(env: &impl EnvProvider, key: &str) -> Result<Option<bool>> {
    match env.get(key) {
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Environment(format!("Invalid {} value: {}", key, value))),
        None => Ok(None),
    }
}

/// Configuration manager for loading and merging configurations
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration with precedence: file -> environment -> CLI
    pub async fn load_config(cli: &Cli) -> Result<Config> {
        let mut config = Config::default();

        if let Some(config_path) = &cli.config {
            let file_config = Self::load_from_file(config_path).await?;
            config = Self::merge_configs(config, file_config);
        } else if let Some(found_config) = Self::find_config_file().await? {
            config = Self::merge_configs(config, found_config);
        }

        config = Self::apply_environment_overrides(config)?;

        // CLI arguments have the highest precedence
        config = Self::merge_with_cli(config, cli);

        Self::validate_config(&config)?;

        Ok(config)
    }

    /// Load configuration from a file (TOML or JSON)
    pub async fn load_from_file(path: &Path) -> Result<Config> {
        let content = tokio::fs::read_to_string(path).await?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Ok(toml::from_str(&content)?),
            Some("json") => Ok(serde_json::from_str(&content)?),
            Some(ext) => Err(ConfigError::UnsupportedFormat(ext.to_string())),
            None => {
                // Try to parse as TOML first, then JSON
                if let Ok(config) = toml::from_str::<Config>(&content) {
                    Ok(config)
                } else {
                    Ok(serde_json::from_str(&content)?)
                }
            }
        }
    }

    /// Find configuration file in standard locations
    pub async fn find_config_file() -> Result<Option<Config>> {
        let config_names = [
            "sax-transform.toml",
            "sax-transform.json",
            ".sax-transform.toml",
            ".sax-transform.json",
        ];

        for name in &config_names {
            let path = PathBuf::from(name);
            if path.exists() {
                return Ok(Some(Self::load_from_file(&path).await?));
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let app_config_dir = config_dir.join("sax-transform");
            for name in &config_names {
                let path = app_config_dir.join(name);
                if path.exists() {
                    return Ok(Some(Self::load_from_file(&path).await?));
                }
            }
        }

        Ok(None)
    }

    /// Apply environment variable overrides using the system environment
    pub fn apply_environment_overrides(config: Config) -> Result<Config> {
        Self::apply_environment_overrides_with(&SystemEnvProvider, config)
    }

    /// Apply environment variable overrides with a custom environment provider
    pub fn apply_environment_overrides_with(
        env: &impl EnvProvider,
        mut config: Config,
    ) -> Result<Config> {
        if let Some(method) = env.get("SAX_TRANSFORM_METHOD") {
            config.output.method = OutputMethod::parse(&method).ok_or_else(|| {
                ConfigError::Environment(format!("Invalid SAX_TRANSFORM_METHOD value: {}", method))
            })?;
        }

        if let Some(indent) = parse_env_bool(env, "SAX_TRANSFORM_INDENT")? {
            config.output.indent = indent;
        }

        if let Some(encoding) = env.get("SAX_TRANSFORM_ENCODING") {
            config.output.encoding = encoding;
        }

        if let Some(omit) = parse_env_bool(env, "SAX_TRANSFORM_OMIT_XML_DECLARATION")? {
            config.output.omit_xml_declaration = omit;
        }

        if let Some(fail_on) = env.get("SAX_TRANSFORM_FAIL_ON") {
            config.diagnostics.fail_on = match fail_on.trim().to_lowercase().as_str() {
                "never" | "none" => None,
                other => Some(Severity::parse(other).ok_or_else(|| {
                    ConfigError::Environment(format!(
                        "Invalid SAX_TRANSFORM_FAIL_ON value: {}",
                        fail_on
                    ))
                })?),
            };
        }

        if let Some(verbose) = parse_env_bool(env, "SAX_TRANSFORM_VERBOSE")? {
            config.diagnostics.verbose = verbose;
        }

        if let Some(quiet) = parse_env_bool(env, "SAX_TRANSFORM_QUIET")? {
            config.diagnostics.quiet = quiet;
        }

        if let Some(trim_text) = parse_env_bool(env, "SAX_TRANSFORM_TRIM_TEXT")? {
            config.parser.trim_text = trim_text;
        }

        Ok(config)
    }

    /// Merge CLI arguments with configuration (CLI takes precedence)
    pub fn merge_with_cli(mut config: Config, cli: &Cli) -> Config {
        if let Some(method) = cli.method {
            config.output.method = method.into();
        }
        if cli.indent {
            config.output.indent = true;
        }
        if let Some(amount) = cli.indent_amount {
            config.output.indent_amount = amount;
        }
        if cli.omit_xml_declaration {
            config.output.omit_xml_declaration = true;
        }
        if let Some(encoding) = &cli.encoding {
            config.output.encoding = encoding.clone();
        }

        if let Some(fail_on) = cli.fail_on {
            config.diagnostics.fail_on = fail_on.into();
        }
        if cli.verbose {
            config.diagnostics.verbose = true;
        }
        if cli.quiet {
            config.diagnostics.quiet = true;
        }
        if cli.timestamps {
            config.diagnostics.timestamps = true;
        }

        if cli.trim_text {
            config.parser.trim_text = true;
        }

        config
    }

    /// Merge two configurations (second takes precedence for non-None values)
    pub fn merge_configs(mut base: Config, override_config: Config) -> Config {
        base.output.method = override_config.output.method;
        base.output.encoding = override_config.output.encoding;
        base.output.omit_xml_declaration = override_config.output.omit_xml_declaration;
        if override_config.output.standalone.is_some() {
            base.output.standalone = override_config.output.standalone;
        }
        base.output.indent = override_config.output.indent;
        base.output.indent_amount = override_config.output.indent_amount;
        if override_config.output.doctype_system.is_some() {
            base.output.doctype_system = override_config.output.doctype_system;
        }
        if override_config.output.doctype_public.is_some() {
            base.output.doctype_public = override_config.output.doctype_public;
        }
        if !override_config.output.cdata_section_elements.is_empty() {
            base.output.cdata_section_elements = override_config.output.cdata_section_elements;
        }

        if override_config.diagnostics.fail_on.is_some() {
            base.diagnostics.fail_on = override_config.diagnostics.fail_on;
        }
        base.diagnostics.verbose = override_config.diagnostics.verbose;
        base.diagnostics.quiet = override_config.diagnostics.quiet;
        base.diagnostics.timestamps = override_config.diagnostics.timestamps;

        base.parser = override_config.parser;

        base
    }

    /// Validate configuration values
    pub fn validate_config(config: &Config) -> Result<()> {
        if config.diagnostics.verbose && config.diagnostics.quiet {
            return Err(ConfigError::Validation(
                "Cannot enable both verbose and quiet modes".to_string(),
            ));
        }

        if config.output.indent_amount > 16 {
            return Err(ConfigError::Validation(
                "Indent amount cannot exceed 16".to_string(),
            ));
        }

        if config.output.encoding.trim().is_empty() {
            return Err(ConfigError::Validation(
                "Output encoding cannot be empty".to_string(),
            ));
        }

        for name in &config.output.cdata_section_elements {
            if name.is_empty() || name.contains(char::is_whitespace) {
                return Err(ConfigError::Validation(format!(
                    "Invalid CDATA section element name: '{}'",
                    name
                )));
            }
        }

        if config.output.doctype_public.is_some() && config.output.doctype_system.is_none() {
            return Err(ConfigError::Validation(
                "doctype_public requires doctype_system".to_string(),
            ));
        }

        Ok(())
    }
}
