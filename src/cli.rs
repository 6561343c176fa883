use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use crate::diagnostic::Severity;
use crate::transformer::OutputMethod;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum MethodArg {
    Xml,
    Text,
}

impl From<MethodArg> for OutputMethod {
    fn from(method: MethodArg) -> Self {
        match method {
            MethodArg::Xml => OutputMethod::Xml,
            MethodArg::Text => OutputMethod::Text,
        }
    }
}

/// Lowest severity that aborts the run
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FailOnArg {
    Warning,
    Error,
    Fatal,
    /// Report everything, abort on nothing
    Never,
}

impl From<FailOnArg> for Option<Severity> {
    fn from(fail_on: FailOnArg) -> Self {
        match fail_on {
            FailOnArg::Warning => Some(Severity::Warning),
            FailOnArg::Error => Some(Severity::Error),
            FailOnArg::Fatal => Some(Severity::Fatal),
            FailOnArg::Never => None,
        }
    }
}

/// Copy an XML document through an identity transformer handler
#[derive(Parser, Debug, Clone)]
#[command(name = "sax-transform")]
#[command(about = "Stream an XML document through an identity transform with configurable output")]
#[command(version)]
pub struct Cli {
    /// XML document to read
    #[arg(help = "Input XML file")]
    pub input: PathBuf,

    /// Output file; stdout when absent
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,

    #[arg(long = "method", value_enum, help = "Output method")]
    pub method: Option<MethodArg>,

    #[arg(long = "indent", help = "Indent element content")]
    pub indent: bool,

    #[arg(long = "indent-amount", help = "Spaces per indentation level")]
    pub indent_amount: Option<usize>,

    #[arg(long = "omit-xml-declaration", help = "Do not write the XML declaration")]
    pub omit_xml_declaration: bool,

    #[arg(long = "encoding", help = "Encoding named in the XML declaration")]
    pub encoding: Option<String>,

    /// Transformer parameters as name=value
    #[arg(
        short = 'p',
        long = "param",
        value_name = "NAME=VALUE",
        value_parser = parse_param
    )]
    pub params: Vec<(String, String)>,

    /// Configuration file (TOML or JSON)
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    #[arg(long = "fail-on", value_enum, help = "Abort at or above this severity")]
    pub fail_on: Option<FailOnArg>,

    /// Enable verbose output
    #[arg(short = 'v', long = "verbose", help = "Enable verbose output")]
    pub verbose: bool,

    /// Enable quiet mode (fatal errors only)
    #[arg(
        short = 'q',
        long = "quiet",
        help = "Quiet mode",
        conflicts_with = "verbose"
    )]
    pub quiet: bool,

    #[arg(long = "timestamps", help = "Prefix diagnostics with a timestamp")]
    pub timestamps: bool,

    #[arg(long = "trim-text", help = "Trim whitespace around text")]
    pub trim_text: bool,
}

fn parse_param(value: &str) -> Result<(String, String), String> {
    match value.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected NAME=VALUE, got '{}'", value)),
    }
}

impl Cli {
    pub fn validate(&self) -> Result<(), String> {
        if !self.input.is_file() {
            return Err(format!("Input file does not exist: {}", self.input.display()));
        }
        if let Some(output) = &self.output
            && output == &self.input
        {
            return Err("Output file must differ from the input file".to_string());
        }
        Ok(())
    }
}
