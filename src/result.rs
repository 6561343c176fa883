//! Result targets: where transformation output goes.

use std::fmt;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{Result, TransformError};
use crate::sax::EventSink;

/// In-memory byte buffer. Keep a clone to read the output after the transformation.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Contents decoded as UTF-8, with invalid sequences replaced
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.to_vec()).into_owned()
    }

    pub fn clear(&self) {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Node of a result tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(String),
    Comment(String),
    ProcessingInstruction { target: String, data: String },
}

/// Element of a result tree
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Element {
    pub uri: String,
    pub local_name: String,
    pub qname: String,
    /// `(qname, value)` pairs, namespace declarations included
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Node>,
}

impl Element {
    pub fn attribute(&self, qname: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(name, _)| name == qname)
            .map(|(_, value)| value.as_str())
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|node| match node {
            Node::Element(element) => Some(element),
            _ => None,
        })
    }

    /// Concatenated text of all descendant text nodes
    pub fn text(&self) -> String {
        let mut text = String::new();
        collect_text(&self.children, &mut text);
        text
    }
}

fn collect_text(nodes: &[Node], out: &mut String) {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Element(element) => collect_text(&element.children, out),
            _ => {}
        }
    }
}

/// Document node of a result tree
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Document {
    pub doctype: Option<DocumentType>,
    pub children: Vec<Node>,
}

impl Document {
    pub fn root_element(&self) -> Option<&Element> {
        self.children.iter().find_map(|node| match node {
            Node::Element(element) => Some(element),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DocumentType {
    pub name: String,
    pub public_id: Option<String>,
    pub system_id: Option<String>,
}

/// Tree target. Keep a clone to read the document after the transformation.
#[derive(Debug, Clone, Default)]
pub struct TreeResult(Arc<Mutex<Document>>);

impl TreeResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn document(&self) -> Document {
        self.lock().clone()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Document> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Destination for the output of a transformation
pub enum ResultTarget {
    /// Any byte sink
    Stream(Box<dyn Write + Send>),
    /// A file, created or truncated when the document starts
    File(PathBuf),
    /// A URI; only absolute `file:` URIs can be written
    SystemId(String),
    Buffer(SharedBuffer),
    Tree(TreeResult),
    /// Forward every event to another handler
    Sax(Box<dyn EventSink>),
}

impl ResultTarget {
    pub fn stream(writer: impl Write + Send + 'static) -> Self {
        ResultTarget::Stream(Box::new(writer))
    }

    pub fn sax(sink: impl EventSink + 'static) -> Self {
        ResultTarget::Sax(Box::new(sink))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ResultTarget::Stream(_) => "stream",
            ResultTarget::File(_) => "file",
            ResultTarget::SystemId(_) => "system-id",
            ResultTarget::Buffer(_) => "buffer",
            ResultTarget::Tree(_) => "tree",
            ResultTarget::Sax(_) => "sax",
        }
    }

    /// Check that output can go to this target, without opening it
    pub fn validate(&self) -> Result<()> {
        match self {
            ResultTarget::File(path) => validate_path(path),
            ResultTarget::SystemId(uri) => system_id_to_path(uri).and_then(|p| validate_path(&p)),
            ResultTarget::Stream(_)
            | ResultTarget::Buffer(_)
            | ResultTarget::Tree(_)
            | ResultTarget::Sax(_) => Ok(()),
        }
    }
}

impl fmt::Debug for ResultTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultTarget::File(path) => f.debug_tuple("File").field(path).finish(),
            ResultTarget::SystemId(uri) => f.debug_tuple("SystemId").field(uri).finish(),
            other => write!(f, "{}", other.kind()),
        }
    }
}

fn validate_path(path: &std::path::Path) -> Result<()> {
    if path.as_os_str().is_empty() {
        return Err(TransformError::invalid_argument("result path is empty"));
    }
    if path.is_dir() {
        return Err(TransformError::invalid_argument(format!(
            "result path is a directory: {}",
            path.display()
        )));
    }
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.is_dir()
    {
        return Err(TransformError::invalid_argument(format!(
            "result directory does not exist: {}",
            parent.display()
        )));
    }
    Ok(())
}

/// Map a `file:` URI to a local path
pub fn system_id_to_path(uri: &str) -> Result<PathBuf> {
    if uri.trim().is_empty() {
        return Err(TransformError::invalid_argument("result system id is empty"));
    }
    let parsed = url::Url::parse(uri).map_err(|e| {
        TransformError::invalid_argument(format!("result system id is not a URI: {} ({})", uri, e))
    })?;
    if parsed.scheme() != "file" {
        return Err(TransformError::invalid_argument(format!(
            "unsupported result scheme '{}': {}",
            parsed.scheme(),
            uri
        )));
    }
    parsed.to_file_path().map_err(|_| {
        TransformError::invalid_argument(format!("result system id has no local path: {}", uri))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_in_memory_targets_are_valid() {
        assert!(ResultTarget::Buffer(SharedBuffer::new()).validate().is_ok());
        assert!(ResultTarget::Tree(TreeResult::new()).validate().is_ok());
        assert!(ResultTarget::stream(std::io::sink()).validate().is_ok());
    }

    #[test]
    fn test_file_target_validation() {
        let temp_dir = TempDir::new().unwrap();

        let good = ResultTarget::File(temp_dir.path().join("out.xml"));
        assert!(good.validate().is_ok());

        let empty = ResultTarget::File(PathBuf::new());
        assert!(matches!(
            empty.validate(),
            Err(TransformError::InvalidArgument(_))
        ));

        let directory = ResultTarget::File(temp_dir.path().to_path_buf());
        assert!(matches!(
            directory.validate(),
            Err(TransformError::InvalidArgument(_))
        ));

        let missing_parent = ResultTarget::File(temp_dir.path().join("missing").join("out.xml"));
        assert!(matches!(
            missing_parent.validate(),
            Err(TransformError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_system_id_target_validation() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("out.xml");
        let uri = url::Url::from_file_path(&path).unwrap().to_string();

        assert!(ResultTarget::SystemId(uri.clone()).validate().is_ok());
        assert_eq!(system_id_to_path(&uri).unwrap(), path);

        for bad in ["", "not a uri", "http://example.com/out.xml"] {
            assert!(
                matches!(
                    ResultTarget::SystemId(bad.to_string()).validate(),
                    Err(TransformError::InvalidArgument(_))
                ),
                "expected {:?} to be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_shared_buffer_clones_share_contents() {
        let buffer = SharedBuffer::new();
        let mut writer = buffer.clone();
        writer.write_all(b"<a/>").unwrap();

        assert_eq!(buffer.to_string_lossy(), "<a/>");
        buffer.clear();
        assert!(buffer.to_vec().is_empty());
    }

    #[test]
    fn test_element_text_and_children() {
        let element = Element {
            qname: "p".to_string(),
            local_name: "p".to_string(),
            children: vec![
                Node::Text("Hello ".to_string()),
                Node::Element(Element {
                    qname: "b".to_string(),
                    local_name: "b".to_string(),
                    children: vec![Node::Text("world".to_string())],
                    ..Default::default()
                }),
                Node::Comment("ignored".to_string()),
            ],
            ..Default::default()
        };

        assert_eq!(element.text(), "Hello world");
        assert_eq!(element.child_elements().count(), 1);
    }
}
