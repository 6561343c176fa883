use divan::Bencher;
use sax_transform::{
    NoopErrorListener, ResultTarget, SaxDriver, SharedBuffer, TransformerFactory,
    TransformerHandler, TreeResult,
};

fn main() {
    divan::main();
}

const SMALL_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<root xmlns="urn:bench">
    <element id="1">Valid content</element>
</root>"#;

fn large_xml(items: usize) -> String {
    let mut xml = String::from("<catalog xmlns:p=\"urn:price\">");
    for i in 0..items {
        xml.push_str(&format!(
            "<item n=\"{i}\"><name>Item {i} &amp; co</name>\
             <p:price>{i}.99</p:price><!--c--></item>\n"
        ));
    }
    xml.push_str("</catalog>");
    xml
}

#[divan::bench]
fn identity_small_to_buffer(bencher: Bencher) {
    let factory = TransformerFactory::new();

    bencher.bench_local(|| {
        let mut handler = factory.new_transformer_handler();
        handler.transformer_mut().set_error_listener(NoopErrorListener);
        factory
            .transform_str(
                SMALL_XML,
                "bench:small",
                &mut handler,
                ResultTarget::Buffer(SharedBuffer::new()),
            )
            .expect("Transformation failed")
    });
}

#[divan::bench(args = [100, 1_000, 10_000, 50_000])]
fn identity_large_to_buffer(bencher: Bencher, items: usize) {
    let source = large_xml(items);
    let factory = TransformerFactory::new();

    bencher.bench_local(move || {
        let mut handler = factory.new_transformer_handler();
        factory
            .transform_str(
                &source,
                "bench:large",
                &mut handler,
                ResultTarget::Buffer(SharedBuffer::new()),
            )
            .expect("Transformation failed")
    });
}

#[divan::bench(args = [100, 1_000])]
fn identity_large_to_tree(bencher: Bencher, items: usize) {
    let source = large_xml(items);
    let factory = TransformerFactory::new();

    bencher.bench_local(move || {
        let tree = TreeResult::new();
        let mut handler = factory.new_transformer_handler();
        factory
            .transform_str(&source, "bench:tree", &mut handler, ResultTarget::Tree(tree.clone()))
            .expect("Transformation failed");
        tree.document()
    });
}

#[divan::bench]
fn parse_only(bencher: Bencher) {
    let source = large_xml(1_000);
    let driver = SaxDriver::default();

    bencher.bench_local(move || {
        let mut handler = sax_transform::IdentityTransformerHandler::new();
        handler
            .set_result(ResultTarget::sax(NullSink))
            .expect("Valid target");
        driver.parse_str(&source, &mut handler).expect("Parse failed")
    });
}

/// Discards every event
struct NullSink;

impl sax_transform::ContentHandler for NullSink {
    fn start_document(&mut self) -> sax_transform::Result<()> {
        Ok(())
    }
    fn end_document(&mut self) -> sax_transform::Result<()> {
        Ok(())
    }
    fn start_element(
        &mut self,
        _uri: &str,
        _local_name: &str,
        _qname: &str,
        _attributes: &sax_transform::Attributes,
    ) -> sax_transform::Result<()> {
        Ok(())
    }
    fn end_element(
        &mut self,
        _uri: &str,
        _local_name: &str,
        _qname: &str,
    ) -> sax_transform::Result<()> {
        Ok(())
    }
    fn characters(&mut self, _text: &str) -> sax_transform::Result<()> {
        Ok(())
    }
    fn processing_instruction(&mut self, _target: &str, _data: &str) -> sax_transform::Result<()> {
        Ok(())
    }
}

impl sax_transform::LexicalHandler for NullSink {}
impl sax_transform::DtdHandler for NullSink {}
