use std::io::{Read, Write};

use xmltree::{Element, EmitterConfig, XMLNode};

use crate::errors::{DavError, DavResult};

pub(crate) const NS_DAV: &str = "DAV:";

pub(crate) trait ElementExt {
    /// Element with a `prefix:name` name.
    fn new2(n: &str) -> Self;
    /// Element with a `prefix:name` name and text content.
    fn new_text(n: &str, t: impl Into<String>) -> Self;
    /// Declare a namespace prefix on this element.
    fn ns(self, prefix: &str, namespace: &str) -> Self;
    fn text(self, t: impl Into<String>) -> Self;
    fn push_elem(&mut self, e: Element);
    fn child_elems(&self) -> impl Iterator<Item = &Element>;
    fn take_child_elems(self) -> Vec<Element>;
    /// Is this element `name` in namespace `ns`.
    fn is(&self, ns: &str, name: &str) -> bool;
    fn parse2<R: Read>(r: R) -> DavResult<Element>;
    /// Serialize without an xml declaration.
    fn write_fragment<W: Write>(&self, w: W) -> DavResult<()>;
}

impl ElementExt for Element {
    fn new2(n: &str) -> Element {
        match n.split_once(':') {
            None => Element::new(n),
            Some((prefix, name)) => {
                let mut e = Element::new(name);
                e.prefix = Some(prefix.to_string());
                e
            }
        }
    }

    fn new_text(n: &str, t: impl Into<String>) -> Element {
        Element::new2(n).text(t)
    }

    fn ns(mut self, prefix: &str, namespace: &str) -> Element {
        let mut ns = self.namespaces.unwrap_or_else(xmltree::Namespace::empty);
        ns.force_put(prefix, namespace);
        self.namespaces = Some(ns);
        if self.prefix.as_deref() == Some(prefix) {
            self.namespace = Some(namespace.to_string());
        }
        self
    }

    fn text(mut self, t: impl Into<String>) -> Element {
        self.children.push(XMLNode::Text(t.into()));
        self
    }

    fn push_elem(&mut self, e: Element) {
        self.children.push(XMLNode::Element(e));
    }

    fn child_elems(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|n| n.as_element())
    }

    fn take_child_elems(self) -> Vec<Element> {
        self.children
            .into_iter()
            .filter_map(|n| match n {
                XMLNode::Element(e) => Some(e),
                _ => None,
            })
            .collect()
    }

    fn is(&self, ns: &str, name: &str) -> bool {
        self.name == name && self.namespace.as_deref() == Some(ns)
    }

    fn parse2<R: Read>(r: R) -> DavResult<Element> {
        match Element::parse(r) {
            Ok(elem) => Ok(elem),
            Err(xmltree::ParseError::MalformedXml(_)) => Err(DavError::XmlParseError),
            Err(_) => Err(DavError::XmlReadError),
        }
    }

    fn write_fragment<W: Write>(&self, w: W) -> DavResult<()> {
        let config = EmitterConfig::new()
            .perform_indent(false)
            .write_document_declaration(false);
        self.write_with_config(w, config).map_err(|_| DavError::XmlWriteError)
    }
}

/// Serialize a complete document, with an xml declaration.
pub(crate) fn write_document(elem: &Element) -> DavResult<Vec<u8>> {
    let mut buf = Vec::new();
    let config = EmitterConfig::new()
        .perform_indent(false)
        .write_document_declaration(true);
    elem.write_with_config(&mut buf, config)
        .map_err(|_| DavError::XmlWriteError)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_and_parse() {
        let mut e = Element::new2("D:prop").ns("D", NS_DAV);
        e.push_elem(Element::new_text("D:displayname", "x & y"));
        let doc = write_document(&e).unwrap();
        let s = String::from_utf8(doc.clone()).unwrap();
        assert!(s.starts_with("<?xml"));
        assert!(s.contains("x &amp; y"));

        let back = Element::parse2(doc.as_slice()).unwrap();
        assert!(back.is(NS_DAV, "prop"));
        let child = back.child_elems().next().unwrap();
        assert!(child.is(NS_DAV, "displayname"));
        assert_eq!(child.get_text().unwrap(), "x & y");

        assert!(matches!(Element::parse2(&b"<a><b></a>"[..]), Err(DavError::XmlParseError)));
    }
}
