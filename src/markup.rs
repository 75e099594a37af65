//! Small element tree on top of `xml-rs`.
//!
//! AppData, metainfo, catalog and eopkg metadata files are small, so they
//! are read into an [`Element`] tree and queried by path.

use std::io::Read;
use thiserror::Error;
use xml::reader::{EventReader, XmlEvent};

#[derive(Error, Debug)]
pub enum XmlError {
    #[error("XML parse error: {0}")]
    Parse(#[from] xml::reader::Error),

    #[error("XML document has no root element")]
    Empty,
}

/// One element with its attributes, text and children.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub text: String,
    pub children: Vec<Element>,
}

impl Element {
    /// Parses a document and returns its root element.
    ///
    /// # Errors
    ///
    /// Returns [`XmlError`] for malformed XML or an empty document.
    pub fn parse<R: Read>(reader: R) -> Result<Element, XmlError> {
        let mut stack: Vec<Element> = Vec::new();
        let mut root = None;

        for event in EventReader::new(reader) {
            match event? {
                XmlEvent::StartElement {
                    name, attributes, ..
                } => {
                    let attributes = attributes
                        .into_iter()
                        .map(|a| {
                            let key = match a.name.prefix {
                                Some(prefix) => format!("{}:{}", prefix, a.name.local_name),
                                None => a.name.local_name,
                            };
                            (key, a.value)
                        })
                        .collect();
                    stack.push(Element {
                        name: name.local_name,
                        attributes,
                        ..Default::default()
                    });
                }
                XmlEvent::EndElement { .. } => {
                    if let Some(done) = stack.pop() {
                        match stack.last_mut() {
                            Some(parent) => parent.children.push(done),
                            None => root = Some(done),
                        }
                    }
                }
                XmlEvent::Characters(text) | XmlEvent::CData(text) => {
                    if let Some(current) = stack.last_mut() {
                        current.text.push_str(&text);
                    }
                }
                XmlEvent::EndDocument => break,
                _ => {}
            }
        }

        root.ok_or(XmlError::Empty)
    }

    pub fn parse_str(text: &str) -> Result<Element, XmlError> {
        Self::parse(text.as_bytes())
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Trimmed text content.
    pub fn text(&self) -> &str {
        self.text.trim()
    }

    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Text of this element and all descendants, whitespace collapsed.
    pub fn full_text(&self) -> String {
        let mut out = self.text.clone();
        for child in &self.children {
            out.push(' ');
            out.push_str(&child.full_text());
        }
        out.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    /// Follows a `/`-separated path of child names.
    pub fn find(&self, path: &str) -> Option<&Element> {
        path.split('/')
            .try_fold(self, |element, name| element.child(name))
    }

    /// Text of the element at `path`, if present and non-empty.
    pub fn find_text(&self, path: &str) -> Option<&str> {
        self.find(path).map(Element::text).filter(|t| !t.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_query() {
        let root = Element::parse_str(
            r#"<?xml version="1.0"?>
<component type="desktop">
  <id>gedit.desktop</id>
  <name xml:lang="de">Texteditor</name>
  <name>Text Editor</name>
  <urls><url type="homepage">https://example.org</url></urls>
</component>"#,
        )
        .unwrap();

        assert_eq!(root.name, "component");
        assert_eq!(root.attr("type"), Some("desktop"));
        assert_eq!(root.find_text("id"), Some("gedit.desktop"));
        assert_eq!(root.children_named("name").count(), 2);
        assert_eq!(
            root.children_named("name").next().and_then(|n| n.attr("xml:lang")),
            Some("de")
        );
        assert_eq!(root.find_text("urls/url"), Some("https://example.org"));
        assert!(root.find("missing/path").is_none());
    }

    #[test]
    fn test_malformed() {
        assert!(Element::parse_str("<a><b></a>").is_err());
        assert!(matches!(Element::parse_str(""), Err(_)));
    }
}
