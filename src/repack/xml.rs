//! XML merging: linker metadata resources and documentation files.
//!
//! Both use a small owned element tree parsed with `quick-xml`:
//!
//! - Linker metadata resources (`ILLink.*.xml`, such as `ILLink.Descriptors.xml` or
//!   `ILLink.Substitutions.Lib.xml`) are deep merged: the first document's root is kept, and every
//!   element of a later document is merged into the element with the same name and key
//!   attributes (`fullname`, `name`, `signature`), or appended if there is none. Exact
//!   duplicates are dropped.
//! - Documentation files are concatenated member by member, first wins per member id, with the
//!   ids of renamed types rewritten.

use std::{borrow::Cow, collections::HashSet};

use quick_xml::{
    events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event},
    Reader, Writer,
};

use crate::{Error, Result};

const LINKER_METADATA_PREFIX: &str = "ILLink.";
const LINKER_METADATA_SUFFIX: &str = ".xml";

const KEY_ATTRIBUTES: [&str; 3] = ["fullname", "name", "signature"];

/// Returns `true` for resource names that are linker metadata files (`ILLink.<kind>[.<suffix>].xml`).
#[must_use]
pub fn is_linker_metadata(name: &str) -> bool {
    name.strip_prefix(LINKER_METADATA_PREFIX)
        .and_then(|rest| rest.strip_suffix(LINKER_METADATA_SUFFIX))
        .is_some_and(|kind| !kind.is_empty())
}

/// A node of the element tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlNode {
    /// Child element
    Element(XmlElement),
    /// Text content
    Text(String),
}

/// An XML element with its attributes in document order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct XmlElement {
    /// Tag name
    pub name: String,
    /// Attributes
    pub attributes: Vec<(String, String)>,
    /// Children
    pub children: Vec<XmlNode>,
}

impl XmlElement {
    /// Creates an element without attributes or children.
    pub fn new(name: impl Into<String>) -> Self {
        XmlElement {
            name: name.into(),
            ..XmlElement::default()
        }
    }

    /// Value of the attribute `name`.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Sets the attribute `name`, replacing an existing value.
    pub fn set_attribute(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.attributes.iter_mut().find(|(key, _)| key == name) {
            Some((_, existing)) => *existing = value,
            None => self.attributes.push((name.to_string(), value)),
        }
    }

    /// Child elements.
    pub fn elements(&self) -> impl Iterator<Item = &XmlElement> {
        self.children.iter().filter_map(|child| match child {
            XmlNode::Element(element) => Some(element),
            XmlNode::Text(_) => None,
        })
    }

    /// First child element named `name`.
    #[must_use]
    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.elements().find(|element| element.name == name)
    }

    /// Concatenated text content of the direct children.
    #[must_use]
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|child| match child {
                XmlNode::Text(text) => Some(text.as_str()),
                XmlNode::Element(_) => None,
            })
            .collect()
    }

    fn key(&self) -> Vec<(&str, &str)> {
        self.attributes
            .iter()
            .filter(|(key, _)| KEY_ATTRIBUTES.contains(&key.as_str()))
            .map(|(key, value)| (key.as_str(), value.as_str()))
            .collect()
    }

    fn merge(&mut self, other: &XmlElement) {
        for node in &other.children {
            let XmlNode::Element(incoming) = node else {
                continue;
            };

            if self.elements().any(|existing| existing == incoming) {
                continue;
            }

            let incoming_key = incoming.key();
            let target = if incoming_key.is_empty() {
                None
            } else {
                self.children.iter_mut().find_map(|child| match child {
                    XmlNode::Element(existing)
                        if existing.name == incoming.name && existing.key() == incoming_key =>
                    {
                        Some(existing)
                    }
                    _ => None,
                })
            };

            match target {
                Some(existing) => existing.merge(incoming),
                None => self.children.push(XmlNode::Element(incoming.clone())),
            }
        }
    }
}

fn xml_error(error: impl std::fmt::Display) -> Error {
    malformed_error!("Invalid XML - {}", error)
}

/// Parses a document into its root element. Comments, processing instructions and the
/// declaration are dropped; whitespace-only text is trimmed.
///
/// # Errors
/// Returns [`Error::Malformed`] for documents that are not well formed or have no root.
pub fn parse(data: &[u8]) -> Result<XmlElement> {
    let text = std::str::from_utf8(data).map_err(xml_error)?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root = None;

    loop {
        match reader.read_event().map_err(xml_error)? {
            Event::Start(start) => stack.push(element_from(&start)?),
            Event::Empty(start) => {
                let element = element_from(&start)?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| malformed_error!("Unbalanced end tag"))?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::Text(text) => {
                let value = text.unescape().map_err(xml_error)?;
                push_text(&mut stack, value);
            }
            Event::CData(data) => {
                let value = String::from_utf8_lossy(&data.into_inner()).into_owned();
                push_text(&mut stack, Cow::Owned(value));
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(malformed_error!("Unclosed element '{}'", stack[stack.len() - 1].name));
    }
    root.ok_or_else(|| malformed_error!("Document has no root element"))
}

fn element_from(start: &BytesStart) -> Result<XmlElement> {
    let mut element = XmlElement::new(String::from_utf8_lossy(start.name().as_ref()));
    for attribute in start.attributes() {
        let attribute = attribute.map_err(xml_error)?;
        let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
        let value = attribute.unescape_value().map_err(xml_error)?.into_owned();
        element.attributes.push((key, value));
    }
    Ok(element)
}

fn attach(
    stack: &mut [XmlElement],
    root: &mut Option<XmlElement>,
    element: XmlElement,
) -> Result<()> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(XmlNode::Element(element)),
        None if root.is_none() => *root = Some(element),
        None => return Err(malformed_error!("Document has more than one root element")),
    }
    Ok(())
}

fn push_text(stack: &mut [XmlElement], value: Cow<'_, str>) {
    if let Some(parent) = stack.last_mut() {
        if !value.is_empty() {
            parent.children.push(XmlNode::Text(value.into_owned()));
        }
    }
}

/// Serializes an element tree as an indented UTF-8 document with an XML declaration.
///
/// # Errors
/// Returns [`Error::Emission`] if the writer fails.
pub fn write(root: &XmlElement) -> Result<Vec<u8>> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))
        .map_err(|e| Error::Emission(e.to_string()))?;
    write_element(&mut writer, root)?;

    let mut bytes = writer.into_inner();
    bytes.push(b'\n');
    Ok(bytes)
}

fn write_element(writer: &mut Writer<Vec<u8>>, element: &XmlElement) -> Result<()> {
    let mut start = BytesStart::new(element.name.as_str());
    for (key, value) in &element.attributes {
        start.push_attribute((key.as_str(), value.as_str()));
    }

    if element.children.is_empty() {
        return writer
            .write_event(Event::Empty(start))
            .map_err(|e| Error::Emission(e.to_string()));
    }

    writer
        .write_event(Event::Start(start))
        .map_err(|e| Error::Emission(e.to_string()))?;
    for child in &element.children {
        match child {
            XmlNode::Element(child) => write_element(writer, child)?,
            XmlNode::Text(text) => writer
                .write_event(Event::Text(BytesText::new(text)))
                .map_err(|e| Error::Emission(e.to_string()))?,
        }
    }
    writer
        .write_event(Event::End(BytesEnd::new(element.name.as_str())))
        .map_err(|e| Error::Emission(e.to_string()))
}

/// Deep merges linker metadata documents, in order.
///
/// # Errors
/// Returns [`Error::Malformed`] if a document cannot be parsed, or [`Error::Configuration`] if
/// `documents` is empty.
pub fn merge_linker_documents<'a>(documents: impl IntoIterator<Item = &'a [u8]>) -> Result<Vec<u8>> {
    let mut merged: Option<XmlElement> = None;
    for document in documents {
        let root = parse(document)?;
        match merged.as_mut() {
            Some(merged) => merged.merge(&root),
            None => merged = Some(root),
        }
    }

    let merged = merged
        .ok_or_else(|| Error::Configuration("No linker metadata documents to merge".to_string()))?;
    write(&merged)
}

/// One input documentation file and the type renames applied to its module.
#[derive(Debug, Clone)]
pub struct DocumentationSource {
    /// File content
    pub data: Vec<u8>,
    /// Renamed top-level types of the module as (old, new) qualified names
    pub renames: Vec<(String, String)>,
    /// Namespaces declared by the module
    pub namespaces: Vec<String>,
}

/// Rewrites a documentation member id (`T:N.T`, `M:N.T.F(System.Int32)`, ...) for renamed types.
///
/// An id is rewritten only when its type part is the renamed type itself, one of its nested
/// types or one of its members. Ids of types living in a namespace below the renamed type's
/// full name (`N.T.Sub.X` with namespace `N.T.Sub`) are left alone.
#[must_use]
pub fn rename_member_id(id: &str, renames: &[(String, String)], namespaces: &[String]) -> String {
    let Some((prefix, rest)) = id.split_once(':') else {
        return id.to_string();
    };

    for (old, new) in renames {
        let Some(tail) = rest.strip_prefix(old.as_str()) else {
            continue;
        };
        let whole = tail.is_empty() || tail.starts_with('(');
        let inner = tail.starts_with('.') && !in_namespace_below(rest, old, namespaces);
        if whole || inner {
            return format!("{prefix}:{new}{tail}");
        }
    }
    id.to_string()
}

fn in_namespace_below(rest: &str, type_name: &str, namespaces: &[String]) -> bool {
    namespaces.iter().any(|namespace| {
        namespace
            .strip_prefix(type_name)
            .is_some_and(|below| below.is_empty() || below.starts_with('.'))
            && rest
                .strip_prefix(namespace.as_str())
                .is_some_and(|local| local.starts_with('.'))
    })
}

/// Merges documentation files into one document for `assembly`.
///
/// # Errors
/// Returns [`Error::Malformed`] if a file cannot be parsed.
pub fn merge_documentation(assembly: &str, sources: &[DocumentationSource]) -> Result<Vec<u8>> {
    let mut seen = HashSet::new();
    let mut members = XmlElement::new("members");

    for source in sources {
        let root = parse(&source.data)?;
        let Some(source_members) = root.child("members") else {
            continue;
        };

        for member in source_members.elements().filter(|e| e.name == "member") {
            let mut member = member.clone();
            if let Some(id) = member.attribute("name") {
                let renamed = rename_member_id(id, &source.renames, &source.namespaces);
                if !seen.insert(renamed.clone()) {
                    continue;
                }
                member.set_attribute("name", renamed);
            }
            members.children.push(XmlNode::Element(member));
        }
    }

    let mut name = XmlElement::new("name");
    name.children.push(XmlNode::Text(assembly.to_string()));
    let mut assembly_element = XmlElement::new("assembly");
    assembly_element.children.push(XmlNode::Element(name));

    let mut doc = XmlElement::new("doc");
    doc.children.push(XmlNode::Element(assembly_element));
    doc.children.push(XmlNode::Element(members));
    write(&doc)
}
