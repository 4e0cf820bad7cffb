//! Small namespace-aware document model for the mission templates.
//!
//! Parsing keeps every node the source had (whitespace, comments, prefixes
//! as written) so a document that is only partially patched serializes
//! back to the same layout. Path queries follow the ElementTree subset the
//! templates are addressed with: `.//a:b/c:d`, `./a`, `*`, `*:local` and
//! `{uri}local`.

use std::collections::BTreeMap;

use quick_xml::escape::{escape, partial_escape};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::{MissionError, Result};

pub const KML_NS: &str = "http://www.opengis.net/kml/2.2";
pub const WPML_NS: &str = "http://www.dji.com/wpmz/1.0.6";
const WPML_NS_FAMILY: &str = "http://www.dji.com/wpmz/";
const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";
const XML_DECLARATION: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>";

#[derive(Debug, Clone, PartialEq)]
pub enum XmlNode {
    Element(XmlElement),
    Text(String),
    CData(String),
    Comment(String),
    ProcessingInstruction(String),
    DocType(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct XmlElement {
    name: String,
    namespace: Option<String>,
    attributes: Vec<(String, String)>,
    children: Vec<XmlNode>,
    self_closing: bool,
}

impl XmlElement {
    /// Qualified name as written in the source, e.g. `wpml:height`.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn local_name(&self) -> &str {
        match self.name.split_once(':') {
            Some((_, local)) => local,
            None => &self.name,
        }
    }

    /// Resolved namespace URI, if the element is in one.
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &XmlElement> {
        self.children.iter().filter_map(|node| match node {
            XmlNode::Element(el) => Some(el),
            _ => None,
        })
    }

    /// Every element below this one in document order.
    pub fn descendants(&self) -> Vec<&XmlElement> {
        let mut out = Vec::new();
        collect_descendants(self, &mut out);
        out
    }

    /// Character data before the first child element.
    pub fn text(&self) -> String {
        let mut text = String::new();
        for node in &self.children {
            match node {
                XmlNode::Element(_) => break,
                XmlNode::Text(t) | XmlNode::CData(t) => text.push_str(t),
                _ => {}
            }
        }
        text
    }

    /// Replace the character data before the first child element.
    pub fn set_text(&mut self, value: &str) {
        let first_element = self
            .children
            .iter()
            .position(|n| matches!(n, XmlNode::Element(_)))
            .unwrap_or(self.children.len());
        let mut index = 0;
        self.children.retain(|node| {
            let keep = index >= first_element || !matches!(node, XmlNode::Text(_) | XmlNode::CData(_));
            index += 1;
            keep
        });
        self.children.insert(0, XmlNode::Text(value.to_string()));
    }

    fn matches(&self, test: &NameTest) -> bool {
        match test {
            NameTest::Any => true,
            NameTest::AnyNamespace { local } => self.local_name() == local,
            NameTest::Qualified { namespace, local } => {
                self.local_name() == local && self.namespace.as_deref() == namespace.as_deref()
            }
        }
    }
}

fn collect_descendants<'a>(element: &'a XmlElement, out: &mut Vec<&'a XmlElement>) {
    for child in element.child_elements() {
        out.push(child);
        collect_descendants(child, out);
    }
}

/// A parsed document: the root element plus whatever surrounds it.
#[derive(Debug, Clone, PartialEq)]
pub struct XmlDocument {
    prolog: Vec<XmlNode>,
    root: XmlElement,
    epilog: Vec<XmlNode>,
}

impl XmlDocument {
    /// Parse `source`; `context` names the document in error messages.
    pub fn parse(source: &str, context: &str) -> Result<Self> {
        let mut reader = Reader::from_str(source);
        reader.config_mut().trim_text(false);

        let mut prolog = Vec::new();
        let mut epilog = Vec::new();
        let mut root: Option<XmlElement> = None;
        let mut open: Vec<XmlElement> = Vec::new();
        let mut scopes: Vec<Vec<(String, String)>> = Vec::new();

        loop {
            let event = reader.read_event().map_err(|e| MissionError::xml(context, e))?;
            let node = match event {
                Event::Eof => break,
                Event::Decl(_) => continue,
                Event::Start(start) => {
                    let (element, scope) = open_element(&start, &scopes, context, false)?;
                    open.push(element);
                    scopes.push(scope);
                    continue;
                }
                Event::End(_) => {
                    scopes.pop();
                    match open.pop() {
                        Some(element) => XmlNode::Element(element),
                        None => return Err(malformed(context, "closing tag without an open element")),
                    }
                }
                Event::Empty(start) => {
                    let (element, _) = open_element(&start, &scopes, context, true)?;
                    XmlNode::Element(element)
                }
                Event::Text(text) => {
                    XmlNode::Text(text.unescape().map_err(|e| MissionError::xml(context, e))?.into_owned())
                }
                Event::CData(data) => {
                    XmlNode::CData(data.decode().map_err(|e| MissionError::xml(context, e))?.into_owned())
                }
                Event::Comment(comment) => XmlNode::Comment(String::from_utf8_lossy(&comment).into_owned()),
                Event::PI(pi) => XmlNode::ProcessingInstruction(String::from_utf8_lossy(&pi).into_owned()),
                Event::DocType(doctype) => XmlNode::DocType(String::from_utf8_lossy(&doctype).into_owned()),
            };

            if let Some(parent) = open.last_mut() {
                parent.children.push(node);
                continue;
            }
            match node {
                XmlNode::Element(element) => {
                    if root.is_some() {
                        return Err(malformed(context, "more than one root element"));
                    }
                    root = Some(element);
                }
                other if root.is_none() => prolog.push(other),
                other => epilog.push(other),
            }
        }

        if let Some(unclosed) = open.last() {
            return Err(malformed(context, &format!("element <{}> is never closed", unclosed.name)));
        }
        let root = root.ok_or_else(|| malformed(context, "document has no root element"))?;
        Ok(XmlDocument { prolog, root, epilog })
    }

    pub fn root(&self) -> &XmlElement {
        &self.root
    }

    /// First element matched by `path`, in document order.
    pub fn find(&self, path: &XmlPath) -> Option<&XmlElement> {
        self.select(path).first().and_then(|addr| self.element_at(addr))
    }

    pub fn find_all(&self, path: &XmlPath) -> Vec<&XmlElement> {
        self.select(path)
            .iter()
            .filter_map(|addr| self.element_at(addr))
            .collect()
    }

    /// Set the text of the first match. Returns false when nothing matched.
    pub fn set_text(&mut self, path: &XmlPath, value: &str) -> bool {
        let first = self.select(path).into_iter().next();
        match first.and_then(|addr| self.element_at_mut(&addr)) {
            Some(element) => {
                element.set_text(value);
                true
            }
            None => false,
        }
    }

    /// Set the text of every match; returns how many elements changed.
    pub fn set_text_all(&mut self, path: &XmlPath, value: &str) -> usize {
        let mut changed = 0;
        for addr in self.select(path) {
            if let Some(element) = self.element_at_mut(&addr) {
                element.set_text(value);
                changed += 1;
            }
        }
        changed
    }

    /// Document with the first match of `path` carrying `value`.
    pub fn with_text(mut self, path: &XmlPath, value: &str) -> Self {
        self.set_text(path, value);
        self
    }

    pub fn to_xml_string(&self) -> String {
        let mut out = String::from(XML_DECLARATION);
        out.push('\n');
        for node in self.prolog.iter().filter(|n| !is_blank(n)) {
            write_node(node, &mut out);
            out.push('\n');
        }
        write_element(&self.root, &mut out);
        for node in self.epilog.iter().filter(|n| !is_blank(n)) {
            out.push('\n');
            write_node(node, &mut out);
        }
        out.push('\n');
        out
    }

    /// UTF-8 bytes with an explicit encoding declaration.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_xml_string().into_bytes()
    }

    // Addresses are child-index paths from the root; sorting them yields
    // document order.
    fn select(&self, path: &XmlPath) -> Vec<Vec<usize>> {
        let mut current: Vec<Vec<usize>> = vec![Vec::new()];
        for step in &path.steps {
            let mut next = Vec::new();
            for addr in &current {
                let Some(element) = self.element_at(addr) else { continue };
                match step.axis {
                    Axis::Child => {
                        for (i, node) in element.children.iter().enumerate() {
                            if let XmlNode::Element(child) = node {
                                if child.matches(&step.test) {
                                    let mut child_addr = addr.clone();
                                    child_addr.push(i);
                                    next.push(child_addr);
                                }
                            }
                        }
                    }
                    Axis::Descendant => descendant_addresses(element, addr, &step.test, &mut next),
                }
            }
            next.sort();
            next.dedup();
            current = next;
        }
        current
    }

    fn element_at(&self, addr: &[usize]) -> Option<&XmlElement> {
        let mut element = &self.root;
        for &i in addr {
            element = match element.children.get(i) {
                Some(XmlNode::Element(child)) => child,
                _ => return None,
            };
        }
        Some(element)
    }

    fn element_at_mut(&mut self, addr: &[usize]) -> Option<&mut XmlElement> {
        let mut element = &mut self.root;
        for &i in addr {
            element = match element.children.get_mut(i) {
                Some(XmlNode::Element(child)) => child,
                _ => return None,
            };
        }
        Some(element)
    }
}

fn descendant_addresses(element: &XmlElement, addr: &[usize], test: &NameTest, out: &mut Vec<Vec<usize>>) {
    for (i, node) in element.children.iter().enumerate() {
        if let XmlNode::Element(child) = node {
            let mut child_addr = addr.to_vec();
            child_addr.push(i);
            if child.matches(test) {
                out.push(child_addr.clone());
            }
            descendant_addresses(child, &child_addr, test, out);
        }
    }
}

fn malformed(context: &str, reason: &str) -> MissionError {
    MissionError::MalformedDocument { context: context.to_string(), reason: reason.to_string() }
}

fn open_element(
    start: &BytesStart,
    scopes: &[Vec<(String, String)>],
    context: &str,
    self_closing: bool,
) -> Result<(XmlElement, Vec<(String, String)>)> {
    let name = std::str::from_utf8(start.name().as_ref())
        .map_err(|_| malformed(context, "element name is not valid UTF-8"))?
        .to_string();

    let mut attributes = Vec::new();
    let mut scope = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| MissionError::xml(context, e))?;
        let key = std::str::from_utf8(attr.key.as_ref())
            .map_err(|_| malformed(context, "attribute name is not valid UTF-8"))?
            .to_string();
        let value = attr
            .unescape_value()
            .map_err(|e| MissionError::xml(context, e))?
            .into_owned();
        if key == "xmlns" {
            scope.push((String::new(), value.clone()));
        } else if let Some(prefix) = key.strip_prefix("xmlns:") {
            scope.push((prefix.to_string(), value.clone()));
        }
        attributes.push((key, value));
    }

    let prefix = name.split_once(':').map(|(p, _)| p).unwrap_or("");
    let namespace = resolve_prefix(prefix, &scope, scopes);
    let element = XmlElement { name, namespace, attributes, children: Vec::new(), self_closing };
    Ok((element, scope))
}

fn resolve_prefix(prefix: &str, own: &[(String, String)], outer: &[Vec<(String, String)>]) -> Option<String> {
    if prefix == "xml" {
        return Some(XML_NS.to_string());
    }
    std::iter::once(own)
        .chain(outer.iter().rev().map(Vec::as_slice))
        .flat_map(|scope| scope.iter().rev())
        .find(|(p, _)| p == prefix)
        .map(|(_, uri)| uri.clone())
        .filter(|uri| !uri.is_empty())
}

fn is_blank(node: &XmlNode) -> bool {
    matches!(node, XmlNode::Text(t) if t.trim().is_empty())
}

fn write_node(node: &XmlNode, out: &mut String) {
    match node {
        XmlNode::Element(element) => write_element(element, out),
        XmlNode::Text(text) => out.push_str(&partial_escape(text.as_str())),
        XmlNode::CData(text) => {
            out.push_str("<![CDATA[");
            out.push_str(text);
            out.push_str("]]>");
        }
        XmlNode::Comment(text) => {
            out.push_str("<!--");
            out.push_str(text);
            out.push_str("-->");
        }
        XmlNode::ProcessingInstruction(text) => {
            out.push_str("<?");
            out.push_str(text);
            out.push_str("?>");
        }
        XmlNode::DocType(text) => {
            out.push_str("<!DOCTYPE ");
            out.push_str(text.trim_start());
            out.push('>');
        }
    }
}

fn write_element(element: &XmlElement, out: &mut String) {
    out.push('<');
    out.push_str(&element.name);
    for (key, value) in &element.attributes {
        out.push(' ');
        out.push_str(key);
        out.push_str("=\"");
        out.push_str(&escape(value.as_str()));
        out.push('"');
    }
    if element.children.is_empty() && element.self_closing {
        out.push_str("/>");
        return;
    }
    out.push('>');
    for child in &element.children {
        write_node(child, out);
    }
    out.push_str("</");
    out.push_str(&element.name);
    out.push('>');
}

/// Prefix to namespace-URI bindings used to compile paths.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Namespaces {
    prefixes: BTreeMap<String, String>,
}

impl Namespaces {
    pub fn new() -> Self {
        Namespaces::default()
    }

    pub fn with(mut self, prefix: &str, uri: &str) -> Self {
        self.prefixes.insert(prefix.to_string(), uri.to_string());
        self
    }

    /// `kml` and `wpml` bound to their usual URIs.
    pub fn mission_defaults() -> Self {
        Namespaces::new().with("kml", KML_NS).with("wpml", WPML_NS)
    }

    /// Bindings matching what a mission document actually declares.
    ///
    /// `kml` follows the root element's namespace, `wpml` the first
    /// declared `wpmz/<version>` URI. Either falls back to the default.
    pub fn detect(doc: &XmlDocument) -> Self {
        let root = doc.root();
        let kml = root
            .namespace()
            .filter(|uri| !uri.starts_with(WPML_NS_FAMILY))
            .unwrap_or(KML_NS);

        let declared = std::iter::once(root)
            .chain(root.descendants())
            .flat_map(|el| el.attributes())
            .find(|(key, value)| key.starts_with("xmlns") && value.starts_with(WPML_NS_FAMILY))
            .map(|(_, value)| value);
        let wpml = declared.unwrap_or(WPML_NS);

        Namespaces::new().with("kml", kml).with("wpml", wpml)
    }

    pub fn get(&self, prefix: &str) -> Option<&str> {
        self.prefixes.get(prefix).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Axis {
    Child,
    Descendant,
}

#[derive(Debug, Clone, PartialEq)]
enum NameTest {
    Any,
    AnyNamespace { local: String },
    Qualified { namespace: Option<String>, local: String },
}

#[derive(Debug, Clone, PartialEq)]
struct Step {
    axis: Axis,
    test: NameTest,
}

/// Compiled element path, relative to the document root.
#[derive(Debug, Clone, PartialEq)]
pub struct XmlPath {
    expr: String,
    steps: Vec<Step>,
}

impl XmlPath {
    pub fn parse(expr: &str, namespaces: &Namespaces) -> Result<Self> {
        let invalid = |reason: &str| MissionError::InvalidPath { path: expr.to_string(), reason: reason.to_string() };

        let trimmed = expr.trim();
        if trimmed.starts_with('/') {
            return Err(invalid("absolute paths are not supported"));
        }
        let mut body = match trimmed.strip_prefix('.') {
            Some(rest) => rest.to_string(),
            None => format!("/{}", trimmed),
        };

        let mut steps = Vec::new();
        while !body.is_empty() {
            let axis = if body.starts_with("//") {
                body.replace_range(..2, "");
                Axis::Descendant
            } else if body.starts_with('/') {
                body.replace_range(..1, "");
                Axis::Child
            } else {
                return Err(invalid("expected '/' between steps"));
            };

            let end = step_end(&body);
            let token: String = body.drain(..end).collect();
            if token.is_empty() {
                return Err(invalid("empty step"));
            }
            let test = parse_name_test(&token, namespaces).map_err(|reason| invalid(&reason))?;
            steps.push(Step { axis, test });
        }

        Ok(XmlPath { expr: expr.to_string(), steps })
    }

    pub fn as_str(&self) -> &str {
        &self.expr
    }
}

// End of the leading step; slashes inside a `{uri}` group do not count.
fn step_end(body: &str) -> usize {
    let mut in_uri = false;
    for (i, ch) in body.char_indices() {
        match ch {
            '{' => in_uri = true,
            '}' => in_uri = false,
            '/' if !in_uri => return i,
            _ => {}
        }
    }
    body.len()
}

fn parse_name_test(token: &str, namespaces: &Namespaces) -> std::result::Result<NameTest, String> {
    if token == "*" {
        return Ok(NameTest::Any);
    }
    if let Some(local) = token.strip_prefix("*:").or_else(|| token.strip_prefix("{*}")) {
        return Ok(NameTest::AnyNamespace { local: local.to_string() });
    }
    if let Some(rest) = token.strip_prefix('{') {
        let (uri, local) = rest.split_once('}').ok_or_else(|| "unterminated '{'".to_string())?;
        let namespace = if uri.is_empty() { None } else { Some(uri.to_string()) };
        return Ok(NameTest::Qualified { namespace, local: local.to_string() });
    }
    match token.split_once(':') {
        Some((prefix, local)) => {
            let uri = namespaces
                .get(prefix)
                .ok_or_else(|| format!("unknown prefix '{}'", prefix))?;
            Ok(NameTest::Qualified { namespace: Some(uri.to_string()), local: local.to_string() })
        }
        None => Ok(NameTest::Qualified {
            namespace: namespaces.get("").map(str::to_string),
            local: token.to_string(),
        }),
    }
}
