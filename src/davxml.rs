//! XML element model and request body parsing.
//!
//! Request bodies (PROPFIND, PROPPATCH, LOCK) are parsed with `xmltree`
//! and turned into the small typed structures below. Responses are built
//! from [`XmlElement`] trees and serialized by the `multistatus` module.
use std::fmt;

use xmltree::{Element, XMLNode};

use crate::errors::DavError;
use crate::ls::LockScope;
use crate::DavResult;

pub const NS_DAV_URI: &str = "DAV:";

/// An element in a response document. Every element has a namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlElement {
    pub namespace: String,
    pub name: String,
    pub children: Vec<XmlNode>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlNode {
    Element(XmlElement),
    Text(String),
}

impl XmlElement {
    /// Create an element.
    ///
    /// Panics if `namespace` is empty: every element the engine emits must be
    /// namespace-qualified.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> XmlElement {
        let namespace = namespace.into();
        let name = name.into();
        assert!(
            !namespace.is_empty(),
            "xml element <{name}> constructed without a namespace"
        );
        XmlElement {
            namespace,
            name,
            children: Vec::new(),
        }
    }

    /// Create an element in the `DAV:` namespace.
    pub fn dav(name: impl Into<String>) -> XmlElement {
        XmlElement::new(NS_DAV_URI, name)
    }

    pub fn with_text(mut self, text: impl Into<String>) -> XmlElement {
        self.push_text(text);
        self
    }

    pub fn with_child(mut self, child: XmlElement) -> XmlElement {
        self.push(child);
        self
    }

    pub fn push(&mut self, child: XmlElement) {
        self.children.push(XmlNode::Element(child));
    }

    pub fn push_text(&mut self, text: impl Into<String>) {
        self.children.push(XmlNode::Text(text.into()));
    }

    /// Concatenated text of the direct text children.
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|n| match n {
                XmlNode::Text(t) => Some(t.as_str()),
                XmlNode::Element(_) => None,
            })
            .collect()
    }

    /// Direct child elements.
    pub fn elements(&self) -> impl Iterator<Item = &XmlElement> {
        self.children.iter().filter_map(|n| match n {
            XmlNode::Element(e) => Some(e),
            XmlNode::Text(_) => None,
        })
    }
}

/// Name of a property: namespace URI plus local name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PropName {
    pub namespace: String,
    pub name: String,
}

impl PropName {
    /// Panics on an empty namespace, like [`XmlElement::new`].
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> PropName {
        let namespace = namespace.into();
        let name = name.into();
        assert!(!namespace.is_empty(), "property {name} without a namespace");
        PropName { namespace, name }
    }

    pub fn dav(name: impl Into<String>) -> PropName {
        PropName::new(NS_DAV_URI, name)
    }

    /// `href` is live and can never be stored.
    pub fn is_reserved(&self) -> bool {
        self.name == "href"
    }

    pub fn is_dav(&self, name: &str) -> bool {
        self.namespace == NS_DAV_URI && self.name == name
    }

    pub(crate) fn to_element(&self) -> XmlElement {
        XmlElement::new(self.namespace.clone(), self.name.clone())
    }
}

impl fmt::Display for PropName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}{}", self.namespace, self.name)
    }
}

/// Value of a property.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PropValue {
    #[default]
    Empty,
    Text(String),
    /// Structured value: nested elements, possibly mixed with text.
    Xml(Vec<XmlNode>),
}

impl PropValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            PropValue::Text(t) => Some(t),
            _ => None,
        }
    }

    pub(crate) fn into_nodes(self) -> Vec<XmlNode> {
        match self {
            PropValue::Empty => Vec::new(),
            PropValue::Text(t) => vec![XmlNode::Text(t)],
            PropValue::Xml(nodes) => nodes,
        }
    }
}

impl From<&str> for PropValue {
    fn from(s: &str) -> PropValue {
        PropValue::Text(s.to_string())
    }
}

impl From<XmlElement> for PropValue {
    fn from(e: XmlElement) -> PropValue {
        PropValue::Xml(vec![XmlNode::Element(e)])
    }
}

/// What a PROPFIND asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropFind {
    AllProp,
    PropName,
    Prop(Vec<PropName>),
}

/// One instruction from a PROPPATCH body, in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropPatchOp {
    Set(PropName, PropValue),
    Remove(PropName),
}

impl PropPatchOp {
    pub fn name(&self) -> &PropName {
        match self {
            PropPatchOp::Set(name, _) | PropPatchOp::Remove(name) => name,
        }
    }
}

/// Contents of a LOCK request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockInfo {
    pub scope: LockScope,
    pub owner: Option<String>,
}

fn is_blank(body: &[u8]) -> bool {
    body.iter().all(|b| b.is_ascii_whitespace())
}

fn is_dav(elem: &Element, name: &str) -> bool {
    elem.namespace.as_deref() == Some(NS_DAV_URI) && elem.name == name
}

fn child_elements(elem: &Element) -> impl Iterator<Item = &Element> {
    elem.children.iter().filter_map(|n| match n {
        XMLNode::Element(e) => Some(e),
        _ => None,
    })
}

fn dav_child<'a>(elem: &'a Element, name: &str) -> Option<&'a Element> {
    child_elements(elem).find(|e| is_dav(e, name))
}

fn parse_root(body: &[u8], name: &str) -> DavResult<Element> {
    let root = Element::parse(body).map_err(|e| DavError::XmlParse(e.to_string()))?;
    if !is_dav(&root, name) {
        return Err(DavError::XmlParse(format!(
            "expected <DAV:{}>, got <{}>",
            name, root.name
        )));
    }
    Ok(root)
}

fn prop_name(elem: &Element) -> DavResult<PropName> {
    match elem.namespace.as_deref() {
        Some(ns) if !ns.is_empty() => Ok(PropName::new(ns, elem.name.clone())),
        _ => Err(DavError::XmlParse(format!(
            "property <{}> has no namespace",
            elem.name
        ))),
    }
}

fn convert_element(elem: &Element) -> DavResult<XmlElement> {
    let name = prop_name(elem)?;
    let mut out = XmlElement::new(name.namespace, name.name);
    out.children = convert_children(elem)?;
    Ok(out)
}

fn convert_children(elem: &Element) -> DavResult<Vec<XmlNode>> {
    let mut nodes = Vec::new();
    for child in &elem.children {
        match child {
            XMLNode::Element(e) => nodes.push(XmlNode::Element(convert_element(e)?)),
            XMLNode::Text(t) | XMLNode::CData(t) => nodes.push(XmlNode::Text(t.clone())),
            _ => {}
        }
    }
    Ok(nodes)
}

fn prop_value(elem: &Element) -> DavResult<PropValue> {
    let nodes = convert_children(elem)?;
    if nodes.iter().all(|n| matches!(n, XmlNode::Text(_))) {
        let text: String = nodes
            .into_iter()
            .filter_map(|n| match n {
                XmlNode::Text(t) => Some(t),
                XmlNode::Element(_) => None,
            })
            .collect();
        if text.is_empty() {
            return Ok(PropValue::Empty);
        }
        return Ok(PropValue::Text(text));
    }
    // drop inter-element whitespace.
    let nodes = nodes
        .into_iter()
        .filter(|n| !matches!(n, XmlNode::Text(t) if t.trim().is_empty()))
        .collect();
    Ok(PropValue::Xml(nodes))
}

/// Parse a PROPFIND body. An empty body means `allprop`.
pub fn parse_propfind(body: &[u8]) -> DavResult<PropFind> {
    if is_blank(body) {
        return Ok(PropFind::AllProp);
    }
    let root = parse_root(body, "propfind")?;
    for elem in child_elements(&root) {
        if is_dav(elem, "allprop") {
            return Ok(PropFind::AllProp);
        }
        if is_dav(elem, "propname") {
            return Ok(PropFind::PropName);
        }
        if is_dav(elem, "prop") {
            let names = child_elements(elem)
                .map(prop_name)
                .collect::<DavResult<Vec<_>>>()?;
            return Ok(PropFind::Prop(names));
        }
    }
    Err(DavError::XmlParse(
        "propfind without allprop, propname or prop".to_string(),
    ))
}

/// Parse a PROPPATCH body into its set/remove instructions.
pub fn parse_proppatch(body: &[u8]) -> DavResult<Vec<PropPatchOp>> {
    let root = parse_root(body, "propertyupdate")?;
    let mut ops = Vec::new();
    for elem in child_elements(&root) {
        let set = if is_dav(elem, "set") {
            true
        } else if is_dav(elem, "remove") {
            false
        } else {
            continue;
        };
        let prop = dav_child(elem, "prop")
            .ok_or_else(|| DavError::XmlParse(format!("<{}> without <prop>", elem.name)))?;
        for p in child_elements(prop) {
            let name = prop_name(p)?;
            if set {
                ops.push(PropPatchOp::Set(name, prop_value(p)?));
            } else {
                ops.push(PropPatchOp::Remove(name));
            }
        }
    }
    if ops.is_empty() {
        return Err(DavError::XmlParse("empty propertyupdate".to_string()));
    }
    Ok(ops)
}

/// Parse a LOCK body. `None` for an empty body, which is a lock refresh.
pub fn parse_lockinfo(body: &[u8]) -> DavResult<Option<LockInfo>> {
    if is_blank(body) {
        return Ok(None);
    }
    let root = parse_root(body, "lockinfo")?;

    let scope_elem = dav_child(&root, "lockscope")
        .ok_or_else(|| DavError::XmlParse("lockinfo without lockscope".to_string()))?;
    let scope = if dav_child(scope_elem, "exclusive").is_some() {
        LockScope::Exclusive
    } else if dav_child(scope_elem, "shared").is_some() {
        LockScope::Shared
    } else {
        return Err(DavError::XmlParse("unknown lockscope".to_string()));
    };

    let is_write = dav_child(&root, "locktype")
        .map(|t| dav_child(t, "write").is_some())
        .unwrap_or(false);
    if !is_write {
        return Err(DavError::XmlParse("locktype must be write".to_string()));
    }

    let owner = dav_child(&root, "owner").and_then(|o| {
        let text = match dav_child(o, "href") {
            Some(href) => href.get_text().map(|t| t.into_owned()),
            None => o.get_text().map(|t| t.into_owned()),
        };
        text.map(|t| t.trim().to_string()).filter(|t| !t.is_empty())
    });

    Ok(Some(LockInfo { scope, owner }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn propfind_bodies() {
        assert_eq!(parse_propfind(b"").unwrap(), PropFind::AllProp);
        assert_eq!(parse_propfind(b"  \r\n").unwrap(), PropFind::AllProp);

        let body = br#"<?xml version="1.0"?><D:propfind xmlns:D="DAV:"><D:propname/></D:propfind>"#;
        assert_eq!(parse_propfind(body).unwrap(), PropFind::PropName);

        let body = br#"<propfind xmlns="DAV:"><allprop/></propfind>"#;
        assert_eq!(parse_propfind(body).unwrap(), PropFind::AllProp);

        let body = br#"<D:propfind xmlns:D="DAV:" xmlns:Z="urn:z">
            <D:prop><D:getetag/><Z:color/></D:prop>
        </D:propfind>"#;
        assert_eq!(
            parse_propfind(body).unwrap(),
            PropFind::Prop(vec![PropName::dav("getetag"), PropName::new("urn:z", "color")])
        );
    }

    #[test]
    fn propfind_errors() {
        assert!(matches!(
            parse_propfind(b"<D:propfind xmlns:D=\"DAV:\">"),
            Err(DavError::XmlParse(_))
        ));
        assert!(matches!(
            parse_propfind(b"<propfind/>"),
            Err(DavError::XmlParse(_))
        ));
        let body = br#"<D:propfind xmlns:D="DAV:"><D:prop><color/></D:prop></D:propfind>"#;
        assert!(matches!(parse_propfind(body), Err(DavError::XmlParse(_))));
    }

    #[test]
    fn proppatch_body() {
        let body = br#"<?xml version="1.0" encoding="utf-8" ?>
            <D:propertyupdate xmlns:D="DAV:" xmlns:Z="http://ns.example.com/z/">
              <D:set><D:prop>
                <Z:Author>Jim Whitehead</Z:Author>
                <Z:Authors><Z:Author>Roy</Z:Author></Z:Authors>
              </D:prop></D:set>
              <D:remove><D:prop><Z:Copyright-Owner/></D:prop></D:remove>
            </D:propertyupdate>"#;
        let ops = parse_proppatch(body).unwrap();
        assert_eq!(ops.len(), 3);
        assert_eq!(
            ops[0],
            PropPatchOp::Set(
                PropName::new("http://ns.example.com/z/", "Author"),
                PropValue::Text("Jim Whitehead".to_string())
            )
        );
        let nested = XmlElement::new("http://ns.example.com/z/", "Author").with_text("Roy");
        assert_eq!(
            ops[1],
            PropPatchOp::Set(
                PropName::new("http://ns.example.com/z/", "Authors"),
                PropValue::from(nested)
            )
        );
        assert_eq!(
            ops[2],
            PropPatchOp::Remove(PropName::new("http://ns.example.com/z/", "Copyright-Owner"))
        );
    }

    #[test]
    fn lockinfo_body() {
        assert_eq!(parse_lockinfo(b"").unwrap(), None);

        let body = br#"<D:lockinfo xmlns:D="DAV:">
            <D:lockscope><D:exclusive/></D:lockscope>
            <D:locktype><D:write/></D:locktype>
            <D:owner><D:href>http://example.org/~ejw/contact.html</D:href></D:owner>
        </D:lockinfo>"#;
        let info = parse_lockinfo(body).unwrap().unwrap();
        assert_eq!(info.scope, LockScope::Exclusive);
        assert_eq!(
            info.owner.as_deref(),
            Some("http://example.org/~ejw/contact.html")
        );

        let body = br#"<lockinfo xmlns="DAV:"><lockscope><shared/></lockscope>
            <locktype><write/></locktype><owner> litmus </owner></lockinfo>"#;
        let info = parse_lockinfo(body).unwrap().unwrap();
        assert_eq!(info.scope, LockScope::Shared);
        assert_eq!(info.owner.as_deref(), Some("litmus"));

        let body = br#"<lockinfo xmlns="DAV:"><lockscope><shared/></lockscope></lockinfo>"#;
        assert!(parse_lockinfo(body).is_err());
    }

    #[test]
    #[should_panic(expected = "without a namespace")]
    fn element_without_namespace_panics() {
        let _ = XmlElement::new("", "prop");
    }
}
