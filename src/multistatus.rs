//! Serialization of response documents.
//!
//! A document is first built as an [`XmlElement`] tree. Before anything is
//! written, a [`NamespaceRegistry`] walks the tree once and assigns every
//! namespace a prefix in first-seen order (`DAV:` is always `D`, the others
//! `ns1`, `ns2`, ...). The registry is then frozen and all declarations go
//! on the root element, in that order. Some clients read WebDAV XML
//! positionally, so elements are written exactly in construction order.
use bytes::Bytes;
use http::StatusCode;
use xml::common::XmlVersion;
use xml::writer::{EmitterConfig, EventWriter, XmlEvent};

use crate::davpath::DavPath;
use crate::davxml::{PropName, PropValue, XmlElement, XmlNode, NS_DAV_URI};
use crate::DavResult;

/// Namespace URI to prefix mapping for one response document.
#[derive(Debug, Default)]
pub struct NamespaceRegistry {
    entries: Vec<(String, String)>,
    frozen: bool,
}

impl NamespaceRegistry {
    pub fn new() -> NamespaceRegistry {
        NamespaceRegistry::default()
    }

    /// Build the registry for a document and freeze it.
    pub fn for_document(root: &XmlElement) -> NamespaceRegistry {
        let mut reg = NamespaceRegistry::new();
        let mut stack = vec![root];
        while let Some(elem) = stack.pop() {
            reg.register(&elem.namespace);
            // reversed, so that the walk is in document order.
            stack.extend(elem.elements().collect::<Vec<_>>().into_iter().rev());
        }
        reg.freeze();
        reg
    }

    /// Assign a prefix to `uri` if it does not have one yet.
    ///
    /// Panics when a new namespace shows up after the registry was frozen.
    pub fn register(&mut self, uri: &str) -> &str {
        let idx = match self.entries.iter().position(|(u, _)| u == uri) {
            Some(idx) => idx,
            None => {
                assert!(
                    !self.frozen,
                    "namespace {uri} registered after the document root was written"
                );
                let prefix = if uri == NS_DAV_URI {
                    "D".to_string()
                } else {
                    let n = self.entries.iter().filter(|(u, _)| u != NS_DAV_URI).count();
                    format!("ns{}", n + 1)
                };
                self.entries.push((uri.to_string(), prefix));
                self.entries.len() - 1
            }
        };
        &self.entries[idx].1
    }

    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn prefix(&self, uri: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(u, _)| u == uri)
            .map(|(_, p)| p.as_str())
    }

    /// `(prefix, uri)` pairs in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(u, p)| (p.as_str(), u.as_str()))
    }
}

fn write_element<W: std::io::Write>(
    w: &mut EventWriter<W>,
    ns: &NamespaceRegistry,
    elem: &XmlElement,
    decls: &[(String, String)],
) -> DavResult<()> {
    let prefix = ns
        .prefix(&elem.namespace)
        .expect("namespace registry covers the whole document");
    let qname = format!("{}:{}", prefix, elem.name);
    let mut start = XmlEvent::start_element(qname.as_str());
    for (attr, uri) in decls {
        start = start.attr(attr.as_str(), uri.as_str());
    }
    w.write(start)?;
    for child in &elem.children {
        match child {
            XmlNode::Element(e) => write_element(w, ns, e, &[])?,
            XmlNode::Text(t) => w.write(XmlEvent::characters(t))?,
        }
    }
    w.write(XmlEvent::end_element())?;
    Ok(())
}

/// Serialize a complete document, root element first.
pub fn write_document(root: &XmlElement) -> DavResult<Bytes> {
    let ns = NamespaceRegistry::for_document(root);
    // declared as plain attributes to keep them in registration order.
    let decls: Vec<(String, String)> = ns
        .iter()
        .map(|(prefix, uri)| (format!("xmlns:{prefix}"), uri.to_string()))
        .collect();

    let mut buf = Vec::new();
    {
        let mut w = EmitterConfig::new()
            .perform_indent(false)
            .write_document_declaration(false)
            .create_writer(&mut buf);
        w.write(XmlEvent::StartDocument {
            version: XmlVersion::Version10,
            encoding: Some("utf-8"),
            standalone: None,
        })?;
        write_element(&mut w, &ns, root, &decls)?;
    }
    Ok(Bytes::from(buf))
}

pub(crate) fn status_line(status: StatusCode) -> String {
    format!(
        "HTTP/1.1 {} {}",
        status.as_str(),
        status.canonical_reason().unwrap_or("")
    )
}

/// Result for a single property of a single resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropResult {
    pub name: PropName,
    pub outcome: Result<PropValue, StatusCode>,
}

impl PropResult {
    pub fn ok(name: PropName, value: PropValue) -> PropResult {
        PropResult {
            name,
            outcome: Ok(value),
        }
    }

    pub fn err(name: PropName, status: StatusCode) -> PropResult {
        PropResult {
            name,
            outcome: Err(status),
        }
    }

    fn status(&self) -> StatusCode {
        match self.outcome {
            Ok(_) => StatusCode::OK,
            Err(s) => s,
        }
    }
}

/// Body of one `response` element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MsBody {
    Status(StatusCode),
    Props(Vec<PropResult>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsResponse {
    pub path: DavPath,
    pub body: MsBody,
}

/// A 207 Multi-Status body under construction.
#[derive(Debug, Clone, Default)]
pub struct MultiStatus {
    prefix: String,
    responses: Vec<MsResponse>,
}

impl MultiStatus {
    /// `prefix` is put in front of every `href`.
    pub fn new(prefix: impl Into<String>) -> MultiStatus {
        MultiStatus {
            prefix: prefix.into(),
            responses: Vec::new(),
        }
    }

    pub fn push_status(&mut self, path: DavPath, status: StatusCode) {
        self.responses.push(MsResponse {
            path,
            body: MsBody::Status(status),
        });
    }

    pub fn push_props(&mut self, path: DavPath, props: Vec<PropResult>) {
        self.responses.push(MsResponse {
            path,
            body: MsBody::Props(props),
        });
    }

    pub fn responses(&self) -> &[MsResponse] {
        &self.responses
    }

    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }

    fn href(&self, path: &DavPath) -> XmlElement {
        XmlElement::dav("href").with_text(path.with_prefix(&self.prefix))
    }

    fn response_element(&self, resp: &MsResponse) -> XmlElement {
        let mut elem = XmlElement::dav("response").with_child(self.href(&resp.path));
        match &resp.body {
            MsBody::Status(status) => {
                elem.push(XmlElement::dav("status").with_text(status_line(*status)));
            }
            MsBody::Props(props) => {
                // one propstat per status, in first-seen order.
                let mut statuses: Vec<StatusCode> = Vec::new();
                for p in props {
                    if !statuses.contains(&p.status()) {
                        statuses.push(p.status());
                    }
                }
                for status in statuses {
                    let mut prop = XmlElement::dav("prop");
                    for p in props.iter().filter(|p| p.status() == status) {
                        let mut pe = p.name.to_element();
                        if let Ok(value) = &p.outcome {
                            pe.children = value.clone().into_nodes();
                        }
                        prop.push(pe);
                    }
                    elem.push(
                        XmlElement::dav("propstat")
                            .with_child(prop)
                            .with_child(XmlElement::dav("status").with_text(status_line(status))),
                    );
                }
            }
        }
        elem
    }

    pub fn to_element(&self) -> XmlElement {
        let mut root = XmlElement::dav("multistatus");
        for resp in &self.responses {
            root.push(self.response_element(resp));
        }
        root
    }

    /// Serialize the whole document.
    pub fn to_xml(&self) -> DavResult<Bytes> {
        write_document(&self.to_element())
    }
}
