use http::{Request, Response, StatusCode};

use crate::body::Body;
use crate::davheaders::Depth;
use crate::davpath::DavPath;
use crate::davxml::{
    self, PropFind, PropName, PropPatchOp, PropValue, XmlElement, XmlNode, NS_DAV_URI,
};
use crate::errors::fserror_to_status;
use crate::fs::{DavMetaData, DavTransaction, FsError};
use crate::multistatus::PropResult;
use crate::txn::with_transaction;
use crate::util::{systemtime_to_httpdate, systemtime_to_rfc3339};
use crate::DavResult;

// Live properties, computed from metadata and the lock table.
const LIVE_PROPS: &[&str] = &[
    "creationdate",
    "getcontentlength",
    "getcontenttype",
    "getetag",
    "getlastmodified",
    "resourcetype",
    "lockdiscovery",
    "supportedlock",
];

// Properties a client can never set or remove.
fn is_protected(name: &PropName) -> bool {
    name.is_reserved() || (name.namespace == NS_DAV_URI && LIVE_PROPS.contains(&name.name.as_str()))
}

impl crate::DavHandler {
    // Value of a live property, `None` if it does not apply to this resource.
    fn live_prop(&self, path: &DavPath, meta: &DavMetaData, name: &str) -> Option<PropValue> {
        let value = match name {
            "creationdate" => PropValue::Text(systemtime_to_rfc3339(meta.created?)),
            "getcontentlength" if !meta.is_collection => PropValue::Text(meta.len.to_string()),
            "getcontenttype" if !meta.is_collection => {
                let ct = match meta.content_type {
                    Some(ref ct) => ct.clone(),
                    None => mime_guess::from_path(path.file_name().unwrap_or_default())
                        .first_or_octet_stream()
                        .to_string(),
                };
                PropValue::Text(ct)
            }
            "getetag" => PropValue::Text(format!("\"{}\"", meta.etag()?)),
            "getlastmodified" => PropValue::Text(systemtime_to_httpdate(meta.modified?)),
            "resourcetype" if meta.is_collection => XmlElement::dav("collection").into(),
            "resourcetype" => PropValue::Empty,
            "lockdiscovery" => {
                let locks = self.ls.locks_covering(path);
                let nodes = locks
                    .iter()
                    .map(|l| XmlNode::Element(self.activelock(l)))
                    .collect();
                PropValue::Xml(nodes)
            }
            "supportedlock" => PropValue::Xml(
                ["exclusive", "shared"]
                    .iter()
                    .map(|scope| {
                        XmlNode::Element(
                            XmlElement::dav("lockentry")
                                .with_child(
                                    XmlElement::dav("lockscope").with_child(XmlElement::dav(*scope)),
                                )
                                .with_child(
                                    XmlElement::dav("locktype").with_child(XmlElement::dav("write")),
                                ),
                        )
                    })
                    .collect(),
            ),
            _ => return None,
        };
        Some(value)
    }

    async fn props_for(
        &self,
        txn: &dyn DavTransaction,
        path: &DavPath,
        meta: &DavMetaData,
        find: &PropFind,
    ) -> DavResult<Vec<PropResult>> {
        let mut props = Vec::new();
        match find {
            PropFind::AllProp | PropFind::PropName => {
                let names_only = matches!(find, PropFind::PropName);
                for name in LIVE_PROPS {
                    if let Some(value) = self.live_prop(path, meta, name) {
                        let value = if names_only { PropValue::Empty } else { value };
                        props.push(PropResult::ok(PropName::dav(*name), value));
                    }
                }
                for (name, value) in txn.get_properties(path).await? {
                    let value = if names_only { PropValue::Empty } else { value };
                    props.push(PropResult::ok(name, value));
                }
            }
            PropFind::Prop(names) => {
                for name in names {
                    if name.namespace == NS_DAV_URI {
                        if name.name == "href" {
                            props.push(PropResult::ok(
                                name.clone(),
                                PropValue::Text(self.href(path)),
                            ));
                            continue;
                        }
                        if LIVE_PROPS.contains(&name.name.as_str()) {
                            props.push(match self.live_prop(path, meta, &name.name) {
                                Some(value) => PropResult::ok(name.clone(), value),
                                None => PropResult::err(name.clone(), StatusCode::NOT_FOUND),
                            });
                            continue;
                        }
                    }
                    props.push(match txn.get_property(path, name).await {
                        Ok(value) => PropResult::ok(name.clone(), value),
                        Err(FsError::NotFound) | Err(FsError::NotImplemented) => {
                            PropResult::err(name.clone(), StatusCode::NOT_FOUND)
                        }
                        Err(e) => PropResult::err(name.clone(), fserror_to_status(e)),
                    });
                }
            }
        }
        Ok(props)
    }

    pub(crate) async fn handle_propfind(
        &self,
        req: &Request<()>,
        path: &DavPath,
        body: &[u8],
    ) -> DavResult<Response<Body>> {
        let depth = self.depth(req)?.unwrap_or(Depth::Infinity);
        let find = davxml::parse_propfind(body)?;
        let find = &find;

        with_transaction(&*self.store, |txn| async move {
            let meta = txn.metadata(path).await?;
            let mut ms = self.multistatus();

            // depth-first, each collection before its members.
            let mut stack = vec![(path.clone(), meta, 0usize)];
            while let Some((p, meta, level)) = stack.pop() {
                let props = self.props_for(&*txn, &p, &meta, find).await?;
                ms.push_props(p.clone(), props);

                let descend = match depth {
                    Depth::Zero => false,
                    Depth::One => level == 0,
                    Depth::Infinity => true,
                };
                if meta.is_collection && descend {
                    let mut children = txn.children(&p).await?;
                    children.sort();
                    let mut members = Vec::new();
                    for child in children {
                        match txn.metadata(&child).await {
                            Ok(m) => members.push((child, m, level + 1)),
                            Err(e) => debug!("propfind: skipping {child}: {e}"),
                        }
                    }
                    stack.extend(members.into_iter().rev());
                }
            }
            self.multistatus_response(ms)
        })
        .await
    }

    pub(crate) async fn handle_proppatch(
        &self,
        req: &Request<()>,
        path: &DavPath,
        body: &[u8],
    ) -> DavResult<Response<Body>> {
        let ops = davxml::parse_proppatch(body)?;

        with_transaction(&*self.store, |txn| async move {
            let tokens = self.if_tokens(req, &*txn, path).await?;
            txn.metadata(path).await?;
            self.ls.check_conditional(path, &tokens)?;

            let mut results = Vec::new();
            if ops.iter().any(|op| is_protected(op.name())) {
                // all or nothing: apply none of them.
                for op in &ops {
                    let status = if is_protected(op.name()) {
                        StatusCode::FORBIDDEN
                    } else {
                        StatusCode::FAILED_DEPENDENCY
                    };
                    results.push(PropResult::err(op.name().clone(), status));
                }
            } else {
                // a store failure aborts, and the transaction rolls back
                // the operations applied before it.
                for op in ops {
                    match op {
                        PropPatchOp::Set(name, value) => {
                            txn.set_property(path, name.clone(), value).await?;
                            results.push(PropResult::ok(name, PropValue::Empty));
                        }
                        PropPatchOp::Remove(name) => {
                            txn.remove_property(path, &name).await?;
                            results.push(PropResult::ok(name, PropValue::Empty));
                        }
                    }
                }
            }

            let mut ms = self.multistatus();
            ms.push_props(path.clone(), results);
            self.multistatus_response(ms)
        })
        .await
    }
}
