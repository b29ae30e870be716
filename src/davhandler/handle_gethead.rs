use std::fmt::Write as _;

use headers::HeaderMapExt;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::{Request, Response, StatusCode};

use crate::body::Body;
use crate::conditional::http_precondition;
use crate::davhandler::empty_response;
use crate::davpath::DavPath;
use crate::errors::DavError;
use crate::fs::{DavMetaData, DavTransaction};
use crate::txn::with_transaction;
use crate::util::{systemtime_to_httpdate, DavMethod};
use crate::DavResult;

impl crate::DavHandler {
    pub(crate) async fn handle_get(
        &self,
        req: &Request<()>,
        path: &DavPath,
        method: DavMethod,
    ) -> DavResult<Response<Body>> {
        let head = method == DavMethod::Head;
        with_transaction(&*self.store, |txn| async move {
            let meta = txn.metadata(path).await?;
            if meta.is_collection && !self.autoindex {
                return Err(DavError::Status(StatusCode::METHOD_NOT_ALLOWED));
            }

            if let Some(status) = http_precondition(req, Some(&meta), method) {
                if status != StatusCode::NOT_MODIFIED {
                    return Err(status.into());
                }
                let mut res = empty_response(status);
                validators(&mut res, &meta);
                return Ok(res);
            }

            if meta.is_collection {
                return self.handle_autoindex(&*txn, path, head).await;
            }

            let data = if head {
                None
            } else {
                Some(txn.read_content(path).await?)
            };
            let mut res = Response::new(data.map(Body::from).unwrap_or_default());
            let h = res.headers_mut();
            h.typed_insert(headers::ContentLength(meta.len));
            let ctype = match meta.content_type {
                Some(ref ct) => ct.clone(),
                None => mime_guess::from_path(path.file_name().unwrap_or_default())
                    .first_or_octet_stream()
                    .to_string(),
            };
            if let Ok(ct) = HeaderValue::from_str(&ctype) {
                h.insert(CONTENT_TYPE, ct);
            }
            validators(&mut res, &meta);
            Ok(res)
        })
        .await
    }

    async fn handle_autoindex(
        &self,
        txn: &dyn DavTransaction,
        path: &DavPath,
        head: bool,
    ) -> DavResult<Response<Body>> {
        let mut entries = Vec::new();
        for child in txn.children(path).await? {
            // skip members that vanish or fail; this is only an index.
            if let Ok(meta) = txn.metadata(&child).await {
                entries.push((child, meta));
            }
        }
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let title = htmlescape::encode_minimal(&path.to_string());
        let mut w = String::new();
        let _ = write!(
            w,
            "<html><head><title>Index of {title}</title></head>\n\
             <body><h1>Index of {title}</h1>\n<table>\n\
             <tr><th>Name</th><th>Last modified</th><th>Size</th></tr>\n"
        );
        if let Some(parent) = path.parent() {
            let _ = writeln!(
                w,
                "<tr><td><a href=\"{}\">Parent Directory</a></td><td></td><td>[DIR]</td></tr>",
                htmlescape::encode_minimal(&collection_href(&self.href(&parent)))
            );
        }
        for (child, meta) in &entries {
            let mut name = child.file_name().unwrap_or_default().to_string();
            let mut href = self.href(child);
            if meta.is_collection {
                name.push('/');
                href = collection_href(&href);
            }
            let modified = meta.modified.map(systemtime_to_httpdate).unwrap_or_default();
            let size = if meta.is_collection {
                "[DIR]".to_string()
            } else {
                meta.len.to_string()
            };
            let _ = writeln!(
                w,
                "<tr><td><a href=\"{}\">{}</a></td><td>{}</td><td>{}</td></tr>",
                htmlescape::encode_minimal(&href),
                htmlescape::encode_minimal(&name),
                modified,
                size
            );
        }
        w.push_str("</table></body></html>\n");

        let len = w.len();
        let body = if head { Body::empty() } else { Body::from(w) };
        let mut res = Response::new(body);
        let h = res.headers_mut();
        h.typed_insert(headers::ContentLength(len as u64));
        h.insert(CONTENT_TYPE, HeaderValue::from_static("text/html; charset=utf-8"));
        Ok(res)
    }
}

fn collection_href(href: &str) -> String {
    if href.ends_with('/') {
        href.to_string()
    } else {
        format!("{href}/")
    }
}

// ETag and Last-Modified.
fn validators(res: &mut Response<Body>, meta: &DavMetaData) {
    let h = res.headers_mut();
    if let Some(etag) = meta
        .etag()
        .and_then(|e| format!("\"{e}\"").parse::<headers::ETag>().ok())
    {
        h.typed_insert(etag);
    }
    if let Some(modified) = meta.modified {
        h.typed_insert(headers::LastModified::from(modified));
    }
}
