//! Evaluation of conditional request headers.
//!
//! Two independent mechanisms live here: the plain HTTP preconditions
//! (`If-Match` and friends, RFC 7232) and the WebDAV `If` header, which
//! also carries the lock tokens a client submits.
use headers::HeaderMapExt;
use http::{Request, StatusCode};

use crate::davheaders::{If, IfItem, IfList};
use crate::davpath::DavPath;
use crate::errors::DavError;
use crate::fs::{DavMetaData, DavTransaction};
use crate::ls::LockManager;
use crate::util::DavMethod;
use crate::DavResult;

fn etag_header(meta: &DavMetaData) -> Option<headers::ETag> {
    meta.etag()
        .and_then(|e| format!("\"{e}\"").parse::<headers::ETag>().ok())
}

/// Check the HTTP precondition headers against the current state of the
/// resource (`None` if it does not exist).
///
/// Returns the status to respond with when a precondition fails:
/// 304 for a failed `If-None-Match`/`If-Modified-Since` on GET and HEAD,
/// 412 in every other case.
pub(crate) fn http_precondition(
    req: &Request<()>,
    meta: Option<&DavMetaData>,
    method: DavMethod,
) -> Option<StatusCode> {
    let headers = req.headers();
    let etag = meta.and_then(etag_header);
    let modified = meta.and_then(|m| m.modified);
    let is_read = matches!(method, DavMethod::Get | DavMethod::Head);

    if let Some(im) = headers.typed_get::<headers::IfMatch>() {
        let pass = match (meta, &etag) {
            (None, _) => false,
            (Some(_), Some(etag)) => im.precondition_passes(etag),
            (Some(_), None) => im.is_any(),
        };
        if !pass {
            trace!("If-Match failed");
            return Some(StatusCode::PRECONDITION_FAILED);
        }
    } else if let Some(ius) = headers.typed_get::<headers::IfUnmodifiedSince>() {
        if let Some(modified) = modified {
            if !ius.precondition_passes(modified) {
                trace!("If-Unmodified-Since failed");
                return Some(StatusCode::PRECONDITION_FAILED);
            }
        }
    }

    if let Some(inm) = headers.typed_get::<headers::IfNoneMatch>() {
        let pass = match (meta, &etag) {
            (None, _) => true,
            (Some(_), Some(etag)) => inm.precondition_passes(etag),
            (Some(_), None) => inm != headers::IfNoneMatch::any(),
        };
        if !pass {
            trace!("If-None-Match failed");
            return Some(if is_read {
                StatusCode::NOT_MODIFIED
            } else {
                StatusCode::PRECONDITION_FAILED
            });
        }
    } else if is_read {
        if let (Some(ims), Some(modified)) = (headers.typed_get::<headers::IfModifiedSince>(), modified) {
            if !ims.is_modified(modified) {
                return Some(StatusCode::NOT_MODIFIED);
            }
        }
    }
    None
}

// compare entity tags, ignoring weakness and quotes.
fn etag_matches(submitted: &str, meta: Option<&DavMetaData>) -> bool {
    let submitted = submitted.trim_start_matches("W/").trim_matches('"');
    match meta.and_then(|m| m.etag()) {
        Some(etag) => etag == submitted,
        None => false,
    }
}

async fn list_holds(
    list: &IfList,
    txn: &dyn DavTransaction,
    ls: &LockManager,
    prefix: &str,
    path: &DavPath,
) -> bool {
    let resource = match list.resource_tag {
        Some(ref tag) => match DavPath::from_url_and_prefix(tag, prefix) {
            Ok(p) => p,
            Err(_) => return false,
        },
        None => path.clone(),
    };
    let mut meta = None;
    for cond in &list.conditions {
        let matched = match cond.item {
            // a token matches if its lock protects the resource, or is
            // rooted inside it when the resource is a collection.
            IfItem::StateToken(ref token) => ls
                .find(token)
                .map(|l| l.covers(&resource) || resource.is_ancestor_of(&l.path))
                .unwrap_or(false),
            IfItem::ETag(ref etag) => {
                if meta.is_none() {
                    meta = Some(txn.metadata(&resource).await.ok());
                }
                etag_matches(etag, meta.as_ref().and_then(|m| m.as_ref()))
            }
        };
        if matched == cond.not {
            return false;
        }
    }
    true
}

/// Evaluate the `If` header of a request against `path`.
///
/// Without an `If` header no tokens are submitted. Otherwise the header
/// holds if any one of its lists holds, and the state tokens of all
/// lists that hold are returned. A header where no list holds fails the
/// request with 412.
pub(crate) async fn if_header_tokens(
    req: &Request<()>,
    txn: &dyn DavTransaction,
    ls: &LockManager,
    prefix: &str,
    path: &DavPath,
) -> DavResult<Vec<String>> {
    if !req.headers().contains_key("if") {
        return Ok(Vec::new());
    }
    let If(lists) = req
        .headers()
        .typed_get::<If>()
        .ok_or(DavError::InvalidHeader("If"))?;

    let mut tokens = Vec::new();
    let mut any = false;
    for list in &lists {
        if !list_holds(list, txn, ls, prefix, path).await {
            continue;
        }
        any = true;
        for cond in list.conditions.iter().filter(|c| !c.not) {
            if let IfItem::StateToken(ref t) = cond.item {
                if !tokens.contains(t) {
                    tokens.push(t.clone());
                }
            }
        }
    }
    if !any {
        debug!("If header not satisfied for {path}");
        return Err(DavError::PreconditionFailed);
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, UNIX_EPOCH};

    use super::*;
    use crate::fs::DavStore;
    use crate::ls::{LockDepth, LockScope};
    use crate::memfs::MemFs;

    fn req(headers: &[(&str, &str)]) -> Request<()> {
        let mut b = Request::builder().uri("/a");
        for (k, v) in headers {
            b = b.header(*k, *v);
        }
        b.body(()).unwrap()
    }

    fn meta() -> DavMetaData {
        let mut m = DavMetaData::file(3);
        m.etag = Some("abc".to_string());
        m.modified = Some(UNIX_EPOCH + Duration::from_secs(1_000_000));
        m
    }

    #[test]
    fn http_if_match() {
        let m = meta();
        let r = req(&[("If-Match", "\"abc\"")]);
        assert_eq!(http_precondition(&r, Some(&m), DavMethod::Put), None);
        let r = req(&[("If-Match", "\"xyz\"")]);
        assert_eq!(
            http_precondition(&r, Some(&m), DavMethod::Put),
            Some(StatusCode::PRECONDITION_FAILED)
        );
        let r = req(&[("If-Match", "*")]);
        assert_eq!(
            http_precondition(&r, None, DavMethod::Put),
            Some(StatusCode::PRECONDITION_FAILED)
        );
    }

    #[test]
    fn http_if_none_match() {
        let m = meta();
        let r = req(&[("If-None-Match", "\"abc\"")]);
        assert_eq!(
            http_precondition(&r, Some(&m), DavMethod::Get),
            Some(StatusCode::NOT_MODIFIED)
        );
        assert_eq!(
            http_precondition(&r, Some(&m), DavMethod::Delete),
            Some(StatusCode::PRECONDITION_FAILED)
        );
        let r = req(&[("If-None-Match", "*")]);
        assert_eq!(http_precondition(&r, None, DavMethod::Put), None);
    }

    #[tokio::test]
    async fn if_header_any_list() {
        let fs = MemFs::new();
        let txn = fs.begin().await.unwrap();
        let ls = LockManager::new();
        let path = DavPath::normalize("/a").unwrap();
        let lock = ls
            .acquire(&path, LockDepth::Zero, LockScope::Exclusive, None, None)
            .unwrap();

        // no header, no tokens.
        let tokens = if_header_tokens(&req(&[]), &*txn, &ls, "", &path).await.unwrap();
        assert!(tokens.is_empty());

        // first list fails, second holds.
        let h = format!("(<urn:bogus>) (<{}>)", lock.token);
        let tokens = if_header_tokens(&req(&[("If", &h)]), &*txn, &ls, "", &path)
            .await
            .unwrap();
        assert_eq!(tokens, vec![lock.token.clone()]);

        // Not inverts.
        let h = format!("(Not <{}>)", lock.token);
        let res = if_header_tokens(&req(&[("If", &h)]), &*txn, &ls, "", &path).await;
        assert!(matches!(res, Err(DavError::PreconditionFailed)));

        // a tagged list for another resource the lock does not cover.
        let h = format!("</b> (<{}>)", lock.token);
        let res = if_header_tokens(&req(&[("If", &h)]), &*txn, &ls, "", &path).await;
        assert!(matches!(res, Err(DavError::PreconditionFailed)));

        let res = if_header_tokens(&req(&[("If", "garbage")]), &*txn, &ls, "", &path).await;
        assert!(matches!(res, Err(DavError::InvalidHeader("If"))));
    }
}
