use headers::HeaderMapExt;
use http::header::HeaderValue;
use http::{Request, Response};

use crate::body::Body;
use crate::davpath::DavPath;
use crate::txn::with_transaction;
use crate::util::DavMethod;
use crate::DavResult;

impl crate::DavHandler {
    pub(crate) async fn handle_options(
        &self,
        _req: &Request<()>,
        path: &DavPath,
    ) -> DavResult<Response<Body>> {
        let meta = with_transaction(&*self.store, |txn| async move {
            self.metadata_opt(&*txn, path).await
        })
        .await?;

        let mut res = Response::new(Body::empty());
        let h = res.headers_mut();
        h.insert("DAV", HeaderValue::from_static("1,2"));
        h.insert("MS-Author-Via", HeaderValue::from_static("DAV"));
        h.typed_insert(headers::ContentLength(0));

        // Helper to add method to array if method is in fact allowed.
        let mm = |v: &mut Vec<&'static str>, m: DavMethod| {
            if self.allow.contains_method(m) {
                v.push(m.as_str());
            }
        };

        let mut v = Vec::new();
        match meta {
            None => {
                mm(&mut v, DavMethod::Options);
                mm(&mut v, DavMethod::MkCol);
                mm(&mut v, DavMethod::Put);
                mm(&mut v, DavMethod::Lock);
            }
            Some(meta) => {
                if !meta.is_collection || self.autoindex {
                    mm(&mut v, DavMethod::Head);
                    mm(&mut v, DavMethod::Get);
                }
                if !meta.is_collection {
                    mm(&mut v, DavMethod::Put);
                }
                mm(&mut v, DavMethod::Options);
                mm(&mut v, DavMethod::PropFind);
                mm(&mut v, DavMethod::PropPatch);
                mm(&mut v, DavMethod::Copy);
                if !path.is_root() {
                    mm(&mut v, DavMethod::Move);
                    mm(&mut v, DavMethod::Delete);
                }
                mm(&mut v, DavMethod::Lock);
                mm(&mut v, DavMethod::Unlock);
            }
        }

        if let Ok(allow) = HeaderValue::from_str(&v.join(",")) {
            res.headers_mut().insert("allow", allow);
        }
        Ok(res)
    }
}
