use bytes::Bytes;
use http::header::{HeaderValue, LOCATION};
use http::{Request, Response, StatusCode};

use crate::body::Body;
use crate::conditional::http_precondition;
use crate::davhandler::empty_response;
use crate::davpath::DavPath;
use crate::errors::DavError;
use crate::txn::with_transaction;
use crate::util::DavMethod;
use crate::DavResult;

impl crate::DavHandler {
    pub(crate) async fn handle_put(
        &self,
        req: &Request<()>,
        path: &DavPath,
        body: Bytes,
    ) -> DavResult<Response<Body>> {
        with_transaction(&*self.store, |txn| async move {
            let tokens = self.if_tokens(req, &*txn, path).await?;
            let meta = self.metadata_opt(&*txn, path).await?;
            if meta.as_ref().map(|m| m.is_collection).unwrap_or(false) {
                return Err(DavError::Status(StatusCode::METHOD_NOT_ALLOWED));
            }
            if let Some(status) = http_precondition(req, meta.as_ref(), DavMethod::Put) {
                return Err(status.into());
            }

            self.ls.check_conditional(path, &tokens)?;
            let created = meta.is_none();
            if created {
                // a new member changes the parent collection.
                if let Some(parent) = path.parent() {
                    self.ls.check_conditional(&parent, &tokens)?;
                }
                if !self.has_parent(&*txn, path).await {
                    return Err(DavError::Status(StatusCode::CONFLICT));
                }
            }

            trace!("put {} bytes to {path}", body.len());
            txn.write_content(path, body).await?;

            if created {
                let mut res = empty_response(StatusCode::CREATED);
                if let Ok(loc) = HeaderValue::from_str(&self.href(path)) {
                    res.headers_mut().insert(LOCATION, loc);
                }
                Ok(res)
            } else {
                Ok(empty_response(StatusCode::NO_CONTENT))
            }
        })
        .await
    }
}
