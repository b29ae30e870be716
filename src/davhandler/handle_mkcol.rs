use http::header::{HeaderValue, LOCATION};
use http::{Request, Response, StatusCode};

use crate::body::Body;
use crate::davhandler::empty_response;
use crate::davpath::DavPath;
use crate::errors::DavError;
use crate::txn::with_transaction;
use crate::DavResult;

impl crate::DavHandler {
    pub(crate) async fn handle_mkcol(
        &self,
        req: &Request<()>,
        path: &DavPath,
    ) -> DavResult<Response<Body>> {
        with_transaction(&*self.store, |txn| async move {
            let tokens = self.if_tokens(req, &*txn, path).await?;
            if self.metadata_opt(&*txn, path).await?.is_some() {
                return Err(DavError::Status(StatusCode::METHOD_NOT_ALLOWED));
            }
            self.ls.check_conditional(path, &tokens)?;
            if let Some(parent) = path.parent() {
                self.ls.check_conditional(&parent, &tokens)?;
            }
            if !self.has_parent(&*txn, path).await {
                return Err(DavError::Status(StatusCode::CONFLICT));
            }
            txn.create_collection(path).await?;

            let mut res = empty_response(StatusCode::CREATED);
            if let Ok(loc) = HeaderValue::from_str(&self.href(path)) {
                res.headers_mut().insert(LOCATION, loc);
            }
            Ok(res)
        })
        .await
    }
}
