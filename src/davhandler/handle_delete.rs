use http::{Request, Response, StatusCode};

use crate::body::Body;
use crate::conditional::http_precondition;
use crate::davhandler::empty_response;
use crate::davheaders::Depth;
use crate::davpath::DavPath;
use crate::errors::{fserror_to_status, DavError};
use crate::fs::DavTransaction;
use crate::multistatus::{MsBody, MsResponse, MultiStatus};
use crate::txn::with_transaction;
use crate::util::DavMethod;
use crate::DavResult;

impl crate::DavHandler {
    // List a subtree in pre-order: every collection before its members.
    pub(crate) async fn walk_tree(
        &self,
        txn: &dyn DavTransaction,
        root: &DavPath,
    ) -> DavResult<Vec<DavPath>> {
        let mut order = Vec::new();
        let mut stack = vec![root.clone()];
        while let Some(path) = stack.pop() {
            let meta = txn.metadata(&path).await?;
            if meta.is_collection {
                let mut children = txn.children(&path).await?;
                children.sort();
                stack.extend(children.into_iter().rev());
            }
            order.push(path);
        }
        Ok(order)
    }

    // Remove a subtree, members first. Failures are added to `ms`, and
    // the ancestors of a failed member are left alone. Returns what was
    // actually removed.
    pub(crate) async fn delete_tree(
        &self,
        txn: &dyn DavTransaction,
        root: &DavPath,
        ms: &mut MultiStatus,
    ) -> DavResult<Vec<DavPath>> {
        let order = self.walk_tree(txn, root).await?;
        let mut failed: Vec<DavPath> = Vec::new();
        let mut removed = Vec::new();
        for path in order.into_iter().rev() {
            if failed.iter().any(|f| path.is_ancestor_of(f)) {
                continue;
            }
            match txn.remove_resource(&path).await {
                Ok(()) => removed.push(path),
                Err(e) => {
                    debug!("delete {path} failed: {e}");
                    ms.push_status(path.clone(), fserror_to_status(e));
                    failed.push(path);
                }
            }
        }
        Ok(removed)
    }

    // Drop the locks on resources that no longer exist.
    pub(crate) fn drop_locks(&self, removed: &[DavPath]) {
        for path in removed {
            self.ls.remove_locks_at(path);
        }
    }

    pub(crate) async fn handle_delete(
        &self,
        req: &Request<()>,
        path: &DavPath,
    ) -> DavResult<Response<Body>> {
        // RFC4918 9.6.1 DELETE on a collection acts as depth infinity.
        match self.depth(req)? {
            None | Some(Depth::Infinity) => {}
            Some(_) => return Err(DavError::InvalidHeader("Depth")),
        }
        if path.is_root() {
            return Err(DavError::Status(StatusCode::FORBIDDEN));
        }

        let (removed, ms) = with_transaction(&*self.store, |txn| async move {
            let tokens = self.if_tokens(req, &*txn, path).await?;
            let meta = txn.metadata(path).await?;
            if let Some(status) = http_precondition(req, Some(&meta), DavMethod::Delete) {
                return Err(status.into());
            }
            self.ls.check_tree(path, &tokens)?;
            if let Some(parent) = path.parent() {
                self.ls.check_conditional(&parent, &tokens)?;
            }

            let mut ms = self.multistatus();
            let removed = self.delete_tree(&*txn, path, &mut ms).await?;
            // RFC4918 9.6.1: 207 is for failures on members. If only the
            // target failed, answer with its status and keep the members.
            if let [MsResponse {
                path: failed,
                body: MsBody::Status(status),
            }] = ms.responses()
            {
                if failed == path {
                    return Err(DavError::Status(*status));
                }
            }
            Ok((removed, ms))
        })
        .await?;

        self.drop_locks(&removed);
        if ms.is_empty() {
            Ok(empty_response(StatusCode::NO_CONTENT))
        } else {
            self.multistatus_response(ms)
        }
    }
}
