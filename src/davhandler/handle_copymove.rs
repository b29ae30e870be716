use http::{Request, Response, StatusCode};

use crate::body::Body;
use crate::davhandler::{empty_response, typed_header};
use crate::davheaders::{Depth, Destination, Overwrite};
use crate::davpath::{DavPath, ParseError};
use crate::errors::{fserror_to_status, DavError};
use crate::fs::{DavTransaction, FsError, FsResult};
use crate::multistatus::MultiStatus;
use crate::txn::with_transaction;
use crate::util::DavMethod;
use crate::DavResult;

impl crate::DavHandler {
    // Copy one resource with its dead properties. Returns true for a collection.
    async fn copy_one(
        &self,
        txn: &dyn DavTransaction,
        source: &DavPath,
        dest: &DavPath,
    ) -> FsResult<bool> {
        let meta = txn.metadata(source).await?;
        if meta.is_collection {
            txn.create_collection(dest).await?;
        } else {
            let data = txn.read_content(source).await?;
            txn.write_content(dest, data).await?;
        }
        for (name, value) in txn.get_properties(source).await? {
            match txn.set_property(dest, name, value).await {
                Ok(()) | Err(FsError::NotImplemented) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(meta.is_collection)
    }

    // Copy a subtree using a worklist. A failure on the top resource fails
    // the request; failures below it end up in `ms`.
    async fn copy_tree(
        &self,
        txn: &dyn DavTransaction,
        source: &DavPath,
        dest: &DavPath,
        depth: Depth,
        ms: &mut MultiStatus,
    ) -> DavResult<()> {
        let mut work = vec![(source.clone(), dest.clone())];
        while let Some((s, d)) = work.pop() {
            match self.copy_one(txn, &s, &d).await {
                Ok(true) if depth == Depth::Infinity => {
                    let mut children = txn.children(&s).await?;
                    children.sort();
                    for child in children.into_iter().rev() {
                        if let Some(target) = child.rebase(&s, &d) {
                            work.push((child, target));
                        }
                    }
                }
                Ok(_) => {}
                Err(e) if &s == source => return Err(e.into()),
                Err(e) => {
                    debug!("copy {s} -> {d} failed: {e}");
                    ms.push_status(d, fserror_to_status(e));
                }
            }
        }
        Ok(())
    }

    pub(crate) async fn handle_copymove(
        &self,
        req: &Request<()>,
        path: &DavPath,
        method: DavMethod,
    ) -> DavResult<Response<Body>> {
        let is_move = method == DavMethod::Move;

        let Destination(dest) = typed_header::<Destination>(req, "Destination")?
            .ok_or(DavError::InvalidHeader("Destination"))?;
        let dest = match DavPath::from_url_and_prefix(&dest, &self.prefix) {
            Ok(dest) => dest,
            // somewhere we do not serve.
            Err(ParseError::PrefixMismatch) => {
                return Err(DavError::Status(StatusCode::BAD_GATEWAY));
            }
            Err(e) => return Err(e.into()),
        };

        let depth = match self.depth(req)? {
            None | Some(Depth::Infinity) => Depth::Infinity,
            Some(Depth::Zero) if !is_move => Depth::Zero,
            Some(_) => return Err(DavError::InvalidHeader("Depth")),
        };
        let overwrite = typed_header::<Overwrite>(req, "Overwrite")?
            .map(|o| o.0)
            .unwrap_or(true);

        // source and destination may not overlap.
        if dest == *path || path.is_ancestor_of(&dest) || dest.is_ancestor_of(path) {
            return Err(DavError::Status(StatusCode::FORBIDDEN));
        }
        if (is_move && path.is_root()) || dest.is_root() {
            return Err(DavError::Status(StatusCode::FORBIDDEN));
        }

        let dest = &dest;
        let (existed, removed, ms) = with_transaction(&*self.store, |txn| async move {
            let tokens = self.if_tokens(req, &*txn, path).await?;
            txn.metadata(path).await?;

            if !self.has_parent(&*txn, dest).await {
                return Err(DavError::Status(StatusCode::CONFLICT));
            }
            let existed = self.metadata_opt(&*txn, dest).await?.is_some();
            if existed && !overwrite {
                return Err(DavError::Status(StatusCode::CONFLICT));
            }

            // locks on the destination side.
            if existed {
                self.ls.check_tree(dest, &tokens)?;
            } else {
                self.ls.check_conditional(dest, &tokens)?;
            }
            if let Some(parent) = dest.parent() {
                self.ls.check_conditional(&parent, &tokens)?;
            }
            // and on the source side, which a move removes.
            if is_move {
                self.ls.check_tree(path, &tokens)?;
                if let Some(parent) = path.parent() {
                    self.ls.check_conditional(&parent, &tokens)?;
                }
            }

            let mut ms = self.multistatus();
            let mut removed = Vec::new();
            if existed {
                removed = self.delete_tree(&*txn, dest, &mut ms).await?;
                if !ms.is_empty() {
                    return Ok((existed, removed, ms));
                }
            }

            self.copy_tree(&*txn, path, dest, depth, &mut ms).await?;
            // keep the source if anything was not copied.
            if is_move && ms.is_empty() {
                removed.extend(self.delete_tree(&*txn, path, &mut ms).await?);
            }
            Ok((existed, removed, ms))
        })
        .await?;

        self.drop_locks(&removed);
        if !ms.is_empty() {
            return self.multistatus_response(ms);
        }
        Ok(empty_response(if existed {
            StatusCode::NO_CONTENT
        } else {
            StatusCode::CREATED
        }))
    }
}
