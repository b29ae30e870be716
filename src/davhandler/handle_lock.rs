use std::time::{Duration, SystemTime};

use bytes::Bytes;
use headers::HeaderMapExt;
use http::{Request, Response, StatusCode};

use crate::body::Body;
use crate::davhandler::{empty_response, typed_header, xml_response};
use crate::davheaders::{Depth, LockToken, Timeout};
use crate::davpath::DavPath;
use crate::davxml::{self, LockInfo, XmlElement};
use crate::errors::DavError;
use crate::ls::{DavLock, LockDepth, LockScope};
use crate::multistatus::write_document;
use crate::txn::with_transaction;
use crate::DavResult;

impl crate::DavHandler {
    /// The `DAV:activelock` element describing `lock`.
    pub(crate) fn activelock(&self, lock: &DavLock) -> XmlElement {
        let scope = match lock.scope {
            LockScope::Exclusive => "exclusive",
            LockScope::Shared => "shared",
        };
        let depth = match lock.depth {
            LockDepth::Zero => "0",
            LockDepth::Infinity => "infinity",
        };
        let timeout = match lock.remaining(SystemTime::now()) {
            Some(secs) => format!("Second-{secs}"),
            None => "Infinite".to_string(),
        };

        let mut elem = XmlElement::dav("activelock")
            .with_child(XmlElement::dav("locktype").with_child(XmlElement::dav("write")))
            .with_child(XmlElement::dav("lockscope").with_child(XmlElement::dav(scope)))
            .with_child(XmlElement::dav("depth").with_text(depth));
        if let Some(ref owner) = lock.owner {
            elem.push(XmlElement::dav("owner").with_text(owner.clone()));
        }
        elem.with_child(XmlElement::dav("timeout").with_text(timeout))
            .with_child(
                XmlElement::dav("locktoken")
                    .with_child(XmlElement::dav("href").with_text(lock.token.clone())),
            )
            .with_child(
                XmlElement::dav("lockroot")
                    .with_child(XmlElement::dav("href").with_text(self.href(&lock.path))),
            )
    }

    // <D:prop><D:lockdiscovery>..</D:lockdiscovery></D:prop>
    fn lockdiscovery(&self, lock: &DavLock) -> DavResult<Bytes> {
        let doc = XmlElement::dav("prop")
            .with_child(XmlElement::dav("lockdiscovery").with_child(self.activelock(lock)));
        write_document(&doc)
    }

    // requested timeout, capped by the configured maximum.
    fn lock_timeout(&self, req: &Request<()>) -> DavResult<Option<Duration>> {
        let requested = typed_header::<Timeout>(req, "Timeout")?
            .and_then(|t| t.0.first().copied())
            .and_then(|t| t.as_duration());
        Ok(match (requested, self.max_lock_timeout) {
            (Some(t), Some(max)) => Some(t.min(max)),
            (None, max) => max,
            (t, None) => t,
        })
    }

    pub(crate) async fn handle_lock(
        &self,
        req: &Request<()>,
        path: &DavPath,
        body: &[u8],
    ) -> DavResult<Response<Body>> {
        let depth = match self.depth(req)? {
            None | Some(Depth::Infinity) => LockDepth::Infinity,
            Some(Depth::Zero) => LockDepth::Zero,
            Some(Depth::One) => return Err(DavError::InvalidHeader("Depth")),
        };
        let timeout = self.lock_timeout(req)?;

        match davxml::parse_lockinfo(body)? {
            None => self.refresh_lock(req, path, timeout).await,
            Some(info) => self.create_lock(req, path, depth, timeout, info).await,
        }
    }

    // a LOCK without a body refreshes the lock named in the If header.
    async fn refresh_lock(
        &self,
        req: &Request<()>,
        path: &DavPath,
        timeout: Option<Duration>,
    ) -> DavResult<Response<Body>> {
        let lock = with_transaction(&*self.store, |txn| async move {
            let tokens = self.if_tokens(req, &*txn, path).await?;
            let token = tokens
                .iter()
                .find(|t| self.ls.find(t).map(|l| l.covers(path)).unwrap_or(false))
                .ok_or(DavError::PreconditionFailed)?;
            Ok(self.ls.refresh(token, timeout)?)
        })
        .await?;
        debug!("refreshed lock {} on {}", lock.token, lock.path);
        Ok(xml_response(StatusCode::OK, self.lockdiscovery(&lock)?))
    }

    async fn create_lock(
        &self,
        req: &Request<()>,
        path: &DavPath,
        depth: LockDepth,
        timeout: Option<Duration>,
        info: LockInfo,
    ) -> DavResult<Response<Body>> {
        let owner = info
            .owner
            .or_else(|| self.principal.as_ref().map(|p| p.to_string()));

        let lock = self.ls.acquire(path, depth, info.scope, owner, timeout)?;
        let lock = &lock;

        let res = with_transaction(&*self.store, |txn| async move {
            let tokens = self.if_tokens(req, &*txn, path).await?;
            if self.metadata_opt(&*txn, path).await?.is_some() {
                return Ok(false);
            }
            // locking an unmapped URL creates an empty resource.
            if !self.has_parent(&*txn, path).await {
                return Err(DavError::Status(StatusCode::CONFLICT));
            }
            if let Some(parent) = path.parent() {
                self.ls.check_conditional(&parent, &tokens)?;
            }
            txn.write_content(path, Bytes::new()).await?;
            Ok(true)
        })
        .await;

        let created = match res {
            Ok(created) => created,
            Err(e) => {
                if let Err(re) = self.ls.release(&lock.token) {
                    debug!("release of {} after failed LOCK: {re}", lock.token);
                }
                return Err(e);
            }
        };

        let status = if created {
            StatusCode::CREATED
        } else {
            StatusCode::OK
        };
        let mut res = xml_response(status, self.lockdiscovery(lock)?);
        res.headers_mut()
            .typed_insert(LockToken(lock.token.clone()));
        Ok(res)
    }

    pub(crate) async fn handle_unlock(
        &self,
        req: &Request<()>,
        path: &DavPath,
    ) -> DavResult<Response<Body>> {
        let LockToken(token) = typed_header::<LockToken>(req, "Lock-Token")?
            .ok_or(DavError::InvalidHeader("Lock-Token"))?;
        let token = &token;

        with_transaction(&*self.store, |_txn| async move {
            match self.ls.find(token) {
                Some(lock) if lock.covers(path) => {
                    self.ls.release(token)?;
                    debug!("unlocked {token} on {path}");
                    Ok(empty_response(StatusCode::NO_CONTENT))
                }
                _ => Err(DavError::Status(StatusCode::CONFLICT)),
            }
        })
        .await
    }
}
