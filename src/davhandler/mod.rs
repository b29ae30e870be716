//
// This module contains the main entry point of the library,
// DavHandler.
//
use std::error::Error as StdError;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use futures_util::stream::Stream;
use headers::{Header, HeaderMapExt};
use http::header::{HeaderValue, CONNECTION, CONTENT_LENGTH, CONTENT_TYPE};
use http::{Request, Response, StatusCode};
use http_body::Body as HttpBody;

use crate::body::{Body, StreamBody};
use crate::conditional;
use crate::davheaders::Depth;
use crate::davpath::DavPath;
use crate::errors::DavError;
use crate::fs::{DavStore, DavTransaction, FsError};
use crate::ls::LockManager;
use crate::multistatus::MultiStatus;
use crate::util::{dav_method, dav_xml_error, DavMethod, DavMethodSet};
use crate::DavResult;

mod handle_copymove;
mod handle_delete;
mod handle_gethead;
mod handle_lock;
mod handle_mkcol;
mod handle_options;
mod handle_props;
mod handle_put;

/// Default cap on XML request bodies.
pub const DEFAULT_MAX_BODY_SIZE: usize = 65536;

const XML_CONTENT_TYPE: &str = "application/xml; charset=utf-8";

/// Configuration of the handler.
#[derive(Clone)]
pub struct DavBuilder {
    /// Prefix to be stripped off when handling request.
    prefix: String,
    /// Store backend.
    store: Arc<dyn DavStore>,
    /// Lock table. A fresh one is created if none is set.
    ls: Option<Arc<LockManager>>,
    /// Set of allowed methods (Defaults to "all methods")
    allow: DavMethodSet,
    /// Principal is webdav speak for "user", used to give locks an owner.
    principal: Option<String>,
    /// Does GET on a collection return an index.
    autoindex: bool,
    /// Maximum size of an XML request body.
    max_body_size: usize,
    /// Upper bound for lock timeouts. `None` allows infinite locks.
    max_lock_timeout: Option<Duration>,
}

impl DavBuilder {
    /// Create a new configuration builder.
    pub fn new(store: impl DavStore + 'static) -> DavBuilder {
        Self {
            prefix: String::new(),
            store: Arc::new(store),
            ls: None,
            allow: DavMethodSet::all(),
            principal: None,
            autoindex: false,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            max_lock_timeout: None,
        }
    }

    /// Use the configuration that was built to generate a DavHandler.
    pub fn build(self) -> DavHandler {
        self.into()
    }

    /// Prefix to be stripped off before translating the rest of
    /// the request path to a resource path.
    pub fn strip_prefix(self, prefix: impl Into<String>) -> Self {
        let mut this = self;
        this.prefix = prefix.into();
        this
    }

    /// Share a lock table, for example between handlers for the same store.
    pub fn locksystem(self, ls: Arc<LockManager>) -> Self {
        let mut this = self;
        this.ls = Some(ls);
        this
    }

    /// Which methods to allow (default is all methods).
    pub fn methods(self, allow: DavMethodSet) -> Self {
        let mut this = self;
        this.allow = allow;
        this
    }

    /// Set the name of the "webdav principal". This will be the owner of any created locks.
    pub fn principal(self, principal: impl Into<String>) -> Self {
        let mut this = self;
        this.principal = Some(principal.into());
        this
    }

    /// Does a GET on a collection produce an HTML index (default false).
    pub fn autoindex(self, autoindex: bool) -> Self {
        let mut this = self;
        this.autoindex = autoindex;
        this
    }

    /// Maximum size of PROPFIND/PROPPATCH/LOCK bodies in bytes.
    pub fn max_body_size(self, size: usize) -> Self {
        let mut this = self;
        this.max_body_size = size;
        this
    }

    /// Cap the timeout a client can ask for when locking.
    pub fn max_lock_timeout(self, timeout: Duration) -> Self {
        let mut this = self;
        this.max_lock_timeout = Some(timeout);
        this
    }
}

/// The webdav handler struct.
///
/// The `builder` and `build` methods are used to instantiate a handler.
///
/// The `handle` and `handle_with` methods are the methods that do the actual work.
#[derive(Clone)]
pub struct DavHandler {
    pub(crate) prefix: Arc<String>,
    pub(crate) store: Arc<dyn DavStore>,
    pub(crate) ls: Arc<LockManager>,
    pub(crate) allow: DavMethodSet,
    pub(crate) principal: Option<Arc<String>>,
    pub(crate) autoindex: bool,
    pub(crate) max_body_size: usize,
    pub(crate) max_lock_timeout: Option<Duration>,
}

impl From<DavBuilder> for DavHandler {
    fn from(cfg: DavBuilder) -> Self {
        Self {
            prefix: Arc::new(cfg.prefix),
            store: cfg.store,
            ls: cfg.ls.unwrap_or_default(),
            allow: cfg.allow,
            principal: cfg.principal.map(Arc::new),
            autoindex: cfg.autoindex,
            max_body_size: cfg.max_body_size,
            max_lock_timeout: cfg.max_lock_timeout,
        }
    }
}

impl DavHandler {
    /// Return a configuration builder.
    pub fn builder(store: impl DavStore + 'static) -> DavBuilder {
        DavBuilder::new(store)
    }

    /// The lock table, for querying active locks.
    pub fn locks(&self) -> &LockManager {
        &self.ls
    }

    /// Handle a webdav request.
    pub async fn handle<ReqBody, ReqData, ReqError>(&self, req: Request<ReqBody>) -> Response<Body>
    where
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
    {
        self.handle_inner(req).await
    }

    /// Handle a webdav request, overriding parts of the config.
    ///
    /// `prefix` is appended to the configured prefix, and `principal`
    /// replaces the configured one for this request.
    pub async fn handle_with<ReqBody, ReqData, ReqError>(
        &self,
        req: Request<ReqBody>,
        prefix: Option<String>,
        principal: Option<String>,
    ) -> Response<Body>
    where
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
    {
        let mut this = self.clone();
        if let Some(prefix) = prefix {
            this.prefix = Arc::new(format!(
                "{}/{}",
                this.prefix.strip_suffix('/').unwrap_or(&this.prefix),
                prefix.strip_prefix('/').unwrap_or(&prefix)
            ));
        }
        if let Some(principal) = principal {
            this.principal = Some(Arc::new(principal));
        }
        this.handle_inner(req).await
    }

    /// Handles a request with a `Stream` body instead of a `HttpBody`.
    /// Used with webserver frameworks that have not
    /// opted to use the `http_body` crate just yet.
    pub async fn handle_stream<ReqBody, ReqData, ReqError>(
        &self,
        req: Request<ReqBody>,
    ) -> Response<Body>
    where
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
        ReqBody: Stream<Item = Result<ReqData, ReqError>>,
    {
        let req = {
            let (parts, body) = req.into_parts();
            Request::from_parts(parts, StreamBody::new(body))
        };
        self.handle_inner(req).await
    }
}

impl DavHandler {
    // helper.
    pub(crate) async fn has_parent(&self, txn: &dyn DavTransaction, path: &DavPath) -> bool {
        match path.parent() {
            Some(parent) => txn
                .metadata(&parent)
                .await
                .map(|m| m.is_collection)
                .unwrap_or(false),
            None => false,
        }
    }

    // metadata, or None if the resource does not exist.
    pub(crate) async fn metadata_opt(
        &self,
        txn: &dyn DavTransaction,
        path: &DavPath,
    ) -> DavResult<Option<crate::fs::DavMetaData>> {
        match txn.metadata(path).await {
            Ok(meta) => Ok(Some(meta)),
            Err(FsError::NotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    // tokens submitted through the If header, 412 if it does not hold.
    pub(crate) async fn if_tokens(
        &self,
        req: &Request<()>,
        txn: &dyn DavTransaction,
        path: &DavPath,
    ) -> DavResult<Vec<String>> {
        conditional::if_header_tokens(req, txn, &self.ls, &self.prefix, path).await
    }

    pub(crate) fn multistatus(&self) -> MultiStatus {
        MultiStatus::new(self.prefix.as_str())
    }

    pub(crate) fn multistatus_response(&self, ms: MultiStatus) -> DavResult<Response<Body>> {
        let xml = ms.to_xml()?;
        Ok(xml_response(StatusCode::MULTI_STATUS, xml))
    }

    pub(crate) fn depth(&self, req: &Request<()>) -> DavResult<Option<Depth>> {
        typed_header::<Depth>(req, "Depth")
    }

    // drain request body.
    pub(crate) async fn read_request<ReqBody, ReqData, ReqError>(
        &self,
        body: ReqBody,
        max_size: Option<usize>,
    ) -> DavResult<Bytes>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
    {
        let mut data = BytesMut::new();
        pin_utils::pin_mut!(body);
        while let Some(res) = body.data().await {
            let mut buf = res.map_err(|e| {
                debug!("error reading request body: {e}");
                DavError::Io(io::Error::new(io::ErrorKind::UnexpectedEof, "UnexpectedEof"))
            })?;
            while buf.has_remaining() {
                if let Some(max_size) = max_size {
                    if data.len() + buf.remaining() > max_size {
                        return Err(DavError::StatusClose(StatusCode::PAYLOAD_TOO_LARGE));
                    }
                }
                let b = buf.chunk();
                let l = b.len();
                data.extend_from_slice(b);
                buf.advance(l);
            }
        }
        Ok(data.freeze())
    }

    // turn a DavError into a response.
    fn error_response(&self, err: &DavError) -> Response<Body> {
        let status = err.statuscode();
        let body = match err {
            DavError::Locked(root) => Some(lock_error_body("lock-token-submitted", &self.href(root))),
            DavError::LockConflict(root) => Some(lock_error_body("no-conflicting-lock", &self.href(root))),
            _ => None,
        };
        let mut resp = match body {
            Some(body) => {
                let len = body.len();
                let mut resp = Response::new(body);
                resp.headers_mut()
                    .insert(CONTENT_TYPE, HeaderValue::from_static(XML_CONTENT_TYPE));
                resp.headers_mut().typed_insert(headers::ContentLength(len as u64));
                resp
            }
            None => {
                let mut resp = Response::new(Body::empty());
                resp.headers_mut().typed_insert(headers::ContentLength(0));
                resp
            }
        };
        *resp.status_mut() = status;
        if err.must_close() {
            resp.headers_mut()
                .insert(CONNECTION, HeaderValue::from_static("close"));
        }
        resp
    }

    pub(crate) fn href(&self, path: &DavPath) -> String {
        path.with_prefix(&self.prefix)
    }

    // internal dispatcher.
    async fn handle_inner<ReqBody, ReqData, ReqError>(
        &self,
        req: Request<ReqBody>,
    ) -> Response<Body>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
    {
        // Turn any DavError results into a HTTP error response.
        match self.handle2(req).await {
            Ok(resp) => {
                debug!("== END REQUEST result {}", resp.status());
                resp
            }
            Err(err) => {
                debug!("== END REQUEST result {:?}", err);
                self.error_response(&err)
            }
        }
    }

    // internal dispatcher part 2.
    async fn handle2<ReqBody, ReqData, ReqError>(
        &self,
        req: Request<ReqBody>,
    ) -> DavResult<Response<Body>>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
    {
        let (req, body) = {
            let (parts, body) = req.into_parts();
            (Request::from_parts(parts, ()), body)
        };

        // translate HTTP method to Webdav method.
        let method = match dav_method(req.method()) {
            Ok(m) => m,
            Err(e) => {
                debug!("refusing method {} request {}", req.method(), req.uri());
                return Err(e);
            }
        };

        // see if method is allowed.
        if !self.allow.contains_method(method) {
            debug!(
                "method {} not allowed on request {}",
                req.method(),
                req.uri()
            );
            return Err(DavError::StatusClose(StatusCode::METHOD_NOT_ALLOWED));
        }

        // make sure the request path is valid.
        let path = DavPath::from_uri_and_prefix(req.uri(), &self.prefix)?;

        // PUT bodies are content and have no size limit. All the
        // other bodies are XML documents.
        let max_size = match method {
            DavMethod::Put => None,
            _ => Some(self.max_body_size),
        };
        let body = self.read_request(body, max_size).await?;

        // Not all methods accept a body.
        if !method.has_body() && !body.is_empty() {
            return Err(StatusCode::UNSUPPORTED_MEDIA_TYPE.into());
        }

        debug!("== START REQUEST {:?} {}", method, path);

        match method {
            DavMethod::Options => self.handle_options(&req, &path).await,
            DavMethod::PropFind => self.handle_propfind(&req, &path, &body).await,
            DavMethod::PropPatch => self.handle_proppatch(&req, &path, &body).await,
            DavMethod::MkCol => self.handle_mkcol(&req, &path).await,
            DavMethod::Delete => self.handle_delete(&req, &path).await,
            DavMethod::Lock => self.handle_lock(&req, &path, &body).await,
            DavMethod::Unlock => self.handle_unlock(&req, &path).await,
            DavMethod::Head | DavMethod::Get => self.handle_get(&req, &path, method).await,
            DavMethod::Copy | DavMethod::Move => self.handle_copymove(&req, &path, method).await,
            DavMethod::Put => self.handle_put(&req, &path, body).await,
        }
    }
}

// A typed header. Present but unparsable is a 400.
pub(crate) fn typed_header<H: Header>(req: &Request<()>, name: &'static str) -> DavResult<Option<H>> {
    if !req.headers().contains_key(H::name()) {
        return Ok(None);
    }
    match req.headers().typed_get::<H>() {
        Some(h) => Ok(Some(h)),
        None => Err(DavError::InvalidHeader(name)),
    }
}

pub(crate) fn xml_response(status: StatusCode, xml: Bytes) -> Response<Body> {
    let len = xml.len();
    let mut resp = Response::new(Body::from(xml));
    *resp.status_mut() = status;
    let h = resp.headers_mut();
    h.insert(CONTENT_TYPE, HeaderValue::from_static(XML_CONTENT_TYPE));
    h.insert(CONTENT_LENGTH, HeaderValue::from(len));
    resp
}

pub(crate) fn empty_response(status: StatusCode) -> Response<Body> {
    let mut resp = Response::new(Body::empty());
    *resp.status_mut() = status;
    resp.headers_mut().typed_insert(headers::ContentLength(0));
    resp
}

fn lock_error_body(condition: &str, href: &str) -> Body {
    dav_xml_error(&format!(
        "<D:{condition}><D:href>{}</D:href></D:{condition}>",
        htmlescape::encode_minimal(href)
    ))
}
