//
// This module contains the main entry point of the library,
// DavHandler.
//
use std::error::Error as StdError;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::Buf;
use headers::HeaderMapExt;
use http::{Request, Response, StatusCode, header};
use http_body::Body as HttpBody;
use http_body_util::BodyExt;

use crate::body::Body;
use crate::conditional::{dav_if_match, if_match_get_tokens};
use crate::davpath::DavPath;
use crate::errors::{DavError, DavResult};
use crate::fs::*;
use crate::ls::*;
use crate::props::DavPropStore;
use crate::util::{DavMethod, DavMethodSet, dav_method};

/// Default maximum size of an XML request body.
pub const DEFAULT_MAX_REQUEST_SIZE: usize = 65536;
/// Lock timeout if the client does not ask for one.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(3600);
/// Longest lock timeout handed out.
pub const DEFAULT_MAX_LOCK_TIMEOUT: Duration = Duration::from_secs(604800);

/// WebDAV request handler.
///
/// The [`builder`](Self::builder) method is used to instantiate a handler.
///
/// The [`handle`](Self::handle) and [`handle_with`](Self::handle_with) methods do the actual work.
#[derive(Clone, Default)]
pub struct DavHandler {
    pub(crate) config: Arc<DavConfig>,
}

/// Configuration of the handler.
#[derive(Clone, Default)]
pub struct DavConfig {
    // Prefix to be stripped off when handling request.
    pub(crate) prefix: Option<String>,
    // Filesystem backend.
    pub(crate) fs: Option<Box<dyn DavFileSystem>>,
    // Dead property store.
    pub(crate) props: Option<Box<dyn DavPropStore>>,
    // Locksystem backend.
    pub(crate) ls: Option<Box<dyn DavLockSystem>>,
    // Set of allowed methods (None means "all methods")
    pub(crate) allow: Option<DavMethodSet>,
    // Principal is webdav speak for "user", used to give locks an owner (if a locksystem is
    // active).
    pub(crate) principal: Option<String>,
    // Refuse all methods that change something.
    pub(crate) read_only: Option<bool>,
    // Does PUT create missing parent collections.
    pub(crate) lazy_folder_creation: Option<bool>,
    // Does GET on a directory return indexes.
    pub(crate) autoindex: Option<bool>,
    // index.html
    pub(crate) indexfile: Option<String>,
    pub(crate) lock_timeout_default: Option<Duration>,
    // `Some(None)` means locks may be infinite.
    pub(crate) lock_timeout_max: Option<Option<Duration>>,
    pub(crate) max_request_size: Option<usize>,
}

impl DavConfig {
    /// Create a new configuration builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use the configuration that was built to generate a [`DavHandler`].
    pub fn build_handler(self) -> DavHandler {
        DavHandler {
            config: Arc::new(self),
        }
    }

    /// Prefix to be stripped off before translating the rest of
    /// the request path to a filesystem path.
    pub fn strip_prefix(self, prefix: impl Into<String>) -> Self {
        let mut this = self;
        this.prefix = Some(prefix.into());
        this
    }

    /// Set the filesystem to use.
    pub fn filesystem(self, fs: Box<dyn DavFileSystem>) -> Self {
        let mut this = self;
        this.fs = Some(fs);
        this
    }

    /// Set the property store to use. Without one, dead properties
    /// can not be set.
    pub fn propstore(self, props: Box<dyn DavPropStore>) -> Self {
        let mut this = self;
        this.props = Some(props);
        this
    }

    /// Set the locksystem to use.
    pub fn locksystem(self, ls: Box<dyn DavLockSystem>) -> Self {
        let mut this = self;
        this.ls = Some(ls);
        this
    }

    /// Which methods to allow (default is all methods).
    pub fn methods(self, allow: DavMethodSet) -> Self {
        let mut this = self;
        this.allow = Some(allow);
        this
    }

    /// Set the name of the "webdav principal". This will be the owner of any created locks.
    pub fn principal(self, principal: impl Into<String>) -> Self {
        let mut this = self;
        this.principal = Some(principal.into());
        this
    }

    /// Refuse every method that would change something with 403 (default false).
    pub fn read_only(self, read_only: bool) -> Self {
        let mut this = self;
        this.read_only = Some(read_only);
        this
    }

    /// Create missing parent collections on PUT instead of failing with 409 (default false).
    pub fn lazy_folder_creation(self, lazy: bool) -> Self {
        let mut this = self;
        this.lazy_folder_creation = Some(lazy);
        this
    }

    /// Does a GET on a directory produce a directory index.
    pub fn autoindex(self, autoindex: bool) -> Self {
        let mut this = self;
        this.autoindex = Some(autoindex);
        this
    }

    /// Indexfile to show (index.html, usually).
    pub fn indexfile(self, indexfile: impl Into<String>) -> Self {
        let mut this = self;
        this.indexfile = Some(indexfile.into());
        this
    }

    /// Lock timeout when the client does not send a Timeout header (default one hour).
    pub fn lock_timeout_default(self, timeout: Duration) -> Self {
        let mut this = self;
        this.lock_timeout_default = Some(timeout);
        this
    }

    /// Upper bound for lock timeouts (default one week). `None` allows
    /// infinite locks.
    pub fn lock_timeout_max(self, timeout: Option<Duration>) -> Self {
        let mut this = self;
        this.lock_timeout_max = Some(timeout);
        this
    }

    /// Maximum size of an XML request body (default 64 KiB).
    pub fn max_request_size(self, size: usize) -> Self {
        let mut this = self;
        this.max_request_size = Some(size);
        this
    }

    fn merge(&self, new: Self) -> Self {
        Self {
            prefix: new.prefix.or_else(|| self.prefix.clone()),
            fs: new.fs.or_else(|| self.fs.clone()),
            props: new.props.or_else(|| self.props.clone()),
            ls: new.ls.or_else(|| self.ls.clone()),
            allow: new.allow.or(self.allow),
            principal: new.principal.or_else(|| self.principal.clone()),
            read_only: new.read_only.or(self.read_only),
            lazy_folder_creation: new.lazy_folder_creation.or(self.lazy_folder_creation),
            autoindex: new.autoindex.or(self.autoindex),
            indexfile: new.indexfile.or_else(|| self.indexfile.clone()),
            lock_timeout_default: new.lock_timeout_default.or(self.lock_timeout_default),
            lock_timeout_max: new.lock_timeout_max.or(self.lock_timeout_max),
            max_request_size: new.max_request_size.or(self.max_request_size),
        }
    }
}

// The actual inner struct.
//
// At the start of the request, DavConfig is used to generate
// a DavInner struct. DavInner::handle then handles the request.
// It is the per-request context every handler works with.
pub(crate) struct DavInner {
    pub prefix: String,
    pub fs: Box<dyn DavFileSystem>,
    pub props: Option<Box<dyn DavPropStore>>,
    pub ls: Option<Box<dyn DavLockSystem>>,
    pub allow: Option<DavMethodSet>,
    pub principal: Option<String>,
    pub read_only: bool,
    pub lazy_folder_creation: bool,
    pub autoindex: bool,
    pub indexfile: Option<String>,
    pub lock_timeout_default: Duration,
    pub lock_timeout_max: Option<Duration>,
    pub max_request_size: usize,
    // lock tokens the client presented in the If: header.
    pub tokens: Vec<String>,
}

impl DavHandler {
    /// Return a configuration builder.
    pub fn builder() -> DavConfig {
        DavConfig::new()
    }

    /// Process a WebDAV request.
    pub async fn handle<ReqBody, ReqData, ReqError>(&self, req: Request<ReqBody>) -> Response<Body>
    where
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
    {
        match DavInner::new(self.config.as_ref().clone()) {
            Some(inner) => inner.handle(req).await,
            None => no_filesystem(req.method()),
        }
    }

    /// Handle a webdav request, overriding parts of the config.
    ///
    /// For example, the `principal` can be set for this request.
    pub async fn handle_with<ReqBody, ReqData, ReqError>(
        &self,
        config: DavConfig,
        req: Request<ReqBody>,
    ) -> Response<Body>
    where
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
    {
        match DavInner::new(self.config.merge(config)) {
            Some(inner) => inner.handle(req).await,
            None => no_filesystem(req.method()),
        }
    }
}

// Without a filesystem only OPTIONS makes sense.
fn no_filesystem(method: &http::Method) -> Response<Body> {
    let mut res = Response::new(Body::empty());
    res.headers_mut().typed_insert(headers::ContentLength(0));
    if method == http::Method::OPTIONS {
        res.headers_mut()
            .insert(header::ALLOW, header::HeaderValue::from_static("OPTIONS"));
    } else {
        debug!("no filesystem: method {} not allowed", method);
        *res.status_mut() = StatusCode::METHOD_NOT_ALLOWED;
        res.headers_mut()
            .insert(header::CONNECTION, header::HeaderValue::from_static("close"));
    }
    res
}

impl DavInner {
    pub fn new(cfg: DavConfig) -> Option<Self> {
        let DavConfig {
            prefix,
            fs,
            props,
            ls,
            allow,
            principal,
            read_only,
            lazy_folder_creation,
            autoindex,
            indexfile,
            lock_timeout_default,
            lock_timeout_max,
            max_request_size,
        } = cfg;
        Some(Self {
            prefix: prefix.unwrap_or_default(),
            fs: fs?,
            props,
            ls,
            allow,
            principal,
            read_only: read_only.unwrap_or(false),
            lazy_folder_creation: lazy_folder_creation.unwrap_or(false),
            autoindex: autoindex.unwrap_or(false),
            indexfile,
            lock_timeout_default: lock_timeout_default.unwrap_or(DEFAULT_LOCK_TIMEOUT),
            lock_timeout_max: lock_timeout_max.unwrap_or(Some(DEFAULT_MAX_LOCK_TIMEOUT)),
            max_request_size: max_request_size.unwrap_or(DEFAULT_MAX_REQUEST_SIZE),
            tokens: Vec::new(),
        })
    }

    // helper.
    pub(crate) async fn has_parent(&self, path: &DavPath) -> bool {
        let p = path.parent();
        self.fs.metadata(&p).await.map(|m| m.is_dir()).unwrap_or(false)
    }

    // Check that the request holds the locks on `path` (and below it, if `deep`).
    pub(crate) fn check_lock(&self, path: &DavPath, deep: bool) -> Result<(), LockError> {
        match self.ls {
            Some(ref ls) => ls.check(path, self.principal.as_deref(), false, deep, &self.tokens),
            None => Ok(()),
        }
    }

    // Forget the lock state of a removed resource.
    pub(crate) fn delete_locks(&self, path: &DavPath) {
        if let Some(ref ls) = self.ls {
            ls.delete(path);
        }
    }

    // drain request body and return it.
    pub(crate) async fn read_request<ReqBody, ReqData, ReqError>(
        &self,
        body: ReqBody,
        max_size: usize,
    ) -> DavResult<Vec<u8>>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
    {
        let mut data = Vec::new();
        let mut body = std::pin::pin!(body);

        while let Some(res) = body.frame().await {
            let mut data_frame = res.map_err(|e| {
                DavError::IoError(io::Error::new(io::ErrorKind::UnexpectedEof, e))
            })?;

            let Some(buf) = data_frame.data_mut() else {
                continue;
            };

            while buf.has_remaining() {
                if data.len() + buf.remaining() > max_size {
                    return Err(StatusCode::PAYLOAD_TOO_LARGE.into());
                }
                let b = buf.chunk();
                let l = b.len();
                data.extend_from_slice(b);
                buf.advance(l);
            }
        }
        Ok(data)
    }

    // internal dispatcher.
    async fn handle<ReqBody, ReqData, ReqError>(self, req: Request<ReqBody>) -> Response<Body>
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
                let mut resp = Response::new(Body::empty());
                *resp.status_mut() = err.statuscode();
                resp.headers_mut().typed_insert(headers::ContentLength(0));
                if err.must_close() {
                    resp.headers_mut()
                        .insert(header::CONNECTION, header::HeaderValue::from_static("close"));
                }
                resp
            }
        }
    }

    // internal dispatcher part 2.
    async fn handle2<ReqBody, ReqData, ReqError>(mut self, req: Request<ReqBody>) -> DavResult<Response<Body>>
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
        if let Some(ref a) = self.allow {
            if !a.contains(method) {
                debug!("method {} not allowed on request {}", req.method(), req.uri());
                return Err(DavError::StatusClose(StatusCode::METHOD_NOT_ALLOWED));
            }
        }
        if self.read_only && method.is_write() {
            debug!("read-only: refusing {} on {}", req.method(), req.uri());
            return Err(StatusCode::FORBIDDEN.into());
        }

        // make sure the request path is valid.
        let path = DavPath::from_uri(req.uri(), &self.prefix)?;
        if path.is_star() && method != DavMethod::Options {
            return Err(DavError::InvalidPath);
        }

        let max_size = match method {
            DavMethod::Put => usize::MAX,
            _ => self.max_request_size,
        };
        let body_data = self.read_request(body, max_size).await?;

        // Not all methods accept a body.
        match method {
            DavMethod::Put | DavMethod::PropFind | DavMethod::PropPatch | DavMethod::Lock => {}
            _ => {
                if !body_data.is_empty() {
                    return Err(StatusCode::UNSUPPORTED_MEDIA_TYPE.into());
                }
            }
        }

        debug!("== START REQUEST {:?} {}", method, path);

        // conditional headers. GET and HEAD do the RFC 7232 part
        // themselves, since a 304 carries validators.
        if !path.is_star() {
            let fs = &*self.fs;
            let ls = self.ls.as_deref();
            self.tokens = if matches!(method, DavMethod::Get | DavMethod::Head) {
                match dav_if_match(&req, fs, ls, &path).await {
                    (true, tokens) => tokens,
                    (false, _) => return Err(StatusCode::PRECONDITION_FAILED.into()),
                }
            } else {
                let meta = fs.metadata(&path).await.ok();
                if_match_get_tokens(&req, meta.as_deref(), fs, ls, &path).await?
            };
        }

        match method {
            DavMethod::Options => self.handle_options(&req, &path).await,
            DavMethod::PropFind => self.handle_propfind(&req, path, &body_data).await,
            DavMethod::PropPatch => self.handle_proppatch(path, &body_data).await,
            DavMethod::MkCol => self.handle_mkcol(path).await,
            DavMethod::Delete => self.handle_delete(&req, path).await,
            DavMethod::Lock => self.handle_lock(&req, path, &body_data).await,
            DavMethod::Unlock => self.handle_unlock(&req, path).await,
            DavMethod::Head | DavMethod::Get => self.handle_get(&req, path, method == DavMethod::Head).await,
            DavMethod::Copy | DavMethod::Move => self.handle_copymove(&req, path, method).await,
            DavMethod::Put => self.handle_put(&req, path, body_data).await,
        }
    }
}
