use http::{Response, StatusCode, header};

use crate::body::Body;
use crate::davhandler::DavInner;
use crate::davpath::DavPath;
use crate::errors::*;
use crate::fs::*;

impl DavInner {
    pub(crate) async fn handle_mkcol(&self, mut path: DavPath) -> DavResult<Response<Body>> {
        if self.fs.exists(&path).await {
            return Err(StatusCode::METHOD_NOT_ALLOWED.into());
        }
        self.check_lock(&path, false)?;
        self.check_lock(&path.parent(), false)?;

        let mut res = Response::new(Body::empty());
        match self.fs.create_dir(&path).await {
            // RFC 4918 9.3.1 MKCOL Status Codes.
            Err(FsError::Exists) => Err(StatusCode::METHOD_NOT_ALLOWED.into()),
            Err(FsError::NotFound) | Err(FsError::Conflict) => Err(StatusCode::CONFLICT.into()),
            Err(e) => Err(e.into()),
            Ok(()) => {
                if path.is_collection() {
                    path.add_slash();
                    if let Ok(loc) = header::HeaderValue::from_str(&path.as_url_string_with_prefix()) {
                        res.headers_mut().insert(header::CONTENT_LOCATION, loc);
                    }
                }
                *res.status_mut() = StatusCode::CREATED;
                Ok(res)
            }
        }
    }
}
