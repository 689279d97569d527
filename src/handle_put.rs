use bytes::Bytes;
use headers::HeaderMapExt;
use http::{Request, Response, StatusCode};

use crate::body::Body;
use crate::davhandler::DavInner;
use crate::davheaders::ETag;
use crate::davpath::DavPath;
use crate::errors::*;
use crate::fs::*;

impl DavInner {
    pub(crate) async fn handle_put(&self, _req: &Request<()>, path: DavPath, body: Vec<u8>) -> DavResult<Response<Body>> {
        if path.is_collection() {
            return Err(StatusCode::METHOD_NOT_ALLOWED.into());
        }
        let meta = self.fs.metadata(&path).await;
        if meta.as_ref().is_ok_and(|m| m.is_dir()) {
            return Err(StatusCode::METHOD_NOT_ALLOWED.into());
        }
        let created = meta.is_err();

        // a new member also needs the locks on its collection.
        self.check_lock(&path, false)?;
        if created {
            self.check_lock(&path.parent(), false)?;
        }

        if !self.has_parent(&path).await {
            if !self.lazy_folder_creation {
                return Err(StatusCode::CONFLICT.into());
            }
            self.create_parents(&path).await?;
        }

        self.fs.write(&path, Bytes::from(body)).await?;

        let mut res = Response::new(Body::empty());
        if let Ok(meta) = self.fs.metadata(&path).await {
            if let Some(etag) = ETag::from_meta(&*meta) {
                res.headers_mut().typed_insert(etag);
            }
        }
        *res.status_mut() = if created {
            StatusCode::CREATED
        } else {
            StatusCode::NO_CONTENT
        };
        Ok(res)
    }

    // create the missing collections above `path`, top down.
    async fn create_parents(&self, path: &DavPath) -> DavResult<()> {
        let mut missing = Vec::new();
        let mut p = path.parent();
        while !p.is_root() {
            match self.fs.metadata(&p).await {
                Ok(m) if m.is_dir() => break,
                Ok(_) => return Err(StatusCode::CONFLICT.into()),
                Err(_) => {
                    let up = p.parent();
                    missing.push(p);
                    p = up;
                }
            }
        }
        for dir in missing.into_iter().rev() {
            debug!("put: creating parent {}", dir);
            match self.fs.create_dir(&dir).await {
                Ok(()) | Err(FsError::Exists) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}
