use headers::HeaderMapExt;
use http::{Request, Response, StatusCode};

use crate::body::Body;
use crate::davhandler::DavInner;
use crate::davheaders::Depth;
use crate::davpath::DavPath;
use crate::errors::*;
use crate::ls::LockError;
use crate::multistatus::MultiStatus;
use crate::walker::{self, Walk};

// Record a lock conflict for one resource.
pub(crate) fn record_lockerror(ms: &mut MultiStatus, path: &DavPath, e: LockError) {
    match e {
        LockError::Conflict(l) => ms.record_locked(path, &l.path),
        e => ms.record(path, lockerror_to_status(&e)),
    }
}

impl DavInner {
    // Remove the resources of a walk, members before their collection.
    // A resource that can not be removed keeps all its ancestors in place.
    pub(crate) async fn delete_items(&self, ms: &mut MultiStatus, walk: &Walk) {
        let mut blocked: Vec<DavPath> = Vec::new();
        for (path, e) in &walk.errors {
            ms.record(path, fserror_to_status(e));
            blocked.push(path.clone());
        }

        for entry in walk.post_order() {
            let path = &entry.path;
            if blocked.iter().any(|b| path.is_ancestor_of(b)) {
                continue;
            }
            if let Err(e) = self.check_lock(path, false) {
                debug!("delete_items: {} is locked", path);
                record_lockerror(ms, path, e);
                blocked.push(path.clone());
                continue;
            }
            let res = if entry.meta.is_dir() {
                self.fs.remove_dir(path).await
            } else {
                self.fs.remove_file(path).await
            };
            match res {
                Ok(()) => {
                    self.delete_locks(path);
                    if let Some(ref props) = self.props {
                        if let Err(e) = props.delete_props(path).await {
                            debug!("delete_items: delete_props {}: {}", path, e);
                            ms.record(path, fserror_to_status(&e));
                        }
                    }
                }
                Err(e) => {
                    debug!("delete_items: {}: {}", path, e);
                    ms.record(path, fserror_to_status(&e));
                    blocked.push(path.clone());
                }
            }
        }
    }

    pub(crate) async fn handle_delete(&self, req: &Request<()>, path: DavPath) -> DavResult<Response<Body>> {
        // RFC4918 9.6.1 DELETE for Collections.
        match req.headers().typed_try_get::<Depth>() {
            Ok(Some(Depth::Infinity)) | Ok(None) => {}
            _ => return Err(StatusCode::BAD_REQUEST.into()),
        }
        if path.is_root() {
            return Err(StatusCode::FORBIDDEN.into());
        }

        // the resource must exist, and removing it changes its collection.
        self.fs.metadata(&path).await?;
        self.check_lock(&path.parent(), false)?;
        self.check_lock(&path, false)?;

        let walk = walker::walk(&*self.fs, &path, Depth::Infinity).await?;
        let mut ms = MultiStatus::begin(&path);
        self.delete_items(&mut ms, &walk).await;
        ms.finish(StatusCode::NO_CONTENT)
    }
}
