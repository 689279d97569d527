use headers::HeaderMapExt;
use http::{Request, Response, StatusCode};

use crate::body::Body;
use crate::davhandler::DavInner;
use crate::davheaders::{self, Depth};
use crate::davpath::DavPath;
use crate::errors::*;
use crate::fs::*;
use crate::handle_delete::record_lockerror;
use crate::multistatus::MultiStatus;
use crate::util::DavMethod;
use crate::walker::{self, Walk, WalkEntry};

impl DavInner {
    // Copy the resources of a walk below `dest`, collections before their
    // members. When moving, a resource the request may not remove stays
    // at the source with its whole subtree, and so does a resource whose
    // dead properties did not make it. Returns what was copied, and the
    // source paths that must not be removed.
    async fn copy_items<'w>(
        &self,
        ms: &mut MultiStatus,
        walk: &'w Walk,
        source: &DavPath,
        dest: &DavPath,
        is_move: bool,
    ) -> (Vec<&'w WalkEntry>, Vec<DavPath>) {
        let mut copied = Vec::new();
        let mut skipped: Vec<DavPath> = Vec::new();
        let mut keep: Vec<DavPath> = Vec::new();

        for entry in &walk.entries {
            if skipped.iter().any(|s| s.is_ancestor_of(&entry.path)) {
                continue;
            }
            if is_move {
                if let Err(e) = self.check_lock(&entry.path, false) {
                    debug!("copy_items: {} is locked", entry.path);
                    record_lockerror(ms, &entry.path, e);
                    skipped.push(entry.path.clone());
                    continue;
                }
            }
            let Some(to) = entry.path.rebase(source, dest) else {
                continue;
            };
            match self.fs.copy(&entry.path, &to).await {
                Ok(()) => {
                    if let Some(ref props) = self.props {
                        if let Err(e) = props.copy_props(&entry.path, &to).await {
                            debug!("copy_items: copy_props {} {}: {}", entry.path, to, e);
                            ms.record(&to, fserror_to_status(&e));
                            keep.push(entry.path.clone());
                        }
                    }
                    copied.push(entry);
                }
                Err(e) => {
                    debug!("copy_items: copy {} {}: {}", entry.path, to, e);
                    ms.record(&to, fserror_to_status(&e));
                    skipped.push(entry.path.clone());
                }
            }
        }

        // collections whose members could not be listed were copied
        // incompletely.
        for (path, e) in &walk.errors {
            if let Some(to) = path.rebase(source, dest) {
                ms.record(&to, fserror_to_status(e));
            }
            skipped.push(path.clone());
        }
        skipped.extend(keep);
        (copied, skipped)
    }

    // Remove moved sources, members before their collection.
    async fn remove_sources(&self, ms: &mut MultiStatus, copied: &[&WalkEntry], mut blocked: Vec<DavPath>) {
        for entry in copied.iter().rev() {
            let path = &entry.path;
            if blocked.iter().any(|b| path.is_ancestor_of(b)) {
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
                            debug!("remove_sources: delete_props {}: {}", path, e);
                            ms.record(path, fserror_to_status(&e));
                        }
                    }
                }
                Err(e) => {
                    debug!("remove_sources: {}: {}", path, e);
                    ms.record(path, fserror_to_status(&e));
                    blocked.push(path.clone());
                }
            }
        }
    }

    // Try to move the whole tree in one go. The resources are moved even
    // if their dead properties are not; that failure is recorded for `dest`.
    async fn try_rename(&self, ms: &mut MultiStatus, source: &DavPath, dest: &DavPath) -> DavResult<bool> {
        match self.fs.rename(source, dest).await {
            Ok(()) => {
                if let Some(ref props) = self.props {
                    if let Err(e) = props.rename_props(source, dest).await {
                        debug!("try_rename: rename_props {} {}: {}", source, dest, e);
                        ms.record(dest, fserror_to_status(&e));
                    }
                }
                self.delete_locks(source);
                Ok(true)
            }
            Err(FsError::NotImplemented) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub(crate) async fn handle_copymove(
        &self,
        req: &Request<()>,
        mut path: DavPath,
        method: DavMethod,
    ) -> DavResult<Response<Body>> {
        let is_move = method == DavMethod::Move;

        // get and check headers.
        let overwrite = match req.headers().typed_try_get::<davheaders::Overwrite>() {
            Ok(o) => o.is_none_or(|o| o.0),
            Err(_) => return Err(StatusCode::BAD_REQUEST.into()),
        };
        let depth = match req.headers().typed_try_get::<Depth>() {
            Ok(Some(Depth::Infinity)) | Ok(None) => Depth::Infinity,
            Ok(Some(Depth::Zero)) if !is_move => Depth::Zero,
            _ => return Err(StatusCode::BAD_REQUEST.into()),
        };
        let mut dest = match req.headers().typed_try_get::<davheaders::Destination>() {
            Ok(Some(d)) => DavPath::from_str_and_prefix(&d.0, &self.prefix)?,
            _ => return Err(StatusCode::BAD_REQUEST.into()),
        };

        // source must exist.
        let meta = self.fs.metadata(&path).await?;
        path.add_slash_if(meta.is_dir());
        dest.add_slash_if(meta.is_dir());

        // the destination may not be the source, or inside of it.
        if path.is_ancestor_of(&dest) {
            debug!("handle_copymove: {} is inside of {}", dest, path);
            return Err(StatusCode::FORBIDDEN.into());
        }
        if !self.has_parent(&dest).await {
            return Err(StatusCode::CONFLICT.into());
        }

        let dest_exists = self.fs.exists(&dest).await;
        if dest_exists && !overwrite {
            return Err(StatusCode::PRECONDITION_FAILED.into());
        }

        // locks on the collections that change, and on what gets replaced.
        self.check_lock(&dest.parent(), false)?;
        self.check_lock(&dest, true)?;
        if is_move {
            self.check_lock(&path.parent(), false)?;
            self.check_lock(&path, false)?;
        }

        // the existing destination is deleted first.
        if dest_exists {
            let walk = walker::walk(&*self.fs, &dest, Depth::Infinity).await?;
            let mut ms = MultiStatus::begin(&dest);
            self.delete_items(&mut ms, &walk).await;
            if !ms.is_empty() {
                debug!("handle_copymove: could not replace {}", dest);
                return ms.finish(StatusCode::NO_CONTENT);
            }
        }
        let success = if dest_exists {
            StatusCode::NO_CONTENT
        } else {
            StatusCode::CREATED
        };

        // a move without locks in the way is a single rename.
        let mut ms = MultiStatus::begin(&dest);
        if is_move && self.check_lock(&path, true).is_ok() && self.try_rename(&mut ms, &path, &dest).await? {
            return ms.finish(success);
        }

        let walk = walker::walk(&*self.fs, &path, depth).await?;
        let (copied, blocked) = self.copy_items(&mut ms, &walk, &path, &dest, is_move).await;
        if is_move {
            self.remove_sources(&mut ms, &copied, blocked).await;
        }
        ms.finish(success)
    }
}
