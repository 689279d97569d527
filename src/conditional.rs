//! Evaluation of conditional request headers.
//!
//! `http_if_match` handles RFC 7232 (If-Match, If-None-Match,
//! If-Modified-Since, If-Unmodified-Since), `dav_if_match` handles the
//! RFC 4918 `If` header and collects the lock tokens the client presented.
use http::{Method, StatusCode};
use headers::HeaderMapExt;

use crate::davheaders::{self, ETag};
use crate::davpath::DavPath;
use crate::fs::{DavFileSystem, DavMetaData};
use crate::ls::DavLockSystem;

type Request = http::Request<()>;

pub(crate) fn etaglist_match(tags: &davheaders::ETagList, tag: &ETag) -> bool {
    match tags {
        davheaders::ETagList::Star => true,
        davheaders::ETagList::Tags(t) => t.iter().any(|x| x == tag),
    }
}

// Weak comparison, used for If-None-Match.
fn etaglist_match_weak(tags: &davheaders::ETagList, tag: &ETag) -> bool {
    match tags {
        davheaders::ETagList::Star => true,
        davheaders::ETagList::Tags(t) => t.iter().any(|x| x.weak_eq(tag)),
    }
}

// Handle the if-headers: RFC 7232, HTTP/1.1 Conditional Requests.
pub(crate) fn http_if_match(req: &Request, meta: Option<&dyn DavMetaData>) -> Option<StatusCode> {
    let modified = meta.and_then(|m| m.modified().ok());
    let etag = meta.and_then(ETag::from_meta);

    if let Some(r) = req.headers().typed_get::<davheaders::IfMatch>() {
        if !etag.as_ref().is_some_and(|t| etaglist_match(&r.0, t)) {
            debug!("precondition fail: If-Match {:?}", r);
            return Some(StatusCode::PRECONDITION_FAILED);
        }
    } else if let Some(r) = req.headers().typed_get::<headers::IfUnmodifiedSince>() {
        match modified {
            None => return Some(StatusCode::PRECONDITION_FAILED),
            Some(m) => {
                if !r.precondition_passes(m) {
                    debug!("precondition fail: If-Unmodified-Since {:?}", r);
                    return Some(StatusCode::PRECONDITION_FAILED);
                }
            }
        }
    }

    let is_get = req.method() == Method::GET || req.method() == Method::HEAD;
    if let Some(r) = req.headers().typed_get::<davheaders::IfNoneMatch>() {
        if etag.as_ref().is_some_and(|t| etaglist_match_weak(&r.0, t)) {
            debug!("precondition fail: If-None-Match {:?}", r);
            if is_get {
                return Some(StatusCode::NOT_MODIFIED);
            } else {
                return Some(StatusCode::PRECONDITION_FAILED);
            }
        }
    } else if let Some(r) = req.headers().typed_get::<headers::IfModifiedSince>() {
        if is_get {
            if let Some(m) = modified {
                if !r.is_modified(m) {
                    debug!("not-modified If-Modified-Since {:?}", r);
                    return Some(StatusCode::NOT_MODIFIED);
                }
            }
        }
    }
    None
}

// handle the If header: RFC4918, 10.4.  If Header
//
// returns true if the header was not present, or if any of the iflists
// evaluated to true. Also returns a Vec of StateTokens that we encountered.
//
// caller should set the http status to 412 PreconditionFailed if
// the return value from this function is false.
pub(crate) async fn dav_if_match(
    req: &Request,
    fs: &dyn DavFileSystem,
    ls: Option<&dyn DavLockSystem>,
    path: &DavPath,
) -> (bool, Vec<String>) {
    let r = match req.headers().typed_get::<davheaders::If>() {
        Some(r) => r,
        None => return (true, Vec::new()),
    };

    // save and return all statetokens that we encountered.
    let tokens: Vec<String> = r.state_tokens().map(|t| t.to_string()).collect();
    let mut any_list_ok = false;

    for iflist in r.0.iter() {
        // find the resource that this list is about.
        let (p, valid) = match iflist.resource_tag {
            Some(ref url) => match DavPath::from_url(url, path.prefix()) {
                Ok(p) => (p, true),
                Err(_) => (path.clone(), false),
            },
            None => (path.clone(), true),
        };

        // now process the conditions. they must all be true.
        let mut list_ok = true;
        for cond in iflist.conditions.iter() {
            let cond_ok = match cond.item {
                davheaders::IfItem::StateToken(ref s) => {
                    // tokens in DAV: namespace always evaluate to false (10.4.8)
                    if !valid || s.starts_with("DAV:") {
                        false
                    } else {
                        match ls {
                            Some(ls) => ls.discover(&p).iter().any(|l| &l.token == s),
                            None => false,
                        }
                    }
                }
                davheaders::IfItem::ETag(ref tag) => {
                    if !valid {
                        false
                    } else {
                        match fs.metadata(&p).await {
                            Ok(meta) => ETag::from_meta(&*meta).is_some_and(|t| &t == tag),
                            Err(_) => false,
                        }
                    }
                }
            };
            if cond_ok == cond.not {
                list_ok = false;
                break;
            }
        }
        if list_ok {
            any_list_ok = true;
            break;
        }
    }
    if !any_list_ok {
        debug!("precondition fail: If {:?}", r.0);
    }
    (any_list_ok, tokens)
}

// Handle both the HTTP conditional If: headers, and the webdav If: header.
// Returns all state tokens seen in the If: header.
pub(crate) async fn if_match_get_tokens(
    req: &Request,
    meta: Option<&dyn DavMetaData>,
    fs: &dyn DavFileSystem,
    ls: Option<&dyn DavLockSystem>,
    path: &DavPath,
) -> Result<Vec<String>, StatusCode> {
    if let Some(code) = http_if_match(req, meta) {
        return Err(code);
    }
    match dav_if_match(req, fs, ls, path).await {
        (true, v) => Ok(v),
        (false, _) => Err(StatusCode::PRECONDITION_FAILED),
    }
}
