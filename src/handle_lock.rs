use std::cmp;
use std::time::Duration;

use bytes::Bytes;
use headers::HeaderMapExt;
use http::StatusCode as SC;
use http::{Request, Response, header};
use xmltree::Element;

use crate::body::Body;
use crate::davhandler::DavInner;
use crate::davheaders::{self, DavTimeout};
use crate::davpath::DavPath;
use crate::errors::*;
use crate::fs::FsError;
use crate::ls::*;
use crate::xmltree_ext::{self, ElementExt, NS_DAV};

impl DavInner {
    pub(crate) async fn handle_lock(&self, req: &Request<()>, mut path: DavPath, xmldata: &[u8]) -> DavResult<Response<Body>> {
        // must have a locksystem or bail
        let locksystem = match self.ls {
            Some(ref ls) => ls,
            None => return Err(SC::METHOD_NOT_ALLOWED.into()),
        };

        let meta = self.fs.metadata(&path).await.ok();
        if let Some(ref m) = meta {
            path.add_slash_if(m.is_dir());
        }

        // lock refresh?
        if xmldata.is_empty() {
            // the token comes from the If: header.
            if self.tokens.len() != 1 {
                return Err(SC::BAD_REQUEST.into());
            }
            let timeout = self.get_timeout(req);
            let lock = match locksystem.refresh(&path, &self.tokens[0], timeout) {
                Ok(lock) => lock,
                Err(e) => {
                    debug!("handle_lock: refresh {}: {}", path, e);
                    return Err(SC::PRECONDITION_FAILED.into());
                }
            };
            return lock_response(SC::OK, &lock);
        }

        // handle Depth:
        let depth = match req.headers().typed_try_get::<davheaders::Depth>() {
            Ok(Some(davheaders::Depth::Infinity)) | Ok(None) => LockDepth::Infinity,
            Ok(Some(davheaders::Depth::Zero)) => LockDepth::Zero,
            _ => return Err(SC::BAD_REQUEST.into()),
        };

        let (scope, owner) = parse_lockinfo(xmldata)?;

        // a new resource changes its collection.
        if meta.is_none() {
            self.check_lock(&path.parent(), false)?;
        }

        // create lock
        let timeout = self.get_timeout(req);
        let principal = self.principal.as_deref();
        let lock = match locksystem.lock(&path, principal, owner.as_ref(), timeout, scope, depth) {
            Ok(lock) => lock,
            Err(LockError::Conflict(l)) => {
                debug!("handle_lock: {} conflicts with lock {}", path, l.token);
                let mut res = lock_response(SC::LOCKED, &l)?;
                res.headers_mut().remove(&davheaders::LOCK_TOKEN);
                return Ok(res);
            }
            Err(e) => return Err(e.into()),
        };

        // try to create file if it doesn't exist.
        if meta.is_none() {
            if let Err(e) = self.fs.write(&path, Bytes::new()).await {
                if let Err(e) = locksystem.unlock(&path, &lock.token) {
                    debug!("handle_lock: releasing {} after failed create: {}", lock.token, e);
                }
                return match e {
                    FsError::NotFound | FsError::Conflict => Err(SC::CONFLICT.into()),
                    e => Err(e.into()),
                };
            }
        }

        let status = if meta.is_none() { SC::CREATED } else { SC::OK };
        lock_response(status, &lock)
    }

    pub(crate) async fn handle_unlock(&self, req: &Request<()>, path: DavPath) -> DavResult<Response<Body>> {
        // must have a locksystem or bail
        let locksystem = match self.ls {
            Some(ref ls) => ls,
            None => return Err(SC::METHOD_NOT_ALLOWED.into()),
        };

        // Must have Lock-Token header
        let t = req
            .headers()
            .typed_get::<davheaders::LockToken>()
            .ok_or(DavError::Status(SC::BAD_REQUEST))?;

        locksystem.unlock(&path, t.token())?;

        let mut res = Response::new(Body::empty());
        *res.status_mut() = SC::NO_CONTENT;
        Ok(res)
    }

    // process timeout header
    fn get_timeout(&self, req: &Request<()>) -> Option<Duration> {
        let clamp = |d: Duration| match self.lock_timeout_max {
            Some(max) => cmp::min(d, max),
            None => d,
        };
        match req.headers().typed_get::<davheaders::Timeout>() {
            Some(davheaders::Timeout(ref vec)) if !vec.is_empty() => match vec[0] {
                DavTimeout::Infinite => self.lock_timeout_max,
                DavTimeout::Seconds(0) => Some(clamp(self.lock_timeout_default)),
                DavTimeout::Seconds(n) => Some(clamp(Duration::from_secs(n as u64))),
            },
            _ => Some(clamp(self.lock_timeout_default)),
        }
    }
}

// decode a <D:lockinfo> body.
fn parse_lockinfo(xmldata: &[u8]) -> DavResult<(LockScope, Option<Element>)> {
    let tree = Element::parse2(xmldata)?;
    if !tree.is(NS_DAV, "lockinfo") {
        return Err(DavError::XmlParseError);
    }

    let mut scope = None;
    let mut owner = None;
    let mut locktype = false;

    for elem in tree.child_elems() {
        if elem.namespace.as_deref() != Some(NS_DAV) {
            continue;
        }
        let first = elem.child_elems().next().map(|e| e.name.as_str());
        match elem.name.as_str() {
            "lockscope" => match first {
                Some("exclusive") => scope = Some(LockScope::Exclusive),
                Some("shared") => scope = Some(LockScope::Shared),
                _ => return Err(DavError::XmlParseError),
            },
            "locktype" => match first {
                Some("write") => locktype = true,
                _ => return Err(DavError::XmlParseError),
            },
            "owner" => {
                let mut o = elem.clone();
                o.prefix = Some("D".to_owned());
                owner = Some(o);
            }
            _ => return Err(DavError::XmlParseError),
        }
    }

    // sanity check.
    match scope {
        Some(scope) if locktype => Ok((scope, owner)),
        _ => Err(DavError::XmlParseError),
    }
}

// <D:prop><D:lockdiscovery> response for one lock.
fn lock_response(status: SC, lock: &DavLock) -> DavResult<Response<Body>> {
    let mut ldis = Element::new2("D:lockdiscovery");
    ldis.push_elem(build_lock_prop(lock));
    let mut prop = Element::new2("D:prop").ns("D", NS_DAV);
    prop.push_elem(ldis);
    let buffer = xmltree_ext::write_document(&prop)?;

    let mut res = Response::new(Body::from(buffer));
    *res.status_mut() = status;
    res.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("application/xml; charset=utf-8"),
    );
    res.headers_mut()
        .typed_insert(davheaders::LockToken(format!("<{}>", lock.token)));
    Ok(res)
}

pub(crate) fn list_lockdiscovery(ls: &dyn DavLockSystem, path: &DavPath) -> Element {
    let mut elem = Element::new2("D:lockdiscovery");
    for lock in &ls.discover(path) {
        elem.push_elem(build_lock_prop(lock));
    }
    elem
}

pub(crate) fn list_supportedlock() -> Element {
    let mut elem = Element::new2("D:supportedlock");
    for s in ["D:exclusive", "D:shared"] {
        let mut scope = Element::new2("D:lockscope");
        scope.push_elem(Element::new2(s));
        let mut locktype = Element::new2("D:locktype");
        locktype.push_elem(Element::new2("D:write"));
        let mut entry = Element::new2("D:lockentry");
        entry.push_elem(scope);
        entry.push_elem(locktype);
        elem.push_elem(entry);
    }
    elem
}

fn build_lock_prop(lock: &DavLock) -> Element {
    let mut actlock = Element::new2("D:activelock");

    let mut elem = Element::new2("D:lockscope");
    elem.push_elem(match lock.scope {
        LockScope::Exclusive => Element::new2("D:exclusive"),
        LockScope::Shared => Element::new2("D:shared"),
    });
    actlock.push_elem(elem);

    let mut elem = Element::new2("D:locktype");
    elem.push_elem(Element::new2("D:write"));
    actlock.push_elem(elem);

    actlock.push_elem(Element::new_text(
        "D:depth",
        match lock.depth {
            LockDepth::Zero => "0",
            LockDepth::Infinity => "infinity",
        },
    ));

    actlock.push_elem(Element::new_text(
        "D:timeout",
        match lock.timeout {
            None => "Infinite".to_string(),
            Some(d) => format!("Second-{}", d.as_secs()),
        },
    ));

    let mut locktokenelem = Element::new2("D:locktoken");
    locktokenelem.push_elem(Element::new_text("D:href", lock.token.clone()));
    actlock.push_elem(locktokenelem);

    let mut lockroot = Element::new2("D:lockroot");
    lockroot.push_elem(Element::new_text("D:href", lock.path.as_url_string_with_prefix()));
    actlock.push_elem(lockroot);

    if let Some(ref o) = lock.owner {
        actlock.push_elem(o.clone());
    }
    actlock
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lockinfo() {
        let b = br#"<?xml version="1.0" encoding="utf-8" ?>
            <D:lockinfo xmlns:D="DAV:">
              <D:lockscope><D:shared/></D:lockscope>
              <D:locktype><D:write/></D:locktype>
              <D:owner><D:href>mailto:someone@example.com</D:href></D:owner>
            </D:lockinfo>"#;
        let (scope, owner) = parse_lockinfo(b).unwrap();
        assert_eq!(scope, LockScope::Shared);
        assert_eq!(owner.unwrap().name, "owner");

        let b = br#"<D:lockinfo xmlns:D="DAV:"><D:lockscope><D:exclusive/></D:lockscope></D:lockinfo>"#;
        assert!(parse_lockinfo(b).is_err());
        let b = br#"<D:propfind xmlns:D="DAV:"/>"#;
        assert!(parse_lockinfo(b).is_err());
    }

    #[test]
    fn supportedlock_lists_both_scopes() {
        let e = list_supportedlock();
        assert_eq!(e.child_elems().count(), 2);
        let entry = e.child_elems().next().unwrap();
        assert!(entry.get_child("locktype").is_some());
    }
}
