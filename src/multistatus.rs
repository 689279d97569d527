//! Multi-Status builder.
//!
//! Handlers `record` one outcome per resource and `finish` the builder.
//! Recursive operations only record what went wrong; when nothing was
//! recorded the response is the plain success status. A single simple
//! outcome for the request root is sent as a bare status as well.
//! Everything else becomes a `207 Multi-Status` body, with the entries
//! in the order they were recorded.
use http::{Response, StatusCode, header};
use xmltree::Element;

use crate::body::Body;
use crate::davpath::DavPath;
use crate::errors::DavResult;
use crate::xmltree_ext::{self, ElementExt, NS_DAV};

/// Properties that share one status, as reported by PROPFIND and PROPPATCH.
#[derive(Debug, Clone)]
pub(crate) struct PropStat {
    pub status: StatusCode,
    pub props: Vec<Element>,
}

#[derive(Debug)]
enum Outcome {
    Status {
        status: StatusCode,
        error: Option<Element>,
    },
    PropStats(Vec<PropStat>),
}

#[derive(Debug)]
pub(crate) struct MultiStatus {
    root: DavPath,
    entries: Vec<(DavPath, Outcome)>,
}

pub(crate) fn status_line(status: StatusCode) -> String {
    format!(
        "HTTP/1.1 {} {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("")
    )
}

impl MultiStatus {
    pub fn begin(root: &DavPath) -> MultiStatus {
        MultiStatus {
            root: root.clone(),
            entries: Vec::new(),
        }
    }

    /// Record a simple status for one resource.
    pub fn record(&mut self, path: &DavPath, status: StatusCode) {
        trace!("multistatus: {} {}", path, status);
        self.entries.push((path.clone(), Outcome::Status { status, error: None }));
    }

    /// Record `423 Locked` for a resource, naming the root of the lock
    /// that was in the way.
    pub fn record_locked(&mut self, path: &DavPath, lock_root: &DavPath) {
        trace!("multistatus: {} locked by lock on {}", path, lock_root);
        let mut submitted = Element::new2("D:lock-token-submitted");
        submitted.push_elem(Element::new_text("D:href", lock_root.as_url_string_with_prefix()));
        let mut error = Element::new2("D:error");
        error.push_elem(submitted);
        self.entries.push((
            path.clone(),
            Outcome::Status {
                status: StatusCode::LOCKED,
                error: Some(error),
            },
        ));
    }

    /// Record a property result set for one resource.
    pub fn record_props(&mut self, path: &DavPath, propstats: Vec<PropStat>) {
        self.entries.push((path.clone(), Outcome::PropStats(propstats)));
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Build the response. `success` is used if nothing was recorded.
    pub fn finish(self, success: StatusCode) -> DavResult<Response<Body>> {
        let mut res = Response::new(Body::empty());

        match self.entries.as_slice() {
            [] => {
                *res.status_mut() = success;
                return Ok(res);
            }
            [(path, Outcome::Status { status, error: None })] if *path == self.root => {
                *res.status_mut() = *status;
                return Ok(res);
            }
            _ => {}
        }

        let mut ms = Element::new2("D:multistatus").ns("D", NS_DAV);
        for (path, outcome) in self.entries {
            ms.push_elem(response_elem(&path, outcome));
        }
        let body = xmltree_ext::write_document(&ms)?;

        *res.status_mut() = StatusCode::MULTI_STATUS;
        res.headers_mut().insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/xml; charset=utf-8"),
        );
        *res.body_mut() = Body::from(body);
        Ok(res)
    }
}

fn response_elem(path: &DavPath, outcome: Outcome) -> Element {
    let mut r = Element::new2("D:response");
    r.push_elem(Element::new_text("D:href", path.as_url_string_with_prefix()));
    match outcome {
        Outcome::Status { status, error } => {
            r.push_elem(Element::new_text("D:status", status_line(status)));
            if let Some(e) = error {
                r.push_elem(e);
            }
        }
        Outcome::PropStats(propstats) => {
            for ps in propstats {
                let mut prop = Element::new2("D:prop");
                for p in ps.props {
                    prop.push_elem(p);
                }
                let mut pstat = Element::new2("D:propstat");
                pstat.push_elem(prop);
                pstat.push_elem(Element::new_text("D:status", status_line(ps.status)));
                r.push_elem(pstat);
            }
        }
    }
    r
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> DavPath {
        DavPath::new(s).unwrap()
    }

    fn body(res: Response<Body>) -> String {
        String::from_utf8(res.into_body().into_bytes().to_vec()).unwrap()
    }

    #[test]
    fn nothing_recorded() {
        let ms = MultiStatus::begin(&p("/a/"));
        let res = ms.finish(StatusCode::NO_CONTENT).unwrap();
        assert_eq!(res.status(), StatusCode::NO_CONTENT);
        assert!(res.body().as_bytes().is_empty());
    }

    #[test]
    fn collapses_for_root() {
        let mut ms = MultiStatus::begin(&p("/a/"));
        ms.record(&p("/a"), StatusCode::FORBIDDEN);
        let res = ms.finish(StatusCode::NO_CONTENT).unwrap();
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn member_failure_is_multistatus() {
        let mut ms = MultiStatus::begin(&p("/a/"));
        ms.record_locked(&p("/a/b c"), &p("/a/b c"));
        ms.record(&p("/a/d"), StatusCode::INSUFFICIENT_STORAGE);
        let res = ms.finish(StatusCode::NO_CONTENT).unwrap();
        assert_eq!(res.status(), StatusCode::MULTI_STATUS);
        let b = body(res);
        assert!(b.contains("<D:href>/a/b%20c</D:href>"));
        assert!(b.contains("HTTP/1.1 423 Locked"));
        assert!(b.contains("D:lock-token-submitted"));
        assert!(b.contains("HTTP/1.1 507 Insufficient Storage"));
        assert!(b.find("/a/b%20c").unwrap() < b.find("/a/d").unwrap());
    }

    #[test]
    fn props_are_never_collapsed() {
        let mut ms = MultiStatus::begin(&p("/"));
        ms.record_props(
            &p("/"),
            vec![PropStat {
                status: StatusCode::OK,
                props: vec![Element::new2("D:displayname")],
            }],
        );
        let res = ms.finish(StatusCode::OK).unwrap();
        assert_eq!(res.status(), StatusCode::MULTI_STATUS);
        assert!(body(res).contains("<D:propstat><D:prop><D:displayname"));
    }
}
