use headers::HeaderMapExt;
use http::{Request, Response, header};

use crate::body::Body;
use crate::davhandler::DavInner;
use crate::davpath::DavPath;
use crate::errors::DavResult;
use crate::util::{ALL_METHODS, DavMethod};

impl DavInner {
    pub(crate) async fn handle_options(&self, _req: &Request<()>, path: &DavPath) -> DavResult<Response<Body>> {
        let mut res = Response::new(Body::empty());

        let h = res.headers_mut();
        let dav = if self.ls.is_some() { "1,2" } else { "1" };
        h.insert("dav", header::HeaderValue::from_static(dav));
        h.insert("ms-author-via", header::HeaderValue::from_static("DAV"));
        h.typed_insert(headers::ContentLength(0));

        let meta = if path.is_star() {
            None
        } else {
            Some(self.fs.metadata(path).await)
        };
        let is_unmapped = matches!(meta, Some(Err(_)));
        let is_file = matches!(meta, Some(Ok(ref m)) if m.is_file());

        // Helper to add method to array if method is in fact allowed.
        let mm = |v: &mut Vec<&'static str>, m: DavMethod| {
            let islock = m == DavMethod::Lock || m == DavMethod::Unlock;
            if (!islock || self.ls.is_some())
                && (!m.is_write() || !self.read_only)
                && self.allow.is_none_or(|x| x.contains(m))
            {
                v.push(m.as_str());
            }
        };
        let mut v = Vec::new();

        if is_unmapped {
            for m in [DavMethod::Options, DavMethod::MkCol, DavMethod::Put, DavMethod::Lock] {
                mm(&mut v, m);
            }
        } else {
            for m in ALL_METHODS {
                let skip = match m {
                    DavMethod::Put => !is_file && !path.is_star(),
                    DavMethod::MkCol => true,
                    DavMethod::Move | DavMethod::Delete => path.is_root(),
                    _ => false,
                };
                if !skip {
                    mm(&mut v, m);
                }
            }
        }

        if let Ok(a) = header::HeaderValue::from_str(&v.join(",")) {
            res.headers_mut().insert(header::ALLOW, a);
        }
        Ok(res)
    }
}
