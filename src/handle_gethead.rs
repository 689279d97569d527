use chrono::{DateTime, Utc};
use headers::HeaderMapExt;
use http::{Request, Response, StatusCode, header};

use crate::body::Body;
use crate::conditional;
use crate::davhandler::DavInner;
use crate::davheaders::ETag;
use crate::davpath::DavPath;
use crate::errors::*;
use crate::fs::*;
use crate::util::DavMethod;

impl DavInner {
    pub(crate) async fn handle_get(&self, req: &Request<()>, path: DavPath, head: bool) -> DavResult<Response<Body>> {
        // check if it's a directory.
        let meta = self.fs.metadata(&path).await?;
        if meta.is_dir() {
            return self.handle_dirlist(req, path, head).await;
        }
        self.serve_file(req, &path, meta, head).await
    }

    async fn serve_file(
        &self,
        req: &Request<()>,
        path: &DavPath,
        meta: Box<dyn DavMetaData>,
        head: bool,
    ) -> DavResult<Response<Body>> {
        let mut res = Response::new(Body::empty());

        // set Last-Modified and ETag headers.
        if let Ok(modified) = meta.modified() {
            res.headers_mut().typed_insert(headers::LastModified::from(modified));
        }
        if let Some(etag) = ETag::from_meta(&*meta) {
            res.headers_mut().typed_insert(etag);
        }

        // handle the if-headers.
        if let Some(s) = conditional::http_if_match(req, Some(&*meta)) {
            if s != StatusCode::NOT_MODIFIED {
                return Err(s.into());
            }
            *res.status_mut() = s;
            return Ok(res);
        }

        let content_type = path.get_mime_type_str();
        res.headers_mut()
            .insert(header::CONTENT_TYPE, header::HeaderValue::from_static(content_type));

        if head {
            res.headers_mut().typed_insert(headers::ContentLength(meta.len()));
            return Ok(res);
        }

        let data = self.fs.read(path).await?;
        debug!("handle_get: sending {} bytes", data.len());
        res.headers_mut().typed_insert(headers::ContentLength(data.len() as u64));
        *res.body_mut() = Body::from(data);
        Ok(res)
    }

    async fn handle_dirlist(&self, req: &Request<()>, path: DavPath, head: bool) -> DavResult<Response<Body>> {
        let mut res = Response::new(Body::empty());

        // This is a directory. If the path doesn't end in "/", send a redir.
        // Most webdav clients handle redirect really bad, but a client asking
        // for a directory index is usually a browser.
        if !path.is_collection() {
            let mut path = path.clone();
            path.add_slash();
            if let Ok(loc) = header::HeaderValue::from_str(&path.as_url_string_with_prefix()) {
                res.headers_mut().insert(header::LOCATION, loc);
            }
            res.headers_mut().typed_insert(headers::ContentLength(0));
            *res.status_mut() = StatusCode::FOUND;
            return Ok(res);
        }

        // Serve the index file, if there is one.
        if let Some(ref indexfile) = self.indexfile {
            let index = path.join(indexfile.as_bytes());
            if let Ok(meta) = self.fs.metadata(&index).await {
                if meta.is_file() {
                    return self.serve_file(req, &index, meta, head).await;
                }
            }
        }

        // If we do not allow PROPFIND, we don't allow directory indexes either.
        let propfind_ok = self.allow.is_none_or(|a| a.contains(DavMethod::PropFind));
        if !self.autoindex || !propfind_ok {
            debug!("no directory index for {}", path);
            return Err(StatusCode::METHOD_NOT_ALLOWED.into());
        }

        // read directory or bail.
        let entries = self.fs.read_dir(&path).await?;

        // transform all entries into a dirent struct.
        struct Dirent {
            path: String,
            name: String,
            meta: Box<dyn DavMetaData>,
        }

        let mut dirents: Vec<Dirent> = Vec::new();
        for entry in entries {
            if entry.name.starts_with(b".") {
                continue;
            }
            let mut name = entry.name;
            let mut npath = path.join(&name);
            if entry.meta.is_dir() {
                name.push(b'/');
                npath.add_slash();
            }
            dirents.push(Dirent {
                path: npath.as_url_string_with_prefix(),
                name: String::from_utf8_lossy(&name).to_string(),
                meta: entry.meta,
            });
        }

        // directories first, then by name.
        dirents.sort_by(|a, b| b.meta.is_dir().cmp(&a.meta.is_dir()).then_with(|| a.name.cmp(&b.name)));

        // and output html
        let upath = htmlescape::encode_minimal(&path.as_url_string_with_prefix());
        let mut w = String::new();
        w.push_str("<html><head>");
        w.push_str(&format!("<title>Index of {}</title>", upath));
        w.push_str("<style>");
        w.push_str("table { border-collapse: separate; border-spacing: 1.5em 0.25em; }");
        w.push_str(".mono { font-family: monospace; }");
        w.push_str("</style>");
        w.push_str("</head>");

        w.push_str("<body>");
        w.push_str(&format!("<h1>Index of {}</h1>", upath));
        w.push_str("<table>");
        w.push_str("<tr><th>Name</th><th>Last modified</th><th>Size</th></tr>");
        w.push_str("<tr><th colspan=\"3\"><hr></th></tr>");
        if !path.is_root() {
            w.push_str("<tr><td><a href=\"..\">Parent Directory</a></td><td>&nbsp;</td><td class=\"mono\" align=\"right\">[DIR]</td></tr>");
        }

        for dirent in &dirents {
            let modified = match dirent.meta.modified() {
                Ok(t) => DateTime::<Utc>::from(t).format("%Y-%m-%d %H:%M").to_string(),
                Err(_) => "".to_string(),
            };
            let size = match dirent.meta.is_file() {
                true => dirent.meta.len().to_string(),
                false => "[DIR]".to_string(),
            };
            let name = htmlescape::encode_minimal(&dirent.name);
            let href = htmlescape::encode_minimal(&dirent.path);
            w.push_str(&format!(
                "<tr><td><a href=\"{}\">{}</a></td><td class=\"mono\">{}</td><td class=\"mono\" align=\"right\">{}</td></tr>",
                href, name, modified, size
            ));
        }

        w.push_str("<tr><th colspan=\"3\"><hr></th></tr>");
        w.push_str("</table></body></html>");

        res.headers_mut().insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("text/html; charset=utf-8"),
        );
        res.headers_mut().typed_insert(headers::ContentLength(w.len() as u64));
        if !head {
            *res.body_mut() = Body::from(w);
        }
        Ok(res)
    }
}
