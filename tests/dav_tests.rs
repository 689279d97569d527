use std::time::Duration;

use bytes::Bytes;
use dav_engine::davpath::DavPath;
use dav_engine::fs::{DavDirEntry, DavFileSystem, DavMetaData, FsError, FsFuture};
use dav_engine::props::{DavProp, DavPropStore};
use dav_engine::{DavConfig, DavHandler, DavMethod, DavMethodSet, body::Body, memfs::MemFs, memls::MemLs};
use futures_util::future::{self, FutureExt};
use http::{Request, Response, StatusCode};

const LOCKINFO: &str = r#"<?xml version="1.0" encoding="utf-8" ?>
<D:lockinfo xmlns:D="DAV:">
  <D:lockscope><D:exclusive/></D:lockscope>
  <D:locktype><D:write/></D:locktype>
  <D:owner><D:href>mailto:test@example.com</D:href></D:owner>
</D:lockinfo>"#;

fn setup() -> DavHandler {
    let _ = env_logger::builder().is_test(true).try_init();
    let fs = MemFs::new();
    DavHandler::builder()
        .filesystem(fs.clone())
        .propstore(fs)
        .locksystem(MemLs::new())
        .build_handler()
}

async fn resp_to_string(mut resp: Response<Body>) -> String {
    use futures_util::StreamExt;

    let mut data = Vec::new();
    let body = resp.body_mut();

    while let Some(chunk) = body.next().await {
        match chunk {
            Ok(bytes) => data.extend_from_slice(&bytes),
            Err(e) => panic!("Error reading body stream: {}", e),
        }
    }

    String::from_utf8(data).unwrap_or_else(|_| "".to_string())
}

fn request(method: &str, uri: &str, headers: &[(&str, &str)], body: &str) -> Request<Body> {
    let mut req = Request::builder().method(method).uri(uri);
    for (k, v) in headers {
        req = req.header(*k, *v);
    }
    req.body(Body::from(body)).unwrap()
}

async fn call(server: &DavHandler, method: &str, uri: &str, headers: &[(&str, &str)], body: &str) -> Response<Body> {
    server.handle(request(method, uri, headers, body)).await
}

async fn call_as(
    server: &DavHandler,
    principal: &str,
    method: &str,
    uri: &str,
    headers: &[(&str, &str)],
    body: &str,
) -> Response<Body> {
    let config = DavConfig::new().principal(principal);
    server.handle_with(config, request(method, uri, headers, body)).await
}

async fn status(server: &DavHandler, method: &str, uri: &str) -> StatusCode {
    call(server, method, uri, &[], "").await.status()
}

async fn mkcols(server: &DavHandler, paths: &[&str]) {
    for p in paths {
        assert_eq!(status(server, "MKCOL", p).await, StatusCode::CREATED, "MKCOL {}", p);
    }
}

async fn puts(server: &DavHandler, paths: &[&str]) {
    for p in paths {
        let resp = call(server, "PUT", p, &[], "data").await;
        assert_eq!(resp.status(), StatusCode::CREATED, "PUT {}", p);
    }
}

fn lock_token(resp: &Response<Body>) -> String {
    let t = resp.headers()["lock-token"].to_str().unwrap();
    t.trim_matches(|c| c == '<' || c == '>').to_string()
}

async fn lock_as(server: &DavHandler, principal: &str, uri: &str, depth: &str) -> String {
    let resp = call_as(server, principal, "LOCK", uri, &[("depth", depth)], LOCKINFO).await;
    assert!(resp.status().is_success(), "LOCK {}: {}", uri, resp.status());
    lock_token(&resp)
}

#[tokio::test]
async fn put_get_mkcol() {
    let server = setup();

    assert_eq!(status(&server, "MKCOL", "/a").await, StatusCode::CREATED);
    assert_eq!(status(&server, "MKCOL", "/a").await, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(status(&server, "MKCOL", "/x/y").await, StatusCode::CONFLICT);
    let resp = call(&server, "MKCOL", "/b", &[], "<x/>").await;
    assert_eq!(resp.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);

    let resp = call(&server, "PUT", "/a/f.txt", &[], "hello").await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    assert!(resp.headers().contains_key("etag"));
    let resp = call(&server, "PUT", "/a/f.txt", &[], "hello world").await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    assert_eq!(status(&server, "PUT", "/nope/f.txt").await, StatusCode::CONFLICT);
    assert_eq!(status(&server, "PUT", "/a").await, StatusCode::METHOD_NOT_ALLOWED);

    let resp = call(&server, "GET", "/a/f.txt", &[], "").await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["content-type"], "text/plain");
    let etag = resp.headers()["etag"].to_str().unwrap().to_string();
    assert_eq!(resp_to_string(resp).await, "hello world");

    let resp = call(&server, "HEAD", "/a/f.txt", &[], "").await;
    assert_eq!(resp.headers()["content-length"], "11");
    assert_eq!(resp_to_string(resp).await, "");

    let resp = call(&server, "GET", "/a/f.txt", &[("if-none-match", etag.as_str())], "").await;
    assert_eq!(resp.status(), StatusCode::NOT_MODIFIED);
    let resp = call(&server, "PUT", "/a/f.txt", &[("if-match", "\"nope\"")], "x").await;
    assert_eq!(resp.status(), StatusCode::PRECONDITION_FAILED);

    // no autoindex configured.
    assert_eq!(status(&server, "GET", "/a/").await, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(status(&server, "GET", "/a/missing").await, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn lazy_folder_creation_and_autoindex() {
    let _ = env_logger::builder().is_test(true).try_init();
    let server = DavHandler::builder()
        .filesystem(MemFs::new())
        .lazy_folder_creation(true)
        .autoindex(true)
        .build_handler();

    assert_eq!(status(&server, "PUT", "/x/y/z.html").await, StatusCode::CREATED);
    let resp = call(&server, "GET", "/x/", &[], "").await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp_to_string(resp).await.contains("<a href=\"/x/y/\">y/</a>"));
    assert_eq!(status(&server, "GET", "/x").await, StatusCode::FOUND);
}

#[tokio::test]
async fn propfind_depth_one() {
    let server = setup();
    mkcols(&server, &["/c", "/c/b"]).await;
    puts(&server, &["/c/a", "/c/b/g"]).await;

    let resp = call(&server, "PROPFIND", "/c/", &[("depth", "1")], "").await;
    assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
    let text = resp_to_string(resp).await;
    assert_eq!(text.matches("<D:response>").count(), 3);
    assert!(text.contains("<D:href>/c/a</D:href>"));
    assert!(text.contains("<D:href>/c/b/</D:href>"));
    assert!(!text.contains("/c/b/g"));
    assert!(text.find("/c/a").unwrap() < text.find("/c/b/").unwrap());

    // no Depth header means infinity.
    let resp = call(&server, "PROPFIND", "/c/", &[], "").await;
    assert_eq!(resp_to_string(resp).await.matches("<D:response>").count(), 4);

    assert_eq!(status(&server, "PROPFIND", "/nope").await, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn propfind_named_props() {
    let server = setup();
    puts(&server, &["/f.txt"]).await;

    let body = r#"<D:propfind xmlns:D="DAV:"><D:prop><D:getcontentlength/><D:resourcetype/><X:nope xmlns:X="urn:x"/></D:prop></D:propfind>"#;
    let resp = call(&server, "PROPFIND", "/f.txt", &[("depth", "0")], body).await;
    assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
    let text = resp_to_string(resp).await;
    assert!(text.contains("<D:getcontentlength>4</D:getcontentlength>"));
    assert!(text.contains("HTTP/1.1 200 OK"));
    assert!(text.contains("HTTP/1.1 404 Not Found"));

    let body = r#"<D:propfind xmlns:D="DAV:"><D:propname/></D:propfind>"#;
    let resp = call(&server, "PROPFIND", "/f.txt", &[("depth", "0")], body).await;
    let text = resp_to_string(resp).await;
    assert!(text.contains("<D:getetag />") || text.contains("<D:getetag/>"));

    let resp = call(&server, "PROPFIND", "/f.txt", &[], "<bad").await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn proppatch() {
    let server = setup();
    puts(&server, &["/f"]).await;

    let live = r#"<D:propertyupdate xmlns:D="DAV:" xmlns:Z="urn:z">
        <D:set><D:prop><D:getetag>x</D:getetag><Z:color>red</Z:color></D:prop></D:set>
    </D:propertyupdate>"#;
    let resp = call(&server, "PROPPATCH", "/f", &[], live).await;
    assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
    let text = resp_to_string(resp).await;
    assert!(text.contains("HTTP/1.1 403 Forbidden"));
    assert!(text.contains("HTTP/1.1 424 Failed Dependency"));

    // nothing was applied.
    let find = r#"<D:propfind xmlns:D="DAV:" xmlns:Z="urn:z"><D:prop><Z:color/></D:prop></D:propfind>"#;
    let resp = call(&server, "PROPFIND", "/f", &[("depth", "0")], find).await;
    let text = resp_to_string(resp).await;
    assert!(text.contains("HTTP/1.1 404 Not Found"));
    assert!(!text.contains("red"));

    let dead = r#"<D:propertyupdate xmlns:D="DAV:" xmlns:Z="urn:z">
        <D:set><D:prop><Z:color>red</Z:color></D:prop></D:set>
    </D:propertyupdate>"#;
    let resp = call(&server, "PROPPATCH", "/f", &[], dead).await;
    assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
    assert!(resp_to_string(resp).await.contains("HTTP/1.1 200 OK"));

    let resp = call(&server, "PROPFIND", "/f", &[("depth", "0")], find).await;
    assert!(resp_to_string(resp).await.contains(">red</"));

    // dead properties travel with COPY.
    assert_eq!(
        call(&server, "COPY", "/f", &[("destination", "/g")], "").await.status(),
        StatusCode::CREATED
    );
    let resp = call(&server, "PROPFIND", "/g", &[("depth", "0")], find).await;
    assert!(resp_to_string(resp).await.contains(">red</"));
}

#[tokio::test]
async fn delete() {
    let server = setup();
    mkcols(&server, &["/d", "/d/sub"]).await;
    puts(&server, &["/d/f", "/d/sub/g", "/x"]).await;

    let resp = call(&server, "DELETE", "/x", &[], "").await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    assert_eq!(resp_to_string(resp).await, "");
    assert_eq!(status(&server, "GET", "/x").await, StatusCode::NOT_FOUND);
    assert_eq!(status(&server, "DELETE", "/x").await, StatusCode::NOT_FOUND);

    let resp = call(&server, "DELETE", "/d", &[("depth", "0")], "").await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(status(&server, "DELETE", "/").await, StatusCode::FORBIDDEN);

    assert_eq!(status(&server, "DELETE", "/d/").await, StatusCode::NO_CONTENT);
    assert_eq!(status(&server, "PROPFIND", "/d/sub/g").await, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn delete_keeps_locked_member() {
    let server = setup();
    mkcols(&server, &["/d"]).await;
    puts(&server, &["/d/a", "/d/locked", "/d/z"]).await;
    lock_as(&server, "alice", "/d/locked", "0").await;

    let resp = call_as(&server, "bob", "DELETE", "/d", &[], "").await;
    assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
    let text = resp_to_string(resp).await;
    assert!(text.contains("<D:href>/d/locked</D:href>"));
    assert!(text.contains("HTTP/1.1 423 Locked"));
    assert!(text.contains("lock-token-submitted"));

    assert_eq!(status(&server, "GET", "/d/locked").await, StatusCode::OK);
    assert_eq!(status(&server, "GET", "/d/a").await, StatusCode::NOT_FOUND);
    assert_eq!(status(&server, "GET", "/d/z").await, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn move_with_locked_child() {
    let server = setup();
    mkcols(&server, &["/src", "/src/sub"]).await;
    puts(&server, &["/src/a", "/src/locked", "/src/sub/f"]).await;
    lock_as(&server, "alice", "/src/locked", "infinity").await;

    let hdrs = [("destination", "http://localhost/dst")];
    let resp = call_as(&server, "bob", "MOVE", "/src", &hdrs, "").await;
    assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
    let text = resp_to_string(resp).await;
    assert!(text.contains("<D:href>/src/locked</D:href>"));
    assert!(text.contains("HTTP/1.1 423 Locked"));

    // the locked member stays, its siblings moved.
    assert_eq!(status(&server, "GET", "/src/locked").await, StatusCode::OK);
    assert_eq!(status(&server, "GET", "/dst/locked").await, StatusCode::NOT_FOUND);
    assert_eq!(status(&server, "GET", "/dst/a").await, StatusCode::OK);
    assert_eq!(status(&server, "GET", "/dst/sub/f").await, StatusCode::OK);
    assert_eq!(status(&server, "GET", "/src/a").await, StatusCode::NOT_FOUND);
    assert_eq!(status(&server, "GET", "/src/sub/f").await, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn move_and_copy() {
    let server = setup();
    mkcols(&server, &["/m", "/m/sub"]).await;
    puts(&server, &["/m/sub/f", "/other"]).await;

    // no destination, into itself, missing parent.
    assert_eq!(status(&server, "MOVE", "/m").await, StatusCode::BAD_REQUEST);
    let resp = call(&server, "MOVE", "/m", &[("destination", "/m/sub/x")], "").await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let resp = call(&server, "COPY", "/m", &[("destination", "/m")], "").await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let resp = call(&server, "COPY", "/m", &[("destination", "/no/where")], "").await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let resp = call(&server, "MOVE", "/m", &[("destination", "/n"), ("depth", "0")], "").await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    // shallow copy of a collection.
    let resp = call(&server, "COPY", "/m", &[("destination", "/shallow"), ("depth", "0")], "").await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    assert_eq!(status(&server, "PROPFIND", "/shallow/").await, StatusCode::MULTI_STATUS);
    assert_eq!(status(&server, "GET", "/shallow/sub/f").await, StatusCode::NOT_FOUND);

    let resp = call(&server, "COPY", "/m", &[("destination", "/n")], "").await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    assert_eq!(status(&server, "GET", "/n/sub/f").await, StatusCode::OK);

    let hdrs = [("destination", "/n"), ("overwrite", "F")];
    assert_eq!(call(&server, "COPY", "/other", &hdrs, "").await.status(), StatusCode::PRECONDITION_FAILED);
    assert_eq!(status(&server, "GET", "/n/sub/f").await, StatusCode::OK);

    let resp = call(&server, "MOVE", "/other", &[("destination", "/n")], "").await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    assert_eq!(status(&server, "GET", "/n").await, StatusCode::OK);
    assert_eq!(status(&server, "GET", "/other").await, StatusCode::NOT_FOUND);

    let resp = call(&server, "MOVE", "/m/", &[("destination", "/moved/")], "").await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    assert_eq!(status(&server, "GET", "/moved/sub/f").await, StatusCode::OK);
    assert_eq!(status(&server, "PROPFIND", "/m").await, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn overwrite_false_onto_own_lock() {
    let server = setup();
    puts(&server, &["/a", "/b"]).await;
    let token = lock_as(&server, "alice", "/b", "0").await;
    let iff = format!("<http://localhost/b> (<{}>)", token);
    let hdrs = [("destination", "/b"), ("overwrite", "F"), ("if", iff.as_str())];
    let resp = call_as(&server, "alice", "COPY", "/a", &hdrs, "").await;
    assert_eq!(resp.status(), StatusCode::PRECONDITION_FAILED);
}

#[tokio::test]
async fn lock_unlock() {
    let server = setup();
    puts(&server, &["/f"]).await;

    // LOCK on an unmapped URL creates the resource.
    let resp = call(&server, "LOCK", "/new.txt", &[], LOCKINFO).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let token = lock_token(&resp);
    assert!(token.starts_with("urn:uuid:"));
    let text = resp_to_string(resp).await;
    assert!(text.contains("<D:lockdiscovery>"));
    assert!(text.contains("Second-3600"));

    assert_eq!(status(&server, "PUT", "/new.txt").await, StatusCode::LOCKED);
    let iff = format!("(<{}>)", token);
    let resp = call(&server, "PUT", "/new.txt", &[("if", iff.as_str())], "data").await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    // a second exclusive lock conflicts.
    let resp = call(&server, "LOCK", "/new.txt", &[], LOCKINFO).await;
    assert_eq!(resp.status(), StatusCode::LOCKED);
    assert!(resp_to_string(resp).await.contains(&token));

    // refresh.
    let resp = call(&server, "LOCK", "/new.txt", &[("if", iff.as_str()), ("timeout", "Second-100")], "").await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp_to_string(resp).await.contains("Second-100"));
    assert_eq!(status(&server, "LOCK", "/new.txt").await, StatusCode::BAD_REQUEST);
    let resp = call(&server, "LOCK", "/new.txt", &[("depth", "1")], LOCKINFO).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let lt = format!("<{}>", token);
    let resp = call(&server, "UNLOCK", "/new.txt", &[("lock-token", lt.as_str())], "").await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    let resp = call(&server, "UNLOCK", "/new.txt", &[("lock-token", lt.as_str())], "").await;
    assert!(resp.status().is_client_error());
    assert_eq!(status(&server, "UNLOCK", "/new.txt").await, StatusCode::BAD_REQUEST);

    let resp = call(&server, "UNLOCK", "/f", &[("lock-token", "<urn:uuid:never-issued>")], "").await;
    assert!(resp.status().is_client_error());

    // a lock that does not cover the path.
    let token = lock_as(&server, "alice", "/f", "0").await;
    let lt = format!("<{}>", token);
    let resp = call(&server, "UNLOCK", "/new.txt", &[("lock-token", lt.as_str())], "").await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    // missing parent.
    let resp = call(&server, "LOCK", "/no/such", &[], LOCKINFO).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    // and the lock taken for it was given back.
    mkcols(&server, &["/no"]).await;
    assert_eq!(status(&server, "PUT", "/no/such").await, StatusCode::CREATED);
}

#[tokio::test]
async fn unlock_expired_token() {
    let server = setup();
    puts(&server, &["/f"]).await;
    let resp = call(&server, "LOCK", "/f", &[("timeout", "Second-1")], LOCKINFO).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let lt = format!("<{}>", lock_token(&resp));

    tokio::time::sleep(Duration::from_millis(1200)).await;

    let resp = call(&server, "UNLOCK", "/f", &[("lock-token", lt.as_str())], "").await;
    assert!(resp.status().is_client_error());
    assert_eq!(status(&server, "PUT", "/f").await, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn deep_lock_is_atomic() {
    let server = setup();
    mkcols(&server, &["/t", "/t/x"]).await;
    puts(&server, &["/t/x/f", "/t/y"]).await;
    lock_as(&server, "alice", "/t/x/f", "0").await;

    let resp = call_as(&server, "bob", "LOCK", "/t", &[("depth", "infinity")], LOCKINFO).await;
    assert_eq!(resp.status(), StatusCode::LOCKED);

    // nothing below /t was locked for bob.
    let resp = call_as(&server, "carol", "PUT", "/t/y", &[], "x").await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    // depth 0 on the collection does not care about members.
    let resp = call_as(&server, "bob", "LOCK", "/t", &[("depth", "0")], LOCKINFO).await;
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn options() {
    let server = setup();
    puts(&server, &["/f"]).await;

    let resp = call(&server, "OPTIONS", "/f", &[], "").await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["dav"], "1,2");
    let allow = resp.headers()["allow"].to_str().unwrap().to_string();
    assert!(allow.contains("PROPFIND"));
    assert!(allow.contains("LOCK"));
    assert!(!allow.contains("MKCOL"));

    let resp = call(&server, "OPTIONS", "/unmapped", &[], "").await;
    assert!(resp.headers()["allow"].to_str().unwrap().contains("MKCOL"));

    let server = DavHandler::builder().filesystem(MemFs::new()).build_handler();
    let resp = call(&server, "OPTIONS", "/", &[], "").await;
    assert_eq!(resp.headers()["dav"], "1");
    assert!(!resp.headers()["allow"].to_str().unwrap().contains("LOCK"));
}

#[tokio::test]
async fn dispatcher() {
    let _ = env_logger::builder().is_test(true).try_init();
    let server = setup();
    assert_eq!(status(&server, "PATCH", "/").await, StatusCode::NOT_IMPLEMENTED);
    assert_eq!(status(&server, "LOCK", "/").await, StatusCode::BAD_REQUEST);
    let resp = call(&server, "GET", "/", &[], "body").await;
    assert_eq!(resp.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert_eq!(status(&server, "GET", "/../..").await, StatusCode::FORBIDDEN);

    let fs = MemFs::new();
    let ro = DavHandler::builder()
        .filesystem(fs.clone())
        .read_only(true)
        .build_handler();
    assert_eq!(status(&ro, "PUT", "/f").await, StatusCode::FORBIDDEN);
    assert_eq!(status(&ro, "MKCOL", "/d").await, StatusCode::FORBIDDEN);
    assert_eq!(status(&ro, "PROPFIND", "/").await, StatusCode::MULTI_STATUS);

    let mut methods = DavMethodSet::WEBDAV_RO;
    methods.remove(DavMethod::PropFind);
    let limited = DavHandler::builder().filesystem(fs).methods(methods).build_handler();
    let resp = call(&limited, "PROPFIND", "/", &[], "").await;
    assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(resp.headers()["connection"], "close");

    let small = DavHandler::builder()
        .filesystem(MemFs::new())
        .max_request_size(16)
        .build_handler();
    let body = r#"<D:propfind xmlns:D="DAV:"><D:allprop/></D:propfind>"#;
    let resp = call(&small, "PROPFIND", "/", &[], body).await;
    assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);

    let empty = DavHandler::builder().build_handler();
    assert_eq!(status(&empty, "GET", "/").await, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(status(&empty, "OPTIONS", "/").await, StatusCode::OK);

    let prefixed = DavHandler::builder()
        .filesystem(MemFs::new())
        .strip_prefix("/dav")
        .build_handler();
    assert_eq!(status(&prefixed, "PUT", "/dav/f").await, StatusCode::CREATED);
    let resp = call(&prefixed, "PROPFIND", "/dav/", &[("depth", "1")], "").await;
    assert!(resp_to_string(resp).await.contains("<D:href>/dav/f</D:href>"));
    assert_eq!(status(&prefixed, "GET", "/elsewhere/f").await, StatusCode::BAD_GATEWAY);
}

// A property store that answers with a fixed error.
#[derive(Debug, Clone)]
struct BrokenProps {
    read: Option<FsError>,
    write: Option<FsError>,
}

fn outcome<'a, T: Send + 'a>(err: Option<FsError>, ok: T) -> FsFuture<'a, T> {
    future::ready(err.map_or(Ok(ok), Err)).boxed()
}

impl DavPropStore for BrokenProps {
    fn get_props<'a>(&'a self, _path: &'a DavPath) -> FsFuture<'a, Vec<DavProp>> {
        outcome(self.read, Vec::new())
    }
    fn set_prop<'a>(&'a self, _path: &'a DavPath, _prop: DavProp) -> FsFuture<'a, ()> {
        outcome(self.write, ())
    }
    fn remove_prop<'a>(&'a self, _path: &'a DavPath, _prop: &'a DavProp) -> FsFuture<'a, ()> {
        outcome(self.write, ())
    }
    fn copy_props<'a>(&'a self, _from: &'a DavPath, _to: &'a DavPath) -> FsFuture<'a, ()> {
        outcome(self.write, ())
    }
    fn rename_props<'a>(&'a self, _from: &'a DavPath, _to: &'a DavPath) -> FsFuture<'a, ()> {
        outcome(self.write, ())
    }
    fn delete_props<'a>(&'a self, _path: &'a DavPath) -> FsFuture<'a, ()> {
        outcome(self.write, ())
    }
}

fn setup_broken(read: Option<FsError>, write: Option<FsError>) -> DavHandler {
    let _ = env_logger::builder().is_test(true).try_init();
    DavHandler::builder()
        .filesystem(MemFs::new())
        .propstore(Box::new(BrokenProps { read, write }))
        .build_handler()
}

#[tokio::test]
async fn propfind_reports_unreadable_props() {
    let server = setup_broken(Some(FsError::GeneralFailure), None);
    puts(&server, &["/f"]).await;

    for body in ["", r#"<D:propfind xmlns:D="DAV:"><D:propname/></D:propfind>"#] {
        let resp = call(&server, "PROPFIND", "/f", &[("depth", "0")], body).await;
        assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
        let text = resp_to_string(resp).await;
        assert!(text.contains("HTTP/1.1 200 OK"), "{}", text);
        assert!(text.contains("HTTP/1.1 500 Internal Server Error"), "{}", text);
    }
}

#[tokio::test]
async fn copy_move_delete_report_prop_store_failures() {
    let server = setup_broken(None, Some(FsError::InsufficientStorage));
    puts(&server, &["/f"]).await;

    let resp = call(&server, "COPY", "/f", &[("destination", "/g")], "").await;
    assert_eq!(resp.status(), StatusCode::INSUFFICIENT_STORAGE);
    assert_eq!(status(&server, "GET", "/g").await, StatusCode::OK);

    let resp = call(&server, "MOVE", "/g", &[("destination", "/h")], "").await;
    assert_eq!(resp.status(), StatusCode::INSUFFICIENT_STORAGE);
    assert_eq!(status(&server, "GET", "/h").await, StatusCode::OK);
    assert_eq!(status(&server, "GET", "/g").await, StatusCode::NOT_FOUND);

    assert_eq!(status(&server, "DELETE", "/h").await, StatusCode::INSUFFICIENT_STORAGE);
    assert_eq!(status(&server, "GET", "/h").await, StatusCode::NOT_FOUND);

    // a collection copy reports the member whose properties were lost.
    mkcols(&server, &["/c"]).await;
    let resp = call(&server, "PUT", "/c/a", &[], "data").await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let resp = call(&server, "COPY", "/c", &[("destination", "/d")], "").await;
    assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
    let text = resp_to_string(resp).await;
    assert!(text.contains("<D:href>/d/a</D:href>"));
    assert!(text.contains("HTTP/1.1 507 Insufficient Storage"));
}

#[tokio::test]
async fn partial_copy_into_full_storage() {
    let _ = env_logger::builder().is_test(true).try_init();
    let server = DavHandler::builder()
        .filesystem(MemFs::with_quota(14))
        .build_handler();
    mkcols(&server, &["/c"]).await;
    puts(&server, &["/c/a", "/c/b"]).await;

    let resp = call(&server, "COPY", "/c", &[("destination", "/d")], "").await;
    assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
    let text = resp_to_string(resp).await;
    assert_eq!(text.matches("<D:response>").count(), 1);
    assert!(text.contains("<D:href>/d/b</D:href>"));
    assert!(text.contains("HTTP/1.1 507 Insufficient Storage"));

    // what fit is there.
    assert_eq!(status(&server, "GET", "/d/a").await, StatusCode::OK);
    assert_eq!(status(&server, "GET", "/d/b").await, StatusCode::NOT_FOUND);
}

// A filesystem whose collections below /d/secret can not be listed.
#[derive(Debug, Clone)]
struct Unlistable(Box<MemFs>);

impl DavFileSystem for Unlistable {
    fn metadata<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, Box<dyn DavMetaData>> {
        self.0.metadata(path)
    }
    fn read_dir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, Vec<DavDirEntry>> {
        if path.as_bytes().starts_with(b"/d/secret") {
            return future::ready(Err(FsError::Forbidden)).boxed();
        }
        self.0.read_dir(path)
    }
    fn read<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, Bytes> {
        self.0.read(path)
    }
    fn write<'a>(&'a self, path: &'a DavPath, data: Bytes) -> FsFuture<'a, ()> {
        self.0.write(path, data)
    }
    fn create_dir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        self.0.create_dir(path)
    }
}

#[tokio::test]
async fn propfind_reports_unlistable_collection() {
    let _ = env_logger::builder().is_test(true).try_init();
    let server = DavHandler::builder()
        .filesystem(Box::new(Unlistable(MemFs::new())))
        .build_handler();
    mkcols(&server, &["/d", "/d/secret"]).await;
    puts(&server, &["/d/a", "/d/secret/f"]).await;

    let resp = call(&server, "PROPFIND", "/d/", &[], "").await;
    assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
    let text = resp_to_string(resp).await;
    assert_eq!(text.matches("<D:response>").count(), 4);
    assert_eq!(text.matches("<D:href>/d/secret/</D:href>").count(), 2);
    assert!(text.contains("HTTP/1.1 403 Forbidden"));
    assert!(!text.contains("/d/secret/f"));
}
