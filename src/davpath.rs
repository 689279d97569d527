//! Utility module to handle the path part of an URL.
//!
//! A `DavPath` is always normalized: absolute, percent-decoded, no
//! `.` or `..` segments and no doubled slashes. A trailing slash marks
//! a collection. Comparison ignores the trailing slash.
use std::fmt;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode, percent_encode};

use crate::errors::DavError;

/// Path information relative to a prefix.
#[derive(Clone)]
pub struct DavPath {
    pub(crate) path: Vec<u8>,
    pub(crate) prefix: String,
}

// Encode all non-unreserved characters, except '/'.
// See RFC3986, and https://en.wikipedia.org/wiki/Percent-encoding .
const PATH_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'/');

impl fmt::Display for DavPath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_url_string_with_prefix())
    }
}

impl fmt::Debug for DavPath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.prefix.is_empty() {
            write!(f, "{:?}", self.as_url_string())
        } else {
            write!(f, "\"{}[{}]\"", self.prefix, self.as_url_string())
        }
    }
}

/// Error returned by some of the DavPath methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// cannot parse
    #[error("invalid path")]
    InvalidPath,
    /// outside of prefix
    #[error("path outside of prefix")]
    IllegalPath,
    /// too many dotdots
    #[error("path escapes root")]
    ForbiddenPath,
}

impl From<ParseError> for DavError {
    fn from(e: ParseError) -> Self {
        match e {
            ParseError::InvalidPath => DavError::InvalidPath,
            ParseError::IllegalPath => DavError::IllegalPath,
            ParseError::ForbiddenPath => DavError::ForbiddenPath,
        }
    }
}

// a decoded segment can contain any value except '/' or '\0'
fn valid_segment(src: &[u8]) -> Result<(), ParseError> {
    if percent_decode(src).any(|x| x == 0 || x == b'/') {
        return Err(ParseError::InvalidPath);
    }
    Ok(())
}

// make path safe:
// - raw path before decoding can contain only printable ascii
// - make sure path is absolute
// - remove query part (everything after ?)
// - merge consecutive slashes
// - process . and ..
// - decode percent encoded bytes
// - do not allow NUL or '/' in segments.
fn normalize_path(rp: &[u8]) -> Result<Vec<u8>, ParseError> {
    if rp.iter().any(|&x| !(32..=126).contains(&x)) {
        return Err(ParseError::InvalidPath);
    }

    // don't allow fragments. query part gets deleted.
    let mut rawpath = rp;
    if let Some(pos) = rawpath.iter().position(|&x| x == b'?' || x == b'#') {
        if rawpath[pos] == b'#' {
            return Err(ParseError::InvalidPath);
        }
        rawpath = &rawpath[..pos];
    }

    if rawpath.first() != Some(&b'/') {
        return Err(ParseError::InvalidPath);
    }

    let isdir = rawpath.ends_with(b"/");
    let mut v: Vec<&[u8]> = Vec::new();
    for segment in rawpath.split(|c| *c == b'/') {
        match segment {
            b"." | b"" => {}
            b".." => {
                if v.pop().is_none() {
                    return Err(ParseError::ForbiddenPath);
                }
            }
            s => {
                valid_segment(s)?;
                v.push(s);
            }
        }
    }
    let mut path = Vec::new();
    for s in &v {
        path.push(b'/');
        path.extend(percent_decode(s));
    }
    if isdir || v.is_empty() {
        path.push(b'/');
    }
    Ok(path)
}

/// Comparison ignores any trailing slash, so /foo == /foo/
impl PartialEq for DavPath {
    fn eq(&self, rhs: &DavPath) -> bool {
        self.prefix == rhs.prefix && self.trimmed() == rhs.trimmed()
    }
}

impl Eq for DavPath {}

impl DavPath {
    /// Parse an URL encoded path, without a prefix.
    pub fn new(src: &str) -> Result<DavPath, ParseError> {
        DavPath::from_str_and_prefix(src, "")
    }

    /// from URL encoded strings: path and prefix.
    pub(crate) fn from_str_and_prefix(src: &str, prefix: &str) -> Result<DavPath, ParseError> {
        let path = normalize_path(src.as_bytes())?;
        let prefix = prefix.trim_end_matches('/');
        let pfx = prefix.as_bytes();
        if !path.starts_with(pfx) {
            return Err(ParseError::IllegalPath);
        }
        let rest = &path[pfx.len()..];
        if !rest.is_empty() && rest[0] != b'/' {
            return Err(ParseError::IllegalPath);
        }
        let path = if rest.is_empty() { b"/".to_vec() } else { rest.to_vec() };
        Ok(DavPath {
            path,
            prefix: prefix.to_string(),
        })
    }

    /// from request.uri
    pub(crate) fn from_uri(uri: &http::uri::Uri, prefix: &str) -> Result<Self, ParseError> {
        match uri.path() {
            "*" => Ok(DavPath {
                prefix: String::new(),
                path: b"*".to_vec(),
            }),
            path if path.starts_with('/') => DavPath::from_str_and_prefix(path, prefix),
            _ => Err(ParseError::InvalidPath),
        }
    }

    /// from url::Url and prefix string.
    pub(crate) fn from_url(url: &url::Url, prefix: &str) -> Result<Self, ParseError> {
        DavPath::from_str_and_prefix(url.path(), prefix)
    }

    // is this a "star" request (only used with OPTIONS)
    pub(crate) fn is_star(&self) -> bool {
        self.path == b"*"
    }

    // path without trailing slash, "/" stays "/".
    fn trimmed(&self) -> &[u8] {
        let p = self.path.as_slice();
        if p.len() > 1 && p.ends_with(b"/") {
            &p[..p.len() - 1]
        } else {
            p
        }
    }

    /// as URL encoded string, without prefix.
    pub fn as_url_string(&self) -> String {
        percent_encode(&self.path, PATH_ENCODE_SET).to_string()
    }

    /// as URL encoded string, with prefix.
    pub fn as_url_string_with_prefix(&self) -> String {
        let mut p = percent_encode(self.prefix.as_bytes(), PATH_ENCODE_SET).to_string();
        p.push_str(&self.as_url_string());
        p
    }

    /// as raw bytes, not encoded, no prefix.
    pub fn as_bytes(&self) -> &[u8] {
        self.path.as_slice()
    }

    /// is this a collection i.e. does the original URL path end in "/".
    pub fn is_collection(&self) -> bool {
        self.path.ends_with(b"/")
    }

    /// is this the root of the namespace.
    pub fn is_root(&self) -> bool {
        self.trimmed() == b"/"
    }

    /// return the URL prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// add a slash to the end of the path (if not already present).
    pub(crate) fn add_slash(&mut self) {
        if !self.is_collection() {
            self.path.push(b'/');
        }
    }

    pub(crate) fn add_slash_if(&mut self, b: bool) {
        if b {
            self.add_slash();
        }
    }

    /// The parent collection. The parent of "/" is "/".
    pub fn parent(&self) -> DavPath {
        let mut segs = self.segments();
        segs.pop();
        let mut path = Vec::new();
        for s in segs {
            path.push(b'/');
            path.extend_from_slice(s);
        }
        path.push(b'/');
        DavPath {
            prefix: self.prefix.clone(),
            path,
        }
    }

    /// Non-empty segments of the path, root first.
    pub(crate) fn segments(&self) -> Vec<&[u8]> {
        self.path.split(|&c| c == b'/').filter(|e| !e.is_empty()).collect()
    }

    /// The filename is the last segment of the path. Can be empty.
    pub fn file_name(&self) -> &[u8] {
        self.segments().last().copied().unwrap_or(b"")
    }

    /// Count the number of segments the path has. "/" has 0.
    pub fn num_segments(&self) -> usize {
        self.segments().len()
    }

    /// Add a segment to the end of the path.
    pub(crate) fn push_segment(&mut self, b: &[u8]) {
        self.add_slash();
        self.path.extend_from_slice(b);
    }

    /// A new path with a segment added to the end.
    pub fn join(&self, b: &[u8]) -> DavPath {
        let mut p = self.clone();
        p.push_segment(b);
        p
    }

    /// Is `self` equal to `other` or one of its ancestors.
    pub fn is_ancestor_of(&self, other: &DavPath) -> bool {
        let a = self.trimmed();
        let b = other.trimmed();
        if a == b"/" || a == b {
            return true;
        }
        b.len() > a.len() && b.starts_with(a) && b[a.len()] == b'/'
    }

    /// Replace the leading `from` part of this path with `to`.
    /// Returns `None` if `from` is not an ancestor of this path.
    pub fn rebase(&self, from: &DavPath, to: &DavPath) -> Option<DavPath> {
        if !from.is_ancestor_of(self) {
            return None;
        }
        let skip = from.num_segments();
        let mut p = to.clone();
        p.path.truncate(to.trimmed().len());
        for s in self.segments().into_iter().skip(skip) {
            p.push_segment(s);
        }
        if self.is_collection() {
            p.add_slash();
        }
        Some(p)
    }

    pub(crate) fn get_mime_type_str(&self) -> &'static str {
        let name = self.file_name();
        if let Some(pos) = name.iter().rposition(|&c| c == b'.') {
            if let Ok(ext) = std::str::from_utf8(&name[pos + 1..]) {
                if let Some(t) = mime_guess::from_ext(ext).first_raw() {
                    return t;
                }
            }
        }
        "application/octet-stream"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize() {
        let p = DavPath::new("/a/./b//c/../d%20e/").unwrap();
        assert_eq!(p.as_bytes(), b"/a/b/d e/");
        assert!(p.is_collection());
        assert_eq!(p.as_url_string(), "/a/b/d%20e/");
        assert_eq!(DavPath::new("/a/../..").unwrap_err(), ParseError::ForbiddenPath);
        assert_eq!(DavPath::new("a/b").unwrap_err(), ParseError::InvalidPath);
        assert_eq!(DavPath::new("/a%2fb").unwrap_err(), ParseError::InvalidPath);
        assert_eq!(DavPath::new("/x?y=1").unwrap().as_bytes(), b"/x");
    }

    #[test]
    fn prefix() {
        let p = DavPath::from_str_and_prefix("/dav/x/y", "/dav/").unwrap();
        assert_eq!(p.as_bytes(), b"/x/y");
        assert_eq!(p.as_url_string_with_prefix(), "/dav/x/y");
        let p = DavPath::from_str_and_prefix("/dav", "/dav").unwrap();
        assert!(p.is_root());
        assert_eq!(
            DavPath::from_str_and_prefix("/davx/y", "/dav").unwrap_err(),
            ParseError::IllegalPath
        );
    }

    #[test]
    fn relations() {
        let a = DavPath::new("/a/").unwrap();
        let ab = DavPath::new("/a/b").unwrap();
        let abc = DavPath::new("/abc").unwrap();
        assert!(a.is_ancestor_of(&ab));
        assert!(a.is_ancestor_of(&a));
        assert!(!a.is_ancestor_of(&abc));
        assert!(DavPath::new("/").unwrap().is_ancestor_of(&abc));
        assert_eq!(ab.parent().as_bytes(), b"/a/");
        assert_eq!(a.parent().as_bytes(), b"/");
        assert_eq!(ab.file_name(), b"b");
        assert_eq!(a, DavPath::new("/a").unwrap());

        let to = DavPath::new("/z").unwrap();
        let c = DavPath::new("/a/b/c/").unwrap();
        assert_eq!(c.rebase(&a, &to).unwrap().as_bytes(), b"/z/b/c/");
        assert_eq!(a.rebase(&a, &to).unwrap().as_bytes(), b"/z/");
        assert!(abc.rebase(&a, &to).is_none());
    }
}
