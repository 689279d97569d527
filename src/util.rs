use std::time::SystemTime;

use chrono::{DateTime, SecondsFormat, Utc};
use headers::Header;
use http::method::InvalidMethod;

use crate::errors::{DavError, DavResult};

/// HTTP Methods supported by DavHandler.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
#[repr(u32)]
pub enum DavMethod {
    Head = 0x0001,
    Get = 0x0002,
    Put = 0x0004,
    Options = 0x0010,
    PropFind = 0x0020,
    PropPatch = 0x0040,
    MkCol = 0x0080,
    Copy = 0x0100,
    Move = 0x0200,
    Delete = 0x0400,
    Lock = 0x0800,
    Unlock = 0x1000,
}

impl DavMethod {
    /// Does this method change anything.
    pub fn is_write(self) -> bool {
        !matches!(
            self,
            DavMethod::Head | DavMethod::Get | DavMethod::Options | DavMethod::PropFind
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DavMethod::Head => "HEAD",
            DavMethod::Get => "GET",
            DavMethod::Put => "PUT",
            DavMethod::Options => "OPTIONS",
            DavMethod::PropFind => "PROPFIND",
            DavMethod::PropPatch => "PROPPATCH",
            DavMethod::MkCol => "MKCOL",
            DavMethod::Copy => "COPY",
            DavMethod::Move => "MOVE",
            DavMethod::Delete => "DELETE",
            DavMethod::Lock => "LOCK",
            DavMethod::Unlock => "UNLOCK",
        }
    }
}

pub(crate) const ALL_METHODS: [DavMethod; 12] = [
    DavMethod::Options,
    DavMethod::Get,
    DavMethod::Head,
    DavMethod::Put,
    DavMethod::Delete,
    DavMethod::PropFind,
    DavMethod::PropPatch,
    DavMethod::MkCol,
    DavMethod::Copy,
    DavMethod::Move,
    DavMethod::Lock,
    DavMethod::Unlock,
];

// translate method into our own enum that has webdav methods as well.
pub(crate) fn dav_method(m: &http::Method) -> DavResult<DavMethod> {
    let m = match *m {
        http::Method::HEAD => DavMethod::Head,
        http::Method::GET => DavMethod::Get,
        http::Method::PUT => DavMethod::Put,
        http::Method::DELETE => DavMethod::Delete,
        http::Method::OPTIONS => DavMethod::Options,
        _ => match m.as_str() {
            "PROPFIND" => DavMethod::PropFind,
            "PROPPATCH" => DavMethod::PropPatch,
            "MKCOL" => DavMethod::MkCol,
            "COPY" => DavMethod::Copy,
            "MOVE" => DavMethod::Move,
            "LOCK" => DavMethod::Lock,
            "UNLOCK" => DavMethod::Unlock,
            _ => {
                return Err(DavError::UnknownDavMethod);
            }
        },
    };
    Ok(m)
}

// A trick to get at a value of http::method::InvalidMethod.
fn invalid_method() -> InvalidMethod {
    match http::Method::from_bytes(b"") {
        Err(e) => e,
        Ok(_) => unreachable!("the empty method name is invalid"),
    }
}

// for external use.
impl TryFrom<&http::Method> for DavMethod {
    type Error = InvalidMethod;

    fn try_from(value: &http::Method) -> Result<Self, Self::Error> {
        dav_method(value).map_err(|_| invalid_method())
    }
}

/// A set of allowed [`DavMethod`]s.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DavMethodSet(u32);

impl DavMethodSet {
    pub const HTTP_RO: DavMethodSet =
        DavMethodSet(DavMethod::Get as u32 | DavMethod::Head as u32 | DavMethod::Options as u32);
    pub const HTTP_RW: DavMethodSet = DavMethodSet(Self::HTTP_RO.0 | DavMethod::Put as u32);
    pub const WEBDAV_RO: DavMethodSet = DavMethodSet(Self::HTTP_RO.0 | DavMethod::PropFind as u32);
    pub const WEBDAV_RW: DavMethodSet = DavMethodSet(0xffffffff);

    /// New set, all methods allowed.
    pub fn all() -> DavMethodSet {
        DavMethodSet(0xffffffff)
    }

    /// New empty set.
    pub fn none() -> DavMethodSet {
        DavMethodSet(0)
    }

    /// Add a method.
    pub fn add(&mut self, m: DavMethod) -> &Self {
        self.0 |= m as u32;
        self
    }

    /// Remove a method.
    pub fn remove(&mut self, m: DavMethod) -> &Self {
        self.0 &= !(m as u32);
        self
    }

    /// Check if a method is in the set.
    pub fn contains(&self, m: DavMethod) -> bool {
        self.0 & (m as u32) > 0
    }

    /// Generate an DavMethodSet from a list of words.
    pub fn from_vec(v: Vec<impl AsRef<str>>) -> Result<DavMethodSet, InvalidMethod> {
        let mut m: u32 = 0;
        for w in &v {
            m |= match w.as_ref().to_lowercase().as_str() {
                "http-ro" => Self::HTTP_RO.0,
                "http-rw" => Self::HTTP_RW.0,
                "webdav-ro" => Self::WEBDAV_RO.0,
                "webdav-rw" => Self::WEBDAV_RW.0,
                word => match ALL_METHODS.iter().find(|m| m.as_str().eq_ignore_ascii_case(word)) {
                    Some(dm) => *dm as u32,
                    None => return Err(invalid_method()),
                },
            };
        }
        Ok(DavMethodSet(m))
    }
}

pub(crate) fn systemtime_to_httpdate(t: SystemTime) -> String {
    let d = headers::Date::from(t);
    let mut v = Vec::new();
    d.encode(&mut v);
    v.first()
        .and_then(|h: &http::HeaderValue| h.to_str().ok())
        .unwrap_or_default()
        .to_owned()
}

pub(crate) fn systemtime_to_rfc3339(t: SystemTime) -> String {
    DateTime::<Utc>::from(t).to_rfc3339_opts(SecondsFormat::Secs, true)
}
