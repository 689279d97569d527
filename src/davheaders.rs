use std::fmt::Display;
use std::str::FromStr;

use headers::Header;
use http::header::{HeaderName, HeaderValue};

use crate::fs::DavMetaData;

pub static DEPTH: HeaderName = HeaderName::from_static("depth");
pub static TIMEOUT: HeaderName = HeaderName::from_static("timeout");
pub static OVERWRITE: HeaderName = HeaderName::from_static("overwrite");
pub static DESTINATION: HeaderName = HeaderName::from_static("destination");
pub static ETAG: HeaderName = HeaderName::from_static("etag");
pub static IF_MATCH: HeaderName = HeaderName::from_static("if-match");
pub static IF_NONE_MATCH: HeaderName = HeaderName::from_static("if-none-match");
pub static IF: HeaderName = HeaderName::from_static("if");
pub static LOCK_TOKEN: HeaderName = HeaderName::from_static("lock-token");

// helper.
fn one<'i, I>(values: &mut I) -> Result<&'i HeaderValue, headers::Error>
where
    I: Iterator<Item = &'i HeaderValue>,
{
    let v = values.next().ok_or_else(invalid)?;
    if values.next().is_some() {
        Err(invalid())
    } else {
        Ok(v)
    }
}

// helper
fn invalid() -> headers::Error {
    headers::Error::invalid()
}

// helper
fn map_invalid(_e: impl std::error::Error) -> headers::Error {
    headers::Error::invalid()
}

// helper
fn push_str<E: Extend<HeaderValue>>(values: &mut E, s: &str) {
    if let Ok(v) = HeaderValue::from_str(s) {
        values.extend(std::iter::once(v));
    }
}

/// Lock-Token: header, a coded URL like `<urn:uuid:...>`.
#[derive(Debug, Clone, PartialEq)]
pub struct LockToken(pub String);

impl LockToken {
    /// The token without the angle brackets.
    pub fn token(&self) -> &str {
        self.0
            .trim()
            .strip_prefix('<')
            .and_then(|t| t.strip_suffix('>'))
            .unwrap_or(self.0.trim())
    }
}

impl Header for LockToken {
    fn name() -> &'static HeaderName {
        &LOCK_TOKEN
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        one(values)?
            .to_str()
            .map(|x| LockToken(x.to_owned()))
            .map_err(map_invalid)
    }

    fn encode<E>(&self, values: &mut E)
    where
        E: Extend<HeaderValue>,
    {
        push_str(values, &self.0)
    }
}

/// Depth: header.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Depth {
    Zero,
    One,
    Infinity,
}

impl Header for Depth {
    fn name() -> &'static HeaderName {
        &DEPTH
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let value = one(values)?;
        match value.as_bytes() {
            b"0" => Ok(Depth::Zero),
            b"1" => Ok(Depth::One),
            v if v.eq_ignore_ascii_case(b"infinity") => Ok(Depth::Infinity),
            _ => Err(invalid()),
        }
    }

    fn encode<E>(&self, values: &mut E)
    where
        E: Extend<HeaderValue>,
    {
        let value = match *self {
            Depth::Zero => "0",
            Depth::One => "1",
            Depth::Infinity => "infinity",
        };
        values.extend(std::iter::once(HeaderValue::from_static(value)));
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DavTimeout {
    Seconds(u32),
    Infinite,
}

/// Timeout: header. Only the first entry is used.
#[derive(Debug, Clone)]
pub struct Timeout(pub Vec<DavTimeout>);

impl Header for Timeout {
    fn name() -> &'static HeaderName {
        &TIMEOUT
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let value = one(values)?;
        let mut v = Vec::new();
        for word in value.to_str().map_err(map_invalid)?.split(',') {
            let word = word.trim();
            let w = if word.eq_ignore_ascii_case("Infinite") {
                DavTimeout::Infinite
            } else if let Some(num) = word.strip_prefix("Second-") {
                DavTimeout::Seconds(num.parse::<u32>().map_err(map_invalid)?)
            } else {
                return Err(invalid());
            };
            v.push(w);
        }
        Ok(Timeout(v))
    }

    fn encode<E>(&self, values: &mut E)
    where
        E: Extend<HeaderValue>,
    {
        let value = self
            .0
            .iter()
            .map(|s| match *s {
                DavTimeout::Seconds(n) => format!("Second-{}", n),
                DavTimeout::Infinite => "Infinite".to_string(),
            })
            .collect::<Vec<_>>()
            .join(", ");
        push_str(values, &value)
    }
}

/// Destination: header. Holds the (still encoded) path part of the URL.
#[derive(Debug, Clone, PartialEq)]
pub struct Destination(pub String);

impl Header for Destination {
    fn name() -> &'static HeaderName {
        &DESTINATION
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let s = one(values)?.to_str().map_err(map_invalid)?;
        if s.starts_with('/') {
            return Ok(Destination(s.to_string()));
        }
        let url = url::Url::parse(s).map_err(map_invalid)?;
        match url.scheme() {
            "http" | "https" => Ok(Destination(url.path().to_string())),
            _ => Err(invalid()),
        }
    }

    fn encode<E>(&self, values: &mut E)
    where
        E: Extend<HeaderValue>,
    {
        push_str(values, &self.0)
    }
}

/// Overwrite: header. `T` or `F`.
#[derive(Debug, Clone, PartialEq)]
pub struct Overwrite(pub bool);

impl Header for Overwrite {
    fn name() -> &'static HeaderName {
        &OVERWRITE
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let line = one(values)?;
        match line.as_bytes() {
            b"F" | b"f" => Ok(Overwrite(false)),
            b"T" | b"t" => Ok(Overwrite(true)),
            _ => Err(invalid()),
        }
    }

    fn encode<E>(&self, values: &mut E)
    where
        E: Extend<HeaderValue>,
    {
        let value = if self.0 { "T" } else { "F" };
        values.extend(std::iter::once(HeaderValue::from_static(value)));
    }
}

#[derive(Debug, Clone)]
pub struct ETag {
    // the tag including quotes (and W/ prefix, if weak).
    tag: String,
    weak: bool,
}

impl ETag {
    pub fn from_meta(meta: &dyn DavMetaData) -> Option<ETag> {
        let tag = meta.etag()?;
        Some(ETag {
            tag: format!("\"{}\"", tag),
            weak: false,
        })
    }

    /// Weak comparison, RFC 7232 2.3.2.
    pub fn weak_eq(&self, other: &ETag) -> bool {
        self.opaque() == other.opaque()
    }

    fn opaque(&self) -> &str {
        self.tag.strip_prefix("W/").unwrap_or(&self.tag)
    }
}

impl FromStr for ETag {
    type Err = headers::Error;

    fn from_str(t: &str) -> Result<Self, Self::Err> {
        let (weak, s) = match t.strip_prefix("W/") {
            Some(s) => (true, s),
            None => (false, t),
        };
        if s.len() >= 2 && s.starts_with('"') && s.ends_with('"') && !s[1..s.len() - 1].contains('"') {
            Ok(ETag {
                tag: t.to_owned(),
                weak,
            })
        } else {
            Err(invalid())
        }
    }
}

impl Display for ETag {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.tag)
    }
}

/// Strong comparison.
impl PartialEq for ETag {
    fn eq(&self, other: &Self) -> bool {
        !self.weak && !other.weak && self.tag == other.tag
    }
}

impl Header for ETag {
    fn name() -> &'static HeaderName {
        &ETAG
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let value = one(values)?;
        ETag::from_str(value.to_str().map_err(map_invalid)?)
    }

    fn encode<E>(&self, values: &mut E)
    where
        E: Extend<HeaderValue>,
    {
        push_str(values, &self.tag)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ETagList {
    Tags(Vec<ETag>),
    Star,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IfMatch(pub ETagList);

#[derive(Debug, Clone, PartialEq)]
pub struct IfNoneMatch(pub ETagList);

// Decode a list of etags. Commas inside etags are not handled,
// but we never generate those anyway.
fn decode_etaglist<'i, I>(values: &mut I) -> Result<ETagList, headers::Error>
where
    I: Iterator<Item = &'i HeaderValue>,
{
    let mut v = Vec::new();
    let mut count = 0usize;
    for value in values {
        let s = value.to_str().map_err(map_invalid)?;
        if s.trim() == "*" {
            return Ok(ETagList::Star);
        }
        for t in s.split(',') {
            // Simply skip misformed etags, they will never match.
            if let Ok(t) = ETag::from_str(t.trim()) {
                v.push(t);
            }
        }
        count += 1;
    }
    if count != 0 {
        Ok(ETagList::Tags(v))
    } else {
        Err(invalid())
    }
}

fn encode_etaglist<E>(m: &ETagList, values: &mut E)
where
    E: Extend<HeaderValue>,
{
    let value = match *m {
        ETagList::Star => "*".to_string(),
        ETagList::Tags(ref t) => t.iter().map(|t| t.tag.as_str()).collect::<Vec<&str>>().join(", "),
    };
    push_str(values, &value)
}

impl Header for IfMatch {
    fn name() -> &'static HeaderName {
        &IF_MATCH
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        Ok(IfMatch(decode_etaglist(values)?))
    }

    fn encode<E>(&self, values: &mut E)
    where
        E: Extend<HeaderValue>,
    {
        encode_etaglist(&self.0, values)
    }
}

impl Header for IfNoneMatch {
    fn name() -> &'static HeaderName {
        &IF_NONE_MATCH
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        Ok(IfNoneMatch(decode_etaglist(values)?))
    }

    fn encode<E>(&self, values: &mut E)
    where
        E: Extend<HeaderValue>,
    {
        encode_etaglist(&self.0, values)
    }
}

// The "If" header contains IfLists, of which the results are ORed.
#[derive(Debug, Clone, PartialEq)]
pub struct If(pub Vec<IfList>);

// An IfList contains Conditions, of which the results are ANDed.
#[derive(Debug, Clone, PartialEq)]
pub struct IfList {
    pub resource_tag: Option<url::Url>,
    pub conditions: Vec<IfCondition>,
}

impl IfList {
    fn new() -> IfList {
        IfList {
            resource_tag: None,
            conditions: Vec::new(),
        }
    }

    fn add(&mut self, not: bool, item: IfItem) {
        self.conditions.push(IfCondition { not, item });
    }
}

// Single Condition is [NOT] State-Token | ETag
#[derive(Debug, Clone, PartialEq)]
pub struct IfCondition {
    pub not: bool,
    pub item: IfItem,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IfItem {
    StateToken(String),
    ETag(ETag),
}

impl If {
    /// All state tokens in the header, negated or not.
    pub fn state_tokens(&self) -> impl Iterator<Item = &str> {
        self.0.iter().flat_map(|l| l.conditions.iter()).filter_map(|c| match c.item {
            IfItem::StateToken(ref t) => Some(t.as_str()),
            IfItem::ETag(_) => None,
        })
    }
}

// Below stuff is for the parser state.
#[derive(Debug, Clone, PartialEq)]
enum IfToken {
    ListOpen,
    ListClose,
    Not,
    Word(String),
    Pointy(String),
    ETag(ETag),
    End,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum IfState {
    Start,
    RTag,
    List,
    Not,
    Bad,
}

// helpers.
fn is_whitespace(c: u8) -> bool {
    b" \t\r\n".contains(&c)
}

fn is_special(c: u8) -> bool {
    b"<>()[]".contains(&c)
}

fn trim_left(buf: &[u8]) -> &[u8] {
    let n = buf.iter().take_while(|&&c| is_whitespace(c)).count();
    &buf[n..]
}

// scan from the opening char at buf[0] up to `c`. Quoted parts may contain `c`.
fn scan_until(buf: &[u8], c: u8) -> Result<(&[u8], &[u8]), headers::Error> {
    let mut quote = false;
    for i in 1..buf.len() {
        let b = buf[i];
        if !quote && b == c {
            return Ok((&buf[1..i], &buf[i + 1..]));
        }
        if is_whitespace(b) {
            return Err(invalid());
        }
        if b == b'"' {
            quote = !quote;
        }
    }
    Err(invalid())
}

// scan one word.
fn scan_word(buf: &[u8]) -> Result<(&[u8], &[u8]), headers::Error> {
    for (i, &c) in buf.iter().enumerate() {
        if is_whitespace(c) || is_special(c) || c < 32 {
            if i == 0 {
                return Err(invalid());
            }
            return Ok((&buf[..i], &buf[i..]));
        }
    }
    Ok((buf, b""))
}

// get next token.
fn get_token(buf: &[u8]) -> Result<(IfToken, &[u8]), headers::Error> {
    let buf = trim_left(buf);
    if buf.is_empty() {
        return Ok((IfToken::End, buf));
    }
    match buf[0] {
        b'(' => Ok((IfToken::ListOpen, &buf[1..])),
        b')' => Ok((IfToken::ListClose, &buf[1..])),
        b'N' if buf.starts_with(b"Not") => Ok((IfToken::Not, &buf[3..])),
        b'<' => {
            let (tok, rest) = scan_until(buf, b'>')?;
            let s = String::from_utf8(tok.to_vec()).map_err(map_invalid)?;
            Ok((IfToken::Pointy(s), rest))
        }
        b'[' => {
            let (tok, rest) = scan_until(buf, b']')?;
            let s = std::str::from_utf8(tok).map_err(map_invalid)?;
            Ok((IfToken::ETag(ETag::from_str(s)?), rest))
        }
        _ => {
            let (tok, rest) = scan_word(buf)?;
            let s = String::from_utf8(tok.to_vec()).map_err(map_invalid)?;
            Ok((IfToken::Word(s), rest))
        }
    }
}

impl Header for If {
    fn name() -> &'static HeaderName {
        &IF
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        // one big state machine.
        let mut if_lists = If(Vec::new());
        let mut cur_list = IfList::new();

        let mut state = IfState::Start;
        let mut input = one(values)?.as_bytes();

        loop {
            let (tok, rest) = get_token(input)?;
            input = rest;
            state = match state {
                IfState::Start => match tok {
                    IfToken::ListOpen => IfState::List,
                    IfToken::Pointy(url) => {
                        let u = url::Url::parse(&url).map_err(map_invalid)?;
                        cur_list.resource_tag = Some(u);
                        IfState::RTag
                    }
                    IfToken::End if !if_lists.0.is_empty() => break,
                    _ => IfState::Bad,
                },
                IfState::RTag => match tok {
                    IfToken::ListOpen => IfState::List,
                    _ => IfState::Bad,
                },
                IfState::List | IfState::Not => {
                    let not = state == IfState::Not;
                    match tok {
                        IfToken::Not if !not => IfState::Not,
                        IfToken::Pointy(stok) | IfToken::Word(stok) => {
                            // a state token must at least look like an URI.
                            if !stok.contains(':') {
                                IfState::Bad
                            } else {
                                cur_list.add(not, IfItem::StateToken(stok));
                                IfState::List
                            }
                        }
                        IfToken::ETag(etag) => {
                            cur_list.add(not, IfItem::ETag(etag));
                            IfState::List
                        }
                        IfToken::ListClose if !not && !cur_list.conditions.is_empty() => {
                            if_lists.0.push(cur_list);
                            cur_list = IfList::new();
                            IfState::Start
                        }
                        _ => IfState::Bad,
                    }
                }
                IfState::Bad => return Err(invalid()),
            };
            if state == IfState::Bad {
                return Err(invalid());
            }
        }
        Ok(if_lists)
    }

    fn encode<E>(&self, values: &mut E)
    where
        E: Extend<HeaderValue>,
    {
        let mut value = String::new();
        for list in &self.0 {
            if let Some(ref u) = list.resource_tag {
                value.push_str(&format!("<{}> ", u));
            }
            value.push('(');
            let conds = list
                .conditions
                .iter()
                .map(|c| {
                    let item = match c.item {
                        IfItem::StateToken(ref t) => format!("<{}>", t),
                        IfItem::ETag(ref e) => format!("[{}]", e),
                    };
                    if c.not { format!("Not {}", item) } else { item }
                })
                .collect::<Vec<_>>();
            value.push_str(&conds.join(" "));
            value.push_str(") ");
        }
        push_str(values, value.trim_end())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode<H: Header>(s: &'static str) -> Result<H, headers::Error> {
        let hdrval = HeaderValue::from_static(s);
        let mut iter = std::iter::once(&hdrval);
        H::decode(&mut iter)
    }

    #[test]
    fn if_header() {
        // plain words are accepted as state tokens too, as long as they
        // look like an URI.
        let val = r#"  <http://x.yz/> ([W/"etag"] Not <DAV:nope> ) (Not<urn:x>[W/"bla"] plain:word:123) "#;
        let hdr: If = decode(val).unwrap();
        assert_eq!(hdr.0.len(), 2);
        assert!(hdr.0[0].resource_tag.is_some());
        assert!(hdr.0[0].conditions[1].not);
        let tokens: Vec<_> = hdr.state_tokens().collect();
        assert_eq!(tokens, vec!["DAV:nope", "urn:x", "plain:word:123"]);

        assert!(decode::<If>("").is_err());
        assert!(decode::<If>("()").is_err());
        assert!(decode::<If>("(<urn:x>").is_err());
        assert!(decode::<If>("(Not Not <urn:x>)").is_err());
        assert!(decode::<If>("(nocolon)").is_err());
    }

    #[test]
    fn etag_header() {
        let t1 = ETag::from_str(r#"W/"12345""#).unwrap();
        let t2 = ETag::from_str(r#"W/"12345""#).unwrap();
        let t3 = ETag::from_str(r#""12346""#).unwrap();
        let t4 = ETag::from_str(r#""12346""#).unwrap();
        assert!(t1 != t2);
        assert!(t1.weak_eq(&t2));
        assert!(t2 != t3);
        assert!(t3 == t4);
        assert!(ETag::from_str("12345").is_err());
        assert!(ETag::from_str("\"").is_err());
    }

    #[test]
    fn simple_headers() {
        assert_eq!(decode::<Depth>("Infinity").unwrap(), Depth::Infinity);
        assert_eq!(decode::<Depth>("1").unwrap(), Depth::One);
        assert!(decode::<Depth>("2").is_err());

        let t: Timeout = decode("Second-3600, Infinite").unwrap();
        assert_eq!(t.0, vec![DavTimeout::Seconds(3600), DavTimeout::Infinite]);
        assert!(decode::<Timeout>("Minute-1").is_err());

        let d: Destination = decode("http://example.com:8080/a/b%20c?x=1").unwrap();
        assert_eq!(d.0, "/a/b%20c");
        let d: Destination = decode("/x/y").unwrap();
        assert_eq!(d.0, "/x/y");
        assert!(decode::<Destination>("ftp://example.com/x").is_err());

        assert_eq!(decode::<Overwrite>("F").unwrap(), Overwrite(false));
        assert!(decode::<Overwrite>("maybe").is_err());

        let l: LockToken = decode("<urn:uuid:1234>").unwrap();
        assert_eq!(l.token(), "urn:uuid:1234");
    }
}
