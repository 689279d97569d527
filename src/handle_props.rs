use headers::HeaderMapExt;
use http::{Request, Response, StatusCode};
use xmltree::Element;

use crate::body::Body;
use crate::davhandler::DavInner;
use crate::davheaders::{self, ETag};
use crate::davpath::DavPath;
use crate::errors::*;
use crate::fs::*;
use crate::handle_lock::{list_lockdiscovery, list_supportedlock};
use crate::multistatus::{MultiStatus, PropStat};
use crate::props::{DavProp, NS_DAV_URI, PropPatch};
use crate::util::{systemtime_to_httpdate, systemtime_to_rfc3339};
use crate::walker::{self, WalkEntry};
use crate::xmltree_ext::*;

// properties returned by PROPFIND <allprop/> or an empty body.
const ALLPROP_STR: &[&str] = &[
    "creationdate",
    "displayname",
    "getcontentlength",
    "getcontenttype",
    "getetag",
    "getlastmodified",
    "resourcetype",
    "lockdiscovery",
    "supportedlock",
];

// Properties that are computed, but can be overridden by a dead property.
const SETTABLE_LIVE: &[&str] = &["displayname"];

#[derive(Debug)]
enum PropFind {
    AllProp,
    PropName,
    Prop(Vec<Element>),
}

impl DavInner {
    pub(crate) async fn handle_propfind(
        &self,
        req: &Request<()>,
        path: DavPath,
        xmldata: &[u8],
    ) -> DavResult<Response<Body>> {
        let depth = match req.headers().typed_try_get::<davheaders::Depth>() {
            Ok(Some(d)) => d,
            Ok(None) => davheaders::Depth::Infinity,
            Err(_) => return Err(StatusCode::BAD_REQUEST.into()),
        };

        // the root must exist, or the whole request fails.
        self.fs.metadata(&path).await?;

        let kind = parse_propfind(xmldata)?;
        debug!("propfind: {:?} depth {:?}", kind, depth);

        let walk = walker::walk(&*self.fs, &path, depth).await?;

        // a collection whose members could not be listed gets a second
        // response carrying the listing error.
        let mut ms = MultiStatus::begin(&path);
        for entry in &walk.entries {
            let propstats = self.entry_props(entry, &kind).await;
            ms.record_props(&entry.path, propstats);
            if let Some((p, e)) = walk.errors.iter().find(|(p, _)| *p == entry.path) {
                debug!("propfind: members of {} skipped: {}", p, e);
                ms.record(p, fserror_to_status(e));
            }
        }
        ms.finish(StatusCode::MULTI_STATUS)
    }

    // the dead properties of a resource, in a stable order.
    async fn dead_props(&self, path: &DavPath) -> FsResult<Vec<DavProp>> {
        let Some(ref props) = self.props else {
            return Ok(Vec::new());
        };
        let mut v = props.get_props(path).await?;
        v.sort_by(|a, b| (&a.namespace, &a.name).cmp(&(&b.namespace, &b.name)));
        Ok(v)
    }

    async fn entry_props(&self, entry: &WalkEntry, kind: &PropFind) -> Vec<PropStat> {
        let dead = self.dead_props(&entry.path).await;
        if let Err(ref e) = dead {
            debug!("propfind: dead properties of {}: {}", entry.path, e);
        }

        let mut found = Vec::new();
        let mut notfound = Vec::new();
        let mut failed = Vec::new();

        match kind {
            PropFind::PropName => {
                for name in ALLPROP_STR {
                    if self.liveprop(entry, name).is_some() {
                        found.push(Element::new2(&format!("D:{}", name)));
                    }
                }
                for p in dead.iter().flatten() {
                    if !is_computed(p) {
                        found.push(davprop_to_element(&p.name_only()));
                    }
                }
            }
            PropFind::AllProp => {
                let dead = dead.as_deref().unwrap_or_default();
                for name in ALLPROP_STR {
                    let overridden = dead.iter().find(|p| is_dav(p, name));
                    if let Some(p) = overridden {
                        found.push(davprop_to_element(p));
                    } else if let Some(e) = self.liveprop(entry, name) {
                        found.push(e);
                    }
                }
                for p in dead.iter().filter(|p| !is_computed(p)) {
                    found.push(davprop_to_element(p));
                }
            }
            PropFind::Prop(wanted) => {
                for w in wanted {
                    let key = element_to_davprop(w);
                    let dead_val = match dead {
                        Ok(ref d) => d.iter().find(|p| p.same_key(&key)).map(davprop_to_element),
                        Err(_) => None,
                    };
                    if let Some(e) = dead_val {
                        found.push(e);
                        continue;
                    }
                    if key.namespace.as_deref() == Some(NS_DAV_URI) {
                        if let Some(e) = self.liveprop(entry, &key.name) {
                            found.push(e);
                            continue;
                        }
                    }
                    match dead {
                        Err(ref e) if !is_live_name(&key) => {
                            failed.push((fserror_to_status(e), davprop_to_element(&key)))
                        }
                        _ => notfound.push(davprop_to_element(&key)),
                    }
                }
            }
        }

        // with allprop and propname the dead properties as a whole are missing.
        let mut lost = None;
        if let (Err(e), PropFind::AllProp | PropFind::PropName) = (&dead, kind) {
            lost = Some(fserror_to_status(e));
        }

        let mut propstats = Vec::new();
        if !found.is_empty() || (notfound.is_empty() && failed.is_empty() && lost.is_none()) {
            propstats.push(PropStat {
                status: StatusCode::OK,
                props: found,
            });
        }
        if !notfound.is_empty() {
            propstats.push(PropStat {
                status: StatusCode::NOT_FOUND,
                props: notfound,
            });
        }
        for (status, e) in failed {
            add_propstat(&mut propstats, status, e);
        }
        if let Some(status) = lost {
            propstats.push(PropStat {
                status,
                props: Vec::new(),
            });
        }
        propstats
    }

    // Compute a live property. None if the resource does not have it.
    fn liveprop(&self, entry: &WalkEntry, name: &str) -> Option<Element> {
        let meta = &entry.meta;
        let text = |v: String| Some(Element::new_text(&format!("D:{}", name), v));
        match name {
            "creationdate" => {
                // use the modification time if the back-end does not know.
                let t = meta.created().or_else(|_| meta.modified()).ok()?;
                text(systemtime_to_rfc3339(t))
            }
            "displayname" => {
                let name = String::from_utf8_lossy(entry.path.file_name()).to_string();
                text(name)
            }
            "getcontentlength" if !meta.is_dir() => text(meta.len().to_string()),
            "getcontenttype" => {
                if meta.is_dir() {
                    text("httpd/unix-directory".to_string())
                } else {
                    text(entry.path.get_mime_type_str().to_string())
                }
            }
            "getetag" => text(ETag::from_meta(&**meta)?.to_string()),
            "getlastmodified" => text(systemtime_to_httpdate(meta.modified().ok()?)),
            "resourcetype" => {
                let mut elem = Element::new2("D:resourcetype");
                if meta.is_dir() {
                    elem.push_elem(Element::new2("D:collection"));
                }
                Some(elem)
            }
            "lockdiscovery" => {
                let ls = self.ls.as_deref()?;
                Some(list_lockdiscovery(ls, &entry.path))
            }
            "supportedlock" => {
                self.ls.as_ref()?;
                Some(list_supportedlock())
            }
            _ => None,
        }
    }

    pub(crate) async fn handle_proppatch(&self, path: DavPath, xmldata: &[u8]) -> DavResult<Response<Body>> {
        // file must exist.
        let meta = self.fs.metadata(&path).await?;
        let mut path = path;
        path.add_slash_if(meta.is_dir());

        // if locked check if we hold that lock.
        self.check_lock(&path, false)?;

        trace!("proppatch input:\n{}", String::from_utf8_lossy(xmldata));

        // parse xml
        let tree = Element::parse2(xmldata)?;
        if !tree.is(NS_DAV_URI, "propertyupdate") {
            return Err(DavError::XmlParseError);
        }

        let mut patch = Vec::new();
        for elem in tree.child_elems() {
            let set = if elem.is(NS_DAV_URI, "set") {
                true
            } else if elem.is(NS_DAV_URI, "remove") {
                false
            } else {
                continue;
            };
            for n in elem
                .child_elems()
                .filter(|f| f.is(NS_DAV_URI, "prop"))
                .flat_map(|f| f.child_elems())
            {
                if set {
                    patch.push(PropPatch::Set(element_to_davprop_full(n)?));
                } else {
                    patch.push(PropPatch::Remove(element_to_davprop(n)));
                }
            }
        }

        // a rejected property fails the whole request, nothing is applied.
        let rejected = |p: &DavProp| match self.props {
            Some(ref props) => props.is_live(p),
            None => true,
        };
        let ret: Vec<(StatusCode, DavProp)> = if patch.iter().any(|s| rejected(s.prop())) {
            patch
                .iter()
                .map(|s| {
                    let p = s.prop().name_only();
                    if rejected(&p) {
                        (StatusCode::FORBIDDEN, p)
                    } else {
                        (StatusCode::FAILED_DEPENDENCY, p)
                    }
                })
                .collect()
        } else {
            match self.props {
                Some(ref props) => props.patch_props(&path, patch).await?,
                None => Vec::new(),
            }
        };

        // group by statuscode.
        let mut propstats = Vec::new();
        for (status, prop) in ret {
            add_propstat(&mut propstats, status, davprop_to_element(&prop));
        }

        let mut ms = MultiStatus::begin(&path);
        ms.record_props(&path, propstats);
        ms.finish(StatusCode::MULTI_STATUS)
    }
}

fn parse_propfind(xmldata: &[u8]) -> DavResult<PropFind> {
    if xmldata.is_empty() {
        return Ok(PropFind::AllProp);
    }
    let root = Element::parse2(xmldata)?;
    if !root.is(NS_DAV_URI, "propfind") {
        return Err(DavError::XmlParseError);
    }
    // <include> only names properties that allprop may leave out, and
    // allprop already lists everything we have.
    let mut kind = None;
    for elem in root.take_child_elems() {
        if elem.namespace.as_deref() != Some(NS_DAV_URI) {
            continue;
        }
        match elem.name.as_str() {
            "propname" => kind = Some(PropFind::PropName),
            "allprop" => kind = Some(PropFind::AllProp),
            "prop" => kind = Some(PropFind::Prop(elem.take_child_elems())),
            _ => {}
        }
    }
    kind.ok_or(DavError::XmlParseError)
}

fn add_propstat(propstats: &mut Vec<PropStat>, status: StatusCode, e: Element) {
    match propstats.iter_mut().find(|ps| ps.status == status) {
        Some(ps) => ps.props.push(e),
        None => propstats.push(PropStat {
            status,
            props: vec![e],
        }),
    }
}

fn is_dav(p: &DavProp, name: &str) -> bool {
    p.namespace.as_deref() == Some(NS_DAV_URI) && p.name == name
}

// a DAV: name that we compute, but that a client may also set.
fn is_computed(p: &DavProp) -> bool {
    SETTABLE_LIVE.iter().any(|n| is_dav(p, n))
}

fn is_live_name(p: &DavProp) -> bool {
    ALLPROP_STR.iter().any(|n| is_dav(p, n))
}

fn element_to_davprop_full(elem: &Element) -> DavResult<DavProp> {
    let mut xml = Vec::new();
    elem.write_fragment(&mut xml)?;
    Ok(DavProp {
        name: elem.name.clone(),
        prefix: elem.prefix.clone(),
        namespace: elem.namespace.clone(),
        xml: Some(xml),
    })
}

fn element_to_davprop(elem: &Element) -> DavProp {
    DavProp {
        name: elem.name.clone(),
        prefix: elem.prefix.clone(),
        namespace: elem.namespace.clone(),
        xml: None,
    }
}

fn davprop_to_element(prop: &DavProp) -> Element {
    if let Some(ref xml) = prop.xml {
        if let Ok(e) = Element::parse2(xml.as_slice()) {
            return e;
        }
        debug!("stored property {} does not parse", prop.name);
    }
    let mut elem = Element::new(&prop.name);
    if let Some(ref ns) = prop.namespace {
        let pfx = match ns.as_str() {
            NS_DAV_URI => "D",
            _ => prop.prefix.as_deref().unwrap_or("X"),
        };
        elem.prefix = Some(pfx.to_string());
        if pfx != "D" {
            elem = elem.ns(pfx, ns);
        }
    }
    elem.namespace = prop.namespace.clone();
    elem
}
