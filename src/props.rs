//! Contains the structs and traits that define a property store.
//!
//! The engine only ever stores dead properties: client-defined XML
//! elements that are kept verbatim. Live properties are computed from
//! the storage metadata and can not be written; which names are live
//! is decided by the store through `is_live`.
use std::fmt::Debug;

use dyn_clone::{DynClone, clone_trait_object};
use futures_util::future::FutureExt;
use http::StatusCode;

use crate::davpath::DavPath;
use crate::errors::fserror_to_status;
use crate::fs::FsFuture;

/// The DAV: namespace.
pub const NS_DAV_URI: &str = "DAV:";

const LIVE_PROPS: &[&str] = &[
    "creationdate",
    "getcontentlength",
    "getcontenttype",
    "getetag",
    "getlastmodified",
    "lockdiscovery",
    "resourcetype",
    "supportedlock",
];

/// A webdav property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DavProp {
    /// Name of the property.
    pub name: String,
    /// XML prefix.
    pub prefix: Option<String>,
    /// XML namespace.
    pub namespace: Option<String>,
    /// Value of the property as raw XML (the whole element).
    pub xml: Option<Vec<u8>>,
}

impl DavProp {
    pub fn new(namespace: Option<&str>, name: &str) -> DavProp {
        DavProp {
            name: name.to_string(),
            prefix: None,
            namespace: namespace.map(|s| s.to_string()),
            xml: None,
        }
    }

    /// Do two props have the same (namespace, name) key.
    pub fn same_key(&self, other: &DavProp) -> bool {
        self.name == other.name && self.namespace == other.namespace
    }

    /// A copy without the value.
    pub fn name_only(&self) -> DavProp {
        DavProp {
            xml: None,
            ..self.clone()
        }
    }
}

/// One step of a PROPPATCH.
#[derive(Debug, Clone)]
pub enum PropPatch {
    Set(DavProp),
    Remove(DavProp),
}

impl PropPatch {
    pub fn prop(&self) -> &DavProp {
        match self {
            PropPatch::Set(p) | PropPatch::Remove(p) => p,
        }
    }
}

/// The trait that defines a property store.
pub trait DavPropStore: Debug + Send + Sync + DynClone {
    /// All dead properties of a resource, with their values.
    fn get_props<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, Vec<DavProp>>;

    /// Set (add or replace) a dead property.
    fn set_prop<'a>(&'a self, path: &'a DavPath, prop: DavProp) -> FsFuture<'a, ()>;

    /// Remove a dead property. Removing a property that does not exist
    /// is not an error.
    fn remove_prop<'a>(&'a self, path: &'a DavPath, prop: &'a DavProp) -> FsFuture<'a, ()>;

    /// Copy the dead properties of one resource to another,
    /// replacing what the destination had.
    fn copy_props<'a>(&'a self, from: &'a DavPath, to: &'a DavPath) -> FsFuture<'a, ()>;

    /// Move the dead properties of a resource and everything below it.
    fn rename_props<'a>(&'a self, from: &'a DavPath, to: &'a DavPath) -> FsFuture<'a, ()>;

    /// Forget the dead properties of a resource.
    fn delete_props<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()>;

    /// Is this a live (server computed, read-only) property.
    fn is_live(&self, prop: &DavProp) -> bool {
        prop.namespace.as_deref() == Some(NS_DAV_URI) && LIVE_PROPS.contains(&prop.name.as_str())
    }

    /// Apply a PROPPATCH to one resource, in document order.
    ///
    /// Either every step succeeds and every property is reported as 200 OK,
    /// or the resource is restored to its previous state. In that case the
    /// step that failed carries its error status and all others
    /// `424 Failed Dependency`.
    fn patch_props<'a>(
        &'a self,
        path: &'a DavPath,
        patch: Vec<PropPatch>,
    ) -> FsFuture<'a, Vec<(StatusCode, DavProp)>> {
        async move {
            let before = self.get_props(path).await?;
            let mut failed = None;
            for (idx, step) in patch.iter().enumerate() {
                let res = match step {
                    PropPatch::Set(p) => self.set_prop(path, p.clone()).await,
                    PropPatch::Remove(p) => self.remove_prop(path, p).await,
                };
                if let Err(e) = res {
                    debug!("patch_props {}: step {} failed: {}", path, idx, e);
                    failed = Some((idx, fserror_to_status(&e)));
                    break;
                }
            }

            let Some((failed_idx, status)) = failed else {
                return Ok(patch.iter().map(|s| (StatusCode::OK, s.prop().name_only())).collect());
            };

            // undo the steps that were applied, newest first.
            for step in patch[..failed_idx].iter().rev() {
                let p = step.prop();
                match before.iter().find(|b| b.same_key(p)) {
                    Some(old) => self.set_prop(path, old.clone()).await?,
                    None => self.remove_prop(path, p).await?,
                }
            }

            Ok(patch
                .iter()
                .enumerate()
                .map(|(i, s)| {
                    let st = if i == failed_idx { status } else { StatusCode::FAILED_DEPENDENCY };
                    (st, s.prop().name_only())
                })
                .collect())
        }
        .boxed()
    }
}

clone_trait_object! {DavPropStore}
