//! `Webdav` (RFC4918) is HTTP (GET/HEAD/PUT/DELETE) plus a bunch of extra methods.
//!
//! This crate is the protocol engine of a WebDAV server. It takes `http`
//! requests and produces `http` responses, and leaves the transport to
//! whatever HTTP server library you use.
//!
//! The moving parts:
//!
//! - the [`DavHandler`], configured through a [`DavConfig`] builder
//! - a "filesystem" for backend storage ([`fs::DavFileSystem`])
//! - an optional "propstore" for dead properties ([`props::DavPropStore`])
//! - an optional "locksystem" that handles the webdav locks ([`ls::DavLockSystem`])
//!
//! Recursive operations (DELETE, COPY, MOVE, PROPFIND) visit resources in
//! a fixed order, and report per-resource failures in a `207 Multi-Status`
//! response instead of failing the whole request.
//!
//! Included are an in-memory filesystem and property store
//! ([`memfs::MemFs`]) and an in-memory locksystem ([`memls::MemLs`]).
//!
//! ```no_run
//! use dav_engine::{DavHandler, memfs::MemFs, memls::MemLs};
//!
//! # async fn serve(req: http::Request<dav_engine::body::Body>) {
//! let fs = MemFs::new();
//! let dav_server = DavHandler::builder()
//!     .filesystem(fs.clone())
//!     .propstore(fs)
//!     .locksystem(MemLs::new())
//!     .build_handler();
//!
//! let resp = dav_server.handle(req).await;
//! println!("{}", resp.status());
//! # }
//! ```
#![cfg_attr(docsrs, feature(doc_cfg))]

#[macro_use]
extern crate log;

mod conditional;
mod davhandler;
mod davheaders;
mod errors;
mod handle_copymove;
mod handle_delete;
mod handle_gethead;
mod handle_lock;
mod handle_mkcol;
mod handle_options;
mod handle_props;
mod handle_put;
mod multistatus;
mod tree;
mod util;
mod xmltree_ext;

pub mod body;
pub mod davpath;
pub mod fs;
pub mod ls;
#[cfg(feature = "memfs")]
#[cfg_attr(docsrs, doc(cfg(feature = "memfs")))]
pub mod memfs;
pub mod memls;
pub mod props;
pub mod walker;

pub use crate::davhandler::{DavConfig, DavHandler};
pub use crate::davheaders::Depth;
pub use crate::util::{DavMethod, DavMethodSet};
