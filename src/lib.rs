//! ## Transactional WebDAV protocol engine
//!
//! [`Webdav`] (RFC4918) is defined as
//! HTTP (GET/HEAD/PUT/DELETE) plus a bunch of extension methods (PROPFIND, etc).
//! These extension methods are used to manage collections (like unix directories),
//! get information on collections (like unix `ls` or `readdir`), rename and
//! copy items, lock/unlock items, etc.
//!
//! This library is the protocol layer only. It takes a `http::Request`,
//! runs it against a transactional [store][DavStore] and produces a
//! `http::Response`. Accepting connections, authentication and storage
//! itself are left to the embedder.
//!
//! ## Request lifecycle.
//!
//! Every request:
//!
//! - has its path normalized by [`DavPath`]; `..` escaping the root is a 400.
//! - opens its own [transaction][DavTransaction] on the store.
//! - is checked against the [`LockManager`] and the `If` header before
//!   anything is written.
//! - commits if the handler succeeds and rolls back if it fails, so a
//!   half-finished COPY or MOVE is never visible to other requests.
//!
//! Multi-status responses are rendered by [`multistatus`], which declares
//! every namespace once on the root element, in first-use order.
//!
//! ## Backends.
//!
//! Included is [`MemFs`][memfs::MemFs], an ephemeral in-memory store with
//! snapshot isolation. It supports dead properties.
//!
//! ## Example.
//!
//! ```
//! use dav_engine::{body::Body, memfs::MemFs, DavHandler};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let dav = DavHandler::builder(MemFs::new())
//!     .strip_prefix("/dav")
//!     .principal("alice")
//!     .build();
//!
//! let req = http::Request::builder()
//!     .method("MKCOL")
//!     .uri("/dav/docs")
//!     .body(Body::empty())
//!     .unwrap();
//! let resp = dav.handle(req).await;
//! assert_eq!(resp.status(), http::StatusCode::CREATED);
//! # }
//! ```
//!
//! [`Webdav`]: https://tools.ietf.org/html/rfc4918

#![cfg_attr(docsrs, feature(doc_cfg))]

#[macro_use]
extern crate log;
#[macro_use]
extern crate lazy_static;

mod conditional;
mod davhandler;
mod davheaders;
mod errors;
mod txn;
mod util;

pub mod body;
pub mod davpath;
pub mod davxml;
pub mod fs;
pub mod ls;
pub mod multistatus;

#[cfg(any(docsrs, feature = "memfs"))]
#[cfg_attr(docsrs, doc(cfg(feature = "memfs")))]
pub mod memfs;

use crate::errors::DavResult;

pub use crate::davhandler::{DavBuilder, DavHandler};
pub use crate::davpath::DavPath;
pub use crate::errors::DavError;
pub use crate::fs::{DavStore, DavTransaction};
pub use crate::ls::LockManager;
pub use crate::util::{DavMethod, DavMethodSet};
