//! Contains the structs and traits that define a store backend.
//!
//! The engine never touches storage directly. Every request obtains a
//! [`DavTransaction`] from a [`DavStore`], performs all reads and writes
//! through it, and then commits or rolls it back exactly once.
//!
//! All methods return a boxed future, so that both in-memory stores and
//! stores backed by async I/O fit behind the same trait object.
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use futures_util::future;

use crate::davpath::DavPath;
use crate::davxml::{PropName, PropValue};

/// Errors generated by a store implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FsError {
    #[error("not found")]
    NotFound,
    #[error("resource exists")]
    Exists,
    /// Missing parent, or a non-empty collection on remove.
    #[error("conflict")]
    Conflict,
    #[error("forbidden")]
    Forbidden,
    #[error("not implemented")]
    NotImplemented,
    /// The transaction was already committed or rolled back.
    #[error("transaction already finished")]
    TransactionClosed,
    #[error("general failure")]
    GeneralFailure,
}

/// The Result type.
pub type FsResult<T> = Result<T, FsError>;

/// Future returned by almost all of the store methods.
pub type FsFuture<'a, T> = Pin<Box<dyn Future<Output = FsResult<T>> + Send + 'a>>;

/// A transaction handle, shared by the request that owns it.
pub type DavTxn = Arc<dyn DavTransaction>;

/// Metadata of a single resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DavMetaData {
    pub is_collection: bool,
    /// Content length in bytes. Zero for collections.
    pub len: u64,
    pub modified: Option<SystemTime>,
    pub created: Option<SystemTime>,
    /// Store-supplied entity tag, without quotes.
    pub etag: Option<String>,
    pub content_type: Option<String>,
}

impl DavMetaData {
    pub fn collection() -> DavMetaData {
        DavMetaData {
            is_collection: true,
            len: 0,
            modified: None,
            created: None,
            etag: None,
            content_type: None,
        }
    }

    pub fn file(len: u64) -> DavMetaData {
        DavMetaData {
            is_collection: false,
            len,
            ..DavMetaData::collection()
        }
    }

    /// Entity tag, without quotes.
    ///
    /// Falls back to the length and modification time when the store
    /// does not supply one. `None` if neither is available.
    pub fn etag(&self) -> Option<String> {
        if let Some(ref etag) = self.etag {
            return Some(etag.clone());
        }
        let modified = self.modified?;
        let t = modified.duration_since(UNIX_EPOCH).ok()?;
        let t = t.as_secs() * 1000000 + t.subsec_nanos() as u64 / 1000;
        if self.is_collection {
            Some(format!("{t:x}"))
        } else {
            Some(format!("{:x}-{:x}", self.len, t))
        }
    }
}

/// The storage backend.
pub trait DavStore: Send + Sync {
    /// Start a new transaction. Each request gets its own.
    fn begin(&self) -> FsFuture<'_, DavTxn>;
}

/// One transaction against a [`DavStore`].
///
/// The engine never issues two operations concurrently on one handle,
/// and calls exactly one of `commit` or `rollback` at the end.
pub trait DavTransaction: Send + Sync {
    fn commit(&self) -> FsFuture<'_, ()>;

    fn rollback(&self) -> FsFuture<'_, ()>;

    /// Metadata of a resource, `FsError::NotFound` if it does not exist.
    fn metadata<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, DavMetaData>;

    /// Direct members of a collection.
    fn children<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, Vec<DavPath>>;

    fn read_content<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, Bytes>;

    /// Create or replace a non-collection resource. The parent must exist.
    fn write_content<'a>(&'a self, path: &'a DavPath, data: Bytes) -> FsFuture<'a, ()>;

    fn create_collection<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()>;

    /// Remove a single resource. Collections must be empty.
    fn remove_resource<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()>;

    /// Value of a dead property.
    #[allow(unused_variables)]
    fn get_property<'a>(&'a self, path: &'a DavPath, name: &'a PropName) -> FsFuture<'a, PropValue> {
        Box::pin(future::ready(Err(FsError::NotFound)))
    }

    /// All dead properties of a resource.
    #[allow(unused_variables)]
    fn get_properties<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, Vec<(PropName, PropValue)>> {
        Box::pin(future::ready(Ok(Vec::new())))
    }

    #[allow(unused_variables)]
    fn set_property<'a>(
        &'a self,
        path: &'a DavPath,
        name: PropName,
        value: PropValue,
    ) -> FsFuture<'a, ()> {
        Box::pin(future::ready(Err(FsError::NotImplemented)))
    }

    #[allow(unused_variables)]
    fn remove_property<'a>(&'a self, path: &'a DavPath, name: &'a PropName) -> FsFuture<'a, ()> {
        Box::pin(future::ready(Err(FsError::NotImplemented)))
    }
}
