use std::io;

use http::StatusCode;

use crate::davpath::{DavPath, ParseError};
use crate::fs::FsError;
use crate::ls::LockError;

pub(crate) type DavResult<T> = Result<T, DavError>;

/// Everything that can go wrong while handling a request.
///
/// Each variant maps onto an HTTP status via [`DavError::statuscode`].
#[derive(Debug, thiserror::Error)]
pub enum DavError {
    #[error("malformed XML body: {0}")]
    XmlParse(String),
    #[error("failed to write XML: {0}")]
    XmlWrite(String),
    #[error("invalid path: {0}")]
    InvalidPath(#[from] ParseError),
    #[error("unknown method")]
    UnknownDavMethod,
    #[error("invalid {0} header")]
    InvalidHeader(&'static str),
    /// A lock blocks the operation. Carries the lock root.
    #[error("{0} is locked")]
    Locked(DavPath),
    /// A new lock conflicts with an existing one. Carries its root.
    #[error("conflicting lock on {0}")]
    LockConflict(DavPath),
    #[error("precondition failed")]
    PreconditionFailed,
    #[error("store error: {0}")]
    Fs(#[from] FsError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("status {0}")]
    Status(StatusCode),
    /// Like `Status`, and the connection should be closed afterwards.
    #[error("status {0}")]
    StatusClose(StatusCode),
}

impl From<StatusCode> for DavError {
    fn from(e: StatusCode) -> Self {
        DavError::Status(e)
    }
}

impl From<LockError> for DavError {
    fn from(e: LockError) -> Self {
        match e {
            LockError::Conflict(lock) => DavError::LockConflict(lock.path),
            LockError::PreconditionFailed(lock) => DavError::Locked(lock.path),
            LockError::NotFound => DavError::PreconditionFailed,
        }
    }
}

impl From<xml::writer::Error> for DavError {
    fn from(e: xml::writer::Error) -> Self {
        DavError::XmlWrite(e.to_string())
    }
}

pub(crate) fn fserror_to_status(e: FsError) -> StatusCode {
    match e {
        FsError::NotFound => StatusCode::NOT_FOUND,
        FsError::Exists => StatusCode::METHOD_NOT_ALLOWED,
        FsError::Conflict => StatusCode::CONFLICT,
        FsError::Forbidden => StatusCode::FORBIDDEN,
        FsError::NotImplemented => StatusCode::NOT_IMPLEMENTED,
        FsError::TransactionClosed | FsError::GeneralFailure => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl DavError {
    pub fn statuscode(&self) -> StatusCode {
        match *self {
            DavError::XmlParse(_) => StatusCode::BAD_REQUEST,
            DavError::XmlWrite(_) => StatusCode::INTERNAL_SERVER_ERROR,
            DavError::InvalidPath(ParseError::PrefixMismatch) => StatusCode::NOT_FOUND,
            DavError::InvalidPath(_) => StatusCode::BAD_REQUEST,
            DavError::UnknownDavMethod => StatusCode::METHOD_NOT_ALLOWED,
            DavError::InvalidHeader(_) => StatusCode::BAD_REQUEST,
            DavError::Locked(_) | DavError::LockConflict(_) => StatusCode::LOCKED,
            DavError::PreconditionFailed => StatusCode::PRECONDITION_FAILED,
            DavError::Fs(e) => fserror_to_status(e),
            DavError::Io(ref e) => match e.kind() {
                io::ErrorKind::NotFound => StatusCode::NOT_FOUND,
                io::ErrorKind::PermissionDenied => StatusCode::FORBIDDEN,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            DavError::Status(s) | DavError::StatusClose(s) => s,
        }
    }

    /// After some errors the request body may not have been read completely.
    pub fn must_close(&self) -> bool {
        matches!(
            self,
            DavError::UnknownDavMethod | DavError::StatusClose(_) | DavError::Io(_)
        )
    }
}
