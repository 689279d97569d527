//! Error types and the protocol status table.
//!
//! Every failure inside the engine ends up as a `DavError`. The
//! dispatcher turns it into a bodiless response using `statuscode()`,
//! multi-resource handlers record `statuscode()` per resource instead.
use std::io::ErrorKind;

use http::StatusCode;
use thiserror::Error;

use crate::fs::FsError;
use crate::ls::LockError;

#[derive(Debug, Error)]
pub(crate) enum DavError {
    #[error("error reading XML request body")]
    XmlReadError,
    #[error("error interpreting XML request body")]
    XmlParseError,
    #[error("error generating XML response")]
    XmlWriteError,
    #[error("invalid request path")]
    InvalidPath,
    #[error("path not valid here")]
    IllegalPath,
    #[error("path escapes the namespace root")]
    ForbiddenPath,
    #[error("unknown method")]
    UnknownDavMethod,
    #[error("status {0}")]
    Status(StatusCode),
    #[error("status {0}, closing connection")]
    StatusClose(StatusCode),
    #[error(transparent)]
    FsError(#[from] FsError),
    #[error(transparent)]
    LockError(#[from] LockError),
    #[error(transparent)]
    IoError(#[from] std::io::Error),
}

impl From<StatusCode> for DavError {
    fn from(e: StatusCode) -> Self {
        DavError::Status(e)
    }
}

fn ioerror_to_status(ioerror: &std::io::Error) -> StatusCode {
    match ioerror.kind() {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::PermissionDenied => StatusCode::FORBIDDEN,
        ErrorKind::AlreadyExists => StatusCode::CONFLICT,
        ErrorKind::TimedOut => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::BAD_GATEWAY,
    }
}

/// Map a storage or property-store failure to its protocol status.
pub(crate) fn fserror_to_status(e: &FsError) -> StatusCode {
    match e {
        FsError::NotImplemented => StatusCode::NOT_IMPLEMENTED,
        FsError::GeneralFailure => StatusCode::INTERNAL_SERVER_ERROR,
        FsError::Exists => StatusCode::METHOD_NOT_ALLOWED,
        FsError::NotFound => StatusCode::NOT_FOUND,
        FsError::Conflict => StatusCode::CONFLICT,
        FsError::Forbidden => StatusCode::FORBIDDEN,
        FsError::InsufficientStorage => StatusCode::INSUFFICIENT_STORAGE,
        FsError::LoopDetected => StatusCode::LOOP_DETECTED,
        FsError::PathTooLong => StatusCode::URI_TOO_LONG,
        FsError::TooLarge => StatusCode::PAYLOAD_TOO_LARGE,
        FsError::IsRemote => StatusCode::BAD_GATEWAY,
    }
}

/// Map a lock manager failure to its protocol status.
pub(crate) fn lockerror_to_status(e: &LockError) -> StatusCode {
    match e {
        LockError::Conflict(_) => StatusCode::LOCKED,
        // unknown, expired or already released token.
        LockError::NotFound => StatusCode::BAD_REQUEST,
        LockError::WrongPath => StatusCode::CONFLICT,
    }
}

impl DavError {
    pub(crate) fn statuscode(&self) -> StatusCode {
        match self {
            DavError::XmlReadError => StatusCode::BAD_REQUEST,
            DavError::XmlParseError => StatusCode::BAD_REQUEST,
            DavError::XmlWriteError => StatusCode::INTERNAL_SERVER_ERROR,
            DavError::InvalidPath => StatusCode::BAD_REQUEST,
            DavError::IllegalPath => StatusCode::BAD_GATEWAY,
            DavError::ForbiddenPath => StatusCode::FORBIDDEN,
            DavError::UnknownDavMethod => StatusCode::NOT_IMPLEMENTED,
            DavError::Status(e) => *e,
            DavError::StatusClose(e) => *e,
            DavError::FsError(e) => fserror_to_status(e),
            DavError::LockError(e) => lockerror_to_status(e),
            DavError::IoError(e) => ioerror_to_status(e),
        }
    }

    pub(crate) fn must_close(&self) -> bool {
        !matches!(self, DavError::Status(_) | DavError::FsError(_) | DavError::LockError(_))
    }
}

pub(crate) type DavResult<T> = Result<T, DavError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_table() {
        let e: DavError = FsError::Conflict.into();
        assert_eq!(e.statuscode(), StatusCode::CONFLICT);
        let e: DavError = FsError::InsufficientStorage.into();
        assert_eq!(e.statuscode(), StatusCode::INSUFFICIENT_STORAGE);
        let e: DavError = LockError::NotFound.into();
        assert_eq!(e.statuscode(), StatusCode::BAD_REQUEST);
        let e: DavError = StatusCode::PRECONDITION_FAILED.into();
        assert_eq!(e.statuscode(), StatusCode::PRECONDITION_FAILED);
        assert!(!e.must_close());
        assert!(DavError::XmlParseError.must_close());
    }
}
