// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::{error::Error, fmt, io, str, sync};

use serde_derive::{Deserialize, Serialize};
use strum_macros::{Display, EnumString, IntoStaticStr};

use crate::cloud::CloudError;

pub type CsiResult<T> = Result<T, CsiError>;

/// Status codes carried back to the orchestrator with every failed call.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, IntoStaticStr,
)]
pub enum StatusCode {
    InvalidArgument,
    NotFound,
    AlreadyExists,
    OutOfRange,
    Unimplemented,
    Internal,
}

#[derive(Debug)]
pub enum CsiError {
    Status(StatusCode, String),
    Cloud(CloudError),
    Io(io::Error),
    Nix(nix::Error),
    Utf8(str::Utf8Error),
    Serde(serde_json::error::Error),
    Url(url::ParseError),
    Kube(kube::Error),
    Join(tokio::task::JoinError),
}

impl CsiError {
    pub fn invalid_argument<S: Into<String>>(msg: S) -> CsiError {
        CsiError::Status(StatusCode::InvalidArgument, msg.into())
    }

    pub fn not_found<S: Into<String>>(msg: S) -> CsiError {
        CsiError::Status(StatusCode::NotFound, msg.into())
    }

    pub fn internal<S: Into<String>>(msg: S) -> CsiError {
        CsiError::Status(StatusCode::Internal, msg.into())
    }

    pub fn unimplemented(method: &str) -> CsiError {
        CsiError::Status(
            StatusCode::Unimplemented,
            format!("{method} is not yet implemented"),
        )
    }

    /// The status code reported for this error. Anything that did not
    /// originate as an explicit status is an internal failure.
    pub fn code(&self) -> StatusCode {
        match *self {
            CsiError::Status(code, _) => code,
            _ => StatusCode::Internal,
        }
    }

    /// The message reported alongside the status code.
    pub fn message(&self) -> String {
        match *self {
            CsiError::Status(_, ref msg) => msg.clone(),
            _ => self.to_string(),
        }
    }
}

impl fmt::Display for CsiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            CsiError::Status(code, ref msg) => write!(f, "{code}: {msg}"),
            CsiError::Cloud(ref err) => write!(f, "Cloud API error: {err}"),
            CsiError::Io(ref err) => write!(f, "IO error: {err}"),
            CsiError::Nix(ref err) => write!(f, "Nix error: {err}"),
            CsiError::Utf8(ref err) => write!(f, "Utf8 error: {err}"),
            CsiError::Serde(ref err) => write!(f, "Serde error: {err}"),
            CsiError::Url(ref err) => write!(f, "Endpoint URL error: {err}"),
            CsiError::Kube(ref err) => write!(f, "Kubernetes API error: {err}"),
            CsiError::Join(ref err) => write!(f, "Thread joining error: {err}"),
        }
    }
}

impl Error for CsiError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match *self {
            CsiError::Status(_, _) => None,
            CsiError::Cloud(ref err) => Some(err),
            CsiError::Io(ref err) => Some(err),
            CsiError::Nix(ref err) => Some(err),
            CsiError::Utf8(ref err) => Some(err),
            CsiError::Serde(ref err) => Some(err),
            CsiError::Url(ref err) => Some(err),
            CsiError::Kube(ref err) => Some(err),
            CsiError::Join(ref err) => Some(err),
        }
    }
}

impl From<CloudError> for CsiError {
    fn from(err: CloudError) -> CsiError {
        CsiError::Cloud(err)
    }
}

impl From<io::Error> for CsiError {
    fn from(err: io::Error) -> CsiError {
        CsiError::Io(err)
    }
}

impl From<nix::Error> for CsiError {
    fn from(err: nix::Error) -> CsiError {
        CsiError::Nix(err)
    }
}

impl From<str::Utf8Error> for CsiError {
    fn from(err: str::Utf8Error) -> CsiError {
        CsiError::Utf8(err)
    }
}

impl From<serde_json::error::Error> for CsiError {
    fn from(err: serde_json::error::Error) -> CsiError {
        CsiError::Serde(err)
    }
}

impl From<url::ParseError> for CsiError {
    fn from(err: url::ParseError) -> CsiError {
        CsiError::Url(err)
    }
}

impl From<kube::Error> for CsiError {
    fn from(err: kube::Error) -> CsiError {
        CsiError::Kube(err)
    }
}

impl From<tokio::task::JoinError> for CsiError {
    fn from(err: tokio::task::JoinError) -> CsiError {
        CsiError::Join(err)
    }
}

impl<T> From<sync::PoisonError<T>> for CsiError {
    fn from(err: sync::PoisonError<T>) -> CsiError {
        CsiError::internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;

    #[test]
    fn wrapped_errors_are_internal() {
        let err = CsiError::from(io::Error::other("disk on fire"));
        assert_eq!(err.code(), StatusCode::Internal);
        assert_eq!(err.message(), "IO error: disk on fire");
        assert!(err.source().is_some());
    }

    #[test]
    fn status_errors_keep_code_and_message() {
        let err = CsiError::not_found("volume 42 doesn't exist");
        assert_eq!(err.code(), StatusCode::NotFound);
        assert_eq!(err.message(), "volume 42 doesn't exist");
        assert_eq!(err.to_string(), "NotFound: volume 42 doesn't exist");
    }

    #[test]
    fn unimplemented_names_the_method() {
        let err = CsiError::unimplemented("ListSnapshots");
        assert_eq!(err.code(), StatusCode::Unimplemented);
        assert_eq!(err.message(), "ListSnapshots is not yet implemented");
    }
}
