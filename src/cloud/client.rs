// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::{error::Error, fmt};

use async_trait::async_trait;

use crate::cloud::types::{Cloud, CreateVolumeParams, Device, Tenant, Volume};

pub type CloudResult<T> = Result<T, CloudError>;

const HTTP_NOT_FOUND: u16 = 404;

/// A failed provider call. `status` is the HTTP status of the response, if
/// the request got far enough to receive one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudError {
    pub status: Option<u16>,
    pub message: String,
}

impl CloudError {
    pub fn new<S: Into<String>>(status: Option<u16>, message: S) -> CloudError {
        CloudError {
            status,
            message: message.into(),
        }
    }

    pub fn not_found<S: Into<String>>(message: S) -> CloudError {
        CloudError::new(Some(HTTP_NOT_FOUND), message)
    }

    pub fn is_not_found(&self) -> bool {
        self.status == Some(HTTP_NOT_FOUND)
    }

    /// True if the request never produced an HTTP response.
    pub fn is_transport(&self) -> bool {
        self.status.is_none()
    }
}

impl fmt::Display for CloudError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} (HTTP {status})", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl Error for CloudError {}

impl From<reqwest::Error> for CloudError {
    fn from(err: reqwest::Error) -> CloudError {
        CloudError::new(err.status().map(|s| s.as_u16()), err.to_string())
    }
}

impl From<url::ParseError> for CloudError {
    fn from(err: url::ParseError) -> CloudError {
        CloudError::new(None, format!("invalid request URL: {err}"))
    }
}

/// Operations the driver needs from the provider's storage API.
#[async_trait]
pub trait CloudClient: Send + Sync {
    async fn current_tenant(&self) -> CloudResult<Tenant>;

    async fn list_clouds(&self, tenant_id: &str) -> CloudResult<Vec<Cloud>>;

    async fn get_device(&self, tenant_id: &str, device_id: &str) -> CloudResult<Device>;

    async fn list_volumes(&self, tenant_id: &str) -> CloudResult<Vec<Volume>>;

    async fn get_volume(&self, tenant_id: &str, volume_id: &str) -> CloudResult<Volume>;

    async fn get_volume_by_name(&self, tenant_id: &str, name: &str) -> CloudResult<Volume>;

    async fn create_volume(
        &self,
        tenant_id: &str,
        params: &CreateVolumeParams,
    ) -> CloudResult<Volume>;

    async fn delete_volume(&self, tenant_id: &str, volume_id: &str) -> CloudResult<()>;

    async fn attach_volume(
        &self,
        tenant_id: &str,
        volume_id: &str,
        device_id: &str,
    ) -> CloudResult<()>;

    async fn detach_volume(
        &self,
        tenant_id: &str,
        volume_id: &str,
        device_id: &str,
    ) -> CloudResult<()>;

    /// Grow a volume to `size_gib`.
    async fn extend_volume(&self, volume_id: &str, size_gib: i64) -> CloudResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(CloudError::not_found("gone").is_not_found());
        assert!(!CloudError::new(Some(500), "boom").is_not_found());
        assert!(CloudError::new(None, "connection refused").is_transport());
        assert_eq!(
            CloudError::new(Some(409), "conflict").to_string(),
            "conflict (HTTP 409)"
        );
    }
}
