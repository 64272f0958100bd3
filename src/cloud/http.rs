// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_derive::{Deserialize, Serialize};
use url::Url;

use crate::{
    cloud::{
        client::{CloudClient, CloudError, CloudResult},
        types::{Cloud, CreateVolumeParams, Device, Tenant, Volume},
    },
    daemon::{CsiError, CsiResult, VERSION},
};

const CLIENT_ID_HEADER: &str = "X-User-Id";

#[derive(Debug, Deserialize)]
struct DeviceEnvelope {
    device: DeviceRecord,
}

#[derive(Debug, Deserialize)]
struct DeviceRecord {
    #[serde(rename = "localvmdetails")]
    details: LocalVmDetails,
}

#[derive(Debug, Deserialize)]
struct LocalVmDetails {
    #[serde(rename = "localvmid")]
    local_vm_id: String,
    #[serde(rename = "vmDisplayName", default)]
    display_name: String,
}

#[derive(Debug, Deserialize)]
struct CreateVolumeEnvelope {
    #[serde(rename = "persistentStorage")]
    volume: Volume,
}

#[derive(Debug, Serialize)]
struct AttachmentRequest<'a> {
    #[serde(rename = "serverId")]
    server_id: [&'a str; 1],
}

#[derive(Debug, Serialize)]
struct ExtendRequest {
    size: i64,
}

/// Client for the provider's REST API.
pub struct HttpCloud {
    base_url: Url,
    client: Client,
    token: String,
    client_id: String,
}

impl HttpCloud {
    pub fn new(base_url: &str, token: &str, client_id: &str) -> CsiResult<HttpCloud> {
        if token.is_empty() {
            return Err(CsiError::invalid_argument("an API token is required"));
        }
        if client_id.is_empty() {
            return Err(CsiError::invalid_argument("an API client id is required"));
        }

        let base_url = Url::parse(base_url)?;
        if base_url.cannot_be_a_base() {
            return Err(CsiError::invalid_argument(format!(
                "{base_url} can not be used as an API base URL"
            )));
        }

        let client = Client::builder()
            .user_agent(format!("cloudvold/{VERSION}"))
            .build()
            .map_err(|err| CsiError::internal(format!("failed to build HTTP client: {err}")))?;

        Ok(HttpCloud {
            base_url,
            client,
            token: token.to_owned(),
            client_id: client_id.to_owned(),
        })
    }

    /// Build a URL from path segments below the base URL. Each segment is
    /// percent-encoded, so volume names can not alter the path.
    fn endpoint(&self, segments: &[&str]) -> CloudResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| CloudError::new(None, "API base URL can not take a path"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .bearer_auth(&self.token)
            .header(CLIENT_ID_HEADER, &self.client_id)
    }

    async fn execute(&self, request: RequestBuilder) -> CloudResult<reqwest::Response> {
        let response = self.authorized(request).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = if body.trim().is_empty() {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string()
        } else {
            body.trim().to_string()
        };
        Err(CloudError::new(Some(status.as_u16()), message))
    }

    async fn fetch<T: DeserializeOwned>(&self, request: RequestBuilder) -> CloudResult<T> {
        Ok(self.execute(request).await?.json::<T>().await?)
    }
}

#[async_trait]
impl CloudClient for HttpCloud {
    async fn current_tenant(&self) -> CloudResult<Tenant> {
        let url = self.endpoint(&["tenants", "current"])?;
        self.fetch(self.client.get(url)).await
    }

    async fn list_clouds(&self, tenant_id: &str) -> CloudResult<Vec<Cloud>> {
        let url = self.endpoint(&[tenant_id, "clouds"])?;
        self.fetch(self.client.get(url)).await
    }

    async fn get_device(&self, tenant_id: &str, device_id: &str) -> CloudResult<Device> {
        let url = self.endpoint(&[tenant_id, "devices", device_id])?;
        let envelope: DeviceEnvelope = self.fetch(self.client.get(url)).await?;
        Ok(Device {
            local_id: envelope.device.details.local_vm_id,
            display_name: envelope.device.details.display_name,
        })
    }

    async fn list_volumes(&self, tenant_id: &str) -> CloudResult<Vec<Volume>> {
        let url = self.endpoint(&[tenant_id, "persistentstorages"])?;
        self.fetch(self.client.get(url)).await
    }

    async fn get_volume(&self, tenant_id: &str, volume_id: &str) -> CloudResult<Volume> {
        let url = self.endpoint(&[tenant_id, "persistentstorages", volume_id])?;
        self.fetch(self.client.get(url)).await
    }

    async fn get_volume_by_name(&self, tenant_id: &str, name: &str) -> CloudResult<Volume> {
        let url = self.endpoint(&[tenant_id, "persistentstorages", "by-name", name])?;
        self.fetch(self.client.get(url)).await
    }

    async fn create_volume(
        &self,
        tenant_id: &str,
        params: &CreateVolumeParams,
    ) -> CloudResult<Volume> {
        let url = self.endpoint(&[tenant_id, "persistentstorages"])?;
        let envelope: CreateVolumeEnvelope =
            self.fetch(self.client.post(url).json(params)).await?;
        Ok(envelope.volume)
    }

    async fn delete_volume(&self, tenant_id: &str, volume_id: &str) -> CloudResult<()> {
        let url = self.endpoint(&[tenant_id, "persistentstorages", volume_id])?;
        self.execute(self.client.delete(url)).await.map(|_| ())
    }

    async fn attach_volume(
        &self,
        tenant_id: &str,
        volume_id: &str,
        device_id: &str,
    ) -> CloudResult<()> {
        let url = self.endpoint(&[tenant_id, "persistentstorages", volume_id, "attach"])?;
        let body = AttachmentRequest {
            server_id: [device_id],
        };
        self.execute(self.client.post(url).json(&body))
            .await
            .map(|_| ())
    }

    async fn detach_volume(
        &self,
        tenant_id: &str,
        volume_id: &str,
        device_id: &str,
    ) -> CloudResult<()> {
        let url = self.endpoint(&[tenant_id, "persistentstorages", volume_id, "detach"])?;
        let body = AttachmentRequest {
            server_id: [device_id],
        };
        self.execute(self.client.post(url).json(&body))
            .await
            .map(|_| ())
    }

    async fn extend_volume(&self, volume_id: &str, size_gib: i64) -> CloudResult<()> {
        let url = self.endpoint(&["persistentstorages", volume_id, "extend"])?;
        self.execute(self.client.post(url).json(&ExtendRequest { size: size_gib }))
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn cloud() -> HttpCloud {
        HttpCloud::new("https://api.example.test/api/service/", "token", "client").unwrap()
    }

    #[test]
    fn endpoint_segments_are_escaped() {
        let url = cloud()
            .endpoint(&["t1", "persistentstorages", "by-name", "a/b c"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.example.test/api/service/t1/persistentstorages/by-name/a%2Fb%20c"
        );
    }

    #[test]
    fn credentials_are_required() {
        assert_matches!(
            HttpCloud::new("https://api.example.test/", "", "client").err(),
            Some(CsiError::Status(_, _))
        );
        assert_matches!(
            HttpCloud::new("https://api.example.test/", "token", "").err(),
            Some(CsiError::Status(_, _))
        );
        assert_matches!(
            HttpCloud::new("not a url", "token", "client").err(),
            Some(CsiError::Url(_))
        );
    }

    #[test]
    fn device_envelope() {
        let envelope: DeviceEnvelope = serde_json::from_str(
            r#"{"device": {"localvmdetails": {"localvmid": "vm-7", "vmDisplayName": "worker-1"}}}"#,
        )
        .unwrap();
        assert_eq!(envelope.device.details.local_vm_id, "vm-7");
        assert_eq!(envelope.device.details.display_name, "worker-1");
    }
}
