// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::UnixStream,
};

use crate::{
    daemon::{CsiError, CsiResult},
    jsonrpc::{
        interface::{CsiRequest, CsiResponse},
        server::socket_path,
    },
};

/// Issues one request per connection to a running daemon.
#[derive(Debug, Clone)]
pub struct CsiClient {
    path: PathBuf,
}

impl CsiClient {
    pub fn new<P: Into<PathBuf>>(path: P) -> CsiClient {
        CsiClient { path: path.into() }
    }

    pub fn from_endpoint(endpoint: &str) -> CsiResult<CsiClient> {
        Ok(CsiClient::new(socket_path(endpoint)?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn send(&self, request: &CsiRequest) -> CsiResult<CsiResponse> {
        let stream = UnixStream::connect(&self.path).await?;
        let (reader, mut writer) = stream.into_split();

        let mut payload = serde_json::to_vec(request)?;
        payload.push(b'\n');
        writer.write_all(&payload).await?;
        writer.shutdown().await?;

        let mut line = String::new();
        BufReader::new(reader).read_line(&mut line).await?;
        if line.trim().is_empty() {
            return Err(CsiError::internal(format!(
                "{} closed the connection without a response",
                self.path.display()
            )));
        }
        Ok(serde_json::from_str(&line)?)
    }

    /// Send the request and decode a successful result as `R`.
    pub async fn call<R: DeserializeOwned>(&self, request: &CsiRequest) -> CsiResult<R> {
        match self.send(request).await? {
            CsiResponse::Result(value) => Ok(serde_json::from_value(value)?),
            CsiResponse::Error(status) => Err(CsiError::Status(status.code, status.message)),
        }
    }
}
