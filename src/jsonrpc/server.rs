// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::{
    fs,
    future::Future,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::{UnixListener, UnixStream},
    select,
    sync::watch,
    task::JoinSet,
};
use url::Url;

use crate::{
    daemon::{CsiError, CsiResult, StatusCode},
    driver::Driver,
    jsonrpc::{
        handler::process,
        interface::{CsiRequest, CsiResponse, RpcStatus},
        MAX_REQUEST_BYTES,
    },
};

/// The filesystem path named by a `unix://` endpoint.
pub fn socket_path(endpoint: &str) -> CsiResult<PathBuf> {
    let url = Url::parse(endpoint).map_err(|err| {
        CsiError::invalid_argument(format!("invalid endpoint {endpoint}: {err}"))
    })?;
    if url.scheme() != "unix" {
        return Err(CsiError::invalid_argument(format!(
            "endpoint scheme {} is not supported, only unix sockets are",
            url.scheme()
        )));
    }
    let path = format!("{}{}", url.host_str().unwrap_or_default(), url.path());
    if path.is_empty() || path == "/" {
        return Err(CsiError::invalid_argument(format!(
            "endpoint {endpoint} does not name a socket path"
        )));
    }
    Ok(PathBuf::from(path))
}

pub struct CsiServer {
    driver: Arc<Driver>,
    listener: UnixListener,
    path: PathBuf,
}

impl CsiServer {
    /// Bind the endpoint's socket, replacing a socket left by an earlier run.
    /// Must be called from within a tokio runtime.
    pub fn bind(driver: Arc<Driver>, endpoint: &str) -> CsiResult<CsiServer> {
        let path = socket_path(endpoint)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        match fs::remove_file(&path) {
            Ok(()) => info!("Removed stale socket {}", path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => (),
            Err(err) => return Err(err.into()),
        }
        let listener = UnixListener::bind(&path)?;
        info!("Listening for requests on {}", path.display());
        Ok(CsiServer {
            driver,
            listener,
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Serve connections until `shutdown` completes, then let the requests
    /// in flight finish and remove the socket. Connections that have not
    /// sent a request yet are closed.
    pub async fn run<F>(self, shutdown: F) -> CsiResult<()>
    where
        F: Future<Output = ()>,
    {
        let CsiServer {
            driver,
            listener,
            path,
        } = self;
        tokio::pin!(shutdown);
        let (stopping, stop_rx) = watch::channel(false);
        let mut connections = JoinSet::new();

        loop {
            select! {
                () = &mut shutdown => {
                    info!("Shutting down, {} requests in flight", connections.len());
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        connections.spawn(handle_connection(
                            Arc::clone(&driver),
                            stream,
                            stop_rx.clone(),
                        ));
                    }
                    Err(err) => warn!("Failed to accept connection: {}", err),
                },
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(err) = joined {
                        warn!("Request task failed: {}", err);
                    }
                }
            }
        }

        drop(listener);
        stopping.send_replace(true);
        while let Some(joined) = connections.join_next().await {
            if let Err(err) = joined {
                warn!("Request task failed: {}", err);
            }
        }
        match fs::remove_file(&path) {
            Ok(()) => (),
            Err(err) if err.kind() == ErrorKind::NotFound => (),
            Err(err) => warn!("Failed to remove socket {}: {}", path.display(), err),
        }
        info!("Server stopped");
        Ok(())
    }
}

async fn handle_connection(driver: Arc<Driver>, stream: UnixStream, stop: watch::Receiver<bool>) {
    if let Err(err) = serve_request(&driver, stream, stop).await {
        warn!("Failed to serve request: {}", err);
    }
}

/// Read one request line, process it and write the response. Returns
/// without a response if the server stops before the request arrives.
async fn serve_request(
    driver: &Driver,
    stream: UnixStream,
    mut stop: watch::Receiver<bool>,
) -> CsiResult<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader.take(MAX_REQUEST_BYTES));
    let mut line = String::new();
    select! {
        read = reader.read_line(&mut line) => {
            read?;
        }
        _ = stop.wait_for(|stopping| *stopping) => {
            debug!("Closing idle connection on shutdown");
            return Ok(());
        }
    }

    let response = match serde_json::from_str::<CsiRequest>(&line) {
        Ok(request) => process(driver, request).await,
        Err(err) => CsiResponse::Error(RpcStatus {
            code: StatusCode::InvalidArgument,
            message: format!("malformed request: {err}"),
        }),
    };

    let mut payload = serde_json::to_vec(&response)?;
    payload.push(b'\n');
    writer.write_all(&payload).await?;
    writer.shutdown().await?;
    Ok(())
}
