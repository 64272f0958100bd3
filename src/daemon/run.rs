// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Main loop

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use tokio::{
    runtime::Builder,
    select,
    signal::unix::{signal, SignalKind},
};

use crate::{
    cloud::{CloudClient, HttpCloud, SimCloud},
    daemon::{command_line::Args, errors::CsiResult, VERSION},
    driver::{
        default_providers, resolve_node_identity, ControllerService, Driver, DriverConfig,
        EnvProvider, IdentityProvider, MetadataFileProvider, NodeIdentity, NodeService,
    },
    jsonrpc::{socket_path, CsiServer},
    mount::{CommandMounter, Mounter, SimMounter},
};

const SIM_NODE_ID: &str = "sim-node";

/// Resolves once SIGINT or SIGTERM arrives.
async fn shutdown_signal() {
    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(err) => {
            error!("Failure while listening for SIGTERM: {}", err);
            if let Err(err) = tokio::signal::ctrl_c().await {
                error!("Failure while listening for SIGINT: {}", err);
            }
            return;
        }
    };
    select! {
        res = tokio::signal::ctrl_c() => {
            if let Err(err) = res {
                error!("Failure while listening for SIGINT: {}", err);
            }
            info!("SIGINT received");
        }
        _ = terminate.recv() => info!("SIGTERM received"),
    }
}

async fn controller_service(args: &Args, config: &DriverConfig) -> CsiResult<ControllerService> {
    let cloud: Arc<dyn CloudClient> = if args.sim {
        info!("Using SimCloud");
        Arc::new(SimCloud::default())
    } else {
        Arc::new(HttpCloud::new(&args.api_url, &args.token, &args.client_id)?)
    };
    ControllerService::initialize(cloud, config).await
}

async fn node_identity(args: &Args) -> CsiResult<NodeIdentity> {
    if args.sim {
        let providers: Vec<Box<dyn IdentityProvider>> = vec![
            Box::new(EnvProvider::default()),
            Box::new(MetadataFileProvider::new(&args.metadata_file)),
        ];
        return Ok(resolve_node_identity(&providers)
            .await
            .unwrap_or_else(|err| {
                info!("Using simulated node identity {}: {}", SIM_NODE_ID, err);
                NodeIdentity {
                    local_id: SIM_NODE_ID.to_owned(),
                    ..Default::default()
                }
            }));
    }
    resolve_node_identity(&default_providers(&args.metadata_file)).await
}

async fn node_service(args: &Args, config: &DriverConfig) -> CsiResult<NodeService> {
    let mounter: Arc<dyn Mounter> = if args.sim {
        info!("Using SimMounter");
        Arc::new(SimMounter::open())
    } else {
        Arc::new(CommandMounter::new()?)
    };
    let identity = node_identity(args).await?;
    Ok(NodeService::new(mounter, identity, config))
}

/// Build the services the mode calls for and serve requests until a
/// termination signal is received.
pub fn run(args: &Args) -> CsiResult<()> {
    let config = args.to_config();
    // Fail on a bad endpoint before any backend is contacted.
    socket_path(&config.endpoint)?;

    let runtime = Builder::new_multi_thread()
        .enable_all()
        .thread_name_fn(|| {
            static ATOMIC_ID: AtomicUsize = AtomicUsize::new(0);
            let id = ATOMIC_ID.fetch_add(1, Ordering::SeqCst);
            format!("cloudvol-wt-{id}")
        })
        .build()?;
    runtime.block_on(async move {
        info!("cloudvold version {} started in {} mode", VERSION, config.mode);

        let controller = if config.mode.has_controller() {
            match controller_service(args, &config).await {
                Ok(service) => Some(service),
                Err(err) => {
                    error!("Failed to start the controller service: {}; exiting", err);
                    return Err(err);
                }
            }
        } else {
            None
        };
        let node = if config.mode.has_node() {
            match node_service(args, &config).await {
                Ok(service) => Some(service),
                Err(err) => {
                    error!("Failed to start the node service: {}; exiting", err);
                    return Err(err);
                }
            }
        } else {
            None
        };

        let endpoint = config.endpoint.clone();
        let driver = Arc::new(Driver::new(config, controller, node)?);
        CsiServer::bind(driver, &endpoint)?
            .run(shutdown_signal())
            .await
    })
}
