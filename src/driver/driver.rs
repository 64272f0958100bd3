// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::sync::Arc;

use tokio::task;

use crate::{
    daemon::{CsiError, CsiResult, StatusCode},
    driver::{
        config::DriverConfig, controller::ControllerService, identity::IdentityService,
        node::NodeService,
    },
};

/// The set of services registered for the configured mode.
pub struct Driver {
    config: DriverConfig,
    identity: IdentityService,
    controller: Option<ControllerService>,
    node: Option<Arc<NodeService>>,
}

impl Driver {
    /// Combine the services. Exactly the services the mode calls for must
    /// be supplied.
    pub fn new(
        config: DriverConfig,
        controller: Option<ControllerService>,
        node: Option<NodeService>,
    ) -> CsiResult<Driver> {
        if config.mode.has_controller() != controller.is_some() {
            return Err(CsiError::invalid_argument(format!(
                "mode {} {} a controller service",
                config.mode,
                if controller.is_some() {
                    "does not take"
                } else {
                    "requires"
                }
            )));
        }
        if config.mode.has_node() != node.is_some() {
            return Err(CsiError::invalid_argument(format!(
                "mode {} {} a node service",
                config.mode,
                if node.is_some() {
                    "does not take"
                } else {
                    "requires"
                }
            )));
        }

        info!("Driver configured in {} mode", config.mode);
        Ok(Driver {
            config,
            identity: IdentityService::default(),
            controller,
            node: node.map(Arc::new),
        })
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn identity(&self) -> &IdentityService {
        &self.identity
    }

    pub fn controller(&self) -> CsiResult<&ControllerService> {
        self.controller.as_ref().ok_or_else(|| {
            CsiError::Status(
                StatusCode::Unimplemented,
                format!(
                    "the controller service is not registered in {} mode",
                    self.config.mode
                ),
            )
        })
    }

    pub fn node(&self) -> CsiResult<Arc<NodeService>> {
        self.node.as_ref().map(Arc::clone).ok_or_else(|| {
            CsiError::Status(
                StatusCode::Unimplemented,
                format!(
                    "the node service is not registered in {} mode",
                    self.config.mode
                ),
            )
        })
    }

    /// Run a node call on the blocking thread pool.
    pub async fn on_node<T, F>(&self, call: F) -> CsiResult<T>
    where
        F: FnOnce(&NodeService) -> CsiResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let node = self.node()?;
        task::spawn_blocking(move || call(&node)).await?
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::{
        driver::{metadata::NodeIdentity, types::Mode},
        mount::{Mounter, SimMounter},
    };

    fn node_service(config: &DriverConfig) -> NodeService {
        NodeService::new(
            Arc::new(SimMounter::default()) as Arc<dyn Mounter>,
            NodeIdentity {
                local_id: "vm-1".to_owned(),
                ..Default::default()
            },
            config,
        )
    }

    #[tokio::test]
    async fn node_mode_has_no_controller() {
        let config = DriverConfig {
            mode: Mode::Node,
            ..Default::default()
        };
        let node = node_service(&config);
        let driver = Driver::new(config, None, Some(node)).unwrap();

        assert_matches!(
            driver.controller().err(),
            Some(CsiError::Status(StatusCode::Unimplemented, _))
        );
        let node_id = driver
            .on_node(|node| Ok(node.get_info().node_id))
            .await
            .unwrap();
        assert_eq!(node_id, "vm-1");
        assert!(driver.identity().probe().ready);
    }

    #[test]
    fn services_must_match_mode() {
        let config = DriverConfig {
            mode: Mode::All,
            ..Default::default()
        };
        let node = node_service(&config);
        assert!(Driver::new(config.clone(), None, Some(node)).is_err());

        let config = DriverConfig {
            mode: Mode::Controller,
            ..Default::default()
        };
        let node = node_service(&config);
        assert!(Driver::new(config, None, Some(node)).is_err());
    }
}
