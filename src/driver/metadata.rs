// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Discovery of the provider's id for the machine the node service runs on.

use std::{
    collections::BTreeMap,
    env, fs,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use kube::{Api, Client, ResourceExt};
use serde_derive::Deserialize;

use crate::daemon::{CsiError, CsiResult};

pub const LOCAL_ID_VAR: &str = "CLOUDVOL_LOCAL_ID";
pub const HOSTNAME_VAR: &str = "CLOUDVOL_HOSTNAME";
pub const CLOUD_ID_VAR: &str = "CLOUDVOL_CLOUD_ID";
pub const NODE_NAME_VAR: &str = "CSI_NODE_NAME";

pub const LABEL_LOCAL_ID: &str = "node.kubernetes.io/localvmid";
pub const LABEL_LOCAL_ID_DEPRECATED: &str = "kubernetes.cloudvol.io/localvmid";

type Lookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

fn process_env() -> Lookup {
    Box::new(|key| env::var(key).ok())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeIdentity {
    /// Provider id of this machine; the node id reported to the orchestrator.
    pub local_id: String,
    pub hostname: String,
    pub cloud_id: String,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// An identity with an empty `local_id` means the source has nothing to
    /// say and the next provider should be asked.
    async fn identity(&self) -> CsiResult<NodeIdentity>;
}

/// Identity from `CLOUDVOL_*` environment variables.
pub struct EnvProvider {
    lookup: Lookup,
}

impl Default for EnvProvider {
    fn default() -> EnvProvider {
        EnvProvider {
            lookup: process_env(),
        }
    }
}

impl EnvProvider {
    pub fn with_lookup<F>(lookup: F) -> EnvProvider
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        EnvProvider {
            lookup: Box::new(lookup),
        }
    }
}

#[async_trait]
impl IdentityProvider for EnvProvider {
    fn name(&self) -> &'static str {
        "environment"
    }

    async fn identity(&self) -> CsiResult<NodeIdentity> {
        Ok(NodeIdentity {
            local_id: (self.lookup)(LOCAL_ID_VAR).unwrap_or_default(),
            hostname: (self.lookup)(HOSTNAME_VAR).unwrap_or_default(),
            cloud_id: (self.lookup)(CLOUD_ID_VAR).unwrap_or_default(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct MetadataDocument {
    metadata: MetadataRecord,
}

#[derive(Debug, Deserialize)]
struct MetadataRecord {
    #[serde(default)]
    local_id: String,
    #[serde(default)]
    hostname: String,
    #[serde(rename = "cloudId", default)]
    cloud_id: String,
}

/// Identity from the JSON metadata file the provider places on each machine.
#[derive(Debug)]
pub struct MetadataFileProvider {
    path: PathBuf,
}

impl MetadataFileProvider {
    pub fn new(path: &Path) -> MetadataFileProvider {
        MetadataFileProvider {
            path: path.to_owned(),
        }
    }
}

#[async_trait]
impl IdentityProvider for MetadataFileProvider {
    fn name(&self) -> &'static str {
        "metadata file"
    }

    async fn identity(&self) -> CsiResult<NodeIdentity> {
        let contents = fs::read_to_string(&self.path)?;
        let document: MetadataDocument = serde_json::from_str(&contents)?;
        Ok(NodeIdentity {
            local_id: document.metadata.local_id,
            hostname: document.metadata.hostname,
            cloud_id: document.metadata.cloud_id,
        })
    }
}

fn local_id_from_labels(labels: &BTreeMap<String, String>) -> Option<String> {
    if let Some(local_id) = labels.get(LABEL_LOCAL_ID).filter(|id| !id.is_empty()) {
        return Some(local_id.clone());
    }
    labels
        .get(LABEL_LOCAL_ID_DEPRECATED)
        .filter(|id| !id.is_empty())
        .map(|local_id| {
            info!(
                "Using local id {} from deprecated label {}",
                local_id, LABEL_LOCAL_ID_DEPRECATED
            );
            local_id.clone()
        })
}

/// Identity from the labels of this machine's Kubernetes node record.
pub struct KubeNodeProvider {
    lookup: Lookup,
}

impl Default for KubeNodeProvider {
    fn default() -> KubeNodeProvider {
        KubeNodeProvider {
            lookup: process_env(),
        }
    }
}

#[async_trait]
impl IdentityProvider for KubeNodeProvider {
    fn name(&self) -> &'static str {
        "kubernetes node labels"
    }

    async fn identity(&self) -> CsiResult<NodeIdentity> {
        let node_name = (self.lookup)(NODE_NAME_VAR)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| {
                CsiError::invalid_argument(format!(
                    "{NODE_NAME_VAR} environment variable must be set"
                ))
            })?;

        let client = Client::try_default().await?;
        let node = Api::<Node>::all(client).get(&node_name).await?;
        Ok(NodeIdentity {
            local_id: local_id_from_labels(node.labels()).unwrap_or_default(),
            hostname: node_name,
            cloud_id: String::new(),
        })
    }
}

/// Providers in the order they are consulted.
pub fn default_providers(metadata_file: &Path) -> Vec<Box<dyn IdentityProvider>> {
    vec![
        Box::new(EnvProvider::default()),
        Box::new(MetadataFileProvider::new(metadata_file)),
        Box::new(KubeNodeProvider::default()),
    ]
}

/// Ask each provider in turn; the first non-empty local id wins. Errors from
/// all but the last provider are logged and skipped.
pub async fn resolve_node_identity(
    providers: &[Box<dyn IdentityProvider>],
) -> CsiResult<NodeIdentity> {
    let last = providers.len().saturating_sub(1);
    for (index, provider) in providers.iter().enumerate() {
        match provider.identity().await {
            Ok(identity) if !identity.local_id.is_empty() => {
                info!(
                    "Node identity {} determined from {}",
                    identity.local_id,
                    provider.name()
                );
                return Ok(identity);
            }
            Ok(_) => debug!("No node identity from {}", provider.name()),
            Err(err) if index < last => {
                warn!("Reading node identity from {} failed: {}", provider.name(), err);
            }
            Err(err) => return Err(err),
        }
    }
    Err(CsiError::invalid_argument(
        "could not determine the local id of this node",
    ))
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, io::Write};

    use assert_matches::assert_matches;

    use super::*;

    struct Fixed(Result<NodeIdentity, &'static str>);

    #[async_trait]
    impl IdentityProvider for Fixed {
        fn name(&self) -> &'static str {
            "fixed"
        }

        async fn identity(&self) -> CsiResult<NodeIdentity> {
            self.0.clone().map_err(CsiError::internal)
        }
    }

    fn local(id: &str) -> NodeIdentity {
        NodeIdentity {
            local_id: id.to_owned(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn environment_provider() {
        let vars: HashMap<&str, &str> =
            [(LOCAL_ID_VAR, "vm-1"), (HOSTNAME_VAR, "worker-1")].into();
        let provider =
            EnvProvider::with_lookup(move |key| vars.get(key).map(|v| (*v).to_owned()));
        let identity = provider.identity().await.unwrap();
        assert_eq!(identity.local_id, "vm-1");
        assert_eq!(identity.hostname, "worker-1");
        assert_eq!(identity.cloud_id, "");
    }

    #[tokio::test]
    async fn metadata_file_provider() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"metadata": {{"local_id": "vm-2", "hostname": "worker-2", "cloudId": "7"}}}}"#
        )
        .unwrap();

        let identity = MetadataFileProvider::new(file.path())
            .identity()
            .await
            .unwrap();
        assert_eq!(
            identity,
            NodeIdentity {
                local_id: "vm-2".to_owned(),
                hostname: "worker-2".to_owned(),
                cloud_id: "7".to_owned(),
            }
        );

        let dir = tempfile::tempdir().unwrap();
        assert_matches!(
            MetadataFileProvider::new(&dir.path().join("absent.json"))
                .identity()
                .await,
            Err(CsiError::Io(_))
        );
    }

    #[tokio::test]
    async fn kube_provider_needs_node_name() {
        let provider = KubeNodeProvider {
            lookup: Box::new(|_| None),
        };
        assert_matches!(
            provider.identity().await,
            Err(CsiError::Status(_, msg)) if msg.contains(NODE_NAME_VAR)
        );
    }

    #[test]
    fn label_fallback() {
        let mut labels = BTreeMap::new();
        assert_eq!(local_id_from_labels(&labels), None);

        labels.insert(LABEL_LOCAL_ID_DEPRECATED.to_owned(), "old".to_owned());
        assert_eq!(local_id_from_labels(&labels), Some("old".to_owned()));

        labels.insert(LABEL_LOCAL_ID.to_owned(), "new".to_owned());
        assert_eq!(local_id_from_labels(&labels), Some("new".to_owned()));
    }

    #[tokio::test]
    async fn first_non_empty_provider_wins() {
        let providers: Vec<Box<dyn IdentityProvider>> = vec![
            Box::new(Fixed(Ok(NodeIdentity::default()))),
            Box::new(Fixed(Err("no file"))),
            Box::new(Fixed(Ok(local("vm-3")))),
        ];
        assert_eq!(
            resolve_node_identity(&providers).await.unwrap().local_id,
            "vm-3"
        );
    }

    #[tokio::test]
    async fn last_provider_failure_is_fatal() {
        let providers: Vec<Box<dyn IdentityProvider>> = vec![
            Box::new(Fixed(Ok(NodeIdentity::default()))),
            Box::new(Fixed(Err("no cluster"))),
        ];
        assert_matches!(
            resolve_node_identity(&providers).await,
            Err(CsiError::Status(_, msg)) if msg == "no cluster"
        );

        let empty: Vec<Box<dyn IdentityProvider>> =
            vec![Box::new(Fixed(Ok(NodeIdentity::default())))];
        assert!(resolve_node_identity(&empty).await.is_err());
    }
}
