//! Manifest files: the declared set of provider configs and managed objects.
//!
//! Applying a manifest makes the store match it. New objects are created,
//! changed specs are replaced, and objects no longer listed are marked for
//! deletion so their controllers can clean up the external resource.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::managed::{ManagedObject, ManagedSpec, ManagedStatus};
use crate::meta::ObjectMeta;
use crate::provider_config::ProviderConfig;
use crate::store::{ConfigStore, ObjectStore, StoreError};

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read manifest {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse manifest {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("duplicate {what} name in manifest: {name}")]
    Duplicate { what: &'static str, name: String },

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// One declared managed object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestObject {
    pub kind: String,
    pub name: String,
    pub spec: ManagedSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub provider_configs: Vec<ProviderConfig>,
    #[serde(default)]
    pub objects: Vec<ManifestObject>,
}

/// What an apply changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplySummary {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
}

impl Manifest {
    pub fn parse(path: &Path, data: &str) -> Result<Self, ManifestError> {
        let manifest: Manifest =
            serde_json::from_str(data).map_err(|source| ManifestError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub async fn load(path: &Path) -> Result<Self, ManifestError> {
        let data = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ManifestError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        Self::parse(path, &data)
    }

    fn validate(&self) -> Result<(), ManifestError> {
        let mut seen = HashSet::new();
        for cfg in &self.provider_configs {
            if !seen.insert(cfg.name.as_str()) {
                return Err(ManifestError::Duplicate {
                    what: "provider config",
                    name: cfg.name.clone(),
                });
            }
        }

        let mut seen = HashSet::new();
        for obj in &self.objects {
            if !seen.insert(obj.name.as_str()) {
                return Err(ManifestError::Duplicate {
                    what: "object",
                    name: obj.name.clone(),
                });
            }
        }
        Ok(())
    }

    /// Make the store match this manifest.
    ///
    /// Objects of the given `kinds` that exist in the store but not in the
    /// manifest are marked for deletion.
    pub async fn apply<S>(&self, store: &S, kinds: &[&str]) -> Result<ApplySummary, ManifestError>
    where
        S: ObjectStore + ConfigStore + ?Sized,
    {
        let mut summary = ApplySummary::default();

        for cfg in &self.provider_configs {
            store.put_provider_config(cfg.clone()).await?;
        }

        for decl in &self.objects {
            match store.get(&decl.name).await? {
                None => {
                    store
                        .create(ManagedObject {
                            kind: decl.kind.clone(),
                            metadata: ObjectMeta::new(decl.name.clone()),
                            spec: decl.spec.clone(),
                            status: ManagedStatus::default(),
                        })
                        .await?;
                    summary.created += 1;
                }
                Some(existing) if existing.metadata.is_being_deleted() => {
                    warn!(
                        "{} {} is still being deleted, not recreating it yet",
                        decl.kind, decl.name
                    );
                }
                Some(existing) if existing.kind != decl.kind => {
                    warn!(
                        "{} is declared as {} but stored as {}, leaving it alone",
                        decl.name, decl.kind, existing.kind
                    );
                }
                Some(existing) => {
                    if existing.spec != decl.spec {
                        store.update_spec(&decl.name, decl.spec.clone()).await?;
                        summary.updated += 1;
                    }
                }
            }
        }

        let declared: HashSet<&str> = self.objects.iter().map(|o| o.name.as_str()).collect();
        for kind in kinds {
            for obj in store.list(kind).await? {
                if declared.contains(obj.name()) || obj.metadata.is_being_deleted() {
                    continue;
                }
                info!("{} {} is no longer declared, deleting", obj.kind, obj.name());
                store.mark_for_deletion(obj.name()).await?;
                summary.deleted += 1;
            }
        }

        debug!("Manifest applied: {:?}", summary);
        Ok(summary)
    }
}
