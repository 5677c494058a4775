//! Flat-file backend.
//!
//! All records are held in memory and written out as one JSON document by
//! [`BrokerStore::save`]. Nothing reaches disk until then.

use std::collections::{BTreeMap, HashMap};
use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, error, instrument};

use crate::document::ensure_no_secrets;
use crate::error::StoreError;
use crate::redaction::Redactor;
use crate::traits::BrokerStore;
use crate::types::{BindingDetails, ServiceInstance};

#[derive(Debug, Default, Serialize, Deserialize)]
struct FileState {
    #[serde(rename = "InstanceMap", default)]
    instances: BTreeMap<String, ServiceInstance>,
    #[serde(rename = "BindingMap", default)]
    bindings: BTreeMap<String, BindingDetails>,
}

#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    state: RwLock<FileState>,
    redactor: Redactor,
}

impl FileStore {
    /// Creates an empty store that will persist to `path`.
    pub fn new(path: impl Into<PathBuf>, redactor: Redactor) -> Self {
        Self {
            path: path.into(),
            state: RwLock::new(FileState::default()),
            redactor,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn retrieve_all_instance_details(&self) -> HashMap<String, ServiceInstance> {
        let state = self.state.read().await;
        state
            .instances
            .iter()
            .map(|(id, instance)| (id.clone(), instance.clone()))
            .collect()
    }

    pub async fn retrieve_all_binding_details(&self) -> HashMap<String, BindingDetails> {
        let state = self.state.read().await;
        state
            .bindings
            .iter()
            .map(|(id, binding)| (id.clone(), binding.clone()))
            .collect()
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| OsString::from("state"));
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl BrokerStore for FileStore {
    #[instrument(skip(self))]
    async fn retrieve_instance_details(&self, id: &str) -> Result<ServiceInstance, StoreError> {
        self.state
            .read()
            .await
            .instances
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::instance_not_found(id))
    }

    #[instrument(skip(self))]
    async fn retrieve_binding_details(&self, id: &str) -> Result<BindingDetails, StoreError> {
        self.state
            .read()
            .await
            .bindings
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::binding_not_found(id))
    }

    #[instrument(skip(self, details))]
    async fn create_instance_details(
        &self,
        id: &str,
        details: &ServiceInstance,
    ) -> Result<(), StoreError> {
        ensure_no_secrets(&details.service_fingerprint)?;
        self.state
            .write()
            .await
            .instances
            .insert(id.to_string(), details.clone());
        Ok(())
    }

    #[instrument(skip(self, details))]
    async fn create_binding_details(
        &self,
        id: &str,
        details: &BindingDetails,
    ) -> Result<(), StoreError> {
        let redacted = self.redactor.redact(details)?;
        self.state
            .write()
            .await
            .bindings
            .insert(id.to_string(), redacted);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_instance_details(&self, id: &str) -> Result<(), StoreError> {
        match self.state.write().await.instances.remove(id) {
            Some(_) => Ok(()),
            None => Err(StoreError::instance_not_found(id)),
        }
    }

    #[instrument(skip(self))]
    async fn delete_binding_details(&self, id: &str) -> Result<(), StoreError> {
        match self.state.write().await.bindings.remove(id) {
            Some(_) => Ok(()),
            None => Err(StoreError::binding_not_found(id)),
        }
    }

    /// Replaces everything in memory with the file's contents. A missing file
    /// leaves the store empty.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    async fn restore(&self) -> Result<(), StoreError> {
        let restored = match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice::<FileState>(&bytes).map_err(|e| {
                error!(error = %e, "failed to parse state file");
                StoreError::Serialisation(e.to_string())
            })?,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("no state file, starting empty");
                FileState::default()
            }
            Err(e) => {
                error!(error = %e, "failed to read state file");
                return Err(StoreError::Backend(e.to_string()));
            }
        };

        debug!(
            instances = restored.instances.len(),
            bindings = restored.bindings.len(),
            "state restored"
        );
        *self.state.write().await = restored;
        Ok(())
    }

    #[instrument(skip(self), fields(path = %self.path.display()))]
    async fn save(&self) -> Result<(), StoreError> {
        let bytes = {
            let state = self.state.read().await;
            serde_json::to_vec(&*state)?
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;
        }

        let temp = self.temp_path();
        tokio::fs::write(&temp, &bytes).await.map_err(|e| {
            error!(error = %e, "failed to write state file");
            StoreError::Backend(e.to_string())
        })?;
        tokio::fs::rename(&temp, &self.path)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        debug!(bytes = bytes.len(), "state saved");
        Ok(())
    }
}
