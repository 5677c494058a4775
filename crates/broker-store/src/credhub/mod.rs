//! CredHub backend.
//!
//! Records are JSON credentials named `/{store_id}/{id}`. Instances and
//! bindings share the namespace.

mod client;
#[cfg(feature = "memory")]
mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument};

pub use client::{CredhubApi, HttpCredhubClient, WriteMode};
#[cfg(feature = "memory")]
pub use memory::MemoryCredhub;

use crate::config::CredhubConfig;
use crate::document::{ensure_no_secrets, ensure_not_reserved};
use crate::error::StoreError;
use crate::redaction::Redactor;
use crate::traits::{BrokerStore, MigrationTarget};
use crate::types::{BindingDetails, ServiceInstance};

/// Name, relative to the store, of the credential that marks a completed
/// migration from SQL.
pub const MIGRATION_MARKER: &str = "migrated-from-sql";

/// CredHub-backed [`BrokerStore`].
#[derive(Clone)]
pub struct CredhubStore {
    api: Arc<dyn CredhubApi>,
    store_id: String,
    redactor: Redactor,
}

impl CredhubStore {
    pub fn new(
        api: Arc<dyn CredhubApi>,
        store_id: impl Into<String>,
        redactor: Redactor,
    ) -> Result<Self, StoreError> {
        let store_id = store_id.into();
        if store_id.is_empty() || store_id.contains('/') {
            return Err(StoreError::Configuration(format!(
                "invalid credhub store id: {store_id:?}"
            )));
        }

        Ok(Self {
            api,
            store_id,
            redactor,
        })
    }

    pub fn from_config(config: &CredhubConfig, redactor: Redactor) -> Result<Self, StoreError> {
        config.validate()?;
        let client = HttpCredhubClient::new(config)?;
        Self::new(Arc::new(client), config.store_id.clone(), redactor)
    }

    pub fn store_id(&self) -> &str {
        &self.store_id
    }

    /// The credential name for `id`.
    pub fn namespaced(&self, id: &str) -> String {
        format!("/{}/{}", self.store_id, id)
    }

    async fn write_instance(
        &self,
        id: &str,
        details: &ServiceInstance,
        mode: WriteMode,
    ) -> Result<(), StoreError> {
        ensure_not_reserved(id, MIGRATION_MARKER)?;
        ensure_no_secrets(&details.service_fingerprint)?;
        let value = serde_json::to_value(details)?;
        self.api.set_json(&self.namespaced(id), &value, mode).await
    }

    async fn write_binding(
        &self,
        id: &str,
        details: &BindingDetails,
        mode: WriteMode,
    ) -> Result<(), StoreError> {
        ensure_not_reserved(id, MIGRATION_MARKER)?;
        let value = serde_json::to_value(self.redactor.redact(details)?)?;
        self.api.set_json(&self.namespaced(id), &value, mode).await
    }
}

impl std::fmt::Debug for CredhubStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredhubStore")
            .field("store_id", &self.store_id)
            .field("redactor", &self.redactor)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl BrokerStore for CredhubStore {
    #[instrument(skip(self))]
    async fn retrieve_instance_details(&self, id: &str) -> Result<ServiceInstance, StoreError> {
        match self.api.get_latest_json(&self.namespaced(id)).await? {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Err(StoreError::instance_not_found(id)),
        }
    }

    #[instrument(skip(self))]
    async fn retrieve_binding_details(&self, id: &str) -> Result<BindingDetails, StoreError> {
        match self.api.get_latest_json(&self.namespaced(id)).await? {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Err(StoreError::binding_not_found(id)),
        }
    }

    #[instrument(skip(self, details))]
    async fn create_instance_details(
        &self,
        id: &str,
        details: &ServiceInstance,
    ) -> Result<(), StoreError> {
        self.write_instance(id, details, WriteMode::NoOverwrite).await
    }

    #[instrument(skip(self, details))]
    async fn create_binding_details(
        &self,
        id: &str,
        details: &BindingDetails,
    ) -> Result<(), StoreError> {
        self.write_binding(id, details, WriteMode::NoOverwrite).await
    }

    #[instrument(skip(self))]
    async fn delete_instance_details(&self, id: &str) -> Result<(), StoreError> {
        if !self.api.delete(&self.namespaced(id)).await? {
            return Err(StoreError::instance_not_found(id));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_binding_details(&self, id: &str) -> Result<(), StoreError> {
        if !self.api.delete(&self.namespaced(id)).await? {
            return Err(StoreError::binding_not_found(id));
        }
        Ok(())
    }
}

#[async_trait]
impl MigrationTarget for CredhubStore {
    #[instrument(skip(self, details))]
    async fn import_instance_details(
        &self,
        id: &str,
        details: &ServiceInstance,
    ) -> Result<(), StoreError> {
        self.write_instance(id, details, WriteMode::Overwrite).await
    }

    #[instrument(skip(self, details))]
    async fn import_binding_details(
        &self,
        id: &str,
        details: &BindingDetails,
    ) -> Result<(), StoreError> {
        self.write_binding(id, details, WriteMode::Overwrite).await
    }

    #[instrument(skip(self), fields(store_id = %self.store_id))]
    async fn activate(&self) -> Result<(), StoreError> {
        self.api
            .set_value(&self.namespaced(MIGRATION_MARKER), "true", WriteMode::Overwrite)
            .await?;
        debug!("store activated");
        Ok(())
    }

    #[instrument(skip(self), fields(store_id = %self.store_id))]
    async fn is_activated(&self) -> Result<bool, StoreError> {
        let found = self
            .api
            .find_by_path(&self.namespaced(MIGRATION_MARKER))
            .await?;
        Ok(!found.is_empty())
    }
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::redaction::{is_redacted, RedactionCost};

    fn store() -> (CredhubStore, MemoryCredhub) {
        let credhub = MemoryCredhub::new();
        let store = CredhubStore::new(
            Arc::new(credhub.clone()),
            "some-store-id",
            Redactor::new(RedactionCost::minimal()).unwrap(),
        )
        .unwrap();
        (store, credhub)
    }

    fn instance() -> ServiceInstance {
        ServiceInstance::new("service-id", "plan-id", "org-guid", "space-guid")
            .with_fingerprint(json!({"username": "a-username"}))
    }

    #[tokio::test]
    async fn records_are_namespaced_by_store_id() {
        let (store, credhub) = store();
        store.create_instance_details("instance-1", &instance()).await.unwrap();

        assert_eq!(credhub.names().await, vec!["/some-store-id/instance-1"]);
        assert_eq!(
            store.retrieve_instance_details("instance-1").await.unwrap(),
            instance()
        );
    }

    #[tokio::test]
    async fn duplicate_creates_fail() {
        let (store, _) = store();
        store.create_instance_details("instance-1", &instance()).await.unwrap();
        assert!(store
            .create_instance_details("instance-1", &instance())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn binding_parameters_are_redacted_at_rest() {
        let (store, credhub) = store();
        let binding = BindingDetails::new("app-guid", "plan-id", "service-id")
            .with_parameters(json!({"secret": "s3cr3t"}));
        store.create_binding_details("binding-1", &binding).await.unwrap();

        let raw = credhub.raw("/some-store-id/binding-1").await.unwrap();
        assert!(!raw.to_string().contains("s3cr3t"));
        assert!(is_redacted(&raw["parameters"]));
        assert!(!store.is_binding_conflict("binding-1", &binding).await.unwrap());
    }

    #[tokio::test]
    async fn deleting_a_missing_record_is_not_found() {
        let (store, _) = store();
        let err = store.delete_binding_details("nope").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn activation_is_idempotent() {
        let (store, credhub) = store();
        assert!(!store.is_activated().await.unwrap());

        store.activate().await.unwrap();
        store.activate().await.unwrap();

        assert!(store.is_activated().await.unwrap());
        assert_eq!(
            credhub.raw("/some-store-id/migrated-from-sql").await,
            Some(json!("true"))
        );
    }

    #[tokio::test]
    async fn marker_id_cannot_be_created() {
        let (store, credhub) = store();

        let err = store
            .create_instance_details(MIGRATION_MARKER, &instance())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
        let err = store
            .create_binding_details(
                MIGRATION_MARKER,
                &BindingDetails::new("app-guid", "plan-id", "service-id"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));

        assert!(credhub.names().await.is_empty());
        assert!(!store.is_activated().await.unwrap());
    }

    #[tokio::test]
    async fn imports_replace_existing_records() {
        let (store, _) = store();
        store.create_instance_details("instance-1", &instance()).await.unwrap();

        let replacement = instance().with_fingerprint(json!({"username": "another"}));
        store
            .import_instance_details("instance-1", &replacement)
            .await
            .unwrap();
        assert_eq!(
            store.retrieve_instance_details("instance-1").await.unwrap(),
            replacement
        );

        let binding = BindingDetails::new("app-guid", "plan-id", "service-id")
            .with_parameters(json!({"u": "x"}));
        let redacted = Redactor::new(RedactionCost::minimal())
            .unwrap()
            .redact(&binding)
            .unwrap();
        store.import_binding_details("binding-1", &redacted).await.unwrap();
        store.import_binding_details("binding-1", &redacted).await.unwrap();
        assert!(!store.is_binding_conflict("binding-1", &binding).await.unwrap());
    }

    #[test]
    fn store_id_is_validated() {
        let api: Arc<dyn CredhubApi> = Arc::new(MemoryCredhub::new());
        assert!(CredhubStore::new(api.clone(), "", Redactor::default()).is_err());
        assert!(CredhubStore::new(api, "a/b", Redactor::default()).is_err());
    }
}
