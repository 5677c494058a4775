use std::collections::HashMap;

use async_trait::async_trait;

use crate::conflict;
use crate::error::StoreError;
use crate::types::{BindingDetails, ServiceInstance};

/// Durable storage for service instances and bindings.
///
/// Every backend implements the same semantics:
///
/// - fingerprints containing a `password` key are rejected on create
/// - binding parameters are redacted before they are persisted
/// - retrieving or deleting an absent record is [`StoreError::NotFound`]
/// - conflict checks report `false` when nothing is stored under the ID
#[async_trait]
pub trait BrokerStore: Send + Sync {
    async fn retrieve_instance_details(&self, id: &str) -> Result<ServiceInstance, StoreError>;

    async fn retrieve_binding_details(&self, id: &str) -> Result<BindingDetails, StoreError>;

    async fn create_instance_details(
        &self,
        id: &str,
        details: &ServiceInstance,
    ) -> Result<(), StoreError>;

    async fn create_binding_details(
        &self,
        id: &str,
        details: &BindingDetails,
    ) -> Result<(), StoreError>;

    async fn delete_instance_details(&self, id: &str) -> Result<(), StoreError>;

    async fn delete_binding_details(&self, id: &str) -> Result<(), StoreError>;

    /// Returns true if a different instance is already stored under `id`.
    async fn is_instance_conflict(
        &self,
        id: &str,
        candidate: &ServiceInstance,
    ) -> Result<bool, StoreError> {
        match self.retrieve_instance_details(id).await {
            Ok(stored) => conflict::instance_conflicts(&stored, candidate),
            Err(StoreError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Returns true if a different binding is already stored under `id`.
    async fn is_binding_conflict(
        &self,
        id: &str,
        candidate: &BindingDetails,
    ) -> Result<bool, StoreError> {
        match self.retrieve_binding_details(id).await {
            Ok(stored) => Ok(conflict::binding_conflicts(&stored, candidate)),
            Err(StoreError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Loads persisted state into memory, where the backend keeps any.
    async fn restore(&self) -> Result<(), StoreError> {
        Ok(())
    }

    /// Flushes in-memory state, where the backend keeps any.
    async fn save(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn cleanup(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// A store that can hand its records over to another backend and then be
/// marked as retired.
#[async_trait]
pub trait MigrationSource: BrokerStore {
    async fn retrieve_all_instance_details(
        &self,
    ) -> Result<HashMap<String, ServiceInstance>, StoreError>;

    /// Returns bindings as stored, i.e. with parameters already redacted.
    async fn retrieve_all_binding_details(
        &self,
    ) -> Result<HashMap<String, BindingDetails>, StoreError>;

    async fn retire(&self) -> Result<(), StoreError>;

    async fn is_retired(&self) -> Result<bool, StoreError>;
}

/// A store that becomes authoritative once a migration into it completes.
#[async_trait]
pub trait MigrationTarget: BrokerStore {
    /// Writes an instance copied from a migration source, replacing any
    /// record an interrupted earlier run left under `id`.
    async fn import_instance_details(
        &self,
        id: &str,
        details: &ServiceInstance,
    ) -> Result<(), StoreError>;

    /// Like [`Self::import_instance_details`]. `details` may already carry
    /// redacted parameters.
    async fn import_binding_details(
        &self,
        id: &str,
        details: &BindingDetails,
    ) -> Result<(), StoreError>;

    async fn activate(&self) -> Result<(), StoreError>;

    async fn is_activated(&self) -> Result<bool, StoreError>;
}
