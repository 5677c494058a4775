//! In-memory CredHub for tests and local development.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use super::client::{CredhubApi, WriteMode};
use crate::error::StoreError;

/// Keeps only the current version of each credential.
#[derive(Debug, Clone, Default)]
pub struct MemoryCredhub {
    credentials: Arc<RwLock<BTreeMap<String, Value>>>,
}

impl MemoryCredhub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of every stored credential, sorted.
    pub async fn names(&self) -> Vec<String> {
        self.credentials.read().await.keys().cloned().collect()
    }

    /// The raw stored value, for inspecting what a store persisted.
    pub async fn raw(&self, name: &str) -> Option<Value> {
        self.credentials.read().await.get(name).cloned()
    }

    async fn set(&self, name: &str, value: Value, mode: WriteMode) -> Result<(), StoreError> {
        let mut credentials = self.credentials.write().await;
        if mode == WriteMode::NoOverwrite && credentials.contains_key(name) {
            return Err(StoreError::Backend(format!(
                "credential already exists: {name}"
            )));
        }
        credentials.insert(name.to_string(), value);
        Ok(())
    }
}

#[async_trait]
impl CredhubApi for MemoryCredhub {
    async fn set_json(
        &self,
        name: &str,
        value: &Value,
        mode: WriteMode,
    ) -> Result<(), StoreError> {
        self.set(name, value.clone(), mode).await
    }

    async fn set_value(&self, name: &str, value: &str, mode: WriteMode) -> Result<(), StoreError> {
        self.set(name, Value::String(value.to_string()), mode).await
    }

    async fn get_latest_json(&self, name: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.credentials.read().await.get(name).cloned())
    }

    async fn delete(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self.credentials.write().await.remove(name).is_some())
    }

    async fn find_by_path(&self, path: &str) -> Result<Vec<String>, StoreError> {
        let path = path.trim_end_matches('/');
        let prefix = format!("{path}/");
        Ok(self
            .credentials
            .read()
            .await
            .keys()
            .filter(|name| name.as_str() == path || name.starts_with(&prefix))
            .cloned()
            .collect())
    }
}
