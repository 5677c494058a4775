use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StoreError;

/// A provisioned service instance.
///
/// Field names on the wire match what existing broker deployments have
/// already persisted, so stores written by older brokers stay readable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ServiceInstance {
    #[serde(rename = "ServiceID")]
    pub service_id: String,

    #[serde(rename = "PlanID")]
    pub plan_id: String,

    #[serde(rename = "OrganizationGUID")]
    pub organization_guid: String,

    #[serde(rename = "SpaceGUID")]
    pub space_guid: String,

    /// Provisioning parameters. Any JSON shape is accepted.
    #[serde(rename = "ServiceFingerPrint", default)]
    pub service_fingerprint: Value,
}

impl ServiceInstance {
    pub fn new(
        service_id: impl Into<String>,
        plan_id: impl Into<String>,
        organization_guid: impl Into<String>,
        space_guid: impl Into<String>,
    ) -> Self {
        Self {
            service_id: service_id.into(),
            plan_id: plan_id.into(),
            organization_guid: organization_guid.into(),
            space_guid: space_guid.into(),
            service_fingerprint: Value::Null,
        }
    }

    pub fn with_fingerprint(mut self, fingerprint: Value) -> Self {
        self.service_fingerprint = fingerprint;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BindResource {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub app_guid: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub route: String,
}

/// A service binding as requested by the platform.
///
/// `parameters` may carry credentials. Stores never persist them verbatim;
/// see [`crate::redaction`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct BindingDetails {
    #[serde(default)]
    pub app_guid: String,

    pub plan_id: String,

    pub service_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind_resource: Option<BindResource>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

impl BindingDetails {
    pub fn new(
        app_guid: impl Into<String>,
        plan_id: impl Into<String>,
        service_id: impl Into<String>,
    ) -> Self {
        Self {
            app_guid: app_guid.into(),
            plan_id: plan_id.into(),
            service_id: service_id.into(),
            bind_resource: None,
            parameters: None,
        }
    }

    pub fn with_bind_resource(mut self, app_guid: impl Into<String>, route: impl Into<String>) -> Self {
        self.bind_resource = Some(BindResource {
            app_guid: app_guid.into(),
            route: route.into(),
        });
        self
    }

    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = Some(parameters);
        self
    }

    /// Sets the parameters from the raw request body bytes.
    ///
    /// An empty body means "no parameters".
    pub fn with_raw_parameters(mut self, raw: &[u8]) -> Result<Self, StoreError> {
        self.parameters = if raw.iter().all(u8::is_ascii_whitespace) {
            None
        } else {
            Some(serde_json::from_slice(raw)?)
        };
        Ok(self)
    }
}
