//! Comparison of stored records against incoming requests.

use crate::document::canonicalize;
use crate::error::StoreError;
use crate::redaction::parameters_match;
use crate::types::{BindingDetails, ServiceInstance};

/// Compares canonical encodings, so key order and integral float spelling in
/// the fingerprint do not matter.
pub fn instance_conflicts(
    stored: &ServiceInstance,
    candidate: &ServiceInstance,
) -> Result<bool, StoreError> {
    Ok(canonical_instance(stored)? != canonical_instance(candidate)?)
}

fn canonical_instance(instance: &ServiceInstance) -> Result<String, StoreError> {
    Ok(canonicalize(&serde_json::to_value(instance)?))
}

/// `stored` is expected to carry redacted parameters; the candidate carries
/// the plaintext from the new request.
pub fn binding_conflicts(stored: &BindingDetails, candidate: &BindingDetails) -> bool {
    stored.app_guid != candidate.app_guid
        || stored.plan_id != candidate.plan_id
        || stored.service_id != candidate.service_id
        || stored.bind_resource != candidate.bind_resource
        || !parameters_match(stored.parameters.as_ref(), candidate.parameters.as_ref())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::redaction::{RedactionCost, Redactor};

    fn instance(fingerprint: serde_json::Value) -> ServiceInstance {
        ServiceInstance::new("service-id", "plan-id", "org-guid", "space-guid")
            .with_fingerprint(fingerprint)
    }

    #[test]
    fn identical_instances_do_not_conflict() {
        let stored = instance(json!({"a": 1, "b": {"c": [1, 2]}}));
        let candidate = instance(json!({"b": {"c": [1, 2]}, "a": 1.0}));
        assert!(!instance_conflicts(&stored, &candidate).unwrap());
    }

    #[test]
    fn differing_instances_conflict() {
        let stored = instance(json!({"username": "a"}));

        let mut other_plan = stored.clone();
        other_plan.plan_id = "other-plan-id".to_string();
        assert!(instance_conflicts(&stored, &other_plan).unwrap());

        assert!(instance_conflicts(&stored, &instance(json!({"username": "b"}))).unwrap());
    }

    fn stored_binding(params: serde_json::Value) -> (BindingDetails, BindingDetails) {
        let candidate = BindingDetails::new("app-guid", "plan-id", "service-id")
            .with_bind_resource("app-guid", "my-app.example.com")
            .with_parameters(params);
        let stored = Redactor::new(RedactionCost::minimal())
            .unwrap()
            .redact(&candidate)
            .unwrap();
        (stored, candidate)
    }

    #[test]
    fn rebinding_with_same_request_does_not_conflict() {
        let (stored, candidate) = stored_binding(json!({"u": "x", "p": "y"}));
        assert!(!binding_conflicts(&stored, &candidate));
    }

    #[test]
    fn rebinding_with_different_parameters_conflicts() {
        let (stored, mut candidate) = stored_binding(json!({"u": "x", "p": "y"}));
        candidate.parameters = Some(json!({"u": "x", "p": "z"}));
        assert!(binding_conflicts(&stored, &candidate));
    }

    #[test]
    fn rebinding_with_different_fields_conflicts() {
        let (stored, candidate) = stored_binding(json!({"u": "x"}));

        let mut other_plan = candidate.clone();
        other_plan.plan_id = "other-plan-id".to_string();
        assert!(binding_conflicts(&stored, &other_plan));

        let mut other_route = candidate.clone();
        other_route.bind_resource = None;
        assert!(binding_conflicts(&stored, &other_route));

        let mut other_app = candidate;
        other_app.app_guid = "other-app".to_string();
        assert!(binding_conflicts(&stored, &other_app));
    }
}
