//! Binding parameter redaction.
//!
//! Binding parameters can carry credentials, so they are replaced with a
//! salted Argon2id digest before any backend sees them:
//!
//! ```text
//! {"parameters": {"paramsHash": "$argon2id$v=19$m=19456,t=2,p=1$..."}}
//! ```
//!
//! The digest is a PHC string, so it carries its own salt and cost and can be
//! verified later without knowing how the redactor was configured.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::document::canonicalize;
use crate::error::StoreError;
use crate::types::BindingDetails;

/// Field under which the digest replaces the parameters.
pub const HASH_KEY: &str = "paramsHash";

/// Argon2 cost parameters used when hashing binding parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RedactionCost {
    /// Memory size in KiB.
    pub memory_kib: u32,
    /// Number of passes.
    pub iterations: u32,
    /// Degree of parallelism.
    pub parallelism: u32,
}

impl Default for RedactionCost {
    fn default() -> Self {
        Self {
            memory_kib: Params::DEFAULT_M_COST,
            iterations: Params::DEFAULT_T_COST,
            parallelism: Params::DEFAULT_P_COST,
        }
    }
}

impl RedactionCost {
    /// The cheapest cost argon2 accepts. Only suitable for tests.
    pub const fn minimal() -> Self {
        Self {
            memory_kib: Params::MIN_M_COST,
            iterations: Params::MIN_T_COST,
            parallelism: Params::MIN_P_COST,
        }
    }
}

/// Hashes binding parameters with a fixed cost.
#[derive(Clone)]
pub struct Redactor {
    hasher: Argon2<'static>,
    cost: RedactionCost,
}

impl Redactor {
    pub fn new(cost: RedactionCost) -> Result<Self, StoreError> {
        let params = Params::new(cost.memory_kib, cost.iterations, cost.parallelism, None)
            .map_err(|e| StoreError::Configuration(format!("invalid redaction cost: {e}")))?;

        Ok(Self {
            hasher: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
            cost,
        })
    }

    pub fn cost(&self) -> RedactionCost {
        self.cost
    }

    /// Returns a copy of `details` that is safe to persist.
    ///
    /// Absent parameters stay absent. Parameters that are already a digest
    /// are kept as they are, so records copied between stores are not hashed
    /// twice.
    pub fn redact(&self, details: &BindingDetails) -> Result<BindingDetails, StoreError> {
        let parameters = match &details.parameters {
            None => None,
            Some(params) if is_redacted(params) => Some(params.clone()),
            Some(params) => Some(self.digest(params)?),
        };

        Ok(BindingDetails {
            parameters,
            ..details.clone()
        })
    }

    fn digest(&self, params: &Value) -> Result<Value, StoreError> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .hasher
            .hash_password(canonicalize(params).as_bytes(), &salt)
            .map_err(|e| StoreError::Backend(format!("failed to hash binding parameters: {e}")))?
            .to_string();

        let mut redacted = Map::new();
        redacted.insert(HASH_KEY.to_string(), Value::String(hash));
        Ok(Value::Object(redacted))
    }
}

impl Default for Redactor {
    fn default() -> Self {
        Self {
            hasher: Argon2::default(),
            cost: RedactionCost::default(),
        }
    }
}

impl std::fmt::Debug for Redactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Redactor").field("cost", &self.cost).finish()
    }
}

/// Extracts the digest if `params` is a redacted parameter object.
fn stored_digest(params: &Value) -> Option<&str> {
    let map = params.as_object()?;
    if map.len() != 1 {
        return None;
    }
    let digest = map.get(HASH_KEY)?.as_str()?;
    PasswordHash::new(digest).ok().map(|_| digest)
}

/// Returns true if `params` is a digest produced by [`Redactor::redact`].
pub fn is_redacted(params: &Value) -> bool {
    stored_digest(params).is_some()
}

/// Checks a candidate's parameters against what a store persisted.
///
/// Verification is done by argon2 itself using the salt and cost embedded in
/// the stored digest. A candidate that presents the identical digest also
/// matches.
pub fn parameters_match(stored: Option<&Value>, candidate: Option<&Value>) -> bool {
    match (stored, candidate) {
        (None, None) => true,
        (Some(stored), Some(candidate)) => match stored_digest(stored) {
            Some(digest) => {
                if stored_digest(candidate) == Some(digest) {
                    return true;
                }
                verify_digest(digest, candidate)
            }
            None => canonicalize(stored) == canonicalize(candidate),
        },
        _ => false,
    }
}

fn verify_digest(digest: &str, candidate: &Value) -> bool {
    let parsed = match PasswordHash::new(digest) {
        Ok(parsed) => parsed,
        Err(e) => {
            debug!(error = %e, "stored parameter digest is not a PHC string");
            return false;
        }
    };

    Argon2::default()
        .verify_password(canonicalize(candidate).as_bytes(), &parsed)
        .is_ok()
}
