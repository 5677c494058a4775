//! Durable state for service brokers.
//!
//! Service instances and bindings are kept in one of three interchangeable
//! backends behind the [`BrokerStore`] trait:
//!
//! - [`SqlStore`]: MySQL or PostgreSQL
//! - [`CredhubStore`]: a CredHub secret store
//! - [`FileStore`]: a local JSON file
//!
//! Every backend rejects fingerprints that carry a `password`, redacts binding
//! parameters before they are written, and answers conflict checks the same
//! way. A SQL store can be drained into a CredHub store once with
//! [`migrate`].

#[cfg(not(any(feature = "sql", feature = "credhub", feature = "file")))]
compile_error!("enable at least one of the `sql`, `credhub` or `file` features");

mod config;
mod conflict;
mod document;
mod error;
mod migration;
mod provider;
mod redaction;
mod traits;
mod types;

#[cfg(any(feature = "sql", feature = "credhub"))]
mod tls;

#[cfg(feature = "sql")]
pub mod sql;

#[cfg(feature = "credhub")]
pub mod credhub;

#[cfg(feature = "file")]
mod file;

pub use config::{StoreConfig, StoreSettings};
pub use conflict::{binding_conflicts, instance_conflicts};
pub use document::{
    canonicalize, contains_key, ensure_no_secrets, ensure_not_reserved, FORBIDDEN_FINGERPRINT_KEY,
};
pub use error::{RecordKind, Redacted, StoreError, StoreResult};
pub use migration::{migrate, MigrationOutcome};
pub use provider::StoreProvider;
pub use redaction::{is_redacted, parameters_match, RedactionCost, Redactor, HASH_KEY};
pub use traits::{BrokerStore, MigrationSource, MigrationTarget};
pub use types::{BindResource, BindingDetails, ServiceInstance};

#[cfg(any(feature = "sql", feature = "credhub"))]
pub use tls::CaBundle;

#[cfg(feature = "sql")]
pub use config::SqlConfig;
#[cfg(feature = "sql")]
pub use sql::SqlStore;

#[cfg(feature = "credhub")]
pub use config::CredhubConfig;
#[cfg(feature = "credhub")]
pub use credhub::CredhubStore;

#[cfg(feature = "credhub")]
#[cfg(feature = "memory")]
pub use credhub::MemoryCredhub;

#[cfg(feature = "file")]
pub use config::FileConfig;
#[cfg(feature = "file")]
pub use file::FileStore;
