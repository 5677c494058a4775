//! One-way handover of records from a retiring store to its replacement.
//!
//! The source is retired before the target is activated. A run that stops in
//! between is finished by the next run, which only activates the target. A
//! run that stops while copying is repeated in full: imports overwrite what
//! the earlier run wrote.

use tracing::{info, instrument};

use crate::error::StoreError;
use crate::traits::{MigrationSource, MigrationTarget};

/// What a call to [`migrate`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// The target was already active; nothing was touched.
    AlreadyActivated,
    /// The source had been drained earlier; only the target was activated.
    Resumed,
    /// Records were copied, the source retired and the target activated.
    Migrated { instances: usize, bindings: usize },
}

#[instrument(skip_all)]
pub async fn migrate(
    source: &dyn MigrationSource,
    target: &dyn MigrationTarget,
) -> Result<MigrationOutcome, StoreError> {
    if target.is_activated().await? {
        info!("target store already active, skipping migration");
        return Ok(MigrationOutcome::AlreadyActivated);
    }

    if source.is_retired().await? {
        info!("source store already retired, activating target");
        target.activate().await?;
        return Ok(MigrationOutcome::Resumed);
    }

    let instances = source.retrieve_all_instance_details().await?;
    for (id, instance) in &instances {
        target.import_instance_details(id, instance).await?;
    }

    let bindings = source.retrieve_all_binding_details().await?;
    for (id, binding) in &bindings {
        target.import_binding_details(id, binding).await?;
    }

    source.retire().await?;
    target.activate().await?;

    info!(
        instances = instances.len(),
        bindings = bindings.len(),
        "migration complete"
    );
    Ok(MigrationOutcome::Migrated {
        instances: instances.len(),
        bindings: bindings.len(),
    })
}
