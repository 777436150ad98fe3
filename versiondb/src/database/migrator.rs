use super::{MigrationPlan, MigrationPlanner, Mutators, MutatorBroker};
use crate::common::{Key, EFFECTIVE_VERSION_KEY, EFFECTIVE_VERSION_STORE};
use crate::doc;
use crate::errors::{DbError, DbResult, ErrorKind};
use crate::schema::Transform;
use crate::store::{ObjectStoreParams, UpgradeTransaction};

/// Executes migration plans through a [`MutatorBroker`].
pub(crate) struct Migrator<'a> {
    broker: &'a MutatorBroker,
    name: &'a str,
    mutators: &'a Mutators,
}

impl<'a> Migrator<'a> {
    pub(crate) fn new(broker: &'a MutatorBroker, name: &'a str, mutators: &'a Mutators) -> Self {
        Migrator {
            broker,
            name,
            mutators,
        }
    }

    /// Moves the effective version from `old` to `new`.
    ///
    /// A failing step abandons the chain and reinitializes at `new`; data
    /// written by earlier steps is dropped with everything else.
    pub(crate) fn migrate(&self, old: u64, new: u64) -> DbResult<()> {
        let plan = MigrationPlanner::plan(self.mutators, old, new);
        match plan {
            MigrationPlan::Noop => Ok(()),
            MigrationPlan::Reinitialize => {
                log::info!(
                    "No migration chain for {} from {} to {}, reinitializing",
                    self.name,
                    old,
                    new
                );
                self.reinitialize(new)
            }
            MigrationPlan::Steps { direction, steps } => {
                log::info!(
                    "Migrating {} from {} to {} ({} steps: {:?})",
                    self.name,
                    old,
                    new,
                    direction,
                    steps.iter().map(|s| s.version).collect::<Vec<_>>()
                );
                for step in &steps {
                    let result = self.broker.with_mutator_transaction(self.name, |tx| {
                        run_transform(&step.transform, tx)
                    });
                    match result {
                        Ok(()) => log::debug!("{} step {} of {} done", direction, step.version, self.name),
                        Err(e) if e.kind() == &ErrorKind::TransformError => {
                            log::warn!(
                                "{} step {} of {} failed, reinitializing at {}: {}",
                                direction,
                                step.version,
                                self.name,
                                new,
                                e
                            );
                            return self.reinitialize(new);
                        }
                        Err(e) => return Err(e),
                    }
                }
                self.broker
                    .with_mutator_transaction(self.name, |tx| write_effective_version(tx, new))
            }
        }
    }

    /// Drops every object store and runs the initializer of `version`.
    pub(crate) fn reinitialize(&self, version: u64) -> DbResult<()> {
        let initializer = self
            .mutators
            .initializers
            .get(version)
            .cloned()
            .ok_or_else(|| {
                DbError::new(
                    &format!("No initializer for version {} of {}", version, self.name),
                    ErrorKind::NoInitializer,
                )
            })?;

        self.broker.with_mutator_transaction(self.name, |tx| {
            for store_name in tx.object_store_names()? {
                tx.delete_object_store(&store_name)?;
            }
            run_transform(&initializer, tx)?;
            write_effective_version(tx, version)
        })
    }
}

// Errors reported by a transform count as transform failures, whatever
// their kind, so the caller can tell them from broker failures.
fn run_transform(transform: &Transform, tx: &UpgradeTransaction) -> DbResult<()> {
    transform.apply(tx).map_err(|e| {
        if e.kind() == &ErrorKind::TransformError {
            e
        } else {
            DbError::new_with_cause("Transform failed", ErrorKind::TransformError, e)
        }
    })
}

pub(crate) fn write_effective_version(tx: &UpgradeTransaction, version: u64) -> DbResult<()> {
    if !tx.has_object_store(EFFECTIVE_VERSION_STORE)? {
        tx.create_object_store(EFFECTIVE_VERSION_STORE, ObjectStoreParams::new())?;
    }
    tx.object_store(EFFECTIVE_VERSION_STORE)?.put(
        doc! { number: version }.into(),
        Some(Key::from(EFFECTIVE_VERSION_KEY)),
    )?;
    Ok(())
}
