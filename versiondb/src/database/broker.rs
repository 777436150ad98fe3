use super::reset::reset_version_counter;
use super::VersionProber;
use crate::common::{LockHandle, LockRegistry};
use crate::errors::{DbError, DbResult, ErrorKind};
use crate::store::{OpenOutcome, Store, UpgradeTransaction};
use once_cell::sync::Lazy;
use std::panic::{catch_unwind, AssertUnwindSafe};

static MUTATOR_LOCKS: Lazy<LockRegistry> = Lazy::new(LockRegistry::new);

/// The process-wide lock serializing raw-version bumps of `name`.
pub(crate) fn mutator_lock(name: &str) -> LockHandle {
    MUTATOR_LOCKS.get_lock(name)
}

/// Hands out version-change transactions that move the raw version of a
/// database up by exactly one.
///
/// At most one such transaction runs per database name in the process.
/// When the raw version sits at the store's ceiling the counter is reset
/// first, so a bump is always possible.
#[derive(Clone)]
pub struct MutatorBroker {
    store: Store,
    prober: VersionProber,
}

impl MutatorBroker {
    pub fn new(store: Store, prober: VersionProber) -> Self {
        MutatorBroker { store, prober }
    }

    /// Runs `f` in a fresh version-change transaction of `name`.
    ///
    /// `Ok` commits, an error or a panic aborts. A panic is reported as a
    /// `TransformError`.
    pub fn with_mutator_transaction<R, F>(&self, name: &str, f: F) -> DbResult<R>
    where
        F: FnOnce(&UpgradeTransaction) -> DbResult<R>,
    {
        let lock = mutator_lock(name);
        let _guard = lock.lock();

        self.prober.invalidate(name);
        let mut probed = self.prober.probe_locked(&self.store, name)?;
        if probed.raw >= self.store.max_version() {
            log::warn!(
                "Raw version of {} reached the ceiling {}, resetting the counter",
                name,
                probed.raw
            );
            reset_version_counter(&self.store, name)?;
            self.prober.invalidate(name);
            probed = self.prober.probe_locked(&self.store, name)?;
        }

        let tx = match self.store.open(name, probed.raw + 1)? {
            OpenOutcome::UpgradeNeeded(tx) => tx,
            OpenOutcome::Opened(connection) => {
                connection.close();
                return Err(DbError::new(
                    &format!(
                        "Opening {} at version {} did not start a version change",
                        name,
                        probed.raw + 1
                    ),
                    ErrorKind::InternalError,
                ));
            }
        };
        self.prober.invalidate(name);

        let result = match catch_unwind(AssertUnwindSafe(|| f(&tx))) {
            Ok(result) => result,
            Err(_) => Err(DbError::new(
                &format!("Mutator transaction of {} panicked", name),
                ErrorKind::TransformError,
            )),
        };

        match result {
            Ok(value) => {
                let connection = tx.commit()?;
                connection.close();
                Ok(value)
            }
            Err(e) => {
                if let Err(abort_error) = tx.rollback() {
                    log::error!(
                        "Failed to abort mutator transaction of {}: {}",
                        name,
                        abort_error
                    );
                }
                Err(e)
            }
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }
}
