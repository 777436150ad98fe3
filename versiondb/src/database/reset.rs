use crate::common::{Key, Value, RESET_SUFFIX};
use crate::errors::{DbError, DbResult, ErrorKind};
use crate::store::{
    CursorDirection, ObjectStore, ObjectStoreSchema, OpenOutcome, Store, TransactionMode,
    UpgradeTransaction,
};

/// Everything a database holds: schemas and records of all object stores.
struct Snapshot {
    stores: Vec<(ObjectStoreSchema, Vec<(Key, Value)>)>,
}

/// Restarts the raw version counter of `name` at 1, keeping its contents.
///
/// The contents are copied to `<name>.__reset__`, the original is deleted
/// and recreated at version 1 from the copy, then the copy is deleted. If
/// the original is gone and the recreation fails, the copy is kept.
///
/// The caller must hold the mutator lock of `name`.
pub(crate) fn reset_version_counter(store: &Store, name: &str) -> DbResult<()> {
    let temp_name = format!("{}{}", name, RESET_SUFFIX);

    let snapshot = match extract(store, name).map_err(|e| copy_error(name, "read", e))? {
        Some(snapshot) => snapshot,
        None => {
            log::debug!("Database {} does not exist, nothing to reset", name);
            return Ok(());
        }
    };

    if store.has_database(&temp_name)? {
        log::warn!("Deleting stale reset copy {}", temp_name);
        store
            .delete_database(&temp_name)
            .map_err(|e| copy_error(name, "delete the stale copy of", e))?;
    }

    restore(store, &temp_name, &snapshot).map_err(|e| copy_error(name, "copy", e))?;
    if let Err(e) = store.delete_database(name) {
        if let Err(cleanup_error) = store.delete_database(&temp_name) {
            log::warn!("Failed to delete reset copy {}: {}", temp_name, cleanup_error);
        }
        return Err(copy_error(name, "delete", e));
    }

    if let Err(e) = restore(store, name, &snapshot) {
        log::error!(
            "Failed to recreate {} after deleting it, its contents remain in {}",
            name,
            temp_name
        );
        return Err(copy_error(name, "recreate", e));
    }

    store
        .delete_database(&temp_name)
        .map_err(|e| copy_error(name, "clean up the copy of", e))?;

    log::info!(
        "Reset the raw version of {} to 1 ({} object stores)",
        name,
        snapshot.stores.len()
    );
    Ok(())
}

/// Reads the full contents of `name`, `None` when it does not exist.
fn extract(store: &Store, name: &str) -> DbResult<Option<Snapshot>> {
    match store.open(name, store.max_version())? {
        OpenOutcome::Opened(connection) => {
            let names = connection.object_store_names()?;
            let result = if names.is_empty() {
                Ok(Snapshot { stores: Vec::new() })
            } else {
                let scope: Vec<&str> = names.iter().map(String::as_str).collect();
                connection
                    .transaction(&scope, TransactionMode::ReadOnly)
                    .and_then(|tx| {
                        read_stores(names.iter().map(|n| tx.object_store(n)))
                    })
            };
            connection.close();
            result.map(Some)
        }
        OpenOutcome::UpgradeNeeded(tx) => {
            if tx.old_version() == 0 {
                tx.rollback()?;
                return Ok(None);
            }
            let result = tx
                .object_store_names()
                .and_then(|names| read_stores(names.iter().map(|n| tx.object_store(n))));
            tx.rollback()?;
            result.map(Some)
        }
    }
}

fn read_stores(stores: impl Iterator<Item = DbResult<ObjectStore>>) -> DbResult<Snapshot> {
    let mut snapshot = Snapshot { stores: Vec::new() };
    for object_store in stores {
        let object_store = object_store?;
        let schema = object_store.schema()?;
        let records: Vec<(Key, Value)> = object_store
            .open_cursor(None, CursorDirection::Next)?
            .collect();
        snapshot.stores.push((schema, records));
    }
    Ok(snapshot)
}

/// Creates `name` at raw version 1 holding the snapshot.
fn restore(store: &Store, name: &str, snapshot: &Snapshot) -> DbResult<()> {
    let tx = match store.open(name, 1)? {
        OpenOutcome::UpgradeNeeded(tx) if tx.old_version() == 0 => tx,
        OpenOutcome::UpgradeNeeded(tx) => {
            tx.rollback()?;
            return Err(DbError::new(
                &format!("Database {} already exists", name),
                ErrorKind::ConstraintError,
            ));
        }
        OpenOutcome::Opened(connection) => {
            connection.close();
            return Err(DbError::new(
                &format!("Database {} already exists", name),
                ErrorKind::ConstraintError,
            ));
        }
    };

    match write_snapshot(&tx, snapshot) {
        Ok(()) => {
            tx.commit()?.close();
            Ok(())
        }
        Err(e) => {
            if let Err(abort_error) = tx.rollback() {
                log::warn!("Failed to abort restore of {}: {}", name, abort_error);
            }
            Err(e)
        }
    }
}

fn write_snapshot(tx: &UpgradeTransaction, snapshot: &Snapshot) -> DbResult<()> {
    for (schema, records) in &snapshot.stores {
        let object_store = tx.create_object_store(&schema.name, schema.params())?;
        for index in &schema.indexes {
            object_store.create_index(index.clone())?;
        }
        for (key, value) in records {
            // in-line keys are already part of the value
            let explicit_key = match schema.key_path {
                Some(_) => None,
                None => Some(key.clone()),
            };
            object_store.put(value.clone(), explicit_key)?;
        }
    }
    Ok(())
}

fn copy_error(name: &str, action: &str, cause: DbError) -> DbError {
    DbError::new_with_cause(
        &format!("Failed to {} {} while resetting its version counter", action, name),
        ErrorKind::CopyError,
        cause,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;
    use crate::store::memory::{InMemoryStore, InMemoryStoreConfig};
    use crate::store::{IndexParams, ObjectStoreParams};

    fn seeded_store(max_version: u64) -> Store {
        let store = Store::new(InMemoryStore::new(
            InMemoryStoreConfig::new().with_max_version(max_version),
        ));
        for version in 1..=max_version {
            let tx = match store.open("clock", version).unwrap() {
                OpenOutcome::UpgradeNeeded(tx) => tx,
                OpenOutcome::Opened(_) => panic!("expected a version change"),
            };
            if version == 1 {
                let alarms = tx
                    .create_object_store(
                        "alarms",
                        ObjectStoreParams::new().key_path("id").auto_increment(true),
                    )
                    .unwrap();
                alarms.create_index(IndexParams::new("by_hour", "hour")).unwrap();
                alarms.put(doc! { hour: 6 }.into(), None).unwrap();
                alarms.put(doc! { hour: 7 }.into(), None).unwrap();

                let settings = tx
                    .create_object_store("settings", ObjectStoreParams::new())
                    .unwrap();
                settings
                    .put(Value::from("dark"), Some(Key::from("theme")))
                    .unwrap();
            }
            tx.commit().unwrap().close();
        }
        store
    }

    fn open_read(store: &Store, name: &str) -> crate::store::Connection {
        match store.open(name, 1).unwrap() {
            OpenOutcome::Opened(connection) => connection,
            OpenOutcome::UpgradeNeeded(_) => panic!("expected an opened connection"),
        }
    }

    #[test]
    fn test_reset_preserves_contents() {
        let store = seeded_store(5);
        reset_version_counter(&store, "clock").unwrap();

        assert_eq!(store.database_names().unwrap(), vec!["clock".to_string()]);
        let connection = open_read(&store, "clock");
        assert_eq!(connection.version(), 1);

        let tx = connection
            .transaction(&["alarms", "settings"], TransactionMode::ReadWrite)
            .unwrap();
        let alarms = tx.object_store("alarms").unwrap();
        let schema = alarms.schema().unwrap();
        assert_eq!(schema.key_path.as_deref(), Some("id"));
        assert!(schema.auto_increment);
        assert_eq!(schema.indexes, vec![IndexParams::new("by_hour", "hour")]);
        assert_eq!(alarms.count().unwrap(), 2);

        // the key generator continues after the copied keys
        let key = alarms.put(doc! { hour: 8 }.into(), None).unwrap();
        assert_eq!(key, Key::from(3));

        let settings = tx.object_store("settings").unwrap();
        assert_eq!(
            settings.get(&Key::from("theme")).unwrap(),
            Some(Value::from("dark"))
        );
        connection.close();
    }

    #[test]
    fn test_reset_of_missing_database() {
        let store = Store::new(InMemoryStore::default());
        reset_version_counter(&store, "missing").unwrap();
        assert!(store.database_names().unwrap().is_empty());
    }

    #[test]
    fn test_stale_copy_is_replaced() {
        let store = seeded_store(3);
        let tx = match store.open("clock.__reset__", 2).unwrap() {
            OpenOutcome::UpgradeNeeded(tx) => tx,
            OpenOutcome::Opened(_) => panic!("expected a version change"),
        };
        tx.create_object_store("junk", ObjectStoreParams::new()).unwrap();
        tx.commit().unwrap().close();

        reset_version_counter(&store, "clock").unwrap();
        assert_eq!(store.database_names().unwrap(), vec!["clock".to_string()]);
    }

    #[test]
    fn test_open_connection_fails_with_copy_error() {
        let store = seeded_store(2);
        let connection = match store.open("clock", 2).unwrap() {
            OpenOutcome::Opened(connection) => connection,
            OpenOutcome::UpgradeNeeded(_) => panic!("expected an opened connection"),
        };

        let err = reset_version_counter(&store, "clock").unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::CopyError);
        assert!(err.has_kind(&ErrorKind::Blocked));
        assert!(store.has_database("clock").unwrap());
        assert!(!store.has_database("clock.__reset__").unwrap());
        connection.close();
    }
}
