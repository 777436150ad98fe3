//! The clock application schema, used as a realistic fixture.
//!
//! Version 1 holds three object stores keyed in-line by `id` with generated
//! keys. Its initializer also recovers alarms left in the legacy `alarms`
//! database, converting them to the current alarm shape on the way.

use versiondb::common::{Document, Key, Value};
use versiondb::errors::DbResult;
use versiondb::schema::{SchemaModule, SchemaTransforms, SchemaVersion};
use versiondb::store::{
    CursorDirection, ObjectStoreParams, OpenOutcome, Store, TransactionMode, UpgradeTransaction,
};

pub const ALARMS: &str = "alarms";
pub const TIMERS: &str = "timers";
pub const STOPWATCHES: &str = "stopwatches";

pub const LEGACY_DATABASE: &str = "alarms";
pub const LEGACY_VERSION: u64 = 5;

/// Weekdays in the order of the legacy `repeat` bit string.
pub const DAYS: [&str; 7] = [
    "monday",
    "tuesday",
    "wednesday",
    "thursday",
    "friday",
    "saturday",
    "sunday",
];

/// Converts a legacy alarm record.
///
/// - `{repeat: "1100000"}` becomes `{repeat: {monday: true, tuesday: true}}`
/// - `normalAlarmId` and `snoozeAlarmId` move into
///   `{registeredAlarms: {normal, snooze}}`
///
/// Anything that is not a document is returned unchanged.
pub fn convert_legacy_alarm(alarm: Value) -> Value {
    let mut alarm = match alarm {
        Value::Document(doc) => doc,
        other => return other,
    };

    let repeat = alarm.get("repeat").and_then(|r| r.as_string()).cloned();
    if let Some(bits) = repeat {
        let days: Document = bits
            .chars()
            .zip(DAYS.iter())
            .filter(|(bit, _)| *bit == '1')
            .map(|(_, day)| (day.to_string(), Value::from(true)))
            .collect();
        alarm.put("repeat", days);
    }

    if alarm.contains_key("normalAlarmId") || alarm.contains_key("snoozeAlarmId") {
        let mut registered = Document::new();
        registered.put("normal", alarm.remove("normalAlarmId").unwrap_or_default());
        registered.put("snooze", alarm.remove("snoozeAlarmId").unwrap_or_default());
        alarm.put("registeredAlarms", registered);
    }

    Value::Document(alarm)
}

/// Copies the alarms of the legacy database into the `alarms` store of
/// `tx`, returning how many were recovered.
///
/// A legacy database that is missing or not at its final version is
/// ignored, and so are errors opening it.
pub fn recover_legacy_alarms(store: &Store, tx: &UpgradeTransaction) -> DbResult<usize> {
    let connection = match store.open(LEGACY_DATABASE, LEGACY_VERSION) {
        Ok(OpenOutcome::Opened(connection)) => connection,
        Ok(OpenOutcome::UpgradeNeeded(legacy_tx)) => {
            legacy_tx.rollback()?;
            return Ok(0);
        }
        Err(e) => {
            log::debug!("No legacy alarms to recover: {}", e);
            return Ok(0);
        }
    };

    let legacy: DbResult<Vec<(Key, Value)>> = connection
        .transaction(&[ALARMS], TransactionMode::ReadOnly)
        .and_then(|legacy_tx| legacy_tx.object_store(ALARMS))
        .and_then(|alarms| alarms.open_cursor(None, CursorDirection::Next))
        .map(|cursor| cursor.collect());
    connection.close();

    let alarms = tx.object_store(ALARMS)?;
    let mut recovered = 0;
    for (_, alarm) in legacy? {
        alarms.put(convert_legacy_alarm(alarm), None)?;
        recovered += 1;
    }
    log::info!("Recovered {} legacy alarms", recovered);
    Ok(recovered)
}

/// Declares version 1 of the clock schema under `name`.
pub fn declare_clock_schema(name: &str, store: &Store) -> DbResult<SchemaVersion> {
    let store = store.clone();
    SchemaVersion::new(
        name,
        1,
        SchemaTransforms::new().initializer(move |tx| {
            for object_store in [ALARMS, TIMERS, STOPWATCHES] {
                tx.create_object_store(
                    object_store,
                    ObjectStoreParams::new().key_path("id").auto_increment(true),
                )?;
            }
            recover_legacy_alarms(&store, tx)?;
            Ok(())
        }),
    )
}

/// The clock schema as a deferred module.
pub fn clock_schema(name: &str, store: &Store) -> SchemaModule {
    let name = name.to_string();
    let store = store.clone();
    SchemaModule::new("clock", move || {
        declare_clock_schema(&name, &store)?;
        Ok(())
    })
}
