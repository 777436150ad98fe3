use versiondb::common::Key;
use versiondb::database::ProbedVersion;
use versiondb::doc;
use versiondb::errors::{DbResult, ErrorKind};
use versiondb::schema::{SchemaTransforms, SchemaVersion};
use versiondb::store::{
    CursorDirection, IndexParams, ObjectStoreParams, OpenOutcome, TransactionMode,
};
use versiondb_int_test::clock::{ALARMS, TIMERS};
use versiondb_int_test::test_util::{
    cleanup, create_test_context, create_test_context_with_ceiling, run_test, TestContext,
};

#[ctor::ctor]
fn init() {
    colog::init();
}

// version 1 keeps alarms, version 2 adds timers
fn declare_two_versions(ctx: &TestContext) -> DbResult<()> {
    SchemaVersion::new(
        ctx.name(),
        1,
        SchemaTransforms::new()
            .initializer(|tx| {
                let alarms = tx.create_object_store(
                    ALARMS,
                    ObjectStoreParams::new().key_path("id").auto_increment(true),
                )?;
                alarms.create_index(IndexParams::new("by_hour", "hour"))?;
                Ok(())
            })
            .upgrader(|tx| {
                tx.create_object_store(TIMERS, ObjectStoreParams::new().key_path("id"))?;
                Ok(())
            }),
    )?;
    SchemaVersion::new(
        ctx.name(),
        2,
        SchemaTransforms::new()
            .initializer(|tx| {
                tx.create_object_store(ALARMS, ObjectStoreParams::new().key_path("id"))?;
                tx.create_object_store(TIMERS, ObjectStoreParams::new().key_path("id"))?;
                Ok(())
            })
            .downgrader(|tx| tx.delete_object_store(TIMERS)),
    )?;
    Ok(())
}

#[test]
fn test_migration_past_ceiling_resets_counter() {
    run_test(
        || create_test_context_with_ceiling(4),
        |ctx| {
            declare_two_versions(&ctx)?;

            let v1 = ctx.database(1)?;
            v1.put(ALARMS, doc! { hour: 6, minute: 45 }.into(), None)?;
            let v2 = ctx.database(2)?;
            v2.connect()?.close();
            assert_eq!(v2.probe_version()?, ProbedVersion { raw: 3, effective: 2 });

            // the downgrade step takes raw 4, recording the effective version
            // needs a reset first
            let alarms = v1.alist(ALARMS, CursorDirection::Next)?;
            assert_eq!(alarms.len(), 1);
            assert_eq!(v1.probe_version()?, ProbedVersion { raw: 2, effective: 1 });

            let names = ctx.store().database_names()?;
            assert_eq!(names, vec![ctx.name().to_string()]);

            // the schema survives the copy
            let connection = v1.connect()?;
            let tx = connection.transaction(&[ALARMS], TransactionMode::ReadOnly)?;
            let schema = tx.object_store(ALARMS)?.schema()?;
            assert_eq!(schema.key_path.as_deref(), Some("id"));
            assert!(schema.auto_increment);
            assert_eq!(schema.indexes, vec![IndexParams::new("by_hour", "hour")]);
            connection.close();

            let next = v1.put(ALARMS, doc! { hour: 7 }.into(), None)?;
            assert_eq!(next.resolve_path("id"), Some(&Key::from(2)));
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_reset_blocked_by_foreign_connection() {
    run_test(
        || create_test_context_with_ceiling(3),
        |ctx| {
            declare_two_versions(&ctx)?;
            ctx.database(1)?.put(ALARMS, doc! { hour: 6 }.into(), None)?;
            ctx.database(2)?.connect()?.close();

            // raw 3 is the ceiling, so probing takes no version change and the
            // foreign connection only gets in the way of the reset
            let foreign = match ctx.store().open(ctx.name(), 3)? {
                OpenOutcome::Opened(connection) => connection,
                OpenOutcome::UpgradeNeeded(_) => panic!("expected an opened connection"),
            };

            let v1 = ctx.database(1)?;
            let err = v1.connect().unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::CopyError);
            assert!(err.has_kind(&ErrorKind::Blocked));

            let names = ctx.store().database_names()?;
            assert_eq!(names, vec![ctx.name().to_string()]);

            foreign.close();
            assert_eq!(v1.alist(ALARMS, CursorDirection::Next)?.len(), 1);
            assert_eq!(v1.probe_version()?.effective, 1);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_explicit_counter_reset() {
    run_test(
        create_test_context,
        |ctx| {
            declare_two_versions(&ctx)?;
            let v1 = ctx.database(1)?;
            v1.put(ALARMS, doc! { hour: 6 }.into(), None)?;
            ctx.database(2)?.put(TIMERS, doc! { id: "tea", seconds: 180 }.into(), None)?;
            assert_eq!(v1.probe_version()?.raw, 3);

            v1.reset_version_counter()?;
            assert_eq!(v1.probe_version()?, ProbedVersion { raw: 1, effective: 2 });

            let v2 = ctx.database(2)?;
            let timer = v2.request(TIMERS, &Key::from("tea"))?;
            assert_eq!(timer.resolve_path("seconds"), Some(&Key::from(180)));
            assert_eq!(v2.probe_version()?.raw, 1);
            Ok(())
        },
        cleanup,
    )
}
