use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;
use versiondb::database::{Database, ProbedVersion};
use versiondb::doc;
use versiondb::errors::ErrorKind;
use versiondb::schema::{SchemaTransforms, SchemaVersion};
use versiondb::store::{CursorDirection, ObjectStoreParams, OpenOutcome};
use versiondb_int_test::clock::{declare_clock_schema, ALARMS};
use versiondb_int_test::test_util::{cleanup, create_test_context, run_test};

#[ctor::ctor]
fn init() {
    colog::init();
}

#[test]
fn test_concurrent_puts_migrate_once() {
    run_test(
        create_test_context,
        |ctx| {
            let initializations = Arc::new(AtomicUsize::new(0));
            let counter = initializations.clone();
            SchemaVersion::new(
                ctx.name(),
                1,
                SchemaTransforms::new().initializer(move |tx| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tx.create_object_store(
                        ALARMS,
                        ObjectStoreParams::new().key_path("id").auto_increment(true),
                    )?;
                    Ok(())
                }),
            )?;

            let db = Database::builder()
                .name(ctx.name())
                .version(1)
                .store_handle(ctx.store().clone())
                .singleton()?;

            let num_threads = 8;
            let barrier = Arc::new(Barrier::new(num_threads));
            let handles: Vec<_> = (0..num_threads)
                .map(|thread_id| {
                    let barrier = barrier.clone();
                    let name = ctx.name().to_string();
                    thread::spawn(move || {
                        let db = Database::builder().name(&name).singleton().unwrap();
                        barrier.wait();
                        db.put(ALARMS, doc! { hour: thread_id }.into(), None).unwrap();
                    })
                })
                .collect();
            for handle in handles {
                handle.join().unwrap();
            }

            assert_eq!(initializations.load(Ordering::SeqCst), 1);
            assert_eq!(db.alist(ALARMS, CursorDirection::Next)?.len(), num_threads);
            assert_eq!(db.probe_version()?, ProbedVersion { raw: 1, effective: 1 });
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_handed_out_connection_yields_to_migration() {
    run_test(
        create_test_context,
        |ctx| {
            declare_clock_schema(ctx.name(), ctx.store())?;
            SchemaVersion::new(
                ctx.name(),
                2,
                SchemaTransforms::new().initializer(|tx| {
                    tx.create_object_store(ALARMS, ObjectStoreParams::new().key_path("id"))?;
                    Ok(())
                }),
            )?;

            let v1 = ctx.database(1)?;
            let held = v1.connect()?;

            let v2 = ctx.database(2)?;
            v2.add_upgrader(1, SchemaVersion::noop());
            v2.connect()?.close();

            assert!(held.is_closed());
            assert_eq!(v2.probe_version()?.effective, 2);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_foreign_connection_blocks_connect() {
    run_test(
        create_test_context,
        |ctx| {
            declare_clock_schema(ctx.name(), ctx.store())?;
            ctx.database(1)?.connect()?.close();

            // a connection that ignores version change requests
            let foreign = match ctx.store().open(ctx.name(), 1)? {
                OpenOutcome::Opened(connection) => connection,
                OpenOutcome::UpgradeNeeded(_) => panic!("expected an opened connection"),
            };

            let v2 = ctx.database(2)?;
            v2.add_initializer(2, SchemaVersion::noop());
            let err = v2.connect().unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::Blocked);

            let releaser = thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                foreign.close();
            });
            // retrying is the caller's business
            awaitility::at_most(Duration::from_secs(5)).until(|| match v2.connect() {
                Ok(connection) => {
                    connection.close();
                    true
                }
                Err(_) => false,
            });
            releaser.join().unwrap();

            assert_eq!(v2.probe_version()?.effective, 2);
            Ok(())
        },
        cleanup,
    )
}
