use std::backtrace::Backtrace;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::time::Instant;
use versiondb::database::Database;
use versiondb::errors::DbResult;
use versiondb::schema::SchemaRegistry;
use versiondb::store::memory::{InMemoryStore, InMemoryStoreConfig};
use versiondb::store::Store;

/// Runs a test between `before` and `after`.
///
/// `after` runs even when the test fails or panics, so registries and
/// singletons of the test database never leak into other tests.
pub fn run_test<T, B, A>(before: B, test: T, after: A)
where
    B: Fn() -> DbResult<TestContext>,
    T: Fn(TestContext) -> DbResult<()>,
    A: Fn(TestContext) -> DbResult<()>,
{
    let ctx = match before() {
        Ok(ctx) => ctx,
        Err(e) => panic!("Before run failed: {:?}", e),
    };

    let start_time = Instant::now();
    let result = catch_unwind(AssertUnwindSafe(|| test(ctx.clone())));
    let elapsed = start_time.elapsed();

    if let Err(e) = after(ctx.clone()) {
        eprintln!("After run of {} failed: {:?}", ctx.name(), e);
    }

    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            eprintln!("\n==================== TEST FAILED ====================");
            eprintln!("Database: {} (took {:?})", ctx.name(), elapsed);
            eprintln!("Error: {:?}", e);
            let backtrace = Backtrace::capture().to_string();
            if !backtrace.is_empty() && !backtrace.contains("disabled") {
                eprintln!("\nBacktrace:\n{}", backtrace);
            }
            eprintln!("=====================================================\n");
            panic!("Test failed: {}", e);
        }
        Err(panic) => resume_unwind(panic),
    }
}

/// A uniquely named database on its own in-memory store.
#[derive(Clone)]
pub struct TestContext {
    name: String,
    store: Store,
}

impl TestContext {
    pub fn new(name: String, store: Store) -> Self {
        Self { name, store }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// A new [`Database`] handle for the context database at `version`.
    pub fn database(&self, version: u64) -> DbResult<Database> {
        Database::builder()
            .name(&self.name)
            .version(version)
            .store_handle(self.store.clone())
            .open()
    }
}

pub fn unique_name(prefix: &str) -> String {
    format!("{}-{}", prefix, uuid::Uuid::new_v4())
}

pub fn create_test_context() -> DbResult<TestContext> {
    Ok(TestContext::new(
        unique_name("clock-app"),
        Store::new(InMemoryStore::default()),
    ))
}

/// Like [`create_test_context`], with the raw version ceiling lowered to
/// `max_version` so counter exhaustion is reachable.
pub fn create_test_context_with_ceiling(max_version: u64) -> DbResult<TestContext> {
    let config = InMemoryStoreConfig::new().with_max_version(max_version);
    Ok(TestContext::new(
        unique_name("clock-app"),
        Store::new(InMemoryStore::new(config)),
    ))
}

pub fn cleanup(ctx: TestContext) -> DbResult<()> {
    SchemaRegistry::global().clear(Some(ctx.name()));
    Database::clear_singletons(Some(ctx.name()));
    for name in ctx.store().database_names()? {
        ctx.store().delete_database(&name)?;
    }
    Ok(())
}
