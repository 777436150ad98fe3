use super::SchemaVersion;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

static GLOBAL_REGISTRY: Lazy<SchemaRegistry> = Lazy::new(SchemaRegistry::new);

/// Catalog of [`SchemaVersion`]s.
///
/// Two views are kept:
/// - per database name, one entry per version number (a later entry with the
///   same number replaces the earlier one),
/// - every entry ever registered, compared by identity.
///
/// [`SchemaVersion::new`] registers into the [`global`](SchemaRegistry::global)
/// registry, which lives for the whole process. Tests isolate themselves with
/// [`clear`](SchemaRegistry::clear).
#[derive(Clone)]
pub struct SchemaRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

#[derive(Default)]
struct RegistryInner {
    by_name: BTreeMap<String, BTreeMap<u64, SchemaVersion>>,
    all: Vec<SchemaVersion>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        SchemaRegistry {
            inner: Arc::new(RwLock::new(RegistryInner::default())),
        }
    }

    pub fn global() -> &'static SchemaRegistry {
        &GLOBAL_REGISTRY
    }

    pub fn register(&self, schema_version: SchemaVersion) {
        let mut inner = self.inner.write();
        if !inner.all.iter().any(|sv| sv.ptr_eq(&schema_version)) {
            inner.all.push(schema_version.clone());
        }

        let replaced = inner
            .by_name
            .entry(schema_version.name().to_string())
            .or_default()
            .insert(schema_version.version(), schema_version.clone());
        if replaced.is_some() {
            log::debug!(
                "Replaced schema version {} of {}",
                schema_version.version(),
                schema_version.name()
            );
        }
    }

    /// Entries of one database, ascending by version.
    pub fn list(&self, name: &str) -> Vec<SchemaVersion> {
        self.inner
            .read()
            .by_name
            .get(name)
            .map(|versions| versions.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Every registered entry, in registration order.
    pub fn list_all(&self) -> Vec<SchemaVersion> {
        self.inner.read().all.clone()
    }

    /// Removes the entries of `name`, or every entry when `name` is `None`.
    pub fn clear(&self, name: Option<&str>) {
        let mut inner = self.inner.write();
        match name {
            Some(name) => {
                inner.by_name.remove(name);
                inner.all.retain(|sv| sv.name() != name);
            }
            None => {
                inner.by_name.clear();
                inner.all.clear();
            }
        }
    }

    /// Reports which transforms are missing for `name`. The highest version
    /// needs no upgrader and the lowest needs no downgrader.
    pub fn completeness_report(&self, name: &str) -> CompletenessReport {
        let versions = self.list(name);
        let mut report = CompletenessReport::default();
        let last = versions.len().saturating_sub(1);

        for (index, schema_version) in versions.iter().enumerate() {
            if schema_version.initializer().is_none() {
                report.missing_initializers.push(schema_version.version());
            }
            if index != last && schema_version.upgrader().is_none() {
                report.missing_upgraders.push(schema_version.version());
            }
            if index != 0 && schema_version.downgrader().is_none() {
                report.missing_downgraders.push(schema_version.version());
            }
        }
        report
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Version numbers lacking a transform, each list ascending.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletenessReport {
    pub missing_initializers: Vec<u64>,
    pub missing_upgraders: Vec<u64>,
    pub missing_downgraders: Vec<u64>,
}

impl CompletenessReport {
    pub fn is_complete(&self) -> bool {
        self.missing_initializers.is_empty()
            && self.missing_upgraders.is_empty()
            && self.missing_downgraders.is_empty()
    }
}
