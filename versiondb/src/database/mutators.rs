use crate::schema::Transform;

/// A transform registered for one version.
#[derive(Clone, Debug)]
pub struct Mutator {
    pub version: u64,
    pub transform: Transform,
}

/// Version-sorted mutators with at most one entry per version.
#[derive(Clone, Debug, Default)]
pub struct MutatorList {
    entries: Vec<Mutator>,
}

impl MutatorList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `transform` for `version`, replacing any earlier entry.
    pub fn add(&mut self, version: u64, transform: Transform) {
        let mutator = Mutator { version, transform };
        match self.position(version) {
            Ok(index) => self.entries[index] = mutator,
            Err(index) => self.entries.insert(index, mutator),
        }
    }

    pub fn remove(&mut self, version: u64) -> bool {
        match self.position(version) {
            Ok(index) => {
                self.entries.remove(index);
                true
            }
            Err(_) => false,
        }
    }

    pub fn get(&self, version: u64) -> Option<&Transform> {
        self.position(version)
            .ok()
            .map(|index| &self.entries[index].transform)
    }

    /// Binary search by version: `Ok(index)` of the entry, or `Err(index)`
    /// where it would be inserted.
    pub fn position(&self, version: u64) -> Result<usize, usize> {
        self.entries.binary_search_by_key(&version, |m| m.version)
    }

    pub fn entries(&self) -> &[Mutator] {
        &self.entries
    }

    pub fn versions(&self) -> Vec<u64> {
        self.entries.iter().map(|m| m.version).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The three mutator lists of a database.
#[derive(Clone, Debug, Default)]
pub struct Mutators {
    pub initializers: MutatorList,
    pub upgraders: MutatorList,
    pub downgraders: MutatorList,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaVersion;

    #[test]
    fn test_add_keeps_versions_sorted() {
        let mut list = MutatorList::new();
        for version in [5, 1, 3, 2] {
            list.add(version, SchemaVersion::noop());
        }
        assert_eq!(list.versions(), vec![1, 2, 3, 5]);
    }

    #[test]
    fn test_add_replaces_same_version() {
        let mut list = MutatorList::new();
        let first = SchemaVersion::noop();
        let second = SchemaVersion::error();
        list.add(2, first.clone());
        list.add(2, second.clone());

        assert_eq!(list.len(), 1);
        assert!(list.get(2).unwrap().ptr_eq(&second));
        assert!(!list.get(2).unwrap().ptr_eq(&first));
    }

    #[test]
    fn test_remove() {
        let mut list = MutatorList::new();
        list.add(1, SchemaVersion::noop());
        assert!(list.remove(1));
        assert!(!list.remove(1));
        assert!(list.is_empty());
        assert!(list.get(1).is_none());
    }

    #[test]
    fn test_position() {
        let mut list = MutatorList::new();
        list.add(2, SchemaVersion::noop());
        list.add(4, SchemaVersion::noop());
        assert_eq!(list.position(4), Ok(1));
        assert_eq!(list.position(3), Err(1));
    }
}
