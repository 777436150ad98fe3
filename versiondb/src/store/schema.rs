use crate::common::Key;

/// Options for creating an object store.
///
/// Without a key path, records are stored under explicit keys (or generated
/// ones when `auto_increment` is set). With a key path, the key is read from
/// the record itself and a generated key is written back into it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectStoreParams {
    pub key_path: Option<String>,
    pub auto_increment: bool,
}

impl ObjectStoreParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key_path(mut self, key_path: &str) -> Self {
        self.key_path = Some(key_path.to_string());
        self
    }

    pub fn auto_increment(mut self, auto_increment: bool) -> Self {
        self.auto_increment = auto_increment;
        self
    }
}

/// An index definition on an object store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexParams {
    pub name: String,
    pub key_path: String,
    pub unique: bool,
    pub multi_entry: bool,
}

impl IndexParams {
    pub fn new(name: &str, key_path: &str) -> Self {
        IndexParams {
            name: name.to_string(),
            key_path: key_path.to_string(),
            unique: false,
            multi_entry: false,
        }
    }

    pub fn unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }

    pub fn multi_entry(mut self, multi_entry: bool) -> Self {
        self.multi_entry = multi_entry;
        self
    }
}

/// Everything needed to recreate an object store elsewhere: its name, key
/// options and index definitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectStoreSchema {
    pub name: String,
    pub key_path: Option<String>,
    pub auto_increment: bool,
    pub indexes: Vec<IndexParams>,
}

impl ObjectStoreSchema {
    pub fn new(name: &str, params: &ObjectStoreParams) -> Self {
        ObjectStoreSchema {
            name: name.to_string(),
            key_path: params.key_path.clone(),
            auto_increment: params.auto_increment,
            indexes: Vec::new(),
        }
    }

    pub fn params(&self) -> ObjectStoreParams {
        ObjectStoreParams {
            key_path: self.key_path.clone(),
            auto_increment: self.auto_increment,
        }
    }
}

/// Cursor iteration order.
///
/// Object store keys are unique, so the `*Unique` variants visit the same
/// records as their plain counterparts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CursorDirection {
    #[default]
    Next,
    NextUnique,
    Prev,
    PrevUnique,
}

impl CursorDirection {
    pub fn is_reverse(&self) -> bool {
        matches!(self, CursorDirection::Prev | CursorDirection::PrevUnique)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    ReadOnly,
    ReadWrite,
}

/// A contiguous interval of keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    lower: Option<Key>,
    upper: Option<Key>,
    lower_open: bool,
    upper_open: bool,
}

impl KeyRange {
    pub fn only(key: Key) -> Self {
        KeyRange {
            lower: Some(key.clone()),
            upper: Some(key),
            lower_open: false,
            upper_open: false,
        }
    }

    pub fn lower_bound(key: Key, open: bool) -> Self {
        KeyRange {
            lower: Some(key),
            upper: None,
            lower_open: open,
            upper_open: false,
        }
    }

    pub fn upper_bound(key: Key, open: bool) -> Self {
        KeyRange {
            lower: None,
            upper: Some(key),
            lower_open: false,
            upper_open: open,
        }
    }

    pub fn bound(lower: Key, upper: Key, lower_open: bool, upper_open: bool) -> Self {
        KeyRange {
            lower: Some(lower),
            upper: Some(upper),
            lower_open,
            upper_open,
        }
    }

    pub fn includes(&self, key: &Key) -> bool {
        let above_lower = match &self.lower {
            Some(lower) if self.lower_open => key > lower,
            Some(lower) => key >= lower,
            None => true,
        };
        let below_upper = match &self.upper {
            Some(upper) if self.upper_open => key < upper,
            Some(upper) => key <= upper,
            None => true,
        };
        above_lower && below_upper
    }
}
