use std::fmt;

/// `collection.index` reference used in reports and failures.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct IndexRef {
    pub collection: String,
    pub index: String,
}

impl IndexRef {
    pub fn new(collection: impl Into<String>, index: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            index: index.into(),
        }
    }
}

impl fmt::Display for IndexRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.collection, self.index)
    }
}

/// What an apply run changed. Lists are sorted.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Informational only: the metadata tables did not exist before this run.
    pub metadata_created: bool,
    pub groups_inserted: Vec<String>,
    /// Existing groups whose stored record changed (merged or replaced).
    pub groups_updated: Vec<String>,
    pub groups_deleted: Vec<String>,
    pub tables_created: Vec<String>,
    pub collection_records_created: Vec<String>,
    pub collections_removed: Vec<String>,
    pub indexes_created: Vec<IndexRef>,
    pub indexes_dropped: Vec<IndexRef>,
}

impl ApplyReport {
    /// True when the run created, changed, or removed nothing.
    pub fn is_noop(&self) -> bool {
        self.groups_inserted.is_empty()
            && self.groups_updated.is_empty()
            && self.groups_deleted.is_empty()
            && self.tables_created.is_empty()
            && self.collection_records_created.is_empty()
            && self.collections_removed.is_empty()
            && self.indexes_created.is_empty()
            && self.indexes_dropped.is_empty()
    }

    pub(crate) fn normalize(&mut self) {
        self.groups_inserted.sort();
        self.groups_updated.sort();
        self.groups_deleted.sort();
        self.tables_created.sort();
        self.collection_records_created.sort();
        self.collections_removed.sort();
        self.indexes_created.sort();
        self.indexes_dropped.sort();
    }
}
