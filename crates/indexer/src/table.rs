use crate::error::{IndexerError, Result};
use crate::record::{describe_field, strip_version, FIELD_COUNT};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// One describe record, fields in describe order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescribedRow {
    fields: Vec<String>,
}

impl DescribedRow {
    /// `fields` must come from [`crate::record::split_record`].
    pub fn new(fields: Vec<String>) -> Self {
        debug_assert_eq!(fields.len(), FIELD_COUNT);
        Self { fields }
    }

    pub fn name_version(&self) -> &str {
        &self.fields[describe_field::NAME_VERSION]
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }
}

/// Describe results keyed by name-version, filled concurrently by the worker
/// pool. All access goes through one exclusive lock.
#[derive(Debug, Default)]
pub struct DescribedTable {
    rows: Mutex<HashMap<String, DescribedRow>>,
}

impl DescribedTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, row: DescribedRow) {
        let key = row.name_version().to_string();
        self.rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, row);
    }

    pub fn len(&self) -> usize {
        self.rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Take the table out of shared ownership. Fails while any worker still
    /// holds a handle, so a snapshot can only exist after the pool drained.
    pub fn freeze(table: Arc<Self>) -> Result<DescribedSnapshot> {
        let table = Arc::try_unwrap(table).map_err(|_| {
            IndexerError::Other("described table is still shared with running workers".into())
        })?;
        let rows = table
            .rows
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(DescribedSnapshot::from_rows(rows))
    }
}

/// Stripped name-version -> canonical name-version.
#[derive(Debug, Default, Clone)]
pub struct StrippedIndex {
    canonical: HashMap<String, String>,
}

impl StrippedIndex {
    /// Build from canonical names. When two names share a stripped prefix the
    /// greatest one (byte order) wins, whatever order the names arrive in.
    pub fn from_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        let mut sorted: Vec<&str> = names.into_iter().collect();
        sorted.sort_unstable();
        sorted
            .into_iter()
            .map(|name| (strip_version(name).to_string(), name.to_string()))
            .collect()
    }

    pub fn lookup(&self, name_version: &str) -> Option<&str> {
        self.canonical
            .get(strip_version(name_version))
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.canonical.len()
    }

    pub fn is_empty(&self) -> bool {
        self.canonical.is_empty()
    }
}

impl FromIterator<(String, String)> for StrippedIndex {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            canonical: iter.into_iter().collect(),
        }
    }
}

/// Read-only view of the described table used by the merge phase.
#[derive(Debug, Default)]
pub struct DescribedSnapshot {
    rows: HashMap<String, DescribedRow>,
    stripped: StrippedIndex,
}

impl DescribedSnapshot {
    pub fn from_rows(rows: HashMap<String, DescribedRow>) -> Self {
        let stripped = StrippedIndex::from_names(rows.keys().map(String::as_str));
        Self { rows, stripped }
    }

    pub fn get(&self, name_version: &str) -> Option<&DescribedRow> {
        self.rows.get(name_version)
    }

    pub fn stripped(&self) -> &StrippedIndex {
        &self.stripped
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::split_record;

    fn row(name_version: &str) -> DescribedRow {
        let line = format!("{name_version}|/usr/ports/x/y|/usr/local|c|/usr/ports/x/y/pkg-descr|m|x||||||");
        DescribedRow::new(split_record(&line).expect("13 fields"))
    }

    #[test]
    fn stripped_index_prefers_greatest_name_regardless_of_order() {
        let forward = StrippedIndex::from_names(["foo-1.0", "foo-2.0", "bar-1"]);
        let backward = StrippedIndex::from_names(["bar-1", "foo-2.0", "foo-1.0"]);
        assert_eq!(forward.lookup("foo-0.9"), Some("foo-2.0"));
        assert_eq!(backward.lookup("foo-0.9"), Some("foo-2.0"));
        assert_eq!(forward.lookup("bar-7"), Some("bar-1"));
        assert_eq!(forward.lookup("baz-1"), None);
        assert_eq!(forward.len(), 2);
    }

    #[test]
    fn freeze_requires_sole_ownership() {
        let table = Arc::new(DescribedTable::new());
        table.insert(row("foo-1.0"));
        table.insert(row("foo-1.0"));
        table.insert(row("bar-2"));
        assert_eq!(table.len(), 2);

        let worker_handle = Arc::clone(&table);
        assert!(DescribedTable::freeze(table).is_err());

        let snapshot = DescribedTable::freeze(worker_handle).expect("sole owner");
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.stripped().lookup("foo-0.1"), Some("foo-1.0"));
        assert_eq!(
            snapshot.get("bar-2").map(DescribedRow::name_version),
            Some("bar-2")
        );
    }
}
