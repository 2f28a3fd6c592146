use std::collections::HashSet;

use crate::models::{RecordKey, TenderRecord};

/// Keys already persisted for one source, loaded fresh at the start of that
/// source's step in every pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KnownKeySet {
    keys: HashSet<RecordKey>,
}

impl KnownKeySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &RecordKey) -> bool {
        self.keys.contains(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl FromIterator<RecordKey> for KnownKeySet {
    fn from_iter<I: IntoIterator<Item = RecordKey>>(iter: I) -> Self {
        Self {
            keys: iter.into_iter().collect(),
        }
    }
}

/// Records whose key is not yet known, in input order.
///
/// A known record is dropped even if its other fields changed since it was
/// stored; the first-seen version is kept. Repeated keys within `candidates`
/// keep their first occurrence.
pub fn filter_new(candidates: Vec<TenderRecord>, known: &KnownKeySet) -> Vec<TenderRecord> {
    let mut batch = HashSet::new();
    candidates
        .into_iter()
        .filter(|record| {
            let key = record.key();
            !known.contains(&key) && batch.insert(key)
        })
        .collect()
}
