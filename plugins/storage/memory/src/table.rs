use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;

use callstore_api::{BackendError, Continuation, Document, IndexPage, Version, Versioned};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEntry {
    pub version: Version,
    pub seq: u64,
    pub document: Document,
}

impl StoredEntry {
    fn to_versioned(&self) -> Versioned<Document> {
        Versioned {
            version: self.version,
            seq: self.seq,
            value: self.document.clone(),
        }
    }
}

/// Serializable image of a `MemoryTable`. The secondary index is derived
/// state and is rebuilt on load.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct TableSnapshot {
    pub next_seq: u64,
    pub entries: Vec<StoredEntry>,
}

/// Primary map keyed by id plus a secondary multimap keyed by index key.
///
/// Within one index key, ids are ordered by creation sequence, newest first.
/// Not synchronized; callers wrap it in a lock.
#[derive(Debug, Clone, Default)]
pub struct MemoryTable {
    entries: HashMap<String, StoredEntry>,
    index: HashMap<String, BTreeMap<Reverse<u64>, String>>,
    next_seq: u64,
}

impl MemoryTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<Versioned<Document>> {
        self.entries.get(id).map(StoredEntry::to_versioned)
    }

    pub fn first_by_index(&self, index_key: &str) -> Option<Versioned<Document>> {
        let ids = self.index.get(index_key)?;
        let (_, id) = ids.iter().next()?;
        self.get(id)
    }

    pub fn insert(&mut self, document: Document) -> Result<Version, BackendError> {
        if self.contains(&document.id) {
            return Err(BackendError::conflict(format!("id '{}' already exists", document.id)));
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.index
            .entry(document.index_key.clone())
            .or_default()
            .insert(Reverse(seq), document.id.clone());
        let id = document.id.clone();
        self.entries.insert(
            id,
            StoredEntry {
                version: Version::INITIAL,
                seq,
                document,
            },
        );
        Ok(Version::INITIAL)
    }

    pub fn compare_and_swap(
        &mut self,
        id: &str,
        expected: Version,
        document: Document,
    ) -> Result<Version, BackendError> {
        if document.id != id {
            return Err(BackendError::new(format!(
                "document id '{}' does not match target id '{id}'",
                document.id
            )));
        }
        let entry = self
            .entries
            .get_mut(id)
            .ok_or_else(|| BackendError::not_found(format!("id '{id}' not found")))?;
        if entry.version != expected {
            return Err(BackendError::conflict(format!(
                "id '{id}' is at {}, expected {expected}",
                entry.version
            )));
        }

        let seq = entry.seq;
        let old_key = std::mem::replace(&mut entry.document, document).index_key;
        entry.version = entry.version.next();
        let version = entry.version;
        let new_key = entry.document.index_key.clone();

        if old_key != new_key {
            self.unindex(&old_key, seq);
            self.index
                .entry(new_key)
                .or_default()
                .insert(Reverse(seq), id.to_string());
        }
        Ok(version)
    }

    pub fn remove(&mut self, id: &str, expected: Version) -> Result<bool, BackendError> {
        let Some(entry) = self.entries.get(id) else {
            return Ok(false);
        };
        if entry.version != expected {
            return Err(BackendError::conflict(format!(
                "id '{id}' is at {}, expected {expected}",
                entry.version
            )));
        }
        if let Some(entry) = self.entries.remove(id) {
            self.unindex(&entry.document.index_key, entry.seq);
        }
        Ok(true)
    }

    /// Continuation token is the creation sequence of the last returned entry.
    pub fn list_by_index(
        &self,
        index_key: &str,
        count: usize,
        after: Option<&Continuation>,
    ) -> Result<IndexPage, BackendError> {
        let lower = match after {
            Some(token) => {
                let seq: u64 = token.0.parse().map_err(|_| {
                    BackendError::format_err(format!("invalid continuation '{}'", token.0))
                })?;
                Bound::Excluded(Reverse(seq))
            }
            None => Bound::Unbounded,
        };

        let Some(ids) = self.index.get(index_key) else {
            return Ok(IndexPage::default());
        };
        if count == 0 {
            return Ok(IndexPage::default());
        }

        let mut iter = ids.range((lower, Bound::Unbounded));
        let mut documents = Vec::with_capacity(count.min(ids.len()));
        for (_, id) in iter.by_ref().take(count) {
            if let Some(doc) = self.get(id) {
                documents.push(doc);
            }
        }
        let continuation = match (iter.next(), documents.last()) {
            (Some(_), Some(last)) => Some(Continuation(last.seq.to_string())),
            _ => None,
        };
        Ok(IndexPage {
            documents,
            continuation,
        })
    }

    pub fn snapshot(&self) -> TableSnapshot {
        let mut entries: Vec<StoredEntry> = self.entries.values().cloned().collect();
        entries.sort_by_key(|e| e.seq);
        TableSnapshot {
            next_seq: self.next_seq,
            entries,
        }
    }

    pub fn from_snapshot(snapshot: TableSnapshot) -> Self {
        let mut table = Self {
            entries: HashMap::with_capacity(snapshot.entries.len()),
            index: HashMap::new(),
            next_seq: snapshot.next_seq,
        };
        for entry in snapshot.entries {
            table.next_seq = table.next_seq.max(entry.seq + 1);
            table
                .index
                .entry(entry.document.index_key.clone())
                .or_default()
                .insert(Reverse(entry.seq), entry.document.id.clone());
            table.entries.insert(entry.document.id.clone(), entry);
        }
        table
    }

    fn unindex(&mut self, index_key: &str, seq: u64) {
        if let Some(ids) = self.index.get_mut(index_key) {
            ids.remove(&Reverse(seq));
            if ids.is_empty() {
                self.index.remove(index_key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use callstore_api::ErrorKind;

    use super::*;

    fn doc(id: &str, key: &str, n: i64) -> Document {
        Document {
            id: id.into(),
            index_key: key.into(),
            body: serde_json::json!({ "n": n }),
        }
    }

    #[test]
    fn test_insert_rejects_duplicate_id() {
        let mut t = MemoryTable::new();
        assert_eq!(t.insert(doc("a", "k", 1)).unwrap(), Version::INITIAL);
        let err = t.insert(doc("a", "k", 2)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(t.get("a").unwrap().value.body["n"], 1);
    }

    #[test]
    fn test_cas_checks_version() {
        let mut t = MemoryTable::new();
        t.insert(doc("a", "k", 1)).unwrap();

        let v2 = t.compare_and_swap("a", Version(1), doc("a", "k", 2)).unwrap();
        assert_eq!(v2, Version(2));

        let err = t.compare_and_swap("a", Version(1), doc("a", "k", 3)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(t.get("a").unwrap().value.body["n"], 2);

        let err = t.compare_and_swap("zz", Version(1), doc("zz", "k", 3)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_cas_moves_index_entry() {
        let mut t = MemoryTable::new();
        t.insert(doc("a", "old", 1)).unwrap();
        t.compare_and_swap("a", Version(1), doc("a", "new", 1)).unwrap();

        assert!(t.first_by_index("old").is_none());
        assert_eq!(t.first_by_index("new").unwrap().value.id, "a");
    }

    #[test]
    fn test_index_newest_first_with_continuation() {
        let mut t = MemoryTable::new();
        for id in ["a", "b", "c"] {
            t.insert(doc(id, "k", 0)).unwrap();
        }
        t.insert(doc("x", "other", 0)).unwrap();

        assert_eq!(t.first_by_index("k").unwrap().value.id, "c");

        let page = t.list_by_index("k", 2, None).unwrap();
        let ids: Vec<_> = page.documents.iter().map(|d| d.value.id.as_str()).collect();
        assert_eq!(ids, ["c", "b"]);
        let token = page.continuation.expect("more entries remain");

        let page = t.list_by_index("k", 2, Some(&token)).unwrap();
        let ids: Vec<_> = page.documents.iter().map(|d| d.value.id.as_str()).collect();
        assert_eq!(ids, ["a"]);
        assert!(page.continuation.is_none());
    }

    #[test]
    fn test_list_unknown_key_is_empty() {
        let t = MemoryTable::new();
        let page = t.list_by_index("nobody", 5, None).unwrap();
        assert!(page.documents.is_empty());
        assert!(page.continuation.is_none());
    }

    #[test]
    fn test_invalid_continuation() {
        let mut t = MemoryTable::new();
        t.insert(doc("a", "k", 0)).unwrap();
        let err = t
            .list_by_index("k", 1, Some(&Continuation("not-a-seq".into())))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
    }

    #[test]
    fn test_remove_checks_version_and_unindexes() {
        let mut t = MemoryTable::new();
        t.insert(doc("a", "k", 0)).unwrap();
        assert_eq!(t.remove("a", Version(7)).unwrap_err().kind(), ErrorKind::Conflict);
        assert!(t.remove("a", Version(1)).unwrap());
        assert!(!t.remove("a", Version(1)).unwrap());
        assert!(t.first_by_index("k").is_none());
        assert!(t.is_empty());
    }

    #[test]
    fn test_snapshot_restores_index_and_sequence() {
        let mut t = MemoryTable::new();
        t.insert(doc("a", "k", 0)).unwrap();
        t.insert(doc("b", "k", 0)).unwrap();
        t.compare_and_swap("a", Version(1), doc("a", "k", 9)).unwrap();

        let mut restored = MemoryTable::from_snapshot(t.snapshot());
        assert_eq!(restored.len(), 2);
        assert_eq!(restored.get("a").unwrap().version, Version(2));
        assert_eq!(restored.first_by_index("k").unwrap().value.id, "b");

        restored.insert(doc("c", "k", 0)).unwrap();
        assert_eq!(restored.first_by_index("k").unwrap().value.id, "c");
    }
}
