use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A record the store can persist.
///
/// The store only knows the primary id and the secondary index key.
/// Every other field travels as part of the serialized body.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Primary key. Unique across the store, never changes after creation.
    fn id(&self) -> &str;

    /// Secondary, non-unique lookup key.
    fn index_key(&self) -> &str;
}

/// Backend-assigned version of a stored record.
///
/// Starts at 1 on insert and grows by one on every successful
/// compare-and-swap. Never exposed through the record body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version(pub u64);

impl Version {
    pub const INITIAL: Version = Version(1);

    pub fn next(self) -> Version {
        Version(self.0 + 1)
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Record as the backend sees it: identity, index key and an opaque JSON body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub index_key: String,
    pub body: serde_json::Value,
}

impl Document {
    pub fn from_record<R: Record>(record: &R) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: record.id().to_string(),
            index_key: record.index_key().to_string(),
            body: serde_json::to_value(record)?,
        })
    }

    pub fn into_record<R: Record>(self) -> Result<R, serde_json::Error> {
        serde_json::from_value(self.body)
    }
}

/// A document together with the metadata the backend tracks for it.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub version: Version,
    /// Creation sequence. Larger means created later; drives index ordering.
    pub seq: u64,
    pub value: T,
}

/// Opaque resume token for paged index listings.
///
/// Only the backend that produced it can interpret it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Continuation(pub String);

/// One page of an index listing, most recently created first.
#[derive(Debug, Clone, Default)]
pub struct IndexPage {
    pub documents: Vec<Versioned<Document>>,
    pub continuation: Option<Continuation>,
}
