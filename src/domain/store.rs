//! Entity store interface
//!
//! This is defined in the domain layer as a trait (port), and implemented
//! in the infrastructure layer (adapter). The store knows nothing about
//! calls or operators beyond the two namespaces; records are flat maps of
//! field name to string value, converted to typed records at this boundary
//! through [`StoredRecord`].

use crate::domain::shared::error::DispatchError;
use crate::domain::shared::result::Result;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Raw numeric id as kept by the store
pub type EntityId = u64;

/// Flat field map of one record
pub type Fields = BTreeMap<String, String>;

/// Keyspace a record lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Namespace {
    Calls,
    Operators,
}

impl Namespace {
    /// Name of the index set holding every live id of this namespace
    pub fn index_key(&self) -> &'static str {
        match self {
            Namespace::Calls => "call_ids",
            Namespace::Operators => "operator_ids",
        }
    }

    /// Key of a single record
    pub fn record_key(&self, id: EntityId) -> String {
        format!("{}:{}", self.as_str(), id)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::Calls => "call",
            Namespace::Operators => "operator",
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Precondition checked by [`EntityStore::compare_and_set`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Guard {
    /// The id is present in the namespace index
    Exists { namespace: Namespace, id: EntityId },
    /// The record has `field` set to exactly `value`
    FieldEquals {
        namespace: Namespace,
        id: EntityId,
        field: String,
        value: String,
    },
}

impl Guard {
    pub fn exists(namespace: Namespace, id: EntityId) -> Self {
        Guard::Exists { namespace, id }
    }

    pub fn field_equals(
        namespace: Namespace,
        id: EntityId,
        field: &str,
        value: impl ToString,
    ) -> Self {
        Guard::FieldEquals {
            namespace,
            id,
            field: field.to_string(),
            value: value.to_string(),
        }
    }

    pub fn target(&self) -> (Namespace, EntityId) {
        match self {
            Guard::Exists { namespace, id } => (*namespace, *id),
            Guard::FieldEquals { namespace, id, .. } => (*namespace, *id),
        }
    }

    /// Evaluate against the current state of the target record
    pub fn holds(&self, indexed: bool, fields: Option<&Fields>) -> bool {
        match self {
            Guard::Exists { .. } => indexed,
            Guard::FieldEquals { field, value, .. } => {
                fields.and_then(|f| f.get(field)) == Some(value)
            }
        }
    }
}

/// Single field write applied by [`EntityStore::compare_and_set`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldWrite {
    pub namespace: Namespace,
    pub id: EntityId,
    pub field: String,
    pub value: String,
}

impl FieldWrite {
    pub fn new(namespace: Namespace, id: EntityId, field: &str, value: impl ToString) -> Self {
        Self {
            namespace,
            id,
            field: field.to_string(),
            value: value.to_string(),
        }
    }
}

/// Persistent key-value backend holding index sets and field records.
///
/// All operations block the calling thread until the backend answers.
/// Any backend failure surfaces as [`DispatchError::StorageUnavailable`].
#[cfg_attr(test, mockall::automock)]
pub trait EntityStore: Send + Sync {
    /// Hand out the next id of a namespace.
    ///
    /// Linearizable across concurrent callers. Ids are never handed out
    /// twice for the lifetime of the store, even after deletion.
    fn allocate_id(&self, namespace: Namespace) -> Result<EntityId>;

    /// Add `id` to the namespace index and write all `fields` at once
    fn register(&self, namespace: Namespace, id: EntityId, fields: &Fields) -> Result<()>;

    /// Read a whole record; an unknown id yields an empty map
    fn get_all_fields(&self, namespace: Namespace, id: EntityId) -> Result<Fields>;

    /// Write one field unconditionally
    fn set_field(&self, namespace: Namespace, id: EntityId, field: &str, value: &str)
        -> Result<()>;

    /// Remove `id` from the index and drop its record.
    ///
    /// Returns whether the id was present.
    fn delete(&self, namespace: Namespace, id: EntityId) -> Result<bool>;

    fn contains(&self, namespace: Namespace, id: EntityId) -> Result<bool>;

    /// All live ids of a namespace, ascending
    fn list_ids(&self, namespace: Namespace) -> Result<BTreeSet<EntityId>>;

    /// Apply `writes` atomically if every guard holds.
    ///
    /// Returns `false` and writes nothing when any guard fails.
    fn compare_and_set(&self, guards: &[Guard], writes: &[FieldWrite]) -> Result<bool>;

    /// Delete every record of a namespace, returning how many were removed.
    ///
    /// The id sequence is not rewound.
    fn clear(&self, namespace: Namespace) -> Result<usize>;
}

/// Typed record with an explicit encoding at the store boundary
pub trait StoredRecord: Sized {
    const NAMESPACE: Namespace;

    fn to_fields(&self) -> Fields;

    fn from_fields(id: EntityId, fields: &Fields) -> Result<Self>;
}

/// Look up a required field, failing with `CorruptRecord` when absent
pub(crate) fn required_field<'a>(
    namespace: Namespace,
    id: EntityId,
    fields: &'a Fields,
    name: &str,
) -> Result<&'a str> {
    fields
        .get(name)
        .map(String::as_str)
        .ok_or_else(|| DispatchError::CorruptRecord {
            kind: namespace.as_str(),
            id,
            reason: format!("missing field '{}'", name),
        })
}

/// Parse an integer field, failing with `CorruptRecord` when malformed
pub(crate) fn integer_field(
    namespace: Namespace,
    id: EntityId,
    fields: &Fields,
    name: &str,
) -> Result<i64> {
    let raw = required_field(namespace, id, fields, name)?;
    raw.trim()
        .parse::<i64>()
        .map_err(|_| DispatchError::CorruptRecord {
            kind: namespace.as_str(),
            id,
            reason: format!("field '{}' is not an integer: {:?}", name, raw),
        })
}

/// Parse a reference field where `0` means none
pub(crate) fn reference_field(
    namespace: Namespace,
    id: EntityId,
    fields: &Fields,
    name: &str,
) -> Result<Option<EntityId>> {
    let value = integer_field(namespace, id, fields, name)?;
    match value {
        0 => Ok(None),
        v if v > 0 => Ok(Some(v as EntityId)),
        v => Err(DispatchError::CorruptRecord {
            kind: namespace.as_str(),
            id,
            reason: format!("field '{}' holds a negative id: {}", name, v),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> Fields {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_namespace_keys() {
        assert_eq!(Namespace::Calls.index_key(), "call_ids");
        assert_eq!(Namespace::Operators.index_key(), "operator_ids");
        assert_eq!(Namespace::Calls.record_key(4), "call:4");
        assert_eq!(Namespace::Operators.record_key(9), "operator:9");
    }

    #[test]
    fn test_guard_holds() {
        let record = fields(&[("status", "0")]);

        let exists = Guard::exists(Namespace::Calls, 1);
        assert!(exists.holds(true, Some(&record)));
        assert!(!exists.holds(false, None));

        let waiting = Guard::field_equals(Namespace::Calls, 1, "status", 0);
        assert!(waiting.holds(true, Some(&record)));
        assert!(!waiting.holds(true, None));

        let assigned = Guard::field_equals(Namespace::Calls, 1, "status", 1);
        assert!(!assigned.holds(true, Some(&record)));
    }

    #[test]
    fn test_reference_field() {
        let record = fields(&[("call_id", "0"), ("other", "12"), ("bad", "-3")]);
        let ns = Namespace::Operators;

        assert_eq!(reference_field(ns, 1, &record, "call_id").unwrap(), None);
        assert_eq!(reference_field(ns, 1, &record, "other").unwrap(), Some(12));
        assert!(matches!(
            reference_field(ns, 1, &record, "bad"),
            Err(DispatchError::CorruptRecord { .. })
        ));
        assert!(matches!(
            reference_field(ns, 1, &record, "missing"),
            Err(DispatchError::CorruptRecord { .. })
        ));
    }

    #[test]
    fn test_integer_field_rejects_text() {
        let record = fields(&[("status", "waiting")]);
        let err = integer_field(Namespace::Calls, 2, &record, "status").unwrap_err();
        assert!(err.to_string().contains("not an integer"));
    }
}
