//! The in-memory index set: primary map plus secondary buckets.

use crate::error::{EngineError, EngineResult};
use crate::schema::Schema;
use std::collections::{HashMap, HashSet};
use yourdb_codec::{Record, Value};

/// The primary map (pk -> record) and one bucket map per indexed field
/// (field value -> set of pks) for an entity.
///
/// The index set owns the live records; callers receive clones. Every
/// mutation updates the primary map and all secondary maps together - the
/// entity gate guarantees writers exclusive access, so no partial state is
/// ever observable.
#[derive(Debug)]
pub(crate) struct IndexSet {
    primary_key: String,
    primary: HashMap<Value, Record>,
    secondary: HashMap<String, HashMap<Value, HashSet<Value>>>,
}

impl IndexSet {
    /// Creates an empty index set shaped by the schema's indexed fields.
    pub(crate) fn new(schema: &Schema) -> Self {
        let secondary = schema
            .indexed_fields()
            .iter()
            .map(|field| (field.clone(), HashMap::new()))
            .collect();
        Self {
            primary_key: schema.primary_key().to_string(),
            primary: HashMap::new(),
            secondary,
        }
    }

    /// Installs a new record.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::DuplicatePrimaryKey`] when a live record
    /// already has this pk, and [`EngineError::SchemaViolation`] when the
    /// record lacks the pk field (callers validate first, so this guards an
    /// internal invariant).
    pub(crate) fn insert(&mut self, record: Record) -> EngineResult<()> {
        let pk = self.pk_of(&record)?;
        if self.primary.contains_key(&pk) {
            return Err(EngineError::DuplicatePrimaryKey { pk: pk.to_string() });
        }
        self.add_secondaries(&pk, &record);
        self.primary.insert(pk, record);
        Ok(())
    }

    /// Installs a record, displacing any live record under the same pk.
    ///
    /// Returns the displaced record. Used by update and by replay, where
    /// an INSERT under a live pk means "replace".
    pub(crate) fn replace(&mut self, record: Record) -> EngineResult<Option<Record>> {
        let pk = self.pk_of(&record)?;
        let previous = self.remove(&pk);
        self.add_secondaries(&pk, &record);
        self.primary.insert(pk, record);
        Ok(previous)
    }

    /// Removes the record under a pk, returning it.
    pub(crate) fn remove(&mut self, pk: &Value) -> Option<Record> {
        let record = self.primary.remove(pk)?;
        for (field, buckets) in &mut self.secondary {
            if let Some(value) = record.get(field) {
                if let Some(bucket) = buckets.get_mut(value) {
                    bucket.remove(pk);
                    if bucket.is_empty() {
                        buckets.remove(value);
                    }
                }
            }
        }
        Some(record)
    }

    /// Gets the live record under a pk.
    pub(crate) fn get(&self, pk: &Value) -> Option<&Record> {
        self.primary.get(pk)
    }

    /// The pks whose records carry `value` in `field`.
    ///
    /// The primary-key field resolves through the primary map; other
    /// fields resolve through their bucket, empty when the field is not
    /// indexed or the bucket is vacant.
    pub(crate) fn lookup(&self, field: &str, value: &Value) -> Vec<Value> {
        if field == self.primary_key {
            return if self.primary.contains_key(value) {
                vec![value.clone()]
            } else {
                Vec::new()
            };
        }
        self.secondary
            .get(field)
            .and_then(|buckets| buckets.get(value))
            .map(|bucket| bucket.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Iterates all live records.
    pub(crate) fn scan(&self) -> impl Iterator<Item = &Record> {
        self.primary.values()
    }

    /// Number of live records.
    pub(crate) fn len(&self) -> usize {
        self.primary.len()
    }

    fn pk_of(&self, record: &Record) -> EngineResult<Value> {
        record.get(&self.primary_key).cloned().ok_or_else(|| {
            EngineError::schema_violation(&self.primary_key, "primary key value", "missing")
        })
    }

    fn add_secondaries(&mut self, pk: &Value, record: &Record) {
        for (field, buckets) in &mut self.secondary {
            if let Some(value) = record.get(field) {
                buckets
                    .entry(value.clone())
                    .or_default()
                    .insert(pk.clone());
            }
        }
    }

    /// Checks index coherence: every live record appears in the bucket for
    /// each of its indexed field values, and every bucket member is a live
    /// record whose field equals the bucket key.
    #[cfg(test)]
    pub(crate) fn is_coherent(&self) -> bool {
        for (pk, record) in &self.primary {
            for (field, buckets) in &self.secondary {
                let Some(value) = record.get(field) else {
                    return false;
                };
                let present = buckets
                    .get(value)
                    .is_some_and(|bucket| bucket.contains(pk));
                if !present {
                    return false;
                }
            }
        }
        for (field, buckets) in &self.secondary {
            for (value, bucket) in buckets {
                for pk in bucket {
                    let matches = self
                        .primary
                        .get(pk)
                        .and_then(|record| record.get(field))
                        .is_some_and(|v| v == value);
                    if !matches {
                        return false;
                    }
                }
            }
        }
        true
    }
}
