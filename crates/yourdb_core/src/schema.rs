//! Entity schemas: field declarations, validation, and upgrade chains.

use crate::error::{EngineError, EngineResult};
use std::collections::BTreeMap;
use std::fmt;
use yourdb_codec::{Record, Value, ValueKind};

/// Magic bytes identifying a serialized schema.
pub const SCHEMA_MAGIC: [u8; 4] = *b"YSCH";

/// Current schema metadata format version.
pub const SCHEMA_META_VERSION: u16 = 1;

/// A host-supplied transformation from a record of version `v` to a record
/// of version `v + 1`.
pub type UpgradeFn = Box<dyn Fn(Record) -> Record + Send + Sync>;

/// An entity schema.
///
/// A schema declares the fields a record must carry, which field is the
/// primary key, which fields are indexed, and the current schema version.
/// It is immutable once the entity is created; a newer schema version is
/// introduced through [`crate::Catalog::open_entity_with`] together with
/// the upgrade steps that carry old records forward.
///
/// # Example
///
/// ```
/// use yourdb_core::{Schema, ValueKind};
///
/// let schema = Schema::new("users", "id")
///     .field("id", ValueKind::Int)
///     .field("name", ValueKind::Str)
///     .field("city", ValueKind::Str)
///     .index("city");
/// assert_eq!(schema.version(), 1);
/// ```
pub struct Schema {
    name: String,
    primary_key: String,
    fields: BTreeMap<String, ValueKind>,
    indexed: Vec<String>,
    version: u32,
    upgrades: BTreeMap<u32, UpgradeFn>,
}

impl Schema {
    /// Creates a schema at version 1 with no fields.
    #[must_use]
    pub fn new(name: impl Into<String>, primary_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary_key: primary_key.into(),
            fields: BTreeMap::new(),
            indexed: Vec::new(),
            version: 1,
            upgrades: BTreeMap::new(),
        }
    }

    /// Declares a field.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, kind: ValueKind) -> Self {
        self.fields.insert(name.into(), kind);
        self
    }

    /// Declares a secondary index on a field.
    ///
    /// The primary key is implicitly indexed and need not be listed.
    #[must_use]
    pub fn index(mut self, field: impl Into<String>) -> Self {
        let field = field.into();
        if field != self.primary_key && !self.indexed.contains(&field) {
            self.indexed.push(field);
        }
        self
    }

    /// Sets the current schema version.
    #[must_use]
    pub fn version_at(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// The entity name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The primary-key field name.
    #[must_use]
    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    /// The declared kind of a field, if the field exists.
    #[must_use]
    pub fn field_kind(&self, field: &str) -> Option<ValueKind> {
        self.fields.get(field).copied()
    }

    /// The secondary-indexed field names, in declaration order.
    #[must_use]
    pub fn indexed_fields(&self) -> &[String] {
        &self.indexed
    }

    /// Whether queries on this field can use an index.
    #[must_use]
    pub fn is_indexed(&self, field: &str) -> bool {
        field == self.primary_key || self.indexed.iter().any(|f| f == field)
    }

    /// The current schema version.
    #[must_use]
    pub const fn version(&self) -> u32 {
        self.version
    }

    /// Checks that the schema definition itself is usable.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidSchema`] when the entity name is empty
    /// or contains characters other than ASCII alphanumerics and
    /// underscores, when no fields are declared, when the primary key or an
    /// indexed field is not among the declared fields, or when the version
    /// is zero.
    pub fn check_definition(&self) -> EngineResult<()> {
        if self.name.is_empty()
            || !self
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(EngineError::invalid_schema(format!(
                "entity name '{}' must be non-empty alphanumeric/underscore",
                self.name
            )));
        }
        if self.fields.is_empty() {
            return Err(EngineError::invalid_schema("schema declares no fields"));
        }
        if !self.fields.contains_key(&self.primary_key) {
            return Err(EngineError::invalid_schema(format!(
                "primary key '{}' is not a declared field",
                self.primary_key
            )));
        }
        for field in &self.indexed {
            if !self.fields.contains_key(field) {
                return Err(EngineError::invalid_schema(format!(
                    "indexed field '{}' is not a declared field",
                    field
                )));
            }
        }
        if self.version == 0 {
            return Err(EngineError::invalid_schema("schema version must be >= 1"));
        }
        Ok(())
    }

    /// Validates a record against this schema.
    ///
    /// Every declared field must be present with a value of the declared
    /// kind, and fields not in the schema are rejected.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::SchemaViolation`] naming the first offending
    /// field.
    pub fn validate(&self, record: &Record) -> EngineResult<()> {
        for (field, kind) in &self.fields {
            match record.get(field) {
                None => {
                    return Err(EngineError::schema_violation(
                        field,
                        kind.to_string(),
                        "missing",
                    ));
                }
                Some(value) if value.kind() != *kind => {
                    return Err(EngineError::schema_violation(
                        field,
                        kind.to_string(),
                        value.kind().to_string(),
                    ));
                }
                Some(_) => {}
            }
        }
        for (field, value) in record {
            if !self.fields.contains_key(field) {
                return Err(EngineError::schema_violation(
                    field,
                    "no declared field",
                    value.kind().to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Registers an upgrade step `from_version -> from_version + 1`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidSchema`] when the step starts at
    /// version zero, starts at or beyond the current version, or is already
    /// registered.
    pub fn register_upgrade(
        &mut self,
        from_version: u32,
        step: impl Fn(Record) -> Record + Send + Sync + 'static,
    ) -> EngineResult<()> {
        if from_version == 0 {
            return Err(EngineError::invalid_schema(
                "upgrade steps start at version 1",
            ));
        }
        if from_version >= self.version {
            return Err(EngineError::invalid_schema(format!(
                "upgrade step {} -> {} exceeds schema version {}",
                from_version,
                from_version + 1,
                self.version
            )));
        }
        if self.upgrades.contains_key(&from_version) {
            return Err(EngineError::invalid_schema(format!(
                "upgrade step from version {} already registered",
                from_version
            )));
        }
        self.upgrades.insert(from_version, Box::new(step));
        Ok(())
    }

    /// The `from` versions of the registered upgrade steps, ascending.
    #[must_use]
    pub fn upgrade_steps(&self) -> Vec<u32> {
        self.upgrades.keys().copied().collect()
    }

    /// Brings a record forward to the current schema version, one step at
    /// a time.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UpgradeChainBroken`] when the record's
    /// version is ahead of the schema, or when a needed step is missing.
    pub fn upgrade(&self, mut record: Record) -> EngineResult<Record> {
        if record.version() > self.version {
            return Err(EngineError::UpgradeChainBroken {
                from: record.version(),
                target: self.version,
            });
        }
        while record.version() < self.version {
            let from = record.version();
            let step = self
                .upgrades
                .get(&from)
                .ok_or(EngineError::UpgradeChainBroken {
                    from,
                    target: self.version,
                })?;
            record = step(record);
            record.set_version(from + 1);
        }
        Ok(record)
    }

    /// Serializes the schema definition (without upgrade functions) for
    /// `schema.meta`.
    ///
    /// Registered upgrade steps are recorded by their `from` version only;
    /// the functions themselves live in host code and must be re-registered
    /// after reopening.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();

        buf.extend_from_slice(&SCHEMA_MAGIC);
        buf.extend_from_slice(&SCHEMA_META_VERSION.to_le_bytes());

        encode_str(&mut buf, &self.name);
        encode_str(&mut buf, &self.primary_key);

        let count = u16::try_from(self.fields.len()).unwrap_or(u16::MAX);
        buf.extend_from_slice(&count.to_le_bytes());
        for (field, kind) in &self.fields {
            encode_str(&mut buf, field);
            buf.push(kind.as_byte());
        }

        let count = u16::try_from(self.indexed.len()).unwrap_or(u16::MAX);
        buf.extend_from_slice(&count.to_le_bytes());
        for field in &self.indexed {
            encode_str(&mut buf, field);
        }

        buf.extend_from_slice(&self.version.to_le_bytes());

        let count = u16::try_from(self.upgrades.len()).unwrap_or(u16::MAX);
        buf.extend_from_slice(&count.to_le_bytes());
        for from in self.upgrades.keys() {
            buf.extend_from_slice(&from.to_le_bytes());
        }

        buf
    }

    /// Deserializes a schema definition from `schema.meta` bytes.
    ///
    /// The returned schema carries no upgrade functions (they cannot be
    /// persisted); recorded step identifiers are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidSchema`] on bad magic, an unsupported
    /// format version, or a malformed body.
    pub fn decode(data: &[u8]) -> EngineResult<Self> {
        let mut cursor = Cursor::new(data);

        let magic = cursor.take(4)?;
        if magic != SCHEMA_MAGIC {
            return Err(EngineError::invalid_schema("bad schema magic"));
        }
        let meta_version = cursor.read_u16()?;
        if meta_version > SCHEMA_META_VERSION {
            return Err(EngineError::invalid_schema(format!(
                "unsupported schema format version {meta_version}"
            )));
        }

        let name = cursor.read_str()?;
        let primary_key = cursor.read_str()?;

        let field_count = cursor.read_u16()?;
        let mut fields = BTreeMap::new();
        for _ in 0..field_count {
            let field = cursor.read_str()?;
            let tag = cursor.read_u8()?;
            let kind = ValueKind::from_byte(tag).ok_or_else(|| {
                EngineError::invalid_schema(format!("unknown field kind tag {tag:#04x}"))
            })?;
            fields.insert(field, kind);
        }

        let index_count = cursor.read_u16()?;
        let mut indexed = Vec::with_capacity(index_count as usize);
        for _ in 0..index_count {
            indexed.push(cursor.read_str()?);
        }

        let version = cursor.read_u32()?;

        // Recorded step identifiers; the functions live in host code.
        let step_count = cursor.read_u16()?;
        for _ in 0..step_count {
            cursor.read_u32()?;
        }

        Ok(Self {
            name,
            primary_key,
            fields,
            indexed,
            version,
            upgrades: BTreeMap::new(),
        })
    }
}

/// Checks that a value has the expected kind, passing it through unchanged.
///
/// Integer/float interchange is rejected; there is no implicit widening.
///
/// # Errors
///
/// Returns [`EngineError::KindMismatch`] naming `field` when the kinds
/// differ.
pub fn coerce_kind(field: &str, value: Value, kind: ValueKind) -> EngineResult<Value> {
    if value.kind() != kind {
        return Err(EngineError::KindMismatch {
            field: field.to_string(),
            expected: kind,
            got: value.kind(),
        });
    }
    Ok(value)
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("name", &self.name)
            .field("primary_key", &self.primary_key)
            .field("fields", &self.fields)
            .field("indexed", &self.indexed)
            .field("version", &self.version)
            .field("upgrade_steps", &self.upgrade_steps())
            .finish()
    }
}

fn encode_str(buf: &mut Vec<u8>, s: &str) {
    let len = u16::try_from(s.len()).unwrap_or(u16::MAX);
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(&s.as_bytes()[..len as usize]);
}

/// Bounds-checked cursor for metadata decoding.
struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, len: usize) -> EngineResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| EngineError::invalid_schema("schema metadata too short"))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_u8(&mut self) -> EngineResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_u16(&mut self) -> EngineResult<u16> {
        let bytes: [u8; 2] = self.take(2)?.try_into().expect("length checked");
        Ok(u16::from_le_bytes(bytes))
    }

    fn read_u32(&mut self) -> EngineResult<u32> {
        let bytes: [u8; 4] = self.take(4)?.try_into().expect("length checked");
        Ok(u32::from_le_bytes(bytes))
    }

    fn read_str(&mut self) -> EngineResult<String> {
        let len = self.read_u16()? as usize;
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_string)
            .map_err(|_| EngineError::invalid_schema("invalid UTF-8 in schema metadata"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users_schema() -> Schema {
        Schema::new("users", "id")
            .field("id", ValueKind::Int)
            .field("name", ValueKind::Str)
            .field("city", ValueKind::Str)
            .index("city")
    }

    #[test]
    fn definition_accepted() {
        assert!(users_schema().check_definition().is_ok());
    }

    #[test]
    fn definition_rejects_bad_name() {
        let schema = Schema::new("bad name!", "id").field("id", ValueKind::Int);
        assert!(matches!(
            schema.check_definition(),
            Err(EngineError::InvalidSchema { .. })
        ));

        let schema = Schema::new("", "id").field("id", ValueKind::Int);
        assert!(schema.check_definition().is_err());
    }

    #[test]
    fn definition_rejects_empty_fields() {
        let schema = Schema::new("users", "id");
        assert!(schema.check_definition().is_err());
    }

    #[test]
    fn definition_rejects_undeclared_primary_key() {
        let schema = Schema::new("users", "id").field("name", ValueKind::Str);
        assert!(schema.check_definition().is_err());
    }

    #[test]
    fn definition_rejects_undeclared_index() {
        let schema = Schema::new("users", "id")
            .field("id", ValueKind::Int)
            .index("city");
        assert!(schema.check_definition().is_err());
    }

    #[test]
    fn primary_key_is_implicitly_indexed() {
        let schema = users_schema();
        assert!(schema.is_indexed("id"));
        assert!(schema.is_indexed("city"));
        assert!(!schema.is_indexed("name"));
        // Listing the pk as an index does not duplicate it.
        let schema = Schema::new("users", "id")
            .field("id", ValueKind::Int)
            .index("id");
        assert!(schema.indexed_fields().is_empty());
    }

    #[test]
    fn validate_accepts_conforming_record() {
        let record = Record::new().with("id", 1).with("name", "a").with("city", "NY");
        assert!(users_schema().validate(&record).is_ok());
    }

    #[test]
    fn validate_rejects_missing_field() {
        let record = Record::new().with("id", 1).with("name", "a");
        let err = users_schema().validate(&record).unwrap_err();
        assert!(matches!(
            err,
            EngineError::SchemaViolation { ref field, .. } if field == "city"
        ));
    }

    #[test]
    fn validate_rejects_kind_mismatch() {
        let record = Record::new()
            .with("id", "one")
            .with("name", "a")
            .with("city", "NY");
        let err = users_schema().validate(&record).unwrap_err();
        assert!(matches!(
            err,
            EngineError::SchemaViolation { ref field, .. } if field == "id"
        ));
    }

    #[test]
    fn validate_rejects_extra_field() {
        let record = Record::new()
            .with("id", 1)
            .with("name", "a")
            .with("city", "NY")
            .with("extra", true);
        let err = users_schema().validate(&record).unwrap_err();
        assert!(matches!(
            err,
            EngineError::SchemaViolation { ref field, .. } if field == "extra"
        ));
    }

    #[test]
    fn no_int_float_interchange() {
        assert!(coerce_kind("x", Value::Int(1), ValueKind::Float).is_err());
        assert!(coerce_kind("x", Value::Float(1.0), ValueKind::Int).is_err());
        assert!(coerce_kind("x", Value::Int(1), ValueKind::Int).is_ok());
    }

    #[test]
    fn upgrade_chain_applies_in_order() {
        let mut schema = Schema::new("users", "id")
            .field("id", ValueKind::Int)
            .version_at(3);
        schema.register_upgrade(1, |r| r.with("step1", true)).unwrap();
        schema.register_upgrade(2, |r| r.with("step2", true)).unwrap();

        let record = Record::new().with("id", 7);
        let upgraded = schema.upgrade(record).unwrap();
        assert_eq!(upgraded.version(), 3);
        assert!(upgraded.contains("step1"));
        assert!(upgraded.contains("step2"));
        assert_eq!(upgraded.get("id"), Some(&Value::Int(7)));
    }

    #[test]
    fn upgrade_missing_step_is_broken_chain() {
        let mut schema = Schema::new("users", "id")
            .field("id", ValueKind::Int)
            .version_at(3);
        schema.register_upgrade(2, |r| r).unwrap();

        let record = Record::new().with("id", 1);
        assert!(matches!(
            schema.upgrade(record),
            Err(EngineError::UpgradeChainBroken { from: 1, target: 3 })
        ));
    }

    #[test]
    fn upgrade_rejects_future_record() {
        let schema = Schema::new("users", "id").field("id", ValueKind::Int);
        let mut record = Record::new().with("id", 1);
        record.set_version(5);
        assert!(matches!(
            schema.upgrade(record),
            Err(EngineError::UpgradeChainBroken { from: 5, target: 1 })
        ));
    }

    #[test]
    fn upgrade_noop_at_current_version() {
        let schema = users_schema();
        let record = Record::new().with("id", 1);
        let upgraded = schema.upgrade(record.clone()).unwrap();
        assert_eq!(upgraded, record);
    }

    #[test]
    fn register_rejects_bad_steps() {
        let mut schema = Schema::new("users", "id")
            .field("id", ValueKind::Int)
            .version_at(2);
        assert!(schema.register_upgrade(0, |r| r).is_err());
        assert!(schema.register_upgrade(2, |r| r).is_err());
        schema.register_upgrade(1, |r| r).unwrap();
        assert!(schema.register_upgrade(1, |r| r).is_err());
    }

    #[test]
    fn meta_roundtrip() {
        let mut schema = users_schema().version_at(2);
        schema.register_upgrade(1, |r| r).unwrap();

        let decoded = Schema::decode(&schema.encode()).unwrap();
        assert_eq!(decoded.name(), "users");
        assert_eq!(decoded.primary_key(), "id");
        assert_eq!(decoded.field_kind("city"), Some(ValueKind::Str));
        assert_eq!(decoded.indexed_fields(), &["city".to_string()]);
        assert_eq!(decoded.version(), 2);
        // Upgrade functions are not persisted.
        assert!(decoded.upgrade_steps().is_empty());
    }

    #[test]
    fn meta_rejects_garbage() {
        assert!(Schema::decode(b"nope").is_err());
        assert!(Schema::decode(&[]).is_err());

        let mut bytes = users_schema().encode();
        bytes.truncate(10);
        assert!(Schema::decode(&bytes).is_err());
    }
}
