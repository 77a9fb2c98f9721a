//! The catalog: entity lifecycles within one database root.
//!
//! This module owns the on-disk layout:
//!
//! ```text
//! <root>/
//! ├─ catalog.meta          # entity names + schema blobs
//! ├─ LOCK                  # advisory lock, one process at a time
//! └─ entities/
//!    └─ <name>/
//!       ├─ schema.meta     # serialized schema + upgrade step identifiers
//!       ├─ data.log        # append-only frame stream
//!       └─ data.log.tmp    # compaction staging (transient)
//! ```
//!
//! The LOCK file ensures only one process opens a database root at a time.
//! Metadata writes go through write-to-temp, fsync, atomic rename, and a
//! directory fsync, so a crash never leaves a half-written meta file.

use crate::config::Config;
use crate::entity::Entity;
use crate::error::{EngineError, EngineResult};
use crate::log::sync_dir;
use crate::schema::Schema;
use fs2::FileExt;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Magic bytes identifying a catalog metadata file.
pub const CATALOG_MAGIC: [u8; 4] = *b"YCAT";

/// Current catalog metadata format version.
pub const CATALOG_META_VERSION: u16 = 1;

const CATALOG_FILE: &str = "catalog.meta";
const CATALOG_TEMP: &str = "catalog.meta.tmp";
const LOCK_FILE: &str = "LOCK";
const ENTITIES_DIR: &str = "entities";
const SCHEMA_FILE: &str = "schema.meta";
const SCHEMA_TEMP: &str = "schema.meta.tmp";

/// The process-wide registry of entities in one database root.
///
/// A catalog holds the directory lock for its root; dropping it releases
/// the lock. Entity handles are cached, so repeated opens return the same
/// engine.
///
/// # Example
///
/// ```no_run
/// use yourdb_core::{Catalog, Config, Record, Schema, ValueKind};
///
/// let catalog = Catalog::open("demo.db", Config::default())?;
/// let users = catalog.create_entity(
///     Schema::new("users", "id")
///         .field("id", ValueKind::Int)
///         .field("name", ValueKind::Str),
/// )?;
/// users.insert(Record::new().with("id", 1).with("name", "ada"))?;
/// # Ok::<(), yourdb_core::EngineError>(())
/// ```
pub struct Catalog {
    root: PathBuf,
    config: Config,
    inner: Mutex<CatalogInner>,
    _lock_file: File,
}

struct CatalogInner {
    /// Entity name -> persisted schema blob (BTreeMap for deterministic
    /// serialization).
    entries: BTreeMap<String, Vec<u8>>,
    /// Entities opened this process.
    open: HashMap<String, Arc<Entity>>,
}

impl Catalog {
    /// Opens or creates a database root.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::DatabaseLocked`] when another process holds
    /// the root, an I/O error when the root is missing and
    /// `create_if_missing` is off, or [`EngineError::InvalidSchema`] when
    /// `catalog.meta` is unreadable.
    pub fn open(root: impl AsRef<Path>, config: Config) -> EngineResult<Self> {
        let root = root.as_ref();

        if !root.exists() {
            if !config.create_if_missing {
                return Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("database root does not exist: {}", root.display()),
                )
                .into());
            }
            fs::create_dir_all(root)?;
        }
        fs::create_dir_all(root.join(ENTITIES_DIR))?;

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(root.join(LOCK_FILE))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(EngineError::DatabaseLocked);
        }

        let entries = match read_file(&root.join(CATALOG_FILE))? {
            Some(data) => decode_catalog(&data)?,
            None => BTreeMap::new(),
        };

        debug!(root = %root.display(), entities = entries.len(), "opened catalog");

        Ok(Self {
            root: root.to_path_buf(),
            config,
            inner: Mutex::new(CatalogInner {
                entries,
                open: HashMap::new(),
            }),
            _lock_file: lock_file,
        })
    }

    /// The database root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates a new entity from a schema and returns its engine.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidSchema`] for an unusable definition
    /// or [`EngineError::EntityExists`] when the name is taken.
    pub fn create_entity(&self, schema: Schema) -> EngineResult<Arc<Entity>> {
        schema.check_definition()?;

        let mut inner = self.inner.lock();
        let name = schema.name().to_string();
        if inner.entries.contains_key(&name) {
            return Err(EngineError::EntityExists { name });
        }

        let dir = self.entity_dir(&name);
        fs::create_dir_all(&dir)?;

        let blob = schema.encode();
        write_atomic(&dir.join(SCHEMA_FILE), &dir.join(SCHEMA_TEMP), &blob)?;

        let entity = Arc::new(Entity::open(&dir, schema, self.config.clone())?);

        inner.entries.insert(name.clone(), blob);
        self.save_catalog(&inner)?;
        inner.open.insert(name.clone(), Arc::clone(&entity));

        debug!(entity = %name, "created entity");
        Ok(entity)
    }

    /// Opens an existing entity with its persisted schema.
    ///
    /// The persisted schema carries no upgrade functions; when the log
    /// still holds records behind the current version, use
    /// [`Self::open_entity_with`] and supply the chain.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::EntityNotFound`] when no such entity exists,
    /// plus anything entity replay can raise.
    pub fn open_entity(&self, name: &str) -> EngineResult<Arc<Entity>> {
        let mut inner = self.inner.lock();
        if let Some(entity) = inner.open.get(name) {
            return Ok(Arc::clone(entity));
        }

        let blob = inner
            .entries
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::EntityNotFound {
                name: name.to_string(),
            })?;
        let schema = Schema::decode(&blob)?;

        let entity = Arc::new(Entity::open(
            &self.entity_dir(name),
            schema,
            self.config.clone(),
        )?);
        inner.open.insert(name.to_string(), Arc::clone(&entity));
        Ok(entity)
    }

    /// Opens an existing entity under a host-supplied schema, the
    /// migration path to a newer schema version.
    ///
    /// The supplied schema must keep the entity's name and primary key
    /// and may raise the version, carrying the upgrade steps that bring
    /// stored records forward. On success the new schema is persisted.
    ///
    /// Any previously returned handle for this entity keeps serving the
    /// old schema; drop such handles before migrating.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::EntityNotFound`] when no such entity exists
    /// and [`EngineError::InvalidSchema`] when the supplied schema renames
    /// the primary key or lowers the version; replay errors (including
    /// [`EngineError::UpgradeChainBroken`]) leave the persisted schema
    /// unchanged.
    pub fn open_entity_with(&self, schema: Schema) -> EngineResult<Arc<Entity>> {
        schema.check_definition()?;

        let mut inner = self.inner.lock();
        let name = schema.name().to_string();
        let blob = inner
            .entries
            .get(&name)
            .cloned()
            .ok_or_else(|| EngineError::EntityNotFound { name: name.clone() })?;
        let persisted = Schema::decode(&blob)?;

        if schema.primary_key() != persisted.primary_key() {
            return Err(EngineError::invalid_schema(format!(
                "primary key may not change (was '{}', got '{}')",
                persisted.primary_key(),
                schema.primary_key()
            )));
        }
        if schema.version() < persisted.version() {
            return Err(EngineError::invalid_schema(format!(
                "schema version may not decrease (was {}, got {})",
                persisted.version(),
                schema.version()
            )));
        }

        inner.open.remove(&name);

        let dir = self.entity_dir(&name);
        let blob = schema.encode();
        let entity = Arc::new(Entity::open(&dir, schema, self.config.clone())?);

        write_atomic(&dir.join(SCHEMA_FILE), &dir.join(SCHEMA_TEMP), &blob)?;
        inner.entries.insert(name.clone(), blob);
        self.save_catalog(&inner)?;
        inner.open.insert(name.clone(), Arc::clone(&entity));

        debug!(entity = %name, "reopened entity under migrated schema");
        Ok(entity)
    }

    /// Removes an entity: its log, its schema, and its catalog entry.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::EntityNotFound`] when no such entity exists.
    pub fn drop_entity(&self, name: &str) -> EngineResult<()> {
        let mut inner = self.inner.lock();
        if !inner.entries.contains_key(name) {
            return Err(EngineError::EntityNotFound {
                name: name.to_string(),
            });
        }

        inner.open.remove(name);
        fs::remove_dir_all(self.entity_dir(name))?;
        sync_dir(&self.root.join(ENTITIES_DIR))?;

        inner.entries.remove(name);
        self.save_catalog(&inner)?;

        debug!(entity = %name, "dropped entity");
        Ok(())
    }

    /// Names of all entities, sorted.
    #[must_use]
    pub fn list_entities(&self) -> Vec<String> {
        self.inner.lock().entries.keys().cloned().collect()
    }

    fn entity_dir(&self, name: &str) -> PathBuf {
        self.root.join(ENTITIES_DIR).join(name)
    }

    fn save_catalog(&self, inner: &CatalogInner) -> EngineResult<()> {
        let data = encode_catalog(&inner.entries);
        write_atomic(
            &self.root.join(CATALOG_FILE),
            &self.root.join(CATALOG_TEMP),
            &data,
        )
    }
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Catalog")
            .field("root", &self.root)
            .field("entities", &self.list_entities())
            .finish_non_exhaustive()
    }
}

/// Reads a whole file, `None` when it does not exist or is empty.
fn read_file(path: &Path) -> EngineResult<Option<Vec<u8>>> {
    if !path.exists() {
        return Ok(None);
    }
    let mut data = Vec::new();
    File::open(path)?.read_to_end(&mut data)?;
    Ok(if data.is_empty() { None } else { Some(data) })
}

/// Writes a meta file atomically: temp, fsync, rename, directory fsync.
fn write_atomic(path: &Path, temp: &Path, data: &[u8]) -> EngineResult<()> {
    let mut file = File::create(temp)?;
    file.write_all(data)?;
    file.sync_all()?;
    drop(file);

    fs::rename(temp, path)?;
    if let Some(parent) = path.parent() {
        sync_dir(parent)?;
    }
    Ok(())
}

fn encode_catalog(entries: &BTreeMap<String, Vec<u8>>) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&CATALOG_MAGIC);
    buf.extend_from_slice(&CATALOG_META_VERSION.to_le_bytes());

    let count = u32::try_from(entries.len()).unwrap_or(u32::MAX);
    buf.extend_from_slice(&count.to_le_bytes());

    for (name, blob) in entries {
        let name_bytes = name.as_bytes();
        let name_len = u16::try_from(name_bytes.len()).unwrap_or(u16::MAX);
        buf.extend_from_slice(&name_len.to_le_bytes());
        buf.extend_from_slice(&name_bytes[..name_len as usize]);

        let blob_len = u32::try_from(blob.len()).unwrap_or(u32::MAX);
        buf.extend_from_slice(&blob_len.to_le_bytes());
        buf.extend_from_slice(&blob[..blob_len as usize]);
    }

    buf
}

fn bad_catalog(msg: impl std::fmt::Display) -> EngineError {
    EngineError::invalid_schema(format!("catalog metadata: {msg}"))
}

fn take<'a>(data: &'a [u8], pos: &mut usize, len: usize) -> EngineResult<&'a [u8]> {
    let end = pos
        .checked_add(len)
        .filter(|&end| end <= data.len())
        .ok_or_else(|| bad_catalog("unexpected end of file"))?;
    let slice = &data[*pos..end];
    *pos = end;
    Ok(slice)
}

fn decode_catalog(data: &[u8]) -> EngineResult<BTreeMap<String, Vec<u8>>> {
    let mut pos = 0_usize;

    if take(data, &mut pos, 4)? != CATALOG_MAGIC {
        return Err(bad_catalog("bad magic"));
    }
    let version_bytes: [u8; 2] = take(data, &mut pos, 2)?.try_into().expect("length checked");
    let version = u16::from_le_bytes(version_bytes);
    if version > CATALOG_META_VERSION {
        return Err(bad_catalog(format!("unsupported format version {version}")));
    }

    let count_bytes: [u8; 4] = take(data, &mut pos, 4)?.try_into().expect("length checked");
    let count = u32::from_le_bytes(count_bytes);

    let mut entries = BTreeMap::new();
    for _ in 0..count {
        let len_bytes: [u8; 2] = take(data, &mut pos, 2)?.try_into().expect("length checked");
        let name_len = u16::from_le_bytes(len_bytes) as usize;
        let name = std::str::from_utf8(take(data, &mut pos, name_len)?)
            .map_err(|_| bad_catalog("invalid UTF-8 entity name"))?
            .to_string();

        let len_bytes: [u8; 4] = take(data, &mut pos, 4)?.try_into().expect("length checked");
        let blob_len = u32::from_le_bytes(len_bytes) as usize;
        let blob = take(data, &mut pos, blob_len)?.to_vec();

        entries.insert(name, blob);
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use yourdb_codec::{Record, Value, ValueKind};

    fn users_schema() -> Schema {
        Schema::new("users", "id")
            .field("id", ValueKind::Int)
            .field("name", ValueKind::Str)
    }

    #[test]
    fn create_and_list() {
        let dir = tempdir().unwrap();
        let catalog = Catalog::open(dir.path(), Config::default()).unwrap();

        catalog.create_entity(users_schema()).unwrap();
        catalog
            .create_entity(Schema::new("posts", "id").field("id", ValueKind::Int))
            .unwrap();

        assert_eq!(catalog.list_entities(), vec!["posts", "users"]);
    }

    #[test]
    fn create_duplicate_fails() {
        let dir = tempdir().unwrap();
        let catalog = Catalog::open(dir.path(), Config::default()).unwrap();

        catalog.create_entity(users_schema()).unwrap();
        assert!(matches!(
            catalog.create_entity(users_schema()),
            Err(EngineError::EntityExists { .. })
        ));
    }

    #[test]
    fn create_invalid_schema_fails() {
        let dir = tempdir().unwrap();
        let catalog = Catalog::open(dir.path(), Config::default()).unwrap();

        assert!(matches!(
            catalog.create_entity(Schema::new("bad name", "id").field("id", ValueKind::Int)),
            Err(EngineError::InvalidSchema { .. })
        ));
        assert!(matches!(
            catalog.create_entity(Schema::new("users", "missing").field("id", ValueKind::Int)),
            Err(EngineError::InvalidSchema { .. })
        ));
        assert!(catalog.list_entities().is_empty());
    }

    #[test]
    fn open_unknown_entity_fails() {
        let dir = tempdir().unwrap();
        let catalog = Catalog::open(dir.path(), Config::default()).unwrap();
        assert!(matches!(
            catalog.open_entity("ghost"),
            Err(EngineError::EntityNotFound { .. })
        ));
    }

    #[test]
    fn open_returns_cached_handle() {
        let dir = tempdir().unwrap();
        let catalog = Catalog::open(dir.path(), Config::default()).unwrap();

        let a = catalog.create_entity(users_schema()).unwrap();
        let b = catalog.open_entity("users").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn entities_survive_catalog_reopen() {
        let dir = tempdir().unwrap();
        {
            let catalog = Catalog::open(dir.path(), Config::default()).unwrap();
            let users = catalog.create_entity(users_schema()).unwrap();
            users
                .insert(Record::new().with("id", 1).with("name", "ada"))
                .unwrap();
        }

        let catalog = Catalog::open(dir.path(), Config::default()).unwrap();
        assert_eq!(catalog.list_entities(), vec!["users"]);

        let users = catalog.open_entity("users").unwrap();
        let all = users.select(None).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].get("name"), Some(&Value::Str("ada".into())));
    }

    #[test]
    fn drop_entity_removes_files() {
        let dir = tempdir().unwrap();
        let catalog = Catalog::open(dir.path(), Config::default()).unwrap();

        catalog.create_entity(users_schema()).unwrap();
        let entity_dir = dir.path().join("entities").join("users");
        assert!(entity_dir.join("data.log").exists());

        catalog.drop_entity("users").unwrap();
        assert!(!entity_dir.exists());
        assert!(catalog.list_entities().is_empty());
        assert!(matches!(
            catalog.open_entity("users"),
            Err(EngineError::EntityNotFound { .. })
        ));
        assert!(matches!(
            catalog.drop_entity("users"),
            Err(EngineError::EntityNotFound { .. })
        ));
    }

    #[test]
    fn second_process_is_locked_out() {
        let dir = tempdir().unwrap();
        let catalog = Catalog::open(dir.path(), Config::default()).unwrap();

        assert!(matches!(
            Catalog::open(dir.path(), Config::default()),
            Err(EngineError::DatabaseLocked)
        ));

        drop(catalog);
        assert!(Catalog::open(dir.path(), Config::default()).is_ok());
    }

    #[test]
    fn missing_root_without_create_fails() {
        let dir = tempdir().unwrap();
        let config = Config::default().create_if_missing(false);
        assert!(Catalog::open(dir.path().join("absent"), config).is_err());
    }

    #[test]
    fn migration_persists_new_schema() {
        let dir = tempdir().unwrap();
        {
            let catalog = Catalog::open(dir.path(), Config::default()).unwrap();
            let users = catalog.create_entity(users_schema()).unwrap();
            users
                .insert(Record::new().with("id", 1).with("name", "ada"))
                .unwrap();
        }

        {
            let catalog = Catalog::open(dir.path(), Config::default()).unwrap();
            let mut v2 = Schema::new("users", "id")
                .field("id", ValueKind::Int)
                .field("name", ValueKind::Str)
                .field("flag", ValueKind::Bool)
                .version_at(2);
            v2.register_upgrade(1, |r| r.with("flag", false)).unwrap();

            let users = catalog.open_entity_with(v2).unwrap();
            let all = users.select(None).unwrap();
            assert_eq!(all[0].get("flag"), Some(&Value::Bool(false)));
            assert_eq!(all[0].version(), 2);
        }

        // The migrated schema was persisted.
        let catalog = Catalog::open(dir.path(), Config::default()).unwrap();
        let blob = fs::read(dir.path().join("entities/users/schema.meta")).unwrap();
        assert_eq!(Schema::decode(&blob).unwrap().version(), 2);
        drop(catalog);
    }

    #[test]
    fn migration_rejects_pk_rename_and_downgrade() {
        let dir = tempdir().unwrap();
        let catalog = Catalog::open(dir.path(), Config::default()).unwrap();
        catalog
            .create_entity(users_schema().version_at(2))
            .unwrap();

        let renamed = Schema::new("users", "name")
            .field("id", ValueKind::Int)
            .field("name", ValueKind::Str)
            .version_at(2);
        assert!(matches!(
            catalog.open_entity_with(renamed),
            Err(EngineError::InvalidSchema { .. })
        ));

        let downgraded = users_schema().version_at(1);
        assert!(matches!(
            catalog.open_entity_with(downgraded),
            Err(EngineError::InvalidSchema { .. })
        ));
    }

    #[test]
    fn catalog_meta_rejects_garbage() {
        assert!(decode_catalog(b"junk").is_err());
        let mut data = encode_catalog(&BTreeMap::new());
        data[0] = b'X';
        assert!(decode_catalog(&data).is_err());
    }

    #[test]
    fn catalog_meta_roundtrip() {
        let mut entries = BTreeMap::new();
        entries.insert("users".to_string(), users_schema().encode());
        entries.insert("posts".to_string(), vec![1, 2, 3]);

        let decoded = decode_catalog(&encode_catalog(&entries)).unwrap();
        assert_eq!(decoded, entries);
    }
}
