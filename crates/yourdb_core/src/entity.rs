//! The per-entity storage engine.
//!
//! An [`Entity`] pairs an append-only log segment with an in-memory index
//! set and serves CRUD and queries through its writer-preference gate.
//! Mutations validate against the schema, append a framed op, sync, and
//! only then touch the index - so an operation that failed never changed
//! what readers can observe, and a cold open replays the log back to the
//! exact live set.

use crate::compact;
use crate::config::Config;
use crate::error::{EngineError, EngineResult};
use crate::gate::Gate;
use crate::index::IndexSet;
use crate::log::{Frame, LogSegment};
use crate::query::{self, Filter, Plan};
use crate::schema::Schema;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use yourdb_codec::{decode_record, decode_value, Record};

/// Name of an entity's log segment within its directory.
pub(crate) const SEGMENT_FILE: &str = "data.log";
/// Compaction staging file, renamed over the segment on success.
pub(crate) const SEGMENT_STAGING_FILE: &str = "data.log.tmp";

/// A named collection of records sharing one schema.
///
/// Entities are created and opened through [`crate::Catalog`]. All
/// operations are safe to call from multiple threads; the entity's gate
/// admits any number of readers or one writer, preferring waiting writers.
pub struct Entity {
    name: String,
    config: Config,
    live_path: PathBuf,
    staging_path: PathBuf,
    gate: Gate<EntityState>,
}

/// State guarded by the entity gate.
pub(crate) struct EntityState {
    pub(crate) schema: Schema,
    pub(crate) index: IndexSet,
    pub(crate) segment: LogSegment,
}

impl Entity {
    /// Opens an entity directory: replays the log into a fresh index set,
    /// applying upgrade steps to records stored behind the schema version.
    ///
    /// # Errors
    ///
    /// Fails on I/O errors, a corrupt non-trailing frame, a record whose
    /// version has no path to the schema version, or a replayed record
    /// that does not validate.
    pub(crate) fn open(dir: &Path, schema: Schema, config: Config) -> EngineResult<Self> {
        let live_path = dir.join(SEGMENT_FILE);
        let staging_path = dir.join(SEGMENT_STAGING_FILE);

        // A staging file left behind by a crashed compaction was never
        // renamed, so the live segment is still authoritative.
        if staging_path.exists() {
            warn!(path = %staging_path.display(), "removing stale compaction staging file");
            std::fs::remove_file(&staging_path)?;
        }

        let segment = LogSegment::open(&live_path)?;
        let mut index = IndexSet::new(&schema);

        for item in segment.iter()? {
            let (seq, frame) = item?;
            match frame {
                Frame::Insert(payload) => {
                    let record = decode_record(&payload)
                        .map_err(|e| EngineError::corrupt_frame(seq, e.to_string()))?;
                    let record = schema.upgrade(record)?;
                    schema.validate(&record)?;
                    index.replace(record)?;
                }
                Frame::Delete(payload) => {
                    let pk = decode_value(&payload)
                        .map_err(|e| EngineError::corrupt_frame(seq, e.to_string()))?;
                    index.remove(&pk);
                }
                Frame::SnapshotMark => {}
            }
        }

        debug!(
            entity = schema.name(),
            frames = segment.frame_count(),
            live = index.len(),
            "replayed log segment"
        );

        Ok(Self {
            name: schema.name().to_string(),
            config,
            live_path,
            staging_path,
            gate: Gate::new(EntityState {
                schema,
                index,
                segment,
            }),
        })
    }

    /// The entity name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of live records.
    #[must_use]
    pub fn count(&self) -> usize {
        self.gate.read().index.len()
    }

    /// Inserts a record.
    ///
    /// The record is validated, stamped with the current schema version,
    /// appended to the log, synced, and installed in the index set.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::SchemaViolation`] for a non-conforming
    /// record, [`EngineError::DuplicatePrimaryKey`] when a live record
    /// holds the same pk (nothing is appended in either case), or an I/O
    /// error - in which case the index was not touched.
    pub fn insert(&self, mut record: Record) -> EngineResult<()> {
        let mut state = self.gate.write();

        state.schema.validate(&record)?;
        record.set_version(state.schema.version());

        let pk = record
            .get(state.schema.primary_key())
            .cloned()
            .ok_or_else(|| {
                EngineError::schema_violation(
                    state.schema.primary_key(),
                    "primary key value",
                    "missing",
                )
            })?;
        if state.index.get(&pk).is_some() {
            return Err(EngineError::DuplicatePrimaryKey { pk: pk.to_string() });
        }

        let frame = Frame::insert(&record)?;
        state.segment.append(&frame)?;
        if self.config.sync_on_write {
            state.segment.sync()?;
        }
        state.index.insert(record)
    }

    /// Returns a snapshot of the records matching `filter`, or every live
    /// record when `filter` is `None`.
    ///
    /// A scalar equality on an indexed field seeds the candidate set from
    /// the smallest matching bucket; all other predicates filter linearly.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::SchemaViolation`] for a filter naming an
    /// undeclared field, or [`EngineError::KindMismatch`] for an operand
    /// whose kind differs from the field's.
    pub fn select(&self, filter: Option<&Filter>) -> EngineResult<Vec<Record>> {
        let state = self.gate.read();
        if let Some(filter) = filter {
            filter.check(&state.schema)?;
        }
        Ok(matching_records(&state, filter))
    }

    /// Applies `transform` to every record matching `filter`, returning
    /// the number updated.
    ///
    /// Each transformed record is re-validated, must keep its primary key
    /// ([`EngineError::PrimaryKeyImmutable`] otherwise), and is logged as a
    /// replacement INSERT at the current schema version. A mid-batch
    /// failure aborts the remainder and surfaces the error; replacements
    /// already appended are synced and stand - they are valid updates.
    pub fn update<F>(&self, filter: &Filter, transform: F) -> EngineResult<usize>
    where
        F: Fn(&mut Record),
    {
        let mut state = self.gate.write();
        filter.check(&state.schema)?;

        let originals = matching_records(&state, Some(filter));
        let pk_field = state.schema.primary_key().to_string();
        let version = state.schema.version();

        let mut outcome = Ok(());
        let mut replacements = Vec::new();
        for original in &originals {
            let mut updated = original.clone();
            transform(&mut updated);

            if let Err(e) = state.schema.validate(&updated) {
                outcome = Err(e);
                break;
            }
            if updated.get(&pk_field) != original.get(&pk_field) {
                let pk = original.get(&pk_field).map(ToString::to_string);
                outcome = Err(EngineError::PrimaryKeyImmutable {
                    pk: pk.unwrap_or_default(),
                });
                break;
            }
            updated.set_version(version);

            let append = Frame::insert(&updated).and_then(|f| {
                state.segment.append(&f)?;
                Ok(())
            });
            match append {
                Ok(()) => replacements.push(updated),
                Err(e) => {
                    outcome = Err(e);
                    break;
                }
            }
        }

        if self.config.sync_on_write {
            state.segment.sync()?;
        }
        let count = replacements.len();
        for updated in replacements {
            state.index.replace(updated)?;
        }
        outcome?;

        let compact_due = should_compact(&self.config, &state);
        drop(state);
        if compact_due {
            self.auto_compact();
        }
        Ok(count)
    }

    /// Deletes every record matching `filter`, returning the number
    /// removed.
    ///
    /// One DELETE frame is appended per match and the log is synced once
    /// before the index set is touched.
    pub fn delete(&self, filter: &Filter) -> EngineResult<usize> {
        let mut state = self.gate.write();
        filter.check(&state.schema)?;

        let pk_field = state.schema.primary_key().to_string();
        let victims: Vec<_> = matching_records(&state, Some(filter))
            .into_iter()
            .filter_map(|record| record.get(&pk_field).cloned())
            .collect();

        for pk in &victims {
            let frame = Frame::delete(pk)?;
            state.segment.append(&frame)?;
        }
        if self.config.sync_on_write {
            state.segment.sync()?;
        }
        for pk in &victims {
            state.index.remove(pk);
        }

        let compact_due = should_compact(&self.config, &state);
        drop(state);
        if compact_due {
            self.auto_compact();
        }
        Ok(victims.len())
    }

    /// Rewrites the log segment as a snapshot of the live set.
    ///
    /// The bulk rewrite happens with the gate released; only the snapshot,
    /// the tail catch-up, and the atomic rename hold it. See
    /// [`crate::compact`] internals for the phases.
    pub fn optimize(&self) -> EngineResult<()> {
        compact::compact(&self.gate, &self.live_path, &self.staging_path)?;
        Ok(())
    }

    /// Ratio-triggered compaction; failure leaves the old segment
    /// authoritative, so it is logged rather than surfaced to the caller
    /// whose mutation already committed.
    fn auto_compact(&self) {
        if let Err(e) = compact::compact(&self.gate, &self.live_path, &self.staging_path) {
            warn!(entity = %self.name, error = %e, "automatic compaction failed");
        }
    }
}

impl std::fmt::Debug for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entity")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Plans and evaluates a filter against the gated state.
fn matching_records(state: &EntityState, filter: Option<&Filter>) -> Vec<Record> {
    let passes = |record: &&Record| filter.map_or(true, |f| f.matches(record));
    match query::plan(filter, &state.schema, &state.index) {
        Plan::FullScan => state.index.scan().filter(passes).cloned().collect(),
        Plan::IndexSeed { pks, .. } => pks
            .iter()
            .filter_map(|pk| state.index.get(pk))
            .filter(passes)
            .cloned()
            .collect(),
    }
}

fn should_compact(config: &Config, state: &EntityState) -> bool {
    let frames = state.segment.frame_count();
    frames >= config.compact_min_frames
        && (state.index.len() as f64) < config.compact_live_ratio * frames as f64
}
