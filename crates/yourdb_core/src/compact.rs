//! Two-phase log compaction.
//!
//! Compaction rewrites an entity's segment as a snapshot of the live set,
//! shrinking the file without changing logical state. Because a live set
//! can be large, the bulk rewrite runs with the gate released:
//!
//! 1. Under the write gate: snapshot the live records and note the
//!    segment's frame count - the sequence boundary.
//! 2. Gate released: write the staging segment - a SNAPSHOT_MARK, then one
//!    INSERT frame per snapshotted record - and fsync it. Readers keep
//!    serving from the untouched index; writers keep appending to the old
//!    segment.
//! 3. Write gate reacquired: copy every frame with seq at or past the
//!    boundary from the old segment into the staging segment, fsync.
//! 4. Still under the gate: atomically rename the staging file over the
//!    live segment and swap the in-memory handle.
//!
//! Any failure before the rename discards the staging file; the old
//! segment remains authoritative.

use crate::entity::EntityState;
use crate::error::EngineResult;
use crate::gate::Gate;
use crate::log::{Frame, LogSegment};
use std::path::Path;
use tracing::info;
use yourdb_codec::Record;

/// Outcome of one compaction run.
#[derive(Debug)]
pub(crate) struct CompactionStats {
    /// Frames in the old segment when it was retired.
    pub(crate) frames_before: u64,
    /// Frames in the compacted segment.
    pub(crate) frames_after: u64,
    /// Live records snapshotted.
    pub(crate) live: usize,
}

/// Runs the two-phase compaction against an entity's gate and paths.
pub(crate) fn compact(
    gate: &Gate<EntityState>,
    live_path: &Path,
    staging_path: &Path,
) -> EngineResult<CompactionStats> {
    // Phase 1: snapshot under the gate.
    let (snapshot, boundary) = {
        let state = gate.write();
        let snapshot: Vec<Record> = state.index.scan().cloned().collect();
        (snapshot, state.segment.frame_count())
    };

    // Phases 2-4; the staging file must not outlive a failure.
    let result = run_phases(gate, live_path, staging_path, &snapshot, boundary);
    if result.is_err() {
        let _ = std::fs::remove_file(staging_path);
    }
    let stats = result?;

    info!(
        frames_before = stats.frames_before,
        frames_after = stats.frames_after,
        live = stats.live,
        "compacted log segment"
    );
    Ok(stats)
}

fn run_phases(
    gate: &Gate<EntityState>,
    live_path: &Path,
    staging_path: &Path,
    snapshot: &[Record],
    boundary: u64,
) -> EngineResult<CompactionStats> {
    // Phase 2: bulk rewrite outside the gate.
    let mut staging = LogSegment::create(staging_path)?;
    staging.append(&Frame::SnapshotMark)?;
    for record in snapshot {
        let frame = Frame::insert(record)?;
        staging.append(&frame)?;
    }
    staging.sync()?;

    // Phase 3: catch up on frames appended since the snapshot boundary.
    let mut state = gate.write();
    let frames_before = state.segment.frame_count();
    for item in state.segment.iter()? {
        let (seq, frame) = item?;
        if seq >= boundary {
            staging.append(&frame)?;
        }
    }
    staging.sync()?;

    // Phase 4: atomic handoff.
    let promoted = staging.persist_over(live_path)?;
    let frames_after = promoted.frame_count();
    state.segment = promoted;

    Ok(CompactionStats {
        frames_before,
        frames_after,
        live: snapshot.len(),
    })
}
