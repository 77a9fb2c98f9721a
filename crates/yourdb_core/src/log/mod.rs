//! The append-only log: frame format and segment files.

mod frame;
mod segment;

pub(crate) use frame::{Frame, OpTag};
pub(crate) use segment::LogSegment;

use crate::error::EngineResult;
use std::path::Path;

/// Fsyncs a directory so entries created, renamed, or removed inside it
/// survive a crash.
#[cfg(unix)]
pub(crate) fn sync_dir(dir: &Path) -> EngineResult<()> {
    let handle = std::fs::File::open(dir)?;
    handle.sync_all()?;
    Ok(())
}

/// On non-Unix platforms the filesystem journal covers metadata updates;
/// directory fsync is not available.
#[cfg(not(unix))]
pub(crate) fn sync_dir(_dir: &Path) -> EngineResult<()> {
    Ok(())
}
