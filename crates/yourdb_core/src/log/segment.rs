//! Append-only log segment files.
//!
//! A segment is the framed operation history of one entity. Appends go to
//! the end of the file; durability comes from an explicit [`LogSegment::sync`]
//! (flush then fsync), which the engine calls once per mutation batch.
//!
//! ## Recovery policy
//!
//! Distinguishes tolerated conditions (crash mid-write) from fatal ones
//! (corruption):
//!
//! - **Tolerated**: a trailing frame whose header or payload is cut short.
//!   It was never acknowledged, so it is dropped - iteration stops before
//!   it and open truncates it away.
//! - **Fatal**: a zero-length frame or unknown op tag anywhere before the
//!   tail. That is data corruption, and opening the entity fails rather
//!   than silently losing acknowledged history.

use crate::error::{EngineError, EngineResult};
use crate::log::frame::Frame;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

/// An append-only segment file.
///
/// Appends are serialized by the entity gate; the segment itself does no
/// locking.
#[derive(Debug)]
pub(crate) struct LogSegment {
    path: PathBuf,
    file: File,
    frame_count: u64,
    write_pos: u64,
}

impl LogSegment {
    /// Opens a segment, creating it when absent.
    ///
    /// Scans the existing frames to recover the frame count and the write
    /// position. A truncated tail is dropped; a corrupt frame before the
    /// tail fails the open.
    pub(crate) fn open(path: &Path) -> EngineResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let file_len = file.metadata()?.len();
        let (frame_count, write_pos) = scan(path, file_len)?;

        if write_pos < file_len {
            warn!(
                path = %path.display(),
                dropped = file_len - write_pos,
                "dropping truncated tail frame"
            );
            file.set_len(write_pos)?;
            file.sync_all()?;
        }

        Ok(Self {
            path: path.to_path_buf(),
            file,
            frame_count,
            write_pos,
        })
    }

    /// Creates an empty segment, truncating any existing file.
    pub(crate) fn create(path: &Path) -> EngineResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            frame_count: 0,
            write_pos: 0,
        })
    }

    /// Appends a frame, returning its sequence number (its ordinal within
    /// this segment).
    ///
    /// The bytes reach the OS before this returns; durability requires a
    /// following [`Self::sync`].
    pub(crate) fn append(&mut self, frame: &Frame) -> EngineResult<u64> {
        let bytes = frame.encode();
        self.file.seek(SeekFrom::Start(self.write_pos))?;
        self.file.write_all(&bytes)?;
        self.write_pos += bytes.len() as u64;
        let seq = self.frame_count;
        self.frame_count += 1;
        Ok(seq)
    }

    /// Flushes and fsyncs the segment.
    pub(crate) fn sync(&mut self) -> EngineResult<()> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }

    /// Streams `(seq, frame)` pairs from the start of the segment.
    ///
    /// Uses an independent read handle, so iteration does not disturb the
    /// write position.
    pub(crate) fn iter(&self) -> EngineResult<FrameIter> {
        FrameIter::open(&self.path, self.write_pos)
    }

    /// Number of complete frames in the segment.
    pub(crate) fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Path of the backing file.
    #[cfg(test)]
    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Atomically renames this segment over `target`, consuming and
    /// returning self rebound to the new path.
    ///
    /// Used by the compactor to promote a staging segment. The parent
    /// directory is fsynced so the rename survives a crash.
    pub(crate) fn persist_over(mut self, target: &Path) -> EngineResult<Self> {
        std::fs::rename(&self.path, target)?;
        if let Some(parent) = target.parent() {
            super::sync_dir(parent)?;
        }
        self.path = target.to_path_buf();
        Ok(self)
    }
}

/// Scans frames to find the count and end offset of the complete prefix.
fn scan(path: &Path, file_len: u64) -> EngineResult<(u64, u64)> {
    let mut iter = FrameIter::open(path, file_len)?;
    for frame in &mut iter {
        frame?;
    }
    Ok((iter.seq, iter.offset))
}

/// Streaming iterator over the frames of a segment file.
pub(crate) struct FrameIter {
    reader: BufReader<File>,
    /// Bytes available to read; nothing past this offset is examined.
    limit: u64,
    /// End offset of the last complete frame.
    offset: u64,
    /// Sequence number of the next frame.
    seq: u64,
    finished: bool,
}

impl FrameIter {
    fn open(path: &Path, limit: u64) -> EngineResult<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(Self {
            reader,
            limit,
            offset: 0,
            seq: 0,
            finished: false,
        })
    }

    fn read_next(&mut self) -> EngineResult<Option<(u64, Frame)>> {
        if self.finished {
            return Ok(None);
        }

        // Header: 4-byte length prefix. A short read here is a tail cut
        // between frames or mid-header.
        if self.offset + 4 > self.limit {
            self.finished = true;
            return Ok(None);
        }
        let mut len_bytes = [0u8; 4];
        if let Err(e) = self.reader.read_exact(&mut len_bytes) {
            if e.kind() == ErrorKind::UnexpectedEof {
                self.finished = true;
                return Ok(None);
            }
            return Err(e.into());
        }
        let length = u64::from(u32::from_le_bytes(len_bytes));

        if length == 0 {
            self.finished = true;
            return Err(EngineError::corrupt_frame(self.seq, "zero-length frame"));
        }

        // Body: op byte plus payload. A short body is a tail cut mid-frame.
        if self.offset + 4 + length > self.limit {
            self.finished = true;
            return Ok(None);
        }
        let mut body = vec![0u8; length as usize];
        if let Err(e) = self.reader.read_exact(&mut body) {
            if e.kind() == ErrorKind::UnexpectedEof {
                self.finished = true;
                return Ok(None);
            }
            return Err(e.into());
        }

        let op = body[0];
        let payload = body.split_off(1);
        let frame = Frame::from_parts(op, payload).ok_or_else(|| {
            self.finished = true;
            EngineError::corrupt_frame(self.seq, format!("unknown op tag {op:#04x}"))
        })?;

        self.offset += 4 + length;
        let seq = self.seq;
        self.seq += 1;
        Ok(Some((seq, frame)))
    }
}

impl Iterator for FrameIter {
    type Item = EngineResult<(u64, Frame)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_next().transpose()
    }
}
