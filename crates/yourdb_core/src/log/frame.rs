//! Log frame types and serialization.
//!
//! One frame on the wire is `[length: u32 LE][op: u8][payload]` where
//! `length` counts the op byte plus the payload.

use crate::error::{EngineError, EngineResult};
use yourdb_codec::{encode_record, encode_value, CodecError, Record, Value};

/// Operation tag of a log frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum OpTag {
    /// Install a record (also replaces under a live pk during replay).
    Insert = 0x01,
    /// Remove the record under a pk.
    Delete = 0x02,
    /// First frame of a compacted segment: no history precedes.
    SnapshotMark = 0x03,
}

impl OpTag {
    /// Converts a byte to an op tag.
    pub(crate) fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(Self::Insert),
            0x02 => Some(Self::Delete),
            0x03 => Some(Self::SnapshotMark),
            _ => None,
        }
    }

    /// Converts the op tag to its wire byte.
    pub(crate) const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// One framed operation in a log segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Frame {
    /// An encoded record, version tag included.
    Insert(Vec<u8>),
    /// An encoded primary-key value.
    Delete(Vec<u8>),
    /// Payload-less compaction boundary.
    SnapshotMark,
}

impl Frame {
    /// Builds an INSERT frame from a record.
    pub(crate) fn insert(record: &Record) -> EngineResult<Self> {
        let payload = encode_record(record)?;
        if payload.len() >= u32::MAX as usize {
            return Err(EngineError::Codec(CodecError::Oversized {
                what: "frame payload",
            }));
        }
        Ok(Self::Insert(payload))
    }

    /// Builds a DELETE frame from a primary-key value.
    pub(crate) fn delete(pk: &Value) -> EngineResult<Self> {
        Ok(Self::Delete(encode_value(pk)?))
    }

    /// The frame's operation tag.
    pub(crate) fn op(&self) -> OpTag {
        match self {
            Self::Insert(_) => OpTag::Insert,
            Self::Delete(_) => OpTag::Delete,
            Self::SnapshotMark => OpTag::SnapshotMark,
        }
    }

    /// Reassembles a frame from its op byte and payload.
    ///
    /// Returns `None` for an unknown op tag; the caller decides whether
    /// that is a corrupt frame or a format from the future.
    pub(crate) fn from_parts(op: u8, payload: Vec<u8>) -> Option<Self> {
        match OpTag::from_byte(op)? {
            OpTag::Insert => Some(Self::Insert(payload)),
            OpTag::Delete => Some(Self::Delete(payload)),
            OpTag::SnapshotMark => Some(Self::SnapshotMark),
        }
    }

    /// Serializes the frame to its wire form.
    pub(crate) fn encode(&self) -> Vec<u8> {
        let payload: &[u8] = match self {
            Self::Insert(p) | Self::Delete(p) => p,
            Self::SnapshotMark => &[],
        };
        debug_assert!(payload.len() < u32::MAX as usize);

        let length = payload.len() as u32 + 1;
        let mut buf = Vec::with_capacity(4 + length as usize);
        buf.extend_from_slice(&length.to_le_bytes());
        buf.push(self.op().as_byte());
        buf.extend_from_slice(payload);
        buf
    }
}
