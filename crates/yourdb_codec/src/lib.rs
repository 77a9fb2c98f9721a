//! # YourDB Codec
//!
//! Scalar values, records, and their binary wire form for YourDB.
//!
//! This crate provides:
//! - [`Value`] - the four scalar kinds a record field may hold
//! - [`Record`] - an ordered field map carrying a schema version tag
//! - deterministic little-endian encoding of records and standalone values
//!
//! ## Encoding guarantees
//!
//! - Identical records produce identical bytes
//! - Encoding then decoding yields an equal record, version tag included
//! - The version tag sits at a fixed offset so it can be read without
//!   decoding the body ([`record_version`])
//! - Decoding validates bounds and UTF-8 and rejects trailing bytes;
//!   malformed input returns [`CodecError`], never panics
//!
//! ## Usage
//!
//! ```
//! use yourdb_codec::{decode_record, encode_record, Record, Value};
//!
//! let record = Record::new().with("id", 7).with("name", "ada");
//! let bytes = encode_record(&record).unwrap();
//! let decoded = decode_record(&bytes).unwrap();
//! assert_eq!(record, decoded);
//! assert_eq!(decoded.get("id"), Some(&Value::Int(7)));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod decoder;
mod encoder;
mod error;
mod record;
mod value;

pub use decoder::{decode_record, decode_value, record_version};
pub use encoder::{encode_record, encode_value};
pub use error::{CodecError, CodecResult};
pub use record::{Record, DEFAULT_VERSION};
pub use value::{Value, ValueKind};
