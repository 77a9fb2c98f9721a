//! Record and value encoding.

use crate::error::{CodecError, CodecResult};
use crate::record::Record;
use crate::value::Value;

/// Encodes a record to its wire form.
///
/// Layout (little-endian):
///
/// ```text
/// version: u32
/// field_count: u16
/// per field (in name order):
///   name_len: u16, name bytes
///   kind: u8
///   value body (i64 | f64 bits | u32 len + bytes | u8)
/// ```
///
/// The version tag occupies the first four bytes so it can be recovered
/// without decoding the body.
///
/// # Errors
///
/// Returns [`CodecError::Oversized`] when a field name exceeds `u16::MAX`
/// bytes, a string value exceeds `u32::MAX` bytes, or the record has more
/// than `u16::MAX` fields.
pub fn encode_record(record: &Record) -> CodecResult<Vec<u8>> {
    let mut buf = Vec::with_capacity(16 + record.len() * 16);

    buf.extend_from_slice(&record.version().to_le_bytes());

    let count = u16::try_from(record.len()).map_err(|_| CodecError::Oversized {
        what: "field count",
    })?;
    buf.extend_from_slice(&count.to_le_bytes());

    for (name, value) in record {
        let name_bytes = name.as_bytes();
        let name_len = u16::try_from(name_bytes.len()).map_err(|_| CodecError::Oversized {
            what: "field name",
        })?;
        buf.extend_from_slice(&name_len.to_le_bytes());
        buf.extend_from_slice(name_bytes);
        encode_value_into(value, &mut buf)?;
    }

    Ok(buf)
}

/// Encodes a standalone value (kind tag followed by the value body).
///
/// Used for primary-key payloads.
///
/// # Errors
///
/// Returns [`CodecError::Oversized`] for a string value exceeding
/// `u32::MAX` bytes.
pub fn encode_value(value: &Value) -> CodecResult<Vec<u8>> {
    let mut buf = Vec::with_capacity(16);
    encode_value_into(value, &mut buf)?;
    Ok(buf)
}

fn encode_value_into(value: &Value, buf: &mut Vec<u8>) -> CodecResult<()> {
    buf.push(value.kind().as_byte());
    match value {
        Value::Int(n) => buf.extend_from_slice(&n.to_le_bytes()),
        Value::Float(x) => buf.extend_from_slice(&x.to_bits().to_le_bytes()),
        Value::Str(s) => {
            let len = u32::try_from(s.len()).map_err(|_| CodecError::Oversized {
                what: "string value",
            })?;
            buf.extend_from_slice(&len.to_le_bytes());
            buf.extend_from_slice(s.as_bytes());
        }
        Value::Bool(b) => buf.push(u8::from(*b)),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_first_four_bytes() {
        let mut record = Record::new().with("id", 1);
        record.set_version(0x0102_0304);
        let bytes = encode_record(&record).unwrap();
        assert_eq!(&bytes[0..4], &0x0102_0304_u32.to_le_bytes());
    }

    #[test]
    fn int_value_layout() {
        let bytes = encode_value(&Value::Int(7)).unwrap();
        assert_eq!(bytes[0], 0x01);
        assert_eq!(&bytes[1..], &7_i64.to_le_bytes());
    }

    #[test]
    fn bool_value_layout() {
        assert_eq!(encode_value(&Value::Bool(true)).unwrap(), vec![0x04, 1]);
        assert_eq!(encode_value(&Value::Bool(false)).unwrap(), vec![0x04, 0]);
    }

    #[test]
    fn str_value_layout() {
        let bytes = encode_value(&Value::Str("ab".into())).unwrap();
        assert_eq!(bytes[0], 0x03);
        assert_eq!(&bytes[1..5], &2_u32.to_le_bytes());
        assert_eq!(&bytes[5..], b"ab");
    }

    #[test]
    fn empty_record_layout() {
        let bytes = encode_record(&Record::new()).unwrap();
        // version (4) + field count (2)
        assert_eq!(bytes.len(), 6);
        assert_eq!(&bytes[4..6], &0_u16.to_le_bytes());
    }
}
