//! Record and value decoding.

use crate::error::{CodecError, CodecResult};
use crate::record::Record;
use crate::value::{Value, ValueKind};

/// Reads the version tag from an encoded record without decoding the body.
///
/// # Errors
///
/// Returns [`CodecError::Truncated`] when fewer than four bytes are present.
pub fn record_version(bytes: &[u8]) -> CodecResult<u32> {
    let tag: [u8; 4] = bytes
        .get(0..4)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| CodecError::truncated(0))?;
    Ok(u32::from_le_bytes(tag))
}

/// Decodes a record from its wire form.
///
/// # Errors
///
/// Returns a [`CodecError`] when the input is truncated, carries an unknown
/// kind tag, contains invalid UTF-8, or has bytes left over after the last
/// field.
pub fn decode_record(bytes: &[u8]) -> CodecResult<Record> {
    let mut reader = Reader::new(bytes);

    let version = reader.read_u32()?;
    let count = reader.read_u16()?;

    let mut record = Record::new();
    record.set_version(version);

    for _ in 0..count {
        let name_len = reader.read_u16()? as usize;
        let name = reader.read_str(name_len)?;
        let value = reader.read_value()?;
        record.set(name, value);
    }

    reader.finish()?;
    Ok(record)
}

/// Decodes a standalone value (kind tag followed by the value body).
///
/// # Errors
///
/// Returns a [`CodecError`] on truncation, unknown kind tags, invalid
/// UTF-8, or trailing bytes.
pub fn decode_value(bytes: &[u8]) -> CodecResult<Value> {
    let mut reader = Reader::new(bytes);
    let value = reader.read_value()?;
    reader.finish()?;
    Ok(value)
}

/// Bounds-checked cursor over an encoded payload.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, len: usize) -> CodecResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| CodecError::truncated(self.pos))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_u8(&mut self) -> CodecResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_u16(&mut self) -> CodecResult<u16> {
        let bytes: [u8; 2] = self.take(2)?.try_into().expect("length checked");
        Ok(u16::from_le_bytes(bytes))
    }

    fn read_u32(&mut self) -> CodecResult<u32> {
        let bytes: [u8; 4] = self.take(4)?.try_into().expect("length checked");
        Ok(u32::from_le_bytes(bytes))
    }

    fn read_u64(&mut self) -> CodecResult<u64> {
        let bytes: [u8; 8] = self.take(8)?.try_into().expect("length checked");
        Ok(u64::from_le_bytes(bytes))
    }

    fn read_str(&mut self, len: usize) -> CodecResult<String> {
        let offset = self.pos;
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_string)
            .map_err(|_| CodecError::InvalidUtf8 { offset })
    }

    fn read_value(&mut self) -> CodecResult<Value> {
        let tag = self.read_u8()?;
        let kind = ValueKind::from_byte(tag).ok_or(CodecError::UnknownKind { tag })?;
        match kind {
            ValueKind::Int => {
                let bytes: [u8; 8] = self.take(8)?.try_into().expect("length checked");
                Ok(Value::Int(i64::from_le_bytes(bytes)))
            }
            ValueKind::Float => Ok(Value::Float(f64::from_bits(self.read_u64()?))),
            ValueKind::Str => {
                let len = self.read_u32()? as usize;
                Ok(Value::Str(self.read_str(len)?))
            }
            ValueKind::Bool => Ok(Value::Bool(self.read_u8()? != 0)),
        }
    }

    fn finish(&self) -> CodecResult<()> {
        let remaining = self.data.len() - self.pos;
        if remaining != 0 {
            return Err(CodecError::TrailingBytes { count: remaining });
        }
        Ok(())
    }
}
