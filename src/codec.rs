//! Little-endian dataset tables: a `u32` count followed by fixed or length-prefixed records.

use serde::{Deserialize, Serialize};

use crate::error::FeatureError;

const U32_LEN: usize = 4;
const PAIR_LEN: usize = 8;

/// What the sparse decoder does with a `cell_index >= cell_count`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexPolicy {
    #[default]
    Reject,
    Skip,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SparseDecode {
    pub values: Vec<f32>,
    /// Entries dropped under [`IndexPolicy::Skip`].
    pub skipped: usize,
}

struct ByteReader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> ByteReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.offset
    }

    fn take(&mut self, len: usize, what: &str) -> Result<&'a [u8], FeatureError> {
        if self.remaining() < len {
            return Err(FeatureError::malformed(
                self.offset,
                format!("{len} bytes for {what}, found {}", self.remaining()),
            ));
        }
        let slice = &self.bytes[self.offset..self.offset + len];
        self.offset += len;
        Ok(slice)
    }

    fn read_u32(&mut self, what: &str) -> Result<u32, FeatureError> {
        let raw = self.take(U32_LEN, what)?;
        Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    fn read_f32(&mut self, what: &str) -> Result<f32, FeatureError> {
        let raw = self.take(U32_LEN, what)?;
        Ok(f32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    // The remaining buffer must hold `count` records of at least `min_record_len` bytes.
    fn read_count(&mut self, min_record_len: usize, what: &str) -> Result<usize, FeatureError> {
        let count = self.read_u32(&format!("{what} count header"))? as usize;
        let needed = count.saturating_mul(min_record_len);
        if needed > self.remaining() {
            return Err(FeatureError::malformed(
                self.offset,
                format!(
                    "{count} {what} entries ({needed} bytes), found {} bytes",
                    self.remaining()
                ),
            ));
        }
        Ok(count)
    }

    fn finish(self) -> Result<(), FeatureError> {
        if self.remaining() != 0 {
            return Err(FeatureError::malformed(
                self.offset,
                format!("end of buffer, found {} trailing bytes", self.remaining()),
            ));
        }
        Ok(())
    }
}

pub fn decode_string_table(bytes: &[u8]) -> Result<Vec<String>, FeatureError> {
    let mut reader = ByteReader::new(bytes);
    let count = reader.read_count(U32_LEN, "string")?;
    let mut strings = Vec::with_capacity(count);
    for _ in 0..count {
        let len = reader.read_u32("string length")? as usize;
        let start = reader.offset;
        let raw = reader.take(len, "string bytes")?;
        let value = std::str::from_utf8(raw).map_err(|err| {
            FeatureError::malformed(start + err.valid_up_to(), "valid UTF-8 string")
        })?;
        strings.push(value.to_string());
    }
    reader.finish()?;
    Ok(strings)
}

pub fn decode_coordinates(bytes: &[u8]) -> Result<Vec<(f32, f32)>, FeatureError> {
    let mut reader = ByteReader::new(bytes);
    let count = reader.read_count(PAIR_LEN, "coordinate")?;
    let mut coords = Vec::with_capacity(count);
    for _ in 0..count {
        let x = reader.read_f32("x coordinate")?;
        let y = reader.read_f32("y coordinate")?;
        coords.push((x, y));
    }
    reader.finish()?;
    Ok(coords)
}

/// A later pair for the same index overwrites an earlier one.
pub fn decode_sparse_vector(
    bytes: &[u8],
    cell_count: usize,
    policy: IndexPolicy,
) -> Result<SparseDecode, FeatureError> {
    let mut reader = ByteReader::new(bytes);
    let count = reader.read_count(PAIR_LEN, "sparse")?;
    let mut values = vec![0.0_f32; cell_count];
    let mut skipped = 0;
    for _ in 0..count {
        let entry_offset = reader.offset;
        let index = reader.read_u32("cell index")? as usize;
        let value = reader.read_f32("value")?;
        match values.get_mut(index) {
            Some(slot) => *slot = value,
            None => match policy {
                IndexPolicy::Reject => {
                    return Err(FeatureError::malformed(
                        entry_offset,
                        format!("cell index < {cell_count}, found {index}"),
                    ));
                }
                IndexPolicy::Skip => skipped += 1,
            },
        }
    }
    reader.finish()?;
    Ok(SparseDecode { values, skipped })
}

pub fn encode_string_table<S: AsRef<str>>(values: &[S]) -> Vec<u8> {
    let payload: usize = values.iter().map(|v| U32_LEN + v.as_ref().len()).sum();
    let mut out = Vec::with_capacity(U32_LEN + payload);
    out.extend_from_slice(&(values.len() as u32).to_le_bytes());
    for value in values {
        let raw = value.as_ref().as_bytes();
        out.extend_from_slice(&(raw.len() as u32).to_le_bytes());
        out.extend_from_slice(raw);
    }
    out
}

pub fn encode_coordinates(coords: &[(f32, f32)]) -> Vec<u8> {
    let mut out = Vec::with_capacity(U32_LEN + coords.len() * PAIR_LEN);
    out.extend_from_slice(&(coords.len() as u32).to_le_bytes());
    for (x, y) in coords {
        out.extend_from_slice(&x.to_le_bytes());
        out.extend_from_slice(&y.to_le_bytes());
    }
    out
}

pub fn encode_sparse_vector(entries: &[(u32, f32)]) -> Vec<u8> {
    let mut out = Vec::with_capacity(U32_LEN + entries.len() * PAIR_LEN);
    out.extend_from_slice(&(entries.len() as u32).to_le_bytes());
    for (index, value) in entries {
        out.extend_from_slice(&index.to_le_bytes());
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

pub fn sparse_entries(dense: &[f32]) -> Vec<(u32, f32)> {
    dense
        .iter()
        .enumerate()
        .filter(|(_, value)| **value != 0.0)
        .map(|(index, value)| (index as u32, *value))
        .collect()
}
