//! Exact (flat) L2 nearest-neighbour index over clause embeddings.
//!
//! Row `i` of the index is the embedding of the clause at position `i`.
//!
//! Binary layout (little-endian):
//!
//! | field        | size                 |
//! |--------------|----------------------|
//! | magic `CLIX` | 4                    |
//! | version      | u16                  |
//! | dimensions   | u32                  |
//! | rows         | u32                  |
//! | model length | u32                  |
//! | model name   | model length (UTF-8) |
//! | vectors      | rows × dims × f32    |
//! | sha256       | 32 (of all preceding)|

use sha2::{Digest, Sha256};

use super::types::SearchHit;
use crate::error::{RagError, Result};

const MAGIC: &[u8; 4] = b"CLIX";
const FORMAT_VERSION: u16 = 1;
const CHECKSUM_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq)]
pub struct FlatIndex {
    model: String,
    dimensions: usize,
    data: Vec<f32>,
}

impl FlatIndex {
    pub fn new(model: &str, dimensions: usize) -> Self {
        Self {
            model: model.to_string(),
            dimensions,
            data: Vec::new(),
        }
    }

    /// Build an index from embeddings in clause order.
    pub fn build(model: &str, dimensions: usize, embeddings: Vec<Vec<f32>>) -> Result<Self> {
        let mut index = Self::new(model, dimensions);
        index.data.reserve(embeddings.len() * dimensions);
        for vector in embeddings {
            index.add(&vector)?;
        }
        Ok(index)
    }

    pub fn add(&mut self, vector: &[f32]) -> Result<()> {
        if self.dimensions == 0 || vector.len() != self.dimensions {
            return Err(RagError::DimensionMismatch {
                expected: self.dimensions,
                actual: vector.len(),
            });
        }
        self.data.extend_from_slice(vector);
        Ok(())
    }

    pub fn len(&self) -> usize {
        if self.dimensions == 0 {
            0
        } else {
            self.data.len() / self.dimensions
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Embedding model the vectors were produced with.
    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn vector(&self, position: usize) -> Option<&[f32]> {
        let start = position.checked_mul(self.dimensions)?;
        self.data.get(start..start + self.dimensions)
    }

    /// Exact k-nearest-neighbour search.
    ///
    /// Results are ordered by ascending distance, ties by ascending position.
    /// `k` larger than the index is clamped; an empty index yields no hits.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        if self.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        if query.len() != self.dimensions {
            return Err(RagError::DimensionMismatch {
                expected: self.dimensions,
                actual: query.len(),
            });
        }

        let mut hits: Vec<SearchHit> = self
            .data
            .chunks_exact(self.dimensions)
            .enumerate()
            .map(|(position, row)| SearchHit {
                position,
                distance: squared_l2(query, row),
            })
            .collect();

        hits.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then(a.position.cmp(&b.position))
        });
        hits.truncate(k.min(self.len()));
        Ok(hits)
    }

    pub fn serialize(&self) -> Vec<u8> {
        let model = self.model.as_bytes();
        let mut bytes =
            Vec::with_capacity(18 + model.len() + self.data.len() * 4 + CHECKSUM_LEN);

        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&(self.dimensions as u32).to_le_bytes());
        bytes.extend_from_slice(&(self.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&(model.len() as u32).to_le_bytes());
        bytes.extend_from_slice(model);
        for value in &self.data {
            bytes.extend_from_slice(&value.to_le_bytes());
        }

        let checksum = Sha256::digest(&bytes);
        bytes.extend_from_slice(&checksum);
        bytes
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < MAGIC.len() + CHECKSUM_LEN {
            return Err(corrupt("buffer too short"));
        }
        let (body, checksum) = bytes.split_at(bytes.len() - CHECKSUM_LEN);
        if Sha256::digest(body).as_slice() != checksum {
            return Err(corrupt("checksum mismatch"));
        }

        let mut reader = ByteReader::new(body);
        if reader.take(MAGIC.len())? != MAGIC {
            return Err(corrupt("bad magic"));
        }
        let version = reader.read_u16()?;
        if version != FORMAT_VERSION {
            return Err(corrupt(&format!("unsupported format version {}", version)));
        }
        let dimensions = reader.read_u32()? as usize;
        let rows = reader.read_u32()? as usize;
        let model_len = reader.read_u32()? as usize;
        let model = std::str::from_utf8(reader.take(model_len)?)
            .map_err(|_| corrupt("model name is not UTF-8"))?
            .to_string();

        if rows > 0 && dimensions == 0 {
            return Err(corrupt("rows present with zero dimensions"));
        }
        let values = rows
            .checked_mul(dimensions)
            .ok_or_else(|| corrupt("row count overflow"))?;
        let raw = reader.take(
            values
                .checked_mul(4)
                .ok_or_else(|| corrupt("row count overflow"))?,
        )?;
        if !reader.is_exhausted() {
            return Err(corrupt("trailing bytes"));
        }

        let data = raw
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();

        Ok(Self {
            model,
            dimensions,
            data,
        })
    }
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

fn corrupt(message: &str) -> RagError {
    RagError::IndexCorrupt(message.to_string())
}

struct ByteReader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> ByteReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| corrupt("unexpected end of data"))?;
        let slice = &self.bytes[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn read_u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn read_u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn is_exhausted(&self) -> bool {
        self.offset == self.bytes.len()
    }
}
