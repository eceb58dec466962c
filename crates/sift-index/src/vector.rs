//! Exhaustive inner-product index over fixed-dimension `f32` vectors.
//!
//! Binary layout (little endian): `SIFTIDX1` magic, `u32` dimension,
//! `u64` vector count, then `count * dim` raw `f32` values in slot order.

use std::cmp::Ordering;
use std::path::Path;

use crate::error::{IndexError, Result};

const MAGIC: &[u8; 8] = b"SIFTIDX1";
const HEADER_LEN: usize = 8 + 4 + 8;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchResult {
    pub slot: usize,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FlatIndex {
    dim: usize,
    data: Vec<f32>,
}

impl FlatIndex {
    /// # Errors
    ///
    /// Returns `InvalidDimension` if `dim` is zero.
    pub fn new(dim: usize) -> Result<Self> {
        if dim == 0 {
            return Err(IndexError::InvalidDimension);
        }
        Ok(Self {
            dim,
            data: Vec::new(),
        })
    }

    /// Build an index from vectors; slot `i` holds `vectors[i]`.
    ///
    /// # Errors
    ///
    /// Returns `DimensionMismatch` if any vector is not `dim` long.
    pub fn build(dim: usize, vectors: &[Vec<f32>]) -> Result<Self> {
        let mut index = Self::new(dim)?;
        index.data.reserve(dim * vectors.len());
        for vector in vectors {
            index.add(vector)?;
        }
        Ok(index)
    }

    /// Append a vector and return its slot.
    ///
    /// # Errors
    ///
    /// Returns `DimensionMismatch` if the vector length differs from the index dimension.
    pub fn add(&mut self, vector: &[f32]) -> Result<usize> {
        self.check_dim(vector.len())?;
        self.data.extend_from_slice(vector);
        Ok(self.len() - 1)
    }

    #[must_use]
    pub fn dim(&self) -> usize {
        self.dim
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len() / self.dim
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[must_use]
    pub fn vector(&self, slot: usize) -> Option<&[f32]> {
        let start = slot.checked_mul(self.dim)?;
        self.data.get(start..start + self.dim)
    }

    /// Top `k` slots by inner product, best first. Equal scores are ordered by
    /// ascending slot; NaN scores rank last.
    ///
    /// # Errors
    ///
    /// Returns `DimensionMismatch` if the query length differs from the index dimension.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchResult>> {
        self.check_dim(query.len())?;
        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<SearchResult> = self
            .data
            .chunks_exact(self.dim)
            .enumerate()
            .map(|(slot, v)| SearchResult {
                slot,
                score: dot(query, v),
            })
            .collect();

        if k < scored.len() {
            scored.select_nth_unstable_by(k - 1, rank);
            scored.truncate(k);
        }
        scored.sort_by(rank);
        Ok(scored)
    }

    fn check_dim(&self, got: usize) -> Result<()> {
        if got == self.dim {
            Ok(())
        } else {
            Err(IndexError::DimensionMismatch {
                expected: self.dim,
                got,
            })
        }
    }

    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.data.len() * 4);
        out.extend_from_slice(MAGIC);
        #[allow(clippy::cast_possible_truncation)]
        out.extend_from_slice(&(self.dim as u32).to_le_bytes());
        out.extend_from_slice(&(self.len() as u64).to_le_bytes());
        for value in &self.data {
            out.extend_from_slice(&value.to_le_bytes());
        }
        out
    }

    /// # Errors
    ///
    /// Returns `Corrupt` on a bad magic, truncated payload or trailing bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN || &bytes[..8] != MAGIC {
            return Err(IndexError::Corrupt("index header is missing or invalid".into()));
        }
        let dim = u32::from_le_bytes(read_array(&bytes[8..12])) as usize;
        let count = usize::try_from(u64::from_le_bytes(read_array(&bytes[12..20])))
            .map_err(|_| IndexError::Corrupt("vector count overflows".into()))?;
        if dim == 0 {
            return Err(IndexError::Corrupt("index dimension is zero".into()));
        }

        let expected = count
            .checked_mul(dim)
            .and_then(|n| n.checked_mul(4))
            .ok_or_else(|| IndexError::Corrupt("index size overflows".into()))?;
        let payload = &bytes[HEADER_LEN..];
        if payload.len() != expected {
            return Err(IndexError::Corrupt(format!(
                "expected {expected} payload bytes for {count}x{dim}, found {}",
                payload.len()
            )));
        }

        let data = payload
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes(read_array(b)))
            .collect();
        Ok(Self { dim, data })
    }

    /// Write the index to `path` through a temporary sibling and a rename.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        crate::persist::write_atomic(path, &self.to_bytes())
    }

    /// # Errors
    ///
    /// Returns an IO error if the file cannot be read, or `Corrupt` if it is malformed.
    pub fn load(path: &Path) -> Result<Self> {
        Self::from_bytes(&std::fs::read(path)?)
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn rank(a: &SearchResult, b: &SearchResult) -> Ordering {
    let key = |s: f32| if s.is_nan() { f32::NEG_INFINITY } else { s };
    key(b.score)
        .total_cmp(&key(a.score))
        .then(a.slot.cmp(&b.slot))
}

fn read_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[..N]);
    out
}
