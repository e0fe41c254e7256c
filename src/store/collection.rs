//! In-memory collection snapshots and the flat matrix they carry.
//!
//! A `Collection` is a fully-loaded, immutable view of one on-disk
//! collection: aligned ids, row-major matrix, and per-row metadata. Reads
//! load everything up front, so a concurrent version swap on disk never
//! affects a collection already in hand.

use serde::de::DeserializeOwned;

use crate::embedding::{dot, l2_norm, normalize_in_place};
use crate::store::StoreError;

/// Row-norm tolerance for the pre-normalized invariant.
pub const NORM_TOLERANCE: f32 = 1e-5;

/// Dense row-major f32 matrix with a fixed row width.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    dim: usize,
    data: Vec<f32>,
}

impl Matrix {
    pub fn new(dim: usize) -> Self {
        Self { dim, data: Vec::new() }
    }

    pub fn with_capacity(dim: usize, rows: usize) -> Self {
        Self {
            dim,
            data: Vec::with_capacity(dim * rows),
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn rows(&self) -> usize {
        if self.dim == 0 {
            0
        } else {
            self.data.len() / self.dim
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn push_row(&mut self, row: &[f32]) -> Result<(), StoreError> {
        if row.len() != self.dim {
            return Err(StoreError::DimensionMismatch {
                expected: self.dim,
                got: row.len(),
            });
        }
        self.data.extend_from_slice(row);
        Ok(())
    }

    pub fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.dim..(i + 1) * self.dim]
    }

    /// Serialize to little-endian f32, row-major.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.data.len() * 4);
        for x in &self.data {
            out.extend_from_slice(&x.to_le_bytes());
        }
        out
    }

    /// Parse little-endian f32 bytes into a matrix of the given shape.
    pub fn from_le_bytes(bytes: &[u8], dim: usize, rows: usize) -> Result<Self, StoreError> {
        let expected = dim * rows * 4;
        if bytes.len() != expected {
            return Err(StoreError::InvalidFormat(format!(
                "matrix is {} bytes, manifest implies {}",
                bytes.len(),
                expected
            )));
        }
        let mut data = Vec::with_capacity(dim * rows);
        for chunk in bytes.chunks_exact(4) {
            data.push(f32::from_le_bytes(chunk.try_into().expect("chunk of 4")));
        }
        Ok(Self { dim, data })
    }

    /// Check every row has unit L2 norm within tolerance.
    pub fn rows_normalized(&self) -> bool {
        (0..self.rows()).all(|i| (l2_norm(self.row(i)) - 1.0).abs() <= NORM_TOLERANCE)
    }
}

/// A loaded collection: ids, matrix, and metadata are row-aligned.
#[derive(Debug, Clone)]
pub struct Collection<I, M> {
    pub ids: Vec<I>,
    pub matrix: Matrix,
    pub metadata: Vec<M>,
    pub manifest: crate::store::Manifest,
}

impl<I, M> Collection<I, M>
where
    I: Clone + Ord,
{
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Row index of an id, if present.
    pub fn position(&self, id: &I) -> Option<usize> {
        self.ids.iter().position(|x| x == id)
    }

    /// Vector for an id, if present.
    pub fn vector(&self, id: &I) -> Option<&[f32]> {
        self.position(id).map(|i| self.matrix.row(i))
    }

    /// Metadata for an id, if present.
    pub fn meta(&self, id: &I) -> Option<&M> {
        self.position(id).and_then(|i| self.metadata.get(i))
    }

    /// Cosine top-k search over the collection.
    ///
    /// Rows are pre-normalized at build time; the query is normalized
    /// here, so the score is a plain dot product. `filter` sees each
    /// row's id and metadata and keeps or drops it before ranking.
    /// Results are ordered by score descending, ties by ascending id.
    /// Fewer than `k` results only when the filter exhausts candidates.
    pub fn search<F>(&self, query: &[f32], k: usize, filter: F) -> Result<Vec<(I, f32)>, StoreError>
    where
        F: Fn(&I, &M) -> bool,
    {
        if query.len() != self.matrix.dim() {
            return Err(StoreError::DimensionMismatch {
                expected: self.matrix.dim(),
                got: query.len(),
            });
        }
        if l2_norm(query) < f32::EPSILON {
            return Err(StoreError::ZeroNormQuery);
        }

        let mut q = query.to_vec();
        normalize_in_place(&mut q);

        let mut scored: Vec<(I, f32)> = Vec::new();
        for i in 0..self.len() {
            let id = &self.ids[i];
            let meta = &self.metadata[i];
            if !filter(id, meta) {
                continue;
            }
            scored.push((id.clone(), dot(&q, self.matrix.row(i))));
        }

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(k);
        Ok(scored)
    }
}

/// Parse and align the three data files of a collection that carries a
/// metadata sidecar.
pub fn assemble<I, M>(
    manifest: crate::store::Manifest,
    ids_json: &[u8],
    matrix_bytes: &[u8],
    metadata_json: &[u8],
) -> Result<Collection<I, M>, StoreError>
where
    I: DeserializeOwned,
    M: DeserializeOwned,
{
    let ids: Vec<I> = serde_json::from_slice(ids_json)
        .map_err(|e| StoreError::InvalidFormat(format!("ids.json: {e}")))?;
    let metadata: Vec<M> = serde_json::from_slice(metadata_json)
        .map_err(|e| StoreError::InvalidFormat(format!("metadata.json: {e}")))?;

    let matrix = Matrix::from_le_bytes(matrix_bytes, manifest.dim, manifest.rows)?;

    if ids.len() != manifest.rows || metadata.len() != manifest.rows {
        return Err(StoreError::InvalidFormat(format!(
            "row alignment broken: manifest {} rows, {} ids, {} metadata",
            manifest.rows,
            ids.len(),
            metadata.len()
        )));
    }

    Ok(Collection {
        ids,
        matrix,
        metadata,
        manifest,
    })
}
