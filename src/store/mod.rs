//! Durable, versioned vector collections.
//!
//! Layout under the store root:
//! - `events/{matrix.bin, ids.json, metadata.json, manifest.json}`
//! - `users/{matrix.bin, ids.json, metadata.json, manifest.json}`
//! - `user_sim/{matrix.bin, ids.json, manifest.json}`
//!
//! `matrix.bin` is little-endian f32, row-major. The manifest carries the
//! sha256 of the matrix bytes and is written last, so a collection is
//! either fully visible or not visible at all.
//!
//! Publication uses a staged directory swap: write everything into a
//! sibling `.tmp` directory, move the live directory aside, rename the
//! staged one into place, then unlink the old version. Readers load a
//! whole collection into memory before returning, so an in-flight search
//! is never affected by a swap (snapshot isolation).
//!
//! A set of collections that must move together goes through
//! [`VectorStore::begin_batch`]: the collections are staged into a
//! sibling store root and the entire root is swapped in one rename, so
//! readers never observe a mixed set.
//!
//! Many readers, one writer: the model builder is the only writer.

mod collection;
mod manifest;

pub use collection::{Collection, Matrix, NORM_TOLERANCE};
pub use manifest::{sha256_hex, Manifest, ALGORITHM, SCHEMA_VERSION};

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Errors that can occur during store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("collection '{0}' does not exist")]
    Missing(String),

    #[error("Invalid collection format: {0}")]
    InvalidFormat(String),

    #[error("Checksum mismatch in collection '{0}': store may be corrupted")]
    ChecksumMismatch(String),

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Cannot search with a zero-norm query vector")]
    ZeroNormQuery,

    #[error("Rows of '{0}' are not unit-normalized")]
    NotNormalized(String),
}

/// Lightweight collection facts from the manifest alone.
#[derive(Debug, Clone, Serialize)]
pub struct CollectionStat {
    pub name: String,
    pub rows: usize,
    pub dim: usize,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub algorithm: String,
}

/// Top-K neighbor table computed over the user matrix.
#[derive(Debug, Clone, Default)]
pub struct SimTable {
    /// user id -> (neighbor id, cosine score), best first
    pub neighbors: HashMap<String, Vec<(String, f32)>>,
}

impl SimTable {
    pub fn top_for(&self, user_id: &str) -> &[(String, f32)] {
        self.neighbors.get(user_id).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// File-backed store of named vector collections.
pub struct VectorStore {
    root: PathBuf,
}

impl VectorStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Check whether a published collection exists.
    pub fn exists(&self, name: &str) -> bool {
        self.dir(name).join("manifest.json").exists()
    }

    /// Read manifest facts without loading the matrix.
    pub fn stat(&self, name: &str) -> Result<CollectionStat, StoreError> {
        let manifest = self.read_manifest(name)?;
        Ok(CollectionStat {
            name: manifest.name,
            rows: manifest.rows,
            dim: manifest.dim,
            created_at: manifest.created_at,
            algorithm: manifest.algorithm,
        })
    }

    /// Write a collection with a metadata sidecar and publish atomically.
    ///
    /// Validates alignment and the unit-norm row invariant before any
    /// bytes touch disk. The previous version stays readable until the
    /// new manifest is in place, then is unlinked.
    pub fn write<I, M>(
        &self,
        name: &str,
        ids: &[I],
        matrix: &Matrix,
        metadata: &[M],
    ) -> Result<Manifest, StoreError>
    where
        I: Serialize,
        M: Serialize,
    {
        if ids.len() != matrix.rows() || metadata.len() != matrix.rows() {
            return Err(StoreError::InvalidFormat(format!(
                "row alignment broken: {} ids, {} matrix rows, {} metadata",
                ids.len(),
                matrix.rows(),
                metadata.len()
            )));
        }
        if !matrix.rows_normalized() {
            return Err(StoreError::NotNormalized(name.to_string()));
        }

        let matrix_bytes = matrix.to_le_bytes();
        let manifest = Manifest::new(name, matrix.dim(), matrix.rows(), &matrix_bytes);

        let files = vec![
            ("matrix.bin".to_string(), matrix_bytes),
            (
                "ids.json".to_string(),
                serde_json::to_vec(ids)
                    .map_err(|e| StoreError::InvalidFormat(format!("ids: {e}")))?,
            ),
            (
                "metadata.json".to_string(),
                serde_json::to_vec(metadata)
                    .map_err(|e| StoreError::InvalidFormat(format!("metadata: {e}")))?,
            ),
            (
                "manifest.json".to_string(),
                serde_json::to_vec_pretty(&manifest)
                    .map_err(|e| StoreError::InvalidFormat(format!("manifest: {e}")))?,
            ),
        ];
        self.publish(name, files)?;
        log::info!("published collection '{}' ({} rows)", name, matrix.rows());
        Ok(manifest)
    }

    /// Read a collection with its metadata sidecar, verifying the
    /// checksum and dimension against the manifest. Fails loudly on any
    /// mismatch.
    pub fn read<I, M>(&self, name: &str) -> Result<Collection<I, M>, StoreError>
    where
        I: DeserializeOwned,
        M: DeserializeOwned,
    {
        let manifest = self.read_manifest(name)?;
        let dir = self.dir(name);

        let matrix_bytes = std::fs::read(dir.join("matrix.bin"))?;
        if sha256_hex(&matrix_bytes) != manifest.sha256_hex {
            return Err(StoreError::ChecksumMismatch(name.to_string()));
        }

        let ids_json = std::fs::read(dir.join("ids.json"))?;
        let metadata_json = std::fs::read(dir.join("metadata.json"))?;
        collection::assemble(manifest, &ids_json, &matrix_bytes, &metadata_json)
    }

    /// Write the user-similarity table. No metadata sidecar: `ids.json`
    /// holds `[user_id, [neighbor ids...]]` pairs aligned to score rows.
    pub fn write_sim(&self, table: &SimTable, k: usize) -> Result<Manifest, StoreError> {
        let mut users: Vec<&String> = table.neighbors.keys().collect();
        users.sort();

        let width = users
            .iter()
            .map(|u| table.neighbors[*u].len().min(k))
            .max()
            .unwrap_or(0);

        let mut ids: Vec<(String, Vec<String>)> = Vec::with_capacity(users.len());
        let mut matrix = Matrix::with_capacity(width, users.len());
        for user in users {
            let top = &table.neighbors[user];
            let mut row = vec![0.0f32; width];
            let mut neighbor_ids = Vec::with_capacity(width);
            for (i, (nid, score)) in top.iter().take(width).enumerate() {
                row[i] = *score;
                neighbor_ids.push(nid.clone());
            }
            matrix.push_row(&row)?;
            ids.push((user.clone(), neighbor_ids));
        }

        let matrix_bytes = matrix.to_le_bytes();
        let manifest = Manifest::new("user_sim", width, ids.len(), &matrix_bytes);

        let files = vec![
            ("matrix.bin".to_string(), matrix_bytes),
            (
                "ids.json".to_string(),
                serde_json::to_vec(&ids)
                    .map_err(|e| StoreError::InvalidFormat(format!("ids: {e}")))?,
            ),
            (
                "manifest.json".to_string(),
                serde_json::to_vec_pretty(&manifest)
                    .map_err(|e| StoreError::InvalidFormat(format!("manifest: {e}")))?,
            ),
        ];
        self.publish("user_sim", files)?;
        log::info!("published collection 'user_sim' ({} rows)", ids.len());
        Ok(manifest)
    }

    /// Read the user-similarity table back into map form.
    pub fn read_sim(&self) -> Result<SimTable, StoreError> {
        let manifest = self.read_manifest("user_sim")?;
        let dir = self.dir("user_sim");

        let matrix_bytes = std::fs::read(dir.join("matrix.bin"))?;
        if sha256_hex(&matrix_bytes) != manifest.sha256_hex {
            return Err(StoreError::ChecksumMismatch("user_sim".to_string()));
        }
        let matrix = Matrix::from_le_bytes(&matrix_bytes, manifest.dim, manifest.rows)?;

        let ids_json = std::fs::read(dir.join("ids.json"))?;
        let ids: Vec<(String, Vec<String>)> = serde_json::from_slice(&ids_json)
            .map_err(|e| StoreError::InvalidFormat(format!("ids.json: {e}")))?;
        if ids.len() != manifest.rows {
            return Err(StoreError::InvalidFormat(format!(
                "user_sim alignment broken: manifest {} rows, {} id entries",
                manifest.rows,
                ids.len()
            )));
        }

        let mut neighbors = HashMap::with_capacity(ids.len());
        for (row, (user, neighbor_ids)) in ids.into_iter().enumerate() {
            let scores = matrix.row(row);
            let entry = neighbor_ids
                .into_iter()
                .enumerate()
                .map(|(i, nid)| (nid, scores[i]))
                .collect();
            neighbors.insert(user, entry);
        }
        Ok(SimTable { neighbors })
    }

    fn read_manifest(&self, name: &str) -> Result<Manifest, StoreError> {
        let path = self.dir(name).join("manifest.json");
        if !path.exists() {
            return Err(StoreError::Missing(name.to_string()));
        }
        let bytes = std::fs::read(&path)?;
        let manifest: Manifest = serde_json::from_slice(&bytes)
            .map_err(|e| StoreError::InvalidFormat(format!("manifest.json: {e}")))?;
        if manifest.schema_version > SCHEMA_VERSION {
            return Err(StoreError::InvalidFormat(format!(
                "schema version {} unsupported (this build reads up to {})",
                manifest.schema_version, SCHEMA_VERSION
            )));
        }
        Ok(manifest)
    }

    /// Begin a batch publication. Collections written through the
    /// returned handle stay invisible until `commit` swaps the whole
    /// store root at once.
    pub fn begin_batch(&self) -> Result<BatchPublish, StoreError> {
        let staged_root = sibling_path(&self.root, "tmp")?;
        if staged_root.exists() {
            std::fs::remove_dir_all(&staged_root)?;
        }
        std::fs::create_dir_all(&staged_root)?;
        Ok(BatchPublish {
            staged: VectorStore::new(staged_root),
            live_root: self.root.clone(),
            committed: false,
        })
    }

    /// Stage files into a temp directory, then swap it into place.
    fn publish(&self, name: &str, files: Vec<(String, Vec<u8>)>) -> Result<(), StoreError> {
        std::fs::create_dir_all(&self.root)?;

        let live = self.dir(name);
        let staged = self.root.join(format!("{name}.tmp"));
        let retired = self.root.join(format!("{name}.old"));

        // Clear leftovers from an earlier failed publish
        if staged.exists() {
            std::fs::remove_dir_all(&staged)?;
        }
        if retired.exists() {
            std::fs::remove_dir_all(&retired)?;
        }

        let result = (|| -> Result<(), StoreError> {
            std::fs::create_dir(&staged)?;
            for (file_name, bytes) in &files {
                std::fs::write(staged.join(file_name), bytes)?;
            }
            if live.exists() {
                std::fs::rename(&live, &retired)?;
            }
            std::fs::rename(&staged, &live)?;
            Ok(())
        })();

        if result.is_err() {
            let _ = std::fs::remove_dir_all(&staged);
            // If the live dir was already moved aside, put it back
            if !live.exists() && retired.exists() {
                let _ = std::fs::rename(&retired, &live);
            }
            return result;
        }

        if retired.exists() {
            std::fs::remove_dir_all(&retired)?;
        }
        Ok(())
    }
}

/// An in-progress batch publication.
///
/// Write collections through `store()`, then `commit` to swap the whole
/// set into place with a single rename. Either every staged collection
/// becomes visible together or the previous set stays intact. Dropping
/// an uncommitted batch removes the staging directory.
pub struct BatchPublish {
    staged: VectorStore,
    live_root: PathBuf,
    committed: bool,
}

impl BatchPublish {
    /// The store the batch writes into.
    pub fn store(&self) -> &VectorStore {
        &self.staged
    }

    /// Swap the staged set into place.
    pub fn commit(mut self) -> Result<(), StoreError> {
        let retired = sibling_path(&self.live_root, "old")?;
        if retired.exists() {
            std::fs::remove_dir_all(&retired)?;
        }

        let had_live = self.live_root.exists();
        if had_live {
            std::fs::rename(&self.live_root, &retired)?;
        }
        if let Err(e) = std::fs::rename(self.staged.root(), &self.live_root) {
            // Put the previous set back before surfacing the error
            if had_live {
                let _ = std::fs::rename(&retired, &self.live_root);
            }
            return Err(e.into());
        }
        self.committed = true;

        if retired.exists() {
            std::fs::remove_dir_all(&retired)?;
        }
        Ok(())
    }
}

impl Drop for BatchPublish {
    fn drop(&mut self) {
        if !self.committed {
            let _ = std::fs::remove_dir_all(self.staged.root());
        }
    }
}

/// `<root>.<suffix>` next to the store root.
fn sibling_path(root: &Path, suffix: &str) -> Result<PathBuf, StoreError> {
    let name = root.file_name().ok_or_else(|| {
        StoreError::InvalidFormat(format!(
            "store root '{}' has no directory name",
            root.display()
        ))
    })?;
    let mut name = name.to_os_string();
    name.push(".");
    name.push(suffix);
    Ok(root.with_file_name(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU64, Ordering};

    static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

    fn temp_store() -> (VectorStore, PathBuf) {
        let counter = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        let root = std::env::temp_dir().join(format!(
            "plaza-store-test-{}-{}",
            std::process::id(),
            counter
        ));
        (VectorStore::new(root.clone()), root)
    }

    fn unit(dim: usize, axis: usize) -> Vec<f32> {
        let mut v = vec![0.0f32; dim];
        v[axis] = 1.0;
        v
    }

    fn sample_matrix() -> (Vec<i64>, Matrix, Vec<String>) {
        let mut matrix = Matrix::new(4);
        matrix.push_row(&unit(4, 0)).unwrap();
        matrix.push_row(&unit(4, 1)).unwrap();
        matrix.push_row(&unit(4, 2)).unwrap();
        (
            vec![10, 20, 30],
            matrix,
            vec!["a".into(), "b".into(), "c".into()],
        )
    }

    #[test]
    fn write_read_roundtrip_is_bit_exact() {
        let (store, root) = temp_store();
        let (ids, matrix, metadata) = sample_matrix();

        store.write("events", &ids, &matrix, &metadata).unwrap();
        let col: Collection<i64, String> = store.read("events").unwrap();

        assert_eq!(col.ids, ids);
        assert_eq!(col.matrix, matrix);
        assert_eq!(col.metadata, metadata);

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn exists_and_stat() {
        let (store, root) = temp_store();
        assert!(!store.exists("events"));

        let (ids, matrix, metadata) = sample_matrix();
        store.write("events", &ids, &matrix, &metadata).unwrap();

        assert!(store.exists("events"));
        let stat = store.stat("events").unwrap();
        assert_eq!(stat.rows, 3);
        assert_eq!(stat.dim, 4);
        assert_eq!(stat.algorithm, ALGORITHM);

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn read_missing_collection_errors() {
        let (store, root) = temp_store();
        let result: Result<Collection<i64, String>, _> = store.read("events");
        assert!(matches!(result, Err(StoreError::Missing(_))));
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn corrupted_matrix_fails_checksum() {
        let (store, root) = temp_store();
        let (ids, matrix, metadata) = sample_matrix();
        store.write("events", &ids, &matrix, &metadata).unwrap();

        // Flip a byte in the matrix
        let path = root.join("events").join("matrix.bin");
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[5] ^= 0xFF;
        std::fs::write(&path, bytes).unwrap();

        let result: Result<Collection<i64, String>, _> = store.read("events");
        assert!(matches!(result, Err(StoreError::ChecksumMismatch(_))));

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn deleted_matrix_fails_loudly() {
        let (store, root) = temp_store();
        let (ids, matrix, metadata) = sample_matrix();
        store.write("events", &ids, &matrix, &metadata).unwrap();

        std::fs::remove_file(root.join("events").join("matrix.bin")).unwrap();
        let result: Result<Collection<i64, String>, _> = store.read("events");
        assert!(result.is_err());

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn rewrite_replaces_old_version_atomically() {
        let (store, root) = temp_store();
        let (ids, matrix, metadata) = sample_matrix();
        store.write("events", &ids, &matrix, &metadata).unwrap();

        // Reader takes a snapshot of version 1
        let before: Collection<i64, String> = store.read("events").unwrap();

        let mut matrix2 = Matrix::new(4);
        matrix2.push_row(&unit(4, 3)).unwrap();
        store
            .write("events", &[99i64], &matrix2, &["z".to_string()])
            .unwrap();

        // Snapshot is unaffected, new read sees version 2
        assert_eq!(before.ids, vec![10, 20, 30]);
        let after: Collection<i64, String> = store.read("events").unwrap();
        assert_eq!(after.ids, vec![99]);
        assert!(!root.join("events.old").exists());
        assert!(!root.join("events.tmp").exists());

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn write_rejects_denormalized_rows() {
        let (store, root) = temp_store();
        let mut matrix = Matrix::new(2);
        matrix.push_row(&[3.0, 4.0]).unwrap();
        let err = store
            .write("events", &[1i64], &matrix, &["m".to_string()])
            .unwrap_err();
        assert!(matches!(err, StoreError::NotNormalized(_)));
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn write_rejects_misaligned_inputs() {
        let (store, root) = temp_store();
        let (_, matrix, metadata) = sample_matrix();
        let err = store.write("events", &[1i64], &matrix, &metadata).unwrap_err();
        assert!(matches!(err, StoreError::InvalidFormat(_)));
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn sim_table_roundtrip() {
        let (store, root) = temp_store();
        let mut table = SimTable::default();
        table.neighbors.insert(
            "u1".into(),
            vec![("u2".into(), 0.9), ("u3".into(), 0.4)],
        );
        table
            .neighbors
            .insert("u2".into(), vec![("u1".into(), 0.9), ("u3".into(), 0.2)]);
        table.neighbors.insert("u3".into(), vec![("u1".into(), 0.4)]);

        store.write_sim(&table, 20).unwrap();
        let loaded = store.read_sim().unwrap();

        assert_eq!(loaded.top_for("u1").len(), 2);
        assert_eq!(loaded.top_for("u1")[0].0, "u2");
        assert!((loaded.top_for("u1")[0].1 - 0.9).abs() < 1e-6);
        assert_eq!(loaded.top_for("u3").len(), 1);
        assert!(loaded.top_for("unknown").is_empty());

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn batch_commit_makes_all_collections_visible_together() {
        let (store, root) = temp_store();
        let (ids, matrix, metadata) = sample_matrix();

        let batch = store.begin_batch().unwrap();
        batch.store().write("events", &ids, &matrix, &metadata).unwrap();
        batch.store().write("users", &ids, &matrix, &metadata).unwrap();
        let mut table = SimTable::default();
        table.neighbors.insert("u1".into(), vec![("u2".into(), 0.5)]);
        batch.store().write_sim(&table, 20).unwrap();

        // Nothing visible until commit
        assert!(!store.exists("events"));
        assert!(!store.exists("users"));
        assert!(!store.exists("user_sim"));

        batch.commit().unwrap();

        assert!(store.exists("events"));
        assert!(store.exists("users"));
        assert!(store.exists("user_sim"));
        let staged = root.with_file_name(format!(
            "{}.tmp",
            root.file_name().unwrap().to_string_lossy()
        ));
        assert!(!staged.exists());

        let col: Collection<i64, String> = store.read("events").unwrap();
        assert_eq!(col.ids, ids);

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn dropped_batch_leaves_previous_set_intact() {
        let (store, root) = temp_store();
        let (ids, matrix, metadata) = sample_matrix();
        store.write("events", &ids, &matrix, &metadata).unwrap();

        {
            let batch = store.begin_batch().unwrap();
            let mut matrix2 = Matrix::new(4);
            matrix2.push_row(&unit(4, 3)).unwrap();
            batch
                .store()
                .write("events", &[99i64], &matrix2, &["z".to_string()])
                .unwrap();
            // Abandoned without commit (a later stage failed)
        }

        // Live set untouched, staging directory gone
        let col: Collection<i64, String> = store.read("events").unwrap();
        assert_eq!(col.ids, vec![10, 20, 30]);
        let staged = root.with_file_name(format!(
            "{}.tmp",
            root.file_name().unwrap().to_string_lossy()
        ));
        assert!(!staged.exists());

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn batch_commit_replaces_the_previous_set_whole() {
        let (store, root) = temp_store();
        let (ids, matrix, metadata) = sample_matrix();
        store.write("events", &ids, &matrix, &metadata).unwrap();
        store.write("users", &ids, &matrix, &metadata).unwrap();

        // Reader snapshot of the first version
        let before: Collection<i64, String> = store.read("events").unwrap();

        let batch = store.begin_batch().unwrap();
        let mut matrix2 = Matrix::new(4);
        matrix2.push_row(&unit(4, 3)).unwrap();
        batch
            .store()
            .write("events", &[99i64], &matrix2, &["z".to_string()])
            .unwrap();
        batch
            .store()
            .write("users", &[99i64], &matrix2, &["z".to_string()])
            .unwrap();
        batch.commit().unwrap();

        assert_eq!(before.ids, vec![10, 20, 30]);
        let events: Collection<i64, String> = store.read("events").unwrap();
        let users: Collection<i64, String> = store.read("users").unwrap();
        assert_eq!(events.ids, vec![99]);
        assert_eq!(users.ids, vec![99]);

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn sim_table_respects_k() {
        let (store, root) = temp_store();
        let mut table = SimTable::default();
        table.neighbors.insert(
            "u1".into(),
            vec![("a".into(), 0.9), ("b".into(), 0.8), ("c".into(), 0.7)],
        );
        store.write_sim(&table, 2).unwrap();
        let loaded = store.read_sim().unwrap();
        assert_eq!(loaded.top_for("u1").len(), 2);
        let _ = std::fs::remove_dir_all(&root);
    }
}
