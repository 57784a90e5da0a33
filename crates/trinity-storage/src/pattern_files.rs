//! Pattern records with binary embedding sidecars.
//!
//! Each pattern persists as `<id>.json`; its embedding, when computed, as a
//! parallel `<id>.emb` sidecar of little-endian f32s. A record without a
//! sidecar is valid but participates in tag search only - embeddings are
//! computed lazily and never block a write.

use anyhow::{Context, Result, bail};
use std::fs;
use std::path::{Path, PathBuf};
use trinity_models::Pattern;

use crate::fs_util;

pub struct PatternFiles {
    dir: PathBuf,
}

impl PatternFiles {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    fn embedding_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.emb"))
    }

    pub fn put(&self, pattern: &Pattern) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(pattern)?;
        fs_util::atomic_write(&self.record_path(&pattern.id), &bytes)
    }

    pub fn get(&self, id: &str) -> Result<Option<Pattern>> {
        let path = self.record_path(id);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err).context(format!("reading {}", path.display())),
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    pub fn list(&self) -> Result<Vec<Pattern>> {
        let mut patterns = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let name = entry?.file_name().to_string_lossy().into_owned();
            if let Some(id) = name.strip_suffix(".json")
                && let Some(pattern) = self.get(id)?
            {
                patterns.push(pattern);
            }
        }
        patterns.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(patterns)
    }

    /// Write the embedding sidecar as little-endian f32 bytes.
    pub fn put_embedding(&self, id: &str, embedding: &[f32]) -> Result<()> {
        let mut bytes = Vec::with_capacity(embedding.len() * 4);
        for value in embedding {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        fs_util::atomic_write(&self.embedding_path(id), &bytes)
    }

    pub fn get_embedding(&self, id: &str) -> Result<Option<Vec<f32>>> {
        let path = self.embedding_path(id);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err).context(format!("reading {}", path.display())),
        };
        if bytes.len() % 4 != 0 {
            bail!("embedding sidecar {} has truncated length {}", path.display(), bytes.len());
        }
        Ok(Some(
            bytes
                .chunks_exact(4)
                .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
                .collect(),
        ))
    }

    pub fn delete_embedding(&self, id: &str) -> Result<()> {
        match fs::remove_file(self.embedding_path(id)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
