//! Memes saved on this machine, kept as one JSON file (newest first).

use crate::models::MemeRecord;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum LocalStoreError {
    #[error("local store I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("local store is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct LocalMemeStore {
    path: PathBuf,
}

impl LocalMemeStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> Result<Vec<MemeRecord>, LocalStoreError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, records: &[MemeRecord]) -> Result<(), LocalStoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(records)?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    /// Every saved meme. A missing or unreadable file yields an empty list.
    pub async fn load_all(&self) -> Vec<MemeRecord> {
        match self.read().await {
            Ok(records) => records,
            Err(e) => {
                tracing::error!(path = %self.path.display(), error = %e, "Failed to load saved memes");
                Vec::new()
            }
        }
    }

    /// Saves `record` at the front, replacing any earlier copy with the same id.
    /// An unreadable file is reported, not overwritten.
    pub async fn save(&self, record: MemeRecord) -> Result<(), LocalStoreError> {
        let mut records = self.read().await?;
        records.retain(|r| r.id != record.id);
        records.insert(0, record);
        self.write(&records).await
    }

    /// Returns whether anything was removed.
    pub async fn delete(&self, id: Uuid) -> Result<bool, LocalStoreError> {
        let mut records = self.read().await?;
        let before = records.len();
        records.retain(|r| r.id != id);
        if records.len() == before {
            return Ok(false);
        }
        self.write(&records).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Authorship, Votes};
    use chrono::Utc;

    fn record(name: &str) -> MemeRecord {
        MemeRecord {
            id: Uuid::new_v4(),
            name: name.into(),
            image_data: "data:image/png;base64,AAAA".into(),
            template: "Drake Hotline Bling".into(),
            captions: vec![name.into()],
            author: Authorship::Legacy {},
            votes: Votes::default(),
            comments: vec![],
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn save_is_newest_first_and_deduplicated() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalMemeStore::new(dir.path().join("nested").join("saved_memes.json"));

        let first = record("first");
        let second = record("second");
        store.save(first.clone()).await.unwrap();
        store.save(second.clone()).await.unwrap();
        store.save(first.clone()).await.unwrap();

        let all = store.load_all().await;
        assert_eq!(all.iter().map(|r| r.name.as_str()).collect::<Vec<_>>(), ["first", "second"]);
    }

    #[tokio::test]
    async fn delete_reports_whether_removed() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalMemeStore::new(dir.path().join("saved_memes.json"));
        let saved = record("x");
        store.save(saved.clone()).await.unwrap();

        assert!(store.delete(saved.id).await.unwrap());
        assert!(!store.delete(saved.id).await.unwrap());
        assert!(store.load_all().await.is_empty());
    }

    #[tokio::test]
    async fn corrupt_file_degrades_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("saved_memes.json");
        tokio::fs::write(&path, b"{not json").await.unwrap();
        let store = LocalMemeStore::new(path);
        assert!(store.load_all().await.is_empty());
    }

    #[tokio::test]
    async fn save_leaves_a_corrupt_file_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("saved_memes.json");
        tokio::fs::write(&path, b"{not json").await.unwrap();
        let store = LocalMemeStore::new(&path);

        assert!(matches!(store.save(record("x")).await, Err(LocalStoreError::Json(_))));
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"{not json");
    }
}
