use crate::errors::{RepoError, StorageError};
use crate::models::{Comment, MemeDocument, VoteKind};
use async_trait::async_trait;
use uuid::Uuid;

/// Trait defining operations for storing and retrieving meme documents.
#[async_trait]
pub trait MemeRepository: Send + Sync + 'static { // Send+Sync+'static required for Arc<dyn>
    async fn create(&self, meme: &MemeDocument) -> Result<(), RepoError>;

    /// Retrieves a meme by its unique ID.
    /// Returns Ok(None) if the meme is not found.
    async fn get_by_id(&self, id: Uuid) -> Result<Option<MemeDocument>, RepoError>;

    /// Lists every meme, newest first.
    async fn list_all(&self) -> Result<Vec<MemeDocument>, RepoError>;

    /// Lists one author's memes, newest first.
    async fn list_by_author(&self, author_uid: &str) -> Result<Vec<MemeDocument>, RepoError>;

    /// One page of the newest-first listing plus the total number of memes.
    async fn list_page(
        &self,
        offset: usize,
        limit: usize,
    ) -> Result<(Vec<MemeDocument>, usize), RepoError> {
        let all = self.list_all().await?;
        let total = all.len();
        let page = all.into_iter().skip(offset).take(limit).collect();
        Ok((page, total))
    }

    /// Removes `uid` from both vote sets, then adds it to the set for `vote` (if any).
    /// Fails with `RepoError::NotFound` for an unknown id.
    async fn set_vote(
        &self,
        id: Uuid,
        uid: &str,
        vote: Option<VoteKind>,
    ) -> Result<MemeDocument, RepoError>;

    /// Appends a comment. Fails with `RepoError::NotFound` for an unknown id.
    async fn add_comment(&self, id: Uuid, comment: &Comment) -> Result<MemeDocument, RepoError>;

    async fn delete(&self, id: Uuid) -> Result<(), RepoError>;
}

/// Trait defining operations for storing and retrieving file data (meme images).
#[async_trait]
pub trait FileStorage: Send + Sync + 'static {
    /// Uploads file data to the storage backend.
    async fn upload(&self, key: &str, data: Vec<u8>, content_type: Option<String>) -> Result<(), StorageError>;

    /// Downloads file data and its content type, if one was recorded.
    async fn download(&self, key: &str) -> Result<(Vec<u8>, Option<String>), StorageError>;

    async fn delete(&self, key: &str) -> Result<(), StorageError>;
}
