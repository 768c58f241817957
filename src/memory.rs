//! Process-local backends, selected with `STORE_BACKEND=memory`.

use crate::{
    domain::{FileStorage, MemeRepository},
    errors::{RepoError, StorageError},
    models::{Comment, MemeDocument, VoteKind},
    repositories::sort_newest_first,
};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct InMemoryMemeRepository {
    memes: RwLock<HashMap<Uuid, MemeDocument>>,
}

impl InMemoryMemeRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.memes.read().await.len()
    }
}

#[async_trait]
impl MemeRepository for InMemoryMemeRepository {
    async fn create(&self, meme: &MemeDocument) -> Result<(), RepoError> {
        self.memes.write().await.insert(meme.id, meme.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<MemeDocument>, RepoError> {
        Ok(self.memes.read().await.get(&id).cloned())
    }

    async fn list_all(&self) -> Result<Vec<MemeDocument>, RepoError> {
        let mut memes: Vec<MemeDocument> = self.memes.read().await.values().cloned().collect();
        sort_newest_first(&mut memes);
        Ok(memes)
    }

    async fn list_by_author(&self, author_uid: &str) -> Result<Vec<MemeDocument>, RepoError> {
        let mut memes: Vec<MemeDocument> = self
            .memes
            .read()
            .await
            .values()
            .filter(|m| m.author.is_authored_by(author_uid))
            .cloned()
            .collect();
        sort_newest_first(&mut memes);
        Ok(memes)
    }

    async fn set_vote(
        &self,
        id: Uuid,
        uid: &str,
        vote: Option<VoteKind>,
    ) -> Result<MemeDocument, RepoError> {
        let mut memes = self.memes.write().await;
        let meme = memes.get_mut(&id).ok_or(RepoError::NotFound(id))?;
        meme.votes.apply(uid, vote);
        Ok(meme.clone())
    }

    async fn add_comment(&self, id: Uuid, comment: &Comment) -> Result<MemeDocument, RepoError> {
        let mut memes = self.memes.write().await;
        let meme = memes.get_mut(&id).ok_or(RepoError::NotFound(id))?;
        meme.comments.push(comment.clone());
        Ok(meme.clone())
    }

    async fn delete(&self, id: Uuid) -> Result<(), RepoError> {
        self.memes.write().await.remove(&id);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryFileStorage {
    objects: RwLock<HashMap<String, (Vec<u8>, Option<String>)>>,
}

impl InMemoryFileStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.objects.read().await.contains_key(key)
    }
}

#[async_trait]
impl FileStorage for InMemoryFileStorage {
    async fn upload(&self, key: &str, data: Vec<u8>, content_type: Option<String>) -> Result<(), StorageError> {
        self.objects
            .write()
            .await
            .insert(key.to_string(), (data, content_type));
        Ok(())
    }

    async fn download(&self, key: &str) -> Result<(Vec<u8>, Option<String>), StorageError> {
        self.objects
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.objects.write().await.remove(key);
        Ok(())
    }
}
