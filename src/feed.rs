//! Client-side gallery cache: pages of memes from the API, de-duplicated by id, with the local
//! store as a fallback when the server cannot be reached.

use crate::{
    client::{ClientError, MemeApi},
    local_store::{LocalMemeStore, LocalStoreError},
    models::{MemePage, MemeRecord, VoteKind, desired_vote},
};
use std::{collections::HashSet, sync::Arc};
use thiserror::Error;
use uuid::Uuid;

pub const FEED_PAGE_SIZE: u32 = 12;

#[derive(Error, Debug)]
pub enum FeedError {
    #[error(transparent)]
    Api(#[from] ClientError),
    #[error(transparent)]
    Local(#[from] LocalStoreError),
    #[error("meme {0} is not in the feed")]
    NotCached(Uuid),
}

/// Where the records of a `load` came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadSource {
    Cache,
    Remote,
    Local,
}

pub struct FeedStore {
    api: Arc<dyn MemeApi>,
    local: LocalMemeStore,
    memes: Vec<MemeRecord>,
    current_page: u32,
    highest_page: u32,
    has_more: bool,
    offline: bool,
}

fn dedup(records: Vec<MemeRecord>) -> Vec<MemeRecord> {
    let mut seen = HashSet::new();
    records.into_iter().filter(|r| seen.insert(r.id)).collect()
}

impl FeedStore {
    pub fn new(api: Arc<dyn MemeApi>, local: LocalMemeStore) -> Self {
        FeedStore {
            api,
            local,
            memes: Vec::new(),
            current_page: 0,
            highest_page: 0,
            has_more: true,
            offline: false,
        }
    }

    pub fn memes(&self) -> &[MemeRecord] {
        &self.memes
    }

    pub fn get(&self, id: Uuid) -> Option<&MemeRecord> {
        self.memes.iter().find(|m| m.id == id)
    }

    pub fn current_page(&self) -> u32 {
        self.current_page
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn is_offline(&self) -> bool {
        self.offline
    }

    /// Loads `page`. A cached first page is reused unless `force` is set.
    ///
    /// If the first page cannot be fetched the feed switches to the saved memes and stops
    /// paginating. Failures on later pages leave the cache alone.
    pub async fn load(&mut self, page: u32, force: bool) -> Result<LoadSource, FeedError> {
        let page = page.max(1);
        if page == 1 && !force && !self.memes.is_empty() {
            return Ok(LoadSource::Cache);
        }

        match self.api.list_memes(page, FEED_PAGE_SIZE).await {
            Ok(response) => {
                self.offline = false;
                self.apply_page(page, response);
                Ok(LoadSource::Remote)
            }
            Err(e) if page == 1 => {
                tracing::warn!(error = %e, "Feed unavailable, falling back to saved memes");
                self.memes = self.local.load_all().await;
                self.offline = true;
                self.has_more = false;
                self.current_page = 1;
                self.highest_page = 1;
                Ok(LoadSource::Local)
            }
            Err(e) => {
                tracing::warn!(page, error = %e, "Failed to load feed page");
                Err(e.into())
            }
        }
    }

    /// Fetches the next page. A no-op once the feed is exhausted or showing saved memes.
    pub async fn load_more(&mut self) -> Result<LoadSource, FeedError> {
        if self.offline || !self.has_more {
            return Ok(LoadSource::Cache);
        }
        self.load(self.current_page + 1, false).await
    }

    pub async fn refresh(&mut self) -> Result<LoadSource, FeedError> {
        self.load(1, true).await
    }

    /// Merges one page response into the cache, keyed by id, whatever order pages complete in.
    pub fn apply_page(&mut self, page: u32, response: MemePage) {
        let incoming = dedup(response.memes);
        if page <= 1 {
            if self.highest_page <= 1 {
                self.memes = incoming;
            } else {
                let fresh: HashSet<Uuid> = incoming.iter().map(|m| m.id).collect();
                let rest = std::mem::take(&mut self.memes)
                    .into_iter()
                    .filter(|m| !fresh.contains(&m.id));
                self.memes = incoming.into_iter().chain(rest).collect();
            }
        } else {
            for record in incoming {
                match self.memes.iter_mut().find(|m| m.id == record.id) {
                    Some(existing) => *existing = record,
                    None => self.memes.push(record),
                }
            }
        }

        self.highest_page = self.highest_page.max(page.max(1));
        self.current_page = self.highest_page;
        self.has_more = self.highest_page < response.total_pages;
        tracing::debug!(page, cached = self.memes.len(), has_more = self.has_more, "Applied feed page");
    }

    /// Puts a freshly created meme at the front.
    pub fn add(&mut self, record: MemeRecord) {
        self.memes.retain(|m| m.id != record.id);
        self.memes.insert(0, record);
    }

    pub fn remove(&mut self, id: Uuid) {
        self.memes.retain(|m| m.id != id);
    }

    /// Toggles `uid`'s vote on `id`. The cache is updated before the request and restored if
    /// the request fails.
    pub async fn vote(&mut self, id: Uuid, uid: &str, clicked: VoteKind) -> Result<Option<VoteKind>, FeedError> {
        let index = self
            .memes
            .iter()
            .position(|m| m.id == id)
            .ok_or(FeedError::NotCached(id))?;

        let snapshot = self.memes[index].clone();
        let desired = desired_vote(snapshot.votes.current(uid), clicked);
        self.memes[index].votes.apply(uid, desired);

        match self.api.vote(id, desired).await {
            Ok(updated) => {
                if let Some(slot) = self.memes.iter_mut().find(|m| m.id == id) {
                    *slot = updated;
                }
                Ok(desired)
            }
            Err(e) => {
                tracing::warn!(%id, error = %e, "Vote failed, rolling back");
                if let Some(slot) = self.memes.iter_mut().find(|m| m.id == id) {
                    *slot = snapshot;
                }
                Err(e.into())
            }
        }
    }

    /// Deletes through the API when online, from the saved memes when offline.
    pub async fn delete(&mut self, id: Uuid) -> Result<(), FeedError> {
        if self.offline {
            self.local.delete(id).await?;
        } else {
            self.api.delete_meme(id).await?;
        }
        self.remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        AdminStats, Authorship, CreateMemeRequest, HealthResponse, MessageResponse, Votes, total_pages,
    };
    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use reqwest::StatusCode;
    use std::sync::Mutex;

    fn record(n: i64) -> MemeRecord {
        MemeRecord {
            id: Uuid::new_v4(),
            name: format!("meme {n}"),
            image_data: String::new(),
            template: "t".into(),
            captions: vec![],
            author: Authorship::authored("author", "Author"),
            votes: Votes::default(),
            comments: vec![],
            created_at: Utc::now() - Duration::minutes(n),
        }
    }

    fn unavailable() -> ClientError {
        ClientError::Api {
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: "down".into(),
        }
    }

    #[derive(Default)]
    struct FakeApi {
        memes: Mutex<Vec<MemeRecord>>,
        offline: Mutex<bool>,
        fail_votes: Mutex<bool>,
        list_calls: Mutex<u32>,
    }

    impl FakeApi {
        fn with(count: i64) -> Arc<Self> {
            let api = FakeApi::default();
            *api.memes.lock().unwrap() = (0..count).map(record).collect();
            Arc::new(api)
        }
    }

    #[async_trait]
    impl MemeApi for FakeApi {
        async fn list_memes(&self, page: u32, limit: u32) -> Result<MemePage, ClientError> {
            *self.list_calls.lock().unwrap() += 1;
            if *self.offline.lock().unwrap() {
                return Err(unavailable());
            }
            let memes = self.memes.lock().unwrap();
            let start = ((page - 1) * limit) as usize;
            Ok(MemePage {
                memes: memes.iter().skip(start).take(limit as usize).cloned().collect(),
                current_page: page,
                total_pages: total_pages(memes.len() as u64, limit),
                total_memes: memes.len() as u64,
            })
        }

        async fn get_meme(&self, id: Uuid) -> Result<MemeRecord, ClientError> {
            self.memes
                .lock()
                .unwrap()
                .iter()
                .find(|m| m.id == id)
                .cloned()
                .ok_or(ClientError::Api {
                    status: StatusCode::NOT_FOUND,
                    message: "Meme not found".into(),
                })
        }

        async fn list_user_memes(&self, _uid: &str) -> Result<Vec<MemeRecord>, ClientError> {
            Ok(vec![])
        }

        async fn create_meme(&self, _req: &CreateMemeRequest) -> Result<MemeRecord, ClientError> {
            Err(unavailable())
        }

        async fn vote(&self, id: Uuid, kind: Option<VoteKind>) -> Result<MemeRecord, ClientError> {
            if *self.fail_votes.lock().unwrap() {
                return Err(unavailable());
            }
            let mut memes = self.memes.lock().unwrap();
            let meme = memes.iter_mut().find(|m| m.id == id).ok_or_else(unavailable)?;
            meme.votes.apply("me", kind);
            Ok(meme.clone())
        }

        async fn comment(&self, _id: Uuid, _text: &str) -> Result<MemeRecord, ClientError> {
            Err(unavailable())
        }

        async fn delete_meme(&self, id: Uuid) -> Result<MessageResponse, ClientError> {
            self.memes.lock().unwrap().retain(|m| m.id != id);
            Ok(MessageResponse {
                message: "Meme deleted successfully".into(),
            })
        }

        async fn admin_stats(&self) -> Result<AdminStats, ClientError> {
            Err(unavailable())
        }

        async fn admin_delete_meme(&self, _id: Uuid) -> Result<MessageResponse, ClientError> {
            Err(unavailable())
        }

        async fn health(&self) -> Result<HealthResponse, ClientError> {
            Err(unavailable())
        }
    }

    fn store(api: Arc<FakeApi>, dir: &tempfile::TempDir) -> FeedStore {
        FeedStore::new(api, LocalMemeStore::new(dir.path().join("saved.json")))
    }

    #[tokio::test]
    async fn pages_append_until_exhausted() {
        let dir = tempfile::tempdir().unwrap();
        let mut feed = store(FakeApi::with(30), &dir);

        assert_eq!(feed.load(1, false).await.unwrap(), LoadSource::Remote);
        assert_eq!(feed.memes().len(), 12);
        assert!(feed.has_more());

        feed.load_more().await.unwrap();
        feed.load_more().await.unwrap();
        assert_eq!(feed.memes().len(), 30);
        assert_eq!(feed.current_page(), 3);
        assert!(!feed.has_more());
    }

    #[tokio::test]
    async fn cached_first_page_short_circuits_unless_forced() {
        let dir = tempfile::tempdir().unwrap();
        let api = FakeApi::with(5);
        let mut feed = store(api.clone(), &dir);

        feed.load(1, false).await.unwrap();
        assert_eq!(feed.load(1, false).await.unwrap(), LoadSource::Cache);
        assert_eq!(*api.list_calls.lock().unwrap(), 1);

        feed.refresh().await.unwrap();
        assert_eq!(*api.list_calls.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn first_page_failure_falls_back_to_saved_memes() {
        let dir = tempfile::tempdir().unwrap();
        let api = FakeApi::with(5);
        *api.offline.lock().unwrap() = true;
        let local = LocalMemeStore::new(dir.path().join("saved.json"));
        local.save(record(1)).await.unwrap();

        let mut feed = FeedStore::new(api, local);
        assert_eq!(feed.load(1, false).await.unwrap(), LoadSource::Local);
        assert!(feed.is_offline());
        assert!(!feed.has_more());
        assert_eq!(feed.memes().len(), 1);
    }

    #[tokio::test]
    async fn offline_feed_stops_paginating() {
        let dir = tempfile::tempdir().unwrap();
        let api = FakeApi::with(30);
        *api.offline.lock().unwrap() = true;
        let local = LocalMemeStore::new(dir.path().join("saved.json"));
        local.save(record(1)).await.unwrap();

        let mut feed = FeedStore::new(api.clone(), local);
        feed.load(1, false).await.unwrap();
        let cached: Vec<Uuid> = feed.memes().iter().map(|m| m.id).collect();
        let calls = *api.list_calls.lock().unwrap();

        *api.offline.lock().unwrap() = false;
        assert_eq!(feed.load_more().await.unwrap(), LoadSource::Cache);
        assert_eq!(*api.list_calls.lock().unwrap(), calls);
        assert!(feed.is_offline());
        assert_eq!(feed.memes().iter().map(|m| m.id).collect::<Vec<_>>(), cached);

        // A forced refresh is the way back online.
        assert_eq!(feed.refresh().await.unwrap(), LoadSource::Remote);
        assert!(!feed.is_offline());
        assert_eq!(feed.memes().len(), 12);
    }

    #[tokio::test]
    async fn exhausted_feed_does_not_refetch() {
        let dir = tempfile::tempdir().unwrap();
        let api = FakeApi::with(5);
        let mut feed = store(api.clone(), &dir);
        feed.load(1, false).await.unwrap();
        assert!(!feed.has_more());

        assert_eq!(feed.load_more().await.unwrap(), LoadSource::Cache);
        assert_eq!(*api.list_calls.lock().unwrap(), 1);
        assert_eq!(feed.current_page(), 1);
    }

    #[tokio::test]
    async fn later_page_failure_keeps_cache() {
        let dir = tempfile::tempdir().unwrap();
        let api = FakeApi::with(20);
        let mut feed = store(api.clone(), &dir);
        feed.load(1, false).await.unwrap();

        *api.offline.lock().unwrap() = true;
        assert!(feed.load(2, false).await.is_err());
        assert_eq!(feed.memes().len(), 12);
        assert!(!feed.is_offline());
    }

    #[test]
    fn out_of_order_pages_merge_by_id() {
        let dir = tempfile::tempdir().unwrap();
        let mut feed = store(FakeApi::with(0), &dir);
        let records: Vec<MemeRecord> = (0..4).map(record).collect();
        let page = |memes: Vec<MemeRecord>| MemePage {
            memes,
            current_page: 1,
            total_pages: 2,
            total_memes: 4,
        };

        // Page 2 lands before page 1.
        feed.apply_page(2, page(records[2..].to_vec()));
        feed.apply_page(1, page(records[..2].to_vec()));
        let ids: Vec<Uuid> = feed.memes().iter().map(|m| m.id).collect();
        assert_eq!(ids, records.iter().map(|m| m.id).collect::<Vec<_>>());

        // A refreshed page 1 overlapping page 2 doesn't duplicate.
        feed.apply_page(1, page(vec![records[2].clone(), records[0].clone()]));
        assert_eq!(feed.memes().len(), 4);
        assert_eq!(feed.memes()[0].id, records[2].id);
    }

    #[tokio::test]
    async fn vote_is_optimistic_and_toggles() {
        let dir = tempfile::tempdir().unwrap();
        let api = FakeApi::with(1);
        let mut feed = store(api, &dir);
        feed.load(1, false).await.unwrap();
        let id = feed.memes()[0].id;

        assert_eq!(feed.vote(id, "me", VoteKind::Upvote).await.unwrap(), Some(VoteKind::Upvote));
        assert!(feed.get(id).unwrap().votes.upvotes.contains("me"));

        assert_eq!(feed.vote(id, "me", VoteKind::Upvote).await.unwrap(), None);
        assert!(feed.get(id).unwrap().votes.upvotes.is_empty());
    }

    #[tokio::test]
    async fn failed_vote_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let api = FakeApi::with(1);
        let mut feed = store(api.clone(), &dir);
        feed.load(1, false).await.unwrap();
        let id = feed.memes()[0].id;

        *api.fail_votes.lock().unwrap() = true;
        assert!(feed.vote(id, "me", VoteKind::Downvote).await.is_err());
        assert!(feed.get(id).unwrap().votes.downvotes.is_empty());
    }

    #[tokio::test]
    async fn delete_online_and_offline() {
        let dir = tempfile::tempdir().unwrap();
        let api = FakeApi::with(2);
        let mut feed = store(api.clone(), &dir);
        feed.load(1, false).await.unwrap();
        let id = feed.memes()[0].id;
        feed.delete(id).await.unwrap();
        assert!(feed.get(id).is_none());
        assert_eq!(api.memes.lock().unwrap().len(), 1);

        let saved = record(9);
        let local = LocalMemeStore::new(dir.path().join("offline.json"));
        local.save(saved.clone()).await.unwrap();
        *api.offline.lock().unwrap() = true;
        let mut offline = FeedStore::new(api, local.clone());
        offline.load(1, false).await.unwrap();
        offline.delete(saved.id).await.unwrap();
        assert!(local.load_all().await.is_empty());
    }

    #[test]
    fn add_prepends_without_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let mut feed = store(FakeApi::with(0), &dir);
        let a = record(1);
        feed.add(a.clone());
        feed.add(record(2));
        feed.add(a.clone());
        assert_eq!(feed.memes().len(), 2);
        assert_eq!(feed.memes()[0].id, a.id);
        feed.remove(a.id);
        assert_eq!(feed.memes().len(), 1);
    }
}
