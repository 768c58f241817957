use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

/// Which way a caller voted.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum VoteKind {
    Upvote,
    Downvote,
}

/// Who made a meme.
///
/// Records created before sign-in existed carry no author at all; they deserialize as
/// `Legacy`. On the wire both shapes flatten into the optional `authorUID` / `authorName` keys.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum Authorship {
    Authored {
        #[serde(rename = "authorUID")]
        uid: String,
        #[serde(rename = "authorName", default)]
        name: String,
    },
    Legacy {},
}

impl Authorship {
    pub fn authored(uid: impl Into<String>, name: impl Into<String>) -> Self {
        Authorship::Authored {
            uid: uid.into(),
            name: name.into(),
        }
    }

    pub fn uid(&self) -> Option<&str> {
        match self {
            Authorship::Authored { uid, .. } => Some(uid),
            Authorship::Legacy {} => None,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Authorship::Authored { name, .. } => Some(name),
            Authorship::Legacy {} => None,
        }
    }

    pub fn is_authored_by(&self, caller_uid: &str) -> bool {
        self.uid() == Some(caller_uid)
    }
}

/// Up/down vote sets. A uid is a member of at most one of them.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Votes {
    #[serde(default)]
    pub upvotes: BTreeSet<String>,
    #[serde(default)]
    pub downvotes: BTreeSet<String>,
}

impl Votes {
    /// Clears `uid` from both sets, then adds it to the requested one.
    pub fn apply(&mut self, uid: &str, vote: Option<VoteKind>) {
        self.upvotes.remove(uid);
        self.downvotes.remove(uid);
        match vote {
            Some(VoteKind::Upvote) => {
                self.upvotes.insert(uid.to_string());
            }
            Some(VoteKind::Downvote) => {
                self.downvotes.insert(uid.to_string());
            }
            None => {}
        }
    }

    pub fn current(&self, uid: &str) -> Option<VoteKind> {
        if self.upvotes.contains(uid) {
            Some(VoteKind::Upvote)
        } else if self.downvotes.contains(uid) {
            Some(VoteKind::Downvote)
        } else {
            None
        }
    }

    pub fn score(&self) -> i64 {
        self.upvotes.len() as i64 - self.downvotes.len() as i64
    }
}

/// The vote a client should send when `uid` clicks `clicked`: clicking the active vote clears it.
pub fn desired_vote(current: Option<VoteKind>, clicked: VoteKind) -> Option<VoteKind> {
    if current == Some(clicked) {
        None
    } else {
        Some(clicked)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    #[serde(rename = "userUID")]
    pub user_uid: String,
    pub user_name: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// A meme as the API hands it out: metadata plus the flattened image as a data URL.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MemeRecord {
    #[serde(rename = "_id", alias = "id")]
    pub id: Uuid,
    pub name: String,
    pub image_data: String,
    pub template: String,
    #[serde(default)]
    pub captions: Vec<String>,
    #[serde(flatten)]
    pub author: Authorship,
    #[serde(flatten)]
    pub votes: Votes,
    #[serde(default)]
    pub comments: Vec<Comment>,
    pub created_at: DateTime<Utc>,
}

/// A meme as the repository stores it. The image bytes live in file storage under `image_key`.
#[derive(Debug, Clone, PartialEq)]
pub struct MemeDocument {
    pub id: Uuid,
    pub name: String,
    pub template: String,
    pub captions: Vec<String>,
    pub author: Authorship,
    pub votes: Votes,
    pub comments: Vec<Comment>,
    pub created_at: DateTime<Utc>,
    pub image_key: String,
}

impl MemeDocument {
    pub fn into_record(self, image_data: String) -> MemeRecord {
        MemeRecord {
            id: self.id,
            name: self.name,
            image_data,
            template: self.template,
            captions: self.captions,
            author: self.author,
            votes: self.votes,
            comments: self.comments,
            created_at: self.created_at,
        }
    }
}

/// Body of `POST /memes`. Every field is optional here so that a missing one maps to a 400
/// instead of a deserialization failure.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct CreateMemeRequest {
    pub name: Option<String>,
    pub image_data: Option<String>,
    pub template: Option<String>,
    pub captions: Option<Vec<String>>,
}

/// Body of `POST /memes/{id}/vote`. `null` (or an absent `type`) clears the caller's vote.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoteRequest {
    #[serde(rename = "type", default)]
    pub kind: Option<VoteKind>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CommentRequest {
    pub text: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MemePage {
    pub memes: Vec<MemeRecord>,
    pub current_page: u32,
    pub total_pages: u32,
    pub total_memes: u64,
}

/// Number of pages needed for `total` items at `limit` per page.
pub fn total_pages(total: u64, limit: u32) -> u32 {
    if limit == 0 {
        return 0;
    }
    total.div_ceil(u64::from(limit)) as u32
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TopUser {
    #[serde(rename = "_id")]
    pub name: Option<String>,
    pub count: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AdminStats {
    pub total_memes: u64,
    pub recent_memes: u64,
    pub top_users: Vec<TopUser>,
}

impl AdminStats {
    const TOP_USERS: usize = 5;

    /// Totals, memes created in the 24h before `now`, and the five most prolific author names.
    /// Legacy memes group under a `null` name.
    pub fn compute(memes: &[MemeDocument], now: DateTime<Utc>) -> Self {
        let cutoff = now - Duration::hours(24);
        let recent_memes = memes.iter().filter(|m| m.created_at > cutoff).count() as u64;

        let mut counts: HashMap<Option<String>, u64> = HashMap::new();
        for meme in memes {
            *counts
                .entry(meme.author.name().map(str::to_string))
                .or_default() += 1;
        }
        let mut top_users: Vec<TopUser> = counts
            .into_iter()
            .map(|(name, count)| TopUser { name, count })
            .collect();
        // Ties broken by name so the output is stable.
        top_users.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
        top_users.truncate(Self::TOP_USERS);

        AdminStats {
            total_memes: memes.len() as u64,
            recent_memes,
            top_users,
        }
    }
}

/// The caller, as established by a verified bearer token.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub uid: String,
    pub name: Option<String>,
    pub email: Option<String>,
    #[serde(default)]
    pub admin: bool,
}

impl Identity {
    /// Name stamped on memes and comments.
    pub fn display_name(&self) -> String {
        self.name
            .as_deref()
            .or(self.email.as_deref())
            .filter(|s| !s.is_empty())
            .unwrap_or("Anonymous")
            .to_string()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct HealthResponse {
    pub status: String,
    pub message: String,
}
