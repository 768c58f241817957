use crate::{
    domain::MemeRepository,
    errors::RepoError,
    models::{Authorship, Comment, MemeDocument, VoteKind, Votes},
};
use anyhow::Context;
use async_trait::async_trait;
use aws_sdk_dynamodb::{
    error::SdkError,
    types::{AttributeValue, ReturnValue},
    Client as DynamoDbClient,
};
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use tracing::{self, info};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct DynamoDbMemeRepository {
    client: DynamoDbClient,
    table_name: String, // Store the table name
}

impl DynamoDbMemeRepository {
    /// Creates a new repository instance configured for a specific table.
    pub fn new(client: DynamoDbClient, table_name: String) -> Self {
        info!(%table_name, "Initializing DynamoDbMemeRepository");
        Self { client, table_name }
    }

    /// Scans the table (following pagination), optionally filtered on one attribute.
    async fn scan(&self, filter: Option<(&str, &str)>) -> Result<Vec<MemeDocument>, RepoError> {
        let mut memes: Vec<MemeDocument> = Vec::new();
        let mut last_evaluated_key: Option<HashMap<String, AttributeValue>> = None;

        loop {
            let mut request_builder = self.client.scan().table_name(&self.table_name);
            if let Some((attribute, value)) = filter {
                request_builder = request_builder
                    .filter_expression("#attr = :value")
                    .expression_attribute_names("#attr", attribute)
                    .expression_attribute_values(":value", AttributeValue::S(value.to_string()));
            }

            // Apply ExclusiveStartKey if paginating from previous response
            if let Some(lek) = last_evaluated_key {
                request_builder = request_builder.set_exclusive_start_key(Some(lek));
            }

            let resp = request_builder
                .send()
                .await
                .context(format!("DynamoDB: Failed to scan table '{}'", self.table_name))
                .map_err(RepoError::BackendError)?;

            for item in resp.items.unwrap_or_default() {
                match item_to_meme(&item) {
                    Some(meme) => memes.push(meme),
                    None => {
                        let item_id = item.get("meme_id").and_then(|v| v.as_s().ok());
                        tracing::error!(item.id = ?item_id, table_name = %self.table_name, "DynamoDB: Failed to parse item from scan into MemeDocument");
                        return Err(RepoError::DataCorruption(format!(
                            "DynamoDB: Failed to parse item {:?} during scan of table '{}'",
                            item_id, self.table_name
                        )));
                    }
                }
            }

            last_evaluated_key = resp.last_evaluated_key;
            if last_evaluated_key.is_none() {
                break;
            }
            tracing::debug!("DynamoDB Scan (table: {}): Continuing with LastEvaluatedKey...", self.table_name);
        }

        sort_newest_first(&mut memes);
        tracing::debug!("DynamoDB (table: {}): Scanned {} memes", self.table_name, memes.len());
        Ok(memes)
    }

    /// Runs a conditional UpdateItem against an existing meme and returns the updated document.
    async fn update_existing(
        &self,
        id: Uuid,
        update_expression: &str,
        values: HashMap<String, AttributeValue>,
    ) -> Result<MemeDocument, RepoError> {
        let id_str = id.to_string();
        let result = self
            .client
            .update_item()
            .table_name(&self.table_name)
            .key("meme_id", AttributeValue::S(id_str.clone()))
            .update_expression(update_expression)
            .condition_expression("attribute_exists(meme_id)")
            .set_expression_attribute_values(Some(values))
            .return_values(ReturnValue::AllNew)
            .send()
            .await;

        let output = match result {
            Ok(output) => output,
            Err(SdkError::ServiceError(service_err))
                if service_err.err().is_conditional_check_failed_exception() =>
            {
                return Err(RepoError::NotFound(id));
            }
            Err(e) => {
                return Err(RepoError::BackendError(anyhow::Error::new(e).context(format!(
                    "DynamoDB (table: {}): Failed to update meme (id: {})",
                    self.table_name, id_str
                ))));
            }
        };

        let attributes = output.attributes.ok_or_else(|| {
            RepoError::DataCorruption(format!("DynamoDB: UpdateItem for {} returned no attributes", id_str))
        })?;
        item_to_meme(&attributes).ok_or_else(|| {
            RepoError::DataCorruption(format!(
                "Failed to parse updated meme {} from table '{}'",
                id_str, self.table_name
            ))
        })
    }
}

#[async_trait]
impl MemeRepository for DynamoDbMemeRepository {
    /// Stores a `MemeDocument` in the DynamoDB table using PutItem.
    async fn create(&self, meme: &MemeDocument) -> Result<(), RepoError> {
        self.client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(meme_to_item(meme)))
            .send()
            .await
            .context(format!("DynamoDB (table: {}): Failed to put meme (id: {})", self.table_name, meme.id))
            .map_err(RepoError::BackendError)?; // Map anyhow::Error -> RepoError
        Ok(())
    }

    /// Retrieves a `MemeDocument` from DynamoDB using GetItem.
    async fn get_by_id(&self, id: Uuid) -> Result<Option<MemeDocument>, RepoError> {
        let id_str = id.to_string();
        let resp = self.client
            .get_item()
            .table_name(&self.table_name)
            .key("meme_id", AttributeValue::S(id_str.clone()))
            .send()
            .await
            .context(format!("DynamoDB (table: {}): Failed to get meme (id: {})", self.table_name, id_str))
            .map_err(RepoError::BackendError)?;

        match resp.item {
            Some(item) => match item_to_meme(&item) {
                Some(meme) => Ok(Some(meme)),
                None => {
                    tracing::error!(meme_id = %id_str, table_name = %self.table_name, "DynamoDB: Retrieved item but failed to parse into MemeDocument");
                    Err(RepoError::DataCorruption(format!(
                        "Failed to parse meme data retrieved from DynamoDB table '{}' for id {}",
                        self.table_name, id_str
                    )))
                }
            },
            None => Ok(None), // Item not found is not an error
        }
    }

    async fn list_all(&self) -> Result<Vec<MemeDocument>, RepoError> {
        self.scan(None).await
    }

    async fn list_by_author(&self, author_uid: &str) -> Result<Vec<MemeDocument>, RepoError> {
        self.scan(Some(("author_uid", author_uid))).await
    }

    /// Both sets are touched in a single UpdateItem, so a uid never lands in both.
    async fn set_vote(
        &self,
        id: Uuid,
        uid: &str,
        vote: Option<VoteKind>,
    ) -> Result<MemeDocument, RepoError> {
        let update_expression = vote_update_expression(vote);
        let values = HashMap::from([(":uid".to_string(), AttributeValue::Ss(vec![uid.to_string()]))]);
        tracing::debug!(meme_id = %id, %uid, ?vote, "DynamoDB: Updating vote sets");
        self.update_existing(id, update_expression, values).await
    }

    async fn add_comment(&self, id: Uuid, comment: &Comment) -> Result<MemeDocument, RepoError> {
        let values = HashMap::from([
            (":empty".to_string(), AttributeValue::L(Vec::new())),
            (":comment".to_string(), AttributeValue::L(vec![comment_to_value(comment)])),
        ]);
        self.update_existing(
            id,
            "SET comments = list_append(if_not_exists(comments, :empty), :comment)",
            values,
        )
        .await
    }

    /// Deletes an item from DynamoDB using DeleteItem.
    async fn delete(&self, id: Uuid) -> Result<(), RepoError> {
        let id_str = id.to_string();
        tracing::debug!(meme_id = %id_str, table_name = %self.table_name, "DynamoDB: Deleting item");

        self.client
            .delete_item()
            .table_name(&self.table_name)
            .key("meme_id", AttributeValue::S(id_str.clone()))
            .send()
            .await
            .context(format!("DynamoDB (table: {}): Failed to delete meme (id: {})", self.table_name, id_str))
            .map_err(RepoError::BackendError)?;

        Ok(())
    }
}

/// DynamoDB drops a string set once its last member is deleted, so empty sets never need writing.
fn vote_update_expression(vote: Option<VoteKind>) -> &'static str {
    match vote {
        Some(VoteKind::Upvote) => "DELETE downvotes :uid ADD upvotes :uid",
        Some(VoteKind::Downvote) => "DELETE upvotes :uid ADD downvotes :uid",
        None => "DELETE upvotes :uid, downvotes :uid",
    }
}

pub(crate) fn sort_newest_first(memes: &mut [MemeDocument]) {
    memes.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
}

fn meme_to_item(meme: &MemeDocument) -> HashMap<String, AttributeValue> {
    let mut item = HashMap::from([
        ("meme_id".to_string(), AttributeValue::S(meme.id.to_string())),
        ("name".to_string(), AttributeValue::S(meme.name.clone())),
        ("template".to_string(), AttributeValue::S(meme.template.clone())),
        ("image_key".to_string(), AttributeValue::S(meme.image_key.clone())),
        (
            "captions".to_string(),
            AttributeValue::L(meme.captions.iter().cloned().map(AttributeValue::S).collect()),
        ),
        (
            "comments".to_string(),
            AttributeValue::L(meme.comments.iter().map(comment_to_value).collect()),
        ),
        ("created_at".to_string(), AttributeValue::S(meme.created_at.to_rfc3339())),
    ]);
    if let Authorship::Authored { uid, name } = &meme.author {
        item.insert("author_uid".to_string(), AttributeValue::S(uid.clone()));
        item.insert("author_name".to_string(), AttributeValue::S(name.clone()));
    }
    if !meme.votes.upvotes.is_empty() {
        item.insert("upvotes".to_string(), AttributeValue::Ss(meme.votes.upvotes.iter().cloned().collect()));
    }
    if !meme.votes.downvotes.is_empty() {
        item.insert("downvotes".to_string(), AttributeValue::Ss(meme.votes.downvotes.iter().cloned().collect()));
    }
    item
}

fn comment_to_value(comment: &Comment) -> AttributeValue {
    AttributeValue::M(HashMap::from([
        ("user_uid".to_string(), AttributeValue::S(comment.user_uid.clone())),
        ("user_name".to_string(), AttributeValue::S(comment.user_name.clone())),
        ("text".to_string(), AttributeValue::S(comment.text.clone())),
        ("created_at".to_string(), AttributeValue::S(comment.created_at.to_rfc3339())),
    ]))
}

fn get_string(item: &HashMap<String, AttributeValue>, key: &str) -> Option<String> {
    item.get(key)?.as_s().ok().cloned()
}

fn get_time(item: &HashMap<String, AttributeValue>, key: &str) -> Option<DateTime<Utc>> {
    let raw = item.get(key)?.as_s().ok()?;
    DateTime::parse_from_rfc3339(raw).ok().map(|t| t.with_timezone(&Utc))
}

fn get_set(item: &HashMap<String, AttributeValue>, key: &str) -> BTreeSet<String> {
    item.get(key)
        .and_then(|v| v.as_ss().ok())
        .map(|members| members.iter().cloned().collect())
        .unwrap_or_default()
}

fn value_to_comment(value: &AttributeValue) -> Option<Comment> {
    let map = value.as_m().ok()?;
    Some(Comment {
        user_uid: get_string(map, "user_uid")?,
        user_name: get_string(map, "user_name")?,
        text: get_string(map, "text")?,
        created_at: get_time(map, "created_at")?,
    })
}

// Helper function to convert DynamoDB item map to MemeDocument.
fn item_to_meme(item: &HashMap<String, AttributeValue>) -> Option<MemeDocument> {
    let id = Uuid::parse_str(item.get("meme_id")?.as_s().ok()?).ok()?;

    let captions = match item.get("captions") {
        Some(value) => value
            .as_l()
            .ok()?
            .iter()
            .map(|c| c.as_s().ok().cloned())
            .collect::<Option<Vec<_>>>()?,
        None => Vec::new(),
    };
    let comments = match item.get("comments") {
        Some(value) => value
            .as_l()
            .ok()?
            .iter()
            .map(value_to_comment)
            .collect::<Option<Vec<_>>>()?,
        None => Vec::new(),
    };
    let author = match get_string(item, "author_uid") {
        Some(uid) => Authorship::Authored {
            uid,
            name: get_string(item, "author_name").unwrap_or_default(),
        },
        None => Authorship::Legacy {},
    };

    Some(MemeDocument {
        id,
        name: get_string(item, "name")?,
        template: get_string(item, "template")?,
        captions,
        author,
        votes: Votes {
            upvotes: get_set(item, "upvotes"),
            downvotes: get_set(item, "downvotes"),
        },
        comments,
        created_at: get_time(item, "created_at")?,
        image_key: get_string(item, "image_key")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MemeDocument {
        let mut votes = Votes::default();
        votes.apply("voter-1", Some(VoteKind::Upvote));
        MemeDocument {
            id: Uuid::new_v4(),
            name: "Top text".into(),
            template: "Drake Hotline Bling".into(),
            captions: vec!["Top text".into(), "Bottom text".into()],
            author: Authorship::authored("uid-1", "Ada"),
            votes,
            comments: vec![Comment {
                user_uid: "uid-2".into(),
                user_name: "Bob".into(),
                text: "lol".into(),
                created_at: "2024-05-01T12:00:00Z".parse().unwrap(),
            }],
            created_at: "2024-05-01T11:00:00Z".parse().unwrap(),
            image_key: "memes/x.png".into(),
        }
    }

    #[test]
    fn item_conversion_keeps_every_field() {
        let meme = sample();
        let item = meme_to_item(&meme);
        assert!(item.get("downvotes").is_none());
        assert_eq!(item_to_meme(&item), Some(meme));
    }

    #[test]
    fn legacy_item_without_author() {
        let mut meme = sample();
        meme.author = Authorship::Legacy {};
        let item = meme_to_item(&meme);
        assert!(!item.contains_key("author_uid"));
        assert_eq!(item_to_meme(&item).unwrap().author, Authorship::Legacy {});
    }

    #[test]
    fn item_missing_required_attribute_is_rejected() {
        let mut item = meme_to_item(&sample());
        item.remove("image_key");
        assert!(item_to_meme(&item).is_none());
    }

    #[test]
    fn vote_expressions_touch_both_sets() {
        assert_eq!(
            vote_update_expression(Some(VoteKind::Upvote)),
            "DELETE downvotes :uid ADD upvotes :uid"
        );
        assert_eq!(vote_update_expression(None), "DELETE upvotes :uid, downvotes :uid");
    }
}
