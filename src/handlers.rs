use crate::{
    AppState,
    auth::{AdminUser, AuthUser, MaybeAuthUser},
    errors::{AppError, StorageError},
    imagedata::{self, ImageData},
    models::{
        AdminStats, Authorship, Comment, CommentRequest, CreateMemeRequest, HealthResponse, MemeDocument,
        MemePage, MemeRecord, MessageResponse, VoteRequest, Votes, total_pages,
    },
    storage::guess_content_type,
};
use axum::{
    Json,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::StatusCode,
};
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

const MAX_PAGE_SIZE: u32 = 100;
const MAX_COMMENT_CHARS: usize = 500;

#[derive(Deserialize, Debug, Default)]
pub struct ListParams {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

impl ListParams {
    /// `(page, limit)` after defaults and clamping. A zero or absent limit means the default.
    fn resolve(&self, default_limit: u32) -> (u32, u32) {
        let page = self.page.unwrap_or(1).clamp(1, i64::from(u32::MAX)) as u32;
        let limit = match self.limit {
            None | Some(0) => i64::from(default_limit),
            Some(n) => n,
        };
        (page, limit.clamp(1, i64::from(MAX_PAGE_SIZE)) as u32)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Re-embeds the stored image so the record handed out is self-contained.
async fn hydrate(state: &AppState, meme: MemeDocument) -> Result<MemeRecord, AppError> {
    let image_data = match state.file_storage.download(&meme.image_key).await {
        Ok((bytes, content_type)) => {
            let mime = content_type.unwrap_or_else(|| guess_content_type(&meme.image_key));
            imagedata::to_data_url(&mime, &bytes)
        }
        Err(StorageError::NotFound(key)) => {
            tracing::warn!(meme_id = %meme.id, image_key = %key, "Image object missing, serving record without image");
            String::new()
        }
        Err(e) => return Err(e.into()),
    };
    Ok(meme.into_record(image_data))
}

async fn hydrate_all(state: &AppState, memes: Vec<MemeDocument>) -> Result<Vec<MemeRecord>, AppError> {
    let mut records = Vec::with_capacity(memes.len());
    for meme in memes {
        records.push(hydrate(state, meme).await?);
    }
    Ok(records)
}

async fn load_meme(state: &AppState, id_str: &str) -> Result<MemeDocument, AppError> {
    let meme_id = Uuid::parse_str(id_str)?;
    state
        .meme_repo
        .get_by_id(meme_id)
        .await?
        .ok_or(AppError::MemeNotFound(meme_id))
}

/// Removes the image object, then the metadata. A missing image does not block the delete.
async fn remove_meme(state: &AppState, meme: &MemeDocument) -> Result<(), AppError> {
    match state.file_storage.delete(&meme.image_key).await {
        Ok(()) => tracing::debug!(image_key = %meme.image_key, "Deleted image from storage"),
        Err(StorageError::NotFound(_)) => {
            tracing::warn!(image_key = %meme.image_key, "Image not found in storage during delete, proceeding with metadata deletion")
        }
        Err(e) => {
            tracing::error!(image_key = %meme.image_key, error = ?e, "Failed to delete image from storage");
            return Err(e.into());
        }
    }
    state.meme_repo.delete(meme.id).await?;
    Ok(())
}

/// Handler for GET /memes?page&limit
pub async fn list_memes(
    State(state): State<Arc<AppState>>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> Result<Json<MemePage>, AppError> {
    let Query(params) = params?;
    let (page, limit) = params.resolve(state.settings.default_page_size);
    tracing::debug!(page, limit, "Listing memes");

    let offset = (page as usize - 1) * limit as usize;
    let (memes, total) = state.meme_repo.list_page(offset, limit as usize).await?;
    let memes = hydrate_all(&state, memes).await?;

    tracing::info!(page, returned = memes.len(), total, "Listed memes");
    Ok(Json(MemePage {
        memes,
        current_page: page,
        total_pages: total_pages(total as u64, limit),
        total_memes: total as u64,
    }))
}

/// Handler for GET /memes/{id}
pub async fn get_meme(
    State(state): State<Arc<AppState>>,
    Path(id_str): Path<String>,
) -> Result<Json<MemeRecord>, AppError> {
    let meme = load_meme(&state, &id_str).await?;
    tracing::debug!(meme_id = %meme.id, "Fetched meme");
    Ok(Json(hydrate(&state, meme).await?))
}

/// Handler for GET /memes/user/{uid}
pub async fn list_user_memes(
    State(state): State<Arc<AppState>>,
    Path(uid): Path<String>,
) -> Result<Json<Vec<MemeRecord>>, AppError> {
    let memes = state.meme_repo.list_by_author(&uid).await?;
    tracing::debug!(author_uid = %uid, count = memes.len(), "Listed memes by author");
    Ok(Json(hydrate_all(&state, memes).await?))
}

/// Handler for POST /memes
pub async fn create_meme(
    State(state): State<Arc<AppState>>,
    MaybeAuthUser(caller): MaybeAuthUser,
    body: Result<Json<CreateMemeRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<MemeRecord>), AppError> {
    if caller.is_none() && state.settings.require_auth_for_create {
        return Err(AppError::Unauthorized("No token provided".to_string()));
    }
    let Json(req) = body?;

    let (Some(name), Some(image_data), Some(template)) = (
        non_empty(req.name),
        non_empty(req.image_data),
        non_empty(req.template),
    ) else {
        tracing::debug!("Rejecting meme with missing fields");
        return Err(AppError::MissingFields);
    };
    let image = ImageData::parse(&image_data)?;

    let meme_id = Uuid::new_v4();
    let image_key = format!("memes/{}.{}", meme_id, image.extension());
    let ImageData { mime, bytes } = image;
    state.file_storage.upload(&image_key, bytes, Some(mime)).await?;

    let author = match &caller {
        Some(identity) => Authorship::authored(&identity.uid, identity.display_name()),
        None => Authorship::Legacy {},
    };
    let meme = MemeDocument {
        id: meme_id,
        name,
        template,
        captions: req.captions.unwrap_or_default(),
        author,
        votes: Votes::default(),
        comments: Vec::new(),
        created_at: Utc::now(),
        image_key,
    };

    if let Err(e) = state.meme_repo.create(&meme).await {
        // Don't leave an orphaned image behind.
        if let Err(cleanup) = state.file_storage.delete(&meme.image_key).await {
            tracing::warn!(image_key = %meme.image_key, error = ?cleanup, "Failed to clean up image after failed create");
        }
        return Err(e.into());
    }

    tracing::info!(%meme_id, author_uid = ?meme.author.uid(), "Meme created successfully");
    Ok((StatusCode::CREATED, Json(meme.into_record(image_data))))
}

/// Handler for POST /memes/{id}/vote
pub async fn vote_meme(
    State(state): State<Arc<AppState>>,
    AuthUser(caller): AuthUser,
    Path(id_str): Path<String>,
    body: Result<Json<VoteRequest>, JsonRejection>,
) -> Result<Json<MemeRecord>, AppError> {
    let meme_id = Uuid::parse_str(&id_str)?;
    let Json(req) = body?;

    let updated = state.meme_repo.set_vote(meme_id, &caller.uid, req.kind).await?;
    tracing::info!(%meme_id, uid = %caller.uid, vote = ?req.kind, "Vote recorded");
    Ok(Json(hydrate(&state, updated).await?))
}

/// Handler for POST /memes/{id}/comments
pub async fn comment_meme(
    State(state): State<Arc<AppState>>,
    AuthUser(caller): AuthUser,
    Path(id_str): Path<String>,
    body: Result<Json<CommentRequest>, JsonRejection>,
) -> Result<Json<MemeRecord>, AppError> {
    let meme_id = Uuid::parse_str(&id_str)?;
    let Json(req) = body?;

    let text = req.text.trim();
    if text.is_empty() {
        return Err(AppError::InvalidInput("Comment text is required".to_string()));
    }
    if text.chars().count() > MAX_COMMENT_CHARS {
        return Err(AppError::InvalidInput(format!(
            "Comment text must be at most {} characters",
            MAX_COMMENT_CHARS
        )));
    }

    let comment = Comment {
        user_uid: caller.uid.clone(),
        user_name: caller.display_name(),
        text: text.to_string(),
        created_at: Utc::now(),
    };
    let updated = state.meme_repo.add_comment(meme_id, &comment).await?;
    tracing::info!(%meme_id, uid = %caller.uid, "Comment added");
    Ok(Json(hydrate(&state, updated).await?))
}

/// Handler for DELETE /memes/{id}. Authors may delete their own memes, admins any.
pub async fn delete_meme(
    State(state): State<Arc<AppState>>,
    AuthUser(caller): AuthUser,
    Path(id_str): Path<String>,
) -> Result<Json<MessageResponse>, AppError> {
    let meme = load_meme(&state, &id_str).await?;

    if !caller.admin && !meme.author.is_authored_by(&caller.uid) {
        tracing::warn!(meme_id = %meme.id, uid = %caller.uid, "Caller may not delete this meme");
        return Err(AppError::Forbidden("Not authorized to delete this meme".to_string()));
    }

    remove_meme(&state, &meme).await?;
    tracing::info!(meme_id = %meme.id, uid = %caller.uid, "Meme deleted successfully");
    Ok(Json(MessageResponse {
        message: "Meme deleted successfully".to_string(),
    }))
}

/// Handler for GET /admin/stats
pub async fn admin_stats(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
) -> Result<Json<AdminStats>, AppError> {
    let memes = state.meme_repo.list_all().await?;
    let stats = AdminStats::compute(&memes, Utc::now());
    tracing::info!(uid = %admin.uid, total = stats.total_memes, "Computed admin stats");
    Ok(Json(stats))
}

/// Handler for DELETE /admin/memes/{id}
pub async fn admin_delete_meme(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(id_str): Path<String>,
) -> Result<Json<MessageResponse>, AppError> {
    let meme = load_meme(&state, &id_str).await?;
    remove_meme(&state, &meme).await?;
    tracing::info!(meme_id = %meme.id, uid = %admin.uid, "Meme deleted by admin");
    Ok(Json(MessageResponse {
        message: "Meme deleted by admin".to_string(),
    }))
}

/// Handler for GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "OK".to_string(),
        message: "Server is running".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(page: Option<i64>, limit: Option<i64>) -> ListParams {
        ListParams { page, limit }
    }

    #[test]
    fn list_params_defaults_and_clamps() {
        assert_eq!(params(None, None).resolve(20), (1, 20));
        assert_eq!(params(Some(0), Some(0)).resolve(20), (1, 20));
        assert_eq!(params(Some(-4), Some(-1)).resolve(20), (1, 1));
        assert_eq!(params(Some(3), Some(1000)).resolve(20), (3, 100));
        assert_eq!(params(Some(2), Some(10)).resolve(20), (2, 10));
    }

    #[test]
    fn blank_fields_count_as_missing() {
        assert_eq!(non_empty(Some("  ".into())), None);
        assert_eq!(non_empty(None), None);
        assert_eq!(non_empty(Some("x".into())), Some("x".into()));
    }
}
