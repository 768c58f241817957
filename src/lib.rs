use std::sync::Arc;

pub mod auth;
pub mod aws_clients;
pub mod catalog;
pub mod client;
pub mod composer;
pub mod config;
pub mod domain;
pub mod errors;
pub mod export;
pub mod feed;
pub mod handlers;
pub mod imagedata;
pub mod local_store;
pub mod memory;
pub mod models;
pub mod repositories;
pub mod routes;
pub mod session;
pub mod startup;
pub mod storage;

use crate::{
    auth::TokenVerifier,
    domain::{FileStorage, MemeRepository},
};

/// Knobs the HTTP layer reads per request.
#[derive(Clone, Debug)]
pub struct ApiSettings {
    /// When set, `POST /memes` rejects anonymous callers instead of storing a legacy record.
    pub require_auth_for_create: bool,
    pub default_page_size: u32,
    /// Allowed CORS origins. Empty means permissive.
    pub cors_origins: Vec<String>,
    pub body_limit_bytes: usize,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            require_auth_for_create: false,
            default_page_size: 20,
            cors_origins: Vec::new(),
            body_limit_bytes: 50 * 1024 * 1024,
        }
    }
}

/// AppState holds shared resources for the web server.
#[derive(Clone)]
pub struct AppState {
    pub meme_repo: Arc<dyn MemeRepository>,
    pub file_storage: Arc<dyn FileStorage>,
    pub verifier: Arc<dyn TokenVerifier>,
    pub settings: ApiSettings,
}
