//! Bearer-token authentication: Firebase ID token verification and the axum extractors that
//! turn an `Authorization: Bearer <token>` header into an [`Identity`].

use crate::{
    AppState,
    errors::{AppError, AuthError},
    models::Identity,
};
use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, header, request::Parts},
};
use backoff::ExponentialBackoff;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rsa::{
    BigUint, RsaPublicKey,
    pkcs1v15::{Signature, VerifyingKey},
    signature::Verifier,
};
use serde::Deserialize;
use sha2::Sha256;
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::RwLock;

/// Clock skew tolerated on `exp` / `iat`, in seconds.
const CLOCK_LEEWAY_SECS: i64 = 60;
const DEFAULT_KEYS_MAX_AGE: Duration = Duration::from_secs(3600);

#[async_trait]
pub trait TokenVerifier: Send + Sync + 'static {
    async fn verify(&self, token: &str) -> Result<Identity, AuthError>;
}

#[derive(Deserialize, Debug)]
struct JwtHeader {
    alg: String,
    kid: Option<String>,
}

/// Claims carried by a Firebase ID token. `admin` is a custom claim granted out of band.
#[derive(Deserialize, Debug, Clone)]
pub struct FirebaseClaims {
    pub sub: String,
    pub aud: String,
    pub iss: String,
    pub exp: i64,
    pub iat: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub admin: Option<serde_json::Value>,
}

impl From<FirebaseClaims> for Identity {
    fn from(claims: FirebaseClaims) -> Self {
        Identity {
            uid: claims.sub,
            name: claims.name,
            email: claims.email,
            // Only a literal `true` grants admin.
            admin: claims.admin == Some(serde_json::Value::Bool(true)),
        }
    }
}

struct RawToken<'a> {
    header: JwtHeader,
    claims: FirebaseClaims,
    signing_input: &'a str,
    signature: Vec<u8>,
}

fn decode_segment<T: serde::de::DeserializeOwned>(segment: &str, what: &str) -> Result<T, AuthError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| AuthError::InvalidToken(format!("{what} is not base64url: {e}")))?;
    serde_json::from_slice(&bytes).map_err(|e| AuthError::InvalidToken(format!("{what} is not valid JSON: {e}")))
}

fn split_token(token: &str) -> Result<RawToken<'_>, AuthError> {
    let mut parts = token.split('.');
    let (Some(header), Some(payload), Some(signature), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(AuthError::InvalidToken("expected three dot-separated segments".into()));
    };

    let signing_input = &token[..header.len() + 1 + payload.len()];
    Ok(RawToken {
        header: decode_segment(header, "header")?,
        claims: decode_segment(payload, "payload")?,
        signing_input,
        signature: URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|e| AuthError::InvalidToken(format!("signature is not base64url: {e}")))?,
    })
}

/// Reads the identity out of a token without checking its signature.
///
/// Only for the client side, which needs to know who it is signed in as; the server must go
/// through a [`TokenVerifier`].
pub fn peek_identity(token: &str) -> Result<Identity, AuthError> {
    Ok(split_token(token)?.claims.into())
}

fn verify_signature(key: &RsaPublicKey, signing_input: &str, signature: &[u8]) -> Result<(), AuthError> {
    let signature = Signature::try_from(signature)
        .map_err(|e| AuthError::InvalidToken(format!("malformed signature: {e}")))?;
    VerifyingKey::<Sha256>::new(key.clone())
        .verify(signing_input.as_bytes(), &signature)
        .map_err(|_| AuthError::InvalidToken("signature mismatch".into()))
}

#[derive(Deserialize)]
struct Jwk {
    kid: String,
    kty: String,
    n: String,
    e: String,
}

#[derive(Deserialize)]
struct JwkSet {
    keys: Vec<Jwk>,
}

fn jwk_to_key(jwk: &Jwk) -> Result<RsaPublicKey, String> {
    if jwk.kty != "RSA" {
        return Err(format!("unsupported key type '{}'", jwk.kty));
    }
    let n = URL_SAFE_NO_PAD.decode(&jwk.n).map_err(|e| e.to_string())?;
    let e = URL_SAFE_NO_PAD.decode(&jwk.e).map_err(|e| e.to_string())?;
    RsaPublicKey::new(BigUint::from_bytes_be(&n), BigUint::from_bytes_be(&e)).map_err(|e| e.to_string())
}

/// `max-age` from a `Cache-Control` header.
fn cache_max_age(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(header::CACHE_CONTROL)?.to_str().ok()?;
    value
        .split(',')
        .filter_map(|directive| directive.trim().strip_prefix("max-age="))
        .find_map(|secs| secs.parse().ok())
        .map(Duration::from_secs)
}

struct CachedKeys {
    keys: HashMap<String, RsaPublicKey>,
    expires_at: Instant,
}

/// Verifies Firebase ID tokens (RS256) against Google's published signing keys.
pub struct FirebaseTokenVerifier {
    project_id: String,
    jwks_url: String,
    http: reqwest::Client,
    cache: RwLock<Option<CachedKeys>>,
}

impl FirebaseTokenVerifier {
    pub fn new(project_id: String, jwks_url: String) -> Self {
        tracing::info!(%project_id, %jwks_url, "Initializing Firebase token verifier");
        Self {
            project_id,
            jwks_url,
            http: reqwest::Client::new(),
            cache: RwLock::new(None),
        }
    }

    fn issuer(&self) -> String {
        format!("https://securetoken.google.com/{}", self.project_id)
    }

    async fn key_for(&self, kid: &str) -> Result<RsaPublicKey, AuthError> {
        if let Some(cached) = self.cache.read().await.as_ref() {
            if cached.expires_at > Instant::now() {
                if let Some(key) = cached.keys.get(kid) {
                    return Ok(key.clone());
                }
            }
        }

        // Expired, empty, or a rotated key we have not seen yet.
        let (keys, max_age) = self.fetch_keys().await?;
        let key = keys.get(kid).cloned();
        *self.cache.write().await = Some(CachedKeys {
            keys,
            expires_at: Instant::now() + max_age,
        });
        key.ok_or_else(|| AuthError::InvalidToken(format!("unknown key id '{kid}'")))
    }

    async fn fetch_keys(&self) -> Result<(HashMap<String, RsaPublicKey>, Duration), AuthError> {
        tracing::debug!(url = %self.jwks_url, "Fetching token signing keys");
        let http = &self.http;
        let url = self.jwks_url.as_str();
        let policy = ExponentialBackoff {
            max_elapsed_time: Some(Duration::from_secs(10)),
            ..Default::default()
        };

        let (set, max_age) = backoff::future::retry(policy, move || async move {
            let resp = http.get(url).send().await.map_err(backoff::Error::transient)?;
            let resp = resp.error_for_status().map_err(|e| {
                if e.status().is_some_and(|s| s.is_client_error()) {
                    backoff::Error::permanent(e)
                } else {
                    backoff::Error::transient(e)
                }
            })?;
            let max_age = cache_max_age(resp.headers()).unwrap_or(DEFAULT_KEYS_MAX_AGE);
            let set: JwkSet = resp.json().await.map_err(backoff::Error::permanent)?;
            Ok::<_, backoff::Error<reqwest::Error>>((set, max_age))
        })
        .await
        .map_err(|e| AuthError::KeysUnavailable(e.to_string()))?;

        let mut keys = HashMap::new();
        for jwk in &set.keys {
            match jwk_to_key(jwk) {
                Ok(key) => {
                    keys.insert(jwk.kid.clone(), key);
                }
                Err(reason) => tracing::warn!(kid = %jwk.kid, %reason, "Skipping unusable signing key"),
            }
        }
        tracing::info!(count = keys.len(), ?max_age, "Loaded token signing keys");
        Ok((keys, max_age))
    }

    fn validate_claims(&self, claims: &FirebaseClaims, now: i64) -> Result<(), AuthError> {
        if claims.exp + CLOCK_LEEWAY_SECS < now {
            return Err(AuthError::InvalidToken("token expired".into()));
        }
        if claims.iat - CLOCK_LEEWAY_SECS > now {
            return Err(AuthError::InvalidToken("token issued in the future".into()));
        }
        if claims.aud != self.project_id {
            return Err(AuthError::InvalidToken(format!("unexpected audience '{}'", claims.aud)));
        }
        if claims.iss != self.issuer() {
            return Err(AuthError::InvalidToken(format!("unexpected issuer '{}'", claims.iss)));
        }
        if claims.sub.is_empty() || claims.sub.len() > 128 {
            return Err(AuthError::InvalidToken("invalid subject".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl TokenVerifier for FirebaseTokenVerifier {
    async fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        let raw = split_token(token)?;
        if raw.header.alg != "RS256" {
            return Err(AuthError::InvalidToken(format!("unexpected algorithm '{}'", raw.header.alg)));
        }
        let kid = raw
            .header
            .kid
            .as_deref()
            .ok_or_else(|| AuthError::InvalidToken("missing key id".into()))?;

        let key = self.key_for(kid).await?;
        verify_signature(&key, raw.signing_input, &raw.signature)?;
        self.validate_claims(&raw.claims, chrono::Utc::now().timestamp())?;
        Ok(raw.claims.into())
    }
}

// --- Extractors ---

/// The token from `Authorization: Bearer <token>`, `None` when the header is absent.
fn bearer_token(parts: &Parts) -> Result<Option<&str>, AuthError> {
    let Some(value) = parts.headers.get(header::AUTHORIZATION) else {
        return Ok(None);
    };
    let token = value
        .to_str()
        .ok()
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(AuthError::MissingToken)?;
    Ok(Some(token))
}

async fn authenticate(state: &AppState, token: &str) -> Result<Identity, AppError> {
    let identity = state.verifier.verify(token).await?;
    tracing::debug!(uid = %identity.uid, admin = identity.admin, "Authenticated caller");
    Ok(identity)
}

/// A caller with a valid token. Missing token → 401, invalid token → 403.
pub struct AuthUser(pub Identity);

/// A caller who may be anonymous. A token that is present must still be valid.
pub struct MaybeAuthUser(pub Option<Identity>);

/// A caller holding the admin claim. Anyone else → 403.
pub struct AdminUser(pub Identity);

impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)?.ok_or(AuthError::MissingToken)?;
        Ok(AuthUser(authenticate(state, token).await?))
    }
}

impl FromRequestParts<Arc<AppState>> for MaybeAuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        match bearer_token(parts)? {
            Some(token) => Ok(MaybeAuthUser(Some(authenticate(state, token).await?))),
            None => Ok(MaybeAuthUser(None)),
        }
    }
}

impl FromRequestParts<Arc<AppState>> for AdminUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let AuthUser(identity) = AuthUser::from_request_parts(parts, state).await?;
        if !identity.admin {
            tracing::warn!(uid = %identity.uid, "Non-admin caller attempted an admin operation");
            return Err(AppError::Forbidden("Admin access required".to_string()));
        }
        Ok(AdminUser(identity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderValue, Request};
    use rsa::{
        RsaPrivateKey,
        pkcs1v15::SigningKey,
        signature::{SignatureEncoding, Signer},
    };
    use serde_json::json;
    use std::sync::OnceLock;

    const PROJECT: &str = "meme-project";

    fn private_key() -> &'static RsaPrivateKey {
        static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
        KEY.get_or_init(|| RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap())
    }

    fn sign(header: serde_json::Value, claims: serde_json::Value) -> String {
        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(header.to_string()),
            URL_SAFE_NO_PAD.encode(claims.to_string())
        );
        let signer = SigningKey::<Sha256>::new(private_key().clone());
        let signature = signer.sign(signing_input.as_bytes()).to_bytes();
        format!("{}.{}", signing_input, URL_SAFE_NO_PAD.encode(signature))
    }

    fn claims(now: i64) -> serde_json::Value {
        json!({
            "sub": "uid-123",
            "aud": PROJECT,
            "iss": format!("https://securetoken.google.com/{PROJECT}"),
            "iat": now - 10,
            "exp": now + 3600,
            "name": "Test User",
            "email": "test@example.com",
        })
    }

    async fn verifier_with_key() -> FirebaseTokenVerifier {
        let verifier = FirebaseTokenVerifier::new(PROJECT.into(), "http://127.0.0.1:9/keys".into());
        *verifier.cache.write().await = Some(CachedKeys {
            keys: HashMap::from([("k1".to_string(), private_key().to_public_key())]),
            expires_at: Instant::now() + Duration::from_secs(600),
        });
        verifier
    }

    #[tokio::test]
    async fn accepts_well_formed_token() {
        let verifier = verifier_with_key().await;
        let now = chrono::Utc::now().timestamp();
        let token = sign(json!({"alg": "RS256", "kid": "k1"}), claims(now));

        let identity = verifier.verify(&token).await.unwrap();
        assert_eq!(identity.uid, "uid-123");
        assert_eq!(identity.name.as_deref(), Some("Test User"));
        assert!(!identity.admin);
    }

    #[tokio::test]
    async fn admin_claim_must_be_literal_true() {
        let verifier = verifier_with_key().await;
        let now = chrono::Utc::now().timestamp();

        let mut admin = claims(now);
        admin["admin"] = json!(true);
        let token = sign(json!({"alg": "RS256", "kid": "k1"}), admin);
        assert!(verifier.verify(&token).await.unwrap().admin);

        let mut stringly = claims(now);
        stringly["admin"] = json!("true");
        let token = sign(json!({"alg": "RS256", "kid": "k1"}), stringly);
        assert!(!verifier.verify(&token).await.unwrap().admin);
    }

    #[tokio::test]
    async fn rejects_tampered_payload() {
        let verifier = verifier_with_key().await;
        let now = chrono::Utc::now().timestamp();
        let token = sign(json!({"alg": "RS256", "kid": "k1"}), claims(now));

        let mut forged = claims(now);
        forged["admin"] = json!(true);
        let mut segments: Vec<&str> = token.split('.').collect();
        let forged_payload = URL_SAFE_NO_PAD.encode(forged.to_string());
        segments[1] = &forged_payload;
        let forged_token = segments.join(".");

        assert!(matches!(
            verifier.verify(&forged_token).await,
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[tokio::test]
    async fn rejects_expired_and_wrong_audience() {
        let verifier = verifier_with_key().await;
        let now = chrono::Utc::now().timestamp();

        let mut expired = claims(now);
        expired["exp"] = json!(now - 3600);
        let token = sign(json!({"alg": "RS256", "kid": "k1"}), expired);
        assert!(matches!(verifier.verify(&token).await, Err(AuthError::InvalidToken(_))));

        let mut other_project = claims(now);
        other_project["aud"] = json!("someone-else");
        let token = sign(json!({"alg": "RS256", "kid": "k1"}), other_project);
        assert!(matches!(verifier.verify(&token).await, Err(AuthError::InvalidToken(_))));
    }

    #[tokio::test]
    async fn rejects_non_rs256_and_missing_kid() {
        let verifier = verifier_with_key().await;
        let now = chrono::Utc::now().timestamp();

        let token = sign(json!({"alg": "HS256", "kid": "k1"}), claims(now));
        assert!(matches!(verifier.verify(&token).await, Err(AuthError::InvalidToken(_))));

        let token = sign(json!({"alg": "RS256"}), claims(now));
        assert!(matches!(verifier.verify(&token).await, Err(AuthError::InvalidToken(_))));
    }

    #[test]
    fn malformed_tokens_are_invalid() {
        assert!(matches!(split_token("abc"), Err(AuthError::InvalidToken(_))));
        assert!(matches!(split_token("a.b.c.d"), Err(AuthError::InvalidToken(_))));
        assert!(matches!(split_token("!!.!!.!!"), Err(AuthError::InvalidToken(_))));
    }

    #[test]
    fn peek_reads_claims_without_verifying() {
        let now = chrono::Utc::now().timestamp();
        let token = sign(json!({"alg": "RS256", "kid": "whatever"}), claims(now));
        let identity = peek_identity(&token).unwrap();
        assert_eq!(identity.email.as_deref(), Some("test@example.com"));
    }

    #[test]
    fn max_age_parsed_from_cache_control() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CACHE_CONTROL,
            HeaderValue::from_static("public, max-age=19845, must-revalidate, no-transform"),
        );
        assert_eq!(cache_max_age(&headers), Some(Duration::from_secs(19845)));
        assert_eq!(cache_max_age(&HeaderMap::new()), None);
    }

    #[test]
    fn bearer_header_parsing() {
        let parts = |value: Option<&'static str>| {
            let mut builder = Request::builder();
            if let Some(v) = value {
                builder = builder.header(header::AUTHORIZATION, v);
            }
            builder.body(()).unwrap().into_parts().0
        };

        assert!(matches!(bearer_token(&parts(None)), Ok(None)));
        let with_token = parts(Some("Bearer abc.def.ghi"));
        assert_eq!(bearer_token(&with_token).unwrap(), Some("abc.def.ghi"));
        assert!(matches!(
            bearer_token(&parts(Some("Basic dXNlcjpwYXNz"))),
            Err(AuthError::MissingToken)
        ));
        assert!(matches!(
            bearer_token(&parts(Some("Bearer   "))),
            Err(AuthError::MissingToken)
        ));
    }
}
