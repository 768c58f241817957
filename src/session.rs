//! Client session: the signed-in identity and its token, with an idle timeout.
//!
//! [`Session::init`] spawns a background task that checks for inactivity on a fixed interval
//! and signs the user out once the idle timeout has passed. The task lives until
//! [`Session::teardown`] or drop.

use crate::{auth::peek_identity, errors::AuthError, models::Identity};
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{RwLock, watch},
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub idle_timeout: Duration,
    pub check_interval: Duration,
    /// Activity closer together than this is recorded once.
    pub activity_throttle: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(60 * 60),
            check_interval: Duration::from_secs(60),
            activity_throttle: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    SignedOut,
    Active(Identity),
    /// Signed out by the idle timeout or an explicit `expire`.
    Expired,
}

#[derive(Debug)]
struct SessionState {
    token: Option<String>,
    identity: Option<Identity>,
    last_activity: Instant,
}

impl SessionState {
    fn clear(&mut self) {
        self.token = None;
        self.identity = None;
    }
}

pub struct Session {
    config: SessionConfig,
    state: Arc<RwLock<SessionState>>,
    status: Arc<watch::Sender<SessionStatus>>,
    idle_task: Option<JoinHandle<()>>,
}

impl Session {
    /// Starts a signed-out session and its idle check. Must be called inside a tokio runtime.
    pub fn init(config: SessionConfig) -> Self {
        let state = Arc::new(RwLock::new(SessionState {
            token: None,
            identity: None,
            last_activity: Instant::now(),
        }));
        let (status, _) = watch::channel(SessionStatus::SignedOut);
        let status = Arc::new(status);

        let idle_task = tokio::spawn(idle_check(
            state.clone(),
            status.clone(),
            config.idle_timeout,
            config.check_interval,
        ));

        Session {
            config,
            state,
            status,
            idle_task: Some(idle_task),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    /// Signs in with an ID token. The token is decoded, not verified; the server verifies it.
    pub async fn sign_in(&self, token: String) -> Result<Identity, AuthError> {
        let identity = peek_identity(&token)?;
        {
            let mut state = self.state.write().await;
            state.token = Some(token);
            state.identity = Some(identity.clone());
            state.last_activity = Instant::now();
        }
        tracing::info!(uid = %identity.uid, "Signed in");
        self.status.send_replace(SessionStatus::Active(identity.clone()));
        Ok(identity)
    }

    /// Replaces the token of the current session, e.g. after the identity provider re-issued it.
    pub async fn refresh(&self, token: String) -> Result<Identity, AuthError> {
        let identity = peek_identity(&token)?;
        let mut state = self.state.write().await;
        if state.identity.is_none() {
            return Err(AuthError::MissingToken);
        }
        state.token = Some(token);
        state.identity = Some(identity.clone());
        state.last_activity = Instant::now();
        drop(state);

        tracing::debug!(uid = %identity.uid, "Session token refreshed");
        self.status.send_replace(SessionStatus::Active(identity.clone()));
        Ok(identity)
    }

    pub async fn current_identity(&self) -> Option<Identity> {
        self.state.read().await.identity.clone()
    }

    pub async fn token(&self) -> Option<String> {
        self.state.read().await.token.clone()
    }

    /// Records user activity, at most once per throttle window.
    pub async fn touch(&self) {
        let now = Instant::now();
        if now.duration_since(self.state.read().await.last_activity) < self.config.activity_throttle {
            return;
        }
        self.state.write().await.last_activity = now;
    }

    pub async fn sign_out(&self) {
        self.state.write().await.clear();
        self.status.send_replace(SessionStatus::SignedOut);
        tracing::info!("Signed out");
    }

    /// Ends the session as if it had timed out.
    pub async fn expire(&self) {
        self.state.write().await.clear();
        self.status.send_replace(SessionStatus::Expired);
        tracing::info!("Session expired");
    }

    /// Stops the idle check. The session keeps its state but will no longer time out.
    pub fn teardown(&mut self) {
        if let Some(task) = self.idle_task.take() {
            task.abort();
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.teardown();
    }
}

async fn idle_check(
    state: Arc<RwLock<SessionState>>,
    status: Arc<watch::Sender<SessionStatus>>,
    idle_timeout: Duration,
    check_interval: Duration,
) {
    let mut ticker = tokio::time::interval(check_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let mut state = state.write().await;
        if state.identity.is_some() && state.last_activity.elapsed() >= idle_timeout {
            tracing::info!(uid = ?state.identity.as_ref().map(|i| &i.uid), "Session idle, signing out");
            state.clear();
            status.send_replace(SessionStatus::Expired);
        }
    }
}
