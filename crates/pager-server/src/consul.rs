//! Consul HTTP API adapters.
//!
//! [`ConsulClient`] serves blocking health and event queries to the engine.
//! [`ConsulLock`] is a client of Consul's session + KV acquire primitive; the
//! mutual exclusion itself lives in Consul.

use crate::config::{CheckConfig, ConsulSettings};
use async_trait::async_trait;
use base64::Engine;
use pager::source::{StateFilter, WatchResponse};
use pager::{HealthRecord, LeadershipLock, MembershipSource, PagerError, UserEvent};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};
use validator::Validate;

/// Session name shown in the Consul UI
const SESSION_NAME: &str = "Pager";

/// Slack added to blocking request timeouts; Consul adds up to wait/16 of jitter
const BLOCKING_SLACK: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ConsulError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("invalid check: {0}")]
    InvalidCheck(String),
}

impl ConsulError {
    pub fn into_lock(self, op: &'static str) -> PagerError {
        PagerError::lock(op, self)
    }

    pub fn into_source(self, kind: &'static str) -> PagerError {
        PagerError::source(kind, self)
    }
}

/// Thin client over the subset of the Consul HTTP API the pager uses
#[derive(Debug, Clone)]
pub struct ConsulClient {
    http: reqwest::Client,
    base: String,
    datacenter: Option<String>,
    token: Option<String>,
}

/// Event as returned by `/v1/event/list`; the payload is base64
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawEvent {
    #[serde(rename = "ID")]
    id: String,
    name: String,
    #[serde(default)]
    payload: Option<String>,
    #[serde(default)]
    node_filter: String,
    #[serde(default)]
    service_filter: String,
    #[serde(default)]
    tag_filter: String,
    #[serde(default)]
    version: u32,
    #[serde(rename = "LTime", default)]
    ltime: u64,
}

impl From<RawEvent> for UserEvent {
    fn from(raw: RawEvent) -> Self {
        let payload = raw.payload.map(|encoded| {
            match base64::engine::general_purpose::STANDARD.decode(encoded.as_bytes()) {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(_) => encoded,
            }
        });
        UserEvent {
            id: raw.id,
            name: raw.name,
            payload,
            node_filter: raw.node_filter,
            service_filter: raw.service_filter,
            tag_filter: raw.tag_filter,
            version: raw.version,
            ltime: raw.ltime,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct KvEntry {
    #[serde(default)]
    session: Option<String>,
    #[serde(default)]
    modify_index: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct SessionRequest<'a> {
    name: &'a str,
    #[serde(rename = "TTL")]
    ttl: String,
    behavior: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SessionCreated {
    #[serde(rename = "ID")]
    id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct CheckRegistration<'a> {
    #[serde(rename = "ID")]
    id: &'a str,
    name: &'a str,
    args: [&'a str; 3],
    interval: &'a str,
}

impl ConsulClient {
    pub fn new(settings: &ConsulSettings) -> Result<Self, ConsulError> {
        // No overall timeout: blocking queries set their own per request
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()?;

        Ok(Self {
            http,
            base: settings.address.trim_end_matches('/').to_string(),
            datacenter: settings.datacenter.clone(),
            token: settings.token.clone(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mut request = self.http.request(method, format!("{}/v1/{}", self.base, path));
        if let Some(ref dc) = self.datacenter {
            request = request.query(&[("dc", dc)]);
        }
        if let Some(ref token) = self.token {
            request = request.header("X-Consul-Token", token);
        }
        request
    }

    async fn send(request: RequestBuilder) -> Result<reqwest::Response, ConsulError> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ConsulError::Status {
            status: status.as_u16(),
            body,
        })
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ConsulError> {
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| ConsulError::Decode(e.to_string()))
    }

    /// Blocking query: returns once the resource index moves past `since`
    /// or `wait` runs out.
    async fn blocking_get<T: DeserializeOwned>(
        &self,
        path: &str,
        wait: Duration,
        since: u64,
    ) -> Result<(T, u64), ConsulError> {
        let request = self
            .request(Method::GET, path)
            .query(&[
                ("index", since.to_string()),
                ("wait", format!("{}ms", wait.as_millis())),
            ])
            .timeout(wait + wait / 16 + BLOCKING_SLACK);

        let response = Self::send(request).await?;
        let index = response
            .headers()
            .get("X-Consul-Index")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .ok_or_else(|| ConsulError::Decode("missing X-Consul-Index header".to_string()))?;
        let body = Self::decode(response).await?;
        debug!(path, since, index, "Blocking query returned");
        Ok((body, index))
    }

    /// Address of the Raft leader; used to verify the agent is reachable.
    pub async fn leader(&self) -> Result<String, ConsulError> {
        let response = Self::send(self.request(Method::GET, "status/leader")).await?;
        Self::decode(response).await
    }

    /// Register a script check with the local agent.
    pub async fn register_check(&self, check: &CheckConfig) -> Result<(), ConsulError> {
        check
            .validate()
            .map_err(|_| ConsulError::InvalidCheck("needs name, interval and script".to_string()))?;

        let body = CheckRegistration {
            id: &check.name,
            name: &check.name,
            args: ["/bin/sh", "-c", &check.script],
            interval: &check.interval,
        };
        Self::send(self.request(Method::PUT, "agent/check/register").json(&body)).await?;
        info!(check = %check.name, interval = %check.interval, "Check registered");
        Ok(())
    }

    async fn create_session(&self, ttl: Duration) -> Result<String, ConsulError> {
        let body = SessionRequest {
            name: SESSION_NAME,
            ttl: format!("{}s", ttl.as_secs()),
            behavior: "release",
        };
        let response = Self::send(self.request(Method::PUT, "session/create").json(&body)).await?;
        let created: SessionCreated = Self::decode(response).await?;
        Ok(created.id)
    }

    async fn renew_session(&self, session: &str) -> Result<(), ConsulError> {
        Self::send(self.request(Method::PUT, &format!("session/renew/{session}"))).await?;
        Ok(())
    }

    async fn destroy_session(&self, session: &str) -> Result<(), ConsulError> {
        Self::send(self.request(Method::PUT, &format!("session/destroy/{session}"))).await?;
        Ok(())
    }

    async fn kv_acquire(&self, key: &str, session: &str) -> Result<bool, ConsulError> {
        let request = self
            .request(Method::PUT, &format!("kv/{key}"))
            .query(&[("acquire", session)]);
        Self::decode(Self::send(request).await?).await
    }

    async fn kv_release(&self, key: &str, session: &str) -> Result<bool, ConsulError> {
        let request = self
            .request(Method::PUT, &format!("kv/{key}"))
            .query(&[("release", session)]);
        Self::decode(Self::send(request).await?).await
    }

    async fn kv_get(&self, key: &str) -> Result<Option<KvEntry>, ConsulError> {
        match Self::send(self.request(Method::GET, &format!("kv/{key}"))).await {
            Ok(response) => {
                let mut entries: Vec<KvEntry> = Self::decode(response).await?;
                Ok(entries.pop())
            }
            Err(ConsulError::Status { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn kv_delete_cas(&self, key: &str, modify_index: u64) -> Result<bool, ConsulError> {
        let request = self
            .request(Method::DELETE, &format!("kv/{key}"))
            .query(&[("cas", modify_index)]);
        Self::decode(Self::send(request).await?).await
    }
}

#[async_trait]
impl MembershipSource for ConsulClient {
    async fn watch_health(
        &self,
        filter: StateFilter,
        wait: Duration,
        since: u64,
    ) -> pager::Result<WatchResponse<HealthRecord>> {
        let path = format!("health/state/{}", filter.as_str());
        let (items, index) = self
            .blocking_get::<Vec<HealthRecord>>(&path, wait, since)
            .await
            .map_err(|e| e.into_source("health"))?;
        Ok(WatchResponse::new(items, index))
    }

    async fn watch_events(
        &self,
        wait: Duration,
        since: u64,
    ) -> pager::Result<WatchResponse<UserEvent>> {
        let (raw, index) = self
            .blocking_get::<Vec<RawEvent>>("event/list", wait, since)
            .await
            .map_err(|e| e.into_source("events"))?;
        Ok(WatchResponse::new(
            raw.into_iter().map(UserEvent::from).collect(),
            index,
        ))
    }
}

/// Register every configured check; stops at the first failure.
pub async fn register_checks(
    client: &ConsulClient,
    checks: &[CheckConfig],
) -> Result<usize, ConsulError> {
    for check in checks {
        client.register_check(check).await?;
    }
    Ok(checks.len())
}

struct HeldSession {
    id: String,
    renewal: JoinHandle<()>,
}

/// Leadership lock on a single KV key
pub struct ConsulLock {
    client: ConsulClient,
    key: String,
    session_ttl: Duration,
    retry: Duration,
    acquire_timeout: Duration,
    held: Mutex<Option<HeldSession>>,
}

impl ConsulLock {
    pub fn new(client: ConsulClient, settings: &ConsulSettings) -> Self {
        Self {
            client,
            key: settings.lock_key.trim_matches('/').to_string(),
            session_ttl: settings.session_ttl,
            retry: settings.lock_retry,
            acquire_timeout: settings.acquire_timeout,
            held: Mutex::new(None),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    async fn owner(&self) -> Result<Option<String>, ConsulError> {
        Ok(self.client.kv_get(&self.key).await?.and_then(|entry| entry.session))
    }

    async fn abandon(&self, session: &str) {
        if let Err(e) = self.client.destroy_session(session).await {
            warn!(session, error = %e, "Failed to destroy session");
        }
    }

    /// Id of the session we hold; the guard is released before returning
    async fn held_session(&self) -> Option<String> {
        self.held.lock().await.as_ref().map(|h| h.id.clone())
    }

    /// Stop renewing `session` and destroy it, if it is still the held one
    async fn forget(&self, session: &str) {
        let stale = {
            let mut held = self.held.lock().await;
            if held.as_ref().is_some_and(|h| h.id == session) {
                held.take()
            } else {
                None
            }
        };
        if let Some(stale) = stale {
            stale.renewal.abort();
            self.abandon(&stale.id).await;
        }
    }
}

/// Keep a session alive until the task is aborted or the session vanishes.
async fn renew_session(client: ConsulClient, session: String, ttl: Duration) {
    let period = ttl / 2;
    loop {
        sleep(period).await;
        match client.renew_session(&session).await {
            Ok(()) => debug!(session = %session, "Session renewed"),
            Err(ConsulError::Status { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => {
                warn!(session = %session, "Session expired, leadership lost");
                return;
            }
            Err(e) => warn!(session = %session, error = %e, "Session renewal failed"),
        }
    }
}

#[async_trait]
impl LeadershipLock for ConsulLock {
    async fn acquire(&self) -> pager::Result<()> {
        // Never hold `held` across a request; the engine serializes acquire
        if let Some(current) = self.held_session().await {
            let owner = self.owner().await.map_err(|e| e.into_lock("acquire"))?;
            if owner.as_deref() == Some(current.as_str()) {
                return Ok(());
            }
            self.forget(&current).await;
        }

        let session = self
            .client
            .create_session(self.session_ttl)
            .await
            .map_err(|e| e.into_lock("acquire"))?;
        let deadline = Instant::now() + self.acquire_timeout;

        loop {
            match self.client.kv_acquire(&self.key, &session).await {
                Ok(true) => break,
                Ok(false) => debug!(key = %self.key, "Lock held elsewhere"),
                Err(e) => {
                    self.abandon(&session).await;
                    return Err(e.into_lock("acquire"));
                }
            }

            if Instant::now() + self.retry > deadline {
                self.abandon(&session).await;
                return Err(PagerError::lock(
                    "acquire",
                    format!("{} held by another session", self.key),
                ));
            }
            sleep(self.retry).await;
        }

        info!(key = %self.key, session = %session, "Lock acquired");
        let renewal = tokio::spawn(renew_session(
            self.client.clone(),
            session.clone(),
            self.session_ttl,
        ));
        let previous = self.held.lock().await.replace(HeldSession {
            id: session,
            renewal,
        });
        if let Some(previous) = previous {
            previous.renewal.abort();
            self.abandon(&previous.id).await;
        }
        Ok(())
    }

    async fn release(&self) -> pager::Result<()> {
        let taken = self.held.lock().await.take();
        let Some(session) = taken else {
            return Ok(());
        };
        session.renewal.abort();

        let released = self.client.kv_release(&self.key, &session.id).await;
        let destroyed = self.client.destroy_session(&session.id).await;
        released
            .and(destroyed)
            .map_err(|e| e.into_lock("release"))?;
        info!(key = %self.key, "Lock released");
        Ok(())
    }

    async fn destroy(&self) -> pager::Result<()> {
        let entry = self
            .client
            .kv_get(&self.key)
            .await
            .map_err(|e| e.into_lock("destroy"))?;
        let Some(entry) = entry else {
            return Ok(());
        };
        if entry.session.is_some() {
            return Err(PagerError::lock("destroy", "lock in use"));
        }

        let deleted = self
            .client
            .kv_delete_cas(&self.key, entry.modify_index)
            .await
            .map_err(|e| e.into_lock("destroy"))?;
        if !deleted {
            return Err(PagerError::lock("destroy", "lock changed while deleting"));
        }
        info!(key = %self.key, "Lock key deleted");
        Ok(())
    }

    async fn is_leader(&self) -> pager::Result<bool> {
        let Some(session) = self.held_session().await else {
            return Ok(false);
        };
        let owner = self.owner().await.map_err(|e| e.into_lock("query"))?;
        Ok(owner.as_deref() == Some(session.as_str()))
    }

    async fn is_unlocked(&self) -> bool {
        self.held.lock().await.is_none()
    }
}
