// src/transport/matrix.rs

//! Matrix client-server API transport.
//!
//! Logs in with a password, long-polls `/sync` for room messages and invites,
//! and sends plain `m.text` messages. Encrypted rooms are not supported.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    time::Duration,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{
    config::MatrixConfig,
    error::AppError,
    transport::{InboundEvent, Transport},
};

const SYNC_TIMEOUT_MS: u64 = 30_000;
const RETRY_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct LoginResponse {
    access_token: String,
    user_id: String,
}

#[derive(Debug, Deserialize)]
pub struct SyncResponse {
    pub next_batch: String,
    #[serde(default)]
    pub rooms: Rooms,
}

#[derive(Debug, Default, Deserialize)]
pub struct Rooms {
    #[serde(default)]
    pub join: HashMap<String, JoinedRoom>,
    #[serde(default)]
    pub invite: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
pub struct JoinedRoom {
    #[serde(default)]
    pub timeline: Timeline,
}

#[derive(Debug, Default, Deserialize)]
pub struct Timeline {
    #[serde(default)]
    pub events: Vec<RoomEvent>,
}

#[derive(Debug, Deserialize)]
pub struct RoomEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub content: serde_json::Value,
}

/// Persisted sync position so restarts do not replay old messages.
#[derive(Debug, Serialize, Deserialize)]
struct SyncToken {
    next_batch: String,
}

pub struct MatrixTransport {
    client: reqwest::Client,
    homeserver: Url,
    access_token: String,
    user_id: String,
    sync_token_file: PathBuf,
}

impl MatrixTransport {
    /// Logs in with the configured password.
    pub async fn login(config: &MatrixConfig) -> Result<Self, AppError> {
        let homeserver = Url::parse(&config.homeserver)
            .map_err(|e| AppError::Validation(format!("Invalid MATRIX_HOMESERVER: {}", e)))?;
        let client = reqwest::Client::new();

        let url = endpoint(&homeserver, &["login"])?;
        let response = client
            .post(url)
            .json(&json!({
                "type": "m.login.password",
                "identifier": { "type": "m.id.user", "user": config.user_id },
                "password": config.password,
                "initial_device_display_name": "quizbot",
            }))
            .send()
            .await?
            .error_for_status()
            .map_err(|e| AppError::AuthError(format!("Matrix login failed: {}", e)))?
            .json::<LoginResponse>()
            .await?;

        tracing::info!(user_id = %response.user_id, "Logged in to Matrix homeserver");

        Ok(Self {
            client,
            homeserver,
            access_token: response.access_token,
            user_id: response.user_id,
            sync_token_file: PathBuf::from(&config.sync_token_file),
        })
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Long-polls `/sync` and forwards events until `cancel` fires or the
    /// receiver goes away.
    pub async fn sync_loop(&self, events: mpsc::Sender<InboundEvent>, cancel: CancellationToken) {
        let mut since = load_sync_token(&self.sync_token_file);
        // Without a stored position the first batch is history; only invites count.
        let mut skip_messages = since.is_none();

        loop {
            let result = tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.sync_once(since.as_deref()) => result,
            };

            match result {
                Ok(response) => {
                    let batch = events_from_sync(&response, &self.user_id);
                    for event in batch {
                        if skip_messages && matches!(event, InboundEvent::Message { .. }) {
                            continue;
                        }
                        if events.send(event).await.is_err() {
                            return;
                        }
                    }
                    skip_messages = false;
                    save_sync_token(&self.sync_token_file, &response.next_batch);
                    since = Some(response.next_batch);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Matrix sync failed, retrying");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(RETRY_DELAY) => {}
                    }
                }
            }
        }

        tracing::info!("Matrix sync loop stopped");
    }

    async fn sync_once(&self, since: Option<&str>) -> Result<SyncResponse, AppError> {
        let mut url = endpoint(&self.homeserver, &["sync"])?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("timeout", &SYNC_TIMEOUT_MS.to_string());
            if let Some(since) = since {
                query.append_pair("since", since);
            }
        }

        let response = self
            .client
            .get(url)
            .bearer_auth(&self.access_token)
            .timeout(Duration::from_millis(SYNC_TIMEOUT_MS) + Duration::from_secs(10))
            .send()
            .await?
            .error_for_status()?
            .json::<SyncResponse>()
            .await?;

        Ok(response)
    }
}

#[async_trait]
impl Transport for MatrixTransport {
    async fn send(&self, room: &str, text: &str) -> Result<(), AppError> {
        let txn_id = uuid::Uuid::new_v4().to_string();
        let url = endpoint(
            &self.homeserver,
            &["rooms", room, "send", "m.room.message", &txn_id],
        )?;

        self.client
            .put(url)
            .bearer_auth(&self.access_token)
            .json(&json!({ "msgtype": "m.text", "body": text }))
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }

    async fn join(&self, room: &str) -> Result<(), AppError> {
        let url = endpoint(&self.homeserver, &["join", room])?;

        self.client
            .post(url)
            .bearer_auth(&self.access_token)
            .json(&json!({}))
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }
}

/// Builds `{homeserver}/_matrix/client/v3/{segments..}` with each segment
/// percent-encoded.
fn endpoint(homeserver: &Url, segments: &[&str]) -> Result<Url, AppError> {
    let mut url = homeserver.clone();
    url.path_segments_mut()
        .map_err(|_| AppError::Validation("MATRIX_HOMESERVER cannot be a base URL".to_string()))?
        .pop_if_empty()
        .extend(["_matrix", "client", "v3"])
        .extend(segments);
    Ok(url)
}

/// Text messages from other users and room invites contained in a sync batch.
pub fn events_from_sync(response: &SyncResponse, own_user: &str) -> Vec<InboundEvent> {
    let mut events: Vec<InboundEvent> = response
        .rooms
        .invite
        .keys()
        .map(|room| InboundEvent::Invite { room: room.clone() })
        .collect();

    for (room, joined) in &response.rooms.join {
        for event in &joined.timeline.events {
            if event.kind != "m.room.message" || event.sender == own_user {
                continue;
            }
            if event.content.get("msgtype").and_then(|v| v.as_str()) != Some("m.text") {
                continue;
            }
            if let Some(body) = event.content.get("body").and_then(|v| v.as_str()) {
                events.push(InboundEvent::Message {
                    sender: event.sender.clone(),
                    room: room.clone(),
                    text: body.to_string(),
                });
            }
        }
    }

    events
}

fn load_sync_token(path: &Path) -> Option<String> {
    let raw = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str::<SyncToken>(&raw) {
        Ok(token) => {
            tracing::info!(next_batch = %token.next_batch, "Loaded sync position");
            Some(token.next_batch)
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Ignoring unreadable sync token file");
            None
        }
    }
}

fn save_sync_token(path: &Path, next_batch: &str) {
    let token = SyncToken {
        next_batch: next_batch.to_string(),
    };
    let result = serde_json::to_string(&token)
        .map_err(AppError::from)
        .and_then(|raw| {
            std::fs::write(path, raw).map_err(|e| AppError::Storage(e.to_string()))
        });
    if let Err(e) = result {
        tracing::warn!(path = %path.display(), error = %e, "Failed to persist sync position");
    }
}
