use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};

use super::auth::TokenStore;
use crate::stream::errors::RemoteApiError;
use crate::stream::lifecycle::BroadcastApi;
use crate::stream::types::{BroadcastRequest, IngestTarget};

const API_BASE: &str = "https://www.googleapis.com/youtube/v3";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const NOT_ENABLED_REASON: &str = "liveStreamingNotEnabled";

pub fn watch_url(broadcast_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={}", broadcast_id)
}

fn broadcast_body(request: &BroadcastRequest, now: DateTime<Utc>) -> Value {
    json!({
        "snippet": {
            "title": request.title,
            "description": request.description,
            "scheduledStartTime": now.to_rfc3339_opts(SecondsFormat::Secs, true),
        },
        "status": {
            "privacyStatus": request.visibility.as_str(),
        },
        "contentDetails": {
            "enableAutoStart": true,
            "enableAutoStop": true,
        },
    })
}

fn stream_body(title: &str) -> Value {
    json!({
        "snippet": { "title": title },
        "cdn": {
            "ingestionType": "rtmp",
            "resolution": "variable",
            "frameRate": "variable",
        },
    })
}

fn string_field(value: &Value, pointer: &str, name: &'static str) -> Result<String, RemoteApiError> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or(RemoteApiError::MissingField(name))
}

/// `ingestionAddress/streamName` from a liveStreams resource.
fn ingest_url(stream: &Value) -> Result<String, RemoteApiError> {
    let address = string_field(stream, "/cdn/ingestionInfo/ingestionAddress", "ingestionAddress")?;
    let name = string_field(stream, "/cdn/ingestionInfo/streamName", "streamName")?;
    Ok(format!("{}/{}", address.trim_end_matches('/'), name))
}

/// First `reason` of a Google API error body.
fn error_reason(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    value
        .pointer("/error/errors/0/reason")
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// `title (id)` of a channels resource, `?` for missing parts.
fn channel_label(channel: &Value) -> String {
    let title = channel.pointer("/snippet/title").and_then(Value::as_str);
    let id = channel.pointer("/id").and_then(Value::as_str);
    format!("{} ({})", title.unwrap_or("?"), id.unwrap_or("?"))
}

pub struct YoutubeClient {
    http: reqwest::Client,
    tokens: TokenStore,
    base_url: String,
}

impl YoutubeClient {
    pub fn new(tokens: TokenStore) -> Result<Self, RemoteApiError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| RemoteApiError::Http(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            tokens,
            base_url: API_BASE.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn call(
        &self,
        method: reqwest::Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
    ) -> Result<Value, RemoteApiError> {
        let token = self.tokens.access_token(&self.http).await?;

        let mut request = self
            .http
            .request(method, format!("{}/{}", self.base_url, path))
            .bearer_auth(token)
            .query(query);
        request = match body {
            Some(body) => request.json(body),
            // Google rejects a bodyless POST without an explicit length.
            None => request.header(reqwest::header::CONTENT_LENGTH, 0),
        };

        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(target: "broadcast", "[YOUTUBE] {} returned {}: {}", path, status, body);
            return Err(RemoteApiError::Status { status, body });
        }

        Ok(response.json::<Value>().await?)
    }

    async fn post(&self, path: &str, query: &[(&str, &str)], body: Option<&Value>) -> Result<Value, RemoteApiError> {
        self.call(reqwest::Method::POST, path, query, body).await
    }

    async fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<Value, RemoteApiError> {
        self.call(reqwest::Method::GET, path, query, None).await
    }

    /// Whether the authorized channel may create live broadcasts.
    pub async fn check_live_streaming_enabled(&self) -> Result<bool, RemoteApiError> {
        let channels = self
            .get("channels", &[("part", "snippet"), ("mine", "true")])
            .await?;

        let Some(channel) = channels.pointer("/items/0") else {
            tracing::warn!(target: "broadcast", "[YOUTUBE] No channel for this account");
            return Ok(false);
        };
        let label = channel_label(channel);
        tracing::info!(target: "broadcast", "[YOUTUBE] Channel: {}", label);

        let listing = self
            .get(
                "liveBroadcasts",
                &[("part", "id"), ("broadcastStatus", "all"), ("maxResults", "1")],
            )
            .await;

        match listing {
            Ok(_) => Ok(true),
            Err(RemoteApiError::Status { status: 403, body })
                if error_reason(&body).as_deref() == Some(NOT_ENABLED_REASON) =>
            {
                tracing::warn!(target: "broadcast",
                    "[YOUTUBE] Live streaming is not enabled, see https://www.youtube.com/features");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl BroadcastApi for YoutubeClient {
    async fn create_broadcast(&self, request: &BroadcastRequest) -> Result<IngestTarget, RemoteApiError> {
        let broadcast = self
            .post(
                "liveBroadcasts",
                &[("part", "snippet,status,contentDetails")],
                Some(&broadcast_body(request, Utc::now())),
            )
            .await?;
        let broadcast_id = string_field(&broadcast, "/id", "id")?;

        let stream = self
            .post("liveStreams", &[("part", "snippet,cdn")], Some(&stream_body(&request.title)))
            .await?;
        let stream_id = string_field(&stream, "/id", "id")?;

        self.post(
            "liveBroadcasts/bind",
            &[
                ("part", "id,contentDetails"),
                ("id", broadcast_id.as_str()),
                ("streamId", stream_id.as_str()),
            ],
            None,
        )
        .await?;

        tracing::info!(target: "broadcast",
            "[YOUTUBE] Broadcast {} bound to stream {}", broadcast_id, stream_id);

        Ok(IngestTarget {
            push_url: ingest_url(&stream)?,
            watch_url: watch_url(&broadcast_id),
            broadcast_id,
        })
    }

    async fn stop_broadcast(&self, broadcast_id: &str) -> Result<(), RemoteApiError> {
        self.post(
            "liveBroadcasts/transition",
            &[
                ("part", "status"),
                ("id", broadcast_id),
                ("broadcastStatus", "complete"),
            ],
            None,
        )
        .await?;

        tracing::info!(target: "broadcast", "[YOUTUBE] Broadcast {} completed", broadcast_id);
        Ok(())
    }
}
