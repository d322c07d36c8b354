//! Stream announcements on X.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::core::settings::AnnounceSettings;
use crate::stream::errors::NotifyError;
use crate::stream::lifecycle::{Notifier, SilentNotifier};

const TWEETS_URL: &str = "https://api.x.com/2/tweets";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Serialize)]
struct CreatePostRequest {
    text: String,
}

pub fn post_text(message: &str, url: &str) -> String {
    format!("{}\n\n{}", message.trim(), url)
}

pub struct XNotifier {
    http: reqwest::Client,
    access_token: String,
    endpoint: String,
}

impl XNotifier {
    pub fn new(access_token: impl Into<String>) -> Result<Self, NotifyError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| NotifyError::Request(e.to_string()))?;

        Ok(Self {
            http,
            access_token: access_token.into(),
            endpoint: TWEETS_URL.to_string(),
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl Notifier for XNotifier {
    async fn announce(&self, message: &str, url: &str) -> Result<(), NotifyError> {
        let request = CreatePostRequest {
            text: post_text(message, url),
        };

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.access_token)
            .json(&request)
            .send()
            .await
            .map_err(|e| NotifyError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected { status, body });
        }

        tracing::info!(target: "broadcast", "[ANNOUNCE] Posted to X: {}", url);
        Ok(())
    }
}

/// X when a token is configured, otherwise a notifier that only logs.
pub fn notifier_from_settings(settings: &AnnounceSettings) -> Arc<dyn Notifier> {
    let token = settings
        .x_access_token
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty());

    match token.map(XNotifier::new) {
        Some(Ok(notifier)) => Arc::new(notifier),
        Some(Err(e)) => {
            tracing::warn!(target: "broadcast", "[ANNOUNCE] X client unavailable: {}", e);
            Arc::new(SilentNotifier)
        }
        None => Arc::new(SilentNotifier),
    }
}
