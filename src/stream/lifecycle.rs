//! Remote broadcast resource around a local stream.

use std::sync::Arc;

use async_trait::async_trait;

use super::errors::{NotifyError, RemoteApiError};
use super::types::{BroadcastRequest, IngestTarget, StreamConfig};

/// Remote platform that hosts the broadcast.
#[async_trait]
pub trait BroadcastApi: Send + Sync {
    /// Creates the broadcast and its ingest stream and binds them.
    async fn create_broadcast(&self, request: &BroadcastRequest)
        -> Result<IngestTarget, RemoteApiError>;

    /// Marks the broadcast complete.
    async fn stop_broadcast(&self, broadcast_id: &str) -> Result<(), RemoteApiError>;
}

/// Social announcement channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn announce(&self, message: &str, url: &str) -> Result<(), NotifyError>;
}

/// Used when no announcement channel is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentNotifier;

#[async_trait]
impl Notifier for SilentNotifier {
    async fn announce(&self, message: &str, url: &str) -> Result<(), NotifyError> {
        tracing::info!(target: "broadcast", "[ANNOUNCE] Disabled, skipping: {} {}", message, url);
        Ok(())
    }
}

pub struct BroadcastLifecycle {
    api: Arc<dyn BroadcastApi>,
    notifier: Arc<dyn Notifier>,
}

impl BroadcastLifecycle {
    pub fn new(api: Arc<dyn BroadcastApi>, notifier: Arc<dyn Notifier>) -> Self {
        Self { api, notifier }
    }

    /// Creates the remote broadcast, then fires the announcement in the
    /// background. Only the creation can fail.
    pub async fn acquire(&self, config: &StreamConfig) -> Result<IngestTarget, RemoteApiError> {
        let request = config.broadcast_request();
        tracing::info!(target: "broadcast",
            "[LIFECYCLE] Creating broadcast '{}' ({})", request.title, request.visibility.as_str());

        let target = self.api.create_broadcast(&request).await?;

        tracing::info!(target: "broadcast",
            "[LIFECYCLE] Broadcast {} ready, watch at {}", target.broadcast_id, target.watch_url);

        let notifier = self.notifier.clone();
        let message = config.announcement.clone();
        let url = target.watch_url.clone();
        tokio::spawn(async move {
            if let Err(e) = notifier.announce(&message, &url).await {
                tracing::warn!(target: "broadcast", "[ANNOUNCE] Failed: {}", e);
            }
        });

        Ok(target)
    }

    /// Closes the remote broadcast. Failure is logged; the local stream is
    /// already down.
    pub async fn release(&self, broadcast_id: &str) {
        tracing::info!(target: "broadcast", "[LIFECYCLE] Releasing broadcast {}", broadcast_id);

        if let Err(e) = self.api.stop_broadcast(broadcast_id).await {
            tracing::warn!(target: "broadcast",
                "[LIFECYCLE] Failed to release broadcast {}: {}", broadcast_id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::types::Resolution;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct FakeApi {
        fail_create: bool,
        fail_stop: bool,
        stopped: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl BroadcastApi for FakeApi {
        async fn create_broadcast(
            &self,
            request: &BroadcastRequest,
        ) -> Result<IngestTarget, RemoteApiError> {
            if self.fail_create {
                return Err(RemoteApiError::Status {
                    status: 403,
                    body: "quota".to_string(),
                });
            }
            Ok(IngestTarget {
                push_url: "rtmp://ingest/key".to_string(),
                watch_url: format!("https://watch/{}", request.title),
                broadcast_id: "b1".to_string(),
            })
        }

        async fn stop_broadcast(&self, broadcast_id: &str) -> Result<(), RemoteApiError> {
            self.stopped.lock().unwrap().push(broadcast_id.to_string());
            if self.fail_stop {
                return Err(RemoteApiError::Http("connection reset".to_string()));
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeNotifier {
        fail: bool,
        sent: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl Notifier for FakeNotifier {
        async fn announce(&self, message: &str, url: &str) -> Result<(), NotifyError> {
            self.sent.lock().unwrap().push((message.to_string(), url.to_string()));
            if self.fail {
                return Err(NotifyError::Request("offline".to_string()));
            }
            Ok(())
        }
    }

    fn config() -> StreamConfig {
        let mut config = StreamConfig::new(Resolution::new(640, 360), 10, Duration::from_secs(1));
        config.title = "desk".to_string();
        config.announcement = "live now".to_string();
        config
    }

    #[tokio::test]
    async fn test_acquire_announces_watch_url() {
        let notifier = Arc::new(FakeNotifier::default());
        let lifecycle = BroadcastLifecycle::new(Arc::new(FakeApi::default()), notifier.clone());

        let target = lifecycle.acquire(&config()).await.unwrap();
        assert_eq!(target.watch_url, "https://watch/desk");

        for _ in 0..50 {
            if !notifier.sent.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let sent = notifier.sent.lock().unwrap();
        assert_eq!(
            *sent,
            vec![("live now".to_string(), "https://watch/desk".to_string())]
        );
    }

    #[tokio::test]
    async fn test_announce_failure_does_not_fail_acquire() {
        let notifier = Arc::new(FakeNotifier {
            fail: true,
            ..Default::default()
        });
        let lifecycle = BroadcastLifecycle::new(Arc::new(FakeApi::default()), notifier);
        assert!(lifecycle.acquire(&config()).await.is_ok());
    }

    #[tokio::test]
    async fn test_acquire_failure_propagates() {
        let notifier = Arc::new(FakeNotifier::default());
        let api = Arc::new(FakeApi {
            fail_create: true,
            ..Default::default()
        });
        let lifecycle = BroadcastLifecycle::new(api, notifier.clone());

        let err = lifecycle.acquire(&config()).await.unwrap_err();
        assert!(matches!(err, RemoteApiError::Status { status: 403, .. }));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(notifier.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_release_swallows_errors() {
        let api = Arc::new(FakeApi {
            fail_stop: true,
            ..Default::default()
        });
        let lifecycle = BroadcastLifecycle::new(api.clone(), Arc::new(SilentNotifier));

        lifecycle.release("b1").await;
        assert_eq!(*api.stopped.lock().unwrap(), vec!["b1".to_string()]);
    }
}
