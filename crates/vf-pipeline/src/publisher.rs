//! Lifecycle event publishing.
//!
//! [`EventPublisher::emit`] records the event on the in-process
//! [`EventBus`] and then fans it out to external sinks (webhooks, email).
//! Delivery is fire-and-forget: every sink runs in its own `tokio::spawn`,
//! errors are logged, and the caller never waits on or sees a failure.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use vf_core::config::{EmailConfig, NotificationsConfig, WebhookConfig};
use vf_core::events::{Event, EventBus, EventPayload};
use vf_core::{Error, Result};

/// HTTP timeout for notification requests.
const NOTIFICATION_TIMEOUT: Duration = Duration::from_secs(10);

fn http_client() -> Client {
    Client::builder()
        .timeout(NOTIFICATION_TIMEOUT)
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!("Failed to build notification HTTP client: {e}");
            Client::new()
        })
}

// ---------------------------------------------------------------------------
// Collaborator traits
// ---------------------------------------------------------------------------

/// Receives every published event.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    fn name(&self) -> &str;

    async fn deliver(&self, event: &Event) -> Result<()>;
}

/// Sends a single email.
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send_email(&self, recipient: &str, subject: &str, html: &str) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Webhook sink
// ---------------------------------------------------------------------------

/// POSTs each event as JSON to a configured URL.
pub struct WebhookSink {
    name: String,
    url: String,
    client: Client,
}

impl WebhookSink {
    pub fn new(config: &WebhookConfig, client: Client) -> Self {
        Self {
            name: config.name.clone(),
            url: config.url.clone(),
            client,
        }
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn deliver(&self, event: &Event) -> Result<()> {
        let resp = self
            .client
            .post(&self.url)
            .json(event)
            .send()
            .await
            .map_err(|e| Error::Internal(format!("webhook {}: {e}", self.name)))?;

        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = resp.text().await.unwrap_or_default();
            Err(Error::Internal(format!(
                "webhook {} returned {status}: {body}",
                self.name
            )))
        }
    }
}

// ---------------------------------------------------------------------------
// Email relay
// ---------------------------------------------------------------------------

/// [`EmailSender`] that hands messages to an HTTP mail relay.
pub struct HttpEmailRelay {
    relay_url: String,
    api_key: Option<String>,
    from: Option<String>,
    client: Client,
}

impl HttpEmailRelay {
    pub fn new(relay_url: impl Into<String>, config: &EmailConfig, client: Client) -> Self {
        Self {
            relay_url: relay_url.into(),
            api_key: config.api_key.clone(),
            from: config.from.clone(),
            client,
        }
    }
}

#[async_trait]
impl EmailSender for HttpEmailRelay {
    async fn send_email(&self, recipient: &str, subject: &str, html: &str) -> Result<()> {
        let mut request = self.client.post(&self.relay_url).json(&json!({
            "from": self.from,
            "to": recipient,
            "subject": subject,
            "html": html,
        }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let resp = request
            .send()
            .await
            .map_err(|e| Error::Internal(format!("email relay: {e}")))?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(Error::Internal(format!(
                "email relay returned {}",
                resp.status()
            )))
        }
    }
}

/// Subject and HTML body for the events that warrant an email.
fn email_for(payload: &EventPayload) -> Option<(String, String)> {
    use ammonia::clean_text;

    match payload {
        EventPayload::ProcessingCompleted {
            video_id,
            master_playlist_key,
            qualities,
            ..
        } => Some((
            format!("Video {video_id} is ready"),
            format!(
                "<p>Video <code>{video_id}</code> finished processing.</p>\
                 <p>Qualities: {}</p><p>Master playlist: <code>{}</code></p>",
                clean_text(&qualities.join(", ")),
                clean_text(master_playlist_key)
            ),
        )),
        EventPayload::ProcessingFailed {
            video_id, error, ..
        } => Some((
            format!("Video {video_id} failed to process"),
            format!(
                "<p>Video <code>{video_id}</code> failed to process.</p><p>{}</p>",
                clean_text(error)
            ),
        )),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// EventPublisher
// ---------------------------------------------------------------------------

/// Records events and fans them out to notification collaborators.
#[derive(Clone)]
pub struct EventPublisher {
    bus: Arc<EventBus>,
    sinks: Vec<Arc<dyn NotificationSink>>,
    email: Option<Arc<dyn EmailSender>>,
    recipients: Arc<Vec<String>>,
}

impl EventPublisher {
    /// Publisher that only records on the bus.
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            sinks: Vec::new(),
            email: None,
            recipients: Arc::new(Vec::new()),
        }
    }

    /// Build sinks for every enabled webhook and the email relay.
    pub fn from_config(bus: Arc<EventBus>, config: &NotificationsConfig) -> Self {
        let client = http_client();
        let mut publisher = Self::new(bus);

        for webhook in config.webhooks.iter().filter(|w| w.enabled) {
            publisher = publisher.with_sink(Arc::new(WebhookSink::new(webhook, client.clone())));
        }

        let email = &config.email;
        if email.enabled {
            match &email.relay_url {
                Some(url) if !email.recipients.is_empty() => {
                    let relay = HttpEmailRelay::new(url.clone(), email, client.clone());
                    publisher = publisher.with_email(Arc::new(relay), email.recipients.clone());
                }
                _ => tracing::warn!("Email notifications enabled without relay_url or recipients"),
            }
        }

        publisher
    }

    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn with_email(mut self, sender: Arc<dyn EmailSender>, recipients: Vec<String>) -> Self {
        self.email = Some(sender);
        self.recipients = Arc::new(recipients);
        self
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Record `payload` and spawn its delivery. Never blocks on or reports
    /// delivery failures.
    pub fn emit(&self, payload: EventPayload) {
        let event = self.bus.broadcast(payload);
        tracing::debug!(
            event = event.payload.name(),
            video_id = %event.payload.video_id(),
            "event published"
        );

        for sink in &self.sinks {
            let sink = Arc::clone(sink);
            let event = event.clone();
            tokio::spawn(async move {
                if let Err(e) = sink.deliver(&event).await {
                    tracing::warn!(
                        sink = %sink.name(),
                        event = event.payload.name(),
                        error = %e,
                        "Notification delivery failed"
                    );
                }
            });
        }

        if let (Some(sender), Some((subject, html))) = (&self.email, email_for(&event.payload)) {
            for recipient in self.recipients.iter() {
                let sender = Arc::clone(sender);
                let recipient = recipient.clone();
                let subject = subject.clone();
                let html = html.clone();
                tokio::spawn(async move {
                    if let Err(e) = sender.send_email(&recipient, &subject, &html).await {
                        tracing::warn!(recipient = %recipient, error = %e, "Email delivery failed");
                    }
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use tokio::sync::mpsc;
    use vf_core::{JobId, VideoId};

    struct ChannelSink {
        tx: mpsc::UnboundedSender<String>,
        fail: bool,
    }

    #[async_trait]
    impl NotificationSink for ChannelSink {
        fn name(&self) -> &str {
            "channel"
        }

        async fn deliver(&self, event: &Event) -> Result<()> {
            let _ = self.tx.send(event.payload.name().to_string());
            if self.fail {
                Err(Error::Internal("sink down".into()))
            } else {
                Ok(())
            }
        }
    }

    #[derive(Default)]
    struct RecordingEmail {
        sent: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl EmailSender for RecordingEmail {
        async fn send_email(&self, recipient: &str, subject: &str, _html: &str) -> Result<()> {
            self.sent.lock().push((recipient.to_string(), subject.to_string()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn emit_records_on_bus_and_delivers_to_sinks() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let publisher = EventPublisher::new(Arc::new(EventBus::default()))
            .with_sink(Arc::new(ChannelSink { tx, fail: false }));

        let video_id = VideoId::new();
        publisher.emit(EventPayload::UploadCompleted { video_id });

        assert_eq!(rx.recv().await.as_deref(), Some("upload-completed"));
        let recent = publisher.bus().recent_events(10);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].payload.video_id(), video_id);
    }

    #[tokio::test]
    async fn failing_sink_does_not_affect_caller() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let publisher = EventPublisher::new(Arc::new(EventBus::default()))
            .with_sink(Arc::new(ChannelSink { tx, fail: true }));

        publisher.emit(EventPayload::UploadAborted {
            video_id: VideoId::new(),
        });
        assert_eq!(rx.recv().await.as_deref(), Some("upload-aborted"));
        assert_eq!(publisher.bus().recent_events(10).len(), 1);
    }

    #[tokio::test]
    async fn email_only_for_terminal_processing_events() {
        let email = Arc::new(RecordingEmail::default());
        let publisher = EventPublisher::new(Arc::new(EventBus::default())).with_email(
            email.clone(),
            vec!["ops@example.com".into(), "team@example.com".into()],
        );

        let video_id = VideoId::new();
        let job_id = JobId::new();
        publisher.emit(EventPayload::ProcessingStarted { video_id, job_id });
        publisher.emit(EventPayload::ProcessingFailed {
            video_id,
            job_id,
            error: "boom".into(),
            will_retry: false,
        });

        for _ in 0..50 {
            if email.sent.lock().len() >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let sent = email.sent.lock().clone();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|(_, subject)| subject.contains("failed")));
    }

    #[test]
    fn from_config_skips_disabled_webhooks() {
        let config = NotificationsConfig {
            webhooks: vec![
                WebhookConfig {
                    name: "off".into(),
                    url: "http://localhost:1/hook".into(),
                    enabled: false,
                },
                WebhookConfig {
                    name: "on".into(),
                    url: "http://localhost:1/hook".into(),
                    enabled: true,
                },
            ],
            email: EmailConfig::default(),
        };
        let publisher = EventPublisher::from_config(Arc::new(EventBus::default()), &config);
        assert_eq!(publisher.sinks.len(), 1);
        assert_eq!(publisher.sinks[0].name(), "on");
        assert!(publisher.email.is_none());
    }

    #[test]
    fn email_content_matches_event() {
        let video_id = VideoId::new();
        let (subject, html) = email_for(&EventPayload::ProcessingCompleted {
            video_id,
            job_id: JobId::new(),
            master_playlist_key: "daily-classes/x/master.m3u8".into(),
            qualities: vec!["1080p".into(), "720p".into()],
        })
        .unwrap();
        assert!(subject.contains("ready"));
        assert!(html.contains("1080p") && html.contains("720p"));
        assert!(email_for(&EventPayload::UploadCompleted { video_id }).is_none());
    }

    #[test]
    fn email_body_escapes_error_text() {
        let payload = EventPayload::ProcessingFailed {
            video_id: VideoId::new(),
            job_id: JobId::new(),
            error: "ffmpeg said <script>alert(1)</script> & quit".into(),
            will_retry: false,
        };
        let (_, html) = email_for(&payload).unwrap();
        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;"));
        assert!(html.contains("&amp;"));
        assert!(!html.contains(" & "));
    }
}
