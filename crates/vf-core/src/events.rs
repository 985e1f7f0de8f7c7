//! Lifecycle event system.
//!
//! [`EventBus`] wraps a `tokio::sync::broadcast` channel with a bounded
//! ring-buffer of recent events so that late-joining clients can catch up.
//! Outbound delivery (webhooks, email) is layered on top by the pipeline's
//! event publisher.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::ids::{JobId, VideoId};
use crate::video::Category;

/// Maximum number of events retained in the ring buffer.
const MAX_RECENT_EVENTS: usize = 100;

// ---------------------------------------------------------------------------
// EventCategory
// ---------------------------------------------------------------------------

/// Which half of the lifecycle an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventCategory {
    Upload,
    Processing,
}

// ---------------------------------------------------------------------------
// EventPayload
// ---------------------------------------------------------------------------

/// Payload describing what happened.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum EventPayload {
    // -- Upload lifecycle ----------------------------------------------------
    UploadInitiated {
        video_id: VideoId,
        file_name: String,
        category: Category,
        total_parts: u32,
    },
    UploadProgress {
        video_id: VideoId,
        parts_uploaded: u32,
        bytes_uploaded: u64,
        total_bytes: u64,
    },
    UploadCompleted {
        video_id: VideoId,
    },
    UploadAborted {
        video_id: VideoId,
    },

    // -- Processing lifecycle ------------------------------------------------
    ProcessingStarted {
        video_id: VideoId,
        job_id: JobId,
    },
    ProcessingProgress {
        video_id: VideoId,
        job_id: JobId,
        progress: f64,
        quality: Option<String>,
    },
    ProcessingCompleted {
        video_id: VideoId,
        job_id: JobId,
        master_playlist_key: String,
        qualities: Vec<String>,
    },
    ProcessingFailed {
        video_id: VideoId,
        job_id: JobId,
        error: String,
        will_retry: bool,
    },
}

impl EventPayload {
    /// The kebab-case event name, identical to the serialized `type` tag.
    pub fn name(&self) -> &'static str {
        match self {
            Self::UploadInitiated { .. } => "upload-initiated",
            Self::UploadProgress { .. } => "upload-progress",
            Self::UploadCompleted { .. } => "upload-completed",
            Self::UploadAborted { .. } => "upload-aborted",
            Self::ProcessingStarted { .. } => "processing-started",
            Self::ProcessingProgress { .. } => "processing-progress",
            Self::ProcessingCompleted { .. } => "processing-completed",
            Self::ProcessingFailed { .. } => "processing-failed",
        }
    }

    pub fn category(&self) -> EventCategory {
        match self {
            Self::UploadInitiated { .. }
            | Self::UploadProgress { .. }
            | Self::UploadCompleted { .. }
            | Self::UploadAborted { .. } => EventCategory::Upload,
            _ => EventCategory::Processing,
        }
    }

    pub fn video_id(&self) -> VideoId {
        match self {
            Self::UploadInitiated { video_id, .. }
            | Self::UploadProgress { video_id, .. }
            | Self::UploadCompleted { video_id }
            | Self::UploadAborted { video_id }
            | Self::ProcessingStarted { video_id, .. }
            | Self::ProcessingProgress { video_id, .. }
            | Self::ProcessingCompleted { video_id, .. }
            | Self::ProcessingFailed { video_id, .. } => *video_id,
        }
    }
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// A timestamped, categorised event ready for broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique event identifier.
    pub id: Uuid,
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
    pub category: EventCategory,
    /// What happened.
    pub payload: EventPayload,
}

impl Event {
    /// Create a new event with a fresh UUID and the current timestamp.
    pub fn new(payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            category: payload.category(),
            payload,
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Broadcast channel with a bounded ring buffer of recent events.
pub struct EventBus {
    tx: broadcast::Sender<Event>,
    recent: RwLock<VecDeque<Event>>,
}

impl EventBus {
    /// Create a new event bus.
    ///
    /// `capacity` controls the broadcast channel buffer size (not the ring
    /// buffer, which is always [`MAX_RECENT_EVENTS`]).
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            recent: RwLock::new(VecDeque::with_capacity(MAX_RECENT_EVENTS)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Broadcast an event to all current subscribers and store it in the
    /// ring buffer. Returns the stamped event.
    pub fn broadcast(&self, payload: EventPayload) -> Event {
        let event = Event::new(payload);

        {
            let mut recent = self.recent.write();
            if recent.len() >= MAX_RECENT_EVENTS {
                recent.pop_back();
            }
            recent.push_front(event.clone());
        }

        // No subscribers is fine.
        let _ = self.tx.send(event.clone());
        event
    }

    /// Return the `n` most recent events (newest first).
    pub fn recent_events(&self, n: usize) -> Vec<Event> {
        let recent = self.recent.read();
        recent.iter().take(n).cloned().collect()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_and_receive() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        let video_id = VideoId::new();
        bus.broadcast(EventPayload::UploadCompleted { video_id });

        let event = rx.try_recv().unwrap();
        assert_eq!(event.category, EventCategory::Upload);
        match &event.payload {
            EventPayload::UploadCompleted { video_id: received } => {
                assert_eq!(*received, video_id)
            }
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[test]
    fn recent_events_capped_newest_first() {
        let bus = EventBus::new(256);
        let video_id = VideoId::new();

        for _ in 0..150 {
            bus.broadcast(EventPayload::UploadAborted { video_id });
        }
        bus.broadcast(EventPayload::ProcessingStarted {
            video_id,
            job_id: JobId::new(),
        });

        let recent = bus.recent_events(200);
        assert_eq!(recent.len(), MAX_RECENT_EVENTS);
        assert_eq!(recent[0].category, EventCategory::Processing);
    }

    #[test]
    fn no_subscribers_does_not_panic() {
        let bus = EventBus::new(4);
        bus.broadcast(EventPayload::ProcessingFailed {
            video_id: VideoId::new(),
            job_id: JobId::new(),
            error: "boom".into(),
            will_retry: false,
        });
        assert_eq!(bus.recent_events(10).len(), 1);
    }

    #[test]
    fn type_tag_matches_name() {
        let payloads = vec![
            EventPayload::UploadInitiated {
                video_id: VideoId::new(),
                file_name: "demo.mp4".into(),
                category: Category::Stocks,
                total_parts: 3,
            },
            EventPayload::UploadProgress {
                video_id: VideoId::new(),
                parts_uploaded: 1,
                bytes_uploaded: 10,
                total_bytes: 30,
            },
            EventPayload::ProcessingProgress {
                video_id: VideoId::new(),
                job_id: JobId::new(),
                progress: 0.25,
                quality: Some("720p".into()),
            },
            EventPayload::ProcessingCompleted {
                video_id: VideoId::new(),
                job_id: JobId::new(),
                master_playlist_key: "stocks/x/master.m3u8".into(),
                qualities: vec!["720p".into()],
            },
        ];
        for p in &payloads {
            let json = serde_json::to_value(p).unwrap();
            assert_eq!(json["type"], p.name());
        }
    }

    #[test]
    fn event_serde_roundtrip() {
        let event = Event::new(EventPayload::UploadCompleted {
            video_id: VideoId::new(),
        });
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, event.id);
        assert_eq!(back.payload.video_id(), event.payload.video_id());
    }
}
