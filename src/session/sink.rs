use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Sender, TrySendError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::mot::CrossingEvent;
use crate::session::SinkError;

// Keywords matched against detector labels (lowercase, spaces as underscores)
const BRAND_KEYWORDS: &[&str] = &[
    "coca_cola", "coke", "pepsi", "sprite", "fanta", "mountain_dew", "redbull", "monster", "gatorade",
    "powerade", "aquafina", "dasani", "nestle", "lipton", "snapple", "arizona", "vitamin_water", "perrier",
    "evian", "fiji", "smartwater", "propel",
];

/// Brand named by a detector label, e.g. `"coca_cola_can"` gives `"coca cola"`
pub fn extract_brand(label: &str) -> Option<String> {
    let normalized = label.to_lowercase().replace(' ', "_");
    BRAND_KEYWORDS
        .iter()
        .find(|keyword| normalized.contains(*keyword))
        .map(|keyword| keyword.replace('_', " "))
}

/// Crossing event as published, tagged with the session it came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceEvent {
    pub device_id: String,
    pub session_id: Uuid,
    #[serde(flatten)]
    pub event: CrossingEvent,
    pub detected_brand: Option<String>,
}

impl DeviceEvent {
    pub fn new(device_id: &str, session_id: Uuid, event: CrossingEvent) -> Self {
        let detected_brand = extract_brand(&event.label);
        DeviceEvent {
            device_id: device_id.to_string(),
            session_id,
            event,
            detected_brand,
        }
    }
}

/// Destination for crossing events. Called from the dispatcher thread only.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: &DeviceEvent) -> Result<(), SinkError>;
}

/// Writes events to the log
pub struct LogSink;

impl EventSink for LogSink {
    fn publish(&self, event: &DeviceEvent) -> Result<(), SinkError> {
        tracing::info!(
            device_id = %event.device_id,
            object_id = event.event.object_id,
            label = %event.event.label,
            brand = ?event.detected_brand,
            direction = event.event.direction.as_str(),
            "item moved"
        );
        Ok(())
    }
}

/// Appends one JSON document per line
pub struct JsonLinesSink {
    file: Mutex<File>,
}

impl JsonLinesSink {
    pub fn open(path: &Path) -> Result<Self, SinkError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(JsonLinesSink { file: Mutex::new(file) })
    }
}

impl EventSink for JsonLinesSink {
    fn publish(&self, event: &DeviceEvent) -> Result<(), SinkError> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');
        let mut file = self
            .file
            .lock()
            .map_err(|_| SinkError::Io(std::io::Error::other("sink file lock poisoned")))?;
        file.write_all(&line)?;
        Ok(())
    }
}

/// POSTs each event as JSON to a webhook
pub struct HttpSink {
    agent: ureq::Agent,
    url: String,
}

impl HttpSink {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        HttpSink {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
            url: url.into(),
        }
    }
}

impl EventSink for HttpSink {
    fn publish(&self, event: &DeviceEvent) -> Result<(), SinkError> {
        let body = serde_json::to_value(event)?;
        self.agent
            .post(&self.url)
            .send_json(body)
            .map_err(|e| SinkError::Http(e.to_string()))?;
        Ok(())
    }
}

/// Hands events to a single background publisher thread.
///
/// `dispatch` never blocks the caller: a full queue drops the event. Publish failures are
/// logged and not retried.
#[derive(Clone)]
pub struct SinkDispatcher {
    tx: Sender<DeviceEvent>,
}

impl SinkDispatcher {
    pub fn spawn(sink: Arc<dyn EventSink>, capacity: usize) -> std::io::Result<(Self, JoinHandle<()>)> {
        let (tx, rx) = crossbeam_channel::bounded::<DeviceEvent>(capacity.max(1));
        let handle = std::thread::Builder::new()
            .name("event-sink".to_string())
            .spawn(move || {
                while let Ok(event) = rx.recv() {
                    if let Err(err) = sink.publish(&event) {
                        tracing::error!(device_id = %event.device_id, object_id = event.event.object_id, error = %err, "failed to publish event");
                    }
                }
                tracing::debug!("event sink stopped");
            })?;
        Ok((SinkDispatcher { tx }, handle))
    }
    /// Queues an event for publishing without blocking the caller.
    ///
    /// Returns false when the event was dropped because the queue is full or the sink thread
    /// has stopped.
    pub fn dispatch(&self, event: DeviceEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                tracing::warn!(device_id = %event.device_id, object_id = event.event.object_id, "event sink queue full, dropping event");
                false
            }
            Err(TrySendError::Disconnected(event)) => {
                tracing::warn!(device_id = %event.device_id, object_id = event.event.object_id, "event sink stopped, dropping event");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mot::Direction;
    use crate::utils::{BBox, Point};
    use chrono::Utc;
    use std::time::Instant;

    fn event(label: &str) -> CrossingEvent {
        CrossingEvent {
            object_id: 3,
            label: label.to_string(),
            direction: Direction::In,
            timestamp: Utc::now(),
            centroid: Point::new(10.0, 20.0),
            bbox: BBox::new(5.0, 15.0, 15.0, 25.0),
            confidence: 0.91,
        }
    }

    #[test]
    fn test_extract_brand() {
        assert_eq!(extract_brand("coca_cola_can"), Some("coca cola".to_string()));
        assert_eq!(extract_brand("Pepsi Bottle"), Some("pepsi".to_string()));
        assert_eq!(extract_brand("sprite_zero"), Some("sprite".to_string()));
        assert_eq!(extract_brand("bottle"), None);
    }

    #[test]
    fn test_device_event_json_shape() {
        let device_event = DeviceEvent::new("cab-1", Uuid::nil(), event("fanta_orange"));
        let value = serde_json::to_value(&device_event).unwrap();
        assert_eq!(value["device_id"], "cab-1");
        assert_eq!(value["direction"], "IN");
        assert_eq!(value["object_id"], 3);
        assert_eq!(value["detected_brand"], "fanta");
    }

    #[test]
    fn test_json_lines_sink() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events").join("out.jsonl");
        let sink = JsonLinesSink::open(&path).unwrap();
        sink.publish(&DeviceEvent::new("cab-1", Uuid::nil(), event("can"))).unwrap();
        sink.publish(&DeviceEvent::new("cab-1", Uuid::nil(), event("cup"))).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<DeviceEvent> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].event.label, "cup");
    }

    struct FailingSink;

    impl EventSink for FailingSink {
        fn publish(&self, _event: &DeviceEvent) -> Result<(), SinkError> {
            Err(SinkError::Http("backend unavailable".to_string()))
        }
    }

    #[test]
    fn test_failures_do_not_stop_dispatcher() {
        let (dispatcher, handle) = SinkDispatcher::spawn(Arc::new(FailingSink), 4).unwrap();
        for _ in 0..10 {
            dispatcher.dispatch(DeviceEvent::new("cab-1", Uuid::nil(), event("can")));
        }
        drop(dispatcher);
        handle.join().unwrap();
    }

    // Holds every publish until released, reporting when one has started
    struct BlockingSink {
        entered: crossbeam_channel::Sender<u64>,
        release: crossbeam_channel::Receiver<()>,
        published: Mutex<Vec<u64>>,
    }

    impl EventSink for BlockingSink {
        fn publish(&self, event: &DeviceEvent) -> Result<(), SinkError> {
            let _ = self.entered.send(event.event.object_id);
            let _ = self.release.recv();
            if let Ok(mut published) = self.published.lock() {
                published.push(event.event.object_id);
            }
            Ok(())
        }
    }

    fn numbered(object_id: u64) -> DeviceEvent {
        let mut crossing = event("can");
        crossing.object_id = object_id;
        DeviceEvent::new("cab-1", Uuid::nil(), crossing)
    }

    #[test]
    fn test_dispatch_never_blocks_on_slow_sink() {
        let (entered_tx, entered_rx) = crossbeam_channel::unbounded();
        let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(0);
        let sink = Arc::new(BlockingSink {
            entered: entered_tx,
            release: release_rx,
            published: Mutex::new(vec![]),
        });
        let (dispatcher, handle) = SinkDispatcher::spawn(sink.clone(), 2).unwrap();

        assert!(dispatcher.dispatch(numbered(0)));
        // The sink thread is now stuck publishing event 0
        assert_eq!(entered_rx.recv_timeout(Duration::from_secs(5)).unwrap(), 0);

        let started = Instant::now();
        let queued: Vec<bool> = (1..8).map(|id| dispatcher.dispatch(numbered(id))).collect();
        assert!(started.elapsed() < Duration::from_millis(500));
        assert_eq!(queued, vec![true, true, false, false, false, false, false]);

        drop(release_tx);
        drop(dispatcher);
        handle.join().unwrap();
        assert_eq!(*sink.published.lock().unwrap(), vec![0, 1, 2]);
    }
}
