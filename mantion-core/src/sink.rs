//! Persistence boundary for detection events

use crate::types::DetectionEvent;
use parking_lot::Mutex;

/// Append-only destination for detection events.
///
/// `record` must return promptly: implementations queue the write and report
/// failures through logging instead of to the caller.
pub trait EventSink: Send + Sync {
    fn record(&self, event: DetectionEvent);
}

/// Keeps events in memory; used by tests and dry runs
#[derive(Debug, Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<DetectionEvent>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DetectionEvent> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventSink for MemoryEventSink {
    fn record(&self, event: DetectionEvent) {
        self.events.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DetectionType;
    use chrono::Utc;

    #[test]
    fn test_memory_sink_appends_in_order() {
        let sink = MemoryEventSink::new();
        assert!(sink.is_empty());
        sink.record(DetectionEvent::new("a", DetectionType::Human, Utc::now()));
        sink.record(DetectionEvent::new("b", DetectionType::Hand, Utc::now()));
        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].camera_id, "a");
        assert_eq!(events[1].detection_type, DetectionType::Hand);
    }
}
