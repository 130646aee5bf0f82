//! Health-event sink. Stands in for the original's separate health bus
//! client: every surfaced error gets one record naming the service and the
//! message, but delivery is in-process rather than over a network client
//! (see design notes). Mirrors the shape of the teacher's own health
//! reporting without the multi-field storage-capacity metrics this domain
//! has no use for.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone)]
pub struct HealthEvent {
    pub service: &'static str,
    pub message: String,
    pub observed_at: DateTime<Utc>,
}

impl HealthEvent {
    pub fn new(service: &'static str, message: impl Into<String>) -> Self {
        HealthEvent {
            service,
            message: message.into(),
            observed_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait HealthSink: Send + Sync {
    async fn record(&self, event: HealthEvent);
}

/// Default sink: every event becomes one structured log line. Good enough
/// for a single-process deployment; an external adapter could swap this for
/// one that forwards to a monitoring bus without touching any caller.
pub struct LoggingHealthSink;

#[async_trait]
impl HealthSink for LoggingHealthSink {
    async fn record(&self, event: HealthEvent) {
        log::warn!("health: {} - {}", event.service, event.message);
    }
}

#[cfg(test)]
pub struct RecordingHealthSink {
    pub events: tokio::sync::Mutex<Vec<HealthEvent>>,
}

#[cfg(test)]
impl RecordingHealthSink {
    pub fn new() -> Self {
        RecordingHealthSink {
            events: tokio::sync::Mutex::new(Vec::new()),
        }
    }
}

#[cfg(test)]
#[async_trait]
impl HealthSink for RecordingHealthSink {
    async fn record(&self, event: HealthEvent) {
        self.events.lock().await.push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recording_sink_keeps_every_event() {
        let sink = RecordingHealthSink::new();
        sink.record(HealthEvent::new("registrar", "broker publish failed")).await;
        sink.record(HealthEvent::new("supply_loop", "generator timed out")).await;
        let events = sink.events.lock().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].service, "registrar");
    }
}
