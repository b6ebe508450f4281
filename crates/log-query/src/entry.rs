//! Decoded log entries and the sink they are streamed to

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::{Error, Result};

/// One log record with the fields the query layer needs pulled out.
///
/// `payload` keeps the complete raw entry for downstream parsing.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub insert_id: Option<String>,
    pub log_name: Option<String>,
    pub payload: Value,
}

impl LogEntry {
    pub fn from_json(payload: Value) -> Result<Self> {
        let raw_timestamp = payload
            .get("timestamp")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Decode("entry has no timestamp".into()))?;
        let timestamp = DateTime::parse_from_rfc3339(raw_timestamp)
            .map_err(|e| Error::Decode(format!("invalid timestamp {raw_timestamp:?}: {e}")))?
            .with_timezone(&Utc);
        let text = |key: &str| payload.get(key).and_then(Value::as_str).map(String::from);
        Ok(Self {
            timestamp,
            insert_id: text("insertId"),
            log_name: text("logName"),
            payload,
        })
    }
}

/// Stable sort by timestamp; shards deliver in per-shard order only.
pub fn sort_by_timestamp(entries: &mut [LogEntry]) {
    entries.sort_by_key(|e| e.timestamp);
}

/// Receives every decoded entry as it arrives.
///
/// The stream ends when the query drops its sink.
#[derive(Debug, Clone)]
pub struct LogSink(mpsc::UnboundedSender<LogEntry>);

impl LogSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<LogEntry>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self(tx), rx)
    }

    /// False once the receiving side has gone away.
    pub fn send(&self, entry: LogEntry) -> bool {
        self.0.send(entry).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_known_fields_and_keeps_payload() {
        let raw = json!({
            "timestamp": "2024-05-01T12:00:00.123456Z",
            "insertId": "abc123",
            "logName": "projects/p/logs/cloudaudit.googleapis.com%2Factivity",
            "protoPayload": {"methodName": "io.k8s.core.v1.pods.create"}
        });
        let entry = LogEntry::from_json(raw.clone()).unwrap();

        assert_eq!(entry.timestamp.to_rfc3339(), "2024-05-01T12:00:00.123456+00:00");
        assert_eq!(entry.insert_id.as_deref(), Some("abc123"));
        assert!(entry.log_name.unwrap().ends_with("activity"));
        assert_eq!(entry.payload, raw);
    }

    #[test]
    fn offset_timestamps_are_normalized_to_utc() {
        let entry = LogEntry::from_json(json!({"timestamp": "2024-05-01T14:00:00+02:00"})).unwrap();
        assert_eq!(entry.timestamp.to_rfc3339(), "2024-05-01T12:00:00+00:00");
        assert!(entry.insert_id.is_none());
    }

    #[test]
    fn missing_or_invalid_timestamp_fails() {
        assert!(matches!(
            LogEntry::from_json(json!({"insertId": "x"})),
            Err(Error::Decode(_))
        ));
        assert!(matches!(
            LogEntry::from_json(json!({"timestamp": "yesterday"})),
            Err(Error::Decode(_))
        ));
    }

    #[test]
    fn sort_is_stable_by_timestamp() {
        let at = |ts: &str, id: &str| {
            LogEntry::from_json(json!({"timestamp": ts, "insertId": id})).unwrap()
        };
        let mut entries = vec![
            at("2024-05-01T12:00:02Z", "c"),
            at("2024-05-01T12:00:01Z", "a"),
            at("2024-05-01T12:00:02Z", "d"),
            at("2024-05-01T12:00:01Z", "b"),
        ];
        sort_by_timestamp(&mut entries);
        let ids: Vec<_> = entries.iter().filter_map(|e| e.insert_id.as_deref()).collect();
        assert_eq!(ids, vec!["a", "b", "c", "d"]);
    }

    #[tokio::test]
    async fn sink_reports_closed_receiver() {
        let (sink, mut rx) = LogSink::channel();
        let entry = LogEntry::from_json(json!({"timestamp": "2024-05-01T12:00:00Z"})).unwrap();

        assert!(sink.send(entry.clone()));
        assert_eq!(rx.recv().await, Some(entry.clone()));

        drop(rx);
        assert!(!sink.send(entry));
    }
}
