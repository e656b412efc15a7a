//! Viewer snapshots and the "latest snapshot" cell.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError, RwLock};
use utoipa::ToSchema;

/// Viewer count of one channel, as sent to clients.
///
/// The count travels as a decimal string: `{"channel": "BBC Earth", "viewers": "3123"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ChannelViewers {
    pub channel: String,
    #[serde(with = "decimal_string")]
    #[schema(value_type = String, example = "3123")]
    pub viewers: u32,
}

impl ChannelViewers {
    pub fn new(channel: impl Into<String>, viewers: u32) -> Self {
        Self {
            channel: channel.into(),
            viewers,
        }
    }
}

mod decimal_string {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u32, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.trim().parse().map_err(de::Error::custom)
    }
}

/// Queue item handed to subscribers: the pre-serialized snapshot body.
///
/// Cloning only bumps the `Arc`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotMessage {
    pub seq: u64,
    pub body: Arc<str>,
}

/// Immutable set of per-channel counts produced by one tick.
#[derive(Debug, Clone)]
pub struct ViewersSnapshot {
    seq: u64,
    generated_at: DateTime<Local>,
    entries: Vec<ChannelViewers>,
    body: Arc<str>,
}

impl ViewersSnapshot {
    pub fn new(
        seq: u64,
        generated_at: DateTime<Local>,
        entries: Vec<ChannelViewers>,
    ) -> Result<Self, serde_json::Error> {
        let body: Arc<str> = serde_json::to_string(&entries)?.into();
        Ok(Self {
            seq,
            generated_at,
            entries,
            body,
        })
    }

    /// Strictly increasing across published snapshots
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn generated_at(&self) -> DateTime<Local> {
        self.generated_at
    }

    pub fn entries(&self) -> &[ChannelViewers] {
        &self.entries
    }

    /// JSON array sent over SSE, webhooks and `/viewers`
    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn message(&self) -> SnapshotMessage {
        SnapshotMessage {
            seq: self.seq,
            body: self.body.clone(),
        }
    }
}

/// Holder of the most recently published snapshot.
///
/// Readers get an `Arc` and never see a half-written snapshot; the writer
/// swaps the whole value.
#[derive(Debug)]
pub struct LatestSnapshot {
    inner: RwLock<Arc<ViewersSnapshot>>,
}

impl LatestSnapshot {
    pub fn new(initial: ViewersSnapshot) -> Self {
        Self {
            inner: RwLock::new(Arc::new(initial)),
        }
    }

    pub fn get(&self) -> Arc<ViewersSnapshot> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Wraps `entries` in a snapshot numbered after the current one and
    /// makes it the latest.
    pub fn publish(
        &self,
        generated_at: DateTime<Local>,
        entries: Vec<ChannelViewers>,
    ) -> Result<Arc<ViewersSnapshot>, serde_json::Error> {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let snapshot = Arc::new(ViewersSnapshot::new(guard.seq + 1, generated_at, entries)?);
        *guard = snapshot.clone();
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_viewers_serialize_as_string() {
        let entry = ChannelViewers::new("BBC Earth", 3123);
        let json = serde_json::to_string(&entry).unwrap();
        assert_eq!(json, r#"{"channel":"BBC Earth","viewers":"3123"}"#);

        let back: ChannelViewers = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn test_publish_increments_sequence() {
        let now = Local::now();
        let latest = LatestSnapshot::new(
            ViewersSnapshot::new(0, now, vec![ChannelViewers::new("A", 2000)]).unwrap(),
        );

        let published = latest
            .publish(now, vec![ChannelViewers::new("A", 2040)])
            .unwrap();
        assert_eq!(published.seq(), 1);
        assert_eq!(latest.get().seq(), 1);
        assert_eq!(latest.get().body(), r#"[{"channel":"A","viewers":"2040"}]"#);
        assert_eq!(published.message().seq, 1);
    }
}
