//! Reading sinks
//!
//! Each sink owns its connection for the whole process lifetime. A failing
//! sink never blocks or alters delivery to another sink.

use async_trait::async_trait;
use templog_common::Reading;
use tokio::task::JoinHandle;

use crate::error::Result;

pub mod message;
pub mod storage;

pub use message::MqttPublisher;
pub use storage::SqliteReadingStore;

/// Result of a successful save
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Inserted,
    /// A record for this source already exists in the current hour
    SkippedDuplicate,
}

/// Durable reading store
#[async_trait]
pub trait ReadingStore: Send + Sync {
    /// Persist a reading.
    ///
    /// With `dedup_by_hour` set, the save is skipped when the store already
    /// holds a record for the same source inside the current hour bucket.
    /// The check and the insert are separate statements, so two devices
    /// racing within the same hour may both insert.
    async fn save(&self, reading: &Reading, dedup_by_hour: bool) -> Result<SaveOutcome>;
}

/// Best-effort telemetry publisher
#[async_trait]
pub trait ReadingPublisher: Send + Sync {
    /// Start publishing `reading` to `topic` and return immediately.
    ///
    /// The returned task is detached by callers; nothing awaits its outcome.
    /// Returns `None` when there is no live connection (not an error).
    fn publish(&self, reading: &Reading, topic: &str) -> Option<JoinHandle<()>>;

    /// Flush and disconnect at shutdown
    async fn shutdown(&self) {}
}
