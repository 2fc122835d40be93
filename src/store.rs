use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::StoreError;
use crate::models::location::LocationRecord;

/// Change notifications for the location key, in write order.
/// `Ok(None)` means the key was cleared.
pub type RecordStream = BoxStream<'static, Result<Option<LocationRecord>, StoreError>>;

/// The realtime store holding the single bus location.
#[async_trait]
pub trait LocationStore: Send + Sync {
    /// Point-in-time read of the current record.
    async fn fetch(&self) -> Result<Option<LocationRecord>, StoreError>;

    /// Overwrites the current record and notifies subscribers.
    async fn publish(&self, record: &LocationRecord) -> Result<(), StoreError>;

    /// Standing subscription. Dropping the stream cancels it.
    async fn subscribe(&self) -> Result<RecordStream, StoreError>;

    /// Marks a driver online; doubles as a write-permission check.
    async fn mark_presence(&self, uid: &str, now: i64) -> Result<(), StoreError>;
}
