use crate::db::{queries, DbPool};
use crate::error::StoreError;
use crate::models::location::{presence_key, LocationRecord, PresenceRecord};
use crate::store::{LocationStore, RecordStream};
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::postgres::{PgListener, PgNotification};
use sqlx::types::Json;
use sqlx::Row;
use tracing::{debug, info};

/// Key/value store on Postgres with LISTEN/NOTIFY push.
///
/// Each publish upserts the row and notifies inside one transaction, so
/// listeners see changes in commit order.
pub struct PgLocationStore {
    pool: DbPool,
    key: String,
    channel: String,
}

/// Payload carried by `pg_notify`.
#[derive(Debug, Serialize, Deserialize)]
struct ChangeNotice {
    key: String,
    value: Option<Value>,
}

impl PgLocationStore {
    pub fn new(pool: DbPool, key: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            pool,
            key: key.into(),
            channel: channel.into(),
        }
    }

    async fn put(&self, key: &str, value: Value, notify: bool) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(queries::UPSERT_VALUE)
            .bind(key)
            .bind(Json(&value))
            .execute(&mut *tx)
            .await?;

        if notify {
            let notice = serde_json::to_string(&ChangeNotice {
                key: key.to_string(),
                value: Some(value),
            })?;
            sqlx::query(queries::NOTIFY_CHANGE)
                .bind(&self.channel)
                .bind(notice)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl LocationStore for PgLocationStore {
    async fn fetch(&self) -> Result<Option<LocationRecord>, StoreError> {
        let row = sqlx::query(queries::SELECT_VALUE)
            .bind(&self.key)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            None => Ok(None),
            Some(row) => {
                let Json(value): Json<Value> = row.try_get("value")?;
                decode_value(value)
            }
        }
    }

    async fn publish(&self, record: &LocationRecord) -> Result<(), StoreError> {
        let value = serde_json::to_value(record)?;
        self.put(&self.key, value, true).await?;
        debug!("Published location {}, {} to {}", record.lat, record.lng, self.key);
        Ok(())
    }

    async fn subscribe(&self) -> Result<RecordStream, StoreError> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(&self.channel).await?;
        info!("Listening for changes of {} on channel {}", self.key, self.channel);

        let key = self.key.clone();
        let stream = listener
            .into_stream()
            .filter_map(move |item| futures::future::ready(decode_notification(item, &key)));
        Ok(stream.boxed())
    }

    async fn mark_presence(&self, uid: &str, now: i64) -> Result<(), StoreError> {
        let value = serde_json::to_value(PresenceRecord {
            is_online: true,
            timestamp: now,
        })?;
        self.put(&presence_key(uid), value, false).await
    }
}

fn decode_value(value: Value) -> Result<Option<LocationRecord>, StoreError> {
    if value.is_null() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_value(value)?))
}

/// Maps one notification to a stream item; notices for other keys are dropped.
fn decode_notification(
    item: Result<PgNotification, sqlx::Error>,
    key: &str,
) -> Option<Result<Option<LocationRecord>, StoreError>> {
    let notification = match item {
        Ok(n) => n,
        Err(e) => return Some(Err(e.into())),
    };
    decode_notice(notification.payload(), key)
}

fn decode_notice(payload: &str, key: &str) -> Option<Result<Option<LocationRecord>, StoreError>> {
    let notice: ChangeNotice = match serde_json::from_str(payload) {
        Ok(n) => n,
        Err(e) => return Some(Err(e.into())),
    };
    if notice.key != key {
        return None;
    }
    Some(decode_value(notice.value.unwrap_or(Value::Null)))
}
