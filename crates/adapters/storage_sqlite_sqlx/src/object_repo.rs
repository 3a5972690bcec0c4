//! `SQLite` implementation of [`ObjectRepository`].

use std::future::Future;

use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row, SqlitePool};

use hearth_app::ports::ObjectRepository;
use hearth_domain::device::Serial;
use hearth_domain::error::HubError;
use hearth_domain::object::{ObjectKey, Payload, VersionedObject};
use hearth_domain::time;

use crate::error::StorageError;

/// Wrapper for converting database rows into a device's [`VersionedObject`].
struct Wrapper(Serial, VersionedObject);

impl<'r> FromRow<'r, SqliteRow> for Wrapper {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let serial: String = row.try_get("serial")?;
        let key: String = row.try_get("object_key")?;
        let revision: i64 = row.try_get("object_revision")?;
        let timestamp: i64 = row.try_get("object_timestamp")?;
        let value: String = row.try_get("value")?;
        let updated_at: i64 = row.try_get("updated_at")?;

        let serial = Serial::parse(&serial).map_err(|err| sqlx::Error::Decode(Box::new(err)))?;
        let key = ObjectKey::parse(&key).map_err(|err| sqlx::Error::Decode(Box::new(err)))?;
        let revision = u64::try_from(revision).map_err(|err| sqlx::Error::Decode(Box::new(err)))?;
        let value: Payload = serde_json::from_str(&value).map_err(|err| sqlx::Error::Decode(Box::new(err)))?;

        Ok(Self(
            serial,
            VersionedObject {
                revision,
                timestamp,
                key,
                value,
                updated_at: time::from_millis(updated_at),
            },
        ))
    }
}

const SELECT_ALL: &str = "SELECT * FROM objects ORDER BY serial, object_key";
const UPSERT: &str = "INSERT INTO objects (serial, object_key, object_revision, object_timestamp, value, updated_at) \
     VALUES (?, ?, ?, ?, ?, ?) \
     ON CONFLICT (serial, object_key) DO UPDATE SET \
     object_revision = excluded.object_revision, \
     object_timestamp = excluded.object_timestamp, \
     value = excluded.value, \
     updated_at = excluded.updated_at";
const DELETE_BY_SERIAL: &str = "DELETE FROM objects WHERE serial = ?";

/// `SQLite`-backed object repository.
pub struct SqliteObjectRepository {
    pool: SqlitePool,
}

impl SqliteObjectRepository {
    /// Create a new repository using the given connection pool.
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

impl ObjectRepository for SqliteObjectRepository {
    fn load_all(
        &self,
    ) -> impl Future<Output = Result<Vec<(Serial, VersionedObject)>, HubError>> + Send {
        let pool = self.pool.clone();
        async move {
            let rows: Vec<Wrapper> = sqlx::query_as(SELECT_ALL)
                .fetch_all(&pool)
                .await
                .map_err(StorageError::from)?;

            Ok(rows.into_iter().map(|w| (w.0, w.1)).collect())
        }
    }

    fn upsert(
        &self,
        serial: &Serial,
        object: &VersionedObject,
    ) -> impl Future<Output = Result<(), HubError>> + Send {
        let pool = self.pool.clone();
        let serial = serial.to_string();
        let key = object.key.to_string();
        let revision = i64::try_from(object.revision);
        let timestamp = object.timestamp;
        let value = serde_json::to_string(&object.value);
        let updated_at = time::to_millis(object.updated_at);
        async move {
            let revision = revision.map_err(StorageError::from)?;
            let value = value.map_err(StorageError::from)?;
            sqlx::query(UPSERT)
                .bind(serial)
                .bind(key)
                .bind(revision)
                .bind(timestamp)
                .bind(value)
                .bind(updated_at)
                .execute(&pool)
                .await
                .map_err(StorageError::from)?;

            Ok(())
        }
    }

    fn delete_device(&self, serial: &Serial) -> impl Future<Output = Result<(), HubError>> + Send {
        let pool = self.pool.clone();
        let serial = serial.to_string();
        async move {
            sqlx::query(DELETE_BY_SERIAL)
                .bind(serial)
                .execute(&pool)
                .await
                .map_err(StorageError::from)?;

            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::Config;
    use hearth_domain::object::ObjectKind;
    use serde_json::json;

    async fn setup() -> SqliteObjectRepository {
        let db = Config {
            database_url: "sqlite::memory:".to_string(),
        }
        .build()
        .await
        .unwrap();
        db.object_repository()
    }

    fn serial() -> Serial {
        Serial::parse("02AA01AB501203EQ").unwrap()
    }

    fn shared(value: serde_json::Value) -> VersionedObject {
        VersionedObject::first(
            ObjectKey::for_device(&ObjectKind::Shared, &serial()),
            value.as_object().cloned().unwrap(),
            time::now(),
        )
    }

    #[tokio::test]
    async fn should_load_what_was_upserted() {
        let repo = setup().await;
        let object = shared(json!({"target_temperature": 21.5, "hvac_mode": "heat"}));

        repo.upsert(&serial(), &object).await.unwrap();

        let loaded = repo.load_all().await.unwrap();
        assert_eq!(loaded.len(), 1);
        let (loaded_serial, loaded_object) = &loaded[0];
        assert_eq!(loaded_serial, &serial());
        assert_eq!(loaded_object.revision, 1);
        assert_eq!(loaded_object.timestamp, object.timestamp);
        assert_eq!(loaded_object.value, object.value);
    }

    #[tokio::test]
    async fn should_overwrite_row_when_key_upserted_again() {
        let repo = setup().await;
        let first = shared(json!({"target_temperature": 20.0}));
        let second = first.next(
            json!({"target_temperature": 22.0}).as_object().cloned().unwrap(),
            time::now(),
        );

        repo.upsert(&serial(), &first).await.unwrap();
        repo.upsert(&serial(), &second).await.unwrap();

        let loaded = repo.load_all().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].1.revision, 2);
        assert_eq!(loaded[0].1.value["target_temperature"], json!(22.0));
    }

    #[tokio::test]
    async fn should_delete_only_objects_of_given_device() {
        let repo = setup().await;
        let other = Serial::parse("09BB01AB501203ZZ").unwrap();
        repo.upsert(&serial(), &shared(json!({"a": 1})))
            .await
            .unwrap();
        repo.upsert(
            &other,
            &VersionedObject::first(
                ObjectKey::for_device(&ObjectKind::Device, &other),
                json!({"b": 2}).as_object().cloned().unwrap(),
                time::now(),
            ),
        )
        .await
        .unwrap();

        repo.delete_device(&serial()).await.unwrap();

        let loaded = repo.load_all().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].0, other);
    }
}
