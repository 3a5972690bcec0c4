//! `SQLite` implementation of [`PairingGate`].
//!
//! A device is authorized once it has an owner, or while an unclaimed entry
//! key issued for it has not expired.

use std::future::Future;

use sqlx::SqlitePool;

use hearth_app::ports::PairingGate;
use hearth_domain::device::Serial;
use hearth_domain::error::HubError;
use hearth_domain::time::{self, Timestamp};

use crate::error::StorageError;

const IS_AUTHORIZED: &str = "SELECT EXISTS (SELECT 1 FROM device_owners WHERE serial = ?1) \
     OR EXISTS (SELECT 1 FROM entry_keys WHERE serial = ?1 AND expires_at > ?2 AND claimed_by IS NULL)";
const INSERT_OWNER: &str = "INSERT INTO device_owners (serial, user_id, created_at) VALUES (?, ?, ?) \
     ON CONFLICT (serial) DO UPDATE SET user_id = excluded.user_id";
const INSERT_ENTRY_KEY: &str =
    "INSERT INTO entry_keys (code, serial, created_at, expires_at) VALUES (?, ?, ?, ?)";

/// `SQLite`-backed pairing gate.
#[derive(Clone)]
pub struct SqlitePairingGate {
    pool: SqlitePool,
}

impl SqlitePairingGate {
    /// Create a new gate using the given connection pool.
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Pair `serial` to `user_id`, replacing any previous owner.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the query fails.
    pub async fn record_owner(&self, serial: &Serial, user_id: &str) -> Result<(), StorageError> {
        sqlx::query(INSERT_OWNER)
            .bind(serial.as_str())
            .bind(user_id)
            .bind(time::to_millis(time::now()))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Issue a pairing code for `serial`, valid until `expires_at`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the query fails, including a duplicate code.
    pub async fn issue_entry_key(
        &self,
        code: &str,
        serial: &Serial,
        expires_at: Timestamp,
    ) -> Result<(), StorageError> {
        sqlx::query(INSERT_ENTRY_KEY)
            .bind(code)
            .bind(serial.as_str())
            .bind(time::to_millis(time::now()))
            .bind(time::to_millis(expires_at))
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

impl PairingGate for SqlitePairingGate {
    fn is_authorized(&self, serial: &Serial) -> impl Future<Output = Result<bool, HubError>> + Send {
        let pool = self.pool.clone();
        let serial = serial.to_string();
        async move {
            let (authorized,): (i64,) = sqlx::query_as(IS_AUTHORIZED)
                .bind(serial)
                .bind(time::to_millis(time::now()))
                .fetch_one(&pool)
                .await
                .map_err(StorageError::from)?;
            Ok(authorized != 0)
        }
    }
}
