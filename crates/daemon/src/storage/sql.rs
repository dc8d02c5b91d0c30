use std::str::FromStr;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row as _;
use time::OffsetDateTime;

use common::tuf::RoleName;

use super::{Change, Channel, Gun, MetaStore, MetaUpdate, StorageError, PUBLISHED};

/// SQL-backed metadata store.
///
/// Table names are per-instance fields threaded into every query, so two
/// logical stores can share one database under different namespaces
/// (`<namespace>_tuf_files`, `<namespace>_changefeed`) without any shared
/// mutable naming state.
#[derive(Clone, Debug)]
pub struct SqlStore {
    pool: SqlitePool,
    tuf_table: String,
    changefeed_table: String,
}

impl SqlStore {
    /// Open (and migrate) a store at `db_url`. Only sqlite URLs are
    /// supported by this build; other backends are rejected at startup.
    pub async fn connect(db_url: &str, namespace: &str) -> Result<Self, StorageError> {
        if !db_url.starts_with("sqlite:") {
            return Err(StorageError::Backend(format!(
                "unsupported database url scheme: {db_url}"
            )));
        }
        let options = SqliteConnectOptions::from_str(db_url)
            .map_err(StorageError::Database)?
            .create_if_missing(true);
        // a pooled in-memory database would give every connection its own
        // empty database, so keep those on a single connection
        let max_connections = if db_url.contains(":memory:") { 1 } else { 8 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        Self::with_pool(pool, namespace).await
    }

    /// Build a namespaced store over an existing pool and run migrations.
    pub async fn with_pool(pool: SqlitePool, namespace: &str) -> Result<Self, StorageError> {
        let (tuf_table, changefeed_table) = if namespace.is_empty() {
            ("tuf_files".to_string(), "changefeed".to_string())
        } else {
            (
                format!("{namespace}_tuf_files"),
                format!("{namespace}_changefeed"),
            )
        };
        let store = SqlStore {
            pool,
            tuf_table,
            changefeed_table,
        };
        store.migrate().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn migrate(&self) -> Result<(), StorageError> {
        let tuf = &self.tuf_table;
        let changefeed = &self.changefeed_table;
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {tuf} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                gun TEXT NOT NULL,
                role TEXT NOT NULL,
                channel_id INTEGER NOT NULL DEFAULT 1,
                version INTEGER NOT NULL,
                data BLOB NOT NULL,
                sha256 TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                UNIQUE (gun, role, channel_id, version)
            )"
        ))
        .execute(&self.pool)
        .await?;
        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{tuf}_lookup
             ON {tuf} (gun, role, channel_id, version DESC)"
        ))
        .execute(&self.pool)
        .await?;
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {changefeed} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                gun TEXT NOT NULL,
                role TEXT NOT NULL,
                channel_id INTEGER NOT NULL,
                version INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            )"
        ))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn row_result(
    row: Option<sqlx::sqlite::SqliteRow>,
    gun: &Gun,
    role: &RoleName,
) -> Result<(OffsetDateTime, Vec<u8>), StorageError> {
    let row = row.ok_or_else(|| StorageError::NotFound {
        gun: gun.to_string(),
        role: role.to_string(),
    })?;
    let created_at: i64 = row.get("created_at");
    let data: Vec<u8> = row.get("data");
    let created_at = OffsetDateTime::from_unix_timestamp(created_at)
        .map_err(|err| StorageError::Backend(format!("invalid created_at in database: {err}")))?;
    Ok((created_at, data))
}

#[async_trait]
impl MetaStore for SqlStore {
    async fn get_current(
        &self,
        gun: &Gun,
        role: &RoleName,
        channel: Option<Channel>,
    ) -> Result<(OffsetDateTime, Vec<u8>), StorageError> {
        let row = sqlx::query(&format!(
            "SELECT data, created_at FROM {} \
             WHERE gun = ?1 AND role = ?2 AND channel_id = ?3 \
             ORDER BY version DESC LIMIT 1",
            self.tuf_table
        ))
        .bind(gun.as_str())
        .bind(role.as_str())
        .bind(channel.unwrap_or(PUBLISHED).id)
        .fetch_optional(&self.pool)
        .await?;
        row_result(row, gun, role)
    }

    async fn get_checksum(
        &self,
        gun: &Gun,
        role: &RoleName,
        checksum: &str,
        channel: Option<Channel>,
    ) -> Result<(OffsetDateTime, Vec<u8>), StorageError> {
        let row = sqlx::query(&format!(
            "SELECT data, created_at FROM {} \
             WHERE gun = ?1 AND role = ?2 AND channel_id = ?3 AND sha256 = ?4 \
             LIMIT 1",
            self.tuf_table
        ))
        .bind(gun.as_str())
        .bind(role.as_str())
        .bind(channel.unwrap_or(PUBLISHED).id)
        .bind(checksum.to_lowercase())
        .fetch_optional(&self.pool)
        .await?;
        row_result(row, gun, role)
    }

    async fn get_version(
        &self,
        gun: &Gun,
        role: &RoleName,
        version: i64,
        channel: Option<Channel>,
    ) -> Result<(OffsetDateTime, Vec<u8>), StorageError> {
        let row = sqlx::query(&format!(
            "SELECT data, created_at FROM {} \
             WHERE gun = ?1 AND role = ?2 AND channel_id = ?3 AND version = ?4 \
             LIMIT 1",
            self.tuf_table
        ))
        .bind(gun.as_str())
        .bind(role.as_str())
        .bind(channel.unwrap_or(PUBLISHED).id)
        .bind(version)
        .fetch_optional(&self.pool)
        .await?;
        row_result(row, gun, role)
    }

    async fn update_current(&self, gun: &Gun, update: MetaUpdate) -> Result<(), StorageError> {
        self.update_many(gun, vec![update]).await
    }

    async fn update_many(&self, gun: &Gun, updates: Vec<MetaUpdate>) -> Result<(), StorageError> {
        // duplicate (role, version, channel) pairs fail before any write
        let mut seen = std::collections::HashSet::new();
        for update in &updates {
            for channel in update.write_channels() {
                if !seen.insert((update.role.clone(), channel.id, update.version)) {
                    return Err(StorageError::OldVersion {
                        gun: gun.to_string(),
                        role: update.role.to_string(),
                    });
                }
            }
        }

        let now = OffsetDateTime::now_utc().unix_timestamp();
        let mut tx = self.pool.begin().await?;
        for update in &updates {
            let checksum = hex::encode(Sha256::digest(&update.data));
            for channel in update.write_channels() {
                let current: Option<i64> = sqlx::query_scalar(&format!(
                    "SELECT MAX(version) FROM {} \
                     WHERE gun = ?1 AND role = ?2 AND channel_id = ?3",
                    self.tuf_table
                ))
                .bind(gun.as_str())
                .bind(update.role.as_str())
                .bind(channel.id)
                .fetch_one(&mut *tx)
                .await?;
                if current.map(|v| v >= update.version).unwrap_or(false) {
                    // dropping the transaction rolls everything back
                    return Err(StorageError::OldVersion {
                        gun: gun.to_string(),
                        role: update.role.to_string(),
                    });
                }

                sqlx::query(&format!(
                    "INSERT INTO {} (gun, role, channel_id, version, data, sha256, created_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    self.tuf_table
                ))
                .bind(gun.as_str())
                .bind(update.role.as_str())
                .bind(channel.id)
                .bind(update.version)
                .bind(update.data.as_slice())
                .bind(&checksum)
                .bind(now)
                .execute(&mut *tx)
                .await?;

                sqlx::query(&format!(
                    "INSERT INTO {} (gun, role, channel_id, version, created_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    self.changefeed_table
                ))
                .bind(gun.as_str())
                .bind(update.role.as_str())
                .bind(channel.id)
                .bind(update.version)
                .bind(now)
                .execute(&mut *tx)
                .await?;
            }
        }
        tx.commit().await?;
        Ok(())
    }

    async fn delete(&self, gun: &Gun, channel: Option<Channel>) -> Result<(), StorageError> {
        match channel {
            Some(channel) => {
                sqlx::query(&format!(
                    "DELETE FROM {} WHERE gun = ?1 AND channel_id = ?2",
                    self.tuf_table
                ))
                .bind(gun.as_str())
                .bind(channel.id)
                .execute(&self.pool)
                .await?;
            }
            None => {
                sqlx::query(&format!("DELETE FROM {} WHERE gun = ?1", self.tuf_table))
                    .bind(gun.as_str())
                    .execute(&self.pool)
                    .await?;
            }
        }
        Ok(())
    }

    async fn get_changes(
        &self,
        change_id: &str,
        records: usize,
        filter_gun: &str,
    ) -> Result<Vec<Change>, StorageError> {
        let after: i64 = change_id.parse().unwrap_or(0);
        let rows = sqlx::query(&format!(
            "SELECT id, gun, role, channel_id, version, created_at FROM {} \
             WHERE id > ?1 AND (?2 = '' OR gun = ?2) \
             ORDER BY id ASC LIMIT ?3",
            self.changefeed_table
        ))
        .bind(after)
        .bind(filter_gun)
        .bind(records as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let created_at: i64 = row.get("created_at");
                let created_at = OffsetDateTime::from_unix_timestamp(created_at).map_err(|err| {
                    StorageError::Backend(format!("invalid created_at in database: {err}"))
                })?;
                Ok(Change {
                    id: row.get("id"),
                    gun: row.get("gun"),
                    role: row.get("role"),
                    channel_id: row.get("channel_id"),
                    version: row.get("version"),
                    created_at,
                })
            })
            .collect()
    }

    async fn check_health(&self) -> Result<(), StorageError> {
        sqlx::query(&format!("SELECT COUNT(*) FROM {}", self.tuf_table))
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }
}
