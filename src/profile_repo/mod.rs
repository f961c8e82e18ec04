// SQLite-backed profile store. One meta table registers scrape targets and
// allocates their stable ids; each target gets its own time-indexed profile
// table named after that id, created on first write.

mod blob;
pub mod gc;

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};

use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::models::{BasicQueryParam, ProfileList, ProfileTarget, TargetInfo};
use crate::util;

const META_TABLE: &str = "continuous_profiling_targets_meta";

/// Returned by every operation invoked after `close()`.
#[derive(Debug, Error)]
#[error("storage is closed")]
pub struct StoreClosed;

struct MetaState {
    cache: HashMap<ProfileTarget, TargetInfo>,
    /// Highest id ever issued; rebased to `max(id)` on open so ids stay
    /// stable across restarts.
    id_alloc: i64,
}

pub struct ProfileStorage {
    pool: SqlitePool,
    closed: AtomicBool,
    meta: Mutex<MetaState>,
}

impl ProfileStorage {
    pub async fn open(store_path: &str) -> anyhow::Result<Self> {
        std::fs::create_dir_all(store_path)?;
        let db_path = Path::new(store_path).join("profiles.db");
        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5))
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);
        let pool = SqlitePoolOptions::new().connect_with(opts).await?;

        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {META_TABLE} (
                id INTEGER PRIMARY KEY,
                kind TEXT NOT NULL,
                component TEXT NOT NULL,
                address TEXT NOT NULL,
                last_scrape_ts INTEGER NOT NULL
            )"
        ))
        .execute(&pool)
        .await?;

        let mut cache = HashMap::new();
        let mut max_id: i64 = 0;
        let rows = sqlx::query(&format!(
            "SELECT id, kind, component, address, last_scrape_ts FROM {META_TABLE}"
        ))
        .fetch_all(&pool)
        .await?;
        for row in rows {
            let id: i64 = row.try_get("id")?;
            let target = ProfileTarget {
                kind: row.try_get("kind")?,
                component: row.try_get("component")?,
                address: row.try_get("address")?,
            };
            let last_scrape_ts: i64 = row.try_get("last_scrape_ts")?;
            cache.insert(target, TargetInfo { id, last_scrape_ts });
            max_id = max_id.max(id);
        }
        tracing::info!(targets = cache.len(), "profile storage opened");

        Ok(Self {
            pool,
            closed: AtomicBool::new(false),
            meta: Mutex::new(MetaState {
                cache,
                id_alloc: max_id,
            }),
        })
    }

    fn check_open(&self) -> anyhow::Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreClosed.into());
        }
        Ok(())
    }

    /// Persist one profile blob under the target's table. Registers the
    /// target on first sight; the row insert itself runs outside the meta
    /// lock so concurrent writers only serialize on registration.
    pub async fn add_profile(
        &self,
        target: &ProfileTarget,
        ts: i64,
        data: &[u8],
    ) -> anyhow::Result<()> {
        self.check_open()?;
        let info = self.prepare_target(target).await?;
        let stored = blob::compress(data)?;
        sqlx::query(&format!(
            "INSERT INTO {} (ts, data) VALUES (?, ?)",
            profile_table_name(info.id)
        ))
        .bind(ts)
        .bind(stored)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn prepare_target(&self, target: &ProfileTarget) -> anyhow::Result<TargetInfo> {
        let mut meta = self.meta.lock().await;
        if let Some(info) = meta.cache.get(target) {
            return Ok(*info);
        }

        let id = meta.id_alloc + 1;
        let now = util::now_millis();
        sqlx::query(&format!(
            "INSERT INTO {META_TABLE} (id, kind, component, address, last_scrape_ts)
             VALUES (?, ?, ?, ?, ?)"
        ))
        .bind(id)
        .bind(&target.kind)
        .bind(&target.component)
        .bind(&target.address)
        .bind(now)
        .execute(&self.pool)
        .await?;
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {} (ts INTEGER PRIMARY KEY, data BLOB NOT NULL)",
            profile_table_name(id)
        ))
        .execute(&self.pool)
        .await?;

        meta.id_alloc = id;
        let info = TargetInfo {
            id,
            last_scrape_ts: now,
        };
        meta.cache.insert(target.clone(), info);
        tracing::info!(
            kind = %target.kind,
            component = %target.component,
            address = %target.address,
            id,
            "registered profile target"
        );
        Ok(info)
    }

    /// Timestamps per target within `[begin, end]`. Targets the store has
    /// never seen produce an entry with an empty list.
    pub async fn query_profile_list(
        &self,
        param: &BasicQueryParam,
    ) -> anyhow::Result<Vec<ProfileList>> {
        self.check_open()?;
        let targets = self.resolve_targets(&param.targets).await;
        let mut result = Vec::with_capacity(targets.len());
        for (target, info) in targets {
            let Some(info) = info else {
                result.push(ProfileList {
                    target,
                    ts_list: Vec::new(),
                });
                continue;
            };
            let rows = sqlx::query(&format!(
                "SELECT ts FROM {} WHERE ts BETWEEN ? AND ? ORDER BY ts",
                profile_table_name(info.id)
            ))
            .bind(param.begin)
            .bind(param.end)
            .fetch_all(&self.pool)
            .await?;
            let mut ts_list = Vec::with_capacity(rows.len());
            for row in rows {
                ts_list.push(row.try_get::<i64, _>("ts")?);
            }
            result.push(ProfileList { target, ts_list });
        }
        Ok(result)
    }

    /// Stream stored profiles within `[begin, end]` through `handle` in
    /// timestamp order per target. A handle error aborts the scan. Unknown
    /// targets are skipped.
    pub async fn query_profile_data<F>(
        &self,
        param: &BasicQueryParam,
        mut handle: F,
    ) -> anyhow::Result<()>
    where
        F: FnMut(&ProfileTarget, i64, &[u8]) -> anyhow::Result<()>,
    {
        self.check_open()?;
        for (target, info) in self.resolve_targets(&param.targets).await {
            let Some(info) = info else { continue };
            let rows = sqlx::query(&format!(
                "SELECT ts, data FROM {} WHERE ts BETWEEN ? AND ? ORDER BY ts",
                profile_table_name(info.id)
            ))
            .bind(param.begin)
            .bind(param.end)
            .fetch_all(&self.pool)
            .await?;
            for row in rows {
                let ts: i64 = row.try_get("ts")?;
                let stored: Vec<u8> = row.try_get("data")?;
                let data = blob::decompress(&stored)?;
                handle(&target, ts, &data)?;
            }
        }
        Ok(())
    }

    /// Record the latest successful scrape time of a target. Returns false
    /// without touching the row when `ts` is not newer than the recorded
    /// value, or when the target is unknown.
    pub async fn update_profile_target_info(
        &self,
        target: &ProfileTarget,
        ts: i64,
    ) -> anyhow::Result<bool> {
        self.check_open()?;
        let mut meta = self.meta.lock().await;
        let Some(info) = meta.cache.get_mut(target) else {
            return Ok(false);
        };
        if info.last_scrape_ts >= ts {
            return Ok(false);
        }
        sqlx::query(&format!(
            "UPDATE {META_TABLE} SET last_scrape_ts = ? WHERE id = ?"
        ))
        .bind(ts)
        .bind(info.id)
        .execute(&self.pool)
        .await?;
        info.last_scrape_ts = ts;
        Ok(true)
    }

    /// Snapshot of every registered target, for enumeration and GC.
    pub async fn known_targets(&self) -> Vec<(ProfileTarget, TargetInfo)> {
        let meta = self.meta.lock().await;
        meta.cache
            .iter()
            .map(|(target, info)| (target.clone(), *info))
            .collect()
    }

    pub(crate) async fn delete_profiles_before(
        &self,
        id: i64,
        safepoint: i64,
    ) -> anyhow::Result<u64> {
        self.check_open()?;
        let result = sqlx::query(&format!(
            "DELETE FROM {} WHERE ts <= ?",
            profile_table_name(id)
        ))
        .bind(safepoint)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Idempotent; all subsequent operations return `StoreClosed`.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.pool.close().await;
        tracing::info!("profile storage closed");
    }

    async fn resolve_targets(
        &self,
        requested: &[ProfileTarget],
    ) -> Vec<(ProfileTarget, Option<TargetInfo>)> {
        let meta = self.meta.lock().await;
        if requested.is_empty() {
            meta.cache
                .iter()
                .map(|(target, info)| (target.clone(), Some(*info)))
                .collect()
        } else {
            requested
                .iter()
                .map(|target| (target.clone(), meta.cache.get(target).copied()))
                .collect()
        }
    }
}

fn profile_table_name(id: i64) -> String {
    format!("continuous_profiling_{id}")
}
