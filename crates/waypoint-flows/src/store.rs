use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use waypoint_core::config::DatabaseConfig;
use waypoint_core::error::{Result, WaypointError};

/// One saved forecast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredForecast {
    pub id: i64,
    pub user_id: i64,
    pub forecast: String,
    pub created_at: DateTime<Utc>,
}

/// SQLite-backed forecast store.
///
/// With `force_rollback` every write happens inside a transaction that is
/// never committed, so nothing outlives the connection.
pub struct ForecastStore {
    conn: Mutex<Connection>,
}

fn db_err(e: rusqlite::Error) -> WaypointError {
    WaypointError::Database(e.to_string())
}

impl ForecastStore {
    pub fn open(config: &DatabaseConfig) -> Result<Self> {
        let conn = if config.is_memory() {
            Connection::open_in_memory().map_err(db_err)?
        } else {
            let path = config.resolved_path();
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    WaypointError::Database(format!("Failed to create db directory: {}", e))
                })?;
            }
            Connection::open(&path).map_err(db_err)?
        };

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS forecasts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                forecast TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_forecasts_user ON forecasts(user_id, id);",
        )
        .map_err(db_err)?;

        if config.force_rollback {
            conn.execute_batch("BEGIN").map_err(db_err)?;
            info!("Forecast store opened with forced rollback");
        }

        debug!(path = %config.path, "Forecast store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| WaypointError::Database(format!("Lock poisoned: {}", e)))
    }

    /// Save a forecast for `user_id`, returning its row id.
    pub fn store_forecast(&self, user_id: i64, forecast: &str) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO forecasts (user_id, forecast, created_at) VALUES (?1, ?2, ?3)",
            params![user_id, forecast, Utc::now().to_rfc3339()],
        )
        .map_err(db_err)?;
        let id = conn.last_insert_rowid();
        debug!(user_id, id, "Stored forecast");
        Ok(id)
    }

    /// Every forecast for `user_id`, oldest first.
    pub fn forecasts_for(&self, user_id: i64) -> Result<Vec<StoredForecast>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, user_id, forecast, created_at FROM forecasts
                 WHERE user_id = ?1 ORDER BY id",
            )
            .map_err(db_err)?;

        let rows = stmt
            .query_map(params![user_id], |row| {
                let created_at: String = row.get(3)?;
                Ok(StoredForecast {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    forecast: row.get(2)?,
                    created_at: DateTime::parse_from_rfc3339(&created_at)
                        .map(|dt| dt.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                })
            })
            .map_err(db_err)?;

        rows.collect::<std::result::Result<Vec<_>, _>>().map_err(db_err)
    }
}
