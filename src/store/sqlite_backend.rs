//! SQLite 历史后端
//!
//! 单表存储所有品种的历史，`seq` 自增主键保证同一品种内的写入顺序。

use crate::common::{AppError, Observation, Result};
use crate::store::backend::{EvictionReport, HistoryBackend};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Row};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, instrument};

// 数据库连接池类型
pub type DbPool = Pool<SqliteConnectionManager>;

const SELECT_COLUMNS: &str =
    "symbol, ts, price, volume, volume_usd, open_interest, funding_rate, change_24h, high_24h, low_24h";

fn row_to_observation(row: &Row<'_>) -> rusqlite::Result<Observation> {
    Ok(Observation {
        symbol: row.get(0)?,
        timestamp_ms: row.get(1)?,
        price: row.get(2)?,
        volume_24h: row.get(3)?,
        volume_usd: row.get(4)?,
        open_interest: row.get(5)?,
        funding_rate: row.get(6)?,
        change_24h: row.get(7)?,
        high_24h: row.get(8)?,
        low_24h: row.get(9)?,
    })
}

/// 基于 r2d2 连接池的 SQLite 后端
pub struct SqliteHistoryBackend {
    pool: DbPool,
}

impl SqliteHistoryBackend {
    /// 打开（或创建）数据库，启动阶段失败即为致命错误
    #[instrument(target = "历史存储", skip_all, fields(db_path = %db_path.as_ref().display()), err)]
    pub fn open<P: AsRef<Path>>(db_path: P, pool_size: u32) -> Result<Self> {
        let db_path = db_path.as_ref();

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
            conn.execute_batch(
                "
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;
                PRAGMA temp_store = MEMORY;
                PRAGMA busy_timeout = 5000;
                ",
            )
        });

        let pool = Pool::builder()
            .max_size(pool_size)
            .connection_timeout(Duration::from_secs(2))
            .build(manager)
            .map_err(|e| AppError::DatabaseError(format!("创建连接池失败: {}", e)))?;

        let backend = Self { pool };
        backend.init_schema()?;

        info!(target: "历史存储", log_type = "module", db_path = %db_path.display(), pool_size, "SQLite历史后端已就绪");
        Ok(backend)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS history (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                ts INTEGER NOT NULL,
                price REAL NOT NULL,
                volume REAL NOT NULL,
                volume_usd REAL NOT NULL,
                open_interest REAL NOT NULL,
                funding_rate REAL NOT NULL,
                change_24h REAL NOT NULL,
                high_24h REAL NOT NULL,
                low_24h REAL NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_history_symbol_ts ON history(symbol, ts);
            CREATE INDEX IF NOT EXISTS idx_history_ts ON history(ts);
            ",
        )?;
        Ok(())
    }

    fn query_observations(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<Observation>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, row_to_observation)?;
        let mut observations = Vec::new();
        for row in rows {
            observations.push(row?);
        }
        Ok(observations)
    }
}

impl HistoryBackend for SqliteHistoryBackend {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn is_ready(&self) -> bool {
        self.pool.get_timeout(Duration::from_millis(200)).is_ok()
    }

    fn append(&mut self, observation: &Observation, max_len: usize) -> Result<usize> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO history (symbol, ts, price, volume, volume_usd, open_interest, funding_rate, change_24h, high_24h, low_24h)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                observation.symbol,
                observation.timestamp_ms,
                observation.price,
                observation.volume_24h,
                observation.volume_usd,
                observation.open_interest,
                observation.funding_rate,
                observation.change_24h,
                observation.high_24h,
                observation.low_24h,
            ],
        )?;

        let trimmed = tx.execute(
            "DELETE FROM history WHERE symbol = ?1 AND seq NOT IN (
                SELECT seq FROM history WHERE symbol = ?1 ORDER BY seq DESC LIMIT ?2
             )",
            params![observation.symbol, max_len as i64],
        )?;

        tx.commit()?;
        Ok(trimmed)
    }

    fn latest(&self, symbol: &str, limit: usize) -> Result<Vec<Observation>> {
        let limit = if limit == 0 { -1 } else { limit as i64 };
        let sql = format!(
            "SELECT {} FROM (SELECT seq, {} FROM history WHERE symbol = ?1 ORDER BY seq DESC LIMIT ?2) ORDER BY seq ASC",
            SELECT_COLUMNS, SELECT_COLUMNS
        );
        self.query_observations(&sql, params![symbol, limit])
    }

    fn range(&self, symbol: &str, start_ms: i64, end_ms: i64) -> Result<Vec<Observation>> {
        let sql = format!(
            "SELECT {} FROM history WHERE symbol = ?1 AND ts >= ?2 AND ts <= ?3 ORDER BY seq ASC",
            SELECT_COLUMNS
        );
        self.query_observations(&sql, params![symbol, start_ms, end_ms])
    }

    fn last(&self, symbol: &str) -> Result<Option<Observation>> {
        Ok(self.latest(symbol, 1)?.pop())
    }

    fn len(&self, symbol: &str) -> Result<usize> {
        let conn = self.pool.get()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM history WHERE symbol = ?1",
            params![symbol],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn symbols(&self) -> Result<Vec<String>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare("SELECT DISTINCT symbol FROM history ORDER BY symbol")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut symbols = Vec::new();
        for row in rows {
            symbols.push(row?);
        }
        Ok(symbols)
    }

    fn total_entries(&self) -> Result<usize> {
        let conn = self.pool.get()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM history", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn evict_before(&mut self, cutoff_ms: i64) -> Result<EvictionReport> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;

        // 先找出会被清空的品种：没有任何条目 >= cutoff
        let emptied_symbols = {
            let mut stmt = tx.prepare(
                "SELECT symbol FROM history GROUP BY symbol HAVING MAX(ts) < ?1",
            )?;
            let rows = stmt.query_map(params![cutoff_ms], |row| row.get::<_, String>(0))?;
            let mut symbols = Vec::new();
            for row in rows {
                symbols.push(row?);
            }
            symbols
        };

        let removed = tx.execute("DELETE FROM history WHERE ts < ?1", params![cutoff_ms])?;
        tx.commit()?;

        debug!(target: "历史存储", removed, emptied = emptied_symbols.len(), "SQLite按时间淘汰完成");
        Ok(EvictionReport { removed, emptied_symbols })
    }

    fn remove_symbol(&mut self, symbol: &str) -> Result<usize> {
        let conn = self.pool.get()?;
        Ok(conn.execute("DELETE FROM history WHERE symbol = ?1", params![symbol])?)
    }
}
