use crate::errors::{AppError, AppResult};
use crate::state::{DbCommand, Holding, Portfolio};
use crate::store::PortfolioStore;
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

pub type DbPool = Arc<Mutex<Connection>>;

const SCHEMA: &str = include_str!("../migrations/001_init.sql");

pub fn init_db(data_dir: &Path) -> AppResult<DbPool> {
    std::fs::create_dir_all(data_dir)?;
    let db_path = data_dir.join("finsight.db");
    let conn = Connection::open(&db_path)?;

    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON;")?;
    conn.execute_batch(SCHEMA)?;

    tracing::info!("database initialized at {}", db_path.display());
    Ok(Arc::new(Mutex::new(conn)))
}

fn lock(db: &DbPool) -> AppResult<MutexGuard<'_, Connection>> {
    db.lock().map_err(|e| AppError::Database(format!("lock poisoned: {e}")))
}

// ── Portfolio store ──

/// SQLite-backed portfolios. Holdings carry an explicit `position` so
/// reads come back in insertion order.
pub struct SqliteStore {
    db: DbPool,
}

impl SqliteStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }
}

fn load_portfolio(conn: &Connection, user_id: &str) -> AppResult<Option<Portfolio>> {
    let exists = conn
        .query_row(
            "SELECT 1 FROM portfolios WHERE user_id = ?1",
            rusqlite::params![user_id],
            |_| Ok(()),
        )
        .optional()?
        .is_some();
    if !exists {
        return Ok(None);
    }

    let mut stmt = conn.prepare(
        "SELECT symbol, quantity, buy_price FROM holdings WHERE user_id = ?1 ORDER BY position ASC",
    )?;
    let rows = stmt.query_map(rusqlite::params![user_id], |row| {
        Ok(Holding {
            symbol: row.get(0)?,
            quantity: row.get(1)?,
            buy_price: row.get(2)?,
        })
    })?;
    Ok(Some(Portfolio {
        user_id: user_id.to_string(),
        holdings: rows.filter_map(|r| r.ok()).collect(),
    }))
}

impl PortfolioStore for SqliteStore {
    fn get(&self, user_id: &str) -> AppResult<Option<Portfolio>> {
        let conn = lock(&self.db)?;
        load_portfolio(&conn, user_id)
    }

    fn put(&self, portfolio: &Portfolio) -> AppResult<()> {
        let mut conn = lock(&self.db)?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT OR IGNORE INTO portfolios (user_id) VALUES (?1)",
            rusqlite::params![portfolio.user_id],
        )?;
        tx.execute(
            "DELETE FROM holdings WHERE user_id = ?1",
            rusqlite::params![portfolio.user_id],
        )?;
        for (position, h) in portfolio.holdings.iter().enumerate() {
            tx.execute(
                "INSERT INTO holdings (user_id, position, symbol, quantity, buy_price) VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![portfolio.user_id, position as i64, h.symbol, h.quantity, h.buy_price],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn append(&self, user_id: &str, holding: Holding) -> AppResult<Portfolio> {
        let mut conn = lock(&self.db)?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT OR IGNORE INTO portfolios (user_id) VALUES (?1)",
            rusqlite::params![user_id],
        )?;
        tx.execute(
            "INSERT INTO holdings (user_id, position, symbol, quantity, buy_price)
             VALUES (?1, (SELECT COALESCE(MAX(position) + 1, 0) FROM holdings WHERE user_id = ?1), ?2, ?3, ?4)",
            rusqlite::params![user_id, holding.symbol, holding.quantity, holding.buy_price],
        )?;
        tx.commit()?;

        load_portfolio(&conn, user_id)?
            .ok_or_else(|| AppError::Database(format!("portfolio {user_id} vanished after append")))
    }
}

// ── Prediction log writer ──

/// Dedicated DB writer task. Reads commands from the bounded channel and
/// executes them. Prediction records are only written here.
pub async fn run_db_writer(db: DbPool, mut rx: mpsc::Receiver<DbCommand>) {
    tracing::info!("db writer task started");

    while let Some(cmd) = rx.recv().await {
        if let Err(e) = execute_command(&db, cmd) {
            tracing::error!("db write error: {e}");
        }
    }

    tracing::info!("db writer task shutting down");
}

fn execute_command(db: &DbPool, cmd: DbCommand) -> AppResult<()> {
    let conn = lock(db)?;

    match cmd {
        DbCommand::InsertPrediction {
            id, user_id, symbol, ai_prediction, ai_confidence, user_prediction,
            actual, outcome, hybrid_score, dominant_signal, created_at,
        } => {
            conn.execute(
                "INSERT INTO predictions (id, user_id, symbol, ai_prediction, ai_confidence, user_prediction, actual, outcome, hybrid_score, dominant_signal, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                rusqlite::params![id, user_id, symbol, ai_prediction, ai_confidence, user_prediction, actual, outcome, hybrid_score, dominant_signal, created_at],
            )?;
        }
    }
    Ok(())
}

// ── Query helpers (REST reads, cold path) ──

pub fn get_recent_predictions(
    db: &DbPool,
    user_id: Option<&str>,
    limit: usize,
) -> AppResult<Vec<PredictionRow>> {
    let conn = lock(db)?;
    let (sql, params): (&str, Vec<Box<dyn rusqlite::types::ToSql>>) = match user_id {
        Some(user) => (
            "SELECT id, user_id, symbol, ai_prediction, ai_confidence, user_prediction, actual, outcome, hybrid_score, dominant_signal, created_at FROM predictions WHERE user_id = ?1 ORDER BY created_at DESC LIMIT ?2",
            vec![Box::new(user.to_string()), Box::new(limit as i64)],
        ),
        None => (
            "SELECT id, user_id, symbol, ai_prediction, ai_confidence, user_prediction, actual, outcome, hybrid_score, dominant_signal, created_at FROM predictions ORDER BY created_at DESC LIMIT ?1",
            vec![Box::new(limit as i64)],
        ),
    };
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(rusqlite::params_from_iter(params.iter()), |row| {
        Ok(PredictionRow {
            id: row.get(0)?,
            user_id: row.get(1)?,
            symbol: row.get(2)?,
            ai_prediction: row.get(3)?,
            ai_confidence: row.get(4)?,
            user_prediction: row.get(5)?,
            actual: row.get(6)?,
            outcome: row.get(7)?,
            hybrid_score: row.get(8)?,
            dominant_signal: row.get(9)?,
            created_at: row.get(10)?,
        })
    })?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

// ── Row types ──

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionRow {
    pub id: String,
    pub user_id: Option<String>,
    pub symbol: String,
    pub ai_prediction: String,
    pub ai_confidence: f64,
    pub user_prediction: String,
    pub actual: String,
    pub outcome: String,
    pub hybrid_score: f64,
    pub dominant_signal: String,
    pub created_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_db() -> DbPool {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA).unwrap();
        Arc::new(Mutex::new(conn))
    }

    fn h(symbol: &str, quantity: f64) -> Holding {
        Holding { symbol: symbol.into(), quantity, buy_price: 100.0 }
    }

    fn prediction(id: &str, user: Option<&str>, created_at: &str) -> DbCommand {
        DbCommand::InsertPrediction {
            id: id.into(),
            user_id: user.map(String::from),
            symbol: "AAPL".into(),
            ai_prediction: "UP".into(),
            ai_confidence: 0.7,
            user_prediction: "DOWN".into(),
            actual: "UP".into(),
            outcome: "ai_correct".into(),
            hybrid_score: 0.64,
            dominant_signal: "UP".into(),
            created_at: created_at.into(),
        }
    }

    #[test]
    fn test_init_db_unusable_dir_is_storage_error() {
        let blocker = std::env::temp_dir().join(format!("finsight-blocker-{}", uuid::Uuid::new_v4()));
        std::fs::write(&blocker, b"not a directory").unwrap();

        let err = init_db(&blocker.join("data")).err().unwrap();
        assert!(matches!(err, AppError::Database(_)));

        std::fs::remove_file(&blocker).unwrap();
    }

    #[test]
    fn test_sqlite_append_keeps_order() {
        let store = SqliteStore::new(memory_db());
        assert!(store.get("u1").unwrap().is_none());

        store.append("u1", h("MSFT", 1.0)).unwrap();
        store.append("u1", h("AAPL", 2.0)).unwrap();
        let p = store.append("u1", h("MSFT", 3.0)).unwrap();

        let symbols: Vec<_> = p.holdings.iter().map(|h| h.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["MSFT", "AAPL", "MSFT"]);
        assert_eq!(store.get("u1").unwrap(), Some(p));
        assert!(store.get("u2").unwrap().is_none());
    }

    #[test]
    fn test_sqlite_put_replaces_holdings() {
        let store = SqliteStore::new(memory_db());
        store.append("u1", h("MSFT", 1.0)).unwrap();

        let replacement = Portfolio { user_id: "u1".into(), holdings: vec![h("TSLA", 4.0)] };
        store.put(&replacement).unwrap();
        assert_eq!(store.get("u1").unwrap(), Some(replacement));

        // appends continue after the replaced rows
        let p = store.append("u1", h("AAPL", 1.0)).unwrap();
        assert_eq!(p.holdings.len(), 2);
        assert_eq!(p.holdings[1].symbol, "AAPL");
    }

    #[test]
    fn test_empty_put_creates_portfolio() {
        let store = SqliteStore::new(memory_db());
        store.put(&Portfolio::empty("u3")).unwrap();
        assert_eq!(store.get("u3").unwrap(), Some(Portfolio::empty("u3")));
    }

    #[test]
    fn test_prediction_log_newest_first() {
        let db = memory_db();
        execute_command(&db, prediction("a", Some("u1"), "2026-01-01T00:00:00Z")).unwrap();
        execute_command(&db, prediction("b", None, "2026-01-02T00:00:00Z")).unwrap();
        execute_command(&db, prediction("c", Some("u1"), "2026-01-03T00:00:00Z")).unwrap();

        let all = get_recent_predictions(&db, None, 10).unwrap();
        let ids: Vec<_> = all.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b", "a"]);

        let limited = get_recent_predictions(&db, None, 1).unwrap();
        assert_eq!(limited.len(), 1);

        let mine = get_recent_predictions(&db, Some("u1"), 10).unwrap();
        assert_eq!(mine.len(), 2);
        assert!(mine.iter().all(|r| r.user_id.as_deref() == Some("u1")));
    }

    #[tokio::test]
    async fn test_writer_drains_channel() {
        let db = memory_db();
        let (tx, rx) = mpsc::channel(8);
        let writer = tokio::spawn(run_db_writer(db.clone(), rx));

        tx.send(prediction("x", None, "2026-02-01T00:00:00Z")).await.unwrap();
        drop(tx);
        writer.await.unwrap();

        let rows = get_recent_predictions(&db, None, 5).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].outcome, "ai_correct");
    }
}
