use crate::errors::{AppError, AppResult};
use crate::state::{Holding, Portfolio};
use std::collections::HashMap;
use std::sync::Mutex;

/// Portfolio persistence seam. One portfolio per user id, created lazily
/// on first append; holdings are append-only and keep insertion order.
///
/// Built once at startup and shared through `AppState`.
pub trait PortfolioStore: Send + Sync {
    fn get(&self, user_id: &str) -> AppResult<Option<Portfolio>>;

    /// Replace the stored portfolio for `portfolio.user_id`.
    fn put(&self, portfolio: &Portfolio) -> AppResult<()>;

    /// Append one holding, creating the portfolio if needed. Returns the updated portfolio.
    /// Implementations should override this when they can do it atomically.
    fn append(&self, user_id: &str, holding: Holding) -> AppResult<Portfolio> {
        let mut portfolio = self.get(user_id)?.unwrap_or_else(|| Portfolio::empty(user_id));
        portfolio.holdings.push(holding);
        self.put(&portfolio)?;
        Ok(portfolio)
    }
}

/// Process-local store, used when SQLite is unavailable.
#[derive(Default)]
pub struct MemoryStore {
    portfolios: Mutex<HashMap<String, Portfolio>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> AppResult<std::sync::MutexGuard<'_, HashMap<String, Portfolio>>> {
        self.portfolios
            .lock()
            .map_err(|e| AppError::Database(format!("lock poisoned: {e}")))
    }
}

impl PortfolioStore for MemoryStore {
    fn get(&self, user_id: &str) -> AppResult<Option<Portfolio>> {
        Ok(self.lock()?.get(user_id).cloned())
    }

    fn put(&self, portfolio: &Portfolio) -> AppResult<()> {
        self.lock()?.insert(portfolio.user_id.clone(), portfolio.clone());
        Ok(())
    }

    fn append(&self, user_id: &str, holding: Holding) -> AppResult<Portfolio> {
        let mut map = self.lock()?;
        let portfolio = map
            .entry(user_id.to_string())
            .or_insert_with(|| Portfolio::empty(user_id));
        portfolio.holdings.push(holding);
        Ok(portfolio.clone())
    }
}
