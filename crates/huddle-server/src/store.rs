//! Async bridge to the synchronous SQLite store.
//!
//! Every call runs on the blocking pool while holding the single database
//! lock, so SQLite stays the one ordering authority for writes. Dropping the
//! returned future does not cancel an operation that already started.

use std::sync::{Arc, Mutex};

use huddle_store::Database;

use crate::error::ChatError;

#[derive(Clone)]
pub struct SharedStore {
    db: Arc<Mutex<Database>>,
}

impl SharedStore {
    pub fn new(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    /// Run `op` against the database on the blocking pool.
    pub async fn call<T, F>(&self, op: F) -> Result<T, ChatError>
    where
        F: FnOnce(&mut Database) -> huddle_store::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            let mut guard = db
                .lock()
                .map_err(|_| ChatError::PersistenceFailure("database lock poisoned".into()))?;
            op(&mut *guard).map_err(ChatError::from)
        })
        .await
        .map_err(|e| ChatError::PersistenceFailure(format!("store task failed: {e}")))?;

        if let Err(ChatError::PersistenceFailure(detail)) = &outcome {
            tracing::error!(error = %detail, "Store operation failed");
        }
        outcome
    }
}
