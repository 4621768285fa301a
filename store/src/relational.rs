//! Convenience bundle opening one SQLite connection and handing out the
//! four relational repositories that share it.

use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::StorageResult;
use crate::item_store::SqliteItemStore;
use crate::run_store::SqliteRunStore;
use crate::topic_store::SqliteTopicStore;
use crate::trend_store::SqliteTrendStore;

pub struct RelationalStore {
    pub items: SqliteItemStore,
    pub topics: SqliteTopicStore,
    pub trends: SqliteTrendStore,
    pub runs: SqliteRunStore,
}

impl RelationalStore {
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let conn = Arc::new(Mutex::new(Connection::open(path)?));
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Arc::new(Mutex::new(Connection::open_in_memory()?));
        Self::from_connection(conn)
    }

    fn from_connection(conn: Arc<Mutex<Connection>>) -> StorageResult<Self> {
        let items = SqliteItemStore::from_shared(Arc::clone(&conn))?;
        let topics = SqliteTopicStore::new(Arc::clone(&conn))?;
        let trends = SqliteTrendStore::new(Arc::clone(&conn))?;
        let runs = SqliteRunStore::new(conn)?;
        Ok(Self { items, topics, trends, runs })
    }
}
