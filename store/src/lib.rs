//! Storage facade over the pipeline's persisted domain types. Three
//! independently swappable repositories per spec §4.8 — `ItemStore`,
//! `VectorStore`, `CacheStore` — plus the relational siblings (`TopicStore`,
//! `TrendStore`, `RunStore`) that share the same SQLite connection as
//! `ItemStore` per the reference mapping in spec §6 ("the relational store
//! uses tables processed_items, topics, topic_items, trends, plugin_health,
//! pipeline_runs").

pub mod cache_store;
pub mod error;
pub mod health;
pub mod item;
pub mod item_store;
pub mod relational;
pub mod run;
pub mod run_store;
pub mod topic;
pub mod topic_store;
pub mod trend;
pub mod trend_store;
pub mod vector_store;

pub use cache_store::{CacheStore, InMemoryCacheStore};
pub use error::{StorageError, StorageResult};
pub use health::PluginHealth;
pub use item::{ItemStatus, ProcessedItem};
pub use item_store::{ItemStore, SqliteItemStore};
pub use relational::RelationalStore;
pub use run::{PipelineRun, RunStatus};
pub use run_store::{RunStore, SqliteRunStore};
pub use topic::Topic;
pub use topic_store::{SqliteTopicStore, TopicStore};
pub use trend::{Trend, TrendState};
pub use trend_store::{SqliteTrendStore, TrendStore};
pub use vector_store::{InMemoryVectorStore, VectorFilter, VectorMatch, VectorMeta, VectorStore};
