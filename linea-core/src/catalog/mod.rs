mod error;
mod models;
mod parser;
mod store;

pub use error::{CatalogError, CatalogResult};
pub use models::{ContentItem, ContentKind, SyncMetadata, SYNC_METADATA_ID};
pub use parser::{provider_id, ClassifiedFeed, FeedParser, LogoStats, RawEntry};
pub use store::{SqliteCatalogStore, SqliteCatalogStoreBuilder};
