pub mod catalog;
pub mod config;
pub mod error;
pub mod ingest;
pub mod session;
pub mod sqlite;
pub mod stream;
pub mod template;

pub use catalog::{
    provider_id, CatalogError, CatalogResult, ClassifiedFeed, ContentItem, ContentKind,
    FeedParser, LogoStats, RawEntry, SqliteCatalogStore, SqliteCatalogStoreBuilder, SyncMetadata,
    SYNC_METADATA_ID,
};
pub use config::{load_linea_config, LineaConfig};
pub use error::{ConfigError, Result};
pub use ingest::{
    BatchSink, BatchWriter, IngestError, IngestPipeline, IngestReport, IngestResult, InsertStats,
    ProgressCallback, RetryPolicy,
};
pub use session::{
    detect_device, fingerprint, Account, AccountUpdate, Admission, AuthOutcome, DeviceClass,
    DeviceSession, NewAccount, SessionError, SessionResult, SqliteSessionStore,
    SqliteSessionStoreBuilder,
};
pub use stream::{
    filter_headers, ProxiedStream, StreamError, StreamProxy, StreamResolver, StreamResult,
    PASSTHROUGH_HEADERS,
};
pub use template::{TemplateEngine, TemplateError, TemplateResult};
