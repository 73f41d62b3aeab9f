use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to open catalog database {path}: {source}")]
    Open {
        source: rusqlite::Error,
        path: PathBuf,
    },
    #[error("failed to execute statement on catalog database: {0}")]
    Execute(#[from] rusqlite::Error),
    #[error("catalog path not configured")]
    MissingStore,
}

pub type CatalogResult<T> = Result<T, CatalogError>;
