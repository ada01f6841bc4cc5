//! Error kinds surfaced by the forward table controller and rule service.

use std::path::PathBuf;

use thiserror::Error;

use crate::codec::CodecError;

/// Failure reported by the underlying pinned table.
pub type TableError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("load pinned map from userspace before you use it")]
    NotLoaded,

    #[error("map {} already loaded", path.display())]
    AlreadyLoaded { path: PathBuf },

    #[error("load pinned map {}: {source}", path.display())]
    LoadFailed {
        path: PathBuf,
        #[source]
        source: TableError,
    },

    #[error("invalid token '{token}', expected 16 hex characters: {source}")]
    BadToken {
        token: String,
        #[source]
        source: CodecError,
    },

    #[error("invalid destination address '{address}': {source}")]
    BadAddress {
        address: String,
        #[source]
        source: CodecError,
    },

    #[error("invalid destination port '{port}': {source}")]
    BadPort {
        port: String,
        #[source]
        source: CodecError,
    },

    #[error("iterate forward table: {source}")]
    ReadFailed {
        #[source]
        source: TableError,
    },

    #[error("insert entry for token {token}: {source}")]
    WriteFailed {
        token: String,
        #[source]
        source: TableError,
    },

    #[error("delete entry for token {token}: {source}")]
    DeleteFailed {
        token: String,
        #[source]
        source: TableError,
    },

    #[error("decode request error: {0}")]
    BadRequest(String),

    #[error("set backend server for map error: rule[{index}] token '{token}': {source}")]
    RuleRejected {
        index: usize,
        token: String,
        #[source]
        source: Box<Error>,
    },
}
