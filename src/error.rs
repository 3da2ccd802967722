//! Crate-wide error types.
//!
//! Each layer (transport, backend, page table, configuration) has its own
//! error enum; [`Error`] is the union that every public API returns,
//! wiring the layers together with `#[from]` conversions the way the
//! backends this crate is descended from wire `StorageError` through
//! every call site.

use thiserror::Error;

/// Failure at the HTTP transport layer (`transport.rs`).
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("http {code}: {body}")]
    Http { code: u16, body: String },

    #[error("response of {actual} bytes overflowed the {capacity}-byte buffer")]
    BufferOverflow { actual: usize, capacity: usize },
}

/// Failure at the key-value backend layer (`backend/*.rs`).
#[derive(Debug, Error)]
pub enum BackendError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("disk full")]
    DiskFull,

    #[error("malformed metadata blob: {0}")]
    Metadata(String),

    #[error("invalid backend uri {uri:?}: {reason}")]
    InvalidUri { uri: String, reason: String },

    #[error(
        "page size mismatch: backend was opened with page_size={existing}, requested page_size={requested}"
    )]
    PageSizeMismatch { existing: u64, requested: u64 },

    #[error("missing required credential: {0}")]
    MissingCredential(&'static str),
}

/// Failure at the page-table / translation layer (`page_table/*.rs`).
#[derive(Debug, Error)]
pub enum PageTableError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("write of {len} bytes at address {addr} exceeds the maximum address space")]
    AddressOverflow { addr: u64, len: u64 },
}

/// Failure constructing a [`crate::config::DriverConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("toml parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("io error reading config: {0}")]
    Io(#[from] std::io::Error),

    #[error("missing required field: {0}")]
    MissingField(&'static str),
}

/// The top-level error type returned by every public driver operation.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    PageTable(#[from] PageTableError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
