//! A paged virtual block device over a pluggable key-value backend.
//!
//! [`page_table::PageTable`] translates arbitrary byte ranges into
//! whole-page operations against a [`backend::Backend`], cached
//! write-back behind an LRU discipline. [`driver::Driver`] adapts a
//! backend and page table into a synchronous open/close/read/write
//! contract for a host block-device consumer. The `s3` backend signs
//! its own requests via [`sigv4::Notary`] rather than depending on a
//! full AWS SDK.

pub mod backend;
pub mod config;
pub mod driver;
pub mod error;
pub mod hash;
pub mod metrics;
pub mod page_table;
pub mod sigv4;
pub mod transport;

#[cfg(feature = "test-util")]
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}
