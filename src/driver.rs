//! Synchronous adapter binding a [`Backend`] + [`PageTable`] to whatever
//! open/close/read/write/flush/truncate/get_eoa/set_eoa/get_eof contract
//! a host block-device consumer exposes.
//!
//! The page table and backend are written `async` (matching this
//! codebase's usual stack: `async-trait`, `reqwest`), but the host
//! callback contract is synchronous — one blocking call per operation,
//! never concurrent. [`Driver`] owns a single-threaded Tokio runtime and
//! bridges every call through `block_on`, so nothing above this layer
//! ever sees an `.await`.

use tracing::instrument;

use crate::backend::{Backend, FilesystemBackend, S3Backend};
use crate::config::{BackendConfig, DriverConfig};
use crate::error::Error;
use crate::page_table::PageTable;

/// An open file: owns the page table and the end-of-allocated-address
/// the host has requested.
pub struct Driver<B: Backend> {
    table: PageTable<B>,
    eoa: u64,
    rt: tokio::runtime::Runtime,
}

impl<B: Backend> Driver<B> {
    /// Bind an already-constructed backend to a fresh page table.
    pub fn new(backend: B, page_cache_size: usize) -> Result<Self, Error> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(|e| Error::Backend(crate::error::BackendError::Io(e)))?;
        Ok(Driver {
            table: PageTable::new(backend, page_cache_size),
            eoa: 0,
            rt,
        })
    }

    /// Get the end of allocated address.
    pub fn get_eoa(&self) -> u64 {
        self.eoa
    }

    /// Set the end of allocated address. This is how the host allocates
    /// and frees address space.
    pub fn set_eoa(&mut self, addr: u64) {
        self.eoa = addr;
    }

    /// `max(eoa, table.eof())` — the table's own notion of how much data
    /// the backend attests to holding can exceed `eoa` right after an
    /// open against an existing, larger file.
    pub fn get_eof(&self) -> u64 {
        self.eoa.max(self.table.eof())
    }

    #[instrument(skip(self, buf))]
    pub fn read(&mut self, addr: u64, buf: &mut [u8]) -> Result<(), Error> {
        let table = &mut self.table;
        self.rt.block_on(table.read(addr, buf))?;
        Ok(())
    }

    #[instrument(skip(self, data))]
    pub fn write(&mut self, addr: u64, data: &[u8]) -> Result<(), Error> {
        let table = &mut self.table;
        self.rt.block_on(table.write(addr, data))?;
        Ok(())
    }

    /// Flush every dirty page and the backend's own metadata. Must be
    /// called explicitly before the driver is dropped — there is no
    /// flush-on-drop anywhere in this crate.
    #[instrument(skip(self))]
    pub fn flush(&mut self) -> Result<(), Error> {
        let table = &mut self.table;
        self.rt.block_on(table.flush())?;
        Ok(())
    }

    /// Truncate the backing store to the current end of allocated
    /// address.
    #[instrument(skip(self))]
    pub fn truncate(&mut self) -> Result<(), Error> {
        let eoa = self.eoa;
        let table = &mut self.table;
        self.rt.block_on(table.truncate(eoa))?;
        Ok(())
    }

    /// Flush and release this driver's resources. Prefer this over a
    /// bare drop: dropping without calling `close` silently discards any
    /// unflushed writes.
    pub fn close(mut self) -> Result<(), Error> {
        self.flush()
    }
}

/// Construct a [`Driver`] from a [`DriverConfig`], dispatching to the
/// filesystem or S3 backend it names and boxing it so callers don't
/// need to know which at compile time.
pub fn open(cfg: DriverConfig) -> Result<Driver<Box<dyn Backend>>, Error> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .map_err(|e| Error::Backend(crate::error::BackendError::Io(e)))?;

    let page_size = cfg.page_size;
    let backend: Box<dyn Backend> = rt.block_on(async move {
        match cfg.backend {
            BackendConfig::Filesystem { root } => {
                Ok(Box::new(FilesystemBackend::from_params(root, page_size).await?)
                    as Box<dyn Backend>)
            }
            BackendConfig::S3 {
                uri,
                access_key,
                secret_key,
                region,
                host,
                use_tls,
            } => Ok(Box::new(
                S3Backend::from_params(
                    &uri,
                    page_size,
                    access_key,
                    secret_key,
                    Some(region),
                    host,
                    use_tls,
                )
                .await?,
            ) as Box<dyn Backend>),
        }
    })
    .map_err(|e: crate::error::BackendError| Error::Backend(e))?;

    Ok(Driver {
        table: PageTable::new(backend, cfg.page_cache_size),
        eoa: 0,
        rt,
    })
}
