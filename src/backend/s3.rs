//! S3-object key-value backend: each page is an object
//! `<path>/<decimal id>`, metadata lives at `<path>/.meta`. Requests are
//! signed with a fresh [`Notary`] per call (the notary's timestamp is
//! fixed at its own construction; this backend simply constructs one
//! whenever it needs a current timestamp).

use std::collections::HashSet;

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, instrument};

use crate::backend::{parse_metadata, serialize_metadata, Backend, Metadata, PageId};
use crate::error::{BackendError, TransportError};
use crate::hash::{empty_payload_hash, sha256_hex};
use crate::sigv4::{uri_encode, Notary};
use crate::transport::HttpSession;

const DEFAULT_PAGE_SIZE: u64 = 2 * 1024 * 1024;
const META_KEY: &str = ".meta";

pub struct S3Backend {
    transport: HttpSession,
    access_key: String,
    secret_key: String,
    region: String,
    host_override: Option<String>,
    use_tls: bool,
    bucket: String,
    path: String,
    page_size: u64,
    max_page: Option<PageId>,
    invalid_pages: HashSet<PageId>,
}

impl S3Backend {
    /// Parse `s3://bucket/path` and open (or initialize) the backend.
    #[allow(clippy::too_many_arguments)]
    #[instrument(skip(access_key, secret_key))]
    pub async fn from_params(
        uri: &str,
        requested_page_size: u64,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
        region: Option<String>,
        host: Option<String>,
        use_tls: bool,
    ) -> Result<Self, BackendError> {
        let (bucket, path) = parse_uri(uri)?;
        let access_key = access_key.into();
        let secret_key = secret_key.into();
        if access_key.is_empty() {
            return Err(BackendError::MissingCredential("access_key"));
        }
        if secret_key.is_empty() {
            return Err(BackendError::MissingCredential("secret_key"));
        }
        let region = region.unwrap_or_else(|| "us-east-1".to_string());

        let transport = HttpSession::new().map_err(BackendError::Transport)?;

        let mut backend = S3Backend {
            transport,
            access_key,
            secret_key,
            region,
            host_override: host,
            use_tls,
            bucket,
            path,
            page_size: 0,
            max_page: None,
            invalid_pages: HashSet::new(),
        };

        match backend.get_object(META_KEY).await? {
            Some(text) => {
                let meta = parse_metadata(&text)?;
                if requested_page_size != 0 && requested_page_size != meta.page_size {
                    return Err(BackendError::PageSizeMismatch {
                        existing: meta.page_size,
                        requested: requested_page_size,
                    });
                }
                debug!(page_size = meta.page_size, "opened existing s3 backend");
                backend.page_size = meta.page_size;
                backend.max_page = if meta.allocated_pages == 0 {
                    None
                } else {
                    Some(meta.allocated_pages - 1)
                };
                backend.invalid_pages = meta.invalid_pages;
            }
            None => {
                backend.page_size = if requested_page_size == 0 {
                    DEFAULT_PAGE_SIZE
                } else {
                    requested_page_size
                };
                debug!(page_size = backend.page_size, "initialized new s3 backend");
            }
        }

        Ok(backend)
    }

    fn scheme(&self) -> &'static str {
        if self.use_tls {
            "https"
        } else {
            "http"
        }
    }

    /// `(url, canonical_path, host_header)` for the object named `key`
    /// under this backend's path.
    fn request_target(&self, key: &str) -> (String, String, String) {
        let full_key = format!("{}/{}", self.path, key);
        match &self.host_override {
            Some(host) => {
                let canonical_path = format!("/{}/{}", self.bucket, full_key);
                let url = format!("{}://{}{}", self.scheme(), host, canonical_path);
                (url, canonical_path, host.clone())
            }
            None => {
                let host_header = format!("{}.s3.amazonaws.com", self.bucket);
                let canonical_path = format!("/{full_key}");
                let url = format!("{}://{}{}", self.scheme(), host_header, canonical_path);
                (url, canonical_path, host_header)
            }
        }
    }

    fn notary(&self) -> Notary {
        Notary::new(self.region.clone(), self.access_key.clone(), &self.secret_key)
    }

    /// GET `key`, returning `None` for a 404 (translated to zero-fill by
    /// callers) and propagating any other failure. Used only for the
    /// `.meta` text blob — page bodies go through [`Self::get_object_into`]
    /// so a too-large response is rejected rather than silently truncated.
    ///
    /// The blocking transport call runs inside [`tokio::task::spawn_blocking`]
    /// so this `async fn` never parks the calling thread on network I/O.
    #[instrument(skip(self))]
    async fn get_object(&self, key: &str) -> Result<Option<String>, BackendError> {
        let (url, canonical_path, host_header) = self.request_target(key);
        let notary = self.notary();
        let payload_hash = empty_payload_hash();
        let timestamp = notary.timestamp().to_string();
        let auth = notary.authorization_header(
            "GET",
            &uri_encode(&canonical_path, true),
            &[],
            &[
                ("host", host_header.as_str()),
                ("x-amz-content-sha256", payload_hash.as_str()),
                ("x-amz-date", timestamp.as_str()),
            ],
            &payload_hash,
        );
        let transport = self.transport.clone();

        let result = tokio::task::spawn_blocking(move || {
            let send_headers = [
                ("host", host_header.as_str()),
                ("x-amz-content-sha256", payload_hash.as_str()),
                ("x-amz-date", timestamp.as_str()),
                ("authorization", auth.as_str()),
            ];
            transport.get(&url, &send_headers)
        })
        .await
        .expect("blocking task panicked");

        match result {
            Ok(body) => Ok(Some(body)),
            Err(TransportError::Http { code: 404, .. }) => Ok(None),
            Err(e) => Err(BackendError::Transport(e)),
        }
    }

    /// GET `key` directly into `out` (always exactly `page_size()` bytes):
    /// `false` for a 404 (translated to zero-fill by the caller), an
    /// `Err(BackendError::Transport(TransportError::BufferOverflow { .. }))`
    /// if the object is larger than a page, and `Ok(true)` on success with
    /// `out` fully overwritten (zero-padded past the object's length).
    #[instrument(skip(self, out))]
    async fn get_object_into(&self, key: &str, out: &mut [u8]) -> Result<bool, BackendError> {
        let (url, canonical_path, host_header) = self.request_target(key);
        let notary = self.notary();
        let payload_hash = empty_payload_hash();
        let timestamp = notary.timestamp().to_string();
        let auth = notary.authorization_header(
            "GET",
            &uri_encode(&canonical_path, true),
            &[],
            &[
                ("host", host_header.as_str()),
                ("x-amz-content-sha256", payload_hash.as_str()),
                ("x-amz-date", timestamp.as_str()),
            ],
            &payload_hash,
        );
        let transport = self.transport.clone();
        let page_size = out.len();

        let result = tokio::task::spawn_blocking(move || {
            let send_headers = [
                ("host", host_header.as_str()),
                ("x-amz-content-sha256", payload_hash.as_str()),
                ("x-amz-date", timestamp.as_str()),
                ("authorization", auth.as_str()),
            ];
            // Zero-initialized: get_into only writes the first `n` bytes
            // it actually receives, leaving the rest as the page's zero
            // padding past the object's length.
            let mut buf = vec![0u8; page_size];
            transport.get_into(&url, &send_headers, &mut buf)?;
            Ok::<Vec<u8>, TransportError>(buf)
        })
        .await
        .expect("blocking task panicked");

        match result {
            Ok(buf) => {
                out.copy_from_slice(&buf);
                Ok(true)
            }
            Err(TransportError::Http { code: 404, .. }) => Ok(false),
            Err(e) => Err(BackendError::Transport(e)),
        }
    }

    /// The blocking transport call runs inside `spawn_blocking`, same as
    /// [`Self::get_object`].
    #[instrument(skip(self, body))]
    async fn put_object(&self, key: &str, body: Vec<u8>) -> Result<(), BackendError> {
        let (url, canonical_path, host_header) = self.request_target(key);
        let notary = self.notary();
        let payload_hash = sha256_hex(&body);
        let timestamp = notary.timestamp().to_string();
        let auth = notary.authorization_header(
            "PUT",
            &uri_encode(&canonical_path, true),
            &[],
            &[
                ("host", host_header.as_str()),
                ("x-amz-content-sha256", payload_hash.as_str()),
                ("x-amz-date", timestamp.as_str()),
            ],
            &payload_hash,
        );
        let transport = self.transport.clone();

        tokio::task::spawn_blocking(move || {
            let send_headers = [
                ("host", host_header.as_str()),
                ("x-amz-content-sha256", payload_hash.as_str()),
                ("x-amz-date", timestamp.as_str()),
                ("authorization", auth.as_str()),
            ];
            transport.put(&url, &send_headers, body)
        })
        .await
        .expect("blocking task panicked")
        .map(|_| ())
        .map_err(BackendError::Transport)
    }

    fn metadata(&self) -> Metadata {
        Metadata {
            page_size: self.page_size,
            allocated_pages: self.max_page.map(|m| m + 1).unwrap_or(0),
            invalid_pages: self.invalid_pages.clone(),
        }
    }
}

fn parse_uri(uri: &str) -> Result<(String, String), BackendError> {
    let re = Regex::new(r"^s3://([^/]+)/(.+?)/*$").expect("static regex is valid");
    let caps = re.captures(uri).ok_or_else(|| BackendError::InvalidUri {
        uri: uri.to_string(),
        reason: "expected s3://<bucket>/<path>".to_string(),
    })?;
    Ok((caps[1].to_string(), caps[2].to_string()))
}

#[async_trait]
impl Backend for S3Backend {
    fn page_size(&self) -> u64 {
        self.page_size
    }

    fn max_page(&self) -> Option<PageId> {
        self.max_page
    }

    #[instrument(skip(self))]
    async fn set_max_page(&mut self, new_max: Option<PageId>) -> Result<(), BackendError> {
        if let Some(old_max) = self.max_page {
            let lower_bound = new_max.map(|m| m + 1).unwrap_or(0);
            for id in lower_bound..=old_max {
                self.invalid_pages.insert(id);
            }
        }
        self.max_page = new_max;
        Ok(())
    }

    #[instrument(skip(self, out))]
    async fn read(&self, id: PageId, out: &mut [u8]) -> Result<(), BackendError> {
        debug_assert_eq!(out.len() as u64, self.page_size);

        let beyond_max = self.max_page.map(|m| id > m).unwrap_or(true);
        if beyond_max || self.invalid_pages.contains(&id) {
            out.fill(0);
            return Ok(());
        }

        if !self.get_object_into(&id.to_string(), out).await? {
            out.fill(0);
        }
        Ok(())
    }

    #[instrument(skip(self, data))]
    async fn write(&mut self, id: PageId, data: &[u8]) -> Result<(), BackendError> {
        debug_assert_eq!(data.len() as u64, self.page_size);
        self.put_object(&id.to_string(), data.to_vec()).await?;
        self.max_page = Some(self.max_page.map(|m| m.max(id)).unwrap_or(id));
        self.invalid_pages.remove(&id);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn flush(&mut self) -> Result<(), BackendError> {
        let text = serialize_metadata(&self.metadata());
        self.put_object(META_KEY, text.into_bytes()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bucket_and_path() {
        let (bucket, path) = parse_uri("s3://my-bucket/a/b/").unwrap();
        assert_eq!(bucket, "my-bucket");
        assert_eq!(path, "a/b");
    }

    #[test]
    fn rejects_uri_without_path() {
        assert!(parse_uri("s3://my-bucket").is_err());
    }

    #[test]
    fn rejects_non_s3_uri() {
        assert!(parse_uri("http://my-bucket/path").is_err());
    }
}
