//! Blocking HTTP transport for the S3 backend.
//!
//! The page table's execution model is synchronous end to end (no
//! operation suspends or blocks cooperatively), so this session is built
//! on `reqwest`'s blocking client rather than the async default, with one
//! client reused across every request for connection pooling.

use crate::error::TransportError;

/// A reusable HTTP client for signed GET/PUT against an S3-compatible
/// endpoint. Cheap to clone: `reqwest::blocking::Client` is itself a
/// handle onto a shared connection pool.
#[derive(Clone)]
pub struct HttpSession {
    client: reqwest::blocking::Client,
}

impl HttpSession {
    pub fn new() -> Result<Self, TransportError> {
        let client = reqwest::blocking::Client::builder()
            .build()
            .map_err(TransportError::Network)?;
        Ok(HttpSession { client })
    }

    /// GET `url` with `headers`, collecting the full response body.
    pub fn get(&self, url: &str, headers: &[(&str, &str)]) -> Result<String, TransportError> {
        let response = self.send(self.client.get(url), headers)?;
        response.text().map_err(TransportError::Network)
    }

    /// GET `url` with `headers`, writing the response body into
    /// `out_buffer`. Fails with [`TransportError::BufferOverflow`] if the
    /// response is larger than the buffer.
    pub fn get_into(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        out_buffer: &mut [u8],
    ) -> Result<usize, TransportError> {
        let response = self.send(self.client.get(url), headers)?;
        let bytes = response.bytes().map_err(TransportError::Network)?;
        if bytes.len() > out_buffer.len() {
            return Err(TransportError::BufferOverflow {
                actual: bytes.len(),
                capacity: out_buffer.len(),
            });
        }
        out_buffer[..bytes.len()].copy_from_slice(&bytes);
        Ok(bytes.len())
    }

    /// PUT `body` (exact length) to `url` with `headers`, returning the
    /// response body.
    pub fn put(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        body: Vec<u8>,
    ) -> Result<String, TransportError> {
        let response = self.send(self.client.put(url).body(body), headers)?;
        response.text().map_err(TransportError::Network)
    }

    fn send(
        &self,
        mut builder: reqwest::blocking::RequestBuilder,
        headers: &[(&str, &str)],
    ) -> Result<reqwest::blocking::Response, TransportError> {
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let response = builder.send().map_err(TransportError::Network)?;
        let status = response.status();
        if !status.is_success() {
            let code = status.as_u16();
            let body = response.text().unwrap_or_default();
            return Err(TransportError::Http { code, body });
        }
        Ok(response)
    }
}
