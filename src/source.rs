use std::collections::HashMap;
use std::fs;
use std::io::{self, Read};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use flate2::read::GzDecoder;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use tracing::debug;

use crate::error::FeatureError;

/// Fetches the raw bytes of a dataset resource by its relative key, e.g. `genes/Shh.bin`.
pub trait ByteSource: Send + Sync {
    fn fetch(&self, key: &str) -> Result<Vec<u8>, FeatureError>;
}

impl<T: ByteSource + ?Sized> ByteSource for &T {
    fn fetch(&self, key: &str) -> Result<Vec<u8>, FeatureError> {
        (**self).fetch(key)
    }
}

impl<T: ByteSource + ?Sized> ByteSource for Arc<T> {
    fn fetch(&self, key: &str) -> Result<Vec<u8>, FeatureError> {
        (**self).fetch(key)
    }
}

impl<T: ByteSource + ?Sized> ByteSource for Box<T> {
    fn fetch(&self, key: &str) -> Result<Vec<u8>, FeatureError> {
        (**self).fetch(key)
    }
}

/// Dataset directory on the local filesystem. A missing `<key>` is served from a gzip
/// sibling `<key>.gz` when one exists.
#[derive(Debug, Clone)]
pub struct FsByteSource {
    root: Utf8PathBuf,
}

impl FsByteSource {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn path_for(&self, key: &str) -> Utf8PathBuf {
        self.root.join(key.trim_start_matches('/'))
    }
}

impl ByteSource for FsByteSource {
    fn fetch(&self, key: &str) -> Result<Vec<u8>, FeatureError> {
        if key.split('/').any(|part| part == "..") {
            return Err(FeatureError::fetch(key, "path traversal in resource key"));
        }
        let path = self.path_for(key);
        match fs::read(path.as_std_path()) {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                let gz_path = Utf8PathBuf::from(format!("{path}.gz"));
                if !gz_path.as_std_path().exists() {
                    return Err(FeatureError::fetch(key, format!("{path}: {err}")));
                }
                debug!(%gz_path, "reading gzip sibling");
                read_gzip(gz_path.as_std_path()).map_err(|err| FeatureError::fetch(key, err))
            }
            Err(err) => Err(FeatureError::fetch(key, format!("{path}: {err}"))),
        }
    }
}

fn read_gzip(path: &std::path::Path) -> io::Result<Vec<u8>> {
    let file = fs::File::open(path)?;
    let mut decoder = GzDecoder::new(file);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

/// Dataset published over HTTP under `base_url`.
#[derive(Clone)]
pub struct HttpByteSource {
    client: Client,
    base_url: String,
}

impl HttpByteSource {
    pub fn new(base_url: impl Into<String>) -> Result<Self, FeatureError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            client_header(&format!("kira-sf/{}", env!("CARGO_PKG_VERSION")))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| FeatureError::fetch("<client>", err))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn url_for(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, key.trim_start_matches('/'))
    }

    fn send_with_retries(
        &self,
        key: &str,
        url: &str,
    ) -> Result<reqwest::blocking::Response, FeatureError> {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            match self.client.get(url).send() {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(FeatureError::fetch(key, err));
                }
            }
        }
    }
}

impl ByteSource for HttpByteSource {
    fn fetch(&self, key: &str) -> Result<Vec<u8>, FeatureError> {
        let url = self.url_for(key);
        let response = self.send_with_retries(key, &url)?;
        if !response.status().is_success() {
            return Err(FeatureError::FetchStatus {
                key: key.to_string(),
                status: response.status().as_u16(),
            });
        }
        let bytes = response
            .bytes()
            .map_err(|err| FeatureError::fetch(key, err))?;
        Ok(bytes.to_vec())
    }
}

fn client_header(value: &str) -> Result<HeaderValue, FeatureError> {
    HeaderValue::from_str(value).map_err(|err| FeatureError::fetch("<client>", err))
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

/// In-memory dataset, keyed exactly like the on-disk layout.
#[derive(Debug, Clone, Default)]
pub struct MemoryByteSource {
    entries: HashMap<String, Arc<[u8]>>,
}

impl MemoryByteSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        let bytes: Vec<u8> = bytes.into();
        self.entries.insert(key.into(), Arc::from(bytes));
    }

    pub fn with(mut self, key: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.insert(key, bytes);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ByteSource for MemoryByteSource {
    fn fetch(&self, key: &str) -> Result<Vec<u8>, FeatureError> {
        self.entries
            .get(key)
            .map(|bytes| bytes.to_vec())
            .ok_or_else(|| FeatureError::fetch(key, "resource not found"))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use assert_matches::assert_matches;
    use flate2::Compression;
    use flate2::write::GzEncoder;

    use super::*;

    fn temp_root() -> (tempfile::TempDir, FsByteSource) {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        (temp, FsByteSource::new(root))
    }

    #[test]
    fn fs_source_reads_plain_and_gzip() {
        let (_temp, source) = temp_root();
        fs::create_dir_all(source.root().join("genes").as_std_path()).unwrap();
        fs::write(source.path_for("genes/Shh.bin").as_std_path(), b"plain").unwrap();

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"packed").unwrap();
        let gz = encoder.finish().unwrap();
        fs::write(source.path_for("genes/Pax9.bin.gz").as_std_path(), gz).unwrap();

        assert_eq!(source.fetch("genes/Shh.bin").unwrap(), b"plain");
        assert_eq!(source.fetch("genes/Pax9.bin").unwrap(), b"packed");
    }

    #[test]
    fn fs_source_missing_file_is_fetch_failure() {
        let (_temp, source) = temp_root();
        let err = source.fetch("genes/Absent.bin").unwrap_err();
        assert_matches!(err, FeatureError::FetchFailed { .. });
        let err = source.fetch("../etc/passwd").unwrap_err();
        assert_matches!(err, FeatureError::FetchFailed { .. });
    }

    #[test]
    fn http_urls_join_base_and_key() {
        let source = HttpByteSource::new("https://example.org/data/binary/").unwrap();
        assert_eq!(
            source.url_for("tfs/Foxa1_direct.bin"),
            "https://example.org/data/binary/tfs/Foxa1_direct.bin"
        );
    }

    #[test]
    fn invalid_client_header_is_fetch_failure() {
        let err = client_header("kira-sf/\n1.0").unwrap_err();
        assert_matches!(err, FeatureError::FetchFailed { ref key, .. } if key == "<client>");
        assert!(client_header("kira-sf/0.1.0").is_ok());
    }

    #[test]
    fn memory_source_lookup() {
        let source = MemoryByteSource::new().with("metadata.json", b"{}".to_vec());
        assert_eq!(source.fetch("metadata.json").unwrap(), b"{}");
        assert!(source.fetch("genes/X.bin").unwrap_err().is_fetch_failure());
    }
}
