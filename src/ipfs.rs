//! Off-ledger metadata storage.
//!
//! Records carry a full gateway URL (`{base}/{contentId}`); the store itself
//! only deals in content ids. Extracting the id from a URL is pure string work.

use std::collections::HashMap;
use std::io::Cursor;

use async_trait::async_trait;
use futures::TryStreamExt;
use ipfs_api_backend_hyper::{IpfsApi, IpfsClient, TryFromUri};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::BlobError;

/// Descriptive data sent alongside a put.
#[derive(Debug, Clone, Default)]
pub struct ContentMetadata {
    pub name: String,
    pub content_type: Option<String>,
}

impl ContentMetadata {
    pub fn json(name: impl Into<String>) -> Self {
        ContentMetadata {
            name: name.into(),
            content_type: Some("application/json".to_string()),
        }
    }
}

/// Content-addressed blob storage.
///
/// Futures are not required to be `Send` because the IPFS HTTP client's are not.
#[async_trait(?Send)]
pub trait BlobStore: Send + Sync {
    async fn put(&self, bytes: Vec<u8>, meta: &ContentMetadata) -> Result<String, BlobError>;

    async fn get(&self, content_id: &str) -> Result<Vec<u8>, BlobError>;
}

/// Blob store backed by an IPFS node's HTTP API.
#[derive(Clone)]
pub struct IpfsBlobStore {
    client: IpfsClient,
}

impl IpfsBlobStore {
    pub fn new(api_url: &str) -> Result<Self, BlobError> {
        let client = IpfsClient::from_str(api_url)
            .map_err(|e| BlobError::Transport(format!("invalid IPFS API url {api_url}: {e}")))?;
        Ok(IpfsBlobStore { client })
    }
}

#[async_trait(?Send)]
impl BlobStore for IpfsBlobStore {
    async fn put(&self, bytes: Vec<u8>, meta: &ContentMetadata) -> Result<String, BlobError> {
        let size = bytes.len();
        let res = self
            .client
            .add(Cursor::new(bytes))
            .await
            .map_err(|e| BlobError::Transport(format!("{e:?}")))?;
        debug!(name = %meta.name, size, cid = %res.hash, "pinned blob");
        Ok(res.hash)
    }

    async fn get(&self, content_id: &str) -> Result<Vec<u8>, BlobError> {
        self.client
            .cat(content_id)
            .map_ok(|chunk| chunk.to_vec())
            .try_concat()
            .await
            .map_err(|e| BlobError::Transport(format!("{content_id}: {e:?}")))
    }
}

/// In-process blob store keyed by the SHA-256 of the content.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blobs.read().await.is_empty()
    }
}

#[async_trait(?Send)]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, bytes: Vec<u8>, _meta: &ContentMetadata) -> Result<String, BlobError> {
        let cid = format!("{:x}", Sha256::digest(&bytes));
        self.blobs.write().await.insert(cid.clone(), bytes);
        Ok(cid)
    }

    async fn get(&self, content_id: &str) -> Result<Vec<u8>, BlobError> {
        self.blobs
            .read()
            .await
            .get(content_id)
            .cloned()
            .ok_or_else(|| BlobError::Missing(content_id.to_string()))
    }
}

/// `{base}/{contentId}`.
pub fn gateway_url(base: &str, content_id: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), content_id)
}

/// Pulls the content id out of a metadata reference.
///
/// Accepts a URL under `base`, an `ipfs://` URI, any URL with an `/ipfs/`
/// path segment, or a bare id.
pub fn content_id_from_ref(base: &str, reference: &str) -> Option<String> {
    let reference = reference.trim();
    let base = base.trim_end_matches('/');
    let rest = if let Some(rest) = reference
        .strip_prefix(base)
        .filter(|_| !base.is_empty())
        .and_then(|r| r.strip_prefix('/'))
    {
        rest
    } else if let Some(rest) = reference.strip_prefix("ipfs://") {
        rest
    } else if let Some(idx) = reference.rfind("/ipfs/") {
        &reference[idx + "/ipfs/".len()..]
    } else if reference.contains("://") {
        return None;
    } else {
        reference
    };
    let id = rest
        .split(|c| c == '?' || c == '#')
        .next()
        .unwrap_or_default()
        .trim_matches('/');
    (!id.is_empty()).then(|| id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://gateway.pinata.cloud/ipfs";

    #[test]
    fn id_extraction() {
        assert_eq!(
            content_id_from_ref(BASE, "https://gateway.pinata.cloud/ipfs/QmAbc").as_deref(),
            Some("QmAbc")
        );
        assert_eq!(content_id_from_ref(BASE, "ipfs://QmAbc").as_deref(), Some("QmAbc"));
        assert_eq!(
            content_id_from_ref(BASE, "https://ipfs.io/ipfs/QmAbc?filename=x.json").as_deref(),
            Some("QmAbc")
        );
        assert_eq!(content_id_from_ref(BASE, "QmAbc").as_deref(), Some("QmAbc"));
        assert_eq!(content_id_from_ref(BASE, ""), None);
        assert_eq!(content_id_from_ref(BASE, "https://example.com/logo.png"), None);
        assert_eq!(content_id_from_ref(BASE, "https://gateway.pinata.cloud/ipfs/"), None);
    }

    #[test]
    fn url_joins_without_double_slash() {
        assert_eq!(gateway_url("http://x/ipfs/", "Qm1"), "http://x/ipfs/Qm1");
        let url = gateway_url(BASE, "Qm1");
        assert_eq!(content_id_from_ref(BASE, &url).as_deref(), Some("Qm1"));
    }

    #[tokio::test]
    async fn memory_store_is_content_addressed() {
        let store = MemoryBlobStore::new();
        let a = store.put(b"{}".to_vec(), &ContentMetadata::json("a")).await.unwrap();
        let b = store.put(b"{}".to_vec(), &ContentMetadata::json("b")).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(store.len().await, 1);
        assert_eq!(store.get(&a).await.unwrap(), b"{}");
        assert!(matches!(store.get("nope").await, Err(BlobError::Missing(_))));
    }
}
