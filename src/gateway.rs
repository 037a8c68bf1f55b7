use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use crate::config::DEFAULT_IPFS_GATEWAY;
use crate::error::{GatewayError, GatewayResult};
use crate::ipfs::BlobStore;
use crate::ledger::Ledger;
use crate::models::{FromRaw, decode_list};

#[derive(Debug, Clone)]
pub struct GatewaySettings {
    /// Base of `{base}/{contentId}` metadata URLs.
    pub metadata_base: String,
    pub confirmation_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        GatewaySettings {
            metadata_base: DEFAULT_IPFS_GATEWAY.to_string(),
            confirmation_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_millis(500),
        }
    }
}

/// Stateless mediator between callers, the ledger and the blob store.
///
/// Cloning is cheap; every call re-reads from the ledger.
#[derive(Clone)]
pub struct Gateway {
    pub(crate) ledger: Arc<dyn Ledger>,
    pub(crate) blobs: Arc<dyn BlobStore>,
    pub(crate) settings: GatewaySettings,
}

impl Gateway {
    pub fn new(ledger: Arc<dyn Ledger>, blobs: Arc<dyn BlobStore>, settings: GatewaySettings) -> Self {
        Gateway {
            ledger,
            blobs,
            settings,
        }
    }

    pub fn settings(&self) -> &GatewaySettings {
        &self.settings
    }

    pub(crate) async fn read_raw(&self, operation: &'static str, args: Vec<Value>) -> GatewayResult<Value> {
        debug!(operation, "ledger read");
        self.ledger
            .read(operation, args)
            .await
            .map_err(|source| GatewayError::read(operation, source))
    }

    /// A `null` result or a zeroed struct is an absent record, not an error.
    pub(crate) async fn read_record<T: FromRaw>(
        &self,
        operation: &'static str,
        args: Vec<Value>,
    ) -> GatewayResult<Option<T>> {
        let raw = self.read_raw(operation, args).await?;
        if raw.is_null() {
            return Ok(None);
        }
        let record = T::from_raw(&raw).map_err(|detail| GatewayError::decode(operation, detail))?;
        Ok(Some(record).filter(|r| !r.is_absent()))
    }

    pub(crate) async fn read_list<T: FromRaw>(
        &self,
        operation: &'static str,
        args: Vec<Value>,
    ) -> GatewayResult<Vec<T>> {
        let raw = self.read_raw(operation, args).await?;
        decode_list(&raw).map_err(|detail| GatewayError::decode(operation, detail))
    }
}
