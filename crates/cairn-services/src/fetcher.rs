//! Remote fetcher — pulls dependency keys from peer workers.
//!
//! For every key that is not already in the local store, a `getitem` goes to
//! the first candidate peer from a short-lived endpoint of its own, and the
//! caller waits for the answer. Keys are fetched concurrently. Values that
//! arrive are merged into the store in one batch; a key whose fetch failed is
//! never written.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde_json::Value;

use cairn_core::codec::CodecError;
use cairn_core::message::{ErrorKind, GetitemReply, GetitemRequest, Locations, RemoteError};
use cairn_core::wire::{Address, Function, Header};

use crate::data_store::DataStore;
use crate::transport::{Transport, TransportError};

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("no candidate peers for {key}")]
    NoCandidates { key: String },

    #[error("{peer} answered {key} with an error: {error}")]
    Remote {
        key: String,
        peer: Address,
        error: RemoteError,
    },

    #[error("failed to reach {peer} for {key}: {source}")]
    Transport {
        key: String,
        peer: Address,
        #[source]
        source: TransportError,
    },

    #[error("malformed reply from {peer} for {key}: {source}")]
    Codec {
        key: String,
        peer: Address,
        #[source]
        source: CodecError,
    },

    #[error("{peer} did not answer for {key} within {timeout:?}")]
    TimedOut {
        key: String,
        peer: Address,
        timeout: Duration,
    },
}

impl FetchError {
    pub fn key(&self) -> &str {
        match self {
            FetchError::NoCandidates { key }
            | FetchError::Remote { key, .. }
            | FetchError::Transport { key, .. }
            | FetchError::Codec { key, .. }
            | FetchError::TimedOut { key, .. } => key,
        }
    }

    /// The error a compute reply should carry: the peer's own error when it
    /// sent one, a `fetch_failed` description otherwise.
    pub fn into_remote(self) -> RemoteError {
        match self {
            FetchError::Remote { error, .. } => error,
            other => RemoteError::new(ErrorKind::FetchFailed, other.to_string()),
        }
    }
}

#[derive(Clone)]
pub struct RemoteFetcher {
    transport: Arc<dyn Transport>,
    store: DataStore,
    timeout: Option<Duration>,
    next_jobid: Arc<AtomicU64>,
}

impl RemoteFetcher {
    /// `timeout` bounds each peer request; `None` waits indefinitely.
    pub fn new(transport: Arc<dyn Transport>, store: DataStore, timeout: Option<Duration>) -> Self {
        Self {
            transport,
            store,
            timeout,
            next_jobid: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Fetch every key in `locations` that is not stored locally.
    ///
    /// Returns how many keys were fetched. On failure, keys that did arrive
    /// are still merged and the first failure is returned.
    pub async fn collect(&self, locations: &Locations) -> Result<usize, FetchError> {
        let missing = self.store.missing(locations.keys().map(String::as_str));
        if missing.is_empty() {
            return Ok(0);
        }

        let fetches = missing.iter().map(|key| {
            let candidates = locations.get(*key).map(Vec::as_slice).unwrap_or_default();
            self.fetch_one(key, candidates)
        });
        let results = join_all(fetches).await;

        let mut fetched = Vec::with_capacity(results.len());
        let mut first_error = None;
        for result in results {
            match result {
                Ok(pair) => fetched.push(pair),
                Err(e) => {
                    tracing::warn!(key = e.key(), error = %e, "remote fetch failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        let count = fetched.len();
        self.store.merge(fetched);
        tracing::debug!(fetched = count, requested = missing.len(), "collect finished");

        match first_error {
            Some(e) => Err(e),
            None => Ok(count),
        }
    }

    async fn fetch_one(&self, key: &str, candidates: &[Address]) -> Result<(String, Value), FetchError> {
        let peer = candidates.first().ok_or_else(|| FetchError::NoCandidates {
            key: key.to_string(),
        })?;
        let transport_err = |source| FetchError::Transport {
            key: key.to_string(),
            peer: peer.clone(),
            source,
        };
        let codec_err = |source| FetchError::Codec {
            key: key.to_string(),
            peer: peer.clone(),
            source,
        };

        let mut endpoint = self.transport.bind().await.map_err(transport_err)?;
        let jobid = self.next_jobid.fetch_add(1, Ordering::Relaxed);
        let header = Header::new(Function::Getitem)
            .with_jobid(Some(jobid))
            .with_address(endpoint.address().clone());
        let request = GetitemRequest {
            key: key.to_string(),
            queue: Value::String(key.to_string()),
        };
        let header_bytes = header.encode().map_err(codec_err)?;
        let payload = header.payload_codec().encode(&request).map_err(codec_err)?;

        tracing::trace!(%key, %peer, jobid, "requesting remote key");
        endpoint
            .send(peer, header_bytes, payload)
            .await
            .map_err(transport_err)?;

        let frame = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, endpoint.recv())
                .await
                .map_err(|_| FetchError::TimedOut {
                    key: key.to_string(),
                    peer: peer.clone(),
                    timeout,
                })?,
            None => endpoint.recv().await,
        }
        .map_err(transport_err)?;

        let reply_header = Header::decode(&frame.header).map_err(codec_err)?;
        let codec = reply_header.payload_codec();
        let remote = |error| FetchError::Remote {
            key: key.to_string(),
            peer: peer.clone(),
            error,
        };

        if reply_header.function == Function::Error {
            let error: RemoteError = codec.decode(&frame.payload).map_err(codec_err)?;
            return Err(remote(error));
        }

        let reply: GetitemReply = codec.decode(&frame.payload).map_err(codec_err)?;
        match reply.value {
            Ok(value) if reply_header.status.is_ok() => Ok((key.to_string(), value)),
            Ok(_) => Err(remote(RemoteError::new(
                ErrorKind::FetchFailed,
                "peer flagged the reply as failed",
            ))),
            Err(error) => Err(remote(error)),
        }
    }
}
