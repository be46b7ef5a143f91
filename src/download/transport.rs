use std::{collections::HashMap, fmt};

use bytes::Bytes;
use futures::{future::BoxFuture, stream::BoxStream, FutureExt, StreamExt};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Identifier of an asset in the portal's asset service.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AssetId(String);

impl AssetId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for AssetId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for AssetId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A time-limited download URL handed out by the asset service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignedUrl(pub String);

impl SignedUrl {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server answered with status {0}")]
    Status(u16),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Asset URL not found for '{0}'")]
    NotFound(AssetId),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

pub type ByteStream = BoxStream<'static, Result<Bytes, TransportError>>;

/// An open response whose body has not been read yet.
pub struct FetchResponse {
    pub content_length: Option<u64>,
    pub content_type: Option<String>,
    pub body: ByteStream,
}

/// The host's streaming fetch primitive.
/// Dropping the returned body must abort the transfer.
pub trait Transport: Send + Sync {
    fn fetch_stream<'a>(
        &'a self,
        url: &'a str,
        cancellation: CancellationToken,
    ) -> BoxFuture<'a, Result<FetchResponse, TransportError>>;
}

/// Turns an asset id into a URL the transport can fetch.
pub trait UrlResolver: Send + Sync {
    fn resolve_download_url<'a>(
        &'a self,
        asset_id: &'a AssetId,
    ) -> BoxFuture<'a, Result<SignedUrl, ResolveError>>;
}

/// Serves bodies that are already in memory, split into fixed-size chunks.
#[derive(Default)]
pub struct MemoryTransport {
    bodies: HashMap<String, MemoryBody>,
    chunk_size: usize,
}

struct MemoryBody {
    bytes: Bytes,
    content_type: Option<String>,
    report_length: bool,
}

impl MemoryTransport {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            bodies: HashMap::new(),
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn insert(&mut self, url: impl Into<String>, bytes: impl Into<Bytes>, content_type: Option<&str>) {
        self.bodies.insert(
            url.into(),
            MemoryBody {
                bytes: bytes.into(),
                content_type: content_type.map(str::to_owned),
                report_length: true,
            },
        );
    }

    /// Like [`MemoryTransport::insert`], but without a content-length header.
    pub fn insert_without_length(&mut self, url: impl Into<String>, bytes: impl Into<Bytes>) {
        self.bodies.insert(
            url.into(),
            MemoryBody {
                bytes: bytes.into(),
                content_type: None,
                report_length: false,
            },
        );
    }
}

impl Transport for MemoryTransport {
    fn fetch_stream<'a>(
        &'a self,
        url: &'a str,
        _cancellation: CancellationToken,
    ) -> BoxFuture<'a, Result<FetchResponse, TransportError>> {
        async move {
            let body = self.bodies.get(url).ok_or(TransportError::Status(404))?;
            let chunks: Vec<Result<Bytes, TransportError>> = (0..body.bytes.len())
                .step_by(self.chunk_size)
                .map(|start| {
                    let end = (start + self.chunk_size).min(body.bytes.len());
                    Ok(body.bytes.slice(start..end))
                })
                .collect();

            Ok(FetchResponse {
                content_length: body.report_length.then_some(body.bytes.len() as u64),
                content_type: body.content_type.clone(),
                body: futures::stream::iter(chunks).boxed(),
            })
        }
        .boxed()
    }
}
