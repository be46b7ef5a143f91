use futures::{future::BoxFuture, FutureExt, StreamExt, TryStreamExt};
use reqwest::{header, StatusCode};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use super::{
    AssetId, FetchResponse, ResolveError, SignedUrl, Transport, TransportError, UrlResolver,
};

/// Streams response bodies with reqwest.
#[derive(Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Transport for HttpTransport {
    fn fetch_stream<'a>(
        &'a self,
        url: &'a str,
        _cancellation: CancellationToken,
    ) -> BoxFuture<'a, Result<FetchResponse, TransportError>> {
        async move {
            let response = self.client.get(url).send().await?;
            check_status(response.status())?;

            let content_type = response
                .headers()
                .get(header::CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .map(str::to_owned);

            Ok(FetchResponse {
                content_length: response.content_length(),
                content_type,
                body: response.bytes_stream().map_err(TransportError::from).boxed(),
            })
        }
        .boxed()
    }
}

#[derive(Deserialize)]
struct DownloadResponse {
    url: Option<String>,
}

/// Resolves signed download URLs through the portal's `/asset/download` endpoint.
pub struct HttpAssetService {
    client: reqwest::Client,
    base_url: String,
    bearer_token: Option<String>,
}

impl HttpAssetService {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, bearer_token: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            bearer_token,
        }
    }
}

impl UrlResolver for HttpAssetService {
    fn resolve_download_url<'a>(
        &'a self,
        asset_id: &'a AssetId,
    ) -> BoxFuture<'a, Result<SignedUrl, ResolveError>> {
        async move {
            let mut request = self
                .client
                .get(format!("{}/asset/download", self.base_url))
                .query(&[("id", asset_id.as_str())]);
            if let Some(token) = &self.bearer_token {
                request = request.bearer_auth(token);
            }

            let response = request.send().await.map_err(TransportError::from)?;
            check_resolve_status(response.status(), asset_id)?;

            let body: DownloadResponse = response.json().await.map_err(TransportError::from)?;
            signed_url(body, asset_id)
        }
        .boxed()
    }
}

fn check_status(status: StatusCode) -> Result<(), TransportError> {
    if status.is_success() {
        Ok(())
    } else {
        Err(TransportError::Status(status.as_u16()))
    }
}

/// A 404 from the download endpoint means the asset has no file.
fn check_resolve_status(status: StatusCode, asset_id: &AssetId) -> Result<(), ResolveError> {
    if status == StatusCode::NOT_FOUND {
        return Err(ResolveError::NotFound(asset_id.clone()));
    }
    Ok(check_status(status)?)
}

fn signed_url(body: DownloadResponse, asset_id: &AssetId) -> Result<SignedUrl, ResolveError> {
    match body.url {
        Some(url) if !url.is_empty() => Ok(SignedUrl(url)),
        _ => Err(ResolveError::NotFound(asset_id.clone())),
    }
}
