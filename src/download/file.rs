use std::path::PathBuf;

use futures::{future::BoxFuture, FutureExt, StreamExt, TryStreamExt};
use tokio_util::{io::ReaderStream, sync::CancellationToken};

use super::{
    AssetId, FetchResponse, ResolveError, SignedUrl, Transport, TransportError, UrlResolver,
};

/// Reads "downloads" from the local file system. The URL is a file path.
#[derive(Clone, Default)]
pub struct FileTransport;

impl Transport for FileTransport {
    fn fetch_stream<'a>(
        &'a self,
        url: &'a str,
        _cancellation: CancellationToken,
    ) -> BoxFuture<'a, Result<FetchResponse, TransportError>> {
        async move {
            let file = tokio::fs::File::open(url).await?;
            let length = file.metadata().await?.len();

            Ok(FetchResponse {
                content_length: Some(length),
                content_type: None,
                body: ReaderStream::new(file).map_err(TransportError::from).boxed(),
            })
        }
        .boxed()
    }
}

/// Treats every asset id as a path below `root`.
pub struct DirectoryResolver {
    pub root: PathBuf,
}

impl UrlResolver for DirectoryResolver {
    fn resolve_download_url<'a>(
        &'a self,
        asset_id: &'a AssetId,
    ) -> BoxFuture<'a, Result<SignedUrl, ResolveError>> {
        async move {
            let path = self.root.join(asset_id.as_str());
            if !path.is_file() {
                return Err(ResolveError::NotFound(asset_id.clone()));
            }
            Ok(SignedUrl(path.to_string_lossy().into_owned()))
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use uuid::Uuid;

    use super::*;

    fn scratch_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("asset-preview-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn missing_files_are_not_found() {
        let resolver = DirectoryResolver {
            root: scratch_dir(),
        };

        let result = resolver
            .resolve_download_url(&AssetId::from("missing.zip"))
            .await;

        assert!(matches!(result, Err(ResolveError::NotFound(_))));
    }

    #[tokio::test]
    async fn directories_are_not_files() {
        let root = scratch_dir();
        std::fs::create_dir(root.join("nested")).unwrap();
        let resolver = DirectoryResolver { root };

        let result = resolver.resolve_download_url(&AssetId::from("nested")).await;

        assert!(matches!(result, Err(ResolveError::NotFound(_))));
    }

    #[tokio::test]
    async fn opening_a_missing_file_is_an_io_error() {
        let path = scratch_dir().join("missing.zip");

        let result = FileTransport
            .fetch_stream(&path.to_string_lossy(), CancellationToken::new())
            .await;

        let Err(TransportError::Io(error)) = result else {
            panic!("expected an io error");
        };
        assert_eq!(error.kind(), std::io::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn resolved_files_stream_their_bytes() {
        let root = scratch_dir();
        std::fs::write(root.join("notes.obj"), b"v 0 0 0\n").unwrap();
        let resolver = DirectoryResolver { root };

        let url = resolver
            .resolve_download_url(&AssetId::from("notes.obj"))
            .await
            .unwrap();
        let response = FileTransport
            .fetch_stream(url.as_str(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(response.content_length, Some(8));
        let chunks: Vec<Bytes> = response.body.try_collect().await.unwrap();
        assert_eq!(chunks.concat(), b"v 0 0 0\n");
    }
}
