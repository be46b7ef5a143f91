mod gallery;

use std::sync::Arc;

use preview_common::{scene::LoadedTexture, RenderableAsset};
use thiserror::Error;
use tokio::{sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub use gallery::*;

use crate::{
    archive::{self, Extraction, ExtractError, Member},
    camera::{
        framing::{self, Framing},
        Camera,
    },
    classifier::{classify, classify_url, ExtensionToken},
    config_loader::FramingConfig,
    decode::{decode_blocking, DecodeError, DecodeStrategy},
    download::{
        AssetId, DownloadError, DownloadHandle, DownloadManager, ResolveError, Transport,
        UrlResolver,
    },
    texture_pool::TexturePool,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PreviewState {
    Idle,
    Downloading,
    Extracting,
    Decoding { remaining: usize },
    Ready,
    /// The asset could not be fetched. Loading it again is up to the user.
    Error { message: String },
}

/// Published on every state change of the orchestrator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreviewPhase {
    /// Identifies the load the state belongs to. Nil before the first load.
    pub session_id: Uuid,
    pub state: PreviewState,
}

#[derive(Debug, Error)]
pub enum PreviewError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Download(DownloadError),
    #[error("Extraction task failed: {0}")]
    Extract(#[source] tokio::task::JoinError),
    #[error("None of the {attempted} decodable files could be decoded")]
    AllMembersFailed { attempted: usize },
    #[error("Preview canceled")]
    Cancelled,
}

impl From<DownloadError> for PreviewError {
    fn from(error: DownloadError) -> Self {
        match error {
            DownloadError::Cancelled => PreviewError::Cancelled,
            error => PreviewError::Download(error),
        }
    }
}

impl From<ExtractError> for PreviewError {
    fn from(error: ExtractError) -> Self {
        match error {
            ExtractError::Cancelled => PreviewError::Cancelled,
        }
    }
}

/// Drives one asset from its id to a gallery of renderable previews.
///
/// Every load replaces the previous gallery. Decode failures of single
/// files only shrink the gallery, they never abort the load.
pub struct PreviewOrchestrator {
    downloads: DownloadManager,
    resolver: Arc<dyn UrlResolver>,
    transport: Arc<dyn Transport>,
    framing: FramingConfig,
    gallery: Gallery,
    phase_sender: watch::Sender<PreviewPhase>,
}

/// A layered image decoding in the background, and its place in the gallery.
struct PendingLayeredImage {
    slot: usize,
    name: String,
    task: JoinHandle<Result<RenderableAsset, DecodeError>>,
}

struct DecodeTally {
    attempted: usize,
    decoded: usize,
}

impl PreviewOrchestrator {
    pub fn new(
        downloads: DownloadManager,
        resolver: Arc<dyn UrlResolver>,
        transport: Arc<dyn Transport>,
        framing: FramingConfig,
    ) -> Self {
        let (phase_sender, _) = watch::channel(PreviewPhase {
            session_id: Uuid::nil(),
            state: PreviewState::Idle,
        });
        Self {
            downloads,
            resolver,
            transport,
            framing,
            gallery: Gallery::default(),
            phase_sender,
        }
    }

    pub fn downloads(&self) -> &DownloadManager {
        &self.downloads
    }

    pub async fn load(
        &mut self,
        asset_id: impl Into<AssetId>,
        file_name: impl Into<String>,
    ) -> Result<(), PreviewError> {
        self.load_with_cancel(asset_id, file_name, CancellationToken::new())
            .await
    }

    /// Downloads, unpacks and decodes an asset.
    ///
    /// A duplicate request for an asset that is still downloading is rejected
    /// with [`DownloadError::AlreadyInProgress`] and leaves the current gallery alone.
    /// Cancellation returns to [`PreviewState::Idle`] and is reported as
    /// [`PreviewError::Cancelled`].
    pub async fn load_with_cancel(
        &mut self,
        asset_id: impl Into<AssetId>,
        file_name: impl Into<String>,
        cancellation: CancellationToken,
    ) -> Result<(), PreviewError> {
        let asset_id = asset_id.into();
        let file_name = file_name.into();
        let handle = self
            .downloads
            .begin(asset_id.clone(), file_name.clone())
            .map_err(PreviewError::Download)?;

        let session_id = Uuid::new_v4();
        self.gallery = Gallery::default();
        self.publish(session_id, PreviewState::Downloading);

        match self.run(session_id, &handle, &cancellation).await {
            Ok(assets) => {
                log::info!("{file_name}: {} previews ready", assets.len());
                self.gallery = Gallery::new(assets);
                self.publish(session_id, PreviewState::Ready);
                Ok(())
            }
            Err(PreviewError::Cancelled) => {
                log::info!("Preview of {file_name} canceled");
                self.publish(session_id, PreviewState::Idle);
                Err(PreviewError::Cancelled)
            }
            Err(error @ PreviewError::AllMembersFailed { .. }) => {
                log::warn!("{file_name}: {error}");
                self.publish(session_id, PreviewState::Ready);
                Err(error)
            }
            Err(error) => {
                log::error!("Could not preview {file_name}: {error}");
                self.publish(
                    session_id,
                    PreviewState::Error {
                        message: error.to_string(),
                    },
                );
                Err(error)
            }
        }
    }

    async fn run(
        &self,
        session_id: Uuid,
        handle: &DownloadHandle,
        cancellation: &CancellationToken,
    ) -> Result<Vec<RenderableAsset>, PreviewError> {
        let asset_id = handle.asset_id().clone();

        let url = tokio::select! {
            biased;
            _ = cancellation.cancelled() => Err(PreviewError::Cancelled),
            url = self.resolver.resolve_download_url(&asset_id) => url.map_err(PreviewError::from),
        };
        let url = match url {
            Ok(url) => url,
            Err(error) => {
                self.downloads.end(&asset_id);
                return Err(error);
            }
        };

        let blob = tokio::select! {
            biased;
            _ = cancellation.cancelled() => {
                self.downloads.cancel(&asset_id);
                return Err(PreviewError::Cancelled);
            }
            blob = self.downloads.stream_and_report(handle, self.transport.as_ref(), url.as_str()) => blob?,
        };

        self.publish(session_id, PreviewState::Extracting);
        let mut extension = classify(&blob.file_name);
        if !extension.is_known() {
            extension = classify_url(url.as_str());
        }

        let members = {
            let blob = blob.clone();
            let extension = extension.clone();
            let cancellation = cancellation.clone();
            tokio::task::spawn_blocking(move || {
                archive::extract_with_cancel(&blob, &extension, &cancellation)
            })
            .await
            .map_err(PreviewError::Extract)??
        };

        let members: Vec<(Member, ExtensionToken)> = match members {
            Extraction::Members(members) => members
                .into_iter()
                .map(|member| {
                    let extension = member.extension();
                    (member, extension)
                })
                .collect(),
            Extraction::NotAnArchive => vec![(Member::from_blob(&blob), extension)],
        };

        self.decode_members(session_id, members, cancellation).await
    }

    /// Decodes the members in order. Textures land in the pool before the
    /// next mesh is bound. Layered images decode in the background and only
    /// reach meshes that start after they finished.
    async fn decode_members(
        &self,
        session_id: Uuid,
        members: Vec<(Member, ExtensionToken)>,
        cancellation: &CancellationToken,
    ) -> Result<Vec<RenderableAsset>, PreviewError> {
        let texture_pool = TexturePool::new();
        let mut slots: Vec<Option<RenderableAsset>> = Vec::with_capacity(members.len());
        let mut pending: Vec<PendingLayeredImage> = Vec::new();
        let mut tally = DecodeTally {
            attempted: 0,
            decoded: 0,
        };

        let mut remaining = members.len();
        self.publish(session_id, PreviewState::Decoding { remaining });

        for (member, extension) in members {
            if cancellation.is_cancelled() {
                abort_pending(pending);
                return Err(PreviewError::Cancelled);
            }

            let slot = slots.len();
            slots.push(None);

            match DecodeStrategy::for_extension(&extension) {
                None => {
                    log::debug!("No decoder for {}, skipping", member.name);
                }
                Some(DecodeStrategy::LayeredImage) => {
                    tally.attempted += 1;
                    let name = member.name.clone();
                    let task = tokio::spawn(decode_blocking(
                        member,
                        extension,
                        Vec::new(),
                        cancellation.clone(),
                    ));
                    pending.push(PendingLayeredImage { slot, name, task });
                }
                Some(strategy) => {
                    tally.attempted += 1;
                    if strategy == DecodeStrategy::Mesh {
                        collect_finished(&mut pending, &mut slots, &texture_pool, &mut tally).await?;
                    }

                    let name = member.name.clone();
                    let textures = texture_pool.snapshot();
                    match decode_blocking(member, extension, textures, cancellation.clone()).await {
                        Ok(asset) => {
                            pool_texture(&texture_pool, &asset);
                            tally.decoded += 1;
                            slots[slot] = Some(asset);
                        }
                        Err(DecodeError::Cancelled) => {
                            abort_pending(pending);
                            return Err(PreviewError::Cancelled);
                        }
                        Err(error) => log::warn!("Skipping {name}: {error}"),
                    }
                }
            }

            remaining -= 1;
            self.publish(session_id, PreviewState::Decoding { remaining });
        }

        for layered in pending {
            finish_layered_image(layered, &mut slots, &texture_pool, &mut tally).await?;
        }

        if tally.attempted > 0 && tally.decoded == 0 {
            return Err(PreviewError::AllMembersFailed {
                attempted: tally.attempted,
            });
        }

        Ok(slots.into_iter().flatten().collect())
    }

    pub fn state(&self) -> PreviewState {
        self.phase_sender.borrow().state.clone()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<PreviewPhase> {
        self.phase_sender.subscribe()
    }

    pub fn gallery(&self) -> &Gallery {
        &self.gallery
    }

    pub fn current(&self) -> Option<&RenderableAsset> {
        self.gallery.current()
    }

    pub fn current_view(&self) -> PreviewView<'_> {
        self.gallery.current_view()
    }

    pub fn next(&mut self) -> PreviewView<'_> {
        self.gallery.next();
        self.gallery.current_view()
    }

    pub fn previous(&mut self) -> PreviewView<'_> {
        self.gallery.previous();
        self.gallery.current_view()
    }

    /// Points `camera` at the displayed asset. `None` when nothing is displayed.
    pub fn frame_current(&mut self, camera: &mut Camera) -> Option<Framing> {
        let asset = self.gallery.current_mut()?;
        Some(framing::frame(asset, camera, &self.framing))
    }

    fn publish(&self, session_id: Uuid, state: PreviewState) {
        log::debug!("Preview {session_id}: {state:?}");
        self.phase_sender
            .send_replace(PreviewPhase { session_id, state });
    }
}

fn pool_texture(texture_pool: &TexturePool, asset: &RenderableAsset) {
    if let Some(image) = asset.image() {
        texture_pool.push(Arc::new(LoadedTexture::new(
            asset.source_name(),
            image.clone(),
        )));
    }
}

/// Moves layered images that are already done into the pool.
async fn collect_finished(
    pending: &mut Vec<PendingLayeredImage>,
    slots: &mut [Option<RenderableAsset>],
    texture_pool: &TexturePool,
    tally: &mut DecodeTally,
) -> Result<(), PreviewError> {
    let (finished, running): (Vec<_>, Vec<_>) = std::mem::take(pending)
        .into_iter()
        .partition(|layered| layered.task.is_finished());
    *pending = running;

    for layered in finished {
        finish_layered_image(layered, slots, texture_pool, tally).await?;
    }
    Ok(())
}

async fn finish_layered_image(
    layered: PendingLayeredImage,
    slots: &mut [Option<RenderableAsset>],
    texture_pool: &TexturePool,
    tally: &mut DecodeTally,
) -> Result<(), PreviewError> {
    match layered.task.await {
        Ok(Ok(asset)) => {
            pool_texture(texture_pool, &asset);
            tally.decoded += 1;
            slots[layered.slot] = Some(asset);
        }
        Ok(Err(DecodeError::Cancelled)) => return Err(PreviewError::Cancelled),
        Ok(Err(error)) => log::warn!("Skipping {}: {error}", layered.name),
        Err(join_error) => log::warn!("Skipping {}: {join_error}", layered.name),
    }
    Ok(())
}

fn abort_pending(pending: Vec<PendingLayeredImage>) {
    for layered in pending {
        layered.task.abort();
    }
}
