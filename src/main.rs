use std::{path::Path, sync::Arc};

use anyhow::Context;
use asset_preview::{
    camera::{framing::Framing, Camera, CameraSettings},
    config_loader::{Config, ConfigFileLoader},
    download::{
        DirectoryResolver, DownloadManager, FileTransport, HttpAssetService, HttpTransport,
        Transport, UrlResolver,
    },
    preview::{PreviewError, PreviewOrchestrator, PreviewView},
    preview_common::RenderableAsset,
};
use env_logger::Env;

const CONFIG_PATH: &str = "asset-preview.json";

const USAGE: &str = "usage: asset-preview <asset-id> <file-name>\n       asset-preview --file <path>";

/// What to preview, taken from the command line.
struct Request {
    asset_id: String,
    file_name: String,
    resolver: Arc<dyn UrlResolver>,
    transport: Arc<dyn Transport>,
}

fn parse_request(args: &[String], config: &Config) -> anyhow::Result<Request> {
    match args {
        [_, flag, path] if flag == "--file" => {
            let path = Path::new(path);
            let file_name = path
                .file_name()
                .context("The path does not name a file")?
                .to_string_lossy()
                .into_owned();
            let root = match path.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
                _ => ".".into(),
            };
            Ok(Request {
                asset_id: file_name.clone(),
                file_name,
                resolver: Arc::new(DirectoryResolver { root }),
                transport: Arc::new(FileTransport),
            })
        }
        [_, asset_id, file_name] => {
            let client = reqwest::Client::new();
            Ok(Request {
                asset_id: asset_id.clone(),
                file_name: file_name.clone(),
                resolver: Arc::new(HttpAssetService::new(
                    client.clone(),
                    config.service.api_base_url.clone(),
                    config.service.bearer_token.clone(),
                )),
                transport: Arc::new(HttpTransport::new(client)),
            })
        }
        _ => anyhow::bail!(USAGE),
    }
}

fn describe(asset: &RenderableAsset) -> String {
    match asset {
        RenderableAsset::MeshScene { root_node, .. } => {
            let mut lines = vec![format!("mesh, {} vertices", root_node.vertex_count())];
            for model in root_node.models() {
                for material in model.materials.iter() {
                    let channels: Vec<String> = material
                        .bound_channels()
                        .iter()
                        .map(|role| role.to_string())
                        .collect();
                    lines.push(format!(
                        "    material {}: [{}]{}",
                        material.name,
                        channels.join(", "),
                        if material.transparent { " transparent" } else { "" }
                    ));
                }
            }
            lines.join("\n")
        }
        RenderableAsset::Texture { image, .. } => {
            format!("texture, {}x{}", image.width, image.height)
        }
        RenderableAsset::LayeredImage { image, .. } => {
            format!("layered image, {}x{}", image.width, image.height)
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("warn")).init();

    let mut config_loader = ConfigFileLoader::new(CONFIG_PATH);
    let config = config_loader.get_or_load_config()?.clone();

    let args: Vec<String> = std::env::args().collect();
    let request = parse_request(&args, &config)?;

    let downloads = DownloadManager::new(config.download.completion_grace());
    let mut progress = downloads.subscribe();
    tokio::spawn(async move {
        while let Ok(update) = progress.recv().await {
            log::info!("{}: {}%", update.file_name, update.progress_percent);
        }
    });

    let mut orchestrator = PreviewOrchestrator::new(
        downloads,
        request.resolver,
        request.transport,
        config.framing.clone(),
    );

    match orchestrator
        .load(request.asset_id.as_str(), request.file_name.as_str())
        .await
    {
        Ok(()) | Err(PreviewError::AllMembersFailed { .. }) => {}
        Err(error) => return Err(error).context("Preview failed"),
    }

    let mut camera = Camera::new(CameraSettings::from(&config.camera));
    let count = orchestrator.gallery().len();
    if count == 0 {
        println!("{}", orchestrator.current_view().label());
        return Ok(());
    }

    for index in 0..count {
        let framing = orchestrator.frame_current(&mut camera);
        if let PreviewView::Asset(asset) = orchestrator.current_view() {
            println!("[{}/{count}] {}: {}", index + 1, asset.source_name(), describe(asset));
        }
        match framing {
            Some(Framing::Fitted {
                distance,
                scale_factor,
                ..
            }) => println!(
                "    camera at {:?}, distance {distance:.3}, scale {scale_factor:.3}",
                camera.position
            ),
            Some(Framing::DefaultPose) | None => {
                println!("    camera at default pose {:?}", camera.position)
            }
        }
        orchestrator.next();
    }

    Ok(())
}
