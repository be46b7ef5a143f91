mod collada_loader;
mod fbx_loader;
mod gltf_loader;
mod obj_loader;
mod psd_loader;
mod texture_loader;

use std::sync::Arc;

use preview_common::{
    scene::{LoadedTexture, SceneNode},
    RenderableAsset,
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub use collada_loader::{load_collada, ColladaError};
pub use fbx_loader::{load_fbx, FbxError};
pub use gltf_loader::{load_gltf, GltfLoadError};
pub use obj_loader::{load_obj, ObjError};
pub use psd_loader::{load_psd, PsdLoadError};
pub use texture_loader::load_texture;

use crate::{
    archive::Member,
    classifier::{ExtensionToken, FormatCategory},
    material_binder,
};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Could not decode {extension} texture: {cause}")]
    Texture {
        extension: String,
        #[source]
        cause: BoxError,
    },
    #[error("Could not decode {extension} mesh: {cause}")]
    Mesh {
        extension: String,
        #[source]
        cause: BoxError,
    },
    #[error("No decoder for '{0}' files")]
    Unsupported(String),
    #[error("Decoding canceled")]
    Cancelled,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodeStrategy {
    Texture,
    Mesh,
    LayeredImage,
}

impl DecodeStrategy {
    pub fn for_extension(extension: &ExtensionToken) -> Option<Self> {
        match extension.category() {
            FormatCategory::Raster => Some(DecodeStrategy::Texture),
            FormatCategory::Mesh => Some(DecodeStrategy::Mesh),
            FormatCategory::LayeredImage => Some(DecodeStrategy::LayeredImage),
            FormatCategory::Authoring | FormatCategory::Archive | FormatCategory::Other => None,
        }
    }
}

/// Whether the format brings its own materials, which must not be rebound.
fn has_native_materials(extension: &str) -> bool {
    matches!(extension, "glb" | "gltf")
}

/// Decodes one member. Meshes of formats without native materials get the
/// textures of `texture_pool` bound to their materials.
pub fn decode(
    member: &Member,
    extension: &ExtensionToken,
    texture_pool: &[Arc<LoadedTexture>],
) -> Result<RenderableAsset, DecodeError> {
    let Some(strategy) = DecodeStrategy::for_extension(extension) else {
        return Err(DecodeError::Unsupported(extension.to_string()));
    };
    let extension = extension.to_string();
    let source_name = member.name.clone();

    match strategy {
        DecodeStrategy::Texture => {
            let image = load_texture(&member.bytes, &extension).map_err(|cause| {
                DecodeError::Texture {
                    extension,
                    cause: cause.into(),
                }
            })?;
            Ok(RenderableAsset::Texture {
                image: Arc::new(image),
                source_name,
            })
        }
        DecodeStrategy::LayeredImage => {
            let image = load_psd(&member.bytes).map_err(|cause| DecodeError::Texture {
                extension,
                cause: cause.into(),
            })?;
            Ok(RenderableAsset::LayeredImage {
                image: Arc::new(image),
                source_name,
            })
        }
        DecodeStrategy::Mesh => {
            let mut root_node =
                load_mesh(&member.bytes, &extension, &source_name).map_err(|cause| {
                    DecodeError::Mesh {
                        extension: extension.clone(),
                        cause,
                    }
                })?;
            if !has_native_materials(&extension) {
                material_binder::bind(&mut root_node, texture_pool);
            }
            Ok(RenderableAsset::MeshScene {
                root_node,
                source_name,
            })
        }
    }
}

fn load_mesh(bytes: &[u8], extension: &str, source_name: &str) -> Result<SceneNode, BoxError> {
    let root_node = match extension {
        "glb" | "gltf" => load_gltf(bytes, source_name)?,
        "obj" => load_obj(bytes, source_name)?,
        "fbx" => load_fbx(bytes, source_name)?,
        "dae" => load_collada(bytes, source_name)?,
        other => return Err(format!("no mesh parser for {other}").into()),
    };
    Ok(root_node)
}

/// Runs [`decode`] on the blocking thread pool. Gives up with
/// [`DecodeError::Cancelled`] as soon as `cancellation` fires.
pub async fn decode_blocking(
    member: Member,
    extension: ExtensionToken,
    texture_pool: Vec<Arc<LoadedTexture>>,
    cancellation: CancellationToken,
) -> Result<RenderableAsset, DecodeError> {
    if cancellation.is_cancelled() {
        return Err(DecodeError::Cancelled);
    }

    let strategy = DecodeStrategy::for_extension(&extension);
    let extension_name = extension.to_string();
    let task =
        tokio::task::spawn_blocking(move || decode(&member, &extension, &texture_pool));

    tokio::select! {
        biased;
        _ = cancellation.cancelled() => Err(DecodeError::Cancelled),
        joined = task => match joined {
            Ok(result) => result,
            Err(join_error) => {
                let cause: BoxError = format!("decoder crashed: {join_error}").into();
                Err(match strategy {
                    Some(DecodeStrategy::Mesh) => DecodeError::Mesh { extension: extension_name, cause },
                    _ => DecodeError::Texture { extension: extension_name, cause },
                })
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use bytes::Bytes;
    use image::{Rgba, RgbaImage};
    use preview_common::scene::{ChannelRole, TextureImage};

    use super::*;
    use crate::classifier::classify;

    fn member(name: &str, bytes: impl Into<Bytes>) -> Member {
        Member {
            name: name.to_string(),
            bytes: bytes.into(),
            content_type: None,
        }
    }

    fn pool_texture(name: &str) -> Arc<LoadedTexture> {
        Arc::new(LoadedTexture::new(
            name,
            Arc::new(TextureImage::missing_texture()),
        ))
    }

    const TRIANGLE_OBJ: &str = "v 0 0 0\nv 1 0 0\nv 0 1 0\nusemtl skin_mat\nf 1 2 3\n";

    #[test]
    fn raster_members_become_textures() {
        let mut png = Cursor::new(Vec::new());
        RgbaImage::from_pixel(2, 2, Rgba([1, 2, 3, 4]))
            .write_to(&mut png, image::ImageFormat::Png)
            .unwrap();

        let asset = decode(&member("a.png", png.into_inner()), &classify("a.png"), &[]).unwrap();
        assert_eq!(asset.source_name(), "a.png");
        let image = asset.image().unwrap();
        assert_eq!(image.pixels, [1u8, 2, 3, 4].repeat(4));
    }

    #[test]
    fn obj_meshes_are_bound_to_pooled_textures() {
        let pool = [pool_texture("skin_diffuse.png")];
        let asset = decode(
            &member("model.obj", TRIANGLE_OBJ),
            &classify("model.obj"),
            &pool,
        )
        .unwrap();

        let root = asset.root_node().unwrap();
        let material = &root.models()[0].materials[0];
        assert!(material.channel(ChannelRole::BaseColor).is_some());
    }

    #[test]
    fn failures_are_typed_by_strategy() {
        assert!(matches!(
            decode(&member("a.png", "nope"), &classify("a.png"), &[]),
            Err(DecodeError::Texture { extension, .. }) if extension == "png"
        ));
        assert!(matches!(
            decode(&member("a.fbx", "nope"), &classify("a.fbx"), &[]),
            Err(DecodeError::Mesh { extension, .. }) if extension == "fbx"
        ));
        assert!(matches!(
            decode(&member("a.psd", "nope"), &classify("a.psd"), &[]),
            Err(DecodeError::Texture { .. })
        ));
        assert!(matches!(
            decode(&member("a.blend", "x"), &classify("a.blend"), &[]),
            Err(DecodeError::Unsupported(extension)) if extension == "blend"
        ));
    }

    #[tokio::test]
    async fn canceled_decodes_do_not_start() {
        let token = CancellationToken::new();
        token.cancel();

        let result = decode_blocking(
            member("model.obj", TRIANGLE_OBJ),
            classify("model.obj"),
            Vec::new(),
            token,
        )
        .await;
        assert!(matches!(result, Err(DecodeError::Cancelled)));
    }

    #[tokio::test]
    async fn cyclic_gltf_is_a_mesh_error() {
        let cyclic = r#"{"asset":{"version":"2.0"},"scene":0,"scenes":[{"nodes":[0]}],"nodes":[{"name":"a","children":[0]}]}"#;
        let result = decode_blocking(
            member("loop.gltf", cyclic),
            classify("loop.gltf"),
            Vec::new(),
            CancellationToken::new(),
        )
        .await;
        assert!(matches!(
            result,
            Err(DecodeError::Mesh { extension, .. }) if extension == "gltf"
        ));
    }

    #[tokio::test]
    async fn blocking_decode_returns_the_asset() {
        let asset = decode_blocking(
            member("model.obj", TRIANGLE_OBJ),
            classify("model.obj"),
            Vec::new(),
            CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(asset.root_node().unwrap().vertex_count(), 3);
    }
}
