use std::sync::Arc;

use crate::scene::{SceneNode, TextureImage};

/// Anything the previewer can put on screen.
/// `source_name` is always the member file name the asset was decoded from.
#[derive(Debug, Clone)]
pub enum RenderableAsset {
    MeshScene {
        root_node: SceneNode,
        source_name: String,
    },
    Texture {
        image: Arc<TextureImage>,
        source_name: String,
    },
    LayeredImage {
        image: Arc<TextureImage>,
        source_name: String,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderableKind {
    MeshScene,
    Texture,
    LayeredImage,
}

impl RenderableAsset {
    pub fn source_name(&self) -> &str {
        match self {
            RenderableAsset::MeshScene { source_name, .. }
            | RenderableAsset::Texture { source_name, .. }
            | RenderableAsset::LayeredImage { source_name, .. } => source_name,
        }
    }

    pub fn kind(&self) -> RenderableKind {
        match self {
            RenderableAsset::MeshScene { .. } => RenderableKind::MeshScene,
            RenderableAsset::Texture { .. } => RenderableKind::Texture,
            RenderableAsset::LayeredImage { .. } => RenderableKind::LayeredImage,
        }
    }

    pub fn root_node(&self) -> Option<&SceneNode> {
        match self {
            RenderableAsset::MeshScene { root_node, .. } => Some(root_node),
            _ => None,
        }
    }

    pub fn root_node_mut(&mut self) -> Option<&mut SceneNode> {
        match self {
            RenderableAsset::MeshScene { root_node, .. } => Some(root_node),
            _ => None,
        }
    }

    /// The flat image of texture-like assets.
    pub fn image(&self) -> Option<&Arc<TextureImage>> {
        match self {
            RenderableAsset::Texture { image, .. } | RenderableAsset::LayeredImage { image, .. } => {
                Some(image)
            }
            RenderableAsset::MeshScene { .. } => None,
        }
    }
}
