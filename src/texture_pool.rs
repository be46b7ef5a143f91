use std::sync::Arc;

use parking_lot::Mutex;
use preview_common::scene::LoadedTexture;

/// Decoded textures of the asset that is currently loading.
///
/// Append-only. Readers work on snapshots, so a texture that arrives while a
/// mesh is being bound is only seen by later binds.
#[derive(Clone, Default)]
pub struct TexturePool {
    textures: Arc<Mutex<Vec<Arc<LoadedTexture>>>>,
}

impl TexturePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, texture: Arc<LoadedTexture>) {
        log::debug!("Pooled texture {}", texture.name);
        self.textures.lock().push(texture);
    }

    pub fn snapshot(&self) -> Vec<Arc<LoadedTexture>> {
        self.textures.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.textures.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
